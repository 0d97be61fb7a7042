//! Reduction, search and decoding.

use std::collections::{BTreeSet, VecDeque};
use std::sync::atomic::Ordering as AtomicOrdering;
use std::time::Instant;

use fxhash::{FxHashMap, FxHashSet};
use krait_conda_types::{MatchSpec, Matches, PackageName, RepoDataRecord};

use crate::conflict::{Conflict, ConflictCause, RejectedCandidate};
use crate::pool::{CandidateId, NameId, Pool, SpecId};
use crate::{
    ChannelPriority, DepsModifier, SolveError, SolverResult, SolverTask, UpdateModifier,
};

/// Solves the given task, returning the target record set or a structured
/// error. The result is deterministic: identical inputs yield bit-for-bit
/// identical outputs regardless of map iteration order.
#[tracing::instrument(skip_all, fields(specs = task.specs.len(), installed = task.installed.len()))]
pub fn solve(task: &SolverTask<'_>) -> Result<SolverResult, SolveError> {
    let deadline = task.options.timeout.map(|timeout| Instant::now() + timeout);

    // Resolve every requested spec to a package name. A nameless spec (an
    // exact-hash spec) is resolved by scanning the index for the record it
    // identifies.
    let mut requested: Vec<(PackageName, MatchSpec)> = Vec::new();
    for spec in &task.specs {
        match spec.name.clone() {
            Some(name) => requested.push((name, spec.clone())),
            None => {
                let mut matches: Vec<&RepoDataRecord> = task
                    .index
                    .records()
                    .filter(|record| spec.matches(*record))
                    .collect();
                matches.sort_by(|a, b| a.package_record.name.cmp(&b.package_record.name));
                match matches.first() {
                    Some(record) => {
                        requested.push((record.package_record.name.clone(), spec.clone()));
                    }
                    None => return Err(SolveError::PackageNotFound(spec.to_string())),
                }
            }
        }
    }

    // A requested name that neither the index nor the prefix knows at all.
    for (name, spec) in &requested {
        let known = !task.index.query(name).is_empty()
            || task
                .installed
                .iter()
                .any(|installed| &installed.repodata_record.package_record.name == name);
        if !known {
            return Err(SolveError::PackageNotFound(spec.to_string()));
        }
    }

    let freeze = task.options.freeze_installed
        || task.options.update_modifier == UpdateModifier::FreezeInstalled;
    let requested_names: FxHashSet<&PackageName> =
        requested.iter().map(|(name, _)| name).collect();

    // ----- Reduction: build the working pool ------------------------------

    let mut pool = Pool::default();
    // Requested names always exist in the pool, even when no candidate
    // survives the reduction; an empty candidate list then reports as a
    // conflict instead of an unknown package.
    for (name, _) in &requested {
        pool.intern_name(name);
    }
    let installed_records: FxHashMap<&PackageName, &RepoDataRecord> = task
        .installed
        .iter()
        .map(|record| {
            (
                &record.repodata_record.package_record.name,
                &record.repodata_record,
            )
        })
        .collect();

    // The worklist carries (name, incoming spec) pairs; a candidate enters
    // the pool only when some incoming spec accepts it.
    let mut worklist: VecDeque<(PackageName, MatchSpec, bool)> = VecDeque::new();
    let mut seen_edges: FxHashSet<(String, String)> = FxHashSet::default();

    let push_edge = |worklist: &mut VecDeque<(PackageName, MatchSpec, bool)>,
                         seen: &mut FxHashSet<(String, String)>,
                         name: &PackageName,
                         spec: MatchSpec,
                         from_root: bool| {
        let key = (name.as_normalized().to_owned(), spec.to_string());
        if seen.insert(key) {
            worklist.push_back((name.clone(), spec, from_root));
        }
    };

    for (name, spec) in &requested {
        push_edge(&mut worklist, &mut seen_edges, name, spec.clone(), true);
    }
    if !task.options.prune {
        // Installed packages stay part of the environment; they are pulled
        // in with an unconstrained spec so better versions stay reachable.
        for record in &task.installed {
            let name = &record.repodata_record.package_record.name;
            push_edge(
                &mut worklist,
                &mut seen_edges,
                name,
                MatchSpec::from_name(name.clone()),
                true,
            );
        }
    }

    let pins_by_name: FxHashMap<&PackageName, Vec<&MatchSpec>> = {
        let mut pins: FxHashMap<&PackageName, Vec<&MatchSpec>> = FxHashMap::default();
        for pin in &task.pinned {
            if let Some(name) = pin.name.as_ref() {
                pins.entry(name).or_default().push(pin);
            }
        }
        pins
    };

    while let Some((name, spec, from_root)) = worklist.pop_front() {
        let no_deps_cutoff =
            task.options.deps_modifier == DepsModifier::NoDeps && from_root;

        // Candidate records: the index plus the installed record (which may
        // no longer be present in the repodata).
        let frozen_here = freeze
            && installed_records.contains_key(&name)
            && !requested_names.contains(&name);

        let mut added: Vec<CandidateId> = Vec::new();
        if let Some(&installed) = installed_records.get(&name) {
            if spec.matches(installed) || frozen_here {
                let priority = task
                    .index
                    .channel_priority(&installed.channel)
                    .unwrap_or(u32::MAX);
                if let Some(id) = pool.add_candidate(installed.clone(), true, priority)? {
                    added.push(id);
                }
            }
        }

        if !frozen_here {
            for record in task.index.query(&name) {
                // Platform reduction: only records for the target platform
                // and noarch survive.
                let subdir = &record.package_record.subdir;
                if !subdir.is_empty()
                    && subdir != task.platform.as_str()
                    && subdir != "noarch"
                {
                    continue;
                }
                if !spec.matches(record) {
                    continue;
                }
                if pins_by_name
                    .get(&name)
                    .is_some_and(|pins| pins.iter().any(|pin| !pin.matches(record)))
                {
                    continue;
                }
                let priority = task
                    .index
                    .channel_priority(&record.channel)
                    .unwrap_or(u32::MAX);
                if let Some(id) = pool.add_candidate(record.clone(), false, priority)? {
                    added.push(id);
                }
            }
        }

        if no_deps_cutoff {
            continue;
        }

        // Enqueue the dependency edges of every newly added candidate.
        for id in added {
            for spec_id in pool.candidates[id].depends.clone() {
                let parsed = &pool.specs[spec_id];
                if let Some(dep_name_id) = parsed.name {
                    let dep_name = pool.name(dep_name_id).clone();
                    let dep_spec = parsed.spec.clone();
                    push_edge(&mut worklist, &mut seen_edges, &dep_name, dep_spec, false);
                }
            }
        }
    }

    // ----- Search ---------------------------------------------------------

    // Update targets decide for which names the installed record is
    // preferred over newer versions.
    let mut update_targets: FxHashSet<NameId> = FxHashSet::default();
    match task.options.update_modifier {
        UpdateModifier::UpdateAll => {
            for id in 0..pool.name_count() {
                update_targets.insert(id);
            }
        }
        UpdateModifier::UpdateSpecs | UpdateModifier::SpecsOrDeps => {
            for name in &requested_names {
                if let Some(id) = pool.lookup_name(name) {
                    update_targets.insert(id);
                }
            }
        }
        UpdateModifier::UpdateDeps => {
            // The requested names and the transitive closure of their
            // dependencies.
            let mut queue: VecDeque<NameId> = requested_names
                .iter()
                .filter_map(|name| pool.lookup_name(name))
                .collect();
            while let Some(name_id) = queue.pop_front() {
                if !update_targets.insert(name_id) {
                    continue;
                }
                for &candidate in pool.candidates_of(name_id) {
                    for &spec_id in &pool.candidates[candidate].depends {
                        if let Some(dep) = pool.specs[spec_id].name {
                            if !update_targets.contains(&dep) {
                                queue.push_back(dep);
                            }
                        }
                    }
                }
            }
        }
        UpdateModifier::FreezeInstalled => {}
    }

    let mut root_specs: Vec<(NameId, MatchSpec)> = Vec::new();
    let mut pending: BTreeSet<NameId> = BTreeSet::new();
    for (name, spec) in &requested {
        match pool.lookup_name(name) {
            Some(id) => {
                root_specs.push((id, spec.clone()));
                pending.insert(id);
            }
            None => return Err(SolveError::PackageNotFound(spec.to_string())),
        }
    }
    if !task.options.prune {
        for record in &task.installed {
            if let Some(id) = pool.lookup_name(&record.repodata_record.package_record.name) {
                pending.insert(id);
            }
        }
    }

    let mut frozen: FxHashSet<NameId> = FxHashSet::default();
    if freeze {
        for record in &task.installed {
            let name = &record.repodata_record.package_record.name;
            if !requested_names.contains(name) {
                if let Some(id) = pool.lookup_name(name) {
                    frozen.insert(id);
                }
            }
        }
    }

    let mut pins: FxHashMap<NameId, Vec<MatchSpec>> = FxHashMap::default();
    for pin in &task.pinned {
        if let Some(name) = pin.name.as_ref() {
            if let Some(id) = pool.lookup_name(name) {
                pins.entry(id).or_default().push(pin.clone());
            }
        }
    }

    let ordered_candidates = (0..pool.name_count())
        .map(|name_id| {
            order_candidates(
                &pool,
                name_id,
                task.options.channel_priority,
                update_targets.contains(&name_id),
            )
        })
        .collect();

    // Names the index (or the prefix) knows, regardless of whether any
    // candidate survived the reduction. Distinguishes "nothing provides"
    // from "every provider was filtered out".
    let known_names: FxHashSet<NameId> = (0..pool.name_count())
        .filter(|&id| {
            !task.index.query(pool.name(id)).is_empty()
                || installed_records.contains_key(pool.name(id))
        })
        .collect();

    let mut searcher = Searcher {
        pool: &pool,
        no_deps: task.options.deps_modifier == DepsModifier::NoDeps,
        root_specs,
        pins,
        frozen,
        known_names,
        ordered_candidates,
        chosen: vec![None; pool.name_count()],
        reason: vec![None; pool.name_count()],
        deadline,
        cancel: task.cancel.clone(),
    };

    match searcher.search(pending) {
        Ok(()) => {}
        Err(Failure::Conflict(conflict)) => return Err(SolveError::Unsolvable(conflict)),
        Err(Failure::NothingProvides { spec, required_by }) => {
            return Err(SolveError::NothingProvides { spec, required_by })
        }
        Err(Failure::Timeout) => return Err(SolveError::Timeout),
        Err(Failure::Cancelled) => return Err(SolveError::Cancelled),
    }

    // ----- Decode and re-verify ------------------------------------------

    let chosen = searcher.chosen;
    let mut records: Vec<RepoDataRecord> = chosen
        .iter()
        .filter_map(|&candidate| candidate.map(|id| pool.candidates[id].record.clone()))
        .collect();

    if task.options.deps_modifier == DepsModifier::OnlyDeps {
        // Requested packages are dropped unless another chosen record also
        // depends on them.
        let required_elsewhere: FxHashSet<&PackageName> = chosen
            .iter()
            .flatten()
            .flat_map(|&id| pool.candidates[id].depends.iter())
            .filter_map(|&spec_id| pool.specs[spec_id].name)
            .map(|name_id| pool.name(name_id))
            .collect();
        records.retain(|record| {
            !requested_names.contains(&record.package_record.name)
                || required_elsewhere.contains(&record.package_record.name)
        });
    }

    records.sort_by(|a, b| {
        a.package_record
            .name
            .cmp(&b.package_record.name)
            .then_with(|| b.package_record.version.cmp(&a.package_record.version))
            .then_with(|| b.package_record.build.cmp(&a.package_record.build))
    });

    if task.options.deps_modifier == DepsModifier::NotRequired {
        verify_solution(&records, &task.specs)?;
    }

    Ok(SolverResult { records })
}

/// Re-verifies a decoded solution: every requested spec must be satisfied
/// and the set must be closed under `depends` and consistent with
/// `constrains`. A failure here is a solver bug surfaced as a conflict
/// rather than silently repaired.
fn verify_solution(records: &[RepoDataRecord], specs: &[MatchSpec]) -> Result<(), SolveError> {
    for spec in specs {
        if !records.iter().any(|record| spec.matches(record)) {
            return Err(SolveError::Unsolvable(Conflict {
                package: spec
                    .name
                    .as_ref()
                    .map(|name| name.as_normalized().to_owned())
                    .unwrap_or_else(|| spec.to_string()),
                causes: vec![ConflictCause::requested(spec.to_string())],
                rejected: vec![RejectedCandidate {
                    candidate: "<solution>".to_owned(),
                    reason: "the decoded solution does not satisfy the requested spec".to_owned(),
                }],
            }));
        }
    }

    let package_records: Vec<_> = records.iter().map(|r| &r.package_record).collect();
    if let Err(error) = krait_conda_types::PackageRecord::validate(&package_records) {
        return Err(SolveError::Unsolvable(Conflict {
            package: String::new(),
            causes: vec![],
            rejected: vec![RejectedCandidate {
                candidate: "<solution>".to_owned(),
                reason: error.to_string(),
            }],
        }));
    }
    Ok(())
}

/// Sorts the candidates of one name into the greedy preference order that
/// encodes the objective:
///
/// 1. fewer channel-priority violations (strict mode sorts channel first,
///    dominating every other criterion),
/// 2. for names that are not update targets, the installed record first
///    (prefer no change, and with it no downgrade),
/// 3. fewer `track_features`,
/// 4. higher version,
/// 5. higher build number,
/// 6. channel priority as a soft tiebreak (flexible mode),
/// 7. newer timestamp,
///
/// with a final total tiebreak on (version, build, filename) so the order
/// never depends on hash iteration.
fn order_candidates(
    pool: &Pool,
    name: NameId,
    channel_priority: ChannelPriority,
    is_update_target: bool,
) -> Vec<CandidateId> {
    let mut ids = pool.candidates_of(name).to_vec();
    ids.sort_by(|&a, &b| {
        let a_c = &pool.candidates[a];
        let b_c = &pool.candidates[b];

        if channel_priority == ChannelPriority::Strict {
            match a_c.channel_priority.cmp(&b_c.channel_priority) {
                std::cmp::Ordering::Equal => {}
                ordering => return ordering,
            }
        }

        if !is_update_target {
            match b_c.installed.cmp(&a_c.installed) {
                std::cmp::Ordering::Equal => {}
                ordering => return ordering,
            }
        }

        let a_track = a_c.record.package_record.track_features.len();
        let b_track = b_c.record.package_record.track_features.len();
        a_track
            .cmp(&b_track)
            .then_with(|| {
                b_c.record
                    .package_record
                    .version
                    .cmp(&a_c.record.package_record.version)
            })
            .then_with(|| {
                b_c.record
                    .package_record
                    .build_number
                    .cmp(&a_c.record.package_record.build_number)
            })
            .then_with(|| {
                if channel_priority == ChannelPriority::Flexible {
                    a_c.channel_priority.cmp(&b_c.channel_priority)
                } else {
                    std::cmp::Ordering::Equal
                }
            })
            .then_with(|| {
                b_c.record
                    .package_record
                    .timestamp
                    .cmp(&a_c.record.package_record.timestamp)
            })
            .then_with(|| {
                b_c.record
                    .package_record
                    .build
                    .cmp(&a_c.record.package_record.build)
            })
            .then_with(|| a_c.record.file_name.cmp(&b_c.record.file_name))
    });
    ids
}

enum Failure {
    Conflict(Conflict),
    NothingProvides { spec: String, required_by: String },
    Timeout,
    Cancelled,
}

/// One constraint active on a name during the search.
struct ActiveConstraint {
    spec: MatchSpec,
    source: ConstraintSource,
    /// Constrains only forbid; they never demand the package.
    forbidding_only: bool,
}

enum ConstraintSource {
    Requested(String),
    Pin(String),
    Frozen,
    Record { name: NameId, spec: SpecId },
}

struct Searcher<'p> {
    pool: &'p Pool,
    no_deps: bool,
    root_specs: Vec<(NameId, MatchSpec)>,
    pins: FxHashMap<NameId, Vec<MatchSpec>>,
    frozen: FxHashSet<NameId>,
    known_names: FxHashSet<NameId>,
    ordered_candidates: Vec<Vec<CandidateId>>,
    chosen: Vec<Option<CandidateId>>,
    /// For every name, the (parent name, dep spec) edge through which it was
    /// first required. Used to reconstruct conflict chains.
    reason: Vec<Option<(NameId, SpecId)>>,
    deadline: Option<Instant>,
    cancel: Option<std::sync::Arc<std::sync::atomic::AtomicBool>>,
}

impl<'p> Searcher<'p> {
    fn check_limits(&self) -> Result<(), Failure> {
        if let Some(deadline) = self.deadline {
            if Instant::now() > deadline {
                return Err(Failure::Timeout);
            }
        }
        if let Some(cancel) = &self.cancel {
            if cancel.load(AtomicOrdering::Relaxed) {
                return Err(Failure::Cancelled);
            }
        }
        Ok(())
    }

    /// Gathers every constraint that is currently active on `name`.
    fn active_constraints(&self, name: NameId) -> Vec<ActiveConstraint> {
        let mut constraints = Vec::new();

        for (root_name, spec) in &self.root_specs {
            if *root_name == name {
                constraints.push(ActiveConstraint {
                    spec: spec.clone(),
                    source: ConstraintSource::Requested(spec.to_string()),
                    forbidding_only: false,
                });
            }
        }

        if let Some(pins) = self.pins.get(&name) {
            for pin in pins {
                constraints.push(ActiveConstraint {
                    spec: pin.clone(),
                    source: ConstraintSource::Pin(pin.to_string()),
                    forbidding_only: false,
                });
            }
        }

        for (chooser, &candidate) in self.chosen.iter().enumerate() {
            let Some(candidate) = candidate else { continue };
            let candidate = &self.pool.candidates[candidate];
            for &spec_id in &candidate.depends {
                if self.pool.specs[spec_id].name == Some(name) {
                    constraints.push(ActiveConstraint {
                        spec: self.pool.specs[spec_id].spec.clone(),
                        source: ConstraintSource::Record {
                            name: chooser,
                            spec: spec_id,
                        },
                        forbidding_only: false,
                    });
                }
            }
            for &spec_id in &candidate.constrains {
                if self.pool.specs[spec_id].name == Some(name) {
                    constraints.push(ActiveConstraint {
                        spec: self.pool.specs[spec_id].spec.clone(),
                        source: ConstraintSource::Record {
                            name: chooser,
                            spec: spec_id,
                        },
                        forbidding_only: true,
                    });
                }
            }
        }

        constraints
    }

    /// Returns the reason a candidate cannot be chosen under the current
    /// assignment, or `None` when it is compatible.
    fn incompatibility(
        &self,
        name: NameId,
        candidate_id: CandidateId,
        constraints: &[ActiveConstraint],
    ) -> Option<String> {
        let candidate = &self.pool.candidates[candidate_id];
        let record = &candidate.record;

        if self.frozen.contains(&name) && !candidate.installed {
            return Some("the installed package is frozen".to_owned());
        }

        for constraint in constraints {
            if !constraint.spec.matches(record) {
                let source = match &constraint.source {
                    ConstraintSource::Requested(spec) => format!("the user requested '{spec}'"),
                    ConstraintSource::Pin(spec) => format!("pinned to '{spec}'"),
                    ConstraintSource::Frozen => "the installed package is frozen".to_owned(),
                    ConstraintSource::Record { name, spec } => format!(
                        "'{}' requires '{}'",
                        self.chosen[*name]
                            .map(|id| self.pool.candidates[id].display())
                            .unwrap_or_else(|| self.pool.name(*name).as_normalized().to_owned()),
                        self.pool.specs[*spec].source
                    ),
                };
                if constraint.forbidding_only {
                    // Constrains only act when the package is chosen, which
                    // is exactly what is happening here.
                    return Some(format!("violates constraint: {source}"));
                }
                return Some(format!("does not satisfy: {source}"));
            }
        }

        // The candidate's own dependencies and constrains must agree with
        // every already chosen record.
        for &spec_id in &candidate.depends {
            let parsed = &self.pool.specs[spec_id];
            if let Some(dep_name) = parsed.name {
                if let Some(chosen) = self.chosen[dep_name] {
                    if !parsed.spec.matches(&self.pool.candidates[chosen].record) {
                        return Some(format!(
                            "requires '{}' but '{}' is selected",
                            parsed.source,
                            self.pool.candidates[chosen].display()
                        ));
                    }
                }
            }
        }
        for &spec_id in &candidate.constrains {
            let parsed = &self.pool.specs[spec_id];
            if let Some(constrained) = parsed.name {
                if let Some(chosen) = self.chosen[constrained] {
                    if !parsed.spec.matches(&self.pool.candidates[chosen].record) {
                        return Some(format!(
                            "constrains '{}' but '{}' is selected",
                            parsed.source,
                            self.pool.candidates[chosen].display()
                        ));
                    }
                }
            }
        }

        None
    }

    /// Reconstructs the requirement chain from a user request to `name`.
    fn requirement_chain(&self, name: NameId) -> Vec<String> {
        let mut chain = Vec::new();
        let mut current = name;
        while let Some((parent, spec)) = self.reason[current] {
            let parent_display = self.chosen[parent]
                .map(|id| self.pool.candidates[id].display())
                .unwrap_or_else(|| self.pool.name(parent).as_normalized().to_owned());
            chain.push(format!(
                "{parent_display} requires '{}'",
                self.pool.specs[spec].source
            ));
            current = parent;
        }
        chain.reverse();
        chain
    }

    /// The recursive backtracking walk. `pending` holds the names that are
    /// demanded but not yet decided.
    fn search(&mut self, mut pending: BTreeSet<NameId>) -> Result<(), Failure> {
        // Skip names that were decided while they sat in the queue.
        let name = loop {
            let Some(&name) = pending.iter().next() else {
                return Ok(());
            };
            pending.remove(&name);
            if self.chosen[name].is_none() {
                break name;
            }
        };

        self.check_limits()?;

        let constraints = self.active_constraints(name);
        let candidates = self.ordered_candidates[name].clone();
        let mut rejected: Vec<RejectedCandidate> = Vec::new();
        // The first dependency seen that no known package provides. Only
        // reported once every candidate of this name is exhausted; another
        // candidate may simply not carry the dependency.
        let mut missing_dep: Option<(String, String)> = None;

        for candidate_id in candidates {
            if let Some(reason) = self.incompatibility(name, candidate_id, &constraints) {
                rejected.push(RejectedCandidate {
                    candidate: self.pool.candidates[candidate_id].display(),
                    reason,
                });
                continue;
            }

            self.chosen[name] = Some(candidate_id);

            // Demand the dependencies of the chosen candidate.
            let mut next_pending = pending.clone();
            let mut dep_rejection = None;
            if !self.no_deps {
                for &spec_id in &self.pool.candidates[candidate_id].depends {
                    let parsed = &self.pool.specs[spec_id];
                    let Some(dep_name) = parsed.name else { continue };
                    if self.pool.candidates_of(dep_name).is_empty() {
                        // Virtual packages are provided by the system, their
                        // absence from the pool is not an error.
                        if parsed.spec.is_virtual() {
                            continue;
                        }
                        if self.known_names.contains(&dep_name) {
                            // Providers exist but were all filtered out by
                            // other constraints; reject this candidate.
                            dep_rejection = Some(format!(
                                "requires '{}' but no candidate satisfies it",
                                parsed.source
                            ));
                        } else {
                            if missing_dep.is_none() {
                                missing_dep = Some((
                                    parsed.source.clone(),
                                    self.pool.candidates[candidate_id].display(),
                                ));
                            }
                            dep_rejection = Some(format!(
                                "depends on '{}' which nothing provides",
                                parsed.source
                            ));
                        }
                        break;
                    }
                    if self.chosen[dep_name].is_none() {
                        next_pending.insert(dep_name);
                        if self.reason[dep_name].is_none() {
                            self.reason[dep_name] = Some((name, spec_id));
                        }
                    }
                }
            }

            if let Some(reason) = dep_rejection {
                self.chosen[name] = None;
                rejected.push(RejectedCandidate {
                    candidate: self.pool.candidates[candidate_id].display(),
                    reason,
                });
                continue;
            }

            match self.search(next_pending) {
                Ok(()) => return Ok(()),
                Err(Failure::Conflict(conflict)) => {
                    self.chosen[name] = None;
                    rejected.push(RejectedCandidate {
                        candidate: self.pool.candidates[candidate_id].display(),
                        reason: format!("leads to a conflict on '{}'", conflict.package),
                    });
                    // Keep searching with the next candidate; remember the
                    // nested conflict in case nothing works out.
                }
                Err(failure) => {
                    self.chosen[name] = None;
                    return Err(failure);
                }
            }
        }

        // Every candidate failed. When one of them needed a dependency that
        // no known package provides, that is the actionable error.
        if let Some((spec, required_by)) = missing_dep {
            return Err(Failure::NothingProvides { spec, required_by });
        }

        // Otherwise report the conflict for this name.
        let mut causes: Vec<ConflictCause> = Vec::new();
        for constraint in &constraints {
            match &constraint.source {
                ConstraintSource::Requested(spec) => {
                    causes.push(ConflictCause::requested(spec.clone()));
                }
                ConstraintSource::Pin(spec) => {
                    causes.push(ConflictCause::through(
                        format!("pin {spec}"),
                        Vec::new(),
                    ));
                }
                ConstraintSource::Frozen => {
                    causes.push(ConflictCause::through(
                        "frozen installed package",
                        Vec::new(),
                    ));
                }
                ConstraintSource::Record { name: parent, spec } => {
                    let mut chain = self.requirement_chain(*parent);
                    chain.push(
                        self.chosen[*parent]
                            .map(|id| self.pool.candidates[id].display())
                            .unwrap_or_else(|| {
                                self.pool.name(*parent).as_normalized().to_owned()
                            }),
                    );
                    causes.push(ConflictCause::through(
                        self.pool.specs[*spec].source.clone(),
                        chain,
                    ));
                }
            }
        }
        if self.frozen.contains(&name) {
            causes.push(ConflictCause::through(
                "frozen installed package",
                Vec::new(),
            ));
        }

        Err(Failure::Conflict(Conflict {
            package: self.pool.name(name).as_normalized().to_owned(),
            causes,
            rejected,
        }))
    }
}
