//! Interning of names, specs and candidates for the solver.
//!
//! Records and match specs reference each other in cycles; to keep the
//! solver free of ownership puzzles everything lives in flat arenas indexed
//! by small integer ids.

use fxhash::FxHashMap;
use krait_conda_types::{MatchSpec, PackageName, RepoDataRecord};

use crate::SolveError;

/// Identifies an interned package name.
pub(crate) type NameId = usize;

/// Identifies a candidate record.
pub(crate) type CandidateId = usize;

/// Identifies a parsed match spec.
pub(crate) type SpecId = usize;

/// A parsed match spec together with its source string and the interned id
/// of the package name it constrains.
pub(crate) struct ParsedSpec {
    pub spec: MatchSpec,
    pub source: String,
    pub name: Option<NameId>,
}

/// A single candidate: one record that may be chosen for its name.
pub(crate) struct Candidate {
    pub record: RepoDataRecord,
    /// True when this exact record is currently installed in the prefix.
    pub installed: bool,
    pub depends: Vec<SpecId>,
    pub constrains: Vec<SpecId>,
    /// Priority of the channel the record comes from; lower is better.
    pub channel_priority: u32,
}

impl Candidate {
    /// Display form used in conflict reports.
    pub fn display(&self) -> String {
        self.record.package_record.to_string()
    }
}

/// The arena of names, specs and candidates the solver works on.
#[derive(Default)]
pub(crate) struct Pool {
    names: Vec<PackageName>,
    name_ids: FxHashMap<PackageName, NameId>,

    pub specs: Vec<ParsedSpec>,
    spec_ids: FxHashMap<String, SpecId>,

    pub candidates: Vec<Candidate>,
    pub candidates_by_name: Vec<Vec<CandidateId>>,
}

impl Pool {
    /// Interns a package name, returning a stable id.
    pub fn intern_name(&mut self, name: &PackageName) -> NameId {
        if let Some(&id) = self.name_ids.get(name) {
            return id;
        }
        let id = self.names.len();
        self.names.push(name.clone());
        self.name_ids.insert(name.clone(), id);
        self.candidates_by_name.push(Vec::new());
        id
    }

    /// Looks up an already interned name.
    pub fn lookup_name(&self, name: &PackageName) -> Option<NameId> {
        self.name_ids.get(name).copied()
    }

    /// Returns the name belonging to an id.
    pub fn name(&self, id: NameId) -> &PackageName {
        &self.names[id]
    }

    /// Returns the number of interned names.
    pub fn name_count(&self) -> usize {
        self.names.len()
    }

    /// Parses and interns a spec string that appears in the `depends` or
    /// `constrains` of `record`. Identical strings are parsed only once.
    pub fn intern_spec(
        &mut self,
        spec_str: &str,
        record: &RepoDataRecord,
    ) -> Result<SpecId, SolveError> {
        if let Some(&id) = self.spec_ids.get(spec_str) {
            return Ok(id);
        }
        let spec = MatchSpec::from_str(spec_str).map_err(|source| {
            SolveError::MalformedRecordSpec {
                spec: spec_str.to_owned(),
                record: record.package_record.to_string(),
                source,
            }
        })?;
        let name = spec.name.clone().map(|name| self.intern_name(&name));
        let id = self.specs.len();
        self.specs.push(ParsedSpec {
            spec,
            source: spec_str.to_owned(),
            name,
        });
        self.spec_ids.insert(spec_str.to_owned(), id);
        Ok(id)
    }

    /// Adds a candidate record to the pool. Returns `None` when a record
    /// with the same primary key is already present for the name (the first
    /// record wins); the existing candidate is marked installed when the new
    /// one is.
    pub fn add_candidate(
        &mut self,
        record: RepoDataRecord,
        installed: bool,
        channel_priority: u32,
    ) -> Result<Option<CandidateId>, SolveError> {
        let name = record.package_record.name.clone();
        let name_id = self.intern_name(&name);

        if let Some(&existing) = self.candidates_by_name[name_id].iter().find(|&&id| {
            let existing = &self.candidates[id].record;
            existing.channel == record.channel
                && existing.package_record.version == record.package_record.version
                && existing.package_record.build == record.package_record.build
                && existing.package_record.build_number == record.package_record.build_number
        }) {
            if installed {
                self.candidates[existing].installed = true;
            }
            return Ok(None);
        }

        let depends = record
            .package_record
            .depends
            .clone()
            .iter()
            .map(|dep| self.intern_spec(dep, &record))
            .collect::<Result<Vec<_>, _>>()?;
        let constrains = record
            .package_record
            .constrains
            .clone()
            .iter()
            .map(|constraint| self.intern_spec(constraint, &record))
            .collect::<Result<Vec<_>, _>>()?;

        let id = self.candidates.len();
        self.candidates.push(Candidate {
            record,
            installed,
            depends,
            constrains,
            channel_priority,
        });
        self.candidates_by_name[name_id].push(id);
        Ok(Some(id))
    }

    /// Returns the candidate ids for a name.
    pub fn candidates_of(&self, name: NameId) -> &[CandidateId] {
        &self.candidates_by_name[name]
    }
}
