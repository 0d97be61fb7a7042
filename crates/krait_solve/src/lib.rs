#![deny(missing_docs)]

//! The dependency solver.
//!
//! Given a package index, the currently installed records of a prefix, the
//! specs the user asked for and a set of solver options, [`solve`] produces
//! the target set of records the environment should consist of.
//!
//! The solve happens in four stages:
//!
//! 1. **Reduction** — a working subset of the index is built by transitively
//!    closing the dependency relation from the requested specs (plus the
//!    installed records), dropping candidates that no incoming constraint
//!    accepts.
//! 2. **Encoding** — the working set is interned into a [`pool::Pool`]:
//!    every candidate becomes a variable, dependency and constrains specs
//!    are parsed once and referenced by id.
//! 3. **Search** — a deterministic backtracking walk assigns one candidate
//!    per package name. Candidates are tried in the preference order of the
//!    objective (strict channel priority, minimal change, track features,
//!    newest version, highest build, newest timestamp), so the first
//!    complete assignment found is the optimal one under that
//!    lexicographic order.
//! 4. **Decoding** — the assignment is mapped back to records, re-verified
//!    against every requested spec and every dependency, and returned
//!    sorted by name. A verification failure is reported as a conflict,
//!    never silently patched up.
//!
//! The solver is pure: it never touches the filesystem or network.

mod conflict;
mod pool;
mod solve;

use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use krait_conda_types::{MatchSpec, Platform, PrefixRecord, RepoDataRecord};
use krait_index::Index;

pub use conflict::{Conflict, ConflictCause, RejectedCandidate};
pub use solve::solve;

/// How channel priority influences the solve.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Default)]
pub enum ChannelPriority {
    /// A record from a lower-priority channel is only used when no
    /// higher-priority channel carries the package at all.
    Strict,

    /// Higher-priority channels are preferred, but lower-priority channels
    /// may win when they carry a better version.
    #[default]
    Flexible,

    /// Channel priority is ignored entirely.
    Disabled,
}

/// Which installed records the solver is allowed to change.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Default)]
pub enum UpdateModifier {
    /// Only the packages named by the requested specs may change.
    #[default]
    UpdateSpecs,

    /// The requested specs or, when they are already satisfied, their
    /// dependencies may change.
    SpecsOrDeps,

    /// The requested specs and all of their dependencies may change.
    UpdateDeps,

    /// Every installed package may change.
    UpdateAll,

    /// No installed package may change. Identical to setting
    /// [`SolverOptions::freeze_installed`].
    FreezeInstalled,
}

/// Whether to include the dependencies of the requested specs.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Default)]
pub enum DepsModifier {
    /// Dependencies are resolved and installed as usual.
    #[default]
    NotRequired,

    /// Only the requested packages are installed, their dependencies are
    /// ignored.
    NoDeps,

    /// Only the dependencies of the requested packages are installed, not
    /// the requested packages themselves.
    OnlyDeps,
}

/// Options that modify how the solver treats the existing environment.
#[derive(Debug, Clone, Default)]
pub struct SolverOptions {
    /// See [`ChannelPriority`].
    pub channel_priority: ChannelPriority,

    /// Treat every currently installed record as a hard constraint unless it
    /// conflicts with a requested spec.
    pub freeze_installed: bool,

    /// See [`UpdateModifier`].
    pub update_modifier: UpdateModifier,

    /// See [`DepsModifier`].
    pub deps_modifier: DepsModifier,

    /// Emit a reinstall for requested packages even when the solved record
    /// equals the installed one. The solver itself is not affected by this
    /// flag; the transaction planner picks it up from the task.
    pub force_reinstall: bool,

    /// Drop installed records that are not reachable from the requested
    /// spec set.
    pub prune: bool,

    /// Wall-clock cap for the solve. When exceeded the solver fails with
    /// [`SolveError::Timeout`] instead of returning an inconsistent result.
    pub timeout: Option<Duration>,
}

/// A dependency resolution task.
pub struct SolverTask<'i> {
    /// The index with all available packages.
    pub index: &'i Index,

    /// The records currently installed in the prefix.
    pub installed: Vec<PrefixRecord>,

    /// The specs that must be satisfied.
    pub specs: Vec<MatchSpec>,

    /// Pins the solver treats as hard constraints.
    pub pinned: Vec<MatchSpec>,

    /// The platform to solve for. Records for other platforms (except
    /// `noarch`) never enter the working set.
    pub platform: Platform,

    /// Options modifying the treatment of the existing environment.
    pub options: SolverOptions,

    /// Cooperative cancellation token, checked between decisions.
    pub cancel: Option<Arc<AtomicBool>>,
}

impl<'i> SolverTask<'i> {
    /// Creates a task with default options and no installed packages.
    pub fn from_specs(index: &'i Index, specs: Vec<MatchSpec>) -> Self {
        Self {
            index,
            installed: Vec::new(),
            specs,
            pinned: Vec::new(),
            platform: Platform::current(),
            options: SolverOptions::default(),
            cancel: None,
        }
    }
}

/// The result of a successful solve: the target record set, sorted by
/// package name.
#[derive(Debug, Clone)]
pub struct SolverResult {
    /// The records the environment should consist of after the transaction.
    pub records: Vec<RepoDataRecord>,
}

/// Represents an error when solving the dependencies for a given
/// environment.
#[derive(Debug, thiserror::Error)]
pub enum SolveError {
    /// A user-requested package does not exist in the index at all.
    #[error("the package '{0}' was not found in the configured channels")]
    PackageNotFound(String),

    /// A dependency has no candidates.
    #[error("nothing provides '{spec}' required by '{required_by}'")]
    NothingProvides {
        /// The dependency spec that has no candidates.
        spec: String,
        /// The record that requires the spec.
        required_by: String,
    },

    /// There is no set of records that satisfies all requirements. The
    /// conflict explains which constraint chain forced the contradiction.
    #[error("the environment is unsolvable\n{0}")]
    Unsolvable(Conflict),

    /// The configured wall-clock cap was exceeded.
    #[error("the solver exceeded its time limit")]
    Timeout,

    /// The operation was cancelled through the cancellation token.
    #[error("the operation was cancelled")]
    Cancelled,

    /// A `depends` or `constrains` string in the repodata is malformed.
    #[error("failed to parse spec '{spec}' of record '{record}'")]
    MalformedRecordSpec {
        /// The spec string that failed to parse.
        spec: String,
        /// The record carrying it.
        record: String,
        /// The underlying parse error.
        #[source]
        source: krait_conda_types::ParseMatchSpecError,
    },
}
