#![deny(missing_docs)]

//! The engine of the krait package manager: the inventory of installed
//! packages in a prefix, the transaction planner that diffs the current
//! state against a solver target, the link engine that applies a
//! transaction to disk, and a set of read-only health checks.
//!
//! The typical flow for an install request wires the crates of this
//! workspace together:
//!
//! 1. load the channel indices (`krait_index`),
//! 2. load the current prefix state ([`PrefixData`]),
//! 3. merge the request with the history ledger into a constraint set,
//! 4. run the solver (`krait_solve`) to obtain the target record set,
//! 5. diff target and current state into a [`Transaction`],
//! 6. hand the plan to [`install::execute_transaction`], which draws
//!    packages through the cache (`krait_cache`) and mutates the prefix.
//!
//! [`ops::install`] performs exactly these steps.

pub mod doctor;
pub mod env_registry;
pub mod install;
pub mod ops;
mod prefix;
mod transaction;

pub use prefix::{PrefixData, PrefixDataError, PrefixGuard};
pub use transaction::{Transaction, TransactionError, TransactionOperation};

/// The process exit status an outer command-line wrapper should translate
/// core results into.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
#[repr(i32)]
pub enum ExitStatus {
    /// The operation succeeded.
    Success = 0,

    /// The operation failed.
    Failure = 1,

    /// The request itself was invalid (e.g. an unparseable spec).
    InvalidUsage = 2,
}

impl ExitStatus {
    /// Returns the numeric exit code.
    pub fn code(self) -> i32 {
        self as i32
    }
}

impl From<&ops::OpsError> for ExitStatus {
    fn from(error: &ops::OpsError) -> Self {
        match error {
            ops::OpsError::InvalidSpec(_) => ExitStatus::InvalidUsage,
            _ => ExitStatus::Failure,
        }
    }
}

/// A serialisable summary of a core error. The outer caller decides the
/// rendering: `message` for humans, the whole value for JSON output.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ErrorSummary {
    /// A stable identifier of the error kind, e.g. `unsolvable`.
    pub kind: &'static str,

    /// The rendered error message, including its source chain.
    pub message: String,

    /// The exit code the error maps to.
    pub exit_code: i32,
}

impl From<&ops::OpsError> for ErrorSummary {
    fn from(error: &ops::OpsError) -> Self {
        use krait_solve::SolveError;
        use ops::OpsError;

        let kind = match error {
            OpsError::InvalidSpec(_) => "invalid-spec",
            OpsError::Prefix(prefix::PrefixDataError::Corrupt { .. }) => "corrupt-prefix",
            OpsError::Prefix(prefix::PrefixDataError::Locked(_)) => "prefix-locked",
            OpsError::Prefix(_) => "prefix-io",
            OpsError::History(_) => "history",
            OpsError::Solve(SolveError::Unsolvable(_)) => "unsolvable",
            OpsError::Solve(SolveError::PackageNotFound(_)) => "package-not-found",
            OpsError::Solve(SolveError::NothingProvides { .. }) => "nothing-provides",
            OpsError::Solve(SolveError::Timeout) => "solver-timeout",
            OpsError::Solve(SolveError::Cancelled) => "cancelled",
            OpsError::Solve(_) => "solve",
            OpsError::Transaction(_) => "transaction",
            OpsError::Link(install::LinkError::Cancelled) => "cancelled",
            OpsError::Link(install::LinkError::PartialTransaction { .. }) => {
                "partial-transaction"
            }
            OpsError::Link(_) => "link-failed",
        };

        // Render the full source chain into the message.
        let mut message = error.to_string();
        let mut source = std::error::Error::source(error);
        while let Some(cause) = source {
            message.push_str(&format!(": {cause}"));
            source = cause.source();
        }

        Self {
            kind,
            message,
            exit_code: ExitStatus::from(error).code(),
        }
    }
}
