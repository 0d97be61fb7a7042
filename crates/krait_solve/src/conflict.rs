//! The "why" tree reported for unsolvable environments.
//!
//! A conflict is a first class value, not an error string: the caller
//! decides how to render it. The tree names the package that could not be
//! assigned, every constraint that was active on it (and which record or
//! user request demanded it), and for every candidate that was considered
//! the reason it was rejected.

use std::fmt::{Display, Formatter};

/// Why the solver could not find a valid assignment.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct Conflict {
    /// The package name the solver failed to assign.
    pub package: String,

    /// The constraints that were active on the package when the assignment
    /// failed.
    pub causes: Vec<ConflictCause>,

    /// The candidates that were considered and the reason each was
    /// rejected. Empty when the package has no candidates at all.
    pub rejected: Vec<RejectedCandidate>,
}

/// One constraint that contributed to a conflict.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ConflictCause {
    /// The spec that constrained the package.
    pub spec: String,

    /// The chain of requirements leading from a user request to this spec.
    /// The first element is the requested spec, the last the record that
    /// directly carries the constraint.
    pub chain: Vec<String>,
}

impl ConflictCause {
    /// A constraint that comes directly from a user request.
    pub fn requested(spec: impl Into<String>) -> Self {
        Self {
            spec: spec.into(),
            chain: Vec::new(),
        }
    }

    /// A constraint demanded by a record, reached through the given chain.
    pub fn through(spec: impl Into<String>, chain: Vec<String>) -> Self {
        Self {
            spec: spec.into(),
            chain,
        }
    }
}

/// A candidate the solver considered but had to reject.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct RejectedCandidate {
    /// Display form of the candidate (`name=version=build`).
    pub candidate: String,

    /// The reason the candidate was rejected.
    pub reason: String,
}

impl Conflict {
    /// Returns true if the conflict is caused by a name that has no
    /// candidates at all.
    pub fn is_missing_package(&self) -> bool {
        self.rejected.is_empty()
    }
}

impl Display for Conflict {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "cannot resolve '{}':", self.package)?;
        for cause in &self.causes {
            if cause.chain.is_empty() {
                writeln!(f, "├─ the user requested '{}'", cause.spec)?;
            } else {
                write!(f, "├─ ")?;
                for link in &cause.chain {
                    write!(f, "{link} → ")?;
                }
                writeln!(f, "requires '{}'", cause.spec)?;
            }
        }
        if self.rejected.is_empty() {
            writeln!(f, "└─ no candidate provides '{}'", self.package)?;
        } else {
            for (idx, rejection) in self.rejected.iter().enumerate() {
                let connector = if idx + 1 == self.rejected.len() {
                    "└─"
                } else {
                    "├─"
                };
                writeln!(
                    f,
                    "{connector} {} rejected: {}",
                    rejection.candidate, rejection.reason
                )?;
            }
        }
        Ok(())
    }
}
