//! Computing an ordered transaction plan from the current prefix state and
//! a solver target.

use std::collections::HashMap;

use krait_conda_types::repo_data::sort_topologically;
use krait_conda_types::{PackageRecord, Platform, PrefixRecord, RepoDataRecord};
use thiserror::Error;

use crate::install::python::{PythonInfo, PythonInfoError};

/// An error that can occur while constructing a transaction.
#[derive(Debug, Error)]
pub enum TransactionError {
    /// The python version of the target state could not be interpreted.
    #[error(transparent)]
    PythonInfoError(#[from] PythonInfoError),
}

/// Describes one operation of a transaction.
#[derive(Debug, Clone)]
pub enum TransactionOperation {
    /// Link a new package.
    Install(RepoDataRecord),

    /// Replace an installed package with a different record of the same
    /// name: the old record is unlinked, the new one linked.
    Change {
        /// The installed record to unlink.
        old: Box<PrefixRecord>,
        /// The record to link in its place.
        new: RepoDataRecord,
    },

    /// Unlink and relink the same record. Emitted for `force_reinstall` and
    /// when a python version change requires noarch packages to be
    /// relinked.
    Reinstall {
        /// The installed record to unlink.
        old: Box<PrefixRecord>,
        /// The identical record to link again.
        new: RepoDataRecord,
    },

    /// Completely remove a package.
    Remove(Box<PrefixRecord>),
}

impl TransactionOperation {
    /// The record this operation links, if any.
    pub fn record_to_link(&self) -> Option<&RepoDataRecord> {
        match self {
            TransactionOperation::Install(new) => Some(new),
            TransactionOperation::Change { new, .. } => Some(new),
            TransactionOperation::Reinstall { new, .. } => Some(new),
            TransactionOperation::Remove(_) => None,
        }
    }

    /// The record this operation unlinks, if any.
    pub fn record_to_unlink(&self) -> Option<&PrefixRecord> {
        match self {
            TransactionOperation::Install(_) => None,
            TransactionOperation::Change { old, .. } => Some(old),
            TransactionOperation::Reinstall { old, .. } => Some(old),
            TransactionOperation::Remove(old) => Some(old),
        }
    }
}

/// The operations needed to bring a prefix from its current state into the
/// target state, together with the python information of both states.
#[derive(Debug)]
pub struct Transaction {
    /// The operations to perform, one per affected package name.
    pub operations: Vec<TransactionOperation>,

    /// The python version of the target state, when python is part of it.
    pub python_info: Option<PythonInfo>,

    /// The python version of the current state.
    pub current_python_info: Option<PythonInfo>,

    /// The platform the transaction runs on.
    pub platform: Platform,
}

impl Transaction {
    /// Constructs a transaction by diffing the current state against the
    /// desired state.
    ///
    /// A name present on both sides with a different record becomes a
    /// [`TransactionOperation::Change`]. With `force_reinstall`, packages
    /// whose record is unchanged are reinstalled anyway. A python
    /// major/minor change additionally reinstalls every noarch python
    /// package so its files land in the new site-packages directory.
    pub fn from_current_and_desired(
        current: Vec<PrefixRecord>,
        desired: Vec<RepoDataRecord>,
        force_reinstall: bool,
        platform: Platform,
    ) -> Result<Self, TransactionError> {
        let current_python_info = find_python_info(
            current.iter().map(|r| &r.repodata_record.package_record),
            platform,
        )?;
        let python_info =
            find_python_info(desired.iter().map(|r| &r.package_record), platform)?;
        let needs_python_relink = match (&current_python_info, &python_info) {
            (Some(current), Some(desired)) => desired.is_relink_required(current),
            _ => false,
        };

        let mut desired_by_name: HashMap<String, RepoDataRecord> = desired
            .into_iter()
            .map(|record| {
                (
                    record.package_record.name.as_normalized().to_owned(),
                    record,
                )
            })
            .collect();

        let mut operations = Vec::new();
        for record in current {
            let name = record
                .repodata_record
                .package_record
                .name
                .as_normalized()
                .to_owned();
            match desired_by_name.remove(&name) {
                None => operations.push(TransactionOperation::Remove(Box::new(record))),
                Some(desired) => {
                    if !describes_same_content(&record.repodata_record, &desired) {
                        operations.push(TransactionOperation::Change {
                            old: Box::new(record),
                            new: desired,
                        });
                    } else if force_reinstall
                        || (desired.package_record.noarch.is_python() && needs_python_relink)
                    {
                        operations.push(TransactionOperation::Reinstall {
                            old: Box::new(record),
                            new: desired,
                        });
                    }
                }
            }
        }

        // Everything remaining in the desired map is a new install.
        let mut installs: Vec<_> = desired_by_name.into_values().collect();
        installs.sort_by(|a, b| a.package_record.name.cmp(&b.package_record.name));
        operations.extend(installs.into_iter().map(TransactionOperation::Install));

        Ok(Self {
            operations,
            python_info,
            current_python_info,
            platform,
        })
    }

    /// Returns true when the transaction does nothing.
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// The records to unlink in execution order: dependents before their
    /// dependencies (the reverse of a topological order).
    pub fn records_to_unlink(&self) -> Vec<&PrefixRecord> {
        let to_unlink: Vec<&PrefixRecord> = self
            .operations
            .iter()
            .filter_map(TransactionOperation::record_to_unlink)
            .collect();
        let mut sorted = sort_topologically(to_unlink);
        sorted.reverse();
        sorted
    }

    /// The records to link in execution order: dependencies before their
    /// dependents (a topological order, leaves first).
    pub fn records_to_link(&self) -> Vec<&RepoDataRecord> {
        let to_link: Vec<&RepoDataRecord> = self
            .operations
            .iter()
            .filter_map(TransactionOperation::record_to_link)
            .collect();
        sort_topologically(to_link)
    }

    /// A compact human readable description of the plan, used for dry runs.
    pub fn summary(&self) -> String {
        let mut lines = Vec::new();
        for operation in &self.operations {
            let line = match operation {
                TransactionOperation::Install(new) => {
                    format!("  install    {}", new.package_record)
                }
                TransactionOperation::Change { old, new } => format!(
                    "  change     {} -> {}",
                    old.repodata_record.package_record, new.package_record
                ),
                TransactionOperation::Reinstall { new, .. } => {
                    format!("  reinstall  {}", new.package_record)
                }
                TransactionOperation::Remove(old) => {
                    format!("  remove     {}", old.repodata_record.package_record)
                }
            };
            lines.push(line);
        }
        if lines.is_empty() {
            lines.push("  nothing to do".to_owned());
        }
        lines.join("\n")
    }
}

/// Two records describe the same content when their identifying fields
/// match. The url is deliberately left out: the same package served from a
/// mirror is not a change.
fn describes_same_content(a: &RepoDataRecord, b: &RepoDataRecord) -> bool {
    let (a, b) = (&a.package_record, &b.package_record);
    a.name == b.name
        && a.version == b.version
        && a.build == b.build
        && a.build_number == b.build_number
        && a.subdir == b.subdir
}

/// Determines the python version used by a set of records.
fn find_python_info<'r>(
    records: impl Iterator<Item = &'r PackageRecord>,
    platform: Platform,
) -> Result<Option<PythonInfo>, PythonInfoError> {
    records
        .into_iter()
        .find(|r| r.name.as_normalized() == "python")
        .map(|record| PythonInfo::from_version(&record.version, platform))
        .transpose()
}

#[cfg(test)]
mod test {
    use std::str::FromStr;

    use krait_conda_types::{
        PackageName, PackageRecord, Platform, PrefixRecord, RepoDataRecord, Version,
    };

    use super::{Transaction, TransactionOperation};

    fn repodata_record(name: &str, version: &str, depends: &[&str]) -> RepoDataRecord {
        let mut package_record = PackageRecord::new(
            PackageName::new_unchecked(name),
            Version::from_str(version).unwrap(),
            "0".to_owned(),
        );
        package_record.depends = depends.iter().map(ToString::to_string).collect();
        RepoDataRecord {
            package_record,
            file_name: format!("{name}-{version}-0.tar.bz2"),
            url: url::Url::parse(&format!("https://example.com/{name}-{version}-0.tar.bz2"))
                .unwrap(),
            channel: "test".to_owned(),
        }
    }

    fn prefix_record(name: &str, version: &str, depends: &[&str]) -> PrefixRecord {
        PrefixRecord::from_repodata_record(
            repodata_record(name, version, depends),
            None,
            None,
            vec![],
            None,
            None,
        )
    }

    #[test]
    fn install_order_is_topological() {
        // a depends on b; b must be linked first.
        let transaction = Transaction::from_current_and_desired(
            vec![],
            vec![
                repodata_record("a", "1.0", &["b >=2"]),
                repodata_record("b", "2.0", &[]),
            ],
            false,
            Platform::Linux64,
        )
        .unwrap();

        let link_order: Vec<&str> = transaction
            .records_to_link()
            .iter()
            .map(|r| r.package_record.name.as_normalized())
            .collect();
        assert_eq!(link_order, vec!["b", "a"]);
    }

    #[test]
    fn unlink_order_is_reversed() {
        // Removing both: the dependent a goes first.
        let transaction = Transaction::from_current_and_desired(
            vec![
                prefix_record("a", "1.0", &["b >=2"]),
                prefix_record("b", "2.0", &[]),
            ],
            vec![],
            false,
            Platform::Linux64,
        )
        .unwrap();

        let unlink_order: Vec<&str> = transaction
            .records_to_unlink()
            .iter()
            .map(|r| r.repodata_record.package_record.name.as_normalized())
            .collect();
        assert_eq!(unlink_order, vec!["a", "b"]);
    }

    #[test]
    fn replace_is_change() {
        let transaction = Transaction::from_current_and_desired(
            vec![prefix_record("a", "1.0", &[])],
            vec![repodata_record("a", "2.0", &[])],
            false,
            Platform::Linux64,
        )
        .unwrap();
        assert_eq!(transaction.operations.len(), 1);
        assert!(matches!(
            transaction.operations[0],
            TransactionOperation::Change { .. }
        ));
    }

    #[test]
    fn unchanged_is_noop_unless_forced() {
        let transaction = Transaction::from_current_and_desired(
            vec![prefix_record("a", "1.0", &[])],
            vec![repodata_record("a", "1.0", &[])],
            false,
            Platform::Linux64,
        )
        .unwrap();
        assert!(transaction.is_empty());

        let transaction = Transaction::from_current_and_desired(
            vec![prefix_record("a", "1.0", &[])],
            vec![repodata_record("a", "1.0", &[])],
            true,
            Platform::Linux64,
        )
        .unwrap();
        assert!(matches!(
            transaction.operations[0],
            TransactionOperation::Reinstall { .. }
        ));
    }

    #[test]
    fn full_replace_scenario() {
        // Prefix has {a 1.0, b 2.0}; target is {a 2.0, b 1.9}. The plan
        // must unlink a before b and link b before a.
        let transaction = Transaction::from_current_and_desired(
            vec![
                prefix_record("a", "1.0", &["b >=2"]),
                prefix_record("b", "2.0", &[]),
            ],
            vec![
                repodata_record("a", "2.0", &["b <2"]),
                repodata_record("b", "1.9", &[]),
            ],
            false,
            Platform::Linux64,
        )
        .unwrap();

        let unlink_order: Vec<&str> = transaction
            .records_to_unlink()
            .iter()
            .map(|r| r.repodata_record.package_record.name.as_normalized())
            .collect();
        let link_order: Vec<&str> = transaction
            .records_to_link()
            .iter()
            .map(|r| r.package_record.name.as_normalized())
            .collect();
        assert_eq!(unlink_order, vec!["a", "b"]);
        assert_eq!(link_order, vec!["b", "a"]);
    }

    #[test]
    fn summary_renders() {
        let transaction = Transaction::from_current_and_desired(
            vec![prefix_record("gone", "1.0", &[])],
            vec![repodata_record("new", "1.0", &[])],
            false,
            Platform::Linux64,
        )
        .unwrap();
        let summary = transaction.summary();
        assert!(summary.contains("remove"));
        assert!(summary.contains("install"));
    }
}
