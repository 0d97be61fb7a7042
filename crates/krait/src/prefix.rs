//! The inventory of what is installed in a prefix, with its invariants.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use fs4::fs_std::FileExt;
use krait_conda_types::{PackageName, PrefixRecord};
use thiserror::Error;

/// The name of the lock file that serialises transactions against a prefix.
const PREFIX_LOCK_FILE: &str = ".krait-prefix.lock";

/// An error that can occur when reading or writing prefix metadata.
#[derive(Debug, Error)]
pub enum PrefixDataError {
    /// An IO error occurred.
    #[error(transparent)]
    IoError(#[from] std::io::Error),

    /// The prefix metadata violates an invariant. The offending record is
    /// named rather than silently dropped.
    #[error("corrupt prefix metadata in record '{record}': {problem}")]
    Corrupt {
        /// The record file that is at fault.
        record: String,
        /// A description of the violated invariant.
        problem: String,
    },

    /// Another process holds the prefix lock.
    #[error("the prefix at '{0}' is locked by another process")]
    Locked(PathBuf),
}

/// The in-memory view of the `conda-meta` directory of one prefix: one
/// [`PrefixRecord`] per installed package, unique by package name.
#[derive(Debug)]
pub struct PrefixData {
    prefix: PathBuf,
    records: BTreeMap<PackageName, PrefixRecord>,
}

impl PrefixData {
    /// Loads the prefix records of the given prefix. Invariants are checked
    /// on load: package names must be unique and file lists must be
    /// relative, slash-separated and free of duplicates. A violation is
    /// reported with the offending record, not silently dropped.
    pub fn load(prefix: impl Into<PathBuf>) -> Result<Self, PrefixDataError> {
        let prefix = prefix.into();
        let mut records = BTreeMap::new();
        for record in PrefixRecord::collect_from_prefix(&prefix)? {
            verify_record(&record)?;
            let name = record.repodata_record.package_record.name.clone();
            if let Some(previous) = records.insert(name, record) {
                return Err(PrefixDataError::Corrupt {
                    record: previous.file_name(),
                    problem: "more than one record for the same package name".to_owned(),
                });
            }
        }
        Ok(Self { prefix, records })
    }

    /// Creates an empty view for a prefix without reading anything.
    pub fn empty(prefix: impl Into<PathBuf>) -> Self {
        Self {
            prefix: prefix.into(),
            records: BTreeMap::new(),
        }
    }

    /// The root directory of the prefix.
    pub fn prefix(&self) -> &Path {
        &self.prefix
    }

    /// The `conda-meta` directory of the prefix.
    pub fn conda_meta_path(&self) -> PathBuf {
        self.prefix.join("conda-meta")
    }

    /// Returns the records of all installed packages, sorted by name.
    pub fn records(&self) -> impl Iterator<Item = &PrefixRecord> {
        self.records.values()
    }

    /// Returns the record of an installed package by name.
    pub fn get(&self, name: &PackageName) -> Option<&PrefixRecord> {
        self.records.get(name)
    }

    /// Returns the number of installed packages.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns true when no package is installed.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Inserts a record into the in-memory view. Call
    /// [`PrefixData::commit`] to persist.
    pub fn insert(&mut self, record: PrefixRecord) -> Result<(), PrefixDataError> {
        verify_record(&record)?;
        self.records
            .insert(record.repodata_record.package_record.name.clone(), record);
        Ok(())
    }

    /// Removes a record from the in-memory view. Returns the removed record
    /// when the package was present.
    pub fn remove(&mut self, name: &PackageName) -> Option<PrefixRecord> {
        self.records.remove(name)
    }

    /// Atomically writes the in-memory view to disk: every record is
    /// written to a temporary file that is renamed over its destination,
    /// and record files for packages no longer in the view are deleted.
    pub fn commit(&self) -> Result<(), PrefixDataError> {
        let conda_meta = self.conda_meta_path();
        fs_err::create_dir_all(&conda_meta)?;

        let mut expected: Vec<String> = Vec::new();
        for record in self.records.values() {
            let file_name = record.file_name();
            record.write_to_path(conda_meta.join(&file_name), true)?;
            expected.push(file_name);
        }

        for entry in fs_err::read_dir(&conda_meta)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.ends_with(".json") && !expected.contains(&name) {
                fs_err::remove_file(entry.path())?;
            }
        }
        Ok(())
    }
}

/// Checks the per-record invariants of the prefix metadata: relative
/// slash-separated paths, no duplicates.
fn verify_record(record: &PrefixRecord) -> Result<(), PrefixDataError> {
    let mut seen = std::collections::HashSet::new();
    for file in &record.files {
        if file.is_absolute() {
            return Err(PrefixDataError::Corrupt {
                record: record.file_name(),
                problem: format!("file '{}' is not a relative path", file.display()),
            });
        }
        if file
            .components()
            .any(|c| matches!(c, std::path::Component::ParentDir))
        {
            return Err(PrefixDataError::Corrupt {
                record: record.file_name(),
                problem: format!("file '{}' escapes the prefix", file.display()),
            });
        }
        if !seen.insert(file) {
            return Err(PrefixDataError::Corrupt {
                record: record.file_name(),
                problem: format!("file '{}' is listed twice", file.display()),
            });
        }
    }
    Ok(())
}

/// An exclusive lock on a prefix. Any transaction against a prefix takes
/// this lock; concurrent transactions against the same prefix serialise on
/// it.
pub struct PrefixGuard {
    file: fs_err::File,
    path: PathBuf,
}

impl PrefixGuard {
    /// Acquires the lock, blocking until it is available. Progress is
    /// reported through tracing while waiting.
    pub fn lock(prefix: &Path) -> Result<Self, PrefixDataError> {
        let file = Self::open_lock_file(prefix)?;
        if !file.file().try_lock_exclusive()? {
            tracing::info!(
                "waiting for the prefix lock at {} held by another process",
                prefix.display()
            );
            file.file().lock_exclusive()?;
        }
        Ok(Self {
            file,
            path: prefix.to_path_buf(),
        })
    }

    /// Tries to acquire the lock without blocking; fails with
    /// [`PrefixDataError::Locked`] when another process holds it.
    pub fn try_lock(prefix: &Path) -> Result<Self, PrefixDataError> {
        let file = Self::open_lock_file(prefix)?;
        if !file.file().try_lock_exclusive()? {
            return Err(PrefixDataError::Locked(prefix.to_path_buf()));
        }
        Ok(Self {
            file,
            path: prefix.to_path_buf(),
        })
    }

    fn open_lock_file(prefix: &Path) -> Result<fs_err::File, PrefixDataError> {
        let conda_meta = prefix.join("conda-meta");
        fs_err::create_dir_all(&conda_meta)?;
        Ok(fs_err::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(conda_meta.join(PREFIX_LOCK_FILE))?)
    }

    /// The prefix this guard locks.
    pub fn prefix(&self) -> &Path {
        &self.path
    }
}

impl Drop for PrefixGuard {
    fn drop(&mut self) {
        let _ = self.file.file().unlock();
    }
}
