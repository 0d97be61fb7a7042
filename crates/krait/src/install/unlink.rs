//! Removing an installed package from a prefix.

use std::collections::HashSet;
use std::ffi::OsString;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use krait_conda_types::PrefixRecord;

/// Error that can occur while unlinking a package.
#[derive(Debug, thiserror::Error)]
pub enum UnlinkError {
    /// Failed to delete a file.
    #[error("failed to delete file '{0}'")]
    FailedToDeleteFile(String, #[source] std::io::Error),

    /// Failed to delete a directory.
    #[error("failed to delete directory '{0}'")]
    FailedToDeleteDirectory(String, #[source] std::io::Error),

    /// Failed to read a directory.
    #[error("failed to read directory '{0}'")]
    FailedToReadDirectory(String, #[source] std::io::Error),

    /// Failed to move a busy file into the trash.
    #[error("failed to move '{0}' to the trash")]
    FailedToMoveToTrash(String, #[source] std::io::Error),
}

/// Removes all files of the given package from the prefix, prunes
/// directories that became empty, and finally deletes the package's
/// `conda-meta` record.
///
/// The operation is re-entrant: files that are already gone are skipped, so
/// an interrupted unlink completes when repeated. The record file is
/// removed last; as long as any file removal can still fail the metadata
/// keeps describing the package.
pub fn unlink_package(
    target_prefix: &Path,
    prefix_record: &PrefixRecord,
) -> Result<(), UnlinkError> {
    let mut directories = HashSet::new();

    for paths in &prefix_record.paths_data.paths {
        let path = target_prefix.join(&paths.relative_path);
        match fs_err::remove_file(&path) {
            Ok(()) => {}
            // Already gone: fine, the unlink is re-entrant.
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            // A file that is currently in use (mostly a windows concern)
            // moves to the trash instead.
            Err(e) if e.kind() == ErrorKind::PermissionDenied => {
                move_to_trash(target_prefix, &path)?;
            }
            Err(e) => {
                return Err(UnlinkError::FailedToDeleteFile(
                    paths.relative_path.to_string_lossy().into_owned(),
                    e,
                ))
            }
        }
        if let Some(parent) = paths.relative_path.parent() {
            if !parent.as_os_str().is_empty() {
                directories.insert(parent.to_path_buf());
            }
        }
    }

    // Prune empty directories bottom-up: deepest first.
    let is_python_noarch = prefix_record
        .repodata_record
        .package_record
        .noarch
        .is_python();
    let mut directories: Vec<PathBuf> = directories.into_iter().collect();
    directories.sort_by_key(|dir| std::cmp::Reverse(dir.components().count()));
    for directory in directories {
        remove_empty_directories(&target_prefix.join(directory), target_prefix, is_python_noarch)?;
    }

    // Remove the conda-meta record last so an interrupted unlink keeps its
    // bookkeeping.
    let conda_meta_path = target_prefix
        .join("conda-meta")
        .join(prefix_record.file_name());
    match fs_err::remove_file(&conda_meta_path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(UnlinkError::FailedToDeleteFile(
            conda_meta_path.to_string_lossy().into_owned(),
            e,
        )),
    }
}

/// Removes the given directory if it is empty, walking up towards the
/// prefix root. For python noarch packages a remaining `__pycache__`
/// directory does not count as content.
fn remove_empty_directories(
    directory: &Path,
    target_prefix: &Path,
    is_python_noarch: bool,
) -> Result<(), UnlinkError> {
    let mut current = directory.to_path_buf();
    loop {
        if current == target_prefix || !current.starts_with(target_prefix) || !current.exists() {
            return Ok(());
        }

        let mut entries = fs_err::read_dir(&current)
            .map_err(|e| {
                UnlinkError::FailedToReadDirectory(current.to_string_lossy().into_owned(), e)
            })?
            .flatten();

        let removable = match entries.next() {
            None => true,
            Some(entry)
                if is_python_noarch
                    && entry.file_name() == "__pycache__"
                    && entries.next().is_none() =>
            {
                // Byte-compiled leftovers do not keep a directory alive.
                fs_err::remove_dir_all(entry.path()).map_err(|e| {
                    UnlinkError::FailedToDeleteDirectory(
                        entry.path().to_string_lossy().into_owned(),
                        e,
                    )
                })?;
                true
            }
            Some(_) => false,
        };

        if !removable {
            return Ok(());
        }

        fs_err::remove_dir(&current).map_err(|e| {
            UnlinkError::FailedToDeleteDirectory(current.to_string_lossy().into_owned(), e)
        })?;

        match current.parent() {
            Some(parent) => current = parent.to_path_buf(),
            None => return Ok(()),
        }
    }
}

/// Moves a file that cannot be deleted right now into the `.trash`
/// directory of the prefix.
fn move_to_trash(target_prefix: &Path, path: &Path) -> Result<(), UnlinkError> {
    let trash_dir = target_prefix.join(".trash");
    fs_err::create_dir_all(&trash_dir).map_err(|e| {
        UnlinkError::FailedToMoveToTrash(path.to_string_lossy().into_owned(), e)
    })?;

    let mut file_name = OsString::new();
    if let Some(name) = path.file_name() {
        file_name.push(name);
        file_name.push(".");
    }
    file_name.push(format!("{}.trash", uuid::Uuid::new_v4().simple()));

    fs_err::rename(path, trash_dir.join(file_name))
        .map_err(|e| UnlinkError::FailedToMoveToTrash(path.to_string_lossy().into_owned(), e))
}

/// Removes trash files that are no longer in use. Files that are still
/// busy stay; the trash directory itself is removed once it is empty.
pub fn empty_trash(target_prefix: &Path) -> Result<(), UnlinkError> {
    let trash_dir = target_prefix.join(".trash");
    let entries = match fs_err::read_dir(&trash_dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
        Err(e) => {
            return Err(UnlinkError::FailedToReadDirectory(
                trash_dir.to_string_lossy().into_owned(),
                e,
            ))
        }
    };

    let mut files_left = false;
    for entry in entries.flatten() {
        match fs_err::remove_file(entry.path()) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) if e.kind() == ErrorKind::PermissionDenied => files_left = true,
            Err(e) => {
                return Err(UnlinkError::FailedToDeleteFile(
                    entry.path().to_string_lossy().into_owned(),
                    e,
                ))
            }
        }
    }

    if !files_left {
        fs_err::remove_dir(&trash_dir).map_err(|e| {
            UnlinkError::FailedToDeleteDirectory(trash_dir.to_string_lossy().into_owned(), e)
        })?;
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use std::path::PathBuf;
    use std::str::FromStr;

    use krait_conda_types::{
        PackageName, PackageRecord, PathType, PathsEntry, PrefixRecord, RepoDataRecord, Version,
    };

    use super::{empty_trash, unlink_package};

    fn record_with_files(prefix: &std::path::Path, files: &[&str]) -> PrefixRecord {
        let paths = files
            .iter()
            .map(|file| {
                let path = prefix.join(file);
                std::fs::create_dir_all(path.parent().unwrap()).unwrap();
                std::fs::write(&path, b"content").unwrap();
                PathsEntry {
                    relative_path: PathBuf::from(file),
                    path_type: PathType::HardLink,
                    no_link: false,
                    sha256: None,
                    sha256_in_prefix: None,
                    size_in_bytes: Some(7),
                    file_mode: None,
                    prefix_placeholder: None,
                }
            })
            .collect();

        let repodata_record = RepoDataRecord {
            package_record: PackageRecord::new(
                PackageName::new_unchecked("doomed"),
                Version::from_str("1.0").unwrap(),
                "0".to_owned(),
            ),
            file_name: "doomed-1.0-0.tar.bz2".to_owned(),
            url: url::Url::parse("https://example.com/doomed-1.0-0.tar.bz2").unwrap(),
            channel: "test".to_owned(),
        };
        let record =
            PrefixRecord::from_repodata_record(repodata_record, None, None, paths, None, None);
        let conda_meta = prefix.join("conda-meta");
        std::fs::create_dir_all(&conda_meta).unwrap();
        record
            .write_to_path(conda_meta.join(record.file_name()), true)
            .unwrap();
        record
    }

    #[test]
    fn removes_files_and_empty_directories() {
        let prefix = tempfile::tempdir().unwrap();
        let record = record_with_files(prefix.path(), &["bin/doomed", "share/doomed/data.txt"]);

        unlink_package(prefix.path(), &record).unwrap();

        assert!(!prefix.path().join("bin").exists());
        assert!(!prefix.path().join("share").exists());
        assert!(!prefix
            .path()
            .join("conda-meta")
            .join(record.file_name())
            .exists());
        // The prefix itself must survive.
        assert!(prefix.path().exists());
    }

    #[test]
    fn repeating_an_interrupted_unlink_completes() {
        let prefix = tempfile::tempdir().unwrap();
        let record = record_with_files(prefix.path(), &["bin/doomed"]);

        // Simulate an interrupted unlink by removing a file up front.
        std::fs::remove_file(prefix.path().join("bin/doomed")).unwrap();

        unlink_package(prefix.path(), &record).unwrap();
        assert!(!prefix
            .path()
            .join("conda-meta")
            .join(record.file_name())
            .exists());
    }

    #[test]
    fn keeps_directories_with_other_content() {
        let prefix = tempfile::tempdir().unwrap();
        let record = record_with_files(prefix.path(), &["bin/doomed"]);
        std::fs::write(prefix.path().join("bin/other"), b"keep me").unwrap();

        unlink_package(prefix.path(), &record).unwrap();
        assert!(prefix.path().join("bin/other").exists());
    }

    #[test]
    fn empty_trash_removes_files() {
        let prefix = tempfile::tempdir().unwrap();
        let trash = prefix.path().join(".trash");
        std::fs::create_dir_all(&trash).unwrap();
        std::fs::write(trash.join("a.trash"), b"junk").unwrap();

        empty_trash(prefix.path()).unwrap();
        assert!(!trash.exists());
    }
}
