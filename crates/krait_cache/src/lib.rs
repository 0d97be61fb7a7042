#![deny(missing_docs)]

//! A content-addressed store of downloaded archives and extracted packages,
//! shared between any number of prefixes.
//!
//! Extracted packages live under stable directories keyed by
//! `name-version-build`. Downloading is delegated to a [`FetchProvider`];
//! the cache only verifies the checksum of whatever the provider produced
//! (preferring `sha256` over `md5`, never computing a new hash to "upgrade"
//! a record).
//!
//! Extraction is single-writer: the first caller creates a
//! `<record>.extracting` marker and holds an exclusive lock on it while it
//! works; concurrent callers block on the lock instead of busy-looping. A
//! marker without a lock holder is the debris of a crashed process; it is
//! removed and the extraction transparently retried once.
//!
//! Structural changes to the cache (extraction, [`PackageCache::reap`]) take
//! an exclusive lock on the per-cache lock file; read-only use (linking
//! files out of the cache into a prefix) takes a shared lock.

mod cache_key;
mod link;

use std::io::Write;
use std::path::{Path, PathBuf};

use fs4::fs_std::FileExt;
use krait_conda_types::RepoDataRecord;
use krait_digest::{Md5, Sha256};
use url::Url;

pub use cache_key::CacheKey;
pub use link::{link_file, LinkOutcome};

/// The name of the lock file that serialises structural cache changes.
const CACHE_LOCK_FILE: &str = ".krait-cache.lock";

/// Marker file written into an extracted directory when extraction
/// completed successfully.
const COMPLETE_MARKER: &str = ".krait-extract-complete";

/// Provides the bytes of a package archive. Implementations typically wrap
/// an HTTP client; the cache itself never talks to the network.
pub trait FetchProvider {
    /// Fetches the contents of the given url.
    fn fetch(&self, url: &Url) -> Result<Vec<u8>, Box<dyn std::error::Error + Send + Sync>>;
}

impl<F> FetchProvider for F
where
    F: Fn(&Url) -> Result<Vec<u8>, Box<dyn std::error::Error + Send + Sync>>,
{
    fn fetch(&self, url: &Url) -> Result<Vec<u8>, Box<dyn std::error::Error + Send + Sync>> {
        self(url)
    }
}

/// An error that can occur when interacting with the package cache.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// An IO error occurred.
    #[error(transparent)]
    IoError(#[from] std::io::Error),

    /// The fetch provider failed to produce the archive.
    #[error("failed to fetch '{url}'")]
    FetchFailed {
        /// The url that could not be fetched.
        url: Url,
        /// The provider error.
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// The downloaded archive does not match the expected checksum. The
    /// file has been deleted.
    #[error("checksum mismatch for '{file}': expected {expected}, got {actual}")]
    ChecksumMismatch {
        /// The archive file that failed verification.
        file: String,
        /// The expected hash in hex.
        expected: String,
        /// The actual hash in hex.
        actual: String,
    },

    /// Extracting the archive failed.
    #[error("failed to extract package archive")]
    ExtractError(#[from] krait_package::ExtractError),
}

/// A cache of extracted packages on disk.
pub struct PackageCache {
    root: PathBuf,
}

impl PackageCache {
    /// Creates a cache rooted at the given directory. The directory is
    /// created when it does not exist yet.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, CacheError> {
        let root = root.into();
        fs_err::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// The root directory of the cache.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The path at which the archive of a record is stored.
    pub fn archive_path(&self, record: &RepoDataRecord) -> PathBuf {
        self.root.join(&record.file_name)
    }

    /// The directory into which a record is extracted.
    pub fn package_dir(&self, record: &RepoDataRecord) -> PathBuf {
        self.root.join(CacheKey::from(record).to_string())
    }

    /// Returns the local path of the archive for a record, fetching it
    /// through the provider when it is missing. The checksum of a fetched
    /// archive is verified against the record: `sha256` when present,
    /// otherwise `md5`. On a mismatch the file is deleted and the fetch
    /// fails with [`CacheError::ChecksumMismatch`].
    #[tracing::instrument(skip_all, fields(file = %record.file_name))]
    pub fn fetch(
        &self,
        record: &RepoDataRecord,
        provider: &dyn FetchProvider,
    ) -> Result<PathBuf, CacheError> {
        let archive_path = self.archive_path(record);
        if archive_path.is_file() {
            return Ok(archive_path);
        }

        let bytes = provider
            .fetch(&record.url)
            .map_err(|source| CacheError::FetchFailed {
                url: record.url.clone(),
                source,
            })?;

        verify_bytes(&bytes, record, &record.file_name)?;

        // Commit the verified bytes with a rename so a concurrent reader
        // never observes a partial archive.
        let mut temp = tempfile::NamedTempFile::new_in(&self.root)?;
        temp.write_all(&bytes)?;
        temp.persist(&archive_path).map_err(|e| e.error)?;
        Ok(archive_path)
    }

    /// Returns the directory containing the extracted contents of the
    /// record, extracting the archive first when necessary. The archive is
    /// drawn through [`PackageCache::fetch`] when it is not present.
    pub fn get_or_extract(
        &self,
        record: &RepoDataRecord,
        provider: &dyn FetchProvider,
    ) -> Result<PathBuf, CacheError> {
        let package_dir = self.package_dir(record);
        if package_dir.join(COMPLETE_MARKER).is_file() {
            return Ok(package_dir);
        }
        let archive = self.fetch(record, provider)?;
        self.extract(&archive, record)
    }

    /// Extracts an archive into the cache directory of the record. Safe to
    /// call from multiple processes; only one does the work.
    pub fn extract(
        &self,
        archive: &Path,
        record: &RepoDataRecord,
    ) -> Result<PathBuf, CacheError> {
        let package_dir = self.package_dir(record);
        let marker_path = self
            .root
            .join(format!("{}.extracting", CacheKey::from(record)));

        // One transparent retry after finding a stale marker.
        for attempt in 0..2 {
            if package_dir.join(COMPLETE_MARKER).is_file() {
                return Ok(package_dir);
            }

            let _structural = self.lock_exclusive()?;
            let marker = fs_err::OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(false)
                .open(&marker_path)?;

            if marker.file().try_lock_exclusive()? {
                // We are the writer.
                if package_dir.join(COMPLETE_MARKER).is_file() {
                    let _ = marker.file().unlock();
                    let _ = fs_err::remove_file(&marker_path);
                    return Ok(package_dir);
                }
                if package_dir.exists() {
                    // Debris from an earlier crashed extraction.
                    tracing::warn!(
                        "removing partially extracted package at {}",
                        package_dir.display()
                    );
                    fs_err::remove_dir_all(&package_dir)?;
                }

                let result = krait_package::extract(archive, &package_dir);
                match result {
                    Ok(_) => {
                        fs_err::write(package_dir.join(COMPLETE_MARKER), b"")?;
                        let _ = marker.file().unlock();
                        let _ = fs_err::remove_file(&marker_path);
                        return Ok(package_dir);
                    }
                    Err(e) => {
                        let _ = fs_err::remove_dir_all(&package_dir);
                        let _ = marker.file().unlock();
                        let _ = fs_err::remove_file(&marker_path);
                        return Err(e.into());
                    }
                }
            }

            // Another process is extracting: wait for its lock instead of
            // spinning, then re-check the complete marker.
            drop(_structural);
            marker.file().lock_shared()?;
            let _ = marker.file().unlock();
            if package_dir.join(COMPLETE_MARKER).is_file() {
                return Ok(package_dir);
            }
            tracing::warn!(
                "stale extraction marker for {} (attempt {attempt}), retrying",
                record.file_name
            );
        }

        // The retry also found debris; surface it as an io error.
        Err(CacheError::IoError(std::io::Error::new(
            std::io::ErrorKind::Other,
            format!(
                "extraction of '{}' did not complete after retry",
                record.file_name
            ),
        )))
    }

    /// Takes the shared cache lock used while linking files out of the
    /// cache. Holding it prevents [`PackageCache::reap`] from removing
    /// directories that are in use.
    pub fn lock_shared(&self) -> Result<CacheLock, CacheError> {
        let file = self.open_lock_file()?;
        file.file().lock_shared()?;
        Ok(CacheLock { file })
    }

    /// Takes the exclusive cache lock used for structural changes.
    pub fn lock_exclusive(&self) -> Result<CacheLock, CacheError> {
        let file = self.open_lock_file()?;
        file.file().lock_exclusive()?;
        Ok(CacheLock { file })
    }

    fn open_lock_file(&self) -> Result<fs_err::File, CacheError> {
        Ok(fs_err::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(self.root.join(CACHE_LOCK_FILE))?)
    }

    /// Removes extracted package directories that are not referenced by any
    /// of the given keys. Reaping is advisory: the exclusive lock ensures no
    /// package is removed while another process links from the cache, and
    /// archives are left alone entirely.
    pub fn reap<'k>(
        &self,
        referenced: impl IntoIterator<Item = &'k CacheKey>,
    ) -> Result<Vec<PathBuf>, CacheError> {
        let referenced: std::collections::HashSet<String> = referenced
            .into_iter()
            .map(ToString::to_string)
            .collect();

        let _lock = self.lock_exclusive()?;
        let mut removed = Vec::new();
        for entry in fs_err::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.ends_with(".extracting") || referenced.contains(&name) {
                continue;
            }
            // Only reap directories that look like completed extractions.
            if !entry.path().join(COMPLETE_MARKER).is_file() {
                continue;
            }
            tracing::debug!("reaping unreferenced package directory {name}");
            fs_err::remove_dir_all(entry.path())?;
            removed.push(entry.path());
        }
        Ok(removed)
    }
}

/// A held lock on the cache lock file. The lock is released on drop.
pub struct CacheLock {
    file: fs_err::File,
}

impl Drop for CacheLock {
    fn drop(&mut self) {
        let _ = self.file.file().unlock();
    }
}

/// Verifies downloaded bytes against the hashes of a record. `sha256` wins
/// when both hashes are present; records carrying only `md5` are verified
/// with that.
fn verify_bytes(
    bytes: &[u8],
    record: &RepoDataRecord,
    file_name: &str,
) -> Result<(), CacheError> {
    if let Some(expected) = &record.package_record.sha256 {
        let actual = krait_digest::compute_bytes_digest::<Sha256>(bytes);
        if &actual != expected {
            return Err(CacheError::ChecksumMismatch {
                file: file_name.to_owned(),
                expected: format!("{expected:x}"),
                actual: format!("{actual:x}"),
            });
        }
    } else if let Some(expected) = &record.package_record.md5 {
        let actual = krait_digest::compute_bytes_digest::<Md5>(bytes);
        if &actual != expected {
            return Err(CacheError::ChecksumMismatch {
                file: file_name.to_owned(),
                expected: format!("{expected:x}"),
                actual: format!("{actual:x}"),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use std::io::Write;
    use std::path::{Path, PathBuf};
    use std::str::FromStr;

    use krait_conda_types::{PackageName, PackageRecord, RepoDataRecord, Version};
    use url::Url;

    use super::{CacheError, CacheKey, PackageCache};

    fn make_archive(dir: &Path) -> (PathBuf, Vec<u8>) {
        let archive_path = dir.join("dummy-1.0-0.tar.bz2");
        let file = std::fs::File::create(&archive_path).unwrap();
        let encoder = bzip2::write::BzEncoder::new(file, bzip2::Compression::default());
        let mut builder = tar::Builder::new(encoder);
        let payload = b"print('hi')\n";
        let mut header = tar::Header::new_gnu();
        header.set_size(payload.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, "lib/dummy.py", &payload[..])
            .unwrap();
        builder
            .into_inner()
            .unwrap()
            .finish()
            .unwrap()
            .flush()
            .unwrap();
        let bytes = std::fs::read(&archive_path).unwrap();
        (archive_path, bytes)
    }

    fn record(bytes: &[u8]) -> RepoDataRecord {
        let mut package_record = PackageRecord::new(
            PackageName::new_unchecked("dummy"),
            Version::from_str("1.0").unwrap(),
            "0".to_owned(),
        );
        package_record.sha256 =
            Some(krait_digest::compute_bytes_digest::<krait_digest::Sha256>(bytes));
        RepoDataRecord {
            package_record,
            file_name: "dummy-1.0-0.tar.bz2".to_owned(),
            url: Url::parse("https://example.com/linux-64/dummy-1.0-0.tar.bz2").unwrap(),
            channel: "test".to_owned(),
        }
    }

    #[test]
    fn fetch_verifies_and_caches() {
        let dir = tempfile::tempdir().unwrap();
        let (_, bytes) = make_archive(dir.path());
        let record = record(&bytes);
        let cache = PackageCache::new(dir.path().join("cache")).unwrap();

        let fetched = std::sync::atomic::AtomicUsize::new(0);
        let provider = |_: &Url| -> Result<Vec<u8>, Box<dyn std::error::Error + Send + Sync>> {
            fetched.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Ok(bytes.clone())
        };

        let path = cache.fetch(&record, &provider).unwrap();
        assert!(path.is_file());
        // A second fetch is served from the cache.
        cache.fetch(&record, &provider).unwrap();
        assert_eq!(fetched.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[test]
    fn corrupt_download_is_deleted() {
        let dir = tempfile::tempdir().unwrap();
        let (_, bytes) = make_archive(dir.path());
        let record = record(&bytes);
        let cache = PackageCache::new(dir.path().join("cache")).unwrap();

        let provider = |_: &Url| -> Result<Vec<u8>, Box<dyn std::error::Error + Send + Sync>> {
            Ok(b"corrupted bytes".to_vec())
        };
        let error = cache.fetch(&record, &provider).unwrap_err();
        assert!(matches!(error, CacheError::ChecksumMismatch { .. }));
        assert!(!cache.archive_path(&record).exists());
    }

    #[test]
    fn extract_and_reuse() {
        let dir = tempfile::tempdir().unwrap();
        let (archive, bytes) = make_archive(dir.path());
        let record = record(&bytes);
        let cache = PackageCache::new(dir.path().join("cache")).unwrap();

        let package_dir = cache.extract(&archive, &record).unwrap();
        assert!(package_dir.join("lib/dummy.py").is_file());

        // A second extract is a no-op.
        let again = cache.extract(&archive, &record).unwrap();
        assert_eq!(package_dir, again);
    }

    #[test]
    fn reap_removes_unreferenced() {
        let dir = tempfile::tempdir().unwrap();
        let (archive, bytes) = make_archive(dir.path());
        let record = record(&bytes);
        let cache = PackageCache::new(dir.path().join("cache")).unwrap();
        cache.extract(&archive, &record).unwrap();

        // Referenced: nothing → the directory is reaped.
        let removed = cache.reap(std::iter::empty()).unwrap();
        assert_eq!(removed.len(), 1);
        assert!(!cache.package_dir(&record).exists());

        // Extract again, this time reference it.
        cache.extract(&archive, &record).unwrap();
        let key = CacheKey::from(&record);
        let removed = cache.reap([&key]).unwrap();
        assert!(removed.is_empty());
        assert!(cache.package_dir(&record).exists());
    }
}
