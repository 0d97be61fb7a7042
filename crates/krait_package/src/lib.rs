#![deny(missing_docs)]

//! Functions to extract conda package archives.
//!
//! Two formats are recognised:
//!
//! * `.tar.bz2` — a bzip2 compressed tarball (the legacy format).
//! * `.conda` — a zip file containing two zstd compressed tarballs:
//!   `info-<name>.tar.zst` holds the package metadata and
//!   `pkg-<name>.tar.zst` the payload. The metadata can be read without
//!   touching the payload.
//!
//! While extracting from a file on disk, the SHA256 and MD5 hashes of the
//! archive are computed on the fly so callers can verify them against the
//! repodata without a second pass.

pub mod read;
pub mod seek;

use std::path::Path;

use krait_conda_types::package::ArchiveType;
use krait_digest::{Md5Hash, Sha256Hash};

/// An error that can occur when extracting a package archive.
#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    /// An IO error occurred.
    #[error("an io error occurred")]
    IoError(#[from] std::io::Error),

    /// The destination directory could not be created.
    #[error("could not create the destination path")]
    CouldNotCreateDestination(#[source] std::io::Error),

    /// The archive is not a valid zip file.
    #[error("invalid zip archive")]
    ZipError(#[from] zip::result::ZipError),

    /// The file does not have a recognised archive extension.
    #[error("the file '{0}' is not a conda package archive")]
    UnsupportedArchiveType(String),

    /// The `.conda` archive does not contain the expected member.
    #[error("missing component '{0}' in the archive")]
    MissingComponent(&'static str),
}

/// The result of a successful extraction: the hashes of the archive that
/// was unpacked.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ExtractResult {
    /// The SHA256 hash of the archive.
    pub sha256: Sha256Hash,

    /// The MD5 hash of the archive.
    pub md5: Md5Hash,
}

/// Extracts the package archive at the given path into the destination
/// directory, dispatching on the archive extension.
pub fn extract(archive: &Path, destination: &Path) -> Result<ExtractResult, ExtractError> {
    match ArchiveType::try_from(archive.to_string_lossy().as_ref()) {
        Some(ArchiveType::TarBz2) => extract_tar_bz2(archive, destination),
        Some(ArchiveType::Conda) => extract_conda(archive, destination),
        None => Err(ExtractError::UnsupportedArchiveType(
            archive.display().to_string(),
        )),
    }
}

/// Extracts a `.tar.bz2` archive at the given path into the destination
/// directory.
pub fn extract_tar_bz2(archive: &Path, destination: &Path) -> Result<ExtractResult, ExtractError> {
    let file = fs_err::File::open(archive)?;

    // Hash the raw bytes as they are read from disk.
    let sha256_reader = krait_digest::HashingReader::<_, krait_digest::Sha256>::new(file);
    let mut md5_reader = krait_digest::HashingReader::<_, krait_digest::Md5>::new(sha256_reader);

    read::extract_tar_bz2(&mut md5_reader, destination)?;

    // Drain any trailing bytes that the tar reader left unread, they are
    // still part of the archive hash.
    std::io::copy(&mut md5_reader, &mut std::io::sink())?;

    let (sha256_reader, md5) = md5_reader.finalize();
    let (_, sha256) = sha256_reader.finalize();
    Ok(ExtractResult { sha256, md5 })
}

/// Extracts a `.conda` archive at the given path into the destination
/// directory.
pub fn extract_conda(archive: &Path, destination: &Path) -> Result<ExtractResult, ExtractError> {
    let file = fs_err::File::open(archive)?;

    let sha256_reader = krait_digest::HashingReader::<_, krait_digest::Sha256>::new(file);
    let mut md5_reader = krait_digest::HashingReader::<_, krait_digest::Md5>::new(sha256_reader);

    read::extract_conda(&mut md5_reader, destination)?;

    std::io::copy(&mut md5_reader, &mut std::io::sink())?;

    let (sha256_reader, md5) = md5_reader.finalize();
    let (_, sha256) = sha256_reader.finalize();
    Ok(ExtractResult { sha256, md5 })
}
