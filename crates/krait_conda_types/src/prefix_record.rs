//! Defines [`PrefixRecord`]: a record of one installed package in a prefix.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use krait_digest::serde::SerializableHash;
use serde::{Deserialize, Serialize};
use serde_repr::{Deserialize_repr, Serialize_repr};
use serde_with::serde_as;

use crate::package::FileMode;
use crate::RepoDataRecord;

/// Information about every file installed with a package.
///
/// This is similar to [`crate::package::PathsJson`], but where that file
/// describes how a package *should* be installed, this type records how it
/// *was* installed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrefixPaths {
    /// The version of the file format.
    pub paths_version: u64,

    /// All files installed for the package.
    #[serde(default)]
    pub paths: Vec<PathsEntry>,
}

impl Default for PrefixPaths {
    fn default() -> Self {
        Self {
            paths_version: 1,
            paths: Vec::default(),
        }
    }
}

impl From<Vec<PathsEntry>> for PrefixPaths {
    fn from(paths: Vec<PathsEntry>) -> Self {
        Self {
            paths,
            ..Default::default()
        }
    }
}

/// Information about a single installed file.
#[serde_as]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Hash)]
pub struct PathsEntry {
    /// The relative path of the file from the root of the prefix, always
    /// separated by forward slashes.
    #[serde(rename = "_path")]
    #[serde_as(as = "crate::utils::serde::NormalizedPath")]
    pub relative_path: PathBuf,

    /// How the file was installed into the prefix.
    pub path_type: PathType,

    /// Whether this file should never be hard-linked from the cache.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub no_link: bool,

    /// The SHA256 hash of the file as it was shipped in the package.
    #[serde_as(as = "Option<SerializableHash::<krait_digest::Sha256>>")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<krait_digest::Sha256Hash>,

    /// The SHA256 hash of the file as it exists in the prefix. Differs from
    /// `sha256` when a placeholder was rewritten.
    #[serde_as(as = "Option<SerializableHash::<krait_digest::Sha256>>")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256_in_prefix: Option<krait_digest::Sha256Hash>,

    /// The size of the file in bytes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_in_bytes: Option<u64>,

    /// The file mode used for placeholder replacement.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_mode: Option<FileMode>,

    /// The original placeholder string that was replaced with the prefix.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix_placeholder: Option<String>,
}

/// The way a single file was placed into a prefix.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PathType {
    /// The file is a hard link to a file in the package cache.
    #[serde(rename = "hardlink")]
    HardLink,
    /// The file is a soft link.
    #[serde(rename = "softlink")]
    SoftLink,
    /// An (empty) directory placeholder.
    Directory,
    /// A python entry point script generated at install time (unix).
    UnixPythonEntryPoint,
    /// A python entry point script generated at install time (windows).
    WindowsPythonEntryPointScript,
}

impl From<crate::package::PathType> for PathType {
    fn from(ty: crate::package::PathType) -> Self {
        match ty {
            crate::package::PathType::HardLink => PathType::HardLink,
            crate::package::PathType::SoftLink => PathType::SoftLink,
            crate::package::PathType::Directory => PathType::Directory,
        }
    }
}

/// Describes how the files of a package were linked into a prefix.
#[derive(Debug, Deserialize, Serialize, Eq, PartialEq, Clone)]
pub struct Link {
    /// The directory from which the package was linked.
    pub source: PathBuf,

    /// The link type that was used to install the files.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub link_type: Option<LinkType>,
}

/// The different link types conda records in its metadata. The numeric
/// values are part of the on-disk format.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize_repr, Deserialize_repr, Hash)]
#[repr(u8)]
pub enum LinkType {
    /// The file refers to the same inode as the file in the cache.
    HardLink = 1,
    /// The file is a soft link to the file in the cache.
    SoftLink = 2,
    /// The file is a full copy of the file in the cache.
    Copy = 3,
    /// The entry is a directory.
    Directory = 4,
}

/// A record of a single installed package in an environment. Alongside the
/// [`RepoDataRecord`] of the package it records the installed files, how
/// they were linked, and which spec requested the install.
#[serde_as]
#[derive(Debug, Deserialize, Serialize, Eq, PartialEq, Clone)]
pub struct PrefixRecord {
    /// The record of the package this was installed from.
    #[serde(flatten)]
    pub repodata_record: RepoDataRecord,

    /// The path to the package archive on disk, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package_tarball_full_path: Option<PathBuf>,

    /// The cache directory the package was linked from, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extracted_package_dir: Option<PathBuf>,

    /// A sorted list of all files installed for this package, relative to
    /// the prefix root.
    #[serde(default)]
    #[serde_as(as = "Vec<crate::utils::serde::NormalizedPath>")]
    pub files: Vec<PathBuf>,

    /// Per-file installation metadata.
    #[serde(default)]
    pub paths_data: PrefixPaths,

    /// How the package was linked into the prefix.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<Link>,

    /// The spec that caused this package to be installed, if it was
    /// explicitly requested.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requested_spec: Option<String>,
}

impl PrefixRecord {
    /// Creates a `PrefixRecord` from a [`RepoDataRecord`] and the files that
    /// were installed for it.
    pub fn from_repodata_record(
        repodata_record: RepoDataRecord,
        package_tarball_full_path: Option<PathBuf>,
        extracted_package_dir: Option<PathBuf>,
        paths: Vec<PathsEntry>,
        requested_spec: Option<String>,
        link: Option<Link>,
    ) -> Self {
        Self {
            repodata_record,
            package_tarball_full_path,
            extracted_package_dir,
            files: paths
                .iter()
                .map(|entry| entry.relative_path.clone())
                .collect(),
            paths_data: paths.into(),
            link,
            requested_spec,
        }
    }

    /// Parses a prefix record from a reader.
    pub fn from_reader(mut reader: impl Read) -> Result<Self, std::io::Error> {
        let mut str = String::new();
        reader.read_to_string(&mut str)?;
        Self::from_str(&str)
    }

    /// Parses a prefix record from a file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, std::io::Error> {
        Self::from_reader(fs_err::File::open(path.as_ref())?)
    }

    /// Returns the canonical file name for this record:
    /// `<name>-<version>-<build>.json`.
    pub fn file_name(&self) -> String {
        let record = &self.repodata_record.package_record;
        format!(
            "{}-{}-{}.json",
            record.name.as_normalized(),
            record.version,
            record.build
        )
    }

    /// Writes this record to the given path. The write is atomic: the
    /// contents are written to a temporary sibling file that is renamed over
    /// the destination.
    pub fn write_to_path(&self, path: impl AsRef<Path>, pretty: bool) -> std::io::Result<()> {
        let path = path.as_ref();
        let parent = path.parent().unwrap_or_else(|| Path::new("."));
        let mut temp = tempfile::NamedTempFile::new_in(parent)?;
        self.write_to(&mut temp, pretty)?;
        temp.persist(path).map_err(|e| e.error)?;
        Ok(())
    }

    /// Writes this record to a writer.
    pub fn write_to(&self, writer: impl std::io::Write, pretty: bool) -> std::io::Result<()> {
        let writer = std::io::BufWriter::new(writer);
        if pretty {
            serde_json::to_writer_pretty(writer, self)?;
        } else {
            serde_json::to_writer(writer, self)?;
        }
        Ok(())
    }

    /// Collects all prefix records from the `conda-meta` directory of the
    /// given prefix. Returns an empty vector when the directory is missing.
    pub fn collect_from_prefix(prefix: &Path) -> Result<Vec<PrefixRecord>, std::io::Error> {
        let conda_meta_path = prefix.join("conda-meta");
        if !conda_meta_path.exists() {
            return Ok(Vec::new());
        }

        let mut records = Vec::new();
        for entry in fs_err::read_dir(&conda_meta_path)? {
            let entry = entry?;
            if entry.file_type()?.is_file()
                && entry.file_name().to_string_lossy().ends_with(".json")
            {
                records.push(Self::from_path(entry.path())?);
            }
        }

        // Directory iteration order is platform dependent.
        records.sort_by(|a, b| {
            a.repodata_record
                .package_record
                .name
                .cmp(&b.repodata_record.package_record.name)
        });
        Ok(records)
    }
}

impl FromStr for PrefixRecord {
    type Err = std::io::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        serde_json::from_str(s).map_err(Into::into)
    }
}

impl AsRef<RepoDataRecord> for PrefixRecord {
    fn as_ref(&self) -> &RepoDataRecord {
        &self.repodata_record
    }
}

impl AsRef<crate::PackageRecord> for PrefixRecord {
    fn as_ref(&self) -> &crate::PackageRecord {
        &self.repodata_record.package_record
    }
}
