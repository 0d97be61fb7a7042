//! The `info/paths.json` file: the authoritative list of files a package
//! installs, and the legacy `info/files` fallback.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use krait_digest::serde::SerializableHash;
use serde::{Deserialize, Serialize};
use serde_with::serde_as;

use super::has_prefix::{HasPrefix, HasPrefixEntry};
use super::PackageFile;

/// A representation of the `paths.json` file found in package archives: one
/// entry for every file included with the package, with the information
/// needed to install it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathsJson {
    /// The version of the file format.
    pub paths_version: u64,

    /// All entries included in the package.
    pub paths: Vec<PathsEntry>,
}

impl PackageFile for PathsJson {
    fn package_path() -> &'static Path {
        Path::new("info/paths.json")
    }

    fn from_str(str: &str) -> Result<Self, std::io::Error> {
        serde_json::from_str(str).map_err(Into::into)
    }
}

impl PathsJson {
    /// Reads the file from an extracted package directory. If the
    /// `paths.json` file is missing, the information is reconstructed from
    /// the deprecated `files` and `has_prefix` files.
    pub fn from_package_directory_with_deprecated_fallback(
        path: &Path,
    ) -> Result<Self, std::io::Error> {
        match Self::from_package_directory(path) {
            Ok(paths) => Ok(paths),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Self::from_deprecated_package_directory(path)
            }
            Err(e) => Err(e),
        }
    }

    /// Reconstructs the information from the deprecated `info/files` and
    /// `info/has_prefix` files of very old package archives. The type of
    /// every path is determined by looking at the extracted files on disk.
    pub fn from_deprecated_package_directory(path: &Path) -> Result<Self, std::io::Error> {
        let files = Files::from_package_directory(path)?;
        let has_prefix = match HasPrefix::from_package_directory(path) {
            Ok(has_prefix) => Some(has_prefix),
            Err(e) if e.kind() == ErrorKind::NotFound => None,
            Err(e) => return Err(e),
        };

        let has_prefix: HashMap<PathBuf, HasPrefixEntry> = has_prefix
            .into_iter()
            .flat_map(|has_prefix| has_prefix.files)
            .map(|entry| (entry.relative_path.clone(), entry))
            .collect();

        let paths = files
            .files
            .into_iter()
            .map(|relative_path| {
                let prefix = has_prefix.get(&relative_path);
                let metadata = path.join(&relative_path).symlink_metadata()?;
                let path_type = if metadata.is_symlink() {
                    PathType::SoftLink
                } else if metadata.is_dir() {
                    PathType::Directory
                } else {
                    PathType::HardLink
                };
                Ok(PathsEntry {
                    path_type,
                    file_mode: prefix.map(|entry| entry.file_mode),
                    prefix_placeholder: prefix.map(|entry| entry.prefix.clone()),
                    no_link: false,
                    sha256: None,
                    size_in_bytes: Some(metadata.len()),
                    relative_path,
                })
            })
            .collect::<Result<_, std::io::Error>>()?;

        Ok(Self {
            paths,
            paths_version: 1,
        })
    }
}

/// A single entry in the `paths.json` file.
#[serde_as]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Hash)]
pub struct PathsEntry {
    /// The relative path from the root of the package.
    #[serde(rename = "_path")]
    pub relative_path: PathBuf,

    /// Determines how to include the file when installing the package.
    pub path_type: PathType,

    /// How the placeholder should be replaced, when there is one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_mode: Option<FileMode>,

    /// The placeholder prefix used in the file, or `None` if the file does
    /// not contain one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix_placeholder: Option<String>,

    /// Whether this file should never be linked; it is copied instead.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub no_link: bool,

    /// The SHA256 hash of the file as shipped in the package.
    #[serde_as(as = "Option<SerializableHash::<krait_digest::Sha256>>")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<krait_digest::Sha256Hash>,

    /// The size of the file in bytes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_in_bytes: Option<u64>,
}

/// How to install a file from the archive into the prefix.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PathType {
    /// The file can be hard linked from the cache.
    #[serde(rename = "hardlink")]
    HardLink,
    /// The file is a soft link.
    #[serde(rename = "softlink")]
    SoftLink,
    /// The entry is an (empty) directory.
    Directory,
}

/// Whether a placeholder in a file is replaced textually or as a
/// null-terminated C string.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Hash)]
#[serde(rename_all = "snake_case")]
pub enum FileMode {
    /// The file is a binary; the placeholder is replaced C-string wise,
    /// preserving offsets.
    Binary,
    /// The file is text; the placeholder is replaced as a plain substring.
    Text,
}

/// Representation of the deprecated `info/files` file: one relative path per
/// line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Files {
    /// The files included in the package.
    pub files: Vec<PathBuf>,
}

impl PackageFile for Files {
    fn package_path() -> &'static Path {
        Path::new("info/files")
    }

    fn from_str(str: &str) -> Result<Self, std::io::Error> {
        Ok(Self {
            files: str
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(PathBuf::from)
                .collect(),
        })
    }
}

#[cfg(test)]
mod test {
    use std::path::PathBuf;

    use super::{FileMode, Files, PackageFile, PathType, PathsJson};

    #[test]
    fn test_parse_paths_json() {
        let paths: PathsJson = PackageFile::from_str(
            r#"{
                "paths_version": 1,
                "paths": [
                    {
                        "_path": "bin/zardoz",
                        "path_type": "hardlink",
                        "sha256": "01ba4719c80b6fe911b091a7c05124b64eeece964e09c058ef8f9805daca546b",
                        "size_in_bytes": 1234
                    },
                    {
                        "_path": "etc/profile.d/zardoz.sh",
                        "path_type": "hardlink",
                        "file_mode": "text",
                        "prefix_placeholder": "/opt/anaconda1anaconda2anaconda3",
                        "size_in_bytes": 55
                    }
                ]
            }"#,
        )
        .unwrap();

        assert_eq!(paths.paths.len(), 2);
        assert_eq!(paths.paths[0].path_type, PathType::HardLink);
        assert!(paths.paths[0].sha256.is_some());
        assert_eq!(paths.paths[1].file_mode, Some(FileMode::Text));
        assert_eq!(
            paths.paths[1].prefix_placeholder.as_deref(),
            Some("/opt/anaconda1anaconda2anaconda3")
        );
    }

    #[test]
    fn test_parse_files() {
        let files: Files = PackageFile::from_str("bin/zardoz\nlib/libzardoz.so\n\n").unwrap();
        assert_eq!(
            files.files,
            vec![PathBuf::from("bin/zardoz"), PathBuf::from("lib/libzardoz.so")]
        );
    }

    #[test]
    fn test_deprecated_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let info = dir.path().join("info");
        std::fs::create_dir_all(&info).unwrap();
        std::fs::create_dir_all(dir.path().join("bin")).unwrap();
        std::fs::write(dir.path().join("bin/tool"), b"#!/bin/sh\n").unwrap();
        std::fs::write(info.join("files"), "bin/tool\n").unwrap();
        std::fs::write(
            info.join("has_prefix"),
            "/opt/anaconda1anaconda2anaconda3 text bin/tool\n",
        )
        .unwrap();

        let paths = PathsJson::from_package_directory_with_deprecated_fallback(dir.path()).unwrap();
        assert_eq!(paths.paths.len(), 1);
        assert_eq!(paths.paths[0].file_mode, Some(FileMode::Text));
        assert_eq!(
            paths.paths[0].prefix_placeholder.as_deref(),
            Some("/opt/anaconda1anaconda2anaconda3")
        );
    }
}
