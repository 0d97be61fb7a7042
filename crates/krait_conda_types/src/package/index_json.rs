//! The `info/index.json` file: the package record as stored inside the
//! archive itself.

use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_with::{serde_as, skip_serializing_none, OneOrMany};

use super::PackageFile;
use crate::build_spec::BuildNumber;
use crate::{NoArchType, PackageName, Version};

/// The `index.json` file of a package archive. Its shape is a subset of a
/// repodata record: the hashes and size describe the archive and can
/// therefore not be part of it.
#[serde_as]
#[skip_serializing_none]
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IndexJson {
    /// Optionally the architecture the package supports.
    pub arch: Option<String>,

    /// The build string of the package.
    pub build: String,

    /// The build number of the package.
    pub build_number: BuildNumber,

    /// Additional constraints on packages that are not dependencies.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub constrains: Vec<String>,

    /// Specification of packages this package depends on.
    #[serde(default)]
    pub depends: Vec<String>,

    /// Deprecated feature set field.
    pub features: Option<String>,

    /// The license of the package.
    pub license: Option<String>,

    /// The license family.
    pub license_family: Option<String>,

    /// The name of the package.
    pub name: PackageName,

    /// Whether and how the package is architecture independent.
    #[serde(default, skip_serializing_if = "NoArchType::is_none")]
    pub noarch: NoArchType,

    /// Optionally the platform the package supports.
    pub platform: Option<String>,

    /// The subdirectory this package was built for.
    pub subdir: Option<String>,

    /// The timestamp when this package was created.
    #[serde_as(as = "Option<crate::utils::serde::Timestamp>")]
    pub timestamp: Option<chrono::DateTime<chrono::Utc>>,

    /// Track features to down-weight the package in the solver.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    #[serde_as(as = "OneOrMany<_>")]
    pub track_features: Vec<String>,

    /// The version of the package.
    pub version: Version,
}

impl PackageFile for IndexJson {
    fn package_path() -> &'static Path {
        Path::new("info/index.json")
    }

    fn from_str(str: &str) -> Result<Self, std::io::Error> {
        serde_json::from_str(str).map_err(Into::into)
    }
}

#[cfg(test)]
mod test {
    use super::{IndexJson, PackageFile};

    #[test]
    fn test_parse() {
        let index: IndexJson = PackageFile::from_str(
            r#"{
                "name": "libzlib",
                "version": "1.2.13",
                "build": "h166bdaf_4",
                "build_number": 4,
                "depends": ["libgcc-ng >=12"],
                "license": "Zlib",
                "subdir": "linux-64",
                "timestamp": 1667328495026
            }"#,
        )
        .unwrap();
        assert_eq!(index.name.as_normalized(), "libzlib");
        assert_eq!(index.build_number, 4);
        assert!(index.noarch.is_none());
    }

    #[test]
    fn test_parse_noarch() {
        let index: IndexJson = PackageFile::from_str(
            r#"{
                "name": "wheel",
                "version": "0.38.4",
                "build": "pyhd8ed1ab_0",
                "build_number": 0,
                "noarch": "python",
                "subdir": "noarch"
            }"#,
        )
        .unwrap();
        assert!(index.noarch.is_python());
    }
}
