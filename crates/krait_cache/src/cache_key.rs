//! The key under which a package lives in the cache.

use std::fmt::{Display, Formatter};

use krait_conda_types::package::ArchiveIdentifier;
use krait_conda_types::RepoDataRecord;

/// The `name-version-build` triple that names both the extracted directory
/// of a package and, with an archive extension, its archive file.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct CacheKey {
    /// The name of the package.
    pub name: String,

    /// The version of the package.
    pub version: String,

    /// The build string of the package.
    pub build_string: String,
}

impl From<&RepoDataRecord> for CacheKey {
    fn from(record: &RepoDataRecord) -> Self {
        let record = &record.package_record;
        Self {
            name: record.name.as_normalized().to_owned(),
            version: record.version.to_string(),
            build_string: record.build.clone(),
        }
    }
}

impl From<ArchiveIdentifier> for CacheKey {
    fn from(identifier: ArchiveIdentifier) -> Self {
        Self {
            name: identifier.name,
            version: identifier.version,
            build_string: identifier.build_string,
        }
    }
}

impl Display for CacheKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}-{}", self.name, self.version, self.build_string)
    }
}
