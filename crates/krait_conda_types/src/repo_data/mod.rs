//! Defines [`RepoData`], the in-memory representation of the contents of a
//! `repodata.json` file: all packages present in one subdirectory of a
//! channel.

pub mod patches;
mod topological_sort;

use std::collections::BTreeSet;
use std::fmt::{Display, Formatter};
use std::path::Path;

use fxhash::{FxHashMap, FxHashSet};
use krait_digest::serde::SerializableHash;
use krait_digest::{Md5Hash, Sha256Hash};
use serde::{Deserialize, Serialize};
use crate::Version;
use serde_with::{serde_as, skip_serializing_none, OneOrMany};
use thiserror::Error;
use url::Url;

use crate::build_spec::BuildNumber;
use crate::utils::serde::sort_map_alphabetically;
use crate::{Channel, MatchSpec, Matches, NoArchType, PackageName, RepoDataRecord};

pub use topological_sort::sort_topologically;

/// [`RepoData`] is an index of package binaries available in a subdirectory
/// of a conda channel.
#[derive(Debug, Deserialize, Serialize, Eq, PartialEq, Clone)]
pub struct RepoData {
    /// The channel information contained in the repodata.json file.
    pub info: Option<ChannelInfo>,

    /// The `.tar.bz2` packages contained in the repodata.json file.
    #[serde(default, serialize_with = "sort_map_alphabetically")]
    pub packages: FxHashMap<String, PackageRecord>,

    /// The `.conda` packages contained in the repodata.json file (under a
    /// different key for backwards compatibility with older conda versions).
    #[serde(
        default,
        rename = "packages.conda",
        serialize_with = "sort_map_alphabetically"
    )]
    pub conda_packages: FxHashMap<String, PackageRecord>,

    /// Removed (yanked) packages. The files are still accessible but they
    /// are no longer installable.
    #[serde(
        default,
        serialize_with = "sort_set_alphabetically",
        skip_serializing_if = "FxHashSet::is_empty"
    )]
    pub removed: FxHashSet<String>,

    /// The version of the repodata format.
    #[serde(rename = "repodata_version")]
    pub version: Option<u64>,
}

/// Information about the subdirectory of a channel in [`RepoData`].
#[derive(Debug, Deserialize, Serialize, Eq, PartialEq, Clone)]
pub struct ChannelInfo {
    /// The channel's subdirectory.
    pub subdir: String,

    /// The `base_url` for all package urls. Can be an absolute or relative
    /// url.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
}

/// A single record in the conda repodata: one binary distribution of a
/// package. Records are immutable once loaded.
#[serde_as]
#[skip_serializing_none]
#[derive(Debug, Deserialize, Serialize, Eq, PartialEq, Clone, Hash)]
pub struct PackageRecord {
    /// Optionally the architecture the package supports.
    pub arch: Option<String>,

    /// The build string of the package.
    pub build: String,

    /// The build number of the package.
    pub build_number: BuildNumber,

    /// Additional constraints on packages. Unlike `depends`, packages in
    /// `constrains` are not required to be installed, but when they are they
    /// must follow these constraints.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub constrains: Vec<String>,

    /// Specification of packages this package depends on.
    #[serde(default)]
    pub depends: Vec<String>,

    /// Feature sets this record belongs to. Deprecated, but still present in
    /// old repodata.
    pub features: Option<String>,

    /// The specific license of the package.
    pub license: Option<String>,

    /// The license family.
    pub license_family: Option<String>,

    /// Optionally an MD5 hash of the package archive.
    #[serde_as(as = "Option<SerializableHash::<krait_digest::Md5>>")]
    pub md5: Option<Md5Hash>,

    /// The name of the package.
    pub name: PackageName,

    /// If this package is independent of architecture this field specifies
    /// in what way. See [`NoArchType`] for more information.
    #[serde(default, skip_serializing_if = "NoArchType::is_none")]
    pub noarch: NoArchType,

    /// Optionally the platform the package supports. Note that this does not
    /// match the [`crate::Platform`] enum.
    pub platform: Option<String>,

    /// Optionally a SHA256 hash of the package archive.
    #[serde_as(as = "Option<SerializableHash::<krait_digest::Sha256>>")]
    pub sha256: Option<Sha256Hash>,

    /// Optionally the size of the package archive in bytes.
    pub size: Option<u64>,

    /// The subdirectory where the package can be found.
    #[serde(default)]
    pub subdir: String,

    /// The date this entry was created.
    #[serde_as(as = "Option<crate::utils::serde::Timestamp>")]
    pub timestamp: Option<chrono::DateTime<chrono::Utc>>,

    /// Track features are nowadays only used to give packages a lower
    /// priority in the solver. The number of track features is counted and
    /// the package is down-weighted accordingly.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    #[serde_as(as = "OneOrMany<_>")]
    pub track_features: Vec<String>,

    /// The version of the package.
    pub version: Version,
}

impl Display for PackageRecord {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if self.build.is_empty() {
            write!(f, "{} {}", self.name.as_normalized(), self.version)
        } else {
            write!(
                f,
                "{}={}={}",
                self.name.as_normalized(),
                self.version,
                self.build
            )
        }
    }
}

impl AsRef<PackageRecord> for PackageRecord {
    fn as_ref(&self) -> &PackageRecord {
        self
    }
}

impl PackageRecord {
    /// A simple helper method that constructs a `PackageRecord` with the bare
    /// minimum values.
    pub fn new(name: PackageName, version: Version, build: String) -> Self {
        Self {
            arch: None,
            build,
            build_number: 0,
            constrains: vec![],
            depends: vec![],
            features: None,
            license: None,
            license_family: None,
            md5: None,
            name,
            noarch: NoArchType::default(),
            platform: None,
            sha256: None,
            size: None,
            subdir: crate::Platform::current().to_string(),
            timestamp: None,
            track_features: vec![],
            version,
        }
    }

    /// Validate that the given package records form a valid environment with
    /// respect to `depends` and `constrains`: every dependency of every
    /// record is satisfied by another record in the list and no constraint
    /// is violated.
    pub fn validate<T: AsRef<PackageRecord>>(
        records: &[T],
    ) -> Result<(), ValidatePackageRecordsError> {
        for package in records.iter() {
            let package = package.as_ref();
            for dep in &package.depends {
                // Virtual packages (e.g. `__unix`) are provided by the system.
                if dep.starts_with("__") {
                    continue;
                }
                let dep_spec = MatchSpec::from_str(dep)?;
                if !records.iter().any(|p| dep_spec.matches(p.as_ref())) {
                    return Err(ValidatePackageRecordsError::DependencyNotInEnvironment {
                        package: Box::new(package.to_owned()),
                        dependency: dep.clone(),
                    });
                }
            }

            for constraint in &package.constrains {
                let constraint_spec = MatchSpec::from_str(constraint)?;
                let matching_package = records.iter().find(|record| {
                    constraint_spec
                        .name
                        .as_ref()
                        .is_some_and(|name| name == &record.as_ref().name)
                });
                if let Some(violator) = matching_package {
                    if !constraint_spec.matches(violator.as_ref()) {
                        return Err(ValidatePackageRecordsError::PackageConstraintNotSatisfied {
                            package: Box::new(package.to_owned()),
                            constraint: constraint.clone(),
                            violating_package: Box::new(violator.as_ref().to_owned()),
                        });
                    }
                }
            }
        }
        Ok(())
    }
}

/// An error returned by [`PackageRecord::validate`].
#[derive(Debug, Error)]
pub enum ValidatePackageRecordsError {
    /// A dependency of a package is not present in the environment.
    #[error("package '{package}' has dependency '{dependency}', which is not in the environment")]
    DependencyNotInEnvironment {
        /// The package containing the unmet dependency.
        package: Box<PackageRecord>,
        /// The dependency that is not in the environment.
        dependency: String,
    },

    /// A package constraint is violated in the environment.
    #[error("package '{package}' has constraint '{constraint}', which is not satisfied by '{violating_package}' in the environment")]
    PackageConstraintNotSatisfied {
        /// The package containing the unmet constraint.
        package: Box<PackageRecord>,
        /// The constraint that is violated.
        constraint: String,
        /// The package that violates the constraint.
        violating_package: Box<PackageRecord>,
    },

    /// A `depends` or `constrains` entry could not be parsed.
    #[error(transparent)]
    ParseMatchSpec(#[from] crate::ParseMatchSpecError),
}

impl RepoData {
    /// Parses [`RepoData`] from a file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, std::io::Error> {
        let contents = fs_err::read_to_string(path.as_ref())?;
        Ok(serde_json::from_str(&contents)?)
    }

    /// Returns the `base_url` specified in the repodata.
    pub fn base_url(&self) -> Option<&str> {
        self.info.as_ref().and_then(|i| i.base_url.as_deref())
    }

    /// Builds a [`Vec<RepoDataRecord>`] from the packages in this instance.
    ///
    /// Filenames are iterated in sorted order so that the result is
    /// deterministic. When the same filename (modulo archive extension)
    /// appears both as a `.tar.bz2` and a `.conda` package, the `.conda`
    /// variant wins.
    pub fn into_repo_data_records(self, channel: &Channel) -> Vec<RepoDataRecord> {
        let mut records = Vec::with_capacity(self.packages.len() + self.conda_packages.len());
        let channel_name = channel.canonical_name();
        let base_url = self.base_url().map(ToOwned::to_owned);

        let subdir_url = |record: &PackageRecord| {
            let mut url = channel.base_url().clone();
            if let Ok(mut segments) = url.path_segments_mut() {
                segments.pop_if_empty().push(&record.subdir);
            }
            url
        };

        let sorted = |map: FxHashMap<String, PackageRecord>| {
            let mut entries = map.into_iter().collect::<Vec<_>>();
            entries.sort_by(|(a, _), (b, _)| a.cmp(b));
            entries
        };

        for (filename, package_record) in sorted(self.packages)
            .into_iter()
            .chain(sorted(self.conda_packages))
        {
            records.push(RepoDataRecord {
                url: compute_package_url(
                    &subdir_url(&package_record),
                    base_url.as_deref(),
                    &filename,
                ),
                channel: channel_name.clone(),
                package_record,
                file_name: filename,
            });
        }
        records
    }
}

/// Computes the URL for a package given the url of the repodata it came from.
pub fn compute_package_url(
    repo_data_base_url: &Url,
    base_url: Option<&str>,
    filename: &str,
) -> Url {
    let mut absolute_url = match base_url {
        None => repo_data_base_url.clone(),
        Some(base_url) => match Url::parse(base_url) {
            Ok(base_url) => base_url,
            Err(url::ParseError::RelativeUrlWithoutBase) => {
                let mut url = repo_data_base_url.clone();
                if base_url.starts_with('/') {
                    url.set_path(base_url);
                } else {
                    let path = format!("{}/", url.path().trim_end_matches('/'));
                    url.set_path(&path);
                    url = url.join(base_url).unwrap_or(url);
                }
                url
            }
            Err(_) => repo_data_base_url.clone(),
        },
    };

    let path = absolute_url.path();
    if !path.ends_with('/') {
        absolute_url.set_path(&format!("{path}/"));
    }
    absolute_url
        .join(filename)
        .expect("failed to join base_url and filename")
}

fn sort_set_alphabetically<S: serde::Serializer>(
    value: &FxHashSet<String>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    value.iter().collect::<BTreeSet<_>>().serialize(serializer)
}
