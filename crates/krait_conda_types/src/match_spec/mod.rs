//! The query language over conda packages.

pub mod matcher;
pub mod parse;

use std::fmt::{Display, Formatter};

use krait_digest::serde::SerializableHash;
use krait_digest::{Md5Hash, Sha256Hash};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, skip_serializing_none};
use url::Url;

use crate::{
    BuildNumberSpec, PackageName, PackageRecord, PrefixRecord, RepoDataRecord, VersionSpec,
};
use matcher::StringMatcher;

/// A [`MatchSpec`] is a query language over conda packages: a predicate that
/// a [`PackageRecord`] either matches or does not.
///
/// The string form is
///
/// ```text
/// (channel(/subdir)::)name(version(build))([key=value,key=value])
/// ```
///
/// where `()` indicate optional parts. The version can use the operators
/// `=`, `==`, `!=`, `<`, `<=`, `>`, `>=`, glob patterns (`1.7.*`), the
/// compatible-release operator (`~=1.4.5`) and logical combinations
/// (`>=1.8,<2|1.7.*`). The build part matches the build string exactly or by
/// glob. Bracket keys override any conflicting value given outside the
/// brackets.
///
/// A `MatchSpec` has a canonical string form that parses back to an equal
/// value, so specs can be used as stable set elements.
///
/// # Examples
///
/// ```rust
/// use krait_conda_types::MatchSpec;
///
/// let spec = MatchSpec::from_str("conda-forge::numpy>=1.20,<2[build=py310*]").unwrap();
/// assert_eq!(spec.name.as_ref().unwrap().as_normalized(), "numpy");
/// assert_eq!(spec.channel.as_deref(), Some("conda-forge"));
///
/// let roundtrip = MatchSpec::from_str(&spec.to_string()).unwrap();
/// assert_eq!(spec, roundtrip);
/// ```
#[serde_as]
#[skip_serializing_none]
#[derive(Debug, Default, Clone, Serialize, Deserialize, Eq, PartialEq, Hash)]
pub struct MatchSpec {
    /// The name of the package. `None` matches any name.
    pub name: Option<PackageName>,
    /// The version spec of the package (e.g. `1.2.3`, `>=1.2.3`, `1.2.*`).
    pub version: Option<VersionSpec>,
    /// The build string of the package (e.g. `py37_0`, `py37*`).
    pub build: Option<StringMatcher>,
    /// The build number of the package.
    pub build_number: Option<BuildNumberSpec>,
    /// A specific filename to match against.
    pub file_name: Option<String>,
    /// The canonical name of the channel the package must come from.
    pub channel: Option<String>,
    /// The subdir of the channel.
    pub subdir: Option<String>,
    /// The md5 hash of the package archive.
    #[serde_as(as = "Option<SerializableHash::<krait_digest::Md5>>")]
    pub md5: Option<Md5Hash>,
    /// The sha256 hash of the package archive.
    #[serde_as(as = "Option<SerializableHash::<krait_digest::Sha256>>")]
    pub sha256: Option<Sha256Hash>,
    /// The license of the package.
    pub license: Option<String>,
    /// The feature set the package must belong to.
    pub features: Option<String>,
    /// The track features the package must carry.
    pub track_features: Option<Vec<String>>,
    /// The url of the package.
    pub url: Option<Url>,
}

impl MatchSpec {
    /// Constructs a spec that only matches the given package name.
    pub fn from_name(name: PackageName) -> Self {
        Self {
            name: Some(name),
            ..Self::default()
        }
    }

    /// Constructs a spec that matches exactly the given record by its
    /// (name, version, build) triple.
    pub fn from_record_triple(record: &PackageRecord) -> Self {
        Self {
            name: Some(record.name.clone()),
            version: Some(VersionSpec::Exact(
                crate::version_spec::EqualityOperator::Equals,
                record.version.clone(),
            )),
            build: Some(StringMatcher::Exact(record.build.clone())),
            ..Self::default()
        }
    }

    /// Returns true if this spec may describe a virtual package. Virtual
    /// package names start with `__`.
    pub fn is_virtual(&self) -> bool {
        self.name
            .as_ref()
            .is_some_and(|name| name.as_normalized().starts_with("__"))
    }
}

impl Display for MatchSpec {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if let Some(channel) = &self.channel {
            write!(f, "{channel}")?;
            if let Some(subdir) = &self.subdir {
                write!(f, "/{subdir}")?;
            }
            write!(f, "::")?;
        }

        match &self.name {
            Some(name) => write!(f, "{}", name.as_source())?,
            None => write!(f, "*")?,
        }

        if let Some(version) = &self.version {
            write!(f, " {version}")?;
        }

        if let Some(build) = &self.build {
            write!(f, " {build}")?;
        }

        let mut keys = Vec::new();

        if self.channel.is_none() {
            if let Some(subdir) = &self.subdir {
                keys.push(format!("subdir=\"{subdir}\""));
            }
        }

        if let Some(build_number) = &self.build_number {
            keys.push(format!("build_number=\"{build_number}\""));
        }

        if let Some(file_name) = &self.file_name {
            keys.push(format!("fn=\"{file_name}\""));
        }

        if let Some(md5) = &self.md5 {
            keys.push(format!("md5=\"{md5:x}\""));
        }

        if let Some(sha256) = &self.sha256 {
            keys.push(format!("sha256=\"{sha256:x}\""));
        }

        if let Some(license) = &self.license {
            keys.push(format!("license=\"{license}\""));
        }

        if let Some(features) = &self.features {
            keys.push(format!("features=\"{features}\""));
        }

        if let Some(track_features) = &self.track_features {
            keys.push(format!("track_features=\"{}\"", track_features.join(" ")));
        }

        if let Some(url) = &self.url {
            keys.push(format!("url=\"{url}\""));
        }

        if !keys.is_empty() {
            write!(f, "[{}]", keys.join(", "))?;
        }

        Ok(())
    }
}

/// A trait that defines matching a spec against a record.
pub trait Matches<T> {
    /// Returns true when `other` satisfies this spec.
    fn matches(&self, other: &T) -> bool;
}

impl Matches<PackageRecord> for MatchSpec {
    fn matches(&self, other: &PackageRecord) -> bool {
        if let Some(name) = self.name.as_ref() {
            if name != &other.name {
                return false;
            }
        }

        if let Some(spec) = self.version.as_ref() {
            if !spec.matches(&other.version) {
                return false;
            }
        }

        if let Some(build_string) = self.build.as_ref() {
            if !build_string.matches(&other.build) {
                return false;
            }
        }

        if let Some(build_number) = self.build_number.as_ref() {
            if !build_number.matches(&other.build_number) {
                return false;
            }
        }

        if let Some(subdir) = self.subdir.as_ref() {
            if subdir != &other.subdir {
                return false;
            }
        }

        if let Some(md5_spec) = self.md5.as_ref() {
            if Some(md5_spec) != other.md5.as_ref() {
                return false;
            }
        }

        if let Some(sha256_spec) = self.sha256.as_ref() {
            if Some(sha256_spec) != other.sha256.as_ref() {
                return false;
            }
        }

        if let Some(license) = self.license.as_ref() {
            if Some(license) != other.license.as_ref() {
                return false;
            }
        }

        if let Some(features) = self.features.as_ref() {
            if Some(features) != other.features.as_ref() {
                return false;
            }
        }

        if let Some(track_features) = self.track_features.as_ref() {
            if track_features
                .iter()
                .any(|feature| !other.track_features.contains(feature))
            {
                return false;
            }
        }

        true
    }
}

impl Matches<RepoDataRecord> for MatchSpec {
    fn matches(&self, other: &RepoDataRecord) -> bool {
        if let Some(channel) = self.channel.as_ref() {
            if channel != "*" && channel != &other.channel {
                return false;
            }
        }

        if let Some(file_name) = self.file_name.as_ref() {
            if file_name != &other.file_name {
                return false;
            }
        }

        if let Some(url_spec) = self.url.as_ref() {
            if url_spec != &other.url {
                return false;
            }
        }

        self.matches(&other.package_record)
    }
}

impl Matches<PrefixRecord> for MatchSpec {
    fn matches(&self, other: &PrefixRecord) -> bool {
        self.matches(&other.repodata_record)
    }
}

impl From<PackageName> for MatchSpec {
    fn from(value: PackageName) -> Self {
        Self::from_name(value)
    }
}
