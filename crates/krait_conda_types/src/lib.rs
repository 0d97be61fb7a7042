#![deny(missing_docs)]

//! `krait_conda_types` contains the data types that are used across the krait
//! workspace: version strings and their total order, version- and match-
//! specifications (the query language over package records), package names,
//! platforms, channels, repodata records, installed-package (prefix) records,
//! the metadata files found inside package archives, and the history ledger
//! of an environment.
//!
//! All types in this crate are plain values: parsing and comparing them never
//! touches the filesystem unless a function explicitly takes a path.

mod build_spec;
mod channel;
pub mod history;
mod match_spec;
mod no_arch_type;
pub mod package;
mod package_name;
mod pinned;
mod platform;
mod prefix_record;
pub mod repo_data;
mod repo_data_record;
mod utils;
mod version;
pub mod version_spec;

pub use build_spec::{BuildNumber, BuildNumberSpec, OrdOperator, ParseBuildNumberSpecError};
pub use channel::{Channel, ChannelConfig, ParseChannelError};
pub use history::{History, HistoryError, HistoryRevision, ParsedHistory, UserRequest};
pub use match_spec::{
    matcher::{StringMatcher, StringMatcherParseError},
    parse::ParseMatchSpecError,
    MatchSpec, Matches,
};
pub use no_arch_type::{NoArchKind, NoArchType};
pub use package_name::{PackageName, ParsePackageNameError};
pub use pinned::PinnedSpecs;
pub use platform::{ParsePlatformError, Platform};
pub use prefix_record::{Link, LinkType, PathType, PathsEntry, PrefixPaths, PrefixRecord};
pub use repo_data::{
    patches::{PackageRecordPatch, PatchInstructions},
    ChannelInfo, PackageRecord, RepoData,
};
pub use repo_data_record::RepoDataRecord;
pub use utils::serde::Timestamp;
pub use version::{ParseVersionError, ParseVersionErrorKind, StrictVersion, Version};
pub use version_spec::{ParseVersionSpecError, VersionSpec};
