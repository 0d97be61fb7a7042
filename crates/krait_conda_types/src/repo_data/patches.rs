//! Repodata patches: a second, smaller set of instructions that overrides
//! fields of the records in a `repodata.json` file. Channels ship these as
//! `patch_instructions.json` files per subdir.

use fxhash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, skip_serializing_none, OneOrMany};

use super::{PackageRecord, RepoData};

/// Contains the patch instructions for a single subdir.
#[serde_as]
#[skip_serializing_none]
#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct PatchInstructions {
    /// Filenames that have been removed (yanked) from the subdirectory.
    #[serde(default, skip_serializing_if = "FxHashSet::is_empty")]
    pub remove: FxHashSet<String>,

    /// Patches for `.tar.bz2` packages, keyed by filename.
    #[serde(default, skip_serializing_if = "FxHashMap::is_empty")]
    pub packages: FxHashMap<String, PackageRecordPatch>,

    /// Patches for `.conda` packages, keyed by filename.
    #[serde(
        default,
        rename = "packages.conda",
        skip_serializing_if = "FxHashMap::is_empty"
    )]
    pub conda_packages: FxHashMap<String, PackageRecordPatch>,
}

/// Overrides for the metadata of a single [`PackageRecord`].
///
/// Not every field of a record can be overwritten: changing a hash or the
/// file size would break caches keyed by filename. Only the fields below can
/// be modified through repodata patches.
#[serde_as]
#[skip_serializing_none]
#[derive(Debug, Default, Clone, Deserialize, Serialize, Eq, PartialEq)]
pub struct PackageRecordPatch {
    /// Specification of packages this package depends on.
    pub depends: Option<Vec<String>>,

    /// Additional constraints on packages that are not required to be
    /// installed.
    pub constrains: Option<Vec<String>>,

    /// Track features used to down-weight the package in the solver.
    #[serde_as(as = "Option<OneOrMany<_>>")]
    pub track_features: Option<Vec<String>>,

    /// Deprecated feature set field. `Some(None)` clears the field.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "::serde_with::rust::double_option"
    )]
    pub features: Option<Option<String>>,

    /// The specific license of the package. `Some(None)` clears the field.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "::serde_with::rust::double_option"
    )]
    pub license: Option<Option<String>>,

    /// The license family. `Some(None)` clears the field.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "::serde_with::rust::double_option"
    )]
    pub license_family: Option<Option<String>>,
}

impl PackageRecord {
    /// Applies a patch to this record, replacing the fields the patch names.
    pub fn apply_patch(&mut self, patch: &PackageRecordPatch) {
        if let Some(depends) = &patch.depends {
            self.depends = depends.clone();
        }
        if let Some(constrains) = &patch.constrains {
            self.constrains = constrains.clone();
        }
        if let Some(track_features) = &patch.track_features {
            self.track_features = track_features.clone();
        }
        if let Some(features) = &patch.features {
            self.features = features.clone();
        }
        if let Some(license) = &patch.license {
            self.license = license.clone();
        }
        if let Some(license_family) = &patch.license_family {
            self.license_family = license_family.clone();
        }
    }
}

impl RepoData {
    /// Applies the patch instructions to this repodata: record patches
    /// override the matching records and removed filenames move to the
    /// `removed` set.
    pub fn apply_patches(&mut self, instructions: &PatchInstructions) {
        for (filename, patch) in &instructions.packages {
            if let Some(record) = self.packages.get_mut(filename) {
                record.apply_patch(patch);
            }
        }
        for (filename, patch) in &instructions.conda_packages {
            if let Some(record) = self.conda_packages.get_mut(filename) {
                record.apply_patch(patch);
            }
        }

        // Conda tooling records removals against the `.tar.bz2` filename;
        // the matching `.conda` file is removed as well.
        for filename in &instructions.remove {
            if self.packages.remove(filename).is_some() {
                self.removed.insert(filename.clone());
            }
            if let Some(conda_filename) = filename
                .strip_suffix(".tar.bz2")
                .map(|stem| format!("{stem}.conda"))
            {
                if self.conda_packages.remove(&conda_filename).is_some() {
                    self.removed.insert(conda_filename);
                }
            }
            if self.conda_packages.remove(filename).is_some() {
                self.removed.insert(filename.clone());
            }
        }
    }
}
