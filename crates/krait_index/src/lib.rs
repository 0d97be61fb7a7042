#![deny(missing_docs)]

//! Loading of per-subdir repodata and the queryable package [`Index`].
//!
//! An index is built from one or more channels in priority order (the first
//! channel has the highest priority). For every (channel, subdir) pair the
//! repodata is loaded in two phases: the record set itself, and an optional
//! smaller patch set whose instructions override the records. Loading is
//! idempotent and tolerates missing optional fields; unknown subdirectories
//! on disk are skipped, not fatal.

use std::cmp::Ordering;
use std::path::Path;
use std::str::FromStr;

use fxhash::FxHashMap;
use rayon::prelude::*;
use thiserror::Error;

use krait_conda_types::repo_data::patches::PatchInstructions;
use krait_conda_types::{Channel, PackageName, Platform, RepoData, RepoDataRecord};

/// An error that can occur while loading repodata into an index.
#[derive(Debug, Error)]
pub enum LoadRepoDataError {
    /// An IO error occurred while reading a repodata file.
    #[error("failed to read repodata from '{path}'")]
    Io {
        /// The path that could not be read.
        path: String,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The repodata file could not be parsed.
    #[error("invalid repodata in '{path}'")]
    Parse {
        /// The path that could not be parsed.
        path: String,
        /// The underlying error.
        #[source]
        source: serde_json::Error,
    },
}

/// A queryable index over the records of all loaded (channel, subdir)
/// pairs.
///
/// Records for the same package name are kept sorted by (channel priority
/// ascending, version descending, build number descending, build string
/// descending, timestamp descending), so [`Index::query`] always returns
/// candidates best-first.
#[derive(Default)]
pub struct Index {
    records_by_name: FxHashMap<PackageName, Vec<RepoDataRecord>>,
    channel_priorities: FxHashMap<String, u32>,
    next_priority: u32,
}

impl Index {
    /// Constructs a new empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the priority that was assigned to a channel, if the channel
    /// contributed records to this index. Lower values mean higher priority.
    pub fn channel_priority(&self, channel: &str) -> Option<u32> {
        self.channel_priorities.get(channel).copied()
    }

    /// Parses repodata bytes for one (channel, subdir) pair and adds the
    /// records to the index.
    pub fn add_subdir_bytes(
        &mut self,
        channel: &Channel,
        platform: Platform,
        bytes: &[u8],
        patches: Option<&PatchInstructions>,
    ) -> Result<(), LoadRepoDataError> {
        let repodata = parse_repodata(bytes, &format!("{channel}/{platform}"))?;
        self.add_repo_data(channel, repodata, patches);
        Ok(())
    }

    /// Adds already-parsed repodata for a channel to the index, applying the
    /// patch instructions first when given.
    pub fn add_repo_data(
        &mut self,
        channel: &Channel,
        mut repodata: RepoData,
        patches: Option<&PatchInstructions>,
    ) {
        if let Some(patches) = patches {
            repodata.apply_patches(patches);
        }

        let channel_name = channel.canonical_name();
        if !self.channel_priorities.contains_key(&channel_name) {
            self.channel_priorities
                .insert(channel_name, self.next_priority);
            self.next_priority += 1;
        }

        for record in repodata.into_repo_data_records(channel) {
            let candidates = self
                .records_by_name
                .entry(record.package_record.name.clone())
                .or_default();

            // Duplicates by primary key collapse to the first record seen.
            if candidates
                .iter()
                .any(|existing| same_primary_key(existing, &record))
            {
                continue;
            }
            candidates.push(record);
        }

        let priorities = &self.channel_priorities;
        for candidates in self.records_by_name.values_mut() {
            candidates.sort_by(|a, b| compare_candidates(a, b, priorities));
        }
    }

    /// Loads all known subdirs of a channel from a directory on disk laid
    /// out as `<dir>/<subdir>/repodata.json`, with an optional
    /// `<dir>/<subdir>/patch_instructions.json` next to each. Directory
    /// entries that are not a known platform are skipped.
    pub fn add_channel_dir(
        &mut self,
        channel: &Channel,
        dir: &Path,
    ) -> Result<(), LoadRepoDataError> {
        let mut subdirs = Vec::new();
        let read_dir = fs_err::read_dir(dir).map_err(|source| LoadRepoDataError::Io {
            path: dir.display().to_string(),
            source,
        })?;
        for entry in read_dir.flatten() {
            let name = entry.file_name();
            match Platform::from_str(&name.to_string_lossy()) {
                Ok(platform) => subdirs.push((platform, entry.path())),
                Err(_) => {
                    tracing::debug!(
                        "skipping unknown subdir '{}' in {}",
                        name.to_string_lossy(),
                        dir.display()
                    );
                }
            }
        }

        // Load the subdirs in parallel; insertion into the index stays
        // single threaded to keep it deterministic.
        let mut loaded = subdirs
            .into_par_iter()
            .filter(|(_, path)| path.join("repodata.json").is_file())
            .map(|(platform, path)| {
                let repodata_path = path.join("repodata.json");
                let bytes =
                    fs_err::read(&repodata_path).map_err(|source| LoadRepoDataError::Io {
                        path: repodata_path.display().to_string(),
                        source,
                    })?;
                let repodata = parse_repodata(&bytes, &repodata_path.display().to_string())?;

                let patches_path = path.join("patch_instructions.json");
                let patches = if patches_path.is_file() {
                    let bytes =
                        fs_err::read(&patches_path).map_err(|source| LoadRepoDataError::Io {
                            path: patches_path.display().to_string(),
                            source,
                        })?;
                    Some(serde_json::from_slice(&bytes).map_err(|source| {
                        LoadRepoDataError::Parse {
                            path: patches_path.display().to_string(),
                            source,
                        }
                    })?)
                } else {
                    None
                };

                Ok((platform, repodata, patches))
            })
            .collect::<Result<Vec<(Platform, RepoData, Option<PatchInstructions>)>, LoadRepoDataError>>()?;

        loaded.sort_by_key(|(platform, _, _)| *platform);
        for (_, repodata, patches) in loaded {
            self.add_repo_data(channel, repodata, patches.as_ref());
        }
        Ok(())
    }

    /// Returns the candidate records for the given package name, best
    /// candidates first. An unknown name yields an empty slice.
    pub fn query(&self, name: &PackageName) -> &[RepoDataRecord] {
        self.records_by_name
            .get(name)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Returns an iterator over all records in the index.
    pub fn records(&self) -> impl Iterator<Item = &RepoDataRecord> {
        self.records_by_name.values().flatten()
    }

    /// Returns the number of records in the index.
    pub fn len(&self) -> usize {
        self.records_by_name.values().map(Vec::len).sum()
    }

    /// Returns true if the index holds no records.
    pub fn is_empty(&self) -> bool {
        self.records_by_name.is_empty()
    }
}

fn parse_repodata(bytes: &[u8], path: &str) -> Result<RepoData, LoadRepoDataError> {
    serde_json::from_slice(bytes).map_err(|source| LoadRepoDataError::Parse {
        path: path.to_owned(),
        source,
    })
}

fn same_primary_key(a: &RepoDataRecord, b: &RepoDataRecord) -> bool {
    let (a, b, a_channel, b_channel) = (
        &a.package_record,
        &b.package_record,
        &a.channel,
        &b.channel,
    );
    a_channel == b_channel
        && a.subdir == b.subdir
        && a.name == b.name
        && a.version == b.version
        && a.build == b.build
        && a.build_number == b.build_number
}

/// The candidate order of the index: channel priority first, then version,
/// build number, build string and timestamp, each descending.
fn compare_candidates(
    a: &RepoDataRecord,
    b: &RepoDataRecord,
    priorities: &FxHashMap<String, u32>,
) -> Ordering {
    let a_priority = priorities.get(&a.channel).copied().unwrap_or(u32::MAX);
    let b_priority = priorities.get(&b.channel).copied().unwrap_or(u32::MAX);
    a_priority
        .cmp(&b_priority)
        .then_with(|| b.package_record.version.cmp(&a.package_record.version))
        .then_with(|| {
            b.package_record
                .build_number
                .cmp(&a.package_record.build_number)
        })
        .then_with(|| b.package_record.build.cmp(&a.package_record.build))
        .then_with(|| b.package_record.timestamp.cmp(&a.package_record.timestamp))
        // A final tiebreak on the filename keeps the order total.
        .then_with(|| a.file_name.cmp(&b.file_name))
}
