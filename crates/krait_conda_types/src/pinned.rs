//! The `conda-meta/pinned` file: user pins that the solver treats as hard
//! constraints.

use std::path::{Path, PathBuf};

use crate::{HistoryError, MatchSpec};

/// The pinned specs of a prefix, stored one [`MatchSpec`] per line in
/// `conda-meta/pinned`. Lines starting with `#` are comments.
#[derive(Debug, Clone, Default)]
pub struct PinnedSpecs {
    /// The pinned specs in file order.
    pub specs: Vec<MatchSpec>,
}

impl PinnedSpecs {
    /// Returns the path of the pinned file for a prefix.
    pub fn path(prefix: &Path) -> PathBuf {
        prefix.join("conda-meta").join("pinned")
    }

    /// Reads the pinned specs of a prefix. A missing file yields an empty
    /// set of pins.
    pub fn from_prefix(prefix: &Path) -> Result<Self, HistoryError> {
        let path = Self::path(prefix);
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = fs_err::read_to_string(&path)?;
        Self::from_str(&contents)
    }

    /// Parses pinned specs from the contents of a pinned file.
    pub fn from_str(contents: &str) -> Result<Self, HistoryError> {
        let mut specs = Vec::new();
        for line in contents.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            specs.push(MatchSpec::from_str(line)?);
        }
        Ok(Self { specs })
    }

    /// Writes the pinned specs to the pinned file of a prefix.
    pub fn write_to_prefix(&self, prefix: &Path) -> Result<(), HistoryError> {
        let path = Self::path(prefix);
        if let Some(parent) = path.parent() {
            fs_err::create_dir_all(parent)?;
        }
        let contents = self
            .specs
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("\n");
        fs_err::write(&path, format!("{contents}\n"))?;
        Ok(())
    }
}
