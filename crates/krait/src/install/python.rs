//! Python version information needed to install `noarch: python` packages.

use std::path::{Path, PathBuf};

use krait_conda_types::{Platform, Version};
use thiserror::Error;

/// An error that can occur when interpreting a python version.
#[derive(Debug, Clone, Error)]
pub enum PythonInfoError {
    /// The version does not carry a major and minor number.
    #[error("invalid python version '{0}'")]
    InvalidVersion(String),
}

/// Information about the python distribution of an environment. Files of
/// `noarch: python` packages are mapped into directories that depend on the
/// python version, so this must be known at link time.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct PythonInfo {
    /// The major version of the python distribution.
    pub major: u64,

    /// The minor version of the python distribution.
    pub minor: u64,

    /// The platform dependent site-packages directory, relative to the
    /// prefix.
    pub site_packages_path: PathBuf,

    /// The platform dependent directory for scripts, relative to the
    /// prefix.
    pub bin_dir: PathBuf,

    /// Path of the python executable, relative to the prefix.
    pub path: PathBuf,

    /// The platform the info applies to.
    pub platform: Platform,
}

impl PythonInfo {
    /// Builds the python info for a given python version and platform.
    pub fn from_version(version: &Version, platform: Platform) -> Result<Self, PythonInfoError> {
        let (major, minor) = version
            .as_major_minor()
            .ok_or_else(|| PythonInfoError::InvalidVersion(version.to_string()))?;

        let (site_packages_path, bin_dir, path) = if platform.is_windows() {
            (
                PathBuf::from("Lib/site-packages"),
                PathBuf::from("Scripts"),
                PathBuf::from("python.exe"),
            )
        } else {
            (
                PathBuf::from(format!("lib/python{major}.{minor}/site-packages")),
                PathBuf::from("bin"),
                PathBuf::from(format!("bin/python{major}.{minor}")),
            )
        };

        Ok(Self {
            major,
            minor,
            site_packages_path,
            bin_dir,
            path,
            platform,
        })
    }

    /// Maps the path of a file inside a `noarch: python` package to its
    /// location in the prefix: `site-packages/…` files move to the platform
    /// specific site-packages directory and `python-scripts/…` files to the
    /// scripts directory. Any other path is left alone.
    pub fn get_python_noarch_target_path(&self, relative_path: &Path) -> PathBuf {
        if let Ok(rest) = relative_path.strip_prefix("site-packages") {
            self.site_packages_path.join(rest)
        } else if let Ok(rest) = relative_path.strip_prefix("python-scripts") {
            self.bin_dir.join(rest)
        } else {
            relative_path.to_path_buf()
        }
    }

    /// Returns true when switching from `other` to `self` requires
    /// relinking noarch python packages: their files live in a directory
    /// that embeds the major/minor version.
    pub fn is_relink_required(&self, other: &Self) -> bool {
        self.site_packages_path != other.site_packages_path
    }
}

#[cfg(test)]
mod test {
    use std::path::{Path, PathBuf};
    use std::str::FromStr;

    use krait_conda_types::{Platform, Version};

    use super::PythonInfo;

    #[test]
    fn unix_paths() {
        let info =
            PythonInfo::from_version(&Version::from_str("3.10.4").unwrap(), Platform::Linux64)
                .unwrap();
        assert_eq!(
            info.site_packages_path,
            PathBuf::from("lib/python3.10/site-packages")
        );
        assert_eq!(
            info.get_python_noarch_target_path(Path::new("site-packages/wheel/__init__.py")),
            PathBuf::from("lib/python3.10/site-packages/wheel/__init__.py")
        );
        assert_eq!(
            info.get_python_noarch_target_path(Path::new("python-scripts/wheel")),
            PathBuf::from("bin/wheel")
        );
        assert_eq!(
            info.get_python_noarch_target_path(Path::new("share/doc/readme")),
            PathBuf::from("share/doc/readme")
        );
    }

    #[test]
    fn windows_paths() {
        let info = PythonInfo::from_version(&Version::from_str("3.11.0").unwrap(), Platform::Win64)
            .unwrap();
        assert_eq!(info.site_packages_path, PathBuf::from("Lib/site-packages"));
        assert_eq!(
            info.get_python_noarch_target_path(Path::new("python-scripts/wheel")),
            PathBuf::from("Scripts/wheel")
        );
    }

    #[test]
    fn relink_on_minor_change() {
        let py310 =
            PythonInfo::from_version(&Version::from_str("3.10.4").unwrap(), Platform::Linux64)
                .unwrap();
        let py311 =
            PythonInfo::from_version(&Version::from_str("3.11.1").unwrap(), Platform::Linux64)
                .unwrap();
        let py310_patch =
            PythonInfo::from_version(&Version::from_str("3.10.9").unwrap(), Platform::Linux64)
                .unwrap();
        assert!(py311.is_relink_required(&py310));
        assert!(!py310_patch.is_relink_required(&py310));
    }

    #[test]
    fn invalid_version() {
        assert!(PythonInfo::from_version(
            &Version::from_str("3").unwrap(),
            Platform::Linux64
        )
        .is_err());
    }
}
