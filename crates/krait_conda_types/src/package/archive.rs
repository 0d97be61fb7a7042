//! Identifying package archives by their filename.

use std::fmt::{Display, Formatter};

/// The two package archive formats conda recognises.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum ArchiveType {
    /// A bzip2 compressed tarball (the legacy format).
    TarBz2,

    /// A zip archive containing two zstd compressed tarballs, one for the
    /// metadata and one for the payload.
    Conda,
}

impl ArchiveType {
    /// Tries to determine the type of a conda archive from its filename.
    pub fn try_from(path: impl AsRef<str>) -> Option<ArchiveType> {
        Self::split_str(path.as_ref()).map(|(_, t)| t)
    }

    /// Returns the file name without the archive extension, together with
    /// the archive type. Returns `None` if the file name has neither
    /// extension.
    pub fn split_str(path: &str) -> Option<(&str, ArchiveType)> {
        if let Some(path) = path.strip_suffix(".conda") {
            Some((path, ArchiveType::Conda))
        } else {
            path.strip_suffix(".tar.bz2")
                .map(|path| (path, ArchiveType::TarBz2))
        }
    }

    /// Returns the file extension of this archive type, including the dot.
    pub fn extension(self) -> &'static str {
        match self {
            ArchiveType::TarBz2 => ".tar.bz2",
            ArchiveType::Conda => ".conda",
        }
    }
}

/// The identifier of a package archive: the `name-version-build` triple that
/// makes up its file name.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct ArchiveIdentifier {
    /// The name of the package.
    pub name: String,

    /// The version of the package.
    pub version: String,

    /// The build string of the package.
    pub build_string: String,
}

impl ArchiveIdentifier {
    /// Tries to parse an archive identifier from a filename, with or without
    /// an archive extension.
    pub fn try_from_filename(filename: &str) -> Option<Self> {
        let stem = match ArchiveType::split_str(filename) {
            Some((stem, _)) => stem,
            None => filename,
        };

        // The build string is the part after the last dash, the version the
        // part after the second to last dash.
        let (rest, build_string) = stem.rsplit_once('-')?;
        let (name, version) = rest.rsplit_once('-')?;
        if name.is_empty() || version.is_empty() || build_string.is_empty() {
            return None;
        }

        Some(Self {
            name: name.to_owned(),
            version: version.to_owned(),
            build_string: build_string.to_owned(),
        })
    }
}

impl Display for ArchiveIdentifier {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}-{}", self.name, self.version, self.build_string)
    }
}
