//! Representations of the metadata files found inside a package archive's
//! `info/` directory.

mod archive;
mod has_prefix;
mod index_json;
mod link_json;
mod paths_json;

use std::path::Path;

pub use archive::{ArchiveIdentifier, ArchiveType};
pub use has_prefix::{HasPrefix, HasPrefixEntry};
pub use index_json::IndexJson;
pub use link_json::{EntryPoint, LinkJson, NoArchLinks, ParseEntryPointError, PythonEntryPoints};
pub use paths_json::{FileMode, Files, PathType, PathsEntry, PathsJson};

/// The conventional placeholder embedded in text files of packages built
/// without an explicit one.
pub const DEFAULT_PLACEHOLDER: &str = "/opt/anaconda1anaconda2anaconda3";

/// A trait for metadata files that live at a well-known path inside a
/// package archive.
pub trait PackageFile: Sized {
    /// The path of the file relative to the root of the archive.
    fn package_path() -> &'static Path;

    /// Parses the object from a string.
    fn from_str(str: &str) -> Result<Self, std::io::Error>;

    /// Parses the object from a reader.
    fn from_reader(mut reader: impl std::io::Read) -> Result<Self, std::io::Error> {
        let mut str = String::new();
        reader.read_to_string(&mut str)?;
        Self::from_str(&str)
    }

    /// Parses the object from a file.
    fn from_path(path: &Path) -> Result<Self, std::io::Error> {
        Self::from_reader(fs_err::File::open(path)?)
    }

    /// Reads the file from an extracted package directory.
    fn from_package_directory(path: &Path) -> Result<Self, std::io::Error> {
        Self::from_path(&path.join(Self::package_path()))
    }
}
