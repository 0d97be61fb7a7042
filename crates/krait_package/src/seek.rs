//! Reading package metadata without extracting the payload.

use std::io::{Read, Seek};
use std::path::Path;

use krait_conda_types::package::{IndexJson, PackageFile};

use super::ExtractError;

/// Reads the `info/index.json` of a `.conda` archive without touching the
/// payload tarball.
pub fn read_package_index(reader: impl Read + Seek) -> Result<IndexJson, ExtractError> {
    let mut archive = zip::ZipArchive::new(reader)?;

    // Locate the metadata member.
    let info_name = archive
        .file_names()
        .find(|name| {
            let file_name = name.rsplit('/').next().unwrap_or(name);
            file_name.starts_with("info-") && file_name.ends_with(".tar.zst")
        })
        .map(ToOwned::to_owned)
        .ok_or(ExtractError::MissingComponent("info-*.tar.zst"))?;

    let info = archive.by_name(&info_name)?;
    let mut tar = crate::read::stream_tar_zst(info)?;
    for entry in tar.entries()? {
        let mut entry = entry?;
        if entry.path()?.as_ref() == IndexJson::package_path() {
            let mut contents = String::new();
            entry.read_to_string(&mut contents)?;
            return Ok(IndexJson::from_str(&contents)?);
        }
    }

    Err(ExtractError::MissingComponent("info/index.json"))
}

/// Reads the `info/index.json` of a `.conda` archive on disk.
pub fn read_package_index_from_path(path: &Path) -> Result<IndexJson, ExtractError> {
    read_package_index(fs_err::File::open(path)?)
}
