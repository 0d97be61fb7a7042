//! Extracting or streaming a conda package from objects that implement
//! [`std::io::Read`].

use std::ffi::OsStr;
use std::io::Read;
use std::path::Path;

use zip::read::read_zipfile_from_stream;

use super::ExtractError;

/// Returns the `.tar.bz2` stream as a decompressed [`tar::Archive`] which
/// can be used to extract the files or perform introspection.
pub fn stream_tar_bz2(reader: impl Read) -> tar::Archive<impl Read + Sized> {
    tar::Archive::new(bzip2::read::BzDecoder::new(reader))
}

/// Returns a `.tar.zst` stream as a decompressed [`tar::Archive`].
pub(crate) fn stream_tar_zst(
    reader: impl Read,
) -> Result<tar::Archive<impl Read + Sized>, ExtractError> {
    Ok(tar::Archive::new(zstd::stream::read::Decoder::new(reader)?))
}

/// Extracts the contents of a `.tar.bz2` package archive.
pub fn extract_tar_bz2(reader: impl Read, destination: &Path) -> Result<(), ExtractError> {
    std::fs::create_dir_all(destination).map_err(ExtractError::CouldNotCreateDestination)?;
    stream_tar_bz2(reader).unpack(destination)?;
    Ok(())
}

/// Extracts the contents of a `.conda` package archive: both the metadata
/// and the payload tarballs are unpacked into the destination.
pub fn extract_conda(mut reader: impl Read, destination: &Path) -> Result<(), ExtractError> {
    std::fs::create_dir_all(destination).map_err(ExtractError::CouldNotCreateDestination)?;

    // Iterate over the zip entries and unpack every inner tarball.
    while let Some(file) = read_zipfile_from_stream(&mut reader)? {
        if file
            .mangled_name()
            .file_name()
            .map(OsStr::to_string_lossy)
            .is_some_and(|file_name| file_name.ends_with(".tar.zst"))
        {
            stream_tar_zst(file)?.unpack(destination)?;
        }
    }

    Ok(())
}

/// Extracts only the `info-` metadata tarball of a `.conda` package
/// archive. The payload is skipped, which makes this considerably cheaper
/// than a full extraction when only `info/` files are needed.
pub fn extract_conda_info(mut reader: impl Read, destination: &Path) -> Result<(), ExtractError> {
    std::fs::create_dir_all(destination).map_err(ExtractError::CouldNotCreateDestination)?;

    let mut found = false;
    while let Some(file) = read_zipfile_from_stream(&mut reader)? {
        let is_info = file
            .mangled_name()
            .file_name()
            .map(OsStr::to_string_lossy)
            .is_some_and(|file_name| {
                file_name.starts_with("info-") && file_name.ends_with(".tar.zst")
            });
        if is_info {
            stream_tar_zst(file)?.unpack(destination)?;
            found = true;
        }
    }

    if found {
        Ok(())
    } else {
        Err(ExtractError::MissingComponent("info-*.tar.zst"))
    }
}
