//! Linking a single file from an extracted package into a prefix,
//! rewriting embedded prefix placeholders on the way.

use std::borrow::Cow;
use std::io::{Read, Seek, Write};
use std::path::{Path, PathBuf};

use krait_conda_types::package::{FileMode, PathsEntry as PackagePathsEntry};
use krait_conda_types::{LinkType, PathType, PathsEntry, Platform};
use krait_digest::{HashingWriter, Sha256};
use memmap2::Mmap;

use super::python::PythonInfo;

/// Errors that can occur when linking a single file.
#[derive(Debug, thiserror::Error)]
pub enum LinkFileError {
    /// An IO error occurred.
    #[error(transparent)]
    IoError(#[from] std::io::Error),

    /// The replacement prefix is longer than the placeholder of a binary
    /// file; rewriting it would shift offsets and corrupt the binary.
    #[error(
        "the target prefix ({prefix_len} bytes) is longer than the binary placeholder \
         ({placeholder_len} bytes)"
    )]
    PrefixTooLong {
        /// The length of the placeholder in bytes.
        placeholder_len: usize,
        /// The length of the replacement prefix in bytes.
        prefix_len: usize,
    },

    /// A `noarch: python` file was linked without python information.
    #[error("cannot install noarch python files because no python version is available")]
    MissingPythonInfo,
}

/// The successful result of linking one file.
pub struct LinkedFile {
    /// The path of the file relative to the prefix. Differs from the path
    /// inside the package for noarch python files.
    pub relative_path: PathBuf,

    /// The SHA256 hash of the file as it exists in the prefix.
    pub sha256_in_prefix: krait_digest::Sha256Hash,

    /// The size of the linked file in bytes.
    pub file_size: u64,

    /// How the file was placed into the prefix.
    pub link_type: LinkType,
}

/// Links one file described by a `paths.json` entry from `package_dir` into
/// `target_dir`. Files with a placeholder are rewritten, everything else is
/// hard linked, symlinked or copied through the cache's link rule.
#[allow(clippy::too_many_arguments)]
pub fn link_file(
    entry: &PackagePathsEntry,
    package_dir: &Path,
    target_dir: &Path,
    target_prefix: &str,
    is_noarch_python: bool,
    python_info: Option<&PythonInfo>,
    allow_symlinks: bool,
    allow_hard_links: bool,
    platform: Platform,
) -> Result<LinkedFile, LinkFileError> {
    let source_path = package_dir.join(&entry.relative_path);

    let relative_path = if is_noarch_python {
        python_info
            .ok_or(LinkFileError::MissingPythonInfo)?
            .get_python_noarch_target_path(&entry.relative_path)
    } else {
        entry.relative_path.clone()
    };
    let destination_path = target_dir.join(&relative_path);

    if let Some(parent) = destination_path.parent() {
        fs_err::create_dir_all(parent)?;
    }

    if let Some(placeholder) = entry.prefix_placeholder.as_deref() {
        // Backslashes in the replacement confuse string escaping inside the
        // rewritten files; forward slashes work fine on windows.
        let target_prefix = if platform.is_windows() {
            Cow::Owned(target_prefix.replace('\\', "/"))
        } else {
            Cow::Borrowed(target_prefix)
        };
        let file_mode = entry.file_mode.unwrap_or(FileMode::Text);

        let source = map_or_read_source_file(&source_path)?;
        let destination = fs_err::File::create(&destination_path)?;
        let mut writer = HashingWriter::<_, Sha256>::new(destination);

        match file_mode {
            FileMode::Text => copy_and_replace_textual_placeholder(
                source.as_ref(),
                &mut writer,
                placeholder,
                &target_prefix,
            )?,
            FileMode::Binary => copy_and_replace_cstring_placeholder(
                source.as_ref(),
                &mut writer,
                placeholder,
                &target_prefix,
            )?,
        }

        let (mut file, sha256_in_prefix) = writer.finalize();
        let file_size = file.stream_position()?;
        drop(file);

        // The rewritten copy keeps the permissions of the shipped file.
        let metadata = fs_err::symlink_metadata(&source_path)?;
        fs_err::set_permissions(&destination_path, metadata.permissions())?;

        return Ok(LinkedFile {
            relative_path,
            sha256_in_prefix,
            file_size,
            link_type: LinkType::Copy,
        });
    }

    let outcome = krait_cache::link_file(
        &source_path,
        &destination_path,
        allow_symlinks && !entry.no_link,
        allow_hard_links && !entry.no_link,
    )?;

    // Reuse the recorded hash and size when the package provides them; a
    // plain link does not alter the content.
    let sha256_in_prefix = match entry.sha256 {
        Some(sha256) => sha256,
        None => krait_digest::compute_file_digest::<Sha256>(&destination_path)?,
    };
    let file_size = match entry.size_in_bytes {
        Some(size) => size,
        None => fs_err::symlink_metadata(&destination_path)?.len(),
    };

    Ok(LinkedFile {
        relative_path,
        sha256_in_prefix,
        file_size,
        link_type: outcome.link_type,
    })
}

/// Builds the prefix record paths entry for a linked file.
pub fn paths_entry_for(entry: &PackagePathsEntry, linked: &LinkedFile) -> PathsEntry {
    PathsEntry {
        relative_path: linked.relative_path.clone(),
        path_type: match linked.link_type {
            LinkType::HardLink => PathType::HardLink,
            LinkType::SoftLink => PathType::SoftLink,
            LinkType::Copy | LinkType::Directory => match entry.path_type {
                krait_conda_types::package::PathType::Directory => PathType::Directory,
                _ => PathType::HardLink,
            },
        },
        no_link: entry.no_link,
        sha256: entry.sha256,
        sha256_in_prefix: Some(linked.sha256_in_prefix),
        size_in_bytes: Some(linked.file_size),
        file_mode: entry
            .prefix_placeholder
            .as_ref()
            .map(|_| entry.file_mode.unwrap_or(FileMode::Text)),
        prefix_placeholder: entry.prefix_placeholder.clone(),
    }
}

/// Either a memory mapped file or its contents read to memory. Mapping is
/// preferred; some filesystems refuse it, in which case the content is read
/// instead.
enum MmapOrBytes {
    Mmap(Mmap),
    Bytes(Vec<u8>),
}

impl AsRef<[u8]> for MmapOrBytes {
    fn as_ref(&self) -> &[u8] {
        match self {
            MmapOrBytes::Mmap(mmap) => mmap.as_ref(),
            MmapOrBytes::Bytes(bytes) => bytes.as_slice(),
        }
    }
}

fn map_or_read_source_file(source_path: &Path) -> Result<MmapOrBytes, LinkFileError> {
    let mut file = fs_err::File::open(source_path)?;
    match unsafe { Mmap::map(file.file()) } {
        Ok(mmap) => Ok(MmapOrBytes::Mmap(mmap)),
        Err(err) => {
            tracing::warn!(
                "failed to memory map {}: {err}; reading the file instead",
                source_path.display()
            );
            let mut bytes = Vec::new();
            file.read_to_end(&mut bytes)?;
            Ok(MmapOrBytes::Bytes(bytes))
        }
    }
}

/// Copies `source_bytes` to `destination`, replacing every occurrence of
/// the placeholder with the target prefix as a plain substring. Text files
/// may grow or shrink.
pub fn copy_and_replace_textual_placeholder(
    mut source_bytes: &[u8],
    mut destination: impl Write,
    placeholder: &str,
    target_prefix: &str,
) -> Result<(), std::io::Error> {
    let old_prefix = placeholder.as_bytes();
    let new_prefix = target_prefix.as_bytes();

    loop {
        match memchr::memmem::find(source_bytes, old_prefix) {
            Some(index) => {
                destination.write_all(&source_bytes[..index])?;
                destination.write_all(new_prefix)?;
                source_bytes = &source_bytes[index + old_prefix.len()..];
            }
            None => {
                destination.write_all(source_bytes)?;
                return Ok(());
            }
        }
    }
}

/// Copies `source_bytes` to `destination`, replacing the placeholder inside
/// null-terminated C strings. The byte span up to the terminating null is
/// rewritten and padded with nulls so every offset in the file is
/// preserved. A replacement longer than the placeholder fails with
/// [`LinkFileError::PrefixTooLong`]; truncating would corrupt the string.
pub fn copy_and_replace_cstring_placeholder(
    mut source_bytes: &[u8],
    mut destination: impl Write,
    placeholder: &str,
    target_prefix: &str,
) -> Result<(), LinkFileError> {
    let old_prefix = placeholder.as_bytes();
    let new_prefix = target_prefix.as_bytes();

    if new_prefix.len() > old_prefix.len() {
        return Err(LinkFileError::PrefixTooLong {
            placeholder_len: old_prefix.len(),
            prefix_len: new_prefix.len(),
        });
    }

    let padding = vec![b'\0'; old_prefix.len() - new_prefix.len()];

    loop {
        match memchr::memmem::find(source_bytes, old_prefix) {
            Some(index) => {
                // The end of the C string: the first null after the
                // placeholder, or the end of the data.
                let end = index
                    + old_prefix.len()
                    + memchr::memchr(b'\0', &source_bytes[index + old_prefix.len()..])
                        .unwrap_or(source_bytes.len() - index - old_prefix.len());
                let suffix = &source_bytes[index + old_prefix.len()..end];

                destination.write_all(&source_bytes[..index])?;
                destination.write_all(new_prefix)?;
                destination.write_all(suffix)?;
                destination.write_all(&padding)?;

                source_bytes = &source_bytes[end..];
            }
            None => {
                destination.write_all(source_bytes)?;
                return Ok(());
            }
        }
    }
}

#[cfg(test)]
mod test {
    use std::io::Cursor;

    use rstest::rstest;

    use super::{
        copy_and_replace_cstring_placeholder, copy_and_replace_textual_placeholder, LinkFileError,
    };

    #[rstest]
    #[case(
        "echo /opt/anaconda1anaconda2anaconda3/bin",
        "/opt/anaconda1anaconda2anaconda3",
        "/home/u/env",
        "echo /home/u/env/bin"
    )]
    #[case("no placeholder here", "/opt/placeholder", "/prefix", "no placeholder here")]
    #[case(
        "/opt/p/one and /opt/p/two",
        "/opt/p",
        "/env",
        "/env/one and /env/two"
    )]
    fn textual_replacement(
        #[case] input: &str,
        #[case] placeholder: &str,
        #[case] target_prefix: &str,
        #[case] expected: &str,
    ) {
        let mut output = Cursor::new(Vec::new());
        copy_and_replace_textual_placeholder(
            input.as_bytes(),
            &mut output,
            placeholder,
            target_prefix,
        )
        .unwrap();
        assert_eq!(String::from_utf8(output.into_inner()).unwrap(), expected);
    }

    #[test]
    fn binary_replacement_preserves_offsets() {
        // A C string at an offset surrounded by other data.
        let mut input = Vec::new();
        input.extend_from_slice(&[0xAA; 16]);
        input.extend_from_slice(b"/opt/anaconda1anaconda2anaconda3/lib\0");
        input.extend_from_slice(&[0xBB; 16]);

        let mut output = Cursor::new(Vec::new());
        copy_and_replace_cstring_placeholder(
            &input,
            &mut output,
            "/opt/anaconda1anaconda2anaconda3",
            "/p",
        )
        .unwrap();
        let output = output.into_inner();

        assert_eq!(output.len(), input.len(), "offsets must be preserved");
        assert_eq!(&output[..16], &[0xAA; 16]);
        assert!(output[16..].starts_with(b"/p/lib\0"));
        // Null padding up to the original string length.
        let original_len = b"/opt/anaconda1anaconda2anaconda3/lib\0".len();
        assert!(output[16..16 + original_len]
            .iter()
            .skip(b"/p/lib".len())
            .all(|&b| b == 0));
        assert_eq!(&output[16 + original_len..], &[0xBB; 16]);
    }

    #[test]
    fn binary_replacement_rejects_longer_prefix() {
        let input = b"/short\0";
        let mut output = Cursor::new(Vec::new());
        let result = copy_and_replace_cstring_placeholder(
            input,
            &mut output,
            "/short",
            "/a-much-longer-target-prefix",
        );
        assert!(matches!(result, Err(LinkFileError::PrefixTooLong { .. })));
    }

    #[test]
    fn binary_replacement_multiple_strings() {
        let input = b"/p/lib\0xxxx/p/share\0";
        let mut output = Cursor::new(Vec::new());
        copy_and_replace_cstring_placeholder(input, &mut output, "/p", "/q").unwrap();
        assert_eq!(output.into_inner(), b"/q/lib\0xxxx/q/share\0");
    }
}
