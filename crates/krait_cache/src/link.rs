//! Materialising a single cached file into a prefix.

use std::io::ErrorKind;
use std::path::Path;

use krait_conda_types::LinkType;

/// The result of linking one file out of the cache.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct LinkOutcome {
    /// How the file ended up in the destination.
    pub link_type: LinkType,
}

/// Places `source` (a file inside an extracted cache directory) at
/// `destination`, choosing the cheapest link type that is available:
///
/// * a hard link when allowed (same filesystem required; failure falls
///   through to a copy),
/// * a symlink when the source itself is a symlink and symlinks are
///   allowed,
/// * a full copy otherwise.
///
/// An existing file at the destination is replaced.
pub fn link_file(
    source: &Path,
    destination: &Path,
    allow_symlinks: bool,
    allow_hard_links: bool,
) -> std::io::Result<LinkOutcome> {
    let metadata = fs_err::symlink_metadata(source)?;

    if metadata.is_symlink() {
        if allow_symlinks {
            let target = fs_err::read_link(source)?;
            remove_existing(destination)?;
            match symlink(&target, destination) {
                Ok(()) => {
                    return Ok(LinkOutcome {
                        link_type: LinkType::SoftLink,
                    })
                }
                Err(e) => {
                    tracing::debug!(
                        "symlinking {} failed ({e}), falling back to copy",
                        destination.display()
                    );
                }
            }
        }
        // Copy the symlink target contents.
        fs_err::copy(source, destination)?;
        return Ok(LinkOutcome {
            link_type: LinkType::Copy,
        });
    }

    if allow_hard_links {
        loop {
            match fs_err::hard_link(source, destination) {
                Ok(()) => {
                    return Ok(LinkOutcome {
                        link_type: LinkType::HardLink,
                    })
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    fs_err::remove_file(destination)?;
                }
                Err(_) => {
                    // Cross-device links and odd filesystems end up here; a
                    // copy always works.
                    break;
                }
            }
        }
    }

    remove_existing(destination)?;
    fs_err::copy(source, destination)?;
    Ok(LinkOutcome {
        link_type: LinkType::Copy,
    })
}

fn remove_existing(path: &Path) -> std::io::Result<()> {
    match fs_err::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

fn symlink(target: &Path, destination: &Path) -> std::io::Result<()> {
    #[cfg(unix)]
    return std::os::unix::fs::symlink(target, destination);
    #[cfg(windows)]
    return std::os::windows::fs::symlink_file(target, destination);
}
