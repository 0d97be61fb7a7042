//! The legacy `info/has_prefix` file: placeholder data for packages that
//! predate `paths.json`.

use std::path::{Path, PathBuf};

use super::paths_json::FileMode;
use super::{PackageFile, DEFAULT_PLACEHOLDER};

/// A single line of the `has_prefix` file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HasPrefixEntry {
    /// The placeholder embedded in the file.
    pub prefix: String,

    /// Whether the file is text or binary.
    pub file_mode: FileMode,

    /// The path of the file relative to the package root.
    pub relative_path: PathBuf,
}

/// Representation of the `info/has_prefix` file in older package archives.
///
/// Every line is either just a path (the default placeholder in text mode is
/// implied) or a `<prefix> <mode> <path>` triple where each field may be
/// quoted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HasPrefix {
    /// The files that contain a placeholder.
    pub files: Vec<HasPrefixEntry>,
}

impl PackageFile for HasPrefix {
    fn package_path() -> &'static Path {
        Path::new("info/has_prefix")
    }

    fn from_str(str: &str) -> Result<Self, std::io::Error> {
        let mut files = Vec::new();
        for line in str.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            files.push(parse_entry(line).ok_or_else(|| {
                std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    format!("malformed has_prefix line: '{line}'"),
                )
            })?);
        }
        Ok(Self { files })
    }
}

/// Parses one `has_prefix` line.
fn parse_entry(line: &str) -> Option<HasPrefixEntry> {
    let mut fields = Vec::new();
    let mut rest = line;
    while !rest.is_empty() {
        rest = rest.trim_start();
        if rest.is_empty() {
            break;
        }
        let (field, remaining) = match rest.strip_prefix('"') {
            Some(quoted) => {
                let end = quoted.find('"')?;
                (&quoted[..end], &quoted[end + 1..])
            }
            None => match rest.find(char::is_whitespace) {
                Some(end) => (&rest[..end], &rest[end..]),
                None => (rest, ""),
            },
        };
        fields.push(field);
        rest = remaining;
    }

    match fields.as_slice() {
        // Only a path: default placeholder, text mode.
        [path] => Some(HasPrefixEntry {
            prefix: DEFAULT_PLACEHOLDER.to_owned(),
            file_mode: FileMode::Text,
            relative_path: PathBuf::from(path),
        }),
        [prefix, mode, path] => {
            let file_mode = match *mode {
                "text" => FileMode::Text,
                "binary" => FileMode::Binary,
                _ => return None,
            };
            Some(HasPrefixEntry {
                prefix: (*prefix).to_owned(),
                file_mode,
                relative_path: PathBuf::from(path),
            })
        }
        _ => None,
    }
}
