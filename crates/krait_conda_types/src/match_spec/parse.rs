//! Parsing of [`MatchSpec`]s from strings.

use std::str::FromStr;

use krait_digest::parse_digest_from_hex;
use thiserror::Error;
use url::Url;

use super::matcher::{StringMatcher, StringMatcherParseError};
use super::MatchSpec;
use crate::{
    BuildNumberSpec, PackageName, ParseBuildNumberSpecError, ParsePackageNameError,
    ParseVersionSpecError, Platform, VersionSpec,
};

/// An error that can occur when parsing a [`MatchSpec`].
#[allow(missing_docs)]
#[derive(Debug, Clone, Eq, PartialEq, Error)]
pub enum ParseMatchSpecError {
    #[error("the match spec is empty")]
    Empty,

    #[error("invalid package name: {0}")]
    InvalidPackageName(#[from] ParsePackageNameError),

    #[error("invalid version spec: {0}")]
    InvalidVersionSpec(#[from] ParseVersionSpecError),

    #[error("invalid build matcher: {0}")]
    InvalidBuildMatcher(#[from] StringMatcherParseError),

    #[error("invalid build number spec: {0}")]
    InvalidBuildNumberSpec(#[from] ParseBuildNumberSpecError),

    #[error("unclosed bracket section in '{0}'")]
    UnclosedBracket(String),

    #[error("missing '=' in bracket option '{0}'")]
    MissingBracketValue(String),

    #[error("unknown bracket key '{0}'")]
    UnknownBracketKey(String),

    #[error("invalid {kind} digest '{digest}'")]
    InvalidDigest {
        kind: &'static str,
        digest: String,
    },

    #[error("invalid url '{0}'")]
    InvalidUrl(String),

    #[error("multiple bracket sections are not allowed in '{0}'")]
    MultipleBrackets(String),
}

impl MatchSpec {
    /// Parses a [`MatchSpec`] from a string.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(input: &str) -> Result<MatchSpec, ParseMatchSpecError> {
        let mut spec = MatchSpec::default();

        // Strip off comments.
        let input = match input.split_once('#') {
            Some((spec_str, _comment)) => spec_str,
            None => input,
        };
        let input = input.trim();
        if input.is_empty() {
            return Err(ParseMatchSpecError::Empty);
        }

        // Strip off the bracket section before anything else.
        let (input, brackets) = strip_brackets(input)?;
        let input = input.trim();

        // Split off the channel and optional subdir.
        let input = match input.split_once("::") {
            Some((channel_str, rest)) => {
                let channel_str = channel_str.trim();
                match channel_str.split_once('/') {
                    Some((channel, subdir)) if Platform::from_str(subdir).is_ok() => {
                        spec.channel = Some(channel.to_owned());
                        spec.subdir = Some(subdir.to_owned());
                    }
                    _ => {
                        if !channel_str.is_empty() {
                            spec.channel = Some(channel_str.to_owned());
                        }
                    }
                }
                rest.trim()
            }
            None => input,
        };

        // The name runs up to the first operator character or whitespace.
        let name_end = input
            .find(|c: char| c.is_whitespace() || "=<>!~".contains(c))
            .unwrap_or(input.len());
        let (name_str, version_build_str) = input.split_at(name_end);
        let name_str = name_str.trim();
        if name_str.is_empty() && brackets.is_empty() {
            return Err(ParseMatchSpecError::Empty);
        }
        if !name_str.is_empty() && name_str != "*" {
            spec.name = Some(PackageName::try_from(name_str)?);
        }

        // Whatever is left is the version and optionally the build.
        let version_build_str = version_build_str.trim();
        if !version_build_str.is_empty() {
            let (version_str, build_str) = split_version_and_build(version_build_str);
            spec.version = Some(VersionSpec::from_str(&version_str)?);
            if let Some(build_str) = build_str {
                spec.build = Some(StringMatcher::from_str(&build_str)?);
            }
        }

        // Bracket options override anything given outside the brackets.
        for (key, value) in brackets {
            spec.apply_bracket_option(&key, &value)?;
        }

        Ok(spec)
    }

    fn apply_bracket_option(&mut self, key: &str, value: &str) -> Result<(), ParseMatchSpecError> {
        match key {
            "name" => self.name = Some(PackageName::try_from(value)?),
            "version" => self.version = Some(VersionSpec::from_str(value)?),
            "build" => self.build = Some(StringMatcher::from_str(value)?),
            "build_number" => self.build_number = Some(BuildNumberSpec::from_str(value)?),
            "channel" => self.channel = Some(value.to_owned()),
            "subdir" => self.subdir = Some(value.to_owned()),
            "fn" => self.file_name = Some(value.to_owned()),
            "md5" => {
                self.md5 = Some(parse_digest_from_hex::<krait_digest::Md5>(value).ok_or(
                    ParseMatchSpecError::InvalidDigest {
                        kind: "md5",
                        digest: value.to_owned(),
                    },
                )?);
            }
            "sha256" => {
                self.sha256 = Some(parse_digest_from_hex::<krait_digest::Sha256>(value).ok_or(
                    ParseMatchSpecError::InvalidDigest {
                        kind: "sha256",
                        digest: value.to_owned(),
                    },
                )?);
            }
            "license" => self.license = Some(value.to_owned()),
            "features" => self.features = Some(value.to_owned()),
            "track_features" => {
                self.track_features = Some(
                    value
                        .split([' ', ','])
                        .filter(|s| !s.is_empty())
                        .map(ToOwned::to_owned)
                        .collect(),
                );
            }
            "url" => {
                self.url = Some(
                    Url::parse(value)
                        .map_err(|_| ParseMatchSpecError::InvalidUrl(value.to_owned()))?,
                );
            }
            key => return Err(ParseMatchSpecError::UnknownBracketKey(key.to_owned())),
        }
        Ok(())
    }
}

impl FromStr for MatchSpec {
    type Err = ParseMatchSpecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MatchSpec::from_str(s)
    }
}

/// Strips the trailing bracket section from the input and parses it into
/// key/value pairs. Values may be wrapped in single or double quotes.
fn strip_brackets(input: &str) -> Result<(&str, Vec<(String, String)>), ParseMatchSpecError> {
    let Some(stripped) = input.strip_suffix(']') else {
        if input.contains('[') {
            return Err(ParseMatchSpecError::UnclosedBracket(input.to_owned()));
        }
        return Ok((input, Vec::new()));
    };

    let Some(open) = stripped.rfind('[') else {
        return Err(ParseMatchSpecError::UnclosedBracket(input.to_owned()));
    };
    let (before, bracket_str) = stripped.split_at(open);
    let bracket_str = &bracket_str[1..];
    if before.contains('[') {
        return Err(ParseMatchSpecError::MultipleBrackets(input.to_owned()));
    }

    let mut options = Vec::new();
    for part in split_bracket_entries(bracket_str) {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        let (key, value) = part
            .split_once('=')
            .ok_or_else(|| ParseMatchSpecError::MissingBracketValue(part.to_owned()))?;
        let value = value.trim();
        let value = value
            .strip_prefix('"')
            .and_then(|v| v.strip_suffix('"'))
            .or_else(|| value.strip_prefix('\'').and_then(|v| v.strip_suffix('\'')))
            .unwrap_or(value);
        options.push((key.trim().to_owned(), value.to_owned()));
    }
    Ok((before, options))
}

/// Splits a bracket body on commas, respecting quotes.
fn split_bracket_entries(input: &str) -> Vec<&str> {
    let mut entries = Vec::new();
    let mut start = 0;
    let mut quote: Option<char> = None;
    for (idx, c) in input.char_indices() {
        match (c, quote) {
            ('"' | '\'', None) => quote = Some(c),
            (c, Some(q)) if c == q => quote = None,
            (',', None) => {
                entries.push(&input[start..idx]);
                start = idx + 1;
            }
            _ => {}
        }
    }
    entries.push(&input[start..]);
    entries
}

/// Splits a `version build` string into its two parts.
///
/// The version and build are separated by the last whitespace, but only when
/// the part after the whitespace looks like a build matcher (a version spec
/// can itself contain spaces after commas, e.g. `>=1.8, <2`).
fn split_version_and_build(input: &str) -> (String, Option<String>) {
    // `=1.0=py37_0` style: a single `=` introducing both version and build.
    if let Some(stripped) = input.strip_prefix('=') {
        if !stripped.starts_with('=') {
            if let Some((version, build)) = stripped.split_once('=') {
                if !version.is_empty() && !build.is_empty() && !build.contains('=') {
                    return (format!("={version}"), Some(build.to_owned()));
                }
            }
        }
    }

    if let Some((version_str, build_str)) = input.rsplit_once(char::is_whitespace) {
        let build_str = build_str.trim();
        let is_build = !build_str.is_empty()
            && !build_str
                .contains(|c: char| "=<>!~,|".contains(c));
        // `1.0.* py37_0`, but not the continuation of `>=1.8, <2`.
        if is_build && !version_str.trim_end().ends_with([',', '|']) {
            return (
                version_str.split_whitespace().collect::<String>(),
                Some(build_str.to_owned()),
            );
        }
    }

    (input.split_whitespace().collect::<String>(), None)
}

#[cfg(test)]
mod test {
    use std::str::FromStr;

    use assert_matches::assert_matches;

    use super::{split_version_and_build, ParseMatchSpecError};
    use crate::{MatchSpec, VersionSpec};

    #[test]
    fn test_split_version_and_build() {
        assert_eq!(
            split_version_and_build("1.0.* py27_0"),
            ("1.0.*".to_owned(), Some("py27_0".to_owned()))
        );
        assert_eq!(
            split_version_and_build(">=1.8, <2"),
            (">=1.8,<2".to_owned(), None)
        );
        assert_eq!(
            split_version_and_build("=1.0=py37_0"),
            ("=1.0".to_owned(), Some("py37_0".to_owned()))
        );
        assert_eq!(
            split_version_and_build(">=1.0"),
            (">=1.0".to_owned(), None)
        );
    }

    #[test]
    fn test_simple() {
        let spec = MatchSpec::from_str("foo 1.0.* py27_0").unwrap();
        assert_eq!(spec.name.as_ref().unwrap().as_normalized(), "foo");
        assert_eq!(
            spec.version,
            Some(VersionSpec::from_str("1.0.*").unwrap())
        );
        assert_eq!(spec.build.as_ref().unwrap().to_string(), "py27_0");
    }

    #[test]
    fn test_equals_chain() {
        let spec = MatchSpec::from_str("foo=1.0=py37_0").unwrap();
        assert_eq!(spec.name.as_ref().unwrap().as_normalized(), "foo");
        assert_eq!(spec.version, Some(VersionSpec::from_str("=1.0").unwrap()));
        assert_eq!(spec.build.as_ref().unwrap().to_string(), "py37_0");
    }

    #[test]
    fn test_channel_and_subdir() {
        let spec = MatchSpec::from_str("conda-forge::foo >=1.0").unwrap();
        assert_eq!(spec.channel.as_deref(), Some("conda-forge"));
        assert_eq!(spec.subdir, None);

        let spec = MatchSpec::from_str("conda-forge/linux-64::foo >=1.0").unwrap();
        assert_eq!(spec.channel.as_deref(), Some("conda-forge"));
        assert_eq!(spec.subdir.as_deref(), Some("linux-64"));

        let spec = MatchSpec::from_str(r#"conda-forge::foo >=1.0[subdir="linux-64"]"#).unwrap();
        assert_eq!(spec.subdir.as_deref(), Some("linux-64"));
    }

    #[test]
    fn test_brackets_override() {
        let spec = MatchSpec::from_str(r#"foo >=1.0[version="2.0.*", build=py39*]"#).unwrap();
        assert_eq!(spec.version, Some(VersionSpec::from_str("2.0.*").unwrap()));
        assert_eq!(spec.build.as_ref().unwrap().to_string(), "py39*");
    }

    #[test]
    fn test_hashes() {
        let spec = MatchSpec::from_str(
            "mamba[version==1.0, sha256=aaac4bc9c6916ecc0e33137431645b029ade22190c7144eead61446dcbcc6f97, md5=dede6252c964db3f3e41c7d30d07f6bf]",
        )
        .unwrap();
        assert!(spec.sha256.is_some());
        assert!(spec.md5.is_some());

        assert_matches!(
            MatchSpec::from_str("mamba[md5=invalid]").unwrap_err(),
            ParseMatchSpecError::InvalidDigest { kind: "md5", .. }
        );
    }

    #[test]
    fn test_nameless_exact_hash() {
        let spec = MatchSpec::from_str(
            "*[sha256=01ba4719c80b6fe911b091a7c05124b64eeece964e09c058ef8f9805daca546b]",
        )
        .unwrap();
        assert_eq!(spec.name, None);
        assert!(spec.sha256.is_some());
    }

    #[test]
    fn test_errors() {
        assert_matches!(
            MatchSpec::from_str("").unwrap_err(),
            ParseMatchSpecError::Empty
        );
        assert_matches!(
            MatchSpec::from_str("foo[bar=1]").unwrap_err(),
            ParseMatchSpecError::UnknownBracketKey(_)
        );
        assert_matches!(
            MatchSpec::from_str("foo[version=1.0").unwrap_err(),
            ParseMatchSpecError::UnclosedBracket(_)
        );
    }

    #[test]
    fn test_comment_stripped() {
        let spec = MatchSpec::from_str("foo >=1.0  # pinned for the demo").unwrap();
        assert_eq!(spec.version, Some(VersionSpec::from_str(">=1.0").unwrap()));
    }

    #[test]
    fn test_virtual() {
        assert!(MatchSpec::from_str("__glibc >=2.17").unwrap().is_virtual());
        assert!(!MatchSpec::from_str("glibc").unwrap().is_virtual());
    }
}
