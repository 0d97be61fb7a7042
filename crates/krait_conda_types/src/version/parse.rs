use std::{
    fmt::{Display, Formatter},
    num::ParseIntError,
    str::FromStr,
};

use nom::{
    branch::alt,
    bytes::complete::tag_no_case,
    character::complete::{alpha1, char, digit1, one_of},
    combinator::{map, opt, value},
    error::{ErrorKind, FromExternalError, ParseError},
    sequence::terminated,
    IResult,
};
use smallvec::SmallVec;
use thiserror::Error;

use super::{Component, StrictVersion, Version};

/// An error that occurred during parsing of a string to a version.
#[derive(Debug, Clone, Eq, PartialEq, Error)]
#[error("malformed version string '{version}': {kind}")]
pub struct ParseVersionError {
    /// The original string that was the input of the parser.
    pub version: String,

    /// The type of parse error that occurred.
    pub kind: ParseVersionErrorKind,
}

impl ParseVersionError {
    /// Create a new parse error.
    pub fn new(text: impl Into<String>, kind: ParseVersionErrorKind) -> Self {
        Self {
            version: text.into(),
            kind,
        }
    }
}

/// The type of parse error that occurred when parsing a version string.
#[derive(Debug, Eq, PartialEq, Clone, Error)]
pub enum ParseVersionErrorKind {
    /// The string was empty.
    #[error("empty string")]
    Empty,
    /// The epoch was not an integer value.
    #[error("epoch is not a number")]
    EpochMustBeInteger(ParseIntError),
    /// The string contained a numeral that cannot be represented.
    #[error("invalid number")]
    InvalidNumeral(ParseIntError),
    /// The version must start with a number.
    #[error("the version must start with a number")]
    MustStartWithNumeral,
    /// Expected a version component.
    #[error("expected a version component e.g. `2` or `rc`")]
    ExpectedComponent,
    /// The local version part was empty.
    #[error("expected a version component after `+`")]
    EmptyLocalVersion,
    /// Expected the end of the string.
    #[error("encountered more characters but expected none")]
    ExpectedEof,
    /// Nom error.
    #[error("{0:?}")]
    Nom(ErrorKind),
}

impl<'i> ParseError<&'i str> for ParseVersionErrorKind {
    fn from_error_kind(_: &'i str, kind: ErrorKind) -> Self {
        ParseVersionErrorKind::Nom(kind)
    }

    fn append(_: &'i str, _: ErrorKind, other: Self) -> Self {
        other
    }
}

impl<'i> FromExternalError<&'i str, ParseVersionErrorKind> for ParseVersionErrorKind {
    fn from_external_error(_: &'i str, _: ErrorKind, e: ParseVersionErrorKind) -> Self {
        e
    }
}

/// Parses the epoch part of a version: a number followed by `!` at the start
/// of the version string.
fn epoch_parser(input: &str) -> IResult<&str, u64, ParseVersionErrorKind> {
    let (rest, digits) = terminated(digit1, char('!'))(input)?;
    let epoch = digits
        .parse()
        .map_err(ParseVersionErrorKind::EpochMustBeInteger)
        .map_err(nom::Err::Failure)?;
    Ok((rest, epoch))
}

/// Parses a numeral, fails if the digits cannot be represented by an `u64`.
fn numeral_parser(input: &str) -> IResult<&str, u64, ParseVersionErrorKind> {
    let (rest, digits) = digit1(input)?;
    match u64::from_str(digits) {
        Ok(numeral) => Ok((rest, numeral)),
        Err(e) => Err(nom::Err::Failure(ParseVersionErrorKind::InvalidNumeral(e))),
    }
}

/// Parses a single version [`Component`].
fn component_parser(input: &str) -> IResult<&str, Component, ParseVersionErrorKind> {
    alt((
        map(numeral_parser, Component::Numeral),
        value(Component::Post, tag_no_case("post")),
        value(Component::Dev, tag_no_case("dev")),
        map(alpha1, |alpha: &str| {
            Component::Iden(alpha.to_lowercase().into_boxed_str())
        }),
    ))(input)
}

/// Parses a run of components separated by `.`, `-` or `_`. Trailing
/// separators become underscore/dash atoms of their own so that openssl-style
/// versions like `1.0.1_` parse.
fn atoms_parser<'i, const N: usize>(
    input: &'i str,
    atoms: &mut SmallVec<[Component; N]>,
) -> IResult<&'i str, (), ParseVersionErrorKind> {
    // The first component is mandatory.
    let (mut rest, first) = match component_parser(input) {
        Ok(result) => result,
        Err(nom::Err::Error(_)) => {
            return Err(nom::Err::Error(ParseVersionErrorKind::ExpectedComponent))
        }
        Err(e) => return Err(e),
    };
    atoms.push(first);

    loop {
        // Components may follow each other directly (`1a1`) or be separated.
        let (after_sep, separator) = opt(one_of::<_, _, (&str, ErrorKind)>("-._"))(rest)
            .map_err(|e| e.map(|(_, kind)| ParseVersionErrorKind::Nom(kind)))?;
        let lookahead = match separator {
            Some(_) => after_sep,
            None => rest,
        };

        match opt(component_parser)(lookahead)? {
            (remaining, Some(component)) => {
                atoms.push(component);
                rest = remaining;
            }
            (_, None) => {
                match separator {
                    // A dangling `_` or `-` is a version atom. A dangling `.`
                    // is left for the caller (e.g. `1.*` in a version spec).
                    Some(separator @ ('_' | '-')) => {
                        atoms.push(Component::UnderscoreOrDash {
                            is_dash: separator == '-',
                        });
                        rest = after_sep;
                    }
                    _ => {}
                }
                return Ok((rest, ()));
            }
        }
    }
}

pub(crate) fn version_parser(input: &str) -> IResult<&str, Version, ParseVersionErrorKind> {
    if input.is_empty() {
        return Err(nom::Err::Error(ParseVersionErrorKind::Empty));
    }

    // Parse an optional epoch.
    let (rest, epoch) = opt(epoch_parser)(input)?;

    // The release part must start with a numeral; a leading `v` is not
    // accepted.
    if !rest.starts_with(|c: char| c.is_ascii_digit()) {
        return Err(nom::Err::Error(ParseVersionErrorKind::MustStartWithNumeral));
    }

    let mut release = SmallVec::default();
    let (rest, ()) = atoms_parser(rest, &mut release)?;

    // Parse the optional local version part behind a `+`.
    let mut local = SmallVec::default();
    let rest = match char::<_, (&str, ErrorKind)>('+')(rest) {
        Ok((local_part, _)) => {
            let (rest, ()) = atoms_parser(local_part, &mut local).map_err(|e| {
                e.map(|_| ParseVersionErrorKind::EmptyLocalVersion)
            })?;
            rest
        }
        Err(_) => rest,
    };

    let norm = input[..input.len() - rest.len()].trim().to_lowercase();
    Ok((
        rest,
        Version::new(norm.into_boxed_str(), epoch, release, local),
    ))
}

impl FromStr for Version {
    type Err = ParseVersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        match version_parser(trimmed) {
            Ok(("", version)) => Ok(version),
            Ok(_) => Err(ParseVersionError::new(s, ParseVersionErrorKind::ExpectedEof)),
            Err(nom::Err::Failure(e) | nom::Err::Error(e)) => Err(ParseVersionError::new(s, e)),
            Err(_) => unreachable!("not streaming, so no other error possible"),
        }
    }
}

impl FromStr for StrictVersion {
    type Err = ParseVersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(StrictVersion(Version::from_str(s)?))
    }
}

#[cfg(test)]
mod test {
    use std::str::FromStr;

    use assert_matches::assert_matches;

    use super::{version_parser, ParseVersionErrorKind};
    use crate::Version;

    #[test]
    fn parse_star_leaves_rest() {
        assert_eq!(
            version_parser("1.*"),
            Ok((".*", Version::from_str("1").unwrap()))
        );
        assert_eq!(
            version_parser("1.2*"),
            Ok(("*", Version::from_str("1.2").unwrap()))
        );
    }

    #[test]
    fn parse_valid() {
        for input in [
            "1",
            "1.2.3",
            "1!1.2a.3-rc1",
            "1+2",
            "1-2-3",
            "1.0.1_",
            "1.0.1post.za",
            "1_2_3",
            "1__",
            "2023.07",
            "1.2+local_4",
        ] {
            let version = Version::from_str(input).unwrap();
            assert_eq!(version.to_string(), input.to_lowercase());
        }
    }

    #[test]
    fn parse_invalid() {
        assert_matches!(
            Version::from_str("").unwrap_err().kind,
            ParseVersionErrorKind::Empty
        );
        assert_matches!(
            Version::from_str("v1.0").unwrap_err().kind,
            ParseVersionErrorKind::MustStartWithNumeral
        );
        assert_matches!(
            Version::from_str("1+").unwrap_err().kind,
            ParseVersionErrorKind::EmptyLocalVersion
        );
        assert_matches!(
            Version::from_str("1@2").unwrap_err().kind,
            ParseVersionErrorKind::ExpectedEof
        );
        assert_matches!(
            Version::from_str(".").unwrap_err().kind,
            ParseVersionErrorKind::MustStartWithNumeral
        );
        assert_matches!(
            Version::from_str("$").unwrap_err().kind,
            ParseVersionErrorKind::MustStartWithNumeral
        );
    }

    #[test]
    fn epoch() {
        let version = Version::from_str("2!1.0").unwrap();
        assert_eq!(version.epoch_opt(), Some(2));
        assert_eq!(Version::from_str("1.0").unwrap().epoch_opt(), None);
        assert_eq!(Version::from_str("1.0").unwrap().epoch(), 0);
    }

    #[test]
    fn local_version() {
        let version = Version::from_str("1.2+3.4").unwrap();
        assert!(version.has_local());
        assert!(!Version::from_str("1.2").unwrap().has_local());
    }
}
