//! Matching strings by exact value, glob or regex.

use std::fmt::{Display, Formatter};
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// Match a given string either by exact match, glob or regex.
///
/// * A pattern that starts with `^` and ends with `$` is a regex. The regex
///   is anchored and must match the entire string.
/// * A pattern containing `*` is a glob; `py*` matches any string starting
///   with `py` and `*37` any string ending in `37`.
/// * Anything else is matched exactly.
#[derive(Debug, Clone)]
pub enum StringMatcher {
    /// Match the string exactly.
    Exact(String),
    /// Match the string by glob.
    Glob(glob::Pattern),
    /// Match the string by an anchored regex.
    Regex(regex::Regex),
}

impl StringMatcher {
    /// Returns true if `other` matches this matcher.
    pub fn matches(&self, other: &str) -> bool {
        match self {
            StringMatcher::Exact(s) => s == other,
            StringMatcher::Glob(glob) => glob.matches(other),
            StringMatcher::Regex(regex) => regex.is_match(other),
        }
    }
}

/// An error that can occur when parsing a [`StringMatcher`].
#[derive(Debug, Clone, Eq, PartialEq, Error)]
pub enum StringMatcherParseError {
    /// The pattern is not a valid glob.
    #[error("invalid glob: {glob}")]
    InvalidGlob {
        /// The pattern that failed to parse.
        glob: String,
    },

    /// The pattern is not a valid regex.
    #[error("invalid regex: {regex}")]
    InvalidRegex {
        /// The pattern that failed to parse.
        regex: String,
    },
}

impl FromStr for StringMatcher {
    type Err = StringMatcherParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.starts_with('^') && s.ends_with('$') {
            Ok(StringMatcher::Regex(regex::Regex::new(s).map_err(
                |_| StringMatcherParseError::InvalidRegex {
                    regex: s.to_owned(),
                },
            )?))
        } else if s.contains('*') {
            Ok(StringMatcher::Glob(glob::Pattern::new(s).map_err(
                |_| StringMatcherParseError::InvalidGlob { glob: s.to_owned() },
            )?))
        } else {
            Ok(StringMatcher::Exact(s.to_owned()))
        }
    }
}

impl Display for StringMatcher {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            StringMatcher::Exact(s) => write!(f, "{s}"),
            StringMatcher::Glob(glob) => write!(f, "{}", glob.as_str()),
            StringMatcher::Regex(regex) => write!(f, "{}", regex.as_str()),
        }
    }
}

impl Hash for StringMatcher {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            StringMatcher::Exact(s) => s.hash(state),
            StringMatcher::Glob(pattern) => pattern.as_str().hash(state),
            StringMatcher::Regex(regex) => regex.as_str().hash(state),
        }
    }
}

impl PartialEq for StringMatcher {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (StringMatcher::Exact(s1), StringMatcher::Exact(s2)) => s1 == s2,
            (StringMatcher::Glob(g1), StringMatcher::Glob(g2)) => g1.as_str() == g2.as_str(),
            (StringMatcher::Regex(r1), StringMatcher::Regex(r2)) => r1.as_str() == r2.as_str(),
            _ => false,
        }
    }
}

impl Eq for StringMatcher {}

impl Serialize for StringMatcher {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for StringMatcher {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let str = String::deserialize(deserializer)?;
        str.parse().map_err(serde::de::Error::custom)
    }
}
