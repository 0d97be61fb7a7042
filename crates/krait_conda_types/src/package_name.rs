//! Conda package names.

use std::borrow::Borrow;
use std::cmp::Ordering;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// A representation of a conda package name. This struct stores both the
/// source string from which the instance was created and a normalized name
/// that is used to compare different names. The normalized name is guaranteed
/// to be a valid lowercase conda package name.
///
/// This struct explicitly does not implement [`std::fmt::Display`] because it
/// would be ambiguous whether that displays the source or the normalized
/// version. Call `as_source` or `as_normalized` to make the distinction.
#[derive(Debug, Clone, Eq)]
pub struct PackageName {
    normalized: Option<String>,
    source: String,
}

impl PackageName {
    /// Constructs a new `PackageName` from a string without checking that the
    /// string is a valid normalized conda package name. Only use this if you
    /// are sure the input is valid, otherwise use the `TryFrom`
    /// implementations.
    pub fn new_unchecked(normalized: impl Into<String>) -> Self {
        Self {
            normalized: None,
            source: normalized.into(),
        }
    }

    /// Returns the source representation of the package name: the string
    /// from which this instance was created.
    pub fn as_source(&self) -> &str {
        &self.source
    }

    /// Returns the normalized version of the package name. The normalized
    /// string is guaranteed to be a valid lowercase conda package name.
    pub fn as_normalized(&self) -> &str {
        self.normalized.as_deref().unwrap_or(&self.source)
    }
}

/// An error that is returned when conversion from a string to a
/// [`PackageName`] fails.
#[derive(Debug, Clone, Eq, PartialEq, Error)]
pub enum ParsePackageNameError {
    /// The package name was empty.
    #[error("package name was empty")]
    Empty,

    /// The package name contained an illegal character.
    #[error("'{0}' is not allowed in a package name")]
    InvalidCharacter(char),
}

impl TryFrom<&str> for PackageName {
    type Error = ParsePackageNameError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        value.to_owned().try_into()
    }
}

impl TryFrom<String> for PackageName {
    type Error = ParsePackageNameError;

    fn try_from(source: String) -> Result<Self, Self::Error> {
        if source.is_empty() {
            return Err(ParsePackageNameError::Empty);
        }
        if let Some(c) = source
            .chars()
            .find(|c| !matches!(c, 'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' | '.'))
        {
            return Err(ParsePackageNameError::InvalidCharacter(c));
        }

        let normalized = source
            .chars()
            .any(char::is_uppercase)
            .then(|| source.to_lowercase());

        Ok(Self { normalized, source })
    }
}

impl FromStr for PackageName {
    type Err = ParsePackageNameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.try_into()
    }
}

impl Hash for PackageName {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.as_normalized().hash(state);
    }
}

impl PartialEq for PackageName {
    fn eq(&self, other: &Self) -> bool {
        self.as_normalized().eq(other.as_normalized())
    }
}

impl PartialOrd for PackageName {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PackageName {
    fn cmp(&self, other: &Self) -> Ordering {
        self.as_normalized().cmp(other.as_normalized())
    }
}

impl Serialize for PackageName {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.source.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for PackageName {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let source = String::deserialize(deserializer)?;
        source.try_into().map_err(serde::de::Error::custom)
    }
}

impl Borrow<str> for PackageName {
    fn borrow(&self) -> &str {
        self.as_normalized()
    }
}
