//! The `noarch` field of a package record.

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Describes in what way a package is architecture independent.
///
/// Noarch packages only have to be built once. They are either *generic*
/// (docs, datasets, plain data files) or *python* (pure python code whose
/// file layout is decided at install time).
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd, Default)]
pub struct NoArchType(pub Option<NoArchKind>);

/// The kinds of noarch packages.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub enum NoArchKind {
    /// A noarch python package: pure python source code whose files are
    /// mapped to a platform specific location (`site-packages`, entry point
    /// scripts) when the package is linked.
    Python,

    /// A generic noarch package whose files are linked as-is.
    Generic,
}

impl NoArchType {
    /// Returns the kind of this instance or `None` if this is not a noarch
    /// package at all.
    pub fn kind(&self) -> Option<NoArchKind> {
        self.0
    }

    /// Returns true if this is not a noarch package.
    pub fn is_none(&self) -> bool {
        self.0.is_none()
    }

    /// Returns true if this instance is a python noarch type.
    pub fn is_python(&self) -> bool {
        self.0 == Some(NoArchKind::Python)
    }

    /// Returns true if this instance is a generic noarch type.
    pub fn is_generic(&self) -> bool {
        self.0 == Some(NoArchKind::Generic)
    }

    /// Constructs a python noarch instance.
    pub fn python() -> Self {
        Self(Some(NoArchKind::Python))
    }

    /// Constructs a generic noarch instance.
    pub fn generic() -> Self {
        Self(Some(NoArchKind::Generic))
    }

    /// Constructs a `None` noarch type: the package is architecture specific.
    pub fn none() -> Self {
        Self(None)
    }
}

impl<'de> Deserialize<'de> for NoArchType {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        // Very old repodata stores `noarch: true` instead of a string value.
        #[derive(Clone, Debug, Deserialize)]
        #[serde(untagged)]
        enum NoArchSerde {
            OldFormat(bool),
            NewFormat(NoArchKindSerde),
        }

        #[derive(Clone, Debug, Deserialize)]
        #[serde(rename_all = "lowercase")]
        enum NoArchKindSerde {
            Python,
            Generic,
        }

        let value = Option::<NoArchSerde>::deserialize(deserializer)?;
        Ok(NoArchType(value.and_then(|value| match value {
            NoArchSerde::OldFormat(true) => Some(NoArchKind::Generic),
            NoArchSerde::OldFormat(false) => None,
            NoArchSerde::NewFormat(NoArchKindSerde::Python) => Some(NoArchKind::Python),
            NoArchSerde::NewFormat(NoArchKindSerde::Generic) => Some(NoArchKind::Generic),
        })))
    }
}

impl Serialize for NoArchType {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self.0 {
            Some(NoArchKind::Python) => "python".serialize(serializer),
            Some(NoArchKind::Generic) => "generic".serialize(serializer),
            None => serializer.serialize_none(),
        }
    }
}

#[cfg(test)]
mod test {
    use super::{NoArchKind, NoArchType};

    #[test]
    fn test_deserialize() {
        assert_eq!(
            serde_json::from_str::<NoArchType>("\"python\"").unwrap(),
            NoArchType::python()
        );
        assert_eq!(
            serde_json::from_str::<NoArchType>("\"generic\"").unwrap(),
            NoArchType::generic()
        );
        assert_eq!(
            serde_json::from_str::<NoArchType>("true").unwrap(),
            NoArchType(Some(NoArchKind::Generic))
        );
        assert_eq!(
            serde_json::from_str::<NoArchType>("null").unwrap(),
            NoArchType::none()
        );
    }
}
