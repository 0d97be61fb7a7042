//! This module contains code to work with "versionspec". It represents the
//! version part of a [`crate::MatchSpec`], e.g.: `>=3.4,<4.0`.

mod parse;

use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

pub use parse::ParseVersionSpecError;

use crate::version::StrictVersion;
use crate::Version;

/// An operator to compare two versions.
#[allow(missing_docs)]
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub enum RangeOperator {
    Greater,
    GreaterEquals,
    Less,
    LessEquals,
}

/// An operator that matches a version against the written form of another
/// version, e.g. a `1.2.*` pattern or the `~=` compatible-release check.
#[allow(missing_docs)]
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub enum StrictRangeOperator {
    StartsWith,
    NotStartsWith,
    Compatible,
}

/// An operator that compares two versions for (in)equality.
#[allow(missing_docs)]
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub enum EqualityOperator {
    Equals,
    NotEquals,
}

/// Logical operator used to combine groups of version comparisons, e.g.
/// `>=3.4,<4.0` or `>=3.4|<4.0`.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub enum LogicalOperator {
    /// All comparators must evaluate to true for the group to be true.
    And,

    /// Any comparator must evaluate to true for the group to be true.
    Or,
}

/// A version specification: a predicate over [`Version`]s.
#[allow(clippy::large_enum_variant)]
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub enum VersionSpec {
    /// Any version.
    Any,
    /// A version range.
    Range(RangeOperator, Version),
    /// A starts-with or compatible-release pattern.
    StrictRange(StrictRangeOperator, StrictVersion),
    /// An exact version.
    Exact(EqualityOperator, Version),
    /// A group of version specifications combined with a logical operator.
    Group(LogicalOperator, Vec<VersionSpec>),
}

impl VersionSpec {
    /// Returns whether the version matches this specification.
    pub fn matches(&self, version: &Version) -> bool {
        match self {
            VersionSpec::Any => true,
            VersionSpec::Exact(EqualityOperator::Equals, limit) => limit == version,
            VersionSpec::Exact(EqualityOperator::NotEquals, limit) => limit != version,
            VersionSpec::Range(RangeOperator::Greater, limit) => version > limit,
            VersionSpec::Range(RangeOperator::GreaterEquals, limit) => version >= limit,
            VersionSpec::Range(RangeOperator::Less, limit) => version < limit,
            VersionSpec::Range(RangeOperator::LessEquals, limit) => version <= limit,
            VersionSpec::StrictRange(StrictRangeOperator::StartsWith, limit) => {
                version.starts_with(&limit.0)
            }
            VersionSpec::StrictRange(StrictRangeOperator::NotStartsWith, limit) => {
                !version.starts_with(&limit.0)
            }
            VersionSpec::StrictRange(StrictRangeOperator::Compatible, limit) => {
                version.compatible_with(&limit.0)
            }
            VersionSpec::Group(LogicalOperator::And, group) => {
                group.iter().all(|spec| spec.matches(version))
            }
            VersionSpec::Group(LogicalOperator::Or, group) => {
                group.iter().any(|spec| spec.matches(version))
            }
        }
    }
}

impl Display for RangeOperator {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            RangeOperator::Greater => write!(f, ">"),
            RangeOperator::GreaterEquals => write!(f, ">="),
            RangeOperator::Less => write!(f, "<"),
            RangeOperator::LessEquals => write!(f, "<="),
        }
    }
}

impl Display for EqualityOperator {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Equals => write!(f, "=="),
            Self::NotEquals => write!(f, "!="),
        }
    }
}

impl Display for LogicalOperator {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            LogicalOperator::And => write!(f, ","),
            LogicalOperator::Or => write!(f, "|"),
        }
    }
}

impl Display for VersionSpec {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        fn write(
            spec: &VersionSpec,
            f: &mut Formatter<'_>,
            parent_op: Option<LogicalOperator>,
        ) -> std::fmt::Result {
            match spec {
                VersionSpec::Any => write!(f, "*"),
                VersionSpec::StrictRange(StrictRangeOperator::StartsWith, version) => {
                    write!(f, "{version}.*")
                }
                VersionSpec::StrictRange(StrictRangeOperator::NotStartsWith, version) => {
                    write!(f, "!={version}.*")
                }
                VersionSpec::StrictRange(StrictRangeOperator::Compatible, version) => {
                    write!(f, "~={version}")
                }
                VersionSpec::Range(op, version) => write!(f, "{op}{version}"),
                VersionSpec::Exact(op, version) => write!(f, "{op}{version}"),
                VersionSpec::Group(op, group) => {
                    // `a|b,c` means `a|(b,c)`, so an or-group inside an
                    // and-group must be parenthesised to survive a roundtrip.
                    let requires_parenthesis = matches!(
                        (op, parent_op),
                        (LogicalOperator::Or, Some(LogicalOperator::And))
                    );

                    if requires_parenthesis {
                        write!(f, "(")?;
                    }
                    for (i, spec) in group.iter().enumerate() {
                        if i > 0 {
                            write!(f, "{op}")?;
                        }
                        write(spec, f, Some(*op))?;
                    }
                    if requires_parenthesis {
                        write!(f, ")")?;
                    }
                    Ok(())
                }
            }
        }

        write(self, f, None)
    }
}

impl Serialize for VersionSpec {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format!("{self}"))
    }
}

impl<'de> Deserialize<'de> for VersionSpec {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let str = std::borrow::Cow::<'de, str>::deserialize(deserializer)?;
        VersionSpec::from_str(&str).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use crate::{Version, VersionSpec};
    use super::{EqualityOperator, LogicalOperator, RangeOperator};

    #[test]
    fn test_simple() {
        assert_eq!(
            VersionSpec::from_str("==1.2.3"),
            Ok(VersionSpec::Exact(
                EqualityOperator::Equals,
                Version::from_str("1.2.3").unwrap(),
            ))
        );
        assert_eq!(
            VersionSpec::from_str(">=1.2.3"),
            Ok(VersionSpec::Range(
                RangeOperator::GreaterEquals,
                Version::from_str("1.2.3").unwrap(),
            ))
        );
    }

    #[test]
    fn test_group() {
        assert_eq!(
            VersionSpec::from_str(">=1.2.3,<2.0.0"),
            Ok(VersionSpec::Group(
                LogicalOperator::And,
                vec![
                    VersionSpec::Range(
                        RangeOperator::GreaterEquals,
                        Version::from_str("1.2.3").unwrap(),
                    ),
                    VersionSpec::Range(RangeOperator::Less, Version::from_str("2.0.0").unwrap()),
                ],
            ))
        );
        assert_eq!(
            VersionSpec::from_str("((>=1.2.3)|<1.0.0)"),
            Ok(VersionSpec::Group(
                LogicalOperator::Or,
                vec![
                    VersionSpec::Range(
                        RangeOperator::GreaterEquals,
                        Version::from_str("1.2.3").unwrap(),
                    ),
                    VersionSpec::Range(RangeOperator::Less, Version::from_str("1.0.0").unwrap()),
                ],
            ))
        );
    }

    #[test]
    fn test_matches() {
        let v1 = Version::from_str("1.2.0").unwrap();
        let vs1 = VersionSpec::from_str(">=1.2.3,<2.0.0").unwrap();
        assert!(!vs1.matches(&v1));

        let vs2 = VersionSpec::from_str("1.2.*").unwrap();
        assert!(vs2.matches(&v1));

        let v2 = Version::from_str("1.2.3").unwrap();
        assert!(vs1.matches(&v2));
        assert!(vs2.matches(&v2));

        let v3 = Version::from_str("1!1.2.3").unwrap();
        assert!(!vs1.matches(&v3));
        assert!(!vs2.matches(&v3));

        let vs3 = VersionSpec::from_str(">=1!1.2,<1!2").unwrap();
        assert!(vs3.matches(&v3));
    }

    #[test]
    fn test_exact_padded() {
        let spec = VersionSpec::from_str("==1.0").unwrap();
        assert!(spec.matches(&Version::from_str("1.0.0").unwrap()));
        assert!(!spec.matches(&Version::from_str("1.0.1").unwrap()));
    }

    #[test]
    fn test_compatible() {
        let spec = VersionSpec::from_str("~=2.4").unwrap();
        assert!(!spec.matches(&Version::from_str("3.1").unwrap()));
        assert!(spec.matches(&Version::from_str("2.4").unwrap()));
        assert!(spec.matches(&Version::from_str("2.5").unwrap()));
        assert!(!spec.matches(&Version::from_str("2.1").unwrap()));

        // `~=1.4.5` is `>=1.4.5, =1.4`.
        let spec = VersionSpec::from_str("~=1.4.5").unwrap();
        assert!(spec.matches(&Version::from_str("1.4.5").unwrap()));
        assert!(spec.matches(&Version::from_str("1.4.6").unwrap()));
        assert!(!spec.matches(&Version::from_str("1.5").unwrap()));
        assert!(!spec.matches(&Version::from_str("1.4.4").unwrap()));
    }

    #[test]
    fn test_missing_operator_means_exact() {
        assert_eq!(
            VersionSpec::from_str("1.2.3"),
            VersionSpec::from_str("==1.2.3")
        );
    }

    #[test]
    fn test_starts_with_variants() {
        let spec = VersionSpec::from_str("=1.7").unwrap();
        assert!(spec.matches(&Version::from_str("1.7.4").unwrap()));
        assert!(!spec.matches(&Version::from_str("1.8").unwrap()));

        let spec = VersionSpec::from_str("1.7.*").unwrap();
        assert!(spec.matches(&Version::from_str("1.7.4").unwrap()));
        assert!(!spec.matches(&Version::from_str("1.8").unwrap()));

        let spec = VersionSpec::from_str("!=1.7.*").unwrap();
        assert!(!spec.matches(&Version::from_str("1.7.4").unwrap()));
        assert!(spec.matches(&Version::from_str("1.8").unwrap()));
    }

    #[test]
    fn test_bracket_printing() {
        let v = VersionSpec::from_str("(>=1,<2)|>3").unwrap();
        assert_eq!(format!("{v}"), ">=1,<2|>3");

        let v = VersionSpec::from_str("(>=1|<2),>3").unwrap();
        assert_eq!(format!("{v}"), "(>=1|<2),>3");
    }

    #[test]
    fn test_roundtrip() {
        for spec_str in ["*", ">=1.2.3", "1.7.*", "~=2.4", "==1.0", "!=1.0", ">=1.2,<2.0|>3.0"] {
            let spec = VersionSpec::from_str(spec_str).unwrap();
            assert_eq!(
                VersionSpec::from_str(&spec.to_string()).unwrap(),
                spec,
                "roundtrip failed for {spec_str}"
            );
        }
    }

    #[test]
    fn test_glob_upgrades_operator() {
        assert_eq!(
            VersionSpec::from_str(">2.10*").unwrap(),
            VersionSpec::from_str(">=2.10").unwrap()
        );
        assert_eq!(
            VersionSpec::from_str("=1.2.3").unwrap(),
            VersionSpec::from_str("1.2.3.*").unwrap()
        );
    }
}
