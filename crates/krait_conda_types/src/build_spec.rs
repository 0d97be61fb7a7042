//! Build number specifications: the `build_number` part of a
//! [`crate::MatchSpec`], e.g. `>=3,<4`.

use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Named type for the build number of a package.
pub type BuildNumber = u64;

/// An operator to compare two build numbers.
#[allow(missing_docs)]
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub enum OrdOperator {
    Gt,
    Ge,
    Lt,
    Le,
    Eq,
    Ne,
}

/// A constraint on the build number of a package.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct BuildNumberSpec {
    op: OrdOperator,
    rhs: BuildNumber,
}

impl BuildNumberSpec {
    /// Constructs a new build number spec from an operator and an operand.
    pub fn new(op: OrdOperator, rhs: BuildNumber) -> Self {
        Self { op, rhs }
    }

    /// Returns whether the given build number matches this specification.
    pub fn matches(&self, build_number: &BuildNumber) -> bool {
        match self.op {
            OrdOperator::Gt => build_number.gt(&self.rhs),
            OrdOperator::Ge => build_number.ge(&self.rhs),
            OrdOperator::Lt => build_number.lt(&self.rhs),
            OrdOperator::Le => build_number.le(&self.rhs),
            OrdOperator::Eq => build_number.eq(&self.rhs),
            OrdOperator::Ne => build_number.ne(&self.rhs),
        }
    }
}

impl Display for OrdOperator {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Gt => write!(f, ">"),
            Self::Ge => write!(f, ">="),
            Self::Lt => write!(f, "<"),
            Self::Le => write!(f, "<="),
            Self::Eq => write!(f, "=="),
            Self::Ne => write!(f, "!="),
        }
    }
}

impl Display for BuildNumberSpec {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if self.op == OrdOperator::Eq {
            write!(f, "{}", self.rhs)
        } else {
            write!(f, "{}{}", self.op, self.rhs)
        }
    }
}

/// An error that can occur when parsing a [`BuildNumberSpec`].
#[allow(missing_docs)]
#[derive(Debug, Clone, Eq, PartialEq, Error)]
pub enum ParseBuildNumberSpecError {
    #[error("invalid operator '{0}'")]
    InvalidOperator(String),

    #[error("expected a build number")]
    InvalidBuildNumber(#[source] std::num::ParseIntError),
}

impl FromStr for BuildNumberSpec {
    type Err = ParseBuildNumberSpecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let operator_len = s.find(|c| !"=!<>".contains(c)).unwrap_or(s.len());
        let (operator_str, number_str) = s.split_at(operator_len);
        let op = match operator_str {
            "" | "=" | "==" => OrdOperator::Eq,
            "!=" => OrdOperator::Ne,
            ">" => OrdOperator::Gt,
            ">=" => OrdOperator::Ge,
            "<" => OrdOperator::Lt,
            "<=" => OrdOperator::Le,
            _ => {
                return Err(ParseBuildNumberSpecError::InvalidOperator(
                    operator_str.to_owned(),
                ))
            }
        };
        let rhs = number_str
            .trim()
            .parse()
            .map_err(ParseBuildNumberSpecError::InvalidBuildNumber)?;
        Ok(Self { op, rhs })
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::{BuildNumberSpec, OrdOperator};

    #[test]
    fn test_matches() {
        let test_cases = vec![
            (BuildNumberSpec::new(OrdOperator::Gt, 3), 5, true),
            (BuildNumberSpec::new(OrdOperator::Ge, 3), 5, true),
            (BuildNumberSpec::new(OrdOperator::Lt, 3), 5, false),
            (BuildNumberSpec::new(OrdOperator::Le, 3), 7, false),
            (BuildNumberSpec::new(OrdOperator::Eq, 3), 7, false),
            (BuildNumberSpec::new(OrdOperator::Ne, 3), 7, true),
        ];
        for (spec, test_val, is_match) in test_cases {
            assert_eq!(spec.matches(&test_val), is_match);
        }
    }

    #[test]
    fn test_parse() {
        assert_eq!(
            BuildNumberSpec::from_str(">=3").unwrap(),
            BuildNumberSpec::new(OrdOperator::Ge, 3)
        );
        assert_eq!(
            BuildNumberSpec::from_str("7").unwrap(),
            BuildNumberSpec::new(OrdOperator::Eq, 7)
        );
        assert_eq!(
            BuildNumberSpec::from_str("==0").unwrap(),
            BuildNumberSpec::new(OrdOperator::Eq, 0)
        );
        assert!(BuildNumberSpec::from_str("~=3").is_err());
        assert!(BuildNumberSpec::from_str(">=x").is_err());
    }
}
