use std::str::FromStr;

use thiserror::Error;

use super::{
    EqualityOperator, LogicalOperator, RangeOperator, StrictRangeOperator, VersionSpec,
};
use crate::version::{parse::version_parser, ParseVersionErrorKind, StrictVersion};

/// An error that can occur when parsing a [`VersionSpec`].
#[allow(missing_docs)]
#[derive(Debug, Clone, Eq, PartialEq, Error)]
pub enum ParseVersionSpecError {
    #[error("invalid version: {0}")]
    InvalidVersion(#[source] ParseVersionErrorKind),

    #[error("invalid operator '{0}'")]
    InvalidOperator(String),

    #[error("'*' is incompatible with the '{0}' operator")]
    GlobIncompatibleWithOperator(String),

    #[error("regex constraints are not supported")]
    RegexConstraintsNotSupported,

    #[error("unterminated unsupported regular expression")]
    UnterminatedRegex,

    #[error("expected a version")]
    ExpectedVersion,

    #[error("expected a closing parenthesis")]
    MissingClosingParenthesis,

    #[error("encountered unexpected input '{0}'")]
    UnexpectedInput(String),

    #[error("empty version specification")]
    Empty,
}

impl FromStr for VersionSpec {
    type Err = ParseVersionSpecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let input = s.trim();
        if input.is_empty() {
            return Err(ParseVersionSpecError::Empty);
        }
        let (spec, rest) = parse_or_group(input)?;
        let rest = rest.trim_start();
        if !rest.is_empty() {
            return Err(ParseVersionSpecError::UnexpectedInput(rest.to_owned()));
        }
        Ok(spec)
    }
}

/// Parses `a|b|…` where each operand is an and-group.
fn parse_or_group(input: &str) -> Result<(VersionSpec, &str), ParseVersionSpecError> {
    let (first, mut rest) = parse_and_group(input)?;
    let mut terms = vec![first];
    loop {
        let trimmed = rest.trim_start();
        match trimmed.strip_prefix('|') {
            Some(remaining) => {
                let (term, remaining) = parse_and_group(remaining)?;
                terms.push(term);
                rest = remaining;
            }
            None => break,
        }
    }
    if terms.len() == 1 {
        Ok((terms.pop().expect("group has at least one term"), rest))
    } else {
        Ok((VersionSpec::Group(LogicalOperator::Or, terms), rest))
    }
}

/// Parses `a,b,…` where each operand is a single term.
fn parse_and_group(input: &str) -> Result<(VersionSpec, &str), ParseVersionSpecError> {
    let (first, mut rest) = parse_term(input)?;
    let mut terms = vec![first];
    loop {
        let trimmed = rest.trim_start();
        match trimmed.strip_prefix(',') {
            Some(remaining) => {
                let (term, remaining) = parse_term(remaining)?;
                terms.push(term);
                rest = remaining;
            }
            None => break,
        }
    }
    if terms.len() == 1 {
        Ok((terms.pop().expect("group has at least one term"), rest))
    } else {
        Ok((VersionSpec::Group(LogicalOperator::And, terms), rest))
    }
}

/// Parses a parenthesised group or a single constraint.
fn parse_term(input: &str) -> Result<(VersionSpec, &str), ParseVersionSpecError> {
    let input = input.trim_start();
    if let Some(remaining) = input.strip_prefix('(') {
        let (group, rest) = parse_or_group(remaining)?;
        let rest = rest.trim_start();
        match rest.strip_prefix(')') {
            Some(rest) => Ok((group, rest)),
            None => Err(ParseVersionSpecError::MissingClosingParenthesis),
        }
    } else {
        // A constraint never contains parentheses, so it extends up to the
        // next delimiter.
        let end = input
            .find(|c| matches!(c, ',' | '|' | ')'))
            .unwrap_or(input.len());
        let constraint = parse_constraint(input[..end].trim())?;
        Ok((constraint, &input[end..]))
    }
}

/// Parses a single constraint: an optional operator, a version, and an
/// optional trailing glob.
fn parse_constraint(input: &str) -> Result<VersionSpec, ParseVersionSpecError> {
    if input.is_empty() {
        return Err(ParseVersionSpecError::ExpectedVersion);
    }

    // Regular expressions are a deliberately unsupported corner of the
    // historical syntax.
    if let Some(regex) = input.strip_prefix('^') {
        return Err(if regex.ends_with('$') {
            ParseVersionSpecError::RegexConstraintsNotSupported
        } else {
            ParseVersionSpecError::UnterminatedRegex
        });
    }

    // Split off a leading operator.
    let operator_len = input
        .find(|c| !"=!<>~".contains(c))
        .unwrap_or(input.len());
    let (operator_str, version_str) = input.split_at(operator_len);
    let operator = match operator_str {
        "" => None,
        "==" => Some(Operator::Exact(EqualityOperator::Equals)),
        "!=" => Some(Operator::Exact(EqualityOperator::NotEquals)),
        "<=" => Some(Operator::Range(RangeOperator::LessEquals)),
        ">=" => Some(Operator::Range(RangeOperator::GreaterEquals)),
        "<" => Some(Operator::Range(RangeOperator::Less)),
        ">" => Some(Operator::Range(RangeOperator::Greater)),
        "=" => Some(Operator::Strict(StrictRangeOperator::StartsWith)),
        "~=" => Some(Operator::Strict(StrictRangeOperator::Compatible)),
        _ => return Err(ParseVersionSpecError::InvalidOperator(operator_str.to_owned())),
    };

    let version_str = version_str.trim();

    // A glob without a version matches anything, but only for operators where
    // that is meaningful.
    if matches!(version_str, "*" | "*.*") {
        return match operator {
            None
            | Some(Operator::Exact(EqualityOperator::Equals))
            | Some(Operator::Range(RangeOperator::GreaterEquals | RangeOperator::LessEquals))
            | Some(Operator::Strict(_)) => Ok(VersionSpec::Any),
            Some(_) => Err(ParseVersionSpecError::GlobIncompatibleWithOperator(
                operator_str.to_owned(),
            )),
        };
    }

    // Parse the version itself.
    let (rest, version) = version_parser(version_str).map_err(|e| match e {
        nom::Err::Error(kind) | nom::Err::Failure(kind) => {
            ParseVersionSpecError::InvalidVersion(kind)
        }
        nom::Err::Incomplete(_) => ParseVersionSpecError::ExpectedVersion,
    })?;

    // Accept a trailing glob; repeated `.*` segments collapse.
    let mut wildcard = false;
    let mut rest = rest;
    while !rest.is_empty() {
        if let Some(remaining) = rest.strip_prefix(".*").or_else(|| rest.strip_prefix('*')) {
            wildcard = true;
            rest = remaining;
        } else {
            return Err(ParseVersionSpecError::UnexpectedInput(rest.to_owned()));
        }
    }

    Ok(match (wildcard, operator) {
        // A glob pattern modifies the operator it accompanies.
        (true, None | Some(Operator::Strict(StrictRangeOperator::StartsWith))) => {
            VersionSpec::StrictRange(StrictRangeOperator::StartsWith, StrictVersion(version))
        }
        (true, Some(Operator::Exact(EqualityOperator::Equals))) => {
            VersionSpec::StrictRange(StrictRangeOperator::StartsWith, StrictVersion(version))
        }
        (true, Some(Operator::Exact(EqualityOperator::NotEquals))) => {
            VersionSpec::StrictRange(StrictRangeOperator::NotStartsWith, StrictVersion(version))
        }
        (true, Some(Operator::Range(RangeOperator::Greater | RangeOperator::GreaterEquals))) => {
            VersionSpec::Range(RangeOperator::GreaterEquals, version)
        }
        (true, Some(Operator::Range(op))) => {
            // `<1.2*` and friends: the glob is superfluous, keep the operator.
            tracing::warn!(
                "using a glob with the relational operator `{op}` is superfluous and deprecated"
            );
            VersionSpec::Range(op, version)
        }
        (true, Some(Operator::Strict(StrictRangeOperator::Compatible))) => {
            VersionSpec::StrictRange(StrictRangeOperator::Compatible, StrictVersion(version))
        }
        (true, Some(Operator::Strict(StrictRangeOperator::NotStartsWith))) => {
            VersionSpec::StrictRange(StrictRangeOperator::NotStartsWith, StrictVersion(version))
        }

        // No glob: use the operator as written.
        (false, None) => VersionSpec::Exact(EqualityOperator::Equals, version),
        (false, Some(Operator::Exact(op))) => VersionSpec::Exact(op, version),
        (false, Some(Operator::Range(op))) => VersionSpec::Range(op, version),
        (false, Some(Operator::Strict(op))) => {
            VersionSpec::StrictRange(op, StrictVersion(version))
        }
    })
}

enum Operator {
    Range(RangeOperator),
    Strict(StrictRangeOperator),
    Exact(EqualityOperator),
}
