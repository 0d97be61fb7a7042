//! Version strings and their total order.

use std::hash::{Hash, Hasher};
use std::{
    cmp::Ordering,
    fmt,
    fmt::{Debug, Display, Formatter},
};

use itertools::{EitherOrBoth, Itertools};
use serde::{Deserialize, Serialize, Serializer};
use smallvec::SmallVec;

pub use parse::{ParseVersionError, ParseVersionErrorKind};

pub(crate) mod parse;

/// This type implements an order relation between version strings. Version
/// strings can contain the usual alphanumeric characters (A-Za-z0-9),
/// separated by dots, dashes and underscores. An optional epoch number - an
/// integer followed by `!` - can precede the actual version string. An
/// optional local version - separated by `+` - can follow it; the local part
/// is only considered when the main parts compare equal. Comparison is
/// case-insensitive.
///
/// Before comparison, version strings are parsed as follows:
///
/// * They are split into epoch, release, and local version at `!` and `+`.
///   A missing epoch counts as 0, a missing local version is empty.
/// * The release and local parts are split into runs of numerals and
///   non-numerals (the separators `.`, `-` and `_` only delimit runs).
///   Numeral runs become integers, non-numeral runs become lowercase string
///   atoms; `dev` and `post` are special atoms, and a trailing underscore or
///   dash is an atom of its own.
///
/// The resulting atom sequences are compared lexicographically where a
/// missing atom counts as the integer 0, and atoms order as
///
/// ```text
/// dev  <  _  <  (identifiers, lexicographically: alpha < beta < rc < …)  <  (integers)  <  post
/// ```
///
/// This yields, among others:
///
/// ```text
///        1.0.dev1
///      < 1.0a0        # dev releases come before any pre-release
///      < 1.0rc1
///      < 1.0
///     == 1.0.0        # missing atoms count as zero
///      < 1.0post1
///      < 1.0.1_       # openssl-style letter suffixes
///      < 1.0.1a
///      < 1.0.1
///      < 1!0.1        # epochs dominate
/// ```
#[derive(Clone, Eq)]
pub struct Version {
    /// A normalized copy of the original version string: trimmed and lowered.
    norm: Box<str>,

    /// The epoch, if the version string had one.
    epoch: Option<u64>,

    /// The atoms of the release part of the version. For `1.2g.beta15` this
    /// stores `[1, 2, 'g', 'beta', 15]`.
    release: SmallVec<[Component; 4]>,

    /// The atoms of the local part of the version, the part behind the
    /// optional `+`. Empty when there is no local version.
    local: SmallVec<[Component; 2]>,
}

impl Version {
    pub(crate) fn new(
        norm: Box<str>,
        epoch: Option<u64>,
        release: SmallVec<[Component; 4]>,
        local: SmallVec<[Component; 2]>,
    ) -> Self {
        Self {
            norm,
            epoch,
            release,
            local,
        }
    }

    /// Returns the normalized string representation of this version.
    pub fn as_str(&self) -> &str {
        &self.norm
    }

    /// Returns true if this version has an epoch.
    pub fn has_epoch(&self) -> bool {
        self.epoch.is_some()
    }

    /// Returns true if this version has a local version part.
    pub fn has_local(&self) -> bool {
        !self.local.is_empty()
    }

    /// Returns the epoch of the version, 0 if the version has none.
    pub fn epoch(&self) -> u64 {
        self.epoch.unwrap_or(0)
    }

    /// Returns the epoch of the version or `None` if it has none.
    pub fn epoch_opt(&self) -> Option<u64> {
        self.epoch
    }

    /// Tries to extract the major and minor version numbers. Returns `None`
    /// if the version does not start with two numeric atoms.
    pub fn as_major_minor(&self) -> Option<(u64, u64)> {
        match self.release.as_slice() {
            [Component::Numeral(major), Component::Numeral(minor), ..] => Some((*major, *minor)),
            _ => None,
        }
    }

    /// Returns true if any atom of the release part is the special `dev` tag.
    pub fn is_dev(&self) -> bool {
        self.release
            .iter()
            .any(|component| matches!(component, Component::Dev))
    }

    /// Returns true if this version starts with `other`, for both the release
    /// and the local part. This implements the `1.7.*` style of constraint.
    ///
    /// Trailing zero atoms of the pattern are ignored so that `2.38.0.*`
    /// matches `2.38` just like `2.38.*` does.
    pub fn starts_with(&self, other: &Self) -> bool {
        self.epoch() == other.epoch()
            && atoms_start_with(&self.release, &other.release)
            && atoms_start_with(&self.local, &other.local)
    }

    /// Returns true if this version is compatible with `other` in the sense
    /// of the `~=` operator: at least `other`, and starting with all but the
    /// last atom of `other`.
    pub fn compatible_with(&self, other: &Self) -> bool {
        let prefix = &other.release[..other.release.len().saturating_sub(1)];
        self.ge(other)
            && self.epoch() == other.epoch()
            && atoms_start_with(&self.release, prefix)
            && atoms_start_with(&self.local, &other.local)
    }
}

/// Returns true if `atoms` starts with `pattern`, ignoring trailing default
/// (zero) atoms of the pattern. Atoms missing on the left side count as zero.
fn atoms_start_with(atoms: &[Component], pattern: &[Component]) -> bool {
    let default = Component::default();
    let pattern = match pattern.iter().rposition(|c| *c != default) {
        Some(idx) => &pattern[..=idx],
        None => &[],
    };
    for values in atoms.iter().zip_longest(pattern.iter()) {
        match values {
            EitherOrBoth::Both(a, b) if a == b => {}
            EitherOrBoth::Both(_, _) => return false,
            EitherOrBoth::Left(_) => return true,
            // The version ran out; the remaining pattern atoms must have been
            // stripped above to match.
            EitherOrBoth::Right(_) => return false,
        }
    }
    true
}

/// Compares two atom sequences lexicographically, padding the shorter side
/// with zero atoms.
fn cmp_atoms(a: &[Component], b: &[Component]) -> Ordering {
    let default = Component::default();
    for values in a.iter().zip_longest(b.iter()) {
        let (a_atom, b_atom) = match values {
            EitherOrBoth::Both(l, r) => (l, r),
            EitherOrBoth::Left(l) => (l, &default),
            EitherOrBoth::Right(r) => (&default, r),
        };
        match a_atom.cmp(b_atom) {
            Ordering::Equal => {}
            ordering => return ordering,
        }
    }
    Ordering::Equal
}

impl PartialEq<Self> for Version {
    fn eq(&self, other: &Self) -> bool {
        self.epoch() == other.epoch()
            && cmp_atoms(&self.release, &other.release) == Ordering::Equal
            && cmp_atoms(&self.local, &other.local) == Ordering::Equal
    }
}

impl Hash for Version {
    fn hash<H: Hasher>(&self, state: &mut H) {
        fn hash_atoms<H: Hasher>(state: &mut H, atoms: &[Component]) {
            let default = Component::default();
            // `1.0` and `1` are equal because missing atoms count as zero, so
            // trailing zero atoms must not feed the hash.
            atoms
                .iter()
                .rev()
                .skip_while(|c| **c == default)
                .for_each(|c| c.hash(state));
        }

        self.epoch().hash(state);
        hash_atoms(state, &self.release);
        hash_atoms(state, &self.local);
    }
}

impl Debug for Version {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Version")
            .field("norm", &self.norm)
            .field("epoch", &self.epoch())
            .field(
                "release",
                &format!("[{}]", self.release.iter().format(", ")),
            )
            .field("local", &format!("[{}]", self.local.iter().format(", ")))
            .finish()
    }
}

/// A single parsed atom of a version string.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub(crate) enum Component {
    /// A numeric atom. Numbers order above all identifiers.
    Numeral(u64),

    /// The `post` tag. Always ordered greater than anything else.
    Post,

    /// The `dev` tag. Always ordered less than anything else.
    Dev,

    /// A trailing underscore or dash. Sorts between `dev` and alphabetic
    /// identifiers, which gives openssl-style versions a sane order.
    UnderscoreOrDash {
        /// Whether the original character was a dash.
        is_dash: bool,
    },

    /// A generic lowercase identifier. Identifiers are compared
    /// lexicographically and are always ordered less than numbers.
    Iden(Box<str>),
}

impl Component {
    pub fn as_number(&self) -> Option<u64> {
        match self {
            Component::Numeral(value) => Some(*value),
            _ => None,
        }
    }
}

impl From<u64> for Component {
    fn from(num: u64) -> Self {
        Component::Numeral(num)
    }
}

impl Default for Component {
    fn default() -> Self {
        Component::Numeral(0)
    }
}

impl Ord for Component {
    fn cmp(&self, other: &Self) -> Ordering {
        use Component::{Dev, Iden, Numeral, Post, UnderscoreOrDash};
        match (self, other) {
            (Numeral(a), Numeral(b)) => a.cmp(b),
            (Iden(a), Iden(b)) => a.cmp(b),
            (Post, Post) | (Dev, Dev) | (UnderscoreOrDash { .. }, UnderscoreOrDash { .. }) => {
                Ordering::Equal
            }

            // Post is greater than anything else.
            (Post, _) => Ordering::Greater,
            (_, Post) => Ordering::Less,

            // Dev is less than anything else.
            (Dev, _) => Ordering::Less,
            (_, Dev) => Ordering::Greater,

            // Numbers order above identifiers and underscores.
            (Numeral(_), _) => Ordering::Greater,
            (_, Numeral(_)) => Ordering::Less,

            // The underscore sorts below any identifier.
            (UnderscoreOrDash { .. }, Iden(_)) => Ordering::Less,
            (Iden(_), UnderscoreOrDash { .. }) => Ordering::Greater,
        }
    }
}

impl PartialOrd for Component {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Display for Component {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Component::Numeral(n) => write!(f, "{n}"),
            Component::Iden(s) => write!(f, "{s}"),
            Component::Post => write!(f, "post"),
            Component::Dev => write!(f, "dev"),
            Component::UnderscoreOrDash { is_dash: true } => write!(f, "-"),
            Component::UnderscoreOrDash { is_dash: false } => write!(f, "_"),
        }
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        self.epoch()
            .cmp(&other.epoch())
            .then_with(|| cmp_atoms(&self.release, &other.release))
            .then_with(|| cmp_atoms(&self.local, &other.local))
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Display for Version {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.norm.as_ref())
    }
}

impl Serialize for Version {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.norm)
    }
}

impl<'de> Deserialize<'de> for Version {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let str = std::borrow::Cow::<'de, str>::deserialize(deserializer)?;
        str.parse().map_err(serde::de::Error::custom)
    }
}

/// A wrapper around [`Version`] whose equality and hash take the literal
/// written form into account instead of the zero-padded value. `1.2` and
/// `1.2.0` compare equal as versions but differ as *patterns*: `1.2.*`
/// matches `1.2.5` whereas `1.2.0.5` is not `1.2.0.*`. Version specs
/// therefore store starts-with operands as a `StrictVersion`.
#[derive(Debug, Clone, Eq)]
pub struct StrictVersion(pub Version);

impl PartialEq for StrictVersion {
    fn eq(&self, other: &Self) -> bool {
        self.0.norm == other.0.norm
    }
}

impl Hash for StrictVersion {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.norm.hash(state);
    }
}

impl Ord for StrictVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0
            .cmp(&other.0)
            .then_with(|| self.0.norm.cmp(&other.0.norm))
    }
}

impl PartialOrd for StrictVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Display for StrictVersion {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

#[cfg(test)]
mod test {
    use std::cmp::Ordering;
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};
    use std::str::FromStr;

    use super::Version;

    #[test]
    fn order_fixture() {
        // Each line is compared with its predecessor using the given operator.
        let versions = [
            "   0.4",
            "== 0.4.0",
            " < 0.4.1.rc",
            "== 0.4.1.RC", // case-insensitive comparison
            " < 0.4.1",
            " < 0.5a1",
            " < 0.5b3",
            " < 0.5C1", // case-insensitive comparison
            " < 0.5",
            " < 0.9.6",
            " < 0.960923",
            " < 1.0",
            " < 1.1dev1", // special case 'dev'
            "== 1.1.dev1",
            " < 1.1_", // appended underscore for openssl-like versions
            " < 1.1a1",
            "== 1.1.a1",
            " < 1.1.0dev1", // 'dev' of the zero-patch release
            " < 1.1.0rc1",
            " < 1.1.0",
            "== 1.1",
            " < 1.1.0post1", // special case 'post'
            " < 1.1post1",
            "== 1.1.post1",
            " < 1996.07.12",
            " < 1!0.4.1", // epoch increased
            " < 1!3.1.1.6",
            " < 2!0.4.1", // epoch increased again
        ];

        let mut previous: Option<Version> = None;
        for entry in versions {
            let (op, version_str) = entry.trim().split_once(' ').unwrap_or(("", entry));
            let version: Version = version_str.trim().parse().unwrap();
            let expected = match op {
                "<" => Some(Ordering::Less),
                "==" => Some(Ordering::Equal),
                _ => None,
            };
            if let (Some(previous), Some(expected)) = (&previous, expected) {
                let comparison = previous.cmp(&version);
                assert_eq!(
                    comparison, expected,
                    "{previous} {op} {version} failed: got {comparison:?}"
                );
            }
            previous = Some(version);
        }
    }

    #[test]
    fn openssl_convention() {
        let version_strs = [
            "1.0.1dev",
            "1.0.1_",
            "1.0.1a",
            "1.0.1b",
            "1.0.1c",
            "1.0.1d",
            "1.0.1r",
            "1.0.1rc",
            "1.0.1rc1",
            "1.0.1rc2",
            "1.0.1s",
            "1.0.1",
            "1.0.1post.a",
            "1.0.1post.b",
            "1.0.1post.z",
            "1.0.1post.za",
            "1.0.2",
        ];
        let parsed_versions: Vec<Version> =
            version_strs.iter().map(|v| v.parse().unwrap()).collect();
        let mut sorted_versions = parsed_versions.clone();
        sorted_versions.reverse();
        sorted_versions.sort();
        assert_eq!(sorted_versions, parsed_versions);
    }

    #[test]
    fn pep440_order() {
        // Subset of the PEP 440 ordering test suite, in sorted order.
        let versions = [
            "1.0.dev456",
            "1.0a1",
            "1.0a2.dev456",
            "1.0a12.dev456",
            "1.0a12",
            "1.0b1.dev456",
            "1.0b2",
            "1.0b2.post345.dev456",
            "1.0b2.post345",
            "1.0c1.dev456",
            "1.0c1",
            "1.0c3",
            "1.0rc2",
            "1.0",
            "1.0.post456.dev34",
            "1.0.post456",
            "1.1.dev1",
            "1.2.r32+123456",
            "1.2.rev33+123456",
            "1.2+abc",
            "1.2+abc123def",
            "1.2+abc123",
            "1.2+123abc",
            "1.2+123abc456",
            "1.2+1234.abc",
            "1.2+123456",
            "1!1.0a1",
            "1!1.0",
            "1!1.1.dev1",
        ];
        let parsed_versions: Vec<Version> = versions.iter().map(|v| v.parse().unwrap()).collect();
        let mut sorted_versions = parsed_versions.clone();
        sorted_versions.reverse();
        sorted_versions.sort();
        assert_eq!(sorted_versions, parsed_versions);
    }

    #[test]
    fn spec_scenarios() {
        let cmp = |a: &str, b: &str| {
            Version::from_str(a)
                .unwrap()
                .cmp(&Version::from_str(b).unwrap())
        };
        assert_eq!(cmp("1.0", "1.0.0"), Ordering::Equal);
        assert_eq!(cmp("1.0rc1", "1.0"), Ordering::Less);
        assert_eq!(cmp("1.0", "1.0+local.1"), Ordering::Less);
        assert_eq!(cmp("2!1.0", "1!99.99"), Ordering::Greater);
        assert_eq!(cmp("1.0.dev1", "1.0a0"), Ordering::Less);
    }

    #[test]
    fn epoch_dominates() {
        assert!(Version::from_str("2!1.0").unwrap() > Version::from_str("1!9999").unwrap());
        assert!(Version::from_str("1!0.1").unwrap() > Version::from_str("9999.9999").unwrap());
    }

    #[test]
    fn local_sorts_after_release() {
        assert!(Version::from_str("1.0+local.1").unwrap() > Version::from_str("1.0").unwrap());
        assert!(Version::from_str("1.0+local.1").unwrap() < Version::from_str("1.0.1").unwrap());
        assert!(Version::from_str("1.0+local.1").unwrap() < Version::from_str("1.1.dev1").unwrap());
    }

    #[test]
    fn starts_with() {
        let version = Version::from_str("1.2.3").unwrap();
        assert!(version.starts_with(&Version::from_str("1.2").unwrap()));
        assert!(version.starts_with(&Version::from_str("1.2.3").unwrap()));
        assert!(!version.starts_with(&Version::from_str("1.2.3.4").unwrap()));
        assert!(!version.starts_with(&Version::from_str("1.3").unwrap()));
        assert!(!version.starts_with(&Version::from_str("1.20").unwrap()));

        // Trailing zeros in the pattern are insignificant.
        let version = Version::from_str("2.38").unwrap();
        assert!(version.starts_with(&Version::from_str("2.38.0").unwrap()));
        assert!(!version.starts_with(&Version::from_str("2.38.0a").unwrap()));
    }

    #[test]
    fn compatible_with() {
        let spec = Version::from_str("2.4").unwrap();
        assert!(Version::from_str("2.4").unwrap().compatible_with(&spec));
        assert!(Version::from_str("2.5").unwrap().compatible_with(&spec));
        assert!(!Version::from_str("2.1").unwrap().compatible_with(&spec));
        assert!(!Version::from_str("3.1").unwrap().compatible_with(&spec));

        let spec = Version::from_str("1.4.5").unwrap();
        assert!(Version::from_str("1.4.5").unwrap().compatible_with(&spec));
        assert!(Version::from_str("1.4.9").unwrap().compatible_with(&spec));
        assert!(!Version::from_str("1.4.4").unwrap().compatible_with(&spec));
        assert!(!Version::from_str("1.5.0").unwrap().compatible_with(&spec));
    }

    fn get_hash(version: &Version) -> u64 {
        let mut s = DefaultHasher::new();
        version.hash(&mut s);
        s.finish()
    }

    #[test]
    fn hash_consistent_with_eq() {
        let v1 = Version::from_str("1.2.0").unwrap();
        assert_eq!(get_hash(&v1), get_hash(&Version::from_str("1.2.0").unwrap()));
        assert_eq!(
            get_hash(&v1),
            get_hash(&Version::from_str("1.2.0.0.0").unwrap())
        );
        assert_ne!(get_hash(&v1), get_hash(&Version::from_str("1!1.2.0").unwrap()));
        assert_ne!(
            get_hash(&v1),
            get_hash(&Version::from_str("1.2.0+post1").unwrap())
        );
        assert_eq!(
            get_hash(&Version::from_str("1.2+post1").unwrap()),
            get_hash(&Version::from_str("1.2.0+post1").unwrap())
        );
    }

    #[test]
    fn as_major_minor() {
        assert_eq!(
            Version::from_str("1.2.3").unwrap().as_major_minor(),
            Some((1, 2))
        );
        assert_eq!(
            Version::from_str("5!1.2.3").unwrap().as_major_minor(),
            Some((1, 2))
        );
        assert_eq!(Version::from_str("1").unwrap().as_major_minor(), None);
        assert_eq!(Version::from_str("3.10.4").unwrap().as_major_minor(), Some((3, 10)));
    }
}
