//! Semantic version stamps for metadata preparers.
//!
//! Versions follow `MAJOR.MINOR.PATCH[-LABEL]`. Numeric fields must not carry
//! leading zeros and the optional label is restricted to ASCII alphanumerics,
//! `-` and `_`. Precedence only considers the numeric triple; equality also
//! compares the label.

use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::{cmp::Ordering, fmt, str::FromStr, sync::LazyLock};
use thiserror::Error;

static VERSION_RE: LazyLock<Regex> = LazyLock::new(|| {
    #[expect(clippy::expect_used, reason = "pattern is constant and valid")]
    Regex::new(r"^(0|[1-9][0-9]*)\.(0|[1-9][0-9]*)\.(0|[1-9][0-9]*)(?:-([-0-9A-Za-z_]+))?$")
        .expect("valid regex")
});

/// Errors produced when parsing a [`SemanticVersion`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum VersionError {
    /// The input does not match `MAJOR.MINOR.PATCH[-LABEL]`.
    #[error("invalid semantic version \"{input}\"")]
    Parse { input: String },
}

/// A `MAJOR.MINOR.PATCH[-LABEL]` version.
///
/// # Examples
///
/// ```
/// use explain_metadata::SemanticVersion;
///
/// let v: SemanticVersion = "1.2.3-rc_1".parse().unwrap();
/// assert_eq!(v.major(), 1);
/// assert_eq!(v.label(), Some("rc_1"));
/// assert_eq!(v.to_string(), "1.2.3-rc_1");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SemanticVersion {
    major: u64,
    minor: u64,
    patch: u64,
    label: Option<String>,
}

impl SemanticVersion {
    /// Create a version from its parts.
    ///
    /// # Errors
    ///
    /// Returns [`VersionError::Parse`] if `label` is empty or contains
    /// characters outside `[-0-9A-Za-z_]`.
    pub fn new(
        major: u64,
        minor: u64,
        patch: u64,
        label: Option<&str>,
    ) -> Result<Self, VersionError> {
        if let Some(l) = label {
            let valid = !l.is_empty()
                && l.chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
            if !valid {
                return Err(VersionError::Parse {
                    input: format!("{major}.{minor}.{patch}-{l}"),
                });
            }
        }
        Ok(Self {
            major,
            minor,
            patch,
            label: label.map(str::to_owned),
        })
    }

    /// Parse a version string.
    ///
    /// # Errors
    ///
    /// Returns [`VersionError::Parse`] on any deviation from the grammar,
    /// including empty input and numeric fields that overflow `u64`.
    pub fn parse(input: &str) -> Result<Self, VersionError> {
        let err = || VersionError::Parse {
            input: input.to_owned(),
        };
        let caps = VERSION_RE.captures(input).ok_or_else(err)?;
        let number = |i: usize| -> Result<u64, VersionError> {
            caps.get(i)
                .ok_or_else(err)?
                .as_str()
                .parse::<u64>()
                .map_err(|_| err())
        };
        Ok(Self {
            major: number(1)?,
            minor: number(2)?,
            patch: number(3)?,
            label: caps.get(4).map(|m| m.as_str().to_owned()),
        })
    }

    #[must_use]
    pub fn major(&self) -> u64 {
        self.major
    }

    #[must_use]
    pub fn minor(&self) -> u64 {
        self.minor
    }

    #[must_use]
    pub fn patch(&self) -> u64 {
        self.patch
    }

    #[must_use]
    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    /// The numeric triple used for ordering.
    #[must_use]
    pub fn precedence(&self) -> (u64, u64, u64) {
        (self.major, self.minor, self.patch)
    }

    /// Compare two versions by precedence, ignoring labels.
    ///
    /// ```
    /// use explain_metadata::SemanticVersion;
    /// use std::cmp::Ordering;
    ///
    /// let a = SemanticVersion::parse("1.0.0-alpha").unwrap();
    /// let b = SemanticVersion::parse("1.0.0").unwrap();
    /// assert_eq!(a.cmp_precedence(&b), Ordering::Equal);
    /// assert_ne!(a, b);
    /// ```
    #[must_use]
    pub fn cmp_precedence(&self, other: &Self) -> Ordering {
        self.precedence().cmp(&other.precedence())
    }
}

impl PartialOrd for SemanticVersion {
    /// Orders by precedence. Versions with the same triple but different
    /// labels are unordered.
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match self.cmp_precedence(other) {
            Ordering::Equal if self.label != other.label => None,
            ord => Some(ord),
        }
    }
}

impl FromStr for SemanticVersion {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for SemanticVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)?;
        if let Some(label) = &self.label {
            write!(f, "-{label}")?;
        }
        Ok(())
    }
}

impl Serialize for SemanticVersion {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for SemanticVersion {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn v(s: &str) -> SemanticVersion {
        SemanticVersion::parse(s).unwrap_or_else(|e| panic!("parse {s}: {e}"))
    }

    #[rstest]
    #[case("0.0.0", 0, 0, 0, None)]
    #[case("1.2.3", 1, 2, 3, None)]
    #[case("10.20.30-beta", 10, 20, 30, Some("beta"))]
    #[case("1.0.0-rc-1_x", 1, 0, 0, Some("rc-1_x"))]
    fn parses_valid(
        #[case] input: &str,
        #[case] major: u64,
        #[case] minor: u64,
        #[case] patch: u64,
        #[case] label: Option<&str>,
    ) {
        let parsed = v(input);
        assert_eq!(parsed.precedence(), (major, minor, patch));
        assert_eq!(parsed.label(), label);
        assert_eq!(parsed.to_string(), input);
    }

    #[rstest]
    #[case("")]
    #[case("1")]
    #[case("1.2")]
    #[case("01.2.3")]
    #[case("1.02.3")]
    #[case("1.2.03")]
    #[case("1.2.3-")]
    #[case("1.2.3-rc.1")]
    #[case("1.2.3 ")]
    #[case("v1.2.3")]
    #[case("99999999999999999999.0.0")]
    fn rejects_invalid(#[case] input: &str) {
        assert_eq!(
            SemanticVersion::parse(input),
            Err(VersionError::Parse {
                input: input.to_owned()
            })
        );
    }

    #[rstest]
    fn orders_by_triple() {
        assert!(v("1.2.3") < v("1.2.4"));
        assert!(v("1.10.0") > v("1.9.9"));
        assert!(v("2.0.0-a") > v("1.99.99-z"));
        assert_eq!(v("1.0.0-a").partial_cmp(&v("1.0.0-b")), None);
        assert_eq!(v("1.0.0-a").cmp_precedence(&v("1.0.0-b")), Ordering::Equal);
    }

    #[rstest]
    fn equality_includes_label() {
        assert_eq!(v("1.0.0-a"), v("1.0.0-a"));
        assert_ne!(v("1.0.0-a"), v("1.0.0"));
    }

    #[rstest]
    fn new_validates_label() {
        assert!(SemanticVersion::new(1, 0, 0, Some("ok_label")).is_ok());
        assert!(SemanticVersion::new(1, 0, 0, Some("")).is_err());
        assert!(SemanticVersion::new(1, 0, 0, Some("bad.label")).is_err());
    }

    #[rstest]
    fn serialises_as_string() {
        let json = serde_json::to_string(&v("3.1.4-pi"))
            .unwrap_or_else(|e| panic!("serialise version: {e}"));
        assert_eq!(json, "\"3.1.4-pi\"");
        let back: SemanticVersion =
            serde_json::from_str(&json).unwrap_or_else(|e| panic!("deserialise version: {e}"));
        assert_eq!(back, v("3.1.4-pi"));
        assert!(serde_json::from_str::<SemanticVersion>("\"1.2\"").is_err());
    }
}
