//! Store format version comparison.

use crate::error::{EngineError, EngineResult};
use serde::Serialize;
use std::cmp::Ordering;
use std::fmt;

/// A `major.minor.patch` version. A leading `v` and any pre-release or
/// build suffix are accepted and ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct Version {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
}

impl Version {
    pub fn parse(s: &str) -> EngineResult<Self> {
        let trimmed = s.trim();
        let core = trimmed.strip_prefix('v').unwrap_or(trimmed);
        let core = core.split(['-', '+']).next().unwrap_or(core);

        let mut parts = core.split('.');
        let mut next = |name: &str| -> EngineResult<u64> {
            match parts.next() {
                None => Ok(0),
                Some(p) => p.parse().map_err(|_| {
                    EngineError::invalid_value(
                        "version",
                        &format!("Invalid {} component '{}' in version '{}'", name, p, s),
                    )
                }),
            }
        };
        let major = next("major")?;
        let minor = next("minor")?;
        let patch = next("patch")?;
        if parts.next().is_some() {
            return Err(EngineError::invalid_value(
                "version",
                &format!("Version '{}' has more than three components", s),
            ));
        }
        Ok(Self {
            major,
            minor,
            patch,
        })
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Most significant component that differs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VersionChange {
    Major,
    Minor,
    Patch,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionComparison {
    /// `a` relative to `b`.
    #[serde(serialize_with = "serialize_ordering")]
    pub ordering: Ordering,
    pub change: VersionChange,
    /// A major difference, or a minor one below 1.0.0.
    pub breaking: bool,
}

fn serialize_ordering<S: serde::Serializer>(ordering: &Ordering, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_i8(*ordering as i8)
}

/// Compare two version strings.
pub fn compare_versions(a: &str, b: &str) -> EngineResult<VersionComparison> {
    let a = Version::parse(a)?;
    let b = Version::parse(b)?;

    let change = if a.major != b.major {
        VersionChange::Major
    } else if a.minor != b.minor {
        VersionChange::Minor
    } else if a.patch != b.patch {
        VersionChange::Patch
    } else {
        VersionChange::None
    };
    let breaking = match change {
        VersionChange::Major => true,
        VersionChange::Minor => a.major == 0,
        _ => false,
    };

    Ok(VersionComparison {
        ordering: a.cmp(&b),
        change,
        breaking,
    })
}

/// Whether a document written as `other` can be read by an engine at
/// `current`: same major version, and same minor while below 1.0.0.
/// Unparsable versions are incompatible.
pub fn is_compatible(current: &str, other: &str) -> bool {
    compare_versions(current, other)
        .map(|c| !c.breaking)
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn major_difference_is_breaking() {
        let cmp = compare_versions("2.0.0", "1.5.0").unwrap();
        assert_eq!(cmp.ordering, Ordering::Greater);
        assert_eq!(cmp.change, VersionChange::Major);
        assert!(cmp.breaking);
    }

    #[test]
    fn compatibility_follows_major() {
        assert!(is_compatible("1.2.3", "1.9.0"));
        assert!(!is_compatible("1.2.3", "2.0.0"));
        assert!(is_compatible("1.0.0", "1.0.0"));
    }

    #[test]
    fn zero_major_minor_bump_is_breaking() {
        assert!(!is_compatible("0.3.0", "0.4.0"));
        assert!(is_compatible("0.3.0", "0.3.9"));
    }

    #[test]
    fn lenient_parsing() {
        assert_eq!(
            Version::parse("v1.2").unwrap(),
            Version {
                major: 1,
                minor: 2,
                patch: 0
            }
        );
        assert_eq!(Version::parse("1.2.3-beta.1").unwrap().patch, 3);
        assert!(Version::parse("1.x.0").is_err());
        assert!(Version::parse("1.2.3.4").is_err());
        assert!(!is_compatible("garbage", "1.0.0"));
    }

    #[test]
    fn patch_ordering() {
        let cmp = compare_versions("1.0.1", "1.0.2").unwrap();
        assert_eq!(cmp.ordering, Ordering::Less);
        assert_eq!(cmp.change, VersionChange::Patch);
        assert!(!cmp.breaking);
    }
}
