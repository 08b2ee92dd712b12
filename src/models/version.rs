//! Framework version parsing and comparison
//!
//! Versions are compared numerically component by component, so `1.10`
//! sorts after `1.9`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Version parsing errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VersionError {
    #[error("Empty version string")]
    Empty,

    #[error("Malformed version '{0}'")]
    Malformed(String),

    #[error("Version '{0}' has more than three numeric components")]
    TooManyComponents(String),
}

/// A `major.minor.patch` framework version
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FrameworkVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl FrameworkVersion {
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// Strict semantic less-than
    pub fn is_below(&self, threshold: &FrameworkVersion) -> bool {
        self < threshold
    }

    /// Whether this version matches `prefix` on every component the prefix names
    ///
    /// `1.11` matches `1.11.0` and `1.11.3`, but not `1.1` or `1.12`.
    pub fn matches_prefix(&self, prefix: &str) -> Result<bool, VersionError> {
        let parts = numeric_parts(prefix)?;
        let mine = [self.major, self.minor, self.patch];
        Ok(parts.iter().zip(mine.iter()).all(|(a, b)| a == b))
    }
}

impl FromStr for FrameworkVersion {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts = numeric_parts(s)?;
        Ok(Self {
            major: parts[0],
            minor: parts.get(1).copied().unwrap_or(0),
            patch: parts.get(2).copied().unwrap_or(0),
        })
    }
}

impl fmt::Display for FrameworkVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Split a version into its numeric components.
///
/// A pre-release tail (`-rc1`, `a0`, `.post1`) is only accepted after the
/// last numeric component. Empty components are malformed.
fn numeric_parts(s: &str) -> Result<Vec<u32>, VersionError> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        return Err(VersionError::Empty);
    }

    let malformed = || VersionError::Malformed(s.to_string());
    let core = trimmed.split(['-', '+']).next().unwrap_or(trimmed);
    let components: Vec<&str> = core.split('.').collect();

    let mut parts = Vec::new();
    for (index, component) in components.iter().enumerate() {
        let is_last = index + 1 == components.len();
        let digits: String = component
            .chars()
            .take_while(|c| c.is_ascii_digit())
            .collect();

        if digits.is_empty() {
            // "1.8.post1" style suffix ends the numeric part
            if parts.is_empty() || !is_last || component.is_empty() {
                return Err(malformed());
            }
            break;
        }

        if digits.len() != component.len() && !is_last {
            return Err(malformed());
        }

        let value = digits.parse::<u32>().map_err(|_| malformed())?;
        parts.push(value);
    }

    if parts.len() > 3 {
        return Err(VersionError::TooManyComponents(s.to_string()));
    }

    Ok(parts)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &str) -> FrameworkVersion {
        s.parse().unwrap()
    }

    #[test]
    fn test_parse_versions() {
        assert_eq!(v("1.8.1"), FrameworkVersion::new(1, 8, 1));
        assert_eq!(v("1.6"), FrameworkVersion::new(1, 6, 0));
        assert_eq!(v("2"), FrameworkVersion::new(2, 0, 0));
        assert_eq!(v("1.13.0-rc1"), FrameworkVersion::new(1, 13, 0));
        assert_eq!(v("2.0.1a0"), FrameworkVersion::new(2, 0, 1));
    }

    #[test]
    fn test_numeric_not_lexicographic() {
        assert!(v("1.9").is_below(&v("1.10")));
        assert!(!v("1.10").is_below(&v("1.9")));
        assert!(v("1.5.1").is_below(&v("1.6")));
        assert!(!v("1.6.0").is_below(&v("1.6")));
    }

    #[test]
    fn test_malformed_versions() {
        assert_eq!("".parse::<FrameworkVersion>(), Err(VersionError::Empty));
        assert!(matches!(
            "latest".parse::<FrameworkVersion>(),
            Err(VersionError::Malformed(_))
        ));
        assert!(matches!(
            "1.2.3.4".parse::<FrameworkVersion>(),
            Err(VersionError::TooManyComponents(_))
        ));
    }

    #[test]
    fn test_empty_or_interior_tail_components_rejected() {
        for bad in ["1..6", "1.", ".6", "1.6x.9", "1.post1.2"] {
            assert_eq!(
                bad.parse::<FrameworkVersion>(),
                Err(VersionError::Malformed(bad.to_string())),
                "{bad} should not parse"
            );
        }
        assert_eq!(v("1.8.post1"), FrameworkVersion::new(1, 8, 0));
        assert!(v("1.11.0").matches_prefix("1..11").is_err());
    }

    #[test]
    fn test_matches_prefix() {
        assert!(v("1.11.0").matches_prefix("1.11").unwrap());
        assert!(!v("1.1.0").matches_prefix("1.11").unwrap());
        assert!(!v("1.12.1").matches_prefix("1.11").unwrap());
    }
}
