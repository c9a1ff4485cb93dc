//! Release version parsing and ordering
//!
//! Versions look like `package@1.2.3-beta+456`. Missing numeric parts count
//! as zero, and a release without a prerelease tag sorts after the same
//! version with one.

use std::cmp::Ordering;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseVersion {
    pub package: Option<String>,
    pub numbers: [u64; 4],
    pub prerelease: Option<String>,
    pub build: Option<String>,
}

impl ReleaseVersion {
    /// Parse a release string. Returns `None` when the version part is not
    /// dotted numbers.
    pub fn parse(raw: &str) -> Option<Self> {
        let (package, rest) = match raw.rsplit_once('@') {
            Some((package, rest)) => (Some(package.to_string()), rest),
            None => (None, raw),
        };
        let (rest, build) = match rest.split_once('+') {
            Some((rest, build)) => (rest, Some(build.to_string())),
            None => (rest, None),
        };
        let (core, prerelease) = match rest.split_once('-') {
            Some((core, pre)) => (core, Some(pre.to_string())),
            None => (rest, None),
        };

        let mut numbers = [0u64; 4];
        let parts: Vec<&str> = core.split('.').collect();
        if parts.is_empty() || parts.len() > 4 {
            return None;
        }
        for (slot, part) in numbers.iter_mut().zip(parts) {
            *slot = part.parse().ok()?;
        }

        Some(Self {
            package,
            numbers,
            prerelease,
            build,
        })
    }

    /// Numeric build code, when the build metadata is a plain integer.
    pub fn build_code(&self) -> Option<u64> {
        self.build.as_deref().and_then(|b| b.parse().ok())
    }
}

impl PartialOrd for ReleaseVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ReleaseVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        self.numbers
            .cmp(&other.numbers)
            .then_with(|| match (&self.prerelease, &other.prerelease) {
                (None, None) => Ordering::Equal,
                (None, Some(_)) => Ordering::Greater,
                (Some(_), None) => Ordering::Less,
                (Some(a), Some(b)) => a.cmp(b),
            })
            .then_with(|| self.build_code().cmp(&other.build_code()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full() {
        let v = ReleaseVersion::parse("app@1.2.3-beta+456").unwrap();
        assert_eq!(v.package.as_deref(), Some("app"));
        assert_eq!(v.numbers, [1, 2, 3, 0]);
        assert_eq!(v.prerelease.as_deref(), Some("beta"));
        assert_eq!(v.build_code(), Some(456));
    }

    #[test]
    fn test_ordering() {
        let parse = |s| ReleaseVersion::parse(s).unwrap();
        assert!(parse("1.2.3") > parse("1.2.3-rc1"));
        assert!(parse("1.10") > parse("1.9.9"));
        assert_eq!(parse("1.2").cmp(&parse("1.2.0.0")), Ordering::Equal);
    }

    #[test]
    fn test_rejects_non_numeric() {
        assert!(ReleaseVersion::parse("latest").is_none());
        assert!(ReleaseVersion::parse("1.x").is_none());
    }
}
