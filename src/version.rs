// src/version.rs

//! Package version identities (EVR) and their ordering
//!
//! An EVR is the epoch-version-release triple that orders package
//! revisions. Comparison is segment-based: version strings are split into
//! alternating numeric and alphabetic runs, numeric runs compare as
//! numbers, and a tilde segment sorts before anything else (used for
//! pre-release revisions).

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// Epoch-Version-Release package identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Evr {
    #[serde(default)]
    pub epoch: u32,
    pub version: String,
    #[serde(default)]
    pub release: String,
}

impl Evr {
    /// Create a new EVR
    pub fn new(epoch: u32, version: &str, release: &str) -> Self {
        Self {
            epoch,
            version: version.to_string(),
            release: release.to_string(),
        }
    }
}

impl FromStr for Evr {
    type Err = Error;

    /// Parse an `[epoch:]version[-release]` string
    fn from_str(s: &str) -> Result<Self> {
        if s.is_empty() {
            return Err(Error::InvalidVersion("empty version string".to_string()));
        }

        let (epoch, rest) = match s.split_once(':') {
            Some((e, rest)) => {
                let epoch = e
                    .parse::<u32>()
                    .map_err(|_| Error::InvalidVersion(format!("bad epoch in '{}'", s)))?;
                (epoch, rest)
            }
            None => (0, s),
        };

        // The release is everything after the last dash; version strings
        // themselves never contain dashes in this scheme.
        let (version, release) = match rest.rsplit_once('-') {
            Some((v, r)) => (v, r),
            None => (rest, ""),
        };

        if version.is_empty() {
            return Err(Error::InvalidVersion(format!("no version in '{}'", s)));
        }

        Ok(Evr {
            epoch,
            version: version.to_string(),
            release: release.to_string(),
        })
    }
}

impl fmt::Display for Evr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.epoch != 0 {
            write!(f, "{}:", self.epoch)?;
        }
        write!(f, "{}", self.version)?;
        if !self.release.is_empty() {
            write!(f, "-{}", self.release)?;
        }
        Ok(())
    }
}

impl Ord for Evr {
    fn cmp(&self, other: &Self) -> Ordering {
        self.epoch
            .cmp(&other.epoch)
            .then_with(|| segment_compare(&self.version, &other.version))
            .then_with(|| segment_compare(&self.release, &other.release))
    }
}

impl PartialOrd for Evr {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Full package identity: name, EVR and optional architecture
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageId {
    pub name: String,
    pub evr: Evr,
    pub arch: Option<String>,
}

impl PackageId {
    pub fn new(name: &str, evr: Evr, arch: Option<&str>) -> Self {
        Self {
            name: name.to_string(),
            evr,
            arch: arch.map(|a| a.to_string()),
        }
    }

    /// Name-epoch:version-release string
    pub fn nevr(&self) -> String {
        format!("{}-{}", self.name, self.evr)
    }

    /// Name-epoch:version-release.arch string
    pub fn nevra(&self) -> String {
        match &self.arch {
            Some(arch) => format!("{}-{}.{}", self.name, self.evr, arch),
            None => self.nevr(),
        }
    }
}

impl fmt::Display for PackageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.nevra())
    }
}

/// Compare two version fragments segment by segment
pub fn segment_compare(a: &str, b: &str) -> Ordering {
    let mut a = a.as_bytes();
    let mut b = b.as_bytes();

    loop {
        // Tilde sorts before everything, including the end of the string
        let a_tilde = a.first() == Some(&b'~');
        let b_tilde = b.first() == Some(&b'~');
        match (a_tilde, b_tilde) {
            (true, true) => {
                a = &a[1..];
                b = &b[1..];
                continue;
            }
            (true, false) => return Ordering::Less,
            (false, true) => return Ordering::Greater,
            (false, false) => {}
        }

        // Skip separators that carry no ordering weight
        while let Some(c) = a.first() {
            if c.is_ascii_alphanumeric() || *c == b'~' {
                break;
            }
            a = &a[1..];
        }
        while let Some(c) = b.first() {
            if c.is_ascii_alphanumeric() || *c == b'~' {
                break;
            }
            b = &b[1..];
        }

        if a.is_empty() || b.is_empty() {
            return a.len().cmp(&b.len());
        }
        if a.first() == Some(&b'~') || b.first() == Some(&b'~') {
            continue;
        }

        let a_digits = a[0].is_ascii_digit();
        let b_digits = b[0].is_ascii_digit();

        // Numeric segments always outrank alphabetic ones
        if a_digits != b_digits {
            return if a_digits {
                Ordering::Greater
            } else {
                Ordering::Less
            };
        }

        let split = |s: &[u8], digits: bool| {
            s.iter()
                .position(|c| {
                    if digits {
                        !c.is_ascii_digit()
                    } else {
                        !c.is_ascii_alphabetic()
                    }
                })
                .unwrap_or(s.len())
        };

        let a_len = split(a, a_digits);
        let b_len = split(b, b_digits);
        let (a_seg, b_seg) = (&a[..a_len], &b[..b_len]);

        let ord = if a_digits {
            let a_num = trim_leading_zeros(a_seg);
            let b_num = trim_leading_zeros(b_seg);
            a_num
                .len()
                .cmp(&b_num.len())
                .then_with(|| a_num.cmp(b_num))
        } else {
            a_seg.cmp(b_seg)
        };

        if ord != Ordering::Equal {
            return ord;
        }

        a = &a[a_len..];
        b = &b[b_len..];
    }
}

fn trim_leading_zeros(s: &[u8]) -> &[u8] {
    let start = s.iter().position(|c| *c != b'0').unwrap_or(s.len());
    &s[start..]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn evr(s: &str) -> Evr {
        s.parse().unwrap()
    }

    #[test]
    fn test_parse_full() {
        let v = evr("2:1.4.0-3.el9");
        assert_eq!(v.epoch, 2);
        assert_eq!(v.version, "1.4.0");
        assert_eq!(v.release, "3.el9");
    }

    #[test]
    fn test_parse_without_epoch_or_release() {
        let v = evr("1.4.0");
        assert_eq!(v.epoch, 0);
        assert_eq!(v.version, "1.4.0");
        assert_eq!(v.release, "");
    }

    #[test]
    fn test_parse_release_uses_last_dash() {
        let v = evr("1.0-2-3");
        assert_eq!(v.version, "1.0-2");
        assert_eq!(v.release, "3");
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!("".parse::<Evr>().is_err());
        assert!("x:1.0".parse::<Evr>().is_err());
    }

    #[test]
    fn test_numeric_ordering() {
        assert!(evr("1.10") > evr("1.9"));
        assert!(evr("1.05") == evr("1.5"));
        assert!(evr("2.0") > evr("1.99.99"));
    }

    #[test]
    fn test_alpha_vs_numeric() {
        // A numeric segment outranks an alphabetic one
        assert!(evr("1.0") > evr("1.a"));
        assert!(evr("1.abc") < evr("1.1"));
    }

    #[test]
    fn test_tilde_sorts_first() {
        assert!(evr("1.0~rc1") < evr("1.0"));
        assert!(evr("1.0~rc1") < evr("1.0~rc2"));
        assert!(evr("1.0~~") < evr("1.0~"));
    }

    #[test]
    fn test_epoch_dominates() {
        assert!(evr("1:0.5-1") > evr("9.9-9"));
    }

    #[test]
    fn test_release_breaks_ties() {
        assert!(evr("1.0-2") > evr("1.0-1"));
        assert_eq!(evr("1.0-1"), evr("1.0-1"));
    }

    #[test]
    fn test_display_round_trip() {
        assert_eq!(evr("2:1.4-3").to_string(), "2:1.4-3");
        assert_eq!(evr("1.4").to_string(), "1.4");
    }

    #[test]
    fn test_nevra_rendering() {
        let id = PackageId::new("bash", evr("5.2.15-3"), Some("x86_64"));
        assert_eq!(id.nevr(), "bash-5.2.15-3");
        assert_eq!(id.nevra(), "bash-5.2.15-3.x86_64");

        let noarch = PackageId::new("filesystem", evr("3.18-1"), None);
        assert_eq!(noarch.nevra(), "filesystem-3.18-1");
    }
}
