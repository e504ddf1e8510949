// src/deps.rs

//! Dependency relations between packages
//!
//! A `Dependency` is one (name, range-sense, EVR) triple as it appears in a
//! package's Requires, Provides, Conflicts or Obsoletes set. Satisfaction is
//! range overlap: a provide satisfies a requirement when their version
//! ranges intersect under each side's comparison sense.

use crate::version::Evr;
use bitflags::bitflags;
use std::cmp::Ordering;
use std::fmt;

/// Which dependency set a relation belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DepKind {
    Requires,
    Provides,
    Conflicts,
    Obsoletes,
}

bitflags! {
    /// Range sense of a versioned dependency
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct DepFlags: u32 {
        const LESS    = 1 << 0;
        const GREATER = 1 << 1;
        const EQUAL   = 1 << 2;
    }
}

impl DepFlags {
    /// Parse a comparison operator as written in manifests
    pub fn from_op(op: &str) -> Option<Self> {
        match op {
            "<" => Some(DepFlags::LESS),
            "<=" => Some(DepFlags::LESS | DepFlags::EQUAL),
            "=" | "==" => Some(DepFlags::EQUAL),
            ">=" => Some(DepFlags::GREATER | DepFlags::EQUAL),
            ">" => Some(DepFlags::GREATER),
            _ => None,
        }
    }

    fn op_str(&self) -> &'static str {
        let lt = self.contains(DepFlags::LESS);
        let gt = self.contains(DepFlags::GREATER);
        let eq = self.contains(DepFlags::EQUAL);
        match (lt, gt, eq) {
            (true, _, true) => "<=",
            (true, _, false) => "<",
            (false, true, true) => ">=",
            (false, true, false) => ">",
            (false, false, true) => "=",
            (false, false, false) => "",
        }
    }
}

/// One dependency relation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dependency {
    pub name: String,
    pub kind: DepKind,
    pub flags: DepFlags,
    pub evr: Option<Evr>,
}

impl Dependency {
    /// An unversioned relation
    pub fn unversioned(name: &str, kind: DepKind) -> Self {
        Self {
            name: name.to_string(),
            kind,
            flags: DepFlags::empty(),
            evr: None,
        }
    }

    /// A versioned relation
    pub fn versioned(name: &str, kind: DepKind, flags: DepFlags, evr: Evr) -> Self {
        Self {
            name: name.to_string(),
            kind,
            flags,
            evr: Some(evr),
        }
    }

    /// Does this relation's version range overlap `other`'s?
    ///
    /// Names must match exactly. A relation without a version (or without a
    /// range sense) overlaps everything with the same name.
    pub fn overlaps(&self, other: &Dependency) -> bool {
        if self.name != other.name {
            return false;
        }

        let (a_evr, b_evr) = match (&self.evr, &other.evr) {
            (Some(a), Some(b)) => (a, b),
            _ => return true,
        };
        if self.flags.is_empty() || other.flags.is_empty() {
            return true;
        }

        match a_evr.cmp(b_evr) {
            Ordering::Less => {
                self.flags.contains(DepFlags::GREATER) || other.flags.contains(DepFlags::LESS)
            }
            Ordering::Greater => {
                self.flags.contains(DepFlags::LESS) || other.flags.contains(DepFlags::GREATER)
            }
            Ordering::Equal => {
                (self.flags & other.flags).intersects(
                    DepFlags::EQUAL | DepFlags::LESS | DepFlags::GREATER,
                )
            }
        }
    }

    /// Does the given provide satisfy this requirement?
    pub fn satisfied_by(&self, provide: &Dependency) -> bool {
        self.overlaps(provide)
    }
}

impl fmt::Display for Dependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.evr {
            Some(evr) if !self.flags.is_empty() => {
                write!(f, "{} {} {}", self.name, self.flags.op_str(), evr)
            }
            _ => write!(f, "{}", self.name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn req(name: &str, op: &str, evr: &str) -> Dependency {
        Dependency::versioned(
            name,
            DepKind::Requires,
            DepFlags::from_op(op).unwrap(),
            evr.parse().unwrap(),
        )
    }

    fn prov(name: &str, evr: &str) -> Dependency {
        Dependency::versioned(
            name,
            DepKind::Provides,
            DepFlags::EQUAL,
            evr.parse().unwrap(),
        )
    }

    #[test]
    fn test_name_mismatch_never_satisfies() {
        assert!(!req("libfoo", ">=", "1.0").satisfied_by(&prov("libbar", "2.0")));
    }

    #[test]
    fn test_unversioned_requirement_matches_any_provide() {
        let r = Dependency::unversioned("libfoo", DepKind::Requires);
        assert!(r.satisfied_by(&prov("libfoo", "0.1")));
        assert!(r.satisfied_by(&Dependency::unversioned("libfoo", DepKind::Provides)));
    }

    #[test]
    fn test_range_overlap() {
        assert!(req("libfoo", ">=", "1.0").satisfied_by(&prov("libfoo", "1.0")));
        assert!(req("libfoo", ">=", "1.0").satisfied_by(&prov("libfoo", "2.3")));
        assert!(!req("libfoo", ">=", "2.0").satisfied_by(&prov("libfoo", "1.9")));
        assert!(req("libfoo", "<", "2.0").satisfied_by(&prov("libfoo", "1.9")));
        assert!(!req("libfoo", "<", "2.0").satisfied_by(&prov("libfoo", "2.0")));
        assert!(req("libfoo", "=", "1.5-2").satisfied_by(&prov("libfoo", "1.5-2")));
        assert!(!req("libfoo", "=", "1.5-2").satisfied_by(&prov("libfoo", "1.5-3")));
    }

    #[test]
    fn test_op_parsing() {
        assert_eq!(
            DepFlags::from_op("<="),
            Some(DepFlags::LESS | DepFlags::EQUAL)
        );
        assert_eq!(DepFlags::from_op("=="), Some(DepFlags::EQUAL));
        assert_eq!(DepFlags::from_op("~>"), None);
    }

    #[test]
    fn test_display() {
        assert_eq!(req("libfoo", ">=", "1.0-1").to_string(), "libfoo >= 1.0-1");
        assert_eq!(
            Dependency::unversioned("libbar", DepKind::Requires).to_string(),
            "libbar"
        );
    }
}
