// src/transaction/problems.rs

//! Diagnostic accumulation for a transaction
//!
//! Problems are appended during check/order/run and never thrown; callers
//! decide what to do with them. A `ProblemFilter` mask suppresses chosen
//! categories from display and counting, but every record stays in the set
//! for programmatic inspection.

use crate::transaction::flags::ProblemFilter;
use serde::Serialize;
use std::fmt;

/// Category of a recorded problem
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProblemKind {
    /// A requirement no in-transaction or installed package satisfies
    RequiresUnresolved,
    /// Two packages cannot coexist
    Conflict,
    /// Not enough free blocks on a filesystem
    DiskSpace,
    /// Not enough free inodes on a filesystem
    DiskNodes,
    /// The package database misbehaved
    Database,
}

impl ProblemKind {
    /// The filter bit that suppresses this category
    pub fn filter_bit(&self) -> ProblemFilter {
        match self {
            ProblemKind::RequiresUnresolved => ProblemFilter::DEPENDENCIES,
            ProblemKind::Conflict => ProblemFilter::CONFLICTS,
            ProblemKind::DiskSpace => ProblemFilter::DISK_SPACE,
            ProblemKind::DiskNodes => ProblemFilter::DISK_NODES,
            ProblemKind::Database => ProblemFilter::DATABASE,
        }
    }
}

/// One diagnostic record
#[derive(Debug, Clone, Serialize)]
pub struct Problem {
    pub kind: ProblemKind,
    /// NEVRA of the element the problem belongs to
    pub package: String,
    pub detail: String,
}

impl Problem {
    pub fn new(kind: ProblemKind, package: &str, detail: String) -> Self {
        Self {
            kind,
            package: package.to_string(),
            detail,
        }
    }
}

impl fmt::Display for Problem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            ProblemKind::RequiresUnresolved => {
                write!(f, "{} is needed by {}", self.detail, self.package)
            }
            ProblemKind::Conflict => write!(f, "{} conflicts with {}", self.package, self.detail),
            ProblemKind::DiskSpace | ProblemKind::DiskNodes => {
                write!(f, "installing {} {}", self.package, self.detail)
            }
            ProblemKind::Database => write!(f, "database trouble for {}: {}", self.package, self.detail),
        }
    }
}

/// Ordered, append-only collection of problems
#[derive(Debug, Default, Serialize)]
pub struct ProblemSet {
    problems: Vec<Problem>,
}

impl ProblemSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one problem; records are never removed
    pub fn append(&mut self, problem: Problem) {
        self.problems.push(problem);
    }

    pub fn len(&self) -> usize {
        self.problems.len()
    }

    pub fn is_empty(&self) -> bool {
        self.problems.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Problem> {
        self.problems.iter()
    }

    /// Problems whose category the caller has not filtered out
    pub fn unfiltered<'a>(
        &'a self,
        ignore: ProblemFilter,
    ) -> impl Iterator<Item = &'a Problem> {
        self.problems
            .iter()
            .filter(move |p| !ignore.contains(p.kind.filter_bit()))
    }

    /// Count of problems the given mask does not suppress
    pub fn count_unfiltered(&self, ignore: ProblemFilter) -> usize {
        self.unfiltered(ignore).count()
    }

    pub(crate) fn clear(&mut self) {
        self.problems.clear();
    }
}
