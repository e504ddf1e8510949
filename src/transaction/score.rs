// src/transaction/score.rs

//! Rollback scoring
//!
//! So install counters can be adjusted properly when an autorollback
//! transaction replays, a board indexed by package name records whether
//! each package was installed or erased by the running transaction. The
//! board is shared: the running transaction and the rollback transaction
//! generated from it hold the same board, and entries mutate only while
//! the plain running transaction executes, never during the replay
//! itself, which would double-count.

use crate::transaction::element::{Element, ElementKinds};
use std::cell::RefCell;
use std::rc::Rc;
use tracing::debug;

/// Per-package bookkeeping entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScoreEntry {
    pub name: String,
    /// Element types this entry represents
    pub kinds: ElementKinds,
    /// Was the new package installed?
    pub installed: bool,
    /// Was the old package removed?
    pub erased: bool,
}

/// Name-keyed, ordered collection of score entries
#[derive(Debug, Default)]
pub struct ScoreBoard {
    entries: Vec<ScoreEntry>,
}

/// Shared handle to a score board
///
/// Both transactions of a running/rollback pair hold one of these; the
/// board lives until the last handle drops.
pub type SharedScore = Rc<RefCell<ScoreBoard>>;

impl ScoreBoard {
    /// Build a board with one entry per package name in the given elements
    pub fn from_elements<'a>(elements: impl Iterator<Item = &'a Element>) -> Self {
        let mut board = ScoreBoard::default();
        for element in elements {
            match board.position(element.name()) {
                Ok(ix) => board.entries[ix].kinds |= element.kind.bit(),
                Err(ix) => board.entries.insert(
                    ix,
                    ScoreEntry {
                        name: element.name().to_string(),
                        kinds: element.kind.bit(),
                        installed: false,
                        erased: false,
                    },
                ),
            }
        }
        board
    }

    /// Look up the entry for a package name
    pub fn entry(&self, name: &str) -> Option<&ScoreEntry> {
        self.position(name).ok().map(|ix| &self.entries[ix])
    }

    /// Record that the named package's new header was installed
    pub fn mark_installed(&mut self, name: &str) {
        if let Ok(ix) = self.position(name) {
            debug!("score: {} installed", name);
            self.entries[ix].installed = true;
        }
    }

    /// Record that the named package's old header was removed
    pub fn mark_erased(&mut self, name: &str) {
        if let Ok(ix) = self.position(name) {
            debug!("score: {} erased", name);
            self.entries[ix].erased = true;
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ScoreEntry> {
        self.entries.iter()
    }

    fn position(&self, name: &str) -> std::result::Result<usize, usize> {
        self.entries.binary_search_by(|e| e.name.as_str().cmp(name))
    }
}
