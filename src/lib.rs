// src/lib.rs

//! Tessera Package Transaction Engine
//!
//! Coordination layer for multi-package atomic operations: assembles a set
//! of install/erase elements, checks their inter-package dependencies,
//! computes a safe execution order, tracks disk-space admissibility, and
//! scores package state so install counters stay consistent across a
//! running transaction and its paired rollback transaction.
//!
//! # Architecture
//!
//! - Transaction set: reference-style aggregate owning elements, order,
//!   problems, disk-space snapshot and database handles
//! - Ordering: explicit dependency graph, depth-first topological sort
//!   with deterministic cycle breaking
//! - Scoring: per-package install/erase bookkeeping shared between a
//!   running transaction and its rollback twin
//! - Narrow seams: package headers, the package database, the dependency
//!   solver and the progress notifier are capabilities injected by callers

pub mod db;
pub mod deps;
mod error;
pub mod packages;
pub mod transaction;
pub mod version;

pub use error::{Error, Result};
pub use transaction::TransactionSet;
