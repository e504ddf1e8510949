// src/transaction/mod.rs

//! The transaction set: the aggregate coordinating one atomic
//! multi-package operation
//!
//! Lifecycle: create, admit elements, check dependencies, order, run.
//! A set can be emptied (elements discarded, configuration kept) or
//! cleaned (check/order scratch discarded, committed state kept) between
//! uses; databases close exactly once, at final teardown.

pub mod check;
pub mod diskspace;
pub mod element;
pub mod flags;
pub mod notify;
pub mod order;
pub mod problems;
pub mod score;
pub mod timers;

pub use check::{SolveDisposition, Solver};
pub use diskspace::{
    DiskSpace, FileAction, FilesystemStats, FixedMounts, MountProvider, SystemMounts,
};
pub use element::{Element, ElementKind};
pub use flags::{ProblemFilter, TransFlags, VerifyFlags};
pub use notify::{CallbackKind, Notify, Token};
pub use problems::{Problem, ProblemKind, ProblemSet};
pub use score::{ScoreBoard, ScoreEntry, SharedScore};
pub use timers::{OpKind, OpTimer, OpTimers};

use crate::db::{DbMode, DbTag, MatchIterator, PackageDb};
use crate::error::{Error, Result};
use crate::packages::traits::PackageHeader;
use chrono::Utc;
use std::cell::RefCell;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Transaction type: normal, or one of the rollback replays
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TsType {
    #[default]
    Normal,
    Rollback,
    Autorollback,
}

impl TsType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TsType::Normal => "normal",
            TsType::Rollback => "rollback",
            TsType::Autorollback => "autorollback",
        }
    }
}

/// What the caller is trying to accomplish
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TsGoal {
    #[default]
    Unknown,
    Install,
    Erase,
}

impl TsGoal {
    pub fn as_str(&self) -> &'static str {
        match self {
            TsGoal::Unknown => "unknown",
            TsGoal::Install => "install",
            TsGoal::Erase => "erase",
        }
    }
}

/// The set of packages to be installed/removed atomically
pub struct TransactionSet {
    // Identity
    tid: i64,
    ts_type: TsType,
    goal: TsGoal,

    // Configuration
    flags: TransFlags,
    verify_flags: VerifyFlags,
    filter: ProblemFilter,
    root_dir: PathBuf,
    curr_dir: Option<PathBuf>,
    chroot_done: bool,
    script_output: Option<PathBuf>,
    color: u32,
    pref_color: u32,
    recipe: Option<Box<dyn std::any::Any>>,

    // Databases
    db_path: Option<PathBuf>,
    db_mode: DbMode,
    solve_db_path: Option<PathBuf>,
    solve_db_mode: DbMode,
    lazy_open: bool,
    rdb: Option<PackageDb>,
    sdb: Option<PackageDb>,

    // Elements: one arena, with admission-ordered views per kind
    elements: Vec<Element>,
    added: Vec<usize>,
    removed: Vec<usize>,

    // Ordering results
    order: Vec<usize>,
    unordered_successors: usize,
    ntrees: usize,
    max_depth: usize,

    // Check/order scratch
    universe: Vec<Element>,
    suggests: Vec<String>,

    // Diagnostics and callbacks
    problems: ProblemSet,
    dsi: Option<DiskSpace>,
    mounts: Box<dyn MountProvider>,
    score: Option<SharedScore>,
    notify: Option<Box<dyn Notify>>,
    solver: Option<Box<dyn Solver>>,
    timers: OpTimers,
}

impl TransactionSet {
    /// Create an empty transaction set
    ///
    /// The transaction id is stamped from the clock; everything else
    /// starts at its defaults.
    pub fn create() -> Self {
        Self {
            tid: Utc::now().timestamp(),
            ts_type: TsType::default(),
            goal: TsGoal::default(),
            flags: TransFlags::default(),
            verify_flags: VerifyFlags::default(),
            filter: ProblemFilter::default(),
            root_dir: PathBuf::from("/"),
            curr_dir: None,
            chroot_done: false,
            script_output: None,
            color: 0,
            pref_color: 0,
            recipe: None,
            db_path: None,
            db_mode: DbMode::ReadWrite,
            solve_db_path: None,
            solve_db_mode: DbMode::ReadOnly,
            lazy_open: true,
            rdb: None,
            sdb: None,
            elements: Vec::new(),
            added: Vec::new(),
            removed: Vec::new(),
            order: Vec::new(),
            unordered_successors: 0,
            ntrees: 0,
            max_depth: 0,
            universe: Vec::new(),
            suggests: Vec::new(),
            problems: ProblemSet::new(),
            dsi: None,
            mounts: Box::new(SystemMounts),
            score: None,
            notify: None,
            solver: None,
            timers: OpTimers::new(),
        }
    }

    // ---- configuration accessors; setters return the previous value ----

    pub fn tid(&self) -> i64 {
        self.tid
    }

    pub fn set_tid(&mut self, tid: i64) -> i64 {
        std::mem::replace(&mut self.tid, tid)
    }

    pub fn ts_type(&self) -> TsType {
        self.ts_type
    }

    pub fn set_type(&mut self, ts_type: TsType) -> TsType {
        std::mem::replace(&mut self.ts_type, ts_type)
    }

    pub fn goal(&self) -> TsGoal {
        self.goal
    }

    pub fn set_goal(&mut self, goal: TsGoal) -> TsGoal {
        std::mem::replace(&mut self.goal, goal)
    }

    pub fn flags(&self) -> TransFlags {
        self.flags
    }

    pub fn set_flags(&mut self, flags: TransFlags) -> TransFlags {
        std::mem::replace(&mut self.flags, flags)
    }

    pub fn verify_flags(&self) -> VerifyFlags {
        self.verify_flags
    }

    pub fn set_verify_flags(&mut self, flags: VerifyFlags) -> VerifyFlags {
        std::mem::replace(&mut self.verify_flags, flags)
    }

    pub fn filter(&self) -> ProblemFilter {
        self.filter
    }

    pub fn set_filter(&mut self, filter: ProblemFilter) -> ProblemFilter {
        std::mem::replace(&mut self.filter, filter)
    }

    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    pub fn set_root_dir(&mut self, root: &Path) -> PathBuf {
        std::mem::replace(&mut self.root_dir, root.to_path_buf())
    }

    pub fn curr_dir(&self) -> Option<&Path> {
        self.curr_dir.as_deref()
    }

    pub fn set_curr_dir(&mut self, dir: Option<&Path>) -> Option<PathBuf> {
        std::mem::replace(&mut self.curr_dir, dir.map(|d| d.to_path_buf()))
    }

    pub fn chroot_done(&self) -> bool {
        self.chroot_done
    }

    pub fn set_chroot_done(&mut self, done: bool) -> bool {
        std::mem::replace(&mut self.chroot_done, done)
    }

    pub fn script_output(&self) -> Option<&Path> {
        self.script_output.as_deref()
    }

    pub fn set_script_output(&mut self, path: Option<&Path>) -> Option<PathBuf> {
        std::mem::replace(&mut self.script_output, path.map(|p| p.to_path_buf()))
    }

    pub fn color(&self) -> u32 {
        self.color
    }

    pub fn set_color(&mut self, color: u32) -> u32 {
        std::mem::replace(&mut self.color, color)
    }

    pub fn pref_color(&self) -> u32 {
        self.pref_color
    }

    pub fn set_pref_color(&mut self, color: u32) -> u32 {
        std::mem::replace(&mut self.pref_color, color)
    }

    /// Opaque build-recipe handle some callers attach to a transaction;
    /// the engine only carries it
    pub fn recipe(&self) -> Option<&dyn std::any::Any> {
        self.recipe.as_deref()
    }

    pub fn set_recipe(
        &mut self,
        recipe: Option<Box<dyn std::any::Any>>,
    ) -> Option<Box<dyn std::any::Any>> {
        std::mem::replace(&mut self.recipe, recipe)
    }

    pub fn set_notify(&mut self, notify: Box<dyn Notify>) -> Option<Box<dyn Notify>> {
        std::mem::replace(&mut self.notify, Some(notify))
    }

    pub fn set_solver(&mut self, solver: Box<dyn Solver>) -> Option<Box<dyn Solver>> {
        std::mem::replace(&mut self.solver, Some(solver))
    }

    /// Replace the mount-table source used for disk-space snapshots
    pub fn set_mounts(&mut self, mounts: Box<dyn MountProvider>) {
        self.mounts = mounts;
    }

    pub fn op(&self, kind: OpKind) -> OpTimer {
        self.timers.op(kind)
    }

    // ---- database plumbing ----

    pub fn set_db_path(&mut self, path: &Path) -> Option<PathBuf> {
        std::mem::replace(&mut self.db_path, Some(path.to_path_buf()))
    }

    pub fn set_solve_db_path(&mut self, path: &Path) -> Option<PathBuf> {
        std::mem::replace(&mut self.solve_db_path, Some(path.to_path_buf()))
    }

    pub fn db_mode(&self) -> Option<DbMode> {
        if self.lazy_open { Some(self.db_mode) } else { None }
    }

    /// Set the install database mode, or disable lazy opens entirely.
    /// Only permitted while the database is not yet open.
    pub fn set_db_mode(&mut self, mode: Option<DbMode>) -> Result<()> {
        if self.rdb.is_some() {
            return Err(Error::InitError(
                "cannot change database mode while the database is open".to_string(),
            ));
        }
        match mode {
            Some(mode) => {
                self.db_mode = mode;
                self.lazy_open = true;
            }
            None => self.lazy_open = false,
        }
        Ok(())
    }

    /// Open the install database now
    pub fn open_db(&mut self, mode: DbMode) -> Result<()> {
        if self.rdb.is_some() {
            return Ok(());
        }
        let path = self.require_db_path()?;
        self.rdb = Some(open_or_init(&path, mode)?);
        self.db_mode = mode;
        Ok(())
    }

    /// Create the install database and its schema
    pub fn init_db(&mut self, mode: DbMode) -> Result<()> {
        let path = self.require_db_path()?;
        self.rdb = Some(PackageDb::init(&path, mode)?);
        self.db_mode = mode;
        Ok(())
    }

    /// Close the install database, if open
    pub fn close_db(&mut self) -> Result<()> {
        match self.rdb.take() {
            Some(db) => db.close(),
            None => Ok(()),
        }
    }

    /// Rebuild the install database's storage
    pub fn rebuild_db(&mut self) -> Result<()> {
        self.rdb()?.rebuild()
    }

    /// Verify the install database's integrity
    pub fn verify_db(&mut self) -> Result<bool> {
        self.rdb()?.verify()
    }

    /// Keyed iteration over the install database
    pub fn db_iterate(&mut self, tag: DbTag, key: &str) -> Result<MatchIterator> {
        self.rdb()?.iterate(tag, key)
    }

    /// Open the solve database now
    pub fn open_sdb(&mut self, mode: DbMode) -> Result<()> {
        if self.sdb.is_some() {
            return Ok(());
        }
        let Some(path) = self.solve_db_path.clone() else {
            return Err(Error::InitError("no solve database configured".to_string()));
        };
        self.sdb = Some(open_or_init(&path, mode)?);
        self.solve_db_mode = mode;
        Ok(())
    }

    /// Close the solve database, if open
    pub fn close_sdb(&mut self) -> Result<()> {
        match self.sdb.take() {
            Some(db) => db.close(),
            None => Ok(()),
        }
    }

    /// The install database handle, opened lazily unless disabled
    pub fn rdb(&mut self) -> Result<&PackageDb> {
        if self.rdb.is_none() {
            if !self.lazy_open {
                return Err(Error::InitError(
                    "database not open and lazy opens are disabled".to_string(),
                ));
            }
            self.open_db(self.db_mode)?;
        }
        Ok(self.rdb.as_ref().expect("database opened above"))
    }

    /// The solve database handle, if one is configured
    pub fn sdb(&mut self) -> Result<Option<&PackageDb>> {
        if self.sdb.is_none() && self.solve_db_path.is_some() && self.lazy_open {
            self.open_sdb(self.solve_db_mode)?;
        }
        Ok(self.sdb.as_ref())
    }

    fn require_db_path(&self) -> Result<PathBuf> {
        self.db_path
            .clone()
            .ok_or_else(|| Error::InitError("no database path configured".to_string()))
    }

    // ---- element admission ----

    /// Add a package to be installed
    ///
    /// Duplicate names are not kept: if an element with the same name is
    /// already admitted, the one with the newer EVR wins, replacing the
    /// older in place. With `upgrade`, erase elements for the installed
    /// instances of the same name are generated and pinned to follow this
    /// install. Nothing is admitted if the call fails.
    pub fn add_install(
        &mut self,
        header: &dyn PackageHeader,
        key: Option<&str>,
        upgrade: bool,
    ) -> Result<()> {
        self.add_install_relocated(header, key, upgrade, &[])
    }

    /// `add_install`, with file paths rewritten through relocations
    pub fn add_install_relocated(
        &mut self,
        header: &dyn PackageHeader,
        key: Option<&str>,
        upgrade: bool,
        relocations: &[crate::packages::Relocation],
    ) -> Result<()> {
        if let Some(capability) = element::unsupported_capability(header) {
            return Err(Error::NeedsCapabilities(capability));
        }

        let duplicate = self
            .added
            .iter()
            .copied()
            .find(|slot| self.elements[*slot].name() == header.name());

        // Everything fallible happens before any state changes
        let mut erase_headers = Vec::new();
        if upgrade && duplicate.is_none() && self.db_path.is_some() {
            let stored = {
                let db = self.rdb()?;
                let records =
                    crate::db::models::PackageRecord::find_by_name(db.conn(), header.name())?;
                let mut stored = Vec::with_capacity(records.len());
                for record in records {
                    let instance = record.instance.unwrap_or(0);
                    stored.push((record.to_header(db.conn())?, instance));
                }
                stored
            };
            for (erase_header, instance) in stored {
                if self
                    .removed
                    .iter()
                    .any(|s| self.elements[*s].db_instance == Some(instance))
                {
                    continue;
                }
                erase_headers.push((erase_header, instance));
            }
        }

        let slot = match duplicate {
            Some(slot) => {
                if header.evr() > self.elements[slot].evr() {
                    debug!(
                        "replacing {} with newer {}",
                        self.elements[slot].nevra(),
                        header.nevra()
                    );
                    let parent_links: Vec<usize> = self
                        .removed
                        .iter()
                        .copied()
                        .filter(|s| self.elements[*s].parent_install == Some(slot))
                        .collect();
                    self.elements[slot] = Element::install_relocated(header, key, relocations);
                    // Pinned erases keep following the surviving install
                    for linked in parent_links {
                        self.elements[linked].parent_install = Some(slot);
                    }
                } else {
                    debug!(
                        "keeping {} over older {}",
                        self.elements[slot].nevra(),
                        header.nevra()
                    );
                }
                slot
            }
            None => {
                self.admit_install_element(Element::install_relocated(header, key, relocations))
            }
        };

        for (erase_header, instance) in erase_headers {
            let mut erased = Element::erase(&erase_header, instance);
            erased.parent_install = Some(slot);
            self.removed.push(self.elements.len());
            self.elements.push(erased);
        }

        Ok(())
    }

    /// Add a package to be erased, tagged with its database instance
    pub fn add_erase(&mut self, header: &dyn PackageHeader, db_instance: i64) -> Result<()> {
        if self
            .removed
            .iter()
            .any(|s| self.elements[*s].db_instance == Some(db_instance))
        {
            debug!("instance {} already queued for erase", db_instance);
            return Ok(());
        }
        self.removed.push(self.elements.len());
        self.elements.push(Element::erase(header, db_instance));
        Ok(())
    }

    /// Add a package to the resident universe `available()` may draw from
    pub fn add_available(&mut self, header: &dyn PackageHeader, key: Option<&str>) {
        self.universe.push(Element::install(header, key));
    }

    pub(crate) fn admit_install_element(&mut self, element: Element) -> usize {
        let slot = self.elements.len();
        self.elements.push(element);
        self.added.push(slot);
        slot
    }

    // ---- element access ----

    /// Number of transaction elements
    pub fn n_elements(&self) -> usize {
        self.added.len() + self.removed.len()
    }

    pub fn n_added(&self) -> usize {
        self.added.len()
    }

    pub fn n_removed(&self) -> usize {
        self.removed.len()
    }

    /// The element at the given position of the current sequence
    pub fn element(&self, ix: usize) -> Option<&Element> {
        self.sequence_slot(ix).map(|slot| &self.elements[slot])
    }

    /// Elements in execution order (admission order until `order()` runs)
    pub fn elements(&self) -> impl Iterator<Item = &Element> {
        let slots: Vec<usize> = if self.order.is_empty() {
            self.added.iter().chain(self.removed.iter()).copied().collect()
        } else {
            self.order.clone()
        };
        slots.into_iter().map(|slot| &self.elements[slot])
    }

    /// Retrieval keys of the sequenced elements; erase elements have no
    /// key and appear as interleaved `None`s
    pub fn keys(&self) -> Vec<Option<&str>> {
        self.elements().map(|e| e.key.as_deref()).collect()
    }

    fn sequence_slot(&self, ix: usize) -> Option<usize> {
        if self.order.is_empty() {
            self.added
                .iter()
                .chain(self.removed.iter())
                .nth(ix)
                .copied()
        } else {
            self.order.get(ix).copied()
        }
    }

    // ---- diagnostics ----

    pub fn problems(&self) -> &ProblemSet {
        &self.problems
    }

    pub(crate) fn problems_mut(&mut self) -> &mut ProblemSet {
        &mut self.problems
    }

    /// Alternative resolutions collected for unresolved dependencies
    pub fn suggestions(&self) -> &[String] {
        &self.suggests
    }

    /// The disk-space snapshot taken by the last `run()`, if any
    pub fn disk_space(&self) -> Option<&DiskSpace> {
        self.dsi.as_ref()
    }

    /// Index where trailing, order-insensitive elements begin
    pub fn unordered_successors(&self) -> usize {
        self.unordered_successors
    }

    pub fn set_unordered_successors(&mut self, first: usize) -> usize {
        std::mem::replace(&mut self.unordered_successors, first)
    }

    /// Number of independent dependency trees found by `order()`
    pub fn ntrees(&self) -> usize {
        self.ntrees
    }

    /// Longest dependency chain found by `order()`
    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    // ---- ordering ----

    /// Determine package order according to dependencies
    ///
    /// Returns the number of added packages that could not be ordered;
    /// zero means fully ordered. Dependency resolution failures are not
    /// reported here; run `check()` first and inspect the problem set.
    pub fn order(&mut self) -> usize {
        let start = Instant::now();
        let outcome = order::order_elements(&self.elements, &self.added, &self.removed);

        debug_assert_eq!(outcome.order.len(), self.n_elements());
        self.order = outcome.order;
        self.unordered_successors = outcome.unordered_successors;
        self.ntrees = outcome.ntrees;
        self.max_depth = outcome.max_depth;

        self.timers.charge(OpKind::Order, start.elapsed());
        outcome.unplaced.len()
    }

    // ---- partial resets and teardown ----

    /// Discard scratch structures built for checking and ordering while
    /// keeping committed state, configuration and recorded problems
    pub fn clean(&mut self) {
        self.universe.clear();
        self.suggests.clear();
        self.dsi = None;
    }

    /// Re-create an empty transaction set: elements, ordering results and
    /// problems are discarded, configuration is retained
    pub fn empty(&mut self) {
        self.clean();
        self.elements.clear();
        self.added.clear();
        self.removed.clear();
        self.order.clear();
        self.unordered_successors = 0;
        self.ntrees = 0;
        self.max_depth = 0;
        self.problems.clear();
    }

    /// Tear down explicitly, closing both databases and reporting close
    /// errors (dropping the set closes them silently instead)
    pub fn free(mut self) -> Result<()> {
        self.close_db()?;
        self.close_sdb()?;
        Ok(())
    }

    // ---- rollback scoring ----

    /// Create one shared score board for a running/rollback transaction
    /// pair, pre-populated with one entry per package name in the running
    /// transaction's elements
    pub fn score_init(running: &mut TransactionSet, rollback: &mut TransactionSet) {
        let board = ScoreBoard::from_elements(running.elements.iter());
        let shared: SharedScore = Rc::new(RefCell::new(board));
        running.score = Some(Rc::clone(&shared));
        rollback.score = Some(shared);
    }

    /// This transaction's view of the shared score board
    pub fn score(&self) -> Option<&SharedScore> {
        self.score.as_ref()
    }

    /// Release this transaction's score reference; the board itself
    /// survives until the last holder lets go
    pub fn score_free(&mut self) {
        self.score = None;
    }

    /// Create the paired rollback transaction: same configuration, type
    /// Rollback, sharing this transaction's score board
    pub fn rollback_transaction(&mut self) -> TransactionSet {
        let mut rollback = TransactionSet::create();
        rollback.ts_type = TsType::Rollback;
        rollback.flags = self.flags;
        rollback.verify_flags = self.verify_flags;
        rollback.root_dir = self.root_dir.clone();
        rollback.db_path = self.db_path.clone();
        rollback.solve_db_path = self.solve_db_path.clone();
        if self.score.is_none() {
            let board = ScoreBoard::from_elements(self.elements.iter());
            self.score = Some(Rc::new(RefCell::new(board)));
        }
        rollback.score = self.score.clone();
        rollback
    }

    // ---- execution ----

    /// Process all elements in order
    ///
    /// Disk-space accounting runs first; any unfiltered problem (from
    /// this pass or recorded earlier) stops execution and is returned as
    /// a count. Zero means every element was processed.
    pub fn run(&mut self, ignore: ProblemFilter) -> Result<usize> {
        let total_start = Instant::now();

        if self.order.len() != self.n_elements() {
            self.order();
        }
        let sequence = self.order.clone();

        // Disk-space admission pass over the whole sequence
        match DiskSpace::snapshot(self.mounts.as_ref()) {
            Ok(mut dsi) => {
                for &slot in &sequence {
                    update_diskspace(&mut dsi, &self.elements, &self.removed, slot);
                    dsi.check_problems(&self.elements[slot], &mut self.problems);
                }
                self.dsi = Some(dsi);
            }
            Err(e) => warn!("disk-space accounting skipped: {}", e),
        }

        let ignore = ignore | self.filter;
        let problem_count = self.problems.count_unfiltered(ignore);
        if problem_count > 0 {
            info!("not running transaction: {} problem(s)", problem_count);
            return Ok(problem_count);
        }
        if self.flags.test_only() {
            info!("test transaction: {} element(s) admissible", sequence.len());
            return Ok(0);
        }

        self.open_db(DbMode::ReadWrite)
            .or_else(|_| self.init_db(DbMode::ReadWrite))?;

        let scoring = self.flags.autorollback() && self.ts_type == TsType::Normal;
        let score = if scoring { self.score.clone() } else { None };
        let total = sequence.len() as u64;
        let tid = self.tid;

        let rdb = self.rdb.as_ref().expect("database opened above");
        rdb.record_transaction(tid, self.ts_type.as_str(), self.goal.as_str())?;

        let trans_token = match self.notify.as_mut() {
            Some(cb) => cb.notify(None, CallbackKind::TransStart, 0, total, None),
            None => None,
        };

        for (ix, &slot) in sequence.iter().enumerate() {
            if let Some(cb) = self.notify.as_mut() {
                cb.notify(None, CallbackKind::TransProgress, ix as u64, total, None);
            }

            let rdb = self.rdb.as_ref().expect("database stays open");
            let element = &self.elements[slot];
            let element_start = Instant::now();

            match element.kind {
                ElementKind::Install => {
                    let token = match self.notify.as_mut() {
                        Some(cb) => cb.notify(
                            Some(&self.elements[slot]),
                            CallbackKind::InstStart,
                            0,
                            total,
                            None,
                        ),
                        None => None,
                    };

                    let db_start = Instant::now();
                    rdb.add_package(&self.elements[slot], tid)?;
                    self.timers.charge(OpKind::DbAdd, db_start.elapsed());

                    if let Some(score) = &score {
                        score.borrow_mut().mark_installed(self.elements[slot].name());
                    }
                    self.timers.charge(OpKind::Install, element_start.elapsed());

                    if let Some(cb) = self.notify.as_mut() {
                        cb.notify(
                            Some(&self.elements[slot]),
                            CallbackKind::InstStop,
                            total,
                            total,
                            token,
                        );
                    }
                }
                ElementKind::Erase => {
                    let token = match self.notify.as_mut() {
                        Some(cb) => cb.notify(
                            Some(&self.elements[slot]),
                            CallbackKind::EraseStart,
                            0,
                            total,
                            None,
                        ),
                        None => None,
                    };

                    if let Some(instance) = self.elements[slot].db_instance {
                        let db_start = Instant::now();
                        rdb.remove_package(instance)?;
                        self.timers.charge(OpKind::DbRemove, db_start.elapsed());
                    }

                    if let Some(score) = &score {
                        score.borrow_mut().mark_erased(self.elements[slot].name());
                    }
                    self.timers.charge(OpKind::Erase, element_start.elapsed());

                    if let Some(cb) = self.notify.as_mut() {
                        cb.notify(
                            Some(&self.elements[slot]),
                            CallbackKind::EraseStop,
                            total,
                            total,
                            token,
                        );
                    }
                }
            }
        }

        if let Some(cb) = self.notify.as_mut() {
            cb.notify(None, CallbackKind::TransStop, total, total, trans_token);
        }

        self.timers.charge(OpKind::Total, total_start.elapsed());
        info!("transaction {} processed {} element(s)", tid, total);
        Ok(0)
    }
}

/// Accumulate one element's files into the disk-space monitor
fn update_diskspace(
    dsi: &mut DiskSpace,
    elements: &[Element],
    removed: &[usize],
    slot: usize,
) {
    let element = &elements[slot];
    match element.kind {
        ElementKind::Install => {
            // Files also present in a pinned upgrade erase are
            // replacements, not fresh creations
            let mut prev_sizes: HashMap<&str, u64> = HashMap::new();
            for &erase_slot in removed {
                if elements[erase_slot].parent_install == Some(slot) {
                    for file in &elements[erase_slot].files {
                        prev_sizes.insert(file.path.as_str(), file.size);
                    }
                }
            }

            for file in &element.files {
                let Some(dev) = file.dev.or_else(|| dsi.device_for(&file.path)) else {
                    continue;
                };
                match prev_sizes.get(file.path.as_str()) {
                    Some(prev) => dsi.update(dev, file.size, *prev, 0, FileAction::Replace),
                    None => dsi.update(dev, file.size, 0, 0, FileAction::Create),
                }
            }
        }
        ElementKind::Erase => {
            // Files the replacing install re-creates are accounted there
            let replaced_by_parent = element.parent_install.is_some();
            for file in &element.files {
                if replaced_by_parent {
                    continue;
                }
                let Some(dev) = file.dev.or_else(|| dsi.device_for(&file.path)) else {
                    continue;
                };
                dsi.update(dev, file.size, 0, 0, FileAction::Remove);
            }
        }
    }
}

fn open_or_init(path: &Path, mode: DbMode) -> Result<PackageDb> {
    if path.exists() {
        PackageDb::open(path, mode)
    } else if mode == DbMode::ReadWrite {
        PackageDb::init(path, mode)
    } else {
        Err(Error::DatabaseNotFound(path.display().to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packages::manifest::ManifestHeader;
    use tempfile::tempdir;

    fn quiet_mounts() -> Box<dyn MountProvider> {
        Box::new(FixedMounts(vec![FilesystemStats {
            dev: 1,
            mount_point: "/".to_string(),
            block_size: 4096,
            blocks_avail: 1_000_000,
            inodes_avail: 1_000_000,
        }]))
    }

    fn test_ts(dir: &tempfile::TempDir) -> TransactionSet {
        let mut ts = TransactionSet::create();
        ts.set_db_path(&dir.path().join("packages.db"));
        ts.set_mounts(quiet_mounts());
        ts
    }

    #[test]
    fn test_create_defaults() {
        let ts = TransactionSet::create();
        assert_eq!(ts.ts_type(), TsType::Normal);
        assert_eq!(ts.goal(), TsGoal::Unknown);
        assert_eq!(ts.n_elements(), 0);
        assert!(ts.tid() > 0);
        assert_eq!(ts.verify_flags(), VerifyFlags::default());
    }

    #[test]
    fn test_setters_return_previous_value() {
        let mut ts = TransactionSet::create();

        assert_eq!(ts.set_flags(TransFlags::TEST), TransFlags::default());
        assert_eq!(ts.set_flags(TransFlags::JUSTDB), TransFlags::TEST);

        let previous = ts.set_root_dir(Path::new("/mnt/sysimage"));
        assert_eq!(previous, PathBuf::from("/"));
        assert_eq!(ts.root_dir(), Path::new("/mnt/sysimage"));

        assert_eq!(ts.set_color(0x2), 0);
        assert_eq!(ts.set_color(0x4), 0x2);

        assert!(!ts.set_chroot_done(true));
        assert!(ts.set_chroot_done(false));
    }

    #[test]
    fn test_duplicate_name_keeps_newer_evr() {
        let dir = tempdir().unwrap();
        let mut ts = test_ts(&dir);

        let older = ManifestHeader::new("pkga", "1-1").unwrap();
        let newer = ManifestHeader::new("pkga", "2-1").unwrap();

        ts.add_install(&older, None, false).unwrap();
        ts.add_install(&newer, None, false).unwrap();
        assert_eq!(ts.n_added(), 1);
        assert_eq!(ts.element(0).unwrap().evr().to_string(), "2-1");

        // Same outcome in the other admission order
        let mut ts = test_ts(&dir);
        ts.add_install(&newer, None, false).unwrap();
        ts.add_install(&older, None, false).unwrap();
        assert_eq!(ts.n_added(), 1);
        assert_eq!(ts.element(0).unwrap().evr().to_string(), "2-1");
    }

    #[test]
    fn test_needs_capabilities_admits_nothing() {
        let dir = tempdir().unwrap();
        let mut ts = test_ts(&dir);

        let header = ManifestHeader::new("exotic", "1.0-1")
            .unwrap()
            .with_requires("tessera(time-travel)");
        let result = ts.add_install(&header, None, false);

        assert!(matches!(result, Err(Error::NeedsCapabilities(_))));
        assert_eq!(ts.n_elements(), 0);
    }

    #[test]
    fn test_upgrade_generates_pinned_erase() {
        let dir = tempdir().unwrap();
        let mut ts = test_ts(&dir);

        // Seed the database with the installed older version
        ts.init_db(DbMode::ReadWrite).unwrap();
        let old = ManifestHeader::new("web-server", "1.0-1").unwrap();
        ts.rdb().unwrap().add_package(&old, 1).unwrap();

        let new = ManifestHeader::new("web-server", "2.0-1").unwrap();
        ts.add_install(&new, Some("web-server-2.0-1.pkg"), true)
            .unwrap();

        assert_eq!(ts.n_added(), 1);
        assert_eq!(ts.n_removed(), 1);

        ts.order();
        let sequence: Vec<_> = ts.elements().map(|e| (e.kind, e.nevra())).collect();
        assert_eq!(sequence[0].0, ElementKind::Install);
        assert_eq!(sequence[1].0, ElementKind::Erase);
        assert_eq!(sequence[1].1, "web-server-1.0-1");

        // Keys interleave None for the erase element
        assert_eq!(ts.keys(), vec![Some("web-server-2.0-1.pkg"), None]);
    }

    #[test]
    fn test_erase_instance_deduplicated() {
        let dir = tempdir().unwrap();
        let mut ts = test_ts(&dir);

        let header = ManifestHeader::new("dupe", "1.0-1").unwrap();
        ts.add_erase(&header, 7).unwrap();
        ts.add_erase(&header, 7).unwrap();
        assert_eq!(ts.n_removed(), 1);
    }

    #[test]
    fn test_empty_keeps_configuration() {
        let dir = tempdir().unwrap();
        let mut ts = test_ts(&dir);
        ts.set_flags(TransFlags::TEST);
        ts.set_root_dir(Path::new("/mnt/target"));

        let header = ManifestHeader::new("pkga", "1.0-1").unwrap();
        ts.add_install(&header, None, false).unwrap();
        ts.order();

        ts.empty();
        assert_eq!(ts.n_elements(), 0);
        assert!(ts.problems().is_empty());
        // Configuration survives
        assert_eq!(ts.flags(), TransFlags::TEST);
        assert_eq!(ts.root_dir(), Path::new("/mnt/target"));
    }

    #[test]
    fn test_run_executes_and_updates_database() {
        let dir = tempdir().unwrap();
        let mut ts = test_ts(&dir);

        let lib = ManifestHeader::new("libfoo", "1.2-1")
            .unwrap()
            .with_file("/usr/lib/libfoo.so.1", 8192);
        let app = ManifestHeader::new("foo-tools", "1.2-1")
            .unwrap()
            .with_requires("libfoo");
        ts.add_install(&app, None, false).unwrap();
        ts.add_install(&lib, None, false).unwrap();

        assert_eq!(ts.check().unwrap(), ());
        assert_eq!(ts.order(), 0);
        let result = ts.run(ProblemFilter::empty()).unwrap();
        assert_eq!(result, 0);

        let installed: Vec<_> = ts
            .db_iterate(DbTag::Name, "libfoo")
            .unwrap()
            .collect();
        assert_eq!(installed.len(), 1);
        assert!(ts.op(OpKind::DbAdd).count >= 2);
        assert_eq!(ts.op(OpKind::Total).count, 1);
    }

    #[test]
    fn test_run_test_flag_touches_nothing() {
        let dir = tempdir().unwrap();
        let mut ts = test_ts(&dir);
        ts.set_flags(TransFlags::TEST);

        let header = ManifestHeader::new("ghost", "1.0-1").unwrap();
        ts.add_install(&header, None, false).unwrap();
        assert_eq!(ts.run(ProblemFilter::empty()).unwrap(), 0);

        // Nothing was written
        let found: Vec<_> = ts.db_iterate(DbTag::Name, "ghost").unwrap().collect();
        assert!(found.is_empty());
    }

    #[test]
    fn test_run_stops_on_unfiltered_problems_and_filter_unblocks() {
        let dir = tempdir().unwrap();
        let mut ts = test_ts(&dir);
        ts.set_mounts(Box::new(FixedMounts(vec![FilesystemStats {
            dev: 1,
            mount_point: "/".to_string(),
            block_size: 4096,
            blocks_avail: 10,
            inodes_avail: 1_000,
        }])));

        let header = ManifestHeader::new("huge", "1.0-1")
            .unwrap()
            .with_file("/opt/huge.bin", 400 * 4096);
        ts.add_install(&header, None, false).unwrap();

        let blocked = ts.run(ProblemFilter::empty()).unwrap();
        assert_eq!(blocked, 1);
        assert_eq!(ts.problems().len(), 1);

        // Ignoring the category lets the run proceed (the record stays)
        let passed = ts.run(ProblemFilter::DISK_SPACE).unwrap();
        assert_eq!(passed, 0);
        assert!(!ts.problems().is_empty());
    }

    #[test]
    fn test_score_shared_between_pair() {
        let mut running = TransactionSet::create();
        let mut rollback = TransactionSet::create();
        rollback.set_type(TsType::Rollback);

        let header = ManifestHeader::new("pkga", "1.0-1").unwrap();
        running.add_install(&header, None, false).unwrap();

        TransactionSet::score_init(&mut running, &mut rollback);
        let board = running.score().unwrap();
        assert_eq!(Rc::strong_count(board), 2);
        assert_eq!(board.borrow().len(), 1);

        // Releasing one reference leaves the other's view intact
        running.score_free();
        let board = rollback.score().unwrap();
        assert_eq!(Rc::strong_count(board), 1);
        assert!(board.borrow().entry("pkga").is_some());
    }

    #[test]
    fn test_scoring_only_for_normal_autorollback_transactions() {
        let dir = tempdir().unwrap();

        // Normal transaction with autorollback enabled: entries mutate
        let mut running = test_ts(&dir);
        running.set_flags(TransFlags::AUTO_ROLLBACK);
        let header = ManifestHeader::new("pkga", "1.0-1").unwrap();
        running.add_install(&header, None, false).unwrap();
        let mut rollback = running.rollback_transaction();
        rollback.set_mounts(quiet_mounts());

        assert_eq!(running.run(ProblemFilter::empty()).unwrap(), 0);
        let board = running.score().unwrap();
        assert!(board.borrow().entry("pkga").unwrap().installed);

        // Replaying the rollback-typed twin must not mutate entries
        let erase_header = ManifestHeader::new("pkga", "1.0-1").unwrap();
        rollback.add_erase(&erase_header, 1).unwrap();
        assert_eq!(rollback.run(ProblemFilter::empty()).unwrap(), 0);
        let board = rollback.score().unwrap();
        assert!(!board.borrow().entry("pkga").unwrap().erased);
    }

    #[test]
    fn test_scoring_skipped_without_flag() {
        let dir = tempdir().unwrap();
        let mut running = test_ts(&dir);
        let header = ManifestHeader::new("pkga", "1.0-1").unwrap();
        running.add_install(&header, None, false).unwrap();
        let mut rollback = running.rollback_transaction();
        rollback.set_mounts(quiet_mounts());

        // Autorollback not enabled: the run succeeds, entries stay cold
        assert_eq!(running.run(ProblemFilter::empty()).unwrap(), 0);
        assert!(!running.score().unwrap().borrow().entry("pkga").unwrap().installed);
    }

    #[test]
    fn test_notify_spans_pair_tokens() {
        use std::cell::Cell;
        use std::rc::Rc as StdRc;

        let dir = tempdir().unwrap();
        let mut ts = test_ts(&dir);

        let header = ManifestHeader::new("pkga", "1.0-1").unwrap();
        ts.add_install(&header, None, false).unwrap();

        let paired = StdRc::new(Cell::new(false));
        let paired_view = StdRc::clone(&paired);
        ts.set_notify(Box::new(
            move |_el: Option<&Element>,
                  kind: CallbackKind,
                  _amount: u64,
                  _total: u64,
                  token: Option<Token>|
                  -> Option<Token> {
                match kind {
                    CallbackKind::InstStart => Some(Box::new("open-handle".to_string())),
                    CallbackKind::InstStop => {
                        let token = token.expect("token returned on the paired call");
                        assert_eq!(*token.downcast::<String>().unwrap(), "open-handle");
                        paired_view.set(true);
                        None
                    }
                    _ => None,
                }
            },
        ));

        assert_eq!(ts.run(ProblemFilter::empty()).unwrap(), 0);
        assert!(paired.get());
    }

    #[test]
    fn test_set_db_mode_rejected_after_open() {
        let dir = tempdir().unwrap();
        let mut ts = test_ts(&dir);
        ts.init_db(DbMode::ReadWrite).unwrap();
        assert!(ts.set_db_mode(Some(DbMode::ReadOnly)).is_err());

        ts.close_db().unwrap();
        assert!(ts.set_db_mode(Some(DbMode::ReadOnly)).is_ok());
    }
}
