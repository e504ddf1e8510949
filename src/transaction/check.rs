// src/transaction/check.rs

//! Dependency checking
//!
//! Every requirement of every admitted element is resolved against the
//! in-transaction universe first, then the install database (and the
//! solve database, when one is configured), and finally a registered
//! solver callback. Unresolved requirements become problem-set entries
//! and capped suggestions; `check()` itself only reports whether
//! resolution was *attempted* for everything.

use crate::db::DbTag;
use crate::deps::{DepKind, Dependency};
use crate::error::Result;
use crate::transaction::TransactionSet;
use crate::transaction::problems::{Problem, ProblemKind};
use crate::transaction::timers::OpKind;
use std::collections::HashSet;
use std::time::Instant;
use tracing::debug;

/// Cap on accumulated alternative-solution suggestions
const MAX_SUGGESTIONS: usize = 8;

/// How often a solver may answer Retry for one requirement
const MAX_SOLVE_RETRIES: u32 = 3;

/// What a solver decided about an unsatisfied dependency
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolveDisposition {
    /// The solver arranged an alternate source; resolve again
    Retry,
    /// Treat the dependency as satisfied
    Ignore,
    /// The solver has nothing; record the failure
    NotFound,
}

/// Dependency solver capability, consulted for requirements nothing
/// in-transaction or installed satisfies
pub trait Solver {
    fn solve(&mut self, dep: &Dependency) -> SolveDisposition;
}

/// Blanket impl so plain closures can act as solvers
impl<F> Solver for F
where
    F: FnMut(&Dependency) -> SolveDisposition,
{
    fn solve(&mut self, dep: &Dependency) -> SolveDisposition {
        self(dep)
    }
}

impl TransactionSet {
    /// Perform dependency resolution on the transaction set
    ///
    /// Problems found here are examined through `problems()`; success
    /// only means that resolution was attempted for every element.
    pub fn check(&mut self) -> Result<()> {
        let start = Instant::now();

        // Requirements of elements being installed
        let work: Vec<(String, Dependency)> = self
            .added
            .iter()
            .flat_map(|slot| {
                let element = &self.elements[*slot];
                let nevra = element.nevra();
                element
                    .requires
                    .iter()
                    // Engine capabilities were vetted at admission
                    .filter(|r| !r.name.starts_with("tessera("))
                    .map(move |r| (nevra.clone(), r.clone()))
            })
            .collect();

        let mut solver = self.solver.take();
        for (nevra, requirement) in work {
            let mut retries = 0;
            loop {
                if self.tx_satisfies(&requirement) {
                    break;
                }
                if self.db_satisfies(&requirement, &HashSet::new())? {
                    break;
                }

                match solver.as_mut().map(|s| s.solve(&requirement)) {
                    Some(SolveDisposition::Retry) if retries < MAX_SOLVE_RETRIES => {
                        retries += 1;
                        debug!("solver retry {} for {}", retries, requirement);
                    }
                    Some(SolveDisposition::Ignore) => {
                        debug!("solver ignores {}", requirement);
                        break;
                    }
                    _ => {
                        self.record_unresolved(&nevra, &requirement);
                        break;
                    }
                }
            }
        }
        self.solver = solver;

        self.check_erasures()?;

        self.timers.charge(OpKind::Check, start.elapsed());
        Ok(())
    }

    /// Attempt to satisfy a dependency from the resident package universe
    ///
    /// On a match the resolving package is admitted into the transaction.
    /// Returns whether the dependency was resolved.
    #[deprecated(note = "register a solver callback instead; this in-memory shortcut \
                         is kept for callers that preload a package universe")]
    pub fn available(&mut self, dep: &Dependency) -> bool {
        let found = self
            .universe
            .iter()
            .position(|el| el.provides.iter().any(|p| dep.satisfied_by(p)));
        let Some(ix) = found else {
            return false;
        };

        let element = self.universe[ix].clone();
        let already_added = self
            .added
            .iter()
            .any(|slot| self.elements[*slot].name() == element.name());
        if !already_added {
            debug!("universe resolves {} with {}", dep, element.nevra());
            self.admit_install_element(element);
        }
        true
    }

    /// Do the in-transaction install elements satisfy this requirement?
    fn tx_satisfies(&self, requirement: &Dependency) -> bool {
        self.added.iter().any(|slot| {
            self.elements[*slot]
                .provides
                .iter()
                .any(|p| requirement.satisfied_by(p))
        })
    }

    /// Does an installed package outside `excluded` satisfy this
    /// requirement? Consults the install database, then the solve
    /// database when one is configured.
    fn db_satisfies(
        &mut self,
        requirement: &Dependency,
        excluded: &HashSet<i64>,
    ) -> Result<bool> {
        if self.db_path.is_some() {
            let db = self.rdb()?;
            if db_has_provider(db, requirement, excluded)? {
                return Ok(true);
            }
        }
        if let Some(sdb) = self.sdb()? {
            if db_has_provider(sdb, requirement, &HashSet::new())? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Erasing a package must not strand installed dependents: for every
    /// provide that leaves, re-check the requirements of the packages
    /// that consumed it.
    fn check_erasures(&mut self) -> Result<()> {
        if self.removed.is_empty() || self.db_path.is_none() {
            return Ok(());
        }

        let erased_instances: HashSet<i64> = self
            .removed
            .iter()
            .filter_map(|slot| self.elements[*slot].db_instance)
            .collect();
        let leaving: Vec<String> = self
            .removed
            .iter()
            .flat_map(|slot| {
                self.elements[*slot]
                    .provides
                    .iter()
                    .map(|p| p.name.clone())
            })
            .collect();

        // Requirements of surviving dependents on the leaving provides
        let mut pending: Vec<(String, Dependency)> = Vec::new();
        let mut seen: HashSet<(String, String)> = HashSet::new();
        {
            use crate::db::models::{DepRecord, PackageRecord};
            let db = self.rdb()?;
            for provide_name in &leaving {
                for instance in
                    DepRecord::instances_with(db.conn(), DepKind::Requires, provide_name)?
                {
                    if erased_instances.contains(&instance) {
                        continue;
                    }
                    let Some(record) = PackageRecord::find_by_instance(db.conn(), instance)?
                    else {
                        continue;
                    };
                    let nevra = record.id().nevra();
                    for req in DepRecord::deps_for(db.conn(), instance, DepKind::Requires)? {
                        if req.name == *provide_name
                            && seen.insert((nevra.clone(), req.to_string()))
                        {
                            pending.push((nevra.clone(), req));
                        }
                    }
                }
            }
        }

        for (nevra, requirement) in pending {
            if self.tx_satisfies(&requirement) {
                continue;
            }
            if self.db_satisfies(&requirement, &erased_instances)? {
                continue;
            }
            self.record_unresolved(&nevra, &requirement);
        }

        Ok(())
    }

    fn record_unresolved(&mut self, nevra: &str, requirement: &Dependency) {
        debug!("unresolved: {} needed by {}", requirement, nevra);
        self.problems_mut().append(Problem::new(
            ProblemKind::RequiresUnresolved,
            nevra,
            requirement.to_string(),
        ));
        let suggestion = requirement.to_string();
        if self.suggests.len() < MAX_SUGGESTIONS && !self.suggests.contains(&suggestion) {
            self.suggests.push(suggestion);
        }
    }
}

/// Does this database hold a provider for the requirement, outside the
/// excluded instances?
fn db_has_provider(
    db: &crate::db::PackageDb,
    requirement: &Dependency,
    excluded: &HashSet<i64>,
) -> Result<bool> {
    if requirement.name.starts_with('/') {
        for record in db.iterate(DbTag::Path, &requirement.name)? {
            if !excluded.contains(&record.instance.unwrap_or(0)) {
                return Ok(true);
            }
        }
        return Ok(false);
    }
    for record in db.what_provides(requirement)? {
        if !excluded.contains(&record.instance.unwrap_or(0)) {
            return Ok(true);
        }
    }
    Ok(false)
}
