// src/main.rs

use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{Shell, generate};
use std::path::{Path, PathBuf};
use tessera::db::{DbMode, DbTag, PackageDb};
use tessera::packages::manifest::TransactionManifest;
use tessera::transaction::{ElementKind, ProblemFilter, TransFlags, TransactionSet};
use tessera::version::Evr;
use tracing::info;

#[derive(Parser)]
#[command(name = "tessera")]
#[command(author, version, about = "Package transaction engine: dependency-ordered, disk-aware, rollback-safe", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the package database
    Init {
        /// Database path (default: /var/lib/tessera/packages.db)
        #[arg(short, long, default_value = "/var/lib/tessera/packages.db")]
        db_path: PathBuf,
    },
    /// Check and order a transaction manifest without executing it
    Plan {
        /// Path to the transaction manifest (JSON)
        manifest: PathBuf,
        /// Database path (default: /var/lib/tessera/packages.db)
        #[arg(short, long, default_value = "/var/lib/tessera/packages.db")]
        db_path: PathBuf,
        /// Transaction root directory
        #[arg(short, long, default_value = "/")]
        root: PathBuf,
        /// Emit the plan as JSON
        #[arg(long)]
        json: bool,
    },
    /// Execute a transaction manifest
    Run {
        /// Path to the transaction manifest (JSON)
        manifest: PathBuf,
        /// Database path (default: /var/lib/tessera/packages.db)
        #[arg(short, long, default_value = "/var/lib/tessera/packages.db")]
        db_path: PathBuf,
        /// Transaction root directory
        #[arg(short, long, default_value = "/")]
        root: PathBuf,
        /// Compute and report, but change nothing
        #[arg(long)]
        test: bool,
        /// Problem categories to ignore (repeatable)
        #[arg(long, value_parser = ["deps", "conflicts", "diskspace", "disknodes", "db"])]
        ignore: Vec<String>,
    },
    /// Verify the package database's integrity
    VerifyDb {
        /// Database path (default: /var/lib/tessera/packages.db)
        #[arg(short, long, default_value = "/var/lib/tessera/packages.db")]
        db_path: PathBuf,
    },
    /// Rebuild the package database's storage
    RebuildDb {
        /// Database path (default: /var/lib/tessera/packages.db)
        #[arg(short, long, default_value = "/var/lib/tessera/packages.db")]
        db_path: PathBuf,
    },
    /// Generate shell completion scripts
    Completions {
        /// Shell type
        #[arg(value_enum)]
        shell: Shell,
    },
}

/// Build a transaction set from a manifest: installs admitted directly,
/// erase entries resolved against the installed database
fn build_transaction(
    manifest_path: &Path,
    db_path: &Path,
    root: &Path,
) -> Result<TransactionSet> {
    let manifest = TransactionManifest::load(manifest_path)?;

    let mut ts = TransactionSet::create();
    ts.set_root_dir(root);
    ts.set_db_path(db_path);

    for entry in &manifest.install {
        let header = entry.to_header()?;
        let key = format!("{}-{}", entry.name, entry.version);
        ts.add_install(&header, Some(&key), entry.upgrade)?;
    }

    for entry in &manifest.erase {
        let wanted_evr: Option<Evr> = entry.version.parse().ok();
        let records: Vec<_> = ts.db_iterate(DbTag::Name, &entry.name)?.collect();
        let matching: Vec<_> = records
            .into_iter()
            .filter(|r| wanted_evr.as_ref().is_none_or(|evr| r.evr() == *evr))
            .collect();
        if matching.is_empty() {
            anyhow::bail!("package {}-{} is not installed", entry.name, entry.version);
        }
        for record in matching {
            let instance = record.instance.unwrap_or(0);
            let stored = record.to_header(ts.rdb()?.conn())?;
            ts.add_erase(&stored, instance)?;
        }
    }

    Ok(ts)
}

fn parse_ignore(categories: &[String]) -> ProblemFilter {
    let mut filter = ProblemFilter::empty();
    for category in categories {
        filter |= match category.as_str() {
            "deps" => ProblemFilter::DEPENDENCIES,
            "conflicts" => ProblemFilter::CONFLICTS,
            "diskspace" => ProblemFilter::DISK_SPACE,
            "disknodes" => ProblemFilter::DISK_NODES,
            "db" => ProblemFilter::DATABASE,
            _ => ProblemFilter::empty(),
        };
    }
    filter
}

fn print_plan(ts: &TransactionSet, unplaced: usize, json: bool) -> Result<()> {
    if json {
        let sequence: Vec<_> = ts
            .elements()
            .map(|e| {
                serde_json::json!({
                    "op": match e.kind {
                        ElementKind::Install => "install",
                        ElementKind::Erase => "erase",
                    },
                    "package": e.nevra(),
                })
            })
            .collect();
        let problems: Vec<_> = ts.problems().iter().collect();
        let plan = serde_json::json!({
            "tid": ts.tid(),
            "order": sequence,
            "unplaced": unplaced,
            "trees": ts.ntrees(),
            "max_depth": ts.max_depth(),
            "problems": problems,
            "suggestions": ts.suggestions(),
        });
        println!("{}", serde_json::to_string_pretty(&plan)?);
        return Ok(());
    }

    println!("Transaction {} ({} elements):", ts.tid(), ts.n_elements());
    for element in ts.elements() {
        let op = match element.kind {
            ElementKind::Install => "install",
            ElementKind::Erase => "erase  ",
        };
        println!("  {} {}", op, element.nevra());
    }
    if unplaced > 0 {
        println!("{} element(s) could not be ordered", unplaced);
    }
    if !ts.problems().is_empty() {
        println!("Problems:");
        for problem in ts.problems().iter() {
            println!("  {}", problem);
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    // Initialize tracing subscriber for logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Init { db_path }) => {
            info!("Initializing package database at: {}", db_path.display());
            let db = PackageDb::init(&db_path, DbMode::ReadWrite)?;
            db.close()?;
            println!("Database initialized successfully at: {}", db_path.display());
            Ok(())
        }
        Some(Commands::Plan {
            manifest,
            db_path,
            root,
            json,
        }) => {
            let mut ts = build_transaction(&manifest, &db_path, &root)?;
            ts.check()?;
            let unplaced = ts.order();
            print_plan(&ts, unplaced, json)?;
            Ok(())
        }
        Some(Commands::Run {
            manifest,
            db_path,
            root,
            test,
            ignore,
        }) => {
            let mut ts = build_transaction(&manifest, &db_path, &root)?;
            if test {
                ts.set_flags(ts.flags() | TransFlags::TEST);
            }
            ts.check()?;
            let unplaced = ts.order();
            if unplaced > 0 {
                anyhow::bail!("{} element(s) could not be ordered", unplaced);
            }

            let problems = ts.run(parse_ignore(&ignore))?;
            if problems > 0 {
                for problem in ts.problems().iter() {
                    eprintln!("{}", problem);
                }
                anyhow::bail!("transaction not run: {} problem(s)", problems);
            }

            println!(
                "Transaction {} complete: {} element(s) processed",
                ts.tid(),
                ts.n_elements()
            );
            ts.free()?;
            Ok(())
        }
        Some(Commands::VerifyDb { db_path }) => {
            let db = PackageDb::open(&db_path, DbMode::ReadOnly)?;
            if db.verify()? {
                println!("Database integrity verified: {}", db_path.display());
                Ok(())
            } else {
                anyhow::bail!("database integrity check failed: {}", db_path.display())
            }
        }
        Some(Commands::RebuildDb { db_path }) => {
            let db = PackageDb::open(&db_path, DbMode::ReadWrite)?;
            db.rebuild()?;
            db.close()?;
            println!("Database rebuilt: {}", db_path.display());
            Ok(())
        }
        Some(Commands::Completions { shell }) => {
            let mut cmd = Cli::command();
            generate(shell, &mut cmd, "tessera", &mut std::io::stdout());
            Ok(())
        }
        None => {
            Cli::command().print_help()?;
            Ok(())
        }
    }
}
