// build.rs

use clap::{Arg, Command};
use clap_mangen::Man;
use std::env;
use std::fs;
use std::path::PathBuf;

fn build_cli() -> Command {
    Command::new("tessera")
        .version(env!("CARGO_PKG_VERSION"))
        .author("Tessera Contributors")
        .about("Package transaction engine: dependency-ordered, disk-aware, rollback-safe")
        .subcommand_required(false)
        .subcommand(
            Command::new("init")
                .about("Initialize the package database")
                .arg(
                    Arg::new("db_path")
                        .short('d')
                        .long("db-path")
                        .value_name("PATH")
                        .default_value("/var/lib/tessera/packages.db")
                        .help("Database path"),
                ),
        )
        .subcommand(
            Command::new("plan")
                .about("Check and order a transaction manifest without executing it")
                .arg(Arg::new("manifest").required(true).help("Path to the transaction manifest (JSON)"))
                .arg(
                    Arg::new("db_path")
                        .short('d')
                        .long("db-path")
                        .default_value("/var/lib/tessera/packages.db"),
                )
                .arg(
                    Arg::new("root")
                        .short('r')
                        .long("root")
                        .default_value("/")
                        .help("Transaction root directory"),
                )
                .arg(
                    Arg::new("json")
                        .long("json")
                        .action(clap::ArgAction::SetTrue)
                        .help("Emit the plan as JSON"),
                ),
        )
        .subcommand(
            Command::new("run")
                .about("Execute a transaction manifest")
                .arg(Arg::new("manifest").required(true).help("Path to the transaction manifest (JSON)"))
                .arg(
                    Arg::new("db_path")
                        .short('d')
                        .long("db-path")
                        .default_value("/var/lib/tessera/packages.db"),
                )
                .arg(
                    Arg::new("root")
                        .short('r')
                        .long("root")
                        .default_value("/")
                        .help("Transaction root directory"),
                )
                .arg(
                    Arg::new("test")
                        .long("test")
                        .action(clap::ArgAction::SetTrue)
                        .help("Compute and report, but change nothing"),
                )
                .arg(
                    Arg::new("ignore")
                        .long("ignore")
                        .action(clap::ArgAction::Append)
                        .value_parser(["deps", "conflicts", "diskspace", "disknodes", "db"])
                        .help("Problem categories to ignore"),
                ),
        )
        .subcommand(
            Command::new("verify-db")
                .about("Verify the package database's integrity")
                .arg(
                    Arg::new("db_path")
                        .short('d')
                        .long("db-path")
                        .default_value("/var/lib/tessera/packages.db"),
                ),
        )
        .subcommand(
            Command::new("rebuild-db")
                .about("Rebuild the package database's storage")
                .arg(
                    Arg::new("db_path")
                        .short('d')
                        .long("db-path")
                        .default_value("/var/lib/tessera/packages.db"),
                ),
        )
        .subcommand(
            Command::new("completions")
                .about("Generate shell completion scripts")
                .arg(
                    Arg::new("shell")
                        .required(true)
                        .value_parser(["bash", "zsh", "fish", "powershell"])
                        .help("Shell type"),
                ),
        )
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    // Create man directory
    let out_dir = PathBuf::from(env::var("CARGO_MANIFEST_DIR").unwrap());
    let man_dir = out_dir.join("man");
    fs::create_dir_all(&man_dir).expect("Failed to create man directory");

    // Generate main man page
    let cmd = build_cli();
    let man = Man::new(cmd);
    let mut buffer = Vec::new();
    man.render(&mut buffer)
        .expect("Failed to render man page");

    let man_path = man_dir.join("tessera.1");
    fs::write(&man_path, buffer).expect("Failed to write man page");

    println!("cargo:warning=Man page generated at {}", man_path.display());
}
