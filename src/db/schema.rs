// src/db/schema.rs

//! Database schema definitions and migrations for Tessera
//!
//! This module defines the SQLite schema for the installed-package database
//! (also used for auxiliary solve databases) and provides a migration
//! system to evolve the schema over time.

use crate::error::Result;
use rusqlite::Connection;
use tracing::{debug, info};

/// Current schema version
pub const SCHEMA_VERSION: i32 = 2;

/// Initialize the schema version tracking table
fn init_schema_version(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;
    Ok(())
}

/// Get the current schema version from the database
pub fn get_schema_version(conn: &Connection) -> Result<i32> {
    init_schema_version(conn)?;

    let version = conn
        .query_row(
            "SELECT version FROM schema_version ORDER BY version DESC LIMIT 1",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    Ok(version)
}

/// Set the schema version
fn set_schema_version(conn: &Connection, version: i32) -> Result<()> {
    conn.execute(
        "INSERT INTO schema_version (version) VALUES (?1)",
        [version],
    )?;
    Ok(())
}

/// Apply all pending migrations to bring the database up to date
pub fn migrate(conn: &Connection) -> Result<()> {
    let current_version = get_schema_version(conn)?;
    info!("Current schema version: {}", current_version);

    if current_version >= SCHEMA_VERSION {
        info!("Schema is up to date");
        return Ok(());
    }

    // Apply migrations in order
    for version in (current_version + 1)..=SCHEMA_VERSION {
        info!("Applying migration to version {}", version);
        apply_migration(conn, version)?;
        set_schema_version(conn, version)?;
    }

    info!(
        "Schema migration complete. Now at version {}",
        SCHEMA_VERSION
    );
    Ok(())
}

/// Apply a specific migration version
fn apply_migration(conn: &Connection, version: i32) -> Result<()> {
    match version {
        1 => migrate_v1(conn),
        2 => migrate_v2(conn),
        _ => panic!("Unknown migration version: {}", version),
    }
}

/// Initial schema - Version 1
///
/// Creates the core tables:
/// - packages: one row per installed package instance
/// - deps: provides/requires/conflicts/obsoletes sets per instance
/// - files: file manifest per instance
fn migrate_v1(conn: &Connection) -> Result<()> {
    debug!("Creating schema version 1");

    conn.execute_batch(
        "
        -- Packages: one row per installed instance
        CREATE TABLE packages (
            instance INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            epoch INTEGER NOT NULL DEFAULT 0,
            version TEXT NOT NULL,
            release TEXT NOT NULL DEFAULT '',
            arch TEXT,
            color INTEGER NOT NULL DEFAULT 0,
            tid INTEGER NOT NULL DEFAULT 0,
            installed_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        );

        CREATE INDEX idx_packages_name ON packages(name);
        CREATE INDEX idx_packages_tid ON packages(tid);

        -- Dependency sets: provides, requires, conflicts, obsoletes
        CREATE TABLE deps (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            package_instance INTEGER NOT NULL,
            kind TEXT NOT NULL CHECK(kind IN ('provides', 'requires', 'conflicts', 'obsoletes')),
            name TEXT NOT NULL,
            flags INTEGER NOT NULL DEFAULT 0,
            evr TEXT,
            FOREIGN KEY (package_instance) REFERENCES packages(instance) ON DELETE CASCADE
        );

        CREATE INDEX idx_deps_instance ON deps(package_instance);
        CREATE INDEX idx_deps_kind_name ON deps(kind, name);

        -- File manifest per instance
        CREATE TABLE files (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            package_instance INTEGER NOT NULL,
            path TEXT NOT NULL,
            size INTEGER NOT NULL DEFAULT 0,
            FOREIGN KEY (package_instance) REFERENCES packages(instance) ON DELETE CASCADE
        );

        CREATE INDEX idx_files_instance ON files(package_instance);
        CREATE INDEX idx_files_path ON files(path);
        ",
    )?;

    info!("Schema version 1 created successfully");
    Ok(())
}

/// Schema Version 2: Add transaction history
///
/// Records every transaction id that touched the database, with its type
/// and goal, so rollback tooling can reconstruct what happened when.
fn migrate_v2(conn: &Connection) -> Result<()> {
    debug!("Migrating to schema version 2");

    conn.execute_batch(
        "
        CREATE TABLE transactions (
            tid INTEGER PRIMARY KEY,
            type TEXT NOT NULL DEFAULT 'normal'
                CHECK(type IN ('normal', 'rollback', 'autorollback')),
            goal TEXT NOT NULL DEFAULT 'unknown',
            created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        );
        ",
    )?;

    info!("Schema version 2 applied successfully");
    Ok(())
}
