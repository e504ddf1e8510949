// src/db/mod.rs

//! Package database behind a narrow interface
//!
//! The transaction engine treats package storage as an opaque capability:
//! open/close, init, rebuild, verify, keyed iteration, and whole-package
//! add/remove. Everything is SQLite underneath; nothing above this module
//! knows that.

pub mod models;
pub mod schema;

use crate::deps::{DepKind, Dependency};
use crate::error::{Error, Result};
use crate::packages::traits::PackageHeader;
use models::{DepRecord, FileRecord, PackageRecord};
use rusqlite::{Connection, OpenFlags};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Database open mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DbMode {
    ReadOnly,
    ReadWrite,
}

/// Keyed iteration index
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DbTag {
    /// Package name
    Name,
    /// Provided capability name
    Provides,
    /// Owned file path
    Path,
}

/// Iterator over package records matching a keyed lookup
pub struct MatchIterator {
    records: std::vec::IntoIter<PackageRecord>,
}

impl Iterator for MatchIterator {
    type Item = PackageRecord;

    fn next(&mut self) -> Option<PackageRecord> {
        self.records.next()
    }
}

/// An open package database (install database or auxiliary solve database)
pub struct PackageDb {
    conn: Connection,
    path: PathBuf,
    mode: DbMode,
}

impl PackageDb {
    /// Create a new package database at the specified path
    ///
    /// Creates the file and sets up the schema. This is idempotent -
    /// calling it on an existing database is safe.
    pub fn init(db_path: &Path, mode: DbMode) -> Result<Self> {
        debug!("Initializing database at: {}", db_path.display());

        // Create parent directories if they don't exist
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                Error::InitError(format!("Failed to create database directory: {}", e))
            })?;
        }

        let conn = Connection::open(db_path)?;

        // Set pragmas for better performance and reliability
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            PRAGMA busy_timeout = 5000;
            ",
        )?;

        schema::migrate(&conn)?;

        info!("Database initialized successfully");

        Ok(Self {
            conn,
            path: db_path.to_path_buf(),
            mode,
        })
    }

    /// Open an existing package database
    pub fn open(db_path: &Path, mode: DbMode) -> Result<Self> {
        if !db_path.exists() {
            return Err(Error::DatabaseNotFound(db_path.display().to_string()));
        }

        let flags = match mode {
            DbMode::ReadOnly => OpenFlags::SQLITE_OPEN_READ_ONLY,
            DbMode::ReadWrite => {
                OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE
            }
        };
        let conn = Connection::open_with_flags(db_path, flags)?;

        // Set pragmas
        conn.execute_batch(
            "
            PRAGMA foreign_keys = ON;
            PRAGMA busy_timeout = 5000;
            ",
        )?;

        Ok(Self {
            conn,
            path: db_path.to_path_buf(),
            mode,
        })
    }

    pub fn mode(&self) -> DbMode {
        self.mode
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The raw connection, for model-level queries
    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Close the database, reporting errors instead of swallowing them
    pub fn close(self) -> Result<()> {
        debug!("Closing database: {}", self.path.display());
        self.conn.close().map_err(|(_conn, e)| Error::Database(e))
    }

    /// Rebuild storage: reindex everything and reclaim free pages
    pub fn rebuild(&self) -> Result<()> {
        info!("Rebuilding database: {}", self.path.display());
        self.conn.execute_batch("REINDEX; VACUUM;")?;
        Ok(())
    }

    /// Verify storage integrity
    pub fn verify(&self) -> Result<bool> {
        let status: String = self
            .conn
            .query_row("PRAGMA integrity_check", [], |row| row.get(0))?;
        Ok(status == "ok")
    }

    /// Iterate package records matching a keyed lookup
    pub fn iterate(&self, tag: DbTag, key: &str) -> Result<MatchIterator> {
        let records = match tag {
            DbTag::Name => PackageRecord::find_by_name(&self.conn, key)?,
            DbTag::Provides => {
                self.instances_to_records(DepRecord::instances_with(
                    &self.conn,
                    DepKind::Provides,
                    key,
                )?)?
            }
            DbTag::Path => {
                let mut stmt = self.conn.prepare(
                    "SELECT DISTINCT package_instance FROM files WHERE path = ?1",
                )?;
                let instances = stmt
                    .query_map([key], |row| row.get(0))?
                    .collect::<std::result::Result<Vec<i64>, _>>()?;
                self.instances_to_records(instances)?
            }
        };

        Ok(MatchIterator {
            records: records.into_iter(),
        })
    }

    /// Installed packages whose provides overlap the given requirement
    pub fn what_provides(&self, dep: &Dependency) -> Result<Vec<PackageRecord>> {
        let mut matches = Vec::new();
        for instance in DepRecord::instances_with(&self.conn, DepKind::Provides, &dep.name)? {
            let provides = DepRecord::deps_for(&self.conn, instance, DepKind::Provides)?;
            if provides.iter().any(|p| dep.satisfied_by(p)) {
                if let Some(record) = PackageRecord::find_by_instance(&self.conn, instance)? {
                    matches.push(record);
                }
            }
        }
        Ok(matches)
    }

    /// Store a whole package (record, dependency sets, file manifest)
    pub fn add_package(&self, header: &dyn PackageHeader, tid: i64) -> Result<i64> {
        let tx = self.conn.unchecked_transaction()?;

        let mut record = PackageRecord::from_header(header, tid);
        let instance = record.insert(&tx)?;
        DepRecord::insert_set(&tx, instance, DepKind::Provides, header.provides())?;
        DepRecord::insert_set(&tx, instance, DepKind::Requires, header.requires())?;
        DepRecord::insert_set(&tx, instance, DepKind::Conflicts, header.conflicts())?;
        FileRecord::insert_set(&tx, instance, header.files())?;

        tx.commit()?;
        debug!("Added {} as instance {}", header.nevra(), instance);
        Ok(instance)
    }

    /// Remove a package instance; dependency and file rows cascade
    pub fn remove_package(&self, instance: i64) -> Result<()> {
        PackageRecord::delete(&self.conn, instance)?;
        debug!("Removed instance {}", instance);
        Ok(())
    }

    /// Record that a transaction touched this database
    pub fn record_transaction(&self, tid: i64, ts_type: &str, goal: &str) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO transactions (tid, type, goal) VALUES (?1, ?2, ?3)",
            rusqlite::params![tid, ts_type, goal],
        )?;
        Ok(())
    }

    fn instances_to_records(&self, instances: Vec<i64>) -> Result<Vec<PackageRecord>> {
        let mut records = Vec::with_capacity(instances.len());
        for instance in instances {
            if let Some(record) = PackageRecord::find_by_instance(&self.conn, instance)? {
                records.push(record);
            }
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packages::manifest::ManifestHeader;
    use tempfile::tempdir;

    fn scratch_db() -> (tempfile::TempDir, PackageDb) {
        let dir = tempdir().unwrap();
        let db = PackageDb::init(&dir.path().join("packages.db"), DbMode::ReadWrite).unwrap();
        (dir, db)
    }

    #[test]
    fn test_init_creates_database() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested/dir/packages.db");

        let db = PackageDb::init(&path, DbMode::ReadWrite).unwrap();
        assert!(path.exists());
        db.close().unwrap();
    }

    #[test]
    fn test_open_nonexistent_database() {
        let result = PackageDb::open(Path::new("/nonexistent/path/db.sqlite"), DbMode::ReadOnly);
        assert!(matches!(result, Err(Error::DatabaseNotFound(_))));
    }

    #[test]
    fn test_add_and_iterate() {
        let (_dir, db) = scratch_db();

        let header = ManifestHeader::new("zlib", "1.3-2")
            .unwrap()
            .with_provides("libz.so.1", "1.3")
            .with_file("/usr/lib/libz.so.1", 102400);
        let instance = db.add_package(&header, 42).unwrap();
        assert!(instance > 0);

        let by_name: Vec<_> = db.iterate(DbTag::Name, "zlib").unwrap().collect();
        assert_eq!(by_name.len(), 1);
        assert_eq!(by_name[0].tid, 42);

        let by_provide: Vec<_> = db.iterate(DbTag::Provides, "libz.so.1").unwrap().collect();
        assert_eq!(by_provide.len(), 1);

        let by_path: Vec<_> = db
            .iterate(DbTag::Path, "/usr/lib/libz.so.1")
            .unwrap()
            .collect();
        assert_eq!(by_path.len(), 1);

        let none: Vec<_> = db.iterate(DbTag::Name, "absent").unwrap().collect();
        assert!(none.is_empty());
    }

    #[test]
    fn test_what_provides_respects_version_range() {
        let (_dir, db) = scratch_db();

        let header = ManifestHeader::new("openssl-libs", "3.0.7-1").unwrap();
        db.add_package(&header, 1).unwrap();

        let satisfied = Dependency::versioned(
            "openssl-libs",
            DepKind::Requires,
            crate::deps::DepFlags::from_op(">=").unwrap(),
            "3.0".parse().unwrap(),
        );
        assert_eq!(db.what_provides(&satisfied).unwrap().len(), 1);

        let unsatisfied = Dependency::versioned(
            "openssl-libs",
            DepKind::Requires,
            crate::deps::DepFlags::from_op(">=").unwrap(),
            "3.2".parse().unwrap(),
        );
        assert!(db.what_provides(&unsatisfied).unwrap().is_empty());
    }

    #[test]
    fn test_remove_package() {
        let (_dir, db) = scratch_db();

        let header = ManifestHeader::new("tmp-pkg", "1.0-1").unwrap();
        let instance = db.add_package(&header, 1).unwrap();

        db.remove_package(instance).unwrap();
        let remaining: Vec<_> = db.iterate(DbTag::Name, "tmp-pkg").unwrap().collect();
        assert!(remaining.is_empty());
    }

    #[test]
    fn test_rebuild_and_verify() {
        let (_dir, db) = scratch_db();
        db.rebuild().unwrap();
        assert!(db.verify().unwrap());
    }
}
