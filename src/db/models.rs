// src/db/models.rs

//! Data models for Tessera database entities
//!
//! This module defines Rust structs that correspond to database tables
//! and provides methods for creating, reading, and deleting records.

use crate::deps::{DepFlags, DepKind, Dependency};
use crate::error::Result;
use crate::packages::traits::{FileInfo, PackageHeader};
use crate::version::{Evr, PackageId};
use rusqlite::{Connection, OptionalExtension, Row, params};

/// One installed package instance
#[derive(Debug, Clone)]
pub struct PackageRecord {
    pub instance: Option<i64>,
    pub name: String,
    pub epoch: u32,
    pub version: String,
    pub release: String,
    pub arch: Option<String>,
    pub color: u32,
    pub tid: i64,
    pub installed_at: Option<String>,
}

impl PackageRecord {
    /// Build a record from parsed package metadata
    pub fn from_header(header: &dyn PackageHeader, tid: i64) -> Self {
        let evr = header.evr();
        Self {
            instance: None,
            name: header.name().to_string(),
            epoch: evr.epoch,
            version: evr.version.clone(),
            release: evr.release.clone(),
            arch: header.arch().map(|a| a.to_string()),
            color: header.color(),
            tid,
            installed_at: None,
        }
    }

    /// The record's EVR identity
    pub fn evr(&self) -> Evr {
        Evr::new(self.epoch, &self.version, &self.release)
    }

    /// The record's full identity
    pub fn id(&self) -> PackageId {
        PackageId::new(&self.name, self.evr(), self.arch.as_deref())
    }

    /// Insert this package into the database
    pub fn insert(&mut self, conn: &Connection) -> Result<i64> {
        conn.execute(
            "INSERT INTO packages (name, epoch, version, release, arch, color, tid)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                &self.name,
                &self.epoch,
                &self.version,
                &self.release,
                &self.arch,
                &self.color,
                &self.tid,
            ],
        )?;

        let instance = conn.last_insert_rowid();
        self.instance = Some(instance);
        Ok(instance)
    }

    /// Find a package by instance id
    pub fn find_by_instance(conn: &Connection, instance: i64) -> Result<Option<Self>> {
        let mut stmt = conn.prepare(
            "SELECT instance, name, epoch, version, release, arch, color, tid, installed_at
             FROM packages WHERE instance = ?1",
        )?;

        let record = stmt.query_row([instance], Self::from_row).optional()?;

        Ok(record)
    }

    /// Find package instances by name
    pub fn find_by_name(conn: &Connection, name: &str) -> Result<Vec<Self>> {
        let mut stmt = conn.prepare(
            "SELECT instance, name, epoch, version, release, arch, color, tid, installed_at
             FROM packages WHERE name = ?1 ORDER BY instance",
        )?;

        let records = stmt
            .query_map([name], Self::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(records)
    }

    /// List all installed packages
    pub fn list_all(conn: &Connection) -> Result<Vec<Self>> {
        let mut stmt = conn.prepare(
            "SELECT instance, name, epoch, version, release, arch, color, tid, installed_at
             FROM packages ORDER BY name, instance",
        )?;

        let records = stmt
            .query_map([], Self::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(records)
    }

    /// Delete a package instance; deps and files cascade
    pub fn delete(conn: &Connection, instance: i64) -> Result<()> {
        conn.execute("DELETE FROM packages WHERE instance = ?1", [instance])?;
        Ok(())
    }

    /// Load the full header view of this instance (deps and files included)
    pub fn to_header(&self, conn: &Connection) -> Result<StoredHeader> {
        let instance = self.instance.unwrap_or(0);
        Ok(StoredHeader {
            id: self.id(),
            color: self.color,
            provides: DepRecord::deps_for(conn, instance, DepKind::Provides)?,
            requires: DepRecord::deps_for(conn, instance, DepKind::Requires)?,
            conflicts: DepRecord::deps_for(conn, instance, DepKind::Conflicts)?,
            files: FileRecord::find_by_instance(conn, instance)?
                .into_iter()
                .map(|f| FileInfo {
                    path: f.path,
                    size: f.size as u64,
                    dev: None,
                })
                .collect(),
        })
    }

    /// Convert a database row to a PackageRecord
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            instance: Some(row.get(0)?),
            name: row.get(1)?,
            epoch: row.get(2)?,
            version: row.get(3)?,
            release: row.get(4)?,
            arch: row.get(5)?,
            color: row.get(6)?,
            tid: row.get(7)?,
            installed_at: row.get(8)?,
        })
    }
}

fn kind_str(kind: DepKind) -> &'static str {
    match kind {
        DepKind::Provides => "provides",
        DepKind::Requires => "requires",
        DepKind::Conflicts => "conflicts",
        DepKind::Obsoletes => "obsoletes",
    }
}

/// One dependency relation owned by a package instance
#[derive(Debug, Clone)]
pub struct DepRecord {
    pub id: Option<i64>,
    pub package_instance: i64,
    pub kind: DepKind,
    pub name: String,
    pub flags: u32,
    pub evr: Option<String>,
}

impl DepRecord {
    /// Store one dependency set for a package instance
    pub fn insert_set(
        conn: &Connection,
        instance: i64,
        kind: DepKind,
        deps: &[Dependency],
    ) -> Result<()> {
        let mut stmt = conn.prepare(
            "INSERT INTO deps (package_instance, kind, name, flags, evr)
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )?;
        for dep in deps {
            stmt.execute(params![
                instance,
                kind_str(kind),
                &dep.name,
                dep.flags.bits(),
                dep.evr.as_ref().map(|e| e.to_string()),
            ])?;
        }
        Ok(())
    }

    /// Load one dependency set of a package instance as `Dependency` values
    pub fn deps_for(conn: &Connection, instance: i64, kind: DepKind) -> Result<Vec<Dependency>> {
        let mut stmt = conn.prepare(
            "SELECT name, flags, evr FROM deps
             WHERE package_instance = ?1 AND kind = ?2 ORDER BY id",
        )?;

        let rows = stmt
            .query_map(params![instance, kind_str(kind)], |row| {
                let name: String = row.get(0)?;
                let flags: u32 = row.get(1)?;
                let evr: Option<String> = row.get(2)?;
                Ok((name, flags, evr))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut deps = Vec::with_capacity(rows.len());
        for (name, flags, evr) in rows {
            deps.push(Dependency {
                name,
                kind,
                flags: DepFlags::from_bits_truncate(flags),
                evr: evr.map(|e| e.parse()).transpose()?,
            });
        }
        Ok(deps)
    }

    /// Instances whose named dependency set contains `name`
    pub fn instances_with(conn: &Connection, kind: DepKind, name: &str) -> Result<Vec<i64>> {
        let mut stmt = conn.prepare(
            "SELECT DISTINCT package_instance FROM deps WHERE kind = ?1 AND name = ?2",
        )?;

        let instances = stmt
            .query_map(params![kind_str(kind), name], |row| row.get(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(instances)
    }
}

/// One file owned by a package instance
#[derive(Debug, Clone)]
pub struct FileRecord {
    pub id: Option<i64>,
    pub package_instance: i64,
    pub path: String,
    pub size: i64,
}

impl FileRecord {
    /// Store the file manifest of a package instance
    pub fn insert_set(conn: &Connection, instance: i64, files: &[FileInfo]) -> Result<()> {
        let mut stmt = conn.prepare(
            "INSERT INTO files (package_instance, path, size) VALUES (?1, ?2, ?3)",
        )?;
        for file in files {
            stmt.execute(params![instance, &file.path, file.size as i64])?;
        }
        Ok(())
    }

    /// Find all files belonging to a package instance
    pub fn find_by_instance(conn: &Connection, instance: i64) -> Result<Vec<Self>> {
        let mut stmt = conn.prepare(
            "SELECT id, package_instance, path, size FROM files
             WHERE package_instance = ?1 ORDER BY id",
        )?;

        let files = stmt
            .query_map([instance], |row| {
                Ok(Self {
                    id: Some(row.get(0)?),
                    package_instance: row.get(1)?,
                    path: row.get(2)?,
                    size: row.get(3)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(files)
    }
}

/// Header view of a stored package instance
///
/// Lets database records flow back into the engine through the same
/// `PackageHeader` seam that freshly parsed packages use.
#[derive(Debug, Clone)]
pub struct StoredHeader {
    id: PackageId,
    color: u32,
    provides: Vec<Dependency>,
    requires: Vec<Dependency>,
    conflicts: Vec<Dependency>,
    files: Vec<FileInfo>,
}

impl PackageHeader for StoredHeader {
    fn name(&self) -> &str {
        &self.id.name
    }

    fn evr(&self) -> &Evr {
        &self.id.evr
    }

    fn arch(&self) -> Option<&str> {
        self.id.arch.as_deref()
    }

    fn color(&self) -> u32 {
        self.color
    }

    fn provides(&self) -> &[Dependency] {
        &self.provides
    }

    fn requires(&self) -> &[Dependency] {
        &self.requires
    }

    fn conflicts(&self) -> &[Dependency] {
        &self.conflicts
    }

    fn files(&self) -> &[FileInfo] {
        &self.files
    }
}
