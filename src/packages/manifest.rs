// src/packages/manifest.rs

//! JSON transaction manifests
//!
//! A manifest describes the install/erase requests a caller wants admitted
//! into one transaction, with enough metadata (dependency sets, file list)
//! for checking, ordering and disk accounting. This is the concrete
//! `PackageHeader` implementation used by the CLI and tests.

use crate::deps::{DepFlags, DepKind, Dependency};
use crate::error::{Error, Result};
use crate::packages::traits::{FileInfo, PackageHeader};
use crate::version::Evr;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

/// Raw dependency entry as written in a manifest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestDep {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub op: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

/// Raw file entry as written in a manifest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestFile {
    pub path: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dev: Option<u64>,
}

/// Raw package entry as written in a manifest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub name: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arch: Option<String>,
    #[serde(default)]
    pub color: u32,
    /// Install entries only: erase the installed instances of this name
    #[serde(default)]
    pub upgrade: bool,
    #[serde(default)]
    pub provides: Vec<ManifestDep>,
    #[serde(default)]
    pub requires: Vec<ManifestDep>,
    #[serde(default)]
    pub conflicts: Vec<ManifestDep>,
    #[serde(default)]
    pub files: Vec<ManifestFile>,
}

/// A transaction manifest: packages to install and packages to erase
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransactionManifest {
    #[serde(default)]
    pub install: Vec<ManifestEntry>,
    #[serde(default)]
    pub erase: Vec<ManifestEntry>,
}

impl TransactionManifest {
    /// Load a manifest from a JSON file
    pub fn load(path: &Path) -> Result<Self> {
        debug!("Loading transaction manifest: {}", path.display());
        let data = std::fs::read_to_string(path)?;
        serde_json::from_str(&data).map_err(|e| Error::InvalidManifest(e.to_string()))
    }
}

impl ManifestEntry {
    /// Resolve the raw entry into a usable package header
    pub fn to_header(&self) -> Result<ManifestHeader> {
        let evr: Evr = self.version.parse()?;

        let mut provides = resolve_deps(&self.provides, DepKind::Provides)?;
        // Every package implicitly provides its own name at its own EVR
        if !provides.iter().any(|p| p.name == self.name) {
            provides.push(Dependency::versioned(
                &self.name,
                DepKind::Provides,
                DepFlags::EQUAL,
                evr.clone(),
            ));
        }

        Ok(ManifestHeader {
            name: self.name.clone(),
            evr,
            arch: self.arch.clone(),
            color: self.color,
            provides,
            requires: resolve_deps(&self.requires, DepKind::Requires)?,
            conflicts: resolve_deps(&self.conflicts, DepKind::Conflicts)?,
            files: self
                .files
                .iter()
                .map(|f| FileInfo {
                    path: f.path.clone(),
                    size: f.size,
                    dev: f.dev,
                })
                .collect(),
        })
    }
}

fn resolve_deps(raw: &[ManifestDep], kind: DepKind) -> Result<Vec<Dependency>> {
    raw.iter()
        .map(|d| match (&d.op, &d.version) {
            (Some(op), Some(version)) => {
                let flags = DepFlags::from_op(op).ok_or_else(|| {
                    Error::InvalidManifest(format!("bad operator '{}' on {}", op, d.name))
                })?;
                Ok(Dependency::versioned(&d.name, kind, flags, version.parse()?))
            }
            (None, None) => Ok(Dependency::unversioned(&d.name, kind)),
            _ => Err(Error::InvalidManifest(format!(
                "dependency {} has an operator without a version (or vice versa)",
                d.name
            ))),
        })
        .collect()
}

/// Fully resolved package metadata backing a manifest entry
#[derive(Debug, Clone)]
pub struct ManifestHeader {
    name: String,
    evr: Evr,
    arch: Option<String>,
    color: u32,
    provides: Vec<Dependency>,
    requires: Vec<Dependency>,
    conflicts: Vec<Dependency>,
    files: Vec<FileInfo>,
}

impl ManifestHeader {
    /// Build a minimal header, mostly useful in tests and examples
    pub fn new(name: &str, version: &str) -> Result<Self> {
        ManifestEntry {
            name: name.to_string(),
            version: version.to_string(),
            arch: None,
            color: 0,
            upgrade: false,
            provides: Vec::new(),
            requires: Vec::new(),
            conflicts: Vec::new(),
            files: Vec::new(),
        }
        .to_header()
    }

    pub fn with_arch(mut self, arch: &str) -> Self {
        self.arch = Some(arch.to_string());
        self
    }

    pub fn with_color(mut self, color: u32) -> Self {
        self.color = color;
        self
    }

    pub fn with_requires(mut self, name: &str) -> Self {
        self.requires
            .push(Dependency::unversioned(name, DepKind::Requires));
        self
    }

    pub fn with_versioned_requires(mut self, name: &str, op: &str, version: &str) -> Self {
        self.requires.push(Dependency::versioned(
            name,
            DepKind::Requires,
            DepFlags::from_op(op).expect("bad operator"),
            version.parse().expect("bad version"),
        ));
        self
    }

    pub fn with_provides(mut self, name: &str, version: &str) -> Self {
        self.provides.push(Dependency::versioned(
            name,
            DepKind::Provides,
            DepFlags::EQUAL,
            version.parse().expect("bad version"),
        ));
        self
    }

    pub fn with_conflicts(mut self, name: &str) -> Self {
        self.conflicts
            .push(Dependency::unversioned(name, DepKind::Conflicts));
        self
    }

    pub fn with_file(mut self, path: &str, size: u64) -> Self {
        self.files.push(FileInfo {
            path: path.to_string(),
            size,
            dev: None,
        });
        self
    }
}

impl PackageHeader for ManifestHeader {
    fn name(&self) -> &str {
        &self.name
    }

    fn evr(&self) -> &Evr {
        &self.evr
    }

    fn arch(&self) -> Option<&str> {
        self.arch.as_deref()
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
