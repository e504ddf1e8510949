// src/transaction/element.rs

//! Transaction elements
//!
//! One element is one install or erase operation admitted into a
//! transaction. Elements carry a snapshot of the package metadata they
//! were admitted with, so the engine never re-reads headers mid-flight.

use crate::deps::Dependency;
use crate::packages::traits::{FileInfo, PackageHeader, Relocation};
use crate::version::{Evr, PackageId};
use bitflags::bitflags;

/// Whether an element installs or erases its package
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementKind {
    Install,
    Erase,
}

bitflags! {
    /// Element-type bits, as recorded per package in the score board
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ElementKinds: u8 {
        const INSTALL = 1 << 0;
        const ERASE   = 1 << 1;
    }
}

impl ElementKind {
    pub fn bit(&self) -> ElementKinds {
        match self {
            ElementKind::Install => ElementKinds::INSTALL,
            ElementKind::Erase => ElementKinds::ERASE,
        }
    }
}

/// Engine capability namespace in requirements: `tessera(feature)`
const CAPABILITY_PREFIX: &str = "tessera(";

/// Features this engine implements; anything else in the capability
/// namespace makes admission fail with "needs capabilities"
const SUPPORTED_CAPABILITIES: &[&str] = &[
    "tessera(versioned-deps)",
    "tessera(explicit-conflicts)",
    "tessera(file-manifests)",
];

/// Rewrite a path through the longest matching relocation prefix
fn relocate(path: &str, relocations: &[Relocation]) -> String {
    relocations
        .iter()
        .filter(|r| {
            path == r.old_prefix
                || (path.starts_with(&r.old_prefix)
                    && path.as_bytes().get(r.old_prefix.len()) == Some(&b'/'))
        })
        .max_by_key(|r| r.old_prefix.len())
        .map(|r| format!("{}{}", r.new_prefix, &path[r.old_prefix.len()..]))
        .unwrap_or_else(|| path.to_string())
}

/// First capability requirement the engine does not implement, if any
pub(crate) fn unsupported_capability(header: &dyn PackageHeader) -> Option<String> {
    header
        .requires()
        .iter()
        .find(|dep| {
            dep.name.starts_with(CAPABILITY_PREFIX)
                && !SUPPORTED_CAPABILITIES.contains(&dep.name.as_str())
        })
        .map(|dep| dep.name.clone())
}

/// One install or erase operation in a transaction
#[derive(Debug, Clone)]
pub struct Element {
    pub kind: ElementKind,
    pub id: PackageId,
    pub color: u32,
    pub provides: Vec<Dependency>,
    pub requires: Vec<Dependency>,
    pub conflicts: Vec<Dependency>,
    pub files: Vec<FileInfo>,
    /// Retrieval key (e.g. the package file name), install elements only
    pub key: Option<String>,
    /// Database instance being removed, erase elements only
    pub db_instance: Option<i64>,
    /// Slot of the install element this erase accompanies (upgrade)
    pub parent_install: Option<usize>,
}

impl Element {
    /// Snapshot an install element from parsed package metadata
    pub fn install(header: &dyn PackageHeader, key: Option<&str>) -> Self {
        Self::install_relocated(header, key, &[])
    }

    /// Snapshot an install element, rewriting file paths through the
    /// given relocations (longest matching prefix wins)
    pub fn install_relocated(
        header: &dyn PackageHeader,
        key: Option<&str>,
        relocations: &[Relocation],
    ) -> Self {
        Self {
            kind: ElementKind::Install,
            id: header.id(),
            color: header.color(),
            provides: header.provides().to_vec(),
            requires: header.requires().to_vec(),
            conflicts: header.conflicts().to_vec(),
            files: header
                .files()
                .iter()
                .map(|f| FileInfo {
                    path: relocate(&f.path, relocations),
                    size: f.size,
                    dev: f.dev,
                })
                .collect(),
            key: key.map(|k| k.to_string()),
            db_instance: None,
            parent_install: None,
        }
    }

    /// Snapshot an erase element for a stored package instance
    pub fn erase(header: &dyn PackageHeader, db_instance: i64) -> Self {
        Self {
            kind: ElementKind::Erase,
            id: header.id(),
            color: header.color(),
            provides: header.provides().to_vec(),
            requires: header.requires().to_vec(),
            conflicts: header.conflicts().to_vec(),
            files: header.files().to_vec(),
            key: None,
            db_instance: Some(db_instance),
            parent_install: None,
        }
    }

    pub fn is_install(&self) -> bool {
        self.kind == ElementKind::Install
    }

    pub fn is_erase(&self) -> bool {
        self.kind == ElementKind::Erase
    }

    pub fn name(&self) -> &str {
        &self.id.name
    }

    pub fn evr(&self) -> &Evr {
        &self.id.evr
    }

    pub fn nevra(&self) -> String {
        self.id.nevra()
    }
}

impl PackageHeader for Element {
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packages::manifest::ManifestHeader;

    #[test]
    fn test_install_snapshot() {
        let header = ManifestHeader::new("curl", "8.2.1-1")
            .unwrap()
            .with_arch("x86_64")
            .with_requires("libcurl.so.4");
        let element = Element::install(&header, Some("curl-8.2.1-1.x86_64.pkg"));

        assert!(element.is_install());
        assert_eq!(element.nevra(), "curl-8.2.1-1.x86_64");
        assert_eq!(element.key.as_deref(), Some("curl-8.2.1-1.x86_64.pkg"));
        assert_eq!(element.requires.len(), 1);
        assert!(element.db_instance.is_none());
    }

    #[test]
    fn test_erase_snapshot() {
        let header = ManifestHeader::new("oldlib", "0.9-4").unwrap();
        let element = Element::erase(&header, 17);

        assert!(element.is_erase());
        assert_eq!(element.db_instance, Some(17));
        assert!(element.key.is_none());
    }

    #[test]
    fn test_relocated_install_rewrites_file_paths() {
        let header = ManifestHeader::new("relocatable", "1.0-1")
            .unwrap()
            .with_file("/opt/app/bin/tool", 1024)
            .with_file("/etc/app.conf", 128);
        let relocations = vec![Relocation {
            old_prefix: "/opt/app".to_string(),
            new_prefix: "/usr/local/app".to_string(),
        }];
        let element = Element::install_relocated(&header, None, &relocations);

        let paths: Vec<&str> = element.files.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, vec!["/usr/local/app/bin/tool", "/etc/app.conf"]);

        // Prefix matching respects path boundaries
        let header = ManifestHeader::new("other", "1.0-1")
            .unwrap()
            .with_file("/opt/application/x", 1);
        let element = Element::install_relocated(&header, None, &relocations);
        assert_eq!(element.files[0].path, "/opt/application/x");
    }

    #[test]
    fn test_capability_namespace() {
        let supported = ManifestHeader::new("a", "1.0")
            .unwrap()
            .with_requires("tessera(versioned-deps)");
        assert!(unsupported_capability(&supported).is_none());

        let unsupported = ManifestHeader::new("b", "1.0")
            .unwrap()
            .with_requires("tessera(quantum-deps)");
        assert_eq!(
            unsupported_capability(&unsupported).as_deref(),
            Some("tessera(quantum-deps)")
        );

        // Ordinary requirements are not capabilities
        let plain = ManifestHeader::new("c", "1.0").unwrap().with_requires("libz");
        assert!(unsupported_capability(&plain).is_none());
    }
}
