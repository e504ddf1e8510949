// src/packages/traits.rs

//! The narrow interface to externally parsed package metadata

use crate::deps::Dependency;
use crate::version::{Evr, PackageId};

/// Metadata about a file within a package
#[derive(Debug, Clone)]
pub struct FileInfo {
    pub path: String,
    pub size: u64,
    /// Backing device, when the packager recorded one; otherwise resolved
    /// against the mount table by path prefix
    pub dev: Option<u64>,
}

/// A path-prefix rewrite applied to a package's files at admission
#[derive(Debug, Clone)]
pub struct Relocation {
    pub old_prefix: String,
    pub new_prefix: String,
}

/// Common interface for parsed package metadata
///
/// Identity extraction, dependency sets and the file manifest all come from
/// whatever parsed the package; the transaction engine never looks inside
/// an archive itself.
pub trait PackageHeader {
    /// Package name
    fn name(&self) -> &str;

    /// Epoch-version-release identity
    fn evr(&self) -> &Evr;

    /// Package architecture (e.g. "x86_64"), if any
    fn arch(&self) -> Option<&str>;

    /// Multilib color bits; 0 when uncolored
    fn color(&self) -> u32 {
        0
    }

    /// Capabilities this package provides
    fn provides(&self) -> &[Dependency];

    /// Capabilities this package requires
    fn requires(&self) -> &[Dependency];

    /// Packages this one cannot coexist with
    fn conflicts(&self) -> &[Dependency] {
        &[]
    }

    /// Files the package would lay down
    fn files(&self) -> &[FileInfo];

    /// Full identity value
    fn id(&self) -> PackageId {
        PackageId::new(self.name(), self.evr().clone(), self.arch())
    }

    /// Name-epoch:version-release string
    fn nevr(&self) -> String {
        self.id().nevr()
    }

    /// Name-epoch:version-release.arch string
    fn nevra(&self) -> String {
        self.id().nevra()
    }
}
