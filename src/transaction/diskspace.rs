// src/transaction/diskspace.rs

//! Disk-space admission accounting
//!
//! One snapshot of every mounted filesystem is taken per transaction;
//! per-file updates then accumulate signed needed-block/inode counters
//! (reclaimed space goes negative). Byte counts round up to whole
//! filesystem blocks, and needed blocks are inflated by the root-reserved
//! 5% before being compared against what is available.

use crate::error::{Error, Result};
use crate::transaction::element::Element;
use crate::transaction::problems::{Problem, ProblemKind, ProblemSet};
use std::collections::BTreeSet;
use tracing::{debug, warn};

/// Snapshot of one mounted filesystem
#[derive(Debug, Clone)]
pub struct FilesystemStats {
    pub dev: u64,
    pub mount_point: String,
    pub block_size: u64,
    pub blocks_avail: i64,
    pub inodes_avail: i64,
}

/// Source of mounted-filesystem snapshots
pub trait MountProvider {
    fn mounted_filesystems(&self) -> Result<Vec<FilesystemStats>>;
}

/// The real mount table, via /proc/mounts and statvfs
pub struct SystemMounts;

impl MountProvider for SystemMounts {
    fn mounted_filesystems(&self) -> Result<Vec<FilesystemStats>> {
        use std::os::unix::fs::MetadataExt;

        let mtab = std::fs::read_to_string("/proc/mounts")
            .map_err(|e| Error::MountProbe(e.to_string()))?;

        let mut filesystems = Vec::new();
        for line in mtab.lines() {
            let mut fields = line.split_whitespace();
            let (Some(source), Some(mount_point)) = (fields.next(), fields.next()) else {
                continue;
            };
            // Pseudo filesystems (proc, sysfs, tmpfs, ...) are not backed
            // by a device worth accounting against
            if !source.starts_with('/') {
                continue;
            }

            let Ok(meta) = std::fs::metadata(mount_point) else {
                warn!("Skipping unreadable mount point {}", mount_point);
                continue;
            };
            let vfs = match nix::sys::statvfs::statvfs(mount_point) {
                Ok(vfs) => vfs,
                Err(e) => {
                    warn!("statvfs({}) failed: {}", mount_point, e);
                    continue;
                }
            };

            let block_size = if vfs.fragment_size() > 0 {
                vfs.fragment_size() as u64
            } else {
                vfs.block_size() as u64
            };

            filesystems.push(FilesystemStats {
                dev: meta.dev(),
                mount_point: mount_point.to_string(),
                block_size,
                blocks_avail: vfs.blocks_available() as i64,
                inodes_avail: vfs.files_available() as i64,
            });
        }

        debug!("Snapshotted {} mounted filesystems", filesystems.len());
        Ok(filesystems)
    }
}

/// A fixed mount table, for tests and for callers that already know
/// their filesystem layout
pub struct FixedMounts(pub Vec<FilesystemStats>);

impl MountProvider for FixedMounts {
    fn mounted_filesystems(&self) -> Result<Vec<FilesystemStats>> {
        Ok(self.0.clone())
    }
}

/// Disposition of one file during execution
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileAction {
    /// A file that did not exist before
    Create,
    /// A file replacing an existing one
    Replace,
    /// A file being removed
    Remove,
    /// A file the execution driver will not touch
    Skip,
}

/// Round a byte count up to whole filesystem blocks
pub fn block_round(size: u64, block_size: u64) -> i64 {
    if block_size == 0 {
        return 0;
    }
    size.div_ceil(block_size) as i64
}

/// Inflate a needed-block count by the root-only reserved space (5%)
pub fn reserve_adjusted(blocks: i64) -> i64 {
    blocks * 21 / 20
}

#[derive(Debug)]
struct FilesystemUsage {
    stats: FilesystemStats,
    blocks_needed: i64,
    inodes_needed: i64,
}

/// Per-transaction disk-space monitor
#[derive(Debug, Default)]
pub struct DiskSpace {
    filesystems: Vec<FilesystemUsage>,
}

impl DiskSpace {
    /// Snapshot all mounted filesystems; must run before any update
    pub fn snapshot(provider: &dyn MountProvider) -> Result<Self> {
        let filesystems = provider
            .mounted_filesystems()?
            .into_iter()
            .map(|stats| FilesystemUsage {
                stats,
                blocks_needed: 0,
                inodes_needed: 0,
            })
            .collect();
        Ok(Self { filesystems })
    }

    /// Device hosting the given path, by longest mount-point prefix
    pub fn device_for(&self, path: &str) -> Option<u64> {
        self.filesystems
            .iter()
            .filter(|fs| {
                let mp = fs.stats.mount_point.as_str();
                mp == "/"
                    || path == mp
                    || (path.starts_with(mp) && path.as_bytes().get(mp.len()) == Some(&b'/'))
            })
            .max_by_key(|fs| fs.stats.mount_point.len())
            .map(|fs| fs.stats.dev)
    }

    /// Adjust the needed counters of the filesystem hosting `dev`
    ///
    /// `fixup_size` corrects for files whose size changes in place (e.g.
    /// merged configuration files).
    pub fn update(
        &mut self,
        dev: u64,
        file_size: u64,
        prev_size: u64,
        fixup_size: u64,
        action: FileAction,
    ) {
        let Some(fs) = self.filesystems.iter_mut().find(|fs| fs.stats.dev == dev) else {
            return;
        };
        let bsize = fs.stats.block_size;

        match action {
            FileAction::Create => {
                fs.blocks_needed += block_round(file_size, bsize);
                fs.inodes_needed += 1;
            }
            FileAction::Replace => {
                fs.blocks_needed += block_round(file_size, bsize) - block_round(prev_size, bsize);
            }
            FileAction::Remove => {
                fs.blocks_needed -= block_round(file_size, bsize);
                fs.inodes_needed -= 1;
            }
            FileAction::Skip => {}
        }

        if fixup_size != 0 {
            fs.blocks_needed -= block_round(fixup_size, bsize);
        }
    }

    /// Needed blocks currently accumulated for a device (before the
    /// reserve adjustment)
    pub fn needed_blocks(&self, dev: u64) -> Option<i64> {
        self.filesystems
            .iter()
            .find(|fs| fs.stats.dev == dev)
            .map(|fs| fs.blocks_needed)
    }

    /// Needed inodes currently accumulated for a device
    pub fn needed_inodes(&self, dev: u64) -> Option<i64> {
        self.filesystems
            .iter()
            .find(|fs| fs.stats.dev == dev)
            .map(|fs| fs.inodes_needed)
    }

    /// Check every filesystem the element touches, appending one
    /// diagnostic per deficient resource; the scan never stops early, so
    /// all deficient filesystems for one element are reported together.
    pub fn check_problems(&self, element: &Element, problems: &mut ProblemSet) {
        let mut touched = BTreeSet::new();
        for file in &element.files {
            let dev = file.dev.or_else(|| self.device_for(&file.path));
            if let Some(dev) = dev {
                touched.insert(dev);
            }
        }

        let nevra = element.nevra();
        for fs in self.filesystems.iter().filter(|fs| touched.contains(&fs.stats.dev)) {
            let adjusted = reserve_adjusted(fs.blocks_needed);
            if adjusted > fs.stats.blocks_avail {
                problems.append(Problem::new(
                    ProblemKind::DiskSpace,
                    &nevra,
                    format!(
                        "needs {} more blocks on {} ({} needed, {} available)",
                        adjusted - fs.stats.blocks_avail,
                        fs.stats.mount_point,
                        adjusted,
                        fs.stats.blocks_avail
                    ),
                ));
            }
            if fs.inodes_needed > fs.stats.inodes_avail {
                problems.append(Problem::new(
                    ProblemKind::DiskNodes,
                    &nevra,
                    format!(
                        "needs {} more inodes on {}",
                        fs.inodes_needed - fs.stats.inodes_avail,
                        fs.stats.mount_point
                    ),
                ));
            }
        }
    }
}
