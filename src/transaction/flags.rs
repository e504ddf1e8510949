// src/transaction/flags.rs

//! Flag sets controlling transaction behavior
//!
//! Three independent sets: transaction flags gate what `run()` does,
//! verification flags select which digest/signature checks are *skipped*
//! (a set bit disables a check), and the problem filter picks which
//! recorded problem categories a caller has chosen to ignore.

use bitflags::bitflags;

bitflags! {
    /// Bits that control `TransactionSet::run`
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct TransFlags: u32 {
        /// Compute and report, but change nothing
        const TEST          = 1 << 0;
        /// Touch only the database, not the filesystem
        const JUSTDB        = 1 << 1;
        /// Skip pre/post scriptlets
        const NOSCRIPTS     = 1 << 2;
        /// Skip trigger scriptlets
        const NOTRIGGERS    = 1 << 3;
        /// Skip documentation files
        const NODOCS        = 1 << 4;
        /// Install every file, even ones normally skipped
        const ALLFILES      = 1 << 5;
        /// Keep a reverse transaction scored for automatic rollback
        const AUTO_ROLLBACK = 1 << 6;
    }
}

impl TransFlags {
    /// Is this a dry run?
    pub fn test_only(&self) -> bool {
        self.contains(TransFlags::TEST)
    }

    /// Is autorollback scoring enabled?
    pub fn autorollback(&self) -> bool {
        self.contains(TransFlags::AUTO_ROLLBACK)
    }
}

bitflags! {
    /// Bits that *disable* digest and signature verification
    ///
    /// Empty means full verification. Convenience unions cover the usual
    /// groupings: all digests, all signatures, header-only, payload-only.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct VerifyFlags: u32 {
        const NO_HEADER_DIGEST     = 1 << 0;
        const NO_HEADER_SIGNATURE  = 1 << 1;
        const NO_PAYLOAD_DIGEST    = 1 << 2;
        const NO_PAYLOAD_SIGNATURE = 1 << 3;

        const NO_DIGESTS = Self::NO_HEADER_DIGEST.bits() | Self::NO_PAYLOAD_DIGEST.bits();
        const NO_SIGNATURES =
            Self::NO_HEADER_SIGNATURE.bits() | Self::NO_PAYLOAD_SIGNATURE.bits();
        const NO_HEADER =
            Self::NO_HEADER_DIGEST.bits() | Self::NO_HEADER_SIGNATURE.bits();
        const NO_PAYLOAD =
            Self::NO_PAYLOAD_DIGEST.bits() | Self::NO_PAYLOAD_SIGNATURE.bits();
    }
}

impl VerifyFlags {
    /// Are any digest checks skipped?
    pub fn skips_digest_check(&self) -> bool {
        self.intersects(VerifyFlags::NO_DIGESTS)
    }

    /// Are any signature checks skipped?
    pub fn skips_signature_check(&self) -> bool {
        self.intersects(VerifyFlags::NO_SIGNATURES)
    }

    /// Are all header checks skipped?
    pub fn skips_header_checks(&self) -> bool {
        self.contains(VerifyFlags::NO_HEADER)
    }

    /// Are all payload checks skipped?
    pub fn skips_payload_checks(&self) -> bool {
        self.contains(VerifyFlags::NO_PAYLOAD)
    }
}

bitflags! {
    /// Problem categories a caller has chosen to ignore
    ///
    /// Matching a bit suppresses display and success-counting, never the
    /// recording itself.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ProblemFilter: u32 {
        const DEPENDENCIES = 1 << 0;
        const CONFLICTS    = 1 << 1;
        const DISK_SPACE   = 1 << 2;
        const DISK_NODES   = 1 << 3;
        const DATABASE     = 1 << 4;
    }
}
