//! Liveness anchors - keep managed wrappers reachable from native code
//!
//! Native code holds opaque `AnchorId`s; the registry maps them back to
//! managed objects. Strong anchors keep the wrapper alive, weak anchors only
//! observe it. Every anchor belongs to a module so an unload can sweep exactly
//! that module's entries.
//!
//! Design:
//! - One mutex over the entry map plus a per-module index (sweep is
//!   proportional to the module's anchors, not the whole table)
//! - Ids are monotonic and never reused
//! - Removed holds are dropped after the lock is released, so a managed
//!   destructor that re-enters the registry cannot deadlock

mod registry;

pub use registry::{AnchorGuard, AnchorRegistry, ManagedRef, SweepReport};

use core::fmt;
use serde::{Deserialize, Serialize};

/// Identity of a script module; `HOST` owns anchors created outside any module
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[repr(transparent)]
pub struct ModuleId(u32);

impl ModuleId {
    pub const HOST: ModuleId = ModuleId(0);

    #[inline]
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    #[inline]
    pub const fn raw(self) -> u32 {
        self.0
    }

    #[inline]
    pub const fn is_host(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Debug for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ModuleId({})", self.0)
    }
}

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_host() {
            f.write_str("host")
        } else {
            write!(f, "module#{}", self.0)
        }
    }
}

/// Opaque anchor handle handed to native code. Zero is never issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
#[repr(transparent)]
pub struct AnchorId(u64);

impl AnchorId {
    pub const NONE: AnchorId = AnchorId(0);

    #[inline]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    #[inline]
    pub const fn raw(self) -> u64 {
        self.0
    }

    #[inline]
    pub const fn is_none(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for AnchorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "anchor#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Strength {
    /// Keeps the managed object reachable
    Strong,
    /// Observes without keeping alive
    Weak,
}
