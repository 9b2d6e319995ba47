//! Interned names
//!
//! Script code and the engine exchange member and asset names constantly;
//! interning turns them into 4-byte identities that fit inline in a cell.

use core::fmt;
use dashmap::DashMap;
use once_cell::sync::Lazy;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

static INTERNER: Lazy<NameInterner> = Lazy::new(NameInterner::new);

/// Interned string identity. `Name::EMPTY` is the empty string.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct Name(u32);

struct NameInterner {
    to_id: DashMap<Arc<str>, u32>,
    from_id: DashMap<u32, Arc<str>>,
    next_id: AtomicU32,
}

impl NameInterner {
    fn new() -> Self {
        let interner = Self {
            to_id: DashMap::with_capacity(1024),
            from_id: DashMap::with_capacity(1024),
            next_id: AtomicU32::new(0),
        };
        interner.intern("");
        interner
    }

    fn intern(&self, text: &str) -> u32 {
        if let Some(id) = self.to_id.get(text) {
            return *id;
        }

        let key: Arc<str> = Arc::from(text);
        *self
            .to_id
            .entry(key.clone())
            .or_insert_with(|| {
                let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                self.from_id.insert(id, key);
                id
            })
            .value()
    }

    fn resolve(&self, id: u32) -> Option<Arc<str>> {
        self.from_id.get(&id).map(|s| s.value().clone())
    }
}

impl Name {
    pub const EMPTY: Name = Name(0);

    pub fn intern(text: &str) -> Self {
        Name(INTERNER.intern(text))
    }

    /// Look up an already-interned name without inserting
    pub fn lookup(text: &str) -> Option<Self> {
        INTERNER.to_id.get(text).map(|id| Name(*id))
    }

    pub fn as_str(self) -> Arc<str> {
        INTERNER.resolve(self.0).unwrap_or_else(|| Arc::from(""))
    }

    #[inline]
    pub const fn raw(self) -> u32 {
        self.0
    }

    /// Rebuild from a raw identity; `None` if it was never handed out
    pub fn from_raw(raw: u32) -> Option<Self> {
        INTERNER.from_id.contains_key(&raw).then_some(Name(raw))
    }
}

impl Default for Name {
    fn default() -> Self {
        Self::EMPTY
    }
}

impl fmt::Debug for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Name({}: {:?})", self.0, self.as_str())
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_str())
    }
}

impl From<&str> for Name {
    fn from(text: &str) -> Self {
        Name::intern(text)
    }
}
