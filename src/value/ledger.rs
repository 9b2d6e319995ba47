//! Owned-payload accounting
//!
//! Counts heap payloads taken and freed by cells on the current thread.
//! Cells are released on the thread that owns them, so a per-thread ledger
//! gives exact numbers even while other threads churn through cells.

use std::cell::Cell;

thread_local! {
    static LEDGER: Cell<PayloadLedger> = const { Cell::new(PayloadLedger { allocated: 0, released: 0 }) };
}

/// Owned payload allocations and releases on the calling thread
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PayloadLedger {
    pub allocated: u64,
    pub released: u64,
}

impl PayloadLedger {
    /// Payloads currently owned by live cells created on this thread
    #[inline]
    pub fn outstanding(&self) -> i64 {
        self.allocated as i64 - self.released as i64
    }

    /// Difference since an earlier snapshot
    pub fn since(&self, earlier: PayloadLedger) -> PayloadLedger {
        PayloadLedger {
            allocated: self.allocated - earlier.allocated,
            released: self.released - earlier.released,
        }
    }
}

pub fn payload_ledger() -> PayloadLedger {
    LEDGER.with(Cell::get)
}

#[inline]
pub(crate) fn record_alloc() {
    LEDGER.with(|l| {
        let mut v = l.get();
        v.allocated += 1;
        l.set(v);
    });
}

#[inline]
pub(crate) fn record_release() {
    LEDGER.with(|l| {
        let mut v = l.get();
        v.released += 1;
        l.set(v);
    });
}
