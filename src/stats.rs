//! Node allocation accounting.
//!
//! Relaxed process-wide counters of how many element nodes have been
//! allocated and reclaimed. The counts are estimates while threads are
//! mutating; after every thread operating on every list has quiesced and
//! the lists are dropped, `allocated == reclaimed` holds exactly.

use std::sync::atomic::{AtomicU64, Ordering};

static ALLOCATED: AtomicU64 = AtomicU64::new(0);
static RECLAIMED: AtomicU64 = AtomicU64::new(0);

/// Point-in-time copy of the node counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeStats {
    pub allocated: u64,
    pub reclaimed: u64,
}

impl NodeStats {
    /// Nodes allocated but not yet reclaimed. Saturating: relaxed counter
    /// propagation can momentarily read ahead on one side.
    pub fn live(&self) -> u64 {
        self.allocated.saturating_sub(self.reclaimed)
    }
}

pub fn node_stats() -> NodeStats {
    NodeStats {
        allocated: ALLOCATED.load(Ordering::Relaxed),
        reclaimed: RECLAIMED.load(Ordering::Relaxed),
    }
}

pub(crate) fn record_alloc() {
    ALLOCATED.fetch_add(1, Ordering::Relaxed);
}

pub(crate) fn record_reclaim() {
    RECLAIMED.fetch_add(1, Ordering::Relaxed);
}
