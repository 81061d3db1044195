//! Per-thread reclamation state: the cached hazard record and the private
//! retired list, with the scan protocol that frees unprotected entries.

#![allow(unsafe_code)]
#![deny(unsafe_op_in_unsafe_fn)]

use std::cell::RefCell;
use tracing::trace;

use super::domain::{HazardDomain, HazardRecord, Retired, domain};

/// A thread's handle into the reclamation domain.
///
/// Registered lazily on the thread's first list operation; dropped with the
/// thread, which runs the departure protocol (clear slots, final scan,
/// orphan the rest, release the record).
pub(crate) struct ThreadReclaimer {
    domain: &'static HazardDomain,
    record: &'static HazardRecord,
    retired: Vec<Retired>,
}

thread_local! {
    static RECLAIMER: RefCell<Option<ThreadReclaimer>> = const { RefCell::new(None) };
}

/// Run `f` with the calling thread's reclaimer, registering the thread
/// with the global domain on first use.
///
/// Re-entry from inside `f` (for example from an element destructor that
/// calls back into a list) is a programming error and panics.
pub(crate) fn with<R>(f: impl FnOnce(&mut ThreadReclaimer) -> R) -> R {
    RECLAIMER.with(|cell| {
        let mut slot = cell.borrow_mut();
        let reclaimer = slot.get_or_insert_with(|| ThreadReclaimer::register(domain()));
        f(reclaimer)
    })
}

/// Drain whatever the calling thread can reclaim right now: its own retired
/// list plus any entries orphaned by exited threads.
pub fn flush() {
    with(ThreadReclaimer::scan);
}

impl ThreadReclaimer {
    fn register(domain: &'static HazardDomain) -> Self {
        Self {
            domain,
            record: domain.acquire_record(),
            retired: Vec::new(),
        }
    }

    pub(crate) fn protect(&self, slot: usize, ptr: *mut u8) {
        self.record.protect(slot, ptr);
    }

    pub(crate) fn hazard(&self, slot: usize) -> *mut u8 {
        self.record.slot(slot)
    }

    pub(crate) fn clear(&self, slot: usize) {
        self.record.clear(slot);
    }

    pub(crate) fn clear_all(&self) {
        self.record.clear_all();
    }

    /// Hand an unlinked node to the reclaimer. Scans opportunistically once
    /// the retired list outgrows the domain threshold.
    ///
    /// # Safety
    ///
    /// `ptr` must have been unlinked from every reachable chain by a CAS
    /// the caller observed succeed, must be retired exactly once, and must
    /// stay valid for `drop_fn` until the reclaimer frees it.
    pub(crate) unsafe fn retire(&mut self, ptr: *mut u8, drop_fn: unsafe fn(*mut u8)) {
        self.retired.push(Retired { ptr, drop_fn });
        if self.retired.len() >= self.domain.scan_threshold() {
            self.scan();
        }
    }

    /// Free every retired entry no hazard slot references; keep the rest.
    ///
    /// Reads only this thread's retired list and the registry, so scans on
    /// different threads never contend.
    pub(crate) fn scan(&mut self) {
        self.domain.adopt_orphans(&mut self.retired);
        if self.retired.is_empty() {
            return;
        }
        let protected = self.domain.protected_snapshot();
        let before = self.retired.len();
        self.retired.retain(|entry| {
            if protected.binary_search(&entry.ptr).is_ok() {
                return true;
            }
            // SAFETY: the entry is unlinked (retire contract) and no
            // hazard slot referenced it in the snapshot taken after the
            // unlink became visible.
            unsafe { (entry.drop_fn)(entry.ptr) };
            false
        });
        trace!(
            reclaimed = before - self.retired.len(),
            deferred = self.retired.len(),
            "hazard scan"
        );
    }
}

impl Drop for ThreadReclaimer {
    fn drop(&mut self) {
        self.record.clear_all();
        self.scan();
        // Entries still protected by surviving threads are handed over for
        // a later scan to finish.
        for entry in self.retired.drain(..) {
            self.domain.push_orphan(entry);
        }
        self.domain.release_record(self.record);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    static FREED_PROTECTED: AtomicUsize = AtomicUsize::new(0);
    static FREED_FLUSHED: AtomicUsize = AtomicUsize::new(0);

    /// # Safety
    /// `ptr` must come from `Box::into_raw(Box::new(u64))`.
    unsafe fn free_counting_protected(ptr: *mut u8) {
        // SAFETY: per contract.
        drop(unsafe { Box::from_raw(ptr.cast::<u64>()) });
        FREED_PROTECTED.fetch_add(1, Ordering::Relaxed);
    }

    /// # Safety
    /// `ptr` must come from `Box::into_raw(Box::new(u64))`.
    unsafe fn free_counting_flushed(ptr: *mut u8) {
        // SAFETY: per contract.
        drop(unsafe { Box::from_raw(ptr.cast::<u64>()) });
        FREED_FLUSHED.fetch_add(1, Ordering::Relaxed);
    }

    #[test]
    fn protected_entries_survive_a_scan() {
        let target = Box::into_raw(Box::new(7u64)).cast::<u8>();
        with(|reclaimer| {
            reclaimer.protect(0, target);
            // SAFETY: the box is unreachable elsewhere and retired once.
            unsafe { reclaimer.retire(target, free_counting_protected) };
            reclaimer.scan();
            assert_eq!(FREED_PROTECTED.load(Ordering::Relaxed), 0);

            reclaimer.clear(0);
            reclaimer.scan();
            assert_eq!(FREED_PROTECTED.load(Ordering::Relaxed), 1);
        });
    }

    #[test]
    fn flush_drains_unprotected_entries() {
        with(|reclaimer| {
            for _ in 0..4 {
                let ptr = Box::into_raw(Box::new(0u64)).cast::<u8>();
                // SAFETY: each box is unreachable elsewhere, retired once.
                unsafe { reclaimer.retire(ptr, free_counting_flushed) };
            }
        });
        flush();
        assert_eq!(FREED_FLUSHED.load(Ordering::Relaxed), 4);
    }
}
