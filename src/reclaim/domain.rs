//! The hazard-pointer registry.
//!
//! A global append-only linked list of per-thread records. Acquisition
//! first tries to recycle a released record, then CAS-prepends a fresh one.
//! Records are never unlinked or freed; a departing thread clears its slots
//! and flips the record free for a later thread to reuse.

#![allow(unsafe_code)]
#![deny(unsafe_op_in_unsafe_fn)]

use crossbeam::queue::SegQueue;
use once_cell::sync::Lazy;
use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicPtr, AtomicUsize, Ordering, fence};
use tracing::debug;

/// Hazard slots per record: the list walk protects `cur` and `prev` and
/// uses the third slot as scratch while swapping the other two.
pub const HAZARDS_PER_RECORD: usize = 3;

/// An unlinked node awaiting destruction, paired with its type-erased
/// destructor.
pub(crate) struct Retired {
    pub(crate) ptr: *mut u8,
    pub(crate) drop_fn: unsafe fn(*mut u8),
}

// SAFETY: a Retired entry is exclusively owned by whichever thread holds
// it; the pointee is already unreachable from any list.
unsafe impl Send for Retired {}

/// Per-thread hazard record. Owned by one thread at a time for the
/// duration of that thread's lifetime.
pub struct HazardRecord {
    hazards: [AtomicPtr<u8>; HAZARDS_PER_RECORD],
    next: AtomicPtr<HazardRecord>,
    active: AtomicBool,
}

impl HazardRecord {
    fn new() -> Self {
        Self {
            hazards: std::array::from_fn(|_| AtomicPtr::new(ptr::null_mut())),
            next: AtomicPtr::new(ptr::null_mut()),
            active: AtomicBool::new(true),
        }
    }

    /// Publish `ptr` in `slot`. Any scan whose snapshot starts after this
    /// returns will observe the slot and refuse to reclaim the pointee.
    pub(crate) fn protect(&self, slot: usize, ptr: *mut u8) {
        self.hazards[slot].store(ptr, Ordering::Release);
        // The publication must hit the snapshot of a concurrent scan
        // before the caller re-validates its source location.
        fence(Ordering::SeqCst);
    }

    /// Read back one of the owning thread's own slots.
    pub(crate) fn slot(&self, slot: usize) -> *mut u8 {
        self.hazards[slot].load(Ordering::Acquire)
    }

    pub(crate) fn clear(&self, slot: usize) {
        self.hazards[slot].store(ptr::null_mut(), Ordering::Release);
    }

    pub(crate) fn clear_all(&self) {
        for hazard in &self.hazards {
            hazard.store(ptr::null_mut(), Ordering::Release);
        }
    }
}

/// A reclamation domain: the record registry plus the hand-off queue for
/// retired entries that outlive their thread.
pub struct HazardDomain {
    records: AtomicPtr<HazardRecord>,
    record_count: AtomicUsize,
    orphans: SegQueue<Retired>,
}

impl HazardDomain {
    pub(crate) fn new() -> Self {
        Self {
            records: AtomicPtr::new(ptr::null_mut()),
            record_count: AtomicUsize::new(0),
            orphans: SegQueue::new(),
        }
    }

    /// Number of records ever registered. Records are recycled, not freed,
    /// so this only grows.
    pub fn registered_records(&self) -> usize {
        self.record_count.load(Ordering::Relaxed)
    }

    /// Acquire a record for the current thread: recycle a released one if
    /// possible, otherwise CAS-prepend a fresh allocation.
    pub(crate) fn acquire_record(&self) -> &HazardRecord {
        let mut p = self.records.load(Ordering::Acquire);
        while !p.is_null() {
            // SAFETY: records are never freed once published.
            let record = unsafe { &*p };
            if !record.active.load(Ordering::Relaxed)
                && record
                    .active
                    .compare_exchange(false, true, Ordering::AcqRel, Ordering::Relaxed)
                    .is_ok()
            {
                return record;
            }
            p = record.next.load(Ordering::Acquire);
        }

        let record = Box::into_raw(Box::new(HazardRecord::new()));
        loop {
            let head = self.records.load(Ordering::Relaxed);
            // SAFETY: `record` is not published yet; plain init of its link.
            unsafe { (*record).next.store(head, Ordering::Relaxed) };
            if self
                .records
                .compare_exchange_weak(head, record, Ordering::Release, Ordering::Relaxed)
                .is_ok()
            {
                break;
            }
        }
        let count = self.record_count.fetch_add(1, Ordering::Relaxed) + 1;
        debug!(records = count, "registered new hazard record");
        // SAFETY: published records are never freed.
        unsafe { &*record }
    }

    /// Departing-thread protocol: the record stays in the registry, empty
    /// and free for reuse.
    pub(crate) fn release_record(&self, record: &HazardRecord) {
        record.clear_all();
        record.active.store(false, Ordering::Release);
    }

    /// Sorted, deduplicated snapshot of every non-null hazard slot across
    /// every record.
    pub(crate) fn protected_snapshot(&self) -> Vec<*mut u8> {
        // Pair of the fence in `protect`: slots published before this
        // point are visible to the walk below.
        fence(Ordering::SeqCst);
        let capacity = self.record_count.load(Ordering::Relaxed) * HAZARDS_PER_RECORD;
        let mut hazards = Vec::with_capacity(capacity);
        let mut p = self.records.load(Ordering::Acquire);
        while !p.is_null() {
            // SAFETY: records are never freed once published.
            let record = unsafe { &*p };
            for slot in &record.hazards {
                let ptr = slot.load(Ordering::Acquire);
                if !ptr.is_null() {
                    hazards.push(ptr);
                }
            }
            p = record.next.load(Ordering::Acquire);
        }
        hazards.sort_unstable();
        hazards.dedup();
        hazards
    }

    /// Retired-list length at which a scan should run. Twice the number of
    /// registered slots, so at least half of any over-threshold list is
    /// reclaimable and scans amortize to O(1) per retire.
    pub(crate) fn scan_threshold(&self) -> usize {
        2 * HAZARDS_PER_RECORD * self.record_count.load(Ordering::Relaxed).max(1)
    }

    /// Hand a retired entry to whichever thread scans next.
    pub(crate) fn push_orphan(&self, retired: Retired) {
        self.orphans.push(retired);
    }

    /// Move every orphaned entry into `into`, to be re-checked by the
    /// caller's scan.
    pub(crate) fn adopt_orphans(&self, into: &mut Vec<Retired>) {
        while let Some(retired) = self.orphans.pop() {
            into.push(retired);
        }
    }
}

impl Drop for HazardDomain {
    fn drop(&mut self) {
        // Teardown: every thread has released its record, so nothing is
        // protected and the registry can be freed outright.
        let mut p = *self.records.get_mut();
        while !p.is_null() {
            // SAFETY: exclusive access; the record came from Box::into_raw.
            let record = unsafe { Box::from_raw(p) };
            p = record.next.load(Ordering::Relaxed);
        }
        while let Some(retired) = self.orphans.pop() {
            // SAFETY: no hazard slot exists anymore; the entry is unlinked
            // per the retire contract.
            unsafe { (retired.drop_fn)(retired.ptr) };
        }
    }
}

static DOMAIN: Lazy<HazardDomain> = Lazy::new(HazardDomain::new);

/// The process-wide reclamation domain shared by every list.
pub fn domain() -> &'static HazardDomain {
    &DOMAIN
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn released_records_are_recycled() {
        let domain = HazardDomain::new();
        let first = domain.acquire_record();
        let first_ptr = std::ptr::from_ref(first);
        domain.release_record(first);

        let second = domain.acquire_record();
        assert!(std::ptr::eq(first_ptr, second));
        assert_eq!(domain.registered_records(), 1);
    }

    #[test]
    fn acquisition_skips_taken_records() {
        let domain = HazardDomain::new();
        let first = domain.acquire_record();
        let second = domain.acquire_record();
        assert!(!std::ptr::eq(first, second));
        assert_eq!(domain.registered_records(), 2);
    }

    #[test]
    fn snapshot_reflects_protect_and_clear() {
        let domain = HazardDomain::new();
        let record = domain.acquire_record();
        let target = 0x1000 as *mut u8;

        record.protect(0, target);
        assert!(domain.protected_snapshot().contains(&target));

        record.clear(0);
        assert!(!domain.protected_snapshot().contains(&target));
    }

    #[test]
    fn snapshot_is_sorted_and_deduplicated() {
        let domain = HazardDomain::new();
        let record = domain.acquire_record();
        record.protect(0, 0x2000 as *mut u8);
        record.protect(1, 0x1000 as *mut u8);
        record.protect(2, 0x2000 as *mut u8);

        let snapshot = domain.protected_snapshot();
        assert_eq!(snapshot, vec![0x1000 as *mut u8, 0x2000 as *mut u8]);
    }
}
