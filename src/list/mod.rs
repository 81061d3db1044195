//! Lock-free ordered linked-list set.
//!
//! Live nodes form a strictly increasing chain hanging off a permanent
//! sentinel head. Insertion links a node with a single CAS on the
//! predecessor. Deletion is two-phase: a CAS marks the victim's `next`
//! pointer (logical delete, the linearization point), then a second CAS
//! swings the predecessor past it (physical unlink). Any walk that runs
//! into a marked node finishes the unlink on the deleter's behalf, so a
//! stalled thread never blocks progress. Unlinked nodes go to the
//! hazard-pointer domain in [`crate::reclaim`] and are freed once no
//! thread still protects them.

#![allow(unsafe_code)]
#![deny(unsafe_op_in_unsafe_fn)]

pub(crate) mod tagged;

use std::alloc::{Layout, alloc, dealloc};
use std::cmp::Ordering as CmpOrdering;
use std::marker::PhantomData;
use std::mem::MaybeUninit;
use std::ptr;
use std::sync::atomic::{AtomicPtr, AtomicUsize, Ordering};

use crate::error::SetError;
use crate::reclaim::{self, ThreadReclaimer};
use crate::stats;

/// Hazard-slot roles during a walk.
const SLOT_CUR: usize = 0;
const SLOT_PREV: usize = 1;
const SLOT_SCRATCH: usize = 2;

struct Node<T> {
    value: MaybeUninit<T>,
    next: AtomicPtr<Node<T>>,
}

impl<T> Node<T> {
    // The mark bit lives in the low bit of `next`; odd-aligned nodes would
    // make marked and unmarked addresses collide.
    const ALIGNED: () = assert!(align_of::<Self>() >= 2);

    fn alloc(value: T) -> Result<*mut Self, SetError> {
        let _ = Self::ALIGNED;
        let layout = Layout::new::<Self>();
        // SAFETY: `Node` contains an atomic pointer, so the layout has
        // non-zero size.
        let node = unsafe { alloc(layout) }.cast::<Self>();
        if node.is_null() {
            return Err(SetError::OutOfMemory);
        }
        // SAFETY: `node` is valid for writes; both fields are initialized
        // before the pointer escapes this function.
        unsafe {
            ptr::addr_of_mut!((*node).value).write(MaybeUninit::new(value));
            ptr::addr_of_mut!((*node).next).write(AtomicPtr::new(ptr::null_mut()));
        }
        stats::record_alloc();
        Ok(node)
    }

    /// Drop the value and release the allocation.
    ///
    /// # Safety
    ///
    /// `node` must come from [`Node::alloc`], hold an initialized value,
    /// and must never be referenced again.
    unsafe fn free(node: *mut Self) {
        // SAFETY: per contract.
        unsafe {
            ptr::drop_in_place((*node).value.as_mut_ptr());
            dealloc(node.cast(), Layout::new::<Self>());
        }
        stats::record_reclaim();
    }

    /// Type-erased destructor handed to the reclamation domain.
    ///
    /// # Safety
    ///
    /// Same contract as [`Node::free`].
    unsafe fn reclaim(node: *mut u8) {
        // SAFETY: per contract.
        unsafe { Self::free(node.cast()) };
    }
}

/// A lock-free ordered set.
///
/// All operations are linearizable and lock-free: they retry only when
/// some other thread's CAS on the same location succeeded. Element
/// destructors run inside reclamation scans and must not call back into
/// any list.
pub struct LockFreeList<T> {
    head: *mut Node<T>,
    size: AtomicUsize,
    _marker: PhantomData<Box<T>>,
}

// SAFETY: nodes are owned by the list; values enter through `insert` and
// leave through reclamation, so sending the list sends its values.
unsafe impl<T: Send> Send for LockFreeList<T> {}
// SAFETY: shared use compares values through `&T` from many threads at
// once and mutates nothing but atomics.
unsafe impl<T: Send + Sync> Sync for LockFreeList<T> {}

impl<T> LockFreeList<T> {
    /// Create an empty set. The sentinel head carries no value and lives
    /// as long as the list.
    pub fn new() -> Self {
        let head = Box::into_raw(Box::new(Node {
            value: MaybeUninit::uninit(),
            next: AtomicPtr::new(ptr::null_mut()),
        }));
        Self {
            head,
            size: AtomicUsize::new(0),
            _marker: PhantomData,
        }
    }

    /// Approximate element count. Updated with relaxed atomics; an
    /// estimate while other threads are mutating, exact once quiesced.
    pub fn len(&self) -> usize {
        self.size.load(Ordering::Relaxed)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The live values in ascending order.
    ///
    /// Exclusive access means no concurrent mutation, so the walk needs no
    /// hazard protection. Nodes whose `next` is marked are logically
    /// deleted and skipped.
    pub fn snapshot(&mut self) -> Vec<T>
    where
        T: Clone,
    {
        let mut values = Vec::new();
        // SAFETY: `&mut self` rules out concurrent mutation; every node
        // past the head holds an initialized value.
        unsafe {
            let mut p = tagged::unmarked((*self.head).next.load(Ordering::Acquire));
            while !p.is_null() {
                let next = (*p).next.load(Ordering::Acquire);
                if !tagged::is_marked(next) {
                    values.push((*p).value.assume_init_ref().clone());
                }
                p = tagged::unmarked(next);
            }
        }
        values
    }

    #[cfg(debug_assertions)]
    fn assert_no_hazards(&self) {
        let protected = reclaim::domain().protected_snapshot();
        // SAFETY: called from the destructor, which holds exclusive access.
        unsafe {
            let mut p = tagged::unmarked((*self.head).next.load(Ordering::Relaxed));
            while !p.is_null() {
                assert!(
                    protected.binary_search(&p.cast()).is_err(),
                    "list destroyed while a hazard slot references node {p:p}",
                );
                p = tagged::unmarked((*p).next.load(Ordering::Relaxed));
            }
        }
    }
}

impl<T: Ord> LockFreeList<T> {
    /// Insert `value`, keeping the chain ordered. Returns `Ok(false)` and
    /// drops `value` if an equal element is already present.
    ///
    /// The only error is [`SetError::OutOfMemory`] from the node
    /// allocation, in which case the set is untouched.
    pub fn insert(&self, value: T) -> Result<bool, SetError> {
        let node = Node::alloc(value)?;
        Ok(reclaim::with(|reclaimer| {
            loop {
                // SAFETY: this call owns `node` until the linking CAS.
                let value = unsafe { (*node).value.assume_init_ref() };
                let (prev, cur, found) = self.search(value, reclaimer);
                if found {
                    reclaimer.clear_all();
                    // SAFETY: never linked; still exclusively ours.
                    unsafe { Node::free(node) };
                    return false;
                }
                // SAFETY: `node` is unpublished; plain init of its link.
                unsafe { &(*node).next }.store(cur, Ordering::Release);
                // SAFETY: `prev` is the head or protected by SLOT_PREV.
                let linked = unsafe { &(*prev).next }
                    .compare_exchange_weak(cur, node, Ordering::Release, Ordering::Relaxed)
                    .is_ok();
                if linked {
                    self.size.fetch_add(1, Ordering::Relaxed);
                    reclaimer.clear_all();
                    return true;
                }
            }
        }))
    }

    /// Remove the element equal to `value`; false if absent.
    ///
    /// A successful remove linearizes at the CAS that marks the node. The
    /// physical unlink may be finished here or by any later walk.
    pub fn remove(&self, value: &T) -> bool {
        reclaim::with(|reclaimer| {
            let (prev, cur, next) = loop {
                let (prev, cur, found) = self.search(value, reclaimer);
                if !found {
                    reclaimer.clear_all();
                    return false;
                }
                // SAFETY: `cur` is protected by SLOT_CUR.
                let next = unsafe { &(*cur).next }.load(Ordering::Acquire);
                if tagged::is_marked(next) {
                    // Another delete of this node is in flight; re-search
                    // (which also helps unlink it) and race again.
                    continue;
                }
                if unsafe { &(*cur).next }
                    .compare_exchange_weak(
                        next,
                        tagged::marked(next),
                        Ordering::Release,
                        Ordering::Relaxed,
                    )
                    .is_ok()
                {
                    break (prev, cur, next);
                }
            };

            if unsafe { &(*prev).next }
                .compare_exchange(cur, next, Ordering::Release, Ordering::Relaxed)
                .is_ok()
            {
                self.size.fetch_sub(1, Ordering::Relaxed);
                // SAFETY: the unlink CAS succeeded exactly once, here.
                unsafe { reclaimer.retire(cur.cast(), Node::<T>::reclaim) };
            } else {
                // The predecessor moved; one more walk unlinks and retires
                // the marked node as a side effect.
                let _ = self.search(value, reclaimer);
            }
            reclaimer.clear_all();
            true
        })
    }

    /// Membership test. Has no effect on the set beyond helping finish
    /// pending unlinks encountered on the way.
    pub fn contains(&self, value: &T) -> bool {
        reclaim::with(|reclaimer| {
            let (_prev, _cur, found) = self.search(value, reclaimer);
            reclaimer.clear_all();
            found
        })
    }

    /// Walk from the head to the first node whose value is >= `value`,
    /// unlinking and retiring marked nodes on the way.
    ///
    /// Returns `(prev, cur, found)`: `prev` preceded `cur` at the last
    /// validated read, `cur` is null or the first node with value >=
    /// `value`, and `found` says the values are equal. Both pointers stay
    /// protected (SLOT_PREV / SLOT_CUR) after return.
    fn search(
        &self,
        value: &T,
        reclaimer: &mut ThreadReclaimer,
    ) -> (*mut Node<T>, *mut Node<T>, bool) {
        'restart: loop {
            let mut prev = self.head;
            // SAFETY: the head is never freed or marked while `&self` lives.
            let mut cur = unsafe { &(*prev).next }.load(Ordering::Acquire);
            loop {
                reclaimer.protect(SLOT_CUR, cur.cast());
                // Protection only counts if `cur` is still linked after
                // the slot became visible.
                // SAFETY: `prev` is the head or protected by SLOT_PREV.
                if unsafe { &(*prev).next }.load(Ordering::Acquire) != cur {
                    continue 'restart;
                }
                if cur.is_null() {
                    return (prev, cur, false);
                }
                // SAFETY: `cur` is protected and validated reachable.
                let next = unsafe { &(*cur).next }.load(Ordering::Acquire);
                if tagged::is_marked(next) {
                    // `cur` is logically deleted: finish the unlink for
                    // whoever marked it.
                    if unsafe { &(*prev).next }
                        .compare_exchange(
                            cur,
                            tagged::unmarked(next),
                            Ordering::Release,
                            Ordering::Relaxed,
                        )
                        .is_err()
                    {
                        continue 'restart;
                    }
                    self.size.fetch_sub(1, Ordering::Relaxed);
                    // SAFETY: the unlink CAS succeeded exactly once, here.
                    unsafe { reclaimer.retire(cur.cast(), Node::<T>::reclaim) };
                    cur = tagged::unmarked(next);
                    continue;
                }
                // `cur` may have been unlinked between the two loads;
                // only a still-linked node's value may be trusted.
                if unsafe { &(*prev).next }.load(Ordering::Acquire) != cur {
                    continue 'restart;
                }
                // SAFETY: `cur` is protected; every node past the head
                // holds an initialized value.
                match unsafe { (*cur).value.assume_init_ref() }.cmp(value) {
                    CmpOrdering::Less => {
                        // Advance: route `cur`'s protection through the
                        // scratch slot into SLOT_PREV so neither node is
                        // ever unprotected.
                        let hp_cur = reclaimer.hazard(SLOT_CUR);
                        let hp_prev = reclaimer.hazard(SLOT_PREV);
                        reclaimer.protect(SLOT_SCRATCH, hp_cur);
                        reclaimer.protect(SLOT_CUR, hp_prev);
                        reclaimer.protect(SLOT_PREV, hp_cur);
                        reclaimer.clear(SLOT_SCRATCH);
                        prev = cur;
                        // SAFETY: `cur` (the new `prev`) is protected.
                        cur = tagged::unmarked(unsafe { &(*cur).next }.load(Ordering::Acquire));
                    }
                    order => return (prev, cur, order == CmpOrdering::Equal),
                }
            }
        }
    }
}

impl<T> Default for LockFreeList<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Drop for LockFreeList<T> {
    fn drop(&mut self) {
        // Every thread that operated on the list must have exited; the
        // chain can then be freed without consulting hazard slots.
        #[cfg(debug_assertions)]
        self.assert_no_hazards();

        // SAFETY: exclusive access; nodes past the head hold initialized
        // values (marked ones were never reclaimed).
        unsafe {
            let mut p = tagged::unmarked((*self.head).next.load(Ordering::Relaxed));
            while !p.is_null() {
                let next = (*p).next.load(Ordering::Relaxed);
                Node::free(p);
                p = tagged::unmarked(next);
            }
            drop(Box::from_raw(self.head));
        }
        // Nodes retired earlier (by this thread or threads that already
        // exited) may still be pending; drain what the slots allow.
        reclaim::flush();
    }
}
