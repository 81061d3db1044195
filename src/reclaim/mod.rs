//! Hazard-pointer memory reclamation.
//!
//! Every thread that touches a list publishes the addresses it is about to
//! dereference in a small set of per-thread hazard slots. Unlinked nodes are
//! *retired* into the unlinking thread's private list and freed by a later
//! *scan* only if no slot in any record still references them. Records are
//! registered lock-free, never freed, and recycled between threads.

pub(crate) mod domain;
mod local;

pub use domain::{HAZARDS_PER_RECORD, HazardDomain, HazardRecord, domain};
pub use local::flush;

pub(crate) use local::{ThreadReclaimer, with};
