//! hazlist - Lock-free ordered set with hazard-pointer reclamation
//!
//! A concurrent, ordered set built as a singly-linked list in which every
//! mutating operation proceeds by compare-and-swap alone. Deletion is
//! two-phase: a node is first *logically* deleted by marking the low bit of
//! its `next` pointer, then *physically* unlinked by whichever thread gets
//! there first. Unlinked nodes are handed to a hazard-pointer reclamation
//! domain and freed only once no thread still holds a protected reference.
//!
//! ```
//! use hazlist::LockFreeList;
//!
//! let list = LockFreeList::new();
//! assert_eq!(list.insert(7), Ok(true));
//! assert_eq!(list.insert(7), Ok(false));
//! assert!(list.contains(&7));
//! assert!(list.remove(&7));
//! ```

pub mod list;
pub mod reclaim;
pub mod stats;

mod error;

pub use error::SetError;
pub use list::LockFreeList;
