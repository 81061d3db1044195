use thiserror::Error;

/// Failures surfaced by set operations.
///
/// Duplicate inserts and absent deletes are ordinary results reported
/// through the boolean return values, not errors.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetError {
    /// Allocating a list node failed. The operation had no effect.
    #[error("out of memory allocating a list node")]
    OutOfMemory,
}
