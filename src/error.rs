//! Recoverable error surface.
//!
//! Precondition violations (double-unlock, `zero()` under a shared lock,
//! dropping a [`crate::cache::SlotHandle`] without unlocking it) are
//! programmer errors, not recoverable conditions, and are reported with
//! `panic!`/`assert!` at the call site instead of living here.

/// Error produced by the cache, parameterized over the backing device's
/// own error type.
#[derive(Debug, thiserror::Error)]
pub enum CacheError<E> {
    /// The block device failed to complete a read or write.
    #[error("block device I/O failed: {0}")]
    Device(#[source] E),
}
