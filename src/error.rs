//! Error types for the storage manager.

use thiserror::Error;

/// Result type alias using the crate's [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Failures reported by [`StorageManager`](crate::StorageManager) and the
/// typed adapter built on top of it.
#[derive(Error, Debug)]
pub enum Error {
  /// Zero-size request, size overflow, or a pointer that does not belong
  /// to the arena.
  #[error("invalid argument: {0}")]
  InvalidArgument(String),

  /// No free segment is large enough for the request.
  #[error("out of memory: requested {requested} bytes, largest free segment is {largest_free} bytes")]
  OutOfMemory { requested: usize, largest_free: usize },

  /// No used segment starts at this offset (double free or foreign address).
  #[error("no live allocation starts at offset {offset}")]
  NotFound { offset: usize },

  /// The segment table broke one of its invariants.
  #[error("segment table corrupted: {0}")]
  Corrupted(String),

  /// The OS refused to reserve the arena.
  #[error("system error: {0}")]
  Os(#[source] std::io::Error),
}
