//! # segalloc - A Region-Based Memory Manager
//!
//! This crate carves allocations out of one fixed-size, pre-reserved arena
//! and tracks free and used regions in an ordered segment table.
//!
//! ## Overview
//!
//! ```text
//!   Arena (reserved once, never resized):
//!
//!   0                                                            size
//!   ┌────────┬────────────┬──────┬──────────────┬───────────────────┐
//!   │ used   │   free     │ used │    used      │       free        │
//!   └────────┴────────────┴──────┴──────────────┴───────────────────┘
//!
//!   Segment table (sorted by offset, no gaps, no overlaps):
//!
//!   ┌──────────────┐ ┌──────────────┐ ┌──────────────┐ ┌─────
//!   │ offset: 0    │ │ offset: 8    │ │ offset: 20   │ │ ...
//!   │ length: 8    │ │ length: 12   │ │ length: 6    │ │
//!   │ free: false  │ │ free: true   │ │ free: false  │ │
//!   └──────────────┘ └──────────────┘ └──────────────┘ └─────
//! ```
//!
//! ## Crate Structure
//!
//! ```text
//!   segalloc
//!   ├── adapter    - ArenaAllocator<T>, typed allocate/construct/destroy
//!   ├── arena      - Fixed-size mmap'd byte buffer (internal)
//!   ├── error      - Error and Result
//!   ├── manager    - StorageManager: first-fit, split, coalesce
//!   └── segment    - Segment table entry and Address handle
//! ```
//!
//! ## Quick Start
//!
//! ```rust
//! use segalloc::StorageManager;
//!
//! let mut manager = StorageManager::new(1024).unwrap();
//!
//! let address = manager.allocate(64).unwrap();
//! manager.bytes_mut(address).unwrap().fill(0x2A);
//! assert_eq!(manager.segments().len(), 2);
//!
//! manager.free(address).unwrap();
//! assert_eq!(manager.segments().len(), 1);
//! ```
//!
//! ## How It Works
//!
//! Allocation scans the table in offset order and takes the first free
//! segment that is large enough. An exact fit is flipped to used in place;
//! anything larger is split:
//!
//! ```text
//!   allocate(n):
//!   ┌───────────────────────────┐        ┌───────┬───────────────────┐
//!   │ free  offset o, length L  │  ───▶  │ used  │ free  o+n, L-n    │
//!   └───────────────────────────┘        └───────┴───────────────────┘
//! ```
//!
//! Release looks up the used segment starting at the given offset, marks
//! it free and merges it with a free predecessor and/or successor:
//!
//! ```text
//!   free(B):
//!   ┌──────┬──────┬──────┐                ┌────────────────────┐
//!   │ A    │ B    │ C    │       ───▶     │ free A + B + C     │
//!   │ free │ used │ free │                │                    │
//!   └──────┴──────┴──────┘                └────────────────────┘
//! ```
//!
//! ## Limitations
//!
//! - **Single-threaded only**: no internal locking; wrap the manager in a
//!   mutex to share it
//! - **Byte granularity**: no alignment guarantees for returned addresses
//! - **Fixed arena**: no growth, shrinking or compaction
//! - **Unix-only**: requires `libc` and `mmap`

mod adapter;
mod arena;
mod error;
mod manager;
mod segment;

pub use adapter::ArenaAllocator;
pub use error::{Error, Result};
pub use manager::{StorageManager, Usage};
pub use segment::{Address, Segment};
