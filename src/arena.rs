use std::{io, ptr, ptr::NonNull};

use libc::{MAP_ANONYMOUS, MAP_FAILED, MAP_PRIVATE, PROT_READ, PROT_WRITE, c_void, mmap, munmap};
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Fixed-size byte buffer reserved from the OS once and never resized.
///
/// ```text
///   base                                              base + size
///   ▼                                                           ▼
///   ┌───────────────────────────────────────────────────────────┐
///   │                 anonymous private mapping                 │
///   └───────────────────────────────────────────────────────────┘
/// ```
///
/// The mapping is zero-filled by the kernel and unmapped on drop.
pub struct Arena {
  base: NonNull<u8>,
  size: usize,
}

// SAFETY: the mapping is owned exclusively by this value and is not tied to
// the thread that created it.
unsafe impl Send for Arena {}

impl Arena {
  pub fn reserve(size: usize) -> Result<Self> {
    if size == 0 {
      return Err(Error::InvalidArgument("arena size must be greater than 0".into()));
    }

    let address = unsafe {
      mmap(
        ptr::null_mut(),
        size,
        PROT_READ | PROT_WRITE,
        MAP_PRIVATE | MAP_ANONYMOUS,
        -1,
        0,
      )
    };

    if address == MAP_FAILED {
      return Err(Error::Os(io::Error::last_os_error()));
    }

    let base = NonNull::new(address as *mut u8)
      .ok_or_else(|| Error::InvalidArgument("mmap returned null".into()))?;

    debug!(size, base = ?base, "reserved arena");

    Ok(Self { base, size })
  }

  pub fn size(&self) -> usize {
    self.size
  }

  pub fn base(&self) -> NonNull<u8> {
    self.base
  }

  /// Pointer to the byte at `offset`. `offset` may equal `size` (one past
  /// the end) but no more.
  pub fn at(
    &self,
    offset: usize,
  ) -> NonNull<u8> {
    debug_assert!(offset <= self.size);
    unsafe { self.base.add(offset) }
  }

  /// Offset of `ptr` from the base, if it points inside the arena.
  pub fn offset_of(
    &self,
    ptr: *const u8,
  ) -> Option<usize> {
    let base = self.base.as_ptr() as usize;
    let address = ptr as usize;

    if address < base || address >= base + self.size {
      return None;
    }

    Some(address - base)
  }
}

impl Drop for Arena {
  fn drop(&mut self) {
    let result = unsafe { munmap(self.base.as_ptr() as *mut c_void, self.size) };

    if result != 0 {
      warn!(size = self.size, error = %io::Error::last_os_error(), "failed to unmap arena");
    } else {
      debug!(size = self.size, "released arena");
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_reserve_zero_fails() {
    assert!(matches!(Arena::reserve(0), Err(Error::InvalidArgument(_))));
  }

  #[test]
  fn test_reserved_memory_is_zeroed_and_writable() {
    let arena = Arena::reserve(64).unwrap();

    unsafe {
      let bytes = std::slice::from_raw_parts_mut(arena.base().as_ptr(), arena.size());
      assert!(bytes.iter().all(|&b| b == 0));
      bytes[63] = 0xAB;
      assert_eq!(*arena.at(63).as_ptr(), 0xAB);
    }
  }

  #[test]
  fn test_offset_of() {
    let arena = Arena::reserve(32).unwrap();
    let base = arena.base().as_ptr();

    assert_eq!(arena.offset_of(base), Some(0));
    assert_eq!(arena.offset_of(unsafe { base.add(31) }), Some(31));
    assert_eq!(arena.offset_of(unsafe { base.add(32) }), None);
    assert_eq!(arena.offset_of(ptr::null()), None);
  }
}
