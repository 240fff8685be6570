use std::{
  fmt,
  ptr::NonNull,
  slice,
  sync::atomic::{AtomicU64, Ordering},
};

use tracing::{debug, warn};

use crate::{
  arena::Arena,
  error::{Error, Result},
  segment::{Address, Segment},
};

/// Global counter for tagging the addresses each manager hands out.
static MANAGER_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

fn next_manager_id() -> u64 {
  MANAGER_ID_COUNTER.fetch_add(1, Ordering::Relaxed)
}

/// Snapshot of how the arena is currently carved up.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Usage {
  pub capacity: usize,
  pub used: usize,
  pub free: usize,
  pub segments: usize,
  pub largest_free: usize,
}

/// Region-based memory manager over one fixed-size arena.
///
/// The segment table is kept sorted by offset and partitions `[0, capacity)`
/// with no gaps and no overlaps. Allocation is first-fit; a free segment
/// larger than the request is split into a used head and a free tail.
/// Releasing a segment merges it with a free predecessor and/or successor,
/// so two free segments are never adjacent.
///
/// Every [`Address`] carries the id of the manager that issued it; handles
/// from another manager are treated as unknown.
///
/// ```text
///   allocate(8) on a fresh 32 byte arena:
///
///   before  ┌───────────────────────────────┐
///           │ free 0..32                    │
///           └───────────────────────────────┘
///   after   ┌───────┬───────────────────────┐
///           │used   │ free 8..32            │
///           └───────┴───────────────────────┘
/// ```
pub struct StorageManager {
  id: u64,
  name: String,
  arena: Arena,
  segments: Vec<Segment>,
}

impl StorageManager {
  /// Reserves an arena of `size` bytes holding a single free segment.
  ///
  /// # Errors
  ///
  /// [`Error::InvalidArgument`] if `size` is 0, [`Error::Os`] if the OS
  /// cannot reserve the arena.
  pub fn new(size: usize) -> Result<Self> {
    Self::with_name("storage", size)
  }

  /// Same as [`StorageManager::new`], with a name used in logs and `Debug`.
  pub fn with_name(
    name: &str,
    size: usize,
  ) -> Result<Self> {
    let arena = Arena::reserve(size)?;

    let id = next_manager_id();
    debug!(name, id, size, "storage manager created");

    Ok(Self {
      id,
      name: name.to_string(),
      arena,
      segments: vec![Segment::new(0, size, true)],
    })
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  /// Arena size in bytes.
  pub fn capacity(&self) -> usize {
    self.arena.size()
  }

  /// The segment table, ordered by offset.
  pub fn segments(&self) -> &[Segment] {
    &self.segments
  }

  /// Carves `bytes_wanted` bytes out of the first free segment large enough.
  ///
  /// # Errors
  ///
  /// [`Error::InvalidArgument`] for a zero-size request,
  /// [`Error::OutOfMemory`] when no free segment fits. The table is left
  /// untouched on error.
  pub fn allocate(
    &mut self,
    bytes_wanted: usize,
  ) -> Result<Address> {
    if bytes_wanted == 0 {
      return Err(Error::InvalidArgument("cannot allocate 0 bytes".into()));
    }

    let Some(index) = self.find_free_segment(bytes_wanted) else {
      let largest_free = self.largest_free();
      warn!(name = %self.name, requested = bytes_wanted, largest_free, "out of memory");
      return Err(Error::OutOfMemory {
        requested: bytes_wanted,
        largest_free,
      });
    };

    let segment = &mut self.segments[index];
    let address = Address::new(self.id, segment.offset);

    if segment.length == bytes_wanted {
      segment.free = false;
      debug!(name = %self.name, %address, bytes = bytes_wanted, "allocated exact fit");
    } else {
      let remainder = Segment::new(segment.offset + bytes_wanted, segment.length - bytes_wanted, true);
      segment.length = bytes_wanted;
      segment.free = false;
      self.segments.insert(index + 1, remainder);
      debug!(
        name = %self.name,
        %address,
        bytes = bytes_wanted,
        remainder = remainder.length,
        "allocated with split"
      );
    }

    self.debug_validate();
    Ok(address)
  }

  /// Releases the allocation starting at `address` and coalesces it with
  /// free neighbours.
  ///
  /// # Errors
  ///
  /// [`Error::NotFound`] if no used segment starts at `address`: a double
  /// free or an address this manager never handed out, including one issued
  /// by another manager. The table is left untouched on error.
  pub fn free(
    &mut self,
    address: Address,
  ) -> Result<()> {
    let offset = address.offset();

    let Some(mut index) = self.find_live(address) else {
      warn!(name = %self.name, %address, "rejected free of unknown address");
      return Err(Error::NotFound { offset });
    };

    let length = self.segments[index].length;
    self.segments[index].free = true;

    let merged_next = index + 1 < self.segments.len() && self.segments[index + 1].free;
    if merged_next {
      let next = self.segments.remove(index + 1);
      self.segments[index].length += next.length;
    }

    let merged_previous = index > 0 && self.segments[index - 1].free;
    if merged_previous {
      let current = self.segments.remove(index);
      index -= 1;
      self.segments[index].length += current.length;
    }

    debug!(
      name = %self.name,
      %address,
      bytes = length,
      merged_previous,
      merged_next,
      free_run = self.segments[index].length,
      "freed"
    );

    self.debug_validate();
    Ok(())
  }

  /// Releases the allocation `ptr` points at.
  pub fn free_ptr(
    &mut self,
    ptr: *const u8,
  ) -> Result<()> {
    let address = self.address_of(ptr)?;
    self.free(address)
  }

  /// Maps a raw pointer into the arena back to its [`Address`].
  ///
  /// # Errors
  ///
  /// [`Error::InvalidArgument`] if `ptr` lies outside the arena.
  pub fn address_of(
    &self,
    ptr: *const u8,
  ) -> Result<Address> {
    self
      .arena
      .offset_of(ptr)
      .map(|offset| Address::new(self.id, offset))
      .ok_or_else(|| Error::InvalidArgument(format!("pointer {ptr:?} is outside the arena")))
  }

  /// Raw pointer to a live allocation (`arena base + offset`).
  pub fn as_ptr(
    &self,
    address: Address,
  ) -> Option<NonNull<u8>> {
    self
      .find_live(address)
      .map(|index| self.arena.at(self.segments[index].offset))
  }

  /// Size in bytes of the live allocation at `address`.
  pub fn size_of(
    &self,
    address: Address,
  ) -> Option<usize> {
    self
      .find_live(address)
      .map(|index| self.segments[index].length)
  }

  pub fn bytes(
    &self,
    address: Address,
  ) -> Option<&[u8]> {
    let index = self.find_live(address)?;
    let segment = self.segments[index];
    let ptr = self.arena.at(segment.offset);

    Some(unsafe { slice::from_raw_parts(ptr.as_ptr(), segment.length) })
  }

  pub fn bytes_mut(
    &mut self,
    address: Address,
  ) -> Option<&mut [u8]> {
    let index = self.find_live(address)?;
    let segment = self.segments[index];
    let ptr = self.arena.at(segment.offset);

    Some(unsafe { slice::from_raw_parts_mut(ptr.as_ptr(), segment.length) })
  }

  pub fn usage(&self) -> Usage {
    let free = self
      .segments
      .iter()
      .filter(|segment| segment.free)
      .map(|segment| segment.length)
      .sum::<usize>();

    Usage {
      capacity: self.capacity(),
      used: self.capacity() - free,
      free,
      segments: self.segments.len(),
      largest_free: self.largest_free(),
    }
  }

  /// Checks that the table partitions the arena and that no two free
  /// segments are adjacent.
  pub fn validate(&self) -> Result<()> {
    let mut expected_offset = 0;
    let mut previous_free = false;

    for (index, segment) in self.segments.iter().enumerate() {
      if segment.length == 0 {
        return Err(Error::Corrupted(format!("segment {index} has zero length")));
      }
      if segment.offset != expected_offset {
        return Err(Error::Corrupted(format!(
          "segment {index} starts at {} but the previous one ends at {expected_offset}",
          segment.offset
        )));
      }
      if segment.free && previous_free {
        return Err(Error::Corrupted(format!(
          "segments {} and {index} are both free",
          index - 1
        )));
      }

      expected_offset = segment.end();
      previous_free = segment.free;
    }

    if expected_offset != self.capacity() {
      return Err(Error::Corrupted(format!(
        "segments cover {expected_offset} of {} bytes",
        self.capacity()
      )));
    }

    Ok(())
  }

  fn find_free_segment(
    &self,
    size: usize,
  ) -> Option<usize> {
    self
      .segments
      .iter()
      .position(|segment| segment.free && segment.length >= size)
  }

  /// Index of the used segment `address` names, if this manager issued it.
  fn find_live(
    &self,
    address: Address,
  ) -> Option<usize> {
    if address.manager() != self.id {
      return None;
    }

    self.find_used_segment(address.offset())
  }

  fn find_used_segment(
    &self,
    offset: usize,
  ) -> Option<usize> {
    self
      .segments
      .binary_search_by_key(&offset, |segment| segment.offset)
      .ok()
      .filter(|&index| !self.segments[index].free)
  }

  fn largest_free(&self) -> usize {
    self
      .segments
      .iter()
      .filter(|segment| segment.free)
      .map(|segment| segment.length)
      .max()
      .unwrap_or(0)
  }

  fn debug_validate(&self) {
    #[cfg(debug_assertions)]
    if let Err(error) = self.validate() {
      panic!("{}: {error}", self.name);
    }
  }
}

impl fmt::Debug for StorageManager {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>,
  ) -> fmt::Result {
    f.debug_struct("StorageManager")
      .field("id", &self.id)
      .field("name", &self.name)
      .field("capacity", &self.capacity())
      .field("segments", &self.segments)
      .finish()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn table(manager: &StorageManager) -> Vec<(usize, usize, bool)> {
    manager
      .segments()
      .iter()
      .map(|s| (s.offset, s.length, s.free))
      .collect()
  }

  #[test]
  fn test_new_has_single_free_segment() {
    let manager = StorageManager::new(128).unwrap();

    assert_eq!(manager.capacity(), 128);
    assert_eq!(table(&manager), vec![(0, 128, true)]);
    manager.validate().unwrap();
  }

  #[test]
  fn test_zero_size_rejected() {
    assert!(matches!(StorageManager::new(0), Err(Error::InvalidArgument(_))));

    let mut manager = StorageManager::new(16).unwrap();
    assert!(matches!(manager.allocate(0), Err(Error::InvalidArgument(_))));
    assert_eq!(table(&manager), vec![(0, 16, true)]);
  }

  #[test]
  fn test_split_places_free_remainder_after_used_head() {
    let mut manager = StorageManager::new(100).unwrap();

    let first = manager.allocate(30).unwrap();
    assert_eq!(first.offset(), 0);
    assert_eq!(table(&manager), vec![(0, 30, false), (30, 70, true)]);

    let second = manager.allocate(20).unwrap();
    assert_eq!(second.offset(), 30);
    assert_eq!(table(&manager), vec![(0, 30, false), (30, 20, false), (50, 50, true)]);
  }

  #[test]
  fn test_exact_fit_keeps_table_size() {
    let mut manager = StorageManager::new(64).unwrap();

    let address = manager.allocate(64).unwrap();
    assert_eq!(address.offset(), 0);
    assert_eq!(table(&manager), vec![(0, 64, false)]);
  }

  #[test]
  fn test_first_fit_prefers_lowest_offset() {
    let mut manager = StorageManager::new(100).unwrap();

    let a = manager.allocate(10).unwrap();
    let _b = manager.allocate(10).unwrap();
    let c = manager.allocate(40).unwrap();
    let _d = manager.allocate(10).unwrap();

    manager.free(a).unwrap();
    manager.free(c).unwrap();

    // Both the 10 byte hole at 0 and the 40 byte hole at 20 fit; first wins.
    let e = manager.allocate(8).unwrap();
    assert_eq!(e.offset(), 0);

    // Only the hole at 20 fits now, not the best-fitting tail.
    let f = manager.allocate(30).unwrap();
    assert_eq!(f.offset(), 20);
  }

  #[test]
  fn test_round_trip_restores_initial_table() {
    let mut manager = StorageManager::new(256).unwrap();

    let address = manager.allocate(100).unwrap();
    manager.free(address).unwrap();

    assert_eq!(table(&manager), vec![(0, 256, true)]);
  }

  #[test]
  fn test_coalesce_three_way_in_any_order() {
    let orders: [[usize; 3]; 6] = [[0, 2, 1], [0, 1, 2], [1, 0, 2], [1, 2, 0], [2, 0, 1], [2, 1, 0]];

    for order in orders {
      let mut manager = StorageManager::new(30).unwrap();
      let addresses = [
        manager.allocate(10).unwrap(),
        manager.allocate(10).unwrap(),
        manager.allocate(10).unwrap(),
      ];

      for index in order {
        manager.free(addresses[index]).unwrap();
        manager.validate().unwrap();
      }

      assert_eq!(table(&manager), vec![(0, 30, true)], "free order {order:?}");
    }
  }

  #[test]
  fn test_coalesce_with_trailing_free_segment() {
    let mut manager = StorageManager::new(40).unwrap();

    let a = manager.allocate(10).unwrap();
    let b = manager.allocate(10).unwrap();
    let c = manager.allocate(10).unwrap();

    manager.free(a).unwrap();
    manager.free(c).unwrap();
    assert_eq!(table(&manager), vec![(0, 10, true), (10, 10, false), (20, 20, true)]);

    manager.free(b).unwrap();
    assert_eq!(table(&manager), vec![(0, 40, true)]);
  }

  #[test]
  fn test_exhaustion() {
    let mut manager = StorageManager::new(50).unwrap();

    assert!(matches!(
      manager.allocate(51),
      Err(Error::OutOfMemory {
        requested: 51,
        largest_free: 50
      })
    ));

    manager.allocate(50).unwrap();
    assert!(matches!(
      manager.allocate(1),
      Err(Error::OutOfMemory { largest_free: 0, .. })
    ));
  }

  #[test]
  fn test_fragmented_arena_reports_out_of_memory() {
    let mut manager = StorageManager::new(30).unwrap();

    let a = manager.allocate(10).unwrap();
    let _b = manager.allocate(10).unwrap();
    let c = manager.allocate(10).unwrap();
    manager.free(a).unwrap();
    manager.free(c).unwrap();

    assert_eq!(manager.usage().free, 20);
    assert!(matches!(
      manager.allocate(15),
      Err(Error::OutOfMemory { largest_free: 10, .. })
    ));
  }

  #[test]
  fn test_double_and_foreign_free_rejected() {
    let mut manager = StorageManager::new(64).unwrap();

    let a = manager.allocate(16).unwrap();
    let b = manager.allocate(16).unwrap();
    manager.free(a).unwrap();

    assert!(matches!(manager.free(a), Err(Error::NotFound { offset: 0 })));
    // Inside a live allocation but not at its start.
    assert!(matches!(manager.free(Address::new(manager.id, 20)), Err(Error::NotFound { offset: 20 })));
    // Start of the free tail.
    assert!(matches!(manager.free(Address::new(manager.id, 32)), Err(Error::NotFound { .. })));

    assert_eq!(table(&manager), vec![(0, 16, true), (16, 16, false), (32, 32, true)]);
    manager.validate().unwrap();
    manager.free(b).unwrap();
  }

  #[test]
  fn test_handle_from_other_manager_is_unknown() {
    let mut issuer = StorageManager::new(64).unwrap();
    let mut other = StorageManager::new(64).unwrap();

    let foreign = issuer.allocate(16).unwrap();
    let live = other.allocate(16).unwrap();
    assert_eq!(foreign.offset(), live.offset());
    assert_ne!(foreign, live);

    assert!(matches!(other.free(foreign), Err(Error::NotFound { offset: 0 })));
    assert!(other.as_ptr(foreign).is_none());
    assert!(other.size_of(foreign).is_none());
    assert!(other.bytes(foreign).is_none());
    assert!(other.bytes_mut(foreign).is_none());

    assert_eq!(table(&other), vec![(0, 16, false), (16, 48, true)]);
    assert_eq!(other.size_of(live), Some(16));

    other.free(live).unwrap();
    issuer.free(foreign).unwrap();
  }

  #[test]
  fn test_pointer_translation() {
    let mut manager = StorageManager::new(64).unwrap();

    let _a = manager.allocate(8).unwrap();
    let b = manager.allocate(8).unwrap();

    let ptr = manager.as_ptr(b).unwrap();
    assert_eq!(manager.address_of(ptr.as_ptr()).unwrap(), b);

    let outside = 0usize as *const u8;
    assert!(matches!(manager.address_of(outside), Err(Error::InvalidArgument(_))));
    assert!(matches!(manager.free_ptr(outside), Err(Error::InvalidArgument(_))));

    manager.free_ptr(ptr.as_ptr()).unwrap();
    assert!(manager.as_ptr(b).is_none());
  }

  #[test]
  fn test_bytes_are_isolated_per_allocation() {
    let mut manager = StorageManager::new(32).unwrap();

    let a = manager.allocate(4).unwrap();
    let b = manager.allocate(4).unwrap();

    manager.bytes_mut(a).unwrap().copy_from_slice(&[1, 2, 3, 4]);
    manager.bytes_mut(b).unwrap().fill(9);

    assert_eq!(manager.bytes(a).unwrap(), &[1, 2, 3, 4]);
    assert_eq!(manager.bytes(b).unwrap(), &[9, 9, 9, 9]);
    assert_eq!(manager.size_of(a), Some(4));

    manager.free(a).unwrap();
    assert!(manager.bytes(a).is_none());
    assert_eq!(manager.size_of(a), None);
  }

  #[test]
  fn test_usage() {
    let mut manager = StorageManager::with_name("usage", 100).unwrap();

    manager.allocate(25).unwrap();
    let b = manager.allocate(25).unwrap();
    manager.allocate(25).unwrap();
    manager.free(b).unwrap();

    assert_eq!(
      manager.usage(),
      Usage {
        capacity: 100,
        used: 50,
        free: 50,
        segments: 4,
        largest_free: 25,
      }
    );
    assert_eq!(manager.name(), "usage");
  }

  #[test]
  fn test_validate_detects_corruption() {
    let mut manager = StorageManager::new(20).unwrap();

    manager.segments = vec![Segment::new(0, 10, true), Segment::new(10, 10, true)];
    assert!(matches!(manager.validate(), Err(Error::Corrupted(_))));

    manager.segments = vec![Segment::new(0, 10, false), Segment::new(12, 8, true)];
    assert!(matches!(manager.validate(), Err(Error::Corrupted(_))));

    manager.segments = vec![Segment::new(0, 10, false)];
    assert!(matches!(manager.validate(), Err(Error::Corrupted(_))));

    manager.segments = vec![Segment::new(0, 0, false), Segment::new(0, 20, true)];
    assert!(matches!(manager.validate(), Err(Error::Corrupted(_))));
  }
}
