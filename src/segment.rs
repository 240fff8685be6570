use std::fmt;

/// Opaque handle to a live allocation: the byte offset of its segment from
/// the arena base, tagged with the id of the manager that issued it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Address {
  manager: u64,
  offset: usize,
}

impl Address {
  pub(crate) fn new(
    manager: u64,
    offset: usize,
  ) -> Self {
    Self { manager, offset }
  }

  /// Id of the issuing manager.
  pub(crate) fn manager(self) -> u64 {
    self.manager
  }

  /// Byte offset from the arena base.
  pub fn offset(self) -> usize {
    self.offset
  }
}

impl fmt::Display for Address {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>,
  ) -> fmt::Result {
    write!(f, "#{}+{:#x}", self.manager, self.offset)
  }
}

/// One entry of the segment table: a contiguous span of the arena.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Segment {
  pub offset: usize,
  pub length: usize,
  pub free: bool,
}

impl Segment {
  pub fn new(
    offset: usize,
    length: usize,
    free: bool,
  ) -> Self {
    Self { offset, length, free }
  }

  /// First offset past the end of this segment.
  pub fn end(&self) -> usize {
    self.offset + self.length
  }
}

impl fmt::Display for Segment {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>,
  ) -> fmt::Result {
    let state = if self.free { "free" } else { "used" };
    write!(f, "[{}..{}) {} ({} bytes)", self.offset, self.end(), state, self.length)
  }
}
