use std::{cell::RefCell, fmt, marker::PhantomData, mem, ptr, ptr::NonNull, rc::Rc};

use tracing::trace;

use crate::{
  error::{Error, Result},
  manager::StorageManager,
};

/// Typed allocator handing out storage for `T` values from a shared
/// [`StorageManager`].
///
/// Clones share the same manager. The arena only guarantees byte
/// granularity, so [`construct`](Self::construct) and
/// [`destroy`](Self::destroy) move values with unaligned accesses.
pub struct ArenaAllocator<T> {
  manager: Rc<RefCell<StorageManager>>,
  _marker: PhantomData<T>,
}

impl<T> ArenaAllocator<T> {
  pub fn new(manager: Rc<RefCell<StorageManager>>) -> Self {
    Self {
      manager,
      _marker: PhantomData,
    }
  }

  pub fn manager(&self) -> &Rc<RefCell<StorageManager>> {
    &self.manager
  }

  /// Adapter for another element type over the same manager.
  pub fn rebind<U>(&self) -> ArenaAllocator<U> {
    ArenaAllocator::new(Rc::clone(&self.manager))
  }

  /// Reserves room for `n` values of `T`.
  ///
  /// # Errors
  ///
  /// [`Error::InvalidArgument`] if `n * size_of::<T>()` is zero or
  /// overflows, otherwise whatever [`StorageManager::allocate`] reports.
  pub fn allocate(
    &self,
    n: usize,
  ) -> Result<NonNull<T>> {
    let bytes = n
      .checked_mul(mem::size_of::<T>())
      .ok_or_else(|| Error::InvalidArgument(format!("{n} x {} bytes overflows", mem::size_of::<T>())))?;

    let mut manager = self.manager.borrow_mut();
    let address = manager.allocate(bytes)?;
    let ptr = manager
      .as_ptr(address)
      .ok_or(Error::NotFound { offset: address.offset() })?;

    trace!(count = n, bytes, %address, "allocator allocated");

    Ok(ptr.cast())
  }

  /// Returns storage obtained from [`allocate`](Self::allocate). `n` must
  /// match the count passed there; the manager tracks the real length.
  pub fn deallocate(
    &self,
    p: NonNull<T>,
    n: usize,
  ) -> Result<()> {
    self.manager.borrow_mut().free_ptr(p.as_ptr() as *const u8)?;

    trace!(count = n, ptr = ?p, "allocator deallocated");

    Ok(())
  }

  /// Moves `value` into the slot at `p` without reading the old contents.
  ///
  /// # Safety
  ///
  /// `p` must point into a live allocation from this adapter with room for
  /// one `T`.
  pub unsafe fn construct(
    &self,
    p: NonNull<T>,
    value: T,
  ) {
    unsafe { ptr::write_unaligned(p.as_ptr(), value) };
    trace!(ptr = ?p, "allocator constructed an object");
  }

  /// Drops the value at `p` in place, leaving the slot uninitialized.
  ///
  /// # Safety
  ///
  /// `p` must hold a value previously written by
  /// [`construct`](Self::construct) and not yet destroyed.
  pub unsafe fn destroy(
    &self,
    p: NonNull<T>,
  ) {
    drop(unsafe { ptr::read_unaligned(p.as_ptr()) });
    trace!(ptr = ?p, "allocator destroyed an object");
  }
}

impl<T> Clone for ArenaAllocator<T> {
  fn clone(&self) -> Self {
    Self::new(Rc::clone(&self.manager))
  }
}

impl<T> fmt::Debug for ArenaAllocator<T> {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>,
  ) -> fmt::Result {
    f.debug_struct("ArenaAllocator")
      .field("element", &std::any::type_name::<T>())
      .field("manager", &self.manager)
      .finish()
  }
}
