//! Typed allocator handles bound to a pool.
//!
//! ```text
//!   Allocator<u32> ──┐
//!   Allocator<Big> ──┼──► &Arena ──► successor ──► ...
//!   Allocator<u32> ──┘
//!        all three compare equal
//! ```

use std::{
  fmt,
  marker::PhantomData,
  mem,
  ptr::{self, NonNull},
};

use crate::error::PoolError;

/// Byte-level interface a pool offers to [`Allocator`].
pub trait RawPool {
  /// Allocates `size` bytes aligned to `align`.
  fn allocate_bytes(
    &self,
    size: usize,
    align: usize,
  ) -> Result<NonNull<u8>, PoolError>;

  /// Releases `size` bytes previously returned by `allocate_bytes`.
  fn deallocate_bytes(
    &self,
    ptr: NonNull<u8>,
    size: usize,
  ) -> Result<(), PoolError>;
}

/// A non-owning, copyable handle that allocates `T` values from a pool.
///
/// Two allocators are equal when they are bound to the same pool instance,
/// whatever their element types.
pub struct Allocator<'a, T, P: ?Sized> {
  pool: &'a P,
  _marker: PhantomData<fn() -> T>,
}

impl<'a, T, P: RawPool + ?Sized> Allocator<'a, T, P> {
  pub fn new(pool: &'a P) -> Self {
    Self {
      pool,
      _marker: PhantomData,
    }
  }

  pub fn pool(&self) -> &'a P {
    self.pool
  }

  /// The same pool, allocating `U` instead of `T`.
  pub fn rebind<U>(self) -> Allocator<'a, U, P> {
    Allocator::new(self.pool)
  }

  fn byte_len(n: usize) -> Result<usize, PoolError> {
    n.checked_mul(mem::size_of::<T>())
      .ok_or(PoolError::CapacityOverflow)
  }

  /// Allocates uninitialized room for `n` values of `T`.
  pub fn allocate(
    &self,
    n: usize,
  ) -> Result<NonNull<T>, PoolError> {
    let size = Self::byte_len(n)?;

    if size == 0 {
      return Ok(NonNull::dangling());
    }

    self
      .pool
      .allocate_bytes(size, mem::align_of::<T>())
      .map(NonNull::cast)
  }

  /// Returns room for `n` values to the pool. Does not drop them.
  pub fn deallocate(
    &self,
    ptr: NonNull<T>,
    n: usize,
  ) -> Result<(), PoolError> {
    let size = Self::byte_len(n)?;

    self.pool.deallocate_bytes(ptr.cast(), size)
  }

  /// Moves `value` into uninitialized memory.
  ///
  /// # Safety
  ///
  /// `ptr` must be valid for writes and aligned for `T`. Any value already
  /// there is overwritten without being dropped.
  pub unsafe fn construct_in_place(
    &self,
    ptr: NonNull<T>,
    value: T,
  ) {
    unsafe { ptr.write(value) }
  }

  /// Drops the value at `ptr` without releasing its memory.
  ///
  /// # Safety
  ///
  /// `ptr` must point to an initialized `T` that is not used afterwards.
  pub unsafe fn destroy_in_place(
    &self,
    ptr: NonNull<T>,
  ) {
    unsafe { ptr::drop_in_place(ptr.as_ptr()) }
  }

  /// Allocates room for one `T` and moves `value` into it.
  pub fn new_object(
    &self,
    value: T,
  ) -> Result<NonNull<T>, PoolError> {
    let ptr = self.allocate(1)?;
    unsafe { self.construct_in_place(ptr, value) };
    Ok(ptr)
  }

  /// Drops the object at `ptr` and returns its memory to the pool.
  ///
  /// # Safety
  ///
  /// `ptr` must come from [`Allocator::new_object`] on an allocator bound to
  /// the same pool and must not have been deleted already.
  pub unsafe fn delete_object(
    &self,
    ptr: NonNull<T>,
  ) -> Result<(), PoolError> {
    unsafe { self.destroy_in_place(ptr) };
    self.deallocate(ptr, 1)
  }
}

impl<T, P: ?Sized> Clone for Allocator<'_, T, P> {
  fn clone(&self) -> Self {
    *self
  }
}

impl<T, P: ?Sized> Copy for Allocator<'_, T, P> {}

impl<'b, T, U, P: ?Sized> PartialEq<Allocator<'b, U, P>> for Allocator<'_, T, P> {
  fn eq(
    &self,
    other: &Allocator<'b, U, P>,
  ) -> bool {
    ptr::addr_eq(self.pool, other.pool)
  }
}

impl<T, P: ?Sized> Eq for Allocator<'_, T, P> {}

impl<T, P: ?Sized> fmt::Debug for Allocator<'_, T, P> {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>,
  ) -> fmt::Result {
    f.debug_struct("Allocator")
      .field("element", &std::any::type_name::<T>())
      .field("pool", &(self.pool as *const P))
      .finish()
  }
}
