use std::{
  mem,
  ptr::{self, NonNull},
};

use libc::{c_void, free, malloc, max_align_t};

use crate::error::PoolError;

/// Strongest alignment every backing buffer is guaranteed to have.
pub const MAX_ALIGN: usize = mem::align_of::<max_align_t>();

/// A block of memory obtained from the C runtime and released on drop.
///
/// Every pool node owns exactly one of these, so releasing a node releases its
/// buffer on every exit path, including a half-built successor.
pub(crate) struct RawBuffer {
  base: NonNull<u8>,
  len: usize,
}

impl RawBuffer {
  pub(crate) fn acquire(len: usize) -> Result<Self, PoolError> {
    if len == 0 {
      return Err(PoolError::ZeroCapacity);
    }

    let address = unsafe { malloc(len) } as *mut u8;

    let Some(base) = NonNull::new(address) else {
      return Err(PoolError::ResourceAcquisition { bytes: len });
    };

    debug_assert_eq!(base.as_ptr().addr() % MAX_ALIGN, 0);

    Ok(Self { base, len })
  }

  pub(crate) fn len(&self) -> usize {
    self.len
  }

  pub(crate) fn base(&self) -> NonNull<u8> {
    self.base
  }

  /// Byte offset of `ptr` from the buffer base, if it points inside the buffer.
  pub(crate) fn offset_of(
    &self,
    ptr: NonNull<u8>,
  ) -> Option<usize> {
    let base = self.base.as_ptr().addr();
    let address = ptr.as_ptr().addr();

    (address >= base && address - base < self.len).then(|| address - base)
  }

  /// Pointer to `offset` bytes past the base.
  ///
  /// `offset` must not exceed the buffer length.
  pub(crate) fn at(
    &self,
    offset: usize,
  ) -> NonNull<u8> {
    debug_assert!(offset <= self.len);
    unsafe { self.base.add(offset) }
  }
}

/// A non-null, `align`-aligned pointer handed out for zero-byte requests.
pub(crate) fn dangling(align: usize) -> NonNull<u8> {
  NonNull::new(ptr::without_provenance_mut(align)).unwrap_or(NonNull::dangling())
}

impl Drop for RawBuffer {
  fn drop(&mut self) {
    unsafe { free(self.base.as_ptr() as *mut c_void) };
  }
}
