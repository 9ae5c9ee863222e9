//! Fixed-slot pool.
//!
//! ```text
//!   slots    ┌─────┬─────┬─────┬─────┐
//!            │  A  │     │  B  │     │   N cells of size_of::<T>()
//!            └─────┴─────┴─────┴─────┘
//!   occupied    1     0     1     0       free_count = 2
//! ```
//!
//! Allocation takes the first clear bit. Once every slot of a pool is taken,
//! requests go to a successor pool with the same slot count.

use std::{cell::RefCell, fmt, marker::PhantomData, mem, ptr::NonNull};

use fixedbitset::FixedBitSet;
use tracing::trace;

use crate::{
  adapter::{Allocator, RawPool},
  chain::{self, ChainLink},
  error::{InvalidFreeReason, PoolError},
  raw::{self, MAX_ALIGN, RawBuffer},
};

/// Opaque reference to one slot somewhere in a pool chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotHandle {
  depth: usize,
  index: usize,
}

impl SlotHandle {
  /// Position of the owning pool in the chain, `0` being the head.
  pub fn depth(&self) -> usize {
    self.depth
  }

  /// Slot index inside the owning pool.
  pub fn index(&self) -> usize {
    self.index
  }
}

/// A pool of `N` slots, each holding one `T`.
///
/// Like [`Arena`](crate::Arena), the pool is single-threaded and hands out raw
/// memory: constructing and dropping values is left to the caller or to an
/// [`Allocator`].
pub struct SlotPool<T, const N: usize> {
  head: RefCell<SlotNode<T, N>>,
}

struct SlotNode<T, const N: usize> {
  slots: RawBuffer,
  occupied: FixedBitSet,
  free_count: usize,
  next: Option<Box<SlotNode<T, N>>>,
  _marker: PhantomData<T>,
}

impl<T, const N: usize> SlotNode<T, N> {
  const SLOT_SIZE: usize = mem::size_of::<T>();

  fn new() -> Result<Self, PoolError> {
    if mem::align_of::<T>() > MAX_ALIGN {
      return Err(PoolError::UnsupportedAlignment {
        align: mem::align_of::<T>(),
      });
    }

    let bytes = N
      .checked_mul(Self::SLOT_SIZE)
      .ok_or(PoolError::CapacityOverflow)?;

    Ok(Self {
      slots: RawBuffer::acquire(bytes)?,
      occupied: FixedBitSet::with_capacity(N),
      free_count: N,
      next: None,
      _marker: PhantomData,
    })
  }

  fn take_local(&mut self) -> Option<usize> {
    if self.free_count == 0 {
      return None;
    }

    let Some(index) = self.occupied.zeroes().next() else {
      panic!(
        "slot pool corrupted: {} free slots counted but every bit is set",
        self.free_count
      );
    };

    self.occupied.insert(index);
    self.free_count -= 1;

    Some(index)
  }

  fn release_local(
    &mut self,
    index: usize,
  ) -> Result<(), InvalidFreeReason> {
    if !self.occupied.contains(index) {
      return Err(InvalidFreeReason::DoubleFree);
    }

    self.occupied.set(index, false);
    self.free_count += 1;

    debug_assert!(self.is_consistent());

    Ok(())
  }

  /// Slot index for `ptr`, or `None` when it lies outside this pool.
  fn index_of(
    &self,
    ptr: NonNull<u8>,
  ) -> Option<Result<usize, InvalidFreeReason>> {
    let offset = self.slots.offset_of(ptr)?;

    if offset % Self::SLOT_SIZE != 0 {
      return Some(Err(InvalidFreeReason::Misaligned));
    }

    Some(Ok(offset / Self::SLOT_SIZE))
  }

  fn slot(
    &self,
    index: usize,
  ) -> NonNull<T> {
    self.slots.at(index * Self::SLOT_SIZE).cast()
  }

  fn is_consistent(&self) -> bool {
    self.free_count == N - self.occupied.count_ones(..)
  }
}

impl<T, const N: usize> ChainLink for SlotNode<T, N> {
  fn next(&self) -> Option<&Self> {
    self.next.as_deref()
  }

  fn next_slot(&mut self) -> &mut Option<Box<Self>> {
    &mut self.next
  }

  fn spawn_successor(
    &self,
    _request: usize,
  ) -> Result<Self, PoolError> {
    Self::new()
  }

  fn capacity(&self) -> usize {
    N
  }
}

impl<T, const N: usize> Drop for SlotNode<T, N> {
  fn drop(&mut self) {
    chain::release(self);
  }
}

impl<T, const N: usize> SlotPool<T, N> {
  /// Number of slots in every pool of the chain.
  pub const SLOTS: usize = N;

  pub fn new() -> Result<Self, PoolError> {
    const {
      assert!(N > 0, "a slot pool needs at least one slot");
      assert!(mem::size_of::<T>() > 0, "zero-sized slots are not supported");
    }

    Ok(Self {
      head: RefCell::new(SlotNode::new()?),
    })
  }

  /// Takes the first free slot of the first pool that has one.
  pub fn allocate_slot(&self) -> Result<SlotHandle, PoolError> {
    self.take(1).map(|(handle, _)| handle)
  }

  /// Returns a slot taken with [`SlotPool::allocate_slot`].
  pub fn release_slot(
    &self,
    handle: SlotHandle,
  ) -> Result<(), PoolError> {
    let mut head = self.head.borrow_mut();
    let mut node = Some(&mut *head);

    for _ in 0..handle.depth {
      let Some(current) = node.take() else { break };
      node = current.next.as_deref_mut();
    }

    let Some(node) = node.filter(|_| handle.index < N) else {
      return Err(PoolError::unknown_handle(handle.depth, handle.index));
    };

    let addr = node.slot(handle.index).as_ptr().addr();

    node
      .release_local(handle.index)
      .map_err(|reason| PoolError::invalid_free(addr, Self::slot_size(), reason))?;
    trace!(depth = handle.depth, index = handle.index, "slot release");

    Ok(())
  }

  /// Address of the slot behind `handle`.
  pub fn resolve(
    &self,
    handle: SlotHandle,
  ) -> Option<NonNull<T>> {
    if handle.index >= N {
      return None;
    }

    chain::links(&*self.head.borrow())
      .nth(handle.depth)
      .map(|node| node.slot(handle.index))
  }

  /// Handle of the slot `ptr` points to, if any pool of the chain owns it.
  pub fn handle_of(
    &self,
    ptr: NonNull<T>,
  ) -> Option<SlotHandle> {
    chain::links(&*self.head.borrow())
      .enumerate()
      .find_map(|(depth, node)| match node.index_of(ptr.cast()) {
        Some(Ok(index)) => Some(SlotHandle { depth, index }),
        _ => None,
      })
  }

  /// Allocates one slot. `size` is advisory; zero returns a dangling pointer.
  pub fn allocate(
    &self,
    size: usize,
  ) -> Result<NonNull<T>, PoolError> {
    if size == 0 {
      return Ok(raw::dangling(mem::align_of::<T>()).cast());
    }

    self.take(size).map(|(_, ptr)| ptr)
  }

  /// Frees the slot at `ptr`.
  ///
  /// Pointers outside every pool, pointers between slot boundaries and slots
  /// that are already free are rejected with [`PoolError::InvalidFree`], as is
  /// a zero-byte free of a live slot. A zero-byte free of a pointer outside
  /// every pool is a no-op.
  pub fn deallocate(
    &self,
    ptr: NonNull<T>,
    size: usize,
  ) -> Result<(), PoolError> {
    let addr = ptr.as_ptr().addr();
    let mut head = self.head.borrow_mut();
    let mut node = Some(&mut *head);
    let mut depth = 0;

    while let Some(current) = node {
      match current.index_of(ptr.cast()) {
        Some(Ok(_)) if size == 0 => {
          return Err(PoolError::invalid_free(
            addr,
            size,
            InvalidFreeReason::SizeMismatch {
              recorded: Self::slot_size(),
            },
          ));
        }
        Some(Ok(index)) => {
          current
            .release_local(index)
            .map_err(|reason| PoolError::invalid_free(addr, size, reason))?;
          trace!(depth, index, "slot deallocate");
          return Ok(());
        }
        Some(Err(reason)) => return Err(PoolError::invalid_free(addr, size, reason)),
        None => {}
      }

      node = current.next.as_deref_mut();
      depth += 1;
    }

    if size == 0 {
      return Ok(());
    }

    Err(PoolError::invalid_free(addr, size, InvalidFreeReason::UnknownAddress))
  }

  /// Returns a typed adapter bound to this pool.
  pub fn allocator(&self) -> Allocator<'_, T, Self> {
    Allocator::new(self)
  }

  /// Free slots in this pool, excluding successors.
  pub fn free_count(&self) -> usize {
    self.head.borrow().free_count
  }

  /// Free slots of each pool along the chain.
  pub fn free_counts(&self) -> Vec<usize> {
    chain::links(&*self.head.borrow())
      .map(|node| node.free_count)
      .collect()
  }

  pub fn chain_len(&self) -> usize {
    chain::links(&*self.head.borrow()).count()
  }

  /// Whether every free counter agrees with its occupancy bitmap.
  pub fn is_consistent(&self) -> bool {
    chain::links(&*self.head.borrow()).all(SlotNode::is_consistent)
  }

  const fn slot_size() -> usize {
    mem::size_of::<T>()
  }

  fn take(
    &self,
    size: usize,
  ) -> Result<(SlotHandle, NonNull<T>), PoolError> {
    let mut head = self.head.borrow_mut();
    let mut node = &mut *head;
    let mut depth = 0;

    loop {
      if let Some(index) = node.take_local() {
        trace!(depth, index, "slot allocate");
        return Ok((SlotHandle { depth, index }, node.slot(index)));
      }

      node = chain::successor(node, size)?;
      depth += 1;
    }
  }
}

impl<T, const N: usize> RawPool for SlotPool<T, N> {
  fn allocate_bytes(
    &self,
    size: usize,
    align: usize,
  ) -> Result<NonNull<u8>, PoolError> {
    if align > mem::align_of::<T>() {
      return Err(PoolError::UnsupportedAlignment { align });
    }

    if size > Self::slot_size() {
      return Err(PoolError::OversizedRequest {
        requested: size,
        slot_size: Self::slot_size(),
      });
    }

    self.allocate(size).map(NonNull::cast)
  }

  fn deallocate_bytes(
    &self,
    ptr: NonNull<u8>,
    size: usize,
  ) -> Result<(), PoolError> {
    self.deallocate(ptr.cast(), size)
  }
}

impl<T, const N: usize> fmt::Debug for SlotPool<T, N> {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>,
  ) -> fmt::Result {
    f.debug_struct("SlotPool")
      .field("slots", &N)
      .field("slot_size", &Self::slot_size())
      .field("free_counts", &self.free_counts())
      .finish()
  }
}
