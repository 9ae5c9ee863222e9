use std::{cell::RefCell, fmt, ptr::NonNull};

use tracing::{debug, trace};

use crate::{
  adapter::{Allocator, RawPool},
  chain::{self, ChainLink},
  config::ArenaConfig,
  error::{InvalidFreeReason, PoolError},
  ledger::{AllocationRecord, Ledger},
  raw::{self, MAX_ALIGN, RawBuffer},
};

/// Where a live arena allocation sits inside the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Location {
  /// Position in the chain, `0` being the arena itself.
  pub depth: usize,
  /// Byte offset inside that pool's buffer.
  pub offset: usize,
}

/// A variable-size arena carving regions of any length out of one buffer.
///
/// Requests that do not fit are served by a successor arena, created on first
/// need, with at least twice the capacity.
///
/// The arena is single-threaded: its state lives in a `RefCell`, so the type
/// is neither `Sync` nor re-entrant.
pub struct Arena {
  head: RefCell<ArenaNode>,
}

struct ArenaNode {
  buffer: RawBuffer,
  ledger: Ledger,
  // Upper bound on the largest free run seen by the last failed scan.
  max_known_free_run: Option<usize>,
  next: Option<Box<ArenaNode>>,
}

impl ArenaNode {
  fn with_capacity(capacity: usize) -> Result<Self, PoolError> {
    Ok(Self {
      buffer: RawBuffer::acquire(capacity)?,
      ledger: Ledger::new(),
      max_known_free_run: None,
      next: None,
    })
  }

  fn allocate_local(
    &mut self,
    size: usize,
    align: usize,
  ) -> Option<usize> {
    if let Some(run) = self.max_known_free_run.filter(|&run| size > run) {
      debug!(size, run, "skipping arena scan");
      return None;
    }

    match self.ledger.find_gap(size, align, self.buffer.len()) {
      Some(offset) => {
        self.ledger.insert(offset, size);
        Some(offset)
      }
      None => {
        // An aligned miss says nothing about unaligned runs.
        if align == 1 {
          self.max_known_free_run = Some(size - 1);
        }
        None
      }
    }
  }

  fn release_local(
    &mut self,
    offset: usize,
    size: usize,
    addr: usize,
  ) -> Result<(), PoolError> {
    match self.ledger.get(offset) {
      None => Err(PoolError::invalid_free(addr, size, InvalidFreeReason::UnknownAddress)),
      Some(recorded) if recorded != size => Err(PoolError::invalid_free(
        addr,
        size,
        InvalidFreeReason::SizeMismatch { recorded },
      )),
      Some(_) => {
        self.ledger.remove(offset);
        self.max_known_free_run = None;
        Ok(())
      }
    }
  }
}

impl ChainLink for ArenaNode {
  fn next(&self) -> Option<&Self> {
    self.next.as_deref()
  }

  fn next_slot(&mut self) -> &mut Option<Box<Self>> {
    &mut self.next
  }

  fn spawn_successor(
    &self,
    request: usize,
  ) -> Result<Self, PoolError> {
    Self::with_capacity(chain::grown_capacity(self.buffer.len(), request)?)
  }

  fn capacity(&self) -> usize {
    self.buffer.len()
  }
}

impl Drop for ArenaNode {
  fn drop(&mut self) {
    chain::release(self);
  }
}

impl Arena {
  /// Creates an arena backed by `capacity` bytes.
  pub fn new(capacity: usize) -> Result<Self, PoolError> {
    Ok(Self {
      head: RefCell::new(ArenaNode::with_capacity(capacity)?),
    })
  }

  pub fn with_config(config: &ArenaConfig) -> Result<Self, PoolError> {
    Self::new(config.initial_capacity)
  }

  /// Allocates `size` bytes with no alignment requirement.
  ///
  /// A zero-byte request returns a dangling pointer and records nothing.
  pub fn allocate(
    &self,
    size: usize,
  ) -> Result<NonNull<u8>, PoolError> {
    self.allocate_aligned(size, 1)
  }

  /// Allocates `size` bytes starting on an `align` boundary.
  ///
  /// `align` must be a power of two no larger than [`MAX_ALIGN`].
  pub fn allocate_aligned(
    &self,
    size: usize,
    align: usize,
  ) -> Result<NonNull<u8>, PoolError> {
    if !align.is_power_of_two() || align > MAX_ALIGN {
      return Err(PoolError::UnsupportedAlignment { align });
    }

    if size == 0 {
      return Ok(raw::dangling(align));
    }

    let mut head = self.head.borrow_mut();
    let mut node = &mut *head;
    let mut depth = 0;

    loop {
      if let Some(offset) = node.allocate_local(size, align) {
        trace!(depth, offset, size, "arena allocate");
        return Ok(node.buffer.at(offset));
      }

      node = chain::successor(node, size)?;
      depth += 1;
    }
  }

  /// Releases a region returned by [`Arena::allocate`].
  ///
  /// `size` must be the length originally requested. Unknown addresses and
  /// length mismatches are rejected with [`PoolError::InvalidFree`]. A
  /// zero-byte free of a pointer outside every buffer is a no-op.
  pub fn deallocate(
    &self,
    ptr: NonNull<u8>,
    size: usize,
  ) -> Result<(), PoolError> {
    let addr = ptr.as_ptr().addr();
    let mut head = self.head.borrow_mut();
    let mut node = Some(&mut *head);
    let mut depth = 0;

    while let Some(current) = node {
      if let Some(offset) = current.buffer.offset_of(ptr) {
        current.release_local(offset, size, addr)?;
        trace!(depth, offset, size, "arena deallocate");
        return Ok(());
      }

      node = current.next.as_deref_mut();
      depth += 1;
    }

    if size == 0 {
      return Ok(());
    }

    Err(PoolError::invalid_free(addr, size, InvalidFreeReason::UnknownAddress))
  }

  /// Returns a typed adapter bound to this arena.
  pub fn allocator<T>(&self) -> Allocator<'_, T, Self> {
    Allocator::new(self)
  }

  /// Capacity of this arena's own buffer, excluding successors.
  pub fn capacity(&self) -> usize {
    self.head.borrow().buffer.len()
  }

  /// Buffer capacities along the chain, starting with this arena.
  pub fn capacities(&self) -> Vec<usize> {
    chain::links(&*self.head.borrow())
      .map(|node| node.buffer.len())
      .collect()
  }

  pub fn chain_len(&self) -> usize {
    chain::links(&*self.head.borrow()).count()
  }

  /// Finds which pool of the chain `ptr` points into.
  pub fn locate(
    &self,
    ptr: NonNull<u8>,
  ) -> Option<Location> {
    chain::links(&*self.head.borrow())
      .enumerate()
      .find_map(|(depth, node)| {
        node
          .buffer
          .offset_of(ptr)
          .map(|offset| Location { depth, offset })
      })
  }

  /// Every live allocation, tagged with the depth of the pool holding it.
  pub fn regions(&self) -> Vec<(usize, AllocationRecord)> {
    chain::links(&*self.head.borrow())
      .enumerate()
      .flat_map(|(depth, node)| node.ledger.records().map(move |record| (depth, record)))
      .collect()
  }

  pub fn live_allocations(&self) -> usize {
    chain::links(&*self.head.borrow())
      .map(|node| node.ledger.len())
      .sum()
  }

  /// The cached free-run bound of this arena, if a scan has failed since the
  /// last deallocation.
  pub fn max_known_free_run(&self) -> Option<usize> {
    self.head.borrow().max_known_free_run
  }
}

impl RawPool for Arena {
  fn allocate_bytes(
    &self,
    size: usize,
    align: usize,
  ) -> Result<NonNull<u8>, PoolError> {
    self.allocate_aligned(size, align)
  }

  fn deallocate_bytes(
    &self,
    ptr: NonNull<u8>,
    size: usize,
  ) -> Result<(), PoolError> {
    self.deallocate(ptr, size)
  }
}

impl fmt::Debug for Arena {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>,
  ) -> fmt::Result {
    f.debug_struct("Arena")
      .field("capacities", &self.capacities())
      .field("live_allocations", &self.live_allocations())
      .field("max_known_free_run", &self.max_known_free_run())
      .finish()
  }
}

#[cfg(test)]
mod tests {
  use std::ptr;

  use super::*;

  fn offset(
    arena: &Arena,
    ptr: NonNull<u8>,
  ) -> (usize, usize) {
    let location = arena.locate(ptr).unwrap();
    (location.depth, location.offset)
  }

  #[test]
  fn test_reuse_and_growth_scenario() {
    let arena = Arena::new(1024).unwrap();

    let first = arena.allocate(100).unwrap();
    let second = arena.allocate(200).unwrap();

    assert_eq!(offset(&arena, first), (0, 0));
    assert_eq!(offset(&arena, second), (0, 100));

    arena.deallocate(first, 100).unwrap();

    let third = arena.allocate(50).unwrap();
    assert_eq!(third, first);

    let big = arena.allocate(1000).unwrap();
    assert_eq!(offset(&arena, big), (1, 0));
    assert_eq!(arena.capacities(), vec![1024, 2048]);
    assert!(arena.capacities()[1] >= 1000);
  }

  #[test]
  fn test_free_then_same_size_returns_same_offset() {
    let arena = Arena::new(256).unwrap();

    let _head = arena.allocate(16).unwrap();
    let middle = arena.allocate(32).unwrap();
    let _tail = arena.allocate(8).unwrap();

    arena.deallocate(middle, 32).unwrap();

    assert_eq!(arena.allocate(32).unwrap(), middle);
  }

  #[test]
  fn test_oversized_request_grows_until_it_fits() {
    let arena = Arena::new(64).unwrap();

    let ptr = arena.allocate(1000).unwrap();

    assert_eq!(arena.capacities(), vec![64, 1024]);
    assert_eq!(offset(&arena, ptr), (1, 0));
    assert_eq!(arena.max_known_free_run(), Some(999));
  }

  #[test]
  fn test_successor_is_reused() {
    let arena = Arena::new(32).unwrap();

    arena.allocate(32).unwrap();
    let a = arena.allocate(10).unwrap();
    let b = arena.allocate(10).unwrap();

    assert_eq!(arena.chain_len(), 2);
    assert_eq!(offset(&arena, a), (1, 0));
    assert_eq!(offset(&arena, b), (1, 10));
  }

  #[test]
  fn test_free_run_cache() {
    let arena = Arena::new(100).unwrap();

    let a = arena.allocate(60).unwrap();
    let b = arena.allocate(50).unwrap();

    assert_eq!(offset(&arena, b), (1, 0));
    assert_eq!(arena.max_known_free_run(), Some(49));

    // Below the cached bound, so the buffer is still scanned.
    let c = arena.allocate(40).unwrap();
    assert_eq!(offset(&arena, c), (0, 60));
    assert_eq!(arena.max_known_free_run(), Some(49));

    let d = arena.allocate(10).unwrap();
    assert_eq!(offset(&arena, d), (1, 50));
    assert_eq!(arena.max_known_free_run(), Some(9));

    arena.deallocate(a, 60).unwrap();
    assert_eq!(arena.max_known_free_run(), None);

    let e = arena.allocate(60).unwrap();
    assert_eq!(offset(&arena, e), (0, 0));
  }

  #[test]
  fn test_cache_only_rejects() {
    let arena = Arena::new(16).unwrap();

    arena.allocate(16).unwrap();
    arena.allocate(8).unwrap();
    assert_eq!(arena.max_known_free_run(), Some(7));

    // Within the bound but the buffer is full: still served by the successor.
    let ptr = arena.allocate(4).unwrap();
    assert_eq!(offset(&arena, ptr), (1, 8));
  }

  #[test]
  fn test_zero_size_is_noop() {
    let arena = Arena::new(16).unwrap();

    let ptr = arena.allocate(0).unwrap();

    assert_eq!(arena.live_allocations(), 0);
    assert_eq!(arena.locate(ptr), None);
    assert!(arena.deallocate(ptr, 0).is_ok());
  }

  #[test]
  fn test_zero_size_free_of_live_region_rejected() {
    let arena = Arena::new(64).unwrap();
    let ptr = arena.allocate(16).unwrap();

    assert_eq!(
      arena.deallocate(ptr, 0).unwrap_err().invalid_free_reason(),
      Some(InvalidFreeReason::SizeMismatch { recorded: 16 })
    );
    assert_eq!(arena.live_allocations(), 1);

    let interior = unsafe { ptr.add(8) };
    assert_eq!(
      arena.deallocate(interior, 0).unwrap_err().invalid_free_reason(),
      Some(InvalidFreeReason::UnknownAddress)
    );

    arena.deallocate(ptr, 16).unwrap();
    assert_eq!(arena.live_allocations(), 0);
  }

  #[test]
  fn test_zero_capacity_rejected() {
    assert!(matches!(Arena::new(0), Err(PoolError::ZeroCapacity)));
  }

  #[test]
  fn test_invalid_frees_are_reported() {
    let arena = Arena::new(128).unwrap();
    let ptr = arena.allocate(16).unwrap();

    let reason = |result: Result<(), PoolError>| result.unwrap_err().invalid_free_reason();

    assert_eq!(
      reason(arena.deallocate(ptr, 8)),
      Some(InvalidFreeReason::SizeMismatch { recorded: 16 })
    );

    let interior = unsafe { ptr.add(4) };
    assert_eq!(
      reason(arena.deallocate(interior, 16)),
      Some(InvalidFreeReason::UnknownAddress)
    );

    let mut foreign = 0u64;
    let foreign = NonNull::from(&mut foreign).cast::<u8>();
    assert_eq!(
      reason(arena.deallocate(foreign, 16)),
      Some(InvalidFreeReason::UnknownAddress)
    );

    arena.deallocate(ptr, 16).unwrap();
    assert_eq!(
      reason(arena.deallocate(ptr, 16)),
      Some(InvalidFreeReason::UnknownAddress)
    );
  }

  #[test]
  fn test_free_is_delegated_down_the_chain() {
    let arena = Arena::new(8).unwrap();

    let local = arena.allocate(8).unwrap();
    let chained = arena.allocate(24).unwrap();

    assert_eq!(arena.capacities(), vec![8, 32]);

    arena.deallocate(chained, 24).unwrap();
    arena.deallocate(local, 8).unwrap();

    assert_eq!(arena.live_allocations(), 0);
  }

  #[test]
  fn test_aligned_allocation() {
    let arena = Arena::new(64).unwrap();

    let byte = arena.allocate(3).unwrap();
    let word = arena.allocate_aligned(8, 8).unwrap();

    assert_eq!(offset(&arena, byte), (0, 0));
    assert_eq!(offset(&arena, word), (0, 8));
    assert_eq!(word.as_ptr().addr() % 8, 0);

    // The 5-byte hole left by alignment is still usable.
    let filler = arena.allocate(5).unwrap();
    assert_eq!(offset(&arena, filler), (0, 3));

    assert!(matches!(
      arena.allocate_aligned(8, 3),
      Err(PoolError::UnsupportedAlignment { align: 3 })
    ));
    assert!(matches!(
      arena.allocate_aligned(8, MAX_ALIGN * 2),
      Err(PoolError::UnsupportedAlignment { .. })
    ));
  }

  #[test]
  fn test_regions_hold_their_bytes() {
    let arena = Arena::new(64).unwrap();

    let a = arena.allocate(16).unwrap();
    let b = arena.allocate(16).unwrap();
    let c = arena.allocate(100).unwrap();

    unsafe {
      ptr::write_bytes(a.as_ptr(), 0xAA, 16);
      ptr::write_bytes(b.as_ptr(), 0xBB, 16);
      ptr::write_bytes(c.as_ptr(), 0xCC, 100);

      assert!((0..16).all(|i| *a.as_ptr().add(i) == 0xAA));
      assert!((0..16).all(|i| *b.as_ptr().add(i) == 0xBB));
      assert!((0..100).all(|i| *c.as_ptr().add(i) == 0xCC));
    }
  }

  mod proptests {
    use super::*;
    use proptest::prelude::*;

    #[derive(Debug, Clone)]
    enum Op {
      Alloc(usize),
      Free(usize),
    }

    fn op() -> impl Strategy<Value = Op> {
      prop_oneof![
        (1_usize..300).prop_map(Op::Alloc),
        any::<usize>().prop_map(Op::Free),
      ]
    }

    proptest! {
      #[test]
      fn live_regions_never_overlap(ops in proptest::collection::vec(op(), 1..120)) {
        let arena = Arena::new(512).unwrap();
        let mut live: Vec<(NonNull<u8>, usize)> = Vec::new();

        for op in ops {
          match op {
            Op::Alloc(size) => live.push((arena.allocate(size).unwrap(), size)),
            Op::Free(pick) if !live.is_empty() => {
              let (ptr, size) = live.swap_remove(pick % live.len());
              arena.deallocate(ptr, size).unwrap();
            }
            Op::Free(_) => {}
          }

          let mut spans: Vec<(usize, usize)> = live
            .iter()
            .map(|(ptr, size)| (ptr.as_ptr().addr(), *size))
            .collect();
          spans.sort_unstable();

          for pair in spans.windows(2) {
            prop_assert!(pair[0].0 + pair[0].1 <= pair[1].0);
          }

          let capacities = arena.capacities();
          for (depth, record) in arena.regions() {
            prop_assert!(record.end() <= capacities[depth]);
          }
          prop_assert_eq!(arena.live_allocations(), live.len());
        }
      }
    }
  }
}
