//! Successor ownership and growth policy shared by both pool kinds.
//!
//! ```text
//!   ┌────────┐ owns ┌────────┐ owns ┌────────┐
//!   │ depth 0├─────►│ depth 1├─────►│ depth 2│──► None
//!   └────────┘      └────────┘      └────────┘
//! ```
//!
//! A successor is created the first time its parent cannot serve a request and
//! is never replaced afterwards.

use std::iter;

use tracing::debug;

use crate::error::PoolError;

/// Multiplier applied to a parent's capacity when a successor is created.
pub const GROWTH_FACTOR: usize = 2;

/// A pool node that can own a successor of its own kind.
pub(crate) trait ChainLink: Sized {
  fn next(&self) -> Option<&Self>;

  fn next_slot(&mut self) -> &mut Option<Box<Self>>;

  /// Builds the node that takes over once this one cannot serve `request`.
  fn spawn_successor(
    &self,
    request: usize,
  ) -> Result<Self, PoolError>;

  fn capacity(&self) -> usize;
}

/// Returns the successor of `link`, creating it on first use.
pub(crate) fn successor<L: ChainLink>(
  link: &mut L,
  request: usize,
) -> Result<&mut L, PoolError> {
  let next = match link.next_slot().take() {
    Some(next) => next,
    None => {
      let next = Box::new(link.spawn_successor(request)?);

      debug!(
        parent_capacity = link.capacity(),
        capacity = next.capacity(),
        request,
        "chained successor pool"
      );

      next
    }
  };

  Ok(&mut **link.next_slot().insert(next))
}

/// Iterates over `head` and every successor in chain order.
pub(crate) fn links<L: ChainLink>(head: &L) -> impl Iterator<Item = &L> {
  iter::successors(Some(head), |link| link.next())
}

/// Detaches and drops the tail of the chain one node at a time.
pub(crate) fn release<L: ChainLink>(head: &mut L) {
  let mut next = head.next_slot().take();

  while let Some(mut link) = next {
    next = link.next_slot().take();
  }
}

/// Capacity of an arena successor: at least `GROWTH_FACTOR` times `current`,
/// doubled further until it holds `request`.
pub(crate) fn grown_capacity(
  current: usize,
  request: usize,
) -> Result<usize, PoolError> {
  let mut capacity = current
    .checked_mul(GROWTH_FACTOR)
    .ok_or(PoolError::CapacityOverflow)?;

  while capacity < request {
    capacity = capacity
      .checked_mul(GROWTH_FACTOR)
      .ok_or(PoolError::CapacityOverflow)?;
  }

  Ok(capacity)
}
