//! Address-ordered record of the live allocations inside one arena buffer.
//!
//! ```text
//!   offset 0                                                   capacity
//!   ┌──────────┬───────┬──────────────┬──────────┬─────────────────┐
//!   │  rec 0   │  gap  │    rec 1     │   gap    │    tail gap     │
//!   └──────────┴───────┴──────────────┴──────────┴─────────────────┘
//!   ▲ cursor starts here, jumps to the end of each record in turn
//! ```
//!
//! Free space is never stored: it is whatever lies between consecutive
//! records, so removing a record widens the gaps on both sides at once.

use std::collections::BTreeMap;

use crate::align_to;

/// One live allocation inside an arena buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocationRecord {
  pub offset: usize,
  pub len: usize,
}

impl AllocationRecord {
  pub fn end(&self) -> usize {
    self.offset + self.len
  }
}

#[derive(Debug, Default)]
pub(crate) struct Ledger {
  // start offset -> length
  records: BTreeMap<usize, usize>,
}

impl Ledger {
  pub(crate) fn new() -> Self {
    Self::default()
  }

  pub(crate) fn len(&self) -> usize {
    self.records.len()
  }

  /// First-fit search for `size` bytes starting on an `align` boundary.
  ///
  /// Walks the records in address order and returns the first gap (head,
  /// between two records, or tail) that can hold the request.
  pub(crate) fn find_gap(
    &self,
    size: usize,
    align: usize,
    capacity: usize,
  ) -> Option<usize> {
    let mut cursor = 0;

    for (&offset, &len) in &self.records {
      let start = align_to!(cursor, align);

      if start <= offset && offset - start >= size {
        return Some(start);
      }

      cursor = offset + len;
    }

    let start = align_to!(cursor, align);

    (start <= capacity && capacity - start >= size).then_some(start)
  }

  /// Records a new allocation. The region must not overlap any live record.
  pub(crate) fn insert(
    &mut self,
    offset: usize,
    len: usize,
  ) {
    debug_assert!(self.is_free(offset, len), "overlapping record at {offset}");

    self.records.insert(offset, len);
  }

  pub(crate) fn get(
    &self,
    offset: usize,
  ) -> Option<usize> {
    self.records.get(&offset).copied()
  }

  pub(crate) fn remove(
    &mut self,
    offset: usize,
  ) -> Option<usize> {
    self.records.remove(&offset)
  }

  pub(crate) fn records(&self) -> impl Iterator<Item = AllocationRecord> + '_ {
    self
      .records
      .iter()
      .map(|(&offset, &len)| AllocationRecord { offset, len })
  }

  fn is_free(
    &self,
    offset: usize,
    len: usize,
  ) -> bool {
    let before = self.records.range(..=offset).next_back();
    let after = self.records.range(offset..).next();

    let clear_before = before.is_none_or(|(&start, &size)| start + size <= offset);
    let clear_after = after.is_none_or(|(&start, _)| offset + len <= start);

    clear_before && clear_after
  }
}
