use thiserror::Error;

/// Why a deallocation was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum InvalidFreeReason {
  /// The address was never handed out by this pool chain, or was already freed
  /// from an arena.
  #[error("address not owned by this pool")]
  UnknownAddress,
  /// The address is live but was allocated with a different byte length.
  #[error("allocation was {recorded} bytes")]
  SizeMismatch { recorded: usize },
  /// The address falls inside a slot array but not on a slot boundary.
  #[error("address is not on a slot boundary")]
  Misaligned,
  /// The slot is already free.
  #[error("slot is already free")]
  DoubleFree,
}

/// Errors reported by arenas, slot pools and their adapters.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PoolError {
  #[error("failed to acquire {bytes} bytes of backing memory")]
  ResourceAcquisition { bytes: usize },

  #[error("pool capacity overflowed usize")]
  CapacityOverflow,

  #[error("pool capacity must be greater than zero")]
  ZeroCapacity,

  #[error("alignment {align} is not supported by the backing buffer")]
  UnsupportedAlignment { align: usize },

  #[error("request of {requested} bytes does not fit a {slot_size}-byte slot")]
  OversizedRequest { requested: usize, slot_size: usize },

  #[error("invalid free of {addr:#x} ({size} bytes): {reason}")]
  InvalidFree {
    addr: usize,
    size: usize,
    reason: InvalidFreeReason,
  },

  #[error("no slot {index} in pool {depth} of the chain")]
  UnknownHandle { depth: usize, index: usize },
}

impl PoolError {
  pub(crate) fn invalid_free(
    addr: usize,
    size: usize,
    reason: InvalidFreeReason,
  ) -> Self {
    tracing::warn!(addr, size, %reason, "rejected deallocation");
    Self::InvalidFree { addr, size, reason }
  }

  pub(crate) fn unknown_handle(
    depth: usize,
    index: usize,
  ) -> Self {
    tracing::warn!(depth, index, "rejected slot release");
    Self::UnknownHandle { depth, index }
  }

  /// Returns the refusal reason when this is an invalid free.
  pub fn invalid_free_reason(&self) -> Option<InvalidFreeReason> {
    match self {
      Self::InvalidFree { reason, .. } => Some(*reason),
      _ => None,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_invalid_free_message() {
    let err = PoolError::invalid_free(0x40, 8, InvalidFreeReason::SizeMismatch { recorded: 16 });

    assert_eq!(
      err.to_string(),
      "invalid free of 0x40 (8 bytes): allocation was 16 bytes"
    );
    assert_eq!(
      err.invalid_free_reason(),
      Some(InvalidFreeReason::SizeMismatch { recorded: 16 })
    );
    assert_eq!(PoolError::ZeroCapacity.invalid_free_reason(), None);
  }

  #[test]
  fn test_reason_messages() {
    assert_eq!(
      InvalidFreeReason::UnknownAddress.to_string(),
      "address not owned by this pool"
    );
    assert_eq!(
      InvalidFreeReason::Misaligned.to_string(),
      "address is not on a slot boundary"
    );
    assert_eq!(InvalidFreeReason::DoubleFree.to_string(), "slot is already free");
    assert_eq!(
      PoolError::unknown_handle(2, 7).to_string(),
      "no slot 7 in pool 2 of the chain"
    );
  }
}
