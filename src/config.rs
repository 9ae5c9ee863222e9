//! Arena construction parameters.
//!
//! The initial capacity can be set through the `RPOOL_ARENA_CAPACITY`
//! environment variable, as a byte count with an optional `k`, `m` or `g`
//! suffix (`4096`, `64k`, `2M`). Anything else falls back to
//! [`DEFAULT_ARENA_CAPACITY`].

use std::env;

/// Environment variable read by [`ArenaConfig::from_env`].
pub const CAPACITY_ENV: &str = "RPOOL_ARENA_CAPACITY";

/// Initial arena capacity when none is configured.
pub const DEFAULT_ARENA_CAPACITY: usize = 8 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArenaConfig {
  /// Byte capacity of the first buffer in the chain.
  pub initial_capacity: usize,
}

impl Default for ArenaConfig {
  fn default() -> Self {
    Self {
      initial_capacity: DEFAULT_ARENA_CAPACITY,
    }
  }
}

impl ArenaConfig {
  pub fn new(initial_capacity: usize) -> Self {
    Self { initial_capacity }
  }

  /// Reads the capacity from `RPOOL_ARENA_CAPACITY`.
  #[must_use]
  pub fn from_env() -> Self {
    let capacity = env::var(CAPACITY_ENV)
      .ok()
      .and_then(|raw| parse_capacity(&raw));

    match capacity {
      Some(initial_capacity) => Self { initial_capacity },
      None => Self::default(),
    }
  }
}

/// Parses a non-zero byte count such as `512`, `64k` or `2M`.
pub fn parse_capacity(raw: &str) -> Option<usize> {
  let raw = raw.trim().to_ascii_lowercase();

  let (digits, shift) = match raw.strip_suffix(['k', 'm', 'g']) {
    Some(digits) if raw.ends_with('k') => (digits, 10),
    Some(digits) if raw.ends_with('m') => (digits, 20),
    Some(digits) => (digits, 30),
    None => (raw.as_str(), 0),
  };

  let value: usize = digits.trim().parse().ok()?;

  value
    .checked_mul(1 << shift)
    .filter(|&capacity| capacity > 0)
}
