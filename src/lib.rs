//! # rpool - Region-Based Memory Pools
//!
//! This crate provides two pool allocators that carve memory out of buffers
//! reserved up front, and grow by chaining new buffers when they run out:
//!
//! - [`Arena`]: serves requests of **any byte length** from one contiguous
//!   buffer, first fit by address.
//! - [`SlotPool`]: serves requests for **one element type** from an array of
//!   equal-size slots, tracked by a bitmap.
//!
//! ## Overview
//!
//! ```text
//!   Arena (capacity 1024):
//!
//!   ┌──────────────────────────────────────────────────────────────────────┐
//!   │                          BACKING BUFFER                              │
//!   │                                                                      │
//!   │   ┌────────┬────────┬──────────────┬────────┬───────────────────┐    │
//!   │   │  100 B │  gap   │    200 B     │  50 B  │     tail gap      │    │
//!   │   └────────┴────────┴──────────────┴────────┴───────────────────┘    │
//!   │   ▲                                                                  │
//!   │   └── ledger: (0, 100) (150, 200) (350, 50)                          │
//!   │                                                                      │
//!   └──────────────────────────────────────────────────────────────────────┘
//!
//!   A request that fits no gap goes to the successor:
//!
//!   ┌──────────┐  owns  ┌──────────────────┐  owns  ┌──────────────────────┐
//!   │ 1024 B   ├───────►│ 2048 B           ├───────►│ 4096 B (or larger)   │
//!   └──────────┘        └──────────────────┘        └──────────────────────┘
//! ```
//!
//! ## Crate Structure
//!
//! ```text
//!   rpool
//!   ├── adapter    - Allocator<T> handle and the RawPool trait
//!   ├── align      - Alignment macro (align_to!)
//!   ├── arena      - Variable-size Arena
//!   ├── chain      - Successor ownership and growth policy (internal)
//!   ├── config     - ArenaConfig, environment loading
//!   ├── error      - PoolError
//!   ├── ledger     - Address-ordered allocation records (internal)
//!   ├── raw        - malloc-backed buffers (internal)
//!   └── slot       - Fixed-slot SlotPool
//! ```
//!
//! ## Quick Start
//!
//! ```rust
//! use rpool::Arena;
//!
//! let arena = Arena::new(1024)?;
//! let alloc = arena.allocator::<u64>();
//!
//! let ptr = alloc.new_object(42)?;
//! assert_eq!(unsafe { *ptr.as_ptr() }, 42);
//!
//! unsafe { alloc.delete_object(ptr)? };
//! # Ok::<(), rpool::PoolError>(())
//! ```
//!
//! ## Errors
//!
//! Running out of room in one pool is never an error: the request moves down
//! the chain. Errors are reserved for failing to obtain memory from the C
//! runtime and for invalid frees (unknown address, wrong length, double free),
//! which are returned as [`PoolError::InvalidFree`] rather than ignored.
//!
//! ## Limitations
//!
//! - **Single-threaded only**: pools use `RefCell` and are not `Sync`
//! - **No compaction**: freed space is reused only where it lies
//! - **No shrinking**: chained buffers live as long as the head pool
//! - **Alignment**: at most the alignment of `max_align_t`
//!
//! ## Safety
//!
//! Pools hand out raw pointers. Reading or writing through them, and
//! constructing or destroying values in place, requires `unsafe` blocks.

pub mod adapter;
pub mod align;
mod arena;
mod chain;
pub mod config;
mod error;
mod ledger;
mod raw;
mod slot;

pub use adapter::{Allocator, RawPool};
pub use arena::{Arena, Location};
pub use chain::GROWTH_FACTOR;
pub use config::ArenaConfig;
pub use error::{InvalidFreeReason, PoolError};
pub use ledger::AllocationRecord;
pub use raw::MAX_ALIGN;
pub use slot::{SlotHandle, SlotPool};
