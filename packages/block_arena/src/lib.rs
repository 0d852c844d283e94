#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

//! A fixed-capacity block allocator that sub-allocates typed storage from a buffer supplied by
//! the caller, without ever calling the global allocator for the storage itself.
//!
//! The buffer (typically a memory-mapped region, possibly shared between processes) is divided
//! into `N` equally sized blocks. Requests reserve the first run of contiguous free blocks that
//! is long enough to hold them. All bookkeeping lives in a per-block marker array, which makes it
//! possible to validate every deallocation against what was actually allocated.
//!
//! The crate provides:
//!
//! - [`BlockAllocator`] - a typed, cheaply cloneable view of one arena that can be rebound to
//!   other element types over the same bytes.
//! - [`BlockVec`] - a growable vector with its storage in the arena.
//! - [`ArenaBox`] - a single value with its storage in the arena.
//!
//! # Example
//!
//! ```
//! use std::mem::MaybeUninit;
//!
//! use block_arena::{ArenaBox, BlockAllocator, BlockVec};
//!
//! #[repr(C, align(16))]
//! #[derive(Clone, Copy)]
//! struct Block([u8; 16]);
//!
//! let mut buffer = [MaybeUninit::<Block>::uninit(); 64];
//! let blocks = BlockAllocator::from_uninit(&mut buffer).unwrap();
//!
//! // Different element types share the same arena.
//! let mut samples = BlockVec::new_in(blocks.rebind::<i64>().unwrap());
//! samples.try_push(7).unwrap();
//!
//! let label = ArenaBox::new_in(0xFEED_u32, &blocks.rebind().unwrap()).unwrap();
//!
//! assert_eq!(samples.as_slice(), &[7]);
//! assert_eq!(*label, 0xFEED);
//! assert!(blocks.used_blocks() > 0);
//! ```
//!
//! # Thread safety
//!
//! The arena performs no synchronization. None of the types in this crate are [`Send`] or
//! [`Sync`]; confine each arena to the thread that created it.

mod allocator;
mod arena_box;
mod block_vec;
mod error;
mod storage;

pub use allocator::*;
pub use arena_box::*;
pub use block_vec::*;
pub use error::*;
pub(crate) use storage::*;
