#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

//! A fixed-capacity object pool that stores its values densely in arena memory and hands out
//! stable handles to them.
//!
//! [`SparsePool`] keeps values in one contiguous run obtained from a
//! [`block_arena::BlockAllocator`]. A key table maps each [`Handle`] to the current position of
//! its value, so values can be compacted by swap-remove without invalidating handles to the
//! values that stay.
//!
//! Every key slot carries a generation that advances whenever its value is removed. Using a
//! handle after its value is gone is reported as [`Error::StaleHandle`], even if the slot has
//! since been reused.
//!
//! # Example
//!
//! ```
//! use std::mem::MaybeUninit;
//!
//! use block_arena::BlockAllocator;
//! use new_zealand::nz;
//! use sparse_pool::{Error, SparsePool};
//!
//! let mut buffer = [MaybeUninit::<u64>::uninit(); 64];
//! let allocator = BlockAllocator::from_uninit(&mut buffer).unwrap();
//!
//! let mut pool = SparsePool::builder()
//!     .capacity(nz!(4))
//!     .build_in(&allocator)
//!     .unwrap();
//!
//! let one = pool.add(1_u64).unwrap();
//! let two = pool.add(2_u64).unwrap();
//! let three = pool.add(3_u64).unwrap();
//!
//! // The last value moves into the hole, but its handle follows it.
//! pool.remove(one).unwrap();
//! assert_eq!(*pool.get(three).unwrap(), 3);
//! assert_eq!(*pool.get(two).unwrap(), 2);
//!
//! assert!(matches!(pool.get(one), Err(Error::StaleHandle { .. })));
//! ```
//!
//! # Thread safety
//!
//! A pool shares its arena with other views of it and is therefore neither [`Send`] nor
//! [`Sync`].

mod builder;
mod error;
mod handle;
mod pool;

pub use builder::*;
pub use error::*;
pub use handle::Handle;
pub(crate) use handle::KeySlot;
pub use pool::*;
