use std::cell::Cell;
use std::marker::PhantomData;
use std::num::NonZero;

use block_arena::BlockAllocator;
use new_zealand::nz;

use crate::{Result, SparsePool};

const DEFAULT_CAPACITY: NonZero<usize> = nz!(512);

/// Builder for creating an instance of [`SparsePool`].
///
/// The pool's dense store is allocated from an arena when the pool is built, so the arena is
/// supplied to the final [`build_in()`][Self::build_in] call rather than as a setting.
///
/// # Examples
///
/// ```
/// use std::mem::MaybeUninit;
///
/// use block_arena::BlockAllocator;
/// use new_zealand::nz;
/// use sparse_pool::SparsePool;
///
/// let mut buffer = [MaybeUninit::<u64>::uninit(); 32];
/// let allocator = BlockAllocator::from_uninit(&mut buffer).unwrap();
///
/// let pool = SparsePool::<u32>::builder()
///     .capacity(nz!(8))
///     .build_in(&allocator)
///     .unwrap();
///
/// assert_eq!(pool.capacity(), 8);
/// ```
#[derive(Debug)]
#[must_use]
pub struct SparsePoolBuilder<T> {
    capacity: NonZero<usize>,

    _element: PhantomData<fn() -> T>,

    // Prevents Sync while allowing Send - builders are thread-mobile but not thread-safe
    _not_sync: PhantomData<Cell<()>>,
}

impl<T> SparsePoolBuilder<T> {
    pub(crate) fn new() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            _element: PhantomData,
            _not_sync: PhantomData,
        }
    }

    /// Sets the maximum number of values the pool can hold. Defaults to 512.
    pub fn capacity(mut self, capacity: NonZero<usize>) -> Self {
        self.capacity = capacity;
        self
    }

    /// Builds the pool, reserving its dense store from the arena that `allocator` views.
    ///
    /// The allocator may have any element type. The pool rebinds it to its own entry type.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Arena`][crate::Error::Arena] if the arena cannot hold the dense store
    /// or is not aligned for the pool's entry type.
    pub fn build_in<'a, U>(self, allocator: &BlockAllocator<'a, U>) -> Result<SparsePool<'a, T>> {
        SparsePool::new_in(self.capacity.get(), allocator)
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::fmt::Debug;
    use std::mem::MaybeUninit;

    use static_assertions::{assert_impl_all, assert_not_impl_any};

    use super::*;
    use crate::Error;

    assert_impl_all!(SparsePoolBuilder<u64>: Send, Debug);
    assert_not_impl_any!(SparsePoolBuilder<u64>: Sync);

    #[test]
    fn builder_defaults_to_512() {
        let builder = SparsePoolBuilder::<u64>::new();

        assert_eq!(builder.capacity, DEFAULT_CAPACITY);
    }

    #[test]
    fn capacity_sets_capacity() {
        let builder = SparsePoolBuilder::<u64>::new().capacity(nz!(3));

        assert_eq!(builder.capacity.get(), 3);
    }

    #[test]
    fn build_in_reserves_dense_store() {
        let mut buffer = [MaybeUninit::<u64>::uninit(); 32];
        let allocator = BlockAllocator::from_uninit(&mut buffer).unwrap();

        let pool = SparsePoolBuilder::<u32>::new()
            .capacity(nz!(3))
            .build_in(&allocator)
            .unwrap();

        // Three 16-byte entries plus 7 bytes of alignment padding in 8-byte blocks.
        assert_eq!(pool.capacity(), 3);
        assert_eq!(allocator.used_blocks(), 7);
    }

    #[test]
    fn build_in_too_small_arena_fails() {
        let mut buffer = [MaybeUninit::<u64>::uninit(); 4];
        let allocator = BlockAllocator::from_uninit(&mut buffer).unwrap();

        let result = SparsePoolBuilder::<u32>::new()
            .capacity(nz!(3))
            .build_in(&allocator);

        assert!(matches!(
            result,
            Err(Error::Arena(block_arena::Error::Exhausted { .. }))
        ));
        assert_eq!(allocator.used_blocks(), 0);
    }
}
