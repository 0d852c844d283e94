use std::alloc::Layout;
use std::any::type_name;
use std::fmt;
use std::iter;

use block_arena::{BlockAllocator, BlockVec};
use tracing::{trace, warn};

use crate::{Error, Handle, KeySlot, Result, SparsePoolBuilder};

/// One element of a pool's dense store: a value and the key slot that refers to it.
///
/// This type is public so that callers sizing an arena for a pool can name it, for example
/// with [`block_arena::blocks_needed`]. Its contents are only accessible through the pool.
#[derive(Debug)]
pub struct PoolEntry<T> {
    value: T,

    // Back-reference used to repair the key table after a swap-remove.
    key_index: usize,
}

/// A fixed-capacity collection of values addressed through stable [`Handle`]s.
///
/// Values are kept densely packed in arena storage. Removal moves the last value into the
/// vacated position, so it takes constant time but leaves iteration order arbitrary. Handles
/// resolve through a key table that is updated whenever a value moves, so a handle keeps
/// referring to the same value until that value is removed.
///
/// The full capacity of the dense store is reserved from the arena when the pool is built.
/// Adding and removing values afterwards never allocates.
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
/// let mut buffer = [MaybeUninit::<u64>::uninit(); 64];
/// let allocator = BlockAllocator::from_uninit(&mut buffer).unwrap();
///
/// let mut pool = SparsePool::builder()
///     .capacity(nz!(4))
///     .build_in(&allocator)
///     .unwrap();
///
/// let first = pool.add("first").unwrap();
/// let second = pool.add("second").unwrap();
///
/// assert_eq!(pool.remove(first).unwrap(), "first");
/// assert_eq!(pool.get(second).unwrap(), &"second");
/// assert!(pool.get(first).is_err());
/// ```
pub struct SparsePool<'a, T> {
    entries: BlockVec<'a, PoolEntry<T>>,
    keys: Box<[KeySlot]>,
}

impl<'a, T> SparsePool<'a, T> {
    /// Starts building a new pool.
    pub fn builder() -> SparsePoolBuilder<T> {
        SparsePoolBuilder::new()
    }

    pub(crate) fn new_in<U>(capacity: usize, allocator: &BlockAllocator<'a, U>) -> Result<Self> {
        let allocator = allocator.rebind::<PoolEntry<T>>()?;
        let entries = BlockVec::with_capacity_in(capacity, allocator)?;

        trace!(element = type_name::<T>(), capacity, "created sparse pool");

        Ok(Self {
            entries,
            keys: iter::repeat_with(KeySlot::default).take(capacity).collect(),
        })
    }

    /// The memory layout of the dense store of a pool with the given capacity.
    ///
    /// An arena that backs the pool must additionally leave room for the alignment padding
    /// that [`block_arena::blocks_needed`] accounts for.
    ///
    /// # Panics
    ///
    /// Panics if the layout size overflows `isize`.
    #[must_use]
    pub fn storage_layout(capacity: usize) -> Layout {
        Layout::array::<PoolEntry<T>>(capacity)
            .expect("sparse pool capacity must not overflow the address space")
    }

    /// Adds a value to the pool and returns a handle to it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Exhausted`] if the pool is full. The value is dropped.
    pub fn add(&mut self, value: T) -> Result<Handle> {
        let Some(key_index) = self.keys.iter().position(KeySlot::is_available) else {
            warn!(
                element = type_name::<T>(),
                capacity = self.capacity(),
                "sparse pool is full"
            );

            return Err(Error::Exhausted {
                capacity: self.capacity(),
            });
        };

        let dense_index = self.entries.len();

        // The dense store was reserved for the full capacity and at least one key is free,
        // so this never has to grow.
        self.entries.try_push(PoolEntry { value, key_index })?;

        let slot = self
            .keys
            .get_mut(key_index)
            .expect("position() returned an index inside the key table");
        slot.dense_index = Some(dense_index);

        Ok(Handle::new(key_index, slot.generation))
    }

    /// Resolves a handle to the value it refers to.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StaleHandle`] if the value has been removed and [`Error::OutOfBounds`]
    /// if the handle did not come from a pool of this capacity.
    pub fn get(&self, handle: Handle) -> Result<&T> {
        let dense_index = self.resolve(handle)?;

        Ok(&self.entry(dense_index).value)
    }

    /// Resolves a handle to an exclusive reference to the value it refers to.
    ///
    /// # Errors
    ///
    /// As for [`get()`][Self::get].
    pub fn get_mut(&mut self, handle: Handle) -> Result<&mut T> {
        let dense_index = self.resolve(handle)?;

        Ok(&mut self
            .entries
            .get_mut(dense_index)
            .expect("key table only points at live dense entries")
            .value)
    }

    /// Removes the value a handle refers to and returns it.
    ///
    /// The handle, and every copy of it, is stale afterwards.
    ///
    /// # Errors
    ///
    /// As for [`get()`][Self::get]. A failed removal leaves the pool unchanged.
    pub fn remove(&mut self, handle: Handle) -> Result<T> {
        let dense_index = self.resolve(handle)?;

        let removed = self.entries.swap_remove(dense_index);

        // Unless the removed entry was the last one, the former last entry now lives at
        // dense_index and its key has to follow it.
        if let Some(moved) = self.entries.get(dense_index) {
            self.keys
                .get_mut(moved.key_index)
                .expect("dense entries only refer to keys inside the key table")
                .dense_index = Some(dense_index);
        }

        self.keys
            .get_mut(handle.key_index())
            .expect("resolve() verified the key index")
            .vacate();

        Ok(removed.value)
    }

    /// Whether the handle refers to a value that is still in the pool.
    #[must_use]
    pub fn contains(&self, handle: Handle) -> bool {
        self.resolve(handle).is_ok()
    }

    /// Number of values in the pool.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the pool holds no values.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Maximum number of values the pool can hold.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.keys.len()
    }

    /// Iterates over handles and values in dense order, which is unrelated to insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (Handle, &T)> {
        self.entries
            .iter()
            .map(|entry| (self.handle_for(entry.key_index), &entry.value))
    }

    /// Iterates over handles and exclusive references to values in dense order.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (Handle, &mut T)> {
        let keys = &self.keys;

        self.entries.iter_mut().map(move |entry| {
            let generation = keys
                .get(entry.key_index)
                .expect("dense entries only refer to keys inside the key table")
                .generation;

            (Handle::new(entry.key_index, generation), &mut entry.value)
        })
    }

    /// Iterates over the values in dense order.
    pub fn values(&self) -> impl Iterator<Item = &T> {
        self.entries.iter().map(|entry| &entry.value)
    }

    /// Iterates over the handles of all values in dense order.
    pub fn handles(&self) -> impl Iterator<Item = Handle> {
        self.entries
            .iter()
            .map(|entry| self.handle_for(entry.key_index))
    }

    fn resolve(&self, handle: Handle) -> Result<usize> {
        let key_index = handle.key_index();

        let slot = self.keys.get(key_index).ok_or(Error::OutOfBounds {
            key_index,
            capacity: self.capacity(),
        })?;

        match slot.dense_index {
            Some(dense_index) if slot.generation == handle.generation() => Ok(dense_index),
            _ => Err(Error::StaleHandle { key_index }),
        }
    }

    fn entry(&self, dense_index: usize) -> &PoolEntry<T> {
        self.entries
            .get(dense_index)
            .expect("key table only points at live dense entries")
    }

    fn handle_for(&self, key_index: usize) -> Handle {
        let generation = self
            .keys
            .get(key_index)
            .expect("dense entries only refer to keys inside the key table")
            .generation;

        Handle::new(key_index, generation)
    }

    #[cfg(test)]
    pub(crate) fn integrity_check(&self) {
        for (dense_index, entry) in self.entries.iter().enumerate() {
            assert_eq!(
                self.keys[entry.key_index].dense_index,
                Some(dense_index),
                "key {} does not point back at dense entry {dense_index}",
                entry.key_index
            );
        }

        let occupied = self
            .keys
            .iter()
            .filter(|slot| slot.dense_index.is_some())
            .count();
        assert_eq!(occupied, self.entries.len());
    }
}

impl<T: fmt::Debug> fmt::Debug for SparsePool<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct(type_name::<Self>())
            .field("len", &self.len())
            .field("capacity", &self.capacity())
            .field("entries", &self.entries)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
#[allow(
    clippy::indexing_slicing,
    reason = "test code doesn't need the same safety rigor as production code"
)]
mod tests {
    use std::cell::Cell;
    use std::mem::MaybeUninit;
    use std::rc::Rc;

    use new_zealand::nz;
    use static_assertions::assert_not_impl_any;

    use super::*;

    assert_not_impl_any!(SparsePool<'static, u64>: Send, Sync);

    #[test]
    fn add_then_get() {
        let mut buffer = [MaybeUninit::<u64>::uninit(); 64];
        let allocator = BlockAllocator::from_uninit(&mut buffer).unwrap();
        let mut pool = SparsePool::builder()
            .capacity(nz!(8))
            .build_in(&allocator)
            .unwrap();

        let a = pool.add(10_u64).unwrap();
        let b = pool.add(20_u64).unwrap();

        assert_eq!(*pool.get(a).unwrap(), 10);
        assert_eq!(*pool.get(b).unwrap(), 20);
        assert_eq!(pool.len(), 2);
        assert!(!pool.is_empty());
        pool.integrity_check();
    }

    #[test]
    fn exhausted_generation_retires_key() {
        let mut buffer = [MaybeUninit::<u64>::uninit(); 16];
        let allocator = BlockAllocator::from_uninit(&mut buffer).unwrap();
        let mut pool = SparsePool::builder()
            .capacity(nz!(1))
            .build_in(&allocator)
            .unwrap();

        pool.keys[0].generation = u32::MAX - 1;

        let last = pool.add(1_u64).unwrap();
        assert_eq!(pool.remove(last).unwrap(), 1);

        assert_eq!(pool.add(2_u64), Err(Error::Exhausted { capacity: 1 }));
        assert_eq!(pool.get(last), Err(Error::StaleHandle { key_index: 0 }));
        assert!(pool.is_empty());
        pool.integrity_check();
    }

    #[test]
    fn dense_store_is_reserved_up_front() {
        let mut buffer = [MaybeUninit::<u64>::uninit(); 64];
        let allocator = BlockAllocator::from_uninit(&mut buffer).unwrap();
        let mut pool = SparsePool::builder()
            .capacity(nz!(4))
            .build_in(&allocator)
            .unwrap();

        let reserved = allocator.markers();

        for value in 0..4_u64 {
            pool.add(value).unwrap();
        }

        assert_eq!(allocator.markers(), reserved);
    }

    #[test]
    fn remove_moves_last_entry_and_keeps_handles() {
        let mut buffer = [MaybeUninit::<u64>::uninit(); 64];
        let allocator = BlockAllocator::from_uninit(&mut buffer).unwrap();
        let mut pool = SparsePool::builder()
            .capacity(nz!(4))
            .build_in(&allocator)
            .unwrap();

        let handles = (1..=4_u64)
            .map(|value| pool.add(value).unwrap())
            .collect::<Vec<_>>();

        assert_eq!(pool.remove(handles[1]).unwrap(), 2);
        pool.integrity_check();

        assert_eq!(pool.values().copied().collect::<Vec<_>>(), vec![1, 4, 3]);
        assert_eq!(*pool.get(handles[0]).unwrap(), 1);
        assert_eq!(*pool.get(handles[2]).unwrap(), 3);
        assert_eq!(*pool.get(handles[3]).unwrap(), 4);
        assert_eq!(pool.len(), 3);
    }

    #[test]
    fn removing_last_entry_does_not_move_anything() {
        let mut buffer = [MaybeUninit::<u64>::uninit(); 64];
        let allocator = BlockAllocator::from_uninit(&mut buffer).unwrap();
        let mut pool = SparsePool::builder()
            .capacity(nz!(4))
            .build_in(&allocator)
            .unwrap();

        let a = pool.add(1_u64).unwrap();
        let b = pool.add(2_u64).unwrap();

        assert_eq!(pool.remove(b).unwrap(), 2);
        pool.integrity_check();
        assert_eq!(*pool.get(a).unwrap(), 1);
    }

    #[test]
    fn removed_handle_is_stale() {
        let mut buffer = [MaybeUninit::<u64>::uninit(); 64];
        let allocator = BlockAllocator::from_uninit(&mut buffer).unwrap();
        let mut pool = SparsePool::builder()
            .capacity(nz!(4))
            .build_in(&allocator)
            .unwrap();

        let handle = pool.add(1_u64).unwrap();
        pool.remove(handle).unwrap();

        assert!(!pool.contains(handle));
        assert_eq!(pool.get(handle), Err(Error::StaleHandle { key_index: 0 }));
        assert_eq!(pool.remove(handle), Err(Error::StaleHandle { key_index: 0 }));
        assert!(pool.is_empty());
    }

    #[test]
    fn reused_key_slot_rejects_old_handle() {
        let mut buffer = [MaybeUninit::<u64>::uninit(); 64];
        let allocator = BlockAllocator::from_uninit(&mut buffer).unwrap();
        let mut pool = SparsePool::builder()
            .capacity(nz!(1))
            .build_in(&allocator)
            .unwrap();

        let old = pool.add(1_u64).unwrap();
        pool.remove(old).unwrap();
        let new = pool.add(2_u64).unwrap();

        assert_ne!(old, new);
        assert!(pool.get(old).is_err());
        assert_eq!(*pool.get(new).unwrap(), 2);
    }

    #[test]
    fn full_pool_is_exhausted() {
        let mut buffer = [MaybeUninit::<u64>::uninit(); 64];
        let allocator = BlockAllocator::from_uninit(&mut buffer).unwrap();
        let mut pool = SparsePool::builder()
            .capacity(nz!(2))
            .build_in(&allocator)
            .unwrap();

        pool.add(1_u64).unwrap();
        pool.add(2_u64).unwrap();

        assert_eq!(pool.add(3), Err(Error::Exhausted { capacity: 2 }));
        assert_eq!(pool.len(), 2);
        pool.integrity_check();
    }

    #[test]
    fn handle_from_larger_pool_is_out_of_bounds() {
        let mut buffer = [MaybeUninit::<u64>::uninit(); 64];
        let allocator = BlockAllocator::from_uninit(&mut buffer).unwrap();

        let mut large = SparsePool::builder()
            .capacity(nz!(4))
            .build_in(&allocator)
            .unwrap();
        let small = SparsePool::<u64>::builder()
            .capacity(nz!(1))
            .build_in(&allocator)
            .unwrap();

        large.add(1_u64).unwrap();
        let foreign = large.add(2_u64).unwrap();

        assert_eq!(
            small.get(foreign),
            Err(Error::OutOfBounds {
                key_index: 1,
                capacity: 1,
            })
        );
    }

    #[test]
    fn get_mut_modifies_in_place() {
        let mut buffer = [MaybeUninit::<u64>::uninit(); 64];
        let allocator = BlockAllocator::from_uninit(&mut buffer).unwrap();
        let mut pool = SparsePool::builder()
            .capacity(nz!(4))
            .build_in(&allocator)
            .unwrap();

        let handle = pool.add(1_u64).unwrap();
        *pool.get_mut(handle).unwrap() += 41;

        assert_eq!(*pool.get(handle).unwrap(), 42);
    }

    #[test]
    fn iter_pairs_handles_with_values() {
        let mut buffer = [MaybeUninit::<u64>::uninit(); 64];
        let allocator = BlockAllocator::from_uninit(&mut buffer).unwrap();
        let mut pool = SparsePool::builder()
            .capacity(nz!(4))
            .build_in(&allocator)
            .unwrap();

        let a = pool.add(1_u64).unwrap();
        let b = pool.add(2_u64).unwrap();
        let c = pool.add(3_u64).unwrap();
        pool.remove(a).unwrap();

        for (handle, value) in pool.iter_mut() {
            *value *= 10;
            assert!(handle == b || handle == c);
        }

        for (handle, value) in pool.iter() {
            assert_eq!(pool.get(handle).unwrap(), value);
        }

        assert_eq!(pool.handles().collect::<Vec<_>>(), vec![c, b]);
        assert_eq!(pool.values().copied().collect::<Vec<_>>(), vec![30, 20]);
    }

    #[test]
    fn dropping_pool_drops_values_and_releases_storage() {
        struct Counted(Rc<Cell<usize>>);

        impl Drop for Counted {
            fn drop(&mut self) {
                self.0.set(self.0.get() + 1);
            }
        }

        let drops = Rc::new(Cell::new(0));
        let mut buffer = [MaybeUninit::<u64>::uninit(); 64];
        let allocator = BlockAllocator::from_uninit(&mut buffer).unwrap();

        {
            let mut pool = SparsePool::builder()
                .capacity(nz!(4))
                .build_in(&allocator)
                .unwrap();

            let first = pool.add(Counted(Rc::clone(&drops))).unwrap();
            pool.add(Counted(Rc::clone(&drops))).unwrap();

            drop(pool.remove(first).unwrap());
            assert_eq!(drops.get(), 1);
        }

        assert_eq!(drops.get(), 2);
        assert_eq!(allocator.used_blocks(), 0);
    }

    #[test]
    fn storage_layout_covers_dense_store() {
        let layout = SparsePool::<u32>::storage_layout(10);

        assert_eq!(layout.size(), 10 * size_of::<PoolEntry<u32>>());
        assert_eq!(layout.align(), align_of::<PoolEntry<u32>>());
    }

    #[test]
    fn entry_type_too_strictly_aligned_for_arena_is_rejected() {
        let mut buffer = [MaybeUninit::<u32>::uninit(); 64];
        let allocator = BlockAllocator::from_uninit(&mut buffer).unwrap();

        let result = SparsePool::<u64>::builder()
            .capacity(nz!(4))
            .build_in(&allocator);

        assert!(matches!(
            result,
            Err(Error::Arena(block_arena::Error::UnsupportedAlignment { .. }))
        ));
    }
}
