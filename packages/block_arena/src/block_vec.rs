use std::fmt;
use std::marker::PhantomData;
use std::ops::{Deref, DerefMut};
use std::ptr::{self, NonNull};
use std::slice;

use crate::{BlockAllocator, Result};

/// Smallest non-zero capacity a vector grows to.
const MIN_NON_ZERO_CAPACITY: usize = 4;

/// A contiguous growable vector whose storage is allocated from a [`BlockAllocator`].
///
/// Growth sets the capacity to `max(2 * capacity, 4)`. The new run is allocated before the old
/// one is released, so a vector that cannot grow is left exactly as it was and the caller
/// receives the allocation error instead of a panic.
///
/// # Examples
///
/// ```
/// use std::mem::MaybeUninit;
///
/// use block_arena::{BlockAllocator, BlockVec};
///
/// let mut buffer = [MaybeUninit::<u64>::uninit(); 32];
/// let allocator = BlockAllocator::from_uninit(&mut buffer).unwrap();
///
/// let mut values = BlockVec::new_in(allocator.clone());
/// values.try_push(1).unwrap();
/// values.try_push(2).unwrap();
///
/// assert_eq!(&*values, &[1, 2]);
/// assert_eq!(values.capacity(), 4);
/// assert_eq!(allocator.used_blocks(), 5);
/// ```
pub struct BlockVec<'a, T> {
    /// Dangling while `capacity` is zero.
    ptr: NonNull<T>,
    len: usize,
    capacity: usize,
    allocator: BlockAllocator<'a, T>,

    _owns: PhantomData<T>,
}

impl<'a, T> BlockVec<'a, T> {
    /// Creates an empty vector that has not yet allocated from the arena.
    #[must_use]
    pub fn new_in(allocator: BlockAllocator<'a, T>) -> Self {
        Self {
            ptr: NonNull::dangling(),
            len: 0,
            capacity: 0,
            allocator,
            _owns: PhantomData,
        }
    }

    /// Creates an empty vector with room for exactly `capacity` elements.
    ///
    /// # Errors
    ///
    /// Returns the arena's error if the storage cannot be allocated.
    pub fn with_capacity_in(capacity: usize, allocator: BlockAllocator<'a, T>) -> Result<Self> {
        let mut vec = Self::new_in(allocator);

        if capacity > 0 {
            vec.grow_to(capacity)?;
        }

        Ok(vec)
    }

    /// Number of elements in the vector.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the vector has no elements.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of elements the vector can hold without allocating from the arena again.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// The allocator that provides this vector's storage.
    #[must_use]
    pub fn allocator(&self) -> &BlockAllocator<'a, T> {
        &self.allocator
    }

    /// Ensures there is room for at least `additional` more elements.
    ///
    /// # Errors
    ///
    /// Returns the arena's error if larger storage cannot be allocated. The vector is unchanged.
    pub fn try_reserve(&mut self, additional: usize) -> Result<()> {
        let required = self.len.saturating_add(additional);

        if required <= self.capacity {
            return Ok(());
        }

        let grown = self
            .capacity
            .saturating_mul(2)
            .max(MIN_NON_ZERO_CAPACITY)
            .max(required);

        self.grow_to(grown)
    }

    /// Appends a value to the end of the vector.
    ///
    /// # Errors
    ///
    /// Returns the arena's error if the vector is full and cannot grow. The value is dropped
    /// and the vector is unchanged.
    pub fn try_push(&mut self, value: T) -> Result<()> {
        self.try_reserve(1)?;

        // SAFETY: try_reserve() guarantees capacity > len, so the slot at len is allocated
        // and not yet initialized.
        unsafe {
            self.ptr.add(self.len).write(value);
        }

        // Cannot overflow because len < capacity.
        self.len = self.len.wrapping_add(1);

        Ok(())
    }

    /// Inserts a value at `index`, shifting all later elements towards the end.
    ///
    /// # Errors
    ///
    /// Returns the arena's error if the vector is full and cannot grow. The value is dropped
    /// and the vector is unchanged.
    ///
    /// # Panics
    ///
    /// Panics if `index > len`.
    pub fn try_insert(&mut self, index: usize, value: T) -> Result<()> {
        assert!(
            index <= self.len,
            "insertion index {index} is out of bounds in vector of length {}",
            self.len
        );

        self.try_reserve(1)?;

        // SAFETY: index <= len < capacity, so both the source range [index, len) and the
        // destination range [index + 1, len + 1) are inside the allocation. ptr::copy
        // permits the overlap. The slot at index is then overwritten without dropping
        // because its previous value was moved one position up.
        unsafe {
            let slot = self.ptr.add(index);
            ptr::copy(slot.as_ptr(), slot.add(1).as_ptr(), self.len.wrapping_sub(index));
            slot.write(value);
        }

        // Cannot overflow because len < capacity.
        self.len = self.len.wrapping_add(1);

        Ok(())
    }

    /// Removes and returns the last element, if any.
    pub fn pop(&mut self) -> Option<T> {
        if self.len == 0 {
            return None;
        }

        // Cannot underflow because len > 0.
        self.len = self.len.wrapping_sub(1);

        // SAFETY: The slot at the old last index is initialized and is no longer considered
        // part of the vector, so reading it out transfers ownership to the caller.
        Some(unsafe { self.ptr.add(self.len).read() })
    }

    /// Removes the element at `index` and returns it, moving the last element into its place.
    ///
    /// # Panics
    ///
    /// Panics if `index >= len`.
    pub fn swap_remove(&mut self, index: usize) -> T {
        assert!(
            index < self.len,
            "swap_remove index {index} is out of bounds in vector of length {}",
            self.len
        );

        // Cannot underflow because len > index >= 0.
        let last = self.len.wrapping_sub(1);
        self.len = last;

        // SAFETY: Both index and last are < old len, so both slots are initialized. The value
        // at index is read out first, then the last value is moved into the vacated slot (a
        // no-op copy onto itself when index == last).
        unsafe {
            let removed = self.ptr.add(index).read();
            ptr::copy(self.ptr.add(last).as_ptr(), self.ptr.add(index).as_ptr(), 1);
            removed
        }
    }

    /// Shortens the vector to `len` elements, dropping the rest. Capacity is unchanged.
    pub fn truncate(&mut self, len: usize) {
        if len >= self.len {
            return;
        }

        let tail_len = self.len.wrapping_sub(len);
        self.len = len;

        // SAFETY: The tail [len, old len) is initialized and no longer part of the vector.
        // Updating len first means a panicking destructor cannot cause a double drop.
        unsafe {
            ptr::drop_in_place(ptr::slice_from_raw_parts_mut(
                self.ptr.add(len).as_ptr(),
                tail_len,
            ));
        }
    }

    /// Drops all elements. Capacity is unchanged.
    pub fn clear(&mut self) {
        self.truncate(0);
    }

    /// The elements as a slice.
    #[must_use]
    pub fn as_slice(&self) -> &[T] {
        // SAFETY: The first len elements are initialized and ptr is aligned and non-null
        // (dangling but well-aligned while empty, which is valid for an empty slice).
        unsafe { slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    /// The elements as a mutable slice.
    #[must_use]
    pub fn as_mut_slice(&mut self) -> &mut [T] {
        // SAFETY: As in as_slice(), and we hold an exclusive reference to the vector.
        unsafe { slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }

    fn grow_to(&mut self, new_capacity: usize) -> Result<()> {
        debug_assert!(new_capacity > self.capacity);

        let new_ptr = self.allocator.allocate(new_capacity)?;

        if self.capacity > 0 {
            // SAFETY: The old allocation holds len initialized elements, the new one has room
            // for at least that many, and two live runs of the same arena never overlap.
            unsafe {
                ptr::copy_nonoverlapping(self.ptr.as_ptr(), new_ptr.as_ptr(), self.len);
            }

            // SAFETY: The old run was allocated by this allocator with this capacity and its
            // elements were moved out above, so nothing refers to it anymore.
            unsafe { self.allocator.deallocate(self.ptr, self.capacity) }
                .expect("a run owned by a BlockVec always matches the arena bookkeeping");
        }

        self.ptr = new_ptr;
        self.capacity = new_capacity;

        Ok(())
    }
}

impl<T> Deref for BlockVec<'_, T> {
    type Target = [T];

    fn deref(&self) -> &[T] {
        self.as_slice()
    }
}

impl<T> DerefMut for BlockVec<'_, T> {
    fn deref_mut(&mut self) -> &mut [T] {
        self.as_mut_slice()
    }
}

impl<'v, T> IntoIterator for &'v BlockVec<'_, T> {
    type Item = &'v T;
    type IntoIter = slice::Iter<'v, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.as_slice().iter()
    }
}

impl<'v, T> IntoIterator for &'v mut BlockVec<'_, T> {
    type Item = &'v mut T;
    type IntoIter = slice::IterMut<'v, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.as_mut_slice().iter_mut()
    }
}

impl<T: fmt::Debug> fmt::Debug for BlockVec<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.as_slice()).finish()
    }
}

impl<T> Drop for BlockVec<'_, T> {
    fn drop(&mut self) {
        self.clear();

        if self.capacity > 0 {
            // SAFETY: The run was allocated by this allocator with this capacity and all
            // elements were dropped by clear() above.
            let result = unsafe { self.allocator.deallocate(self.ptr, self.capacity) };

            debug_assert!(
                result.is_ok(),
                "a run owned by a BlockVec always matches the arena bookkeeping: {result:?}"
            );
        }
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

    use static_assertions::assert_not_impl_any;

    use super::*;
    use crate::Error;

    assert_not_impl_any!(BlockVec<'static, u64>: Send, Sync);

    #[test]
    fn push_grows_by_doubling() {
        let mut buffer = [MaybeUninit::<u64>::uninit(); 64];
        let allocator = BlockAllocator::from_uninit(&mut buffer).unwrap();
        let mut values = BlockVec::new_in(allocator);

        let mut capacities = Vec::new();
        for value in 0..9 {
            values.try_push(value).unwrap();
            capacities.push(values.capacity());
        }

        assert_eq!(capacities, vec![4, 4, 4, 4, 8, 8, 8, 8, 16]);
        assert_eq!(&*values, &[0, 1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn failed_growth_leaves_vector_intact() {
        let mut buffer = [MaybeUninit::<u64>::uninit(); 7];
        let allocator = BlockAllocator::from_uninit(&mut buffer).unwrap();
        let mut values = BlockVec::with_capacity_in(2, allocator.clone()).unwrap();

        values.try_push(1).unwrap();
        values.try_push(2).unwrap();
        let markers = allocator.markers();

        // Growing to 4 needs 5 contiguous free blocks while the current 3 are still held.
        assert!(matches!(
            values.try_push(3),
            Err(Error::Exhausted {
                requested_blocks: 5,
                ..
            })
        ));

        assert_eq!(&*values, &[1, 2]);
        assert_eq!(values.capacity(), 2);
        assert_eq!(allocator.markers(), markers);
    }

    #[test]
    fn insert_shifts_later_elements() {
        let mut buffer = [MaybeUninit::<u64>::uninit(); 32];
        let allocator = BlockAllocator::from_uninit(&mut buffer).unwrap();
        let mut values = BlockVec::new_in(allocator);

        values.try_push(10).unwrap();
        values.try_push(30).unwrap();
        values.try_insert(1, 20).unwrap();
        values.try_insert(0, 5).unwrap();
        values.try_insert(4, 40).unwrap();

        assert_eq!(&*values, &[5, 10, 20, 30, 40]);
    }

    #[test]
    #[should_panic]
    fn insert_past_end_panics() {
        let mut buffer = [MaybeUninit::<u64>::uninit(); 32];
        let allocator = BlockAllocator::from_uninit(&mut buffer).unwrap();
        let mut values = BlockVec::new_in(allocator);

        _ = values.try_insert(1, 1);
    }

    #[test]
    fn swap_remove_moves_last_into_hole() {
        let mut buffer = [MaybeUninit::<u64>::uninit(); 32];
        let allocator = BlockAllocator::from_uninit(&mut buffer).unwrap();
        let mut values = BlockVec::new_in(allocator);

        for value in 1..=4 {
            values.try_push(value).unwrap();
        }

        assert_eq!(values.swap_remove(1), 2);
        assert_eq!(&*values, &[1, 4, 3]);

        assert_eq!(values.swap_remove(2), 3);
        assert_eq!(&*values, &[1, 4]);
    }

    #[test]
    fn pop_returns_in_reverse_order() {
        let mut buffer = [MaybeUninit::<u64>::uninit(); 32];
        let allocator = BlockAllocator::from_uninit(&mut buffer).unwrap();
        let mut values = BlockVec::new_in(allocator);

        values.try_push(1).unwrap();
        values.try_push(2).unwrap();

        assert_eq!(values.pop(), Some(2));
        assert_eq!(values.pop(), Some(1));
        assert_eq!(values.pop(), None);
    }

    #[test]
    fn drop_releases_storage_and_drops_elements() {
        struct Counted(Rc<Cell<usize>>);

        impl Drop for Counted {
            fn drop(&mut self) {
                self.0.set(self.0.get() + 1);
            }
        }

        let drops = Rc::new(Cell::new(0));
        let mut buffer = [const { MaybeUninit::<Counted>::uninit() }; 16];
        let allocator = BlockAllocator::from_uninit(&mut buffer).unwrap();

        {
            let mut values = BlockVec::new_in(allocator.clone());
            for _ in 0..3 {
                values.try_push(Counted(Rc::clone(&drops))).unwrap();
            }

            values.truncate(1);
            assert_eq!(drops.get(), 2);
            assert!(allocator.used_blocks() > 0);
        }

        assert_eq!(drops.get(), 3);
        assert_eq!(allocator.used_blocks(), 0);
    }

    #[test]
    fn empty_vector_does_not_allocate() {
        let mut buffer = [MaybeUninit::<u64>::uninit(); 4];
        let allocator = BlockAllocator::from_uninit(&mut buffer).unwrap();

        let values = BlockVec::new_in(allocator.clone());

        assert!(values.is_empty());
        assert_eq!(values.as_slice(), &[] as &[u64]);
        assert_eq!(allocator.used_blocks(), 0);
    }
}
