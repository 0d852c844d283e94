use std::fmt;
use std::marker::PhantomData;
use std::mem::ManuallyDrop;
use std::ops::{Deref, DerefMut};
use std::ptr::{self, NonNull};

use crate::{BlockAllocator, Result};

/// A single value placed into storage allocated from a [`BlockAllocator`].
///
/// Dropping the box drops the value and then releases its blocks back to the arena.
///
/// # Examples
///
/// ```
/// use std::mem::MaybeUninit;
///
/// use block_arena::{ArenaBox, BlockAllocator};
///
/// let mut buffer = [MaybeUninit::<u64>::uninit(); 4];
/// let allocator = BlockAllocator::from_uninit(&mut buffer).unwrap();
///
/// let mut boxed = ArenaBox::new_in(41_u64, &allocator).unwrap();
/// *boxed += 1;
/// assert_eq!(*boxed, 42);
///
/// drop(boxed);
/// assert_eq!(allocator.used_blocks(), 0);
/// ```
pub struct ArenaBox<'a, T> {
    ptr: NonNull<T>,
    allocator: BlockAllocator<'a, T>,

    _owns: PhantomData<T>,
}

impl<'a, T> ArenaBox<'a, T> {
    /// Moves `value` into storage allocated from `allocator`.
    ///
    /// # Errors
    ///
    /// Returns the arena's error if no storage is available. The value is dropped.
    pub fn new_in(value: T, allocator: &BlockAllocator<'a, T>) -> Result<Self> {
        let ptr = allocator.allocate(1)?;

        // SAFETY: The storage was just allocated for one T and is not yet initialized.
        unsafe {
            ptr.write(value);
        }

        Ok(Self {
            ptr,
            allocator: allocator.clone(),
            _owns: PhantomData,
        })
    }

    /// Moves the value out of the arena and releases its storage.
    #[must_use]
    pub fn into_inner(self) -> T {
        // SAFETY: The value is initialized. Ownership is transferred to the caller, which is
        // why the destructor is skipped below; the storage is released without dropping.
        let value = unsafe { self.ptr.read() };

        let this = ManuallyDrop::new(self);
        this.release();

        // SAFETY: The allocator handle is read out of the ManuallyDrop exactly once so its
        // reference count is decremented.
        drop(unsafe { ptr::read(&this.allocator) });

        value
    }

    fn release(&self) {
        // SAFETY: The storage was allocated with a count of 1 by this allocator and the value
        // has already been dropped or moved out by the caller.
        let result = unsafe { self.allocator.deallocate(self.ptr, 1) };

        debug_assert!(
            result.is_ok(),
            "storage owned by an ArenaBox always matches the arena bookkeeping: {result:?}"
        );
    }
}

impl<T> Deref for ArenaBox<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: The value is initialized for as long as the box exists.
        unsafe { self.ptr.as_ref() }
    }
}

impl<T> DerefMut for ArenaBox<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: The value is initialized and we hold an exclusive reference to the box.
        unsafe { self.ptr.as_mut() }
    }
}

impl<T: fmt::Debug> fmt::Debug for ArenaBox<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&**self, f)
    }
}

impl<T> Drop for ArenaBox<'_, T> {
    fn drop(&mut self) {
        // SAFETY: The value is initialized and is never used again after this.
        unsafe {
            ptr::drop_in_place(self.ptr.as_ptr());
        }

        self.release();
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::cell::Cell;
    use std::mem::MaybeUninit;
    use std::rc::Rc;

    use static_assertions::assert_not_impl_any;

    use super::*;
    use crate::Error;

    assert_not_impl_any!(ArenaBox<'static, u64>: Send, Sync);

    #[test]
    fn boxes_occupy_padded_runs() {
        let mut buffer = [MaybeUninit::<u64>::uninit(); 6];
        let allocator = BlockAllocator::from_uninit(&mut buffer).unwrap();

        let first = ArenaBox::new_in(1_u64, &allocator).unwrap();
        let second = ArenaBox::new_in(2_u64, &allocator).unwrap();
        let third = ArenaBox::new_in(3_u64, &allocator).unwrap();

        assert_eq!(allocator.markers(), vec![2, 1, 2, 1, 2, 1]);
        assert!(matches!(
            ArenaBox::new_in(4_u64, &allocator),
            Err(Error::Exhausted { .. })
        ));

        drop(second);
        assert_eq!(allocator.markers(), vec![2, 1, 0, 0, 2, 1]);
        assert_eq!(*first + *third, 4);
    }

    #[test]
    fn drop_runs_value_destructor() {
        struct Flag(Rc<Cell<bool>>);

        impl Drop for Flag {
            fn drop(&mut self) {
                self.0.set(true);
            }
        }

        let dropped = Rc::new(Cell::new(false));
        let mut buffer = [const { MaybeUninit::<Flag>::uninit() }; 2];
        let allocator = BlockAllocator::from_uninit(&mut buffer).unwrap();

        let boxed = ArenaBox::new_in(Flag(Rc::clone(&dropped)), &allocator).unwrap();
        assert!(!dropped.get());

        drop(boxed);
        assert!(dropped.get());
        assert_eq!(allocator.used_blocks(), 0);
    }

    #[test]
    fn into_inner_releases_without_dropping() {
        let mut buffer = [const { MaybeUninit::<String>::uninit() }; 4];
        let allocator = BlockAllocator::from_uninit(&mut buffer).unwrap();

        let boxed = ArenaBox::new_in("kept".to_string(), &allocator).unwrap();
        let value = boxed.into_inner();

        assert_eq!(value, "kept");
        assert_eq!(allocator.used_blocks(), 0);
    }
}
