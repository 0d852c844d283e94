use std::any::type_name;
use std::fmt;
use std::marker::PhantomData;
use std::mem::MaybeUninit;
use std::ptr::NonNull;
use std::rc::Rc;

use tracing::trace;

use crate::{ArenaStorage, Error, Result};

/// Calculates how many blocks of `block_size` bytes an allocation of `count` elements of `T`
/// occupies.
///
/// The request is padded by `align_of::<T>() - 1` bytes before being rounded up to whole
/// blocks, so even a single element that exactly fills a block occupies two blocks unless
/// `T` has an alignment of 1. Use this to size buffers for a known allocation pattern.
///
/// # Examples
///
/// ```
/// use block_arena::blocks_needed;
///
/// // 8 elements of u64 in 8-byte blocks: 64 bytes + 7 bytes of padding = 9 blocks.
/// assert_eq!(blocks_needed::<u64>(8, 8), 9);
///
/// // 5 elements of u64 in 32-byte blocks: 40 bytes + 7 bytes of padding = 2 blocks.
/// assert_eq!(blocks_needed::<u64>(5, 32), 2);
/// ```
///
/// # Panics
///
/// Panics if `block_size` is zero.
#[must_use]
pub fn blocks_needed<T>(count: usize, block_size: usize) -> usize {
    assert!(block_size > 0, "block size must be non-zero");

    // Saturating arithmetic turns absurd requests into a block count no arena can satisfy.
    count
        .saturating_mul(size_of::<T>())
        .saturating_add(align_of::<T>().wrapping_sub(1))
        .div_ceil(block_size)
}

/// A typed view over a fixed-capacity arena of equally sized blocks.
///
/// The arena is carved out of a caller-supplied buffer that the allocator borrows for `'a`,
/// which guarantees that the buffer outlives every view and every value placed into it.
/// Allocations reserve the first run of contiguous free blocks that is long enough (first-fit).
///
/// Cloning an allocator is cheap and yields another view of the same arena. A view can be
/// [rebound][Self::rebind] to a different element type, which reinterprets the same bytes at
/// the same block granularity instead of creating a second arena. Two views compare equal if
/// and only if they share an arena, regardless of element type.
///
/// The allocator hands out raw uninitialized storage. Use [`BlockVec`][crate::BlockVec] or
/// [`ArenaBox`][crate::ArenaBox] for owned values placed into the arena.
///
/// # Examples
///
/// ```
/// use std::mem::MaybeUninit;
///
/// use block_arena::BlockAllocator;
///
/// let mut buffer = [MaybeUninit::<u64>::uninit(); 16];
/// let allocator = BlockAllocator::from_uninit(&mut buffer).unwrap();
///
/// let ptr = allocator.allocate(4).unwrap();
/// assert_eq!(allocator.used_blocks(), 5);
///
/// // SAFETY: The storage was allocated above with the same count and is not used afterwards.
/// unsafe { allocator.deallocate(ptr, 4) }.unwrap();
/// assert_eq!(allocator.used_blocks(), 0);
/// ```
///
/// # Thread safety
///
/// The arena state is shared without synchronization, so allocators are neither [`Send`]
/// nor [`Sync`]. Confine an arena and everything allocated from it to one thread.
pub struct BlockAllocator<'a, T> {
    storage: Rc<ArenaStorage<'a>>,

    _element: PhantomData<fn() -> T>,
}

impl<'a, T> BlockAllocator<'a, T> {
    /// Creates an arena over `buffer` with one block per `T` that fits into the buffer.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Misaligned`] if the buffer does not start at an address aligned for `T`
    /// and [`Error::ZeroCapacity`] if the buffer is smaller than one `T`.
    ///
    /// # Panics
    ///
    /// Panics if `T` is a zero-sized type.
    pub fn new(buffer: &'a mut [u8]) -> Result<Self> {
        assert_sized::<T>();

        let base = NonNull::from(&mut *buffer).cast::<u8>();

        if !base.cast::<T>().is_aligned() {
            return Err(Error::Misaligned {
                address: base.addr().get(),
                required_alignment: align_of::<T>(),
            });
        }

        let capacity = buffer.len() / size_of::<T>();

        if capacity == 0 {
            return Err(Error::ZeroCapacity {
                buffer_size: buffer.len(),
                block_size: size_of::<T>(),
            });
        }

        Ok(Self::from_parts(base, capacity))
    }

    /// Creates an arena with one block per element of `buffer`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ZeroCapacity`] if the buffer is empty.
    ///
    /// # Panics
    ///
    /// Panics if `T` is a zero-sized type.
    pub fn from_uninit(buffer: &'a mut [MaybeUninit<T>]) -> Result<Self> {
        assert_sized::<T>();

        if buffer.is_empty() {
            return Err(Error::ZeroCapacity {
                buffer_size: 0,
                block_size: size_of::<T>(),
            });
        }

        let capacity = buffer.len();
        let base = NonNull::from(buffer).cast::<u8>();

        Ok(Self::from_parts(base, capacity))
    }

    fn from_parts(base: NonNull<u8>, capacity: usize) -> Self {
        let storage = ArenaStorage::new(base, size_of::<T>(), align_of::<T>(), capacity);

        trace!(
            element = type_name::<T>(),
            capacity,
            block_size = size_of::<T>(),
            "created block arena"
        );

        Self {
            storage: Rc::new(storage),
            _element: PhantomData,
        }
    }

    /// Returns a view of the same arena that allocates elements of type `U`.
    ///
    /// Capacity remains expressed in the arena's original blocks.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnsupportedAlignment`] if `U` needs stricter alignment than the arena
    /// guarantees at block boundaries.
    ///
    /// # Panics
    ///
    /// Panics if `U` is a zero-sized type.
    pub fn rebind<U>(&self) -> Result<BlockAllocator<'a, U>> {
        assert_sized::<U>();

        if align_of::<U>() > self.storage.block_alignment() {
            return Err(Error::UnsupportedAlignment {
                required_alignment: align_of::<U>(),
                block_alignment: self.storage.block_alignment(),
            });
        }

        Ok(BlockAllocator {
            storage: Rc::clone(&self.storage),
            _element: PhantomData,
        })
    }

    /// Reserves uninitialized storage for `count` contiguous elements of `T`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ZeroCount`] if `count` is zero and [`Error::Exhausted`] if no run of
    /// free blocks is long enough. A failed allocation reserves nothing.
    pub fn allocate(&self, count: usize) -> Result<NonNull<T>> {
        if count == 0 {
            return Err(Error::ZeroCount);
        }

        let blocks = self.blocks_for(count);
        let start = self.storage.reserve(blocks)?;

        trace!(
            element = type_name::<T>(),
            count, start, blocks, "allocated block run"
        );

        Ok(self.storage.block_ptr(start).cast::<T>())
    }

    /// Releases storage previously obtained from [`allocate()`][Self::allocate].
    ///
    /// The pointer and count are validated against the arena's bookkeeping before anything is
    /// released. A rejected call leaves the arena unchanged.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ZeroCount`] if `count` is zero, [`Error::OutOfBounds`],
    /// [`Error::NotAtBlockBoundary`] or [`Error::NotRunStart`] if `ptr` was not handed out by
    /// this arena, and
    /// [`Error::SizeMismatch`] if `count` does not match the allocated run (including when the
    /// run was already released).
    ///
    /// # Safety
    ///
    /// Upon success the storage may be handed out again, so the caller must ensure that no
    /// live value or reference still uses it. Any values in it are not dropped.
    pub unsafe fn deallocate(&self, ptr: NonNull<T>, count: usize) -> Result<()> {
        if count == 0 {
            return Err(Error::ZeroCount);
        }

        let address = ptr.addr().get();
        let arena_start = self.storage.base_address();
        let arena_end = arena_start.wrapping_add(self.storage.size_bytes());

        if address < arena_start || address >= arena_end {
            return Err(Error::OutOfBounds {
                address,
                arena_start,
                arena_end,
            });
        }

        let offset = address.wrapping_sub(arena_start);
        let block_size = self.storage.block_size();

        if offset % block_size != 0 {
            return Err(Error::NotAtBlockBoundary { offset, block_size });
        }

        let start = offset / block_size;
        let blocks = self.blocks_for(count);

        self.storage.release(start, blocks)?;

        trace!(
            element = type_name::<T>(),
            count, start, blocks, "released block run"
        );

        Ok(())
    }

    /// Number of blocks an allocation of `count` elements of `T` occupies in this arena.
    #[must_use]
    pub fn blocks_for(&self, count: usize) -> usize {
        blocks_needed::<T>(count, self.storage.block_size())
    }

    /// Total number of blocks in the arena.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.storage.capacity()
    }

    /// Size of one block in bytes.
    #[must_use]
    pub fn block_size(&self) -> usize {
        self.storage.block_size()
    }

    /// Number of blocks that belong to a live allocation.
    #[must_use]
    pub fn used_blocks(&self) -> usize {
        self.storage.used_blocks()
    }

    /// Number of blocks not reserved by any allocation. They are not necessarily contiguous.
    #[must_use]
    pub fn free_blocks(&self) -> usize {
        self.capacity().wrapping_sub(self.used_blocks())
    }

    /// A snapshot of the per-block markers.
    ///
    /// A zero marks a free block. A run of `k` blocks is marked `k, k - 1, ..., 1`.
    #[must_use]
    pub fn markers(&self) -> Vec<u32> {
        self.storage.marker_snapshot()
    }

    /// Whether `other` is a view of the same arena, whatever its element type.
    #[must_use]
    pub fn same_arena<U>(&self, other: &BlockAllocator<'a, U>) -> bool {
        Rc::ptr_eq(&self.storage, &other.storage)
    }
}

fn assert_sized<T>() {
    assert!(
        size_of::<T>() > 0,
        "block allocator element type {} must not be zero-sized",
        type_name::<T>()
    );
}

impl<T> Clone for BlockAllocator<'_, T> {
    fn clone(&self) -> Self {
        Self {
            storage: Rc::clone(&self.storage),
            _element: PhantomData,
        }
    }
}

impl<'a, T, U> PartialEq<BlockAllocator<'a, U>> for BlockAllocator<'a, T> {
    fn eq(&self, other: &BlockAllocator<'a, U>) -> bool {
        self.same_arena(other)
    }
}

impl<T> Eq for BlockAllocator<'_, T> {}

impl<T> fmt::Debug for BlockAllocator<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct(type_name::<Self>())
            .field("storage", &self.storage)
            .finish()
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
#[allow(
    clippy::undocumented_unsafe_blocks,
    clippy::indexing_slicing,
    reason = "test code doesn't need the same safety rigor as production code"
)]
mod tests {
    use static_assertions::assert_not_impl_any;

    use super::*;

    assert_not_impl_any!(BlockAllocator<'static, u64>: Send, Sync);

    #[repr(C, align(32))]
    #[derive(Clone, Copy)]
    struct Block32([u64; 4]);

    #[repr(C, align(16))]
    #[derive(Clone, Copy)]
    struct Block16([u8; 16]);

    fn expected_markers(capacity: usize, runs: &[(usize, usize)]) -> Vec<u32> {
        let mut markers = vec![0; capacity];

        for &(start, length) in runs {
            for (offset, remaining) in (1..=length).rev().enumerate() {
                markers[start + offset] = u32::try_from(remaining).unwrap();
            }
        }

        markers
    }

    #[test]
    fn blocks_needed_pads_by_alignment() {
        assert_eq!(blocks_needed::<u8>(3, 1), 3);
        assert_eq!(blocks_needed::<u64>(1, 8), 2);
        assert_eq!(blocks_needed::<u64>(8, 8), 9);
        assert_eq!(blocks_needed::<u64>(5, 32), 2);
        assert_eq!(blocks_needed::<u64>(usize::MAX, 8), usize::MAX.div_ceil(8));
    }

    #[test]
    fn allocate_returns_block_addresses() {
        let mut buffer = [MaybeUninit::<u64>::uninit(); 16];
        let base = buffer.as_ptr().addr();
        let allocator = BlockAllocator::from_uninit(&mut buffer).unwrap();

        let first = allocator.allocate(1).unwrap();
        let second = allocator.allocate(1).unwrap();

        assert_eq!(first.addr().get(), base);
        assert_eq!(second.addr().get(), base + 2 * size_of::<u64>());
        assert_eq!(allocator.markers(), expected_markers(16, &[(0, 2), (2, 2)]));
    }

    #[test]
    fn allocated_storage_is_writable() {
        let mut buffer = [MaybeUninit::<u64>::uninit(); 16];
        let allocator = BlockAllocator::from_uninit(&mut buffer).unwrap();

        let ptr = allocator.allocate(4).unwrap();

        unsafe {
            for index in 0..4 {
                ptr.add(index).write(index as u64 * 10);
            }

            assert_eq!(ptr.add(3).read(), 30);
            allocator.deallocate(ptr, 4).unwrap();
        }
    }

    #[test]
    fn allocate_zero_is_rejected() {
        let mut buffer = [MaybeUninit::<u64>::uninit(); 4];
        let allocator = BlockAllocator::from_uninit(&mut buffer).unwrap();

        assert_eq!(allocator.allocate(0), Err(Error::ZeroCount));
        assert_eq!(allocator.used_blocks(), 0);
    }

    #[test]
    fn allocate_beyond_capacity_is_exhausted() {
        let mut buffer = [MaybeUninit::<u64>::uninit(); 4];
        let allocator = BlockAllocator::from_uninit(&mut buffer).unwrap();

        assert_eq!(
            allocator.allocate(4),
            Err(Error::Exhausted {
                requested_blocks: 5,
                free_blocks: 4,
                capacity: 4,
            })
        );
        assert_eq!(allocator.markers(), vec![0; 4]);
    }

    #[test]
    fn deallocate_mismatched_count_keeps_markers() {
        let mut buffer = [MaybeUninit::<u64>::uninit(); 16];
        let allocator = BlockAllocator::from_uninit(&mut buffer).unwrap();

        let ptr = allocator.allocate(5).unwrap();
        let before = allocator.markers();

        let result = unsafe { allocator.deallocate(ptr, 3) };

        assert_eq!(
            result,
            Err(Error::SizeMismatch {
                tracked_blocks: 6,
                calculated_blocks: 4,
            })
        );
        assert_eq!(allocator.markers(), before);

        unsafe { allocator.deallocate(ptr, 5) }.unwrap();
        assert_eq!(allocator.markers(), vec![0; 16]);
    }

    #[test]
    fn deallocate_zero_count_is_rejected() {
        let mut buffer = [MaybeUninit::<u64>::uninit(); 4];
        let allocator = BlockAllocator::from_uninit(&mut buffer).unwrap();

        let ptr = allocator.allocate(1).unwrap();

        assert_eq!(
            unsafe { allocator.deallocate(ptr, 0) },
            Err(Error::ZeroCount)
        );
        assert_eq!(allocator.used_blocks(), 2);
    }

    #[test]
    fn deallocate_foreign_pointer_is_out_of_bounds() {
        let mut buffer = [MaybeUninit::<u64>::uninit(); 4];
        let allocator = BlockAllocator::from_uninit(&mut buffer).unwrap();
        let mut foreign = 0_u64;

        let result = unsafe { allocator.deallocate(NonNull::from(&mut foreign), 1) };

        assert!(matches!(result, Err(Error::OutOfBounds { .. })));
    }

    #[test]
    fn deallocate_one_past_the_end_is_out_of_bounds() {
        let mut buffer = [MaybeUninit::<u64>::uninit(); 4];
        let allocator = BlockAllocator::from_uninit(&mut buffer).unwrap();

        let first = allocator.allocate(1).unwrap();
        let past_end = unsafe { first.add(4) };

        let result = unsafe { allocator.deallocate(past_end, 1) };

        assert!(matches!(result, Err(Error::OutOfBounds { .. })));
    }

    #[test]
    fn deallocate_interior_pointer_is_rejected() {
        let mut buffer = [MaybeUninit::<Block16>::uninit(); 8];
        let bytes = BlockAllocator::from_uninit(&mut buffer)
            .unwrap()
            .rebind::<u8>()
            .unwrap();

        let ptr = bytes.allocate(4).unwrap();
        let interior = unsafe { ptr.add(1) };

        assert_eq!(
            unsafe { bytes.deallocate(interior, 3) },
            Err(Error::NotAtBlockBoundary {
                offset: 1,
                block_size: 16,
            })
        );
    }

    #[test]
    fn deallocate_inside_live_run_keeps_it_allocated() {
        let mut buffer = [MaybeUninit::<u64>::uninit(); 8];
        let allocator = BlockAllocator::from_uninit(&mut buffer).unwrap();

        let ptr = allocator.allocate(2).unwrap();
        assert_eq!(allocator.markers(), expected_markers(8, &[(0, 3)]));

        // One u64 needs two blocks, matching the countdown at block 1.
        let interior = unsafe { ptr.add(1) };
        assert_eq!(
            unsafe { allocator.deallocate(interior, 1) },
            Err(Error::NotRunStart { block_index: 1 })
        );
        assert_eq!(allocator.markers(), expected_markers(8, &[(0, 3)]));

        let next = allocator.allocate(1).unwrap();
        assert_eq!(next, unsafe { ptr.add(3) });

        unsafe {
            allocator.deallocate(next, 1).unwrap();
            allocator.deallocate(ptr, 2).unwrap();
        }
        assert_eq!(allocator.used_blocks(), 0);
    }

    #[test]
    fn double_deallocate_is_rejected() {
        let mut buffer = [MaybeUninit::<u64>::uninit(); 8];
        let allocator = BlockAllocator::from_uninit(&mut buffer).unwrap();

        let ptr = allocator.allocate(2).unwrap();
        unsafe { allocator.deallocate(ptr, 2) }.unwrap();

        assert_eq!(
            unsafe { allocator.deallocate(ptr, 2) },
            Err(Error::SizeMismatch {
                tracked_blocks: 0,
                calculated_blocks: 3,
            })
        );
    }

    #[test]
    fn misaligned_buffer_is_rejected() {
        let mut buffer = [MaybeUninit::<u64>::uninit(); 4];
        let allocator = BlockAllocator::from_uninit(&mut buffer).unwrap();
        let bytes = allocator.rebind::<u8>().unwrap();

        // Any byte offset that is not a multiple of 8 from an 8-aligned base is misaligned.
        let ptr = bytes.allocate(32).unwrap();
        let slice = unsafe { std::slice::from_raw_parts_mut(ptr.as_ptr().add(1), 16) };

        assert!(matches!(
            BlockAllocator::<u64>::new(slice),
            Err(Error::Misaligned {
                required_alignment: 8,
                ..
            })
        ));
    }

    #[test]
    fn new_over_aligned_bytes_uses_whole_elements() {
        let mut buffer = [MaybeUninit::<Block32>::uninit(); 2];
        let bytes = BlockAllocator::from_uninit(&mut buffer)
            .unwrap()
            .rebind::<u8>()
            .unwrap();
        let ptr = bytes.allocate(63).unwrap();
        let slice = unsafe { std::slice::from_raw_parts_mut(ptr.as_ptr(), 63) };

        let allocator = BlockAllocator::<u64>::new(slice).unwrap();

        assert_eq!(allocator.capacity(), 7);
        assert_eq!(allocator.block_size(), 8);
    }

    #[test]
    fn new_over_tiny_buffer_has_zero_capacity() {
        let mut buffer = [0_u8; 4];

        let result = BlockAllocator::<u8>::new(&mut buffer[..0]);

        assert_eq!(
            result,
            Err(Error::ZeroCapacity {
                buffer_size: 0,
                block_size: 1,
            })
        );
    }

    #[test]
    fn from_empty_uninit_has_zero_capacity() {
        let mut buffer: [MaybeUninit<u64>; 0] = [];

        assert!(matches!(
            BlockAllocator::from_uninit(&mut buffer),
            Err(Error::ZeroCapacity { .. })
        ));
    }

    #[test]
    #[should_panic]
    fn zero_sized_element_panics() {
        let mut buffer = [0_u8; 4];
        _ = BlockAllocator::<()>::new(&mut buffer);
    }

    #[test]
    fn rebound_views_share_markers() {
        let mut buffer = [MaybeUninit::<Block32>::uninit(); 8];
        let allocator = BlockAllocator::from_uninit(&mut buffer).unwrap();
        let words = allocator.rebind::<u64>().unwrap();

        // 5 * 8 bytes + 7 bytes of padding fits in two 32-byte blocks.
        let ptr = words.allocate(5).unwrap();

        assert_eq!(allocator.markers(), expected_markers(8, &[(0, 2)]));
        assert_eq!(allocator.capacity(), words.capacity());
        assert!(allocator == words);

        unsafe { words.deallocate(ptr, 5) }.unwrap();
        assert_eq!(allocator.used_blocks(), 0);
    }

    #[test]
    fn rebind_to_stricter_alignment_is_rejected() {
        let mut buffer = [MaybeUninit::<Block16>::uninit(); 8];
        let allocator = BlockAllocator::from_uninit(&mut buffer).unwrap();

        assert!(matches!(
            allocator.rebind::<Block32>(),
            Err(Error::UnsupportedAlignment {
                required_alignment: 32,
                block_alignment: 16,
            })
        ));
    }

    #[test]
    fn distinct_arenas_are_not_equal() {
        let mut first = [MaybeUninit::<u64>::uninit(); 4];
        let mut second = [MaybeUninit::<u64>::uninit(); 4];

        let a = BlockAllocator::from_uninit(&mut first).unwrap();
        let b = BlockAllocator::from_uninit(&mut second).unwrap();

        assert!(a == a.clone());
        assert!(a != b);
        assert!(!a.same_arena(&b));
    }

    #[test]
    fn free_blocks_tracks_allocations() {
        let mut buffer = [MaybeUninit::<u64>::uninit(); 10];
        let allocator = BlockAllocator::from_uninit(&mut buffer).unwrap();

        assert_eq!(allocator.free_blocks(), 10);

        let ptr = allocator.allocate(2).unwrap();
        assert_eq!(allocator.free_blocks(), 7);

        unsafe { allocator.deallocate(ptr, 2) }.unwrap();
        assert_eq!(allocator.free_blocks(), 10);
    }
}
