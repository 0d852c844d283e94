use std::cell::Cell;
use std::fmt;
use std::marker::PhantomData;
use std::ptr::NonNull;

use tracing::warn;

use crate::{Error, Result};

/// The state shared by every [`BlockAllocator`][crate::BlockAllocator] view of one arena.
///
/// The arena does not own the buffer it manages, it only borrows it for `'a`. Block `i` starts
/// at `base + i * block_size`.
///
/// # Markers
///
/// There is one marker per block. A marker of zero means the block is free. A marker of `k > 0`
/// at the start of a run means the run is `k` blocks long, with the following blocks counting
/// down `k - 1, k - 2, ..., 1`. Only the start marker is read as a run length; the others exist
/// so that the free-run scan sees every block of a run as occupied.
pub(crate) struct ArenaStorage<'a> {
    base: NonNull<u8>,
    block_size: usize,
    block_alignment: usize,
    markers: Box<[Cell<u32>]>,

    _buffer: PhantomData<&'a mut [u8]>,
}

impl<'a> ArenaStorage<'a> {
    /// # Panics
    ///
    /// Panics if `capacity` does not fit in the marker type.
    pub(crate) fn new(
        base: NonNull<u8>,
        block_size: usize,
        block_alignment: usize,
        capacity: usize,
    ) -> Self {
        assert!(
            u32::try_from(capacity).is_ok(),
            "block arena capacity {capacity} exceeds the maximum of {} blocks",
            u32::MAX
        );

        Self {
            base,
            block_size,
            block_alignment,
            markers: (0..capacity).map(|_| Cell::new(0)).collect(),
            _buffer: PhantomData,
        }
    }

    pub(crate) fn capacity(&self) -> usize {
        self.markers.len()
    }

    pub(crate) fn block_size(&self) -> usize {
        self.block_size
    }

    pub(crate) fn block_alignment(&self) -> usize {
        self.block_alignment
    }

    pub(crate) fn base_address(&self) -> usize {
        self.base.addr().get()
    }

    /// Size of the managed region in bytes.
    pub(crate) fn size_bytes(&self) -> usize {
        // Cannot overflow because the managed region was a valid slice.
        self.capacity().wrapping_mul(self.block_size)
    }

    pub(crate) fn used_blocks(&self) -> usize {
        self.markers.iter().filter(|marker| marker.get() != 0).count()
    }

    pub(crate) fn marker_snapshot(&self) -> Vec<u32> {
        self.markers.iter().map(Cell::get).collect()
    }

    /// Pointer to the first byte of block `index`.
    pub(crate) fn block_ptr(&self, index: usize) -> NonNull<u8> {
        assert!(
            index < self.capacity(),
            "block {index} out of bounds in arena of {} blocks",
            self.capacity()
        );

        // Cannot overflow because the offset is within the managed region, which is a valid slice.
        let offset = index.wrapping_mul(self.block_size);

        // SAFETY: The offset is within the buffer borrowed for 'a, as guaranteed by the
        // bounds check above.
        unsafe { self.base.add(offset) }
    }

    /// Finds the first index at which `count` contiguous blocks are all free.
    #[cfg_attr(test, mutants::skip)] // Mutating the run bookkeeping can loop without progress.
    pub(crate) fn find_contiguous_blocks_idx(&self, count: usize) -> Option<usize> {
        if count == 0 || count > self.capacity() {
            return None;
        }

        let mut run_start = 0;
        let mut run_length = 0_usize;

        for (index, marker) in self.markers.iter().enumerate() {
            if marker.get() != 0 {
                run_length = 0;
                continue;
            }

            if run_length == 0 {
                run_start = index;
            }

            // Cannot overflow because it is bounded by the number of markers.
            run_length = run_length.wrapping_add(1);

            if run_length == count {
                return Some(run_start);
            }
        }

        None
    }

    /// Reserves the first run of `count` free blocks and returns the index of its first block.
    pub(crate) fn reserve(&self, count: usize) -> Result<usize> {
        let Some(start) = self.find_contiguous_blocks_idx(count) else {
            let free_blocks = self.capacity().wrapping_sub(self.used_blocks());

            warn!(
                requested_blocks = count,
                free_blocks,
                capacity = self.capacity(),
                "block arena exhausted"
            );

            return Err(Error::Exhausted {
                requested_blocks: count,
                free_blocks,
                capacity: self.capacity(),
            });
        };

        let run = self
            .markers
            .get(start..start.wrapping_add(count))
            .expect("free run search only returns runs that fit inside the arena");

        for (marker, remaining) in run.iter().zip((1..=count).rev()) {
            marker.set(u32::try_from(remaining).expect("capacity is checked to fit in u32"));
        }

        Ok(start)
    }

    /// Releases the run of `count` blocks starting at block `start`.
    ///
    /// The run length recorded at `start` must equal `count`, otherwise nothing is released.
    pub(crate) fn release(&self, start: usize, count: usize) -> Result<()> {
        let end = start.checked_add(count).filter(|end| *end <= self.capacity());

        let Some(run) = end.and_then(|end| self.markers.get(start..end)) else {
            return Err(Error::OutOfBounds {
                address: self
                    .base_address()
                    .wrapping_add(start.wrapping_mul(self.block_size)),
                arena_start: self.base_address(),
                arena_end: self.base_address().wrapping_add(self.size_bytes()),
            });
        };

        // A preceding marker above 1 means the run continues through `start`.
        let previous = start
            .checked_sub(1)
            .and_then(|index| self.markers.get(index))
            .map_or(0, Cell::get);

        if previous > 1 {
            return Err(Error::NotRunStart { block_index: start });
        }

        let tracked_blocks = run.first().map_or(0, |marker| marker.get() as usize);

        if tracked_blocks != count {
            return Err(Error::SizeMismatch {
                tracked_blocks,
                calculated_blocks: count,
            });
        }

        for marker in run {
            marker.set(0);
        }

        Ok(())
    }
}

impl fmt::Debug for ArenaStorage<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArenaStorage")
            .field("base", &self.base)
            .field("block_size", &self.block_size)
            .field("block_alignment", &self.block_alignment)
            .field("capacity", &self.capacity())
            .field("used_blocks", &self.used_blocks())
            .finish()
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    fn storage_over(buffer: &mut [u64]) -> ArenaStorage<'_> {
        let capacity = buffer.len();
        ArenaStorage::new(
            NonNull::from(buffer).cast::<u8>(),
            size_of::<u64>(),
            align_of::<u64>(),
            capacity,
        )
    }

    #[test]
    fn reserve_writes_descending_countdown() {
        let mut buffer = [0_u64; 8];
        let storage = storage_over(&mut buffer);

        assert_eq!(storage.reserve(3), Ok(0));
        assert_eq!(storage.reserve(2), Ok(3));

        assert_eq!(storage.marker_snapshot(), vec![3, 2, 1, 2, 1, 0, 0, 0]);
        assert_eq!(storage.used_blocks(), 5);
    }

    #[test]
    fn find_skips_runs_that_are_too_short() {
        let mut buffer = [0_u64; 8];
        let storage = storage_over(&mut buffer);

        storage.reserve(2).unwrap();
        storage.reserve(1).unwrap();
        storage.reserve(2).unwrap();
        storage.release(0, 2).unwrap();

        // Blocks 0..2 are free but too short for a run of 3.
        assert_eq!(storage.find_contiguous_blocks_idx(3), Some(5));
        assert_eq!(storage.find_contiguous_blocks_idx(2), Some(0));
        assert_eq!(storage.find_contiguous_blocks_idx(4), None);
    }

    #[test]
    fn find_rejects_zero_and_oversized_runs() {
        let mut buffer = [0_u64; 4];
        let storage = storage_over(&mut buffer);

        assert_eq!(storage.find_contiguous_blocks_idx(0), None);
        assert_eq!(storage.find_contiguous_blocks_idx(5), None);
        assert_eq!(storage.find_contiguous_blocks_idx(4), Some(0));
    }

    #[test]
    fn reserve_when_full_reports_exhaustion_without_mutation() {
        let mut buffer = [0_u64; 4];
        let storage = storage_over(&mut buffer);

        storage.reserve(3).unwrap();
        let before = storage.marker_snapshot();

        assert_eq!(
            storage.reserve(2),
            Err(Error::Exhausted {
                requested_blocks: 2,
                free_blocks: 1,
                capacity: 4,
            })
        );
        assert_eq!(storage.marker_snapshot(), before);
    }

    #[test]
    fn release_with_wrong_length_is_rejected() {
        let mut buffer = [0_u64; 8];
        let storage = storage_over(&mut buffer);

        let start = storage.reserve(5).unwrap();

        assert_eq!(
            storage.release(start, 3),
            Err(Error::SizeMismatch {
                tracked_blocks: 5,
                calculated_blocks: 3,
            })
        );
        assert_eq!(storage.marker_snapshot(), vec![5, 4, 3, 2, 1, 0, 0, 0]);

        storage.release(start, 5).unwrap();
        assert_eq!(storage.used_blocks(), 0);
    }

    #[test]
    fn double_release_is_rejected() {
        let mut buffer = [0_u64; 4];
        let storage = storage_over(&mut buffer);

        let start = storage.reserve(2).unwrap();
        storage.release(start, 2).unwrap();

        assert_eq!(
            storage.release(start, 2),
            Err(Error::SizeMismatch {
                tracked_blocks: 0,
                calculated_blocks: 2,
            })
        );
    }

    #[test]
    fn release_inside_live_run_is_rejected() {
        let mut buffer = [0_u64; 8];
        let storage = storage_over(&mut buffer);

        let start = storage.reserve(3).unwrap();

        // Block 1 carries a countdown of 2, which a two-block release would otherwise accept.
        assert_eq!(
            storage.release(start + 1, 2),
            Err(Error::NotRunStart { block_index: 1 })
        );
        assert_eq!(storage.marker_snapshot(), vec![3, 2, 1, 0, 0, 0, 0, 0]);
        assert_eq!(storage.find_contiguous_blocks_idx(3), Some(3));
    }

    #[test]
    fn release_after_adjacent_run_is_accepted() {
        let mut buffer = [0_u64; 4];
        let storage = storage_over(&mut buffer);

        let first = storage.reserve(2).unwrap();
        let second = storage.reserve(2).unwrap();

        storage.release(second, 2).unwrap();
        assert_eq!(storage.marker_snapshot(), vec![2, 1, 0, 0]);

        storage.release(first, 2).unwrap();
        assert_eq!(storage.used_blocks(), 0);
    }

    #[test]
    fn release_past_the_end_is_out_of_bounds() {
        let mut buffer = [0_u64; 4];
        let storage = storage_over(&mut buffer);

        assert!(matches!(
            storage.release(3, 2),
            Err(Error::OutOfBounds { .. })
        ));
    }

    #[test]
    #[should_panic]
    fn block_ptr_out_of_bounds_panics() {
        let mut buffer = [0_u64; 4];
        let storage = storage_over(&mut buffer);

        _ = storage.block_ptr(4);
    }
}
