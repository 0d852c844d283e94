//! Property tests comparing the arena's marker array against a simple free-block model.

use std::mem::MaybeUninit;
use std::ptr::NonNull;

use block_arena::{BlockAllocator, Error, blocks_needed};
use proptest::prelude::*;

const CAPACITY: usize = 48;

#[derive(Clone, Debug)]
enum Step {
    Allocate(usize),
    Deallocate(usize),
}

fn step() -> impl Strategy<Value = Step> {
    prop_oneof![
        (1_usize..12).prop_map(Step::Allocate),
        (0_usize..16).prop_map(Step::Deallocate),
    ]
}

/// First-fit over a plain occupancy bitmap.
#[derive(Debug)]
struct Model {
    occupied: Vec<bool>,
    live: Vec<(usize, usize)>,
}

impl Model {
    fn new() -> Self {
        Self {
            occupied: vec![false; CAPACITY],
            live: Vec::new(),
        }
    }

    fn allocate(&mut self, blocks: usize) -> Option<usize> {
        let start = (0..CAPACITY.checked_sub(blocks)? + 1)
            .find(|&start| self.occupied[start..start + blocks].iter().all(|b| !b))?;

        self.occupied[start..start + blocks].fill(true);
        self.live.push((start, blocks));

        Some(start)
    }

    fn release(&mut self, index: usize) -> (usize, usize) {
        let (start, blocks) = self.live.swap_remove(index);
        self.occupied[start..start + blocks].fill(false);
        (start, blocks)
    }

    fn markers(&self) -> Vec<u32> {
        let mut markers = vec![0; CAPACITY];

        for &(start, blocks) in &self.live {
            for offset in 0..blocks {
                markers[start + offset] = u32::try_from(blocks - offset).unwrap();
            }
        }

        markers
    }
}

proptest! {
    #[test]
    fn markers_match_first_fit_model(steps in proptest::collection::vec(step(), 1..64)) {
        let mut buffer = [MaybeUninit::<u64>::uninit(); CAPACITY];
        let base = buffer.as_ptr().addr();
        let allocator = BlockAllocator::from_uninit(&mut buffer).unwrap();

        let mut model = Model::new();
        // Parallel to model.live: the pointer and count of each live allocation.
        let mut live: Vec<(NonNull<u64>, usize)> = Vec::new();

        for step in steps {
            match step {
                Step::Allocate(count) => {
                    let blocks = blocks_needed::<u64>(count, size_of::<u64>());

                    match (allocator.allocate(count), model.allocate(blocks)) {
                        (Ok(ptr), Some(start)) => {
                            prop_assert_eq!(ptr.addr().get() - base, start * size_of::<u64>());
                            live.push((ptr, count));
                        }
                        (Err(Error::Exhausted { requested_blocks, .. }), None) => {
                            prop_assert_eq!(requested_blocks, blocks);
                        }
                        (actual, expected) => {
                            prop_assert!(false, "allocator returned {actual:?}, model expected {expected:?}");
                        }
                    }
                }
                Step::Deallocate(index) => {
                    if live.is_empty() {
                        continue;
                    }

                    let index = index % live.len();
                    let (ptr, count) = live.swap_remove(index);
                    model.release(index);

                    // SAFETY: The pointer came from allocate() with this count and is never used again.
                    unsafe { allocator.deallocate(ptr, count) }.unwrap();
                }
            }

            prop_assert_eq!(allocator.markers(), model.markers());
        }
    }

    #[test]
    fn mismatched_count_never_releases(count in 1_usize..20, wrong in 1_usize..20) {
        let mut buffer = [MaybeUninit::<u64>::uninit(); CAPACITY];
        let allocator = BlockAllocator::from_uninit(&mut buffer).unwrap();

        let ptr = allocator.allocate(count).unwrap();
        let before = allocator.markers();

        // SAFETY: Deallocation is validated; on failure nothing is released.
        let result = unsafe { allocator.deallocate(ptr, wrong) };

        if allocator.blocks_for(count) == allocator.blocks_for(wrong) {
            prop_assert!(result.is_ok());
            prop_assert_eq!(allocator.used_blocks(), 0);
        } else {
            let is_size_mismatch = matches!(result, Err(Error::SizeMismatch { .. }));
            prop_assert!(is_size_mismatch, "unexpected result {:?}", result);
            prop_assert_eq!(allocator.markers(), before);
        }
    }
}
