//! Verifies the exact marker layout produced by vectors growing inside an arena.

use std::mem::MaybeUninit;

use block_arena::{BlockAllocator, BlockVec};

fn expected(capacity: usize, runs: &[(usize, u32)]) -> Vec<u32> {
    let mut markers = vec![0; capacity];

    for &(start, length) in runs {
        for (slot, remaining) in markers[start..].iter_mut().zip((1..=length).rev()) {
            *slot = remaining;
        }
    }

    markers
}

#[test]
fn growing_vector_moves_to_first_fit() {
    let mut buffer = [MaybeUninit::<i64>::uninit(); 64];
    let allocator = BlockAllocator::from_uninit(&mut buffer).unwrap();

    let mut values = BlockVec::with_capacity_in(8, allocator.clone()).unwrap();
    for _ in 0..8 {
        values.try_push(0).unwrap();
    }

    // 8 * 8 bytes + 7 bytes of alignment padding = 9 blocks.
    assert_eq!(allocator.markers(), expected(64, &[(0, 9)]));

    for value in 0..17 {
        values.try_push(value).unwrap();
    }

    // Capacity went 8 -> 16 -> 32. The 17-block run landed at 9 (after the first run), then
    // the 33-block run could not fit into the 26 blocks freed before it and landed at 26.
    assert_eq!(allocator.markers(), expected(64, &[(26, 33)]));
    assert_eq!(values.len(), 25);
    assert_eq!(values[24], 16);
}

#[test]
fn rebound_vector_uses_original_block_size() {
    #[repr(C, align(32))]
    #[derive(Clone, Copy)]
    struct Wide([u64; 4]);

    let mut buffer = [MaybeUninit::<Wide>::uninit(); 64];
    let allocator = BlockAllocator::from_uninit(&mut buffer).unwrap();
    let words = allocator.rebind::<u64>().unwrap();

    let mut values = BlockVec::with_capacity_in(5, words).unwrap();
    for _ in 0..5 {
        values.try_push(0_u64).unwrap();
    }

    // 5 * 8 bytes + 7 bytes of padding fits in two 32-byte blocks.
    assert_eq!(allocator.markers(), expected(64, &[(0, 2)]));

    for value in 1..10 {
        values.try_push(value).unwrap();
    }

    // Capacity went 5 -> 10 (3 blocks at 2) -> 20 (6 blocks at 5).
    assert_eq!(allocator.markers(), expected(64, &[(5, 6)]));
    assert_eq!(values.len(), 14);
}

#[test]
fn dropping_every_vector_frees_every_block() {
    let mut buffer = [MaybeUninit::<u32>::uninit(); 128];
    let allocator = BlockAllocator::from_uninit(&mut buffer).unwrap();

    {
        let mut first = BlockVec::new_in(allocator.clone());
        let mut second = BlockVec::new_in(allocator.clone());

        for value in 0..20_u32 {
            first.try_push(value).unwrap();
            second.try_push(value * 2).unwrap();
        }

        assert_eq!(first.iter().sum::<u32>(), 190);
        assert_eq!(second.iter().sum::<u32>(), 380);
    }

    assert_eq!(allocator.used_blocks(), 0);
}
