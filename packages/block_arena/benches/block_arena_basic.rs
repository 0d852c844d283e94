//! Basic benchmarks for the `block_arena` crate.
#![allow(
    missing_docs,
    reason = "No need for API documentation in benchmark code"
)]

use std::hint::black_box;
use std::mem::MaybeUninit;
use std::time::Instant;

use alloc_tracker::Allocator;
use block_arena::{BlockAllocator, BlockVec};
use criterion::{Criterion, criterion_group, criterion_main};

criterion_group!(benches, entrypoint);
criterion_main!(benches);

#[global_allocator]
static ALLOCATOR: Allocator<std::alloc::System> = Allocator::system();

const ARENA_BLOCKS: usize = 4096;

fn entrypoint(c: &mut Criterion) {
    let allocs = alloc_tracker::Session::new();

    let mut group = c.benchmark_group("block_arena_basic");

    let allocs_op = allocs.operation("allocate_release_one");
    group.bench_function("allocate_release_one", |b| {
        let mut buffer = vec![MaybeUninit::<u64>::uninit(); ARENA_BLOCKS];
        let allocator = BlockAllocator::from_uninit(&mut buffer).unwrap();

        b.iter_custom(|iters| {
            let _span = allocs_op.measure_thread().iterations(iters);

            let start = Instant::now();

            for _ in 0..iters {
                let ptr = allocator.allocate(black_box(1)).unwrap();

                // SAFETY: The storage was allocated above with the same count and is not used.
                unsafe { allocator.deallocate(ptr, 1) }.unwrap();
            }

            start.elapsed()
        });
    });

    let allocs_op = allocs.operation("allocate_behind_fragmentation");
    group.bench_function("allocate_behind_fragmentation", |b| {
        let mut buffer = vec![MaybeUninit::<u64>::uninit(); ARENA_BLOCKS];
        let allocator = BlockAllocator::from_uninit(&mut buffer).unwrap();

        // Leave a pattern of single free blocks at the front that a 4-element request skips.
        let fillers = (0..ARENA_BLOCKS / 8)
            .map(|_| allocator.allocate(1).unwrap())
            .collect::<Vec<_>>();
        for ptr in fillers.iter().step_by(2) {
            // SAFETY: Each filler was allocated with a count of 1 and is not used.
            unsafe { allocator.deallocate(*ptr, 1) }.unwrap();
        }

        b.iter_custom(|iters| {
            let _span = allocs_op.measure_thread().iterations(iters);

            let start = Instant::now();

            for _ in 0..iters {
                let ptr = allocator.allocate(black_box(4)).unwrap();

                // SAFETY: The storage was allocated above with the same count and is not used.
                unsafe { allocator.deallocate(ptr, 4) }.unwrap();
            }

            start.elapsed()
        });
    });

    let allocs_op = allocs.operation("vec_push_128");
    group.bench_function("vec_push_128", |b| {
        let mut buffer = vec![MaybeUninit::<u64>::uninit(); ARENA_BLOCKS];
        let allocator = BlockAllocator::from_uninit(&mut buffer).unwrap();

        b.iter_custom(|iters| {
            let _span = allocs_op.measure_thread().iterations(iters);

            let start = Instant::now();

            for _ in 0..iters {
                let mut values = BlockVec::new_in(allocator.clone());

                for value in 0..128_u64 {
                    values.try_push(black_box(value)).unwrap();
                }

                drop(black_box(values));
            }

            start.elapsed()
        });
    });

    group.finish();

    allocs.print_to_stdout();
}
