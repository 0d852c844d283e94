//! Benchmarks value submission to a probe service. The allocation report shows that steady-state
//! submission does not touch the global allocator.
#![allow(
    missing_docs,
    reason = "No need for API documentation in benchmark code"
)]

use std::hint::black_box;
use std::time::Instant;

use alloc_tracker::Allocator;
use criterion::{Criterion, criterion_group, criterion_main};
use new_zealand::nz;
use probes::{ProbeDescription, ProbeService};

criterion_group!(benches, entrypoint);
criterion_main!(benches);

#[global_allocator]
static ALLOCATOR: Allocator<std::alloc::System> = Allocator::system();

const PROBE_NAMES: [&str; 8] = [
    "INPUT_LEVEL",
    "OUTPUT_LEVEL",
    "OUTPUT_GAIN",
    "BUFFER_UNDERRUNS",
    "CALLBACK_TIME",
    "CPU_LOAD",
    "ENGINE_STATE",
    "SETUP_PROBE",
];

fn entrypoint(c: &mut Criterion) {
    let allocs = alloc_tracker::Session::new();

    let builder = ProbeService::builder()
        .max_probes(nz!(8))
        .avg_data_count(nz!(16));
    let mut buffer = vec![0_u8; builder.layout().required_buffer_size()];
    let mut service = builder.build(&mut buffer).unwrap();

    for name in PROBE_NAMES {
        service
            .add_probe(ProbeDescription::new(name, ""))
            .unwrap();
    }

    let handle = service.find_probe("SETUP_PROBE").unwrap();
    service.record(handle, 12_i64).unwrap();
    service.record(handle, "idle").unwrap();

    let mut group = c.benchmark_group("probes_submit");

    let allocs_op = allocs.operation("unchanged_int_by_name");
    group.bench_function("unchanged_int_by_name", |b| {
        b.iter_custom(|iters| {
            let _span = allocs_op.measure_thread().iterations(iters);

            let start = Instant::now();

            for _ in 0..iters {
                black_box(
                    service
                        .send_probe_value(black_box("SETUP_PROBE"), black_box(12_i64))
                        .unwrap(),
                );
            }

            start.elapsed()
        });
    });

    let allocs_op = allocs.operation("unchanged_int_by_fragment");
    group.bench_function("unchanged_int_by_fragment", |b| {
        b.iter_custom(|iters| {
            let _span = allocs_op.measure_thread().iterations(iters);

            let start = Instant::now();

            for _ in 0..iters {
                black_box(
                    service
                        .send_probe_value_matching(black_box("SETUP"), black_box(12_i64))
                        .unwrap(),
                );
            }

            start.elapsed()
        });
    });

    let allocs_op = allocs.operation("alternating_string_by_handle");
    group.bench_function("alternating_string_by_handle", |b| {
        b.iter_custom(|iters| {
            let _span = allocs_op.measure_thread().iterations(iters);

            let start = Instant::now();

            for iteration in 0..iters {
                let state = if iteration % 2 == 0 { "busy" } else { "idle" };

                black_box(service.record(handle, black_box(state)).unwrap());
            }

            start.elapsed()
        });
    });

    group.finish();

    allocs.print_to_stdout();
}
