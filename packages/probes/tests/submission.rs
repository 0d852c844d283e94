//! Exercises value submission through the public service API.

use std::time::{Duration, Instant};

use new_zealand::nz;
use probes::{Datapoint, Error, ProbeDescription, ProbeService};
use proptest::prelude::*;

#[test]
fn setup_probe_scenario() {
    let builder = ProbeService::builder()
        .max_probes(nz!(4))
        .avg_data_count(nz!(8));
    let mut buffer = vec![0_u8; builder.layout().required_buffer_size()];
    let mut service = builder.build(&mut buffer).unwrap();

    let handle = service
        .add_probe(ProbeDescription::new("SETUP_PROBE", ""))
        .unwrap();

    assert!(service.send_probe_value("SETUP_PROBE", 12_i64).unwrap());
    let data = service.get_probe_data(handle).unwrap();
    assert_eq!(data.len(), 1);
    assert_eq!(data.first().map(Datapoint::value), Some(12));

    assert!(!service.send_probe_value("SETUP_PROBE", 12_i64).unwrap());
    assert_eq!(service.get_probe_data(handle).unwrap().len(), 1);

    assert!(service.send_probe_value("SETUP_PROBE", 7_i64).unwrap());
    let data = service.get_probe_data(handle).unwrap();
    assert_eq!(data.len(), 2);
    assert_eq!(data.get(1).map(Datapoint::value), Some(7));
}

#[test]
fn service_in_unaligned_buffer() {
    let builder = ProbeService::builder()
        .max_probes(nz!(2))
        .avg_data_count(nz!(4));
    let required = builder.layout().required_buffer_size();

    // Start one byte into the allocation so the buffer is not aligned for the layout.
    let mut backing = vec![0_u8; required + 1];
    let (_, buffer) = backing.split_at_mut(1);
    let mut service = builder.build(buffer).unwrap();

    let handle = service
        .add_probe(ProbeDescription::new("CPU_LOAD", "%"))
        .unwrap();

    for value in [10_i64, 20, 30] {
        service.record(handle, value).unwrap();
    }

    assert_eq!(service.get_probe_data(handle).unwrap().len(), 3);
}

#[test]
fn every_probe_fills_its_reserved_history() {
    let builder = ProbeService::builder()
        .max_probes(nz!(4))
        .avg_data_count(nz!(8));
    let mut buffer = vec![0_u8; builder.layout().required_buffer_size()];
    let mut service = builder.build(&mut buffer).unwrap();

    for name in ["A", "B", "C", "D"] {
        service
            .add_probe(ProbeDescription::new(name, ""))
            .unwrap();
    }

    for name in ["A", "B", "C", "D"] {
        for value in 0..8_i64 {
            assert!(service.send_probe_value(name, value).unwrap());
        }
    }

    for (_, probe) in service.probes() {
        assert_eq!(probe.datapoints().len(), 8);
    }
}

#[test]
fn probes_grow_into_space_freed_by_others() {
    let builder = ProbeService::builder()
        .max_probes(nz!(3))
        .avg_data_count(nz!(4));
    let mut buffer = vec![0_u8; builder.layout().required_buffer_size()];
    let mut service = builder.build(&mut buffer).unwrap();

    let busy = service
        .add_probe(ProbeDescription::new("BUSY", ""))
        .unwrap();
    let quiet = service
        .add_probe(ProbeDescription::new("QUIET", ""))
        .unwrap();
    let idle = service
        .add_probe(ProbeDescription::new("IDLE", ""))
        .unwrap();

    for value in 0..4_i64 {
        service.record(busy, value).unwrap();
        service.record(quiet, value).unwrap();
    }

    // The region has 15 blocks and each probe reserved 5 of them. Growing to 8 datapoints
    // needs a free run of 9.
    assert!(matches!(
        service.record(busy, 4_i64),
        Err(Error::Arena(block_arena::Error::Exhausted { .. }))
    ));
    assert_eq!(service.get_probe_data(busy).unwrap().len(), 4);

    service.remove_probe(quiet).unwrap();
    service.remove_probe(idle).unwrap();

    assert!(service.record(busy, 4_i64).unwrap());
    assert_eq!(service.get_probe_data(busy).unwrap().len(), 5);
}

proptest! {
    #[test]
    fn datapoints_stay_in_timestamp_order(
        submissions in proptest::collection::vec((0_u64..1_000, -3_i64..3), 1..32)
    ) {
        let builder = ProbeService::builder()
            .max_probes(nz!(1))
            .avg_data_count(nz!(64));
        let mut buffer = vec![0_u8; builder.layout().required_buffer_size()];
        let mut service = builder.build(&mut buffer).unwrap();

        let handle = service
            .add_probe(ProbeDescription::new("JITTER", "us"))
            .unwrap();

        let start = Instant::now();
        let mut stored = 0;

        for (offset, value) in submissions {
            let latest = service.get_probe_data(handle).unwrap().last().map(Datapoint::value);

            let was_stored = service
                .send_probe_value_at("JITTER", value, start + Duration::from_millis(offset))
                .unwrap();

            prop_assert_eq!(was_stored, latest != Some(value));
            if was_stored {
                stored += 1;
            }

            let data = service.get_probe_data(handle).unwrap();
            prop_assert_eq!(data.len(), stored);
            prop_assert!(data.windows(2).all(|pair| pair[0].timestamp() <= pair[1].timestamp()));
        }
    }
}
