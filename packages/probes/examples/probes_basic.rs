//! Places a probe service in an anonymous memory mapping and records a few values.
//!
//! A real deployment would map a named shared memory region instead, so that another process
//! can inspect the probes.

use memmap2::MmapMut;
use new_zealand::nz;
use probes::{ProbeDescription, ProbeService};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let builder = ProbeService::builder()
        .max_probes(nz!(4))
        .avg_data_count(nz!(8));

    let layout = builder.layout();
    println!(
        "Service needs {} bytes (layout of {} bytes aligned to {})",
        layout.required_buffer_size(),
        layout.layout().size(),
        layout.layout().align()
    );

    let mut mapping = MmapMut::map_anon(layout.required_buffer_size())?;
    let mut service = builder.build(&mut mapping)?;

    let setup = service.add_probe(ProbeDescription::new("SETUP_PROBE", "count"))?;
    let state = service.add_probe(ProbeDescription {
        name: "ENGINE_STATE",
        unit: "",
        flags: 0b1,
    })?;

    for value in [12_i64, 12, 7] {
        let stored = service.send_probe_value("SETUP_PROBE", value)?;
        println!("SETUP_PROBE <- {value}: stored = {stored}");
    }

    for value in ["starting", "running", "running"] {
        let stored = service.send_probe_value("ENGINE_STATE", value)?;
        println!("ENGINE_STATE <- {value:?}: stored = {stored}");
    }

    for datapoint in service.get_probe_data(setup)? {
        println!("  {:?} -> {}", datapoint.timestamp(), datapoint.value());
    }

    for (_, probe) in service.probes() {
        println!("{probe}");
    }

    service.remove_probe(state)?;
    println!("{} probe(s) left", service.len());

    Ok(())
}
