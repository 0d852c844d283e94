#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

//! Real-time telemetry probes recorded into a single pre-allocated buffer.
//!
//! A [`ProbeService`] takes one buffer supplied by the caller, typically a memory-mapped region,
//! and divides it into three block arenas: one holding the pool of probes, one holding probe
//! metadata and one holding the datapoint histories. Once built, the service records values
//! without touching the global allocator (other than to copy string values), which makes it
//! suitable for feeding from a latency-sensitive control loop.
//!
//! Each probe is a named stream of [`Datapoint`]s kept in timestamp order. A submitted integer
//! that equals the latest stored value is dropped, so a probe only grows while its value
//! changes. String values are not kept as history: a probe only remembers the latest one.
//!
//! # Example
//!
//! ```
//! use new_zealand::nz;
//! use probes::{ProbeDescription, ProbeService};
//!
//! let builder = ProbeService::builder()
//!     .max_probes(nz!(8))
//!     .avg_data_count(nz!(16));
//!
//! let mut buffer = vec![0_u8; builder.layout().required_buffer_size()];
//! let mut service = builder.build(&mut buffer).unwrap();
//!
//! let gain = service
//!     .add_probe(ProbeDescription::new("OUTPUT_GAIN", "dB"))
//!     .unwrap();
//!
//! service.send_probe_value("OUTPUT_GAIN", -6_i64).unwrap();
//! service.send_probe_value("OUTPUT_GAIN", -6_i64).unwrap();
//! service.send_probe_value("OUTPUT_GAIN", -3_i64).unwrap();
//!
//! let history = service.get_probe_data(gain).unwrap();
//! assert_eq!(history.len(), 2);
//!
//! println!("{}", service.probe(gain).unwrap());
//! ```
//!
//! # Names
//!
//! Probes are addressed by their exact name, which must be unique within a service.
//! [`ProbeService::send_probe_value_matching()`] offers lookup by name fragment instead, with
//! the first matching probe winning. Names and units are borrowed, not copied, so they must
//! outlive the service.
//!
//! # Thread safety
//!
//! The service performs no synchronization and is neither [`Send`] nor [`Sync`].

mod builder;
mod datapoint;
mod error;
mod layout;
mod metadata;
mod probe;
mod service;
mod value;

pub use builder::*;
pub use datapoint::*;
pub use error::*;
pub use layout::ServiceLayout;
pub use metadata::*;
pub use probe::*;
pub use service::*;
pub use value::*;
