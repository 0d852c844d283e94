use std::fmt;

use block_arena::{ArenaBox, BlockAllocator, BlockVec};
use tracing::trace;

use crate::{Datapoint, ProbeMetadata, Result};

/// A named metric stream with a timestamp-ordered datapoint history.
///
/// The name and unit are borrowed from the caller for as long as the owning service lives. The
/// metadata and the datapoints are stored in the service's sub-arenas.
pub struct Probe<'a> {
    name: &'a str,
    metadata: ArenaBox<'a, ProbeMetadata<'a>>,
    datapoints: BlockVec<'a, Datapoint>,
}

impl<'a> Probe<'a> {
    /// Creates a probe whose history has room for `reserved` datapoints up front.
    pub(crate) fn new(
        name: &'a str,
        metadata: ArenaBox<'a, ProbeMetadata<'a>>,
        datapoint_allocator: BlockAllocator<'a, Datapoint>,
        reserved: usize,
    ) -> Result<Self> {
        Ok(Self {
            name,
            metadata,
            datapoints: BlockVec::with_capacity_in(reserved, datapoint_allocator)?,
        })
    }

    /// The name the probe was registered under.
    #[must_use]
    pub fn name(&self) -> &'a str {
        self.name
    }

    /// Flags, unit and latest string value of the probe.
    #[must_use]
    pub fn metadata(&self) -> &ProbeMetadata<'a> {
        &self.metadata
    }

    /// All recorded datapoints in non-decreasing timestamp order.
    #[must_use]
    pub fn datapoints(&self) -> &[Datapoint] {
        &self.datapoints
    }

    /// The datapoint with the latest timestamp, if any.
    #[must_use]
    pub fn last(&self) -> Option<&Datapoint> {
        self.datapoints.last()
    }

    /// Records a datapoint unless its value equals the value of the latest datapoint.
    ///
    /// Datapoints with equal timestamps keep their submission order. Returns whether the
    /// datapoint was stored.
    pub(crate) fn record(&mut self, datapoint: Datapoint) -> Result<bool> {
        if self.last() == Some(&datapoint) {
            return Ok(false);
        }

        let index = self
            .datapoints
            .partition_point(|existing| existing.timestamp() <= datapoint.timestamp());

        self.datapoints.try_insert(index, datapoint)?;

        trace!(
            probe = self.name,
            value = datapoint.value(),
            index,
            "stored datapoint"
        );

        Ok(true)
    }

    /// Records a string value. Only the latest one is kept. Returns whether it changed.
    pub(crate) fn record_string(&mut self, value: &str) -> bool {
        self.metadata.replace_last_string(value)
    }
}

impl fmt::Display for Probe<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let count = self.datapoints.len();
        let noun = if count == 1 { "datapoint" } else { "datapoints" };

        write!(
            f,
            "{} [{}]: {count} {noun}, last=",
            self.name,
            self.metadata.unit()
        )?;

        match (self.last(), self.metadata.last_string()) {
            (Some(last), _) => write!(f, "{}", last.value()),
            (None, Some(last_string)) => write!(f, "\"{last_string}\""),
            (None, None) => write!(f, "none"),
        }
    }
}

impl fmt::Debug for Probe<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Probe")
            .field("name", &self.name)
            .field("metadata", &*self.metadata)
            .field("datapoints", &self.datapoints)
            .finish()
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
#[allow(
    clippy::indexing_slicing,
    reason = "test code doesn't need the same safety rigor as production code"
)]
mod tests {
    use std::mem::MaybeUninit;
    use std::time::{Duration, Instant};

    use static_assertions::assert_not_impl_any;

    use super::*;

    assert_not_impl_any!(Probe<'static>: Send, Sync);

    fn values(probe: &Probe<'_>) -> Vec<i64> {
        probe.datapoints().iter().map(Datapoint::value).collect()
    }

    #[test]
    fn repeated_value_is_not_stored() {
        let mut metadata_buffer = [const { MaybeUninit::<ProbeMetadata<'static>>::uninit() }; 2];
        let mut datapoint_buffer = [MaybeUninit::<Datapoint>::uninit(); 16];
        let metadata_allocator = BlockAllocator::from_uninit(&mut metadata_buffer).unwrap();
        let datapoint_allocator = BlockAllocator::from_uninit(&mut datapoint_buffer).unwrap();

        let metadata = ArenaBox::new_in(ProbeMetadata::new(0, "V"), &metadata_allocator).unwrap();
        let mut probe = Probe::new("VOLTAGE", metadata, datapoint_allocator, 4).unwrap();

        assert!(probe.record(Datapoint::now(12)).unwrap());
        assert!(!probe.record(Datapoint::now(12)).unwrap());
        assert!(probe.record(Datapoint::now(7)).unwrap());
        assert!(probe.record(Datapoint::now(12)).unwrap());

        assert_eq!(values(&probe), vec![12, 7, 12]);
    }

    #[test]
    fn late_datapoint_is_inserted_in_timestamp_order() {
        let mut metadata_buffer = [const { MaybeUninit::<ProbeMetadata<'static>>::uninit() }; 2];
        let mut datapoint_buffer = [MaybeUninit::<Datapoint>::uninit(); 16];
        let metadata_allocator = BlockAllocator::from_uninit(&mut metadata_buffer).unwrap();
        let datapoint_allocator = BlockAllocator::from_uninit(&mut datapoint_buffer).unwrap();

        let metadata = ArenaBox::new_in(ProbeMetadata::new(0, "V"), &metadata_allocator).unwrap();
        let mut probe = Probe::new("VOLTAGE", metadata, datapoint_allocator, 4).unwrap();

        let start = Instant::now();
        let at = |seconds| start + Duration::from_secs(seconds);

        probe.record(Datapoint::new(at(10), 1)).unwrap();
        probe.record(Datapoint::new(at(30), 3)).unwrap();
        probe.record(Datapoint::new(at(20), 2)).unwrap();
        probe.record(Datapoint::new(at(0), 0)).unwrap();

        assert_eq!(values(&probe), vec![0, 1, 2, 3]);
    }

    #[test]
    fn equal_timestamps_keep_submission_order() {
        let mut metadata_buffer = [const { MaybeUninit::<ProbeMetadata<'static>>::uninit() }; 2];
        let mut datapoint_buffer = [MaybeUninit::<Datapoint>::uninit(); 16];
        let metadata_allocator = BlockAllocator::from_uninit(&mut metadata_buffer).unwrap();
        let datapoint_allocator = BlockAllocator::from_uninit(&mut datapoint_buffer).unwrap();

        let metadata = ArenaBox::new_in(ProbeMetadata::new(0, "V"), &metadata_allocator).unwrap();
        let mut probe = Probe::new("VOLTAGE", metadata, datapoint_allocator, 4).unwrap();

        let now = Instant::now();
        probe.record(Datapoint::new(now, 1)).unwrap();
        probe.record(Datapoint::new(now, 2)).unwrap();
        probe.record(Datapoint::new(now, 3)).unwrap();

        assert_eq!(values(&probe), vec![1, 2, 3]);
    }

    #[test]
    fn full_datapoint_arena_leaves_history_intact() {
        let mut metadata_buffer = [const { MaybeUninit::<ProbeMetadata<'static>>::uninit() }; 2];
        let mut datapoint_buffer = [MaybeUninit::<Datapoint>::uninit(); 5];
        let metadata_allocator = BlockAllocator::from_uninit(&mut metadata_buffer).unwrap();
        let datapoint_allocator = BlockAllocator::from_uninit(&mut datapoint_buffer).unwrap();

        let metadata = ArenaBox::new_in(ProbeMetadata::new(0, "V"), &metadata_allocator).unwrap();
        let mut probe = Probe::new("VOLTAGE", metadata, datapoint_allocator, 4).unwrap();

        for value in 0..4 {
            probe.record(Datapoint::now(value)).unwrap();
        }

        // The reserved 4 datapoints take all 5 blocks, so growing to 8 has nowhere to go.
        assert!(probe.record(Datapoint::now(4)).is_err());
        assert_eq!(values(&probe), vec![0, 1, 2, 3]);
    }

    #[test]
    fn reserved_history_is_allocated_up_front() {
        let mut metadata_buffer = [const { MaybeUninit::<ProbeMetadata<'static>>::uninit() }; 2];
        let mut datapoint_buffer = [MaybeUninit::<Datapoint>::uninit(); 9];
        let metadata_allocator = BlockAllocator::from_uninit(&mut metadata_buffer).unwrap();
        let datapoint_allocator = BlockAllocator::from_uninit(&mut datapoint_buffer).unwrap();

        let metadata = ArenaBox::new_in(ProbeMetadata::new(0, "V"), &metadata_allocator).unwrap();
        let mut probe = Probe::new("VOLTAGE", metadata, datapoint_allocator.clone(), 8).unwrap();

        assert_eq!(datapoint_allocator.used_blocks(), 9);

        for value in 0..8 {
            probe.record(Datapoint::now(value)).unwrap();
        }

        assert_eq!(values(&probe), (0..8).collect::<Vec<_>>());
        assert_eq!(datapoint_allocator.used_blocks(), 9);
    }

    #[test]
    fn reservation_larger_than_arena_is_rejected() {
        let mut metadata_buffer = [const { MaybeUninit::<ProbeMetadata<'static>>::uninit() }; 2];
        let mut datapoint_buffer = [MaybeUninit::<Datapoint>::uninit(); 4];
        let metadata_allocator = BlockAllocator::from_uninit(&mut metadata_buffer).unwrap();
        let datapoint_allocator = BlockAllocator::from_uninit(&mut datapoint_buffer).unwrap();

        let metadata = ArenaBox::new_in(ProbeMetadata::new(0, "V"), &metadata_allocator).unwrap();

        assert!(Probe::new("VOLTAGE", metadata, datapoint_allocator, 4).is_err());
        assert_eq!(metadata_allocator.used_blocks(), 0);
    }

    #[test]
    fn display_summarizes_probe() {
        let mut metadata_buffer = [const { MaybeUninit::<ProbeMetadata<'static>>::uninit() }; 2];
        let mut datapoint_buffer = [MaybeUninit::<Datapoint>::uninit(); 16];
        let metadata_allocator = BlockAllocator::from_uninit(&mut metadata_buffer).unwrap();
        let datapoint_allocator = BlockAllocator::from_uninit(&mut datapoint_buffer).unwrap();

        let metadata = ArenaBox::new_in(ProbeMetadata::new(0, "dB"), &metadata_allocator).unwrap();
        let mut probe = Probe::new("GAIN", metadata, datapoint_allocator, 4).unwrap();

        assert_eq!(probe.to_string(), "GAIN [dB]: 0 datapoints, last=none");

        probe.record_string("muted");
        assert_eq!(probe.to_string(), "GAIN [dB]: 0 datapoints, last=\"muted\"");

        probe.record(Datapoint::now(-6)).unwrap();
        assert_eq!(probe.to_string(), "GAIN [dB]: 1 datapoint, last=-6");

        probe.record(Datapoint::now(-3)).unwrap();
        assert_eq!(probe.to_string(), "GAIN [dB]: 2 datapoints, last=-3");
    }
}
