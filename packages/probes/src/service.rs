use std::fmt;
use std::time::Instant;

use block_arena::{ArenaBox, BlockAllocator};
use foldhash::{HashMap, HashMapExt};
use sparse_pool::{Handle, PoolEntry, SparsePool};
use tracing::debug;

use crate::{
    Datapoint, Error, Probe, ProbeDescription, ProbeMetadata, ProbeServiceBuilder, ProbeValue,
    Result, ServiceLayout,
};

/// Identifies a probe registered with a [`ProbeService`].
///
/// A handle stays valid until its probe is removed. Using it afterwards fails with a stale
/// handle error.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct ProbeHandle(Handle);

/// A fixed-capacity store of named probes and their datapoints, placed entirely in one
/// caller-supplied buffer.
///
/// The buffer is divided into three block arenas as described by [`ServiceLayout`]: one for the
/// probe pool, one for probe metadata and one for datapoint histories. After construction,
/// recording values only allocates from these arenas, except that the first string value of a
/// probe (or one longer than any before it) is copied to the heap.
///
/// # Examples
///
/// ```
/// use new_zealand::nz;
/// use probes::{ProbeDescription, ProbeService};
///
/// let builder = ProbeService::builder()
///     .max_probes(nz!(4))
///     .avg_data_count(nz!(8));
/// let mut buffer = vec![0_u8; builder.layout().required_buffer_size()];
/// let mut service = builder.build(&mut buffer).unwrap();
///
/// let handle = service
///     .add_probe(ProbeDescription::new("SETUP_PROBE", "count"))
///     .unwrap();
///
/// assert!(service.send_probe_value("SETUP_PROBE", 12_i64).unwrap());
/// assert!(!service.send_probe_value("SETUP_PROBE", 12_i64).unwrap());
/// assert_eq!(service.get_probe_data(handle).unwrap().len(), 1);
/// ```
///
/// # Thread safety
///
/// The service is neither [`Send`] nor [`Sync`]. Callers serialize access by confining it to
/// one thread.
pub struct ProbeService<'a> {
    probes: SparsePool<'a, Probe<'a>>,
    names: HashMap<&'a str, ProbeHandle>,

    metadata_allocator: BlockAllocator<'a, ProbeMetadata<'a>>,
    datapoint_allocator: BlockAllocator<'a, Datapoint>,

    layout: ServiceLayout,
}

impl<'a> ProbeService<'a> {
    /// Starts building a new service.
    pub fn builder() -> ProbeServiceBuilder {
        ProbeServiceBuilder::new()
    }

    pub(crate) fn new_in(layout: ServiceLayout, buffer: &'a mut [u8]) -> Result<Self> {
        let regions = layout.split(buffer)?;

        let probe_allocator = BlockAllocator::<PoolEntry<Probe<'a>>>::new(regions.probes)?;
        let metadata_allocator = BlockAllocator::new(regions.metadata)?;
        let datapoint_allocator = BlockAllocator::new(regions.datapoints)?;

        let probes = SparsePool::builder()
            .capacity(layout.max_probes())
            .build_in(&probe_allocator)?;

        debug!(
            max_probes = layout.max_probes().get(),
            avg_data_count = layout.avg_data_count().get(),
            size = layout.layout().size(),
            "created probe service"
        );

        Ok(Self {
            probes,
            names: HashMap::with_capacity(layout.max_probes().get()),
            metadata_allocator,
            datapoint_allocator,
            layout,
        })
    }

    /// Registers a new probe.
    ///
    /// The probe's history is reserved up front with room for the layout's average datapoint
    /// count, so every registered probe can hold that many datapoints.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DuplicateName`] if a probe with the same name exists, or an exhaustion
    /// error if the probe pool, the metadata arena or the datapoint arena is full. A failed call
    /// registers nothing.
    pub fn add_probe(&mut self, description: ProbeDescription<'a>) -> Result<ProbeHandle> {
        if self.names.contains_key(description.name) {
            return Err(Error::DuplicateName {
                name: description.name.to_owned(),
            });
        }

        let metadata = ArenaBox::new_in(
            ProbeMetadata::new(description.flags, description.unit),
            &self.metadata_allocator,
        )?;

        // On failure the metadata box is dropped, which releases it.
        let probe = Probe::new(
            description.name,
            metadata,
            self.datapoint_allocator.clone(),
            self.layout.avg_data_count().get(),
        )?;

        // If the pool is full the probe is dropped here, which releases its storage.
        let handle = ProbeHandle(self.probes.add(probe)?);
        self.names.insert(description.name, handle);

        debug!(
            probe = description.name,
            unit = description.unit,
            flags = description.flags,
            "added probe"
        );

        Ok(handle)
    }

    /// Removes a probe, releasing its metadata and datapoints back to their arenas.
    ///
    /// # Errors
    ///
    /// Returns a stale handle error if the probe was already removed.
    pub fn remove_probe(&mut self, handle: ProbeHandle) -> Result<()> {
        let probe = self.probes.remove(handle.0)?;
        self.names.remove(probe.name());

        debug!(
            probe = probe.name(),
            datapoints = probe.datapoints().len(),
            "removed probe"
        );

        Ok(())
    }

    /// Submits a value to the probe with exactly this name, timestamped now.
    ///
    /// Returns whether anything was stored. An integer equal to the probe's latest datapoint
    /// and a string equal to its latest string are both ignored.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ProbeNotFound`] if no probe has this name, or an arena error if the
    /// probe's history cannot grow.
    pub fn send_probe_value<'v>(
        &mut self,
        name: &str,
        value: impl Into<ProbeValue<'v>>,
    ) -> Result<bool> {
        let handle = self.find_probe(name).ok_or_else(|| Error::ProbeNotFound {
            name: name.to_owned(),
        })?;

        self.record(handle, value)
    }

    /// Submits an integer captured at `timestamp` to the probe with exactly this name.
    ///
    /// The datapoint is inserted after all datapoints with the same or an earlier timestamp.
    ///
    /// # Errors
    ///
    /// As for [`send_probe_value()`][Self::send_probe_value].
    pub fn send_probe_value_at(
        &mut self,
        name: &str,
        value: i64,
        timestamp: Instant,
    ) -> Result<bool> {
        let handle = self.find_probe(name).ok_or_else(|| Error::ProbeNotFound {
            name: name.to_owned(),
        })?;

        self.probe_mut(handle)?
            .record(Datapoint::new(timestamp, value))
    }

    /// Submits a value to the first probe whose name contains `fragment`.
    ///
    /// Probes are searched in pool order, which is arbitrary once probes have been removed.
    /// Prefer [`send_probe_value()`][Self::send_probe_value] unless the fuzzy match is needed.
    ///
    /// # Errors
    ///
    /// As for [`send_probe_value()`][Self::send_probe_value].
    pub fn send_probe_value_matching<'v>(
        &mut self,
        fragment: &str,
        value: impl Into<ProbeValue<'v>>,
    ) -> Result<bool> {
        let handle = self
            .probes
            .iter()
            .find(|(_, probe)| probe.name().contains(fragment))
            .map(|(handle, _)| ProbeHandle(handle))
            .ok_or_else(|| Error::ProbeNotFound {
                name: fragment.to_owned(),
            })?;

        self.record(handle, value)
    }

    /// Submits a value to a probe without resolving its name.
    ///
    /// # Errors
    ///
    /// Returns a stale handle error if the probe was removed, or an arena error if the probe's
    /// history cannot grow.
    pub fn record<'v>(
        &mut self,
        handle: ProbeHandle,
        value: impl Into<ProbeValue<'v>>,
    ) -> Result<bool> {
        let probe = self.probe_mut(handle)?;

        match value.into() {
            ProbeValue::Int(value) => probe.record(Datapoint::now(value)),
            ProbeValue::Str(value) => Ok(probe.record_string(value)),
        }
    }

    /// The full datapoint history of a probe, in timestamp order.
    ///
    /// # Errors
    ///
    /// Returns a stale handle error if the probe was removed.
    pub fn get_probe_data(&self, handle: ProbeHandle) -> Result<&[Datapoint]> {
        Ok(self.probe(handle)?.datapoints())
    }

    /// The probe a handle refers to.
    ///
    /// # Errors
    ///
    /// Returns a stale handle error if the probe was removed.
    pub fn probe(&self, handle: ProbeHandle) -> Result<&Probe<'a>> {
        Ok(self.probes.get(handle.0)?)
    }

    /// Looks up a probe by its exact name.
    #[must_use]
    pub fn find_probe(&self, name: &str) -> Option<ProbeHandle> {
        self.names.get(name).copied()
    }

    /// Iterates over all probes in arbitrary order.
    pub fn probes(&self) -> impl Iterator<Item = (ProbeHandle, &Probe<'a>)> {
        self.probes
            .iter()
            .map(|(handle, probe)| (ProbeHandle(handle), probe))
    }

    /// Number of registered probes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.probes.len()
    }

    /// Whether no probes are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.probes.is_empty()
    }

    /// Maximum number of probes the service can hold.
    #[must_use]
    pub fn max_probes(&self) -> usize {
        self.probes.capacity()
    }

    /// How the service divided its buffer.
    #[must_use]
    pub fn layout(&self) -> &ServiceLayout {
        &self.layout
    }

    fn probe_mut(&mut self, handle: ProbeHandle) -> Result<&mut Probe<'a>> {
        Ok(self.probes.get_mut(handle.0)?)
    }

    #[cfg(test)]
    pub(crate) fn metadata_blocks_in_use(&self) -> usize {
        self.metadata_allocator.used_blocks()
    }

    #[cfg(test)]
    pub(crate) fn datapoint_blocks_in_use(&self) -> usize {
        self.datapoint_allocator.used_blocks()
    }
}

impl fmt::Debug for ProbeService<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProbeService")
            .field("probes", &self.probes)
            .field("metadata_allocator", &self.metadata_allocator)
            .field("datapoint_allocator", &self.datapoint_allocator)
            .field("layout", &self.layout)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
#[allow(
    clippy::indexing_slicing,
    reason = "test code doesn't need the same safety rigor as production code"
)]
mod tests {
    use std::time::Duration;

    use new_zealand::nz;
    use static_assertions::assert_not_impl_any;

    use super::*;

    assert_not_impl_any!(ProbeService<'static>: Send, Sync);

    fn buffer_for(builder: &ProbeServiceBuilder) -> Vec<u8> {
        vec![0; builder.layout().required_buffer_size()]
    }

    #[test]
    fn setup_probe_scenario() {
        let builder = ProbeService::builder()
            .max_probes(nz!(4))
            .avg_data_count(nz!(8));
        let mut buffer = buffer_for(&builder);
        let mut service = builder.build(&mut buffer).unwrap();

        let handle = service
            .add_probe(ProbeDescription::new("SETUP_PROBE", "count"))
            .unwrap();

        assert!(service.send_probe_value("SETUP_PROBE", 12_i64).unwrap());
        let data = service.get_probe_data(handle).unwrap();
        assert_eq!(data.len(), 1);
        assert_eq!(data[0].value(), 12);

        assert!(!service.send_probe_value("SETUP_PROBE", 12_i64).unwrap());
        assert_eq!(service.get_probe_data(handle).unwrap().len(), 1);

        assert!(service.send_probe_value("SETUP_PROBE", 7_i64).unwrap());
        let data = service.get_probe_data(handle).unwrap();
        assert_eq!(data.len(), 2);
        assert_eq!(data[1].value(), 7);
    }

    #[test]
    fn string_values_are_deduplicated() {
        let builder = ProbeService::builder().max_probes(nz!(2));
        let mut buffer = buffer_for(&builder);
        let mut service = builder.build(&mut buffer).unwrap();

        let handle = service
            .add_probe(ProbeDescription::new("STATE", ""))
            .unwrap();

        assert!(service.send_probe_value("STATE", "idle").unwrap());
        assert!(!service.send_probe_value("STATE", "idle").unwrap());
        assert!(service.send_probe_value("STATE", "running").unwrap());

        let probe = service.probe(handle).unwrap();
        assert_eq!(probe.metadata().last_string(), Some("running"));
        assert!(probe.datapoints().is_empty());
    }

    #[test]
    fn unknown_name_is_not_found() {
        let builder = ProbeService::builder().max_probes(nz!(2));
        let mut buffer = buffer_for(&builder);
        let mut service = builder.build(&mut buffer).unwrap();

        service
            .add_probe(ProbeDescription::new("SETUP_PROBE", ""))
            .unwrap();

        assert_eq!(
            service.send_probe_value("SETUP", 1_i64),
            Err(Error::ProbeNotFound {
                name: "SETUP".to_owned(),
            })
        );
    }

    #[test]
    fn matching_uses_name_fragment() {
        let builder = ProbeService::builder().max_probes(nz!(2));
        let mut buffer = buffer_for(&builder);
        let mut service = builder.build(&mut buffer).unwrap();

        let handle = service
            .add_probe(ProbeDescription::new("SETUP_PROBE", ""))
            .unwrap();

        assert!(service.send_probe_value_matching("SETUP", 5_i64).unwrap());
        assert_eq!(service.get_probe_data(handle).unwrap()[0].value(), 5);

        assert!(matches!(
            service.send_probe_value_matching("TEARDOWN", 5_i64),
            Err(Error::ProbeNotFound { .. })
        ));
    }

    #[test]
    fn matching_picks_first_probe_in_pool_order() {
        let builder = ProbeService::builder().max_probes(nz!(2));
        let mut buffer = buffer_for(&builder);
        let mut service = builder.build(&mut buffer).unwrap();

        service
            .add_probe(ProbeDescription::new("IN_GAIN", "dB"))
            .unwrap();
        service
            .add_probe(ProbeDescription::new("OUT_GAIN", "dB"))
            .unwrap();

        let (first, _) = service.probes().next().unwrap();

        assert!(service.send_probe_value_matching("GAIN", -6_i64).unwrap());

        let stored = service
            .probes()
            .map(|(_, probe)| probe.datapoints().len())
            .sum::<usize>();

        assert_eq!(stored, 1);
        assert_eq!(service.get_probe_data(first).unwrap().len(), 1);
        assert_eq!(service.get_probe_data(first).unwrap()[0].value(), -6);
    }

    #[test]
    fn every_probe_holds_the_average_data_count() {
        let builder = ProbeService::builder()
            .max_probes(nz!(4))
            .avg_data_count(nz!(8));
        let mut buffer = buffer_for(&builder);
        let mut service = builder.build(&mut buffer).unwrap();

        let handles = ["A", "B", "C", "D"]
            .map(|name| service.add_probe(ProbeDescription::new(name, "")).unwrap());

        for handle in handles {
            for value in 0..8_i64 {
                assert!(service.record(handle, value).unwrap());
            }
        }

        for handle in handles {
            assert_eq!(service.get_probe_data(handle).unwrap().len(), 8);
        }
    }

    #[test]
    fn full_datapoint_arena_rejects_new_probe() {
        let builder = ProbeService::builder()
            .max_probes(nz!(3))
            .avg_data_count(nz!(4));
        let mut buffer = buffer_for(&builder);
        let mut service = builder.build(&mut buffer).unwrap();

        let grown = service.add_probe(ProbeDescription::new("A", "")).unwrap();
        let b = service.add_probe(ProbeDescription::new("B", "")).unwrap();
        let c = service.add_probe(ProbeDescription::new("C", "")).unwrap();
        service.remove_probe(b).unwrap();
        service.remove_probe(c).unwrap();

        // The region has 15 blocks. Growing to 8 datapoints moves the history into 9 of the
        // 10 blocks freed above, leaving its original 5 blocks and one more.
        for value in 0..5_i64 {
            service.record(grown, value).unwrap();
        }
        service.add_probe(ProbeDescription::new("D", "")).unwrap();

        let metadata_blocks = service.metadata_blocks_in_use();
        assert!(matches!(
            service.add_probe(ProbeDescription::new("E", "")),
            Err(Error::Arena(block_arena::Error::Exhausted { .. }))
        ));
        assert_eq!(service.len(), 2);
        assert_eq!(service.find_probe("E"), None);
        assert_eq!(service.metadata_blocks_in_use(), metadata_blocks);
        assert_eq!(service.datapoint_blocks_in_use(), 14);
    }

    #[test]
    fn duplicate_name_is_rejected() {
        let builder = ProbeService::builder().max_probes(nz!(2));
        let mut buffer = buffer_for(&builder);
        let mut service = builder.build(&mut buffer).unwrap();

        service.add_probe(ProbeDescription::new("GAIN", "dB")).unwrap();

        assert_eq!(
            service.add_probe(ProbeDescription::new("GAIN", "dB")),
            Err(Error::DuplicateName {
                name: "GAIN".to_owned(),
            })
        );
        assert_eq!(service.len(), 1);
        assert_eq!(service.metadata_blocks_in_use(), 2);
    }

    #[test]
    fn full_service_registers_nothing() {
        let builder = ProbeService::builder().max_probes(nz!(2));
        let mut buffer = buffer_for(&builder);
        let mut service = builder.build(&mut buffer).unwrap();

        service.add_probe(ProbeDescription::new("A", "")).unwrap();
        service.add_probe(ProbeDescription::new("B", "")).unwrap();
        let metadata_blocks = service.metadata_blocks_in_use();

        assert!(matches!(
            service.add_probe(ProbeDescription::new("C", "")),
            Err(Error::Arena(block_arena::Error::Exhausted { .. }) | Error::Pool(_))
        ));

        assert_eq!(service.len(), 2);
        assert_eq!(service.find_probe("C"), None);
        assert_eq!(service.metadata_blocks_in_use(), metadata_blocks);
    }

    #[test]
    fn remove_probe_releases_its_storage() {
        let builder = ProbeService::builder()
            .max_probes(nz!(2))
            .avg_data_count(nz!(4));
        let mut buffer = buffer_for(&builder);
        let mut service = builder.build(&mut buffer).unwrap();

        let handle = service
            .add_probe(ProbeDescription::new("LEVEL", "dB"))
            .unwrap();
        for value in 0..3_i64 {
            service.record(handle, value).unwrap();
        }

        assert!(service.metadata_blocks_in_use() > 0);
        assert!(service.datapoint_blocks_in_use() > 0);

        service.remove_probe(handle).unwrap();

        assert_eq!(service.metadata_blocks_in_use(), 0);
        assert_eq!(service.datapoint_blocks_in_use(), 0);
        assert!(service.is_empty());
        assert_eq!(service.find_probe("LEVEL"), None);
        assert!(matches!(
            service.get_probe_data(handle),
            Err(Error::Pool(sparse_pool::Error::StaleHandle { .. }))
        ));
        assert!(matches!(
            service.remove_probe(handle),
            Err(Error::Pool(sparse_pool::Error::StaleHandle { .. }))
        ));
    }

    #[test]
    fn removed_name_can_be_registered_again() {
        let builder = ProbeService::builder().max_probes(nz!(1));
        let mut buffer = buffer_for(&builder);
        let mut service = builder.build(&mut buffer).unwrap();

        let first = service.add_probe(ProbeDescription::new("GAIN", "")).unwrap();
        service.remove_probe(first).unwrap();
        let second = service.add_probe(ProbeDescription::new("GAIN", "")).unwrap();

        assert_ne!(first, second);
        assert_eq!(service.find_probe("GAIN"), Some(second));
    }

    #[test]
    fn timestamped_values_are_sorted() {
        let builder = ProbeService::builder().max_probes(nz!(1));
        let mut buffer = buffer_for(&builder);
        let mut service = builder.build(&mut buffer).unwrap();

        let handle = service
            .add_probe(ProbeDescription::new("LATENCY", "us"))
            .unwrap();

        let start = Instant::now();
        service
            .send_probe_value_at("LATENCY", 2, start + Duration::from_millis(2))
            .unwrap();
        service
            .send_probe_value_at("LATENCY", 1, start + Duration::from_millis(1))
            .unwrap();
        service
            .send_probe_value_at("LATENCY", 3, start + Duration::from_millis(3))
            .unwrap();

        let values = service
            .get_probe_data(handle)
            .unwrap()
            .iter()
            .map(Datapoint::value)
            .collect::<Vec<_>>();
        assert_eq!(values, vec![1, 2, 3]);
    }

    #[test]
    fn probes_lists_every_probe() {
        let builder = ProbeService::builder().max_probes(nz!(4));
        let mut buffer = buffer_for(&builder);
        let mut service = builder.build(&mut buffer).unwrap();

        let a = service.add_probe(ProbeDescription::new("A", "")).unwrap();
        let b = service.add_probe(ProbeDescription::new("B", "")).unwrap();

        let mut names = service
            .probes()
            .map(|(handle, probe)| {
                assert!(handle == a || handle == b);
                probe.name()
            })
            .collect::<Vec<_>>();
        names.sort_unstable();

        assert_eq!(names, vec!["A", "B"]);
        assert_eq!(service.max_probes(), 4);
    }
}
