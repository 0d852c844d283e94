use std::alloc::Layout;
use std::num::NonZero;
use std::ops::Range;

use block_arena::blocks_needed;
use sparse_pool::PoolEntry;

use crate::{Datapoint, Error, Probe, ProbeMetadata, Result};

/// Element type of the probe region. Lifetimes do not affect its layout.
pub(crate) type ProbeEntry = PoolEntry<Probe<'static>>;

/// Precalculates how a probe service divides its buffer between probes, metadata and datapoints.
///
/// The three regions are laid out back to back, each aligned for its element type. Each region
/// becomes a separate block arena. Region sizes account for the alignment padding that the
/// arenas add to every allocation:
///
/// * The probe region holds the probe pool's dense store, reserved for `max_probes` probes.
/// * The metadata region holds one boxed metadata record per probe.
/// * The datapoint region holds one history of `avg_data_count` datapoints per probe, each
///   with its block of padding. Every probe reserves its history when it is added.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ServiceLayout {
    max_probes: NonZero<usize>,
    avg_data_count: NonZero<usize>,

    /// The whole compound region, padded to a multiple of its alignment.
    layout: Layout,

    /// Byte ranges of the regions, relative to the aligned start of the compound region.
    probes: Range<usize>,
    metadata: Range<usize>,
    datapoints: Range<usize>,
}

/// The three regions of a buffer, sliced and aligned according to a [`ServiceLayout`].
#[derive(Debug)]
pub(crate) struct Regions<'b> {
    pub(crate) probes: &'b mut [u8],
    pub(crate) metadata: &'b mut [u8],
    pub(crate) datapoints: &'b mut [u8],
}

impl ServiceLayout {
    /// Calculates the layout for a service with the given sizing.
    ///
    /// # Panics
    ///
    /// Panics if the resulting layout would exceed the size of virtual memory.
    #[must_use]
    pub fn new(max_probes: NonZero<usize>, avg_data_count: NonZero<usize>) -> Self {
        let probe_blocks = blocks_needed::<ProbeEntry>(max_probes.get(), size_of::<ProbeEntry>());
        let probe_layout = Layout::array::<ProbeEntry>(probe_blocks)
            .expect("probe region cannot exceed virtual memory for any sensible probe count");

        let metadata_blocks = max_probes
            .get()
            .checked_mul(blocks_needed::<ProbeMetadata<'static>>(
                1,
                size_of::<ProbeMetadata<'static>>(),
            ))
            .expect("metadata region cannot exceed virtual memory for any sensible probe count");
        let metadata_layout = Layout::array::<ProbeMetadata<'static>>(metadata_blocks)
            .expect("metadata region cannot exceed virtual memory for any sensible probe count");

        let datapoint_blocks =
            blocks_needed::<Datapoint>(avg_data_count.get(), size_of::<Datapoint>())
                .checked_mul(max_probes.get())
                .expect("datapoint region cannot exceed virtual memory for any sensible sizing");
        let datapoint_layout = Layout::array::<Datapoint>(datapoint_blocks)
            .expect("datapoint region cannot exceed virtual memory for any sensible sizing");

        let (layout, metadata_offset) = probe_layout
            .extend(metadata_layout)
            .expect("layout extension cannot fail for regions that fit in virtual memory");
        let (layout, datapoint_offset) = layout
            .extend(datapoint_layout)
            .expect("layout extension cannot fail for regions that fit in virtual memory");

        Self {
            max_probes,
            avg_data_count,
            layout: layout.pad_to_align(),
            probes: 0..probe_layout.size(),
            // Cannot overflow because extend() succeeded with these sizes.
            metadata: metadata_offset..metadata_offset.wrapping_add(metadata_layout.size()),
            datapoints: datapoint_offset..datapoint_offset.wrapping_add(datapoint_layout.size()),
        }
    }

    /// Number of probes the layout has room for.
    #[must_use]
    pub fn max_probes(&self) -> NonZero<usize> {
        self.max_probes
    }

    /// Datapoints per probe the datapoint region is sized for, on average.
    #[must_use]
    pub fn avg_data_count(&self) -> NonZero<usize> {
        self.avg_data_count
    }

    /// Size and alignment of the compound region.
    #[must_use]
    pub fn layout(&self) -> Layout {
        self.layout
    }

    /// Size of a buffer that fits the compound region whatever its start address.
    #[must_use]
    pub fn required_buffer_size(&self) -> usize {
        // Worst case, the first layout.align() - 1 bytes are skipped to reach alignment.
        self.layout
            .size()
            .saturating_add(self.layout.align().wrapping_sub(1))
    }

    /// Number of blocks in each region, in the order probes, metadata, datapoints.
    #[must_use]
    pub fn region_blocks(&self) -> (usize, usize, usize) {
        (
            self.probes.len() / size_of::<ProbeEntry>(),
            self.metadata.len() / size_of::<ProbeMetadata<'static>>(),
            self.datapoints.len() / size_of::<Datapoint>(),
        )
    }

    /// Slices the aligned compound region out of `buffer` and splits it into the regions.
    pub(crate) fn split<'b>(&self, buffer: &'b mut [u8]) -> Result<Regions<'b>> {
        let available = buffer.len();
        let too_small = || Error::BufferTooSmall {
            required: self.required_buffer_size(),
            available,
        };

        let offset = buffer.as_ptr().align_offset(self.layout.align());

        let region = buffer
            .get_mut(offset..)
            .and_then(|aligned| aligned.get_mut(..self.layout.size()))
            .ok_or_else(too_small)?;

        // The ranges are ordered, non-overlapping and inside the layout, so they can be split off
        // one after the other. Padding between regions stays with the preceding region.
        let (probes, rest) = region.split_at_mut(self.metadata.start);
        let (metadata, rest) =
            rest.split_at_mut(self.datapoints.start.wrapping_sub(self.metadata.start));
        let (datapoints, _) = rest.split_at_mut(self.datapoints.len());

        Ok(Regions {
            probes,
            metadata,
            datapoints,
        })
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
#[allow(
    clippy::indexing_slicing,
    reason = "test code doesn't need the same safety rigor as production code"
)]
mod tests {
    use new_zealand::nz;

    use super::*;

    #[test]
    fn regions_are_aligned_and_ordered() {
        let layout = ServiceLayout::new(nz!(4), nz!(8));

        assert_eq!(layout.probes.start, 0);
        assert!(layout.probes.end <= layout.metadata.start);
        assert!(layout.metadata.end <= layout.datapoints.start);
        assert!(layout.datapoints.end <= layout.layout.size());

        assert_eq!(layout.metadata.start % align_of::<ProbeMetadata<'static>>(), 0);
        assert_eq!(layout.datapoints.start % align_of::<Datapoint>(), 0);
        assert_eq!(layout.layout.size() % layout.layout.align(), 0);
    }

    #[test]
    fn region_blocks_cover_padded_allocations() {
        let layout = ServiceLayout::new(nz!(4), nz!(8));
        let (probes, metadata, datapoints) = layout.region_blocks();

        assert_eq!(
            probes,
            blocks_needed::<ProbeEntry>(4, size_of::<ProbeEntry>())
        );
        assert_eq!(
            metadata,
            4 * blocks_needed::<ProbeMetadata<'static>>(1, size_of::<ProbeMetadata<'static>>())
        );
        assert_eq!(datapoints, 4 * 9);
    }

    #[test]
    fn required_size_includes_alignment_slack() {
        let layout = ServiceLayout::new(nz!(2), nz!(2));

        assert_eq!(
            layout.required_buffer_size(),
            layout.layout().size() + layout.layout().align() - 1
        );
    }

    #[test]
    fn split_fits_any_start_offset_within_required_size() {
        let layout = ServiceLayout::new(nz!(2), nz!(4));
        let mut buffer = vec![0_u8; layout.required_buffer_size() + layout.layout().align()];

        for skip in 0..layout.layout().align() {
            let end = skip + layout.required_buffer_size();
            let regions = layout.split(&mut buffer[skip..end]).unwrap();

            assert_eq!(regions.datapoints.len(), layout.datapoints.len());
            assert_eq!(
                regions.probes.as_ptr().addr() % layout.layout().align(),
                0
            );
        }
    }

    #[test]
    fn split_rejects_short_buffer() {
        let layout = ServiceLayout::new(nz!(2), nz!(4));
        let mut buffer = vec![0_u8; 16];

        assert_eq!(
            layout.split(&mut buffer).unwrap_err(),
            Error::BufferTooSmall {
                required: layout.required_buffer_size(),
                available: 16,
            }
        );
    }
}
