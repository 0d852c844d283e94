use std::cell::Cell;
use std::marker::PhantomData;
use std::num::NonZero;

use new_zealand::nz;

use crate::{ProbeService, Result, ServiceLayout};

const DEFAULT_MAX_PROBES: NonZero<usize> = nz!(512);
const DEFAULT_AVG_DATA_COUNT: NonZero<usize> = nz!(128);

/// Builder for creating an instance of [`ProbeService`].
///
/// The sizing settings determine the [`ServiceLayout`], which in turn determines how large a
/// buffer the service needs. Inspect [`layout()`][Self::layout] to size the buffer before
/// building.
///
/// # Examples
///
/// ```
/// use new_zealand::nz;
/// use probes::ProbeService;
///
/// let builder = ProbeService::builder()
///     .max_probes(nz!(16))
///     .avg_data_count(nz!(32));
///
/// let mut buffer = vec![0_u8; builder.layout().required_buffer_size()];
/// let service = builder.build(&mut buffer).unwrap();
///
/// assert_eq!(service.max_probes(), 16);
/// ```
///
/// # Thread safety
///
/// The builder is thread-mobile ([`Send`]) but not thread-safe ([`Sync`]).
#[derive(Debug)]
#[must_use]
pub struct ProbeServiceBuilder {
    max_probes: NonZero<usize>,
    avg_data_count: NonZero<usize>,

    // Prevents Sync while allowing Send - builders are thread-mobile but not thread-safe
    _not_sync: PhantomData<Cell<()>>,
}

impl ProbeServiceBuilder {
    pub(crate) fn new() -> Self {
        Self {
            max_probes: DEFAULT_MAX_PROBES,
            avg_data_count: DEFAULT_AVG_DATA_COUNT,
            _not_sync: PhantomData,
        }
    }

    /// Sets the maximum number of probes. Defaults to 512.
    pub fn max_probes(mut self, max_probes: NonZero<usize>) -> Self {
        self.max_probes = max_probes;
        self
    }

    /// Sets the number of datapoints per probe to reserve arena space for. Defaults to 128.
    ///
    /// Each probe reserves this many datapoints when it is added. A probe can grow past it
    /// while the datapoint arena has a free run large enough for the grown history.
    pub fn avg_data_count(mut self, avg_data_count: NonZero<usize>) -> Self {
        self.avg_data_count = avg_data_count;
        self
    }

    /// The layout a service built with the current settings places in its buffer.
    #[must_use]
    pub fn layout(&self) -> ServiceLayout {
        ServiceLayout::new(self.max_probes, self.avg_data_count)
    }

    /// Builds the service inside `buffer`.
    ///
    /// The buffer does not need any particular alignment. Its contents are overwritten as the
    /// service is used.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BufferTooSmall`][crate::Error::BufferTooSmall] if the aligned layout
    /// does not fit into `buffer`.
    pub fn build(self, buffer: &mut [u8]) -> Result<ProbeService<'_>> {
        ProbeService::new_in(self.layout(), buffer)
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::fmt::Debug;

    use static_assertions::{assert_impl_all, assert_not_impl_any};

    use super::*;
    use crate::Error;

    assert_impl_all!(ProbeServiceBuilder: Send, Debug);
    assert_not_impl_any!(ProbeServiceBuilder: Sync);

    #[test]
    fn defaults_match_reference_sizing() {
        let layout = ProbeServiceBuilder::new().layout();

        assert_eq!(layout.max_probes().get(), 512);
        assert_eq!(layout.avg_data_count().get(), 128);
    }

    #[test]
    fn settings_flow_into_layout() {
        let layout = ProbeServiceBuilder::new()
            .max_probes(nz!(3))
            .avg_data_count(nz!(5))
            .layout();

        assert_eq!(layout, ServiceLayout::new(nz!(3), nz!(5)));
    }

    #[test]
    fn build_rejects_short_buffer() {
        let builder = ProbeServiceBuilder::new().max_probes(nz!(2));
        let required = builder.layout().required_buffer_size();
        let mut buffer = vec![0_u8; required - 1];

        // The allocation may happen to be aligned, in which case it is not too small after all.
        let aligned = buffer.as_ptr().align_offset(builder.layout().layout().align()) == 0;

        match builder.build(&mut buffer) {
            Ok(_) => assert!(aligned),
            Err(error) => assert_eq!(
                error,
                Error::BufferTooSmall {
                    required,
                    available: required - 1,
                }
            ),
        }
    }

    #[test]
    fn build_rejects_empty_buffer() {
        let builder = ProbeServiceBuilder::new().max_probes(nz!(2));

        assert!(matches!(
            builder.build(&mut []),
            Err(Error::BufferTooSmall { available: 0, .. })
        ));
    }
}
