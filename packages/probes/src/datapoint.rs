use std::cmp::Ordering;
use std::time::Instant;

/// One timestamped sample recorded into a probe.
///
/// Equality and ordering compare the sampled value only. A probe stores its datapoints in
/// timestamp order and uses value equality to skip samples that repeat the latest value.
#[derive(Clone, Copy, Debug)]
pub struct Datapoint {
    timestamp: Instant,
    value: i64,
}

impl Datapoint {
    /// Creates a datapoint captured at `timestamp`.
    #[must_use]
    pub fn new(timestamp: Instant, value: i64) -> Self {
        Self { timestamp, value }
    }

    /// Creates a datapoint captured now.
    #[must_use]
    pub fn now(value: i64) -> Self {
        Self::new(Instant::now(), value)
    }

    /// When the sample was captured.
    #[must_use]
    pub fn timestamp(&self) -> Instant {
        self.timestamp
    }

    /// The sampled value.
    #[must_use]
    pub fn value(&self) -> i64 {
        self.value
    }
}

impl PartialEq for Datapoint {
    fn eq(&self, other: &Self) -> bool {
        self.value == other.value
    }
}

impl Eq for Datapoint {}

impl PartialOrd for Datapoint {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Datapoint {
    fn cmp(&self, other: &Self) -> Ordering {
        self.value.cmp(&other.value)
    }
}
