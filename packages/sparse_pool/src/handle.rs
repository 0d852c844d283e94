/// An opaque reference to a value stored in a [`SparsePool`][crate::SparsePool].
///
/// A handle stays valid across any number of additions and removals of *other* values. Once its
/// own value is removed, the handle is stale: the pool rejects it even after the same key slot
/// has been reused for a new value, because every reuse of a slot bumps its generation.
///
/// Generations are 32 bits wide. A slot whose generation reaches `u32::MAX` is retired instead
/// of wrapping around, so a stale handle is never accepted again. Each retirement reduces the
/// pool's usable capacity by one, which takes about four billion removals from the same slot.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct Handle {
    key_index: usize,
    generation: u32,
}

impl Handle {
    #[must_use]
    pub(crate) fn new(key_index: usize, generation: u32) -> Self {
        Self {
            key_index,
            generation,
        }
    }

    /// Index of the key slot this handle resolves through.
    #[must_use]
    pub(crate) fn key_index(self) -> usize {
        self.key_index
    }

    #[must_use]
    pub(crate) fn generation(self) -> u32 {
        self.generation
    }
}

/// A key table entry: where the value for this key lives in dense storage, if anywhere.
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct KeySlot {
    pub(crate) dense_index: Option<usize>,
    pub(crate) generation: u32,
}

impl KeySlot {
    const RETIRED: u32 = u32::MAX;

    /// Clears the slot and advances its generation so that handles to it become stale.
    ///
    /// The generation saturates at the retired marker.
    pub(crate) fn vacate(&mut self) {
        self.dense_index = None;
        self.generation = self.generation.saturating_add(1);
    }

    /// Whether a new value can be placed through this slot.
    pub(crate) fn is_available(&self) -> bool {
        self.dense_index.is_none() && self.generation != Self::RETIRED
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use static_assertions::assert_impl_all;

    use super::*;

    assert_impl_all!(Handle: Send, Sync, Copy);

    #[test]
    fn vacate_bumps_generation() {
        let mut slot = KeySlot {
            dense_index: Some(3),
            generation: 7,
        };

        slot.vacate();

        assert_eq!(slot.dense_index, None);
        assert_eq!(slot.generation, 8);
    }

    #[test]
    fn vacate_retires_slot_at_last_generation() {
        let mut slot = KeySlot {
            dense_index: Some(0),
            generation: u32::MAX - 1,
        };

        slot.vacate();

        assert_eq!(slot.generation, u32::MAX);
        assert!(!slot.is_available());

        slot.vacate();

        assert_eq!(slot.generation, u32::MAX);
        assert!(!slot.is_available());
    }

    #[test]
    fn vacated_slot_is_available() {
        let mut slot = KeySlot {
            dense_index: Some(2),
            generation: 0,
        };
        assert!(!slot.is_available());

        slot.vacate();

        assert!(slot.is_available());
    }
}
