/// A value submitted to a probe.
///
/// Integers are recorded as timestamped datapoints. Strings only replace the probe's latest
/// string value and carry no history.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProbeValue<'v> {
    /// A numeric sample.
    Int(i64),

    /// A textual state.
    Str(&'v str),
}

impl From<i64> for ProbeValue<'_> {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl<'v> From<&'v str> for ProbeValue<'v> {
    fn from(value: &'v str) -> Self {
        Self::Str(value)
    }
}

/// Describes a probe to be added to a [`ProbeService`][crate::ProbeService].
///
/// The name and unit are borrowed for as long as the service lives.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ProbeDescription<'a> {
    /// Unique name used to submit values to the probe.
    pub name: &'a str,

    /// Unit of the probe's values, for display.
    pub unit: &'a str,

    /// Caller-defined flags stored with the probe.
    pub flags: u16,
}

impl<'a> ProbeDescription<'a> {
    /// Describes a probe with no flags set.
    #[must_use]
    pub fn new(name: &'a str, unit: &'a str) -> Self {
        Self {
            name,
            unit,
            flags: 0,
        }
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn conversions_pick_variant() {
        assert_eq!(ProbeValue::from(-4_i64), ProbeValue::Int(-4));
        assert_eq!(ProbeValue::from("idle"), ProbeValue::Str("idle"));
    }

    #[test]
    fn description_defaults_to_no_flags() {
        let description = ProbeDescription::new("GAIN", "dB");

        assert_eq!(description.flags, 0);
        assert_eq!(description.name, "GAIN");
        assert_eq!(description.unit, "dB");
    }
}
