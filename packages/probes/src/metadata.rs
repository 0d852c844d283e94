/// Descriptive data attached to a probe, stored in the service's metadata sub-arena.
#[derive(Debug)]
pub struct ProbeMetadata<'a> {
    flags: u16,
    unit: &'a str,

    // Only the latest string value is retained. The buffer is reused across updates.
    last_string: Option<String>,
}

impl<'a> ProbeMetadata<'a> {
    pub(crate) fn new(flags: u16, unit: &'a str) -> Self {
        Self {
            flags,
            unit,
            last_string: None,
        }
    }

    /// Caller-defined flags supplied when the probe was added.
    #[must_use]
    pub fn flags(&self) -> u16 {
        self.flags
    }

    /// Unit of the probe's values, for display.
    #[must_use]
    pub fn unit(&self) -> &'a str {
        self.unit
    }

    /// The most recent string value submitted to the probe, if any.
    #[must_use]
    pub fn last_string(&self) -> Option<&str> {
        self.last_string.as_deref()
    }

    /// Stores `value` as the latest string unless it equals the current one.
    ///
    /// Returns whether the stored value changed.
    pub(crate) fn replace_last_string(&mut self, value: &str) -> bool {
        if let Some(current) = &mut self.last_string {
            if current.as_str() == value {
                return false;
            }

            current.clear();
            current.push_str(value);
        } else {
            self.last_string = Some(value.to_owned());
        }

        true
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn first_string_is_stored() {
        let mut metadata = ProbeMetadata::new(0, "state");

        assert!(metadata.replace_last_string("idle"));
        assert_eq!(metadata.last_string(), Some("idle"));
    }

    #[test]
    fn repeated_string_is_ignored() {
        let mut metadata = ProbeMetadata::new(0, "state");

        assert!(metadata.replace_last_string("idle"));
        assert!(!metadata.replace_last_string("idle"));
        assert!(metadata.replace_last_string("running"));
        assert!(!metadata.replace_last_string("running"));
        assert_eq!(metadata.last_string(), Some("running"));
    }

    #[test]
    fn replacement_reuses_buffer_when_it_fits() {
        let mut metadata = ProbeMetadata::new(0, "state");
        metadata.replace_last_string("running");

        let before = metadata.last_string().map(str::as_ptr);
        metadata.replace_last_string("idle");

        assert_eq!(metadata.last_string().map(str::as_ptr), before);
    }

    #[test]
    fn accessors_return_description() {
        let metadata = ProbeMetadata::new(0b101, "ms");

        assert_eq!(metadata.flags(), 0b101);
        assert_eq!(metadata.unit(), "ms");
        assert_eq!(metadata.last_string(), None);
    }
}
