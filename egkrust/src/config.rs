//! Reader configuration

use egkrust_core::constants::{DEFAULT_WAIT_SECONDS, MAX_SHORT_CHUNK};

/// Settings for a card read
///
/// # Examples
///
/// ```
/// use egkrust::ReaderConfig;
///
/// let config = ReaderConfig::default()
///     .with_extended_length(true)
///     .with_keep_raw_xml(false);
/// assert_eq!(config.chunk_size, 256);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReaderConfig {
    /// READ BINARY chunk size used until EF.ATR announces the card's own
    pub chunk_size: usize,

    /// Allow extended length READ BINARY when EF.ATR permits larger chunks
    pub extended_length: bool,

    /// Seconds the terminal waits for a card on REQUEST ICC
    pub request_wait: u8,

    /// Seconds the terminal waits for removal on EJECT ICC
    pub eject_wait: u8,

    /// Keep the decompressed PD and VD documents in the result
    pub keep_raw_xml: bool,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            chunk_size: MAX_SHORT_CHUNK,
            extended_length: false,
            request_wait: DEFAULT_WAIT_SECONDS,
            eject_wait: DEFAULT_WAIT_SECONDS,
            keep_raw_xml: true,
        }
    }
}

impl ReaderConfig {
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn with_extended_length(mut self, extended_length: bool) -> Self {
        self.extended_length = extended_length;
        self
    }

    pub fn with_request_wait(mut self, seconds: u8) -> Self {
        self.request_wait = seconds;
        self
    }

    pub fn with_eject_wait(mut self, seconds: u8) -> Self {
        self.eject_wait = seconds;
        self
    }

    pub fn with_keep_raw_xml(mut self, keep_raw_xml: bool) -> Self {
        self.keep_raw_xml = keep_raw_xml;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults() {
        let config = ReaderConfig::default();
        assert_eq!(config.chunk_size, 256);
        assert!(!config.extended_length);
        assert_eq!(config.request_wait, 5);
        assert_eq!(config.eject_wait, 5);
        assert!(config.keep_raw_xml);
    }

    #[test]
    fn test_zero_chunk_size_is_clamped() {
        assert_eq!(ReaderConfig::default().with_chunk_size(0).chunk_size, 1);
    }
}
