//! Last-set values for parameters librtlsdr cannot read back.

use crate::tuner::GainMode;

/// Parameters without a native getter.
///
/// Starts from the state `rtlsdr_open` leaves the device in and is updated
/// only after the corresponding native setter succeeded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterCache {
    pub gain_mode: GainMode,
    pub agc_mode: bool,
    pub test_mode: bool,
    /// Tuner IF bandwidth in Hz, 0 = automatic
    pub bandwidth: u32,
}

impl Default for ParameterCache {
    fn default() -> Self {
        Self {
            gain_mode: GainMode::Auto,
            agc_mode: false,
            test_mode: false,
            bandwidth: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_fresh_device() {
        let cache = ParameterCache::default();
        assert_eq!(cache.gain_mode, GainMode::Auto);
        assert!(!cache.agc_mode);
        assert!(!cache.test_mode);
        assert_eq!(cache.bandwidth, 0);
    }
}
