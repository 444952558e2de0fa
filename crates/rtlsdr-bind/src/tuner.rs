//! Tuner models and parameter validation.
//!
//! ## Supported Tuners
//!
//! - E4000: 52-2200 MHz (with gap at 1100-1250 MHz)
//! - FC0012: 22-948.6 MHz
//! - FC0013: 22-1100 MHz
//! - FC2580: 146-308 MHz, 438-924 MHz
//! - R820T/R820T2/R828D: 24-1766 MHz (most common)

use std::ops::RangeInclusive;

use crate::error::{RtlSdrError, RtlSdrResult};

/// Valid sample rate windows of the RTL2832U resampler (Hz).
pub const SAMPLE_RATE_RANGES: [RangeInclusive<u32>; 2] = [225_001..=300_000, 900_001..=3_200_000];

/// Highest crystal frequency the RTL2832U and tuners accept (Hz).
pub const MAX_XTAL_FREQ: u32 = 28_800_000;

/// Highest GPIO pin on the RTL2832U.
pub const MAX_GPIO_PIN: i32 = 7;

/// Tuner IC fitted to the dongle, as reported by `rtlsdr_get_tuner_type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TunerType {
    Unknown,
    E4000,
    Fc0012,
    Fc0013,
    Fc2580,
    R820T,
    R828D,
}

impl From<i32> for TunerType {
    fn from(code: i32) -> Self {
        match code {
            1 => TunerType::E4000,
            2 => TunerType::Fc0012,
            3 => TunerType::Fc0013,
            4 => TunerType::Fc2580,
            5 => TunerType::R820T,
            6 => TunerType::R828D,
            _ => TunerType::Unknown,
        }
    }
}

impl TunerType {
    /// Tunable frequency windows in Hz, inclusive. Empty for unknown tuners.
    pub fn frequency_ranges(self) -> &'static [RangeInclusive<u32>] {
        const E4000: [RangeInclusive<u32>; 2] =
            [52_000_000..=1_100_000_000, 1_250_000_000..=2_200_000_000];
        const FC0012: [RangeInclusive<u32>; 1] = [22_000_000..=948_600_000];
        const FC0013: [RangeInclusive<u32>; 1] = [22_000_000..=1_100_000_000];
        const FC2580: [RangeInclusive<u32>; 2] =
            [146_000_000..=308_000_000, 438_000_000..=924_000_000];
        const R82XX: [RangeInclusive<u32>; 1] = [24_000_000..=1_766_000_000];

        match self {
            TunerType::E4000 => &E4000,
            TunerType::Fc0012 => &FC0012,
            TunerType::Fc0013 => &FC0013,
            TunerType::Fc2580 => &FC2580,
            TunerType::R820T | TunerType::R828D => &R82XX,
            TunerType::Unknown => &[],
        }
    }

    /// Check a center frequency against this tuner's windows.
    ///
    /// Unknown tuners are not checked; the driver gets the final word.
    pub fn validate_frequency(self, freq_hz: u32) -> RtlSdrResult<()> {
        let ranges = self.frequency_ranges();
        if ranges.is_empty() || ranges.iter().any(|r| r.contains(&freq_hz)) {
            return Ok(());
        }
        Err(RtlSdrError::InvalidArgument(format!(
            "frequency {} Hz outside {} range {}",
            freq_hz,
            self,
            describe(ranges)
        )))
    }
}

impl std::fmt::Display for TunerType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TunerType::Unknown => "unknown",
            TunerType::E4000 => "E4000",
            TunerType::Fc0012 => "FC0012",
            TunerType::Fc0013 => "FC0013",
            TunerType::Fc2580 => "FC2580",
            TunerType::R820T => "R820T",
            TunerType::R828D => "R828D",
        };
        f.write_str(name)
    }
}

/// Tuner gain control mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GainMode {
    /// Tuner AGC
    #[default]
    Auto,
    /// Gain set via `set_tuner_gain`
    Manual,
}

impl GainMode {
    pub(crate) fn code(self) -> i32 {
        match self {
            GainMode::Auto => 0,
            GainMode::Manual => 1,
        }
    }
}

/// Direct sampling mode, bypassing the tuner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DirectSampling {
    #[default]
    Disabled,
    /// Sample the I branch ADC
    IAdc,
    /// Sample the Q branch ADC
    QAdc,
}

impl DirectSampling {
    pub(crate) fn code(self) -> i32 {
        match self {
            DirectSampling::Disabled => 0,
            DirectSampling::IAdc => 1,
            DirectSampling::QAdc => 2,
        }
    }

    pub(crate) fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(DirectSampling::Disabled),
            1 => Some(DirectSampling::IAdc),
            2 => Some(DirectSampling::QAdc),
            _ => None,
        }
    }
}

/// Check a sample rate against the resampler windows.
pub fn validate_sample_rate(rate_hz: u32) -> RtlSdrResult<()> {
    if SAMPLE_RATE_RANGES.iter().any(|r| r.contains(&rate_hz)) {
        Ok(())
    } else {
        Err(RtlSdrError::InvalidArgument(format!(
            "sample rate {} Hz outside {}",
            rate_hz,
            describe(&SAMPLE_RATE_RANGES)
        )))
    }
}

/// Check a crystal frequency.
pub fn validate_xtal_freq(freq_hz: u32) -> RtlSdrResult<()> {
    if freq_hz > MAX_XTAL_FREQ {
        return Err(RtlSdrError::InvalidArgument(format!(
            "crystal frequency {} Hz above {} Hz",
            freq_hz, MAX_XTAL_FREQ
        )));
    }
    Ok(())
}

/// Check a GPIO pin number.
pub fn validate_gpio(pin: i32) -> RtlSdrResult<()> {
    if !(0..=MAX_GPIO_PIN).contains(&pin) {
        return Err(RtlSdrError::InvalidArgument(format!(
            "GPIO pin {} outside 0..={}",
            pin, MAX_GPIO_PIN
        )));
    }
    Ok(())
}

/// Pick the supported gain closest to `requested`, rejecting values outside
/// the tuner's span. An empty table accepts anything unchanged.
pub fn nearest_gain(gains: &[i32], requested: i32) -> RtlSdrResult<i32> {
    let (Some(&min), Some(&max)) = (gains.iter().min(), gains.iter().max()) else {
        return Ok(requested);
    };

    if requested < min || requested > max {
        return Err(RtlSdrError::InvalidArgument(format!(
            "gain {} tenths of dB outside {}..={}",
            requested, min, max
        )));
    }

    Ok(gains
        .iter()
        .copied()
        .min_by_key(|g| (g - requested).abs())
        .unwrap_or(requested))
}

fn describe(ranges: &[RangeInclusive<u32>]) -> String {
    ranges
        .iter()
        .map(|r| format!("{}..={}", r.start(), r.end()))
        .collect::<Vec<_>>()
        .join(", ")
}
