//! I/Q samples as delivered by the RTL2832U.
//!
//! The dongle outputs interleaved unsigned 8-bit pairs `[I0, Q0, I1, Q1, ...]`
//! with 127.5 as the zero point. Samples keep the raw byte values; use
//! [`IqSample::to_complex`] for a normalised view.

use num_complex::Complex;

/// One raw in-phase/quadrature pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct IqSample {
    /// In-phase component, 0..=255
    pub i: i16,
    /// Quadrature component, 0..=255
    pub q: i16,
}

impl IqSample {
    pub const fn new(i: i16, q: i16) -> Self {
        Self { i, q }
    }

    /// Build a sample from one raw byte pair.
    #[inline]
    pub const fn from_bytes(i: u8, q: u8) -> Self {
        Self {
            i: i as i16,
            q: q as i16,
        }
    }

    /// Normalise to `[-1.0, 1.0]`.
    #[inline]
    pub fn to_complex(self) -> Complex<f32> {
        Complex::new(normalize(self.i), normalize(self.q))
    }
}

impl From<IqSample> for Complex<f32> {
    fn from(sample: IqSample) -> Self {
        sample.to_complex()
    }
}

#[inline]
fn normalize(raw: i16) -> f32 {
    (raw as f32 - 127.5) / 127.5
}

/// Number of complete samples in a raw buffer of `byte_len` bytes.
#[inline]
pub const fn sample_count(byte_len: usize) -> usize {
    byte_len / 2
}

/// Decode consecutive byte pairs into samples, in order. A trailing odd byte
/// is ignored.
pub fn decode(raw: &[u8]) -> impl ExactSizeIterator<Item = IqSample> + '_ {
    raw.chunks_exact(2)
        .map(|pair| IqSample::from_bytes(pair[0], pair[1]))
}

/// Decode a raw buffer into a new vector.
pub fn decode_to_vec(raw: &[u8]) -> Vec<IqSample> {
    decode(raw).collect()
}
