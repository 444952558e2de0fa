//! Blocking one-shot reads through `rtlsdr_read_sync`.

use crate::error::{check, RtlSdrError, RtlSdrResult};
use crate::ffi::READ_OVERFLOW;
use crate::handle::DeviceHandle;
use crate::sample::{self, IqSample};

/// `read_sync` lengths must be a multiple of the USB transfer size.
const SYNC_ALIGN: usize = 512;

/// Reusable buffer for synchronous reads of a fixed sample count.
#[derive(Debug)]
pub(crate) struct SyncReader {
    samples: usize,
    buf: Vec<u8>,
    primed: bool,
}

impl SyncReader {
    pub(crate) fn new(samples: usize) -> RtlSdrResult<Self> {
        if samples == 0 {
            return Err(RtlSdrError::InvalidArgument(
                "sample count must be > 0".to_string(),
            ));
        }
        let bytes = samples
            .checked_mul(2)
            .and_then(|b| b.checked_next_multiple_of(SYNC_ALIGN))
            .filter(|&b| b <= i32::MAX as usize)
            .ok_or_else(|| {
                RtlSdrError::InvalidArgument(format!("{} samples is too large", samples))
            })?;

        Ok(Self {
            samples,
            buf: vec![0u8; bytes],
            primed: false,
        })
    }

    pub(crate) fn samples(&self) -> usize {
        self.samples
    }

    /// Read one buffer and decode up to the requested number of samples.
    ///
    /// The driver's FIFO is flushed before the first read so stale samples
    /// from before the device was tuned are not returned.
    pub(crate) fn read(&mut self, handle: &DeviceHandle) -> RtlSdrResult<Vec<IqSample>> {
        let index = handle.index();
        let dev = handle.ptr()?;
        let api = handle.api();

        if !self.primed {
            check("reset_buffer", api.reset_buffer(dev), index)?;
            self.primed = true;
        }

        let (ret, n_read) = api.read_sync(dev, &mut self.buf);
        match ret {
            0 => {}
            READ_OVERFLOW => return Err(RtlSdrError::SyncOverflow(index)),
            code => return Err(RtlSdrError::native("read_sync", code, index)),
        }

        let n_read = n_read.min(self.buf.len());
        if n_read < self.buf.len() {
            tracing::debug!(
                "Short read on device #{}: {} of {} bytes",
                index,
                n_read,
                self.buf.len()
            );
        }

        Ok(sample::decode(&self.buf[..n_read])
            .take(self.samples)
            .collect())
    }
}
