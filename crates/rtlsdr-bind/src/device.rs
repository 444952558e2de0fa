//! An open, named RTL-SDR and everything that can be done with it.

use std::sync::Arc;

use crate::async_reader::AsyncReader;
use crate::config::AcquisitionConfig;
use crate::error::{check, RtlSdrError, RtlSdrResult};
use crate::ffi::{RtlSdrApi, RtlSdrDev, FREQ_CORRECTION_UNCHANGED};
use crate::handle::DeviceHandle;
use crate::params::ParameterCache;
use crate::sample::IqSample;
use crate::sync_reader::SyncReader;
use crate::tuner::{
    nearest_gain, validate_gpio, validate_sample_rate, validate_xtal_freq, DirectSampling,
    GainMode, TunerType,
};

/// A device opened through [`DeviceManager`](crate::DeviceManager).
///
/// Owns the native handle and the acquisition engine bound to it. On close the
/// engine is stopped and joined before the handle is released.
pub struct ManagedDevice {
    name: String,
    handle: Arc<DeviceHandle>,
    reader: AsyncReader,
    sync: Option<SyncReader>,
    params: ParameterCache,
    closed: bool,
}

impl ManagedDevice {
    pub(crate) fn open(
        api: Arc<dyn RtlSdrApi>,
        index: u32,
        name: &str,
        config: &AcquisitionConfig,
    ) -> RtlSdrResult<Self> {
        let handle = Arc::new(DeviceHandle::open(api, index)?);
        let reader = AsyncReader::new(handle.clone(), config);

        Ok(Self {
            name: name.to_string(),
            handle,
            reader,
            sync: None,
            params: ParameterCache::default(),
            closed: false,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn index(&self) -> u32 {
        self.handle.index()
    }

    fn dev(&self) -> RtlSdrResult<(&dyn RtlSdrApi, RtlSdrDev)> {
        let dev = self.handle.ptr()?;
        Ok((&**self.handle.api(), dev))
    }

    fn check(&self, op: &'static str, code: i32) -> RtlSdrResult<()> {
        check(op, code, self.index())
    }

    /// Tuner IC fitted to this dongle.
    pub fn tuner_type(&self) -> RtlSdrResult<TunerType> {
        let (api, dev) = self.dev()?;
        Ok(TunerType::from(api.get_tuner_type(dev)))
    }

    // ---- Frequency ----

    /// Tune to `freq_hz`, checked against the tuner's range unless direct
    /// sampling bypasses the tuner.
    pub fn set_center_frequency(&mut self, freq_hz: u32) -> RtlSdrResult<()> {
        if self.direct_sampling()? == DirectSampling::Disabled {
            self.tuner_type()?.validate_frequency(freq_hz)?;
        }
        let (api, dev) = self.dev()?;
        self.check("set_center_freq", api.set_center_freq(dev, freq_hz))?;
        tracing::debug!("Device {} tuned to {} Hz", self.name, freq_hz);
        Ok(())
    }

    pub fn center_frequency(&self) -> RtlSdrResult<u32> {
        let (api, dev) = self.dev()?;
        Ok(api.get_center_freq(dev))
    }

    pub fn set_frequency_correction(&mut self, ppm: i32) -> RtlSdrResult<()> {
        let (api, dev) = self.dev()?;
        match api.set_freq_correction(dev, ppm) {
            0 | FREQ_CORRECTION_UNCHANGED => {
                tracing::debug!("Device {} frequency correction {} ppm", self.name, ppm);
                Ok(())
            }
            code => Err(RtlSdrError::native("set_freq_correction", code, self.index())),
        }
    }

    pub fn frequency_correction(&self) -> RtlSdrResult<i32> {
        let (api, dev) = self.dev()?;
        Ok(api.get_freq_correction(dev))
    }

    // ---- Sampling ----

    pub fn set_sample_rate(&mut self, rate_hz: u32) -> RtlSdrResult<()> {
        validate_sample_rate(rate_hz)?;
        let (api, dev) = self.dev()?;
        self.check("set_sample_rate", api.set_sample_rate(dev, rate_hz))?;
        tracing::debug!("Device {} sample rate {} Hz", self.name, rate_hz);
        Ok(())
    }

    pub fn sample_rate(&self) -> RtlSdrResult<u32> {
        let (api, dev) = self.dev()?;
        Ok(api.get_sample_rate(dev))
    }

    /// Set the RTL2832 and tuner reference frequencies. Only needed for
    /// dongles with a non-standard crystal.
    pub fn set_xtal_frequencies(&mut self, rtl_hz: u32, tuner_hz: u32) -> RtlSdrResult<()> {
        validate_xtal_freq(rtl_hz)?;
        validate_xtal_freq(tuner_hz)?;
        let (api, dev) = self.dev()?;
        self.check("set_xtal_freq", api.set_xtal_freq(dev, rtl_hz, tuner_hz))
    }

    /// `(rtl_hz, tuner_hz)`
    pub fn xtal_frequencies(&self) -> RtlSdrResult<(u32, u32)> {
        let (api, dev) = self.dev()?;
        api.get_xtal_freq(dev)
            .map_err(|code| RtlSdrError::native("get_xtal_freq", code, self.index()))
    }

    pub fn set_direct_sampling(&mut self, mode: DirectSampling) -> RtlSdrResult<()> {
        let (api, dev) = self.dev()?;
        self.check("set_direct_sampling", api.set_direct_sampling(dev, mode.code()))?;
        tracing::debug!("Device {} direct sampling {:?}", self.name, mode);
        Ok(())
    }

    pub fn direct_sampling(&self) -> RtlSdrResult<DirectSampling> {
        let (api, dev) = self.dev()?;
        let code = api.get_direct_sampling(dev);
        DirectSampling::from_code(code)
            .ok_or_else(|| RtlSdrError::native("get_direct_sampling", code, self.index()))
    }

    pub fn set_offset_tuning(&mut self, on: bool) -> RtlSdrResult<()> {
        let (api, dev) = self.dev()?;
        self.check("set_offset_tuning", api.set_offset_tuning(dev, on as i32))
    }

    pub fn offset_tuning(&self) -> RtlSdrResult<bool> {
        let (api, dev) = self.dev()?;
        match api.get_offset_tuning(dev) {
            0 => Ok(false),
            1 => Ok(true),
            code => Err(RtlSdrError::native("get_offset_tuning", code, self.index())),
        }
    }

    /// IF bandwidth in Hz, 0 lets the driver pick from the sample rate.
    pub fn set_tuner_bandwidth(&mut self, bw_hz: u32) -> RtlSdrResult<()> {
        let (api, dev) = self.dev()?;
        self.check("set_tuner_bandwidth", api.set_tuner_bandwidth(dev, bw_hz))?;
        self.params.bandwidth = bw_hz;
        Ok(())
    }

    pub fn tuner_bandwidth(&self) -> u32 {
        self.params.bandwidth
    }

    /// Replace samples with an 8-bit counter from the RTL2832.
    pub fn set_test_mode(&mut self, on: bool) -> RtlSdrResult<()> {
        let (api, dev) = self.dev()?;
        self.check("set_testmode", api.set_testmode(dev, on as i32))?;
        self.params.test_mode = on;
        Ok(())
    }

    pub fn test_mode(&self) -> bool {
        self.params.test_mode
    }

    // ---- Gain ----

    /// Supported gains in tenths of a dB, ascending.
    pub fn tuner_gains(&self) -> RtlSdrResult<Vec<i32>> {
        let (api, dev) = self.dev()?;
        Ok(api.get_tuner_gains(dev))
    }

    /// Set the tuner gain in tenths of a dB, snapped to the nearest supported
    /// step. Returns the value applied.
    pub fn set_tuner_gain(&mut self, tenth_db: i32) -> RtlSdrResult<i32> {
        let gain = nearest_gain(&self.tuner_gains()?, tenth_db)?;
        let (api, dev) = self.dev()?;
        self.check("set_tuner_gain", api.set_tuner_gain(dev, gain))?;
        tracing::debug!("Device {} gain {} dB", self.name, gain as f64 / 10.0);
        Ok(gain)
    }

    pub fn tuner_gain(&self) -> RtlSdrResult<i32> {
        let (api, dev) = self.dev()?;
        Ok(api.get_tuner_gain(dev))
    }

    pub fn set_gain_mode(&mut self, mode: GainMode) -> RtlSdrResult<()> {
        let (api, dev) = self.dev()?;
        self.check("set_tuner_gain_mode", api.set_tuner_gain_mode(dev, mode.code()))?;
        self.params.gain_mode = mode;
        Ok(())
    }

    pub fn gain_mode(&self) -> GainMode {
        self.params.gain_mode
    }

    /// RTL2832 digital AGC, independent of the tuner gain mode.
    pub fn set_agc_mode(&mut self, on: bool) -> RtlSdrResult<()> {
        let (api, dev) = self.dev()?;
        self.check("set_agc_mode", api.set_agc_mode(dev, on as i32))?;
        self.params.agc_mode = on;
        Ok(())
    }

    pub fn agc_mode(&self) -> bool {
        self.params.agc_mode
    }

    pub fn params(&self) -> &ParameterCache {
        &self.params
    }

    // ---- GPIO ----

    /// Bias tee on the default pin (GPIO 0).
    pub fn set_bias_tee(&mut self, on: bool) -> RtlSdrResult<()> {
        let (api, dev) = self.dev()?;
        self.check("set_bias_tee", api.set_bias_tee(dev, on as i32))?;
        tracing::debug!("Device {} bias tee {}", self.name, if on { "on" } else { "off" });
        Ok(())
    }

    pub fn set_bias_tee_gpio(&mut self, gpio: i32, on: bool) -> RtlSdrResult<()> {
        validate_gpio(gpio)?;
        let (api, dev) = self.dev()?;
        let code = api
            .set_bias_tee_gpio(dev, gpio, on as i32)
            .ok_or_else(|| RtlSdrError::MissingSymbol("rtlsdr_set_bias_tee_gpio".to_string()))?;
        self.check("set_bias_tee_gpio", code)
    }

    // ---- Acquisition ----

    /// Blocking read of `samples` samples.
    ///
    /// Refused while async acquisition is running, and for good once a worker
    /// has been abandoned, since it is still inside `read_async`.
    pub fn read_sync(&mut self, samples: usize) -> RtlSdrResult<Vec<IqSample>> {
        if self.reader.is_running() || self.reader.is_abandoned() {
            return Err(RtlSdrError::AlreadyRunning);
        }
        let reader = match self.sync.take() {
            Some(r) if r.samples() == samples => self.sync.insert(r),
            _ => self.sync.insert(SyncReader::new(samples)?),
        };
        reader.read(&self.handle)
    }

    /// Start callback-driven acquisition. See [`AsyncReader::start_async`].
    pub fn start_async(&mut self, samples_per_read: Option<u32>) -> RtlSdrResult<()> {
        self.reader.start_async(samples_per_read)?;
        // start_async flushed the FIFO; the next sync read must flush again.
        self.sync = None;
        Ok(())
    }

    pub fn async_reader(&self) -> &AsyncReader {
        &self.reader
    }

    pub fn async_reader_mut(&mut self) -> &mut AsyncReader {
        &mut self.reader
    }

    /// Stop acquisition and close the device.
    pub fn close(mut self) -> RtlSdrResult<()> {
        self.teardown()
    }

    fn teardown(&mut self) -> RtlSdrResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        let stopped = self.reader.shutdown();
        let released = if self.reader.is_abandoned() {
            self.handle.leak();
            Ok(())
        } else {
            self.handle.release()
        };

        tracing::info!("Closed device {} (#{})", self.name, self.index());
        stopped.and(released)
    }
}

impl Drop for ManagedDevice {
    fn drop(&mut self) {
        if let Err(e) = self.teardown() {
            tracing::error!("Closing device {}: {}", self.name, e);
        }
    }
}

impl std::fmt::Debug for ManagedDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagedDevice")
            .field("name", &self.name)
            .field("handle", &self.handle)
            .field("reader", &self.reader)
            .field("params", &self.params)
            .finish()
    }
}
