//! Scripted stand-in for librtlsdr.
//!
//! Devices are fake pointers that are never dereferenced. `read_async` runs on
//! the engine's worker thread like the real driver does, pulling buffers from
//! a channel and feeding them through the real trampoline until cancelled.

use std::collections::HashMap;
use std::ffi::{c_void, CStr};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};

use crate::config::AcquisitionConfig;
use crate::ffi::{ReadAsyncCallback, RtlSdrApi, RtlSdrDev, UsbStrings, OPEN_BUSY, OPEN_NOT_FOUND};
use crate::rt::ThreadPriority;

const WAIT_LIMIT: Duration = Duration::from_secs(5);

/// Acquisition settings for tests: no real-time scheduling, short stop timeout.
pub(crate) fn test_config() -> AcquisitionConfig {
    AcquisitionConfig {
        worker_priority: ThreadPriority::Normal,
        stop_timeout_ms: Some(2_000),
        ..Default::default()
    }
}

/// Poll `cond` until it holds or five seconds pass.
pub(crate) fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + WAIT_LIMIT;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    cond()
}

/// Native-side state of one fake device.
#[derive(Debug, Clone, Default)]
pub(crate) struct MockDevice {
    pub open: bool,
    pub center_freq: u32,
    pub sample_rate: u32,
    pub xtal: (u32, u32),
    pub gain_mode: i32,
    pub gain: i32,
    pub agc: i32,
    pub freq_correction: i32,
    pub direct_sampling: i32,
    pub offset_tuning: i32,
    pub bandwidth: u32,
    pub testmode: i32,
    pub bias_tee: i32,
    pub bias_tee_gpio: Vec<(i32, i32)>,
    pub reset_calls: usize,
}

struct Script {
    device_count: u32,
    open_code: Option<i32>,
    close_code: i32,
    cancel_code: i32,
    read_async_code: i32,
    sync_code: i32,
    sync_data: Option<Vec<u8>>,
    tuner_type: i32,
    gains: Vec<i32>,
    gpio_supported: bool,
    last_read_async: Option<(u32, u32)>,
    devices: HashMap<u32, MockDevice>,
}

struct Inner {
    script: Mutex<Script>,
    tx: Sender<Vec<u8>>,
    rx: Receiver<Vec<u8>>,
    cancelled: AtomicBool,
    hang: AtomicBool,
    close_calls: AtomicUsize,
    cancel_calls: AtomicUsize,
    read_async_calls: AtomicUsize,
    read_async_returned: AtomicUsize,
    delivered: AtomicUsize,
    sync_reads: AtomicUsize,
}

/// Handle to a scripted driver; clones share state.
#[derive(Clone)]
pub(crate) struct MockDriver {
    inner: Arc<Inner>,
}

fn dev_ptr(index: u32) -> RtlSdrDev {
    ((index as usize + 1) << 4) as *mut c_void
}

fn dev_index(dev: RtlSdrDev) -> u32 {
    ((dev as usize >> 4) - 1) as u32
}

impl MockDriver {
    /// `count` R820T dongles with the usual 29-step gain table.
    pub(crate) fn with_devices(count: u32) -> Self {
        let (tx, rx) = channel::unbounded();
        let script = Script {
            device_count: count,
            open_code: None,
            close_code: 0,
            cancel_code: 0,
            read_async_code: 0,
            sync_code: 0,
            sync_data: None,
            tuner_type: 5,
            gains: vec![
                0, 9, 14, 27, 37, 77, 87, 125, 144, 157, 166, 197, 207, 229, 254, 280, 297,
                328, 338, 364, 372, 386, 402, 421, 434, 439, 445, 480, 496,
            ],
            gpio_supported: true,
            last_read_async: None,
            devices: HashMap::new(),
        };
        Self {
            inner: Arc::new(Inner {
                script: Mutex::new(script),
                tx,
                rx,
                cancelled: AtomicBool::new(false),
                hang: AtomicBool::new(false),
                close_calls: AtomicUsize::new(0),
                cancel_calls: AtomicUsize::new(0),
                read_async_calls: AtomicUsize::new(0),
                read_async_returned: AtomicUsize::new(0),
                delivered: AtomicUsize::new(0),
                sync_reads: AtomicUsize::new(0),
            }),
        }
    }

    pub(crate) fn api(&self) -> Arc<dyn RtlSdrApi> {
        self.inner.clone()
    }

    fn script(&self) -> std::sync::MutexGuard<'_, Script> {
        self.inner.script.lock().unwrap()
    }

    pub(crate) fn set_open_code(&self, code: i32) {
        self.script().open_code = Some(code);
    }

    pub(crate) fn set_close_code(&self, code: i32) {
        self.script().close_code = code;
    }

    pub(crate) fn set_cancel_code(&self, code: i32) {
        self.script().cancel_code = code;
    }

    pub(crate) fn set_read_async_code(&self, code: i32) {
        self.script().read_async_code = code;
    }

    pub(crate) fn set_sync_result(&self, code: i32, data: Option<Vec<u8>>) {
        let mut script = self.script();
        script.sync_code = code;
        script.sync_data = data;
    }

    pub(crate) fn set_tuner_type(&self, code: i32) {
        self.script().tuner_type = code;
    }

    pub(crate) fn set_gains(&self, gains: Vec<i32>) {
        self.script().gains = gains;
    }

    pub(crate) fn set_gpio_supported(&self, supported: bool) {
        self.script().gpio_supported = supported;
    }

    /// Ignore cancellation until cleared, like a wedged USB stack.
    pub(crate) fn set_hang(&self, hang: bool) {
        self.inner.hang.store(hang, Ordering::SeqCst);
    }

    /// Queue one buffer for the running `read_async` to deliver.
    pub(crate) fn push_buffer(&self, buf: Vec<u8>) {
        let _ = self.inner.tx.send(buf);
    }

    /// Wait until `n` buffers in total went through the callback.
    pub(crate) fn wait_delivered(&self, n: usize) -> bool {
        wait_until(|| self.inner.delivered.load(Ordering::SeqCst) >= n)
    }

    pub(crate) fn close_calls(&self) -> usize {
        self.inner.close_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn cancel_calls(&self) -> usize {
        self.inner.cancel_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn read_async_calls(&self) -> usize {
        self.inner.read_async_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn read_async_returned(&self) -> usize {
        self.inner.read_async_returned.load(Ordering::SeqCst)
    }

    pub(crate) fn sync_reads(&self) -> usize {
        self.inner.sync_reads.load(Ordering::SeqCst)
    }

    /// `(buf_num, buf_len)` of the latest `read_async` call.
    pub(crate) fn last_read_async_args(&self) -> Option<(u32, u32)> {
        self.script().last_read_async
    }

    pub(crate) fn device(&self, index: u32) -> MockDevice {
        self.script().devices.get(&index).cloned().unwrap_or_default()
    }
}

impl Inner {
    fn with_device<T>(&self, dev: RtlSdrDev, f: impl FnOnce(&mut MockDevice) -> T) -> T {
        let mut script = self.script.lock().unwrap();
        f(script.devices.entry(dev_index(dev)).or_default())
    }
}

impl RtlSdrApi for Inner {
    fn get_device_count(&self) -> u32 {
        self.script.lock().unwrap().device_count
    }

    fn get_device_name(&self, index: u32) -> Option<String> {
        (index < self.get_device_count()).then(|| "Generic RTL2832U OEM".to_string())
    }

    fn get_device_usb_strings(&self, index: u32) -> Option<UsbStrings> {
        (index < self.get_device_count()).then(|| UsbStrings {
            manufacturer: "Realtek".to_string(),
            product: "RTL2838UHIDIR".to_string(),
            serial: format!("{:08}", index + 1),
        })
    }

    fn get_index_by_serial(&self, serial: &CStr) -> i32 {
        let Ok(serial) = serial.to_str() else {
            return -3;
        };
        let count = self.get_device_count();
        (0..count)
            .find(|&i| format!("{:08}", i + 1) == serial)
            .map(|i| i as i32)
            .unwrap_or(-3)
    }

    fn open(&self, index: u32) -> Result<RtlSdrDev, i32> {
        let mut script = self.script.lock().unwrap();
        if let Some(code) = script.open_code {
            return Err(code);
        }
        if index >= script.device_count {
            return Err(OPEN_NOT_FOUND);
        }
        let device = script.devices.entry(index).or_default();
        if device.open {
            return Err(OPEN_BUSY);
        }
        *device = MockDevice {
            open: true,
            xtal: (28_800_000, 28_800_000),
            ..Default::default()
        };
        Ok(dev_ptr(index))
    }

    fn close(&self, dev: RtlSdrDev) -> i32 {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        let code = self.script.lock().unwrap().close_code;
        self.with_device(dev, |d| d.open = false);
        code
    }

    fn set_center_freq(&self, dev: RtlSdrDev, freq_hz: u32) -> i32 {
        self.with_device(dev, |d| d.center_freq = freq_hz);
        0
    }

    fn get_center_freq(&self, dev: RtlSdrDev) -> u32 {
        self.with_device(dev, |d| d.center_freq)
    }

    fn set_sample_rate(&self, dev: RtlSdrDev, rate_hz: u32) -> i32 {
        self.with_device(dev, |d| d.sample_rate = rate_hz);
        0
    }

    fn get_sample_rate(&self, dev: RtlSdrDev) -> u32 {
        self.with_device(dev, |d| d.sample_rate)
    }

    fn set_xtal_freq(&self, dev: RtlSdrDev, rtl_hz: u32, tuner_hz: u32) -> i32 {
        self.with_device(dev, |d| d.xtal = (rtl_hz, tuner_hz));
        0
    }

    fn get_xtal_freq(&self, dev: RtlSdrDev) -> Result<(u32, u32), i32> {
        Ok(self.with_device(dev, |d| d.xtal))
    }

    fn set_tuner_gain_mode(&self, dev: RtlSdrDev, manual: i32) -> i32 {
        self.with_device(dev, |d| d.gain_mode = manual);
        0
    }

    fn set_tuner_gain(&self, dev: RtlSdrDev, tenth_db: i32) -> i32 {
        self.with_device(dev, |d| d.gain = tenth_db);
        0
    }

    fn get_tuner_gain(&self, dev: RtlSdrDev) -> i32 {
        self.with_device(dev, |d| d.gain)
    }

    fn get_tuner_gains(&self, _dev: RtlSdrDev) -> Vec<i32> {
        self.script.lock().unwrap().gains.clone()
    }

    fn set_agc_mode(&self, dev: RtlSdrDev, on: i32) -> i32 {
        self.with_device(dev, |d| d.agc = on);
        0
    }

    fn set_freq_correction(&self, dev: RtlSdrDev, ppm: i32) -> i32 {
        self.with_device(dev, |d| {
            if d.freq_correction == ppm {
                -2
            } else {
                d.freq_correction = ppm;
                0
            }
        })
    }

    fn get_freq_correction(&self, dev: RtlSdrDev) -> i32 {
        self.with_device(dev, |d| d.freq_correction)
    }

    fn set_direct_sampling(&self, dev: RtlSdrDev, mode: i32) -> i32 {
        self.with_device(dev, |d| d.direct_sampling = mode);
        0
    }

    fn get_direct_sampling(&self, dev: RtlSdrDev) -> i32 {
        self.with_device(dev, |d| d.direct_sampling)
    }

    fn set_offset_tuning(&self, dev: RtlSdrDev, on: i32) -> i32 {
        self.with_device(dev, |d| d.offset_tuning = on);
        0
    }

    fn get_offset_tuning(&self, dev: RtlSdrDev) -> i32 {
        self.with_device(dev, |d| d.offset_tuning)
    }

    fn set_tuner_bandwidth(&self, dev: RtlSdrDev, bw_hz: u32) -> i32 {
        self.with_device(dev, |d| d.bandwidth = bw_hz);
        0
    }

    fn set_testmode(&self, dev: RtlSdrDev, on: i32) -> i32 {
        self.with_device(dev, |d| d.testmode = on);
        0
    }

    fn get_tuner_type(&self, _dev: RtlSdrDev) -> i32 {
        self.script.lock().unwrap().tuner_type
    }

    fn set_bias_tee(&self, dev: RtlSdrDev, on: i32) -> i32 {
        self.with_device(dev, |d| d.bias_tee = on);
        0
    }

    fn set_bias_tee_gpio(&self, dev: RtlSdrDev, gpio: i32, on: i32) -> Option<i32> {
        if !self.script.lock().unwrap().gpio_supported {
            return None;
        }
        self.with_device(dev, |d| d.bias_tee_gpio.push((gpio, on)));
        Some(0)
    }

    fn reset_buffer(&self, dev: RtlSdrDev) -> i32 {
        self.cancelled.store(false, Ordering::SeqCst);
        self.with_device(dev, |d| d.reset_calls += 1);
        0
    }

    fn read_sync(&self, _dev: RtlSdrDev, buf: &mut [u8]) -> (i32, usize) {
        self.sync_reads.fetch_add(1, Ordering::SeqCst);
        let script = self.script.lock().unwrap();
        match script.sync_data {
            Some(ref data) => {
                let n = data.len().min(buf.len());
                buf[..n].copy_from_slice(&data[..n]);
                (script.sync_code, n)
            }
            None => {
                for (i, b) in buf.iter_mut().enumerate() {
                    *b = i as u8;
                }
                (script.sync_code, buf.len())
            }
        }
    }

    fn read_async(
        &self,
        _dev: RtlSdrDev,
        cb: ReadAsyncCallback,
        ctx: *mut c_void,
        buf_num: u32,
        buf_len: u32,
    ) -> i32 {
        let code = {
            let mut script = self.script.lock().unwrap();
            script.last_read_async = Some((buf_num, buf_len));
            script.read_async_code
        };
        self.read_async_calls.fetch_add(1, Ordering::SeqCst);

        if code != 0 {
            self.read_async_returned.fetch_add(1, Ordering::SeqCst);
            return code;
        }

        loop {
            if self.cancelled.load(Ordering::SeqCst) && !self.hang.load(Ordering::SeqCst) {
                break;
            }
            match self.rx.recv_timeout(Duration::from_millis(2)) {
                Ok(mut buf) => {
                    unsafe { cb(buf.as_mut_ptr(), buf.len() as u32, ctx) };
                    self.delivered.fetch_add(1, Ordering::SeqCst);
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        self.read_async_returned.fetch_add(1, Ordering::SeqCst);
        0
    }

    fn cancel_async(&self, _dev: RtlSdrDev) -> i32 {
        self.cancel_calls.fetch_add(1, Ordering::SeqCst);
        let code = self.script.lock().unwrap().cancel_code;
        if code == 0 {
            self.cancelled.store(true, Ordering::SeqCst);
        }
        code
    }
}
