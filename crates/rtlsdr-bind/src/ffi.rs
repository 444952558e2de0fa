//! # librtlsdr FFI Bindings
//!
//! Low-level bindings to librtlsdr for RTL2832U-based receivers.
//!
//! The library is loaded at runtime with `libloading`, so the crate builds and
//! its tests run on machines without librtlsdr installed. An override path is
//! consulted before the platform default names:
//!
//! 1. `library_path` from [`BindingConfig`](crate::config::BindingConfig)
//! 2. the `RTLSDR_LIBRARY_PATH` environment variable
//! 3. `librtlsdr.so.0` / `librtlsdr.dylib` / `rtlsdr.dll` and friends
//!
//! Everything above this module talks to the driver through [`RtlSdrApi`],
//! which returns raw status codes. Mapping those codes to
//! [`RtlSdrError`](crate::RtlSdrError) is the caller's job, because only the
//! caller knows which device index and operation to report.

use std::ffi::{c_char, c_int, c_uchar, c_uint, c_void, CStr};
use std::path::{Path, PathBuf};
use std::ptr;
use std::sync::{Arc, Mutex};

use libloading::Library;

use crate::error::{RtlSdrError, RtlSdrResult};

/// Opaque `rtlsdr_dev_t *`.
pub(crate) type RtlSdrDev = *mut c_void;

/// `rtlsdr_read_async_cb_t`: invoked on the driver's thread for every filled buffer.
pub(crate) type ReadAsyncCallback = unsafe extern "C" fn(buf: *mut c_uchar, len: u32, ctx: *mut c_void);

/// Environment variable naming an explicit librtlsdr path.
pub const LIBRARY_PATH_ENV: &str = "RTLSDR_LIBRARY_PATH";

/// `rtlsdr_open` return code for an index with no device behind it.
pub const OPEN_NOT_FOUND: i32 = -1;
/// `rtlsdr_open` return code when another process holds the device.
pub const OPEN_BUSY: i32 = -6;
/// `rtlsdr_set_freq_correction` return code when the value did not change.
pub const FREQ_CORRECTION_UNCHANGED: i32 = -2;
/// `rtlsdr_read_sync` return code for a libusb overflow.
pub const READ_OVERFLOW: i32 = -8;

#[cfg(target_os = "linux")]
const LIB_NAMES: &[&str] = &["librtlsdr.so.0", "librtlsdr.so"];

#[cfg(target_os = "macos")]
const LIB_NAMES: &[&str] = &["librtlsdr.dylib", "librtlsdr.0.dylib"];

#[cfg(target_os = "windows")]
const LIB_NAMES: &[&str] = &["rtlsdr.dll", "librtlsdr.dll"];

#[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
const LIB_NAMES: &[&str] = &["librtlsdr.so"];

/// USB descriptor strings of a device (manufacturer, product, serial).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UsbStrings {
    pub manufacturer: String,
    pub product: String,
    pub serial: String,
}

/// The native entry points the binding needs.
///
/// Methods taking an [`RtlSdrDev`] must only be given a pointer returned by
/// [`RtlSdrApi::open`] that has not been closed yet; `DeviceHandle` is the
/// only place that hands those out.
pub(crate) trait RtlSdrApi: Send + Sync {
    fn get_device_count(&self) -> u32;
    fn get_device_name(&self, index: u32) -> Option<String>;
    fn get_device_usb_strings(&self, index: u32) -> Option<UsbStrings>;
    fn get_index_by_serial(&self, serial: &CStr) -> i32;

    /// Open a device; `Err` carries the native return code.
    fn open(&self, index: u32) -> Result<RtlSdrDev, i32>;
    fn close(&self, dev: RtlSdrDev) -> i32;

    fn set_center_freq(&self, dev: RtlSdrDev, freq_hz: u32) -> i32;
    fn get_center_freq(&self, dev: RtlSdrDev) -> u32;
    fn set_sample_rate(&self, dev: RtlSdrDev, rate_hz: u32) -> i32;
    fn get_sample_rate(&self, dev: RtlSdrDev) -> u32;
    fn set_xtal_freq(&self, dev: RtlSdrDev, rtl_hz: u32, tuner_hz: u32) -> i32;
    fn get_xtal_freq(&self, dev: RtlSdrDev) -> Result<(u32, u32), i32>;

    fn set_tuner_gain_mode(&self, dev: RtlSdrDev, manual: i32) -> i32;
    fn set_tuner_gain(&self, dev: RtlSdrDev, tenth_db: i32) -> i32;
    fn get_tuner_gain(&self, dev: RtlSdrDev) -> i32;
    fn get_tuner_gains(&self, dev: RtlSdrDev) -> Vec<i32>;
    fn set_agc_mode(&self, dev: RtlSdrDev, on: i32) -> i32;

    fn set_freq_correction(&self, dev: RtlSdrDev, ppm: i32) -> i32;
    fn get_freq_correction(&self, dev: RtlSdrDev) -> i32;
    fn set_direct_sampling(&self, dev: RtlSdrDev, mode: i32) -> i32;
    fn get_direct_sampling(&self, dev: RtlSdrDev) -> i32;
    fn set_offset_tuning(&self, dev: RtlSdrDev, on: i32) -> i32;
    fn get_offset_tuning(&self, dev: RtlSdrDev) -> i32;
    fn set_tuner_bandwidth(&self, dev: RtlSdrDev, bw_hz: u32) -> i32;
    fn set_testmode(&self, dev: RtlSdrDev, on: i32) -> i32;
    fn get_tuner_type(&self, dev: RtlSdrDev) -> i32;

    fn set_bias_tee(&self, dev: RtlSdrDev, on: i32) -> i32;
    /// `None` when the loaded library predates `rtlsdr_set_bias_tee_gpio`.
    fn set_bias_tee_gpio(&self, dev: RtlSdrDev, gpio: i32, on: i32) -> Option<i32>;

    fn reset_buffer(&self, dev: RtlSdrDev) -> i32;
    /// Returns the status code and the number of bytes read.
    fn read_sync(&self, dev: RtlSdrDev, buf: &mut [u8]) -> (i32, usize);
    /// Blocks until [`RtlSdrApi::cancel_async`] or a driver error.
    fn read_async(
        &self,
        dev: RtlSdrDev,
        cb: ReadAsyncCallback,
        ctx: *mut c_void,
        buf_num: u32,
        buf_len: u32,
    ) -> i32;
    fn cancel_async(&self, dev: RtlSdrDev) -> i32;
}

/// Loaded librtlsdr and its function pointers.
///
/// The pointers are copied out of their `Symbol`s; they stay valid because
/// `_lib` is kept alive alongside them.
pub(crate) struct LibRtlSdr {
    path: String,
    get_device_count: unsafe extern "C" fn() -> c_uint,
    get_device_name: unsafe extern "C" fn(c_uint) -> *const c_char,
    get_device_usb_strings:
        unsafe extern "C" fn(c_uint, *mut c_char, *mut c_char, *mut c_char) -> c_int,
    get_index_by_serial: unsafe extern "C" fn(*const c_char) -> c_int,
    open: unsafe extern "C" fn(*mut RtlSdrDev, c_uint) -> c_int,
    close: unsafe extern "C" fn(RtlSdrDev) -> c_int,
    set_center_freq: unsafe extern "C" fn(RtlSdrDev, u32) -> c_int,
    get_center_freq: unsafe extern "C" fn(RtlSdrDev) -> u32,
    set_sample_rate: unsafe extern "C" fn(RtlSdrDev, u32) -> c_int,
    get_sample_rate: unsafe extern "C" fn(RtlSdrDev) -> u32,
    set_xtal_freq: unsafe extern "C" fn(RtlSdrDev, u32, u32) -> c_int,
    get_xtal_freq: unsafe extern "C" fn(RtlSdrDev, *mut u32, *mut u32) -> c_int,
    set_tuner_gain_mode: unsafe extern "C" fn(RtlSdrDev, c_int) -> c_int,
    set_tuner_gain: unsafe extern "C" fn(RtlSdrDev, c_int) -> c_int,
    get_tuner_gain: unsafe extern "C" fn(RtlSdrDev) -> c_int,
    get_tuner_gains: unsafe extern "C" fn(RtlSdrDev, *mut c_int) -> c_int,
    set_agc_mode: unsafe extern "C" fn(RtlSdrDev, c_int) -> c_int,
    set_freq_correction: unsafe extern "C" fn(RtlSdrDev, c_int) -> c_int,
    get_freq_correction: unsafe extern "C" fn(RtlSdrDev) -> c_int,
    set_direct_sampling: unsafe extern "C" fn(RtlSdrDev, c_int) -> c_int,
    get_direct_sampling: unsafe extern "C" fn(RtlSdrDev) -> c_int,
    set_offset_tuning: unsafe extern "C" fn(RtlSdrDev, c_int) -> c_int,
    get_offset_tuning: unsafe extern "C" fn(RtlSdrDev) -> c_int,
    set_tuner_bandwidth: unsafe extern "C" fn(RtlSdrDev, u32) -> c_int,
    set_testmode: unsafe extern "C" fn(RtlSdrDev, c_int) -> c_int,
    get_tuner_type: unsafe extern "C" fn(RtlSdrDev) -> c_int,
    set_bias_tee: unsafe extern "C" fn(RtlSdrDev, c_int) -> c_int,
    set_bias_tee_gpio: Option<unsafe extern "C" fn(RtlSdrDev, c_int, c_int) -> c_int>,
    reset_buffer: unsafe extern "C" fn(RtlSdrDev) -> c_int,
    read_sync: unsafe extern "C" fn(RtlSdrDev, *mut c_void, c_int, *mut c_int) -> c_int,
    read_async:
        unsafe extern "C" fn(RtlSdrDev, ReadAsyncCallback, *mut c_void, u32, u32) -> c_int,
    cancel_async: unsafe extern "C" fn(RtlSdrDev) -> c_int,
    _lib: Library,
}

/// Look up one symbol and copy the function pointer out.
///
/// # Safety
/// `T` must match the C signature of `name`.
unsafe fn symbol<T: Copy>(lib: &Library, name: &'static [u8]) -> RtlSdrResult<T> {
    lib.get::<T>(name).map(|s| *s).map_err(|e| {
        let printable = String::from_utf8_lossy(name.strip_suffix(b"\0").unwrap_or(name));
        RtlSdrError::MissingSymbol(format!("{}: {}", printable, e))
    })
}

impl LibRtlSdr {
    /// Resolve every required symbol from an already opened library.
    fn from_library(lib: Library, path: String) -> RtlSdrResult<Self> {
        // SAFETY: each field type mirrors the declaration in rtl-sdr.h.
        unsafe {
            Ok(Self {
                get_device_count: symbol(&lib, b"rtlsdr_get_device_count\0")?,
                get_device_name: symbol(&lib, b"rtlsdr_get_device_name\0")?,
                get_device_usb_strings: symbol(&lib, b"rtlsdr_get_device_usb_strings\0")?,
                get_index_by_serial: symbol(&lib, b"rtlsdr_get_index_by_serial\0")?,
                open: symbol(&lib, b"rtlsdr_open\0")?,
                close: symbol(&lib, b"rtlsdr_close\0")?,
                set_center_freq: symbol(&lib, b"rtlsdr_set_center_freq\0")?,
                get_center_freq: symbol(&lib, b"rtlsdr_get_center_freq\0")?,
                set_sample_rate: symbol(&lib, b"rtlsdr_set_sample_rate\0")?,
                get_sample_rate: symbol(&lib, b"rtlsdr_get_sample_rate\0")?,
                set_xtal_freq: symbol(&lib, b"rtlsdr_set_xtal_freq\0")?,
                get_xtal_freq: symbol(&lib, b"rtlsdr_get_xtal_freq\0")?,
                set_tuner_gain_mode: symbol(&lib, b"rtlsdr_set_tuner_gain_mode\0")?,
                set_tuner_gain: symbol(&lib, b"rtlsdr_set_tuner_gain\0")?,
                get_tuner_gain: symbol(&lib, b"rtlsdr_get_tuner_gain\0")?,
                get_tuner_gains: symbol(&lib, b"rtlsdr_get_tuner_gains\0")?,
                set_agc_mode: symbol(&lib, b"rtlsdr_set_agc_mode\0")?,
                set_freq_correction: symbol(&lib, b"rtlsdr_set_freq_correction\0")?,
                get_freq_correction: symbol(&lib, b"rtlsdr_get_freq_correction\0")?,
                set_direct_sampling: symbol(&lib, b"rtlsdr_set_direct_sampling\0")?,
                get_direct_sampling: symbol(&lib, b"rtlsdr_get_direct_sampling\0")?,
                set_offset_tuning: symbol(&lib, b"rtlsdr_set_offset_tuning\0")?,
                get_offset_tuning: symbol(&lib, b"rtlsdr_get_offset_tuning\0")?,
                set_tuner_bandwidth: symbol(&lib, b"rtlsdr_set_tuner_bandwidth\0")?,
                set_testmode: symbol(&lib, b"rtlsdr_set_testmode\0")?,
                get_tuner_type: symbol(&lib, b"rtlsdr_get_tuner_type\0")?,
                set_bias_tee: symbol(&lib, b"rtlsdr_set_bias_tee\0")?,
                set_bias_tee_gpio: symbol(&lib, b"rtlsdr_set_bias_tee_gpio\0").ok(),
                reset_buffer: symbol(&lib, b"rtlsdr_reset_buffer\0")?,
                read_sync: symbol(&lib, b"rtlsdr_read_sync\0")?,
                read_async: symbol(&lib, b"rtlsdr_read_async\0")?,
                cancel_async: symbol(&lib, b"rtlsdr_cancel_async\0")?,
                path,
                _lib: lib,
            })
        }
    }

    /// Load librtlsdr, trying `override_path`, then `RTLSDR_LIBRARY_PATH`,
    /// then the platform default names.
    pub(crate) fn load(override_path: Option<&Path>) -> RtlSdrResult<Self> {
        let mut candidates: Vec<PathBuf> = Vec::new();
        if let Some(path) = override_path {
            candidates.push(path.to_path_buf());
        }
        if let Ok(path) = std::env::var(LIBRARY_PATH_ENV) {
            if !path.is_empty() {
                candidates.push(PathBuf::from(path));
            }
        }
        candidates.extend(LIB_NAMES.iter().map(PathBuf::from));

        let mut last_error = String::from("no candidate paths");
        for candidate in &candidates {
            // SAFETY: librtlsdr has no load-time initialisers with preconditions.
            match unsafe { Library::new(candidate) } {
                Ok(lib) => {
                    let path = candidate.display().to_string();
                    match Self::from_library(lib, path.clone()) {
                        Ok(loaded) => {
                            tracing::info!("Loaded RTL-SDR library: {}", path);
                            return Ok(loaded);
                        }
                        Err(e) => {
                            tracing::warn!("Rejected {}: {}", path, e);
                            last_error = e.to_string();
                        }
                    }
                }
                Err(e) => {
                    tracing::trace!("Could not load {}: {}", candidate.display(), e);
                    last_error = e.to_string();
                }
            }
        }

        tracing::debug!("RTL-SDR library not found");
        Err(RtlSdrError::LibraryNotFound(last_error))
    }

    /// Path the library was loaded from.
    pub(crate) fn path(&self) -> &str {
        &self.path
    }
}

/// Loaded libraries, one per requested override. Failed loads are not kept,
/// so a later call can still succeed once the library or path is fixed.
pub(crate) struct LoadCache<T> {
    loaded: Mutex<Vec<(Option<PathBuf>, Arc<T>)>>,
}

impl<T> LoadCache<T> {
    pub(crate) const fn new() -> Self {
        Self {
            loaded: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn get_or_load<F>(&self, override_path: Option<&Path>, load: F) -> RtlSdrResult<Arc<T>>
    where
        F: FnOnce(Option<&Path>) -> RtlSdrResult<T>,
    {
        let mut loaded = self.loaded.lock().unwrap_or_else(|e| e.into_inner());
        if let Some((_, lib)) = loaded.iter().find(|(key, _)| key.as_deref() == override_path) {
            return Ok(lib.clone());
        }
        let lib = Arc::new(load(override_path)?);
        loaded.push((override_path.map(Path::to_path_buf), lib.clone()));
        Ok(lib)
    }
}

static LIBRTLSDR: LoadCache<LibRtlSdr> = LoadCache::new();

/// Get the shared library for `override_path`, loading it on first use.
///
/// Each distinct override is loaded once and reused afterwards. A failed load
/// is retried on the next call.
pub(crate) fn library(override_path: Option<&Path>) -> RtlSdrResult<Arc<LibRtlSdr>> {
    LIBRTLSDR.get_or_load(override_path, LibRtlSdr::load)
}

/// Check whether librtlsdr can be loaded from the default locations.
pub fn is_available() -> bool {
    library(None).is_ok()
}

/// Decode a NUL-terminated byte buffer filled by the driver.
pub(crate) fn trim_nul(buf: &[u8]) -> String {
    let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    String::from_utf8_lossy(&buf[..end]).into_owned()
}

impl RtlSdrApi for LibRtlSdr {
    fn get_device_count(&self) -> u32 {
        unsafe { (self.get_device_count)() }
    }

    fn get_device_name(&self, index: u32) -> Option<String> {
        let name_ptr = unsafe { (self.get_device_name)(index) };
        if name_ptr.is_null() {
            None
        } else {
            // SAFETY: the driver returns a static NUL-terminated string.
            Some(unsafe { CStr::from_ptr(name_ptr).to_string_lossy().into_owned() })
        }
    }

    fn get_device_usb_strings(&self, index: u32) -> Option<UsbStrings> {
        let mut manufact = [0u8; 256];
        let mut product = [0u8; 256];
        let mut serial = [0u8; 256];

        let ret = unsafe {
            (self.get_device_usb_strings)(
                index,
                manufact.as_mut_ptr() as *mut c_char,
                product.as_mut_ptr() as *mut c_char,
                serial.as_mut_ptr() as *mut c_char,
            )
        };

        (ret == 0).then(|| UsbStrings {
            manufacturer: trim_nul(&manufact),
            product: trim_nul(&product),
            serial: trim_nul(&serial),
        })
    }

    fn get_index_by_serial(&self, serial: &CStr) -> i32 {
        unsafe { (self.get_index_by_serial)(serial.as_ptr()) }
    }

    fn open(&self, index: u32) -> Result<RtlSdrDev, i32> {
        let mut dev: RtlSdrDev = ptr::null_mut();
        let ret = unsafe { (self.open)(&mut dev, index) };
        if ret != 0 {
            Err(ret)
        } else {
            Ok(dev)
        }
    }

    fn close(&self, dev: RtlSdrDev) -> i32 {
        unsafe { (self.close)(dev) }
    }

    fn set_center_freq(&self, dev: RtlSdrDev, freq_hz: u32) -> i32 {
        unsafe { (self.set_center_freq)(dev, freq_hz) }
    }

    fn get_center_freq(&self, dev: RtlSdrDev) -> u32 {
        unsafe { (self.get_center_freq)(dev) }
    }

    fn set_sample_rate(&self, dev: RtlSdrDev, rate_hz: u32) -> i32 {
        unsafe { (self.set_sample_rate)(dev, rate_hz) }
    }

    fn get_sample_rate(&self, dev: RtlSdrDev) -> u32 {
        unsafe { (self.get_sample_rate)(dev) }
    }

    fn set_xtal_freq(&self, dev: RtlSdrDev, rtl_hz: u32, tuner_hz: u32) -> i32 {
        unsafe { (self.set_xtal_freq)(dev, rtl_hz, tuner_hz) }
    }

    fn get_xtal_freq(&self, dev: RtlSdrDev) -> Result<(u32, u32), i32> {
        let mut rtl_hz = 0u32;
        let mut tuner_hz = 0u32;
        let ret = unsafe { (self.get_xtal_freq)(dev, &mut rtl_hz, &mut tuner_hz) };
        if ret != 0 {
            Err(ret)
        } else {
            Ok((rtl_hz, tuner_hz))
        }
    }

    fn set_tuner_gain_mode(&self, dev: RtlSdrDev, manual: i32) -> i32 {
        unsafe { (self.set_tuner_gain_mode)(dev, manual) }
    }

    fn set_tuner_gain(&self, dev: RtlSdrDev, tenth_db: i32) -> i32 {
        unsafe { (self.set_tuner_gain)(dev, tenth_db) }
    }

    fn get_tuner_gain(&self, dev: RtlSdrDev) -> i32 {
        unsafe { (self.get_tuner_gain)(dev) }
    }

    fn get_tuner_gains(&self, dev: RtlSdrDev) -> Vec<i32> {
        // A NULL buffer asks for the count only.
        let count = unsafe { (self.get_tuner_gains)(dev, ptr::null_mut()) };
        if count <= 0 {
            return Vec::new();
        }
        let mut gains = vec![0 as c_int; count as usize];
        let filled = unsafe { (self.get_tuner_gains)(dev, gains.as_mut_ptr()) };
        gains.truncate(filled.max(0) as usize);
        gains
    }

    fn set_agc_mode(&self, dev: RtlSdrDev, on: i32) -> i32 {
        unsafe { (self.set_agc_mode)(dev, on) }
    }

    fn set_freq_correction(&self, dev: RtlSdrDev, ppm: i32) -> i32 {
        unsafe { (self.set_freq_correction)(dev, ppm) }
    }

    fn get_freq_correction(&self, dev: RtlSdrDev) -> i32 {
        unsafe { (self.get_freq_correction)(dev) }
    }

    fn set_direct_sampling(&self, dev: RtlSdrDev, mode: i32) -> i32 {
        unsafe { (self.set_direct_sampling)(dev, mode) }
    }

    fn get_direct_sampling(&self, dev: RtlSdrDev) -> i32 {
        unsafe { (self.get_direct_sampling)(dev) }
    }

    fn set_offset_tuning(&self, dev: RtlSdrDev, on: i32) -> i32 {
        unsafe { (self.set_offset_tuning)(dev, on) }
    }

    fn get_offset_tuning(&self, dev: RtlSdrDev) -> i32 {
        unsafe { (self.get_offset_tuning)(dev) }
    }

    fn set_tuner_bandwidth(&self, dev: RtlSdrDev, bw_hz: u32) -> i32 {
        unsafe { (self.set_tuner_bandwidth)(dev, bw_hz) }
    }

    fn set_testmode(&self, dev: RtlSdrDev, on: i32) -> i32 {
        unsafe { (self.set_testmode)(dev, on) }
    }

    fn get_tuner_type(&self, dev: RtlSdrDev) -> i32 {
        unsafe { (self.get_tuner_type)(dev) }
    }

    fn set_bias_tee(&self, dev: RtlSdrDev, on: i32) -> i32 {
        unsafe { (self.set_bias_tee)(dev, on) }
    }

    fn set_bias_tee_gpio(&self, dev: RtlSdrDev, gpio: i32, on: i32) -> Option<i32> {
        self.set_bias_tee_gpio
            .map(|f| unsafe { f(dev, gpio, on) })
    }

    fn reset_buffer(&self, dev: RtlSdrDev) -> i32 {
        unsafe { (self.reset_buffer)(dev) }
    }

    fn read_sync(&self, dev: RtlSdrDev, buf: &mut [u8]) -> (i32, usize) {
        let mut n_read: c_int = 0;
        let ret = unsafe {
            (self.read_sync)(
                dev,
                buf.as_mut_ptr() as *mut c_void,
                buf.len() as c_int,
                &mut n_read,
            )
        };
        (ret, n_read.max(0) as usize)
    }

    fn read_async(
        &self,
        dev: RtlSdrDev,
        cb: ReadAsyncCallback,
        ctx: *mut c_void,
        buf_num: u32,
        buf_len: u32,
    ) -> i32 {
        unsafe { (self.read_async)(dev, cb, ctx, buf_num, buf_len) }
    }

    fn cancel_async(&self, dev: RtlSdrDev) -> i32 {
        unsafe { (self.cancel_async)(dev) }
    }
}
