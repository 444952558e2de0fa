//! Exclusive ownership of an open `rtlsdr_dev_t`.

use std::sync::atomic::{AtomicPtr, Ordering};
use std::sync::Arc;

use crate::error::{RtlSdrError, RtlSdrResult};
use crate::ffi::{RtlSdrApi, RtlSdrDev, OPEN_BUSY, OPEN_NOT_FOUND};

/// Safe wrapper around an open RTL-SDR device pointer.
///
/// The native close runs at most once: whichever of [`DeviceHandle::release`]
/// or `Drop` gets there first swaps the pointer out, the other sees null.
pub(crate) struct DeviceHandle {
    api: Arc<dyn RtlSdrApi>,
    dev: AtomicPtr<std::ffi::c_void>,
    index: u32,
}

// SAFETY: the pointer is only dereferenced by librtlsdr, which serialises
// control transfers internally. Ownership is tracked through the atomic.
unsafe impl Send for DeviceHandle {}
unsafe impl Sync for DeviceHandle {}

impl DeviceHandle {
    /// Open the device at `index`.
    pub(crate) fn open(api: Arc<dyn RtlSdrApi>, index: u32) -> RtlSdrResult<Self> {
        let dev = match api.open(index) {
            Ok(dev) => dev,
            Err(OPEN_NOT_FOUND) => return Err(RtlSdrError::DeviceNotFound(index)),
            Err(OPEN_BUSY) => return Err(RtlSdrError::DeviceBusy(index)),
            Err(code) => return Err(RtlSdrError::native("open", code, index)),
        };

        if dev.is_null() {
            return Err(RtlSdrError::InvalidHandle);
        }

        tracing::info!("Opened RTL-SDR device #{}", index);

        Ok(Self {
            api,
            dev: AtomicPtr::new(dev),
            index,
        })
    }

    /// Device index this handle was opened with.
    pub(crate) fn index(&self) -> u32 {
        self.index
    }

    /// The live native pointer, or `InvalidHandle` once released.
    pub(crate) fn ptr(&self) -> RtlSdrResult<RtlSdrDev> {
        let dev = self.dev.load(Ordering::Acquire);
        if dev.is_null() {
            Err(RtlSdrError::InvalidHandle)
        } else {
            Ok(dev)
        }
    }

    pub(crate) fn api(&self) -> &Arc<dyn RtlSdrApi> {
        &self.api
    }

    pub(crate) fn is_open(&self) -> bool {
        !self.dev.load(Ordering::Acquire).is_null()
    }

    /// Close the device. Later calls are no-ops.
    ///
    /// Callers must make sure no acquisition thread is still inside the
    /// driver with this pointer.
    pub(crate) fn release(&self) -> RtlSdrResult<()> {
        let dev = self.dev.swap(std::ptr::null_mut(), Ordering::AcqRel);
        if dev.is_null() {
            return Ok(());
        }

        tracing::debug!("Closing RTL-SDR device #{}", self.index);
        let ret = self.api.close(dev);
        if ret != 0 {
            return Err(RtlSdrError::native("close", ret, self.index));
        }
        Ok(())
    }

    /// Give up ownership without closing.
    ///
    /// Used when an acquisition thread could not be joined and may still be
    /// using the pointer; closing it would pull the device out from under it.
    pub(crate) fn leak(&self) {
        let dev = self.dev.swap(std::ptr::null_mut(), Ordering::AcqRel);
        if !dev.is_null() {
            tracing::warn!(
                "Leaking RTL-SDR device #{} handle, acquisition thread still running",
                self.index
            );
        }
    }
}

impl Drop for DeviceHandle {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            tracing::error!("{}", e);
        }
    }
}

impl std::fmt::Debug for DeviceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceHandle")
            .field("index", &self.index)
            .field("open", &self.is_open())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockDriver;

    #[test]
    fn test_open_and_release_once() {
        let mock = MockDriver::with_devices(1);
        let handle = DeviceHandle::open(mock.api(), 0).unwrap();
        assert!(handle.is_open());

        handle.release().unwrap();
        handle.release().unwrap();
        assert!(!handle.is_open());
        drop(handle);

        assert_eq!(mock.close_calls(), 1);
    }

    #[test]
    fn test_drop_releases() {
        let mock = MockDriver::with_devices(1);
        {
            let _handle = DeviceHandle::open(mock.api(), 0).unwrap();
        }
        assert_eq!(mock.close_calls(), 1);
    }

    #[test]
    fn test_concurrent_release() {
        let mock = MockDriver::with_devices(1);
        let handle = Arc::new(DeviceHandle::open(mock.api(), 0).unwrap());

        let threads: Vec<_> = (0..8)
            .map(|_| {
                let handle = handle.clone();
                std::thread::spawn(move || handle.release())
            })
            .collect();
        for t in threads {
            t.join().unwrap().unwrap();
        }
        drop(handle);

        assert_eq!(mock.close_calls(), 1);
    }

    #[test]
    fn test_open_error_codes() {
        let mock = MockDriver::with_devices(1);
        assert_eq!(
            DeviceHandle::open(mock.api(), 3).unwrap_err(),
            RtlSdrError::DeviceNotFound(3)
        );

        mock.set_open_code(OPEN_BUSY);
        assert_eq!(
            DeviceHandle::open(mock.api(), 0).unwrap_err(),
            RtlSdrError::DeviceBusy(0)
        );

        mock.set_open_code(-12);
        assert_eq!(
            DeviceHandle::open(mock.api(), 0).unwrap_err(),
            RtlSdrError::NativeCall {
                op: "open",
                code: -12,
                index: 0
            }
        );
    }

    #[test]
    fn test_leak_skips_close() {
        let mock = MockDriver::with_devices(1);
        let handle = DeviceHandle::open(mock.api(), 0).unwrap();
        handle.leak();
        assert_eq!(handle.ptr().unwrap_err(), RtlSdrError::InvalidHandle);
        drop(handle);
        assert_eq!(mock.close_calls(), 0);
    }

    #[test]
    fn test_close_failure_reported_once() {
        let mock = MockDriver::with_devices(1);
        mock.set_close_code(-5);
        let handle = DeviceHandle::open(mock.api(), 0).unwrap();
        assert!(handle.release().is_err());
        assert!(handle.release().is_ok());
        assert_eq!(mock.close_calls(), 1);
    }
}
