//! Error taxonomy for the binding layer.
//!
//! Every native return code that is not success ends up in one of these
//! variants with the operation name and device index attached. Nothing here
//! is retried internally.

/// Result type for RTL-SDR operations.
pub type RtlSdrResult<T> = Result<T, RtlSdrError>;

/// Errors that can occur while talking to librtlsdr or managing devices.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RtlSdrError {
    #[error("librtlsdr not found: {0}")]
    LibraryNotFound(String),

    #[error("librtlsdr is missing symbol {0}")]
    MissingSymbol(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("{op} failed on device #{index}: error code {code}")]
    NativeCall {
        op: &'static str,
        code: i32,
        index: u32,
    },

    #[error("Device #{0} not found")]
    DeviceNotFound(u32),

    #[error("Device #{0} is already in use")]
    DeviceBusy(u32),

    #[error("Invalid device handle")]
    InvalidHandle,

    #[error("{0} not initialized")]
    NotInitialized(&'static str),

    #[error("Asynchronous acquisition already running")]
    AlreadyRunning,

    #[error("Async buffer overflow on device #{index}: {depth} samples queued, limit {limit}")]
    BufferOverflow {
        depth: usize,
        limit: usize,
        index: u32,
    },

    #[error("Synchronous read overflow on device #{0}")]
    SyncOverflow(u32),

    #[error("Device name already registered: {0}")]
    DuplicateName(String),

    #[error("No device registered as {0}")]
    UnknownName(String),

    #[error("No devices are open")]
    NoDevicesOpen,

    #[error("{} device(s) failed to close", .0.len())]
    CloseFailures(Vec<(String, RtlSdrError)>),

    #[error("Failed to spawn acquisition thread: {0}")]
    ThreadSpawn(String),

    #[error("Acquisition thread for device #{0} panicked")]
    WorkerPanicked(u32),
}

impl RtlSdrError {
    /// Map a non-zero native return code to an error.
    pub(crate) fn native(op: &'static str, code: i32, index: u32) -> Self {
        RtlSdrError::NativeCall { op, code, index }
    }

    /// Caller supplied a bad value; never worth retrying.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            RtlSdrError::InvalidArgument(_)
                | RtlSdrError::DuplicateName(_)
                | RtlSdrError::UnknownName(_)
        )
    }

    /// Operation was issued in the wrong lifecycle state.
    pub fn is_resource_state(&self) -> bool {
        matches!(
            self,
            RtlSdrError::NotInitialized(_)
                | RtlSdrError::AlreadyRunning
                | RtlSdrError::InvalidHandle
                | RtlSdrError::NoDevicesOpen
        )
    }
}

/// Convert a native status code into `Ok(())` or a `NativeCall` error.
pub(crate) fn check(op: &'static str, code: i32, index: u32) -> RtlSdrResult<()> {
    if code == 0 {
        Ok(())
    } else {
        Err(RtlSdrError::native(op, code, index))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_maps_codes() {
        assert!(check("set_center_freq", 0, 0).is_ok());
        let err = check("set_center_freq", -3, 2).unwrap_err();
        assert_eq!(
            err,
            RtlSdrError::NativeCall {
                op: "set_center_freq",
                code: -3,
                index: 2
            }
        );
        assert_eq!(err.to_string(), "set_center_freq failed on device #2: error code -3");
    }

    #[test]
    fn test_classification() {
        assert!(RtlSdrError::InvalidArgument("gpio".into()).is_validation());
        assert!(RtlSdrError::DuplicateName("x".into()).is_validation());
        assert!(RtlSdrError::NotInitialized("async buffer").is_resource_state());
        assert!(RtlSdrError::AlreadyRunning.is_resource_state());
        assert!(!RtlSdrError::DeviceBusy(0).is_validation());
        assert!(!RtlSdrError::DeviceBusy(0).is_resource_state());
    }

    #[test]
    fn test_close_failures_display() {
        let err = RtlSdrError::CloseFailures(vec![
            ("a".into(), RtlSdrError::native("close", -1, 0)),
            ("b".into(), RtlSdrError::native("close", -1, 1)),
        ]);
        assert_eq!(err.to_string(), "2 device(s) failed to close");
    }
}
