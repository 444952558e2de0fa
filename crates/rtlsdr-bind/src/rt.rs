//! # Acquisition Thread Spawning
//!
//! The async worker spends its whole life blocked inside `rtlsdr_read_async`,
//! and the driver delivers buffers on that thread. Running it at an elevated
//! priority keeps USB transfers from being starved by consumers.
//!
//! ## Platform Support
//!
//! - **Linux**: SCHED_FIFO via `sched_setscheduler` (needs CAP_SYS_NICE or root)
//! - **Other**: priority request is logged and ignored
//!
//! Failing to raise the priority is never fatal; the thread runs with the
//! default policy and a warning is logged.

use std::thread::{self, JoinHandle};

use serde::{Deserialize, Serialize};

use crate::error::{RtlSdrError, RtlSdrResult};

/// Scheduling priority for the acquisition thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ThreadPriority {
    /// Default scheduling, no real-time policy
    Normal,
    /// SCHED_FIFO 20 on Linux
    Low,
    /// SCHED_FIFO 50 on Linux
    Medium,
    /// SCHED_FIFO 80 on Linux
    #[default]
    High,
    /// SCHED_FIFO 95 on Linux
    Critical,
}

impl ThreadPriority {
    /// Convert to a Linux SCHED_FIFO priority (1-99), 0 for normal.
    pub fn to_linux_priority(self) -> i32 {
        match self {
            ThreadPriority::Normal => 0,
            ThreadPriority::Low => 20,
            ThreadPriority::Medium => 50,
            ThreadPriority::High => 80,
            ThreadPriority::Critical => 95,
        }
    }

    pub fn is_realtime(self) -> bool {
        !matches!(self, ThreadPriority::Normal)
    }
}

/// Spawn a named thread and raise its priority before running `f`.
pub(crate) fn spawn_priority_thread<F, T>(
    name: String,
    priority: ThreadPriority,
    f: F,
) -> RtlSdrResult<JoinHandle<T>>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    thread::Builder::new()
        .name(name)
        .spawn(move || {
            if priority.is_realtime() {
                if let Err(e) = set_thread_priority(priority) {
                    tracing::warn!("Failed to set thread priority: {}", e);
                }
            }
            f()
        })
        .map_err(|e| RtlSdrError::ThreadSpawn(e.to_string()))
}

#[cfg(target_os = "linux")]
fn set_thread_priority(priority: ThreadPriority) -> Result<(), std::io::Error> {
    // SAFETY: sched_param is plain data; pid 0 targets the calling thread.
    unsafe {
        let mut param: libc::sched_param = std::mem::zeroed();
        param.sched_priority = priority.to_linux_priority();

        if libc::sched_setscheduler(0, libc::SCHED_FIFO, &param) != 0 {
            return Err(std::io::Error::last_os_error());
        }
    }
    Ok(())
}

#[cfg(not(target_os = "linux"))]
fn set_thread_priority(_priority: ThreadPriority) -> Result<(), std::io::Error> {
    tracing::debug!("Real-time priority not supported on this platform");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_mapping() {
        assert_eq!(ThreadPriority::Normal.to_linux_priority(), 0);
        assert_eq!(ThreadPriority::High.to_linux_priority(), 80);
        assert!(!ThreadPriority::Normal.is_realtime());
        assert!(ThreadPriority::Critical.is_realtime());
        assert_eq!(ThreadPriority::default(), ThreadPriority::High);
    }

    #[test]
    fn test_spawn_runs_without_privileges() {
        // Raising the priority usually fails in CI; the closure must still run.
        let handle =
            spawn_priority_thread("rt-test".to_string(), ThreadPriority::High, || {
                thread::current().name().map(str::to_owned)
            })
            .unwrap();
        assert_eq!(handle.join().unwrap().as_deref(), Some("rt-test"));
    }
}
