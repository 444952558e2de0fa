//! Context tokens handed to `rtlsdr_read_async`.
//!
//! The driver calls back on its own thread with whatever `void *` it was given.
//! Instead of passing a pointer to engine state, we pass an opaque integer key
//! into a process-wide table. A callback arriving after the key was removed
//! finds nothing and returns, so it can never touch freed memory.

use std::collections::HashMap;
use std::ffi::c_void;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock, RwLock};

use crate::async_reader::Shared;

static NEXT_TOKEN: AtomicUsize = AtomicUsize::new(1);

fn table() -> &'static RwLock<HashMap<usize, Arc<Shared>>> {
    static CONTEXTS: OnceLock<RwLock<HashMap<usize, Arc<Shared>>>> = OnceLock::new();
    CONTEXTS.get_or_init(|| RwLock::new(HashMap::new()))
}

/// Registration of one engine in the context table. Removed on drop.
#[derive(Debug)]
pub(crate) struct ContextToken {
    key: usize,
}

impl ContextToken {
    /// Register `shared` under a fresh, never reused, non-zero key.
    pub(crate) fn register(shared: Arc<Shared>) -> Self {
        let key = NEXT_TOKEN.fetch_add(1, Ordering::Relaxed);
        table()
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key, shared);
        Self { key }
    }

    /// Value to pass as the driver's context pointer.
    pub(crate) fn as_ptr(&self) -> *mut c_void {
        self.key as *mut c_void
    }

    /// Keep the registration alive for the rest of the process.
    ///
    /// Used when an acquisition thread was abandoned and the driver may still
    /// call back with this key.
    pub(crate) fn leak(self) {
        tracing::warn!("Leaking acquisition context {}", self.key);
        std::mem::forget(self);
    }

    #[cfg(test)]
    pub(crate) fn key(&self) -> usize {
        self.key
    }
}

impl Drop for ContextToken {
    fn drop(&mut self) {
        table()
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.key);
    }
}

/// Look up the engine state for a context pointer received from the driver.
pub(crate) fn resolve(ctx: *mut c_void) -> Option<Arc<Shared>> {
    let key = ctx as usize;
    if key == 0 {
        return None;
    }
    table()
        .read()
        .unwrap_or_else(|e| e.into_inner())
        .get(&key)
        .cloned()
}
