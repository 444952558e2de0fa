//! # Asynchronous Acquisition
//!
//! `rtlsdr_read_async` blocks for the whole session and hands every filled USB
//! buffer to a C callback on the calling thread. [`AsyncReader`] owns that
//! thread, the callback [`trampoline`], and the queue the trampoline feeds.
//!
//! ```text
//! worker thread ──► rtlsdr_read_async ──► trampoline ──► SegQueue<IqSample>
//!                                               │               │
//!                                               ▼               ▼
//!                                       SampleNotifier   get_samples / try_dequeue
//! ```
//!
//! The queue is bounded by `max_async_buffer_size`. The bound is checked once
//! per callback, so depth can exceed it by at most one batch. When a batch does
//! not fit, [`OverflowPolicy::Drop`] discards and counts it, while
//! [`OverflowPolicy::Fail`] faults the session: nothing more is queued, the
//! driver is asked to cancel, and the fault is returned by the next stop.
//!
//! Stopping cancels the driver, then joins the worker with an optional timeout.
//! A worker that does not come back in time is abandoned: its context stays
//! registered and the device is never closed, since the driver may still be
//! using both.

use std::ffi::{c_uchar, c_void};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock, RwLock};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam::queue::SegQueue;

use crate::config::{AcquisitionConfig, OverflowPolicy};
use crate::context::{self, ContextToken};
use crate::error::{check, RtlSdrError, RtlSdrResult};
use crate::handle::DeviceHandle;
use crate::notify::{SampleNotifier, SubscriptionId};
use crate::rt::{self, ThreadPriority};
use crate::sample::{self, IqSample};

/// USB bulk transfers must be a multiple of this many bytes.
const TRANSFER_ALIGN: u32 = 512;

/// Interval between `is_finished` checks while waiting for the worker.
const JOIN_POLL: Duration = Duration::from_millis(2);

/// Lifecycle of an acquisition session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquisitionState {
    Idle,
    Running,
    /// Cancel issued, waiting for the worker to return
    StopRequested,
}

impl AcquisitionState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => AcquisitionState::Running,
            2 => AcquisitionState::StopRequested,
            _ => AcquisitionState::Idle,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            AcquisitionState::Idle => 0,
            AcquisitionState::Running => 1,
            AcquisitionState::StopRequested => 2,
        }
    }
}

/// How a stop request ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// Worker cancelled and joined
    Stopped,
    /// Nothing was running
    AlreadyIdle,
    /// Worker did not return within the timeout and was left behind
    Abandoned,
}

/// Translate a per-read sample hint into a driver buffer length in bytes.
pub(crate) fn buffer_len_for(samples: u32) -> RtlSdrResult<u32> {
    if samples == 0 {
        return Err(RtlSdrError::InvalidArgument(
            "samples per read must be > 0".to_string(),
        ));
    }
    samples
        .checked_mul(2)
        .and_then(|bytes| bytes.checked_next_multiple_of(TRANSFER_ALIGN))
        .ok_or_else(|| {
            RtlSdrError::InvalidArgument(format!("{} samples per read is too large", samples))
        })
}

/// State shared between the engine, its consumers, and the trampoline.
pub(crate) struct Shared {
    index: u32,
    queue: RwLock<Option<Arc<SegQueue<IqSample>>>>,
    max_size: AtomicUsize,
    drop_on_full: AtomicBool,
    dropped: AtomicU64,
    state: AtomicU8,
    faulted: AtomicBool,
    fault: Mutex<Option<RtlSdrError>>,
    cancel_requested: AtomicBool,
    notifier: SampleNotifier,
    /// Set once the engine is bound to an open device.
    device: OnceLock<Arc<DeviceHandle>>,
}

impl Shared {
    pub(crate) fn new(index: u32, config: &AcquisitionConfig) -> Self {
        Self {
            index,
            queue: RwLock::new(None),
            max_size: AtomicUsize::new(config.max_async_buffer_size),
            drop_on_full: AtomicBool::new(config.overflow_policy == OverflowPolicy::Drop),
            dropped: AtomicU64::new(0),
            state: AtomicU8::new(AcquisitionState::Idle.as_u8()),
            faulted: AtomicBool::new(false),
            fault: Mutex::new(None),
            cancel_requested: AtomicBool::new(false),
            notifier: SampleNotifier::new(),
            device: OnceLock::new(),
        }
    }

    fn state(&self) -> AcquisitionState {
        AcquisitionState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: AcquisitionState) {
        self.state.store(state.as_u8(), Ordering::Release);
    }

    fn policy(&self) -> OverflowPolicy {
        if self.drop_on_full.load(Ordering::Relaxed) {
            OverflowPolicy::Drop
        } else {
            OverflowPolicy::Fail
        }
    }

    fn queue(&self) -> RtlSdrResult<Arc<SegQueue<IqSample>>> {
        self.queue
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .ok_or(RtlSdrError::NotInitialized("async buffer"))
    }

    fn install_queue(&self) {
        *self.queue.write().unwrap_or_else(|e| e.into_inner()) = Some(Arc::new(SegQueue::new()));
    }

    fn discard_queue(&self) {
        self.queue.write().unwrap_or_else(|e| e.into_inner()).take();
    }

    fn drain(&self, max_count: usize) -> RtlSdrResult<Vec<IqSample>> {
        let queue = self.queue()?;
        let mut out = Vec::with_capacity(max_count.min(queue.len()));
        while out.len() < max_count {
            match queue.pop() {
                Some(s) => out.push(s),
                None => break,
            }
        }
        Ok(out)
    }

    fn fault(&self) -> Option<RtlSdrError> {
        self.fault.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Keep the first fault of a session.
    fn record_fault(&self, err: RtlSdrError) {
        let mut slot = self.fault.lock().unwrap_or_else(|e| e.into_inner());
        if slot.is_none() {
            *slot = Some(err);
        }
        self.faulted.store(true, Ordering::Release);
    }

    fn clear_fault(&self) {
        self.fault.lock().unwrap_or_else(|e| e.into_inner()).take();
        self.faulted.store(false, Ordering::Release);
    }

    /// Ask the driver to end `read_async`. Safe to call from the callback.
    fn request_cancel(&self) {
        let Some(handle) = self.device.get() else {
            return;
        };
        let Ok(dev) = handle.ptr() else {
            return;
        };
        self.cancel_requested.store(true, Ordering::Release);
        let ret = handle.api().cancel_async(dev);
        if ret != 0 {
            tracing::warn!(
                "cancel_async from callback failed on device #{}: {}",
                self.index,
                ret
            );
        }
    }

    /// Handle one driver buffer. Runs on the driver's thread.
    fn on_buffer(&self, raw: &[u8]) {
        if self.faulted.load(Ordering::Acquire) {
            return;
        }

        let n = sample::sample_count(raw.len());
        if n == 0 {
            return;
        }

        let overflow = {
            let guard = self.queue.read().unwrap_or_else(|e| e.into_inner());
            let Some(queue) = guard.as_ref() else {
                return;
            };

            let depth = queue.len();
            let limit = self.max_size.load(Ordering::Relaxed);
            if depth + n >= limit {
                Some((depth, limit))
            } else {
                for s in sample::decode(raw) {
                    queue.push(s);
                }
                None
            }
        };

        let Some((depth, limit)) = overflow else {
            self.notifier.publish(n);
            return;
        };

        match self.policy() {
            OverflowPolicy::Drop => {
                let before = self.dropped.fetch_add(n as u64, Ordering::Relaxed);
                if before == 0 {
                    tracing::warn!(
                        "Async buffer full on device #{} ({} of {}), dropping samples",
                        self.index,
                        depth,
                        limit
                    );
                }
            }
            OverflowPolicy::Fail => {
                let err = RtlSdrError::BufferOverflow {
                    depth,
                    limit,
                    index: self.index,
                };
                tracing::error!("{}", err);
                self.record_fault(err);
                self.request_cancel();
            }
        }
    }
}

/// Callback registered with `rtlsdr_read_async`.
///
/// # Safety
/// `buf` must point to `len` readable bytes for the duration of the call.
pub(crate) unsafe extern "C" fn trampoline(buf: *mut c_uchar, len: u32, ctx: *mut c_void) {
    let Some(shared) = context::resolve(ctx) else {
        return;
    };
    if buf.is_null() || len == 0 {
        return;
    }

    let raw = std::slice::from_raw_parts(buf as *const u8, len as usize);
    if panic::catch_unwind(AssertUnwindSafe(|| shared.on_buffer(raw))).is_err() {
        tracing::error!(
            "Panic in sample callback for device #{}, batch abandoned",
            shared.index
        );
    }
}

/// Cloneable, thread-safe view onto an engine's queue.
///
/// Consumers on other threads drain samples through this while the owner of
/// the [`AsyncReader`] keeps control of start and stop.
#[derive(Clone)]
pub struct SampleConsumer {
    shared: Arc<Shared>,
}

impl SampleConsumer {
    /// Remove up to `max_count` samples from the front of the queue. Never blocks.
    pub fn get_samples(&self, max_count: usize) -> RtlSdrResult<Vec<IqSample>> {
        self.shared.drain(max_count)
    }

    pub fn try_dequeue(&self) -> RtlSdrResult<Option<IqSample>> {
        Ok(self.shared.queue()?.pop())
    }

    pub fn len(&self) -> RtlSdrResult<usize> {
        Ok(self.shared.queue()?.len())
    }

    pub fn is_empty(&self) -> RtlSdrResult<bool> {
        Ok(self.shared.queue()?.is_empty())
    }

    pub fn state(&self) -> AcquisitionState {
        self.shared.state()
    }

    pub fn dropped_samples(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for SampleConsumer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SampleConsumer")
            .field("device", &self.shared.index)
            .field("state", &self.shared.state())
            .finish()
    }
}

/// Result of waiting on the worker thread.
enum Join {
    Finished(thread::Result<()>),
    TimedOut,
}

fn join_timeout(worker: JoinHandle<()>, timeout: Option<Duration>) -> Join {
    let Some(timeout) = timeout else {
        return Join::Finished(worker.join());
    };

    let deadline = Instant::now() + timeout;
    while !worker.is_finished() {
        if Instant::now() >= deadline {
            // Dropping the handle detaches the thread.
            return Join::TimedOut;
        }
        thread::sleep(JOIN_POLL);
    }
    Join::Finished(worker.join())
}

/// Callback-driven sample acquisition for one open device.
pub struct AsyncReader {
    handle: Arc<DeviceHandle>,
    shared: Arc<Shared>,
    token: Option<ContextToken>,
    worker: Option<JoinHandle<()>>,
    abandoned: bool,
    samples_per_read: u32,
    buffer_count: u32,
    stop_timeout: Option<Duration>,
    priority: ThreadPriority,
}

impl AsyncReader {
    /// Bind an engine to an open device and register its context.
    pub(crate) fn new(handle: Arc<DeviceHandle>, config: &AcquisitionConfig) -> Self {
        let shared = Arc::new(Shared::new(handle.index(), config));
        let _ = shared.device.set(handle.clone());
        let token = ContextToken::register(shared.clone());

        Self {
            handle,
            shared,
            token: Some(token),
            worker: None,
            abandoned: false,
            samples_per_read: config.samples_per_read,
            buffer_count: config.buffer_count,
            stop_timeout: config.stop_timeout(),
            priority: config.worker_priority,
        }
    }

    fn index(&self) -> u32 {
        self.handle.index()
    }

    /// Start streaming. `samples_per_read` overrides the configured chunk size.
    pub fn start_async(&mut self, samples_per_read: Option<u32>) -> RtlSdrResult<()> {
        if self.worker.is_some() || self.abandoned {
            return Err(RtlSdrError::AlreadyRunning);
        }
        let ctx = self
            .token
            .as_ref()
            .map(|t| t.as_ptr() as usize)
            .ok_or(RtlSdrError::NotInitialized("acquisition context"))?;

        let buf_len = buffer_len_for(samples_per_read.unwrap_or(self.samples_per_read))?;
        let buf_num = self.buffer_count;
        let index = self.index();

        let dev = self.handle.ptr()?;
        check("reset_buffer", self.handle.api().reset_buffer(dev), index)?;

        self.shared.clear_fault();
        self.shared.cancel_requested.store(false, Ordering::Release);
        self.shared.install_queue();
        self.shared.set_state(AcquisitionState::Running);

        let handle = self.handle.clone();
        let shared = self.shared.clone();
        let spawned = rt::spawn_priority_thread(
            format!("rtlsdr-async-{}", index),
            self.priority,
            move || {
                let dev = match handle.ptr() {
                    Ok(dev) => dev,
                    Err(e) => return shared.record_fault(e),
                };
                tracing::debug!("Worker entering read_async on device #{}", index);
                let ret =
                    handle
                        .api()
                        .read_async(dev, trampoline, ctx as *mut c_void, buf_num, buf_len);
                if ret != 0 && !shared.cancel_requested.load(Ordering::Acquire) {
                    let err = RtlSdrError::native("read_async", ret, index);
                    tracing::error!("{}", err);
                    shared.record_fault(err);
                }
                tracing::debug!("Worker left read_async on device #{}", index);
            },
        );

        match spawned {
            Ok(worker) => {
                self.worker = Some(worker);
                tracing::info!(
                    "Started async acquisition on device #{} ({} byte buffers)",
                    index,
                    buf_len
                );
                Ok(())
            }
            Err(e) => {
                self.shared.discard_queue();
                self.shared.set_state(AcquisitionState::Idle);
                Err(e)
            }
        }
    }

    /// Stop streaming, waiting up to the configured stop timeout.
    pub fn stop_async(&mut self) -> RtlSdrResult<StopOutcome> {
        self.stop_async_timeout(self.stop_timeout)
    }

    /// Stop streaming, waiting at most `timeout` for the worker (`None` waits
    /// forever).
    ///
    /// A fault recorded during the session is returned as `Err` once teardown
    /// has completed.
    pub fn stop_async_timeout(&mut self, timeout: Option<Duration>) -> RtlSdrResult<StopOutcome> {
        let Some(worker) = self.worker.take() else {
            return Ok(StopOutcome::AlreadyIdle);
        };
        let index = self.index();

        if !worker.is_finished() && !self.shared.cancel_requested.load(Ordering::Acquire) {
            if let Err(e) = self.cancel() {
                // The driver may have finished on its own in the meantime, and
                // a faulted session is already on its way out of read_async.
                if !worker.is_finished() && !self.shared.faulted.load(Ordering::Acquire) {
                    self.worker = Some(worker);
                    return Err(e);
                }
            }
        }

        self.shared.set_state(AcquisitionState::StopRequested);
        let joined = join_timeout(worker, timeout);
        self.shared.discard_queue();
        self.shared.set_state(AcquisitionState::Idle);

        match joined {
            Join::Finished(Ok(())) => {}
            Join::Finished(Err(_)) => {
                tracing::error!("Acquisition thread for device #{} panicked", index);
                self.shared.record_fault(RtlSdrError::WorkerPanicked(index));
            }
            Join::TimedOut => {
                tracing::warn!(
                    "Acquisition thread for device #{} did not stop within {:?}, abandoning it",
                    index,
                    timeout
                );
                self.abandoned = true;
                return Ok(StopOutcome::Abandoned);
            }
        }

        tracing::info!("Stopped async acquisition on device #{}", index);
        match self.shared.fault() {
            Some(fault) => Err(fault),
            None => Ok(StopOutcome::Stopped),
        }
    }

    fn cancel(&self) -> RtlSdrResult<()> {
        let dev = self.handle.ptr()?;
        self.shared.cancel_requested.store(true, Ordering::Release);
        let ret = self.handle.api().cancel_async(dev);
        if ret != 0 {
            self.shared.cancel_requested.store(false, Ordering::Release);
        }
        check("cancel_async", ret, self.index())
    }

    /// Stop if running and release the context registration.
    ///
    /// A fault from the session is only logged here; it stays readable through
    /// [`fault`](Self::fault). If the worker cannot be joined it is abandoned,
    /// and the context is leaked so late callbacks still resolve.
    pub(crate) fn shutdown(&mut self) -> RtlSdrResult<()> {
        let result = match self.stop_async() {
            Ok(_) => Ok(()),
            Err(e) if self.worker.is_none() => {
                tracing::warn!(
                    "Acquisition on device #{} ended with a fault: {}",
                    self.index(),
                    e
                );
                Ok(())
            }
            Err(e) => {
                if self.worker.take().is_some() {
                    // Cancel failed; the worker still owns the device.
                    self.abandoned = true;
                    self.shared.discard_queue();
                    self.shared.set_state(AcquisitionState::Idle);
                }
                Err(e)
            }
        };

        if let Some(token) = self.token.take() {
            if self.abandoned {
                token.leak();
            }
        }
        result
    }

    /// True once a worker was left behind; the device must not be closed.
    pub fn is_abandoned(&self) -> bool {
        self.abandoned
    }

    pub fn state(&self) -> AcquisitionState {
        self.shared.state()
    }

    pub fn is_running(&self) -> bool {
        self.worker.is_some()
    }

    /// Fault recorded during the current or last session.
    pub fn fault(&self) -> Option<RtlSdrError> {
        self.shared.fault()
    }

    /// Remove up to `max_count` samples from the front of the queue.
    pub fn get_samples_from_async_buffer(&self, max_count: usize) -> RtlSdrResult<Vec<IqSample>> {
        self.shared.drain(max_count)
    }

    pub fn try_dequeue(&self) -> RtlSdrResult<Option<IqSample>> {
        Ok(self.shared.queue()?.pop())
    }

    pub fn async_buffer_len(&self) -> RtlSdrResult<usize> {
        Ok(self.shared.queue()?.len())
    }

    pub fn consumer(&self) -> SampleConsumer {
        SampleConsumer {
            shared: self.shared.clone(),
        }
    }

    /// Be told how many samples each callback queued.
    ///
    /// Subscribers run on the driver's thread; see [`SampleNotifier`].
    pub fn subscribe<F>(&self, f: F) -> SubscriptionId
    where
        F: Fn(usize) + Send + Sync + 'static,
    {
        self.shared.notifier.subscribe(f)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.shared.notifier.unsubscribe(id)
    }

    pub fn max_async_buffer_size(&self) -> usize {
        self.shared.max_size.load(Ordering::Relaxed)
    }

    pub fn set_max_async_buffer_size(&self, samples: usize) -> RtlSdrResult<()> {
        if samples == 0 {
            return Err(RtlSdrError::InvalidArgument(
                "max_async_buffer_size must be > 0".to_string(),
            ));
        }
        self.shared.max_size.store(samples, Ordering::Relaxed);
        Ok(())
    }

    pub fn overflow_policy(&self) -> OverflowPolicy {
        self.shared.policy()
    }

    pub fn set_overflow_policy(&self, policy: OverflowPolicy) {
        self.shared
            .drop_on_full
            .store(policy == OverflowPolicy::Drop, Ordering::Relaxed);
    }

    pub fn dropped_samples(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }

    pub fn reset_dropped_samples(&self) {
        self.shared.dropped.store(0, Ordering::Relaxed);
    }
}

impl Drop for AsyncReader {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            tracing::error!("Stopping acquisition on device #{}: {}", self.index(), e);
        }
    }
}

impl std::fmt::Debug for AsyncReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncReader")
            .field("device", &self.index())
            .field("state", &self.state())
            .field("abandoned", &self.abandoned)
            .field("max_async_buffer_size", &self.max_async_buffer_size())
            .field("overflow_policy", &self.overflow_policy())
            .finish()
    }
}
