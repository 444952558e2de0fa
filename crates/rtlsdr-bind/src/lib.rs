//! # rtlsdr-bind
//!
//! Runtime-loaded bindings to librtlsdr for RTL2832U USB dongles, with a
//! callback-driven asynchronous I/Q acquisition engine.
//!
//! ## Overview
//!
//! - **Enumeration**: device count, names, USB strings, lookup by serial
//! - **Control**: frequency, sample rate, gain, direct sampling, bias tee, ...
//!   validated against the tuner fitted to the dongle
//! - **Synchronous reads**: blocking fixed-size reads decoded into samples
//! - **Asynchronous acquisition**: a worker thread blocks in
//!   `rtlsdr_read_async`, the driver's callback decodes each USB buffer into a
//!   bounded queue, and consumers poll it or subscribe to notifications
//!
//! ## Signal Flow
//!
//! ```text
//! librtlsdr ─► trampoline ─► decode ─► SegQueue<IqSample> ─► consumers
//!                                └───► SampleNotifier (count)
//! ```
//!
//! ## Example
//!
//! ```rust,no_run
//! use rtlsdr_bind::{DeviceManager, RtlSdrResult};
//!
//! fn main() -> RtlSdrResult<()> {
//!     let mut manager = DeviceManager::new()?;
//!     let dev = manager.open_managed_device(0, "rx")?;
//!
//!     dev.set_sample_rate(2_048_000)?;
//!     dev.set_center_frequency(100_000_000)?;
//!     dev.start_async(None)?;
//!
//!     let samples = dev.async_reader().get_samples_from_async_buffer(4096)?;
//!     println!("{} samples", samples.len());
//!
//!     manager.close_all()
//! }
//! ```

pub mod async_reader;
pub mod config;
mod context;
pub mod device;
pub mod error;
pub mod ffi;
mod handle;
pub mod logging;
pub mod manager;
pub mod notify;
pub mod params;
pub mod rt;
pub mod sample;
mod sync_reader;
pub mod tuner;

#[cfg(test)]
mod testing;

pub use async_reader::{AcquisitionState, AsyncReader, SampleConsumer, StopOutcome};
pub use config::{AcquisitionConfig, BindingConfig, ConfigError, OverflowPolicy};
pub use device::ManagedDevice;
pub use error::{RtlSdrError, RtlSdrResult};
pub use ffi::{is_available, UsbStrings};
pub use manager::{DeviceInfo, DeviceManager};
pub use notify::{SampleNotifier, SubscriptionId};
pub use params::ParameterCache;
pub use sample::IqSample;
pub use tuner::{DirectSampling, GainMode, TunerType};
