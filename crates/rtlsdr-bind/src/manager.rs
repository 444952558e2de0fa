//! Device enumeration and the registry of open devices.

use std::collections::BTreeMap;
use std::ffi::CString;
use std::sync::Arc;

use crate::config::{AcquisitionConfig, BindingConfig};
use crate::device::ManagedDevice;
use crate::error::{RtlSdrError, RtlSdrResult};
use crate::ffi::{self, RtlSdrApi};

/// Enumeration data for one attached dongle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub index: u32,
    pub name: String,
    pub manufacturer: String,
    pub product: String,
    pub serial: String,
}

impl DeviceInfo {
    /// Human-readable label, e.g. `"Realtek RTL2838UHIDIR SN: 00000001"`.
    pub fn label(&self) -> String {
        if self.manufacturer.is_empty() && self.product.is_empty() {
            return self.name.clone();
        }
        format!("{} {} SN: {}", self.manufacturer, self.product, self.serial)
    }
}

/// Opens devices under friendly names and owns their lifecycle.
///
/// Names are unique. Dropping the manager closes every device still open.
pub struct DeviceManager {
    api: Arc<dyn RtlSdrApi>,
    acquisition: AcquisitionConfig,
    devices: BTreeMap<String, ManagedDevice>,
}

impl DeviceManager {
    /// Load librtlsdr from the default locations with default settings.
    pub fn new() -> RtlSdrResult<Self> {
        Self::from_config(&BindingConfig::default())
    }

    pub fn from_config(config: &BindingConfig) -> RtlSdrResult<Self> {
        config
            .validate()
            .map_err(|e| RtlSdrError::InvalidArgument(e.to_string()))?;
        let lib = ffi::library(config.library_path.as_deref())?;
        tracing::debug!("Device manager using {}", lib.path());
        Ok(Self::with_api(lib, config.acquisition.clone()))
    }

    pub(crate) fn with_api(api: Arc<dyn RtlSdrApi>, acquisition: AcquisitionConfig) -> Self {
        Self {
            api,
            acquisition,
            devices: BTreeMap::new(),
        }
    }

    // ---- Enumeration ----

    pub fn device_count(&self) -> u32 {
        self.api.get_device_count()
    }

    pub fn device_info(&self, index: u32) -> Option<DeviceInfo> {
        if index >= self.device_count() {
            return None;
        }
        let name = self.api.get_device_name(index).unwrap_or_default();
        let usb = self.api.get_device_usb_strings(index).unwrap_or_default();
        Some(DeviceInfo {
            index,
            name,
            manufacturer: usb.manufacturer,
            product: usb.product,
            serial: usb.serial,
        })
    }

    pub fn devices(&self) -> Vec<DeviceInfo> {
        let devices: Vec<DeviceInfo> = (0..self.device_count())
            .filter_map(|i| self.device_info(i))
            .collect();
        for info in &devices {
            tracing::debug!("Found RTL-SDR device #{}: {}", info.index, info.label());
        }
        devices
    }

    /// Index of the device with the given USB serial.
    pub fn index_by_serial(&self, serial: &str) -> RtlSdrResult<u32> {
        let c_serial = CString::new(serial).map_err(|_| {
            RtlSdrError::InvalidArgument(format!("serial {:?} contains a NUL byte", serial))
        })?;
        let ret = self.api.get_index_by_serial(&c_serial);
        u32::try_from(ret).map_err(|_| {
            RtlSdrError::InvalidArgument(format!("no device with serial {:?} ({})", serial, ret))
        })
    }

    // ---- Registry ----

    /// Open device `index` and register it as `name`.
    pub fn open_managed_device(&mut self, index: u32, name: &str) -> RtlSdrResult<&mut ManagedDevice> {
        if name.trim().is_empty() {
            return Err(RtlSdrError::InvalidArgument(
                "device name must not be empty".to_string(),
            ));
        }
        if self.devices.contains_key(name) {
            return Err(RtlSdrError::DuplicateName(name.to_string()));
        }
        if index >= self.device_count() {
            return Err(RtlSdrError::DeviceNotFound(index));
        }

        let device = ManagedDevice::open(self.api.clone(), index, name, &self.acquisition)?;
        tracing::info!("Registered device #{} as {}", index, name);
        Ok(self.devices.entry(name.to_string()).or_insert(device))
    }

    /// Stop, close and deregister `name`.
    ///
    /// The entry is gone afterwards even if closing reported an error.
    pub fn close_managed_device(&mut self, name: &str) -> RtlSdrResult<()> {
        let device = self
            .devices
            .remove(name)
            .ok_or_else(|| RtlSdrError::UnknownName(name.to_string()))?;
        device.close()
    }

    /// Close every registered device, collecting failures instead of stopping
    /// at the first one.
    pub fn close_all(&mut self) -> RtlSdrResult<()> {
        if self.devices.is_empty() {
            return Err(RtlSdrError::NoDevicesOpen);
        }

        let failures: Vec<(String, RtlSdrError)> = std::mem::take(&mut self.devices)
            .into_iter()
            .filter_map(|(name, device)| device.close().err().map(|e| (name, e)))
            .collect();

        if failures.is_empty() {
            Ok(())
        } else {
            Err(RtlSdrError::CloseFailures(failures))
        }
    }

    pub fn get(&self, name: &str) -> Option<&ManagedDevice> {
        self.devices.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut ManagedDevice> {
        self.devices.get_mut(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        self.devices.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}

impl Drop for DeviceManager {
    fn drop(&mut self) {
        if self.devices.is_empty() {
            return;
        }
        if let Err(RtlSdrError::CloseFailures(failures)) = self.close_all() {
            for (name, e) in failures {
                tracing::error!("Closing device {}: {}", name, e);
            }
        }
    }
}

impl std::fmt::Debug for DeviceManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceManager")
            .field("devices", &self.names())
            .finish()
    }
}
