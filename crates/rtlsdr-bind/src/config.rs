//! # Configuration
//!
//! YAML configuration for the binding: where to find librtlsdr, how the async
//! acquisition engine buffers samples, and logging.
//!
//! ## Configuration Search Path
//!
//! Configuration is loaded from the first file found:
//! 1. Path specified via `RTLSDR_BIND_CONFIG` environment variable
//! 2. `./rtlsdr-bind.yaml` (current directory)
//! 3. `~/.config/rtlsdr-bind/config.yaml` (user config)
//! 4. `/etc/rtlsdr-bind/config.yaml` (system config)
//!
//! ## Example Configuration
//!
//! ```yaml
//! library_path: /opt/rtl-sdr/lib/librtlsdr.so.0
//!
//! acquisition:
//!   max_async_buffer_size: 1048576
//!   overflow_policy: drop
//!   samples_per_read: 16384
//!   stop_timeout_ms: 5000
//!   worker_priority: high
//!
//! logging:
//!   level: debug
//!   format: compact
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::logging::LogConfig;
use crate::rt::ThreadPriority;

/// Environment variable naming the configuration file.
pub const CONFIG_PATH_ENV: &str = "RTLSDR_BIND_CONFIG";

/// Default async read size: 16384 samples, 32768 bytes.
pub const DEFAULT_SAMPLES_PER_READ: u32 = 16_384;

/// Default async queue limit in samples.
pub const DEFAULT_MAX_ASYNC_BUFFER_SIZE: usize = 1_048_576;

/// Error type for configuration operations.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("config not found: {0}")]
    NotFound(String),
    #[error("failed to read config: {0}")]
    ReadError(String),
    #[error("failed to parse config: {0}")]
    ParseError(String),
    #[error("invalid config: {0}")]
    ValidationError(String),
}

/// What the trampoline does when a batch would not fit in the async queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OverflowPolicy {
    /// Discard the batch and count it
    Drop,
    /// Fault the acquisition; losing samples silently is not acceptable
    #[default]
    Fail,
}

/// Async acquisition settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AcquisitionConfig {
    /// Queue limit in samples
    pub max_async_buffer_size: usize,
    /// Overflow handling policy
    pub overflow_policy: OverflowPolicy,
    /// Samples per driver buffer when `start_async` gets no hint
    pub samples_per_read: u32,
    /// Number of driver buffers, 0 = driver default
    pub buffer_count: u32,
    /// How long `stop_async` waits for the worker, None = forever
    pub stop_timeout_ms: Option<u64>,
    /// Scheduling priority of the worker thread
    pub worker_priority: ThreadPriority,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            max_async_buffer_size: DEFAULT_MAX_ASYNC_BUFFER_SIZE,
            overflow_policy: OverflowPolicy::Fail,
            samples_per_read: DEFAULT_SAMPLES_PER_READ,
            buffer_count: 0,
            stop_timeout_ms: Some(5_000),
            worker_priority: ThreadPriority::High,
        }
    }
}

impl AcquisitionConfig {
    pub fn stop_timeout(&self) -> Option<Duration> {
        self.stop_timeout_ms.map(Duration::from_millis)
    }
}

/// Complete binding configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct BindingConfig {
    /// Explicit librtlsdr path, tried before the platform defaults
    pub library_path: Option<PathBuf>,
    pub acquisition: AcquisitionConfig,
    pub logging: LogConfig,
}

impl BindingConfig {
    /// Load configuration from the search path, falling back to defaults.
    pub fn load() -> Result<Self, ConfigError> {
        if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
            let path = PathBuf::from(path);
            if path.exists() {
                return Self::load_from(&path);
            }
            return Err(ConfigError::NotFound(path.display().to_string()));
        }

        for path in Self::config_search_paths() {
            if path.exists() {
                tracing::debug!("Loading config from {}", path.display());
                return Self::load_from(&path);
            }
        }

        Ok(Self::default())
    }

    /// Load configuration from a specific file.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadError(format!("{}: {}", path.display(), e)))?;

        let config = Self::parse(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a YAML string.
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(yaml).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Save configuration to a file.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content =
            serde_yaml::to_string(self).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        std::fs::write(path, content)
            .map_err(|e| ConfigError::ReadError(format!("{}: {}", path.display(), e)))
    }

    /// Get configuration search paths.
    pub fn config_search_paths() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from("./rtlsdr-bind.yaml")];

        if let Some(dirs) = directories::ProjectDirs::from("", "", "rtlsdr-bind") {
            paths.push(dirs.config_dir().join("config.yaml"));
        }

        paths.push(PathBuf::from("/etc/rtlsdr-bind/config.yaml"));
        paths
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let acq = &self.acquisition;

        if acq.max_async_buffer_size == 0 {
            return Err(ConfigError::ValidationError(
                "max_async_buffer_size must be > 0".to_string(),
            ));
        }

        if acq.samples_per_read == 0 {
            return Err(ConfigError::ValidationError(
                "samples_per_read must be > 0".to_string(),
            ));
        }

        // Two bytes per sample must still fit the driver's u32 length.
        if acq.samples_per_read > u32::MAX / 2 - 512 {
            return Err(ConfigError::ValidationError(
                "samples_per_read too large".to_string(),
            ));
        }

        Ok(())
    }

    /// Generate example configuration YAML.
    pub fn example_yaml() -> String {
        let config = Self {
            library_path: Some(PathBuf::from("/usr/local/lib/librtlsdr.so.0")),
            acquisition: AcquisitionConfig {
                overflow_policy: OverflowPolicy::Drop,
                ..Default::default()
            },
            ..Default::default()
        };

        serde_yaml::to_string(&config).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::LogLevel;

    #[test]
    fn test_default_config() {
        let config = BindingConfig::default();
        assert!(config.library_path.is_none());
        assert_eq!(config.acquisition.max_async_buffer_size, 1_048_576);
        assert_eq!(config.acquisition.overflow_policy, OverflowPolicy::Fail);
        assert_eq!(config.acquisition.samples_per_read, 16_384);
        assert_eq!(
            config.acquisition.stop_timeout(),
            Some(Duration::from_secs(5))
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_yaml() {
        let yaml = r#"
library_path: /opt/librtlsdr.so
acquisition:
  max_async_buffer_size: 65536
  overflow_policy: drop
  stop_timeout_ms: ~
  worker_priority: normal
logging:
  level: debug
"#;
        let config = BindingConfig::parse(yaml).unwrap();
        assert_eq!(config.library_path, Some(PathBuf::from("/opt/librtlsdr.so")));
        assert_eq!(config.acquisition.max_async_buffer_size, 65_536);
        assert_eq!(config.acquisition.overflow_policy, OverflowPolicy::Drop);
        assert_eq!(config.acquisition.stop_timeout(), None);
        assert_eq!(config.acquisition.worker_priority, ThreadPriority::Normal);
        // unspecified fields keep defaults
        assert_eq!(config.acquisition.samples_per_read, 16_384);
        assert_eq!(config.logging.level, LogLevel::Debug);
    }

    #[test]
    fn test_parse_error() {
        let err = BindingConfig::parse("acquisition: [1, 2").unwrap_err();
        assert!(matches!(err, ConfigError::ParseError(_)));
    }

    #[test]
    fn test_validation() {
        let mut config = BindingConfig::default();
        config.acquisition.max_async_buffer_size = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValidationError(_))
        ));

        let mut config = BindingConfig::default();
        config.acquisition.samples_per_read = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");

        let mut config = BindingConfig::default();
        config.acquisition.overflow_policy = OverflowPolicy::Drop;
        config.acquisition.buffer_count = 8;
        config.save(&path).unwrap();

        let loaded = BindingConfig::load_from(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_load_from_missing_file() {
        let err = BindingConfig::load_from(Path::new("/nonexistent/rtlsdr-bind.yaml")).unwrap_err();
        assert!(matches!(err, ConfigError::ReadError(_)));
    }

    #[test]
    fn test_example_yaml() {
        let yaml = BindingConfig::example_yaml();
        assert!(yaml.contains("overflow_policy: drop"));
        let parsed = BindingConfig::parse(&yaml).unwrap();
        assert!(parsed.library_path.is_some());
    }

    #[test]
    fn test_config_search_paths() {
        let paths = BindingConfig::config_search_paths();
        assert_eq!(paths.first(), Some(&PathBuf::from("./rtlsdr-bind.yaml")));
        assert_eq!(
            paths.last(),
            Some(&PathBuf::from("/etc/rtlsdr-bind/config.yaml"))
        );
    }
}
