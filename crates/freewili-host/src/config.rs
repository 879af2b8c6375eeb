//! Host configuration, loadable from YAML.
//!
//! Every field has a default, so an empty document is a valid configuration:
//!
//! ```yaml
//! session:
//!   max_attempts: 3
//!   timeout_ms: 1000
//!   timeout_step_ms: 500
//! transfer:
//!   chunk_size: 256
//! discovery:
//!   probe_timeout_ms: 300
//!   usb_filter:
//!     - { vid: 0x2E8A, pid: 0x000A }
//! serial:
//!   baud_rate: 115200
//! ```

use std::path::Path;
use std::time::Duration;

use freewili_protocol::{MAX_PAYLOAD_SIZE, RPI_CDC_PID, RPI_VID};
use serde::{Deserialize, Serialize};

use crate::error::{HostError, Result};

/// Per-chunk header overhead (the chunk index).
const CHUNK_HEADER_SIZE: usize = 4;

/// Top level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Request/response retry policy.
    pub session: SessionConfig,
    /// File transfer tuning.
    pub transfer: TransferConfig,
    /// Device discovery.
    pub discovery: DiscoveryConfig,
    /// Serial port settings.
    pub serial: SerialConfig,
}

impl HostConfig {
    /// Parse and validate a YAML document.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: HostConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a YAML file.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&text)
    }

    /// Check value ranges serde cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.session.max_attempts == 0 {
            return Err(HostError::InvalidArgument(
                "session.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.session.timeout_ms == 0 {
            return Err(HostError::InvalidArgument(
                "session.timeout_ms must be positive".to_string(),
            ));
        }
        self.transfer.validate()
    }
}

/// Retry policy settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Total attempts per call, first send included.
    pub max_attempts: u32,
    /// Wait for the first attempt.
    pub timeout_ms: u64,
    /// Added wait per further attempt.
    pub timeout_step_ms: u64,
    /// Corrupt frame events tolerated within one call.
    pub max_resyncs: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            timeout_ms: 1000,
            timeout_step_ms: 500,
            max_resyncs: 32,
        }
    }
}

impl SessionConfig {
    /// The retry policy these settings describe.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts.max(1),
            timeout: Duration::from_millis(self.timeout_ms),
            timeout_step: Duration::from_millis(self.timeout_step_ms),
            max_resyncs: self.max_resyncs,
        }
    }
}

/// How a session waits for and retries a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, first send included. Never zero.
    pub max_attempts: u32,
    /// Wait for the first attempt.
    pub timeout: Duration,
    /// Added wait per further attempt.
    pub timeout_step: Duration,
    /// Corrupt frame events tolerated within one call.
    pub max_resyncs: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        SessionConfig::default().retry_policy()
    }
}

impl RetryPolicy {
    /// One attempt with the given timeout, as used for probing.
    pub fn single(timeout: Duration) -> Self {
        RetryPolicy {
            max_attempts: 1,
            timeout,
            timeout_step: Duration::ZERO,
            ..Default::default()
        }
    }

    /// Wait for the 1-based `attempt`.
    pub fn timeout_for(&self, attempt: u32) -> Duration {
        self.timeout + self.timeout_step * attempt.saturating_sub(1)
    }
}

/// File transfer settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// Payload bytes per chunk.
    pub chunk_size: usize,
    /// Resends of a single chunk after a session timeout.
    pub chunk_retries: u32,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            chunk_size: 256,
            chunk_retries: 3,
        }
    }
}

impl TransferConfig {
    /// Largest chunk that still fits in one frame.
    pub const MAX_CHUNK_SIZE: usize = MAX_PAYLOAD_SIZE - CHUNK_HEADER_SIZE;

    /// Check the chunk size fits a frame.
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 || self.chunk_size > Self::MAX_CHUNK_SIZE {
            return Err(HostError::InvalidArgument(format!(
                "transfer.chunk_size must be between 1 and {}, got {}",
                Self::MAX_CHUNK_SIZE,
                self.chunk_size
            )));
        }
        Ok(())
    }
}

/// A USB vendor/product pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsbId {
    /// Vendor id.
    pub vid: u16,
    /// Product id.
    pub pid: u16,
}

/// Discovery settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Timeout of the single identification attempt per port.
    pub probe_timeout_ms: u64,
    /// Only probe USB ports with one of these ids. Empty probes every port.
    pub usb_filter: Vec<UsbId>,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            probe_timeout_ms: 300,
            usb_filter: vec![UsbId {
                vid: RPI_VID,
                pid: RPI_CDC_PID,
            }],
        }
    }
}

impl DiscoveryConfig {
    /// Probe timeout as a duration.
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }
}

/// Serial port settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    /// Line rate. USB CDC ignores it, but the port must be opened with one.
    pub baud_rate: u32,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self { baud_rate: 115_200 }
    }
}
