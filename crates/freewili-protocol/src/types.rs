//! Common types used in the protocol.

use crate::constants::*;
use crate::error::ProtocolError;

/// Which processor of the board answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ProcessorType {
    /// Could not be determined.
    #[default]
    Unknown,
    /// Main processor.
    Main,
    /// Display processor.
    Display,
}

impl From<u8> for ProcessorType {
    fn from(value: u8) -> Self {
        match value {
            PROCESSOR_MAIN => ProcessorType::Main,
            PROCESSOR_DISPLAY => ProcessorType::Display,
            _ => ProcessorType::Unknown,
        }
    }
}

impl From<ProcessorType> for u8 {
    fn from(value: ProcessorType) -> Self {
        match value {
            ProcessorType::Main => PROCESSOR_MAIN,
            ProcessorType::Display => PROCESSOR_DISPLAY,
            ProcessorType::Unknown => 0,
        }
    }
}

impl std::fmt::Display for ProcessorType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProcessorType::Unknown => write!(f, "Unknown"),
            ProcessorType::Main => write!(f, "Main"),
            ProcessorType::Display => write!(f, "Display"),
        }
    }
}

/// Firmware application information reported during identification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct AppInfo {
    /// Processor that answered.
    pub processor_type: ProcessorType,
    /// Firmware application version.
    pub version: u16,
}

impl AppInfo {
    /// Create app info.
    pub fn new(processor_type: ProcessorType, version: u16) -> Self {
        AppInfo {
            processor_type,
            version,
        }
    }

    /// Encode as an identification payload: signature, processor, version.
    pub fn encode_identity(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(DEVICE_SIGNATURE.len() + 3);
        buf.extend_from_slice(&DEVICE_SIGNATURE);
        buf.push(self.processor_type.into());
        buf.extend_from_slice(&self.version.to_le_bytes());
        buf
    }

    /// Decode an identification payload, checking the signature.
    pub fn decode_identity(payload: &[u8]) -> Result<Self, ProtocolError> {
        let expected = DEVICE_SIGNATURE.len() + 3;
        if payload.len() < expected {
            return Err(ProtocolError::PayloadTooShort {
                expected,
                actual: payload.len(),
            });
        }
        if payload[..DEVICE_SIGNATURE.len()] != DEVICE_SIGNATURE {
            return Err(ProtocolError::SignatureMismatch);
        }
        let rest = &payload[DEVICE_SIGNATURE.len()..];
        Ok(AppInfo {
            processor_type: ProcessorType::from(rest[0]),
            version: u16::from_le_bytes([rest[1], rest[2]]),
        })
    }
}

impl std::fmt::Display for AppInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} v{}", self.processor_type, self.version)
    }
}
