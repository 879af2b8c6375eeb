//! Error types for the host driver.

use freewili_protocol::{DeviceErrorCode, ProtocolError};
use thiserror::Error;

/// Why a file transfer ended in the aborted state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbortReason {
    /// The device rejected a step of the transfer.
    Rejected(DeviceErrorCode),
    /// A step got no response within its retry budget.
    NoResponse {
        /// Chunk index, if the silent step was a chunk.
        chunk: Option<u32>,
    },
    /// The device acknowledged or sent a different chunk than requested.
    SequenceMismatch {
        /// Chunk index that was sent or requested.
        expected: u32,
        /// Chunk index the device reported.
        actual: u32,
    },
    /// The assembled data did not match the announced size.
    LengthMismatch {
        /// Announced size.
        expected: u64,
        /// Bytes actually received.
        actual: u64,
    },
    /// The end-to-end checksum did not match.
    IntegrityMismatch {
        /// Checksum announced by the sender.
        expected: u32,
        /// Checksum computed over the received data.
        actual: u32,
    },
    /// A reply could not be decoded.
    Malformed(ProtocolError),
    /// Too many corrupt frames arrived while waiting for a reply.
    CorruptStream {
        /// Corrupt events seen in the failing call.
        resyncs: u32,
    },
    /// The transport failed underneath the transfer.
    Transport(String),
    /// The caller cancelled the transfer.
    Cancelled,
}

impl std::fmt::Display for AbortReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AbortReason::Rejected(code) => write!(f, "device rejected transfer: {}", code),
            AbortReason::NoResponse { chunk: Some(index) } => {
                write!(f, "no response to chunk {}", index)
            }
            AbortReason::NoResponse { chunk: None } => write!(f, "no response from device"),
            AbortReason::SequenceMismatch { expected, actual } => {
                write!(f, "expected chunk {} but device reported {}", expected, actual)
            }
            AbortReason::LengthMismatch { expected, actual } => {
                write!(f, "expected {} bytes but received {}", expected, actual)
            }
            AbortReason::IntegrityMismatch { expected, actual } => write!(
                f,
                "checksum mismatch: expected 0x{:06X}, computed 0x{:06X}",
                expected, actual
            ),
            AbortReason::Malformed(e) => write!(f, "malformed reply: {}", e),
            AbortReason::CorruptStream { resyncs } => {
                write!(f, "stream corrupt ({} resyncs)", resyncs)
            }
            AbortReason::Transport(e) => write!(f, "transport failed: {}", e),
            AbortReason::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Errors that can occur while talking to a device.
#[derive(Debug, Error)]
pub enum HostError {
    /// Discovery found no matching device.
    #[error("device not found: {0}")]
    DeviceNotFound(String),

    /// The retry budget of a call was exhausted without a response.
    #[error("timed out waiting for response to 0x{opcode:02X} after {attempts} attempts")]
    Timeout {
        /// Opcode of the command.
        opcode: u8,
        /// Attempts made.
        attempts: u32,
    },

    /// The device answered but rejected the command, or the answer made no sense.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Too many corrupt frames while waiting for a single response.
    #[error("corrupt stream: {resyncs} resynchronizations while waiting for response to 0x{opcode:02X}")]
    CorruptStream {
        /// Opcode of the command.
        opcode: u8,
        /// Corrupt frame events seen.
        resyncs: u32,
    },

    /// A file transfer did not complete.
    #[error("transfer of '{name}' aborted: {reason}")]
    TransferAborted {
        /// File name on the device.
        name: String,
        /// Why it stopped.
        reason: AbortReason,
    },

    /// `run_script` had no explicit name and none could be resolved.
    #[error("no script name given and no file name known from this run")]
    MissingScriptName,

    /// A caller supplied argument is out of range.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Transport I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serial port error.
    #[error("serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// Configuration file could not be parsed.
    #[error("configuration error: {0}")]
    Config(#[from] serde_yaml::Error),

    /// Image decoding error.
    #[error("image error: {0}")]
    Image(#[from] image::ImageError),
}

impl HostError {
    /// Whether the failure means "no response", as opposed to a rejection.
    pub fn is_no_response(&self) -> bool {
        matches!(
            self,
            HostError::Timeout { .. }
                | HostError::TransferAborted {
                    reason: AbortReason::NoResponse { .. },
                    ..
                }
        )
    }

    /// Device error code carried by a rejection, if any.
    pub fn device_error(&self) -> Option<DeviceErrorCode> {
        match self {
            HostError::Protocol(ProtocolError::DeviceError(code)) => Some(*code),
            HostError::TransferAborted {
                reason: AbortReason::Rejected(code),
                ..
            } => Some(*code),
            _ => None,
        }
    }
}

/// Result type alias for host operations.
pub type Result<T> = std::result::Result<T, HostError>;
