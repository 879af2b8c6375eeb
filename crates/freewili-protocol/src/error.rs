//! Protocol error types.

use thiserror::Error;

/// Errors that can occur when working with the FreeWili protocol.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Payload is too short to be valid for its opcode.
    #[error("payload too short: expected at least {expected} bytes, got {actual}")]
    PayloadTooShort {
        /// Expected minimum length.
        expected: usize,
        /// Actual length received.
        actual: usize,
    },

    /// Payload is too long to fit into one frame.
    #[error("payload too long: maximum {max} bytes, got {actual}")]
    PayloadTooLong {
        /// Maximum allowed length.
        max: usize,
        /// Actual length.
        actual: usize,
    },

    /// Unknown opcode.
    #[error("unknown opcode: 0x{0:02X}")]
    UnknownOpcode(u8),

    /// Response opcode does not fit the command it answers.
    #[error("unexpected response 0x{actual:02X} to command 0x{command:02X}")]
    UnexpectedResponse {
        /// Opcode of the command that was sent.
        command: u8,
        /// Opcode of the response received.
        actual: u8,
    },

    /// Invalid data in a payload.
    #[error("invalid payload: {0}")]
    InvalidData(String),

    /// Device returned an error reply.
    #[error("device error: {0}")]
    DeviceError(DeviceErrorCode),

    /// Identification response does not carry the FreeWili signature.
    #[error("identification signature mismatch")]
    SignatureMismatch,

    /// UTF-8 decoding error.
    #[error("invalid UTF-8 in string field")]
    InvalidUtf8,
}

/// Error codes returned by the device in a `RESP_ERR` payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceErrorCode {
    /// Command not supported.
    UnsupportedCommand,
    /// Pin number rejected.
    InvalidPin,
    /// I2C bus error.
    BusError,
    /// File not found.
    NotFound,
    /// Not enough storage.
    InsufficientStorage,
    /// End-to-end checksum mismatch.
    ChecksumMismatch,
    /// Chunk out of sequence.
    BadSequence,
    /// Illegal argument.
    IllegalArg,
    /// File I/O error.
    FileIoError,
    /// Bad state for this operation.
    BadState,
    /// Unknown error code.
    Unknown(u8),
}

impl std::fmt::Display for DeviceErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceErrorCode::UnsupportedCommand => write!(f, "unsupported command"),
            DeviceErrorCode::InvalidPin => write!(f, "invalid pin"),
            DeviceErrorCode::BusError => write!(f, "bus error"),
            DeviceErrorCode::NotFound => write!(f, "not found"),
            DeviceErrorCode::InsufficientStorage => write!(f, "insufficient storage"),
            DeviceErrorCode::ChecksumMismatch => write!(f, "checksum mismatch"),
            DeviceErrorCode::BadSequence => write!(f, "bad chunk sequence"),
            DeviceErrorCode::IllegalArg => write!(f, "illegal argument"),
            DeviceErrorCode::FileIoError => write!(f, "file I/O error"),
            DeviceErrorCode::BadState => write!(f, "bad state"),
            DeviceErrorCode::Unknown(code) => write!(f, "unknown error (0x{:02X})", code),
        }
    }
}

impl From<u8> for DeviceErrorCode {
    fn from(code: u8) -> Self {
        use crate::constants::*;
        match code {
            ERR_CODE_UNSUPPORTED_CMD => DeviceErrorCode::UnsupportedCommand,
            ERR_CODE_INVALID_PIN => DeviceErrorCode::InvalidPin,
            ERR_CODE_BUS_ERROR => DeviceErrorCode::BusError,
            ERR_CODE_NOT_FOUND => DeviceErrorCode::NotFound,
            ERR_CODE_INSUFFICIENT_STORAGE => DeviceErrorCode::InsufficientStorage,
            ERR_CODE_CHECKSUM_MISMATCH => DeviceErrorCode::ChecksumMismatch,
            ERR_CODE_BAD_SEQUENCE => DeviceErrorCode::BadSequence,
            ERR_CODE_ILLEGAL_ARG => DeviceErrorCode::IllegalArg,
            ERR_CODE_FILE_IO_ERROR => DeviceErrorCode::FileIoError,
            ERR_CODE_BAD_STATE => DeviceErrorCode::BadState,
            _ => DeviceErrorCode::Unknown(code),
        }
    }
}

impl From<DeviceErrorCode> for u8 {
    fn from(code: DeviceErrorCode) -> Self {
        use crate::constants::*;
        match code {
            DeviceErrorCode::UnsupportedCommand => ERR_CODE_UNSUPPORTED_CMD,
            DeviceErrorCode::InvalidPin => ERR_CODE_INVALID_PIN,
            DeviceErrorCode::BusError => ERR_CODE_BUS_ERROR,
            DeviceErrorCode::NotFound => ERR_CODE_NOT_FOUND,
            DeviceErrorCode::InsufficientStorage => ERR_CODE_INSUFFICIENT_STORAGE,
            DeviceErrorCode::ChecksumMismatch => ERR_CODE_CHECKSUM_MISMATCH,
            DeviceErrorCode::BadSequence => ERR_CODE_BAD_SEQUENCE,
            DeviceErrorCode::IllegalArg => ERR_CODE_ILLEGAL_ARG,
            DeviceErrorCode::FileIoError => ERR_CODE_FILE_IO_ERROR,
            DeviceErrorCode::BadState => ERR_CODE_BAD_STATE,
            DeviceErrorCode::Unknown(code) => code,
        }
    }
}
