//! Responses and notifications from the device.

use crate::commands::{read_u32, require_len};
use crate::constants::*;
use crate::error::*;
use crate::frame::{Frame, FrameKind};
use crate::types::AppInfo;

/// Responses received from the device, correlated to a command by sequence id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// Command accepted. The payload layout depends on the command.
    Ok {
        /// Command specific reply data.
        payload: Vec<u8>,
    },

    /// Command rejected by the device.
    Error {
        /// Device error code.
        code: DeviceErrorCode,
        /// Extra detail bytes (e.g. the rejected pin number).
        detail: Vec<u8>,
    },

    /// Identification data.
    Identity(AppInfo),
}

impl Response {
    /// Get the opcode for this response.
    pub fn code(&self) -> u8 {
        match self {
            Response::Ok { .. } => RESP_OK,
            Response::Error { .. } => RESP_ERR,
            Response::Identity(_) => RESP_IDENTITY,
        }
    }

    /// Encode the response payload (without framing).
    pub fn encode_payload(&self) -> Vec<u8> {
        match self {
            Response::Ok { payload } => payload.clone(),
            Response::Error { code, detail } => {
                let mut buf = Vec::with_capacity(1 + detail.len());
                buf.push((*code).into());
                buf.extend_from_slice(detail);
                buf
            }
            Response::Identity(info) => info.encode_identity(),
        }
    }

    /// Build the response frame answering `sequence_id`.
    pub fn to_frame(&self, sequence_id: u8) -> Result<Frame, ProtocolError> {
        Frame::new(self.code(), sequence_id, self.encode_payload())
    }

    /// Decode a response from its opcode and payload.
    pub fn decode(opcode: u8, payload: &[u8]) -> Result<Self, ProtocolError> {
        match opcode {
            RESP_OK => Ok(Response::Ok {
                payload: payload.to_vec(),
            }),
            RESP_ERR => {
                require_len(payload, 1)?;
                Ok(Response::Error {
                    code: DeviceErrorCode::from(payload[0]),
                    detail: payload[1..].to_vec(),
                })
            }
            RESP_IDENTITY => Ok(Response::Identity(AppInfo::decode_identity(payload)?)),
            _ => Err(ProtocolError::UnknownOpcode(opcode)),
        }
    }

    /// Turn a device rejection into an error, yielding the `Ok` payload.
    pub fn into_ok_payload(self, command: u8) -> Result<Vec<u8>, ProtocolError> {
        match self {
            Response::Ok { payload } => Ok(payload),
            Response::Error { code, .. } => Err(ProtocolError::DeviceError(code)),
            Response::Identity(_) => Err(ProtocolError::UnexpectedResponse {
                command,
                actual: RESP_IDENTITY,
            }),
        }
    }
}

/// Unsolicited notifications from the device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    /// Data raised by an I2C interrupt.
    I2cInterrupt {
        /// Interrupt data.
        data: Vec<u8>,
    },

    /// Firmware log text.
    Log {
        /// Text line.
        text: String,
    },

    /// IO levels changed.
    IoChanged {
        /// New bitmask of all IO levels.
        mask: u32,
    },
}

impl Notification {
    /// Get the opcode for this notification.
    pub fn code(&self) -> u8 {
        match self {
            Notification::I2cInterrupt { .. } => NOTIFY_I2C_INTERRUPT,
            Notification::Log { .. } => NOTIFY_LOG,
            Notification::IoChanged { .. } => NOTIFY_IO_CHANGED,
        }
    }

    /// Encode the notification payload.
    pub fn encode_payload(&self) -> Vec<u8> {
        match self {
            Notification::I2cInterrupt { data } => data.clone(),
            Notification::Log { text } => text.as_bytes().to_vec(),
            Notification::IoChanged { mask } => mask.to_le_bytes().to_vec(),
        }
    }

    /// Build the notification frame. Notifications carry sequence id 0.
    pub fn to_frame(&self) -> Result<Frame, ProtocolError> {
        Frame::new(self.code(), 0, self.encode_payload())
    }

    /// Decode a notification from its opcode and payload.
    pub fn decode(opcode: u8, payload: &[u8]) -> Result<Self, ProtocolError> {
        match opcode {
            NOTIFY_I2C_INTERRUPT => Ok(Notification::I2cInterrupt {
                data: payload.to_vec(),
            }),
            // Firmware log lines are not guaranteed to be clean UTF-8.
            NOTIFY_LOG => Ok(Notification::Log {
                text: String::from_utf8_lossy(payload).to_string(),
            }),
            NOTIFY_IO_CHANGED => {
                require_len(payload, 4)?;
                Ok(Notification::IoChanged {
                    mask: read_u32(payload),
                })
            }
            _ => Err(ProtocolError::UnknownOpcode(opcode)),
        }
    }
}

/// Either a response or a notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// A response to the command with this sequence id.
    Response {
        /// Sequence id of the command being answered.
        sequence_id: u8,
        /// The response.
        response: Response,
    },
    /// An unsolicited notification.
    Notification(Notification),
}

impl Message {
    /// Decode a device → host frame.
    pub fn from_frame(frame: &Frame) -> Result<Self, ProtocolError> {
        match frame.kind() {
            FrameKind::Response => Ok(Message::Response {
                sequence_id: frame.sequence_id(),
                response: Response::decode(frame.opcode(), frame.payload())?,
            }),
            FrameKind::Notification => Ok(Message::Notification(Notification::decode(
                frame.opcode(),
                frame.payload(),
            )?)),
            FrameKind::Command => Err(ProtocolError::InvalidData(format!(
                "command frame 0x{:02X} received from device",
                frame.opcode()
            ))),
        }
    }
}

// ============================================================================
// Typed reply payloads
// ============================================================================

/// Reply to `SetIo`: the pin the device accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IoAck {
    /// Accepted pin.
    pub pin: u8,
}

impl IoAck {
    /// Encode as an `Ok` payload.
    pub fn encode(&self) -> Vec<u8> {
        vec![self.pin]
    }

    /// Decode from an `Ok` payload.
    pub fn decode(payload: &[u8]) -> Result<Self, ProtocolError> {
        require_len(payload, 1)?;
        Ok(IoAck { pin: payload[0] })
    }
}

/// Reply to `FileChunk`: the index the device stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkAck {
    /// Acknowledged chunk index.
    pub index: u32,
}

impl ChunkAck {
    /// Encode as an `Ok` payload.
    pub fn encode(&self) -> Vec<u8> {
        self.index.to_le_bytes().to_vec()
    }

    /// Decode from an `Ok` payload.
    pub fn decode(payload: &[u8]) -> Result<Self, ProtocolError> {
        require_len(payload, 4)?;
        Ok(ChunkAck {
            index: read_u32(payload),
        })
    }
}

/// Reply to `FileGetBegin`: size and integrity value of the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileInfo {
    /// File size in bytes.
    pub total_length: u32,
    /// Device file checksum.
    pub checksum: u32,
}

impl FileInfo {
    /// Encode as an `Ok` payload.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(8);
        buf.extend_from_slice(&self.total_length.to_le_bytes());
        buf.extend_from_slice(&self.checksum.to_le_bytes());
        buf
    }

    /// Decode from an `Ok` payload.
    pub fn decode(payload: &[u8]) -> Result<Self, ProtocolError> {
        require_len(payload, 8)?;
        Ok(FileInfo {
            total_length: read_u32(&payload[..4]),
            checksum: read_u32(&payload[4..8]),
        })
    }
}

/// Reply to `FileGetChunk`: one chunk of file data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkData {
    /// Chunk index.
    pub index: u32,
    /// Chunk bytes.
    pub data: Vec<u8>,
}

impl ChunkData {
    /// Encode as an `Ok` payload.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(4 + self.data.len());
        buf.extend_from_slice(&self.index.to_le_bytes());
        buf.extend_from_slice(&self.data);
        buf
    }

    /// Decode from an `Ok` payload.
    pub fn decode(payload: &[u8]) -> Result<Self, ProtocolError> {
        require_len(payload, 4)?;
        Ok(ChunkData {
            index: read_u32(&payload[..4]),
            data: payload[4..].to_vec(),
        })
    }
}

/// Decode a little-endian `u32` reply (e.g. the `GetAllIo` bitmask).
pub fn decode_u32_reply(payload: &[u8]) -> Result<u32, ProtocolError> {
    require_len(payload, 4)?;
    Ok(read_u32(payload))
}

/// Decode a text reply (e.g. script output). Invalid UTF-8 is replaced, not
/// rejected: the command already succeeded.
pub fn decode_text_reply(payload: &[u8]) -> String {
    String::from_utf8_lossy(payload).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ProcessorType;

    #[test]
    fn test_message_from_response_frame() {
        let frame = Response::Ok { payload: vec![1, 2] }.to_frame(9).unwrap();
        assert_eq!(
            Message::from_frame(&frame).unwrap(),
            Message::Response {
                sequence_id: 9,
                response: Response::Ok { payload: vec![1, 2] }
            }
        );
    }

    #[test]
    fn test_message_from_notification_frame() {
        let note = Notification::I2cInterrupt { data: vec![0x20] };
        let frame = note.to_frame().unwrap();
        assert_eq!(Message::from_frame(&frame).unwrap(), Message::Notification(note));
    }

    #[test]
    fn test_message_rejects_command_frame() {
        let frame = Frame::new(CMD_POLL_I2C, 1, Vec::new()).unwrap();
        assert!(matches!(
            Message::from_frame(&frame),
            Err(ProtocolError::InvalidData(_))
        ));
    }

    #[test]
    fn test_error_response_carries_code_and_detail() {
        let resp = Response::Error {
            code: DeviceErrorCode::InvalidPin,
            detail: vec![255],
        };
        let frame = resp.to_frame(4).unwrap();
        assert_eq!(frame.payload(), &[ERR_CODE_INVALID_PIN, 255]);
        let decoded = Response::decode(frame.opcode(), frame.payload()).unwrap();
        assert_eq!(decoded, resp);
        assert_eq!(
            decoded.into_ok_payload(CMD_SET_IO),
            Err(ProtocolError::DeviceError(DeviceErrorCode::InvalidPin))
        );
    }

    #[test]
    fn test_identity_is_unexpected_for_normal_commands() {
        let resp = Response::Identity(AppInfo::new(ProcessorType::Main, 1));
        assert_eq!(
            resp.into_ok_payload(CMD_POLL_I2C),
            Err(ProtocolError::UnexpectedResponse {
                command: CMD_POLL_I2C,
                actual: RESP_IDENTITY
            })
        );
    }

    #[test]
    fn test_typed_replies() {
        let info = FileInfo {
            total_length: 1000,
            checksum: 0x12_3456,
        };
        assert_eq!(FileInfo::decode(&info.encode()).unwrap(), info);

        let chunk = ChunkData {
            index: 3,
            data: vec![7, 8, 9],
        };
        assert_eq!(ChunkData::decode(&chunk.encode()).unwrap(), chunk);
        assert_eq!(ChunkAck::decode(&[5, 0, 0, 0]).unwrap(), ChunkAck { index: 5 });
        assert!(ChunkAck::decode(&[5]).is_err());
        assert_eq!(decode_u32_reply(&[1, 0, 0, 0x80]).unwrap(), 0x8000_0001);
    }

    #[test]
    fn test_io_changed_requires_mask() {
        assert!(matches!(
            Notification::decode(NOTIFY_IO_CHANGED, &[1, 2]),
            Err(ProtocolError::PayloadTooShort { .. })
        ));
    }

    #[test]
    fn test_text_reply_tolerates_invalid_utf8() {
        assert_eq!(decode_text_reply(b"done\n"), "done\n");
        assert_eq!(decode_text_reply(&[b'o', b'k', 0xFF]), "ok\u{FFFD}");
    }
}
