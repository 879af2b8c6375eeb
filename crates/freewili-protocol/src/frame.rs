//! Frame encoding/decoding utilities.
//!
//! Every message on the serial channel is one frame:
//!
//! ```text
//! +--------+-----+--------+--------+-------------------+--------+--------+
//! | opcode | seq | len_lo | len_hi | payload[0..len]   | crc_lo | crc_hi |
//! +--------+-----+--------+--------+-------------------+--------+--------+
//! ```
//!
//! The CRC-16/CCITT-FALSE covers the header and payload. The opcode range
//! decides whether a frame is a command, a response or a notification.
//!
//! Decoding never fails hard: [`decode_frame`] reports [`Decoded::NeedMoreData`]
//! for a partial frame and [`Decoded::Corrupt`] for bytes that cannot start a
//! valid frame. [`FrameCodec`] accumulates bytes from the transport and
//! resynchronizes on the next plausible header after corruption.

use bytes::{Buf, BufMut, BytesMut};

use crate::checksum::crc16_ccitt_false;
use crate::constants::*;
use crate::error::ProtocolError;

/// Which direction and role a frame has.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameKind {
    /// Host → device request.
    Command,
    /// Device → host reply correlated by sequence id.
    Response,
    /// Device → host unsolicited message.
    Notification,
}

impl FrameKind {
    /// Classify an opcode by its range. Opcode 0 is never valid.
    pub fn from_opcode(opcode: u8) -> Option<Self> {
        match opcode {
            0 => None,
            1..=COMMAND_RANGE_END => Some(FrameKind::Command),
            op if op < NOTIFICATION_RANGE_START => Some(FrameKind::Response),
            _ => Some(FrameKind::Notification),
        }
    }
}

/// Whether `opcode` is one this protocol version defines.
pub fn is_known_opcode(opcode: u8) -> bool {
    matches!(
        opcode,
        CMD_IDENTIFY..=CMD_LOAD_FPGA
            | CMD_FILE_BEGIN..=CMD_FILE_GET_END
            | RESP_OK..=RESP_IDENTITY
            | NOTIFY_I2C_INTERRUPT..=NOTIFY_IO_CHANGED
    )
}

/// One atomic protocol message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    opcode: u8,
    sequence_id: u8,
    payload: Vec<u8>,
}

impl Frame {
    /// Build a frame, checking the payload fits.
    pub fn new(opcode: u8, sequence_id: u8, payload: Vec<u8>) -> Result<Self, ProtocolError> {
        if !is_known_opcode(opcode) {
            return Err(ProtocolError::UnknownOpcode(opcode));
        }
        if payload.len() > MAX_PAYLOAD_SIZE {
            return Err(ProtocolError::PayloadTooLong {
                max: MAX_PAYLOAD_SIZE,
                actual: payload.len(),
            });
        }
        Ok(Frame {
            opcode,
            sequence_id,
            payload,
        })
    }

    /// The opcode.
    pub fn opcode(&self) -> u8 {
        self.opcode
    }

    /// The sequence id.
    pub fn sequence_id(&self) -> u8 {
        self.sequence_id
    }

    /// The payload bytes.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Consume the frame, returning its payload.
    pub fn into_payload(self) -> Vec<u8> {
        self.payload
    }

    /// The frame kind implied by the opcode.
    pub fn kind(&self) -> FrameKind {
        // Frame::new only admits known opcodes, which are never 0.
        FrameKind::from_opcode(self.opcode).unwrap_or(FrameKind::Command)
    }

    /// The checksum this frame carries on the wire.
    pub fn checksum(&self) -> u16 {
        let mut buf = Vec::with_capacity(HEADER_SIZE + self.payload.len());
        self.write_header_and_payload(&mut buf);
        crc16_ccitt_false(&buf)
    }

    /// Number of bytes this frame occupies on the wire.
    pub fn wire_len(&self) -> usize {
        HEADER_SIZE + self.payload.len() + CHECKSUM_SIZE
    }

    /// Encode the frame into wire bytes.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.wire_len());
        self.write_header_and_payload(&mut buf);
        let crc = crc16_ccitt_false(&buf);
        buf.put_u16_le(crc);
        buf
    }

    fn write_header_and_payload(&self, buf: &mut Vec<u8>) {
        buf.push(self.opcode);
        buf.push(self.sequence_id);
        buf.put_u16_le(self.payload.len() as u16);
        buf.extend_from_slice(&self.payload);
    }
}

/// Outcome of one decode attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    /// A valid frame and the number of bytes it consumed.
    Frame(Frame, usize),
    /// The buffer holds the start of a frame; read more and retry.
    NeedMoreData,
    /// The buffer does not start with a valid frame.
    Corrupt,
}

/// Whether `buf` could be the start of a frame, as far as it goes.
fn plausible_header(buf: &[u8]) -> bool {
    match buf.first() {
        None => true,
        Some(&opcode) if !is_known_opcode(opcode) => false,
        Some(_) if buf.len() < HEADER_SIZE => true,
        Some(_) => (u16::from_le_bytes([buf[2], buf[3]]) as usize) <= MAX_PAYLOAD_SIZE,
    }
}

/// Try to decode one frame from the start of `buf`.
pub fn decode_frame(buf: &[u8]) -> Decoded {
    if !plausible_header(buf) {
        return Decoded::Corrupt;
    }
    if buf.len() < HEADER_SIZE {
        return Decoded::NeedMoreData;
    }

    let len = u16::from_le_bytes([buf[2], buf[3]]) as usize;
    let total = HEADER_SIZE + len + CHECKSUM_SIZE;
    if buf.len() < total {
        return Decoded::NeedMoreData;
    }

    let body_end = HEADER_SIZE + len;
    let expected = u16::from_le_bytes([buf[body_end], buf[body_end + 1]]);
    if crc16_ccitt_false(&buf[..body_end]) != expected {
        return Decoded::Corrupt;
    }

    let frame = Frame {
        opcode: buf[0],
        sequence_id: buf[1],
        payload: buf[HEADER_SIZE..body_end].to_vec(),
    };
    Decoded::Frame(frame, total)
}

/// A codec for reading framed messages out of a byte stream.
///
/// Bytes are pushed as they arrive from the transport; [`FrameCodec::decode`]
/// is called until it reports [`Decoded::NeedMoreData`].
#[derive(Debug, Default)]
pub struct FrameCodec {
    /// Buffer for accumulating incoming data.
    buffer: BytesMut,
}

impl FrameCodec {
    /// Create a new frame codec.
    pub fn new() -> Self {
        FrameCodec {
            buffer: BytesMut::with_capacity(MAX_FRAME_SIZE),
        }
    }

    /// Add received data to the buffer.
    pub fn push(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Try to decode the next frame from the buffer.
    ///
    /// A complete frame is removed from the buffer. On [`Decoded::Corrupt`]
    /// the codec has already dropped the offending byte and skipped forward
    /// to the next plausible header, so the caller simply decodes again.
    pub fn decode(&mut self) -> Decoded {
        match decode_frame(&self.buffer) {
            Decoded::Frame(frame, consumed) => {
                self.buffer.advance(consumed);
                Decoded::Frame(frame, consumed)
            }
            Decoded::NeedMoreData => Decoded::NeedMoreData,
            Decoded::Corrupt => {
                self.resync();
                Decoded::Corrupt
            }
        }
    }

    /// Drop the leading byte and scan forward to the next plausible header.
    ///
    /// Also used by callers to unstick a header whose declared length will
    /// never be satisfied. Returns the number of bytes discarded.
    pub fn resync(&mut self) -> usize {
        if self.buffer.is_empty() {
            return 0;
        }
        let mut skipped = 1;
        self.buffer.advance(1);
        while !self.buffer.is_empty() && !plausible_header(&self.buffer) {
            self.buffer.advance(1);
            skipped += 1;
        }
        log::debug!("frame resync discarded {} bytes", skipped);
        skipped
    }

    /// Get the number of buffered bytes.
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// Clear the buffer.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}
