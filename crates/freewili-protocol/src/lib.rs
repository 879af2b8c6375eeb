//! FreeWili Serial Protocol
//!
//! This crate provides types and utilities for talking to FreeWili boards over
//! their USB CDC serial port. It is transport agnostic: it turns typed commands
//! into wire frames and wire bytes back into typed responses and notifications.
//!
//! # Protocol Overview
//!
//! Every message is one frame carrying an opcode, a sequence id, a
//! length-prefixed payload and a CRC-16. Messages are either:
//!
//! - **Commands** (host → device): opcodes `0x01..=0x3F`
//! - **Responses** (device → host): opcodes `0x40..=0x7F`, echoing the
//!   command's sequence id
//! - **Notifications** (device → host): opcodes `0x80..`, unsolicited
//!
//! # Example
//!
//! ```rust
//! use freewili_protocol::{Command, Decoded, FrameCodec, Message, Response};
//!
//! // Build a command frame
//! let frame = Command::SetIo { pin: 25, high: true }.to_frame(1)?;
//! let wire = frame.encode();
//!
//! // Parse a reply as it trickles in
//! let reply = Response::Ok { payload: vec![25] }.to_frame(1)?.encode();
//! let mut codec = FrameCodec::new();
//! codec.push(&reply);
//! if let Decoded::Frame(frame, _) = codec.decode() {
//!     let message = Message::from_frame(&frame)?;
//!     assert!(matches!(message, Message::Response { sequence_id: 1, .. }));
//! }
//! # let _ = wire;
//! # Ok::<(), freewili_protocol::ProtocolError>(())
//! ```

mod checksum;
mod commands;
mod constants;
mod error;
mod frame;
mod responses;
mod types;

pub use checksum::*;
pub use commands::Command;
pub use constants::*;
pub use error::*;
pub use frame::*;
pub use responses::*;
pub use types::*;
