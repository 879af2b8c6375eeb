//! Host driver for FreeWili boards.
//!
//! This crate talks to a FreeWili over any byte [`Transport`], normally its USB
//! serial port:
//!
//! - [`Session`]: request/response calls with retries, sequence matching and
//!   notification dispatch, plus typed device commands (`set_io`, `poll_i2c`,
//!   `run_script`, ...)
//! - [`FileTransfer`]: chunked, acknowledged file upload and download with
//!   end-to-end checksums, cancellation and progress
//! - [`Discovery`]: finds boards among the serial ports by identification
//! - [`fwi`]: converts images to the board's image format
//! - [`sim`]: an in-memory simulated board
//!
//! # Example
//!
//! ```rust
//! use freewili_host::sim::{SimConfig, SimulatedDevice};
//! use freewili_host::{RetryPolicy, ScriptContext, Session};
//!
//! let device = SimulatedDevice::new(SimConfig::default());
//! let mut session = Session::new(device.connect(), RetryPolicy::default());
//!
//! session.set_io(25, true)?;
//! session.send_file(b"\0asm", "blink.wasm")?;
//!
//! let mut context = ScriptContext::new();
//! context.record_sent("blink.wasm");
//! let output = session.run_script(None, &context)?;
//! println!("{}", output);
//! # Ok::<(), freewili_host::HostError>(())
//! ```

pub mod cancel;
pub mod config;
pub mod context;
pub mod discovery;
pub mod error;
pub mod fwi;
pub mod notify;
pub mod serial;
pub mod session;
pub mod sim;
pub mod transfer;
pub mod transport;

pub use cancel::CancelToken;
pub use config::{
    DiscoveryConfig, HostConfig, RetryPolicy, SerialConfig, SessionConfig, TransferConfig, UsbId,
};
pub use context::ScriptContext;
pub use discovery::{DeviceDescriptor, Discovery};
pub use error::{AbortReason, HostError, Result};
pub use notify::{ChannelHandler, NotificationHandler};
pub use serial::{reset_to_uf2_bootloader, SerialPortEnumerator, SerialTransport};
pub use session::Session;
pub use transfer::{Direction, FileTransfer, FileTransferState, TransferPhase, TransferReport};
pub use transport::{PortEnumerator, PortInfo, Transport};

pub use freewili_protocol as protocol;
