//! Transport abstraction.
//!
//! The driver never touches a serial port directly. A [`Transport`] moves bytes
//! for one open connection, and a [`PortEnumerator`] lists and opens the
//! connections a platform offers. Dropping a transport closes it.

use std::io;
use std::time::Duration;

use serde::Serialize;

use crate::error::Result;

/// A byte-oriented duplex channel to one device.
pub trait Transport {
    /// Human readable identifier, e.g. the port path.
    fn name(&self) -> &str;

    /// Read up to `max_bytes`, waiting at most `timeout`.
    ///
    /// Returns an empty vector on timeout; short reads are normal.
    fn read(&mut self, max_bytes: usize, timeout: Duration) -> io::Result<Vec<u8>>;

    /// Write all of `data`.
    fn write(&mut self, data: &[u8]) -> io::Result<()>;

    /// Discard any bytes received but not yet read.
    fn clear_input(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn read(&mut self, max_bytes: usize, timeout: Duration) -> io::Result<Vec<u8>> {
        (**self).read(max_bytes, timeout)
    }

    fn write(&mut self, data: &[u8]) -> io::Result<()> {
        (**self).write(data)
    }

    fn clear_input(&mut self) -> io::Result<()> {
        (**self).clear_input()
    }
}

/// A port the platform reports as present.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PortInfo {
    /// Port path or name, e.g. `/dev/ttyACM0` or `COM3`.
    pub name: String,
    /// USB vendor id, for USB ports.
    pub vid: Option<u16>,
    /// USB product id, for USB ports.
    pub pid: Option<u16>,
    /// USB serial number.
    pub serial_number: Option<String>,
    /// USB manufacturer string.
    pub manufacturer: Option<String>,
    /// USB product string.
    pub product: Option<String>,
}

impl PortInfo {
    /// A port with only a name.
    pub fn new(name: impl Into<String>) -> Self {
        PortInfo {
            name: name.into(),
            vid: None,
            pid: None,
            serial_number: None,
            manufacturer: None,
            product: None,
        }
    }

    /// Attach USB identifiers.
    pub fn with_usb(mut self, vid: u16, pid: u16, serial_number: Option<String>) -> Self {
        self.vid = Some(vid);
        self.pid = Some(pid);
        self.serial_number = serial_number;
        self
    }
}

/// Lists and opens the ports of one platform.
pub trait PortEnumerator {
    /// Transport produced by [`PortEnumerator::open`].
    type Transport: Transport;

    /// All ports currently present, in platform order.
    fn available_ports(&self) -> Result<Vec<PortInfo>>;

    /// Open a connection to `port`.
    fn open(&self, port: &PortInfo) -> Result<Self::Transport>;
}
