//! Serial port transport on top of the `serialport` crate.

use std::io::{self, Read, Write};
use std::time::Duration;

use serialport::{ClearBuffer, SerialPort, SerialPortType};
use tracing::{debug, info};

use crate::error::Result;
use crate::transport::{PortEnumerator, PortInfo, Transport};

/// Timeout used while opening a port, before any call sets its own.
const OPEN_TIMEOUT: Duration = Duration::from_millis(100);

/// Baud rate that tells RP2040 USB CDC firmware to reboot into the UF2 bootloader.
const UF2_TOUCH_BAUD: u32 = 1200;

/// An open serial port.
pub struct SerialTransport {
    name: String,
    port: Box<dyn SerialPort>,
}

impl SerialTransport {
    /// Open `name` at `baud_rate`.
    pub fn open(name: &str, baud_rate: u32) -> Result<Self> {
        let port = serialport::new(name, baud_rate)
            .timeout(OPEN_TIMEOUT)
            .open()?;
        debug!("Opened {} at {} baud", name, baud_rate);
        Ok(SerialTransport {
            name: name.to_string(),
            port,
        })
    }
}

impl Transport for SerialTransport {
    fn name(&self) -> &str {
        &self.name
    }

    fn read(&mut self, max_bytes: usize, timeout: Duration) -> io::Result<Vec<u8>> {
        self.port
            .set_timeout(timeout.max(Duration::from_millis(1)))
            .map_err(io::Error::from)?;
        let mut buf = vec![0u8; max_bytes];
        match self.port.read(&mut buf) {
            Ok(n) => {
                buf.truncate(n);
                Ok(buf)
            }
            Err(e) if e.kind() == io::ErrorKind::TimedOut => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }

    fn write(&mut self, data: &[u8]) -> io::Result<()> {
        self.port.write_all(data)?;
        self.port.flush()
    }

    fn clear_input(&mut self) -> io::Result<()> {
        self.port.clear(ClearBuffer::Input).map_err(io::Error::from)
    }
}

impl std::fmt::Debug for SerialTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialTransport")
            .field("name", &self.name)
            .finish()
    }
}

/// Enumerates the serial ports of this machine.
#[derive(Debug, Clone)]
pub struct SerialPortEnumerator {
    baud_rate: u32,
}

impl SerialPortEnumerator {
    /// Ports are opened at `baud_rate`.
    pub fn new(baud_rate: u32) -> Self {
        SerialPortEnumerator { baud_rate }
    }
}

impl PortEnumerator for SerialPortEnumerator {
    type Transport = SerialTransport;

    fn available_ports(&self) -> Result<Vec<PortInfo>> {
        let ports = serialport::available_ports()?;
        Ok(ports
            .into_iter()
            .map(|port| match port.port_type {
                SerialPortType::UsbPort(usb) => PortInfo {
                    name: port.port_name,
                    vid: Some(usb.vid),
                    pid: Some(usb.pid),
                    serial_number: usb.serial_number,
                    manufacturer: usb.manufacturer,
                    product: usb.product,
                },
                _ => PortInfo::new(port.port_name),
            })
            .collect())
    }

    fn open(&self, port: &PortInfo) -> Result<Self::Transport> {
        SerialTransport::open(&port.name, self.baud_rate)
    }
}

/// Reboot an RP2040 based board into its UF2 bootloader.
///
/// Opening the CDC port at 1200 baud and closing it again is the reset signal.
/// The port disappears afterwards and a mass storage drive shows up instead.
pub fn reset_to_uf2_bootloader(port_name: &str) -> Result<()> {
    info!("Resetting {} into the UF2 bootloader", port_name);
    let port = serialport::new(port_name, UF2_TOUCH_BAUD)
        .timeout(OPEN_TIMEOUT)
        .open()?;
    std::thread::sleep(OPEN_TIMEOUT);
    drop(port);
    Ok(())
}
