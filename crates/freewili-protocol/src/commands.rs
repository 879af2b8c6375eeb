//! Commands that can be sent to the device.

use crate::constants::*;
use crate::error::*;
use crate::frame::Frame;

/// Commands that can be sent to the device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Ask the device to identify itself. Used by discovery.
    Identify,

    /// Drive an IO pin.
    SetIo {
        /// Pin number.
        pin: u8,
        /// `true` for high, `false` for low.
        high: bool,
    },

    /// Poll the I2C bus.
    PollI2c,

    /// Run a script stored on the device.
    RunScript {
        /// File name on the device (8.3 names on older firmware).
        name: String,
    },

    /// Generate PWM on an IO pin.
    GeneratePwm {
        /// Pin number.
        pin: u8,
        /// Frequency in Hz.
        frequency_hz: u32,
        /// Duty cycle, 0-100.
        duty_percent: u8,
    },

    /// Read all IO levels.
    GetAllIo,

    /// Full-duplex SPI transfer.
    SpiTransfer {
        /// Bytes clocked out.
        data: Vec<u8>,
    },

    /// Write to an I2C device register.
    WriteI2c {
        /// 7-bit device address.
        address: u8,
        /// Register.
        register: u8,
        /// Bytes to write.
        data: Vec<u8>,
    },

    /// Read from an I2C device register.
    ReadI2c {
        /// 7-bit device address.
        address: u8,
        /// Register.
        register: u8,
        /// Number of bytes to read.
        length: u8,
    },

    /// Transmit over the radio.
    WriteRadio {
        /// Bytes to send.
        data: Vec<u8>,
    },

    /// Read buffered radio data.
    ReadRadio {
        /// Maximum number of bytes to return.
        max_len: u16,
    },

    /// Transmit over the auxiliary UART.
    WriteUart {
        /// Bytes to send.
        data: Vec<u8>,
    },

    /// Load an FPGA bitstream stored on the device.
    LoadFpga {
        /// File name on the device.
        name: String,
    },

    /// Announce an outbound file.
    FileBegin {
        /// Total file size in bytes.
        total_length: u32,
        /// Target path on the device.
        name: String,
    },

    /// One outbound file chunk.
    FileChunk {
        /// Zero-based chunk index.
        index: u32,
        /// Chunk data.
        data: Vec<u8>,
    },

    /// Finish an outbound file.
    FileEnd {
        /// End-to-end file checksum.
        checksum: u32,
    },

    /// Start reading a file from the device.
    FileGetBegin {
        /// Source path on the device.
        name: String,
    },

    /// Request one chunk of the file being read.
    FileGetChunk {
        /// Zero-based chunk index.
        index: u32,
    },

    /// Release the device side of an inbound transfer.
    FileGetEnd,
}

impl Command {
    /// Get the opcode for this command.
    pub fn code(&self) -> u8 {
        match self {
            Command::Identify => CMD_IDENTIFY,
            Command::SetIo { .. } => CMD_SET_IO,
            Command::PollI2c => CMD_POLL_I2C,
            Command::RunScript { .. } => CMD_RUN_SCRIPT,
            Command::GeneratePwm { .. } => CMD_GENERATE_PWM,
            Command::GetAllIo => CMD_GET_ALL_IO,
            Command::SpiTransfer { .. } => CMD_SPI_TRANSFER,
            Command::WriteI2c { .. } => CMD_WRITE_I2C,
            Command::ReadI2c { .. } => CMD_READ_I2C,
            Command::WriteRadio { .. } => CMD_WRITE_RADIO,
            Command::ReadRadio { .. } => CMD_READ_RADIO,
            Command::WriteUart { .. } => CMD_WRITE_UART,
            Command::LoadFpga { .. } => CMD_LOAD_FPGA,
            Command::FileBegin { .. } => CMD_FILE_BEGIN,
            Command::FileChunk { .. } => CMD_FILE_CHUNK,
            Command::FileEnd { .. } => CMD_FILE_END,
            Command::FileGetBegin { .. } => CMD_FILE_GET_BEGIN,
            Command::FileGetChunk { .. } => CMD_FILE_GET_CHUNK,
            Command::FileGetEnd => CMD_FILE_GET_END,
        }
    }

    /// Encode the command payload (without framing).
    pub fn encode_payload(&self) -> Vec<u8> {
        let mut buf = Vec::new();

        match self {
            Command::Identify | Command::PollI2c | Command::GetAllIo | Command::FileGetEnd => {}

            Command::SetIo { pin, high } => {
                buf.push(*pin);
                buf.push(*high as u8);
            }

            Command::RunScript { name }
            | Command::LoadFpga { name }
            | Command::FileGetBegin { name } => {
                buf.extend_from_slice(name.as_bytes());
            }

            Command::GeneratePwm {
                pin,
                frequency_hz,
                duty_percent,
            } => {
                buf.push(*pin);
                buf.extend_from_slice(&frequency_hz.to_le_bytes());
                buf.push(*duty_percent);
            }

            Command::SpiTransfer { data }
            | Command::WriteRadio { data }
            | Command::WriteUart { data } => {
                buf.extend_from_slice(data);
            }

            Command::WriteI2c {
                address,
                register,
                data,
            } => {
                buf.push(*address);
                buf.push(*register);
                buf.extend_from_slice(data);
            }

            Command::ReadI2c {
                address,
                register,
                length,
            } => {
                buf.push(*address);
                buf.push(*register);
                buf.push(*length);
            }

            Command::ReadRadio { max_len } => {
                buf.extend_from_slice(&max_len.to_le_bytes());
            }

            Command::FileBegin { total_length, name } => {
                buf.extend_from_slice(&total_length.to_le_bytes());
                buf.extend_from_slice(name.as_bytes());
            }

            Command::FileChunk { index, data } => {
                buf.extend_from_slice(&index.to_le_bytes());
                buf.extend_from_slice(data);
            }

            Command::FileEnd { checksum } => {
                buf.extend_from_slice(&checksum.to_le_bytes());
            }

            Command::FileGetChunk { index } => {
                buf.extend_from_slice(&index.to_le_bytes());
            }
        }

        buf
    }

    /// Build the command frame with the given sequence id.
    pub fn to_frame(&self, sequence_id: u8) -> Result<Frame, ProtocolError> {
        Frame::new(self.code(), sequence_id, self.encode_payload())
    }

    /// Decode a command from its opcode and payload (device side).
    pub fn decode(opcode: u8, payload: &[u8]) -> Result<Self, ProtocolError> {
        let command = match opcode {
            CMD_IDENTIFY => Command::Identify,
            CMD_SET_IO => {
                require_len(payload, 2)?;
                Command::SetIo {
                    pin: payload[0],
                    high: payload[1] != 0,
                }
            }
            CMD_POLL_I2C => Command::PollI2c,
            CMD_RUN_SCRIPT => Command::RunScript {
                name: decode_str(payload)?,
            },
            CMD_GENERATE_PWM => {
                require_len(payload, 6)?;
                Command::GeneratePwm {
                    pin: payload[0],
                    frequency_hz: read_u32(&payload[1..5]),
                    duty_percent: payload[5],
                }
            }
            CMD_GET_ALL_IO => Command::GetAllIo,
            CMD_SPI_TRANSFER => Command::SpiTransfer {
                data: payload.to_vec(),
            },
            CMD_WRITE_I2C => {
                require_len(payload, 2)?;
                Command::WriteI2c {
                    address: payload[0],
                    register: payload[1],
                    data: payload[2..].to_vec(),
                }
            }
            CMD_READ_I2C => {
                require_len(payload, 3)?;
                Command::ReadI2c {
                    address: payload[0],
                    register: payload[1],
                    length: payload[2],
                }
            }
            CMD_WRITE_RADIO => Command::WriteRadio {
                data: payload.to_vec(),
            },
            CMD_READ_RADIO => {
                require_len(payload, 2)?;
                Command::ReadRadio {
                    max_len: u16::from_le_bytes([payload[0], payload[1]]),
                }
            }
            CMD_WRITE_UART => Command::WriteUart {
                data: payload.to_vec(),
            },
            CMD_LOAD_FPGA => Command::LoadFpga {
                name: decode_str(payload)?,
            },
            CMD_FILE_BEGIN => {
                require_len(payload, 4)?;
                Command::FileBegin {
                    total_length: read_u32(&payload[..4]),
                    name: decode_str(&payload[4..])?,
                }
            }
            CMD_FILE_CHUNK => {
                require_len(payload, 4)?;
                Command::FileChunk {
                    index: read_u32(&payload[..4]),
                    data: payload[4..].to_vec(),
                }
            }
            CMD_FILE_END => {
                require_len(payload, 4)?;
                Command::FileEnd {
                    checksum: read_u32(&payload[..4]),
                }
            }
            CMD_FILE_GET_BEGIN => Command::FileGetBegin {
                name: decode_str(payload)?,
            },
            CMD_FILE_GET_CHUNK => {
                require_len(payload, 4)?;
                Command::FileGetChunk {
                    index: read_u32(&payload[..4]),
                }
            }
            CMD_FILE_GET_END => Command::FileGetEnd,
            _ => return Err(ProtocolError::UnknownOpcode(opcode)),
        };
        Ok(command)
    }

    /// Decode a command frame (device side).
    pub fn from_frame(frame: &Frame) -> Result<Self, ProtocolError> {
        Command::decode(frame.opcode(), frame.payload())
    }
}

pub(crate) fn require_len(data: &[u8], expected: usize) -> Result<(), ProtocolError> {
    if data.len() < expected {
        return Err(ProtocolError::PayloadTooShort {
            expected,
            actual: data.len(),
        });
    }
    Ok(())
}

pub(crate) fn read_u32(data: &[u8]) -> u32 {
    u32::from_le_bytes([data[0], data[1], data[2], data[3]])
}

pub(crate) fn decode_str(data: &[u8]) -> Result<String, ProtocolError> {
    String::from_utf8(data.to_vec()).map_err(|_| ProtocolError::InvalidUtf8)
}
