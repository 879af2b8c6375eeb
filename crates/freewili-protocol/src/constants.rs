//! Protocol constants
//!
//! These constants define the opcodes, error codes, and framing limits used on
//! the FreeWili serial channel. The numeric values are pinned by the firmware
//! contract; both ends must agree on them exactly.
//!
//! Opcode ranges determine the frame kind:
//!
//! - `0x01..=0x3F`: commands (host → device)
//! - `0x40..=0x7F`: responses (device → host)
//! - `0x80..=0xFF`: notifications (device → host, unsolicited)

// ============================================================================
// Framing
// ============================================================================

/// Size of the fixed frame header: opcode, sequence id, payload length.
pub const HEADER_SIZE: usize = 4;
/// Size of the trailing CRC-16 checksum.
pub const CHECKSUM_SIZE: usize = 2;
/// Maximum payload carried by a single frame.
pub const MAX_PAYLOAD_SIZE: usize = 1024;
/// Maximum size of a complete frame on the wire.
pub const MAX_FRAME_SIZE: usize = HEADER_SIZE + MAX_PAYLOAD_SIZE + CHECKSUM_SIZE;

/// Last opcode of the command range.
pub const COMMAND_RANGE_END: u8 = 0x3F;
/// First opcode of the notification range.
pub const NOTIFICATION_RANGE_START: u8 = 0x80;

// ============================================================================
// Command Codes (host → device)
// ============================================================================

/// Identification request, answered with [`RESP_IDENTITY`].
pub const CMD_IDENTIFY: u8 = 0x01;
/// Drive an IO pin high or low.
pub const CMD_SET_IO: u8 = 0x02;
/// Poll the I2C bus for responding addresses / interrupt data.
pub const CMD_POLL_I2C: u8 = 0x03;
/// Run a script stored on the device.
pub const CMD_RUN_SCRIPT: u8 = 0x04;
/// Generate PWM on an IO pin.
pub const CMD_GENERATE_PWM: u8 = 0x05;
/// Read all IO levels as a bitmask.
pub const CMD_GET_ALL_IO: u8 = 0x06;
/// Full-duplex SPI transfer.
pub const CMD_SPI_TRANSFER: u8 = 0x07;
/// Write to an I2C register.
pub const CMD_WRITE_I2C: u8 = 0x08;
/// Read from an I2C register.
pub const CMD_READ_I2C: u8 = 0x09;
/// Transmit data over the radio.
pub const CMD_WRITE_RADIO: u8 = 0x0A;
/// Read buffered radio data.
pub const CMD_READ_RADIO: u8 = 0x0B;
/// Transmit data over the auxiliary UART.
pub const CMD_WRITE_UART: u8 = 0x0C;
/// Load an FPGA bitstream from a file on the device.
pub const CMD_LOAD_FPGA: u8 = 0x0D;

/// Begin an outbound file transfer (host → device).
pub const CMD_FILE_BEGIN: u8 = 0x20;
/// One outbound file chunk.
pub const CMD_FILE_CHUNK: u8 = 0x21;
/// Finish an outbound file transfer with its integrity value.
pub const CMD_FILE_END: u8 = 0x22;
/// Begin an inbound file transfer (device → host).
pub const CMD_FILE_GET_BEGIN: u8 = 0x23;
/// Request one inbound file chunk.
pub const CMD_FILE_GET_CHUNK: u8 = 0x24;
/// Release the device side of an inbound transfer.
pub const CMD_FILE_GET_END: u8 = 0x25;

// ============================================================================
// Response Codes (device → host)
// ============================================================================

/// Command accepted; payload is command specific.
pub const RESP_OK: u8 = 0x40;
/// Command rejected; payload is `[error_code, detail...]`.
pub const RESP_ERR: u8 = 0x41;
/// Identification data.
pub const RESP_IDENTITY: u8 = 0x42;

// ============================================================================
// Notification Codes (device → host, unsolicited)
// ============================================================================

/// I2C interrupt data.
pub const NOTIFY_I2C_INTERRUPT: u8 = 0x80;
/// Free-form log text from the firmware.
pub const NOTIFY_LOG: u8 = 0x81;
/// IO level change event; payload is the new bitmask.
pub const NOTIFY_IO_CHANGED: u8 = 0x82;

// ============================================================================
// Error Codes (payload of RESP_ERR)
// ============================================================================

/// Opcode not supported by this firmware.
pub const ERR_CODE_UNSUPPORTED_CMD: u8 = 1;
/// Pin number out of range or not usable.
pub const ERR_CODE_INVALID_PIN: u8 = 2;
/// I2C bus error (NAK, arbitration lost, stuck bus).
pub const ERR_CODE_BUS_ERROR: u8 = 3;
/// File not found.
pub const ERR_CODE_NOT_FOUND: u8 = 4;
/// Not enough storage for the announced file.
pub const ERR_CODE_INSUFFICIENT_STORAGE: u8 = 5;
/// End-to-end checksum did not match.
pub const ERR_CODE_CHECKSUM_MISMATCH: u8 = 6;
/// Chunk arrived out of sequence.
pub const ERR_CODE_BAD_SEQUENCE: u8 = 7;
/// Illegal argument.
pub const ERR_CODE_ILLEGAL_ARG: u8 = 8;
/// File system I/O error.
pub const ERR_CODE_FILE_IO_ERROR: u8 = 9;
/// Command arrived in the wrong state (e.g. chunk without begin).
pub const ERR_CODE_BAD_STATE: u8 = 10;

// ============================================================================
// Identification
// ============================================================================

/// Signature carried at the start of every identification response.
pub const DEVICE_SIGNATURE: [u8; 4] = *b"FWIL";

/// Processor type byte: main processor.
pub const PROCESSOR_MAIN: u8 = 1;
/// Processor type byte: display processor.
pub const PROCESSOR_DISPLAY: u8 = 2;

// ============================================================================
// USB identifiers
// ============================================================================

/// Raspberry Pi vendor id.
pub const RPI_VID: u16 = 0x2E8A;
/// Raspberry Pi Pico SDK CDC UART product id.
pub const RPI_CDC_PID: u16 = 0x000A;
