//! Integrity checks used by the protocol.
//!
//! Two different checks are in play: a CRC-16 guarding every frame, and the
//! device's 24-bit additive checksum guarding a whole transferred file.

/// CRC-16/CCITT-FALSE (poly 0x1021, init 0xFFFF, no reflection).
///
/// Detects every single-byte corruption of the covered data.
pub fn crc16_ccitt_false(bytes: &[u8]) -> u16 {
    let mut crc: u16 = 0xFFFF;
    for &b in bytes {
        crc ^= (b as u16) << 8;
        for _ in 0..8 {
            if (crc & 0x8000) != 0 {
                crc = (crc << 1) ^ 0x1021;
            } else {
                crc <<= 1;
            }
        }
    }
    crc
}

/// Running form of the device's file checksum.
///
/// Each byte is added to the sum; whenever bit 15 is set the sum is xored
/// with 2054, and it is kept to 24 bits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FileChecksum(u32);

impl FileChecksum {
    /// Start a new checksum.
    pub fn new() -> Self {
        FileChecksum(0)
    }

    /// Fold more bytes into the checksum.
    pub fn update(&mut self, data: &[u8]) {
        let mut sum = self.0;
        for &b in data {
            sum += b as u32;
            if sum & 0x8000 != 0 {
                sum ^= 2054;
            }
            sum &= 0xFF_FFFF;
        }
        self.0 = sum;
    }

    /// Current value.
    pub fn value(&self) -> u32 {
        self.0
    }
}

/// Compute the device file checksum over a complete payload.
pub fn file_checksum(data: &[u8]) -> u32 {
    let mut sum = FileChecksum::new();
    sum.update(data);
    sum.value()
}
