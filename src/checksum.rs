//! CRC-16 used by firmware update reports and image checksums.
//!
//! Polynomial 0x1021, register preset to 0x1D0F, MSB-first, no reflection and
//! no final XOR. This is the catalogue's CRC-16/SPI-FUJITSU (also known as
//! AUG-CCITT), which is what Z-Wave firmware update receivers verify against.

use crc::{Crc, CRC_16_SPI_FUJITSU};

pub const CRC_POLY: u16 = 0x1021;
pub const CRC_INIT: u16 = 0x1D0F;

const CRC16: Crc<u16> = Crc::<u16>::new(&CRC_16_SPI_FUJITSU);

/// Checksum of `data` starting from the standard preset.
pub fn compute(data: &[u8]) -> u16 {
    CRC16.checksum(data)
}

/// Checksum over several discontiguous slices, as if they were concatenated.
pub fn compute_parts<'a>(parts: impl IntoIterator<Item = &'a [u8]>) -> u16 {
    let mut digest = CRC16.digest();
    for part in parts {
        digest.update(part);
    }
    digest.finalize()
}
