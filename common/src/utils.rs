//! Common Utilities
//!
//! Provides bit, CRC and timing helpers used across the UE implementation

use crate::types::SubcarrierSpacing;

/// Convert a byte slice to hex string for debugging
pub fn bytes_to_hex(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Calculate CRC24A for 5G NR transport blocks (TS 38.212 Section 5.1)
pub fn crc24a(data: &[u8]) -> u32 {
    const CRC24A_POLY: u32 = 0x1864CFB;
    let mut crc: u32 = 0;

    for byte in data {
        crc ^= (*byte as u32) << 16;
        for _ in 0..8 {
            if crc & 0x800000 != 0 {
                crc = (crc << 1) ^ CRC24A_POLY;
            } else {
                crc <<= 1;
            }
        }
    }

    crc & 0xFFFFFF
}

/// Pack hard bits (one bit per byte, 0 or 1) into bytes, MSB first.
///
/// Packs `min(bits.len() / 8, out.len())` whole bytes and returns that count.
pub fn pack_bits_into(bits: &[u8], out: &mut [u8]) -> usize {
    let nof_bytes = (bits.len() / 8).min(out.len());

    for (byte, chunk) in out.iter_mut().zip(bits.chunks_exact(8)).take(nof_bytes) {
        *byte = chunk
            .iter()
            .fold(0u8, |acc, &bit| (acc << 1) | (bit & 1));
    }

    nof_bytes
}

/// Unpack bytes into hard bits, MSB first.
///
/// Writes `min(bytes.len() * 8, out.len())` bits and returns that count.
pub fn unpack_bits_into(bytes: &[u8], out: &mut [u8]) -> usize {
    let mut written = 0;

    for &byte in bytes {
        for i in 0..8 {
            if written == out.len() {
                return written;
            }
            out[written] = (byte >> (7 - i)) & 1;
            written += 1;
        }
    }

    written
}

/// Time utilities for slot/frame calculations
pub mod time {
    use super::SubcarrierSpacing;

    /// Slot duration in microseconds for a subcarrier spacing
    pub fn slot_duration_us(scs: SubcarrierSpacing) -> u32 {
        match scs {
            SubcarrierSpacing::Scs15 => 1000,
            SubcarrierSpacing::Scs30 => 500,
            SubcarrierSpacing::Scs60 => 250,
            SubcarrierSpacing::Scs120 => 125,
            SubcarrierSpacing::Scs240 => 62, // 62.5 us, rounded down
        }
    }

    /// Number of slots per frame (10ms)
    pub fn slots_per_frame(scs: SubcarrierSpacing) -> u32 {
        10 * scs.slots_per_subframe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bytes_to_hex() {
        let data = vec![0x12, 0x34, 0xAB, 0xCD];
        assert_eq!(bytes_to_hex(&data), "12 34 ab cd");
    }

    #[test]
    fn test_crc24a() {
        assert_eq!(crc24a(&[]), 0);
        let crc = crc24a(b"Hello");
        assert_eq!(crc & 0xFFFFFF, crc);
        assert_ne!(crc24a(b"Hello"), crc24a(b"Hellp"));
    }

    #[test]
    fn test_crc24a_residue_is_zero() {
        // Appending the CRC to the message leaves a zero remainder
        let payload = [0xDE, 0xAD, 0xBE, 0xEF, 0x01];
        let crc = crc24a(&payload);
        let mut block = payload.to_vec();
        block.extend_from_slice(&[(crc >> 16) as u8, (crc >> 8) as u8, crc as u8]);
        assert_eq!(crc24a(&block), 0);
    }

    #[test]
    fn test_bit_packing() {
        let bits = [1, 0, 1, 0, 1, 0, 1, 0, 1, 1, 1, 1, 0, 0, 0, 0, 1];
        let mut packed = [0u8; 4];
        assert_eq!(pack_bits_into(&bits, &mut packed), 2);
        assert_eq!(&packed[..2], &[0xAA, 0xF0]);

        let mut unpacked = [0u8; 16];
        assert_eq!(unpack_bits_into(&packed[..2], &mut unpacked), 16);
        assert_eq!(unpacked[..], bits[..16]);
    }

    #[test]
    fn test_unpack_truncates_to_output() {
        let mut bits = [0u8; 5];
        assert_eq!(unpack_bits_into(&[0xFF], &mut bits), 5);
        assert_eq!(bits, [1; 5]);
    }

    #[test]
    fn test_slot_duration() {
        assert_eq!(time::slot_duration_us(SubcarrierSpacing::Scs15), 1000);
        assert_eq!(time::slot_duration_us(SubcarrierSpacing::Scs30), 500);
        assert_eq!(time::slot_duration_us(SubcarrierSpacing::Scs120), 125);
        assert_eq!(time::slots_per_frame(SubcarrierSpacing::Scs30), 20);
    }
}
