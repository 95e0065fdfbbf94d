//! Slot envelope encoding.
//!
//! Each slot file holds one version of a section wrapped in a small
//! envelope so a torn write is detectable:
//!
//! ```text
//! magic (4) | format (2) | version (8) | payload_len (4) | crc (4) | payload
//! ```
//!
//! The CRC covers the payload only; the fixed header fields are validated
//! structurally.

use crate::error::{StoreError, StoreResult};

/// Magic bytes for a slot envelope.
pub const SLOT_MAGIC: [u8; 4] = *b"SMSS";

/// Current slot envelope format.
pub const SLOT_FORMAT: u16 = 1;

/// Envelope header size.
const HEADER_SIZE: usize = 4 + 2 + 8 + 4 + 4;

/// Computes a CRC32 checksum (IEEE polynomial).
#[must_use]
pub fn compute_crc32(data: &[u8]) -> u32 {
    const CRC32_TABLE: [u32; 256] = {
        let mut table = [0u32; 256];
        let mut i = 0;
        while i < 256 {
            let mut crc = i as u32;
            let mut j = 0;
            while j < 8 {
                if crc & 1 != 0 {
                    crc = (crc >> 1) ^ 0xEDB8_8320;
                } else {
                    crc >>= 1;
                }
                j += 1;
            }
            table[i] = crc;
            i += 1;
        }
        table
    };

    let mut crc = 0xFFFF_FFFF_u32;
    for &byte in data {
        let index = ((crc ^ u32::from(byte)) & 0xFF) as usize;
        crc = (crc >> 8) ^ CRC32_TABLE[index];
    }
    !crc
}

/// Encodes a slot envelope around `payload`.
#[must_use]
pub fn encode(version: u64, payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(HEADER_SIZE + payload.len());

    buf.extend_from_slice(&SLOT_MAGIC);
    buf.extend_from_slice(&SLOT_FORMAT.to_le_bytes());
    buf.extend_from_slice(&version.to_le_bytes());
    buf.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    buf.extend_from_slice(&compute_crc32(payload).to_le_bytes());
    buf.extend_from_slice(payload);

    buf
}

/// Decodes a slot envelope, returning `(version, payload)`.
pub fn decode(data: &[u8]) -> StoreResult<(u64, Vec<u8>)> {
    if data.len() < HEADER_SIZE {
        return Err(StoreError::Corrupted("slot too short".to_string()));
    }
    if data[0..4] != SLOT_MAGIC {
        return Err(StoreError::Corrupted("invalid slot magic".to_string()));
    }

    let format = u16::from_le_bytes([data[4], data[5]]);
    if format > SLOT_FORMAT {
        return Err(StoreError::Corrupted(format!(
            "unsupported slot format: {format}"
        )));
    }

    let version = u64::from_le_bytes([
        data[6], data[7], data[8], data[9], data[10], data[11], data[12], data[13],
    ]);
    let payload_len = u32::from_le_bytes([data[14], data[15], data[16], data[17]]) as usize;
    let stored_crc = u32::from_le_bytes([data[18], data[19], data[20], data[21]]);

    if data.len() < HEADER_SIZE + payload_len {
        return Err(StoreError::Corrupted("truncated slot payload".to_string()));
    }

    let payload = &data[HEADER_SIZE..HEADER_SIZE + payload_len];
    let computed_crc = compute_crc32(payload);
    if stored_crc != computed_crc {
        return Err(StoreError::Corrupted(format!(
            "slot checksum mismatch: expected {stored_crc:08x}, got {computed_crc:08x}"
        )));
    }

    Ok((version, payload.to_vec()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_roundtrip() {
        let encoded = encode(42, b"section payload");
        let (version, payload) = decode(&encoded).unwrap();
        assert_eq!(version, 42);
        assert_eq!(payload, b"section payload");
    }

    #[test]
    fn empty_payload_roundtrip() {
        let encoded = encode(7, b"");
        let (version, payload) = decode(&encoded).unwrap();
        assert_eq!(version, 7);
        assert!(payload.is_empty());
    }

    #[test]
    fn corrupt_payload_rejected() {
        let mut encoded = encode(1, b"abcdef");
        let last = encoded.len() - 1;
        encoded[last] ^= 0xFF;
        assert!(matches!(decode(&encoded), Err(StoreError::Corrupted(_))));
    }

    #[test]
    fn invalid_magic_rejected() {
        let mut encoded = encode(1, b"abcdef");
        encoded[0] = b'X';
        assert!(matches!(decode(&encoded), Err(StoreError::Corrupted(_))));
    }

    #[test]
    fn truncated_slot_rejected() {
        let encoded = encode(1, b"abcdef");
        assert!(decode(&encoded[..encoded.len() - 2]).is_err());
        assert!(decode(&encoded[..4]).is_err());
    }

    #[test]
    fn crc_known_value() {
        // IEEE CRC32 of "123456789"
        assert_eq!(compute_crc32(b"123456789"), 0xCBF4_3926);
    }
}
