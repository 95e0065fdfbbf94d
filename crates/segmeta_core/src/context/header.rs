//! Versioned context headers.
//!
//! Every context flush carries its own header so recovery can tell which
//! section a payload belongs to, how recent it is, and whether it is
//! intact:
//!
//! ```text
//! | magic (4) | format (2) | section (1) | version (8) | body_len (4) | crc32 (4) | body |
//! ```

use crate::error::{CoreError, CoreResult};
use crate::types::ContextVersion;
use segmeta_store::compute_crc32;
use std::fmt;

/// Magic bytes for a context image.
pub const CTX_MAGIC: [u8; 4] = *b"SMCX";

/// Current context image format.
pub const CTX_FORMAT: u16 = 1;

/// Header size.
const HEADER_SIZE: usize = 4 + 2 + 1 + 8 + 4 + 4;

/// The metadata contexts persisted at checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CtxSection {
    /// Segment record arena.
    Segment = 0,
    /// Free-segment bitmap.
    Allocator = 1,
    /// Rebuild target list.
    Rebuild = 2,
}

impl CtxSection {
    /// All sections, in flush-issue order.
    pub const ALL: [Self; 3] = [Self::Segment, Self::Allocator, Self::Rebuild];

    /// Section name, used as the store section key.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Segment => "segment_ctx",
            Self::Allocator => "allocator_ctx",
            Self::Rebuild => "rebuild_ctx",
        }
    }

    /// Dense index for per-section tables.
    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Returns the raw byte value.
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        self as u8
    }

    /// Converts a byte to a section.
    #[must_use]
    pub const fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(Self::Segment),
            1 => Some(Self::Allocator),
            2 => Some(Self::Rebuild),
            _ => None,
        }
    }
}

impl fmt::Display for CtxSection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Decoded header of a context image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CtxHeader {
    /// Section this image belongs to.
    pub section: CtxSection,
    /// Version stamped at flush time.
    pub version: ContextVersion,
}

impl CtxHeader {
    /// Wraps `body` in a versioned header.
    #[must_use]
    pub fn encode(section: CtxSection, version: ContextVersion, body: &[u8]) -> Vec<u8> {
        let mut buf = Vec::with_capacity(HEADER_SIZE + body.len());

        buf.extend_from_slice(&CTX_MAGIC);
        buf.extend_from_slice(&CTX_FORMAT.to_le_bytes());
        buf.push(section.as_byte());
        buf.extend_from_slice(&version.as_u64().to_le_bytes());
        buf.extend_from_slice(&(body.len() as u32).to_le_bytes());
        buf.extend_from_slice(&compute_crc32(body).to_le_bytes());
        buf.extend_from_slice(body);

        buf
    }

    /// Splits a context image into its header and body.
    pub fn decode(data: &[u8]) -> CoreResult<(Self, &[u8])> {
        if data.len() < HEADER_SIZE {
            return Err(CoreError::invalid_format("context image too short"));
        }
        if data[0..4] != CTX_MAGIC {
            return Err(CoreError::invalid_format("invalid context magic"));
        }

        let format = u16::from_le_bytes([data[4], data[5]]);
        if format > CTX_FORMAT {
            return Err(CoreError::invalid_format(format!(
                "unsupported context format: {format}"
            )));
        }

        let section = CtxSection::from_byte(data[6])
            .ok_or_else(|| CoreError::invalid_format(format!("unknown section {}", data[6])))?;

        let version = ContextVersion::new(u64::from_le_bytes([
            data[7], data[8], data[9], data[10], data[11], data[12], data[13], data[14],
        ]));

        let body_len = u32::from_le_bytes([data[15], data[16], data[17], data[18]]) as usize;
        let stored_crc = u32::from_le_bytes([data[19], data[20], data[21], data[22]]);

        if data.len() < HEADER_SIZE + body_len {
            return Err(CoreError::invalid_format("context body truncated"));
        }

        let body = &data[HEADER_SIZE..HEADER_SIZE + body_len];
        let computed_crc = compute_crc32(body);
        if stored_crc != computed_crc {
            return Err(CoreError::ChecksumMismatch {
                expected: stored_crc,
                actual: computed_crc,
            });
        }

        Ok((Self { section, version }, body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_roundtrip() {
        let encoded = CtxHeader::encode(CtxSection::Rebuild, ContextVersion::new(9), b"body");
        let (header, body) = CtxHeader::decode(&encoded).unwrap();

        assert_eq!(header.section, CtxSection::Rebuild);
        assert_eq!(header.version, ContextVersion::new(9));
        assert_eq!(body, b"body");
    }

    #[test]
    fn corrupt_body_rejected() {
        let mut encoded = CtxHeader::encode(CtxSection::Segment, ContextVersion::new(1), b"body");
        let last = encoded.len() - 1;
        encoded[last] ^= 0xFF;

        assert!(matches!(
            CtxHeader::decode(&encoded),
            Err(CoreError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn invalid_magic_rejected() {
        assert!(CtxHeader::decode(b"XXXXXXXXXXXXXXXXXXXXXXXXXXX").is_err());
    }

    #[test]
    fn section_names_are_distinct() {
        let names: std::collections::HashSet<_> =
            CtxSection::ALL.iter().map(|s| s.name()).collect();
        assert_eq!(names.len(), 3);
    }

    #[test]
    fn section_byte_roundtrip() {
        for section in CtxSection::ALL {
            assert_eq!(CtxSection::from_byte(section.as_byte()), Some(section));
        }
        assert_eq!(CtxSection::from_byte(7), None);
    }
}
