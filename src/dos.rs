//! MZ header and the placeholder-module marker.

use crate::reader::Reader;
use crate::{Error, Result};

/// "MZ"
pub const DOS_SIGNATURE: u16 = 0x5A4D;

/// Marker written right after the DOS header by builders of placeholder
/// modules: images that only carry headers and stand in for a real DLL.
pub const PLACEHOLDER_SIGNATURE: &[u8; 21] = b"Wine placeholder DLL\0";

/// The parts of IMAGE_DOS_HEADER the decoder needs.
///
/// Only the signature and the pointer to the NT headers matter for PE
/// decoding; the real-mode loader fields are not kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DosHeader {
    pub e_magic: u16,
    /// Header size in 16-byte paragraphs.
    pub e_cparhdr: u16,
    /// File offset of the real-mode relocation table.
    pub e_lfarlc: u16,
    /// File offset of the NT headers.
    pub e_lfanew: i32,
}

impl DosHeader {
    pub const SIZE: usize = 64;

    pub fn parse(data: &[u8]) -> Result<Self> {
        let Some(data) = data.get(..Self::SIZE) else {
            return Err(Error::buffer_too_small(Self::SIZE, data.len()));
        };
        let word = |at: usize| u16::from_le_bytes([data[at], data[at + 1]]);

        if word(0) != DOS_SIGNATURE {
            return Err(Error::InvalidDosSignature);
        }
        Ok(Self {
            e_magic: DOS_SIGNATURE,
            e_cparhdr: word(8),
            e_lfarlc: word(24),
            e_lfanew: i32::from_le_bytes([data[60], data[61], data[62], data[63]]),
        })
    }

    pub fn read_from<R: Reader + ?Sized>(reader: &R, offset: u64) -> Result<Self> {
        Self::parse(reader.read_exact(offset, Self::SIZE)?)
    }

    /// File offset of the NT headers, if `e_lfanew` is non-negative.
    pub fn nt_offset(&self) -> Option<u64> {
        u64::try_from(self.e_lfanew).ok()
    }
}

/// Check whether the image is a header-only placeholder module.
///
/// The marker must sit immediately after the DOS header, and the NT headers
/// must start after it so the marker cannot overlap real header data.
pub fn is_placeholder<R: Reader + ?Sized>(reader: &R) -> bool {
    let end = DosHeader::SIZE + PLACEHOLDER_SIGNATURE.len();
    let Some(head) = reader.read(0, end) else {
        return false;
    };
    let e_lfanew = i32::from_le_bytes([head[60], head[61], head[62], head[63]]);
    i64::from(e_lfanew) >= end as i64 && head[DosHeader::SIZE..] == PLACEHOLDER_SIGNATURE[..]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::SliceReader;

    fn mz(e_lfanew: i32) -> Vec<u8> {
        let mut data = vec![0u8; 0x100];
        data[..2].copy_from_slice(b"MZ");
        data[8..10].copy_from_slice(&4u16.to_le_bytes());
        data[60..64].copy_from_slice(&e_lfanew.to_le_bytes());
        data
    }

    #[test]
    fn test_rejects_short_and_unsigned_input() {
        assert!(matches!(DosHeader::parse(&[0u8; 32]), Err(Error::BufferTooSmall { .. })));
        assert!(matches!(DosHeader::parse(&[0u8; 64]), Err(Error::InvalidDosSignature)));
    }

    #[test]
    fn test_fields() {
        let header = DosHeader::parse(&mz(0x80)).unwrap();
        assert_eq!(header.e_magic, DOS_SIGNATURE);
        assert_eq!(header.e_cparhdr, 4);
        assert_eq!(header.nt_offset(), Some(0x80));
    }

    #[test]
    fn test_negative_lfanew_has_no_nt_offset() {
        let header = DosHeader::parse(&mz(-4)).unwrap();
        assert_eq!(header.nt_offset(), None);
    }

    #[test]
    fn test_placeholder_detected() {
        let mut data = mz(0x80);
        data[64..85].copy_from_slice(PLACEHOLDER_SIGNATURE);
        assert!(is_placeholder(&SliceReader::new(&data)));
    }

    #[test]
    fn test_placeholder_needs_room_before_nt_headers() {
        let mut data = mz(0x50);
        data[64..85].copy_from_slice(PLACEHOLDER_SIGNATURE);
        assert!(!is_placeholder(&SliceReader::new(&data)));
    }

    #[test]
    fn test_placeholder_absent() {
        assert!(!is_placeholder(&SliceReader::new(&mz(0x80))));
        assert!(!is_placeholder(&SliceReader::new(b"MZ")));
    }
}
