//! Split debug (`.DBG`) files.
//!
//! A `.DBG` file starts with an `IMAGE_SEPARATE_DEBUG_HEADER`, followed by
//! a copy of the image's section table, a blob of exported names and the
//! debug directory. Debug entries point at raw file offsets, not RVAs.

use crate::debug::{DebugDirectory, DebugEntry};
use crate::reader::Reader;
use crate::section::SectionHeader;
use crate::{Error, Result};

/// "DI" read as a little-endian u16.
pub const DBG_SIGNATURE: u16 = 0x4944;

/// IMAGE_SEPARATE_DEBUG_HEADER - 48 bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SeparateDebugHeader {
    pub signature: u16,
    pub flags: u16,
    pub machine: u16,
    pub characteristics: u16,
    pub time_date_stamp: u32,
    pub check_sum: u32,
    pub image_base: u32,
    pub size_of_image: u32,
    pub number_of_sections: u32,
    /// Size of the exported names blob that precedes the debug directory.
    pub exported_names_size: u32,
    pub debug_directory_size: u32,
    pub section_alignment: u32,
}

impl SeparateDebugHeader {
    pub const SIZE: usize = 48;

    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < Self::SIZE {
            return Err(Error::buffer_too_small(Self::SIZE, data.len()));
        }

        let word = |at: usize| u16::from_le_bytes([data[at], data[at + 1]]);
        let dword = |at: usize| u32::from_le_bytes([data[at], data[at + 1], data[at + 2], data[at + 3]]);

        let signature = word(0);
        if signature != DBG_SIGNATURE {
            return Err(Error::InvalidDbgSignature);
        }

        Ok(Self {
            signature,
            flags: word(2),
            machine: word(4),
            characteristics: word(6),
            time_date_stamp: dword(8),
            check_sum: dword(12),
            image_base: dword(16),
            size_of_image: dword(20),
            number_of_sections: dword(24),
            exported_names_size: dword(28),
            debug_directory_size: dword(32),
            section_alignment: dword(36),
        })
    }

    /// Number of debug directory entries.
    pub fn debug_entry_count(&self) -> usize {
        self.debug_directory_size as usize / DebugDirectory::SIZE
    }

    /// File offset of the debug directory.
    pub fn debug_directory_offset(&self) -> u64 {
        Self::SIZE as u64
            + u64::from(self.number_of_sections) * SectionHeader::SIZE as u64
            + u64::from(self.exported_names_size)
    }
}

/// A decoded split debug file.
pub struct DbgFile<'a> {
    reader: &'a dyn Reader,
    pub header: SeparateDebugHeader,
    /// Section table; `None` when it runs past the end of the file.
    pub sections: Option<Vec<SectionHeader>>,
    /// Debug directory; `None` when it cannot be read.
    pub debug_entries: Option<Vec<DebugEntry<'a>>>,
}

impl std::fmt::Debug for DbgFile<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DbgFile")
            .field("size", &self.reader.size())
            .field("header", &self.header)
            .finish_non_exhaustive()
    }
}

impl<'a> DbgFile<'a> {
    /// Decode the header, then the section table and debug directory when
    /// they are fully present.
    pub fn parse<R: Reader>(reader: &'a R) -> Result<Self> {
        Self::from_dyn(reader)
    }

    /// [`DbgFile::parse`] over a trait object.
    pub fn from_dyn(reader: &'a dyn Reader) -> Result<Self> {
        let header = SeparateDebugHeader::parse(reader.read_exact(0, SeparateDebugHeader::SIZE)?)?;

        let table_len = (header.number_of_sections as usize).checked_mul(SectionHeader::SIZE);
        let sections = table_len
            .and_then(|len| reader.read(SeparateDebugHeader::SIZE as u64, len))
            .map(|table| {
                table
                    .chunks_exact(SectionHeader::SIZE)
                    .filter_map(|chunk| SectionHeader::parse(chunk).ok())
                    .collect::<Vec<_>>()
            });

        // The debug directory sits after the sections, so it is only
        // meaningful when the section table itself was readable.
        let debug_entries = sections.as_ref().and_then(|_| {
            let len = header.debug_entry_count() * DebugDirectory::SIZE;
            let table = reader.read(header.debug_directory_offset(), len)?;
            Some(DebugEntry::parse_table(table, move |offset, len| {
                reader.read(offset, len)
            }))
        });

        if sections.is_none() {
            tracing::warn!(
                sections = header.number_of_sections,
                "section table runs past the end of the debug file"
            );
        }

        Ok(Self {
            reader,
            header,
            sections,
            debug_entries,
        })
    }

    /// The underlying byte source.
    pub fn reader(&self) -> &'a dyn Reader {
        self.reader
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::debug::DebugPayload;
    use crate::reader::SliceReader;

    fn dbg_image() -> Vec<u8> {
        let mut data = vec![0u8; 0x200];
        data[0..2].copy_from_slice(b"DI");
        data[4..6].copy_from_slice(&0x014Cu16.to_le_bytes());
        data[24..28].copy_from_slice(&1u32.to_le_bytes());
        data[28..32].copy_from_slice(&8u32.to_le_bytes());
        data[32..36].copy_from_slice(&28u32.to_le_bytes());
        data[48..53].copy_from_slice(b".text");

        // debug entry at 48 + 40 + 8: MISC pointing at 0x100
        let entry = 96;
        data[entry + 12..entry + 16].copy_from_slice(&4u32.to_le_bytes());
        data[entry + 16..entry + 20].copy_from_slice(&0x20u32.to_le_bytes());
        data[entry + 24..entry + 28].copy_from_slice(&0x100u32.to_le_bytes());
        data[0x100..0x104].copy_from_slice(&1u32.to_le_bytes());
        data[0x10C..0x115].copy_from_slice(b"app.exe\0\0");
        data
    }

    #[test]
    fn test_parse_header_and_tables() {
        let data = dbg_image();
        let reader = SliceReader::new(&data);
        let dbg = DbgFile::parse(&reader).unwrap();
        assert_eq!(dbg.header.machine, 0x014C);
        assert_eq!(dbg.header.debug_directory_offset(), 96);

        let sections = dbg.sections.as_ref().unwrap();
        assert_eq!(sections.len(), 1);
        assert_eq!(sections[0].name_str(), ".text");

        let entries = dbg.debug_entries.as_ref().unwrap();
        assert_eq!(entries.len(), 1);
        match &entries[0].payload {
            DebugPayload::Misc(misc) => assert_eq!(misc.data, "app.exe"),
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[test]
    fn test_bad_signature() {
        let mut data = dbg_image();
        data[0..2].copy_from_slice(b"MZ");
        let reader = SliceReader::new(&data);
        assert!(matches!(DbgFile::parse(&reader), Err(Error::InvalidDbgSignature)));
    }

    #[test]
    fn test_truncated_section_table() {
        let mut data = dbg_image();
        data[24..28].copy_from_slice(&100u32.to_le_bytes());
        let reader = SliceReader::new(&data);
        let dbg = DbgFile::parse(&reader).unwrap();
        assert!(dbg.sections.is_none());
        assert!(dbg.debug_entries.is_none());
    }

    #[test]
    fn test_header_too_short() {
        let reader = SliceReader::new(b"DI\0\0");
        assert!(matches!(
            DbgFile::parse(&reader),
            Err(Error::OffsetOutOfBounds { .. })
        ));
    }
}
