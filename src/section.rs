//! Section Header structures and parsing.
//!
//! Object files and some linkers store names longer than eight bytes in the
//! COFF string table and write `/<decimal offset>` into the header instead.
//! [`SectionHeader::resolve_name`] follows that indirection.

use crate::reader::Reader;
use crate::text;
use crate::{Error, Result};
use bitflags::bitflags;
use std::borrow::Cow;

bitflags! {
    /// Section characteristics flags, without the alignment nibble.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SectionCharacteristics: u32 {
        const CNT_CODE = 0x0000_0020;
        const CNT_INITIALIZED_DATA = 0x0000_0040;
        const CNT_UNINITIALIZED_DATA = 0x0000_0080;
        const LNK_OTHER = 0x0000_0100;
        const LNK_INFO = 0x0000_0200;
        const LNK_REMOVE = 0x0000_0800;
        const LNK_COMDAT = 0x0000_1000;
        const MEM_FARDATA = 0x0000_8000;
        const MEM_PURGEABLE = 0x0002_0000;
        const MEM_16BIT = 0x0002_0000;
        const MEM_LOCKED = 0x0004_0000;
        const MEM_PRELOAD = 0x0008_0000;
        const LNK_NRELOC_OVFL = 0x0100_0000;
        const MEM_DISCARDABLE = 0x0200_0000;
        const MEM_NOT_CACHED = 0x0400_0000;
        const MEM_NOT_PAGED = 0x0800_0000;
        const MEM_SHARED = 0x1000_0000;
        const MEM_EXECUTE = 0x2000_0000;
        const MEM_READ = 0x4000_0000;
        const MEM_WRITE = 0x8000_0000;
    }
}

/// Mask of the alignment class nibble.
pub const ALIGN_MASK: u32 = 0x00F0_0000;

impl SectionCharacteristics {
    /// Labels printed before the alignment class.
    const LEADING: &'static [(Self, &'static str)] = &[
        (Self::CNT_CODE, "CODE"),
        (Self::CNT_INITIALIZED_DATA, "INITIALIZED_DATA"),
        (Self::CNT_UNINITIALIZED_DATA, "UNINITIALIZED_DATA"),
        (Self::LNK_OTHER, "LNK_OTHER"),
        (Self::LNK_INFO, "LNK_INFO"),
        (Self::LNK_REMOVE, "LNK_REMOVE"),
        (Self::LNK_COMDAT, "LNK_COMDAT"),
        (Self::MEM_FARDATA, "MEM_FARDATA"),
        (Self::MEM_PURGEABLE, "MEM_PURGEABLE"),
        (Self::MEM_16BIT, "MEM_16BIT"),
        (Self::MEM_LOCKED, "MEM_LOCKED"),
        (Self::MEM_PRELOAD, "MEM_PRELOAD"),
    ];

    /// Labels printed after the alignment class.
    const TRAILING: &'static [(Self, &'static str)] = &[
        (Self::LNK_NRELOC_OVFL, "LNK_NRELOC_OVFL"),
        (Self::MEM_DISCARDABLE, "MEM_DISCARDABLE"),
        (Self::MEM_NOT_CACHED, "MEM_NOT_CACHED"),
        (Self::MEM_NOT_PAGED, "MEM_NOT_PAGED"),
        (Self::MEM_SHARED, "MEM_SHARED"),
        (Self::MEM_EXECUTE, "MEM_EXECUTE"),
        (Self::MEM_READ, "MEM_READ"),
        (Self::MEM_WRITE, "MEM_WRITE"),
    ];
}

/// Decoded alignment class, `None` for the unset and reserved encodings.
pub fn alignment(characteristics: u32) -> Option<u32> {
    match (characteristics & ALIGN_MASK) >> 20 {
        n @ 1..=14 => Some(1 << (n - 1)),
        _ => None,
    }
}

/// Characteristic labels in report order: content and link flags, the
/// alignment class, then memory attributes.
pub fn characteristic_labels(characteristics: u32) -> Vec<Cow<'static, str>> {
    let flags = SectionCharacteristics::from_bits_retain(characteristics);
    let pick = |table: &'static [(SectionCharacteristics, &'static str)]| {
        table
            .iter()
            .filter(move |(flag, _)| flags.contains(*flag))
            .map(|(_, label)| Cow::Borrowed(*label))
    };

    let mut labels: Vec<Cow<'static, str>> = pick(SectionCharacteristics::LEADING).collect();
    if let Some(bytes) = alignment(characteristics) {
        labels.push(Cow::Owned(format!("ALIGN_{bytes}BYTES")));
    }
    labels.extend(pick(SectionCharacteristics::TRAILING));
    labels
}

/// Section name after string-table resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SectionName {
    /// The 8-byte inline name.
    Short(String),
    /// `/N` name resolved through the string table.
    Long { raw: String, long: String },
}

impl SectionName {
    /// The most descriptive name available.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Short(name) => name,
            Self::Long { long, .. } => long,
        }
    }
}

/// Section Header (IMAGE_SECTION_HEADER).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectionHeader {
    /// Section name (8-byte null-padded ASCII).
    pub name: [u8; 8],
    /// Virtual size of the section.
    pub virtual_size: u32,
    /// RVA of the section.
    pub virtual_address: u32,
    /// Size of raw data on disk.
    pub size_of_raw_data: u32,
    /// File offset to raw data.
    pub pointer_to_raw_data: u32,
    pub pointer_to_relocations: u32,
    pub pointer_to_linenumbers: u32,
    pub number_of_relocations: u16,
    pub number_of_linenumbers: u16,
    /// Section characteristics.
    pub characteristics: u32,
}

impl SectionHeader {
    /// Size of a section header in bytes.
    pub const SIZE: usize = 40;

    /// Parse a section header from a byte slice.
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < Self::SIZE {
            return Err(Error::buffer_too_small(Self::SIZE, data.len()));
        }

        let dword = |at: usize| u32::from_le_bytes([data[at], data[at + 1], data[at + 2], data[at + 3]]);
        let mut name = [0u8; 8];
        name.copy_from_slice(&data[0..8]);

        Ok(Self {
            name,
            virtual_size: dword(8),
            virtual_address: dword(12),
            size_of_raw_data: dword(16),
            pointer_to_raw_data: dword(20),
            pointer_to_relocations: dword(24),
            pointer_to_linenumbers: dword(28),
            number_of_relocations: u16::from_le_bytes([data[32], data[33]]),
            number_of_linenumbers: u16::from_le_bytes([data[34], data[35]]),
            characteristics: dword(36),
        })
    }

    /// Name bytes up to the first NUL, at most eight.
    pub fn raw_name(&self) -> &[u8] {
        let end = self.name.iter().position(|&b| b == 0).unwrap_or(8);
        &self.name[..end]
    }

    /// Get the inline section name as a string.
    pub fn name_str(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(self.raw_name())
    }

    /// Offset encoded by a `/N` name, parsed like C `atoi`: leading
    /// decimal digits, zero when there are none.
    pub fn long_name_offset(&self) -> Option<u32> {
        let rest = self.raw_name().strip_prefix(b"/")?;
        let digits = rest.iter().take_while(|b| b.is_ascii_digit());
        Some(digits.fold(0u32, |acc, &d| acc.wrapping_mul(10).wrapping_add(u32::from(d - b'0'))))
    }

    /// Resolve the name against the string table at file offset
    /// `string_table`. The offset must be below the table's leading size
    /// field; otherwise the inline name is kept.
    pub fn resolve_name<R: Reader + ?Sized>(&self, reader: &R, string_table: Option<u64>) -> SectionName {
        let short = self.name_str().into_owned();
        let long = string_table.zip(self.long_name_offset()).and_then(|(table, offset)| {
            let table_size = reader.read_u32(table)?;
            if offset >= table_size {
                return None;
            }
            let bytes = text::read_cstr_at(reader, table + u64::from(offset))?;
            Some(String::from_utf8_lossy(bytes).into_owned())
        });

        match long {
            Some(long) => SectionName::Long { raw: short, long },
            None => SectionName::Short(short),
        }
    }

    pub fn flags(&self) -> SectionCharacteristics {
        SectionCharacteristics::from_bits_retain(self.characteristics)
    }

    /// Whether `rva .. rva + len` lies inside the raw data mapped at this
    /// section's virtual address.
    pub fn maps(&self, rva: u32, len: usize) -> bool {
        let Some(end) = u64::from(rva).checked_add(len as u64) else {
            return false;
        };
        self.virtual_address <= rva
            && end <= u64::from(self.virtual_address) + u64::from(self.size_of_raw_data)
    }

    /// Parse a section header from a Reader at the given offset.
    pub fn read_from<R: Reader + ?Sized>(reader: &R, offset: u64) -> Result<Self> {
        Self::parse(reader.read_exact(offset, Self::SIZE)?)
    }

    /// Read up to `count` consecutive headers; the table is cut short at the
    /// first header that runs past the end of the image.
    pub fn read_sections<R: Reader + ?Sized>(reader: &R, offset: u64, count: usize) -> Vec<Self> {
        let mut sections = Vec::with_capacity(count.min(96));
        for i in 0..count {
            let at = offset + (i * Self::SIZE) as u64;
            match Self::read_from(reader, at) {
                Ok(section) => sections.push(section),
                Err(_) => {
                    tracing::warn!(
                        index = i,
                        declared = count,
                        offset = %format_args!("{at:#x}"),
                        "section table truncated"
                    );
                    break;
                }
            }
        }
        sections
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::SliceReader;

    fn header(name: &[u8], va: u32, raw_size: u32) -> SectionHeader {
        let mut buf = [0u8; SectionHeader::SIZE];
        buf[..name.len()].copy_from_slice(name);
        buf[12..16].copy_from_slice(&va.to_le_bytes());
        buf[16..20].copy_from_slice(&raw_size.to_le_bytes());
        SectionHeader::parse(&buf).unwrap()
    }

    #[test]
    fn test_section_header_size() {
        assert_eq!(SectionHeader::SIZE, 40);
        assert!(SectionHeader::parse(&[0u8; 39]).is_err());
    }

    #[test]
    fn test_section_header_name() {
        assert_eq!(header(b".text\0", 0, 0).name_str(), ".text");
        assert_eq!(header(b".textbss", 0, 0).name_str(), ".textbss");
    }

    #[test]
    fn test_long_name_offset() {
        assert_eq!(header(b"/4", 0, 0).long_name_offset(), Some(4));
        assert_eq!(header(b"/12ab", 0, 0).long_name_offset(), Some(12));
        assert_eq!(header(b"/", 0, 0).long_name_offset(), Some(0));
        assert_eq!(header(b".data", 0, 0).long_name_offset(), None);
    }

    #[test]
    fn test_resolve_long_name() {
        let mut image = vec![0u8; 0x40];
        image[0x10..0x14].copy_from_slice(&0x18u32.to_le_bytes());
        image[0x14..0x22].copy_from_slice(b".debug_info\0\0\0");
        let reader = SliceReader::new(&image);

        let section = header(b"/4", 0, 0);
        assert_eq!(
            section.resolve_name(&reader, Some(0x10)),
            SectionName::Long {
                raw: "/4".into(),
                long: ".debug_info".into()
            }
        );

        // Offset not below the table size keeps the inline name.
        let beyond = header(b"/24", 0, 0);
        assert_eq!(beyond.resolve_name(&reader, Some(0x10)), SectionName::Short("/24".into()));
        assert_eq!(section.resolve_name(&reader, None).as_str(), "/4");
    }

    #[test]
    fn test_characteristic_labels_order() {
        let labels = characteristic_labels(0x6050_0020);
        assert_eq!(labels, ["CODE", "ALIGN_16BYTES", "MEM_EXECUTE", "MEM_READ"]);
        assert_eq!(alignment(0x00E0_0000), Some(8192));
        assert_eq!(alignment(0x00F0_0000), None);
    }

    #[test]
    fn test_maps_uses_raw_size() {
        let section = header(b".rdata", 0x2000, 0x200);
        assert!(section.maps(0x2000, 0x200));
        assert!(section.maps(0x21FC, 4));
        assert!(!section.maps(0x21FD, 4));
        assert!(!section.maps(0x1FFF, 1));
        assert!(!section.maps(u32::MAX, usize::MAX));
    }

    #[test]
    fn test_read_sections_truncates() {
        let mut image = vec![0u8; SectionHeader::SIZE + 10];
        image[..5].copy_from_slice(b".text");
        let reader = SliceReader::new(&image);
        let sections = SectionHeader::read_sections(&reader, 0, 3);
        assert_eq!(sections.len(), 1);
        assert_eq!(sections[0].name_str(), ".text");
    }
}
