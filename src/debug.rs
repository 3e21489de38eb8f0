//! Debug directory parsing.
//!
//! The debug directory is an array of 28-byte entries. Each entry points at
//! its payload by file offset (`PointerToRawData`), so payloads are read
//! from the raw image rather than through the section map.

use crate::text;
use crate::{Error, Result};

/// Debug types (IMAGE_DEBUG_TYPE_*).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum DebugType {
    Unknown = 0,
    Coff = 1,
    CodeView = 2,
    Fpo = 3,
    Misc = 4,
    Exception = 5,
    Fixup = 6,
    OmapToSrc = 7,
    OmapFromSrc = 8,
    Borland = 9,
    Reserved10 = 10,
}

impl DebugType {
    pub fn from_u32(value: u32) -> Self {
        match value {
            1 => Self::Coff,
            2 => Self::CodeView,
            3 => Self::Fpo,
            4 => Self::Misc,
            5 => Self::Exception,
            6 => Self::Fixup,
            7 => Self::OmapToSrc,
            8 => Self::OmapFromSrc,
            9 => Self::Borland,
            10 => Self::Reserved10,
            _ => Self::Unknown,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Unknown => "UNKNOWN",
            Self::Coff => "COFF",
            Self::CodeView => "CODEVIEW",
            Self::Fpo => "FPO",
            Self::Misc => "MISC",
            Self::Exception => "EXCEPTION",
            Self::Fixup => "FIXUP",
            Self::OmapToSrc => "OMAP_TO_SRC",
            Self::OmapFromSrc => "OMAP_FROM_SRC",
            Self::Borland => "BORLAND",
            Self::Reserved10 => "RESERVED10",
        }
    }
}

/// IMAGE_DEBUG_DIRECTORY - 28 bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DebugDirectory {
    /// Reserved (must be zero).
    pub characteristics: u32,
    pub time_date_stamp: u32,
    pub major_version: u16,
    pub minor_version: u16,
    /// Debug type.
    pub debug_type: u32,
    /// Size of debug data.
    pub size_of_data: u32,
    /// RVA of debug data (when loaded).
    pub address_of_raw_data: u32,
    /// File offset of debug data.
    pub pointer_to_raw_data: u32,
}

impl DebugDirectory {
    pub const SIZE: usize = 28;

    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < Self::SIZE {
            return Err(Error::buffer_too_small(Self::SIZE, data.len()));
        }

        Ok(Self {
            characteristics: u32::from_le_bytes([data[0], data[1], data[2], data[3]]),
            time_date_stamp: u32::from_le_bytes([data[4], data[5], data[6], data[7]]),
            major_version: u16::from_le_bytes([data[8], data[9]]),
            minor_version: u16::from_le_bytes([data[10], data[11]]),
            debug_type: u32::from_le_bytes([data[12], data[13], data[14], data[15]]),
            size_of_data: u32::from_le_bytes([data[16], data[17], data[18], data[19]]),
            address_of_raw_data: u32::from_le_bytes([data[20], data[21], data[22], data[23]]),
            pointer_to_raw_data: u32::from_le_bytes([data[24], data[25], data[26], data[27]]),
        })
    }

    /// Get the debug type as an enum.
    pub fn get_type(&self) -> DebugType {
        DebugType::from_u32(self.debug_type)
    }
}

/// `IMAGE_DEBUG_MISC` data type for an executable name.
pub const MISC_EXENAME: u32 = 1;

/// IMAGE_DEBUG_MISC record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MiscDebug {
    pub data_type: u32,
    pub length: u32,
    pub unicode: bool,
    /// Data string, decoded as UTF-16LE when `unicode` is set.
    pub data: String,
}

impl MiscDebug {
    /// Fixed part before the data string.
    pub const HEADER_SIZE: usize = 12;

    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < Self::HEADER_SIZE {
            return Err(Error::buffer_too_small(Self::HEADER_SIZE, data.len()));
        }

        let unicode = data[8] != 0;
        let tail = &data[Self::HEADER_SIZE..];
        let data_string = if unicode {
            let units: Vec<u16> = text::utf16_units(tail)
                .into_iter()
                .take_while(|&u| u != 0)
                .collect();
            String::from_utf16_lossy(&units)
        } else {
            let end = tail.iter().position(|&b| b == 0).unwrap_or(tail.len());
            String::from_utf8_lossy(&tail[..end]).into_owned()
        };

        Ok(Self {
            data_type: u32::from_le_bytes([data[0], data[1], data[2], data[3]]),
            length: u32::from_le_bytes([data[4], data[5], data[6], data[7]]),
            unicode,
            data: data_string,
        })
    }

    pub fn data_type_name(&self) -> &'static str {
        if self.data_type == MISC_EXENAME {
            "Exe name"
        } else {
            "Unknown"
        }
    }
}

/// Decoded payload of one debug directory entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DebugPayload<'a> {
    Misc(MiscDebug),
    /// MISC entry whose raw data cannot be read.
    MiscUnavailable,
    /// COFF debug data, handed to the sub-dumper.
    Coff(Option<&'a [u8]>),
    CodeView(Option<&'a [u8]>),
    Fpo(Option<&'a [u8]>),
    /// Header fields only.
    None,
}

/// One debug directory entry with its payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DebugEntry<'a> {
    pub directory: DebugDirectory,
    pub payload: DebugPayload<'a>,
}

impl<'a> DebugEntry<'a> {
    /// Decode `table.len() / 28` entries. `read_raw` maps a file offset and
    /// a length to image bytes.
    pub fn parse_table<F>(table: &[u8], read_raw: F) -> Vec<Self>
    where
        F: Fn(u64, usize) -> Option<&'a [u8]>,
    {
        let entries: Vec<Self> = table
            .chunks_exact(DebugDirectory::SIZE)
            .filter_map(|chunk| DebugDirectory::parse(chunk).ok())
            .map(|directory| Self::decode(directory, &read_raw))
            .collect();

        tracing::debug!(entries = entries.len(), "decoded debug directory");
        entries
    }

    fn decode<F>(directory: DebugDirectory, read_raw: &F) -> Self
    where
        F: Fn(u64, usize) -> Option<&'a [u8]>,
    {
        let raw = || {
            read_raw(
                u64::from(directory.pointer_to_raw_data),
                directory.size_of_data as usize,
            )
        };

        let payload = match directory.get_type() {
            DebugType::Misc => raw()
                .and_then(|data| MiscDebug::parse(data).ok())
                .map_or(DebugPayload::MiscUnavailable, DebugPayload::Misc),
            DebugType::Coff => DebugPayload::Coff(raw()),
            DebugType::CodeView => DebugPayload::CodeView(raw()),
            DebugType::Fpo => DebugPayload::Fpo(raw()),
            _ => DebugPayload::None,
        };

        Self { directory, payload }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(debug_type: u32, size: u32, pointer: u32) -> [u8; DebugDirectory::SIZE] {
        let mut buf = [0u8; DebugDirectory::SIZE];
        buf[4..8].copy_from_slice(&0x4000_0000u32.to_le_bytes());
        buf[12..16].copy_from_slice(&debug_type.to_le_bytes());
        buf[16..20].copy_from_slice(&size.to_le_bytes());
        buf[24..28].copy_from_slice(&pointer.to_le_bytes());
        buf
    }

    #[test]
    fn test_debug_directory_size() {
        assert_eq!(DebugDirectory::SIZE, 28);
        assert!(DebugDirectory::parse(&[0u8; 27]).is_err());
    }

    #[test]
    fn test_type_names() {
        assert_eq!(DebugType::from_u32(2).name(), "CODEVIEW");
        assert_eq!(DebugType::from_u32(10).name(), "RESERVED10");
        assert_eq!(DebugType::from_u32(16).name(), "UNKNOWN");
    }

    #[test]
    fn test_misc_ascii_and_unicode() {
        let mut ascii = vec![0u8; 24];
        ascii[0] = 1;
        ascii[4] = 24;
        ascii[12..19].copy_from_slice(b"app.exe");
        let misc = MiscDebug::parse(&ascii).unwrap();
        assert_eq!(misc.data, "app.exe");
        assert_eq!(misc.data_type_name(), "Exe name");
        assert!(!misc.unicode);

        let mut wide = vec![0u8; 12];
        wide[8] = 1;
        wide.extend("a.dbg".encode_utf16().flat_map(u16::to_le_bytes));
        wide.extend([0, 0, 0x41, 0]);
        let misc = MiscDebug::parse(&wide).unwrap();
        assert!(misc.unicode);
        assert_eq!(misc.data, "a.dbg");
    }

    #[test]
    fn test_parse_table_payloads() {
        let mut image = vec![0u8; 0x100];
        image[0x80] = 1;
        image[0x8C..0x90].copy_from_slice(b"x.ex");

        let mut table = Vec::new();
        table.extend(entry(4, 0x20, 0x80));
        table.extend(entry(4, 0x20, 0x1000));
        table.extend(entry(2, 0x10, 0x90));
        table.extend(entry(7, 0, 0));
        table.extend([0u8; 5]);

        let entries = DebugEntry::parse_table(&table, |offset, len| {
            image.get(offset as usize..(offset as usize).checked_add(len)?)
        });
        assert_eq!(entries.len(), 4);
        assert!(matches!(&entries[0].payload, DebugPayload::Misc(m) if m.data == "x.ex"));
        assert_eq!(entries[1].payload, DebugPayload::MiscUnavailable);
        assert!(matches!(entries[2].payload, DebugPayload::CodeView(Some(d)) if d.len() == 0x10));
        assert_eq!(entries[3].payload, DebugPayload::None);
        assert_eq!(entries[3].directory.get_type(), DebugType::OmapToSrc);
    }
}
