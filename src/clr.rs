//! CLR (Common Language Runtime) header parsing.
//!
//! The CLI header (IMAGE_COR20_HEADER) is located via DataDirectory index 14
//! (ClrRuntime). Only the header itself is decoded; the metadata streams it
//! points at are reported as RVA/size pairs.

use crate::data_dir::DataDirectory;
use crate::{Error, Result};
use bitflags::bitflags;

bitflags! {
    /// COMIMAGE_FLAGS_* values.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ComImageFlags: u32 {
        const ILONLY = 0x0000_0001;
        const REQUIRES_32BIT = 0x0000_0002;
        const IL_LIBRARY = 0x0000_0004;
        const STRONGNAMESIGNED = 0x0000_0008;
        const NATIVE_ENTRYPOINT = 0x0000_0010;
        const TRACKDEBUGDATA = 0x0001_0000;
        const PREFERS_32BIT = 0x0002_0000;
    }
}

impl ComImageFlags {
    /// Flags named in the report, in bit order.
    pub const LABELS: &'static [(Self, &'static str)] = &[
        (Self::ILONLY, "ILONLY"),
        (Self::REQUIRES_32BIT, "32BITREQUIRED"),
        (Self::IL_LIBRARY, "IL_LIBRARY"),
        (Self::STRONGNAMESIGNED, "STRONGNAMESIGNED"),
        (Self::TRACKDEBUGDATA, "TRACKDEBUGDATA"),
    ];

    pub fn labels(self) -> impl Iterator<Item = &'static str> {
        Self::LABELS
            .iter()
            .filter(move |(flag, _)| self.contains(*flag))
            .map(|(_, label)| *label)
    }
}

/// CLI header (IMAGE_COR20_HEADER).
///
/// This 72-byte structure is the entry point for .NET metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ClrHeader {
    /// Size of the header (always 72).
    pub cb: u32,
    /// Major runtime version required.
    pub major_runtime_version: u16,
    /// Minor runtime version required.
    pub minor_runtime_version: u16,
    /// Metadata root (BSJB).
    pub metadata: DataDirectory,
    /// Flags (COMIMAGE_FLAGS_*).
    pub flags: u32,
    /// Entry point token (MethodDef/File) or native entry point RVA.
    pub entry_point_token: u32,
    pub resources: DataDirectory,
    pub strong_name_signature: DataDirectory,
    /// Reserved.
    pub code_manager_table: DataDirectory,
    pub vtable_fixups: DataDirectory,
    pub export_address_table_jumps: DataDirectory,
    /// Reserved.
    pub managed_native_header: DataDirectory,
}

impl ClrHeader {
    /// Size of the CLI header in bytes.
    pub const SIZE: usize = 72;

    /// Parse CLI header from a byte slice.
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < Self::SIZE {
            return Err(Error::buffer_too_small(Self::SIZE, data.len()));
        }

        let read_u32 = |offset: usize| -> u32 {
            u32::from_le_bytes([
                data[offset],
                data[offset + 1],
                data[offset + 2],
                data[offset + 3],
            ])
        };
        let read_u16 =
            |offset: usize| -> u16 { u16::from_le_bytes([data[offset], data[offset + 1]]) };
        let dir = |offset: usize| DataDirectory {
            virtual_address: read_u32(offset),
            size: read_u32(offset + 4),
        };

        Ok(Self {
            cb: read_u32(0),
            major_runtime_version: read_u16(4),
            minor_runtime_version: read_u16(6),
            metadata: dir(8),
            flags: read_u32(16),
            entry_point_token: read_u32(20),
            resources: dir(24),
            strong_name_signature: dir(32),
            code_manager_table: dir(40),
            vtable_fixups: dir(48),
            export_address_table_jumps: dir(56),
            managed_native_header: dir(64),
        })
    }

    pub fn image_flags(&self) -> ComImageFlags {
        ComImageFlags::from_bits_retain(self.flags)
    }

    /// Check if the assembly contains only IL code.
    pub fn is_il_only(&self) -> bool {
        self.image_flags().contains(ComImageFlags::ILONLY)
    }

    /// Named directories in header order.
    pub fn directories(&self) -> [(&'static str, DataDirectory); 7] {
        [
            ("MetaData", self.metadata),
            ("Resources", self.resources),
            ("StrongNameSignature", self.strong_name_signature),
            ("CodeManagerTable", self.code_manager_table),
            ("VTableFixups", self.vtable_fixups),
            ("ExportAddressTableJumps", self.export_address_table_jumps),
            ("ManagedNativeHeader", self.managed_native_header),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header_bytes() -> [u8; ClrHeader::SIZE] {
        let mut data = [0u8; ClrHeader::SIZE];
        data[0..4].copy_from_slice(&72u32.to_le_bytes());
        data[4..6].copy_from_slice(&2u16.to_le_bytes());
        data[6..8].copy_from_slice(&5u16.to_le_bytes());
        data[8..12].copy_from_slice(&0x2000u32.to_le_bytes());
        data[12..16].copy_from_slice(&0x1234u32.to_le_bytes());
        data[16..20].copy_from_slice(&0x0001_0009u32.to_le_bytes());
        data[20..24].copy_from_slice(&0x0600_0001u32.to_le_bytes());
        data[64..68].copy_from_slice(&0x5000u32.to_le_bytes());
        data
    }

    #[test]
    fn test_cli_header_buffer_too_small() {
        let data = [0u8; 71];
        assert!(ClrHeader::parse(&data).is_err());
    }

    #[test]
    fn test_parse_fields() {
        let header = ClrHeader::parse(&header_bytes()).unwrap();
        assert_eq!(header.cb, 72);
        assert_eq!((header.major_runtime_version, header.minor_runtime_version), (2, 5));
        assert_eq!(header.metadata.virtual_address, 0x2000);
        assert_eq!(header.metadata.size, 0x1234);
        assert_eq!(header.entry_point_token, 0x0600_0001);
        assert!(header.is_il_only());
        let dirs = header.directories();
        assert_eq!(dirs[6].0, "ManagedNativeHeader");
        assert_eq!(dirs[6].1.virtual_address, 0x5000);
    }

    #[test]
    fn test_flag_labels_include_high_bits() {
        let header = ClrHeader::parse(&header_bytes()).unwrap();
        let labels: Vec<_> = header.image_flags().labels().collect();
        assert_eq!(labels, ["ILONLY", "STRONGNAMESIGNED", "TRACKDEBUGDATA"]);
    }
}
