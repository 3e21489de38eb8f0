//! Optional-header data directory slots.

use crate::{Error, Result};

/// Number of data directories an optional header can describe.
pub const NUMBER_OF_DIRECTORY_ENTRIES: usize = 16;

/// Slot index of a data directory in the optional header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(usize)]
pub enum DataDirectoryType {
    Export = 0,
    Import = 1,
    Resource = 2,
    /// `.pdata` runtime functions.
    Exception = 3,
    /// Authenticode certificates; the entry holds a file offset, not an RVA.
    Security = 4,
    BaseReloc = 5,
    Debug = 6,
    Architecture = 7,
    GlobalPtr = 8,
    Tls = 9,
    LoadConfig = 10,
    BoundImport = 11,
    Iat = 12,
    DelayImport = 13,
    ClrRuntime = 14,
    Reserved = 15,
}

const SLOTS: [(DataDirectoryType, &str); NUMBER_OF_DIRECTORY_ENTRIES] = [
    (DataDirectoryType::Export, "EXPORT"),
    (DataDirectoryType::Import, "IMPORT"),
    (DataDirectoryType::Resource, "RESOURCE"),
    (DataDirectoryType::Exception, "EXCEPTION"),
    (DataDirectoryType::Security, "SECURITY"),
    (DataDirectoryType::BaseReloc, "BASERELOC"),
    (DataDirectoryType::Debug, "DEBUG"),
    (DataDirectoryType::Architecture, "ARCHITECTURE"),
    (DataDirectoryType::GlobalPtr, "GLOBALPTR"),
    (DataDirectoryType::Tls, "TLS"),
    (DataDirectoryType::LoadConfig, "LOAD_CONFIG"),
    (DataDirectoryType::BoundImport, "Bound IAT"),
    (DataDirectoryType::Iat, "IAT"),
    (DataDirectoryType::DelayImport, "Delay IAT"),
    (DataDirectoryType::ClrRuntime, "CLR Header"),
    (DataDirectoryType::Reserved, ""),
];

impl DataDirectoryType {
    pub const fn as_index(self) -> usize {
        self as usize
    }

    pub const fn from_index(index: usize) -> Option<Self> {
        if index < NUMBER_OF_DIRECTORY_ENTRIES {
            Some(SLOTS[index].0)
        } else {
            None
        }
    }

    /// Label used in the optional header listing.
    pub const fn name(self) -> &'static str {
        SLOTS[self.as_index()].1
    }

    pub fn all() -> impl Iterator<Item = Self> {
        SLOTS.into_iter().map(|(slot, _)| slot)
    }
}

/// One IMAGE_DATA_DIRECTORY entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DataDirectory {
    pub virtual_address: u32,
    pub size: u32,
}

impl DataDirectory {
    pub const SIZE: usize = 8;

    pub fn parse(data: &[u8]) -> Result<Self> {
        let Some(bytes) = data.get(..Self::SIZE) else {
            return Err(Error::buffer_too_small(Self::SIZE, data.len()));
        };
        let (rva, size) = bytes.split_at(4);
        Ok(Self {
            virtual_address: u32::from_le_bytes([rva[0], rva[1], rva[2], rva[3]]),
            size: u32::from_le_bytes([size[0], size[1], size[2], size[3]]),
        })
    }

    /// An all-zero slot means the directory is absent.
    pub fn is_present(&self) -> bool {
        self.virtual_address != 0 || self.size != 0
    }

    /// Whether `rva` falls inside `[virtual_address, virtual_address + size)`.
    pub fn contains(&self, rva: u32) -> bool {
        let end = u64::from(self.virtual_address) + u64::from(self.size);
        rva >= self.virtual_address && u64::from(rva) < end
    }
}
