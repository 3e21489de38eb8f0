//! COFF file header, machine names and file characteristics.

use crate::reader::Reader;
use crate::{Error, Result};
use bitflags::bitflags;

/// PE signature "PE\0\0".
pub const PE_SIGNATURE: u32 = 0x00004550;

/// Machine types the report knows by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum MachineType {
    Unknown = 0x0000,
    I386 = 0x014C,
    I860 = 0x014D,
    R3000 = 0x0162,
    R4000 = 0x0166,
    R10000 = 0x0168,
    Alpha = 0x0184,
    Arm = 0x01C0,
    PowerPc = 0x01F0,
    Ia64 = 0x0200,
    Amd64 = 0x8664,
}

const MACHINES: [(MachineType, &str); 11] = [
    (MachineType::Unknown, "Unknown"),
    (MachineType::I386, "i386"),
    (MachineType::I860, "i860"),
    (MachineType::R3000, "R3000"),
    (MachineType::R4000, "R4000"),
    (MachineType::R10000, "R10000"),
    (MachineType::Alpha, "Alpha"),
    (MachineType::Arm, "ARM"),
    (MachineType::PowerPc, "PowerPC"),
    (MachineType::Ia64, "IA64"),
    (MachineType::Amd64, "AMD64"),
];

impl MachineType {
    pub fn from_u16(value: u16) -> Option<Self> {
        MACHINES
            .iter()
            .map(|&(machine, _)| machine)
            .find(|&machine| machine as u16 == value)
    }

    pub fn name(self) -> &'static str {
        MACHINES
            .iter()
            .find(|(machine, _)| *machine == self)
            .map_or("???", |&(_, name)| name)
    }
}

/// Display name of a raw machine value, `???` when unrecognised.
pub fn machine_name(machine: u16) -> &'static str {
    MachineType::from_u16(machine).map_or("???", MachineType::name)
}

bitflags! {
    /// Characteristics flags for the COFF header.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FileCharacteristics: u16 {
        const RELOCS_STRIPPED = 0x0001;
        const EXECUTABLE_IMAGE = 0x0002;
        const LINE_NUMS_STRIPPED = 0x0004;
        const LOCAL_SYMS_STRIPPED = 0x0008;
        const AGGRESSIVE_WS_TRIM = 0x0010;
        const LARGE_ADDRESS_AWARE = 0x0020;
        const MACHINE_16BIT = 0x0040;
        const BYTES_REVERSED_LO = 0x0080;
        const MACHINE_32BIT = 0x0100;
        const DEBUG_STRIPPED = 0x0200;
        const REMOVABLE_RUN_FROM_SWAP = 0x0400;
        const NET_RUN_FROM_SWAP = 0x0800;
        const SYSTEM = 0x1000;
        const DLL = 0x2000;
        const UP_SYSTEM_ONLY = 0x4000;
        const BYTES_REVERSED_HI = 0x8000;
    }
}

impl FileCharacteristics {
    /// Report labels in bit order.
    pub const LABELS: &'static [(Self, &'static str)] = &[
        (Self::RELOCS_STRIPPED, "RELOCS_STRIPPED"),
        (Self::EXECUTABLE_IMAGE, "EXECUTABLE_IMAGE"),
        (Self::LINE_NUMS_STRIPPED, "LINE_NUMS_STRIPPED"),
        (Self::LOCAL_SYMS_STRIPPED, "LOCAL_SYMS_STRIPPED"),
        (Self::AGGRESSIVE_WS_TRIM, "AGGRESIVE_WS_TRIM"),
        (Self::LARGE_ADDRESS_AWARE, "LARGE_ADDRESS_AWARE"),
        (Self::MACHINE_16BIT, "16BIT_MACHINE"),
        (Self::BYTES_REVERSED_LO, "BYTES_REVERSED_LO"),
        (Self::MACHINE_32BIT, "32BIT_MACHINE"),
        (Self::DEBUG_STRIPPED, "DEBUG_STRIPPED"),
        (Self::REMOVABLE_RUN_FROM_SWAP, "REMOVABLE_RUN_FROM_SWAP"),
        (Self::NET_RUN_FROM_SWAP, "NET_RUN_FROM_SWAP"),
        (Self::SYSTEM, "SYSTEM"),
        (Self::DLL, "DLL"),
        (Self::UP_SYSTEM_ONLY, "UP_SYSTEM_ONLY"),
        (Self::BYTES_REVERSED_HI, "BYTES_REVERSED_HI"),
    ];

    /// Labels of the flags that are set, in bit order.
    pub fn labels(self) -> impl Iterator<Item = &'static str> {
        Self::LABELS
            .iter()
            .filter(move |(flag, _)| self.contains(*flag))
            .map(|(_, label)| *label)
    }
}

/// IMAGE_FILE_HEADER, the 20 bytes after `PE\0\0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoffHeader {
    pub machine: u16,
    pub number_of_sections: u16,
    pub time_date_stamp: u32,
    /// File offset of the COFF symbol table, zero when stripped.
    pub pointer_to_symbol_table: u32,
    pub number_of_symbols: u32,
    pub size_of_optional_header: u16,
    pub characteristics: u16,
}

impl CoffHeader {
    pub const SIZE: usize = 20;

    pub fn parse(data: &[u8]) -> Result<Self> {
        let Some(h) = data.get(..Self::SIZE) else {
            return Err(Error::buffer_too_small(Self::SIZE, data.len()));
        };
        let half = |at: usize| u16::from_le_bytes([h[at], h[at + 1]]);
        let word = |at: usize| u32::from_le_bytes([h[at], h[at + 1], h[at + 2], h[at + 3]]);

        Ok(Self {
            machine: half(0),
            number_of_sections: half(2),
            time_date_stamp: word(4),
            pointer_to_symbol_table: word(8),
            number_of_symbols: word(12),
            size_of_optional_header: half(16),
            characteristics: half(18),
        })
    }

    pub fn machine_type(&self) -> Option<MachineType> {
        MachineType::from_u16(self.machine)
    }

    pub fn flags(&self) -> FileCharacteristics {
        FileCharacteristics::from_bits_retain(self.characteristics)
    }

    pub fn is_dll(&self) -> bool {
        self.flags().contains(FileCharacteristics::DLL)
    }

    /// File offset of the COFF string table, which directly follows the
    /// 18-byte symbol records. `None` without a symbol table.
    pub fn string_table_offset(&self) -> Option<u64> {
        if self.pointer_to_symbol_table == 0 || self.number_of_symbols == 0 {
            return None;
        }
        Some(u64::from(self.pointer_to_symbol_table) + u64::from(self.number_of_symbols) * 18)
    }

    pub fn read_from<R: Reader + ?Sized>(reader: &R, offset: u64) -> Result<Self> {
        Self::parse(reader.read_exact(offset, Self::SIZE)?)
    }
}

/// Check for `PE\0\0` at `offset`.
pub fn verify_pe_signature<R: Reader + ?Sized>(reader: &R, offset: u64) -> Result<()> {
    match reader.read_u32(offset) {
        Some(PE_SIGNATURE) => Ok(()),
        Some(_) => Err(Error::InvalidPeSignature),
        None => Err(Error::OffsetOutOfBounds {
            offset,
            size: reader.size(),
        }),
    }
}
