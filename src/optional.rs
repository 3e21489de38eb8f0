//! Optional Header structures and parsing.
//!
//! The on-disk header may be shorter than the canonical structure (or absent
//! entirely). Decoding copies whatever `SizeOfOptionalHeader` covers into a
//! zeroed canonical buffer, so fields past the declared size read as zero.

use crate::data_dir::{DataDirectory, NUMBER_OF_DIRECTORY_ENTRIES};
use crate::reader::Reader;
use bitflags::bitflags;

/// PE32 magic number.
pub const PE32_MAGIC: u16 = 0x10B;
/// PE32+ (64-bit) magic number.
pub const PE32PLUS_MAGIC: u16 = 0x20B;
/// ROM image magic number.
pub const ROM_MAGIC: u16 = 0x107;

/// Short description of an optional header magic value.
pub fn magic_name(magic: u16) -> &'static str {
    match magic {
        PE32_MAGIC => "32bit",
        PE32PLUS_MAGIC => "64bit",
        ROM_MAGIC => "ROM",
        _ => "???",
    }
}

/// Windows subsystem values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum Subsystem {
    Unknown = 0,
    Native = 1,
    WindowsGui = 2,
    WindowsCui = 3,
    Os2Cui = 5,
    PosixCui = 7,
}

impl Subsystem {
    /// Values without a dedicated variant map to `Unknown`.
    pub fn from_u16(value: u16) -> Self {
        match value {
            1 => Self::Native,
            2 => Self::WindowsGui,
            3 => Self::WindowsCui,
            5 => Self::Os2Cui,
            7 => Self::PosixCui,
            _ => Self::Unknown,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Unknown => "Unknown",
            Self::Native => "Native",
            Self::WindowsGui => "Windows GUI",
            Self::WindowsCui => "Windows CUI",
            Self::Os2Cui => "OS/2 CUI",
            Self::PosixCui => "Posix CUI",
        }
    }
}

bitflags! {
    /// DLL characteristics flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct DllCharacteristics: u16 {
        const HIGH_ENTROPY_VA = 0x0020;
        const DYNAMIC_BASE = 0x0040;
        const FORCE_INTEGRITY = 0x0080;
        const NX_COMPAT = 0x0100;
        const NO_ISOLATION = 0x0200;
        const NO_SEH = 0x0400;
        const NO_BIND = 0x0800;
        const APPCONTAINER = 0x1000;
        const WDM_DRIVER = 0x2000;
        const GUARD_CF = 0x4000;
        const TERMINAL_SERVER_AWARE = 0x8000;
    }
}

impl DllCharacteristics {
    /// Flags listed under the characteristics line of the report.
    pub const REPORTED: &'static [(Self, &'static str)] = &[
        (Self::DYNAMIC_BASE, "DYNAMIC_BASE"),
        (Self::FORCE_INTEGRITY, "FORCE_INTEGRITY"),
        (Self::NX_COMPAT, "NX_COMPAT"),
        (Self::NO_ISOLATION, "NO_ISOLATION"),
        (Self::NO_SEH, "NO_SEH"),
        (Self::NO_BIND, "NO_BIND"),
        (Self::WDM_DRIVER, "WDM_DRIVER"),
        (Self::TERMINAL_SERVER_AWARE, "TERMINAL_SERVER_AWARE"),
    ];

    pub fn labels(self) -> impl Iterator<Item = &'static str> {
        Self::REPORTED
            .iter()
            .filter(move |(flag, _)| self.contains(*flag))
            .map(|(_, label)| *label)
    }
}

/// PE32 Optional Header (32-bit).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OptionalHeader32 {
    pub magic: u16,
    pub major_linker_version: u8,
    pub minor_linker_version: u8,
    pub size_of_code: u32,
    pub size_of_initialized_data: u32,
    pub size_of_uninitialized_data: u32,
    pub address_of_entry_point: u32,
    pub base_of_code: u32,
    pub base_of_data: u32,
    pub image_base: u32,
    pub section_alignment: u32,
    pub file_alignment: u32,
    pub major_operating_system_version: u16,
    pub minor_operating_system_version: u16,
    pub major_image_version: u16,
    pub minor_image_version: u16,
    pub major_subsystem_version: u16,
    pub minor_subsystem_version: u16,
    pub win32_version_value: u32,
    pub size_of_image: u32,
    pub size_of_headers: u32,
    pub check_sum: u32,
    pub subsystem: u16,
    pub dll_characteristics: u16,
    pub size_of_stack_reserve: u32,
    pub size_of_stack_commit: u32,
    pub size_of_heap_reserve: u32,
    pub size_of_heap_commit: u32,
    pub loader_flags: u32,
    pub number_of_rva_and_sizes: u32,
    pub data_directories: [DataDirectory; NUMBER_OF_DIRECTORY_ENTRIES],
}

/// PE32+ Optional Header (64-bit).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OptionalHeader64 {
    pub magic: u16,
    pub major_linker_version: u8,
    pub minor_linker_version: u8,
    pub size_of_code: u32,
    pub size_of_initialized_data: u32,
    pub size_of_uninitialized_data: u32,
    pub address_of_entry_point: u32,
    pub base_of_code: u32,
    pub image_base: u64,
    pub section_alignment: u32,
    pub file_alignment: u32,
    pub major_operating_system_version: u16,
    pub minor_operating_system_version: u16,
    pub major_image_version: u16,
    pub minor_image_version: u16,
    pub major_subsystem_version: u16,
    pub minor_subsystem_version: u16,
    pub win32_version_value: u32,
    pub size_of_image: u32,
    pub size_of_headers: u32,
    pub check_sum: u32,
    pub subsystem: u16,
    pub dll_characteristics: u16,
    pub size_of_stack_reserve: u64,
    pub size_of_stack_commit: u64,
    pub size_of_heap_reserve: u64,
    pub size_of_heap_commit: u64,
    pub loader_flags: u32,
    pub number_of_rva_and_sizes: u32,
    pub data_directories: [DataDirectory; NUMBER_OF_DIRECTORY_ENTRIES],
}

/// Combined optional header enum for PE32 and PE32+.
///
/// Any magic other than PE32+ (including ROM and garbage) is decoded with
/// the 32-bit layout; the raw magic is kept so callers can tell them apart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OptionalHeader {
    Pe32(OptionalHeader32),
    Pe32Plus(OptionalHeader64),
}

struct Fields<'a>(&'a [u8]);

impl Fields<'_> {
    fn u8(&self, at: usize) -> u8 {
        self.0[at]
    }

    fn u16(&self, at: usize) -> u16 {
        u16::from_le_bytes([self.0[at], self.0[at + 1]])
    }

    fn u32(&self, at: usize) -> u32 {
        u32::from_le_bytes([self.0[at], self.0[at + 1], self.0[at + 2], self.0[at + 3]])
    }

    fn u64(&self, at: usize) -> u64 {
        u64::from(self.u32(at)) | (u64::from(self.u32(at + 4)) << 32)
    }

    fn directories(&self, at: usize) -> [DataDirectory; NUMBER_OF_DIRECTORY_ENTRIES] {
        std::array::from_fn(|i| DataDirectory {
            virtual_address: self.u32(at + i * DataDirectory::SIZE),
            size: self.u32(at + i * DataDirectory::SIZE + 4),
        })
    }
}

impl OptionalHeader32 {
    pub const BASE_SIZE: usize = 96;
    /// Size with all 16 data directories.
    pub const SIZE: usize = Self::BASE_SIZE + NUMBER_OF_DIRECTORY_ENTRIES * DataDirectory::SIZE;

    /// Decode from a zero-filled buffer of exactly [`Self::SIZE`] bytes.
    fn from_canonical(buf: &[u8; Self::SIZE]) -> Self {
        let f = Fields(buf);
        Self {
            magic: f.u16(0),
            major_linker_version: f.u8(2),
            minor_linker_version: f.u8(3),
            size_of_code: f.u32(4),
            size_of_initialized_data: f.u32(8),
            size_of_uninitialized_data: f.u32(12),
            address_of_entry_point: f.u32(16),
            base_of_code: f.u32(20),
            base_of_data: f.u32(24),
            image_base: f.u32(28),
            section_alignment: f.u32(32),
            file_alignment: f.u32(36),
            major_operating_system_version: f.u16(40),
            minor_operating_system_version: f.u16(42),
            major_image_version: f.u16(44),
            minor_image_version: f.u16(46),
            major_subsystem_version: f.u16(48),
            minor_subsystem_version: f.u16(50),
            win32_version_value: f.u32(52),
            size_of_image: f.u32(56),
            size_of_headers: f.u32(60),
            check_sum: f.u32(64),
            subsystem: f.u16(68),
            dll_characteristics: f.u16(70),
            size_of_stack_reserve: f.u32(72),
            size_of_stack_commit: f.u32(76),
            size_of_heap_reserve: f.u32(80),
            size_of_heap_commit: f.u32(84),
            loader_flags: f.u32(88),
            number_of_rva_and_sizes: f.u32(92),
            data_directories: f.directories(Self::BASE_SIZE),
        }
    }
}

impl OptionalHeader64 {
    pub const BASE_SIZE: usize = 112;
    /// Size with all 16 data directories.
    pub const SIZE: usize = Self::BASE_SIZE + NUMBER_OF_DIRECTORY_ENTRIES * DataDirectory::SIZE;

    fn from_canonical(buf: &[u8; Self::SIZE]) -> Self {
        let f = Fields(buf);
        Self {
            magic: f.u16(0),
            major_linker_version: f.u8(2),
            minor_linker_version: f.u8(3),
            size_of_code: f.u32(4),
            size_of_initialized_data: f.u32(8),
            size_of_uninitialized_data: f.u32(12),
            address_of_entry_point: f.u32(16),
            base_of_code: f.u32(20),
            image_base: f.u64(24),
            section_alignment: f.u32(32),
            file_alignment: f.u32(36),
            major_operating_system_version: f.u16(40),
            minor_operating_system_version: f.u16(42),
            major_image_version: f.u16(44),
            minor_image_version: f.u16(46),
            major_subsystem_version: f.u16(48),
            minor_subsystem_version: f.u16(50),
            win32_version_value: f.u32(52),
            size_of_image: f.u32(56),
            size_of_headers: f.u32(60),
            check_sum: f.u32(64),
            subsystem: f.u16(68),
            dll_characteristics: f.u16(70),
            size_of_stack_reserve: f.u64(72),
            size_of_stack_commit: f.u64(80),
            size_of_heap_reserve: f.u64(88),
            size_of_heap_commit: f.u64(96),
            loader_flags: f.u32(104),
            number_of_rva_and_sizes: f.u32(108),
            data_directories: f.directories(Self::BASE_SIZE),
        }
    }
}

impl OptionalHeader {
    /// Decode from the on-disk bytes, already limited to the declared
    /// `SizeOfOptionalHeader`. Never fails: missing bytes read as zero.
    pub fn parse(data: &[u8]) -> Self {
        let magic = match data {
            [lo, hi, ..] => u16::from_le_bytes([*lo, *hi]),
            _ => 0,
        };
        if magic == PE32PLUS_MAGIC {
            let mut buf = [0u8; OptionalHeader64::SIZE];
            let n = data.len().min(buf.len());
            buf[..n].copy_from_slice(&data[..n]);
            Self::Pe32Plus(OptionalHeader64::from_canonical(&buf))
        } else {
            let mut buf = [0u8; OptionalHeader32::SIZE];
            let n = data.len().min(buf.len());
            buf[..n].copy_from_slice(&data[..n]);
            Self::Pe32(OptionalHeader32::from_canonical(&buf))
        }
    }

    /// Read `declared_size` bytes at `offset`, clipped to the canonical
    /// 64-bit size and to the end of the image.
    pub fn read_from<R: Reader + ?Sized>(reader: &R, offset: u64, declared_size: u16) -> Self {
        let wanted = usize::from(declared_size).min(OptionalHeader64::SIZE);
        let available = reader.size().saturating_sub(offset);
        let len = wanted.min(usize::try_from(available).unwrap_or(usize::MAX));
        Self::parse(reader.read(offset, len).unwrap_or(&[]))
    }

    pub fn magic(&self) -> u16 {
        match self {
            Self::Pe32(h) => h.magic,
            Self::Pe32Plus(h) => h.magic,
        }
    }

    pub fn is_pe32plus(&self) -> bool {
        matches!(self, Self::Pe32Plus(_))
    }

    /// Thunk and pointer width in bytes.
    pub fn pointer_size(&self) -> usize {
        if self.is_pe32plus() {
            8
        } else {
            4
        }
    }

    pub fn data_directories(&self) -> &[DataDirectory; NUMBER_OF_DIRECTORY_ENTRIES] {
        match self {
            Self::Pe32(h) => &h.data_directories,
            Self::Pe32Plus(h) => &h.data_directories,
        }
    }

    pub fn number_of_rva_and_sizes(&self) -> u32 {
        match self {
            Self::Pe32(h) => h.number_of_rva_and_sizes,
            Self::Pe32Plus(h) => h.number_of_rva_and_sizes,
        }
    }

    /// Get the entry point RVA.
    pub fn address_of_entry_point(&self) -> u32 {
        match self {
            Self::Pe32(h) => h.address_of_entry_point,
            Self::Pe32Plus(h) => h.address_of_entry_point,
        }
    }

    /// Get the image base address.
    pub fn image_base(&self) -> u64 {
        match self {
            Self::Pe32(h) => u64::from(h.image_base),
            Self::Pe32Plus(h) => h.image_base,
        }
    }

    pub fn subsystem(&self) -> Subsystem {
        match self {
            Self::Pe32(h) => Subsystem::from_u16(h.subsystem),
            Self::Pe32Plus(h) => Subsystem::from_u16(h.subsystem),
        }
    }

    pub fn dll_characteristics(&self) -> DllCharacteristics {
        let raw = match self {
            Self::Pe32(h) => h.dll_characteristics,
            Self::Pe32Plus(h) => h.dll_characteristics,
        };
        DllCharacteristics::from_bits_retain(raw)
    }
}
