//! Delay-load import directory parsing.
//!
//! Delay-load imports are loaded on first use rather than at program startup.
//! Early linkers wrote every pointer in the descriptor as a virtual address;
//! bit 0 of `attributes` marks the modern RVA form. In the legacy form the
//! image base is subtracted from every pointer before it is resolved.

use crate::import::{read_thunks, ImportThunk};
use crate::text;
use crate::{Error, Result};

/// How the pointers in a descriptor are expressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressingMode {
    /// Pointers are RVAs.
    Rva,
    /// Pointers are virtual addresses including the image base.
    VirtualAddress,
}

/// ImgDelayDescr structure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DelayLoadDescriptor {
    pub attributes: u32,
    /// DLL name pointer.
    pub dll_name: u32,
    /// Module handle pointer.
    pub module_handle: u32,
    /// Delay-load import address table.
    pub import_address_table: u32,
    /// Delay-load import name table.
    pub import_name_table: u32,
    /// Bound delay-load import address table.
    pub bound_import_address_table: u32,
    /// Unload delay-load import address table.
    pub unload_information_table: u32,
    /// Timestamp of the bound DLL (0 if not bound).
    pub time_date_stamp: u32,
}

impl DelayLoadDescriptor {
    /// Size of the structure in bytes.
    pub const SIZE: usize = 32;

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

        Ok(Self {
            attributes: read_u32(0),
            dll_name: read_u32(4),
            module_handle: read_u32(8),
            import_address_table: read_u32(12),
            import_name_table: read_u32(16),
            bound_import_address_table: read_u32(20),
            unload_information_table: read_u32(24),
            time_date_stamp: read_u32(28),
        })
    }

    /// A descriptor missing its name, IAT or INT ends the table.
    pub fn is_terminator(&self) -> bool {
        self.dll_name == 0 || self.import_address_table == 0 || self.import_name_table == 0
    }

    pub fn addressing_mode(&self) -> AddressingMode {
        if self.attributes & 1 != 0 {
            AddressingMode::Rva
        } else {
            AddressingMode::VirtualAddress
        }
    }

    /// Amount to subtract from each pointer before resolving it.
    pub fn bias(&self, image_base: u64) -> u64 {
        match self.addressing_mode() {
            AddressingMode::Rva => 0,
            AddressingMode::VirtualAddress => image_base,
        }
    }

    /// Convert a descriptor pointer to an RVA.
    pub fn to_rva(&self, pointer: u32, image_base: u64) -> Option<u32> {
        u64::from(pointer)
            .checked_sub(self.bias(image_base))
            .and_then(|rva| u32::try_from(rva).ok())
    }
}

/// A single delay-loaded DLL.
#[derive(Debug, Clone)]
pub struct DelayImportedDll {
    /// RVA of the descriptor itself.
    pub descriptor_rva: u32,
    pub descriptor: DelayLoadDescriptor,
    /// The DLL name, if its pointer resolves.
    pub name: Option<String>,
    /// Imported functions; `None` when the name table cannot be read.
    pub thunks: Option<Vec<ImportThunk>>,
}

/// The decoded delay-load directory.
#[derive(Debug, Clone, Default)]
pub struct DelayImportTable {
    /// Declared directory size.
    pub size: u32,
    pub dlls: Vec<DelayImportedDll>,
}

impl DelayImportTable {
    /// Decode delay-load descriptors starting at `rva`.
    pub fn parse<'a, F>(rva: u32, size: u32, is_64bit: bool, image_base: u64, read_at_rva: F) -> Self
    where
        F: Fn(u32, usize) -> Option<&'a [u8]>,
    {
        let mut dlls = Vec::new();

        for index in 0u32.. {
            let Some(descriptor_rva) = index
                .checked_mul(DelayLoadDescriptor::SIZE as u32)
                .and_then(|off| rva.checked_add(off))
            else {
                break;
            };
            let Some(descriptor) = read_at_rva(descriptor_rva, DelayLoadDescriptor::SIZE)
                .and_then(|data| DelayLoadDescriptor::parse(data).ok())
            else {
                tracing::warn!(
                    rva = %format_args!("{descriptor_rva:#x}"),
                    "delay-load descriptor does not resolve"
                );
                break;
            };
            if descriptor.is_terminator() {
                break;
            }

            let name = descriptor
                .to_rva(descriptor.dll_name, image_base)
                .and_then(|name_rva| text::cstr_lossy(&read_at_rva, name_rva));
            let thunks = descriptor
                .to_rva(descriptor.import_name_table, image_base)
                .and_then(|int_rva| {
                    read_thunks(&read_at_rva, int_rva, is_64bit, descriptor.bias(image_base))
                });

            dlls.push(DelayImportedDll {
                descriptor_rva,
                descriptor,
                name,
                thunks,
            });
        }

        tracing::debug!(modules = dlls.len(), "decoded delay-load descriptors");
        Self { size, dlls }
    }

    pub fn is_empty(&self) -> bool {
        self.dlls.is_empty()
    }
}
