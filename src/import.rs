//! Import directory decoding.
//!
//! The directory is a run of 20-byte descriptors, one per imported module,
//! ended by a descriptor whose name or first-thunk RVA is zero. Each
//! descriptor owns a zero-terminated thunk array.

use crate::text;
use crate::{Error, Result};

/// IMAGE_IMPORT_DESCRIPTOR - 20 bytes
/// Describes one imported DLL.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ImportDescriptor {
    /// RVA to the Import Lookup Table (or INT - Import Name Table).
    pub original_first_thunk: u32,
    /// Timestamp (0 if not bound).
    pub time_date_stamp: u32,
    /// Forwarder chain index (-1 if no forwarders).
    pub forwarder_chain: u32,
    /// RVA to the DLL name (null-terminated string).
    pub name_rva: u32,
    /// RVA to the Import Address Table (IAT).
    pub first_thunk: u32,
}

impl ImportDescriptor {
    pub const SIZE: usize = 20;

    /// Whether this descriptor ends the table.
    pub fn is_terminator(&self) -> bool {
        self.name_rva == 0 || self.first_thunk == 0
    }

    /// Thunk array to walk: the name table when present, else the IAT.
    pub fn lookup_rva(&self) -> u32 {
        if self.original_first_thunk != 0 {
            self.original_first_thunk
        } else {
            self.first_thunk
        }
    }

    /// Parse from bytes.
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < Self::SIZE {
            return Err(Error::buffer_too_small(Self::SIZE, data.len()));
        }

        Ok(Self {
            original_first_thunk: u32::from_le_bytes([data[0], data[1], data[2], data[3]]),
            time_date_stamp: u32::from_le_bytes([data[4], data[5], data[6], data[7]]),
            forwarder_chain: u32::from_le_bytes([data[8], data[9], data[10], data[11]]),
            name_rva: u32::from_le_bytes([data[12], data[13], data[14], data[15]]),
            first_thunk: u32::from_le_bytes([data[16], data[17], data[18], data[19]]),
        })
    }
}

/// Import thunk entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportThunk {
    /// Import by ordinal number.
    Ordinal(u16),
    /// Import by name. `data` is the raw thunk value truncated to 32 bits.
    Name { hint: u16, name: String, data: u32 },
    /// Hint/name record that does not resolve.
    Unresolved { data: u32 },
}

impl ImportThunk {
    /// Check if import is by ordinal (high bit set).
    pub fn is_ordinal_entry_32(value: u32) -> bool {
        value & 0x8000_0000 != 0
    }

    /// Check if import is by ordinal (high bit set) for 64-bit.
    pub fn is_ordinal_entry_64(value: u64) -> bool {
        value & 0x8000_0000_0000_0000 != 0
    }

    /// Decode one non-zero thunk value.
    ///
    /// `bias` is subtracted from the value before it is used as the RVA of
    /// a hint/name record; it is zero for ordinary imports.
    pub(crate) fn decode<'a, F>(value: u64, is_64bit: bool, bias: u64, read_at_rva: &F) -> Self
    where
        F: Fn(u32, usize) -> Option<&'a [u8]>,
    {
        let by_ordinal = if is_64bit {
            Self::is_ordinal_entry_64(value)
        } else {
            Self::is_ordinal_entry_32(value as u32)
        };
        if by_ordinal {
            return Self::Ordinal(value as u16);
        }

        // Hint/name targets are 32-bit RVAs; the upper half of a 64-bit
        // slot is dropped.
        let data = value as u32;
        let record = value.checked_sub(bias).and_then(|rva| {
            let rva = rva as u32;
            let hint = read_at_rva(rva, 2)?;
            let name = text::cstr_lossy(read_at_rva, rva.checked_add(2)?)?;
            Some((u16::from_le_bytes([hint[0], hint[1]]), name))
        });

        match record {
            Some((hint, name)) => Self::Name { hint, name, data },
            None => Self::Unresolved { data },
        }
    }
}

/// Walk a zero-terminated thunk array at `thunk_rva`.
///
/// Returns `None` when the first slot is unreadable. Later unreadable slots
/// end the array like a zero entry does.
pub(crate) fn read_thunks<'a, F>(
    read_at_rva: &F,
    thunk_rva: u32,
    is_64bit: bool,
    bias: u64,
) -> Option<Vec<ImportThunk>>
where
    F: Fn(u32, usize) -> Option<&'a [u8]>,
{
    let width = if is_64bit { 8 } else { 4 };
    let mut thunks = Vec::new();

    for index in 0u32.. {
        let slot = index
            .checked_mul(width as u32)
            .and_then(|off| thunk_rva.checked_add(off))
            .and_then(|rva| read_at_rva(rva, width));
        let Some(bytes) = slot else {
            if index == 0 {
                return None;
            }
            break;
        };

        let value = if is_64bit {
            u64::from_le_bytes([
                bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
            ])
        } else {
            u64::from(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
        };
        if value == 0 {
            break;
        }
        thunks.push(ImportThunk::decode(value, is_64bit, bias, read_at_rva));
    }

    Some(thunks)
}

/// A single imported DLL with its imports.
#[derive(Debug, Clone)]
pub struct ImportedDll {
    /// RVA of the descriptor itself.
    pub descriptor_rva: u32,
    pub descriptor: ImportDescriptor,
    /// The DLL name, if its RVA resolves.
    pub name: Option<String>,
    /// Imported functions; `None` when the thunk array cannot be read.
    pub thunks: Option<Vec<ImportThunk>>,
}

/// The decoded import directory.
#[derive(Debug, Clone, Default)]
pub struct ImportTable {
    /// Declared directory size.
    pub size: u32,
    pub dlls: Vec<ImportedDll>,
}

impl ImportTable {
    /// Decode import descriptors starting at `import_rva`.
    ///
    /// The walk stops at the terminating descriptor or at the first
    /// descriptor that does not resolve.
    pub fn parse<'a, F>(import_rva: u32, size: u32, is_64bit: bool, read_at_rva: F) -> Self
    where
        F: Fn(u32, usize) -> Option<&'a [u8]>,
    {
        let mut dlls = Vec::new();

        for index in 0u32.. {
            let Some(descriptor_rva) = index
                .checked_mul(ImportDescriptor::SIZE as u32)
                .and_then(|off| import_rva.checked_add(off))
            else {
                break;
            };
            let Some(descriptor) = read_at_rva(descriptor_rva, ImportDescriptor::SIZE)
                .and_then(|data| ImportDescriptor::parse(data).ok())
            else {
                tracing::warn!(
                    rva = %format_args!("{descriptor_rva:#x}"),
                    "import descriptor does not resolve"
                );
                break;
            };
            if descriptor.is_terminator() {
                break;
            }

            let name = text::cstr_lossy(&read_at_rva, descriptor.name_rva);
            let thunks = read_thunks(&read_at_rva, descriptor.lookup_rva(), is_64bit, 0);
            dlls.push(ImportedDll {
                descriptor_rva,
                descriptor,
                name,
                thunks,
            });
        }

        tracing::debug!(modules = dlls.len(), "decoded import descriptors");
        Self { size, dlls }
    }

    /// Check if the import table is empty.
    pub fn is_empty(&self) -> bool {
        self.dlls.is_empty()
    }

    /// Find a DLL by name (case-insensitive).
    pub fn find_dll(&self, name: &str) -> Option<&ImportedDll> {
        self.dlls
            .iter()
            .find(|dll| dll.name.as_deref().is_some_and(|n| n.eq_ignore_ascii_case(name)))
    }

    /// Get total count of imported functions.
    pub fn import_count(&self) -> usize {
        self.dlls
            .iter()
            .filter_map(|dll| dll.thunks.as_ref())
            .map(Vec::len)
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn put(data: &mut [u8], at: usize, bytes: &[u8]) {
        data[at..at + bytes.len()].copy_from_slice(bytes);
    }

    fn reader<'a>(data: &'a [u8]) -> impl Fn(u32, usize) -> Option<&'a [u8]> {
        move |rva, len| {
            if rva == 0 {
                return None;
            }
            data.get(rva as usize..(rva as usize).checked_add(len)?)
        }
    }

    #[test]
    fn test_import_descriptor_size() {
        assert_eq!(ImportDescriptor::SIZE, 20);
    }

    #[test]
    fn test_terminator_needs_name_and_first_thunk() {
        let only_name = ImportDescriptor {
            name_rva: 0x2000,
            ..Default::default()
        };
        assert!(only_name.is_terminator());
        let complete = ImportDescriptor {
            name_rva: 0x2000,
            first_thunk: 0x3000,
            ..Default::default()
        };
        assert!(!complete.is_terminator());
        assert_eq!(complete.lookup_rva(), 0x3000);
    }

    #[test]
    fn test_thunk_ordinal_check() {
        assert!(ImportThunk::is_ordinal_entry_32(0x80000001));
        assert!(!ImportThunk::is_ordinal_entry_32(0x00001000));
        assert!(ImportThunk::is_ordinal_entry_64(0x8000000000000001));
        assert!(!ImportThunk::is_ordinal_entry_64(0x0000000080000000));
    }

    #[test]
    fn test_thunks_stop_at_first_zero() {
        let mut data = vec![0u8; 0x200];
        put(&mut data, 0x100, &0x8000_0005u32.to_le_bytes());
        put(&mut data, 0x104, &0x180u32.to_le_bytes());
        put(&mut data, 0x108, &0u32.to_le_bytes());
        put(&mut data, 0x10C, &0xDEAD_BEEFu32.to_le_bytes());
        put(&mut data, 0x180, &7u16.to_le_bytes());
        put(&mut data, 0x182, b"ExitProcess\0");

        let thunks = read_thunks(&reader(&data), 0x100, false, 0).unwrap();
        assert_eq!(
            thunks,
            [
                ImportThunk::Ordinal(5),
                ImportThunk::Name {
                    hint: 7,
                    name: "ExitProcess".into(),
                    data: 0x180
                },
            ]
        );
    }

    #[test]
    fn test_wide_name_thunk_keeps_low_half() {
        let mut data = vec![0u8; 0x200];
        put(&mut data, 0x100, &0x0000_0012_0000_0180u64.to_le_bytes());
        put(&mut data, 0x180, &3u16.to_le_bytes());
        put(&mut data, 0x182, b"Sleep\0");

        let thunks = read_thunks(&reader(&data), 0x100, true, 0).unwrap();
        assert_eq!(
            thunks,
            [ImportThunk::Name {
                hint: 3,
                name: "Sleep".into(),
                data: 0x180
            }]
        );
    }

    #[test]
    fn test_unreadable_hint_name() {
        let mut data = vec![0u8; 0x20];
        put(&mut data, 0x10, &0x7000u32.to_le_bytes());
        let thunks = read_thunks(&reader(&data), 0x10, false, 0).unwrap();
        assert_eq!(thunks, [ImportThunk::Unresolved { data: 0x7000 }]);
        assert_eq!(read_thunks(&reader(&data), 0x900, false, 0), None);
    }

    #[test]
    fn test_parse_descriptors() {
        let mut data = vec![0u8; 0x300];
        // descriptor 0 at 0x100, terminator at 0x114
        put(&mut data, 0x100, &0x140u32.to_le_bytes());
        put(&mut data, 0x10C, &0x1C0u32.to_le_bytes());
        put(&mut data, 0x110, &0x160u32.to_le_bytes());
        put(&mut data, 0x140, &0x0000_0000_0000_0200u64.to_le_bytes());
        put(&mut data, 0x148, &0x8000_0000_0000_0003u64.to_le_bytes());
        put(&mut data, 0x1C0, b"USER32.dll\0");
        put(&mut data, 0x200, &1u16.to_le_bytes());
        put(&mut data, 0x202, b"MessageBoxW\0");

        let table = ImportTable::parse(0x100, 0x28, true, reader(&data));
        assert_eq!(table.dlls.len(), 1);
        let dll = &table.dlls[0];
        assert_eq!(dll.name.as_deref(), Some("USER32.dll"));
        assert_eq!(dll.descriptor_rva, 0x100);
        let thunks = dll.thunks.as_ref().unwrap();
        assert_eq!(thunks.len(), 2);
        assert!(matches!(&thunks[0], ImportThunk::Name { name, .. } if name == "MessageBoxW"));
        assert_eq!(thunks[1], ImportThunk::Ordinal(3));
        assert!(table.find_dll("user32.DLL").is_some());
        assert_eq!(table.import_count(), 2);
    }
}
