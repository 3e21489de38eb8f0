//! Export directory decoding.
//!
//! The export directory holds three parallel tables: function RVAs indexed
//! by `ordinal - base`, name RVAs, and the ordinal index each name belongs
//! to. A function RVA that points back inside the export directory is a
//! forwarder string such as `NTDLL.RtlAllocateHeap`.

use crate::data_dir::DataDirectory;
use crate::text;
use crate::{Error, Result};

/// IMAGE_EXPORT_DIRECTORY - 40 bytes
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ExportDirectory {
    /// Export flags (reserved, must be 0).
    pub characteristics: u32,
    pub time_date_stamp: u32,
    pub major_version: u16,
    pub minor_version: u16,
    /// RVA to the DLL name.
    pub name_rva: u32,
    /// Starting ordinal number.
    pub base: u32,
    /// Number of entries in the Export Address Table.
    pub number_of_functions: u32,
    /// Number of entries in the Name Pointer Table.
    pub number_of_names: u32,
    /// RVA to the Export Address Table (EAT).
    pub address_of_functions: u32,
    /// RVA to the Export Name Pointer Table.
    pub address_of_names: u32,
    /// RVA to the Export Ordinal Table.
    pub address_of_name_ordinals: u32,
}

impl ExportDirectory {
    pub const SIZE: usize = 40;

    /// Parse from bytes.
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < Self::SIZE {
            return Err(Error::buffer_too_small(Self::SIZE, data.len()));
        }

        let read_u32 = |at: usize| u32::from_le_bytes([data[at], data[at + 1], data[at + 2], data[at + 3]]);
        Ok(Self {
            characteristics: read_u32(0),
            time_date_stamp: read_u32(4),
            major_version: u16::from_le_bytes([data[8], data[9]]),
            minor_version: u16::from_le_bytes([data[10], data[11]]),
            name_rva: read_u32(12),
            base: read_u32(16),
            number_of_functions: read_u32(20),
            number_of_names: read_u32(24),
            address_of_functions: read_u32(28),
            address_of_names: read_u32(32),
            address_of_name_ordinals: read_u32(36),
        })
    }
}

/// Raw export tables, each read in one piece through the resolver.
pub(crate) struct RawTables<'a> {
    pub functions: Option<&'a [u8]>,
    pub names: Option<&'a [u8]>,
    pub ordinals: Option<&'a [u8]>,
}

impl<'a> RawTables<'a> {
    pub fn read<F>(dir: &ExportDirectory, read_at_rva: &F) -> Self
    where
        F: Fn(u32, usize) -> Option<&'a [u8]>,
    {
        let table = |rva: u32, count: u32, width: usize| {
            let len = (count as usize).checked_mul(width)?;
            read_at_rva(rva, len)
        };
        Self {
            functions: table(dir.address_of_functions, dir.number_of_functions, 4),
            names: table(dir.address_of_names, dir.number_of_names, 4),
            ordinals: table(dir.address_of_name_ordinals, dir.number_of_names, 2),
        }
    }

    pub fn function(table: &[u8], index: usize) -> u32 {
        let at = index * 4;
        u32::from_le_bytes([table[at], table[at + 1], table[at + 2], table[at + 3]])
    }

    pub fn ordinal(table: &[u8], index: usize) -> usize {
        usize::from(u16::from_le_bytes([table[index * 2], table[index * 2 + 1]]))
    }

    /// `(ordinal index, name RVA)` pairs in name-table order.
    pub fn named(&self) -> impl Iterator<Item = (usize, u32)> + '_ {
        let pairs = self.names.zip(self.ordinals);
        let count = pairs.map_or(0, |(names, ordinals)| (names.len() / 4).min(ordinals.len() / 2));
        (0..count).filter_map(move |i| {
            let (names, ordinals) = pairs?;
            Some((Self::ordinal(ordinals, i), Self::function(names, i)))
        })
    }
}

/// How an exported function is named.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportName {
    /// Exported by ordinal only.
    Ordinal,
    Named(String),
    /// The name RVA does not resolve.
    Unresolved(u32),
}

/// The address of an exported function.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportAddress {
    /// RVA to the function.
    Rva(u32),
    /// Forwarded to another DLL (e.g., "NTDLL.RtlAllocateHeap").
    Forwarder(String),
}

/// A single exported function.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportedFunction {
    /// Ordinal number (`base + index`).
    pub ordinal: u32,
    /// Raw function table entry.
    pub rva: u32,
    pub name: ExportName,
    pub address: ExportAddress,
}

/// The decoded export directory.
#[derive(Debug, Clone, Default)]
pub struct ExportTable {
    /// Export directory header.
    pub directory: ExportDirectory,
    /// DLL name, if its RVA resolves.
    pub dll_name: Option<String>,
    /// Functions with a non-zero address, in ordinal order.
    pub functions: Vec<ExportedFunction>,
}

impl ExportTable {
    /// Decode the export directory at `export_rva`.
    ///
    /// `export_size` bounds the forwarder range. `read_at_rva` resolves an
    /// RVA and a length to image bytes.
    pub fn parse<'a, F>(export_rva: u32, export_size: u32, read_at_rva: F) -> Result<Self>
    where
        F: Fn(u32, usize) -> Option<&'a [u8]>,
    {
        let dir_data = read_at_rva(export_rva, ExportDirectory::SIZE)
            .ok_or(Error::invalid_rva(export_rva))?;
        let directory = ExportDirectory::parse(dir_data)?;
        let dll_name = text::cstr_lossy(&read_at_rva, directory.name_rva);

        let tables = RawTables::read(&directory, &read_at_rva);
        let functions_table = tables.functions.ok_or(Error::MissingTable("address"))?;
        let count = functions_table.len() / 4;

        // Dense index -> name RVA map; zero means "exported by ordinal".
        let mut names: Vec<u32> = Vec::new();
        names.try_reserve_exact(count)?;
        names.resize(count, 0);
        for (index, name_rva) in tables.named() {
            if let Some(slot) = names.get_mut(index) {
                *slot = name_rva;
            }
        }

        let range = DataDirectory {
            virtual_address: export_rva,
            size: export_size,
        };
        let mut functions = Vec::new();
        functions.try_reserve(count)?;
        for (index, &name_rva) in names.iter().enumerate() {
            let rva = RawTables::function(functions_table, index);
            if rva == 0 {
                continue;
            }

            let name = match name_rva {
                0 => ExportName::Ordinal,
                rva => text::cstr_lossy(&read_at_rva, rva)
                    .map_or(ExportName::Unresolved(rva), ExportName::Named),
            };

            let address = range
                .contains(rva)
                .then(|| text::cstr_lossy(&read_at_rva, rva))
                .flatten()
                .map_or(ExportAddress::Rva(rva), ExportAddress::Forwarder);

            functions.push(ExportedFunction {
                ordinal: directory.base.wrapping_add(index as u32),
                rva,
                name,
                address,
            });
        }

        tracing::debug!(
            functions = directory.number_of_functions,
            names = directory.number_of_names,
            exported = functions.len(),
            "decoded export directory"
        );

        Ok(Self {
            directory,
            dll_name,
            functions,
        })
    }

    /// Check if the export table is empty.
    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }

    /// Find an export by name.
    pub fn find_by_name(&self, name: &str) -> Option<&ExportedFunction> {
        self.functions
            .iter()
            .find(|e| matches!(&e.name, ExportName::Named(n) if n == name))
    }

    /// Find an export by ordinal.
    pub fn find_by_ordinal(&self, ordinal: u32) -> Option<&ExportedFunction> {
        self.functions.iter().find(|e| e.ordinal == ordinal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DIR_RVA: u32 = 0x100;

    /// Image laid out with RVA == buffer index.
    fn image(functions: &[u32], names: &[(u16, &str)]) -> Vec<u8> {
        let mut data = vec![0u8; 0x400];
        let put = |data: &mut Vec<u8>, at: usize, bytes: &[u8]| {
            data[at..at + bytes.len()].copy_from_slice(bytes)
        };

        let dir = DIR_RVA as usize;
        put(&mut data, dir + 12, &0x180u32.to_le_bytes());
        put(&mut data, dir + 16, &1u32.to_le_bytes());
        put(&mut data, dir + 20, &(functions.len() as u32).to_le_bytes());
        put(&mut data, dir + 24, &(names.len() as u32).to_le_bytes());
        put(&mut data, dir + 28, &0x200u32.to_le_bytes());
        put(&mut data, dir + 32, &0x280u32.to_le_bytes());
        put(&mut data, dir + 36, &0x2C0u32.to_le_bytes());
        put(&mut data, 0x180, b"test.dll\0");

        for (i, f) in functions.iter().enumerate() {
            put(&mut data, 0x200 + i * 4, &f.to_le_bytes());
        }
        let mut string_at = 0x300;
        for (i, (ordinal, name)) in names.iter().enumerate() {
            put(&mut data, 0x280 + i * 4, &(string_at as u32).to_le_bytes());
            put(&mut data, 0x2C0 + i * 2, &ordinal.to_le_bytes());
            put(&mut data, string_at, name.as_bytes());
            string_at += name.len() + 1;
        }
        data
    }

    fn parse(data: &[u8], size: u32) -> Result<ExportTable> {
        ExportTable::parse(DIR_RVA, size, |rva, len| {
            data.get(rva as usize..(rva as usize).checked_add(len)?)
        })
    }

    #[test]
    fn test_export_directory_size() {
        assert_eq!(ExportDirectory::SIZE, 40);
        assert!(ExportDirectory::parse(&[0u8; 39]).is_err());
    }

    #[test]
    fn test_named_and_ordinal_exports() {
        let data = image(&[0x1000, 0, 0x1020], &[(2, "Second")]);
        let table = parse(&data, 0x28).unwrap();

        assert_eq!(table.dll_name.as_deref(), Some("test.dll"));
        assert_eq!(table.functions.len(), 2);
        assert_eq!(table.functions[0].ordinal, 1);
        assert_eq!(table.functions[0].name, ExportName::Ordinal);
        assert_eq!(table.functions[1].ordinal, 3);
        assert_eq!(table.functions[1].name, ExportName::Named("Second".into()));
        assert!(table.find_by_name("Second").is_some());
        assert!(table.find_by_ordinal(2).is_none());
    }

    #[test]
    fn test_forwarder_inside_directory_range() {
        let mut data = image(&[0x150, 0x1000], &[(0, "Fwd"), (1, "Local")]);
        data[0x150..0x15D].copy_from_slice(b"NTDLL.RtlFoo\0");

        let table = parse(&data, 0x80).unwrap();
        assert_eq!(
            table.functions[0].address,
            ExportAddress::Forwarder("NTDLL.RtlFoo".into())
        );
        assert_eq!(table.functions[1].address, ExportAddress::Rva(0x1000));

        // Same entry outside the declared range is a plain address.
        let table = parse(&data, 0x40).unwrap();
        assert_eq!(table.functions[0].address, ExportAddress::Rva(0x150));
    }

    #[test]
    fn test_out_of_range_ordinal_index_is_ignored() {
        let data = image(&[0x1000], &[(7, "Ghost")]);
        let table = parse(&data, 0x28).unwrap();
        assert_eq!(table.functions.len(), 1);
        assert_eq!(table.functions[0].name, ExportName::Ordinal);
    }

    #[test]
    fn test_missing_function_table() {
        let mut data = image(&[0x1000], &[]);
        data[DIR_RVA as usize + 20..DIR_RVA as usize + 24].copy_from_slice(&0x1000u32.to_le_bytes());
        let err = parse(&data, 0x28).unwrap_err();
        assert!(matches!(err, Error::MissingTable("address")));
        assert_eq!(err.to_string(), "Can't grab functions' address table");
    }
}
