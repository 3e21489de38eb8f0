//! Exported symbol extraction.
//!
//! [`ExportSymbols`] is a cursor over a module's exports sorted by ordinal.
//! Exports without a name get a synthetic `MODULE_ORDINAL` name so every
//! exported address is represented exactly once.

use crate::data_dir::DataDirectoryType;
use crate::export::{ExportDirectory, RawTables};
use crate::pe::PeFile;
use crate::text;
use crate::{Error, Result};

/// Name used when a name RVA does not resolve.
pub const UNREADABLE_NAME: &str = "cant_get_function";

/// One exported symbol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportSymbol {
    pub ordinal: u32,
    pub name: String,
}

/// Cursor over the exported symbols of one module.
#[derive(Debug, Clone, Default)]
pub struct ExportSymbols {
    symbols: std::vec::IntoIter<ExportSymbol>,
    /// Declared name count.
    pub named: u32,
    /// Declared function count.
    pub total: u32,
    /// Ordinal base.
    pub base: u32,
}

impl ExportSymbols {
    /// Read the export symbols of `pe`. Ordinal-only exports are named
    /// `UPPERCASE("{tag}_{ordinal}")`.
    ///
    /// An image without an export directory yields an empty cursor.
    pub fn open(pe: &PeFile<'_>, tag: &str) -> Result<Self> {
        let Some(entry) = pe
            .directory(DataDirectoryType::Export.as_index())
            .and_then(|_| pe.data_directory(DataDirectoryType::Export.as_index()))
        else {
            return Ok(Self::default());
        };
        let Some(dir) = pe
            .rva(entry.virtual_address, ExportDirectory::SIZE)
            .and_then(|bytes| ExportDirectory::parse(bytes).ok())
        else {
            return Ok(Self::default());
        };
        Self::from_directory(&dir, tag, pe.rva_reader())
    }

    /// Build the cursor from a decoded export directory.
    pub fn from_directory<'a, F>(dir: &ExportDirectory, tag: &str, read_at_rva: F) -> Result<Self>
    where
        F: Fn(u32, usize) -> Option<&'a [u8]>,
    {
        let tables = RawTables::read(dir, &read_at_rva);
        let names = tables.names.ok_or(Error::MissingTable("name"))?;
        tables.ordinals.ok_or(Error::MissingTable("ordinal"))?;
        let functions = tables.functions.ok_or(Error::MissingTable("address"))?;
        let count = functions.len() / 4;

        let mut symbols = Vec::new();
        symbols.try_reserve(count.saturating_add(names.len() / 4))?;

        // Bitmap of ordinal indices that carry a name.
        let mut named = Vec::new();
        named.try_reserve_exact(count.div_ceil(32))?;
        named.resize(count.div_ceil(32), 0u32);

        for (index, name_rva) in tables.named() {
            if let Some(word) = named.get_mut(index / 32) {
                *word |= 1 << (index % 32);
            }
            let name = text::cstr_lossy(&read_at_rva, name_rva)
                .unwrap_or_else(|| UNREADABLE_NAME.to_string());
            symbols.push(ExportSymbol {
                ordinal: dir.base.wrapping_add(index as u32),
                name,
            });
        }

        for index in 0..count {
            let is_named = named[index / 32] & (1 << (index % 32)) != 0;
            if RawTables::function(functions, index) != 0 && !is_named {
                let ordinal = dir.base.wrapping_add(index as u32);
                symbols.push(ExportSymbol {
                    ordinal,
                    name: format!("{tag}_{ordinal}").to_uppercase(),
                });
            }
        }

        tracing::info!(
            "{} named symbols in DLL, {} total, {} unique (ordinal base = {})",
            dir.number_of_names,
            dir.number_of_functions,
            symbols.len(),
            dir.base
        );

        symbols.sort_by_key(|s| s.ordinal);
        Ok(Self {
            symbols: symbols.into_iter(),
            named: dir.number_of_names,
            total: dir.number_of_functions,
            base: dir.base,
        })
    }

    /// Next symbol in ordinal order.
    pub fn next_symbol(&mut self) -> Option<ExportSymbol> {
        self.symbols.next()
    }

    /// Symbols not yet returned.
    pub fn remaining(&self) -> usize {
        self.symbols.len()
    }
}

impl Iterator for ExportSymbols {
    type Item = ExportSymbol;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_symbol()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.symbols.size_hint()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn put(data: &mut [u8], at: usize, bytes: &[u8]) {
        data[at..at + bytes.len()].copy_from_slice(bytes);
    }

    /// Five functions, three named, laid out with RVA == buffer index.
    fn fixture() -> (Vec<u8>, ExportDirectory) {
        let mut data = vec![0u8; 0x400];
        let dir = ExportDirectory {
            base: 10,
            number_of_functions: 5,
            number_of_names: 3,
            address_of_functions: 0x100,
            address_of_names: 0x140,
            address_of_name_ordinals: 0x160,
            ..Default::default()
        };
        for (i, rva) in [0x1000u32, 0x1010, 0, 0x1030, 0x1040].iter().enumerate() {
            put(&mut data, 0x100 + i * 4, &rva.to_le_bytes());
        }
        for (i, (ordinal, name_rva)) in [(4u16, 0x200u32), (0, 0x210), (3, 0x7000)].iter().enumerate() {
            put(&mut data, 0x140 + i * 4, &name_rva.to_le_bytes());
            put(&mut data, 0x160 + i * 2, &ordinal.to_le_bytes());
        }
        put(&mut data, 0x200, b"Zeta\0");
        put(&mut data, 0x210, b"Alpha\0");
        (data, dir)
    }

    fn open(data: &[u8], dir: &ExportDirectory) -> Result<ExportSymbols> {
        ExportSymbols::from_directory(dir, "mydll", |rva, len| {
            if rva == 0 {
                return None;
            }
            data.get(rva as usize..(rva as usize).checked_add(len)?)
        })
    }

    #[test]
    fn test_ordinal_only_names() {
        let (data, dir) = fixture();
        let symbols: Vec<_> = open(&data, &dir).unwrap().collect();
        assert_eq!(
            symbols,
            [
                ExportSymbol { ordinal: 10, name: "Alpha".into() },
                ExportSymbol { ordinal: 11, name: "MYDLL_11".into() },
                ExportSymbol { ordinal: 13, name: UNREADABLE_NAME.into() },
                ExportSymbol { ordinal: 14, name: "Zeta".into() },
            ]
        );
    }

    #[test]
    fn test_cursors_are_independent() {
        let (data, dir) = fixture();
        let mut first = open(&data, &dir).unwrap();
        let mut second = open(&data, &dir).unwrap();
        assert_eq!(first.next_symbol().unwrap().ordinal, 10);
        assert_eq!(first.next_symbol().unwrap().ordinal, 11);
        assert_eq!(second.next_symbol().unwrap().ordinal, 10);
        assert_eq!(first.remaining(), 2);
        assert_eq!((second.named, second.total, second.base), (3, 5, 10));
    }

    #[test]
    fn test_missing_tables_in_order() {
        let (data, mut dir) = fixture();
        dir.address_of_names = 0x9000;
        dir.address_of_name_ordinals = 0x9000;
        let err = open(&data, &dir).unwrap_err();
        assert!(matches!(err, Error::MissingTable("name")));

        let (data, mut dir) = fixture();
        dir.address_of_name_ordinals = 0;
        assert!(matches!(open(&data, &dir), Err(Error::MissingTable("ordinal"))));

        let (data, mut dir) = fixture();
        dir.address_of_functions = 0x3F8;
        assert!(matches!(open(&data, &dir), Err(Error::MissingTable("address"))));
    }
}
