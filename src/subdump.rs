//! Formatted sub-decoders for debug payloads and symbol tables.
//!
//! The report writer hands COFF debug data, CodeView records, FPO tables,
//! the COFF symbol table and STABS sections to a [`SubDumper`]. The
//! [`BasicSubDumper`] decodes the fixed-size records of each format; a
//! richer implementation (e.g. a full CodeView type dumper) can be plugged
//! in through [`crate::report::Dumper::with_subdumper`].

use crate::section::SectionHeader;
use crate::text;
use std::io::{self, Write};

/// CodeView PDB 7.0 signature ("RSDS").
pub const CV_SIGNATURE_RSDS: u32 = 0x5344_5352;
/// CodeView PDB 2.0 signature ("NB10").
pub const CV_SIGNATURE_NB10: u32 = 0x3031_424E;

fn dword(data: &[u8], at: usize) -> Option<u32> {
    let b = data.get(at..at + 4)?;
    Some(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
}

fn word(data: &[u8], at: usize) -> Option<u16> {
    let b = data.get(at..at + 2)?;
    Some(u16::from_le_bytes([b[0], b[1]]))
}

fn cstr(data: &[u8]) -> String {
    let end = data.iter().position(|&b| b == 0).unwrap_or(data.len());
    String::from_utf8_lossy(&data[..end]).into_owned()
}

/// A CodeView debug record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodeView {
    /// PDB 7.0 reference.
    Rsds {
        guid: [u8; 16],
        age: u32,
        pdb_path: String,
    },
    /// PDB 2.0 reference.
    Nb10 {
        offset: u32,
        signature: u32,
        age: u32,
        pdb_path: String,
    },
    /// Any other signature; the payload is dumped as bytes.
    Other { signature: [u8; 4] },
}

impl CodeView {
    /// Decode the record header. `None` when the data is shorter than the
    /// fixed part of its format.
    pub fn parse(data: &[u8]) -> Option<Self> {
        let signature = dword(data, 0)?;
        match signature {
            CV_SIGNATURE_RSDS => {
                let mut guid = [0u8; 16];
                guid.copy_from_slice(data.get(4..20)?);
                Some(Self::Rsds {
                    guid,
                    age: dword(data, 20)?,
                    pdb_path: cstr(&data[24..]),
                })
            }
            CV_SIGNATURE_NB10 => Some(Self::Nb10 {
                offset: dword(data, 4)?,
                signature: dword(data, 8)?,
                age: dword(data, 12)?,
                pdb_path: cstr(data.get(16..)?),
            }),
            _ => Some(Self::Other {
                signature: signature.to_le_bytes(),
            }),
        }
    }
}

/// Format a GUID in registry order, without braces or dashes.
pub fn guid_string(guid: &[u8; 16]) -> String {
    format!(
        "{:08X}{:04X}{:04X}{:02X}{:02X}{:02X}{:02X}{:02X}{:02X}{:02X}{:02X}",
        u32::from_le_bytes([guid[0], guid[1], guid[2], guid[3]]),
        u16::from_le_bytes([guid[4], guid[5]]),
        u16::from_le_bytes([guid[6], guid[7]]),
        guid[8],
        guid[9],
        guid[10],
        guid[11],
        guid[12],
        guid[13],
        guid[14],
        guid[15]
    )
}

/// FPO_DATA - 16 bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FpoRecord {
    pub start: u32,
    pub proc_size: u32,
    /// Locals, in dwords.
    pub locals: u32,
    /// Parameters, in dwords.
    pub params: u16,
    pub prolog: u8,
    pub regs: u8,
    pub has_seh: bool,
    pub uses_bp: bool,
    pub frame: u8,
}

impl FpoRecord {
    pub const SIZE: usize = 16;

    pub fn parse(data: &[u8]) -> Option<Self> {
        let bits = word(data, 14)?;
        Some(Self {
            start: dword(data, 0)?,
            proc_size: dword(data, 4)?,
            locals: dword(data, 8)?,
            params: word(data, 12)?,
            prolog: (bits & 0xFF) as u8,
            regs: ((bits >> 8) & 0x7) as u8,
            has_seh: bits & 0x0800 != 0,
            uses_bp: bits & 0x1000 != 0,
            frame: (bits >> 14) as u8,
        })
    }

    pub fn frame_name(&self) -> &'static str {
        match self.frame {
            0 => "FPO",
            1 => "TRAP",
            2 => "TSS",
            _ => "NONFPO",
        }
    }
}

/// IMAGE_COFF_SYMBOLS_HEADER - 32 bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoffSymbolsHeader {
    pub number_of_symbols: u32,
    /// Offset of the first symbol from the start of this header.
    pub lva_to_first_symbol: u32,
    pub number_of_linenumbers: u32,
    pub lva_to_first_linenumber: u32,
    pub rva_to_first_byte_of_code: u32,
    pub rva_to_last_byte_of_code: u32,
    pub rva_to_first_byte_of_data: u32,
    pub rva_to_last_byte_of_data: u32,
}

impl CoffSymbolsHeader {
    pub const SIZE: usize = 32;

    pub fn parse(data: &[u8]) -> Option<Self> {
        Some(Self {
            number_of_symbols: dword(data, 0)?,
            lva_to_first_symbol: dword(data, 4)?,
            number_of_linenumbers: dword(data, 8)?,
            lva_to_first_linenumber: dword(data, 12)?,
            rva_to_first_byte_of_code: dword(data, 16)?,
            rva_to_last_byte_of_code: dword(data, 20)?,
            rva_to_first_byte_of_data: dword(data, 24)?,
            rva_to_last_byte_of_data: dword(data, 28)?,
        })
    }
}

/// Name field of a COFF symbol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SymbolName {
    Short(String),
    /// Offset into the string table.
    Long(u32),
}

/// IMAGE_SYMBOL - 18 bytes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoffSymbol {
    pub name: SymbolName,
    pub value: u32,
    pub section_number: i16,
    pub symbol_type: u16,
    pub storage_class: u8,
    pub number_of_aux_symbols: u8,
}

impl CoffSymbol {
    pub const SIZE: usize = 18;

    pub fn parse(data: &[u8]) -> Option<Self> {
        let raw = data.get(..Self::SIZE)?;
        let name = if raw[..4] == [0; 4] {
            SymbolName::Long(dword(raw, 4)?)
        } else {
            SymbolName::Short(cstr(&raw[..8]))
        };
        Some(Self {
            name,
            value: dword(raw, 8)?,
            section_number: word(raw, 12)? as i16,
            symbol_type: word(raw, 14)?,
            storage_class: raw[16],
            number_of_aux_symbols: raw[17],
        })
    }

    /// Resolve the name; `strings` is the string table including its
    /// leading size field.
    pub fn resolve_name(&self, strings: Option<&[u8]>) -> String {
        match &self.name {
            SymbolName::Short(name) => name.clone(),
            SymbolName::Long(offset) => strings
                .and_then(|table| table.get(*offset as usize..))
                .map_or_else(|| format!("/{offset}"), cstr),
        }
    }
}

/// One 12-byte STABS entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StabEntry {
    pub strx: u32,
    pub stab_type: u8,
    pub other: u8,
    pub desc: u16,
    pub value: u32,
}

impl StabEntry {
    pub const SIZE: usize = 12;

    pub fn parse(data: &[u8]) -> Option<Self> {
        Some(Self {
            strx: dword(data, 0)?,
            stab_type: *data.get(4)?,
            other: *data.get(5)?,
            desc: word(data, 6)?,
            value: dword(data, 8)?,
        })
    }
}

/// Formatter seam for the payloads the core decoders do not interpret.
pub trait SubDumper {
    /// COFF debug information from a debug directory entry. `sections` is
    /// the owning image's section table.
    fn coff_debug(&self, out: &mut dyn Write, data: Option<&[u8]>, sections: &[SectionHeader]) -> io::Result<()>;

    fn codeview(&self, out: &mut dyn Write, data: Option<&[u8]>) -> io::Result<()>;

    /// Frame pointer omission records.
    fn fpo(&self, out: &mut dyn Write, data: Option<&[u8]>) -> io::Result<()>;

    /// `count` COFF symbols in `symbols`, with the string table that
    /// follows them when it could be read.
    fn symbol_table(
        &self,
        out: &mut dyn Write,
        symbols: &[u8],
        count: u32,
        strings: Option<&[u8]>,
        sections: &[SectionHeader],
    ) -> io::Result<()>;

    fn stabs(&self, out: &mut dyn Write, stabs: &[u8], stabstr: &[u8]) -> io::Result<()>;
}

/// Decodes the fixed-size records of each payload format.
#[derive(Debug, Clone, Copy, Default)]
pub struct BasicSubDumper;

impl BasicSubDumper {
    fn section_label(number: i16, sections: &[SectionHeader]) -> String {
        match number {
            0 => "UNDEF".to_string(),
            -1 => "ABS".to_string(),
            -2 => "DEBUG".to_string(),
            n => usize::try_from(n)
                .ok()
                .and_then(|n| sections.get(n - 1))
                .map_or_else(|| n.to_string(), |s| s.name_str().into_owned()),
        }
    }
}

impl SubDumper for BasicSubDumper {
    fn coff_debug(&self, out: &mut dyn Write, data: Option<&[u8]>, sections: &[SectionHeader]) -> io::Result<()> {
        let Some(header) = data.and_then(CoffSymbolsHeader::parse) else {
            return writeln!(out, "    Can't grab COFF debug information");
        };
        writeln!(out, "    COFF symbols header")?;
        writeln!(out, "      NumberOfSymbols:      {}", header.number_of_symbols)?;
        writeln!(out, "      LvaToFirstSymbol:     {:08X}", header.lva_to_first_symbol)?;
        writeln!(out, "      NumberOfLinenumbers:  {}", header.number_of_linenumbers)?;
        writeln!(out, "      LvaToFirstLinenumber: {:08X}", header.lva_to_first_linenumber)?;
        writeln!(
            out,
            "      Code:                 {:08X}-{:08X}",
            header.rva_to_first_byte_of_code, header.rva_to_last_byte_of_code
        )?;
        writeln!(
            out,
            "      Data:                 {:08X}-{:08X}",
            header.rva_to_first_byte_of_data, header.rva_to_last_byte_of_data
        )?;

        let data = data.unwrap_or_default();
        let start = header.lva_to_first_symbol as usize;
        let len = (header.number_of_symbols as usize).saturating_mul(CoffSymbol::SIZE);
        match start.checked_add(len).and_then(|end| data.get(start..end)) {
            Some(symbols) => {
                let strings = data.get(start + len..);
                self.symbol_table(out, symbols, header.number_of_symbols, strings, sections)
            }
            None => writeln!(out, "    Can't grab COFF symbols"),
        }
    }

    fn codeview(&self, out: &mut dyn Write, data: Option<&[u8]>) -> io::Result<()> {
        let Some(data) = data else {
            return writeln!(out, "    Can't grab CodeView data");
        };
        match CodeView::parse(data) {
            Some(CodeView::Rsds { guid, age, pdb_path }) => {
                writeln!(out, "    CodeView signature: RSDS")?;
                writeln!(out, "      GUID:     {}", guid_string(&guid))?;
                writeln!(out, "      Age:      {age}")?;
                writeln!(out, "      PDB:      {pdb_path}")
            }
            Some(CodeView::Nb10 {
                offset,
                signature,
                age,
                pdb_path,
            }) => {
                writeln!(out, "    CodeView signature: NB10")?;
                writeln!(out, "      Offset:    {offset:08X}")?;
                writeln!(out, "      Signature: {signature:08X}")?;
                writeln!(out, "      Age:       {age}")?;
                writeln!(out, "      PDB:       {pdb_path}")
            }
            Some(CodeView::Other { signature }) => {
                writeln!(
                    out,
                    "    CodeView signature: {}",
                    text::escape_ascii(&signature)
                )?;
                text::hexdump(out, Some(data), "      ")
            }
            None => writeln!(out, "    CodeView record too short ({} bytes)", data.len()),
        }
    }

    fn fpo(&self, out: &mut dyn Write, data: Option<&[u8]>) -> io::Result<()> {
        let Some(data) = data else {
            return writeln!(out, "    Can't grab FPO data");
        };
        let records: Vec<_> = data
            .chunks_exact(FpoRecord::SIZE)
            .filter_map(FpoRecord::parse)
            .collect();
        writeln!(out, "    FPO data ({} records)", records.len())?;
        writeln!(out, "      Start    Size     Locals Params Prolog Regs SEH BP Frame")?;
        for r in &records {
            writeln!(
                out,
                "      {:08x} {:08x} {:6} {:6} {:6} {:4} {:>3} {:>2} {}",
                r.start,
                r.proc_size,
                r.locals,
                r.params,
                r.prolog,
                r.regs,
                if r.has_seh { "Y" } else { "N" },
                if r.uses_bp { "Y" } else { "N" },
                r.frame_name()
            )?;
        }
        Ok(())
    }

    fn symbol_table(
        &self,
        out: &mut dyn Write,
        symbols: &[u8],
        count: u32,
        strings: Option<&[u8]>,
        sections: &[SectionHeader],
    ) -> io::Result<()> {
        writeln!(out, "Symbol Table ({count} entries)")?;
        writeln!(out, "  Index    Value    Section  Type Class Aux Name")?;

        let mut index = 0usize;
        while index < count as usize {
            let Some(symbol) = symbols
                .get(index * CoffSymbol::SIZE..)
                .and_then(CoffSymbol::parse)
            else {
                writeln!(out, "  *** symbol table truncated at entry {index}")?;
                break;
            };
            writeln!(
                out,
                "  {:08x} {:08x} {:<8} {:04x} {:5} {:3} {}",
                index,
                symbol.value,
                Self::section_label(symbol.section_number, sections),
                symbol.symbol_type,
                symbol.storage_class,
                symbol.number_of_aux_symbols,
                symbol.resolve_name(strings)
            )?;
            // Auxiliary records share the numbering but are not decoded.
            index += 1 + usize::from(symbol.number_of_aux_symbols);
        }
        writeln!(out)
    }

    fn stabs(&self, out: &mut dyn Write, stabs: &[u8], stabstr: &[u8]) -> io::Result<()> {
        let entries: Vec<_> = stabs
            .chunks_exact(StabEntry::SIZE)
            .filter_map(StabEntry::parse)
            .collect();
        writeln!(out, "STABS ({} entries)", entries.len())?;

        // Each compilation unit starts with an N_UNDF header whose value is
        // the size of its string table slice.
        let (mut base, mut next_base) = (0usize, 0usize);
        for (i, entry) in entries.iter().enumerate() {
            if entry.stab_type == 0 {
                base = next_base;
                next_base = base.saturating_add(entry.value as usize);
            }
            let name = base
                .checked_add(entry.strx as usize)
                .and_then(|at| stabstr.get(at..))
                .map(cstr)
                .unwrap_or_default();
            writeln!(
                out,
                "  {:05} type {:02x} other {:02x} desc {:04x} value {:08x} {}",
                i, entry.stab_type, entry.other, entry.desc, entry.value, name
            )?;
        }
        writeln!(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn render(f: impl FnOnce(&mut dyn Write) -> io::Result<()>) -> String {
        let mut out = Vec::new();
        f(&mut out).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn test_codeview_rsds() {
        let mut data = Vec::new();
        data.extend_from_slice(b"RSDS");
        data.extend_from_slice(&[1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16]);
        data.extend_from_slice(&3u32.to_le_bytes());
        data.extend_from_slice(b"c:\\build\\app.pdb\0");

        let parsed = CodeView::parse(&data).unwrap();
        let CodeView::Rsds { guid, age, pdb_path } = &parsed else {
            panic!("expected RSDS, got {parsed:?}");
        };
        assert_eq!(guid_string(guid), "0403020106050807090A0B0C0D0E0F10");
        assert_eq!(*age, 3);
        assert_eq!(pdb_path, "c:\\build\\app.pdb");

        let text = render(|out| BasicSubDumper.codeview(out, Some(&data)));
        assert!(text.contains("CodeView signature: RSDS"));
        assert!(text.contains("Age:      3"));
    }

    #[test]
    fn test_codeview_nb10_and_short() {
        let mut data = Vec::new();
        data.extend_from_slice(b"NB10");
        data.extend_from_slice(&0u32.to_le_bytes());
        data.extend_from_slice(&0x3A2B_1C0Du32.to_le_bytes());
        data.extend_from_slice(&2u32.to_le_bytes());
        data.extend_from_slice(b"old.pdb\0");
        assert_eq!(
            CodeView::parse(&data),
            Some(CodeView::Nb10 {
                offset: 0,
                signature: 0x3A2B_1C0D,
                age: 2,
                pdb_path: "old.pdb".into()
            })
        );
        assert_eq!(CodeView::parse(b"RSDS\0\0"), None);
    }

    #[test]
    fn test_fpo_bitfields() {
        let mut data = [0u8; 16];
        data[0..4].copy_from_slice(&0x1000u32.to_le_bytes());
        data[4..8].copy_from_slice(&0x40u32.to_le_bytes());
        data[12..14].copy_from_slice(&2u16.to_le_bytes());
        // prolog 5, regs 3, BP, frame NONFPO
        data[14..16].copy_from_slice(&(5u16 | 3 << 8 | 0x1000 | 3 << 14).to_le_bytes());
        let record = FpoRecord::parse(&data).unwrap();
        assert_eq!((record.prolog, record.regs), (5, 3));
        assert!(record.uses_bp && !record.has_seh);
        assert_eq!(record.frame_name(), "NONFPO");
    }

    #[test]
    fn test_symbol_table_long_names_and_aux() {
        let mut symbols = Vec::new();
        // long name at string table offset 4, one aux record
        symbols.extend_from_slice(&[0, 0, 0, 0]);
        symbols.extend_from_slice(&4u32.to_le_bytes());
        symbols.extend_from_slice(&0x10u32.to_le_bytes());
        symbols.extend_from_slice(&1i16.to_le_bytes());
        symbols.extend_from_slice(&0x20u16.to_le_bytes());
        symbols.extend_from_slice(&[2, 1]);
        symbols.extend_from_slice(&[0u8; 18]);
        symbols.extend_from_slice(b"_main\0\0\0");
        symbols.extend_from_slice(&0u32.to_le_bytes());
        symbols.extend_from_slice(&(-1i16).to_le_bytes());
        symbols.extend_from_slice(&[0, 0, 3, 0]);

        let mut strings = 20u32.to_le_bytes().to_vec();
        strings.extend_from_slice(b"a_long_function\0");

        let text = render(|out| BasicSubDumper.symbol_table(out, &symbols, 3, Some(&strings), &[]));
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines[0], "Symbol Table (3 entries)");
        assert!(lines[2].ends_with("a_long_function"));
        assert!(lines[2].contains(" 1 "));
        assert!(lines[3].starts_with("  00000002"));
        assert!(lines[3].contains("ABS"));
        assert!(lines[3].ends_with("_main"));
    }

    #[test]
    fn test_stabs_string_base_per_unit() {
        let entry = |strx: u32, ty: u8, value: u32| {
            let mut e = strx.to_le_bytes().to_vec();
            e.extend_from_slice(&[ty, 0, 0, 0]);
            e.extend_from_slice(&value.to_le_bytes());
            e
        };
        let mut stabs = entry(1, 0, 6);
        stabs.extend(entry(1, 0x24, 0x1000));
        stabs.extend(entry(0, 0, 4));
        stabs.extend(entry(1, 0x24, 0x2000));
        let stabstr = b"\0a.c\0\0\0b.c\0";

        let text = render(|out| BasicSubDumper.stabs(out, &stabs, stabstr));
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines[0], "STABS (4 entries)");
        assert!(lines[2].ends_with("a.c"));
        assert!(lines[4].ends_with("b.c"));
    }
}
