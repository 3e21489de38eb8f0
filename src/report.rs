//! Line-oriented report writer.
//!
//! [`Dumper`] renders a decoded [`PeFile`] or [`DbgFile`] to any
//! [`io::Write`] sink. Which parts are printed is controlled by
//! [`DumpOptions`]; payloads the core decoders leave uninterpreted go to a
//! [`SubDumper`].
//!
//! Absent directories print nothing. Items that are declared but cannot be
//! read print a diagnostic line and the dump moves on; only allocation
//! failures and sink I/O errors abort.

use crate::coff::{machine_name, MachineType};
use crate::data_dir::{DataDirectoryType, NUMBER_OF_DIRECTORY_ENTRIES};
use crate::dbg::DbgFile;
use crate::debug::{DebugEntry, DebugPayload};
use crate::exception::{
    register_name, ExceptionEntry, UnwindDetail, UnwindInfo, UnwindOp, UnwindTrailer, UNW_FLAG_CHAININFO,
    UNW_FLAG_EHANDLER, UNW_FLAG_UHANDLER,
};
use crate::export::{ExportAddress, ExportDirectory, ExportName};
use crate::import::ImportThunk;
use crate::optional::{magic_name, OptionalHeader, PE32_MAGIC};
use crate::pe::PeFile;
use crate::resource::{MessageText, ResourcePayload};
use crate::section::{self, SectionHeader, SectionName};
use crate::subdump::{BasicSubDumper, CoffSymbol, SubDumper};
use crate::symbols::UNREADABLE_NAME;
use crate::text::{self, time_str};
use crate::{Error, Result};
use std::collections::BTreeSet;
use std::io::{self, Write};
use std::str::FromStr;

/// A directory that can be selected for dumping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Section {
    /// Imports, followed by delay-load imports.
    Import,
    Export,
    Debug,
    Resource,
    Tls,
    Clr,
    Reloc,
    Except,
}

impl Section {
    pub const ALL: [Section; 8] = [
        Self::Import,
        Self::Export,
        Self::Debug,
        Self::Resource,
        Self::Tls,
        Self::Clr,
        Self::Reloc,
        Self::Except,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::Import => "import",
            Self::Export => "export",
            Self::Debug => "debug",
            Self::Resource => "resource",
            Self::Tls => "tls",
            Self::Clr => "clr",
            Self::Reloc => "reloc",
            Self::Except => "except",
        }
    }
}

impl FromStr for Section {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|section| section.name() == s)
            .ok_or_else(|| format!("unknown section '{s}'"))
    }
}

/// Directory selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sections {
    All,
    Only(BTreeSet<Section>),
}

impl Sections {
    pub fn contains(&self, section: Section) -> bool {
        match self {
            Self::All => true,
            Self::Only(set) => set.contains(&section),
        }
    }
}

impl FromIterator<Section> for Sections {
    fn from_iter<I: IntoIterator<Item = Section>>(iter: I) -> Self {
        Self::Only(iter.into_iter().collect())
    }
}

/// What a dump prints.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DumpOptions {
    /// File header, optional header and section table.
    pub header: bool,
    /// Directories to decode. With neither this nor `header` the file and
    /// optional headers are still printed.
    pub sections: Option<Sections>,
    /// Hex dump each section's raw data after its header.
    pub raw_data: bool,
    /// COFF symbol table.
    pub symbol_table: bool,
    /// `.stab`/`.stabstr` debug information.
    pub stabs: bool,
}

impl DumpOptions {
    /// Headers plus every directory.
    pub fn all() -> Self {
        Self {
            header: true,
            sections: Some(Sections::All),
            ..Self::default()
        }
    }
}

fn word<W: Write>(out: &mut W, title: &str, value: u16) -> io::Result<()> {
    writeln!(out, "  {title:<34} 0x{value:<4X}         {value}")
}

fn dword<W: Write>(out: &mut W, title: &str, value: u32) -> io::Result<()> {
    writeln!(out, "  {title:<34} 0x{value:<8x}     {value}")
}

fn longlong<W: Write>(out: &mut W, title: &str, value: u64) -> io::Result<()> {
    writeln!(out, "  {title:<34} 0x{value:x}")
}

fn version<W: Write>(out: &mut W, title: &str, major: u16, minor: u16) -> io::Result<()> {
    writeln!(out, "  {title:<34} {major}.{minor:02}")
}

macro_rules! leading_fields {
    ($out:expr, $h:expr) => {
        word($out, "Magic", $h.magic)?;
        version(
            $out,
            "linker version",
            u16::from($h.major_linker_version),
            u16::from($h.minor_linker_version),
        )?;
        dword($out, "size of code", $h.size_of_code)?;
        dword($out, "size of initialized data", $h.size_of_initialized_data)?;
        dword($out, "size of uninitialized data", $h.size_of_uninitialized_data)?;
        dword($out, "entrypoint RVA", $h.address_of_entry_point)?;
        dword($out, "base of code", $h.base_of_code)?;
    };
}

macro_rules! layout_fields {
    ($out:expr, $h:expr) => {
        dword($out, "section align", $h.section_alignment)?;
        dword($out, "file align", $h.file_alignment)?;
        version(
            $out,
            "required OS version",
            $h.major_operating_system_version,
            $h.minor_operating_system_version,
        )?;
        version($out, "image version", $h.major_image_version, $h.minor_image_version)?;
        version(
            $out,
            "subsystem version",
            $h.major_subsystem_version,
            $h.minor_subsystem_version,
        )?;
        dword($out, "Win32 Version", $h.win32_version_value)?;
        dword($out, "size of image", $h.size_of_image)?;
        dword($out, "size of headers", $h.size_of_headers)?;
        dword($out, "checksum", $h.check_sum)?;
    };
}

/// Writes reports for decoded images.
pub struct Dumper<'w, W: Write> {
    out: &'w mut W,
    options: DumpOptions,
    sub: Box<dyn SubDumper>,
}

impl<'w, W: Write> Dumper<'w, W> {
    pub fn new(out: &'w mut W, options: DumpOptions) -> Self {
        Self {
            out,
            options,
            sub: Box::new(BasicSubDumper),
        }
    }

    /// Replace the formatter used for CodeView, FPO, COFF and STABS data.
    pub fn with_subdumper(mut self, sub: Box<dyn SubDumper>) -> Self {
        self.sub = sub;
        self
    }

    pub fn options(&self) -> &DumpOptions {
        &self.options
    }

    /// Dump a PE image.
    pub fn dump_pe(&mut self, pe: &PeFile<'_>) -> Result<()> {
        tracing::debug!(?pe, "dumping image");

        if pe.is_placeholder() {
            writeln!(self.out, "*** This is a placeholder DLL without code ***\n")?;
        }

        if self.options.header {
            self.file_header(pe)?;
            self.optional_header(pe)?;
            self.section_table(pe)?;
        } else if self.options.sections.is_none() {
            self.file_header(pe)?;
            self.optional_header(pe)?;
        }

        if let Some(sections) = self.options.sections.clone() {
            if sections.contains(Section::Import) {
                self.imports(pe)?;
                self.delay_imports(pe)?;
            }
            if sections.contains(Section::Export) {
                self.exports(pe)?;
            }
            if sections.contains(Section::Debug) {
                self.debug_directory(pe)?;
            }
            if sections.contains(Section::Resource) {
                self.resources(pe)?;
            }
            if sections.contains(Section::Tls) {
                self.tls(pe)?;
            }
            if sections.contains(Section::Clr) {
                self.clr(pe)?;
            }
            if sections.contains(Section::Reloc) {
                self.relocations(pe)?;
            }
            if sections.contains(Section::Except) {
                self.exceptions(pe)?;
            }
        }

        if self.options.symbol_table {
            self.symbol_table(pe)?;
        }
        if self.options.stabs {
            self.stabs(pe)?;
        }
        Ok(())
    }

    /// Dump a split debug file.
    pub fn dump_dbg(&mut self, dbg: &DbgFile<'_>) -> Result<()> {
        let h = &dbg.header;
        let signature = h.signature.to_le_bytes();
        let out = &mut *self.out;
        writeln!(
            out,
            "Signature:          {} (0x{:4X})",
            String::from_utf8_lossy(&signature),
            h.signature
        )?;
        writeln!(out, "Flags:              0x{:04X}", h.flags)?;
        writeln!(out, "Machine:            0x{:04X} ({})", h.machine, machine_name(h.machine))?;
        writeln!(out, "Characteristics:    0x{:04X}", h.characteristics)?;
        writeln!(
            out,
            "TimeDateStamp:      0x{:08X} ({})",
            h.time_date_stamp,
            time_str(h.time_date_stamp)
        )?;
        writeln!(out, "CheckSum:           0x{:08X}", h.check_sum)?;
        writeln!(out, "ImageBase:          0x{:08X}", h.image_base)?;
        writeln!(out, "SizeOfImage:        0x{:08X}", h.size_of_image)?;
        writeln!(out, "NumberOfSections:   0x{:08X}", h.number_of_sections)?;
        writeln!(out, "ExportedNamesSize:  0x{:08X}", h.exported_names_size)?;
        writeln!(out, "DebugDirectorySize: 0x{:08X}", h.debug_directory_size)?;

        let Some(sections) = &dbg.sections else {
            writeln!(out, "Can't get the sections, aborting")?;
            return Ok(());
        };

        writeln!(self.out, "Section Table")?;
        for section in sections {
            // Long names need a string table, which split debug files lack.
            self.section_header(section, &SectionName::Short(section.name_str().into_owned()))?;
            if self.options.raw_data {
                let data = dbg
                    .reader()
                    .read(u64::from(section.pointer_to_raw_data), section.size_of_raw_data as usize);
                text::hexdump(&mut *self.out, data, "    ")?;
                writeln!(self.out)?;
            }
        }

        let Some(entries) = &dbg.debug_entries else {
            writeln!(self.out, "Couldn't get the debug directory info, aborting")?;
            return Ok(());
        };
        writeln!(self.out, "Debug Table ({} directories)", entries.len())?;
        for (index, entry) in entries.iter().enumerate() {
            self.debug_entry(index, entry, sections)?;
        }
        Ok(())
    }

    /// Report a file whose headers could not be decoded.
    pub fn header_failure(&mut self, error: &Error) -> Result<()> {
        match error {
            Error::InvalidDbgSignature => writeln!(self.out, "Can't grab the separate header, aborting")?,
            Error::OffsetOutOfBounds { .. } | Error::BufferTooSmall { .. } => {
                writeln!(self.out, "Can't grab the image headers, aborting")?
            }
            other => writeln!(self.out, "Can't decode the image headers ({other}), aborting")?,
        }
        Ok(())
    }

    fn file_header(&mut self, pe: &PeFile<'_>) -> Result<()> {
        let h = &pe.coff_header;
        let out = &mut *self.out;
        writeln!(out, "File Header")?;
        writeln!(
            out,
            "  Machine:                      {:04X} ({})",
            h.machine,
            machine_name(h.machine)
        )?;
        writeln!(out, "  Number of Sections:           {}", h.number_of_sections)?;
        writeln!(
            out,
            "  TimeDateStamp:                {:08X} ({}) offset {}",
            h.time_date_stamp,
            time_str(h.time_date_stamp),
            pe.nt_offset + 8
        )?;
        writeln!(out, "  PointerToSymbolTable:         {:08X}", h.pointer_to_symbol_table)?;
        writeln!(out, "  NumberOfSymbols:              {:08X}", h.number_of_symbols)?;
        writeln!(out, "  SizeOfOptionalHeader:         {:04X}", h.size_of_optional_header)?;
        writeln!(out, "  Characteristics:              {:04X}", h.characteristics)?;
        for label in h.flags().labels() {
            writeln!(out, "    {label}")?;
        }
        writeln!(out)?;
        Ok(())
    }

    fn optional_header(&mut self, pe: &PeFile<'_>) -> Result<()> {
        let oh = &pe.optional_header;
        let out = &mut *self.out;
        writeln!(out, "Optional Header ({})", magic_name(oh.magic()))?;

        match oh {
            OptionalHeader::Pe32(h) if h.magic == PE32_MAGIC => {
                leading_fields!(out, h);
                dword(out, "base of data", h.base_of_data)?;
                dword(out, "image base", h.image_base)?;
                layout_fields!(out, h);
                Self::subsystem_and_flags(out, h.subsystem, h.dll_characteristics)?;
                dword(out, "stack reserve size", h.size_of_stack_reserve)?;
                dword(out, "stack commit size", h.size_of_stack_commit)?;
                dword(out, "heap reserve size", h.size_of_heap_reserve)?;
                dword(out, "heap commit size", h.size_of_heap_commit)?;
                dword(out, "loader flags", h.loader_flags)?;
            }
            OptionalHeader::Pe32Plus(h) => {
                leading_fields!(out, h);
                longlong(out, "image base", h.image_base)?;
                layout_fields!(out, h);
                Self::subsystem_and_flags(out, h.subsystem, h.dll_characteristics)?;
                longlong(out, "stack reserve size", h.size_of_stack_reserve)?;
                longlong(out, "stack commit size", h.size_of_stack_commit)?;
                longlong(out, "heap reserve size", h.size_of_heap_reserve)?;
                longlong(out, "heap commit size", h.size_of_heap_commit)?;
                dword(out, "loader flags", h.loader_flags)?;
            }
            _ => {
                writeln!(out, "  Unknown optional header magic: 0x{:<4X}", oh.magic())?;
                return Ok(());
            }
        }

        let count = oh.number_of_rva_and_sizes();
        dword(out, "RVAs & sizes", count)?;
        writeln!(out)?;
        writeln!(out, "Data Directory")?;
        let shown = (count as usize).min(NUMBER_OF_DIRECTORY_ENTRIES);
        for (index, dir) in oh.data_directories().iter().take(shown).enumerate() {
            let name = DataDirectoryType::from_index(index).map_or("", DataDirectoryType::name);
            writeln!(
                out,
                "  {:<12} rva: 0x{:<8x}  size: 0x{:<8x}",
                name, dir.virtual_address, dir.size
            )?;
        }
        writeln!(out)?;
        Ok(())
    }

    fn subsystem_and_flags(out: &mut W, subsystem: u16, dll_characteristics: u16) -> io::Result<()> {
        let name = crate::optional::Subsystem::from_u16(subsystem).name();
        writeln!(out, "  {:<34} 0x{:X} ({})", "Subsystem", subsystem, name)?;
        writeln!(out, "  {:<34} 0x{:X}", "DLL characteristics:", dll_characteristics)?;
        let flags = crate::optional::DllCharacteristics::from_bits_retain(dll_characteristics);
        for label in flags.labels() {
            writeln!(out, "    {label}")?;
        }
        Ok(())
    }

    fn section_table(&mut self, pe: &PeFile<'_>) -> Result<()> {
        writeln!(self.out, "Section Table")?;
        for section in &pe.sections {
            self.section_header(section, &pe.section_name(section))?;
            if self.options.raw_data {
                text::hexdump(&mut *self.out, pe.section_data(section), "    ")?;
                writeln!(self.out)?;
            }
        }
        Ok(())
    }

    fn section_header(&mut self, s: &SectionHeader, name: &SectionName) -> Result<()> {
        let out = &mut *self.out;
        match name {
            SectionName::Long { raw, long } => write!(out, "  {raw:.8} ({long})")?,
            SectionName::Short(short) => write!(out, "  {short:<8.8}")?,
        }
        writeln!(
            out,
            "   VirtSize: 0x{:08x}  VirtAddr:  0x{:08x}",
            s.virtual_size, s.virtual_address
        )?;
        writeln!(
            out,
            "    raw data offs:   0x{:08x}  raw data size: 0x{:08x}",
            s.pointer_to_raw_data, s.size_of_raw_data
        )?;
        writeln!(
            out,
            "    relocation offs: 0x{:08x}  relocations:   0x{:08x}",
            s.pointer_to_relocations, s.number_of_relocations
        )?;
        writeln!(
            out,
            "    line # offs:     {:<8}  line #'s:      {:<8}",
            s.pointer_to_linenumbers, s.number_of_linenumbers
        )?;
        writeln!(out, "    characteristics: 0x{:08x}", s.characteristics)?;
        write!(out, "    ")?;
        for label in section::characteristic_labels(s.characteristics) {
            write!(out, "  {label}")?;
        }
        write!(out, "\n\n")?;
        Ok(())
    }

    fn thunks(&mut self, thunks: Option<&[ImportThunk]>) -> Result<()> {
        let Some(thunks) = thunks else {
            writeln!(self.out, "Can't grab thunk data, going to next imported DLL")?;
            return Ok(());
        };
        for thunk in thunks {
            match thunk {
                ImportThunk::Ordinal(ordinal) => writeln!(self.out, "  {ordinal:4}  <by ordinal>")?,
                ImportThunk::Name { hint, name, data } => {
                    writeln!(self.out, "  {hint:4}  {name} {data:x}")?
                }
                ImportThunk::Unresolved { .. } => writeln!(
                    self.out,
                    "Can't grab import by name info, skipping to next ordinal"
                )?,
            }
        }
        writeln!(self.out)?;
        Ok(())
    }

    fn imports(&mut self, pe: &PeFile<'_>) -> Result<()> {
        let Some(table) = pe.imports() else {
            return Ok(());
        };
        writeln!(self.out, "Import Table size: {:08x}", table.size)?;
        for dll in &table.dlls {
            let d = &dll.descriptor;
            let offset = pe.rva_to_offset(dll.descriptor_rva, 1).unwrap_or_default();
            writeln!(self.out, "  offset {:08x} {}", offset, dll.name.as_deref().unwrap_or("???"))?;
            writeln!(self.out, "  Hint/Name Table: {:08X}", d.original_first_thunk)?;
            writeln!(
                self.out,
                "  TimeDateStamp:   {:08X} ({})",
                d.time_date_stamp,
                time_str(d.time_date_stamp)
            )?;
            writeln!(self.out, "  ForwarderChain:  {:08X}", d.forwarder_chain)?;
            writeln!(self.out, "  First thunk RVA: {:08X}", d.first_thunk)?;
            writeln!(self.out, "  Ordn  Name")?;
            self.thunks(dll.thunks.as_deref())?;
        }
        writeln!(self.out)?;
        Ok(())
    }

    fn delay_imports(&mut self, pe: &PeFile<'_>) -> Result<()> {
        let Some(table) = pe.delay_imports() else {
            return Ok(());
        };
        writeln!(self.out, "Delay Import Table size: {:08x}", table.size)?;
        for dll in &table.dlls {
            let d = &dll.descriptor;
            let offset = pe.rva_to_offset(dll.descriptor_rva, 1).unwrap_or_default();
            writeln!(
                self.out,
                "  grAttrs {:08x} offset {:08x} {}",
                d.attributes,
                offset,
                dll.name.as_deref().unwrap_or("???")
            )?;
            writeln!(self.out, "  Hint/Name Table: {:08x}", d.import_name_table)?;
            writeln!(
                self.out,
                "  TimeDateStamp:   {:08X} ({})",
                d.time_date_stamp,
                time_str(d.time_date_stamp)
            )?;
            writeln!(self.out, "  Ordn  Name")?;
            self.thunks(dll.thunks.as_deref())?;
        }
        writeln!(self.out)?;
        Ok(())
    }

    fn exports(&mut self, pe: &PeFile<'_>) -> Result<()> {
        let index = DataDirectoryType::Export.as_index();
        let Some(dir) = pe
            .directory(index)
            .and_then(|_| pe.data_directory(index))
            .and_then(|entry| pe.rva(entry.virtual_address, ExportDirectory::SIZE))
            .and_then(|bytes| ExportDirectory::parse(bytes).ok())
        else {
            return Ok(());
        };

        let name = text::cstr_lossy(&pe.rva_reader(), dir.name_rva);
        let out = &mut *self.out;
        writeln!(out, "Exports table:")?;
        writeln!(out)?;
        writeln!(out, "  Name:            {}", name.as_deref().unwrap_or("???"))?;
        writeln!(out, "  Characteristics: {:08x}", dir.characteristics)?;
        writeln!(
            out,
            "  TimeDateStamp:   {:08X} {}",
            dir.time_date_stamp,
            time_str(dir.time_date_stamp)
        )?;
        writeln!(out, "  Version:         {}.{:02}", dir.major_version, dir.minor_version)?;
        writeln!(out, "  Ordinal base:    {}", dir.base)?;
        writeln!(out, "  # of functions:  {}", dir.number_of_functions)?;
        writeln!(out, "  # of Names:      {}", dir.number_of_names)?;
        writeln!(out, "Addresses of functions: {:08X}", dir.address_of_functions)?;
        writeln!(out, "Addresses of name ordinals: {:08X}", dir.address_of_name_ordinals)?;
        writeln!(out, "Addresses of names: {:08X}", dir.address_of_names)?;
        writeln!(out)?;
        writeln!(out, "  Entry Pt  Ordn  Name")?;

        let table = match pe.exports() {
            Ok(Some(table)) => table,
            Ok(None) => return Ok(()),
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                writeln!(out, "{e}")?;
                return Ok(());
            }
        };

        for function in &table.functions {
            write!(out, "  {:08X} {:5} ", function.rva, function.ordinal)?;
            match &function.name {
                ExportName::Named(name) => write!(out, "{name}")?,
                ExportName::Ordinal => write!(out, "<by ordinal>")?,
                ExportName::Unresolved(_) => write!(out, "{UNREADABLE_NAME}")?,
            }
            if let ExportAddress::Forwarder(target) = &function.address {
                write!(out, " (-> {target})")?;
            }
            writeln!(out)?;
        }
        writeln!(out)?;
        Ok(())
    }

    fn debug_entry(&mut self, index: usize, entry: &DebugEntry<'_>, sections: &[SectionHeader]) -> Result<()> {
        let d = &entry.directory;
        let out = &mut *self.out;
        writeln!(out, "Directory {:02}", index + 1)?;
        writeln!(out, "  Characteristics:   {:08X}", d.characteristics)?;
        writeln!(
            out,
            "  TimeDateStamp:     {:08X} {}",
            d.time_date_stamp,
            time_str(d.time_date_stamp)
        )?;
        writeln!(out, "  Version            {}.{:02}", d.major_version, d.minor_version)?;
        writeln!(out, "  Type:              {} ({})", d.debug_type, d.get_type().name())?;
        writeln!(out, "  SizeOfData:        {}", d.size_of_data)?;
        writeln!(out, "  AddressOfRawData:  {:08X}", d.address_of_raw_data)?;
        writeln!(out, "  PointerToRawData:  {:08X}", d.pointer_to_raw_data)?;

        match &entry.payload {
            DebugPayload::Misc(misc) => {
                writeln!(out, "    DataType:          {} ({})", misc.data_type, misc.data_type_name())?;
                writeln!(out, "    Length:            {}", misc.length)?;
                writeln!(
                    out,
                    "    Unicode:           {}",
                    if misc.unicode { "Yes" } else { "No" }
                )?;
                writeln!(out, "    Data:              {}", misc.data)?;
            }
            DebugPayload::MiscUnavailable => writeln!(out, "Can't get misc debug information")?,
            DebugPayload::Coff(data) => self.sub.coff_debug(out, *data, sections)?,
            DebugPayload::CodeView(data) => self.sub.codeview(out, *data)?,
            DebugPayload::Fpo(data) => self.sub.fpo(out, *data)?,
            DebugPayload::None => {}
        }
        writeln!(out)?;
        Ok(())
    }

    fn debug_directory(&mut self, pe: &PeFile<'_>) -> Result<()> {
        let Some(entries) = pe.debug_entries() else {
            return Ok(());
        };
        if entries.is_empty() {
            return Ok(());
        }
        writeln!(self.out, "Debug Table ({} directories)", entries.len())?;
        for (index, entry) in entries.iter().enumerate() {
            self.debug_entry(index, entry, &pe.sections)?;
        }
        writeln!(self.out)?;
        Ok(())
    }

    fn resources(&mut self, pe: &PeFile<'_>) -> Result<()> {
        let Some(tree) = pe.resources() else {
            return Ok(());
        };
        let out = &mut *self.out;
        write!(out, "Resources:")?;
        for resource in &tree.resources {
            writeln!(
                out,
                "\n  {} Name={} Language={:04x}:",
                resource.resource_type.type_label(),
                resource.name.name_label(),
                resource.language
            )?;
            match &resource.payload {
                ResourcePayload::StringTable(strings) => {
                    for s in strings {
                        writeln!(out, "    {:04x} \"{}\"", s.id, text::escape_utf16(&s.text))?;
                    }
                }
                ResourcePayload::MessageTable(messages) => {
                    for m in messages {
                        match &m.text {
                            MessageText::Unicode(units) => {
                                writeln!(out, "    {:08x} {}", m.id, text::unicode_literal(units))?
                            }
                            MessageText::Ansi(bytes) => {
                                writeln!(out, "    {:08x} \"{}\"", m.id, text::escape_ascii(bytes))?
                            }
                        }
                    }
                }
                ResourcePayload::Bytes(bytes) => text::hexdump(out, Some(*bytes), "    ")?,
                ResourcePayload::Unavailable => text::hexdump(out, None, "    ")?,
            }
        }
        write!(out, "\n\n")?;
        Ok(())
    }

    fn tls(&mut self, pe: &PeFile<'_>) -> Result<()> {
        let Some(info) = pe.tls() else {
            return Ok(());
        };
        let d = &info.directory;
        let out = &mut *self.out;
        writeln!(out, "Thread Local Storage")?;
        writeln!(
            out,
            "  Raw data        {:08x}-{:08x} (data size {:x} zero fill size {:x})",
            d.start_address_of_raw_data,
            d.end_address_of_raw_data,
            d.raw_data_size(),
            d.size_of_zero_fill
        )?;
        writeln!(out, "  Index address   {:08x}", d.address_of_index)?;
        writeln!(out, "  Characteristics {:08x}", d.characteristics)?;
        write!(out, "  Callbacks       {:08x} -> {{", d.address_of_callbacks)?;
        for callback in &info.callbacks {
            write!(out, " {callback:08x}")?;
        }
        write!(out, " }}\n\n")?;
        Ok(())
    }

    fn clr(&mut self, pe: &PeFile<'_>) -> Result<()> {
        let Some(clr) = pe.clr() else {
            return Ok(());
        };
        let out = &mut *self.out;
        writeln!(out, "CLR Header")?;
        dword(out, "Header Size", clr.cb)?;
        version(out, "Required runtime version", clr.major_runtime_version, clr.minor_runtime_version)?;
        writeln!(out, "  {:<34} 0x{:X}", "Flags", clr.flags)?;
        for label in clr.image_flags().labels() {
            writeln!(out, "    {label}")?;
        }
        dword(out, "EntryPointToken", clr.entry_point_token)?;
        writeln!(out)?;
        writeln!(out, "CLR Data Directory")?;
        for (title, dir) in clr.directories() {
            writeln!(
                out,
                "  {:<23} rva: 0x{:<8x}  size: 0x{:<8x}",
                title, dir.virtual_address, dir.size
            )?;
        }
        writeln!(out)?;
        Ok(())
    }

    fn relocations(&mut self, pe: &PeFile<'_>) -> Result<()> {
        let Some(table) = pe.relocations() else {
            return Ok(());
        };
        let out = &mut *self.out;
        writeln!(out, "Relocations")?;
        for block in &table.blocks {
            writeln!(out, "  Page {:x}", block.page_rva)?;
            for entry in &block.entries {
                writeln!(out, "    off {:04x} type {}", entry.offset, entry.reloc_type.name())?;
            }
        }
        if let Some(bad) = table.malformed {
            writeln!(
                out,
                "  *** block at offset {:x} declares size {}, smaller than its header",
                bad.offset, bad.block_size
            )?;
        }
        writeln!(out)?;
        Ok(())
    }

    fn exceptions(&mut self, pe: &PeFile<'_>) -> Result<()> {
        let Some(table) = pe.exceptions() else {
            return Ok(());
        };
        let machine = pe.coff_header.machine;
        if MachineType::from_u16(machine) != Some(MachineType::Amd64) {
            writeln!(
                self.out,
                "Exception information not supported for {} binaries",
                machine_name(machine)
            )?;
            return Ok(());
        }

        writeln!(self.out, "Exception info ({} functions):", table.len())?;
        for entry in &table.entries {
            self.exception_entry(entry)?;
        }
        Ok(())
    }

    fn exception_entry(&mut self, entry: &ExceptionEntry) -> Result<()> {
        let f = &entry.function;
        let out = &mut *self.out;
        writeln!(out, "\nFunction {:08x}-{:08x}:", f.begin_address, f.end_address)?;

        let info = match &entry.detail {
            UnwindDetail::Chained(Some(next)) => {
                writeln!(out, "  -> function {:08x}-{:08x}", next.begin_address, next.end_address)?;
                return Ok(());
            }
            UnwindDetail::Chained(None) => {
                writeln!(
                    out,
                    "  Can't grab chained function at {:08x}",
                    f.unwind_info_address & !1
                )?;
                return Ok(());
            }
            UnwindDetail::Unavailable => {
                writeln!(out, "  unwind info at {:08x}", f.unwind_info_address)?;
                writeln!(out, "    Can't grab unwind info")?;
                return Ok(());
            }
            UnwindDetail::UnknownVersion(version) => {
                writeln!(out, "  unwind info at {:08x}", f.unwind_info_address)?;
                writeln!(out, "    *** unknown version {version}")?;
                return Ok(());
            }
            UnwindDetail::Info(info) => info,
        };

        writeln!(out, "  unwind info at {:08x}", f.unwind_info_address)?;
        write!(out, "    flags {:x}", info.flags)?;
        if info.flags & UNW_FLAG_EHANDLER != 0 {
            write!(out, " EHANDLER")?;
        }
        if info.flags & UNW_FLAG_UHANDLER != 0 {
            write!(out, " UHANDLER")?;
        }
        if info.flags & UNW_FLAG_CHAININFO != 0 {
            write!(out, " CHAININFO")?;
        }
        writeln!(out, "\n    prolog 0x{:x} bytes", info.size_of_prolog)?;

        if info.frame_register != 0 {
            writeln!(
                out,
                "    frame register {} offset 0x{:x}(%rsp)",
                register_name(info.frame_register),
                u32::from(info.frame_offset) * 16
            )?;
        }
        write_unwind_codes(out, info)?;

        match info.trailer {
            UnwindTrailer::Chain(next) => writeln!(
                out,
                "    -> function {:08x}-{:08x}",
                next.begin_address, next.end_address
            )?,
            UnwindTrailer::Handler { handler, data_rva } => {
                writeln!(out, "    handler {handler:08x} data at {data_rva:08x}")?
            }
            UnwindTrailer::Unavailable => writeln!(out, "    Can't grab unwind handler data")?,
            UnwindTrailer::None => {}
        }
        Ok(())
    }

    fn symbol_table(&mut self, pe: &PeFile<'_>) -> Result<()> {
        let h = &pe.coff_header;
        if h.pointer_to_symbol_table == 0 || h.number_of_symbols == 0 {
            return Ok(());
        }
        let len = (h.number_of_symbols as usize).saturating_mul(CoffSymbol::SIZE);
        let Some(symbols) = pe.raw(u64::from(h.pointer_to_symbol_table), len) else {
            tracing::warn!(
                count = h.number_of_symbols,
                "symbol table runs past the end of the file"
            );
            return Ok(());
        };

        // The string table declares its own size; clamp it to the file.
        let reader = pe.reader();
        let strings = pe.string_table_offset().and_then(|offset| {
            let declared = u64::from(reader.read_u32(offset)?);
            let available = reader.size().saturating_sub(offset);
            reader.read(offset, usize::try_from(declared.min(available)).ok()?)
        });

        self.sub
            .symbol_table(&mut *self.out, symbols, h.number_of_symbols, strings, &pe.sections)?;
        Ok(())
    }

    fn stabs(&mut self, pe: &PeFile<'_>) -> Result<()> {
        let mut stabs = None;
        let mut stabstr = None;
        for s in &pe.sections {
            match s.raw_name() {
                b".stab" => stabs = pe.rva(s.virtual_address, s.virtual_size as usize),
                b".stabstr" => stabstr = pe.rva(s.virtual_address, s.virtual_size as usize),
                _ => {}
            }
        }
        if let (Some(stabs), Some(stabstr)) = (stabs, stabstr) {
            self.sub.stabs(&mut *self.out, stabs, stabstr)?;
        }
        Ok(())
    }
}

fn write_unwind_codes<W: Write>(out: &mut W, info: &UnwindInfo) -> io::Result<()> {
    for code in &info.codes {
        write!(out, "      0x{:02x}: ", code.code_offset)?;
        match code.op {
            UnwindOp::PushNonVol { reg } => writeln!(out, "push %{}", register_name(reg))?,
            UnwindOp::Alloc { size } => writeln!(out, "sub $0x{size:x},%rsp")?,
            UnwindOp::SetFpReg => writeln!(
                out,
                "lea 0x{:x}(%rsp),{}",
                u32::from(info.frame_offset) * 16,
                register_name(info.frame_register)
            )?,
            UnwindOp::SaveNonVol { reg, offset } => {
                writeln!(out, "mov %{},0x{offset:x}(%rsp)", register_name(reg))?
            }
            UnwindOp::SaveXmm128 { reg, offset } => writeln!(out, "movaps %xmm{reg},0x{offset:x}(%rsp)")?,
            UnwindOp::PushMachFrame { info } => writeln!(out, "PUSH_MACHFRAME {info}")?,
            UnwindOp::Unknown { code } => writeln!(out, "*** unknown code {code}")?,
        }
    }
    if info.truncated {
        writeln!(out, "      *** unwind codes run past the code count")?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::SliceReader;

    fn put(data: &mut [u8], at: usize, bytes: &[u8]) {
        data[at..at + bytes.len()].copy_from_slice(bytes);
    }

    /// i386 PE32 image with one `.text` section at RVA 0x1000, file 0x200.
    fn tiny_pe() -> Vec<u8> {
        let mut data = vec![0u8; 0x400];
        put(&mut data, 0, b"MZ");
        put(&mut data, 60, &0x40u32.to_le_bytes());
        put(&mut data, 0x40, b"PE\0\0");
        put(&mut data, 0x44, &0x014Cu16.to_le_bytes());
        put(&mut data, 0x46, &1u16.to_le_bytes());
        put(&mut data, 0x54, &0xE0u16.to_le_bytes());
        put(&mut data, 0x56, &0x0102u16.to_le_bytes());

        let opt = 0x58;
        put(&mut data, opt, &PE32_MAGIC.to_le_bytes());
        put(&mut data, opt + 28, &0x0040_0000u32.to_le_bytes());
        put(&mut data, opt + 68, &3u16.to_le_bytes());
        put(&mut data, opt + 92, &16u32.to_le_bytes());

        let sect = opt + 0xE0;
        put(&mut data, sect, b".text");
        put(&mut data, sect + 8, &0x200u32.to_le_bytes());
        put(&mut data, sect + 12, &0x1000u32.to_le_bytes());
        put(&mut data, sect + 16, &0x200u32.to_le_bytes());
        put(&mut data, sect + 20, &0x200u32.to_le_bytes());
        put(&mut data, sect + 36, &0x6000_0020u32.to_le_bytes());
        data
    }

    fn set_directory(data: &mut [u8], index: usize, rva: u32, size: u32) {
        let at = 0x58 + 96 + index * 8;
        put(data, at, &rva.to_le_bytes());
        put(data, at + 4, &size.to_le_bytes());
    }

    fn dump(data: &[u8], options: DumpOptions) -> String {
        let reader = SliceReader::new(data);
        let pe = PeFile::parse(&reader).unwrap();
        let mut out = Vec::new();
        Dumper::new(&mut out, options).dump_pe(&pe).unwrap();
        String::from_utf8(out).unwrap()
    }

    fn only(sections: &[Section]) -> DumpOptions {
        DumpOptions {
            sections: Some(sections.iter().copied().collect()),
            ..DumpOptions::default()
        }
    }

    #[test]
    fn test_section_names_parse() {
        assert_eq!("reloc".parse::<Section>(), Ok(Section::Reloc));
        assert!("ALL".parse::<Section>().is_err());
        let picked: Sections = [Section::Tls].into_iter().collect();
        assert!(picked.contains(Section::Tls) && !picked.contains(Section::Clr));
        assert!(Sections::All.contains(Section::Clr));
    }

    #[test]
    fn test_default_dump_shows_headers() {
        let text = dump(&tiny_pe(), DumpOptions::default());
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines[0], "File Header");
        assert_eq!(lines[1], "  Machine:                      014C (i386)");
        assert!(lines.contains(&"    EXECUTABLE_IMAGE"));
        assert!(text.contains("Optional Header (32bit)\n"));
        assert!(text.contains("  Magic                              0x10B          267\n"));
        assert!(text.contains("  image base                         0x400000       4194304\n"));
        assert!(text.contains("  Subsystem                          0x3 (Windows CUI)\n"));
        assert!(text.contains("  EXPORT       rva: 0x0         size: 0x0       \n"));
        assert!(!text.contains("Section Table"));
    }

    #[test]
    fn test_section_table_layout() {
        let options = DumpOptions {
            header: true,
            ..DumpOptions::default()
        };
        let text = dump(&tiny_pe(), options);
        assert!(text.contains("  .text      VirtSize: 0x00000200  VirtAddr:  0x00001000\n"));
        assert!(text.contains("    characteristics: 0x60000020\n      CODE  MEM_EXECUTE  MEM_READ\n\n"));
    }

    #[test]
    fn test_relocations_with_empty_block() {
        let mut data = tiny_pe();
        set_directory(&mut data, 5, 0x1100, 20);
        put(&mut data, 0x300, &0x2000u32.to_le_bytes());
        put(&mut data, 0x304, &8u32.to_le_bytes());
        put(&mut data, 0x308, &0x3000u32.to_le_bytes());
        put(&mut data, 0x30C, &12u32.to_le_bytes());
        put(&mut data, 0x310, &0x3004u16.to_le_bytes());

        let text = dump(&data, only(&[Section::Reloc]));
        assert_eq!(
            text,
            "Relocations\n  Page 2000\n  Page 3000\n    off 0004 type BASED_HIGHLOW\n    off 0000 type BASED_ABSOLUTE\n\n"
        );
    }

    #[test]
    fn test_exceptions_need_amd64() {
        let mut data = tiny_pe();
        set_directory(&mut data, 3, 0x1000, 12);
        let text = dump(&data, only(&[Section::Except]));
        assert_eq!(text, "Exception information not supported for i386 binaries\n");
    }

    #[test]
    fn test_missing_export_table_reports_and_continues() {
        let mut data = tiny_pe();
        set_directory(&mut data, 0, 0x1100, 40);
        let dir = 0x300;
        put(&mut data, dir + 12, &0x1180u32.to_le_bytes());
        put(&mut data, dir + 16, &1u32.to_le_bytes());
        put(&mut data, dir + 20, &2u32.to_le_bytes());
        put(&mut data, dir + 28, &0x9000u32.to_le_bytes());
        put(&mut data, 0x380, b"lib.dll\0");

        let text = dump(&data, only(&[Section::Export, Section::Reloc]));
        assert!(text.starts_with("Exports table:\n\n  Name:            lib.dll\n"));
        assert!(text.contains("  Entry Pt  Ordn  Name\nCan't grab functions' address table\n"));
    }

    #[test]
    fn test_unwind_code_rendering() {
        use crate::exception::UnwindCode;
        let info = UnwindInfo {
            version: 1,
            flags: 0,
            size_of_prolog: 8,
            count_of_codes: 3,
            frame_register: 5,
            frame_offset: 2,
            codes: vec![
                UnwindCode { code_offset: 8, op: UnwindOp::SetFpReg },
                UnwindCode { code_offset: 4, op: UnwindOp::Alloc { size: 0x28 } },
                UnwindCode { code_offset: 1, op: UnwindOp::PushNonVol { reg: 3 } },
            ],
            truncated: false,
            trailer: UnwindTrailer::None,
        };
        let mut out = Vec::new();
        write_unwind_codes(&mut out, &info).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "      0x08: lea 0x20(%rsp),rbp\n      0x04: sub $0x28,%rsp\n      0x01: push %rbx\n"
        );
    }
}
