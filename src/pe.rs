//! Per-image decoding context.
//!
//! [`PeFile`] holds the decoded headers of one image together with the
//! reader they came from. Every directory decoder reaches file bytes through
//! [`PeFile::rva`], which maps an RVA onto the raw data of the owning section.

use crate::clr::ClrHeader;
use crate::coff::{verify_pe_signature, CoffHeader};
use crate::data_dir::{DataDirectory, DataDirectoryType, NUMBER_OF_DIRECTORY_ENTRIES};
use crate::debug::DebugEntry;
use crate::delay_import::DelayImportTable;
use crate::dos::{self, DosHeader};
use crate::exception::ExceptionTable;
use crate::export::ExportTable;
use crate::import::ImportTable;
use crate::optional::OptionalHeader;
use crate::reader::Reader;
use crate::reloc::RelocationTable;
use crate::resource::ResourceTree;
use crate::section::{SectionHeader, SectionName};
use crate::tls::TlsInfo;
use crate::Result;

/// Resolve `rva .. rva + len` to a file offset.
///
/// `rva == 0` never resolves. Sections are searched from the last one
/// backwards, so when two sections overlap the later one owns the range.
pub fn resolve_rva(sections: &[SectionHeader], rva: u32, len: usize) -> Option<u64> {
    if rva == 0 {
        return None;
    }
    sections
        .iter()
        .rev()
        .find(|s| s.maps(rva, len))
        .map(|s| u64::from(s.pointer_to_raw_data) + u64::from(rva - s.virtual_address))
}

/// Decoded headers of one PE image.
pub struct PeFile<'a> {
    reader: &'a dyn Reader,
    /// DOS header.
    pub dos_header: DosHeader,
    /// File offset of the `PE\0\0` signature.
    pub nt_offset: u64,
    /// COFF file header.
    pub coff_header: CoffHeader,
    /// Optional header (PE32 or PE32+).
    pub optional_header: OptionalHeader,
    /// Section headers, possibly fewer than declared.
    pub sections: Vec<SectionHeader>,
    placeholder: bool,
}

impl std::fmt::Debug for PeFile<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeFile")
            .field("size", &self.reader.size())
            .field("nt_offset", &self.nt_offset)
            .field("coff_header", &self.coff_header)
            .field("sections", &self.sections.len())
            .finish_non_exhaustive()
    }
}

impl<'a> PeFile<'a> {
    /// Decode the DOS, COFF, optional and section headers.
    ///
    /// Fails only when the DOS header or the NT signature and file header
    /// cannot be read; everything after that degrades gracefully.
    pub fn parse<R: Reader>(reader: &'a R) -> Result<Self> {
        Self::from_dyn(reader)
    }

    /// [`PeFile::parse`] over a trait object.
    pub fn from_dyn(reader: &'a dyn Reader) -> Result<Self> {
        let dos_header = DosHeader::read_from(reader, 0)?;
        let nt_offset = dos_header
            .nt_offset()
            .ok_or(crate::Error::InvalidPeSignature)?;
        verify_pe_signature(reader, nt_offset)?;

        let coff_offset = nt_offset + 4;
        let coff_header = CoffHeader::read_from(reader, coff_offset)?;

        let optional_offset = coff_offset + CoffHeader::SIZE as u64;
        let optional_header =
            OptionalHeader::read_from(reader, optional_offset, coff_header.size_of_optional_header);

        let sections_offset = optional_offset + u64::from(coff_header.size_of_optional_header);
        let sections = SectionHeader::read_sections(
            reader,
            sections_offset,
            usize::from(coff_header.number_of_sections),
        );

        tracing::debug!(
            machine = %format_args!("{:#06x}", coff_header.machine),
            magic = %format_args!("{:#x}", optional_header.magic()),
            sections = sections.len(),
            "decoded image headers"
        );

        Ok(Self {
            reader,
            dos_header,
            nt_offset,
            coff_header,
            optional_header,
            sections,
            placeholder: dos::is_placeholder(reader),
        })
    }

    /// The underlying byte source.
    pub fn reader(&self) -> &'a dyn Reader {
        self.reader
    }

    /// Whether the image is a header-only placeholder module.
    pub fn is_placeholder(&self) -> bool {
        self.placeholder
    }

    pub fn is_64bit(&self) -> bool {
        self.optional_header.is_pe32plus()
    }

    pub fn image_base(&self) -> u64 {
        self.optional_header.image_base()
    }

    /// File offset of the first section header.
    pub fn section_table_offset(&self) -> u64 {
        self.nt_offset
            + 4
            + CoffHeader::SIZE as u64
            + u64::from(self.coff_header.size_of_optional_header)
    }

    /// File offset of the COFF string table, if the image has symbols.
    pub fn string_table_offset(&self) -> Option<u64> {
        self.coff_header.string_table_offset()
    }

    /// Section name with long names resolved through the string table.
    pub fn section_name(&self, section: &SectionHeader) -> SectionName {
        section.resolve_name(self.reader, self.string_table_offset())
    }

    /// Raw bytes of a section as stored in the file.
    pub fn section_data(&self, section: &SectionHeader) -> Option<&'a [u8]> {
        self.raw(
            u64::from(section.pointer_to_raw_data),
            section.size_of_raw_data as usize,
        )
    }

    /// Read bytes at a file offset.
    pub fn raw(&self, offset: u64, len: usize) -> Option<&'a [u8]> {
        self.reader.read(offset, len)
    }

    /// File offset of `rva .. rva + len`.
    pub fn rva_to_offset(&self, rva: u32, len: usize) -> Option<u64> {
        resolve_rva(&self.sections, rva, len)
    }

    /// Read `len` bytes at `rva`.
    pub fn rva(&self, rva: u32, len: usize) -> Option<&'a [u8]> {
        let offset = self.rva_to_offset(rva, len)?;
        self.reader.read(offset, len)
    }

    /// Closure form of [`PeFile::rva`] for the directory decoders.
    pub fn rva_reader(&self) -> impl Fn(u32, usize) -> Option<&'a [u8]> + '_ {
        move |rva, len| self.rva(rva, len)
    }

    /// Closure over raw file offsets.
    pub fn raw_reader(&self) -> impl Fn(u64, usize) -> Option<&'a [u8]> {
        let reader = self.reader;
        move |offset, len| reader.read(offset, len)
    }

    /// Data directory entry `index`, if the header declares it.
    pub fn data_directory(&self, index: usize) -> Option<DataDirectory> {
        let declared = self.optional_header.number_of_rva_and_sizes();
        if index >= NUMBER_OF_DIRECTORY_ENTRIES || index as u64 >= u64::from(declared) {
            return None;
        }
        Some(self.optional_header.data_directories()[index])
    }

    /// Bytes of directory `index` and its declared size. `None` when the
    /// entry is not declared or its range does not map into a section.
    pub fn directory(&self, index: usize) -> Option<(&'a [u8], u32)> {
        let entry = self.data_directory(index)?;
        let bytes = self.rva(entry.virtual_address, entry.size as usize)?;
        Some((bytes, entry.size))
    }

    fn mapped_directory(&self, kind: DataDirectoryType) -> Option<(DataDirectory, &'a [u8])> {
        let (bytes, _) = self.directory(kind.as_index())?;
        let entry = self.data_directory(kind.as_index())?;
        Some((entry, bytes))
    }

    /// Decode the export directory.
    pub fn exports(&self) -> Result<Option<ExportTable>> {
        let Some((dir, _)) = self.mapped_directory(DataDirectoryType::Export) else {
            return Ok(None);
        };
        ExportTable::parse(dir.virtual_address, dir.size, self.rva_reader()).map(Some)
    }

    /// Decode the import descriptors.
    pub fn imports(&self) -> Option<ImportTable> {
        let (dir, _) = self.mapped_directory(DataDirectoryType::Import)?;
        Some(ImportTable::parse(
            dir.virtual_address,
            dir.size,
            self.is_64bit(),
            self.rva_reader(),
        ))
    }

    /// Decode the delay-load descriptors.
    pub fn delay_imports(&self) -> Option<DelayImportTable> {
        let (dir, _) = self.mapped_directory(DataDirectoryType::DelayImport)?;
        Some(DelayImportTable::parse(
            dir.virtual_address,
            dir.size,
            self.is_64bit(),
            self.image_base(),
            self.rva_reader(),
        ))
    }

    /// Decode the debug directory entries.
    pub fn debug_entries(&self) -> Option<Vec<DebugEntry<'a>>> {
        let (_, bytes) = self.mapped_directory(DataDirectoryType::Debug)?;
        Some(DebugEntry::parse_table(bytes, self.raw_reader()))
    }

    /// Decode the resource tree.
    pub fn resources(&self) -> Option<ResourceTree<'a>> {
        let (dir, _) = self.mapped_directory(DataDirectoryType::Resource)?;
        ResourceTree::parse(dir.virtual_address, self.rva_reader())
    }

    pub fn relocations(&self) -> Option<RelocationTable> {
        let (_, bytes) = self.mapped_directory(DataDirectoryType::BaseReloc)?;
        Some(RelocationTable::parse(bytes))
    }

    /// Decode the TLS directory and walk its callback array.
    pub fn tls(&self) -> Option<TlsInfo> {
        let (dir, _) = self.mapped_directory(DataDirectoryType::Tls)?;
        let bytes = self.rva(dir.virtual_address, TlsInfo::directory_size(self.is_64bit()))?;
        TlsInfo::parse(bytes, self.is_64bit(), self.image_base(), self.rva_reader())
    }

    pub fn clr(&self) -> Option<ClrHeader> {
        let (dir, _) = self.mapped_directory(DataDirectoryType::ClrRuntime)?;
        let bytes = self.rva(dir.virtual_address, ClrHeader::SIZE)?;
        ClrHeader::parse(bytes).ok()
    }

    /// Decode the x86-64 runtime function table.
    pub fn exceptions(&self) -> Option<ExceptionTable> {
        let (_, bytes) = self.mapped_directory(DataDirectoryType::Exception)?;
        Some(ExceptionTable::parse(bytes, self.rva_reader()))
    }
}
