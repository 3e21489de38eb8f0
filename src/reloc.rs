//! Base relocation table parsing.
//!
//! The table is a stream of blocks, one per 4KB page. Each block starts with
//! an 8-byte header (page RVA, block size) followed by 16-bit entries holding
//! a 4-bit type and a 12-bit page offset.

/// `IMAGE_REL_BASED_*` fixup kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelocationType {
    /// Padding that keeps blocks 32-bit aligned.
    Absolute,
    High,
    Low,
    HighLow,
    /// Takes a second slot holding the low half.
    HighAdj,
    MipsJmpAddr,
    Section,
    Rel,
    Ia64Imm64,
    Dir64,
    HighThreeAdj,
    /// Types 8 and 12 to 15.
    Unknown(u8),
}

const KNOWN_TYPES: [(u8, RelocationType, &str); 11] = [
    (0, RelocationType::Absolute, "BASED_ABSOLUTE"),
    (1, RelocationType::High, "BASED_HIGH"),
    (2, RelocationType::Low, "BASED_LOW"),
    (3, RelocationType::HighLow, "BASED_HIGHLOW"),
    (4, RelocationType::HighAdj, "BASED_HIGHADJ"),
    (5, RelocationType::MipsJmpAddr, "BASED_MIPS_JMPADDR"),
    (6, RelocationType::Section, "BASED_SECTION"),
    (7, RelocationType::Rel, "BASED_REL"),
    (9, RelocationType::Ia64Imm64, "BASED_IA64_IMM64"),
    (10, RelocationType::Dir64, "BASED_DIR64"),
    (11, RelocationType::HighThreeAdj, "BASED_HIGH3ADJ"),
];

impl RelocationType {
    /// Decode the 4-bit type field.
    pub fn from_u8(value: u8) -> Self {
        KNOWN_TYPES
            .iter()
            .find(|(raw, _, _)| *raw == value)
            .map_or(Self::Unknown(value), |&(_, ty, _)| ty)
    }

    pub fn name(self) -> std::borrow::Cow<'static, str> {
        if let Self::Unknown(n) = self {
            return format!("unknown {n}").into();
        }
        KNOWN_TYPES
            .iter()
            .find(|(_, ty, _)| *ty == self)
            .map_or("", |&(_, _, name)| name)
            .into()
    }
}

/// One 16-bit fixup slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelocationEntry {
    pub reloc_type: RelocationType,
    /// Offset into the block's page, 12 bits.
    pub offset: u16,
}

impl RelocationEntry {
    pub fn from_u16(value: u16) -> Self {
        Self {
            reloc_type: RelocationType::from_u8((value >> 12) as u8),
            offset: value & 0x0FFF,
        }
    }

    pub fn is_padding(&self) -> bool {
        self.reloc_type == RelocationType::Absolute
    }
}

/// IMAGE_BASE_RELOCATION with the entries that follow it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelocationBlock {
    pub page_rva: u32,
    /// Declared size, header included.
    pub block_size: u32,
    pub entries: Vec<RelocationEntry>,
}

impl RelocationBlock {
    pub const HEADER_SIZE: usize = 8;

    /// Address the entry patches.
    pub fn rva_for_entry(&self, entry: &RelocationEntry) -> u32 {
        self.page_rva.wrapping_add(u32::from(entry.offset))
    }
}

/// A block header whose size cannot hold its own header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MalformedBlock {
    /// Offset of the block from the start of the directory.
    pub offset: usize,
    pub block_size: u32,
}

/// Every block of the directory, in stream order.
#[derive(Debug, Clone, Default)]
pub struct RelocationTable {
    pub blocks: Vec<RelocationBlock>,
    /// Set when the stream ended on a block smaller than its header.
    pub malformed: Option<MalformedBlock>,
}

impl RelocationTable {
    /// Parse the relocation stream held in `data`, the directory bytes.
    ///
    /// The stream ends when fewer than eight bytes remain or a block
    /// declares a size of zero. Entries past the end of `data` are dropped.
    pub fn parse(data: &[u8]) -> Self {
        let mut blocks = Vec::new();
        let mut malformed = None;
        let mut offset = 0usize;

        while let Some(header) = data.get(offset..offset + RelocationBlock::HEADER_SIZE) {
            let page_rva = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
            let block_size = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);

            if block_size == 0 {
                break;
            }
            if (block_size as usize) < RelocationBlock::HEADER_SIZE {
                tracing::warn!(offset, block_size, "relocation block smaller than its header");
                malformed = Some(MalformedBlock { offset, block_size });
                break;
            }

            let body_start = offset + RelocationBlock::HEADER_SIZE;
            let body_end = offset.saturating_add(block_size as usize).min(data.len());
            let entries = data[body_start..body_end]
                .chunks_exact(2)
                .map(|pair| RelocationEntry::from_u16(u16::from_le_bytes([pair[0], pair[1]])))
                .collect();

            blocks.push(RelocationBlock {
                page_rva,
                block_size,
                entries,
            });
            offset = offset.saturating_add(block_size as usize);
        }

        tracing::debug!(blocks = blocks.len(), "decoded base relocations");
        Self { blocks, malformed }
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Fixups that are not padding.
    pub fn relocation_count(&self) -> usize {
        self.blocks
            .iter()
            .flat_map(|b| &b.entries)
            .filter(|e| !e.is_padding())
            .count()
    }
}
