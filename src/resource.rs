//! Resource directory parsing.
//!
//! The resource directory is a three-level tree: type, then name, then
//! language. Every offset inside the tree is relative to the root of the
//! resource directory; only the leaf data entries hold real RVAs.

use crate::text;
use crate::{Error, Result};

/// High bit of a directory entry field: named entry, or subdirectory.
const HIGH_BIT: u32 = 0x8000_0000;

fn le16(data: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([data[at], data[at + 1]])
}

fn le32(data: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([data[at], data[at + 1], data[at + 2], data[at + 3]])
}

fn sized(data: &[u8], size: usize) -> Result<&[u8]> {
    data.get(..size)
        .ok_or_else(|| Error::buffer_too_small(size, data.len()))
}

/// Predefined resource type ids (`RT_*`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum ResourceType {
    Cursor = 1,
    Bitmap = 2,
    Icon = 3,
    Menu = 4,
    Dialog = 5,
    String = 6,
    FontDir = 7,
    Font = 8,
    Accelerator = 9,
    RcData = 10,
    MessageTable = 11,
    GroupCursor = 12,
    GroupIcon = 14,
    Version = 16,
    DlgInclude = 17,
    PlugPlay = 19,
    Vxd = 20,
    AniCursor = 21,
    AniIcon = 22,
    Html = 23,
    Manifest = 24,
}

const RESOURCE_TYPES: [(ResourceType, &str); 21] = [
    (ResourceType::Cursor, "CURSOR"),
    (ResourceType::Bitmap, "BITMAP"),
    (ResourceType::Icon, "ICON"),
    (ResourceType::Menu, "MENU"),
    (ResourceType::Dialog, "DIALOG"),
    (ResourceType::String, "STRING"),
    (ResourceType::FontDir, "FONTDIR"),
    (ResourceType::Font, "FONT"),
    (ResourceType::Accelerator, "ACCELERATOR"),
    (ResourceType::RcData, "RCDATA"),
    (ResourceType::MessageTable, "MESSAGETABLE"),
    (ResourceType::GroupCursor, "GROUP_CURSOR"),
    (ResourceType::GroupIcon, "GROUP_ICON"),
    (ResourceType::Version, "VERSION"),
    (ResourceType::DlgInclude, "DLGINCLUDE"),
    (ResourceType::PlugPlay, "PLUGPLAY"),
    (ResourceType::Vxd, "VXD"),
    (ResourceType::AniCursor, "ANICURSOR"),
    (ResourceType::AniIcon, "ANIICON"),
    (ResourceType::Html, "HTML"),
    (ResourceType::Manifest, "MANIFEST"),
];

impl ResourceType {
    pub fn from_u16(value: u16) -> Option<Self> {
        RESOURCE_TYPES
            .iter()
            .find(|(rt, _)| *rt as u16 == value)
            .map(|&(rt, _)| rt)
    }

    pub fn name(self) -> &'static str {
        RESOURCE_TYPES
            .iter()
            .find(|(rt, _)| *rt == self)
            .map_or("", |&(_, name)| name)
    }
}

/// A directory entry's identifier: numeric, or a counted UTF-16 string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceId {
    Id(u16),
    /// Kept as code units for escaping.
    Name(Vec<u16>),
}

impl ResourceId {
    pub fn as_resource_type(&self) -> Option<ResourceType> {
        match *self {
            Self::Id(id) => ResourceType::from_u16(id),
            Self::Name(_) => None,
        }
    }

    /// Report form of a type identifier: a `L"..."` literal, the type
    /// name, or four hex digits.
    pub fn type_label(&self) -> String {
        match self {
            Self::Name(units) => text::unicode_literal(units),
            Self::Id(id) => self
                .as_resource_type()
                .map_or_else(|| format!("{id:04x}"), |rt| rt.name().to_string()),
        }
    }

    /// Report form of a name identifier.
    pub fn name_label(&self) -> String {
        match self {
            Self::Name(units) => text::unicode_literal(units),
            Self::Id(id) => format!("{id:04x}"),
        }
    }
}

/// IMAGE_RESOURCE_DIRECTORY
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ResourceDirectoryHeader {
    pub characteristics: u32,
    pub time_date_stamp: u32,
    pub major_version: u16,
    pub minor_version: u16,
    pub number_of_named_entries: u16,
    pub number_of_id_entries: u16,
}

impl ResourceDirectoryHeader {
    pub const SIZE: usize = 16;

    pub fn parse(data: &[u8]) -> Result<Self> {
        let d = sized(data, Self::SIZE)?;
        Ok(Self {
            characteristics: le32(d, 0),
            time_date_stamp: le32(d, 4),
            major_version: le16(d, 8),
            minor_version: le16(d, 10),
            number_of_named_entries: le16(d, 12),
            number_of_id_entries: le16(d, 14),
        })
    }

    /// Named entries come first, then id entries.
    pub fn total_entries(&self) -> usize {
        usize::from(self.number_of_named_entries) + usize::from(self.number_of_id_entries)
    }
}

/// IMAGE_RESOURCE_DIRECTORY_ENTRY
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ResourceDirectoryEntry {
    pub name_or_id: u32,
    pub offset_to_data: u32,
}

impl ResourceDirectoryEntry {
    pub const SIZE: usize = 8;

    pub fn parse(data: &[u8]) -> Result<Self> {
        let d = sized(data, Self::SIZE)?;
        Ok(Self {
            name_or_id: le32(d, 0),
            offset_to_data: le32(d, 4),
        })
    }

    pub fn is_named(&self) -> bool {
        self.name_or_id & HIGH_BIT != 0
    }

    /// Root-relative offset of the counted name string.
    pub fn name_offset(&self) -> u32 {
        self.name_or_id & !HIGH_BIT
    }

    pub fn id(&self) -> u16 {
        self.name_or_id as u16
    }

    pub fn is_directory(&self) -> bool {
        self.offset_to_data & HIGH_BIT != 0
    }

    /// Root-relative offset of the subdirectory or data entry.
    pub fn data_offset(&self) -> u32 {
        self.offset_to_data & !HIGH_BIT
    }
}

/// IMAGE_RESOURCE_DATA_ENTRY: the only place in the tree holding an RVA.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ResourceDataEntry {
    pub offset_to_data: u32,
    pub size: u32,
    pub code_page: u32,
    pub reserved: u32,
}

impl ResourceDataEntry {
    pub const SIZE: usize = 16;

    pub fn parse(data: &[u8]) -> Result<Self> {
        let d = sized(data, Self::SIZE)?;
        Ok(Self {
            offset_to_data: le32(d, 0),
            size: le32(d, 4),
            code_page: le32(d, 8),
            reserved: le32(d, 12),
        })
    }
}

/// One string of a STRING resource block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableString {
    /// String id, `(block - 1) * 16 + index`.
    pub id: u32,
    pub text: Vec<u16>,
}

/// Text of a message table entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageText {
    Ansi(Vec<u8>),
    Unicode(Vec<u16>),
}

/// One message table entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: u32,
    pub text: MessageText,
}

/// Decoded resource data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourcePayload<'a> {
    StringTable(Vec<TableString>),
    MessageTable(Vec<Message>),
    Bytes(&'a [u8]),
    /// The data RVA does not resolve.
    Unavailable,
}

/// One leaf of the tree, with the path that leads to it.
#[derive(Debug, Clone)]
pub struct Resource<'a> {
    pub resource_type: ResourceId,
    pub name: ResourceId,
    pub language: u16,
    pub data: ResourceDataEntry,
    pub payload: ResourcePayload<'a>,
}

impl Resource<'_> {
    pub fn is_type(&self, rt: ResourceType) -> bool {
        self.resource_type.as_resource_type() == Some(rt)
    }
}

/// Decode the 16 length-prefixed strings of a STRING block.
///
/// A length running past the block is clamped to what remains.
pub fn decode_string_table(bytes: &[u8], block_id: u16) -> Vec<TableString> {
    let units = text::utf16_units(bytes);
    let base = u32::from(block_id).wrapping_sub(1).wrapping_mul(16);
    let mut strings = Vec::new();
    let mut pos = 0usize;

    for index in 0..16u32 {
        let Some(&len) = units.get(pos) else {
            break;
        };
        pos += 1;
        let len = usize::from(len).min(units.len() - pos);
        if len > 0 {
            strings.push(TableString {
                id: base.wrapping_add(index),
                text: units[pos..pos + len].to_vec(),
            });
        }
        pos += len;
    }
    strings
}

/// Decode a MESSAGETABLE resource. Walking a block stops at the first
/// entry that is unreadable or has a zero length.
pub fn decode_message_table(bytes: &[u8]) -> Vec<Message> {
    let read_u16 = |at: usize| bytes.get(at..at + 2).map(|b| u16::from_le_bytes([b[0], b[1]]));
    let read_u32 = |at: usize| {
        bytes
            .get(at..at + 4)
            .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    };

    let mut messages = Vec::new();
    let Some(blocks) = read_u32(0) else {
        return messages;
    };

    for block in 0..blocks as usize {
        let at = 4 + block * 12;
        let (Some(low), Some(high), Some(entries)) = (read_u32(at), read_u32(at + 4), read_u32(at + 8))
        else {
            break;
        };

        let mut offset = entries as usize;
        for id in low..=high {
            let (Some(length), Some(flags)) = (read_u16(offset), read_u16(offset + 2)) else {
                break;
            };
            if length == 0 {
                break;
            }
            let end = offset.saturating_add(usize::from(length)).min(bytes.len());
            let body = bytes.get(offset + 4..end).unwrap_or(&[]);
            let text = if flags & 1 != 0 {
                MessageText::Unicode(
                    text::utf16_units(body)
                        .into_iter()
                        .take_while(|&u| u != 0)
                        .collect(),
                )
            } else {
                MessageText::Ansi(body.iter().copied().take_while(|&b| b != 0).collect())
            };
            messages.push(Message { id, text });
            offset += usize::from(length);
        }
    }
    messages
}

/// Parsed resource directory.
#[derive(Debug, Clone, Default)]
pub struct ResourceTree<'a> {
    /// All resource leaves, in tree order.
    pub resources: Vec<Resource<'a>>,
}

impl<'a> ResourceTree<'a> {
    /// Walk the tree rooted at `rsrc_rva`. Returns `None` when the root
    /// directory cannot be read; unreadable subdirectories are skipped.
    pub fn parse<F>(rsrc_rva: u32, read_at_rva: F) -> Option<Self>
    where
        F: Fn(u32, usize) -> Option<&'a [u8]>,
    {
        let walker = Walker {
            root: rsrc_rva,
            read: &read_at_rva,
        };
        let types = walker.entries(0)?;
        let mut resources = Vec::new();

        for type_entry in types {
            if !type_entry.is_directory() {
                continue;
            }
            let type_id = walker.resource_id(&type_entry);
            let Some(names) = walker.entries(type_entry.data_offset()) else {
                continue;
            };

            for name_entry in names {
                if !name_entry.is_directory() {
                    continue;
                }
                let name_id = walker.resource_id(&name_entry);
                let Some(languages) = walker.entries(name_entry.data_offset()) else {
                    continue;
                };

                for lang_entry in languages {
                    // Language level holds leaves only.
                    if lang_entry.is_directory() {
                        continue;
                    }
                    let Some(data) = walker
                        .at(lang_entry.data_offset(), ResourceDataEntry::SIZE)
                        .and_then(|bytes| ResourceDataEntry::parse(bytes).ok())
                    else {
                        tracing::warn!(
                            offset = %format_args!("{:#x}", lang_entry.data_offset()),
                            "resource data entry does not resolve"
                        );
                        continue;
                    };

                    let payload = Self::payload(&type_id, &name_id, &data, &read_at_rva);
                    resources.push(Resource {
                        resource_type: type_id.clone(),
                        name: name_id.clone(),
                        language: lang_entry.id(),
                        data,
                        payload,
                    });
                }
            }
        }

        tracing::debug!(resources = resources.len(), "decoded resource tree");
        Some(Self { resources })
    }

    fn payload<F>(
        type_id: &ResourceId,
        name_id: &ResourceId,
        data: &ResourceDataEntry,
        read_at_rva: &F,
    ) -> ResourcePayload<'a>
    where
        F: Fn(u32, usize) -> Option<&'a [u8]>,
    {
        let Some(bytes) = read_at_rva(data.offset_to_data, data.size as usize) else {
            return ResourcePayload::Unavailable;
        };
        match (type_id.as_resource_type(), name_id) {
            (Some(ResourceType::String), ResourceId::Id(block)) => {
                ResourcePayload::StringTable(decode_string_table(bytes, *block))
            }
            (Some(ResourceType::MessageTable), _) => {
                ResourcePayload::MessageTable(decode_message_table(bytes))
            }
            _ => ResourcePayload::Bytes(bytes),
        }
    }

    /// Check if the resource tree is empty.
    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn find_by_type(&self, rt: ResourceType) -> Vec<&Resource<'a>> {
        self.resources.iter().filter(|r| r.is_type(rt)).collect()
    }
}

/// Reads tree structures at offsets relative to the resource root.
struct Walker<'r, F> {
    root: u32,
    read: &'r F,
}

impl<'a, F> Walker<'_, F>
where
    F: Fn(u32, usize) -> Option<&'a [u8]>,
{
    fn at(&self, offset: u32, len: usize) -> Option<&'a [u8]> {
        (self.read)(self.root.checked_add(offset)?, len)
    }

    /// Entries of the directory at `offset`.
    fn entries(&self, offset: u32) -> Option<Vec<ResourceDirectoryEntry>> {
        let header = self
            .at(offset, ResourceDirectoryHeader::SIZE)
            .and_then(|bytes| ResourceDirectoryHeader::parse(bytes).ok());
        let Some(header) = header else {
            tracing::warn!(
                offset = %format_args!("{offset:#x}"),
                "resource directory does not resolve"
            );
            return None;
        };

        let first = offset.checked_add(ResourceDirectoryHeader::SIZE as u32)?;
        let entries = (0..header.total_entries() as u32)
            .map_while(|i| {
                let at = first.checked_add(i * ResourceDirectoryEntry::SIZE as u32)?;
                self.at(at, ResourceDirectoryEntry::SIZE)
                    .and_then(|bytes| ResourceDirectoryEntry::parse(bytes).ok())
            })
            .collect();
        Some(entries)
    }

    fn resource_id(&self, entry: &ResourceDirectoryEntry) -> ResourceId {
        if !entry.is_named() {
            return ResourceId::Id(entry.id());
        }
        // Counted UTF-16 string.
        let offset = entry.name_offset();
        let units = self
            .at(offset, 2)
            .map(|len| usize::from(u16::from_le_bytes([len[0], len[1]])))
            .and_then(|len| self.at(offset.checked_add(2)?, len * 2))
            .map(text::utf16_units)
            .unwrap_or_default();
        ResourceId::Name(units)
    }
}
