//! Synthetic image builder shared by the integration tests.

#![allow(dead_code)]

pub const FILE_ALIGNMENT: u32 = 0x200;
pub const SECTION_ALIGNMENT: u32 = 0x1000;

pub const MACHINE_I386: u16 = 0x014c;
pub const MACHINE_AMD64: u16 = 0x8664;

pub const DIR_EXPORT: usize = 0;
pub const DIR_IMPORT: usize = 1;
pub const DIR_EXCEPTION: usize = 3;
pub const DIR_BASERELOC: usize = 5;

pub fn put(data: &mut [u8], at: usize, bytes: &[u8]) {
    data[at..at + bytes.len()].copy_from_slice(bytes);
}

pub fn put_u16(data: &mut [u8], at: usize, value: u16) {
    put(data, at, &value.to_le_bytes());
}

pub fn put_u32(data: &mut [u8], at: usize, value: u32) {
    put(data, at, &value.to_le_bytes());
}

pub fn put_u64(data: &mut [u8], at: usize, value: u64) {
    put(data, at, &value.to_le_bytes());
}

struct FixtureSection {
    name: [u8; 8],
    virtual_address: u32,
    data: Vec<u8>,
    characteristics: u32,
}

/// Lays out a PE32 or PE32+ image: headers in the first file-aligned
/// block, then each section's raw data in insertion order.
pub struct ImageBuilder {
    machine: u16,
    is_64bit: bool,
    sections: Vec<FixtureSection>,
    directories: [(u32, u32); 16],
}

impl ImageBuilder {
    pub fn pe32() -> Self {
        Self {
            machine: MACHINE_I386,
            is_64bit: false,
            sections: Vec::new(),
            directories: [(0, 0); 16],
        }
    }

    pub fn pe32_plus() -> Self {
        Self {
            machine: MACHINE_AMD64,
            is_64bit: true,
            ..Self::pe32()
        }
    }

    pub fn section(mut self, name: &str, virtual_address: u32, data: Vec<u8>, characteristics: u32) -> Self {
        let mut raw = [0u8; 8];
        raw[..name.len()].copy_from_slice(name.as_bytes());
        self.sections.push(FixtureSection {
            name: raw,
            virtual_address,
            data,
            characteristics,
        });
        self
    }

    pub fn directory(mut self, index: usize, rva: u32, size: u32) -> Self {
        self.directories[index] = (rva, size);
        self
    }

    fn optional_header_size(&self) -> usize {
        if self.is_64bit {
            0xF0
        } else {
            0xE0
        }
    }

    pub fn build(&self) -> Vec<u8> {
        let nt = 0x40usize;
        let coff = nt + 4;
        let opt = coff + 20;
        let table = opt + self.optional_header_size();
        let headers_end = table + self.sections.len() * 40;
        let size_of_headers = align(headers_end as u32, FILE_ALIGNMENT);

        let mut raw_offsets = Vec::new();
        let mut cursor = size_of_headers;
        for s in &self.sections {
            raw_offsets.push(cursor);
            cursor += align(s.data.len() as u32, FILE_ALIGNMENT);
        }
        let mut image = vec![0u8; cursor as usize];

        put(&mut image, 0, b"MZ");
        put_u32(&mut image, 60, nt as u32);
        put(&mut image, nt, b"PE\0\0");

        put_u16(&mut image, coff, self.machine);
        put_u16(&mut image, coff + 2, self.sections.len() as u16);
        put_u16(&mut image, coff + 16, self.optional_header_size() as u16);
        put_u16(&mut image, coff + 18, if self.is_64bit { 0x0022 } else { 0x0102 });

        let size_of_image = self
            .sections
            .iter()
            .map(|s| s.virtual_address + align(s.data.len() as u32, SECTION_ALIGNMENT))
            .max()
            .unwrap_or(SECTION_ALIGNMENT);

        put_u32(&mut image, opt + 32, SECTION_ALIGNMENT);
        put_u32(&mut image, opt + 36, FILE_ALIGNMENT);
        put_u16(&mut image, opt + 40, 6);
        put_u16(&mut image, opt + 48, 6);
        put_u32(&mut image, opt + 56, size_of_image);
        put_u32(&mut image, opt + 60, size_of_headers);
        put_u16(&mut image, opt + 68, 3);
        let dirs = if self.is_64bit {
            put_u16(&mut image, opt, 0x20b);
            put_u64(&mut image, opt + 24, 0x1_8000_0000);
            put_u32(&mut image, opt + 108, 16);
            opt + 112
        } else {
            put_u16(&mut image, opt, 0x10b);
            put_u32(&mut image, opt + 28, 0x40_0000);
            put_u32(&mut image, opt + 92, 16);
            opt + 96
        };
        for (i, &(rva, size)) in self.directories.iter().enumerate() {
            put_u32(&mut image, dirs + i * 8, rva);
            put_u32(&mut image, dirs + i * 8 + 4, size);
        }

        for (i, (s, &raw)) in self.sections.iter().zip(&raw_offsets).enumerate() {
            let at = table + i * 40;
            put(&mut image, at, &s.name);
            put_u32(&mut image, at + 8, s.data.len() as u32);
            put_u32(&mut image, at + 12, s.virtual_address);
            put_u32(&mut image, at + 16, align(s.data.len() as u32, FILE_ALIGNMENT));
            put_u32(&mut image, at + 20, raw);
            put_u32(&mut image, at + 36, s.characteristics);
            put(&mut image, raw as usize, &s.data);
        }
        image
    }
}

pub fn align(value: u32, to: u32) -> u32 {
    value.div_ceil(to) * to
}

/// Export directory, address/name/ordinal tables and strings laid out in
/// one blob that starts at `base_rva`.
///
/// `functions` holds the address table; `names` pairs an index into it with
/// a name. Returns the blob and the directory size.
pub fn export_blob(base_rva: u32, dll: &str, ordinal_base: u32, functions: &[u32], names: &[(u16, &str)]) -> (Vec<u8>, u32) {
    let mut blob = vec![0u8; 40];
    let functions_at = blob.len();
    blob.resize(functions_at + functions.len() * 4, 0);
    for (i, &f) in functions.iter().enumerate() {
        put_u32(&mut blob, functions_at + i * 4, f);
    }
    let names_at = blob.len();
    blob.resize(names_at + names.len() * 4, 0);
    let ordinals_at = blob.len();
    blob.resize(ordinals_at + names.len() * 2, 0);

    let dll_at = blob.len();
    blob.extend_from_slice(dll.as_bytes());
    blob.push(0);
    for (i, &(index, name)) in names.iter().enumerate() {
        let at = blob.len();
        blob.extend_from_slice(name.as_bytes());
        blob.push(0);
        put_u32(&mut blob, names_at + i * 4, base_rva + at as u32);
        put_u16(&mut blob, ordinals_at + i * 2, index);
    }

    put_u32(&mut blob, 12, base_rva + dll_at as u32);
    put_u32(&mut blob, 16, ordinal_base);
    put_u32(&mut blob, 20, functions.len() as u32);
    put_u32(&mut blob, 24, names.len() as u32);
    put_u32(&mut blob, 28, base_rva + functions_at as u32);
    put_u32(&mut blob, 32, base_rva + names_at as u32);
    put_u32(&mut blob, 36, base_rva + ordinals_at as u32);
    let size = blob.len() as u32;
    (blob, size)
}
