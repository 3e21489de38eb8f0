//! Exception directory (.pdata) parsing for x64 images.
//!
//! The exception directory is an array of 12-byte runtime function entries.
//! Each entry points at UNWIND_INFO, or, with bit 0 of the unwind address
//! set, at another runtime function it chains to.

use crate::{Error, Result};

/// RUNTIME_FUNCTION entry for x64 (12 bytes).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RuntimeFunction {
    /// RVA of the start of the function.
    pub begin_address: u32,
    /// RVA of the end of the function.
    pub end_address: u32,
    /// RVA of the unwind information.
    pub unwind_info_address: u32,
}

impl RuntimeFunction {
    pub const SIZE: usize = 12;

    /// Parse from bytes.
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < Self::SIZE {
            return Err(Error::buffer_too_small(Self::SIZE, data.len()));
        }

        Ok(Self {
            begin_address: u32::from_le_bytes([data[0], data[1], data[2], data[3]]),
            end_address: u32::from_le_bytes([data[4], data[5], data[6], data[7]]),
            unwind_info_address: u32::from_le_bytes([data[8], data[9], data[10], data[11]]),
        })
    }

    /// Whether the unwind address names a chained runtime function.
    pub fn is_chained(&self) -> bool {
        self.unwind_info_address & 1 != 0
    }

    /// Get the function size in bytes.
    pub fn size(&self) -> u32 {
        self.end_address.saturating_sub(self.begin_address)
    }
}

const REGISTER_NAMES: [&str; 16] = [
    "rax", "rcx", "rdx", "rbx", "rsp", "rbp", "rsi", "rdi", "r8", "r9", "r10", "r11", "r12",
    "r13", "r14", "r15",
];

/// Name of an x64 integer register by its 4-bit number.
pub fn register_name(reg: u8) -> &'static str {
    REGISTER_NAMES[usize::from(reg & 0x0F)]
}

/// Unwind operation codes for x64.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum UnwindOpCode {
    /// Push a nonvolatile integer register.
    PushNonVol = 0,
    /// Allocate a large-sized area on the stack.
    AllocLarge = 1,
    /// Allocate a small-sized area on the stack.
    AllocSmall = 2,
    /// Establish the frame pointer register.
    SetFpReg = 3,
    /// Save a nonvolatile integer register on the stack using MOV.
    SaveNonVol = 4,
    /// Save a nonvolatile integer register on the stack with a far offset.
    SaveNonVolFar = 5,
    /// Save an XMM(128) register on the stack.
    SaveXmm128 = 8,
    /// Save an XMM(128) register on the stack with a far offset.
    SaveXmm128Far = 9,
    /// Push a machine frame.
    PushMachFrame = 10,
}

impl UnwindOpCode {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::PushNonVol),
            1 => Some(Self::AllocLarge),
            2 => Some(Self::AllocSmall),
            3 => Some(Self::SetFpReg),
            4 => Some(Self::SaveNonVol),
            5 => Some(Self::SaveNonVolFar),
            8 => Some(Self::SaveXmm128),
            9 => Some(Self::SaveXmm128Far),
            10 => Some(Self::PushMachFrame),
            _ => None,
        }
    }
}

/// A decoded unwind operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnwindOp {
    PushNonVol { reg: u8 },
    /// Stack allocation of `size` bytes (large or small form).
    Alloc { size: u32 },
    SetFpReg,
    SaveNonVol { reg: u8, offset: u32 },
    SaveXmm128 { reg: u8, offset: u32 },
    PushMachFrame { info: u8 },
    Unknown { code: u8 },
}

/// A single unwind code entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnwindCode {
    /// Offset in prolog where this operation occurs.
    pub code_offset: u8,
    pub op: UnwindOp,
}

/// Unwind flags.
pub const UNW_FLAG_EHANDLER: u8 = 1;
pub const UNW_FLAG_UHANDLER: u8 = 2;
pub const UNW_FLAG_CHAININFO: u8 = 4;

/// What follows the unwind codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnwindTrailer {
    /// CHAININFO: the runtime function this one continues.
    Chain(RuntimeFunction),
    Handler { handler: u32, data_rva: u32 },
    None,
    /// The trailer does not resolve.
    Unavailable,
}

/// UNWIND_INFO header and decoded codes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnwindInfo {
    pub version: u8,
    pub flags: u8,
    /// Size of the prolog in bytes.
    pub size_of_prolog: u8,
    /// Number of unwind code slots.
    pub count_of_codes: u8,
    /// Frame register (0 = no frame register).
    pub frame_register: u8,
    /// Frame register offset, in units of 16 bytes.
    pub frame_offset: u8,
    pub codes: Vec<UnwindCode>,
    /// An operand ran past the declared slot count.
    pub truncated: bool,
    pub trailer: UnwindTrailer,
}

impl UnwindInfo {
    /// version_flags + size_of_prolog + count_of_codes + frame_reg_and_offset.
    pub const HEADER_SIZE: usize = 4;

    /// Check if this has an exception handler.
    pub fn has_exception_handler(&self) -> bool {
        self.flags & (UNW_FLAG_EHANDLER | UNW_FLAG_UHANDLER) != 0
    }

    /// Check if this is chained to another unwind info.
    pub fn is_chained(&self) -> bool {
        self.flags & UNW_FLAG_CHAININFO != 0
    }

    /// Slot index of the trailer; the code array is padded to an even count.
    pub fn trailer_slot(count: u8) -> u32 {
        (u32::from(count) + 1) & !1
    }

    /// Decode unwind code slots. Returns the codes and whether an operand
    /// ran past the end of `slots`.
    pub fn decode_codes(slots: &[u8]) -> (Vec<UnwindCode>, bool) {
        let slot = |i: usize| slots.get(i * 2..i * 2 + 2);
        let operand16 = |i: usize| slot(i).map(|s| u32::from(u16::from_le_bytes([s[0], s[1]])));
        let operand32 = |i: usize| {
            let low = slot(i)?;
            let high = slot(i + 1)?;
            Some(u32::from_le_bytes([low[0], low[1], high[0], high[1]]))
        };

        let count = slots.len() / 2;
        let mut codes = Vec::with_capacity(count);
        let mut i = 0;
        while i < count {
            let (code_offset, byte) = (slots[i * 2], slots[i * 2 + 1]);
            let (code, info) = (byte & 0x0F, byte >> 4);

            let (op, extra) = match UnwindOpCode::from_u8(code) {
                Some(UnwindOpCode::PushNonVol) => (Some(UnwindOp::PushNonVol { reg: info }), 0),
                Some(UnwindOpCode::AllocLarge) if info != 0 => {
                    (operand32(i + 1).map(|size| UnwindOp::Alloc { size }), 2)
                }
                Some(UnwindOpCode::AllocLarge) => {
                    (operand16(i + 1).map(|s| UnwindOp::Alloc { size: s * 8 }), 1)
                }
                Some(UnwindOpCode::AllocSmall) => (
                    Some(UnwindOp::Alloc {
                        size: (u32::from(info) + 1) * 8,
                    }),
                    0,
                ),
                Some(UnwindOpCode::SetFpReg) => (Some(UnwindOp::SetFpReg), 0),
                Some(UnwindOpCode::SaveNonVol) => (
                    operand16(i + 1).map(|s| UnwindOp::SaveNonVol {
                        reg: info,
                        offset: s * 8,
                    }),
                    1,
                ),
                Some(UnwindOpCode::SaveNonVolFar) => (
                    operand32(i + 1).map(|offset| UnwindOp::SaveNonVol { reg: info, offset }),
                    2,
                ),
                Some(UnwindOpCode::SaveXmm128) => (
                    operand16(i + 1).map(|s| UnwindOp::SaveXmm128 {
                        reg: info,
                        offset: s * 16,
                    }),
                    1,
                ),
                Some(UnwindOpCode::SaveXmm128Far) => (
                    operand32(i + 1).map(|offset| UnwindOp::SaveXmm128 { reg: info, offset }),
                    2,
                ),
                Some(UnwindOpCode::PushMachFrame) => (Some(UnwindOp::PushMachFrame { info }), 0),
                None => (Some(UnwindOp::Unknown { code }), 0),
            };

            let Some(op) = op else {
                return (codes, true);
            };
            codes.push(UnwindCode { code_offset, op });
            i += 1 + extra;
        }
        (codes, false)
    }
}

/// How one runtime function's unwind data decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnwindDetail {
    /// Chained entry; the target if it resolves.
    Chained(Option<RuntimeFunction>),
    Info(UnwindInfo),
    UnknownVersion(u8),
    /// The unwind info does not resolve.
    Unavailable,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExceptionEntry {
    pub function: RuntimeFunction,
    pub detail: UnwindDetail,
}

/// The decoded exception directory.
#[derive(Debug, Clone, Default)]
pub struct ExceptionTable {
    pub entries: Vec<ExceptionEntry>,
}

impl ExceptionTable {
    /// Decode `data.len() / 12` runtime functions from the directory bytes.
    pub fn parse<'a, F>(data: &[u8], read_at_rva: F) -> Self
    where
        F: Fn(u32, usize) -> Option<&'a [u8]>,
    {
        let entries: Vec<_> = data
            .chunks_exact(RuntimeFunction::SIZE)
            .filter_map(|chunk| RuntimeFunction::parse(chunk).ok())
            .map(|function| ExceptionEntry {
                function,
                detail: Self::unwind(&function, &read_at_rva),
            })
            .collect();

        tracing::debug!(functions = entries.len(), "decoded exception directory");
        Self { entries }
    }

    fn unwind<'a, F>(function: &RuntimeFunction, read_at_rva: &F) -> UnwindDetail
    where
        F: Fn(u32, usize) -> Option<&'a [u8]>,
    {
        if function.is_chained() {
            let target = read_at_rva(function.unwind_info_address & !1, RuntimeFunction::SIZE)
                .and_then(|bytes| RuntimeFunction::parse(bytes).ok());
            return UnwindDetail::Chained(target);
        }

        let address = function.unwind_info_address;
        let Some(header) = read_at_rva(address, UnwindInfo::HEADER_SIZE) else {
            return UnwindDetail::Unavailable;
        };
        let version = header[0] & 0x07;
        if version != 1 {
            return UnwindDetail::UnknownVersion(version);
        }
        let flags = header[0] >> 3;
        let count = header[2];

        let slots_rva = address.wrapping_add(UnwindInfo::HEADER_SIZE as u32);
        let (codes, truncated) = match count {
            0 => (Vec::new(), false),
            n => match read_at_rva(slots_rva, usize::from(n) * 2) {
                Some(slots) => UnwindInfo::decode_codes(slots),
                None => return UnwindDetail::Unavailable,
            },
        };
        if truncated {
            tracing::warn!(
                rva = %format_args!("{address:#x}"),
                "unwind code operand runs past the code count"
            );
        }

        let trailer_rva = slots_rva.wrapping_add(UnwindInfo::trailer_slot(count) * 2);
        let trailer = if flags & UNW_FLAG_CHAININFO != 0 {
            read_at_rva(trailer_rva, RuntimeFunction::SIZE)
                .and_then(|bytes| RuntimeFunction::parse(bytes).ok())
                .map_or(UnwindTrailer::Unavailable, UnwindTrailer::Chain)
        } else if flags & (UNW_FLAG_EHANDLER | UNW_FLAG_UHANDLER) != 0 {
            read_at_rva(trailer_rva, 4).map_or(UnwindTrailer::Unavailable, |b| {
                UnwindTrailer::Handler {
                    handler: u32::from_le_bytes([b[0], b[1], b[2], b[3]]),
                    data_rva: trailer_rva.wrapping_add(4),
                }
            })
        } else {
            UnwindTrailer::None
        };

        UnwindDetail::Info(UnwindInfo {
            version,
            flags,
            size_of_prolog: header[1],
            count_of_codes: count,
            frame_register: header[3] & 0x0F,
            frame_offset: header[3] >> 4,
            codes,
            truncated,
            trailer,
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slots(raw: &[(u8, u8)]) -> Vec<u8> {
        raw.iter().flat_map(|&(a, b)| [a, b]).collect()
    }

    fn image() -> Vec<u8> {
        vec![0u8; 0x400]
    }

    fn put(data: &mut [u8], at: usize, bytes: &[u8]) {
        data[at..at + bytes.len()].copy_from_slice(bytes);
    }

    fn parse(dir: &[u8], data: &[u8]) -> ExceptionTable {
        ExceptionTable::parse(dir, |rva, len| {
            if rva == 0 {
                return None;
            }
            data.get(rva as usize..(rva as usize).checked_add(len)?)
        })
    }

    #[test]
    fn test_register_names() {
        assert_eq!(register_name(0), "rax");
        assert_eq!(register_name(5), "rbp");
        assert_eq!(register_name(15), "r15");
    }

    #[test]
    fn test_alloc_large_strides() {
        // ALLOC_LARGE info 0: one operand slot scaled by 8.
        let (codes, truncated) = UnwindInfo::decode_codes(&slots(&[(4, 0x01), (0x10, 0x00)]));
        assert!(!truncated);
        assert_eq!(codes, [UnwindCode { code_offset: 4, op: UnwindOp::Alloc { size: 0x80 } }]);

        // ALLOC_LARGE info 1: raw 32-bit operand over two slots.
        let (codes, _) = UnwindInfo::decode_codes(&slots(&[
            (8, 0x11),
            (0x00, 0x00),
            (0x01, 0x00),
            (2, 0x50),
        ]));
        assert_eq!(codes.len(), 2);
        assert_eq!(codes[0].op, UnwindOp::Alloc { size: 0x1_0000 });
        assert_eq!(codes[1].op, UnwindOp::PushNonVol { reg: 5 });
    }

    #[test]
    fn test_other_strides() {
        let (codes, truncated) = UnwindInfo::decode_codes(&slots(&[
            (0x20, 0x34),
            (0x02, 0x00),
            (0x18, 0x78),
            (0x03, 0x00),
            (0x10, 0x32),
            (0x0C, 0x03),
            (0x08, 0x0A),
            (0x04, 0x07),
        ]));
        assert!(!truncated);
        assert_eq!(
            codes.iter().map(|c| c.op).collect::<Vec<_>>(),
            [
                UnwindOp::SaveNonVol { reg: 3, offset: 0x10 },
                UnwindOp::SaveXmm128 { reg: 7, offset: 0x30 },
                UnwindOp::Alloc { size: 0x20 },
                UnwindOp::SetFpReg,
                UnwindOp::PushMachFrame { info: 0 },
                UnwindOp::Unknown { code: 7 },
            ]
        );
    }

    #[test]
    fn test_operand_past_count_truncates() {
        let (codes, truncated) =
            UnwindInfo::decode_codes(&slots(&[(2, 0x50), (4, 0x05), (0, 0)]));
        assert!(truncated);
        assert_eq!(codes.len(), 1);
    }

    #[test]
    fn test_chained_entry_is_not_decoded_as_unwind_info() {
        let mut data = image();
        put(&mut data, 0x200, &0x1000u32.to_le_bytes());
        put(&mut data, 0x204, &0x1080u32.to_le_bytes());
        let mut dir = Vec::new();
        dir.extend(0x1100u32.to_le_bytes());
        dir.extend(0x1140u32.to_le_bytes());
        dir.extend(0x201u32.to_le_bytes());

        let table = parse(&dir, &data);
        let expected = RuntimeFunction {
            begin_address: 0x1000,
            end_address: 0x1080,
            unwind_info_address: 0,
        };
        assert_eq!(table.entries[0].detail, UnwindDetail::Chained(Some(expected)));
    }

    #[test]
    fn test_unwind_info_with_handler() {
        let mut data = image();
        // version 1, flags EHANDLER, prolog 6, 1 code, frame rbp offset 2
        put(&mut data, 0x100, &[0x09, 0x06, 0x01, 0x25]);
        put(&mut data, 0x104, &[0x06, 0x50]);
        put(&mut data, 0x108, &0x3000u32.to_le_bytes());
        let mut dir = Vec::new();
        dir.extend(0x1000u32.to_le_bytes());
        dir.extend(0x1050u32.to_le_bytes());
        dir.extend(0x100u32.to_le_bytes());
        dir.extend([0u8; 4]);

        let table = parse(&dir, &data);
        assert_eq!(table.len(), 1);
        let UnwindDetail::Info(info) = &table.entries[0].detail else {
            panic!("expected unwind info");
        };
        assert_eq!(info.frame_register, 5);
        assert_eq!(info.frame_offset, 2);
        assert!(info.has_exception_handler());
        assert_eq!(
            info.trailer,
            UnwindTrailer::Handler {
                handler: 0x3000,
                data_rva: 0x10C
            }
        );
    }

    #[test]
    fn test_unknown_version() {
        let mut data = image();
        put(&mut data, 0x100, &[0x02, 0, 0, 0]);
        let mut dir = Vec::new();
        dir.extend(0x1000u32.to_le_bytes());
        dir.extend(0x1010u32.to_le_bytes());
        dir.extend(0x100u32.to_le_bytes());
        let table = parse(&dir, &data);
        assert_eq!(table.entries[0].detail, UnwindDetail::UnknownVersion(2));
    }
}
