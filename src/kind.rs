//! File signature detection.

use crate::dbg::DBG_SIGNATURE;
use crate::dos::{DosHeader, DOS_SIGNATURE};
use crate::reader::Reader;

/// "NE" (OS/2 and Win16 executables).
pub const NE_SIGNATURE: u16 = 0x454E;
/// "LE" (VxD drivers).
pub const LE_SIGNATURE: u16 = 0x454C;

/// What kind of file an image holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    /// Split debug file.
    Dbg,
    Pe,
    Ne,
    Le,
    /// Plain DOS executable.
    Dos,
    Unknown,
}

impl FileKind {
    /// Classify an image by its leading signature and, for MZ files, the
    /// signature at `e_lfanew`. Images whose signatures cannot be read are
    /// `Unknown`.
    pub fn detect<R: Reader + ?Sized>(reader: &R) -> Self {
        match reader.read_u16(0) {
            Some(DBG_SIGNATURE) => Self::Dbg,
            Some(DOS_SIGNATURE) => Self::detect_mz(reader),
            _ => Self::Unknown,
        }
    }

    fn detect_mz<R: Reader + ?Sized>(reader: &R) -> Self {
        let Some(nt_offset) = DosHeader::read_from(reader, 0)
            .ok()
            .and_then(|dos| dos.nt_offset())
        else {
            return Self::Unknown;
        };
        let Some(signature) = reader.read_u32(nt_offset) else {
            return Self::Unknown;
        };

        if signature == crate::coff::PE_SIGNATURE {
            return Self::Pe;
        }
        match signature as u16 {
            NE_SIGNATURE => Self::Ne,
            LE_SIGNATURE => Self::Le,
            _ => Self::Dos,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Dbg => "DBG",
            Self::Pe => "PE",
            Self::Ne => "NE",
            Self::Le => "LE",
            Self::Dos => "DOS",
            Self::Unknown => "unknown",
        }
    }
}
