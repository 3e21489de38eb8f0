//! Error types for image decoding and report output.

use std::io;

/// Result type alias for pedissect operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while decoding an image or writing a report.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// I/O error on the input file or the report sink.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Invalid DOS signature (expected "MZ").
    #[error("Invalid DOS signature (expected 'MZ')")]
    InvalidDosSignature,

    /// Invalid PE signature (expected "PE\0\0").
    #[error("Invalid PE signature (expected 'PE\\0\\0')")]
    InvalidPeSignature,

    /// Invalid split debug signature (expected "DI").
    #[error("Invalid debug file signature (expected 'DI')")]
    InvalidDbgSignature,

    /// Buffer too small to contain the expected structure.
    #[error("Buffer too small: expected {expected} bytes, got {actual}")]
    BufferTooSmall { expected: usize, actual: usize },

    /// File offset outside of the image.
    #[error("Offset {offset:#x} out of bounds (size: {size})")]
    OffsetOutOfBounds { offset: u64, size: u64 },

    /// RVA that no section maps.
    #[error("Invalid RVA: {0:#x}")]
    InvalidRva(u32),

    /// A table required by the decoder could not be read.
    #[error("Can't grab functions' {0} table")]
    MissingTable(&'static str),

    /// Allocation of a decoder table failed.
    #[error("Out of memory")]
    OutOfMemory,
}

impl Error {
    pub(crate) fn buffer_too_small(expected: usize, actual: usize) -> Self {
        Error::BufferTooSmall { expected, actual }
    }

    pub(crate) fn invalid_rva(rva: u32) -> Self {
        Error::InvalidRva(rva)
    }

    /// Allocation failure and I/O errors on the output abort a whole dump;
    /// everything else is reported inline and the next directory is decoded.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::OutOfMemory | Error::Io(_))
    }
}

impl From<std::collections::TryReserveError> for Error {
    fn from(_: std::collections::TryReserveError) -> Self {
        Error::OutOfMemory
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_table_message() {
        let err = Error::MissingTable("ordinal");
        assert_eq!(err.to_string(), "Can't grab functions' ordinal table");
    }

    #[test]
    fn test_fatal_classification() {
        assert!(Error::OutOfMemory.is_fatal());
        assert!(Error::Io(io::Error::new(io::ErrorKind::BrokenPipe, "closed")).is_fatal());
        assert!(!Error::InvalidRva(0x1000).is_fatal());
        assert!(!Error::buffer_too_small(8, 2).is_fatal());
    }

    #[test]
    fn test_try_reserve_maps_to_oom() {
        let mut v: Vec<u64> = Vec::new();
        let err: Error = v.try_reserve(usize::MAX).unwrap_err().into();
        assert!(matches!(err, Error::OutOfMemory));
    }
}
