//! TLS (Thread Local Storage) directory parsing.
//!
//! The TLS directory contains information about thread-local storage,
//! including callbacks that are executed before the entry point. Both the
//! 32-bit and 64-bit layouts are widened into one [`TlsDirectory`].

use crate::{Error, Result};

/// IMAGE_TLS_DIRECTORY widened to 64-bit fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TlsDirectory {
    /// Starting address of the TLS template (VA).
    pub start_address_of_raw_data: u64,
    /// Ending address of the TLS template (VA).
    pub end_address_of_raw_data: u64,
    /// Address of the TLS index (VA).
    pub address_of_index: u64,
    /// Address of TLS callback array (VA).
    pub address_of_callbacks: u64,
    /// Size of zero-filled area.
    pub size_of_zero_fill: u32,
    /// Characteristics (reserved, typically 0).
    pub characteristics: u32,
}

impl TlsDirectory {
    pub const SIZE_32: usize = 24;
    pub const SIZE_64: usize = 40;

    pub fn parse32(data: &[u8]) -> Result<Self> {
        if data.len() < Self::SIZE_32 {
            return Err(Error::buffer_too_small(Self::SIZE_32, data.len()));
        }

        let read_u32 = |at: usize| u32::from_le_bytes([data[at], data[at + 1], data[at + 2], data[at + 3]]);
        Ok(Self {
            start_address_of_raw_data: u64::from(read_u32(0)),
            end_address_of_raw_data: u64::from(read_u32(4)),
            address_of_index: u64::from(read_u32(8)),
            address_of_callbacks: u64::from(read_u32(12)),
            size_of_zero_fill: read_u32(16),
            characteristics: read_u32(20),
        })
    }

    pub fn parse64(data: &[u8]) -> Result<Self> {
        if data.len() < Self::SIZE_64 {
            return Err(Error::buffer_too_small(Self::SIZE_64, data.len()));
        }

        let read_u64 = |at: usize| {
            u64::from_le_bytes([
                data[at],
                data[at + 1],
                data[at + 2],
                data[at + 3],
                data[at + 4],
                data[at + 5],
                data[at + 6],
                data[at + 7],
            ])
        };
        Ok(Self {
            start_address_of_raw_data: read_u64(0),
            end_address_of_raw_data: read_u64(8),
            address_of_index: read_u64(16),
            address_of_callbacks: read_u64(24),
            size_of_zero_fill: u32::from_le_bytes([data[32], data[33], data[34], data[35]]),
            characteristics: u32::from_le_bytes([data[36], data[37], data[38], data[39]]),
        })
    }

    /// Parse from bytes, selecting 32 or 64-bit based on flag.
    pub fn parse(data: &[u8], is_64bit: bool) -> Result<Self> {
        if is_64bit {
            Self::parse64(data)
        } else {
            Self::parse32(data)
        }
    }

    /// Size of the raw data template.
    pub fn raw_data_size(&self) -> u64 {
        self.end_address_of_raw_data
            .wrapping_sub(self.start_address_of_raw_data)
    }
}

/// TLS directory with its callback list.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TlsInfo {
    pub directory: TlsDirectory,
    /// Callback VAs in array order, without the terminating zero.
    pub callbacks: Vec<u64>,
}

impl TlsInfo {
    /// Size of the on-disk directory.
    pub fn directory_size(is_64bit: bool) -> usize {
        if is_64bit {
            TlsDirectory::SIZE_64
        } else {
            TlsDirectory::SIZE_32
        }
    }

    /// Decode the directory and walk its callback array.
    ///
    /// Callback slots are pointer sized. The walk stops at a zero slot or at
    /// the first slot that does not resolve.
    pub fn parse<'a, F>(data: &[u8], is_64bit: bool, image_base: u64, read_at_rva: F) -> Option<Self>
    where
        F: Fn(u32, usize) -> Option<&'a [u8]>,
    {
        let directory = TlsDirectory::parse(data, is_64bit).ok()?;
        let mut callbacks = Vec::new();

        let array_rva = directory
            .address_of_callbacks
            .checked_sub(image_base)
            .and_then(|rva| u32::try_from(rva).ok())
            .filter(|_| directory.address_of_callbacks != 0);

        if let Some(array_rva) = array_rva {
            let width = if is_64bit { 8 } else { 4 };
            for index in 0u32.. {
                let slot = index
                    .checked_mul(width as u32)
                    .and_then(|off| array_rva.checked_add(off))
                    .and_then(|rva| read_at_rva(rva, width));
                let Some(bytes) = slot else {
                    break;
                };
                let value = if is_64bit {
                    u64::from_le_bytes([
                        bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
                    ])
                } else {
                    u64::from(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
                };
                if value == 0 {
                    break;
                }
                callbacks.push(value);
            }
        }

        tracing::debug!(callbacks = callbacks.len(), "decoded TLS directory");
        Some(Self {
            directory,
            callbacks,
        })
    }
}
