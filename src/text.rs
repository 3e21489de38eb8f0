//! String, timestamp and hex dump helpers shared by the decoders and the
//! report writer.

use crate::reader::Reader;
use chrono::{TimeZone, Utc};
use std::fmt::Write as _;
use std::io::{self, Write};

/// Longest C string the decoders will follow.
pub const MAX_CSTR: usize = 4096;

/// C escape letters for control characters; `.` means "use octal".
const ESCAPES: &[u8; 32] = b".......abtnvfr.............e....";

/// Read a NUL-terminated string at a file offset. The terminator is not
/// included; a string that runs into the end of the image is cut there.
pub fn read_cstr_at<R: Reader + ?Sized>(reader: &R, offset: u64) -> Option<&[u8]> {
    let available = reader.size().checked_sub(offset)?;
    let len = usize::try_from(available).unwrap_or(usize::MAX).min(MAX_CSTR);
    if len == 0 {
        return None;
    }
    let bytes = reader.read(offset, len)?;
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    Some(&bytes[..end])
}

/// Read a NUL-terminated string at an RVA through `read`, one byte at a
/// time so the string never has to fit in a single lookup.
pub fn read_cstr<'a, F>(read: &F, rva: u32) -> Option<&'a [u8]>
where
    F: Fn(u32, usize) -> Option<&'a [u8]>,
{
    let mut len = 0usize;
    while len < MAX_CSTR {
        let Some(at) = rva.checked_add(len as u32) else {
            break;
        };
        match read(at, 1) {
            Some([0]) | None => break,
            Some(_) => len += 1,
        }
    }
    if len == 0 {
        // Distinguish "" from an unresolvable address.
        return read(rva, 1).map(|b| &b[..0]);
    }
    read(rva, len)
}

/// Lossy string of a C string read through `read`.
pub fn cstr_lossy<'a, F>(read: &F, rva: u32) -> Option<String>
where
    F: Fn(u32, usize) -> Option<&'a [u8]>,
{
    read_cstr(read, rva).map(|b| String::from_utf8_lossy(b).into_owned())
}

/// Decode little-endian UTF-16 code units.
pub fn utf16_units(bytes: &[u8]) -> Vec<u16> {
    bytes
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect()
}

fn push_control(out: &mut String, c: u8, next: Option<u32>) {
    let letter = ESCAPES[usize::from(c)];
    if letter != b'.' {
        out.push('\\');
        out.push(char::from(letter));
    } else if next.is_some_and(|n| (u32::from(b'0')..=u32::from(b'7')).contains(&n)) {
        let _ = write!(out, "\\{c:03o}");
    } else {
        let _ = write!(out, "\\{c:o}");
    }
}

/// Escape 8-bit text the way C string literals are written. A single
/// trailing NUL is dropped.
pub fn escape_ascii(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len());
    for (i, &c) in bytes.iter().enumerate() {
        let next = bytes.get(i + 1).map(|&n| u32::from(n));
        if c > 127 {
            let _ = write!(out, "\\x{c:02x}");
        } else if c < 32 {
            if c == 0 && next.is_none() {
                continue;
            }
            push_control(&mut out, c, next);
        } else {
            if c == b'\\' {
                out.push('\\');
            }
            out.push(char::from(c));
        }
    }
    out
}

/// Escape UTF-16 text. Units above 127 are written as hex escapes, padded
/// to four digits when the next character would otherwise extend them.
pub fn escape_utf16(units: &[u16]) -> String {
    let mut out = String::with_capacity(units.len());
    for (i, &c) in units.iter().enumerate() {
        let next = units.get(i + 1).map(|&n| u32::from(n));
        if c > 127 {
            let extends = next.is_some_and(|n| n < 128 && (n as u8).is_ascii_hexdigit());
            if extends {
                let _ = write!(out, "\\x{c:04x}");
            } else {
                let _ = write!(out, "\\x{c:x}");
            }
        } else if c < 32 {
            if c == 0 && next.is_none() {
                continue;
            }
            push_control(&mut out, c as u8, next);
        } else {
            if c == u16::from(b'\\') {
                out.push('\\');
            }
            out.push(char::from(c as u8));
        }
    }
    out
}

/// `L"..."` rendering of a UTF-16 string.
pub fn unicode_literal(units: &[u16]) -> String {
    format!("L\"{}\"", escape_utf16(units))
}

/// Render a `TimeDateStamp` in `ctime` layout, in UTC.
pub fn time_str(stamp: u32) -> String {
    match Utc.timestamp_opt(i64::from(stamp), 0) {
        chrono::LocalResult::Single(dt) => dt.format("%a %b %e %H:%M:%S %Y").to_string(),
        _ => "not valid time".to_string(),
    }
}

fn printable(b: u8) -> char {
    if b == b' ' || b.is_ascii_graphic() {
        char::from(b)
    } else {
        '.'
    }
}

/// Hex dump with 16 bytes per row, a `-` after the eighth byte, and an
/// ASCII column. `None` prints `NULL` for unreadable data.
pub fn hexdump<W: Write + ?Sized>(out: &mut W, data: Option<&[u8]>, prefix: &str) -> io::Result<()> {
    write!(out, "{prefix}{:08x}: ", 0)?;
    let Some(data) = data else {
        return writeln!(out, "NULL");
    };

    for (row, chunk) in data.chunks(16).enumerate() {
        if row > 0 {
            write!(out, "\n{prefix}{:08x}: ", row * 16)?;
        }
        for (i, b) in chunk.iter().enumerate() {
            write!(out, "{b:02x}{}", if i == 7 { '-' } else { ' ' })?;
        }
        if chunk.len() < 16 {
            write!(out, "{:width$} ", "", width = 3 * (16 - chunk.len()))?;
        } else {
            write!(out, " ")?;
        }
        let ascii: String = chunk.iter().copied().map(printable).collect();
        out.write_all(ascii.as_bytes())?;
    }
    writeln!(out)
}
