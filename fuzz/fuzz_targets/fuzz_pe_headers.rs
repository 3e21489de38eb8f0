#![no_main]

use libfuzzer_sys::fuzz_target;
use pedissect::{DbgFile, FileKind, PeFile, SliceReader};

fuzz_target!(|data: &[u8]| {
    // Header decoding must reject bad input with an error, never a panic.
    let reader = SliceReader::new(data);
    match FileKind::detect(&reader) {
        FileKind::Dbg => {
            let _ = DbgFile::parse(&reader);
        }
        _ => {
            if let Ok(pe) = PeFile::parse(&reader) {
                let _ = pe.is_placeholder();
                for section in &pe.sections {
                    let _ = pe.section_name(section);
                }
            }
        }
    }
});
