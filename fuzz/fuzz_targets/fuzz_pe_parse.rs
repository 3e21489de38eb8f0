#![no_main]

use libfuzzer_sys::fuzz_target;
use pedissect::report::{DumpOptions, Dumper};
use pedissect::{DbgFile, ExportSymbols, PeFile, SliceReader};

fuzz_target!(|data: &[u8]| {
    // Every directory decoder and the full report run on arbitrary bytes.
    let reader = SliceReader::new(data);
    let mut sink = std::io::sink();

    if let Ok(pe) = PeFile::parse(&reader) {
        let _ = pe.exports();
        let _ = pe.imports();
        let _ = pe.delay_imports();
        let _ = pe.debug_entries();
        let _ = pe.resources();
        let _ = pe.relocations();
        let _ = pe.tls();
        let _ = pe.clr();
        let _ = pe.exceptions();
        if let Ok(symbols) = ExportSymbols::open(&pe, "fuzz") {
            symbols.for_each(drop);
        }
        let _ = Dumper::new(&mut sink, DumpOptions::all()).dump_pe(&pe);
    }

    if let Ok(dbg) = DbgFile::parse(&reader) {
        let _ = Dumper::new(&mut sink, DumpOptions::all()).dump_dbg(&dbg);
    }
});
