//! # pedissect
//!
//! A read-only decoder for PE/COFF images and split debug (`.DBG`) files,
//! with a line-oriented report writer.
//!
//! ## Features
//!
//! - **Bounded access**: every structure is read through the [`Reader`]
//!   trait, which hands out borrowed byte ranges or `None`. Malformed images
//!   degrade to diagnostics instead of panics.
//! - **Directory decoders**: exports, imports, delay imports, debug entries,
//!   resources, base relocations, TLS, CLR header and x86-64 unwind data,
//!   each returning owned or borrowed typed values.
//! - **Export symbol cursor**: [`ExportSymbols`] lists a module's exports by
//!   ordinal, naming ordinal-only entries after the module.
//! - **Reports**: [`report::Dumper`] renders any of the above to an
//!   [`std::io::Write`] sink.
//!
//! ## Example
//!
//! ```no_run
//! use pedissect::report::{DumpOptions, Dumper};
//! use pedissect::{MmapReader, PeFile};
//!
//! let reader = MmapReader::open("example.dll").unwrap();
//! let pe = PeFile::parse(&reader).unwrap();
//! println!("64-bit: {}", pe.is_64bit());
//!
//! let mut out = std::io::stdout().lock();
//! Dumper::new(&mut out, DumpOptions::all()).dump_pe(&pe).unwrap();
//! ```

pub mod clr;
pub mod coff;
pub mod data_dir;
pub mod dbg;
pub mod debug;
pub mod delay_import;
pub mod dos;
pub mod error;
pub mod exception;
pub mod export;
pub mod import;
pub mod kind;
pub mod optional;
pub mod pe;
pub mod reader;
pub mod reloc;
pub mod report;
pub mod resource;
pub mod section;
pub mod subdump;
pub mod symbols;
pub mod text;
pub mod tls;

pub use dbg::DbgFile;
pub use error::{Error, Result};
pub use export::{ExportAddress, ExportDirectory, ExportName, ExportTable, ExportedFunction};
pub use import::{ImportDescriptor, ImportTable, ImportThunk, ImportedDll};
pub use kind::FileKind;
pub use pe::PeFile;
pub use reader::{MmapReader, Reader, SliceReader, VecReader};
pub use reloc::{RelocationBlock, RelocationEntry, RelocationTable, RelocationType};
pub use section::{SectionHeader, SectionName};
pub use symbols::{ExportSymbol, ExportSymbols};
