//! Command-line front end: dump PE images and split debug files.

use anyhow::{bail, Context, Result};
use clap::Parser;
use pedissect::report::{DumpOptions, Dumper, Section, Sections};
use pedissect::{DbgFile, ExportSymbols, FileKind, MmapReader, PeFile, Reader};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

/// Dump the structure of PE images and split debug (.DBG) files
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Files to analyse
    #[arg(required = true)]
    files: Vec<PathBuf>,

    /// Print the file header, optional header and section table
    #[arg(short = 'f', long)]
    header: bool,

    /// Directory to decode: import, export, debug, resource, tls, clr,
    /// reloc, except, or ALL
    #[arg(short = 'j', long = "section", value_name = "NAME")]
    sections: Vec<String>,

    /// Same as `-f -j ALL`
    #[arg(short = 'x', long)]
    all: bool,

    /// Hex dump the raw data of each section
    #[arg(short = 'd', long)]
    raw_data: bool,

    /// Dump the COFF symbol table
    #[arg(short = 't', long)]
    symbols: bool,

    /// Dump STABS debug information
    #[arg(short = 'G', long)]
    stabs: bool,

    /// List exported symbols by ordinal instead of dumping. Ordinal-only
    /// exports are named TAG_ORDINAL; TAG defaults to the file stem
    #[arg(long, value_name = "TAG", num_args = 0..=1, default_missing_value = "")]
    symbols_of: Option<String>,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

impl Args {
    fn dump_options(&self) -> Result<DumpOptions> {
        let sections = if self.all || self.sections.iter().any(|s| s == "ALL") {
            Some(Sections::All)
        } else if self.sections.is_empty() {
            None
        } else {
            let picked = self
                .sections
                .iter()
                .map(|name| name.parse::<Section>().map_err(anyhow::Error::msg))
                .collect::<Result<Sections>>()?;
            Some(picked)
        };

        Ok(DumpOptions {
            header: self.header || self.all,
            sections,
            raw_data: self.raw_data,
            symbol_table: self.symbols,
            stabs: self.stabs,
        })
    }
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn list_symbols<W: Write>(out: &mut W, pe: &PeFile<'_>, tag: &str) -> Result<()> {
    let symbols = ExportSymbols::open(pe, tag).context("reading export symbols")?;
    for symbol in symbols {
        writeln!(out, "{} {}", symbol.ordinal, symbol.name)?;
    }
    Ok(())
}

fn process<W: Write>(out: &mut W, path: &Path, options: &DumpOptions, symbols_of: Option<&str>) -> Result<()> {
    let reader = MmapReader::open(path).with_context(|| format!("cannot open {}", path.display()))?;
    let kind = FileKind::detect(&reader);
    tracing::info!(path = %path.display(), kind = kind.name(), size = reader.size(), "processing file");

    if let Some(tag) = symbols_of {
        if kind != FileKind::Pe {
            bail!("{} is not a PE image", path.display());
        }
        let pe = PeFile::parse(&reader).context("decoding image headers")?;
        let stem = path.file_stem().map(|s| s.to_string_lossy().into_owned());
        let tag = match tag {
            "" => stem.as_deref().unwrap_or_default(),
            tag => tag,
        };
        return list_symbols(out, &pe, tag);
    }

    match kind {
        FileKind::Pe | FileKind::Dbg => {}
        FileKind::Ne | FileKind::Le | FileKind::Dos => {
            tracing::warn!(kind = kind.name(), "no decoder for this executable format");
            writeln!(out, "Can't dump {} executables", kind.name())?;
            return Ok(());
        }
        FileKind::Unknown => bail!("{}: unrecognised file format", path.display()),
    }

    writeln!(out, "Contents of {}: {} bytes\n", path.display(), reader.size())?;
    let mut dumper = Dumper::new(out, options.clone());
    if kind == FileKind::Dbg {
        match DbgFile::parse(&reader) {
            Ok(dbg) => dumper.dump_dbg(&dbg)?,
            Err(e) => {
                dumper.header_failure(&e)?;
                return Err(e).context("decoding debug file header");
            }
        }
    } else {
        match PeFile::parse(&reader) {
            Ok(pe) => dumper.dump_pe(&pe)?,
            Err(e) => {
                dumper.header_failure(&e)?;
                return Err(e).context("decoding image headers");
            }
        }
    }
    Ok(())
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_tracing(args.verbose);

    let options = match args.dump_options() {
        Ok(options) => options,
        Err(e) => {
            eprintln!("error: {e:#}");
            return ExitCode::from(2);
        }
    };

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    let mut failed = false;
    for path in &args.files {
        if let Err(e) = process(&mut out, path, &options, args.symbols_of.as_deref()) {
            tracing::error!(path = %path.display(), "{e:#}");
            eprintln!("{}: {e:#}", path.display());
            failed = true;
        }
        if let Err(e) = out.flush() {
            eprintln!("error: {e}");
            return ExitCode::FAILURE;
        }
    }

    if failed {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}
