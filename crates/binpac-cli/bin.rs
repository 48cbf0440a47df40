//! Command line driver for the binpac code generator core.
//!
//! Real source-text grammars are out of scope for this core (see
//! `binpac_grammar`), so this binary ships a small set of named fixture
//! grammars built directly with `binpac_grammar::UnitBuilder` and exercises
//! the full `CodeGen::compile` pipeline against them, the way `crates/cli`
//! exercises `radlr_core` against a grammar file.
use binpac_core::{
  journal::CodeGenConfig,
  types::{BinpacError, Expr, GrammarStore, ValueType},
  CodeGen, Journal,
};
use binpac_grammar::UnitBuilder;
use binpac_ir::text::TextIrBuilder;
use clap::{Parser, ValueEnum};
use std::{fs, path::PathBuf, process::ExitCode};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Fixture {
  /// A single big-endian `uint16` field.
  Header,
  /// `len: uint8; body: bytes &length=len`.
  LengthPrefixed,
}

#[derive(Parser, Debug)]
#[command(name = "binpac", about = "Compiles a fixture binpac-style grammar to IR text")]
struct Args {
  /// Which built-in fixture grammar to compile.
  #[arg(value_enum, default_value = "header")]
  fixture: Fixture,

  /// Trace verbosity (0 disables).
  #[arg(long, default_value_t = 0)]
  debug: u32,

  /// Profiler instrumentation level (0 disables).
  #[arg(long, default_value_t = 0)]
  profile: u32,

  /// Skip emitting parser entry points.
  #[arg(long)]
  no_parsers: bool,

  /// Skip emitting composer entry points.
  #[arg(long)]
  no_composers: bool,

  /// Run the IR verifier before printing the module.
  #[arg(long)]
  verify: bool,

  /// Additional `*.pac2` library search path; may be repeated.
  #[arg(long = "libdir-pac2")]
  libdirs_pac2: Vec<String>,

  /// Additional `*.hlt` library search path; may be repeated.
  #[arg(long = "libdir-hlt")]
  libdirs_hlt: Vec<String>,

  /// Write the IR listing here instead of stdout.
  #[arg(short, long)]
  output: Option<PathBuf>,
}

fn build_fixture(fixture: Fixture) -> GrammarStore {
  let mut store = GrammarStore::new();
  let unit = match fixture {
    Fixture::Header => UnitBuilder::new("Header").exported().description("A fixed big-endian header.").field("x", ValueType::U16, |f| f).build(),
    Fixture::LengthPrefixed => UnitBuilder::new("LengthPrefixed")
      .exported()
      .description("A length-prefixed byte string.")
      .field("len", ValueType::U8, |f| f)
      .field("body", ValueType::Bytes, |f| f.length(Expr::FieldRef(binpac_core::types::FieldId::from("LengthPrefixed.len"))))
      .build(),
  };
  store.insert(unit);
  store
}

fn run(args: Args) -> Result<String, BinpacError> {
  let config = CodeGenConfig::new()
    .with_debug(args.debug)
    .with_profile(args.profile)
    .with_verify(args.verify);
  let config = if args.no_parsers { config.composers_only() } else { config };
  let config = if args.no_composers { config.parsers_only() } else { config };
  let config = args.libdirs_pac2.iter().fold(config, |c, d| c.add_libdir_pac2(d.clone()));
  let config = args.libdirs_hlt.iter().fold(config, |c, d| c.add_libdir_hlt(d.clone()));

  let mut journal = Journal::new(config);
  let store = build_fixture(args.fixture);
  let ir = TextIrBuilder::new();
  CodeGen::<TextIrBuilder>::compile(ir, &mut journal, &store)
}

fn main() -> ExitCode {
  let args = Args::parse();
  let output = args.output.clone();
  match run(args) {
    Ok(text) => {
      match output {
        Some(path) => {
          if let Err(e) = fs::write(&path, text) {
            eprintln!("failed to write {}: {e}", path.display());
            return ExitCode::FAILURE;
          }
        }
        None => print!("{text}"),
      }
      ExitCode::SUCCESS
    }
    Err(err) => {
      eprintln!("{err}");
      ExitCode::FAILURE
    }
  }
}
