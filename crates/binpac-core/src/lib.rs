//! Grammar-to-IR code generator core for the `binpac` binary-protocol
//! compiler.
//!
//! Given a finalized, already-resolved unit grammar (see `binpac_grammar`)
//! and an [binpac_ir::IrBuilder] target, this crate emits the incremental
//! parser state machine, the parse-object layout, hook trampolines, and
//! (optionally) the composer that serializes a parse object back to bytes.
//! Lexing/parsing/name-resolution of the source language, the IR itself and
//! its lowering to machine code, and the runtime library the generated IR
//! targets are all out of scope here — they are consumed as collaborators
//! through `binpac_grammar`, `binpac_ir`, and `binpac_rt` respectively.
pub mod bitfield;
pub mod codegen;
pub mod composer;
pub mod journal;
pub mod literal_matcher;
pub mod parser_builder;
pub mod synchronizer;
pub mod type_layout;
pub mod types;

pub use codegen::CodeGen;
pub use journal::{CodeGenConfig, Journal};
pub use types::{BinpacError, BinpacResult};
