//! Minimal runtime stand-in for the cooperative-fiber, reference-counted,
//! bytes/regex/hook-dispatch runtime the generated `binpac` IR targets. A
//! real deployment wires generated parsers to a production runtime (fiber
//! scheduler, refcounted heap, sinks, filters); this crate provides just
//! enough of that surface for `binpac_test_suite` to drive emitted IR
//! semantics directly, kept separate from `binpac_core` the way a generated
//! parser's runtime support library is kept separate from its compiler.
pub mod types;

pub use types::{
  bytes::{ByteCursor, Bytes},
  fiber::{Fiber, FiberState, Suspend},
  hook::{HookId, HookTable, Priority},
  sink::{Filter, FilterChain, Sink},
};
