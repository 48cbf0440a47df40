//! Abstract target for the `binpac_core` code generator.
//!
//! The real IR, its verifier, and its lowering to machine code are a
//! downstream backend's concern; the core only ever talks to an [IrBuilder].
//! This crate supplies that trait plus one concrete, dependency-free
//! implementation ([text::TextIrBuilder]) that renders a human-readable
//! listing of the emitted module, so the core can be exercised and tested
//! without a real downstream compiler attached.
pub mod text;
pub mod types;

pub use types::*;

/// A single compilation unit of emitted IR: one parse-object type per unit,
/// one function per parse/compose entry point, hook trampolines, and
/// module-level registration calls.
pub trait IrBuilder {
  /// Concrete handle types returned by this builder. Kept generic so a real
  /// backend (LLVM values, bytecode offsets, ...) is free to use whatever
  /// representation it likes; the core only ever threads these back in as
  /// opaque values.
  type Type: Copy + Eq + std::fmt::Debug;
  type Value: Copy + Eq + std::fmt::Debug;
  type Block: Copy + Eq + std::fmt::Debug;
  type Func: Copy + Eq + std::fmt::Debug;
  /// The finished-module representation returned by [Self::finish].
  type Module;

  /// Declares a named struct type with the given ordered `(field_name,
  /// field_type)` slots in one shot. Used for leaf/non-recursive types
  /// (tuples, switch-case nested structs) that can never appear in a
  /// grammar cycle.
  fn declare_struct(&mut self, name: &str, fields: &[(String, Self::Type)]) -> Self::Type;

  /// Reserves a named struct type handle with no fields yet. `TypeLayout`
  /// calls this before laying out a unit's fields so a recursive/cyclic
  /// grammar (a unit field referencing its own enclosing unit) can resolve
  /// the reference to this handle immediately, per spec §9. The fields are
  /// filled in afterwards with [Self::define_struct_fields].
  fn declare_struct_forward(&mut self, name: &str) -> Self::Type;

  /// Fills in the field list of a type previously reserved with
  /// [Self::declare_struct_forward]. Called exactly once per forward
  /// declaration, after every field type it depends on has been resolved.
  fn define_struct_fields(&mut self, ty: Self::Type, fields: &[(String, Self::Type)]);

  /// A primitive scalar type (`u8`, `u16`, ..., `bool`, pointer-to-bytes, ...).
  fn scalar_type(&mut self, name: &str) -> Self::Type;

  /// Forward-declares a function signature so recursive/cyclic grammars can
  /// reference it before its body is emitted.
  fn declare_func(&mut self, name: &str, params: &[Self::Type], ret: Self::Type) -> Self::Func;

  /// Returns the value handle bound to the `index`-th parameter of `func`.
  /// Valid once inside one of the function's blocks.
  fn func_param(&mut self, func: Self::Func, index: usize) -> Self::Value;

  /// Opens a new basic block in `func` and makes it current for subsequent
  /// `emit_*` calls.
  fn new_block(&mut self, func: Self::Func, label: &str) -> Self::Block;

  /// Switches the block that subsequent instructions are appended to.
  fn set_insert_block(&mut self, block: Self::Block);

  fn emit_const_int(&mut self, ty: Self::Type, value: i64) -> Self::Value;
  fn emit_const_str(&mut self, value: &str) -> Self::Value;

  fn emit_struct_get(&mut self, object: Self::Value, field: &str) -> Self::Value;
  fn emit_struct_set(&mut self, object: Self::Value, field: &str, value: Self::Value);

  fn emit_call(&mut self, func: Self::Func, args: &[Self::Value]) -> Self::Value;
  fn emit_extern_call(&mut self, name: &str, args: &[Self::Value]) -> Self::Value;

  fn emit_branch(&mut self, cond: Self::Value, then_blk: Self::Block, else_blk: Self::Block);
  fn emit_jump(&mut self, target: Self::Block);
  fn emit_return(&mut self, value: Option<Self::Value>);

  /// Emits the single suspension point of the cooperative fiber model:
  /// control returns to the scheduler and resumes at `resume_blk` once more
  /// input is available.
  fn emit_yield(&mut self, resume_blk: Self::Block);

  /// Emits a jump to the unit's single dedicated error block.
  fn emit_raise(&mut self, error_blk: Self::Block, message: &str);

  /// Emits a reference-count increment/decrement on a heap value.
  fn emit_cctor(&mut self, value: Self::Value);
  fn emit_dtor(&mut self, value: Self::Value);

  /// Emits trace output tagged per the `debug` config level.
  fn emit_trace(&mut self, tag: &str, message: &str);

  /// Emits the module-level registration call for an exported parser
  /// descriptor.
  fn emit_registration(&mut self, descriptor: &ParserDescriptor<Self::Func, Self::Type>);

  /// Runs the IR verifier over everything emitted so far. Only invoked when
  /// `CodeGenConfig::verify` is set.
  fn verify(&mut self) -> Result<(), String>;

  /// Consumes the builder, returning a caller-defined finished-module
  /// representation (a listing, a byte blob, a context handle, ...).
  fn finish(self) -> Self::Module;
}
