//! The facade that coordinates [crate::type_layout::TypeLayout],
//! [crate::literal_matcher::LiteralMatcher], [crate::synchronizer::Synchronizer],
//! [crate::parser_builder::ParserBuilder], and [crate::composer::Composer]:
//! owns the per-compilation caches of §3, mediates hook trampoline
//! generation, and exports the module-level parser registration, per spec
//! §4.6.
use crate::{
  composer::Composer,
  journal::Journal,
  literal_matcher::LiteralMatcher,
  parser_builder::{ParserBuilder, UnitParseFuncs},
  synchronizer::Synchronizer,
  type_layout::TypeLayout,
  types::{BinpacError, BinpacResult, Field, FieldId, GrammarStore, Hook, HookId, Item, Unit, UnitId},
};
use binpac_ir::{IrBuilder, ParserDescriptor};
use std::collections::HashMap;

/// Per-compilation caches (spec §3, "Caches"), plus the leaf component
/// instances they back. One `CodeGen` instance lives for exactly one
/// [Self::compile] call.
pub struct CodeGen<B: IrBuilder> {
  layout:         TypeLayout<B>,
  matcher:        LiteralMatcher,
  sync:           Synchronizer,
  parser_builder: ParserBuilder<B>,
  composer:       Composer<B>,

  /// `grammar-symbol -> parse-function`, keyed by unit since one parse
  /// function is emitted per unit.
  parse_funcs:   HashMap<UnitId, UnitParseFuncs<B>>,
  /// `grammar-symbol -> compose-function`.
  compose_funcs: HashMap<UnitId, B::Func>,
  /// `hook-name -> hook declaration`, plus the trampoline emitted for it.
  hook_decls: HashMap<HookId, Hook>,
  hook_funcs: HashMap<HookId, B::Func>,
  /// `unit-name -> parser-registry global`: which exported units have
  /// already had their module-initializer registration emitted.
  registered: HashMap<UnitId, ()>,

  scalars: HashMap<String, B::Type>,
}

impl<B: IrBuilder> Default for CodeGen<B> {
  fn default() -> Self {
    Self {
      layout: TypeLayout::new(),
      matcher: LiteralMatcher::new(),
      sync: Synchronizer::new(),
      parser_builder: ParserBuilder::new(),
      composer: Composer::new(),
      parse_funcs: HashMap::new(),
      compose_funcs: HashMap::new(),
      hook_decls: HashMap::new(),
      hook_funcs: HashMap::new(),
      registered: HashMap::new(),
      scalars: HashMap::new(),
    }
  }
}

impl<B: IrBuilder> CodeGen<B> {
  pub fn new() -> Self {
    Self::default()
  }

  fn scalar(&mut self, b: &mut B, name: &str) -> B::Type {
    if let Some(t) = self.scalars.get(name) {
      return *t;
    }
    let t = b.scalar_type(name);
    self.scalars.insert(name.to_string(), t);
    t
  }

  /// *parseObjectType(unit) → type*: idempotent (delegates to
  /// [TypeLayout::layout_of], which caches internally).
  pub fn parse_object_type(&mut self, ir: &mut B, journal: &mut Journal, grammar: &GrammarStore, unit: &Unit) -> B::Type {
    self.layout.layout_of(ir, journal, grammar, unit)
  }

  /// *parseFunction(unit) → function*: idempotent.
  pub fn parse_function(&mut self, ir: &mut B, journal: &mut Journal, grammar: &GrammarStore, unit: &Unit) -> BinpacResult<UnitParseFuncs<B>> {
    if let Some(funcs) = self.parse_funcs.get(&unit.id) {
      return Ok(UnitParseFuncs { new_func: funcs.new_func, parse_internal: funcs.parse_internal, parse_host: funcs.parse_host });
    }
    let funcs = self.parser_builder.emit_unit(ir, journal, &mut self.layout, &mut self.matcher, &self.sync, grammar, unit)?;
    let cached = UnitParseFuncs { new_func: funcs.new_func, parse_internal: funcs.parse_internal, parse_host: funcs.parse_host };
    self.parse_funcs.insert(unit.id, cached);
    Ok(funcs)
  }

  /// *composeFunction(unit) → function*: idempotent. Runs
  /// [Composer::check_unit] first so an unsupported production is reported
  /// as a generation-time `BinpacError::Many` (spec §4.5 "Resolution")
  /// rather than emitted as a function that fails unpredictably at runtime.
  pub fn compose_function(&mut self, ir: &mut B, journal: &mut Journal, grammar: &GrammarStore, unit: &Unit) -> BinpacResult<B::Func> {
    if let Some(f) = self.compose_funcs.get(&unit.id) {
      return Ok(*f);
    }
    Composer::<B>::check_unit(unit)?;
    let func = self.composer.emit_unit(ir, journal, &mut self.layout, grammar, unit)?;
    self.compose_funcs.insert(unit.id, func);
    Ok(func)
  }

  /// *item{Get,Set,IsSet,Unset,PresetDefault}*: thin wrappers delegating to
  /// [TypeLayout].
  pub fn item_get(&mut self, ir: &mut B, pobj: B::Value, unit: UnitId, field: FieldId) -> B::Value {
    self.layout.get(ir, pobj, unit, field)
  }

  pub fn item_set(&mut self, ir: &mut B, pobj: B::Value, unit: UnitId, field: FieldId, value: B::Value) {
    self.layout.set(ir, pobj, unit, field, value)
  }

  pub fn item_is_set(&mut self, ir: &mut B, pobj: B::Value, unit: UnitId, field: FieldId) -> B::Value {
    self.layout.is_set(ir, pobj, unit, field)
  }

  pub fn item_unset(&mut self, ir: &mut B, pobj: B::Value, unit: UnitId, field: FieldId) {
    self.layout.unset(ir, pobj, unit, field)
  }

  pub fn item_preset_default(&mut self, ir: &mut B, pobj: B::Value, unit: UnitId, field: FieldId, value: B::Value) {
    self.layout.preset_default(ir, pobj, unit, field, value)
  }

  /// *writeToSinks(field, data, seq, len)*: emits one `rt_sink_write_<sink>`
  /// extern call per sink bound to `field`, carrying the current cookie.
  pub fn write_to_sinks(&mut self, ir: &mut B, field: &Field, cookie: B::Value, seq: B::Value, data: B::Value) {
    for sink in &field.sinks {
      ir.emit_extern_call(&format!("rt_sink_write_{sink}"), &[cookie, seq, data]);
    }
  }

  /// *runHook(unit, self, id, …)*: emits the IR call that dispatches every
  /// registered implementation for `hook_id`, mirroring the inline call
  /// [crate::parser_builder] already bakes into each field's own emission.
  pub fn run_hook(&mut self, ir: &mut B, pobj: B::Value, hook_id: HookId) -> B::Value {
    ir.emit_extern_call(&format!("rt_run_hook_{hook_id}"), &[pobj])
  }

  /// *defineHook(id, hook)*: emits one hook trampoline `(self, cookie) ->
  /// bool`, idempotent per [HookId]. The trampoline forwards to the hook's
  /// opaque user-written body (`hook.body_ref`) via an extern call, since
  /// the body itself is the external AST builder's concern; `foreach` hooks
  /// return the body's `stop` result, other hooks' return value is ignored
  /// by callers (spec §6, "Hook calling convention").
  pub fn define_hook(&mut self, ir: &mut B, hook: &Hook) -> B::Func {
    if let Some(f) = self.hook_funcs.get(&hook.id) {
      return *f;
    }
    self.hook_decls.insert(hook.id, hook.clone());

    let ptr_ty = self.scalar(ir, "ptr");
    let u64_ty = self.scalar(ir, "u64");
    let bool_ty = self.scalar(ir, "bool");

    let func = ir.declare_func(&format!("hook_{}", hook.id), &[ptr_ty, u64_ty], bool_ty);
    let entry = ir.new_block(func, "entry");
    ir.set_insert_block(entry);
    let self_p = ir.func_param(func, 0);
    let cookie_p = ir.func_param(func, 1);
    let result = ir.emit_extern_call(&hook.body_ref, &[self_p, cookie_p]);
    ir.emit_return(Some(result));

    self.hook_funcs.insert(hook.id, func);
    func
  }

  /// *exportParser(unit)*: emits the module-initializer that registers the
  /// unit's [ParserDescriptor] with the runtime. `parse_func`/`resume_func`
  /// are the host-facing and internal-resumable functions respectively
  /// (this core has no distinct sink-driven variant, so those fields of the
  /// descriptor are always null — see `DESIGN.md`).
  pub fn export_parser(&mut self, ir: &mut B, unit: &Unit, parse_funcs: Option<&UnitParseFuncs<B>>, compose_func: Option<B::Func>) {
    self.registered.insert(unit.id, ());
    let new_func = match parse_funcs {
      Some(f) => f.new_func,
      None => return,
    };
    let mut descriptor = ParserDescriptor::new(format!("{}::{}", "binpac", unit.name), new_func);
    descriptor.description = unit.description.clone().unwrap_or_else(|| "No description.".to_string());
    descriptor.ports = unit.ports.clone();
    descriptor.mime_types = unit.mime_types.clone();
    descriptor.params = unit.params.len() as u32;
    descriptor.parse_func = parse_funcs.map(|f| f.parse_host);
    descriptor.resume_func = parse_funcs.map(|f| f.parse_internal);
    descriptor.compose_func = compose_func;
    descriptor.type_info = Some(self.layout.struct_type(unit.id));
    ir.emit_registration(&descriptor);
  }

  /// Every hook attached to any field, variable, or global-hook item in
  /// `unit`, in declaration order.
  fn unit_hooks(unit: &Unit) -> Vec<&Hook> {
    let mut hooks = Vec::new();
    for item in &unit.items {
      match item {
        Item::Field(f) | Item::Variable(f) => hooks.extend(f.hooks.iter()),
        Item::GlobalHook { hook, .. } => hooks.push(hook),
        Item::Property { .. } => {}
      }
    }
    hooks
  }

  /// The single public entry point external drivers call (spec §4.6,
  /// "Top-level entry point"). Consumes an [IrBuilder], walks `grammar`,
  /// and returns the finished module or the accumulated `journal` errors.
  pub fn compile(mut ir: B, journal: &mut Journal, grammar: &GrammarStore) -> BinpacResult<B::Module> {
    let mut codegen = Self::new();

    // 1. Forward-declare every reachable unit's parse-object struct type
    // before any bodies are emitted, so cyclic grammars resolve (spec §9).
    for unit in grammar.units.values() {
      codegen.parse_object_type(&mut ir, journal, grammar, unit);
    }

    // 2. Emit parse/compose functions for every exported unit.
    let generate_parsers = journal.config().generate_parsers;
    let generate_composers = journal.config().generate_composers;
    let mut exported: Vec<(UnitId, Option<UnitParseFuncs<B>>, Option<B::Func>)> = Vec::new();
    for unit in grammar.exported_units() {
      let parse_funcs = if generate_parsers {
        match codegen.parse_function(&mut ir, journal, grammar, unit) {
          Ok(f) => Some(f),
          Err(e) => {
            journal.error(e);
            None
          }
        }
      } else {
        None
      };
      let compose_func = if generate_composers {
        match codegen.compose_function(&mut ir, journal, grammar, unit) {
          Ok(f) => Some(f),
          Err(e) => {
            journal.error(e);
            None
          }
        }
      } else {
        None
      };
      exported.push((unit.id, parse_funcs, compose_func));
    }

    // 3. One hook trampoline per hook id used anywhere in the module.
    for unit in grammar.units.values() {
      for hook in Self::unit_hooks(unit) {
        codegen.define_hook(&mut ir, hook);
      }
    }

    // 4. Export a parser descriptor for every exported unit, even one whose
    // own parse function failed to generate (so the driver's diagnostics
    // see every exported name, not just the ones that succeeded).
    for (unit_id, parse_funcs, compose_func) in &exported {
      let unit = grammar.get(*unit_id).expect("exported_units() only yields units present in the store");
      codegen.export_parser(&mut ir, unit, parse_funcs.as_ref(), *compose_func);
    }

    // 5. Verify, if asked.
    if journal.config().verify {
      if let Err(msg) = ir.verify() {
        journal.error(BinpacError::InternalError(msg));
      }
    }

    if journal.have_critical() {
      return Err(BinpacError::Many { message: "code generation failed".to_string(), errors: journal.errors().to_vec() });
    }

    Ok(ir.finish())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{
    journal::CodeGenConfig,
    types::{FieldAttrs, GlobalHookKeyword, ProductionKind as PK, Unit as CoreUnit, ValueType as VT},
  };
  use binpac_ir::text::TextIrBuilder;

  fn field(name: &str, id_seed: &str, value_type: VT) -> Field {
    Field { id: FieldId::from(id_seed), name: name.into(), value_type, attrs: FieldAttrs::default(), params: Vec::new(), condition: None, sinks: Vec::new(), hooks: Vec::new(), transient: false }
  }

  #[test]
  fn compile_emits_parse_compose_and_registration_for_an_exported_unit() {
    let x = field("x", "W.x", VT::U16);
    let grammar_prod = crate::types::Production::new(PK::Variable { field: x.id }).with_field(x.id);
    let mut unit = CoreUnit::new("W", grammar_prod);
    unit.items.push(Item::Field(x));
    unit.exported = true;
    unit.description = Some("A wire record.".to_string());

    let mut store = GrammarStore::new();
    store.insert(unit);

    let ir = TextIrBuilder::new();
    let mut journal = Journal::new(CodeGenConfig::new());
    let text = CodeGen::<TextIrBuilder>::compile(ir, &mut journal, &store).unwrap();

    assert!(text.contains("declare fn parse_W"));
    assert!(text.contains("declare fn compose_W"));
    assert!(text.contains("register parser \"binpac::W\""));
  }

  #[test]
  fn compile_fails_when_an_exported_unit_cannot_be_composed() {
    let a = field("a", "LA2.a", VT::U8);
    let lahead = crate::types::Production::new(PK::LookAhead {
      alt_a:    Box::new(crate::types::Production::new(PK::Variable { field: a.id }).with_field(a.id)),
      alt_b:    Box::new(crate::types::Production::new(PK::Epsilon)),
      tokens_a: Vec::new(),
      tokens_b: Vec::new(),
      default:  None,
    });
    let mut unit = CoreUnit::new("LA2", lahead);
    unit.items.push(Item::Field(a));
    unit.exported = true;

    let mut store = GrammarStore::new();
    store.insert(unit);

    let ir = TextIrBuilder::new();
    let mut journal = Journal::new(CodeGenConfig::new());
    let err = CodeGen::<TextIrBuilder>::compile(ir, &mut journal, &store).unwrap_err();
    assert!(matches!(err, BinpacError::Many { .. }));
  }

  #[test]
  fn hook_trampoline_is_emitted_once_per_hook_id() {
    let mut x = field("x", "H.x", VT::U8);
    let hook = Hook { id: HookId::from("H.x.parse"), priority: 0, group: 0, is_foreach: false, body_ref: "user_hook_x".to_string() };
    x.hooks.push(hook.clone());
    let grammar_prod = crate::types::Production::new(PK::Variable { field: x.id }).with_field(x.id);
    let mut unit = CoreUnit::new("H", grammar_prod);
    unit.items.push(Item::Field(x));
    unit.exported = true;

    let mut store = GrammarStore::new();
    store.insert(unit);

    let ir = TextIrBuilder::new();
    let mut journal = Journal::new(CodeGenConfig::new());
    let text = CodeGen::<TextIrBuilder>::compile(ir, &mut journal, &store).unwrap();
    assert_eq!(text.matches("declare fn hook_").count(), 1);
    assert!(text.contains("user_hook_x"));
    let _ = GlobalHookKeyword::Sync;
  }
}
