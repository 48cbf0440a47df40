//! Emits the incremental parser state machine for one unit: the allocator,
//! the resumable `_internal` parse function, and the public entry point,
//! per spec §4.4.
//!
//! Every sub-production is visited through [emit_production], which applies
//! a field's attribute wrapping (`if (condition)` gate, `&parse` override,
//! `&length` limit, `&try` backtrack) exactly at the point a
//! [ProductionKind::Variable]/`Counter`/`Loop`/... node carrying that field
//! is reached, then dispatches to the kind-specific emitter. Cooperative
//! suspension is modeled by [ensure_available_dyn]: an `rt_available` check,
//! an `emit_yield` back to the scheduler on short input, and a jump back to
//! the same check once resumed.
//!
//! The bare-stdlib gap this core can't close on its own: [binpac_ir::IrBuilder]
//! has no phi/select primitive, so `ctx.cur` across a two-way branch (the
//! condition gate, a `&length` violation's synchronize-vs-raise split) is
//! left for a real backend to unify; every site that does this is marked
//! with a `NOTE`.
use crate::{
  bitfield,
  journal::Journal,
  literal_matcher::LiteralMatcher,
  synchronizer::Synchronizer,
  type_layout::TypeLayout,
  types::{BinpacError, BinpacResult, Expr, Field, FieldId, GrammarStore, Hook, Item, Production, ProductionKind, Terminal, Unit, UnitId, ValueType},
};
use binpac_ir::IrBuilder;
use std::collections::HashMap;

/// The three entry points emitted for one unit.
pub struct UnitParseFuncs<B: IrBuilder> {
  pub new_func:       B::Func,
  pub parse_internal: B::Func,
  pub parse_host:     B::Func,
}

/// One emission context, threaded through a single unit's traversal. Mirrors
/// the "parser state" frame of spec §4.4: the object under construction,
/// the input cursor, the active `&length` limit, and any pending look-ahead
/// disambiguation.
struct EmitCtx<B: IrBuilder> {
  func:          B::Func,
  pobj:          B::Value,
  data:          B::Value,
  cur:           B::Value,
  /// `None` means unbounded (parse to EOD); `Some` is the active `&length`
  /// or `&chunked` limit.
  end:           Option<B::Value>,
  /// The value most recently produced by a value-producing production —
  /// `$$` in the resolved-AST's [Expr::CurrentValue].
  current_value: Option<B::Value>,
  error_blk:     B::Block,
  cur_block:     B::Block,
  /// Set while emitting the branch [emit_look_ahead] already resolved the
  /// next token for: the first literal reached consumes it directly under
  /// `LAHEAD_REPARSE` instead of performing a fresh match, then clears it.
  pending_lookahead: Option<B::Value>,
}

/// Reparse mode passed to `rt_literal_reparse_*` when consuming a literal
/// [EmitCtx::pending_lookahead] already identified.
const LAHEAD_REPARSE: i64 = 1;

/// Bundles the collaborators [emit_production] and its helpers need, so
/// their signatures stay short. `ir`, `journal`, `layout`, and `matcher` are
/// four independently-borrowed objects, never aliased.
struct Env<'a, B: IrBuilder> {
  ir:       &'a mut B,
  journal:  &'a mut Journal,
  layout:   &'a mut TypeLayout<B>,
  matcher:  &'a mut LiteralMatcher,
  sync:     &'a Synchronizer,
  grammar:  &'a GrammarStore,
  unit:     &'a Unit,
  scalars:  &'a mut HashMap<String, B::Type>,
}

impl<'a, B: IrBuilder> Env<'a, B> {
  fn scalar(&mut self, name: &str) -> B::Type {
    if let Some(t) = self.scalars.get(name) {
      return *t;
    }
    let t = self.ir.scalar_type(name);
    self.scalars.insert(name.to_string(), t);
    t
  }
}

#[derive(Default)]
pub struct ParserBuilder<B: IrBuilder> {
  scalars: HashMap<String, B::Type>,
}

impl<B: IrBuilder> ParserBuilder<B> {
  pub fn new() -> Self {
    Self { scalars: HashMap::new() }
  }

  /// Emits `__binpac_new_<unit>`, `parse_<unit>_internal`, and `parse_<unit>`
  /// for one unit. The unit's own [TypeLayout] must already have been built
  /// (or is built here, lazily, via [TypeLayout::layout_of]).
  pub fn emit_unit(&mut self, ir: &mut B, journal: &mut Journal, layout: &mut TypeLayout<B>, matcher: &mut LiteralMatcher, sync: &Synchronizer, grammar: &GrammarStore, unit: &Unit) -> BinpacResult<UnitParseFuncs<B>> {
    let pobj_ty = layout.layout_of(ir, journal, grammar, unit);
    let mut env = Env { ir, journal, layout, matcher, sync, grammar, unit, scalars: &mut self.scalars };

    let ptr_ty = env.scalar("ptr");
    let u64_ty = env.scalar("u64");

    let param_tys: Vec<B::Type> = unit.params.iter().map(|_| ptr_ty).collect();
    let new_func = env.ir.declare_func(&format!("__binpac_new_{}", unit.name), &param_tys, pobj_ty);
    let new_entry = env.ir.new_block(new_func, "entry");
    env.ir.set_insert_block(new_entry);
    let pobj = env.ir.emit_extern_call(&format!("rt_alloc_{}", unit.name), &[]);
    for (i, (name, _)) in unit.params.iter().enumerate() {
      let p = env.ir.func_param(new_func, i);
      env.ir.emit_struct_set(pobj, &format!("{}param_{name}", crate::type_layout::RESERVED_PREFIX), p);
    }
    if unit.buffering {
      let zero = env.ir.emit_const_int(u64_ty, 0);
      env.ir.emit_struct_set(pobj, &format!("{}buf_start", crate::type_layout::RESERVED_PREFIX), zero);
      env.ir.emit_struct_set(pobj, &format!("{}buf_end", crate::type_layout::RESERVED_PREFIX), zero);
    }
    env.ir.emit_return(Some(pobj));

    let internal_func = env.ir.declare_func(&format!("parse_{}_internal", unit.name), &[pobj_ty, ptr_ty, u64_ty, u64_ty], u64_ty);
    let entry = env.ir.new_block(internal_func, "entry");
    let error_blk = env.ir.new_block(internal_func, "error");
    env.ir.set_insert_block(entry);
    let pobj_p = env.ir.func_param(internal_func, 0);
    let data_p = env.ir.func_param(internal_func, 1);
    let cur_p = env.ir.func_param(internal_func, 2);
    let end_p = env.ir.func_param(internal_func, 3);

    let mut ctx = EmitCtx { func: internal_func, pobj: pobj_p, data: data_p, cur: cur_p, end: Some(end_p), current_value: None, error_blk, cur_block: entry, pending_lookahead: None };
    emit_production(&mut env, &mut ctx, &unit.grammar)?;

    env.ir.set_insert_block(ctx.cur_block);
    env.ir.emit_return(Some(ctx.cur));

    env.ir.set_insert_block(error_blk);
    env.ir.emit_trace("parse-error", &format!("{} failed to parse", unit.name));
    env.ir.emit_return(None);

    let host_func = env.ir.declare_func(&format!("parse_{}", unit.name), &[ptr_ty, u64_ty], ptr_ty);
    let host_entry = env.ir.new_block(host_func, "entry");
    env.ir.set_insert_block(host_entry);
    let host_data = env.ir.func_param(host_func, 0);
    let host_cur = env.ir.func_param(host_func, 1);
    let host_pobj = env.ir.emit_call(new_func, &[]);
    let unbounded = env.ir.emit_const_int(u64_ty, -1);
    env.ir.emit_call(internal_func, &[host_pobj, host_data, host_cur, unbounded]);
    env.ir.emit_return(Some(host_pobj));

    Ok(UnitParseFuncs { new_func, parse_internal: internal_func, parse_host: host_func })
  }
}

fn find_field<'u>(unit: &'u Unit, id: FieldId) -> Option<&'u Field> {
  unit.items.iter().find_map(|item| match item {
    Item::Field(f) | Item::Variable(f) if f.id == id => Some(f),
    _ => None,
  })
}

fn eval_expr<B: IrBuilder>(env: &mut Env<B>, ctx: &mut EmitCtx<B>, expr: &Expr) -> B::Value {
  match expr {
    Expr::ConstInt(v) => {
      let ty = env.scalar("i64");
      env.ir.emit_const_int(ty, *v)
    }
    Expr::ConstBytes(bytes) => env.ir.emit_const_str(&String::from_utf8_lossy(bytes)),
    Expr::CurrentValue => ctx.current_value.expect("`$$` referenced outside a value-producing production"),
    Expr::FieldRef(field_id) => {
      let (value, new_block) = env.layout.get(env.ir, ctx.func, ctx.cur_block, ctx.error_blk, ctx.pobj, env.unit.id, *field_id);
      ctx.cur_block = new_block;
      value
    }
    Expr::Eq(a, b) => {
      let av = eval_expr(env, ctx, a);
      let bv = eval_expr(env, ctx, b);
      env.ir.emit_extern_call("rt_eq", &[av, bv])
    }
    Expr::Ne(a, b) => {
      let av = eval_expr(env, ctx, a);
      let bv = eval_expr(env, ctx, b);
      env.ir.emit_extern_call("rt_ne", &[av, bv])
    }
  }
}

/// Emits the cooperative-suspension check for `width` bytes, yielding and
/// resuming at the same check until enough input is available or the
/// stream is frozen, in which case `InsufficientInput` is raised. Leaves the
/// insert point (and `ctx.cur_block`) at the "ready" block.
fn ensure_available_dyn<B: IrBuilder>(env: &mut Env<B>, ctx: &mut EmitCtx<B>, width: B::Value) -> BinpacResult<()> {
  let check_blk = env.ir.new_block(ctx.func, "avail_check");
  env.ir.set_insert_block(ctx.cur_block);
  env.ir.emit_jump(check_blk);

  env.ir.set_insert_block(check_blk);
  let avail = env.ir.emit_extern_call("rt_available", &[ctx.data, ctx.cur, width]);
  let ready_blk = env.ir.new_block(ctx.func, "avail_ready");
  let block_blk = env.ir.new_block(ctx.func, "avail_block");
  env.ir.emit_branch(avail, ready_blk, block_blk);

  env.ir.set_insert_block(block_blk);
  let frozen = env.ir.emit_extern_call("rt_is_frozen", &[ctx.data]);
  let insuff_blk = env.ir.new_block(ctx.func, "insufficient_input");
  let yield_blk = env.ir.new_block(ctx.func, "do_yield");
  env.ir.emit_branch(frozen, insuff_blk, yield_blk);

  env.ir.set_insert_block(insuff_blk);
  env.ir.emit_raise(ctx.error_blk, "insufficient input");

  env.ir.set_insert_block(yield_blk);
  env.ir.emit_yield(check_blk);

  env.ir.set_insert_block(ready_blk);
  ctx.cur_block = ready_blk;
  Ok(())
}

fn ensure_available<B: IrBuilder>(env: &mut Env<B>, ctx: &mut EmitCtx<B>, width: u32) -> BinpacResult<()> {
  let u64_ty = env.scalar("u64");
  let width_const = env.ir.emit_const_int(u64_ty, width as i64);
  ensure_available_dyn(env, ctx, width_const)
}

/// Entry point for one grammar node: applies field-attribute wrapping if
/// the node carries a field, then dispatches on [ProductionKind].
fn emit_production<B: IrBuilder>(env: &mut Env<B>, ctx: &mut EmitCtx<B>, production: &Production) -> BinpacResult<()> {
  if let Some(field_id) = production.meta.field {
    let field = find_field(env.unit, field_id)
      .ok_or_else(|| BinpacError::InternalError(format!("field {field_id} not found in unit {}", env.unit.name)))?
      .clone();
    return emit_field_wrapped(env, ctx, production, &field);
  }
  emit_bare(env, ctx, production)
}

fn emit_field_wrapped<B: IrBuilder>(env: &mut Env<B>, ctx: &mut EmitCtx<B>, production: &Production, field: &Field) -> BinpacResult<()> {
  if let Some(cond) = field.condition.clone() {
    let cond_val = eval_expr(env, ctx, &cond);
    let then_blk = env.ir.new_block(ctx.func, "field_then");
    let join_blk = env.ir.new_block(ctx.func, "field_join");
    env.ir.set_insert_block(ctx.cur_block);
    env.ir.emit_branch(cond_val, then_blk, join_blk);

    env.ir.set_insert_block(then_blk);
    ctx.cur_block = then_blk;
    emit_field_body(env, ctx, production, field)?;

    env.ir.set_insert_block(ctx.cur_block);
    env.ir.emit_jump(join_blk);
    env.ir.set_insert_block(join_blk);
    ctx.cur_block = join_blk;
    // NOTE: the skip path and the parsed path disagree on `cur`; a real
    // backend must phi-merge them here.
    return Ok(());
  }
  emit_field_body(env, ctx, production, field)
}

fn emit_field_body<B: IrBuilder>(env: &mut Env<B>, ctx: &mut EmitCtx<B>, production: &Production, field: &Field) -> BinpacResult<()> {
  if let Some(expr) = field.attrs.parse_override.clone() {
    let overridden = eval_expr(env, ctx, &expr);
    let private_data = env.ir.emit_extern_call("rt_bytes_from_value", &[overridden]);
    env.ir.emit_extern_call("rt_bytes_freeze", &[private_data]);
    let zero_ty = env.scalar("u64");
    let zero = env.ir.emit_const_int(zero_ty, 0);
    let (saved_data, saved_cur, saved_end) = (ctx.data, ctx.cur, ctx.end);
    ctx.data = private_data;
    ctx.cur = zero;
    ctx.end = None;
    if let Some(length_expr) = field.attrs.length.clone() {
      emit_length_wrapped(env, ctx, production, field, &length_expr)?;
    } else if field.attrs.is_try {
      emit_try_wrapped(env, ctx, production, field)?;
    } else {
      emit_field_core(env, ctx, production, field)?;
    }
    ctx.data = saved_data;
    ctx.cur = saved_cur;
    ctx.end = saved_end;
    // A `&parse`-overridden field is a private re-parse of another value;
    // it never consumes from or contributes to the enclosing stream, so it
    // is also skipped entirely by the composer (see composer.rs).
    return Ok(());
  }
  if let Some(length_expr) = field.attrs.length.clone() {
    return emit_length_wrapped(env, ctx, production, field, &length_expr);
  }
  if field.attrs.is_try {
    return emit_try_wrapped(env, ctx, production, field);
  }
  emit_field_core(env, ctx, production, field)
}

fn emit_length_wrapped<B: IrBuilder>(env: &mut Env<B>, ctx: &mut EmitCtx<B>, production: &Production, field: &Field, length_expr: &Expr) -> BinpacResult<()> {
  let length_val = eval_expr(env, ctx, length_expr);
  let new_end = env.ir.emit_extern_call("rt_cursor_add", &[ctx.cur, length_val]);
  let saved_end = ctx.end;
  ctx.end = Some(new_end);

  if field.attrs.is_try {
    emit_try_wrapped(env, ctx, production, field)?;
  } else {
    emit_field_core(env, ctx, production, field)?;
  }
  ctx.end = saved_end;

  let matches = env.ir.emit_extern_call("rt_cursor_eq", &[ctx.cur, new_end]);
  let ok_blk = env.ir.new_block(ctx.func, "length_ok");
  let bad_blk = env.ir.new_block(ctx.func, "length_violation");
  env.ir.set_insert_block(ctx.cur_block);
  env.ir.emit_branch(matches, ok_blk, bad_blk);

  env.ir.set_insert_block(bad_blk);
  if Synchronizer::supports_synchronize(production) {
    let sig_const = env.ir.emit_const_str(&format!("{:?}", Synchronizer::start_terminal_signature(production)));
    let resynced = env.ir.emit_extern_call("rt_synchronize_to", &[ctx.data, ctx.cur, sig_const]);
    ctx.cur = resynced;
    env.ir.emit_jump(ok_blk);
  } else {
    env.ir.emit_raise(ctx.error_blk, "&length area not fully parsed");
  }

  env.ir.set_insert_block(ok_blk);
  ctx.cur_block = ok_blk;
  // NOTE: on the synchronize path `cur` was reassigned inside `bad_blk`; a
  // real backend needs a phi to merge it with the straight-through value.
  Ok(())
}

fn emit_try_wrapped<B: IrBuilder>(env: &mut Env<B>, ctx: &mut EmitCtx<B>, production: &Production, field: &Field) -> BinpacResult<()> {
  let saved_cur = ctx.cur;
  let outer_error_blk = ctx.error_blk;
  let try_blk = env.ir.new_block(ctx.func, "try_catch");
  ctx.error_blk = try_blk;
  emit_field_core(env, ctx, production, field)?;
  ctx.error_blk = outer_error_blk;

  let after_blk = env.ir.new_block(ctx.func, "after_try");
  env.ir.set_insert_block(ctx.cur_block);
  env.ir.emit_jump(after_blk);

  env.ir.set_insert_block(try_blk);
  env.ir.emit_extern_call("rt_cursor_restore", &[ctx.data, saved_cur]);
  ctx.cur = saved_cur;
  env.ir.emit_jump(after_blk);

  env.ir.set_insert_block(after_blk);
  ctx.cur_block = after_blk;
  Ok(())
}

fn sorted_parse_hooks(field: &Field) -> Vec<&Hook> {
  let mut hooks: Vec<&Hook> = field.parse_hooks().collect();
  hooks.sort_by(|a, b| b.priority.cmp(&a.priority));
  hooks
}

/// Core per-field emission once every wrapper has been applied: runs the
/// production, stores whatever value it produced, writes through the
/// field's declared sinks, and dispatches its parse hooks. A hook's own
/// group is disabled for the duration of its own call, so it cannot
/// recursively retrigger itself.
fn emit_field_core<B: IrBuilder>(env: &mut Env<B>, ctx: &mut EmitCtx<B>, production: &Production, field: &Field) -> BinpacResult<()> {
  emit_bare(env, ctx, production)?;

  if !field.transient {
    if let Some(value) = ctx.current_value {
      env.layout.set(env.ir, ctx.pobj, env.unit.id, field.id, value);
    }
  }

  for sink in &field.sinks {
    let value = ctx.current_value.unwrap_or(ctx.pobj);
    env.ir.emit_extern_call(&format!("rt_sink_write_{sink}"), &[value]);
  }

  for hook in sorted_parse_hooks(field) {
    let group_ty = env.scalar("i64");
    let group_const = env.ir.emit_const_int(group_ty, hook.group as i64);
    env.ir.emit_extern_call("rt_hook_disable_group", &[group_const]);
    env.ir.emit_extern_call(&format!("rt_run_hook_{}", hook.id), &[ctx.pobj]);
    env.ir.emit_extern_call("rt_hook_enable_group", &[group_const]);
  }

  Ok(())
}

fn emit_bare<B: IrBuilder>(env: &mut Env<B>, ctx: &mut EmitCtx<B>, production: &Production) -> BinpacResult<()> {
  ctx.current_value = None;
  match &production.kind {
    ProductionKind::Epsilon => Ok(()),
    ProductionKind::Literal { terminal } => emit_literal(env, ctx, terminal),
    ProductionKind::Variable { field } => emit_variable(env, ctx, *field),
    ProductionKind::Sequence(children) => {
      for child in children {
        emit_production(env, ctx, child)?;
      }
      Ok(())
    }
    ProductionKind::LookAhead { alt_a, alt_b, tokens_a, tokens_b, default } => emit_look_ahead(env, ctx, alt_a, alt_b, tokens_a, tokens_b, default.as_deref()),
    ProductionKind::Switch { expr, cases, default } => emit_switch(env, ctx, expr, cases, default.as_deref()),
    ProductionKind::Counter { count, body } => emit_counter(env, ctx, count, body, production),
    ProductionKind::ByteBlock { length, body } => emit_byte_block(env, ctx, length, body),
    ProductionKind::Loop { body, eod_ok } => emit_loop(env, ctx, body, *eod_ok, production),
    ProductionKind::ChildGrammar { unit, args } => emit_child_grammar(env, ctx, *unit, args),
    ProductionKind::Enclosure { child } => emit_production(env, ctx, child),
    ProductionKind::Boolean => emit_boolean(env, ctx),
    ProductionKind::While { condition, body } => emit_while(env, ctx, condition, body),
  }
}

fn emit_literal<B: IrBuilder>(env: &mut Env<B>, ctx: &mut EmitCtx<B>, terminal: &Terminal) -> BinpacResult<()> {
  if let Some(token) = ctx.pending_lookahead.take() {
    // emit_look_ahead already matched this terminal while resolving which
    // branch to take; consume it instead of matching again from scratch.
    ensure_available(env, ctx, 1)?;
    let mode_ty = env.scalar("i64");
    let mode_const = env.ir.emit_const_int(mode_ty, LAHEAD_REPARSE);
    let consumed = env.ir.emit_extern_call(&format!("rt_literal_reparse_{}", terminal.token_id), &[ctx.data, ctx.cur, token, mode_const]);
    ctx.cur = env.ir.emit_extern_call("rt_cursor_advance", &[ctx.cur, consumed]);
    return Ok(());
  }

  ensure_available(env, ctx, 1)?;
  let matched = env.ir.emit_extern_call(&format!("rt_literal_try_{}", terminal.token_id), &[ctx.data, ctx.cur]);
  let ok_blk = env.ir.new_block(ctx.func, "literal_ok");
  env.ir.set_insert_block(ctx.cur_block);
  env.ir.emit_branch(matched, ok_blk, ctx.error_blk);

  env.ir.set_insert_block(ok_blk);
  let consumed = env.ir.emit_extern_call(&format!("rt_literal_len_{}", terminal.token_id), &[ctx.data, ctx.cur]);
  ctx.cur = env.ir.emit_extern_call("rt_cursor_advance", &[ctx.cur, consumed]);
  ctx.cur_block = ok_blk;
  Ok(())
}

fn scalar_storage_name(ty: &ValueType) -> &'static str {
  match ty {
    ValueType::Bitfield { storage, .. } => scalar_storage_name(storage),
    other => other.scalar_ir_name(),
  }
}

fn emit_variable<B: IrBuilder>(env: &mut Env<B>, ctx: &mut EmitCtx<B>, field_id: FieldId) -> BinpacResult<()> {
  let field = find_field(env.unit, field_id).ok_or_else(|| BinpacError::InternalError(format!("field {field_id} not found in unit {}", env.unit.name)))?.clone();

  if let Some(chunk_size) = field.attrs.chunked {
    return emit_chunked_field(env, ctx, &field, chunk_size);
  }

  match &field.value_type {
    ValueType::UnitRef(target_id) => {
      let target = env.grammar.get(*target_id).ok_or_else(|| BinpacError::InternalError(format!("unit {target_id} not found in grammar store")))?;
      let child_pobj = env.ir.emit_extern_call(&format!("rt_new_{}", target.name), &[]);
      let u64_ty = env.scalar("u64");
      let unbounded = ctx.end.unwrap_or_else(|| env.ir.emit_const_int(u64_ty, -1));
      let new_cur = env.ir.emit_extern_call(&format!("parse_{}_internal", target.name), &[child_pobj, ctx.data, ctx.cur, unbounded]);
      ctx.cur = new_cur;
      ctx.current_value = Some(child_pobj);
    }
    ValueType::Bytes => {
      let (len_val, _dynamic) = if let Some(end) = ctx.end {
        (env.ir.emit_extern_call("rt_cursor_sub", &[end, ctx.cur]), true)
      } else if field.attrs.until.is_some() {
        // The `&until` predicate is opaque to this core: `rt_scan_until`
        // performs its own would-block-aware byte-at-a-time scan at runtime.
        (env.ir.emit_extern_call("rt_scan_until", &[ctx.data, ctx.cur]), true)
      } else {
        let one_ty = env.scalar("u64");
        (env.ir.emit_const_int(one_ty, 1), false)
      };
      ensure_available_dyn(env, ctx, len_val)?;
      let value = env.ir.emit_extern_call("rt_unpack_bytes", &[ctx.data, ctx.cur, len_val]);
      ctx.cur = env.ir.emit_extern_call("rt_cursor_advance", &[ctx.cur, len_val]);
      ctx.current_value = Some(value);
    }
    ValueType::Tuple(members) => {
      let mut vals = Vec::with_capacity(members.len());
      for member in members {
        let width = member.byte_width().unwrap_or(1);
        ensure_available(env, ctx, width)?;
        let name = format!("rt_unpack_{}_{}", scalar_storage_name(member), byteorder_suffix(field.attrs.byteorder));
        let v = env.ir.emit_extern_call(&name, &[ctx.data, ctx.cur]);
        let width_ty = env.scalar("u64");
        let width_const = env.ir.emit_const_int(width_ty, width as i64);
        ctx.cur = env.ir.emit_extern_call("rt_cursor_advance", &[ctx.cur, width_const]);
        vals.push(v);
      }
      let built = env.ir.emit_extern_call(&format!("rt_tuple_build_{}", members.len()), &vals);
      ctx.current_value = Some(built);
    }
    ValueType::Sink => {
      ctx.current_value = Some(env.ir.emit_extern_call("rt_sink_new", &[]));
    }
    ValueType::Container(_) => {
      ctx.current_value = Some(env.ir.emit_extern_call("rt_container_new", &[]));
    }
    other => {
      let width = other.byte_width().unwrap_or(1);
      ensure_available(env, ctx, width)?;
      let name = format!("rt_unpack_{}_{}", scalar_storage_name(other), byteorder_suffix(field.attrs.byteorder));
      let value = env.ir.emit_extern_call(&name, &[ctx.data, ctx.cur]);
      let width_ty = env.scalar("u64");
      let width_const = env.ir.emit_const_int(width_ty, width as i64);
      ctx.cur = env.ir.emit_extern_call("rt_cursor_advance", &[ctx.cur, width_const]);
      ctx.current_value = Some(value);
    }
  }
  Ok(())
}

fn byteorder_suffix(order: crate::types::ByteOrder) -> &'static str {
  match order {
    crate::types::ByteOrder::Big => "be",
    crate::types::ByteOrder::Little => "le",
  }
}

/// Runs `field`'s foreach hook (if any) against the just-produced `value`,
/// branching straight to `exit_blk` when it signals stop. Returns the block
/// execution continues in: a fresh "continue" block when a hook ran, or
/// `ctx.cur_block` unchanged when the field carries no foreach hook.
fn emit_foreach_hook_stop_check<B: IrBuilder>(env: &mut Env<B>, ctx: &mut EmitCtx<B>, field: &Field, value: B::Value, exit_blk: B::Block, label: &str) -> B::Block {
  let hook = match field.foreach_hook() {
    Some(hook) => hook,
    None => return ctx.cur_block,
  };
  let group_ty = env.scalar("i64");
  let group_const = env.ir.emit_const_int(group_ty, hook.group as i64);
  let disabled = env.ir.emit_extern_call("rt_hook_group_disabled", &[group_const]);
  let enabled = env.ir.emit_extern_call("rt_not", &[disabled]);
  let stop = env.ir.emit_extern_call(&format!("rt_run_foreach_hook_{}", hook.id), &[value, enabled]);
  let continue_blk = env.ir.new_block(ctx.func, &format!("{label}_continue"));
  env.ir.emit_branch(stop, exit_blk, continue_blk);
  env.ir.set_insert_block(continue_blk);
  continue_blk
}

/// `&chunked` streaming: reads and disposes of `chunk_size`-byte pieces one
/// at a time until the field's `&length` bound is reached, running the
/// field's `foreach` hook (if any) on each piece rather than accumulating
/// the whole value. Requires an active `&length` bound.
fn emit_chunked_field<B: IrBuilder>(env: &mut Env<B>, ctx: &mut EmitCtx<B>, field: &Field, chunk_size: u32) -> BinpacResult<()> {
  let end = ctx.end.ok_or_else(|| BinpacError::InternalError("&chunked requires a &length-bounded field".to_string()))?;
  let u64_ty = env.scalar("u64");
  let chunk_const = env.ir.emit_const_int(u64_ty, chunk_size as i64);

  let loop_blk = env.ir.new_block(ctx.func, "chunk_loop");
  env.ir.set_insert_block(ctx.cur_block);
  env.ir.emit_jump(loop_blk);

  env.ir.set_insert_block(loop_blk);
  let done = env.ir.emit_extern_call("rt_cursor_eq", &[ctx.cur, end]);
  let body_blk = env.ir.new_block(ctx.func, "chunk_body");
  let exit_blk = env.ir.new_block(ctx.func, "chunk_exit");
  env.ir.emit_branch(done, exit_blk, body_blk);

  env.ir.set_insert_block(body_blk);
  ctx.cur_block = body_blk;
  ensure_available_dyn(env, ctx, chunk_const)?;
  let piece = env.ir.emit_extern_call("rt_unpack_bytes", &[ctx.data, ctx.cur, chunk_const]);
  ctx.cur = env.ir.emit_extern_call("rt_cursor_advance", &[ctx.cur, chunk_const]);

  ctx.cur_block = emit_foreach_hook_stop_check(env, ctx, field, piece, exit_blk, "chunk");

  for sink in &field.sinks {
    env.ir.emit_extern_call(&format!("rt_sink_write_{sink}"), &[piece]);
  }
  env.ir.emit_jump(loop_blk);

  env.ir.set_insert_block(exit_blk);
  ctx.cur_block = exit_blk;
  ctx.current_value = None;
  Ok(())
}

fn emit_look_ahead<B: IrBuilder>(env: &mut Env<B>, ctx: &mut EmitCtx<B>, alt_a: &Production, alt_b: &Production, tokens_a: &[Terminal], tokens_b: &[Terminal], default: Option<&Production>) -> BinpacResult<()> {
  ensure_available(env, ctx, 1)?;

  let mut all_tokens = tokens_a.to_vec();
  all_tokens.extend(tokens_b.to_vec());
  let all_sig = env.matcher.init_match(&all_tokens);
  let a_sig = env.matcher.init_match(tokens_a);

  let all_sig_const = env.ir.emit_const_str(&format!("{all_sig:?}"));
  let a_sig_const = env.ir.emit_const_str(&format!("{a_sig:?}"));
  let bool_ty = env.scalar("bool");
  let must_find_const = env.ir.emit_const_int(bool_ty, default.is_none() as i64);

  let dispatch_blk = env.ir.new_block(ctx.func, "lahead_dispatch");
  let ab_dispatch_blk = env.ir.new_block(ctx.func, "lahead_ab_dispatch");
  let a_blk = env.ir.new_block(ctx.func, "lahead_a");
  let b_blk = env.ir.new_block(ctx.func, "lahead_b");
  let default_blk = env.ir.new_block(ctx.func, "lahead_default");
  let join_blk = env.ir.new_block(ctx.func, "lahead_join");

  env.ir.set_insert_block(ctx.cur_block);
  env.ir.emit_jump(dispatch_blk);

  env.ir.set_insert_block(dispatch_blk);
  let token = env.ir.emit_extern_call("rt_lookahead", &[ctx.data, ctx.cur, all_sig_const, must_find_const]);
  let is_none = env.ir.emit_extern_call("rt_is_none_token", &[token]);
  env.ir.emit_branch(is_none, default_blk, ab_dispatch_blk);

  env.ir.set_insert_block(ab_dispatch_blk);
  let in_a = env.ir.emit_extern_call("rt_token_in_set", &[token, a_sig_const]);
  env.ir.emit_branch(in_a, a_blk, b_blk);

  env.ir.set_insert_block(a_blk);
  ctx.cur_block = a_blk;
  ctx.pending_lookahead = Some(token);
  emit_production(env, ctx, alt_a)?;
  ctx.pending_lookahead = None;
  env.ir.set_insert_block(ctx.cur_block);
  env.ir.emit_jump(join_blk);

  env.ir.set_insert_block(b_blk);
  ctx.cur_block = b_blk;
  ctx.pending_lookahead = Some(token);
  emit_production(env, ctx, alt_b)?;
  ctx.pending_lookahead = None;
  env.ir.set_insert_block(ctx.cur_block);
  env.ir.emit_jump(join_blk);

  env.ir.set_insert_block(default_blk);
  ctx.cur_block = default_blk;
  if let Some(d) = default {
    emit_production(env, ctx, d)?;
  }
  env.ir.set_insert_block(ctx.cur_block);
  env.ir.emit_jump(join_blk);

  env.ir.set_insert_block(join_blk);
  ctx.cur_block = join_blk;
  Ok(())
}

fn emit_switch<B: IrBuilder>(env: &mut Env<B>, ctx: &mut EmitCtx<B>, expr: &Expr, cases: &[(i64, Production)], default: Option<&Production>) -> BinpacResult<()> {
  let tag = eval_expr(env, ctx, expr);
  let join_blk = env.ir.new_block(ctx.func, "switch_join");
  let no_match_blk = env.ir.new_block(ctx.func, "switch_no_match");

  let mut test_blk = ctx.cur_block;
  for (i, (tag_value, body)) in cases.iter().enumerate() {
    env.ir.set_insert_block(test_blk);
    let const_ty = env.scalar("i64");
    let const_v = env.ir.emit_const_int(const_ty, *tag_value);
    let eq = env.ir.emit_extern_call("rt_eq", &[tag, const_v]);
    let case_blk = env.ir.new_block(ctx.func, &format!("switch_case_{i}"));
    let next_test_blk = env.ir.new_block(ctx.func, &format!("switch_test_{}", i + 1));
    env.ir.emit_branch(eq, case_blk, next_test_blk);

    env.ir.set_insert_block(case_blk);
    ctx.cur_block = case_blk;
    emit_production(env, ctx, body)?;
    env.ir.set_insert_block(ctx.cur_block);
    env.ir.emit_jump(join_blk);

    test_blk = next_test_blk;
  }

  env.ir.set_insert_block(test_blk);
  match default {
    Some(d) => {
      ctx.cur_block = test_blk;
      emit_production(env, ctx, d)?;
      env.ir.set_insert_block(ctx.cur_block);
      env.ir.emit_jump(join_blk);
    }
    None => env.ir.emit_jump(no_match_blk),
  }

  env.ir.set_insert_block(no_match_blk);
  env.ir.emit_raise(ctx.error_blk, "no matching switch case");

  env.ir.set_insert_block(join_blk);
  ctx.cur_block = join_blk;
  Ok(())
}

fn emit_counter<B: IrBuilder>(env: &mut Env<B>, ctx: &mut EmitCtx<B>, count: &Expr, body: &Production, production: &Production) -> BinpacResult<()> {
  let field = production.meta.field.and_then(|id| find_field(env.unit, id));
  let n = eval_expr(env, ctx, count);
  let container = env.ir.emit_extern_call("rt_container_new", &[]);
  let u64_ty = env.scalar("u64");
  let zero = env.ir.emit_const_int(u64_ty, 0);
  let counter = env.ir.emit_extern_call("rt_counter_new", &[zero]);

  let head_blk = env.ir.new_block(ctx.func, "counter_head");
  let body_blk = env.ir.new_block(ctx.func, "counter_body");
  let exit_blk = env.ir.new_block(ctx.func, "counter_exit");
  env.ir.set_insert_block(ctx.cur_block);
  env.ir.emit_jump(head_blk);

  env.ir.set_insert_block(head_blk);
  let i_val = env.ir.emit_extern_call("rt_counter_get", &[counter]);
  let done = env.ir.emit_extern_call("rt_ge", &[i_val, n]);
  env.ir.emit_branch(done, exit_blk, body_blk);

  env.ir.set_insert_block(body_blk);
  ctx.cur_block = body_blk;
  emit_production(env, ctx, body)?;
  let elem = ctx.current_value;
  if let Some(elem) = elem {
    env.ir.emit_extern_call("rt_container_push", &[container, elem]);
  }
  env.ir.emit_extern_call("rt_counter_incr", &[counter]);
  if let (Some(field), Some(elem)) = (field, elem) {
    ctx.cur_block = emit_foreach_hook_stop_check(env, ctx, field, elem, exit_blk, "counter");
  }
  env.ir.set_insert_block(ctx.cur_block);
  env.ir.emit_jump(head_blk);

  env.ir.set_insert_block(exit_blk);
  ctx.cur_block = exit_blk;
  ctx.current_value = Some(container);
  Ok(())
}

fn emit_byte_block<B: IrBuilder>(env: &mut Env<B>, ctx: &mut EmitCtx<B>, length: &Expr, body: &Production) -> BinpacResult<()> {
  let length_val = eval_expr(env, ctx, length);
  let block_end = env.ir.emit_extern_call("rt_cursor_add", &[ctx.cur, length_val]);
  ensure_available_dyn(env, ctx, length_val)?;
  let container = env.ir.emit_extern_call("rt_container_new", &[]);

  let head_blk = env.ir.new_block(ctx.func, "byteblock_head");
  let body_blk = env.ir.new_block(ctx.func, "byteblock_body");
  let exit_blk = env.ir.new_block(ctx.func, "byteblock_exit");
  env.ir.set_insert_block(ctx.cur_block);
  env.ir.emit_jump(head_blk);

  env.ir.set_insert_block(head_blk);
  let done = env.ir.emit_extern_call("rt_cursor_eq", &[ctx.cur, block_end]);
  env.ir.emit_branch(done, exit_blk, body_blk);

  env.ir.set_insert_block(body_blk);
  ctx.cur_block = body_blk;
  let saved_end = ctx.end;
  ctx.end = Some(block_end);
  emit_production(env, ctx, body)?;
  ctx.end = saved_end;
  if let Some(elem) = ctx.current_value {
    env.ir.emit_extern_call("rt_container_push", &[container, elem]);
  }
  env.ir.set_insert_block(ctx.cur_block);
  env.ir.emit_jump(head_blk);

  env.ir.set_insert_block(exit_blk);
  ctx.cur_block = exit_blk;
  ctx.current_value = Some(container);
  Ok(())
}

/// Repeats `body` until EOD. `eod_ok == false` additionally requires at
/// least one successful iteration, raising otherwise. A `&synchronize`d
/// body catches a parse failure and resumes at the next byte offset the
/// body's start terminals could validly begin, rather than failing the
/// whole unit.
fn emit_loop<B: IrBuilder>(env: &mut Env<B>, ctx: &mut EmitCtx<B>, body: &Production, eod_ok: bool, production: &Production) -> BinpacResult<()> {
  let container = env.ir.emit_extern_call("rt_container_new", &[]);
  let u64_ty = env.scalar("u64");
  let zero = env.ir.emit_const_int(u64_ty, 0);
  let count = env.ir.emit_extern_call("rt_counter_new", &[zero]);

  let head_blk = env.ir.new_block(ctx.func, "loop_head");
  let body_blk = env.ir.new_block(ctx.func, "loop_body");
  let exit_blk = env.ir.new_block(ctx.func, "loop_exit");
  env.ir.set_insert_block(ctx.cur_block);
  env.ir.emit_jump(head_blk);

  env.ir.set_insert_block(head_blk);
  let eod = env.ir.emit_extern_call("rt_is_eod", &[ctx.data, ctx.cur]);
  env.ir.emit_branch(eod, exit_blk, body_blk);

  env.ir.set_insert_block(body_blk);
  ctx.cur_block = body_blk;
  if production.meta.may_synchronize {
    let saved_error_blk = ctx.error_blk;
    let sync_blk = env.ir.new_block(ctx.func, "loop_sync_catch");
    ctx.error_blk = sync_blk;
    emit_production(env, ctx, body)?;
    ctx.error_blk = saved_error_blk;

    let after_body_blk = env.ir.new_block(ctx.func, "loop_after_body");
    env.ir.set_insert_block(ctx.cur_block);
    env.ir.emit_jump(after_body_blk);

    env.ir.set_insert_block(sync_blk);
    let sig_const = env.ir.emit_const_str(&format!("{:?}", Synchronizer::start_terminal_signature(body)));
    let resynced = env.ir.emit_extern_call("rt_synchronize_to", &[ctx.data, ctx.cur, sig_const]);
    ctx.cur = resynced;
    env.ir.emit_jump(head_blk);

    env.ir.set_insert_block(after_body_blk);
    ctx.cur_block = after_body_blk;
  } else {
    emit_production(env, ctx, body)?;
  }

  let elem = ctx.current_value;
  if let Some(elem) = elem {
    env.ir.emit_extern_call("rt_container_push", &[container, elem]);
  }
  env.ir.emit_extern_call("rt_counter_incr", &[count]);
  if let (Some(field), Some(elem)) = (production.meta.field.and_then(|id| find_field(env.unit, id)), elem) {
    ctx.cur_block = emit_foreach_hook_stop_check(env, ctx, field, elem, exit_blk, "loop");
  }
  env.ir.set_insert_block(ctx.cur_block);
  env.ir.emit_jump(head_blk);

  env.ir.set_insert_block(exit_blk);
  ctx.cur_block = exit_blk;

  if !eod_ok {
    let count_val = env.ir.emit_extern_call("rt_counter_get", &[count]);
    let had_any = env.ir.emit_extern_call("rt_gt", &[count_val, zero]);
    let ok_blk = env.ir.new_block(ctx.func, "loop_nonempty_ok");
    let empty_blk = env.ir.new_block(ctx.func, "loop_unexpected_empty");
    env.ir.emit_branch(had_any, ok_blk, empty_blk);

    env.ir.set_insert_block(empty_blk);
    env.ir.emit_raise(ctx.error_blk, "loop produced no elements");

    env.ir.set_insert_block(ok_blk);
    ctx.cur_block = ok_blk;
  }

  ctx.current_value = Some(container);
  Ok(())
}

fn emit_child_grammar<B: IrBuilder>(env: &mut Env<B>, ctx: &mut EmitCtx<B>, unit_id: UnitId, args: &[Expr]) -> BinpacResult<()> {
  let target = env.grammar.get(unit_id).ok_or_else(|| BinpacError::InternalError(format!("child unit {unit_id} not found in grammar store")))?;
  let target_name = target.name.clone();
  let child_pobj = env.ir.emit_extern_call(&format!("rt_new_{target_name}"), &[]);
  for (i, arg) in args.iter().enumerate() {
    let v = eval_expr(env, ctx, arg);
    // Positional: `ChildGrammar` arguments are matched by position, unlike
    // `Unit::params`'s named bindings, since the call site has no name to
    // resolve against.
    env.ir.emit_struct_set(child_pobj, &format!("{}param_{i}", crate::type_layout::RESERVED_PREFIX), v);
  }
  let u64_ty = env.scalar("u64");
  let unbounded = ctx.end.unwrap_or_else(|| env.ir.emit_const_int(u64_ty, -1));
  let new_cur = env.ir.emit_extern_call(&format!("parse_{target_name}_internal"), &[child_pobj, ctx.data, ctx.cur, unbounded]);
  ctx.cur = new_cur;
  ctx.current_value = Some(child_pobj);
  Ok(())
}

fn emit_boolean<B: IrBuilder>(env: &mut Env<B>, ctx: &mut EmitCtx<B>) -> BinpacResult<()> {
  ensure_available(env, ctx, 1)?;
  let value = env.ir.emit_extern_call("rt_unpack_bool", &[ctx.data, ctx.cur]);
  let u64_ty = env.scalar("u64");
  let one = env.ir.emit_const_int(u64_ty, 1);
  ctx.cur = env.ir.emit_extern_call("rt_cursor_advance", &[ctx.cur, one]);
  ctx.current_value = Some(value);
  Ok(())
}

fn emit_while<B: IrBuilder>(env: &mut Env<B>, ctx: &mut EmitCtx<B>, condition: &Expr, body: &Production) -> BinpacResult<()> {
  let container = env.ir.emit_extern_call("rt_container_new", &[]);
  let head_blk = env.ir.new_block(ctx.func, "while_head");
  let body_blk = env.ir.new_block(ctx.func, "while_body");
  let exit_blk = env.ir.new_block(ctx.func, "while_exit");
  env.ir.set_insert_block(ctx.cur_block);
  env.ir.emit_jump(head_blk);

  env.ir.set_insert_block(head_blk);
  ctx.cur_block = head_blk;
  let cond_val = eval_expr(env, ctx, condition);
  env.ir.emit_branch(cond_val, body_blk, exit_blk);

  env.ir.set_insert_block(body_blk);
  ctx.cur_block = body_blk;
  emit_production(env, ctx, body)?;
  if let Some(elem) = ctx.current_value {
    env.ir.emit_extern_call("rt_container_push", &[container, elem]);
  }
  env.ir.set_insert_block(ctx.cur_block);
  env.ir.emit_jump(head_blk);

  env.ir.set_insert_block(exit_blk);
  ctx.cur_block = exit_blk;
  ctx.current_value = Some(container);
  Ok(())
}

/// Pure accessor used directly by `binpac-test` (and, conceptually, by the
/// `itemGet` trampoline a real backend would emit) for a bitfield's named
/// sub-range, since it has no storage of its own: it is computed on demand
/// from the field's raw stored word.
pub fn bit_range_value(storage: u64, field_width_bits: u32, range: &crate::types::BitRange, order: crate::types::BitOrder) -> u64 {
  bitfield::extract(storage, field_width_bits, range, order)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::types::{FieldAttrs, GrammarStore, Hook, HookId, ProductionKind as PK, Unit as CoreUnit, ValueType as VT};
  use binpac_ir::text::TextIrBuilder;

  fn field(name: &str, id_seed: &str, value_type: VT) -> Field {
    Field { id: FieldId::from(id_seed), name: name.into(), value_type, attrs: FieldAttrs::default(), params: Vec::new(), condition: None, sinks: Vec::new(), hooks: Vec::new(), transient: false }
  }

  #[test]
  fn emits_a_two_field_sequence() {
    let x = field("x", "U.x", VT::U16);
    let y = field("y", "U.y", VT::U8);
    let grammar = Production::new(PK::Sequence(vec![Production::new(PK::Variable { field: x.id }).with_field(x.id), Production::new(PK::Variable { field: y.id }).with_field(y.id)]));
    let mut unit = CoreUnit::new("U", grammar);
    unit.items.push(Item::Field(x));
    unit.items.push(Item::Field(y));

    let mut store = GrammarStore::new();
    let uid = store.insert(unit);

    let mut ir = TextIrBuilder::new();
    let mut journal = Journal::new(crate::journal::CodeGenConfig::new());
    let mut layout = TypeLayout::new();
    let mut matcher = LiteralMatcher::new();
    let sync = Synchronizer::new();
    let mut builder = ParserBuilder::new();

    let funcs = builder.emit_unit(&mut ir, &mut journal, &mut layout, &mut matcher, &sync, &store, store.get(uid).unwrap()).unwrap();
    let text = ir.finish();
    assert!(text.contains("declare fn parse_U_internal"));
    assert!(text.contains("declare fn __binpac_new_U"));
    assert!(text.contains("declare fn parse_U("));
    assert!(text.contains("rt_unpack_u16_be"));
    assert!(text.contains("rt_unpack_u8_be"));
    let _ = funcs;
  }

  #[test]
  fn switch_with_no_default_raises_no_matching_case() {
    let tag = field("tag", "S.tag", VT::U8);
    let a = field("a", "S.a", VT::U8);
    let switch = Production::new(PK::Switch { expr: Expr::FieldRef(tag.id), cases: vec![(1, Production::new(PK::Variable { field: a.id }).with_field(a.id))], default: None });
    let grammar = Production::new(PK::Sequence(vec![Production::new(PK::Variable { field: tag.id }).with_field(tag.id), switch]));
    let mut unit = CoreUnit::new("S", grammar);
    unit.items.push(Item::Field(tag));
    unit.items.push(Item::Field(a));

    let mut store = GrammarStore::new();
    let uid = store.insert(unit);

    let mut ir = TextIrBuilder::new();
    let mut journal = Journal::new(crate::journal::CodeGenConfig::new());
    let mut layout = TypeLayout::new();
    let mut matcher = LiteralMatcher::new();
    let sync = Synchronizer::new();
    let mut builder = ParserBuilder::new();
    builder.emit_unit(&mut ir, &mut journal, &mut layout, &mut matcher, &sync, &store, store.get(uid).unwrap()).unwrap();
    let text = ir.finish();
    assert!(text.contains("no matching switch case"));
  }

  #[test]
  fn look_ahead_branch_reparses_the_already_matched_literal() {
    use crate::types::{Terminal, TerminalMatcher};

    let t1 = Terminal { token_id: 1, matcher: TerminalMatcher::Bytes(b"a".to_vec()) };
    let t2 = Terminal { token_id: 2, matcher: TerminalMatcher::Bytes(b"b".to_vec()) };
    let lookahead = Production::new(PK::LookAhead {
      alt_a:    Box::new(Production::new(PK::Literal { terminal: t1.clone() })),
      alt_b:    Box::new(Production::new(PK::Literal { terminal: t2.clone() })),
      tokens_a: vec![t1],
      tokens_b: vec![t2],
      default:  None,
    });
    let mut unit = CoreUnit::new("G", lookahead);
    unit.exported = true;

    let mut store = GrammarStore::new();
    let uid = store.insert(unit);

    let mut ir = TextIrBuilder::new();
    let mut journal = Journal::new(crate::journal::CodeGenConfig::new());
    let mut layout = TypeLayout::new();
    let mut matcher = LiteralMatcher::new();
    let sync = Synchronizer::new();
    let mut builder = ParserBuilder::new();
    builder.emit_unit(&mut ir, &mut journal, &mut layout, &mut matcher, &sync, &store, store.get(uid).unwrap()).unwrap();
    let text = ir.finish();

    // Both branches reparse the token the dispatch already resolved instead
    // of running a fresh `rt_literal_try_*` match.
    assert!(text.contains("rt_literal_reparse_1"));
    assert!(text.contains("rt_literal_reparse_2"));
    assert!(!text.contains("rt_literal_try_1"));
    assert!(!text.contains("rt_literal_try_2"));
  }

  #[test]
  fn loop_runs_the_foreach_hook_and_stops_early() {
    let mut items = field("items", "LH.items", VT::Container(Box::new(VT::U8)));
    let elem = field("elem", "LH.elem", VT::U8);
    items.hooks.push(Hook { id: HookId::from("LH.items.stopper"), priority: 0, group: 0, is_foreach: true, body_ref: "stopper".into() });
    let loop_prod = Production::new(PK::Loop { body: Box::new(Production::new(PK::Variable { field: elem.id }).with_field(elem.id)), eod_ok: true }).with_field(items.id);
    let mut unit = CoreUnit::new("LH", loop_prod);
    unit.items.push(Item::Variable(items));
    unit.items.push(Item::Variable(elem));

    let mut store = GrammarStore::new();
    let uid = store.insert(unit);

    let mut ir = TextIrBuilder::new();
    let mut journal = Journal::new(crate::journal::CodeGenConfig::new());
    let mut layout = TypeLayout::new();
    let mut matcher = LiteralMatcher::new();
    let sync = Synchronizer::new();
    let mut builder = ParserBuilder::new();
    builder.emit_unit(&mut ir, &mut journal, &mut layout, &mut matcher, &sync, &store, store.get(uid).unwrap()).unwrap();
    let text = ir.finish();
    assert!(text.contains("rt_run_foreach_hook_"));
    assert!(text.contains("loop_continue"));
  }

  #[test]
  fn counter_runs_the_foreach_hook_and_stops_early() {
    let mut items = field("items", "CH.items", VT::Container(Box::new(VT::U8)));
    let elem = field("elem", "CH.elem", VT::U8);
    items.hooks.push(Hook { id: HookId::from("CH.items.stopper"), priority: 0, group: 0, is_foreach: true, body_ref: "stopper".into() });
    let counter_prod = Production::new(PK::Counter { count: Expr::ConstInt(4), body: Box::new(Production::new(PK::Variable { field: elem.id }).with_field(elem.id)) }).with_field(items.id);
    let mut unit = CoreUnit::new("CH", counter_prod);
    unit.items.push(Item::Variable(items));
    unit.items.push(Item::Variable(elem));

    let mut store = GrammarStore::new();
    let uid = store.insert(unit);

    let mut ir = TextIrBuilder::new();
    let mut journal = Journal::new(crate::journal::CodeGenConfig::new());
    let mut layout = TypeLayout::new();
    let mut matcher = LiteralMatcher::new();
    let sync = Synchronizer::new();
    let mut builder = ParserBuilder::new();
    builder.emit_unit(&mut ir, &mut journal, &mut layout, &mut matcher, &sync, &store, store.get(uid).unwrap()).unwrap();
    let text = ir.finish();
    assert!(text.contains("rt_run_foreach_hook_"));
    assert!(text.contains("counter_continue"));
  }

  #[test]
  fn loop_without_eod_ok_raises_when_empty() {
    let items = field("items", "L.items", VT::Container(Box::new(VT::U8)));
    let elem = field("elem", "L.elem", VT::U8);
    let loop_prod = Production::new(PK::Loop { body: Box::new(Production::new(PK::Variable { field: elem.id }).with_field(elem.id)), eod_ok: false }).with_field(items.id);
    let mut unit = CoreUnit::new("L", loop_prod);
    unit.items.push(Item::Variable(items));
    unit.items.push(Item::Variable(elem));

    let mut store = GrammarStore::new();
    let uid = store.insert(unit);

    let mut ir = TextIrBuilder::new();
    let mut journal = Journal::new(crate::journal::CodeGenConfig::new());
    let mut layout = TypeLayout::new();
    let mut matcher = LiteralMatcher::new();
    let sync = Synchronizer::new();
    let mut builder = ParserBuilder::new();
    builder.emit_unit(&mut ir, &mut journal, &mut layout, &mut matcher, &sync, &store, store.get(uid).unwrap()).unwrap();
    let text = ir.finish();
    assert!(text.contains("loop produced no elements"));
  }
}
