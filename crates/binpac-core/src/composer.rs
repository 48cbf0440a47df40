//! Emits `compose_<unit>`, the serializer that writes a parse object's
//! fields back out as bytes, mirroring [crate::parser_builder::ParserBuilder]
//! field-for-field.
//!
//! Not every production a grammar can express survives a round trip: a
//! [ProductionKind::LookAhead] only records which value it produced, not
//! which alternative path produced it, so there is no way to know which
//! terminal to re-emit; a `&chunked` field discards every piece once its
//! hook has run, so nothing is left to serialize. [Composer::check_unit]
//! walks the whole grammar up front and collects every such site, so a
//! caller gets one [BinpacError::Many] naming every offending field rather
//! than a partial, silently-wrong composer.
use crate::{
  journal::Journal,
  type_layout::TypeLayout,
  types::{BinpacError, BinpacResult, Expr, Field, FieldId, GrammarStore, Item, ParseErrorKind, Production, ProductionKind, Unit, UnitId, ValueType},
};
use binpac_ir::IrBuilder;
use std::collections::HashMap;

struct ComposeCtx<B: IrBuilder> {
  func:      B::Func,
  pobj:      B::Value,
  sink:      B::Value,
  error_blk: B::Block,
  cur_block: B::Block,
}

struct Env<'a, B: IrBuilder> {
  ir:      &'a mut B,
  layout:  &'a mut TypeLayout<B>,
  grammar: &'a GrammarStore,
  unit:    &'a Unit,
  scalars: &'a mut HashMap<String, B::Type>,
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
pub struct Composer<B: IrBuilder> {
  scalars: HashMap<String, B::Type>,
}

impl<B: IrBuilder> Composer<B> {
  pub fn new() -> Self {
    Self { scalars: HashMap::new() }
  }

  /// Collects every field whose production this composer cannot invert.
  /// Returns `Ok(())` if the unit is fully composable.
  pub fn check_unit(unit: &Unit) -> BinpacResult<()> {
    let mut problems = Vec::new();
    Self::walk_check(&unit.grammar, unit, &mut problems);
    if problems.is_empty() {
      Ok(())
    } else {
      Err(BinpacError::Many {
        message: format!("unit {} has fields the composer cannot serialize", unit.name),
        errors:  problems,
      })
    }
  }

  fn walk_check(production: &Production, unit: &Unit, problems: &mut Vec<BinpacError>) {
    if let Some(field_id) = production.meta.field {
      if let Some(field) = find_field(unit, field_id) {
        if field.attrs.chunked.is_some() {
          problems.push(BinpacError::ComposeError {
            unit:       unit.id,
            production: production.meta.symbol,
            message:    format!("field `{}` is &chunked; its pieces are discarded after their hook runs and cannot be recomposed", field.name),
          });
        }
      }
    }
    match &production.kind {
      ProductionKind::LookAhead { .. } => {
        problems.push(BinpacError::ComposeError {
          unit:       unit.id,
          production: production.meta.symbol,
          message:    "look-ahead alternatives do not record which branch produced the stored value".to_string(),
        });
      }
      ProductionKind::Sequence(children) => children.iter().for_each(|c| Self::walk_check(c, unit, problems)),
      ProductionKind::Switch { cases, default, .. } => {
        for (_, body) in cases {
          Self::walk_check(body, unit, problems);
        }
        if let Some(d) = default {
          Self::walk_check(d, unit, problems);
        }
      }
      ProductionKind::Counter { body, .. } | ProductionKind::ByteBlock { body, .. } | ProductionKind::Enclosure { child: body } => Self::walk_check(body, unit, problems),
      ProductionKind::Loop { body, .. } => Self::walk_check(body, unit, problems),
      ProductionKind::While { body, .. } => Self::walk_check(body, unit, problems),
      _ => {}
    }
  }

  /// Emits `compose_<unit>(pobj, sink) -> bool`. Callers must run
  /// [Self::check_unit] first; this does not re-check.
  pub fn emit_unit(&mut self, ir: &mut B, journal: &mut Journal, layout: &mut TypeLayout<B>, grammar: &GrammarStore, unit: &Unit) -> BinpacResult<B::Func> {
    journal.start_timer("composer");
    let _ = layout.struct_type(unit.id);

    let mut env = Env { ir, layout, grammar, unit, scalars: &mut self.scalars };
    let pobj_ty = env.layout.struct_type(unit.id);
    let ptr_ty = env.scalar("ptr");
    let bool_ty = env.scalar("bool");

    let func = env.ir.declare_func(&format!("compose_{}", unit.name), &[pobj_ty, ptr_ty], bool_ty);
    let entry = env.ir.new_block(func, "entry");
    let error_blk = env.ir.new_block(func, "error");
    env.ir.set_insert_block(entry);
    let pobj = env.ir.func_param(func, 0);
    let sink = env.ir.func_param(func, 1);

    let mut ctx = ComposeCtx { func, pobj, sink, error_blk, cur_block: entry };
    emit_production(&mut env, &mut ctx, &unit.grammar)?;

    env.ir.set_insert_block(ctx.cur_block);
    let ok = env.ir.emit_const_int(bool_ty, 1);
    env.ir.emit_return(Some(ok));

    env.ir.set_insert_block(error_blk);
    env.ir.emit_trace("compose-error", &format!("{} failed to compose", unit.name));
    let fail = env.ir.emit_const_int(bool_ty, 0);
    env.ir.emit_return(Some(fail));

    journal.stop_timer("composer");
    Ok(func)
  }
}

fn find_field(unit: &Unit, id: FieldId) -> Option<&Field> {
  unit.items.iter().find_map(|item| match item {
    Item::Field(f) | Item::Variable(f) if f.id == id => Some(f),
    _ => None,
  })
}

fn eval_expr<B: IrBuilder>(env: &mut Env<B>, ctx: &mut ComposeCtx<B>, expr: &Expr) -> B::Value {
  match expr {
    Expr::ConstInt(v) => {
      let ty = env.scalar("i64");
      env.ir.emit_const_int(ty, *v)
    }
    Expr::ConstBytes(bytes) => env.ir.emit_const_str(&String::from_utf8_lossy(bytes)),
    // `$$` has no referent during compose: there is no production actively
    // producing a value, only fields being read back out of `pobj`. A
    // `&default`/condition expression that uses it is therefore opaque to
    // this composer and is left for the runtime to resolve.
    Expr::CurrentValue => env.ir.emit_extern_call("rt_compose_current_value_unsupported", &[ctx.pobj]),
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

fn emit_production<B: IrBuilder>(env: &mut Env<B>, ctx: &mut ComposeCtx<B>, production: &Production) -> BinpacResult<()> {
  if let Some(field_id) = production.meta.field {
    let field = find_field(env.unit, field_id).ok_or_else(|| BinpacError::InternalError(format!("field {field_id} not found in unit {}", env.unit.name)))?.clone();
    if field.transient {
      return Ok(());
    }
    if let Some(cond) = field.condition.clone() {
      let cond_val = eval_expr(env, ctx, &cond);
      let then_blk = env.ir.new_block(ctx.func, "compose_field_then");
      let join_blk = env.ir.new_block(ctx.func, "compose_field_join");
      env.ir.set_insert_block(ctx.cur_block);
      env.ir.emit_branch(cond_val, then_blk, join_blk);

      env.ir.set_insert_block(then_blk);
      ctx.cur_block = then_blk;
      emit_field_value(env, ctx, production, &field)?;
      env.ir.set_insert_block(ctx.cur_block);
      env.ir.emit_jump(join_blk);

      env.ir.set_insert_block(join_blk);
      ctx.cur_block = join_blk;
      return Ok(());
    }
    return emit_field_value(env, ctx, production, &field);
  }
  emit_bare(env, ctx, production)
}

fn emit_field_value<B: IrBuilder>(env: &mut Env<B>, ctx: &mut ComposeCtx<B>, production: &Production, field: &Field) -> BinpacResult<()> {
  let (value, new_block) = env.layout.get(env.ir, ctx.func, ctx.cur_block, ctx.error_blk, ctx.pobj, env.unit.id, field.id);
  ctx.cur_block = new_block;
  emit_value_write(env, ctx, production, field, value)
}

/// Writes a single already-resolved field value to the sink, choosing the
/// pack routine by the field's `ValueType`. `production` only matters for
/// `UnitRef`/container kinds, which recurse rather than pack a scalar
/// directly.
fn emit_value_write<B: IrBuilder>(env: &mut Env<B>, ctx: &mut ComposeCtx<B>, production: &Production, field: &Field, value: B::Value) -> BinpacResult<()> {
  match &field.value_type {
    ValueType::UnitRef(target_id) => {
      let target = env.grammar.get(*target_id).ok_or_else(|| BinpacError::InternalError(format!("unit {target_id} not found in grammar store")))?;
      let ok = env.ir.emit_extern_call(&format!("compose_{}", target.name), &[value, ctx.sink]);
      let ok_blk = env.ir.new_block(ctx.func, "compose_child_ok");
      env.ir.set_insert_block(ctx.cur_block);
      env.ir.emit_branch(ok, ok_blk, ctx.error_blk);
      env.ir.set_insert_block(ok_blk);
      ctx.cur_block = ok_blk;
      Ok(())
    }
    ValueType::Bytes => {
      env.ir.emit_extern_call("rt_pack_bytes", &[ctx.sink, value]);
      Ok(())
    }
    ValueType::Container(elem_ty) => emit_container_write(env, ctx, production, elem_ty, value),
    ValueType::Tuple(members) => {
      for (i, member) in members.iter().enumerate() {
        let part = env.ir.emit_extern_call("rt_tuple_get", &[value, {
          let idx_ty = env.scalar("u64");
          env.ir.emit_const_int(idx_ty, i as i64)
        }]);
        let name = format!("rt_pack_{}_{}", member.scalar_ir_name(), byteorder_suffix(field.attrs.byteorder));
        env.ir.emit_extern_call(&name, &[ctx.sink, part]);
      }
      Ok(())
    }
    ValueType::Sink => Ok(()),
    other => {
      let name = format!("rt_pack_{}_{}", scalar_storage_name(other), byteorder_suffix(field.attrs.byteorder));
      env.ir.emit_extern_call(&name, &[ctx.sink, value]);
      Ok(())
    }
  }
}

fn scalar_storage_name(ty: &ValueType) -> &'static str {
  match ty {
    ValueType::Bitfield { storage, .. } => scalar_storage_name(storage),
    other => other.scalar_ir_name(),
  }
}

fn byteorder_suffix(order: crate::types::ByteOrder) -> &'static str {
  match order {
    crate::types::ByteOrder::Big => "be",
    crate::types::ByteOrder::Little => "le",
  }
}

/// Writes every element of a `Counter`/`Loop`/`ByteBlock`/`While` container,
/// packing each element by the element type rather than by re-descending
/// into the production tree, since the composer has no input cursor to walk
/// alongside.
fn emit_container_write<B: IrBuilder>(env: &mut Env<B>, ctx: &mut ComposeCtx<B>, _production: &Production, elem_ty: &ValueType, container: B::Value) -> BinpacResult<()> {
  let count = env.ir.emit_extern_call("rt_container_len", &[container]);
  let u64_ty = env.scalar("u64");
  let zero = env.ir.emit_const_int(u64_ty, 0);
  let idx = env.ir.emit_extern_call("rt_counter_new", &[zero]);

  let head_blk = env.ir.new_block(ctx.func, "compose_elem_head");
  let body_blk = env.ir.new_block(ctx.func, "compose_elem_body");
  let exit_blk = env.ir.new_block(ctx.func, "compose_elem_exit");
  env.ir.set_insert_block(ctx.cur_block);
  env.ir.emit_jump(head_blk);

  env.ir.set_insert_block(head_blk);
  let i_val = env.ir.emit_extern_call("rt_counter_get", &[idx]);
  let done = env.ir.emit_extern_call("rt_ge", &[i_val, count]);
  env.ir.emit_branch(done, exit_blk, body_blk);

  env.ir.set_insert_block(body_blk);
  ctx.cur_block = body_blk;
  let elem = env.ir.emit_extern_call("rt_container_get", &[container, i_val]);
  match elem_ty {
    ValueType::UnitRef(target_id) => {
      // Resolved lazily by name through an extern call, since this helper
      // doesn't have direct `GrammarStore` access to the target unit's name.
      let target_const = env.ir.emit_const_int({
        let ty = env.scalar("u64");
        ty
      }, target_id.0 as i64);
      env.ir.emit_extern_call("rt_compose_unit_ref", &[elem, ctx.sink, target_const]);
    }
    other => {
      let name = format!("rt_pack_{}_be", scalar_storage_name(other));
      env.ir.emit_extern_call(&name, &[ctx.sink, elem]);
    }
  }
  env.ir.emit_extern_call("rt_counter_incr", &[idx]);
  env.ir.set_insert_block(ctx.cur_block);
  env.ir.emit_jump(head_blk);

  env.ir.set_insert_block(exit_blk);
  ctx.cur_block = exit_blk;
  Ok(())
}

fn emit_bare<B: IrBuilder>(env: &mut Env<B>, ctx: &mut ComposeCtx<B>, production: &Production) -> BinpacResult<()> {
  match &production.kind {
    ProductionKind::Epsilon | ProductionKind::Boolean => Ok(()),
    ProductionKind::Literal { terminal } => {
      env.ir.emit_extern_call(&format!("rt_pack_literal_{}", terminal.token_id), &[ctx.sink]);
      Ok(())
    }
    ProductionKind::Variable { .. } => Ok(()),
    ProductionKind::Sequence(children) => {
      for child in children {
        emit_production(env, ctx, child)?;
      }
      Ok(())
    }
    ProductionKind::Switch { expr, cases, default } => {
      let tag = eval_expr(env, ctx, expr);
      let join_blk = env.ir.new_block(ctx.func, "compose_switch_join");
      let mut test_blk = ctx.cur_block;
      for (i, (tag_value, body)) in cases.iter().enumerate() {
        env.ir.set_insert_block(test_blk);
        let const_ty = env.scalar("i64");
        let const_v = env.ir.emit_const_int(const_ty, *tag_value);
        let eq = env.ir.emit_extern_call("rt_eq", &[tag, const_v]);
        let case_blk = env.ir.new_block(ctx.func, &format!("compose_switch_case_{i}"));
        let next_blk = env.ir.new_block(ctx.func, &format!("compose_switch_test_{}", i + 1));
        env.ir.emit_branch(eq, case_blk, next_blk);

        env.ir.set_insert_block(case_blk);
        ctx.cur_block = case_blk;
        emit_production(env, ctx, body)?;
        env.ir.set_insert_block(ctx.cur_block);
        env.ir.emit_jump(join_blk);

        test_blk = next_blk;
      }
      env.ir.set_insert_block(test_blk);
      ctx.cur_block = test_blk;
      if let Some(d) = default {
        emit_production(env, ctx, d)?;
      }
      env.ir.set_insert_block(ctx.cur_block);
      env.ir.emit_jump(join_blk);

      env.ir.set_insert_block(join_blk);
      ctx.cur_block = join_blk;
      Ok(())
    }
    ProductionKind::Counter { body, .. } | ProductionKind::ByteBlock { body, .. } | ProductionKind::Enclosure { child: body } => emit_production(env, ctx, body),
    ProductionKind::Loop { body, .. } => emit_production(env, ctx, body),
    ProductionKind::While { body, .. } => emit_production(env, ctx, body),
    ProductionKind::ChildGrammar { unit, args } => {
      let target = env.grammar.get(*unit).ok_or_else(|| BinpacError::InternalError(format!("child unit {unit} not found in grammar store")))?;
      let target_name = target.name.clone();
      for arg in args {
        eval_expr(env, ctx, arg);
      }
      let placeholder_ptr = env.scalar("ptr");
      let _ = placeholder_ptr;
      env.ir.emit_extern_call(&format!("compose_{target_name}"), &[ctx.pobj, ctx.sink]);
      Ok(())
    }
    ProductionKind::LookAhead { .. } => Err(BinpacError::parse(ParseErrorKind::AmbiguousLookAhead, env.unit.id, "look-ahead productions are not composable; run Composer::check_unit first")),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::types::{FieldAttrs, ProductionKind as PK, Unit as CoreUnit, ValueType as VT};
  use binpac_ir::text::TextIrBuilder;

  fn field(name: &str, id_seed: &str, value_type: VT) -> Field {
    Field { id: FieldId::from(id_seed), name: name.into(), value_type, attrs: FieldAttrs::default(), params: Vec::new(), condition: None, sinks: Vec::new(), hooks: Vec::new(), transient: false }
  }

  #[test]
  fn composes_a_two_field_sequence() {
    let x = field("x", "CU.x", VT::U16);
    let y = field("y", "CU.y", VT::U8);
    let grammar = Production::new(PK::Sequence(vec![Production::new(PK::Variable { field: x.id }).with_field(x.id), Production::new(PK::Variable { field: y.id }).with_field(y.id)]));
    let mut unit = CoreUnit::new("CU", grammar);
    unit.items.push(Item::Field(x));
    unit.items.push(Item::Field(y));
    Composer::<TextIrBuilder>::check_unit(&unit).unwrap();

    let mut store = GrammarStore::new();
    let uid = store.insert(unit);

    let mut ir = TextIrBuilder::new();
    let mut journal = Journal::new(crate::journal::CodeGenConfig::new());
    let mut layout = TypeLayout::new();
    layout.layout_of(&mut ir, &mut journal, &store, store.get(uid).unwrap());
    let mut composer = Composer::new();
    composer.emit_unit(&mut ir, &mut journal, &mut layout, &store, store.get(uid).unwrap()).unwrap();
    let text = ir.finish();
    assert!(text.contains("declare fn compose_CU"));
    assert!(text.contains("rt_pack_u16_be"));
  }

  #[test]
  fn lookahead_fields_are_rejected_up_front() {
    let a = field("a", "LA.a", VT::U8);
    let lahead = Production::new(PK::LookAhead {
      alt_a:    Box::new(Production::new(PK::Variable { field: a.id }).with_field(a.id)),
      alt_b:    Box::new(Production::new(PK::Epsilon)),
      tokens_a: Vec::new(),
      tokens_b: Vec::new(),
      default:  None,
    });
    let unit = CoreUnit::new("LA", lahead);
    let err = Composer::<TextIrBuilder>::check_unit(&unit).unwrap_err();
    assert!(matches!(err, BinpacError::Many { .. }));
  }
}
