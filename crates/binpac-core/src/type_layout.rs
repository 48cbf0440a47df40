//! Maps source types to IR struct layouts and resolves `(unit, field)` to the
//! index path that navigates to its slot, per spec §4.1.
//!
//! Switch-case storage is simplified relative to the source design: rather
//! than a discriminated union arm, a case with more than one field gets a
//! single nested-struct slot (built with [IrBuilder::declare_struct], which
//! can never appear in a cycle since cases don't recurse into their own
//! unit), and a case with exactly one field stores that field directly as a
//! top-level slot. Per-object set/unset tracking already comes from the
//! bitmask (below), so this costs nothing in correctness and avoids modeling
//! a discriminant the target [IrBuilder] has no primitive for.
use crate::{
  journal::Journal,
  types::{BinpacError, Field, FieldId, GrammarStore, Item, Production, ProductionKind, Unit, UnitId, ValueType},
};
use binpac_ir::IrBuilder;
use std::collections::HashMap;

/// Reserved prefix for every internally synthesized slot name. The name
/// mangler (not user discipline) is what guarantees user identifiers can
/// never collide with these (spec §9, "Reserved slot names").
pub const RESERVED_PREFIX: &str = "__binpac_";

pub const BITMASK_SLOT: &str = "__binpac_bitmask";

/// One ordered field-path entry used to build a unit's runtime type-info
/// record (spec §4.1, "Type-info emission").
#[derive(Debug, Clone)]
pub struct TypeInfoEntry {
  pub name:      String,
  pub path:      Vec<String>,
  pub removable: bool,
}

struct UnitLayout<B: IrBuilder> {
  struct_type:   B::Type,
  /// `(unit, field) -> path` index resolver (spec: "field-path resolver").
  field_paths:   HashMap<FieldId, Vec<String>>,
  /// Reserved fallback slot name for fields carrying `&default`.
  default_slots: HashMap<FieldId, String>,
  bit_index:     HashMap<FieldId, u32>,
  type_info:     Vec<TypeInfoEntry>,
}

pub struct TypeLayout<B: IrBuilder> {
  units:        HashMap<UnitId, UnitLayout<B>>,
  scalar_cache: HashMap<String, B::Type>,
  field_types:  HashMap<FieldId, B::Type>,
}

impl<B: IrBuilder> Default for TypeLayout<B> {
  fn default() -> Self {
    Self { units: HashMap::new(), scalar_cache: HashMap::new(), field_types: HashMap::new() }
  }
}

impl<B: IrBuilder> TypeLayout<B> {
  pub fn new() -> Self {
    Self::default()
  }

  fn scalar(&mut self, b: &mut B, name: &str) -> B::Type {
    if let Some(t) = self.scalar_cache.get(name) {
      return *t;
    }
    let t = b.scalar_type(name);
    self.scalar_cache.insert(name.to_string(), t);
    t
  }

  /// Lowers a field's [ValueType] to an IR storage type. `UnitRef` recurses
  /// through [Self::layout_of], which is what breaks cyclic grammars (spec
  /// §9): the target unit's struct handle is forward-declared before its own
  /// fields are populated, so a self-referencing field resolves immediately.
  fn value_ir_type(&mut self, b: &mut B, journal: &mut Journal, grammar: &GrammarStore, ty: &ValueType) -> B::Type {
    match ty {
      ValueType::Bitfield { storage, .. } => self.value_ir_type(b, journal, grammar, storage),
      ValueType::Tuple(members) => {
        let member_types: Vec<B::Type> = members.iter().map(|m| self.value_ir_type(b, journal, grammar, m)).collect();
        let sig = member_types.iter().map(|t| format!("{t:?}")).collect::<Vec<_>>().join(",");
        let name = format!("{RESERVED_PREFIX}tuple_{sig}");
        if let Some(t) = self.scalar_cache.get(&name) {
          return *t;
        }
        let fields: Vec<(String, B::Type)> = member_types.iter().enumerate().map(|(i, t)| (format!("m{i}"), *t)).collect();
        let t = b.declare_struct(&name, &fields);
        self.scalar_cache.insert(name, t);
        t
      }
      ValueType::UnitRef(unit_id) => match grammar.get(*unit_id) {
        Some(unit) => self.layout_of(b, journal, grammar, unit),
        None => {
          journal.error(BinpacError::InternalError(format!("unit reference {unit_id} not found in grammar store")));
          self.scalar(b, "ptr")
        }
      },
      ValueType::Container(inner) => {
        let _ = self.value_ir_type(b, journal, grammar, inner);
        self.scalar(b, "ptr")
      }
      other => self.scalar(b, other.scalar_ir_name()),
    }
  }

  fn field_ir_type(&mut self, b: &mut B, journal: &mut Journal, grammar: &GrammarStore, field: &Field) -> B::Type {
    if let Some(t) = self.field_types.get(&field.id) {
      return *t;
    }
    let t = self.value_ir_type(b, journal, grammar, &field.value_type);
    self.field_types.insert(field.id, t);
    t
  }

  /// Groups of fields laid out inside a single switch case, gathered by
  /// walking the unit's grammar tree for `Switch` nodes.
  fn switch_case_groups(unit: &Unit) -> Vec<(String, i64, Vec<FieldId>)> {
    let mut groups = Vec::new();
    fn walk(prod: &Production, groups: &mut Vec<(String, i64, Vec<FieldId>)>) {
      match &prod.kind {
        ProductionKind::Switch { cases, default, .. } => {
          for (tag, body) in cases {
            let mut fields = Vec::new();
            collect_fields(body, &mut fields);
            groups.push((prod.meta.symbol.to_string(), *tag, fields));
          }
          if let Some(d) = default {
            let mut fields = Vec::new();
            collect_fields(d, &mut fields);
            groups.push((prod.meta.symbol.to_string(), i64::MIN, fields));
          }
        }
        ProductionKind::Sequence(children) => children.iter().for_each(|c| walk(c, groups)),
        ProductionKind::LookAhead { alt_a, alt_b, default, .. } => {
          walk(alt_a, groups);
          walk(alt_b, groups);
          if let Some(d) = default {
            walk(d, groups);
          }
        }
        ProductionKind::Counter { body, .. } | ProductionKind::ByteBlock { body, .. } | ProductionKind::Enclosure { child: body } => walk(body, groups),
        ProductionKind::Loop { body, .. } => walk(body, groups),
        ProductionKind::While { body, .. } => walk(body, groups),
        _ => {}
      }
    }
    /// Direct (non-recursive-into-nested-switch) field collection: a nested
    /// switch's own cases get their own grouping entries when `walk` reaches
    /// them, so they are intentionally not flattened in here too.
    fn collect_fields(prod: &Production, out: &mut Vec<FieldId>) {
      match &prod.kind {
        ProductionKind::Variable { field } => out.push(*field),
        ProductionKind::Sequence(children) => children.iter().for_each(|c| collect_fields(c, out)),
        ProductionKind::Counter { body, .. } | ProductionKind::ByteBlock { body, .. } | ProductionKind::Enclosure { child: body } => collect_fields(body, out),
        ProductionKind::Loop { body, .. } => collect_fields(body, out),
        ProductionKind::While { body, .. } => collect_fields(body, out),
        _ => {}
      }
    }
    walk(&unit.grammar, &mut groups);
    groups
  }

  /// Deterministic (spec §8 invariant 1, "layout stability"): building the
  /// same unit twice in one or separate compilations always produces the
  /// same field ordering and the same path tuples, since both derive solely
  /// from `unit.items`'s declaration order.
  pub fn layout_of(&mut self, b: &mut B, journal: &mut Journal, grammar: &GrammarStore, unit: &Unit) -> B::Type {
    if let Some(layout) = self.units.get(&unit.id) {
      return layout.struct_type;
    }

    // Forward-declare immediately so a field that refers back to this unit
    // (directly, or transitively through another unit) resolves to this
    // handle instead of recursing forever.
    let struct_type = b.declare_struct_forward(&unit.name);
    self.units.insert(unit.id, UnitLayout {
      struct_type,
      field_paths: HashMap::new(),
      default_slots: HashMap::new(),
      bit_index: HashMap::new(),
      type_info: Vec::new(),
    });

    journal.start_timer("type_layout");

    let mut fields: Vec<(String, B::Type)> = Vec::new();
    let mut field_paths = HashMap::new();
    let mut default_slots = HashMap::new();
    let mut bit_index = HashMap::new();
    let mut type_info = Vec::new();
    let mut next_bit = 0u32;

    let bitmask_ty = self.scalar(b, "u64");
    fields.push((BITMASK_SLOT.to_string(), bitmask_ty));

    let ptr_ty = self.scalar(b, "ptr");
    for (name, _) in &unit.params {
      fields.push((format!("{RESERVED_PREFIX}param_{name}"), ptr_ty));
    }
    if unit.buffering {
      let iter_ty = self.scalar(b, "u64");
      fields.push((format!("{RESERVED_PREFIX}buf_start"), iter_ty));
      fields.push((format!("{RESERVED_PREFIX}buf_end"), iter_ty));
    }
    if unit.exported {
      fields.push((format!("{RESERVED_PREFIX}descriptor"), ptr_ty));
      fields.push((format!("{RESERVED_PREFIX}sink"), ptr_ty));
      fields.push((format!("{RESERVED_PREFIX}mime_type"), ptr_ty));
      fields.push((format!("{RESERVED_PREFIX}filter_head"), ptr_ty));
      fields.push((format!("{RESERVED_PREFIX}filter_state"), ptr_ty));
    }

    // Which fields are grouped under a multi-field switch case, and under
    // which synthetic case-struct name.
    let mut grouped_under: HashMap<FieldId, String> = HashMap::new();
    for (symbol, tag, case_fields) in Self::switch_case_groups(unit) {
      if case_fields.len() > 1 {
        let case_name = format!("{RESERVED_PREFIX}case_{symbol}_{tag}");
        grouped_under.extend(case_fields.into_iter().map(|f| (f, case_name.clone())));
      }
    }

    // Pre-pass: per grouped case name, collect its member fields in
    // unit.items order so the nested struct's own layout is deterministic.
    let mut case_members: HashMap<String, Vec<&Field>> = HashMap::new();
    for item in &unit.items {
      if let Item::Field(field) | Item::Variable(field) = item {
        if let Some(case_name) = grouped_under.get(&field.id) {
          case_members.entry(case_name.clone()).or_default().push(field);
        }
      }
    }

    let mut emitted_case: std::collections::HashSet<String> = std::collections::HashSet::new();

    for item in &unit.items {
      let field = match item {
        Item::Field(field) | Item::Variable(field) => field,
        Item::Property { .. } | Item::GlobalHook { .. } => continue,
      };
      if field.transient {
        continue;
      }

      if let Some(case_name) = grouped_under.get(&field.id) {
        if emitted_case.insert(case_name.clone()) {
          let members = case_members.get(case_name).cloned().unwrap_or_default();
          let mut case_fields = Vec::new();
          for m in &members {
            let ty = self.field_ir_type(b, journal, grammar, m);
            case_fields.push((m.name.clone(), ty));
          }
          let case_type = b.declare_struct(case_name, &case_fields);
          fields.push((case_name.clone(), case_type));
          for m in &members {
            field_paths.insert(m.id, vec![case_name.clone(), m.name.clone()]);
            bit_index.insert(m.id, next_bit);
            next_bit += 1;
            type_info.push(TypeInfoEntry { name: m.name.clone(), path: vec![case_name.clone(), m.name.clone()], removable: false });
          }
        }
        continue;
      }

      let ty = self.field_ir_type(b, journal, grammar, field);
      fields.push((field.name.clone(), ty));
      field_paths.insert(field.id, vec![field.name.clone()]);
      bit_index.insert(field.id, next_bit);
      next_bit += 1;
      type_info.push(TypeInfoEntry { name: field.name.clone(), path: vec![field.name.clone()], removable: false });

      if field.attrs.default.is_some() {
        let default_name = format!("{RESERVED_PREFIX}default_{}", field.name);
        fields.push((default_name.clone(), ty));
        default_slots.insert(field.id, default_name.clone());
        type_info.push(TypeInfoEntry { name: default_name, path: vec![field.name.clone()], removable: true });
      }
    }

    b.define_struct_fields(struct_type, &fields);
    journal.stop_timer("type_layout");

    let layout = self.units.get_mut(&unit.id).expect("just inserted");
    layout.field_paths = field_paths;
    layout.default_slots = default_slots;
    layout.bit_index = bit_index;
    layout.type_info = type_info;

    struct_type
  }

  fn layout(&self, unit: UnitId) -> &UnitLayout<B> {
    self.units.get(&unit).expect("layout_of must be called before get/set/isSet/unset/path")
  }

  /// `(unit, field) -> index sequence`, exposed for structural introspection
  /// by the host runtime.
  pub fn path(&self, unit: UnitId, field: FieldId) -> Option<&[String]> {
    self.layout(unit).field_paths.get(&field).map(Vec::as_slice)
  }

  pub fn type_info(&self, unit: UnitId) -> &[TypeInfoEntry] {
    &self.layout(unit).type_info
  }

  fn bit_const(&mut self, b: &mut B, bit: u32) -> B::Value {
    let u64_ty = self.scalar(b, "u64");
    b.emit_const_int(u64_ty, 1i64 << bit)
  }

  /// Emits the struct-get sequence described by a field's path, honoring the
  /// `&default` fallback: if the slot's bit is unset and a default slot
  /// exists, the default slot is read instead; if neither, a `raise` to
  /// `UndefinedValue` is emitted on the unset path before the value is ever
  /// navigated to. Transient fields never reach here: callers must consult
  /// `field.transient` and substitute the type's own default directly.
  ///
  /// `cur_block` is the caller's active insert point; `func`/`error_blk` let
  /// this method open its own guard blocks and raise into the caller's error
  /// block the same way [IrBuilder]-emitting call sites do elsewhere in this
  /// crate. Returns the value together with the block the caller's insert
  /// point now lives in — callers must adopt it as their own `cur_block`,
  /// since a guard branch may have moved it off `cur_block`.
  pub fn get(&mut self, b: &mut B, func: B::Func, cur_block: B::Block, error_blk: B::Block, pobj: B::Value, unit: UnitId, field: FieldId) -> (B::Value, B::Block) {
    let layout = self.units.get(&unit).expect("layout_of must run first");
    let path = layout.field_paths.get(&field).cloned().unwrap_or_default();
    let default_slot = layout.default_slots.get(&field).cloned();
    let bit = layout.bit_index.get(&field).copied();

    if let Some(bit) = bit {
      b.set_insert_block(cur_block);
      let mask_val = b.emit_struct_get(pobj, BITMASK_SLOT);
      let bit_const = self.bit_const(b, bit);
      let is_set = b.emit_extern_call("rt_bitmask_test", &[mask_val, bit_const]);
      if let Some(default_name) = default_slot {
        let default_val = b.emit_struct_get(pobj, &default_name);
        let primary = Self::navigate(b, pobj, &path);
        let value = b.emit_extern_call("rt_select", &[is_set, primary, default_val]);
        return (value, cur_block);
      }

      let ok_blk = b.new_block(func, "undefined_value_ok");
      let raise_blk = b.new_block(func, "undefined_value_raise");
      b.emit_branch(is_set, ok_blk, raise_blk);

      b.set_insert_block(raise_blk);
      b.emit_raise(error_blk, &format!("undefined value for field {field}"));

      b.set_insert_block(ok_blk);
      let value = Self::navigate(b, pobj, &path);
      return (value, ok_blk);
    }
    (Self::navigate(b, pobj, &path), cur_block)
  }

  fn navigate(b: &mut B, pobj: B::Value, path: &[String]) -> B::Value {
    let mut cur = pobj;
    for step in path {
      cur = b.emit_struct_get(cur, step);
    }
    cur
  }

  /// Writes `value` through the field's path, lazily allocating the
  /// switch-case struct slot it lives in (per the case's first field written
  /// — tracked identically for every member via the shared bitmask, so the
  /// generator simply always sets through the already-forward-declared
  /// struct slot).
  pub fn set(&mut self, b: &mut B, pobj: B::Value, unit: UnitId, field: FieldId, value: B::Value) {
    let layout = self.units.get(&unit).expect("layout_of must run first");
    let path = layout.field_paths.get(&field).cloned().unwrap_or_default();
    let bit = layout.bit_index.get(&field).copied();

    match path.len() {
      0 => {}
      1 => b.emit_struct_set(pobj, &path[0], value),
      _ => {
        let container = b.emit_struct_get(pobj, &path[0]);
        b.emit_struct_set(container, &path[1], value);
      }
    }

    if let Some(bit) = bit {
      let mask_val = b.emit_struct_get(pobj, BITMASK_SLOT);
      let bit_const = self.bit_const(b, bit);
      let new_mask = b.emit_extern_call("rt_bitmask_set", &[mask_val, bit_const]);
      b.emit_struct_set(pobj, BITMASK_SLOT, new_mask);
    }
  }

  pub fn is_set(&mut self, b: &mut B, pobj: B::Value, unit: UnitId, field: FieldId) -> B::Value {
    let bit = self.layout(unit).bit_index.get(&field).copied().unwrap_or(0);
    let mask_val = b.emit_struct_get(pobj, BITMASK_SLOT);
    let bit_const = self.bit_const(b, bit);
    b.emit_extern_call("rt_bitmask_test", &[mask_val, bit_const])
  }

  /// Clears the bitmask bit and releases the slot's current value via the
  /// element type's destructor (spec §4.1).
  pub fn unset(&mut self, b: &mut B, pobj: B::Value, unit: UnitId, field: FieldId) {
    let layout = self.units.get(&unit).expect("layout_of must run first");
    let path = layout.field_paths.get(&field).cloned().unwrap_or_default();
    let bit = layout.bit_index.get(&field).copied();

    let current = Self::navigate(b, pobj, &path);
    b.emit_dtor(current);

    if let Some(bit) = bit {
      let mask_val = b.emit_struct_get(pobj, BITMASK_SLOT);
      let bit_const = self.bit_const(b, bit);
      let new_mask = b.emit_extern_call("rt_bitmask_clear", &[mask_val, bit_const]);
      b.emit_struct_set(pobj, BITMASK_SLOT, new_mask);
    }
  }

  pub fn struct_type(&self, unit: UnitId) -> B::Type {
    self.layout(unit).struct_type
  }

  /// Writes `value` directly into a field's reserved `&default` fallback
  /// slot, bypassing the bitmask. Must run before parsing starts (spec
  /// §4.1, "Default-reserving fields must have their default slot
  /// pre-populated before any parsing occurs"); a no-op for fields without
  /// `&default`.
  pub fn preset_default(&mut self, b: &mut B, pobj: B::Value, unit: UnitId, field: FieldId, value: B::Value) {
    if let Some(default_name) = self.layout(unit).default_slots.get(&field).cloned() {
      b.emit_struct_set(pobj, &default_name, value);
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::types::{Expr, Field, FieldAttrs, FieldId as FId, ProductionKind as PK, Unit as CoreUnit, ValueType as VT};
  use binpac_ir::text::TextIrBuilder;

  fn simple_unit(name: &str) -> CoreUnit {
    let field = Field {
      id: FId::from(&format!("{name}.x")),
      name: "x".into(),
      value_type: VT::U16,
      attrs: FieldAttrs::default(),
      params: Vec::new(),
      condition: None,
      sinks: Vec::new(),
      hooks: Vec::new(),
      transient: false,
    };
    let mut unit = CoreUnit::new(name, Production::new(PK::Variable { field: field.id }));
    unit.items.push(Item::Field(field));
    unit
  }

  #[test]
  fn layout_is_stable_across_independent_compilations() {
    let mut grammar = GrammarStore::new();
    let unit = simple_unit("U");
    let uid = grammar.insert(unit.clone());

    let mut b1 = TextIrBuilder::new();
    let mut tl1 = TypeLayout::new();
    let mut j1 = Journal::new(crate::journal::CodeGenConfig::new());
    tl1.layout_of(&mut b1, &mut j1, &grammar, grammar.get(uid).unwrap());

    let mut b2 = TextIrBuilder::new();
    let mut tl2 = TypeLayout::new();
    let mut j2 = Journal::new(crate::journal::CodeGenConfig::new());
    tl2.layout_of(&mut b2, &mut j2, &grammar, grammar.get(uid).unwrap());

    let field_id = if let Item::Field(f) = &unit.items[0] { f.id } else { unreachable!() };
    assert_eq!(tl1.path(uid, field_id), tl2.path(uid, field_id));
  }

  #[test]
  fn multi_field_switch_case_gets_a_nested_struct() {
    let a = Field {
      id: FId::from("C.a"),
      name: "a".into(),
      value_type: VT::U8,
      attrs: FieldAttrs::default(),
      params: Vec::new(),
      condition: None,
      sinks: Vec::new(),
      hooks: Vec::new(),
      transient: false,
    };
    let b_field = Field { id: FId::from("C.b"), name: "b".into(), ..a.clone() };
    let tag = Field { id: FId::from("C.tag"), name: "tag".into(), value_type: VT::U8, ..a.clone() };

    let switch_prod = Production::new(PK::Switch {
      expr:    Expr::FieldRef(tag.id),
      cases:   vec![(1, Production::new(PK::Sequence(vec![Production::new(PK::Variable { field: a.id }), Production::new(PK::Variable { field: b_field.id })])))],
      default: None,
    });

    let mut unit = CoreUnit::new("C", Production::new(PK::Sequence(vec![Production::new(PK::Variable { field: tag.id }), switch_prod])));
    unit.items.push(Item::Field(tag));
    unit.items.push(Item::Field(a.clone()));
    unit.items.push(Item::Field(b_field.clone()));

    let mut grammar = GrammarStore::new();
    let uid = grammar.insert(unit);

    let mut ir = TextIrBuilder::new();
    let mut tl = TypeLayout::new();
    let mut j = Journal::new(crate::journal::CodeGenConfig::new());
    tl.layout_of(&mut ir, &mut j, &grammar, grammar.get(uid).unwrap());

    let path_a = tl.path(uid, a.id).unwrap();
    assert_eq!(path_a.len(), 2);
    assert_eq!(path_a[1], "a");
  }

  #[test]
  fn get_raises_undefined_value_when_a_field_with_no_default_is_unset() {
    let mut grammar = GrammarStore::new();
    let unit = simple_unit("U");
    let field_id = if let Item::Field(f) = &unit.items[0] { f.id } else { unreachable!() };
    let uid = grammar.insert(unit);

    let mut ir = TextIrBuilder::new();
    let mut tl = TypeLayout::new();
    let mut j = Journal::new(crate::journal::CodeGenConfig::new());
    let pobj_ty = tl.layout_of(&mut ir, &mut j, &grammar, grammar.get(uid).unwrap());

    let func = ir.declare_func("probe", &[], pobj_ty);
    let entry = ir.new_block(func, "entry");
    let error_blk = ir.new_block(func, "error");
    ir.set_insert_block(entry);
    let pobj = ir.emit_extern_call("rt_alloc_U", &[]);

    let (_value, new_block) = tl.get(&mut ir, func, entry, error_blk, pobj, uid, field_id);
    assert_ne!(new_block, entry);

    let text = ir.finish();
    assert!(text.contains("raise"));
    assert!(text.contains("undefined value"));
  }
}
