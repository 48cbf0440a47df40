//! Resolved-unit fixture builder for the binpac code generator core.
//!
//! `binpac_core` consumes already-resolved [Unit]/[Item]/[Production] trees;
//! building those from source text is a real lexer/parser's job and out of
//! scope here. What this crate supplies instead is a fluent builder that
//! assembles the same data model directly, the way a test or a driver
//! without a real front end attached needs to.
use binpac_core::types::{
  ByteOrder, Expr, Field, FieldAttrs, FieldId, GlobalHookKeyword, GrammarStore, Hook, HookId, Item, Production, ProductionKind, Unit, UnitId, ValueType,
};

/// Builds one [Field] (or `Item::Variable`, via [Self::transient]) and the
/// grammar-tree [Production] node that reads it, threaded back into the
/// enclosing [UnitBuilder].
pub struct FieldBuilder<'u> {
  unit_name: &'u str,
  field:     Field,
}

impl<'u> FieldBuilder<'u> {
  fn new(unit_name: &'u str, name: &str, value_type: ValueType) -> Self {
    let id = FieldId::from(&format!("{unit_name}.{name}"));
    Self {
      unit_name,
      field: Field { id, name: name.to_string(), value_type, attrs: FieldAttrs::default(), params: Vec::new(), condition: None, sinks: Vec::new(), hooks: Vec::new(), transient: false },
    }
  }

  pub fn length(mut self, expr: Expr) -> Self {
    self.field.attrs.length = Some(expr);
    self
  }

  pub fn until(mut self, expr: Expr) -> Self {
    self.field.attrs.until = Some(expr);
    self
  }

  pub fn parse_override(mut self, expr: Expr) -> Self {
    self.field.attrs.parse_override = Some(expr);
    self
  }

  pub fn try_backtrack(mut self) -> Self {
    self.field.attrs.is_try = true;
    self
  }

  pub fn chunked(mut self, chunk_size: u32) -> Self {
    self.field.attrs.chunked = Some(chunk_size);
    self
  }

  pub fn default_value(mut self, expr: Expr) -> Self {
    self.field.attrs.default = Some(expr);
    self
  }

  pub fn synchronize(mut self) -> Self {
    self.field.attrs.synchronize = true;
    self
  }

  pub fn byteorder(mut self, order: ByteOrder) -> Self {
    self.field.attrs.byteorder = order;
    self
  }

  pub fn condition(mut self, expr: Expr) -> Self {
    self.field.condition = Some(expr);
    self
  }

  pub fn sink(mut self, name: impl Into<String>) -> Self {
    self.field.sinks.push(name.into());
    self
  }

  /// Attaches a parse hook that runs when this field finishes parsing.
  /// `priority` breaks ties among several hooks on the same field, higher
  /// running first; `group` is the recursion-guard group disabled for the
  /// duration of the hook's own call.
  pub fn hook(mut self, body_ref: impl Into<String>, priority: i32, group: i32) -> Self {
    let id = HookId::from(&format!("{}.{}.parse.{}", self.unit_name, self.field.name, self.field.hooks.len()));
    self.field.hooks.push(Hook { id, priority, group, is_foreach: false, body_ref: body_ref.into() });
    self
  }

  /// Attaches the `foreach` hook a `&chunked` field runs once per piece.
  pub fn foreach_hook(mut self, body_ref: impl Into<String>, priority: i32, group: i32) -> Self {
    let id = HookId::from(&format!("{}.{}.foreach", self.unit_name, self.field.name));
    self.field.hooks.push(Hook { id, priority, group, is_foreach: true, body_ref: body_ref.into() });
    self
  }

  /// Marks the field as a `Variable` (computed, never a struct slot).
  pub fn transient(mut self) -> Self {
    self.field.transient = true;
    self
  }

  fn build(self) -> (Field, Production) {
    let kind = ProductionKind::Variable { field: self.field.id };
    let production = Production::new(kind).with_field(self.field.id);
    (self.field, production)
  }
}

/// Assembles a [Unit] field by field, mirroring the order fields are pushed
/// in: the grammar tree built here is always a flat [ProductionKind::Sequence]
/// over each field's own production, in declaration order. Callers needing a
/// `Switch`/`Loop`/`LookAhead`/... grammar shape should build [Production]
/// values directly and attach them with [Self::production]/[Self::grammar].
pub struct UnitBuilder {
  unit:        Unit,
  productions: Vec<Production>,
}

impl UnitBuilder {
  pub fn new(name: impl Into<String>) -> Self {
    let name = name.into();
    Self { unit: Unit::new(name, Production::new(ProductionKind::Epsilon)), productions: Vec::new() }
  }

  pub fn param(mut self, name: impl Into<String>) -> Self {
    self.unit.params.push((name.into(), Expr::ConstInt(0)));
    self
  }

  pub fn exported(mut self) -> Self {
    self.unit.exported = true;
    self
  }

  pub fn buffering(mut self) -> Self {
    self.unit.buffering = true;
    self
  }

  pub fn track_look_ahead(mut self) -> Self {
    self.unit.track_look_ahead = true;
    self
  }

  pub fn description(mut self, text: impl Into<String>) -> Self {
    self.unit.description = Some(text.into());
    self
  }

  pub fn port(mut self, port: u32) -> Self {
    self.unit.ports.push(port);
    self
  }

  pub fn mime_type(mut self, mime: impl Into<String>) -> Self {
    self.unit.mime_types.push(mime.into());
    self
  }

  pub fn sink(mut self, name: impl Into<String>) -> Self {
    self.unit.sinks.push(name.into());
    self
  }

  /// Appends a plain stored field, via a [FieldBuilder] for its attributes.
  pub fn field(mut self, name: &str, value_type: ValueType, configure: impl FnOnce(FieldBuilder) -> FieldBuilder) -> Self {
    let unit_name = self.unit.name.clone();
    let fb = configure(FieldBuilder::new(&unit_name, name, value_type));
    let (field, production) = fb.build();
    self.productions.push(production);
    self.unit.items.push(Item::Field(field));
    self
  }

  /// Appends a computed `Variable` item — never a struct slot.
  pub fn variable(mut self, name: &str, value_type: ValueType, configure: impl FnOnce(FieldBuilder) -> FieldBuilder) -> Self {
    let unit_name = self.unit.name.clone();
    let fb = configure(FieldBuilder::new(&unit_name, name, value_type)).transient();
    let (field, production) = fb.build();
    self.productions.push(production);
    self.unit.items.push(Item::Variable(field));
    self
  }

  /// Appends a raw [Production] not tied to a single field — a `Switch`,
  /// `Loop`, `LookAhead`, or any other composite grammar node the caller
  /// assembled directly.
  pub fn production(mut self, production: Production) -> Self {
    self.productions.push(production);
    self
  }

  /// Attaches a `%sync`/`%error` global hook.
  pub fn global_hook(mut self, keyword: GlobalHookKeyword, body_ref: impl Into<String>, priority: i32, group: i32) -> Self {
    let id = HookId::from(&format!("{}.{:?}", self.unit.name, keyword));
    self.unit.items.push(Item::GlobalHook { keyword, hook: Hook { id, priority, group, is_foreach: false, body_ref: body_ref.into() } });
    self
  }

  /// A `%description`/`%port`/`%mimetype`-style free property, recorded as
  /// an [Item::Property] rather than folded into [Unit]'s own metadata
  /// fields — for properties the core doesn't interpret itself but a caller
  /// wants preserved on the resolved unit.
  pub fn property(mut self, name: impl Into<String>, value: Expr) -> Self {
    self.unit.items.push(Item::Property { name: name.into(), value });
    self
  }

  /// Overrides the whole grammar tree, bypassing the flat-sequence default
  /// built from [Self::field]/[Self::variable] calls. Use this for a unit
  /// whose top-level shape is itself a `Switch`/`LookAhead`/`Loop`.
  pub fn grammar(mut self, production: Production) -> Self {
    self.unit.grammar = production;
    self.productions.clear();
    self
  }

  /// Finishes the unit: if [Self::grammar] was never called, wraps every
  /// field/variable/production pushed so far into one top-level `Sequence`,
  /// in declaration order.
  pub fn build(mut self) -> Unit {
    if !self.productions.is_empty() {
      self.unit.grammar = Production::new(ProductionKind::Sequence(self.productions));
    }
    self.unit
  }
}

/// Convenience wrapper over [GrammarStore] for assembling a small fixture
/// grammar inline.
#[derive(Default)]
pub struct GrammarStoreBuilder {
  store: GrammarStore,
}

impl GrammarStoreBuilder {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn unit(mut self, unit: Unit) -> Self {
    self.store.insert(unit);
    self
  }

  pub fn build(self) -> GrammarStore {
    self.store
  }
}

/// Looks up a unit freshly inserted into `store` by the name it was built
/// with, since [UnitBuilder] derives [UnitId] deterministically from the
/// name (spec §9's reserved-slot naming applies the same principle here).
pub fn unit_id_of(name: &str) -> UnitId {
  UnitId::from(&name.to_string())
}

#[cfg(test)]
mod tests {
  use super::*;
  use binpac_core::types::ValueType as VT;

  #[test]
  fn builds_a_two_field_unit_as_a_flat_sequence() {
    let unit = UnitBuilder::new("Header")
      .exported()
      .field("magic", VT::U32, |f| f)
      .field("version", VT::U8, |f| f)
      .build();

    assert_eq!(unit.items.len(), 2);
    assert!(matches!(unit.grammar.kind, ProductionKind::Sequence(ref ps) if ps.len() == 2));
    assert!(unit.exported);
  }

  #[test]
  fn field_attributes_round_trip_through_the_builder() {
    let unit = UnitBuilder::new("Payload")
      .field("len", VT::U16, |f| f)
      .field("body", VT::Bytes, |f| f.length(Expr::FieldRef(FieldId::from("Payload.len"))).try_backtrack())
      .build();

    let Item::Field(body) = &unit.items[1] else { panic!("expected a Field item") };
    assert!(body.attrs.is_try);
    assert!(matches!(body.attrs.length, Some(Expr::FieldRef(_))));
  }

  #[test]
  fn grammar_override_replaces_the_flat_sequence() {
    let tag = FieldBuilder::new("Sw", "tag", VT::U8);
    let (tag_field, tag_prod) = tag.build();
    let switch = Production::new(ProductionKind::Switch { expr: Expr::FieldRef(tag_field.id), cases: Vec::new(), default: Some(Box::new(Production::new(ProductionKind::Epsilon))) });

    let unit = UnitBuilder::new("Sw")
      .field("tag", VT::U8, |f| f)
      .grammar(Production::new(ProductionKind::Sequence(vec![tag_prod, switch])))
      .build();

    assert!(matches!(unit.grammar.kind, ProductionKind::Sequence(ref ps) if ps.len() == 2));
  }

  #[test]
  fn unit_id_is_stable_for_the_same_name() {
    let a = UnitBuilder::new("Same").build();
    assert_eq!(a.id, unit_id_of("Same"));
  }
}
