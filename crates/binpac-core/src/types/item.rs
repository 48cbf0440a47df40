use super::{
  ids::{FieldId, HookId},
  value_type::{ByteOrder, ValueType},
};

/// An expression threaded through from the resolved AST: condition
/// expressions, `&length`/`&until`/`Switch` discriminants, `Counter` bounds.
/// Constructing and evaluating real expressions is the job of the external
/// AST/expression-resolution layer; the core only ever needs a value it can
/// hand to the IR builder or compare against a stored field, which this
/// stand-in models as either a compile-time constant or an opaque reference
/// to another field.
#[derive(Debug, Clone)]
pub enum Expr {
  ConstInt(i64),
  ConstBytes(Vec<u8>),
  /// `$$` — the value just produced by the current production.
  CurrentValue,
  /// A reference to a previously parsed field of the same unit.
  FieldRef(FieldId),
  /// `a == b`, `a != b`, used by `&until=$$==0` style conditions.
  Eq(Box<Expr>, Box<Expr>),
  Ne(Box<Expr>, Box<Expr>),
}

/// One registered hook implementation attached to a field or global event.
#[derive(Debug, Clone)]
pub struct Hook {
  pub id:       HookId,
  pub priority: i32,
  pub group:    i32,
  pub is_foreach: bool,
  /// Opaque reference to the hook's user-written body; the core never
  /// inspects this, only arranges for it to be called.
  pub body_ref: String,
}

/// Attributes attached to a field.
#[derive(Debug, Clone, Default)]
pub struct FieldAttrs {
  pub length:        Option<Expr>,
  pub until:          Option<Expr>,
  pub parse_override: Option<Expr>,
  pub is_try:         bool,
  pub chunked:        Option<u32>,
  pub default:        Option<Expr>,
  pub convert:        Option<String>,
  pub convert_back:   Option<String>,
  pub synchronize:    bool,
  pub ipv4:           bool,
  pub ipv6:           bool,
  pub byteorder:      ByteOrder,
}

/// A field, variable, property, or global hook.
#[derive(Debug, Clone)]
pub enum Item {
  Field(Field),
  Variable(Field),
  Property { name: String, value: Expr },
  GlobalHook { keyword: GlobalHookKeyword, hook: Hook },
}

/// The `%<keyword>` global hooks (`%sync`, `%error`), separate from the
/// description/port/mimetype properties which are folded in as metadata
/// rather than hooks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GlobalHookKeyword {
  Sync,
  Error,
}

#[derive(Debug, Clone)]
pub struct Field {
  pub id:         FieldId,
  pub name:       String,
  pub value_type: ValueType,
  pub attrs:      FieldAttrs,
  /// Formal-parameter bindings, present when `value_type` is a
  /// [ValueType::UnitRef].
  pub params:     Vec<Expr>,
  pub condition:  Option<Expr>,
  pub sinks:      Vec<String>,
  pub hooks:      Vec<Hook>,
  /// A field is either transient (not stored) or has a slot. Variables are
  /// never transient.
  pub transient:  bool,
}

impl Field {
  pub fn foreach_hook(&self) -> Option<&Hook> {
    self.hooks.iter().find(|h| h.is_foreach)
  }

  pub fn parse_hooks(&self) -> impl Iterator<Item = &Hook> {
    self.hooks.iter().filter(|h| !h.is_foreach)
  }
}
