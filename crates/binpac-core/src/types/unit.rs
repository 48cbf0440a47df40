use super::{
  ids::UnitId,
  item::{Expr, Item},
  production::Production,
};

/// A named record with an ordered sequence of items, formal parameters,
/// optional sinks, and three unit-level behavior flags.
#[derive(Debug, Clone)]
pub struct Unit {
  pub id:               UnitId,
  pub name:             String,
  pub params:           Vec<(String, Expr)>,
  pub items:             Vec<Item>,
  pub grammar:           Production,
  pub sinks:             Vec<String>,
  /// Retain the input span backing this unit once parsed.
  pub buffering:         bool,
  /// Reserve look-ahead state across sub-parses.
  pub track_look_ahead:  bool,
  /// Instantiate a runtime registry entry for this unit.
  pub exported:          bool,
  pub description:       Option<String>,
  pub ports:             Vec<u32>,
  pub mime_types:        Vec<String>,
}

impl Unit {
  pub fn new(name: impl Into<String>, grammar: Production) -> Self {
    let name = name.into();
    Self {
      id: UnitId::from(&name),
      name,
      params: Vec::new(),
      items: Vec::new(),
      grammar,
      sinks: Vec::new(),
      buffering: false,
      track_look_ahead: false,
      exported: false,
      description: None,
      ports: Vec::new(),
      mime_types: Vec::new(),
    }
  }
}

/// All units reachable from one or more entry units. Grammar construction
/// from raw source productions is out of scope here; this only holds
/// already-resolved units for the core to compile.
#[derive(Debug, Clone, Default)]
pub struct GrammarStore {
  pub units: std::collections::BTreeMap<UnitId, Unit>,
}

impl GrammarStore {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn insert(&mut self, unit: Unit) -> UnitId {
    let id = unit.id;
    self.units.insert(id, unit);
    id
  }

  pub fn get(&self, id: UnitId) -> Option<&Unit> {
    self.units.get(&id)
  }

  pub fn exported_units(&self) -> impl Iterator<Item = &Unit> {
    self.units.values().filter(|u| u.exported)
  }
}
