use super::{
  ids::{FieldId, ProductionSymbol, UnitId},
  item::Expr,
};

/// A single literal or regex terminal considered during look-ahead/matching.
#[derive(Debug, Clone)]
pub struct Terminal {
  pub token_id: u32,
  pub matcher:  TerminalMatcher,
}

#[derive(Debug, Clone)]
pub enum TerminalMatcher {
  Bytes(Vec<u8>),
  Regex(String),
}

/// Metadata carried by every production node.
#[derive(Debug, Clone, Default)]
pub struct GrammarMetadata {
  pub field:         Option<FieldId>,
  pub symbol:        ProductionSymbol,
  pub may_synchronize: bool,
}

/// A tagged variant over the grammar node kinds. Closed by design: new
/// production kinds are added here directly rather than through a dynamic
/// dispatch seam.
#[derive(Debug, Clone)]
pub enum ProductionKind {
  Epsilon,
  Literal { terminal: Terminal },
  Variable { field: FieldId },
  Sequence(Vec<Production>),
  LookAhead {
    alt_a:      Box<Production>,
    alt_b:      Box<Production>,
    tokens_a:   Vec<Terminal>,
    tokens_b:   Vec<Terminal>,
    default:    Option<Box<Production>>,
  },
  Switch { expr: Expr, cases: Vec<(i64, Production)>, default: Option<Box<Production>> },
  Counter { count: Expr, body: Box<Production> },
  ByteBlock { length: Expr, body: Box<Production> },
  Loop { body: Box<Production>, eod_ok: bool },
  ChildGrammar { unit: UnitId, args: Vec<Expr> },
  Enclosure { child: Box<Production> },
  Boolean,
  While { condition: Expr, body: Box<Production> },
}

#[derive(Debug, Clone)]
pub struct Production {
  pub kind: ProductionKind,
  pub meta: GrammarMetadata,
}

impl Production {
  pub fn new(kind: ProductionKind) -> Self {
    Self { kind, meta: GrammarMetadata::default() }
  }

  pub fn with_field(mut self, field: FieldId) -> Self {
    self.meta.field = Some(field);
    self
  }

  pub fn synchronized(mut self) -> Self {
    self.meta.may_synchronize = true;
    self
  }
}
