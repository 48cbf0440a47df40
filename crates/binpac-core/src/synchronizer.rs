//! Emits resynchronization: on a `&synchronize`-annotated production, scan
//! forward for the next byte offset where the production's first terminal
//! could validly begin, per spec §4.3.
use crate::{
  literal_matcher::{AdvanceOutcome, LiteralMatcher},
  types::{BinpacError, ParseErrorKind, Production, ProductionKind, Terminal, UnitId},
};

#[derive(Default)]
pub struct Synchronizer;

impl Synchronizer {
  pub fn new() -> Self {
    Self
  }

  /// Static predicate: a `Loop` body or a literal-headed alternative
  /// supports synchronization; an opaque `Variable` (an arbitrary sub-type
  /// unpack with no statically-known start terminal) generally does not.
  pub fn supports_synchronize(production: &Production) -> bool {
    !Self::start_terminals(production).is_empty()
  }

  /// Collects the terminals that could validly begin `production`, by
  /// walking into the productions whose first terminal is statically
  /// knowable. Opaque nodes (`Variable`, `ChildGrammar`, `Switch`,
  /// `Enclosure`, `Boolean`, `While`) contribute nothing, since their first
  /// byte depends on a sub-unit's own grammar or a runtime expression this
  /// core does not evaluate.
  fn start_terminals(production: &Production) -> Vec<Terminal> {
    match &production.kind {
      ProductionKind::Literal { terminal } => vec![terminal.clone()],
      ProductionKind::Sequence(children) => children.first().map(Self::start_terminals).unwrap_or_default(),
      ProductionKind::LookAhead { tokens_a, tokens_b, .. } => {
        let mut all = tokens_a.clone();
        all.extend(tokens_b.clone());
        all
      }
      ProductionKind::Loop { body, .. } | ProductionKind::Counter { body, .. } | ProductionKind::ByteBlock { body, .. } => Self::start_terminals(body),
      _ => Vec::new(),
    }
  }

  /// Public signature of [Self::start_terminals], exposed so
  /// [crate::parser_builder] can bake the same terminal set into the
  /// `rt_synchronize_to` call it emits for a `&synchronize`-tagged loop body,
  /// without duplicating the grammar walk.
  pub fn start_terminal_signature(production: &Production) -> Vec<u32> {
    Self::start_terminals(production).iter().map(|t| t.token_id).collect()
  }

  /// Scans forward from `cur` over the bytes available in `data` to the
  /// next offset at which `production`'s start terminals could match.
  /// Raises `ParseError("cannot synchronize")` if the terminal set is empty
  /// or no match is found before the input is frozen and exhausted.
  pub fn synchronize(&self, matcher: &mut LiteralMatcher, unit: UnitId, production: &Production, data: &[u8], cur: usize, frozen: bool) -> Result<usize, BinpacError> {
    let terminals = Self::start_terminals(production);
    if terminals.is_empty() {
      return Err(BinpacError::parse(ParseErrorKind::CannotSynchronize, unit, "cannot synchronize: production has no statically-known start terminal"));
    }
    let sig = matcher.init_match(&terminals);
    for offset in cur..=data.len() {
      if let AdvanceOutcome::Matched { .. } = matcher.advance_match(&sig, &data[offset..]) {
        return Ok(offset);
      }
    }
    if frozen {
      Err(BinpacError::parse(ParseErrorKind::CannotSynchronize, unit, "cannot synchronize: input exhausted before a recovery point was found"))
    } else {
      Err(BinpacError::WouldBlock)
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::types::{ids::UnitId as UId, TerminalMatcher};

  fn lit(id: u32, bytes: &[u8]) -> Production {
    Production::new(ProductionKind::Literal { terminal: Terminal { token_id: id, matcher: TerminalMatcher::Bytes(bytes.to_vec()) } })
  }

  #[test]
  fn skips_forward_to_the_next_valid_start() {
    let sync = Synchronizer::new();
    let mut matcher = LiteralMatcher::new();
    let prod = lit(1, b"\xff\xff");
    let data = b"\x00\x00\x00\xff\xff\x01";
    let pos = sync.synchronize(&mut matcher, UId(0), &prod, data, 0, true).unwrap();
    assert_eq!(pos, 3);
  }

  #[test]
  fn opaque_variable_cannot_synchronize() {
    let prod = Production::new(ProductionKind::Variable { field: crate::types::FieldId(1) });
    assert!(!Synchronizer::supports_synchronize(&prod));
  }

  #[test]
  fn exhausted_frozen_input_raises() {
    let sync = Synchronizer::new();
    let mut matcher = LiteralMatcher::new();
    let prod = lit(1, b"\xff");
    let err = sync.synchronize(&mut matcher, UId(0), &prod, b"\x00\x00", 0, true).unwrap_err();
    assert!(matches!(err, BinpacError::ParseError { kind: ParseErrorKind::CannotSynchronize, .. }));
  }
}
