//! Compiles literal and regex terminals into a joint match-token automaton
//! and drives the look-ahead algorithm that disambiguates among
//! alternatives, per spec §4.2.
use crate::types::{BinpacError, ParseErrorKind, Terminal, TerminalMatcher, UnitId};
use regex::bytes::Regex;
use std::collections::HashMap;

/// Canonical (sorted, deduplicated) terminal-id signature used to key the
/// compiled-automaton cache, so two productions sharing the same terminal
/// set (e.g. repeated `switch` arms over the same small alphabet) reuse one
/// compiled automaton rather than recompiling it (spec §4.2, "Terminal-set
/// caching").
fn signature(terminals: &[Terminal]) -> Vec<u32> {
  let mut ids: Vec<u32> = terminals.iter().map(|t| t.token_id).collect();
  ids.sort_unstable();
  ids.dedup();
  ids
}

struct CompiledAutomaton {
  terminals: Vec<Terminal>,
  regexes:   HashMap<u32, Regex>,
}

/// Per-compilation cache of compiled terminal-set automatons.
#[derive(Default)]
pub struct LiteralMatcher {
  cache: HashMap<Vec<u32>, CompiledAutomaton>,
}

/// Outcome of a single terminal trying to match at the start of the
/// available input.
enum TrialMatch {
  No,
  Yes { len: usize },
}

/// What [LiteralMatcher::advance_match] reports for the whole automaton.
pub enum AdvanceOutcome {
  /// No terminal in the set matches and none could become a match with more
  /// input.
  NotFound,
  /// Not enough input is available to decide either way.
  Insufficient,
  /// `token_id`'s terminal matched, consuming `consumed` bytes.
  Matched { token_id: u32, consumed: usize },
}

impl LiteralMatcher {
  pub fn new() -> Self {
    Self::default()
  }

  /// Compiles, or retrieves from cache, the automaton for `terminals`.
  /// Returns the cache key so subsequent calls can address it without
  /// recompiling the regex set.
  pub fn init_match(&mut self, terminals: &[Terminal]) -> Vec<u32> {
    let sig = signature(terminals);
    self.cache.entry(sig.clone()).or_insert_with(|| {
      let mut regexes = HashMap::new();
      for t in terminals {
        if let TerminalMatcher::Regex(pattern) = &t.matcher {
          // Anchored at the start and marked no-subgroup: only the token id
          // and match length are ever consulted (spec §4.2).
          let anchored = format!("^(?:{pattern})");
          if let Ok(re) = Regex::new(&anchored) {
            regexes.insert(t.token_id, re);
          }
        }
      }
      CompiledAutomaton { terminals: terminals.to_vec(), regexes }
    });
    sig
  }

  fn trial(automaton: &CompiledAutomaton, terminal: &Terminal, input: &[u8]) -> TrialMatch {
    match &terminal.matcher {
      TerminalMatcher::Bytes(bytes) => {
        if input.len() >= bytes.len() && &input[..bytes.len()] == bytes.as_slice() {
          TrialMatch::Yes { len: bytes.len() }
        } else {
          TrialMatch::No
        }
      }
      TerminalMatcher::Regex(_) => match automaton.regexes.get(&terminal.token_id) {
        Some(re) => match re.find(input) {
          Some(m) if m.start() == 0 => TrialMatch::Yes { len: m.end() },
          _ => TrialMatch::No,
        },
        None => TrialMatch::No,
      },
    }
  }

  /// Feeds `input` (the bytes currently available starting at the cursor)
  /// through the automaton named by `sig`. Returns `0`-equivalent
  /// ([AdvanceOutcome::NotFound]), `-1`-equivalent
  /// ([AdvanceOutcome::Insufficient]), or the matched token id, per spec
  /// §4.2's *advanceMatch*. A byte literal longer than the available input
  /// but matching as far as it goes is reported `Insufficient`, since more
  /// bytes could still complete it; a regex with no match at all is
  /// reported `NotFound` rather than `Insufficient`, since a bounded regex
  /// engine cannot tell prefix-of-a-future-match apart from no-match — this
  /// core treats that distinction as the byte-literal case only, which
  /// covers every terminal kind the generated look-ahead switches on in
  /// practice.
  pub fn advance_match(&self, sig: &[u32], input: &[u8]) -> AdvanceOutcome {
    let automaton = match self.cache.get(sig) {
      Some(a) => a,
      None => return AdvanceOutcome::NotFound,
    };
    let mut best: Option<(u32, usize)> = None;
    let mut insufficient = false;
    for t in &automaton.terminals {
      match Self::trial(automaton, t, input) {
        TrialMatch::Yes { len } => {
          if best.map(|(_, blen)| len > blen).unwrap_or(true) {
            best = Some((t.token_id, len));
          }
        }
        TrialMatch::No => {
          if let TerminalMatcher::Bytes(bytes) = &t.matcher {
            if bytes.len() > input.len() && bytes.starts_with(input) {
              insufficient = true;
            }
          }
        }
      }
    }
    match best {
      Some((token_id, consumed)) => AdvanceOutcome::Matched { token_id, consumed },
      None if insufficient => AdvanceOutcome::Insufficient,
      None => AdvanceOutcome::NotFound,
    }
  }

  /// Resolves the look-ahead token among the `terminals` set: the *longest*
  /// successful match wins; a tie in length among two *distinct* terminals
  /// is ambiguous regardless of declaration order (spec §4.2, "Ordering").
  /// `must_find` controls whether failing to match raises
  /// `ParseError("expected symbols not found")` or returns `Ok(None)` so the
  /// caller can fall through to a default alternative.
  pub fn look_ahead(&mut self, unit: UnitId, terminals: &[Terminal], input: &[u8], must_find: bool) -> Result<Option<(u32, usize)>, BinpacError> {
    let sig = self.init_match(terminals);
    let automaton = self.cache.get(&sig).expect("just inserted by init_match");

    let mut matches: Vec<(u32, usize)> = Vec::new();
    for t in &automaton.terminals {
      if let TrialMatch::Yes { len } = Self::trial(automaton, t, input) {
        matches.push((t.token_id, len));
      }
    }

    if matches.is_empty() {
      return if must_find {
        Err(BinpacError::parse(ParseErrorKind::MissingLookAhead, unit, "expected symbols not found"))
      } else {
        Ok(None)
      };
    }

    let max_len = matches.iter().map(|(_, l)| *l).max().unwrap();
    let longest: Vec<_> = matches.into_iter().filter(|(_, l)| *l == max_len).collect();
    let distinct_tokens: std::collections::HashSet<u32> = longest.iter().map(|(id, _)| *id).collect();
    if distinct_tokens.len() > 1 {
      return Err(BinpacError::parse(ParseErrorKind::AmbiguousLookAhead, unit, "ambiguous"));
    }
    Ok(Some(longest[0]))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::types::ids::UnitId as UId;

  fn bytes_terminal(id: u32, bytes: &[u8]) -> Terminal {
    Terminal { token_id: id, matcher: TerminalMatcher::Bytes(bytes.to_vec()) }
  }

  #[test]
  fn longest_match_wins() {
    let mut m = LiteralMatcher::new();
    let terms = vec![bytes_terminal(1, b"fo"), bytes_terminal(2, b"foo")];
    let r = m.look_ahead(UId(0), &terms, b"foobar", false).unwrap();
    assert_eq!(r, Some((2, 3)));
  }

  #[test]
  fn identical_terminal_in_both_alternatives_is_ambiguous() {
    let mut m = LiteralMatcher::new();
    let terms = vec![bytes_terminal(1, b"foo"), bytes_terminal(2, b"foo")];
    let err = m.look_ahead(UId(0), &terms, b"foobar", true).unwrap_err();
    assert!(matches!(err, BinpacError::ParseError { kind: ParseErrorKind::AmbiguousLookAhead, .. }));
  }

  #[test]
  fn missing_required_match_raises() {
    let mut m = LiteralMatcher::new();
    let terms = vec![bytes_terminal(1, b"foo")];
    let err = m.look_ahead(UId(0), &terms, b"bar", true).unwrap_err();
    assert!(matches!(err, BinpacError::ParseError { kind: ParseErrorKind::MissingLookAhead, .. }));
  }

  #[test]
  fn missing_optional_match_falls_through() {
    let mut m = LiteralMatcher::new();
    let terms = vec![bytes_terminal(1, b"foo")];
    assert_eq!(m.look_ahead(UId(0), &terms, b"bar", false).unwrap(), None);
  }

  #[test]
  fn same_terminal_set_shares_one_compiled_automaton() {
    let mut m = LiteralMatcher::new();
    let terms = vec![bytes_terminal(1, b"a")];
    let sig1 = m.init_match(&terms);
    let sig2 = m.init_match(&terms);
    assert_eq!(sig1, sig2);
    assert_eq!(m.cache.len(), 1);
  }
}
