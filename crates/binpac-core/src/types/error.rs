use super::ids::{FieldId, UnitId};
use std::{
  fmt::Display,
  string::{FromUtf16Error, FromUtf8Error},
};

pub(crate) mod severity {
  #[bitmask_enum::bitmask]
  /// Severity grade attached to every [super::BinpacError].
  pub enum BinpacErrorSeverity {
    Hint     = 0b100,
    Warning  = 0b10,
    Critical = 0b1,
    None     = 0b0,
  }
}
pub use severity::BinpacErrorSeverity;

/// What kind of conformance failure a [BinpacError::ParseError] represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseErrorKind {
  LiteralMismatch,
  AmbiguousLookAhead,
  MissingLookAhead,
  LengthAreaNotFullyParsed,
  NoMatchingCase,
  InsufficientInput,
  CannotSynchronize,
}

/// Stores every error type that can be produced by the code generator core.
/// Hand-written rather than `thiserror`-derived: `Display` is implemented by
/// hand below so messages carry consistent, greppable wording (e.g.
/// `"ambiguous"`, `"no matching switch case"`).
#[derive(Clone, Debug)]
pub enum BinpacError {
  ParseError { kind: ParseErrorKind, unit: UnitId, message: String },
  ComposeError { unit: UnitId, production: crate::types::ids::ProductionSymbol, message: String },
  /// Internal signal that input is temporarily exhausted; never escapes to
  /// a user-visible `BinpacResult`.
  WouldBlock,
  /// Internal signal that `&try` should restore the saved iterator.
  Backtrack { saved_cur: usize },
  UndefinedValue { unit: UnitId, field: FieldId },
  InternalError(String),
  Io(String),
  Fmt(String),
  Text(String),
  Many { message: String, errors: Vec<BinpacError> },
}
use BinpacError::*;

impl BinpacError {
  pub fn parse(kind: ParseErrorKind, unit: UnitId, message: impl Into<String>) -> Self {
    ParseError { kind, unit, message: message.into() }
  }

  pub fn get_severity(&self) -> BinpacErrorSeverity {
    match self {
      WouldBlock | Backtrack { .. } => BinpacErrorSeverity::None,
      _ => BinpacErrorSeverity::Critical,
    }
  }

  pub fn is_critical(&self) -> bool {
    self.get_severity().contains(BinpacErrorSeverity::Critical)
  }
}

impl From<std::io::Error> for BinpacError {
  fn from(err: std::io::Error) -> Self {
    Io(err.to_string())
  }
}

impl From<std::fmt::Error> for BinpacError {
  fn from(err: std::fmt::Error) -> Self {
    Fmt(err.to_string())
  }
}

impl From<&str> for BinpacError {
  fn from(err: &str) -> Self {
    Text(err.to_string())
  }
}

impl From<String> for BinpacError {
  fn from(err: String) -> Self {
    Text(err)
  }
}

impl From<FromUtf8Error> for BinpacError {
  fn from(err: FromUtf8Error) -> Self {
    Text(err.to_string())
  }
}

impl From<FromUtf16Error> for BinpacError {
  fn from(err: FromUtf16Error) -> Self {
    Text(err.to_string())
  }
}

impl Display for BinpacError {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      ParseError { kind, unit, message } => {
        write!(f, "\nParseError [{:?}] in unit {unit}: {message}", kind)
      }
      ComposeError { unit, production, message } => {
        write!(f, "\nComposeError in unit {unit} at production {production}: {message}")
      }
      WouldBlock => f.write_str("\nWouldBlock"),
      Backtrack { saved_cur } => write!(f, "\nBacktrack to {saved_cur}"),
      UndefinedValue { unit, field } => write!(f, "\nUndefinedValue: unit {unit} field {field} was read but never set"),
      InternalError(msg) => write!(f, "\nInternalError: {msg}"),
      Io(s) => write!(f, "\nIO Error: {s}"),
      Fmt(s) => write!(f, "\nFormat Error: {s}"),
      Text(s) => f.write_str(s),
      Many { message, errors } => {
        write!(f, "\n{message}\n-------------------\n{}", errors.iter().map(|e| e.to_string()).collect::<Vec<_>>().join("\n"))
      }
    }
  }
}

pub type BinpacResult<T> = Result<T, BinpacError>;

#[derive(Default, Debug)]
pub struct ErrorGroups {
  pub hints:    Vec<BinpacError>,
  pub warnings: Vec<BinpacError>,
  pub critical: Vec<BinpacError>,
}

/// Classifies a flat error list into severity buckets.
pub trait BinpacErrorContainer {
  fn get_error_groups(&self) -> ErrorGroups;
  fn have_critical(&self) -> bool;
}

impl BinpacErrorContainer for Vec<BinpacError> {
  fn get_error_groups(&self) -> ErrorGroups {
    let mut groups = ErrorGroups::default();
    for error in self {
      let sev = error.get_severity();
      if sev.contains(BinpacErrorSeverity::Critical) {
        groups.critical.push(error.clone());
      } else if sev.contains(BinpacErrorSeverity::Warning) {
        groups.warnings.push(error.clone());
      } else if sev.contains(BinpacErrorSeverity::Hint) {
        groups.hints.push(error.clone());
      }
    }
    groups
  }

  fn have_critical(&self) -> bool {
    self.iter().any(BinpacError::is_critical)
  }
}
