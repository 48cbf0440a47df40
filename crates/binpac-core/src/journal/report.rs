use crate::types::BinpacError;
use std::{
  collections::BTreeMap,
  time::{Duration, Instant},
};

/// Which stage of the pipeline produced a [Report]. Mirrors the teacher's
/// `ReportType` discriminant used to file and later retrieve reports by
/// phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ReportType {
  TypeLayout,
  LiteralMatcher,
  Synchronizer,
  ParserBuilder,
  Composer,
  CodeGen,
  Any,
}

impl ReportType {
  pub fn type_matches(self, other: ReportType) -> bool {
    other == ReportType::Any || self == other
  }
}

#[derive(Clone, Copy)]
struct Timing {
  start:  Instant,
  end:    Option<Instant>,
}

impl Timing {
  fn elapsed(&self) -> Duration {
    self.end.unwrap_or_else(Instant::now).duration_since(self.start)
  }
}

/// One named diagnostic record for a single compilation phase: a bucket of
/// errors plus a set of named timers, scoped to the [super::Journal] that
/// created it.
pub struct Report {
  pub name:        String,
  pub report_type: ReportType,
  create_time:     Instant,
  errors:          Vec<BinpacError>,
  timers:          BTreeMap<&'static str, Timing>,
}

impl Default for Report {
  fn default() -> Self {
    Self { name: String::new(), report_type: ReportType::Any, create_time: Instant::now(), errors: Vec::new(), timers: BTreeMap::new() }
  }
}

impl Report {
  pub fn new(name: impl Into<String>, report_type: ReportType) -> Self {
    Self { name: name.into(), report_type, ..Default::default() }
  }

  pub fn add_error(&mut self, error: BinpacError) {
    self.errors.push(error);
  }

  pub fn errors(&self) -> &[BinpacError] {
    &self.errors
  }

  pub fn have_critical(&self) -> bool {
    self.errors.iter().any(BinpacError::is_critical)
  }

  pub fn start_timer(&mut self, label: &'static str) {
    self.timers.insert(label, Timing { start: Instant::now(), end: None });
  }

  pub fn stop_timer(&mut self, label: &'static str) {
    if let Some(t) = self.timers.get_mut(label) {
      t.end = Some(Instant::now());
    }
  }

  pub fn timer_elapsed(&self, label: &str) -> Option<Duration> {
    self.timers.get(label).map(Timing::elapsed)
  }

  pub fn debug_string(&self) -> String {
    let mut out = String::new();
    for (label, timing) in &self.timers {
      out.push_str(&format!("  {label}: {:?}\n", timing.elapsed()));
    }
    for err in &self.errors {
      out.push_str(&format!("  error: {err}\n"));
    }
    out
  }
}

impl std::fmt::Debug for Report {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Report")
      .field("name", &self.name)
      .field("report_type", &self.report_type)
      .field("errors", &self.errors.len())
      .field("age", &self.create_time.elapsed())
      .finish()
  }
}
