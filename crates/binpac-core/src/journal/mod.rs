//! The journal is the diagnostics/context carrier threaded through every
//! core operation: it owns the active [Config], the per-compilation
//! [Report], and accumulates the error list a caller inspects once
//! compilation finishes. Modeled directly on the teacher's
//! `journal::{Journal, Config, Report}` trio, scaled down to this core's
//! single-compilation, non-reentrant usage (spec §5): there is no global
//! pad or cross-thread flushing here because the code generator never runs
//! more than one traversal at a time.
pub mod config;
pub mod report;

pub use config::CodeGenConfig;
pub use report::{Report, ReportType};

use crate::types::BinpacError;

/// Per-compilation diagnostics and configuration carrier. One `Journal` is
/// created per [crate::codegen::CodeGen::compile] call; a child `Journal`
/// may be `transfer`red into a nested sub-compilation (e.g. compiling a
/// `&parse` sub-grammar's literal set) and its findings folded back with
/// [Journal::absorb].
#[derive(Debug)]
pub struct Journal {
  config: CodeGenConfig,
  report: Report,
}

impl Journal {
  pub fn new(config: CodeGenConfig) -> Self {
    Self { config, report: Report::new("binpac-codegen", ReportType::CodeGen) }
  }

  pub fn config(&self) -> &CodeGenConfig {
    &self.config
  }

  /// Spawns a child journal sharing this journal's configuration but with
  /// a fresh, independently-scoped report, for a nested sub-compilation.
  pub fn transfer(&self, phase_name: impl Into<String>, report_type: ReportType) -> Self {
    Self { config: self.config.clone(), report: Report::new(phase_name, report_type) }
  }

  /// Folds a child journal's report back into this one, as happens when a
  /// nested sub-compilation (e.g. `&parse`-scoped literal matching)
  /// finishes.
  pub fn absorb(&mut self, child: Journal) {
    for error in child.report.errors() {
      self.report.add_error(error.clone());
    }
  }

  pub fn report(&self) -> &Report {
    &self.report
  }

  pub fn report_mut(&mut self) -> &mut Report {
    &mut self.report
  }

  pub fn error(&mut self, error: BinpacError) {
    self.report.add_error(error);
  }

  pub fn start_timer(&mut self, label: &'static str) {
    self.report.start_timer(label);
  }

  pub fn stop_timer(&mut self, label: &'static str) {
    self.report.stop_timer(label);
  }

  pub fn have_critical(&self) -> bool {
    self.report.have_critical()
  }

  pub fn errors(&self) -> &[BinpacError] {
    self.report.errors()
  }

  pub fn debug_print_report(&self) {
    eprintln!("{:=<80}\nReport [{}]:\n{}{:=<80}", "", self.report.name, self.report.debug_string(), "");
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn absorbs_child_errors() {
    let mut j = Journal::new(CodeGenConfig::new());
    let mut child = j.transfer("sub", ReportType::LiteralMatcher);
    child.error(BinpacError::InternalError("boom".into()));
    j.absorb(child);
    assert_eq!(j.errors().len(), 1);
  }

  #[test]
  fn timers_record_elapsed_time() {
    let mut j = Journal::new(CodeGenConfig::new());
    j.start_timer("phase");
    j.stop_timer("phase");
    assert!(j.report().timer_elapsed("phase").is_some());
  }
}
