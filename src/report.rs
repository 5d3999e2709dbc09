//! Structured report collection
//!
//! All data-level failures flow through the [`ErrorSink`]: parsers and
//! validators report and return a sentinel instead of unwinding, so a batch
//! run can surface every problem in one pass. The sink carries the current
//! source/line/column context so call sites only supply the message.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Severity of a report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Error,
    Warning,
}

/// A single structured report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    /// Source file the report refers to
    pub source: String,
    /// 1-based line number, when known
    pub line: Option<usize>,
    /// Column name, when known
    pub column: Option<String>,
    /// Declared type of the column, when known
    pub column_type: Option<String>,
    /// The offending value, when one exists
    pub value: Option<String>,
    /// Human-readable description
    pub message: String,
    pub severity: Severity,
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.source)?;
        if let Some(line) = self.line {
            write!(f, ":{}", line)?;
        }
        if let Some(col) = &self.column {
            write!(f, " [{}]", col)?;
        }
        if let Some(ty) = &self.column_type {
            write!(f, " ({})", ty)?;
        }
        match self.severity {
            Severity::Error => write!(f, " error: {}", self.message)?,
            Severity::Warning => write!(f, " warning: {}", self.message)?,
        }
        if let Some(value) = &self.value {
            write!(f, " (value: {:?})", value)?;
        }
        Ok(())
    }
}

/// Snapshot of sink state, used to roll back trial parses
#[derive(Debug, Clone, Copy)]
pub struct Checkpoint {
    len: usize,
    errors: usize,
    warnings: usize,
}

/// Append-only collector of [`Report`]s with ambient context.
///
/// The sink is the sole failure-signalling mechanism of the core: callers
/// inspect [`ErrorSink::error_count`] to gate progress. Union trial parsing
/// uses [`ErrorSink::checkpoint`]/[`ErrorSink::rollback`] so only the
/// successful branch's reports survive.
#[derive(Debug, Default)]
pub struct ErrorSink {
    reports: Vec<Report>,
    errors: usize,
    warnings: usize,
    source: String,
    line: Option<usize>,
    column: Option<String>,
    col_types: Vec<String>,
}

impl ErrorSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the source file tagged on subsequent reports
    pub fn set_source(&mut self, source: impl Into<String>) {
        self.source = source.into();
    }

    /// Set the 1-based line tagged on subsequent reports
    pub fn set_line(&mut self, line: Option<usize>) {
        self.line = line;
    }

    /// Set the column name tagged on subsequent reports
    pub fn set_column(&mut self, column: Option<String>) {
        self.column = column;
    }

    /// Tag every report produced inside `f` with a column-type label
    pub fn with_col_type<R>(&mut self, col_type: &str, f: impl FnOnce(&mut Self) -> R) -> R {
        self.col_types.push(col_type.to_string());
        let out = f(self);
        self.col_types.pop();
        out
    }

    /// Report an error
    pub fn error(&mut self, message: impl Into<String>) {
        self.push(Severity::Error, None, message.into());
    }

    /// Report an error about a specific value
    pub fn error_value(&mut self, value: &str, message: impl Into<String>) {
        self.push(Severity::Error, Some(value.to_string()), message.into());
    }

    /// Report a warning
    pub fn warn(&mut self, message: impl Into<String>) {
        self.push(Severity::Warning, None, message.into());
    }

    /// Report a warning about a specific value
    pub fn warn_value(&mut self, value: &str, message: impl Into<String>) {
        self.push(Severity::Warning, Some(value.to_string()), message.into());
    }

    fn push(&mut self, severity: Severity, value: Option<String>, message: String) {
        match severity {
            Severity::Error => self.errors += 1,
            Severity::Warning => self.warnings += 1,
        }
        self.reports.push(Report {
            source: self.source.clone(),
            line: self.line,
            column: self.column.clone(),
            column_type: self.col_types.last().cloned(),
            value,
            message,
            severity,
        });
    }

    pub fn error_count(&self) -> usize {
        self.errors
    }

    pub fn warning_count(&self) -> usize {
        self.warnings
    }

    pub fn has_errors(&self) -> bool {
        self.errors > 0
    }

    pub fn reports(&self) -> &[Report] {
        &self.reports
    }

    /// Capture the current state so a trial parse can be undone
    pub fn checkpoint(&self) -> Checkpoint {
        Checkpoint {
            len: self.reports.len(),
            errors: self.errors,
            warnings: self.warnings,
        }
    }

    /// Discard every report made after `cp`, returning the discarded reports
    pub fn rollback(&mut self, cp: Checkpoint) -> Vec<Report> {
        let discarded = self.reports.split_off(cp.len);
        self.errors = cp.errors;
        self.warnings = cp.warnings;
        discarded
    }

    /// Re-append previously rolled-back reports verbatim
    pub fn replay(&mut self, reports: Vec<Report>) {
        for report in reports {
            match report.severity {
                Severity::Error => self.errors += 1,
                Severity::Warning => self.warnings += 1,
            }
            self.reports.push(report);
        }
    }

    /// Number of errors reported since `cp`
    pub fn errors_since(&self, cp: Checkpoint) -> usize {
        self.errors - cp.errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let mut sink = ErrorSink::new();
        sink.set_source("a.tsv");
        sink.error("bad");
        sink.warn("iffy");
        assert_eq!(sink.error_count(), 1);
        assert_eq!(sink.warning_count(), 1);
        assert!(sink.has_errors());
    }

    #[test]
    fn test_rollback_restores_counters() {
        let mut sink = ErrorSink::new();
        sink.error("kept");
        let cp = sink.checkpoint();
        sink.error("trial 1");
        sink.warn("trial 2");
        assert_eq!(sink.errors_since(cp), 1);
        let discarded = sink.rollback(cp);
        assert_eq!(discarded.len(), 2);
        assert_eq!(sink.error_count(), 1);
        assert_eq!(sink.warning_count(), 0);
        assert_eq!(sink.reports().len(), 1);
    }

    #[test]
    fn test_col_type_scope() {
        let mut sink = ErrorSink::new();
        sink.with_col_type("integer", |s| s.error("out of range"));
        sink.error("untyped");
        assert_eq!(sink.reports()[0].column_type.as_deref(), Some("integer"));
        assert_eq!(sink.reports()[1].column_type, None);
    }

    #[test]
    fn test_replay_keeps_severities() {
        let mut sink = ErrorSink::new();
        let cp = sink.checkpoint();
        sink.error("best");
        let saved = sink.rollback(cp);
        sink.replay(saved);
        assert_eq!(sink.error_count(), 1);
        assert_eq!(sink.reports()[0].message, "best");
    }
}
