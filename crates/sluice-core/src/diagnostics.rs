//! Structured diagnostics.
//!
//! Operators report recoverable problems (bad input, a schema they cannot
//! handle) through a `DiagnosticHandler` instead of failing. Emitting an
//! error diagnostic does not by itself stop a pipeline; only a typed error
//! returned from an operator does.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Note,
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Severity::Note => "note",
            Severity::Warning => "warning",
            Severity::Error => "error",
        })
    }
}

/// Points at the part of a pipeline definition a diagnostic is about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Annotation {
    pub primary: bool,
    /// What is annotated, e.g. an operator name or an expression.
    pub source: String,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub message: String,
    pub notes: Vec<String>,
    pub annotations: Vec<Annotation>,
}

impl Diagnostic {
    pub fn new(severity: Severity, message: impl Into<String>) -> Self {
        Self {
            severity,
            message: message.into(),
            notes: vec![],
            annotations: vec![],
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(Severity::Error, message)
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self::new(Severity::Warning, message)
    }

    pub fn note(mut self, note: impl Into<String>) -> Self {
        self.notes.push(note.into());
        self
    }

    pub fn primary(mut self, source: impl Into<String>, text: impl Into<String>) -> Self {
        self.annotations.push(Annotation {
            primary: true,
            source: source.into(),
            text: text.into(),
        });
        self
    }

    pub fn emit(self, handler: &dyn DiagnosticHandler) {
        handler.emit(self);
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.severity, self.message)?;
        for a in &self.annotations {
            write!(f, "\n  --> {}", a.source)?;
            if !a.text.is_empty() {
                write!(f, ": {}", a.text)?;
            }
        }
        for note in &self.notes {
            write!(f, "\n  = note: {note}")?;
        }
        Ok(())
    }
}

impl std::error::Error for Diagnostic {}

/// Sink for diagnostics. Takes `&self` so one handler can be shared by all
/// operators of a run.
pub trait DiagnosticHandler: Send + Sync {
    fn emit(&self, diagnostic: Diagnostic);
}

/// Stores diagnostics for later inspection. With a limit, only the first
/// `limit` are kept and the rest are counted as dropped; errors are always
/// counted.
#[derive(Debug, Default)]
pub struct CollectingHandler {
    diagnostics: Mutex<Vec<Diagnostic>>,
    limit: Option<usize>,
    errors: AtomicUsize,
    dropped: AtomicUsize,
}

impl CollectingHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limit(limit: usize) -> Self {
        Self {
            limit: Some(limit),
            ..Self::default()
        }
    }

    pub fn dropped(&self) -> usize {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn diagnostics(&self) -> Vec<Diagnostic> {
        match self.diagnostics.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn error_count(&self) -> usize {
        self.errors.load(Ordering::Relaxed)
    }
}

impl DiagnosticHandler for CollectingHandler {
    fn emit(&self, diagnostic: Diagnostic) {
        if diagnostic.severity == Severity::Error {
            self.errors.fetch_add(1, Ordering::Relaxed);
        }
        let mut guard = match self.diagnostics.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if self.limit.is_some_and(|limit| guard.len() >= limit) {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return;
        }
        guard.push(diagnostic);
    }
}

/// Forwards diagnostics to `tracing`, then to an inner handler.
pub struct LoggingHandler<H> {
    inner: H,
}

impl<H: DiagnosticHandler> LoggingHandler<H> {
    pub fn new(inner: H) -> Self {
        Self { inner }
    }

    pub fn inner(&self) -> &H {
        &self.inner
    }
}

impl<H: DiagnosticHandler> DiagnosticHandler for LoggingHandler<H> {
    fn emit(&self, diagnostic: Diagnostic) {
        match diagnostic.severity {
            Severity::Error => tracing::error!(diagnostic = %diagnostic, "operator diagnostic"),
            Severity::Warning => tracing::warn!(diagnostic = %diagnostic, "operator diagnostic"),
            Severity::Note => tracing::info!(diagnostic = %diagnostic, "operator diagnostic"),
        }
        self.inner.emit(diagnostic);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_and_collection() {
        let handler = CollectingHandler::new();
        Diagnostic::warning("field `x` does not exist")
            .primary("where x == 1", "unresolved field")
            .note("the filter drops every event of this schema")
            .emit(&handler);
        Diagnostic::error("boom").emit(&handler);
        let all = handler.diagnostics();
        assert_eq!(all.len(), 2);
        assert_eq!(handler.error_count(), 1);
        let text = all[0].to_string();
        assert!(text.starts_with("warning: field `x` does not exist"));
        assert!(text.contains("--> where x == 1: unresolved field"));
        assert!(text.contains("= note: the filter drops"));
    }

    #[test]
    fn limit_keeps_the_first_diagnostics() {
        let handler = CollectingHandler::with_limit(2);
        for i in 0..5 {
            Diagnostic::warning(format!("bad line {i}")).emit(&handler);
        }
        Diagnostic::error("fatal").emit(&handler);
        let kept: Vec<String> = handler.diagnostics().iter().map(|d| d.message.clone()).collect();
        assert_eq!(kept, ["bad line 0", "bad line 1"]);
        assert_eq!(handler.dropped(), 4);
        assert_eq!(handler.error_count(), 1);
    }
}
