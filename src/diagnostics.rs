//! Diagnostic infrastructure.
//!
//! Collects errors and warnings emitted during resolution. Diagnostics are
//! anchored to AST ids rather than source positions; rendering against
//! source text happens elsewhere in the front-end.
//!
//! Reporting a diagnostic never aborts resolution: callers produce an
//! erroneous or unknown type and continue.

use crate::ast::AstId;
use serde::Serialize;
use std::fmt;

/// The severity level of a diagnostic.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DiagnosticSeverity {
    Hint = 4,
    Info = 3,
    Warning = 2,
    Error = 1,
}

impl DiagnosticSeverity {
    pub fn name(&self) -> &'static str {
        match self {
            DiagnosticSeverity::Error => "error",
            DiagnosticSeverity::Warning => "warning",
            DiagnosticSeverity::Info => "info",
            DiagnosticSeverity::Hint => "hint",
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, DiagnosticSeverity::Error)
    }
}

impl fmt::Display for DiagnosticSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// A single diagnostic message.
#[derive(Clone, Debug, Serialize)]
pub struct Diagnostic {
    pub severity: DiagnosticSeverity,
    /// The AST node the message is anchored to.
    pub anchor: AstId,
    pub message: String,
}

impl Diagnostic {
    pub fn error(anchor: AstId, message: impl Into<String>) -> Self {
        Diagnostic {
            severity: DiagnosticSeverity::Error,
            anchor,
            message: message.into(),
        }
    }

    pub fn warning(anchor: AstId, message: impl Into<String>) -> Self {
        Diagnostic {
            severity: DiagnosticSeverity::Warning,
            anchor,
            message: message.into(),
        }
    }
}

/// A collection of diagnostics for a resolution pass.
#[derive(Clone, Debug, Default)]
pub struct DiagnosticBag {
    diagnostics: Vec<Diagnostic>,
}

impl DiagnosticBag {
    pub fn new() -> Self {
        DiagnosticBag::default()
    }

    pub fn push(&mut self, diagnostic: Diagnostic) {
        self.diagnostics.push(diagnostic);
    }

    pub fn error(&mut self, anchor: AstId, message: impl Into<String>) {
        self.push(Diagnostic::error(anchor, message));
    }

    pub fn warning(&mut self, anchor: AstId, message: impl Into<String>) {
        self.push(Diagnostic::warning(anchor, message));
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics.iter()
    }

    pub fn len(&self) -> usize {
        self.diagnostics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.diagnostics.is_empty()
    }

    pub fn error_count(&self) -> usize {
        self.diagnostics
            .iter()
            .filter(|d| d.severity.is_error())
            .count()
    }

    pub fn clear(&mut self) {
        self.diagnostics.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bag_collects() {
        let mut bag = DiagnosticBag::new();
        bag.error(AstId::NONE, "first");
        bag.warning(AstId::NONE, "second");

        assert_eq!(bag.len(), 2);
        assert_eq!(bag.error_count(), 1);
        assert!(!bag.is_empty());
    }
}
