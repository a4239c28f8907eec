//! # Diagnostics
//!
//! Non-fatal findings produced while writing or reading a derived file. A
//! damaged line never aborts the codec; it becomes one of these and the
//! surrounding content is recovered.

use serde::{Deserialize, Serialize};
use std::fmt;
use trellis_outline::Gnx;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DiagnosticKind {
    MalformedSentinel,
    LevelMismatch { expected: usize, found: usize },
    AmbiguousSectionReference { name: String, candidates: Vec<Gnx> },
    DanglingSectionReference { name: String },
    RecursiveSectionReference { name: String },
    UnbalancedBracket { expected: String, found: String },
    MultipleOthers,
    OrphanedNode { gnx: Gnx },
    UnwrittenNode { gnx: Gnx },
    MisplacedSentinel,
}

impl DiagnosticKind {
    pub fn default_severity(&self) -> Severity {
        match self {
            DiagnosticKind::OrphanedNode { .. } => Severity::Info,
            DiagnosticKind::DanglingSectionReference { .. }
            | DiagnosticKind::MultipleOthers
            | DiagnosticKind::MalformedSentinel
            | DiagnosticKind::MisplacedSentinel
            | DiagnosticKind::UnwrittenNode { .. } => Severity::Warning,
            DiagnosticKind::LevelMismatch { .. }
            | DiagnosticKind::AmbiguousSectionReference { .. }
            | DiagnosticKind::RecursiveSectionReference { .. }
            | DiagnosticKind::UnbalancedBracket { .. } => Severity::Error,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            DiagnosticKind::MalformedSentinel => "malformed sentinel",
            DiagnosticKind::LevelMismatch { .. } => "level mismatch",
            DiagnosticKind::AmbiguousSectionReference { .. } => "ambiguous section reference",
            DiagnosticKind::DanglingSectionReference { .. } => "dangling section reference",
            DiagnosticKind::RecursiveSectionReference { .. } => "recursive section reference",
            DiagnosticKind::UnbalancedBracket { .. } => "unbalanced bracket",
            DiagnosticKind::MultipleOthers => "multiple @others",
            DiagnosticKind::OrphanedNode { .. } => "orphaned node",
            DiagnosticKind::UnwrittenNode { .. } => "unwritten node",
            DiagnosticKind::MisplacedSentinel => "misplaced sentinel",
        }
    }
}

/// One finding, located by 1-based line number (0 when no line applies)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    #[serde(flatten)]
    pub kind: DiagnosticKind,
    pub severity: Severity,
    pub line: usize,
    pub message: String,
}

impl Diagnostic {
    pub fn new(kind: DiagnosticKind, line: usize, message: impl Into<String>) -> Self {
        Self {
            severity: kind.default_severity(),
            kind,
            line,
            message: message.into(),
        }
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.line > 0 {
            write!(f, "line {}: {}: {}", self.line, self.kind.name(), self.message)
        } else {
            write!(f, "{}: {}", self.kind.name(), self.message)
        }
    }
}

/// Pretty-print diagnostics with source context using ariadne
#[cfg(feature = "pretty-errors")]
pub fn format_diagnostics(source: &str, filename: &str, diagnostics: &[Diagnostic]) -> String {
    use ariadne::{Color, Label, Report, ReportKind, Source};

    // ariadne spans count chars, not bytes
    let mut line_spans = Vec::new();
    let mut offset = 0;
    for line in source.split('\n') {
        let len = line.chars().count();
        line_spans.push(offset..offset + len);
        offset += len + 1;
    }
    let end = offset.saturating_sub(1);

    let mut output = Vec::new();
    for diagnostic in diagnostics {
        let span = diagnostic
            .line
            .checked_sub(1)
            .and_then(|i| line_spans.get(i).cloned())
            .unwrap_or(end..end);
        let (kind, color) = match diagnostic.severity {
            Severity::Error => (ReportKind::Error, Color::Red),
            Severity::Warning => (ReportKind::Warning, Color::Yellow),
            Severity::Info => (ReportKind::Advice, Color::Blue),
        };

        let report = Report::build(kind, filename, span.start)
            .with_message(diagnostic.kind.name())
            .with_label(
                Label::new((filename, span))
                    .with_color(color)
                    .with_message(&diagnostic.message),
            )
            .finish();

        if report
            .write((filename, Source::from(source)), &mut output)
            .is_err()
        {
            output.extend_from_slice(diagnostic.to_string().as_bytes());
            output.push(b'\n');
        }
    }

    String::from_utf8(output).unwrap_or_else(|_| "Diagnostic formatting failed".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_severity() {
        let d = Diagnostic::new(DiagnosticKind::MultipleOthers, 3, "second @others");
        assert_eq!(d.severity, Severity::Warning);
        assert!(!d.is_error());

        let d = Diagnostic::new(
            DiagnosticKind::LevelMismatch {
                expected: 2,
                found: 4,
            },
            7,
            "bad level",
        );
        assert!(d.is_error());
        assert_eq!(d.to_string(), "line 7: level mismatch: bad level");
    }

    #[test]
    fn test_diagnostic_json_shape() {
        let d = Diagnostic::new(
            DiagnosticKind::DanglingSectionReference {
                name: "helper".into(),
            },
            2,
            "no definition",
        );
        let json = serde_json::to_value(&d).unwrap();
        assert_eq!(json["kind"], "dangling_section_reference");
        assert_eq!(json["name"], "helper");
        assert_eq!(json["severity"], "warning");
    }

    #[cfg(feature = "pretty-errors")]
    #[test]
    fn test_format_diagnostics_mentions_message() {
        let source = "#@+leo-ver=5-thin\n#@+bogus\n#@-leo\n";
        let d = Diagnostic::new(DiagnosticKind::MalformedSentinel, 2, "unknown sentinel");
        let out = format_diagnostics(source, "a.py", &[d]);
        assert!(out.contains("unknown sentinel"));
    }
}
