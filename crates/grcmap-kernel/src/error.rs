//! Error types for grcmap kernel operations.
//!
//! Two tiers: [`GrcMapError`] is fatal for the call that produced it (bad
//! percentage, malformed table, unreadable input). [`Diagnostic`] records
//! the non-fatal outcomes a batch run counts and reports before moving on.

use crate::mapping::ValidationReport;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Errors raised by invalid input or unusable configuration.
#[derive(Debug, thiserror::Error)]
pub enum GrcMapError {
    /// `implemented` fell outside `0..=100`.
    #[error("invalid percentage: implemented must be within 0..=100, got {value}")]
    InvalidPercentage { value: i64 },

    /// `implemented` was not a whole number at all.
    #[error("invalid percentage: implemented must be a whole number within 0..=100, got {raw}")]
    MalformedPercentage { raw: String },

    /// The family mapping table failed load-time validation.
    #[error("invalid mapping table: {0}")]
    InvalidTable(ValidationReport),

    #[error("failed to read file: {path}: {source}")]
    ReadFile {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid toml at {path}: {source}")]
    ParseToml {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid json at {path}: {source}")]
    ParseJson {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Which non-fatal condition a diagnostic reports.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticKind {
    /// Evidence name has no `<PREFIX><digits>` token, or the number is in no range.
    UnclassifiableEvidence,
    /// The family resolved, but no control in the export belongs to it.
    NoMatchingControls,
    /// Controls matched, but no subcontrol description contains any pattern.
    NoPatternMatch,
    /// A subcontrol carries an `implemented` value outside `0..=100`.
    InvalidPercentage,
    /// The same evidence/subcontrol pair was produced more than once.
    AssociationConflict,
}

impl DiagnosticKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::UnclassifiableEvidence => "unclassifiable_evidence",
            Self::NoMatchingControls => "no_matching_controls",
            Self::NoPatternMatch => "no_pattern_match",
            Self::InvalidPercentage => "invalid_percentage",
            Self::AssociationConflict => "association_conflict",
        }
    }
}

impl std::fmt::Display for DiagnosticKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Severity of a diagnostic.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

/// One non-fatal outcome, keyed by the record it concerns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    pub severity: Severity,
    /// Id of the evidence or subcontrol the diagnostic is about.
    pub subject: String,
    pub message: String,
}

impl Diagnostic {
    pub fn new(
        kind: DiagnosticKind,
        subject: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        let severity = match kind {
            DiagnosticKind::AssociationConflict => Severity::Info,
            DiagnosticKind::UnclassifiableEvidence
            | DiagnosticKind::NoMatchingControls
            | DiagnosticKind::NoPatternMatch => Severity::Warning,
            DiagnosticKind::InvalidPercentage => Severity::Error,
        };
        Self {
            kind,
            severity,
            subject: subject.into(),
            message: message.into(),
        }
    }
}

/// Count diagnostics per kind, in kind order.
pub fn count_by_kind(diagnostics: &[Diagnostic]) -> BTreeMap<DiagnosticKind, usize> {
    let mut counts = BTreeMap::new();
    for diagnostic in diagnostics {
        *counts.entry(diagnostic.kind).or_insert(0) += 1;
    }
    counts
}
