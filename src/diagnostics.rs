/// Diagnostics classification.
///
/// The editor host pushes the full list of diagnostic severities for a
/// document whenever it changes (`diagnosticsChanged`); the store keeps the
/// latest list per document and classifies on demand. Information and hint
/// diagnostics never affect the classification.
use crate::snapshot::DocumentId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiagnosticSeverity {
    Error,
    Warning,
    Information,
    Hint,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiagnosticsState {
    Errors,
    Warnings,
    Clean,
}

impl DiagnosticsState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Errors   => "errors",
            Self::Warnings => "warnings",
            Self::Clean    => "clean",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "errors"   => Some(Self::Errors),
            "warnings" => Some(Self::Warnings),
            "clean"    => Some(Self::Clean),
            _ => None,
        }
    }
}

/// errors > warnings > clean. Any error wins, even alongside warnings.
pub fn classify(severities: &[DiagnosticSeverity]) -> DiagnosticsState {
    let mut has_warnings = false;
    for severity in severities {
        match severity {
            DiagnosticSeverity::Error   => return DiagnosticsState::Errors,
            DiagnosticSeverity::Warning => has_warnings = true,
            _ => {}
        }
    }
    if has_warnings {
        DiagnosticsState::Warnings
    } else {
        DiagnosticsState::Clean
    }
}

pub trait DiagnosticsSource {
    fn diagnostics_state(&self, document: &DocumentId) -> DiagnosticsState;
}

#[derive(Debug, Default)]
pub struct DiagnosticsStore {
    by_document: HashMap<DocumentId, Vec<DiagnosticSeverity>>,
}

impl DiagnosticsStore {
    pub fn set(&mut self, document: &DocumentId, severities: Vec<DiagnosticSeverity>) {
        if severities.is_empty() {
            self.by_document.remove(document);
        } else {
            self.by_document.insert(document.clone(), severities);
        }
    }

    pub fn forget(&mut self, document: &DocumentId) {
        self.by_document.remove(document);
    }
}

impl DiagnosticsSource for DiagnosticsStore {
    fn diagnostics_state(&self, document: &DocumentId) -> DiagnosticsState {
        let state = self
            .by_document
            .get(document)
            .map(|s| classify(s))
            .unwrap_or(DiagnosticsState::Clean);
        tracing::debug!("Diagnostics state for {}: {}", document, state.as_str());
        state
    }
}
