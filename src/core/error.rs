use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Conditions that make a fusion call itself invalid.
#[derive(Debug, Error)]
pub enum FusionError {
    #[error("page {page_id}: no engine outputs supplied")]
    NoEngines { page_id: String },

    #[error("page {page_id}: engine id `{engine_id}` supplied more than once")]
    DuplicateEngine { page_id: String, engine_id: String },

    #[error("invalid fusion configuration: {0}")]
    InvalidConfig(String),

    #[error("failed to load dictionary from {path}: {source}")]
    Dictionary {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Non-fatal conditions recorded on a page result.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FusionDiagnostic {
    EngineUnavailable {
        engine_id: String,
        reason: String,
    },
    EngineEmptyOutput {
        engine_id: String,
    },
    AlignmentAmbiguity {
        row_index: usize,
        engine_id: String,
    },
    AllEnginesEmpty,
    InvalidConfidence {
        engine_id: String,
        line: usize,
        value: f32,
    },
    ConfidenceLengthMismatch {
        engine_id: String,
        lines: usize,
        confidences: usize,
    },
    NoTrustworthyBaseline {
        best_distance: f32,
    },
    FusionSkipped {
        engine_id: String,
    },
    Escalated {
        service_id: String,
    },
}

impl FusionDiagnostic {
    pub fn engine_id(&self) -> Option<&str> {
        match self {
            FusionDiagnostic::EngineUnavailable { engine_id, .. }
            | FusionDiagnostic::EngineEmptyOutput { engine_id }
            | FusionDiagnostic::AlignmentAmbiguity { engine_id, .. }
            | FusionDiagnostic::InvalidConfidence { engine_id, .. }
            | FusionDiagnostic::ConfidenceLengthMismatch { engine_id, .. }
            | FusionDiagnostic::FusionSkipped { engine_id } => Some(engine_id),
            FusionDiagnostic::AllEnginesEmpty
            | FusionDiagnostic::NoTrustworthyBaseline { .. }
            | FusionDiagnostic::Escalated { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diagnostics_serialize_with_kind_tag() {
        let diag = FusionDiagnostic::EngineEmptyOutput {
            engine_id: "pdftext".to_string(),
        };
        let json = serde_json::to_string(&diag).unwrap();
        assert_eq!(json, r#"{"kind":"engine_empty_output","engine_id":"pdftext"}"#);
    }
}
