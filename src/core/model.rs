use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::core::error::{FusionDiagnostic, FusionError};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum FusionMethod {
    Majority,
    Confidence,
    CharFusion,
    LengthFallback,
    SingleEngine,
    Escalated,
}

impl FusionMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            FusionMethod::Majority => "majority",
            FusionMethod::Confidence => "confidence",
            FusionMethod::CharFusion => "char_fusion",
            FusionMethod::LengthFallback => "length_fallback",
            FusionMethod::SingleEngine => "single_engine",
            FusionMethod::Escalated => "escalated",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EngineStatus {
    Voting,
    Outlier,
    Unavailable,
}

/// Optional, engine-specific facts that travel alongside an engine's lines.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct EngineDiagnostics {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub elapsed_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mean_confidence: Option<f32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

/// One engine's transcription of one page, as handed over by the OCR collaborator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RawEngineOutput {
    pub engine_id: String,
    #[serde(default)]
    pub lines: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line_confidences: Option<Vec<f32>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diagnostics: Option<EngineDiagnostics>,
}

impl RawEngineOutput {
    pub fn new<I, S>(engine_id: impl Into<String>, lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            engine_id: engine_id.into(),
            lines: lines.into_iter().map(Into::into).collect(),
            line_confidences: None,
            error: None,
            diagnostics: None,
        }
    }

    pub fn failed(engine_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            engine_id: engine_id.into(),
            lines: Vec::new(),
            line_confidences: None,
            error: Some(reason.into()),
            diagnostics: None,
        }
    }

    pub fn with_confidences(mut self, confidences: Vec<f32>) -> Self {
        self.line_confidences = Some(confidences);
        self
    }

    pub fn with_diagnostics(mut self, diagnostics: EngineDiagnostics) -> Self {
        self.diagnostics = Some(diagnostics);
        self
    }
}

/// All engine outputs for a single page.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EngineSet {
    pub page_id: String,
    pub engines: Vec<RawEngineOutput>,
}

impl EngineSet {
    pub fn new(page_id: impl Into<String>, engines: Vec<RawEngineOutput>) -> Result<Self, FusionError> {
        let set = Self {
            page_id: page_id.into(),
            engines,
        };
        set.check_unique_ids()?;
        Ok(set)
    }

    pub fn check_unique_ids(&self) -> Result<(), FusionError> {
        let mut seen = BTreeSet::new();
        for engine in &self.engines {
            if !seen.insert(engine.engine_id.as_str()) {
                return Err(FusionError::DuplicateEngine {
                    page_id: self.page_id.clone(),
                    engine_id: engine.engine_id.clone(),
                });
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Candidate {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
}

impl Candidate {
    pub fn new(text: impl Into<String>, confidence: Option<f32>) -> Self {
        Self {
            text: text.into(),
            confidence,
        }
    }
}

/// One logical line position across the voting engines.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AlignedRow {
    pub row_index: usize,
    pub candidates: BTreeMap<String, Candidate>,
}

impl AlignedRow {
    pub fn new(row_index: usize) -> Self {
        Self {
            row_index,
            candidates: BTreeMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FusedLine {
    pub row_index: usize,
    pub text: String,
    pub method: FusionMethod,
    pub source_engines: Vec<String>,
    pub confidence: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EngineSpellMetrics {
    pub engine_id: String,
    pub oov_ratio: f32,
    pub char_confusion_score: f32,
    pub total_words: usize,
    pub quality_weight: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EngineReport {
    pub engine_id: String,
    pub status: EngineStatus,
    pub line_count: usize,
    pub char_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avg_distance: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub spell: Option<EngineSpellMetrics>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diagnostics: Option<EngineDiagnostics>,
}

/// Terminal artifact of fusing one page.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PageFusionResult {
    pub page_id: String,
    pub fused_lines: Vec<FusedLine>,
    pub outlier_engines: BTreeSet<String>,
    pub disagreement_score: f32,
    pub corruption_score: f32,
    pub missing_content_score: f32,
    pub needs_escalation: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub escalation_reason: Option<String>,
    #[serde(default)]
    pub engines: Vec<EngineReport>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub diagnostics: Vec<FusionDiagnostic>,
}

impl PageFusionResult {
    pub fn text_lines(&self) -> Vec<&str> {
        self.fused_lines.iter().map(|line| line.text.as_str()).collect()
    }

    pub fn text(&self) -> String {
        self.text_lines().join("\n")
    }

    pub fn method_counts(&self) -> BTreeMap<&'static str, usize> {
        let mut counts = BTreeMap::new();
        for line in &self.fused_lines {
            *counts.entry(line.method.as_str()).or_insert(0) += 1;
        }
        counts
    }
}
