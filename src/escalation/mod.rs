//! Hand-off of low-quality pages to an external vision transcription service.
//!
//! The fusion core only raises `needs_escalation`; this module decides which
//! flagged pages are actually sent (budget), bounds how many calls run at once
//! and how long each may take, and turns a successful transcription into a new
//! page result. A refusal, error or timeout never replaces the prior result.

pub mod orchestrator;

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::confidence::score_line_confidence;
use crate::core::error::FusionDiagnostic;
use crate::core::model::{FusedLine, FusionMethod, PageFusionResult};
use crate::core::text::normalize_line;

pub use orchestrator::{
    EscalationBudget, EscalationOrchestrator, EscalationOutcome, EscalationSettings, EscalationState,
};

/// What the vision service gets for one page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EscalationRequest {
    pub page_id: String,
    pub image_path: Option<PathBuf>,
    /// Current best fused text, offered as a hint.
    pub hint_lines: Vec<String>,
    pub reason: Option<String>,
}

impl EscalationRequest {
    pub fn from_result(result: &PageFusionResult, image_path: Option<PathBuf>) -> Self {
        Self {
            page_id: result.page_id.clone(),
            image_path,
            hint_lines: result.fused_lines.iter().map(|line| line.text.clone()).collect(),
            reason: result.escalation_reason.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum VisionResponse {
    /// Full replacement line sequence for the page.
    Lines(Vec<String>),
    Refused(String),
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum EscalationError {
    #[error("vision service error: {0}")]
    Service(String),

    #[error("vision service timed out after {0:?}")]
    Timeout(Duration),

    #[error("vision service refused the page: {0}")]
    Refused(String),
}

#[async_trait]
pub trait VisionService: Send + Sync {
    /// Identifier recorded as the source engine of escalated lines.
    fn service_id(&self) -> &str;

    async fn transcribe(&self, request: &EscalationRequest) -> Result<VisionResponse, EscalationError>;
}

/// Builds the replacement result for a successful transcription.
///
/// Returns `None` when the transcription has no text, in which case the prior
/// result stays authoritative. The prior quality scores are carried over as a
/// record of why the page was escalated.
pub fn apply_replacement(prior: &PageFusionResult, service_id: &str, lines: &[String]) -> Option<PageFusionResult> {
    let texts: Vec<String> = lines
        .iter()
        .map(|line| normalize_line(line))
        .filter(|line| !line.trim().is_empty())
        .collect();
    if texts.is_empty() {
        return None;
    }

    let confidence = score_line_confidence(FusionMethod::Escalated, 0.0, None, None);
    let fused_lines = texts
        .into_iter()
        .enumerate()
        .map(|(row_index, text)| FusedLine {
            row_index,
            text,
            method: FusionMethod::Escalated,
            source_engines: vec![service_id.to_string()],
            confidence,
        })
        .collect();

    let mut diagnostics = prior.diagnostics.clone();
    diagnostics.push(FusionDiagnostic::Escalated {
        service_id: service_id.to_string(),
    });

    Some(PageFusionResult {
        fused_lines,
        needs_escalation: false,
        diagnostics,
        ..prior.clone()
    })
}
