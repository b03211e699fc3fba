use crate::core::config::FusionConfig;
use crate::core::model::{AlignedRow, FusedLine, FusionMethod};
use crate::core::text::{alphabetic_ratio, collapse_whitespace, is_numeric_like};
use crate::fusion::compare::mean_pairwise_distance;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EscalationReason {
    NoText,
    HighDisagreement,
    Corruption,
    MissingContent,
}

impl EscalationReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            EscalationReason::NoText => "no_text",
            EscalationReason::HighDisagreement => "high_disagreement",
            EscalationReason::Corruption => "corruption",
            EscalationReason::MissingContent => "missing_content",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageQuality {
    pub disagreement: f32,
    pub corruption: f32,
    pub missing_content: f32,
    pub reason: Option<EscalationReason>,
}

impl PageQuality {
    pub fn no_text() -> Self {
        Self {
            disagreement: 0.0,
            corruption: 0.0,
            missing_content: 0.0,
            reason: Some(EscalationReason::NoText),
        }
    }

    pub fn needs_escalation(&self) -> bool {
        self.reason.is_some()
    }
}

/// Mean pairwise distance between a row's candidates; `None` below two candidates.
pub fn row_disagreement(row: &AlignedRow) -> Option<f32> {
    let texts: Vec<String> = row
        .candidates
        .values()
        .map(|candidate| collapse_whitespace(&candidate.text))
        .collect();
    let refs: Vec<&str> = texts.iter().map(String::as_str).collect();
    mean_pairwise_distance(&refs)
}

/// Fused text that reads like symbol soup rather than words or numbers.
pub fn is_corrupted_line(text: &str) -> bool {
    let visible = text.chars().filter(|c| !c.is_whitespace()).count();
    if visible < 4 || is_numeric_like(text) {
        return false;
    }
    alphabetic_ratio(text).is_some_and(|ratio| ratio < 0.3)
}

pub fn assess_page(
    rows: &[AlignedRow],
    lines: &[FusedLine],
    voting_engines: usize,
    config: &FusionConfig,
) -> PageQuality {
    let distances: Vec<f32> = rows.iter().filter_map(row_disagreement).collect();
    let disagreement = mean(&distances);

    let corrupted = lines
        .iter()
        .filter(|line| line.method == FusionMethod::LengthFallback || is_corrupted_line(&line.text))
        .count();
    let corruption = if lines.is_empty() {
        0.0
    } else {
        corrupted as f32 / lines.len() as f32
    };

    let voting = voting_engines.max(1) as f32;
    let missing: Vec<f32> = rows
        .iter()
        .map(|row| (1.0 - row.len() as f32 / voting).clamp(0.0, 1.0))
        .collect();
    let missing_content = mean(&missing);

    let reason = if lines.is_empty() {
        Some(EscalationReason::NoText)
    } else if disagreement > config.critical_disagreement_threshold {
        Some(EscalationReason::HighDisagreement)
    } else if corruption > config.critical_corruption_threshold {
        Some(EscalationReason::Corruption)
    } else if missing_content > config.critical_missing_content_threshold {
        Some(EscalationReason::MissingContent)
    } else {
        None
    };

    PageQuality {
        disagreement,
        corruption,
        missing_content,
        reason,
    }
}

fn mean(values: &[f32]) -> f32 {
    if values.is_empty() {
        0.0
    } else {
        (values.iter().sum::<f32>() / values.len() as f32).clamp(0.0, 1.0)
    }
}
