use tracing::{debug, warn};

use crate::core::config::FusionConfig;
use crate::core::error::{FusionDiagnostic, FusionError};
use crate::core::model::{EngineDiagnostics, EngineSet};
use crate::core::text::normalize_line;

/// An engine's page after cleanup; the unit every later stage works on.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedEngine {
    pub engine_id: String,
    pub lines: Vec<String>,
    pub confidences: Option<Vec<Option<f32>>>,
    pub diagnostics: Option<EngineDiagnostics>,
}

impl NormalizedEngine {
    pub fn char_count(&self) -> usize {
        self.lines.iter().map(|line| line.chars().count()).sum()
    }

    pub fn page_text(&self) -> String {
        self.lines.join("\n")
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn confidence_at(&self, line: usize) -> Option<f32> {
        self.confidences
            .as_ref()
            .and_then(|confs| confs.get(line).copied().flatten())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct UnavailableEngine {
    pub engine_id: String,
    pub reason: String,
    pub diagnostics: Option<EngineDiagnostics>,
}

#[derive(Debug, Clone, Default)]
pub struct NormalizedPage {
    pub engines: Vec<NormalizedEngine>,
    pub unavailable: Vec<UnavailableEngine>,
    pub diagnostics: Vec<FusionDiagnostic>,
}

/// Validates the engine set and turns every usable engine into ordered lines.
///
/// Engines come out sorted by id so that every later stage iterates them in
/// the same order regardless of how the caller supplied them.
pub fn normalize_engines(set: &EngineSet, config: &FusionConfig) -> Result<NormalizedPage, FusionError> {
    if set.engines.is_empty() {
        return Err(FusionError::NoEngines {
            page_id: set.page_id.clone(),
        });
    }
    set.check_unique_ids()?;

    let mut selected: Vec<_> = set
        .engines
        .iter()
        .filter(|raw| config.engine_ids.is_empty() || config.engine_ids.contains(&raw.engine_id))
        .collect();
    if selected.is_empty() {
        return Err(FusionError::NoEngines {
            page_id: set.page_id.clone(),
        });
    }
    selected.sort_by(|a, b| a.engine_id.cmp(&b.engine_id));

    let mut page = NormalizedPage::default();

    for raw in selected {
        if let Some(reason) = &raw.error {
            warn!(page = %set.page_id, engine = %raw.engine_id, %reason, "engine unavailable, excluded");
            page.diagnostics.push(FusionDiagnostic::EngineUnavailable {
                engine_id: raw.engine_id.clone(),
                reason: reason.clone(),
            });
            page.unavailable.push(UnavailableEngine {
                engine_id: raw.engine_id.clone(),
                reason: reason.clone(),
                diagnostics: raw.diagnostics.clone(),
            });
            continue;
        }

        let confidences = match &raw.line_confidences {
            Some(confs) if confs.len() != raw.lines.len() => {
                page.diagnostics.push(FusionDiagnostic::ConfidenceLengthMismatch {
                    engine_id: raw.engine_id.clone(),
                    lines: raw.lines.len(),
                    confidences: confs.len(),
                });
                None
            }
            Some(confs) => Some(confs.as_slice()),
            None => None,
        };

        let mut lines = Vec::with_capacity(raw.lines.len());
        let mut kept_confidences = confidences.map(|_| Vec::with_capacity(raw.lines.len()));

        for (idx, line) in raw.lines.iter().enumerate() {
            let normalized = normalize_line(line);
            if normalized.trim().is_empty() {
                continue;
            }
            lines.push(normalized);
            if let (Some(kept), Some(confs)) = (kept_confidences.as_mut(), confidences) {
                kept.push(sanitize_confidence(
                    confs[idx],
                    &raw.engine_id,
                    idx,
                    &mut page.diagnostics,
                ));
            }
        }

        if lines.is_empty() {
            debug!(page = %set.page_id, engine = %raw.engine_id, "engine produced no text");
            page.diagnostics.push(FusionDiagnostic::EngineEmptyOutput {
                engine_id: raw.engine_id.clone(),
            });
        }

        page.engines.push(NormalizedEngine {
            engine_id: raw.engine_id.clone(),
            lines,
            confidences: kept_confidences,
            diagnostics: raw.diagnostics.clone(),
        });
    }

    Ok(page)
}

fn sanitize_confidence(
    value: f32,
    engine_id: &str,
    line: usize,
    diagnostics: &mut Vec<FusionDiagnostic>,
) -> Option<f32> {
    if (0.0..=1.0).contains(&value) {
        return Some(value);
    }
    diagnostics.push(FusionDiagnostic::InvalidConfidence {
        engine_id: engine_id.to_string(),
        line,
        value,
    });
    if value.is_nan() {
        None
    } else {
        Some(value.clamp(0.0, 1.0))
    }
}
