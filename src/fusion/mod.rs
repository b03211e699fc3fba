pub mod align;
pub mod char_fuse;
pub mod compare;
pub mod finalize;
pub mod normalize;
pub mod outlier;
pub mod resolve;
pub mod spell;

use std::collections::BTreeMap;

use tracing::{debug, info};

use crate::core::config::FusionConfig;
use crate::core::error::{FusionDiagnostic, FusionError};
use crate::core::model::{
    EngineReport, EngineSet, EngineSpellMetrics, EngineStatus, FusedLine, PageFusionResult,
};
use crate::fusion::finalize::PageQuality;
use crate::fusion::normalize::{NormalizedEngine, NormalizedPage};
use crate::fusion::outlier::OutlierReport;
use crate::fusion::resolve::RowContext;
use crate::fusion::spell::Dictionary;

pub trait FusionEngine {
    fn fuse(&self, page: &EngineSet) -> Result<PageFusionResult, FusionError>;
}

/// Line-level voting across engines: outlier rejection, alignment, the
/// majority/confidence/char-fusion cascade and page quality scoring.
///
/// The dictionary is borrowed so one instance can serve many pages (and
/// threads) at once.
#[derive(Debug, Clone)]
pub struct VotingFusionEngine<'d> {
    config: FusionConfig,
    dictionary: Option<&'d Dictionary>,
}

impl<'d> VotingFusionEngine<'d> {
    pub fn new(config: FusionConfig) -> Result<Self, FusionError> {
        config.validate()?;
        Ok(Self {
            config,
            dictionary: None,
        })
    }

    pub fn with_dictionary(mut self, dictionary: &'d Dictionary) -> Self {
        self.dictionary = Some(dictionary);
        self
    }
}

impl FusionEngine for VotingFusionEngine<'_> {
    fn fuse(&self, page: &EngineSet) -> Result<PageFusionResult, FusionError> {
        let normalized = normalize::normalize_engines(page, &self.config)?;
        let mut diagnostics = normalized.diagnostics.clone();

        let outliers = outlier::detect_outliers(&normalized.engines, self.config.outlier_threshold);
        if outliers.no_baseline {
            if let Some((_, _, best_distance)) = &outliers.best_pair {
                diagnostics.push(FusionDiagnostic::NoTrustworthyBaseline {
                    best_distance: *best_distance,
                });
            }
        }

        let voting: Vec<&NormalizedEngine> = normalized
            .engines
            .iter()
            .filter(|engine| !outliers.outliers.contains(&engine.engine_id))
            .collect();

        if voting.iter().all(|engine| engine.is_empty()) {
            info!(page = %page.page_id, "no voting engine produced text");
            if !normalized.engines.is_empty() {
                diagnostics.push(FusionDiagnostic::AllEnginesEmpty);
            }
            let engines = engine_reports(&normalized, &outliers, &BTreeMap::new());
            return Ok(assemble(page, Vec::new(), &outliers, PageQuality::no_text(), engines, diagnostics));
        }

        if let [only] = voting.as_slice() {
            debug!(page = %page.page_id, engine = %only.engine_id, "single voting engine, fusion skipped");
            diagnostics.push(FusionDiagnostic::FusionSkipped {
                engine_id: only.engine_id.clone(),
            });
        }

        let spell: BTreeMap<String, EngineSpellMetrics> = match self.dictionary {
            Some(dictionary) => voting
                .iter()
                .filter_map(|engine| {
                    spell::score_engine(engine, dictionary, self.config.spell_min_total_words)
                        .map(|metrics| (engine.engine_id.clone(), metrics))
                })
                .collect(),
            None => BTreeMap::new(),
        };

        let alignment = align::align_lines(&voting);
        diagnostics.extend(alignment.diagnostics.iter().cloned());

        let char_counts: Vec<(String, usize)> = voting
            .iter()
            .map(|engine| (engine.engine_id.clone(), engine.char_count()))
            .collect();
        let priority = resolve::engine_priority(&alignment.base_engine, &char_counts);
        let ctx = RowContext {
            config: &self.config,
            priority: &priority,
            spell: &spell,
            dictionary: self.dictionary,
        };
        let fused_lines = resolve::resolve_rows(&alignment.rows, &ctx);
        let quality = finalize::assess_page(&alignment.rows, &fused_lines, voting.len(), &self.config);

        let engines = engine_reports(&normalized, &outliers, &spell);
        let result = assemble(page, fused_lines, &outliers, quality, engines, diagnostics);
        debug!(
            page = %result.page_id,
            lines = result.fused_lines.len(),
            base = %alignment.base_engine,
            disagreement = result.disagreement_score,
            needs_escalation = result.needs_escalation,
            "page fused"
        );
        Ok(result)
    }
}

fn assemble(
    page: &EngineSet,
    fused_lines: Vec<FusedLine>,
    outliers: &OutlierReport,
    quality: PageQuality,
    engines: Vec<EngineReport>,
    diagnostics: Vec<FusionDiagnostic>,
) -> PageFusionResult {
    PageFusionResult {
        page_id: page.page_id.clone(),
        fused_lines,
        outlier_engines: outliers.outliers.clone(),
        disagreement_score: quality.disagreement,
        corruption_score: quality.corruption,
        missing_content_score: quality.missing_content,
        needs_escalation: quality.needs_escalation(),
        escalation_reason: quality.reason.map(|reason| reason.as_str().to_string()),
        engines,
        diagnostics,
    }
}

fn engine_reports(
    page: &NormalizedPage,
    outliers: &OutlierReport,
    spell: &BTreeMap<String, EngineSpellMetrics>,
) -> Vec<EngineReport> {
    let mut reports: Vec<EngineReport> = page
        .engines
        .iter()
        .map(|engine| EngineReport {
            engine_id: engine.engine_id.clone(),
            status: if outliers.outliers.contains(&engine.engine_id) {
                EngineStatus::Outlier
            } else {
                EngineStatus::Voting
            },
            line_count: engine.lines.len(),
            char_count: engine.char_count(),
            avg_distance: outliers.avg_distance.get(&engine.engine_id).copied(),
            spell: spell.get(&engine.engine_id).cloned(),
            diagnostics: engine.diagnostics.clone(),
        })
        .collect();

    reports.extend(page.unavailable.iter().map(|engine| EngineReport {
        engine_id: engine.engine_id.clone(),
        status: EngineStatus::Unavailable,
        line_count: 0,
        char_count: 0,
        avg_distance: None,
        spell: None,
        diagnostics: engine.diagnostics.clone(),
    }));
    reports.sort_by(|a, b| a.engine_id.cmp(&b.engine_id));
    reports
}
