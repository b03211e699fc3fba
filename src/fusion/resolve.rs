use std::collections::BTreeMap;

use tracing::debug;

use crate::core::config::FusionConfig;
use crate::core::confidence::{blend, score_line_confidence};
use crate::core::model::{AlignedRow, Candidate, EngineSpellMetrics, FusedLine, FusionMethod};
use crate::core::text::{collapse_whitespace, trimmed_char_len};
use crate::fusion::char_fuse::fuse_chars;
use crate::fusion::compare::text_distance;
use crate::fusion::spell::Dictionary;

/// Everything the per-row cascade needs besides the row itself.
#[derive(Debug, Clone, Copy)]
pub struct RowContext<'a> {
    pub config: &'a FusionConfig,
    /// Voting engines, highest priority first (base engine leads).
    pub priority: &'a [String],
    pub spell: &'a BTreeMap<String, EngineSpellMetrics>,
    pub dictionary: Option<&'a Dictionary>,
}

impl RowContext<'_> {
    fn rank(&self, engine_id: &str) -> usize {
        self.priority
            .iter()
            .position(|id| id == engine_id)
            .unwrap_or(usize::MAX)
    }

    fn voting_engines(&self) -> usize {
        self.priority.len().max(1)
    }
}

/// Base engine first, then by character count (descending), then by id.
pub fn engine_priority(base_engine: &str, char_counts: &[(String, usize)]) -> Vec<String> {
    let mut ordered: Vec<&(String, usize)> = char_counts.iter().collect();
    ordered.sort_by(|a, b| {
        (b.0 == base_engine)
            .cmp(&(a.0 == base_engine))
            .then(b.1.cmp(&a.1))
            .then(a.0.cmp(&b.0))
    });
    ordered.into_iter().map(|(id, _)| id.clone()).collect()
}

pub fn resolve_rows(rows: &[AlignedRow], ctx: &RowContext<'_>) -> Vec<FusedLine> {
    rows.iter().map(|row| resolve_row(row, ctx)).collect()
}

/// Runs the cascade on one row: majority, confidence, character fusion,
/// then length fallback. The first rule that applies decides the row.
pub fn resolve_row(row: &AlignedRow, ctx: &RowContext<'_>) -> FusedLine {
    let mut ordered: Vec<(&str, &Candidate)> = row
        .candidates
        .iter()
        .map(|(id, candidate)| (id.as_str(), candidate))
        .collect();
    ordered.sort_by_key(|(id, _)| ctx.rank(id));

    if let [(engine_id, candidate)] = ordered.as_slice() {
        return FusedLine {
            row_index: row.row_index,
            text: candidate.text.clone(),
            method: FusionMethod::SingleEngine,
            source_engines: vec![engine_id.to_string()],
            confidence: score_line_confidence(
                FusionMethod::SingleEngine,
                1.0 / ctx.voting_engines() as f32,
                candidate.confidence,
                None,
            ),
        };
    }

    if let Some(line) = majority(row.row_index, &ordered, ctx) {
        return line;
    }
    if let Some(line) = highest_confidence(row.row_index, &ordered, ctx) {
        return line;
    }
    fuse_or_fallback(row.row_index, &ordered, ctx)
}

fn majority(row_index: usize, ordered: &[(&str, &Candidate)], ctx: &RowContext<'_>) -> Option<FusedLine> {
    // Groups keep first-seen order, which is priority order.
    let mut groups: Vec<(String, Vec<usize>)> = Vec::new();
    for (idx, (_, candidate)) in ordered.iter().enumerate() {
        let key = collapse_whitespace(&candidate.text);
        match groups.iter_mut().find(|(text, _)| *text == key) {
            Some((_, members)) => members.push(idx),
            None => groups.push((key, vec![idx])),
        }
    }

    let largest = groups.iter().map(|(_, members)| members.len()).max()?;
    if largest < 2 {
        return None;
    }
    let (_, members) = groups.iter().find(|(_, members)| members.len() == largest)?;

    let representative = members
        .iter()
        .copied()
        .min_by_key(|&idx| (ordered[idx].1.text.chars().count(), idx))?;

    let source_engines: Vec<String> = members.iter().map(|&idx| ordered[idx].0.to_string()).collect();
    let agreement = members.len() as f32 / ctx.voting_engines() as f32;
    let confidence = score_line_confidence(
        FusionMethod::Majority,
        agreement,
        mean_confidence(members.iter().map(|&idx| ordered[idx].1)),
        None,
    );

    Some(FusedLine {
        row_index,
        text: ordered[representative].1.text.clone(),
        method: FusionMethod::Majority,
        source_engines,
        confidence,
    })
}

fn highest_confidence(
    row_index: usize,
    ordered: &[(&str, &Candidate)],
    ctx: &RowContext<'_>,
) -> Option<FusedLine> {
    if ordered.len() < 3 {
        return None;
    }
    let confident: Vec<(usize, f32)> = ordered
        .iter()
        .enumerate()
        .filter_map(|(idx, (_, candidate))| candidate.confidence.map(|conf| (idx, conf)))
        .collect();
    if confident.is_empty() {
        return None;
    }

    let mut raw: Vec<f32> = confident.iter().map(|(_, conf)| *conf).collect();
    raw.sort_by(|a, b| b.total_cmp(a));
    let close_race = raw.len() >= 2 && raw[0] - raw[1] < ctx.config.confidence_tie_margin;
    let blend_enabled = ctx.config.enable_spell_weighted_voting
        && close_race
        && confident
            .iter()
            .all(|(idx, _)| ctx.spell.contains_key(ordered[*idx].0));

    let mut best: Option<(usize, f32, f32)> = None;
    for &(idx, conf) in &confident {
        let quality = ctx
            .spell
            .get(ordered[idx].0)
            .map_or(1.0, |metrics| metrics.quality_weight);
        let score = blend(conf, quality, blend_enabled, ctx.config.confidence_blend_weight);
        if best.map_or(true, |(_, best_score, _)| score > best_score) {
            best = Some((idx, score, conf));
        }
    }
    let (idx, score, conf) = best?;
    if blend_enabled {
        debug!(row = row_index, engine = ordered[idx].0, score, "confidence race settled by spell quality");
    }

    Some(FusedLine {
        row_index,
        text: ordered[idx].1.text.clone(),
        method: FusionMethod::Confidence,
        source_engines: vec![ordered[idx].0.to_string()],
        confidence: score_line_confidence(
            FusionMethod::Confidence,
            1.0 / ctx.voting_engines() as f32,
            Some(conf),
            None,
        ),
    })
}

fn fuse_or_fallback(row_index: usize, ordered: &[(&str, &Candidate)], ctx: &RowContext<'_>) -> FusedLine {
    let texts: Vec<String> = ordered
        .iter()
        .map(|(_, candidate)| collapse_whitespace(&candidate.text))
        .collect();
    let distance = text_distance(&texts[0], &texts[1]);

    if distance <= ctx.config.distance_drop {
        let participants: Vec<(&str, &str)> = ordered
            .iter()
            .zip(&texts)
            .enumerate()
            .filter(|(idx, (_, text))| *idx == 0 || text_distance(&texts[0], text) <= ctx.config.distance_drop)
            .map(|(_, ((engine_id, _), text))| (*engine_id, text.as_str()))
            .collect();
        let dictionary = ctx
            .dictionary
            .filter(|_| ctx.config.enable_spell_weighted_voting);
        let fusion = fuse_chars(&participants, dictionary);

        let agreement = fusion.agreeing_engines.len() as f32 / ctx.voting_engines() as f32;
        let engine_confidence = mean_confidence(
            ordered
                .iter()
                .filter(|(id, _)| fusion.agreeing_engines.iter().any(|a| a == id))
                .map(|(_, candidate)| *candidate),
        );
        let mut confidence = score_line_confidence(
            FusionMethod::CharFusion,
            agreement,
            engine_confidence,
            Some(1.0 - distance),
        );
        if distance > ctx.config.char_fusion_threshold {
            debug!(row = row_index, distance, "fusing candidates beyond the near-identical threshold");
            confidence = (confidence - 0.1).clamp(0.0, 1.0);
        }

        return FusedLine {
            row_index,
            text: fusion.text,
            method: FusionMethod::CharFusion,
            source_engines: fusion.agreeing_engines,
            confidence,
        };
    }

    let longest = ordered
        .iter()
        .enumerate()
        .max_by_key(|(idx, (_, candidate))| (trimmed_char_len(&candidate.text), std::cmp::Reverse(*idx)))
        .map(|(idx, _)| idx)
        .unwrap_or(0);
    let (engine_id, candidate) = ordered[longest];

    FusedLine {
        row_index,
        text: candidate.text.clone(),
        method: FusionMethod::LengthFallback,
        source_engines: vec![engine_id.to_string()],
        confidence: score_line_confidence(
            FusionMethod::LengthFallback,
            1.0 / ctx.voting_engines() as f32,
            candidate.confidence,
            Some(1.0 - distance),
        ),
    }
}

fn mean_confidence<'a>(candidates: impl Iterator<Item = &'a Candidate>) -> Option<f32> {
    let values: Vec<f32> = candidates.filter_map(|c| c.confidence).collect();
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f32>() / values.len() as f32)
    }
}
