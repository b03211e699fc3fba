use crate::core::model::FusionMethod;

/// Mixes an engine's own line confidence with its page-level spell quality.
///
/// With `enabled == false` the confidence passes through untouched, so the
/// selection logic can call this unconditionally.
pub fn blend(confidence: f32, quality_weight: f32, enabled: bool, weight: f32) -> f32 {
    let confidence = confidence.clamp(0.0, 1.0);
    if !enabled {
        return confidence;
    }
    let weight = weight.clamp(0.0, 1.0);
    ((1.0 - weight) * confidence + weight * quality_weight.clamp(0.0, 1.0)).clamp(0.0, 1.0)
}

/// Scores how much a fused line can be trusted.
///
/// `agreement` is the share of voting engines backing the chosen text,
/// `engine_confidence` the mean confidence those engines reported and
/// `similarity` the similarity between the compared candidates, if any.
pub fn score_line_confidence(
    method: FusionMethod,
    agreement: f32,
    engine_confidence: Option<f32>,
    similarity: Option<f32>,
) -> f32 {
    let mut score = match method {
        FusionMethod::Majority => 0.5,
        FusionMethod::Confidence => 0.35,
        FusionMethod::CharFusion => 0.3,
        FusionMethod::SingleEngine => 0.2,
        FusionMethod::LengthFallback => 0.1,
        FusionMethod::Escalated => 0.9,
    };

    score += 0.4 * agreement.clamp(0.0, 1.0);

    if let Some(conf) = engine_confidence {
        score += 0.1 * conf.clamp(0.0, 1.0);
    }

    if let Some(sim) = similarity {
        if sim >= 0.9 {
            score += 0.1;
        } else if sim < 0.7 {
            score -= 0.1;
        }
    }

    score.clamp(0.0, 1.0)
}
