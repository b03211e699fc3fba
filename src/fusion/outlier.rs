use std::collections::{BTreeMap, BTreeSet};

use tracing::info;

use crate::fusion::compare::text_distance;
use crate::fusion::normalize::NormalizedEngine;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct OutlierReport {
    pub outliers: BTreeSet<String>,
    /// Mean page distance of each engine to every other engine.
    pub avg_distance: BTreeMap<String, f32>,
    pub best_pair: Option<(String, String, f32)>,
    /// Set when even the best-agreeing pair is above the threshold.
    pub no_baseline: bool,
}

/// Flags engines whose whole-page text systematically disagrees with the rest.
///
/// Needs at least three engines: with two there is no majority to compare
/// against, so nothing is excluded.
pub fn detect_outliers(engines: &[NormalizedEngine], threshold: f32) -> OutlierReport {
    let mut report = OutlierReport::default();
    if engines.len() < 3 {
        return report;
    }

    let texts: Vec<String> = engines.iter().map(NormalizedEngine::page_text).collect();
    let n = engines.len();
    let mut distances = vec![vec![0.0_f32; n]; n];
    let mut best: Option<(usize, usize, f32)> = None;

    for i in 0..n {
        for j in (i + 1)..n {
            let dist = text_distance(&texts[i], &texts[j]);
            distances[i][j] = dist;
            distances[j][i] = dist;
            if best.map_or(true, |(_, _, best_dist)| dist < best_dist) {
                best = Some((i, j, dist));
            }
        }
    }

    for (i, engine) in engines.iter().enumerate() {
        let sum: f32 = (0..n).filter(|&j| j != i).map(|j| distances[i][j]).sum();
        report
            .avg_distance
            .insert(engine.engine_id.clone(), sum / (n - 1) as f32);
    }

    let Some((best_a, best_b, best_dist)) = best else {
        return report;
    };
    report.best_pair = Some((
        engines[best_a].engine_id.clone(),
        engines[best_b].engine_id.clone(),
        best_dist,
    ));

    if best_dist > threshold {
        report.no_baseline = true;
        return report;
    }

    for (i, engine) in engines.iter().enumerate() {
        if i == best_a || i == best_b {
            continue;
        }
        let avg = report.avg_distance[&engine.engine_id];
        if avg > threshold {
            info!(engine = %engine.engine_id, avg_distance = avg, "excluding outlier engine");
            report.outliers.insert(engine.engine_id.clone());
        }
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn engine(id: &str, lines: &[&str]) -> NormalizedEngine {
        NormalizedEngine {
            engine_id: id.to_string(),
            lines: lines.iter().map(|l| l.to_string()).collect(),
            confidences: None,
            diagnostics: None,
        }
    }

    const PAGE: &[&str] = &[
        "You stand at the edge of the dark forest.",
        "If you wish to enter, turn to 157.",
        "If you would rather follow the river, turn to 32.",
    ];

    #[test]
    fn excludes_garbled_embedded_text() {
        let engines = vec![
            engine("easyocr", PAGE),
            engine("pdftext", &["@@#%$ ^^&* ~~~", "((()))"]),
            engine("tesseract", PAGE),
        ];
        let report = detect_outliers(&engines, 0.6);
        assert_eq!(report.outliers, BTreeSet::from(["pdftext".to_string()]));
        assert!(report.avg_distance["easyocr"] < 0.6);
        assert!(!report.no_baseline);
    }

    #[test]
    fn skips_detection_with_two_engines() {
        let engines = vec![engine("a", PAGE), engine("b", &["garbage"])];
        let report = detect_outliers(&engines, 0.6);
        assert!(report.outliers.is_empty());
        assert!(report.avg_distance.is_empty());
    }

    #[test]
    fn nothing_excluded_without_trustworthy_baseline() {
        let engines = vec![
            engine("a", &["aaaaaaaaaaaa"]),
            engine("b", &["bbbbbbbbbbbb"]),
            engine("c", &["cccccccccccc"]),
        ];
        let report = detect_outliers(&engines, 0.6);
        assert!(report.outliers.is_empty());
        assert!(report.no_baseline);
    }

    #[test]
    fn best_pair_is_never_excluded() {
        let engines = vec![
            engine("a", PAGE),
            engine("b", PAGE),
            engine("c", &["zzzz"]),
            engine("d", &["qqqq"]),
        ];
        let report = detect_outliers(&engines, 0.6);
        let (first, second, dist) = report.best_pair.clone().unwrap();
        assert_eq!((first.as_str(), second.as_str(), dist), ("a", "b", 0.0));
        assert!(!report.outliers.contains("a"));
        assert!(!report.outliers.contains("b"));
        assert!(report.outliers.contains("c"));
        assert!(report.outliers.contains("d"));
    }

    #[test]
    fn empty_engine_is_judged_by_distance() {
        let engines = vec![
            engine("a", &["abc"]),
            engine("b", &["abd"]),
            engine("c", &[]),
        ];
        let report = detect_outliers(&engines, 0.6);
        assert_eq!(report.outliers, BTreeSet::from(["c".to_string()]));

        let engines = vec![engine("a", &[]), engine("b", &[]), engine("c", &[])];
        let report = detect_outliers(&engines, 0.6);
        assert!(report.outliers.is_empty());
    }
}
