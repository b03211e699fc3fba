use std::collections::BTreeMap;

use tracing::debug;

use crate::core::error::FusionDiagnostic;
use crate::core::model::{AlignedRow, Candidate};
use crate::core::text::collapse_whitespace;
use crate::fusion::compare::{opcodes, OpTag};
use crate::fusion::normalize::NormalizedEngine;

#[derive(Debug, Clone)]
pub struct LineAlignment {
    pub base_engine: String,
    pub rows: Vec<AlignedRow>,
    pub diagnostics: Vec<FusionDiagnostic>,
}

/// The engine with the most characters; ties go to the smallest id.
pub fn select_base<'a>(engines: &[&'a NormalizedEngine]) -> Option<&'a NormalizedEngine> {
    let mut base: Option<&'a NormalizedEngine> = None;
    for &engine in engines {
        base = match base {
            None => Some(engine),
            Some(current) => {
                let (count, current_count) = (engine.char_count(), current.char_count());
                if count > current_count
                    || (count == current_count && engine.engine_id < current.engine_id)
                {
                    Some(engine)
                } else {
                    Some(current)
                }
            }
        };
    }
    base
}

/// Aligns every voting engine's lines against the base engine's lines.
///
/// Base lines define the row order. Lines another engine has but the base
/// lacks become extra rows right before the next base line; lines inserted
/// by several engines at the same spot share rows by offset.
pub fn align_lines(engines: &[&NormalizedEngine]) -> LineAlignment {
    let Some(base) = select_base(engines) else {
        return LineAlignment {
            base_engine: String::new(),
            rows: Vec::new(),
            diagnostics: Vec::new(),
        };
    };

    let base_tokens: Vec<String> = base.lines.iter().map(|l| collapse_whitespace(l)).collect();
    let n = base.lines.len();

    let mut base_rows: Vec<BTreeMap<String, Candidate>> = (0..n)
        .map(|idx| {
            BTreeMap::from([(
                base.engine_id.clone(),
                Candidate::new(base.lines[idx].clone(), base.confidence_at(idx)),
            )])
        })
        .collect();
    let mut gaps: Vec<BTreeMap<String, Vec<Candidate>>> = vec![BTreeMap::new(); n + 1];

    for engine in engines.iter().filter(|e| e.engine_id != base.engine_id) {
        let tokens: Vec<String> = engine.lines.iter().map(|l| collapse_whitespace(l)).collect();
        let candidate = |idx: usize| Candidate::new(engine.lines[idx].clone(), engine.confidence_at(idx));

        for op in opcodes(&base_tokens, &tokens) {
            match op.tag {
                OpTag::Equal | OpTag::Replace => {
                    let paired = op.a.len().min(op.b.len());
                    for k in 0..paired {
                        base_rows[op.a.start + k].insert(engine.engine_id.clone(), candidate(op.b.start + k));
                    }
                    if op.b.len() > paired {
                        gaps[op.a.end]
                            .entry(engine.engine_id.clone())
                            .or_default()
                            .extend((op.b.start + paired..op.b.end).map(candidate));
                    }
                }
                OpTag::Insert => {
                    gaps[op.a.start]
                        .entry(engine.engine_id.clone())
                        .or_default()
                        .extend(op.b.clone().map(candidate));
                }
                OpTag::Delete => {}
            }
        }
    }

    let mut rows = Vec::new();
    let mut diagnostics = Vec::new();
    let mut base_rows = base_rows.into_iter();

    for gap in gaps {
        let depth = gap.values().map(Vec::len).max().unwrap_or(0);
        for k in 0..depth {
            let mut row = AlignedRow::new(rows.len());
            for (engine_id, lines) in &gap {
                if let Some(candidate) = lines.get(k) {
                    row.candidates.insert(engine_id.clone(), candidate.clone());
                }
            }
            if row.len() == 1 {
                if let Some(engine_id) = row.candidates.keys().next() {
                    debug!(row = row.row_index, engine = %engine_id, "line has no counterpart in other engines");
                    diagnostics.push(FusionDiagnostic::AlignmentAmbiguity {
                        row_index: row.row_index,
                        engine_id: engine_id.clone(),
                    });
                }
            }
            rows.push(row);
        }
        if let Some(candidates) = base_rows.next() {
            rows.push(AlignedRow {
                row_index: rows.len(),
                candidates,
            });
        }
    }

    LineAlignment {
        base_engine: base.engine_id.clone(),
        rows,
        diagnostics,
    }
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

    fn row_texts(row: &AlignedRow) -> Vec<(String, String)> {
        row.candidates
            .iter()
            .map(|(id, c)| (id.clone(), c.text.clone()))
            .collect()
    }

    #[test]
    fn base_is_longest_then_smallest_id() {
        let a = engine("b", &["abcd"]);
        let b = engine("a", &["abcd"]);
        let c = engine("c", &["abc"]);
        assert_eq!(select_base(&[&a, &b, &c]).unwrap().engine_id, "a");
    }

    #[test]
    fn replace_spans_share_rows() {
        let tess = engine("tesseract", &["You have 12 STAMINA", "Turn to 157", "The end"]);
        let easy = engine("easyocr", &["You have l2 STAMINA", "Tum to 157", "The end"]);
        let alignment = align_lines(&[&easy, &tess]);
        assert_eq!(alignment.base_engine, "tesseract");
        assert_eq!(alignment.rows.len(), 3);
        assert_eq!(
            row_texts(&alignment.rows[1]),
            vec![
                ("easyocr".to_string(), "Tum to 157".to_string()),
                ("tesseract".to_string(), "Turn to 157".to_string()),
            ]
        );
        assert!(alignment.diagnostics.is_empty());
    }

    #[test]
    fn inserted_lines_become_extra_rows_in_order() {
        let base = engine("base", &["first line here with more words", "third line here"]);
        let other = engine("other", &["first line here", "second", "third line here"]);
        let alignment = align_lines(&[&base, &other]);
        let texts: Vec<Vec<(String, String)>> = alignment.rows.iter().map(row_texts).collect();
        assert_eq!(texts.len(), 3);
        assert_eq!(texts[1], vec![("other".to_string(), "second".to_string())]);
        assert_eq!(alignment.rows[1].row_index, 1);
        assert_eq!(
            alignment.diagnostics,
            vec![FusionDiagnostic::AlignmentAmbiguity {
                row_index: 1,
                engine_id: "other".to_string()
            }]
        );
    }

    #[test]
    fn insertions_from_several_engines_merge_by_offset() {
        let base = engine("base", &["alpha alpha alpha alpha", "omega"]);
        let b = engine("b", &["alpha alpha", "extra", "omega"]);
        let c = engine("c", &["alpha alpha", "extra", "omega"]);
        let alignment = align_lines(&[&base, &b, &c]);
        assert_eq!(alignment.rows.len(), 3);
        assert_eq!(alignment.rows[1].len(), 2);
        assert!(alignment.diagnostics.is_empty());
    }

    #[test]
    fn missing_lines_leave_rows_with_fewer_candidates() {
        let base = engine("base", &["one one one", "two two two", "three three"]);
        let other = engine("other", &["one one one", "three three"]);
        let alignment = align_lines(&[&base, &other]);
        assert_eq!(alignment.rows.len(), 3);
        assert_eq!(alignment.rows[1].len(), 1);
        assert_eq!(alignment.rows[2].len(), 2);
    }

    #[test]
    fn whitespace_differences_still_match() {
        let base = engine("base", &["Turn  to 157", "end"]);
        let other = engine("other", &["Turn to 157", "end"]);
        let alignment = align_lines(&[&base, &other]);
        assert_eq!(alignment.rows.len(), 2);
        assert_eq!(alignment.rows[0].len(), 2);
    }

    #[test]
    fn every_engine_contributes_at_most_once_per_row() {
        let base = engine("base", &["a a a a", "b b b b", "c c c c"]);
        let other = engine("other", &["x", "y", "z", "w", "v"]);
        let alignment = align_lines(&[&base, &other]);
        let other_count: usize = alignment
            .rows
            .iter()
            .filter(|row| row.candidates.contains_key("other"))
            .count();
        assert_eq!(other_count, 5);
        assert_eq!(alignment.rows.len(), 5);
        for (idx, row) in alignment.rows.iter().enumerate() {
            assert_eq!(row.row_index, idx);
        }
    }
}
