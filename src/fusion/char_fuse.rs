//! Character-position voting over near-identical candidate lines.
//!
//! The first candidate is the primary: every other candidate is aligned to
//! it with an LCS edit script and its characters vote on the primary's
//! positions. Characters only some candidates have are always kept.

use std::collections::BTreeMap;
use std::ops::Range;

use tracing::debug;

use crate::core::text::looks_like_proper_noun;
use crate::fusion::compare::{matched_len, opcodes, OpTag};
use crate::fusion::spell::{in_vocabulary, Dictionary};

#[derive(Debug, Clone, PartialEq)]
pub struct CharFusion {
    pub text: String,
    /// Engines matching the output at half or more of its positions, in input order.
    pub agreeing_engines: Vec<String>,
    /// Characters taken from a non-primary candidate's insertions.
    pub inserted_chars: usize,
}

#[derive(Debug, Clone, PartialEq)]
struct Segment {
    chosen: String,
    alternative: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Resolution {
    chosen: char,
    alternative: Option<char>,
}

/// Fuses `(engine_id, text)` candidates given in engine-priority order.
///
/// `dictionary` enables the whole-word tie-break for positions the
/// character rules leave ambiguous.
pub fn fuse_chars(candidates: &[(&str, &str)], dictionary: Option<&Dictionary>) -> CharFusion {
    let Some(&(primary_id, primary_text)) = candidates.first() else {
        return CharFusion {
            text: String::new(),
            agreeing_engines: Vec::new(),
            inserted_chars: 0,
        };
    };
    if candidates.len() == 1 {
        return CharFusion {
            text: primary_text.to_string(),
            agreeing_engines: vec![primary_id.to_string()],
            inserted_chars: 0,
        };
    }

    let primary: Vec<char> = primary_text.chars().collect();
    let len = primary.len();
    let total = candidates.len();

    let mut votes: Vec<Vec<(usize, char)>> = primary.iter().map(|&c| vec![(0, c)]).collect();
    let mut insertions: Vec<Vec<(usize, String)>> = vec![Vec::new(); len + 1];
    // Unequal-length replacements, keyed by the primary range they cover.
    let mut span_votes: BTreeMap<(usize, usize), Vec<(usize, String)>> = BTreeMap::new();

    for (k, &(_, text)) in candidates.iter().enumerate().skip(1) {
        let other: Vec<char> = text.chars().collect();
        for op in opcodes(&primary, &other) {
            match op.tag {
                OpTag::Equal => cast_votes(&mut votes, k, op.a.clone(), &other[op.b.clone()]),
                OpTag::Replace if op.a.len() == op.b.len() => {
                    cast_votes(&mut votes, k, op.a.clone(), &other[op.b.clone()])
                }
                OpTag::Replace => {
                    span_votes
                        .entry((op.a.start, op.a.end))
                        .or_default()
                        .push((k, other[op.b.clone()].iter().collect()));
                }
                OpTag::Insert => {
                    insertions[op.a.start].push((k, other[op.b.clone()].iter().collect()));
                }
                OpTag::Delete => {}
            }
        }
    }

    let mut segments = Vec::with_capacity(len);
    let mut inserted_chars = 0;
    let mut i = 0;
    loop {
        if let Some(inserted) = pick_insertion(&insertions[i]) {
            inserted_chars += inserted.chars().count();
            debug!(engine = candidates[inserted_by(&insertions[i], &inserted)].0, position = i, text = %inserted, "keeping inserted characters");
            for (voter, text) in insertions[i].iter().filter(|(_, text)| *text != inserted) {
                debug!(engine = candidates[*voter].0, position = i, text = %text, "conflicting insertion outvoted");
            }
            segments.push(Segment {
                chosen: inserted,
                alternative: None,
            });
        }
        if i >= len {
            break;
        }
        if let Some((range, segment)) = resolve_span(&primary, &span_votes, i, candidates) {
            for gap in range.start + 1..range.end {
                for (voter, text) in &insertions[gap] {
                    debug!(engine = candidates[*voter].0, position = gap, text = %text, "insertion inside replaced span discarded");
                }
            }
            segments.push(segment);
            i = range.end;
            continue;
        }
        let resolution = resolve_position(&votes[i], total);
        segments.push(Segment {
            chosen: resolution.chosen.to_string(),
            alternative: resolution.alternative.map(String::from),
        });
        i += 1;
    }

    if let Some(dictionary) = dictionary {
        apply_dictionary(&mut segments, dictionary);
    }

    let text: String = segments.iter().map(|s| s.chosen.as_str()).collect();
    let agreeing_engines = agreeing_engines(&text, candidates);

    CharFusion {
        text,
        agreeing_engines,
        inserted_chars,
    }
}

fn cast_votes(votes: &mut [Vec<(usize, char)>], voter: usize, positions: Range<usize>, chars: &[char]) {
    for (offset, pos) in positions.enumerate() {
        votes[pos].push((voter, chars[offset]));
    }
}

/// Settles the unequal-length replacements that start at primary position `start`.
///
/// With a single competitor the primary span stays and the competitor is kept
/// as its alternative. With more, a replacement wins only when it is backed by
/// a strict majority of all candidates; the primary counts as one vote for its
/// own text. Outvoted replacements are logged.
fn resolve_span(
    primary: &[char],
    span_votes: &BTreeMap<(usize, usize), Vec<(usize, String)>>,
    start: usize,
    candidates: &[(&str, &str)],
) -> Option<(Range<usize>, Segment)> {
    let total = candidates.len();
    let mut winner: Option<(Range<usize>, Segment)> = None;

    for (&(a, b), proposals) in span_votes.range((start, 0)..(start + 1, 0)) {
        let original: String = primary[a..b].iter().collect();
        if total == 2 {
            let (_, replacement) = proposals.first()?;
            return Some((
                a..b,
                Segment {
                    chosen: original,
                    alternative: Some(replacement.clone()),
                },
            ));
        }

        // Distinct replacement texts in priority order of their first voter.
        let mut tally: Vec<(&str, usize)> = Vec::new();
        for (_, text) in proposals {
            match tally.iter_mut().find(|(seen, _)| *seen == text.as_str()) {
                Some(entry) => entry.1 += 1,
                None => tally.push((text.as_str(), 1)),
            }
        }
        let leader = tally
            .iter()
            .copied()
            .fold(None, |best: Option<(&str, usize)>, (text, count)| match best {
                Some((_, best_count)) if best_count >= count => best,
                _ => Some((text, count)),
            });

        let accepted = match leader {
            Some((text, count)) if winner.is_none() && count * 2 > total => Some(text.to_string()),
            _ => None,
        };
        for (voter, text) in proposals {
            if accepted.as_deref() != Some(text.as_str()) {
                debug!(engine = candidates[*voter].0, position = a, from = %original, to = %text, "span replacement outvoted");
            }
        }
        if let Some(text) = accepted {
            debug!(position = a, from = %original, to = %text, "span replaced by candidate majority");
            winner = Some((
                a..b,
                Segment {
                    chosen: text,
                    alternative: None,
                },
            ));
        }
    }
    winner
}

/// Most common inserted string at a gap; ties go to the higher-priority voter.
fn pick_insertion(inserted: &[(usize, String)]) -> Option<String> {
    let mut best: Option<(&str, usize)> = None;
    for (_, text) in inserted {
        let count = inserted.iter().filter(|(_, other)| other == text).count();
        if best.map_or(true, |(_, best_count)| count > best_count) {
            best = Some((text.as_str(), count));
        }
    }
    best.map(|(text, _)| text.to_string())
}

fn inserted_by(inserted: &[(usize, String)], text: &str) -> usize {
    inserted
        .iter()
        .find(|(_, other)| other == text)
        .map(|(voter, _)| *voter)
        .unwrap_or(0)
}

/// Applies the typed character rules to one primary position.
fn resolve_position(votes: &[(usize, char)], total_candidates: usize) -> Resolution {
    let primary_char = votes[0].1;
    if votes.iter().all(|&(_, c)| c == primary_char) {
        return Resolution {
            chosen: primary_char,
            alternative: None,
        };
    }

    if let Some(chosen) = fold_case(votes) {
        return Resolution {
            chosen,
            alternative: None,
        };
    }

    let has_digit = votes.iter().any(|(_, c)| c.is_numeric());
    let letters: Vec<(usize, char)> = votes.iter().copied().filter(|(_, c)| c.is_alphabetic()).collect();
    let pool: Vec<(usize, char)> = if has_digit && !letters.is_empty() {
        letters
    } else {
        votes.to_vec()
    };

    let first = pool[0].1;
    if pool.iter().all(|&(_, c)| c == first) {
        return Resolution {
            chosen: first,
            alternative: None,
        };
    }
    if let Some(chosen) = fold_case(&pool) {
        return Resolution {
            chosen,
            alternative: None,
        };
    }

    if total_candidates >= 3 {
        return majority(&pool, primary_char);
    }

    let chosen = if pool.iter().any(|&(_, c)| c == primary_char) {
        primary_char
    } else {
        first
    };
    let alternative = pool.iter().map(|&(_, c)| c).find(|&c| c != chosen);
    Resolution { chosen, alternative }
}

/// Same letter in different cases resolves to the uppercase form.
fn fold_case(votes: &[(usize, char)]) -> Option<char> {
    let first = votes[0].1;
    if !votes.iter().all(|(_, c)| c.is_alphabetic()) {
        return None;
    }
    let same_letter = votes
        .iter()
        .all(|(_, c)| c.to_lowercase().eq(first.to_lowercase()));
    if !same_letter {
        return None;
    }
    Some(
        votes
            .iter()
            .map(|&(_, c)| c)
            .find(|c| c.is_uppercase())
            .unwrap_or(first),
    )
}

/// Plurality vote. On a tie the primary's char wins if it is among the
/// leaders, otherwise the leader backed by the highest-priority engine.
fn majority(pool: &[(usize, char)], primary_char: char) -> Resolution {
    // char -> (votes, best voter index)
    let mut tally: BTreeMap<char, (usize, usize)> = BTreeMap::new();
    for &(voter, c) in pool {
        let entry = tally.entry(c).or_insert((0, voter));
        entry.0 += 1;
        entry.1 = entry.1.min(voter);
    }
    let top = tally.values().map(|(count, _)| *count).max().unwrap_or(0);
    let mut leaders: Vec<(usize, char)> = tally
        .iter()
        .filter(|(_, (count, _))| *count == top)
        .map(|(&c, &(_, voter))| (voter, c))
        .collect();
    leaders.sort();

    let chosen = if leaders.iter().any(|&(_, c)| c == primary_char) {
        primary_char
    } else {
        leaders[0].1
    };
    let alternative = if leaders.len() > 1 {
        leaders.iter().map(|&(_, c)| c).find(|&c| c != chosen)
    } else {
        None
    };
    Resolution { chosen, alternative }
}

/// Swaps ambiguous segments when that turns an out-of-vocabulary word into
/// an in-vocabulary one. Words shaped like proper nouns are left alone.
fn apply_dictionary(segments: &mut [Segment], dictionary: &Dictionary) {
    let mut bounds = Vec::with_capacity(segments.len());
    let mut offset = 0;
    for segment in segments.iter() {
        let width = segment.chosen.chars().count();
        bounds.push(offset..offset + width);
        offset += width;
    }
    let text: Vec<char> = segments.iter().flat_map(|s| s.chosen.chars()).collect();

    let mut start = 0;
    while start < text.len() {
        if text[start].is_whitespace() {
            start += 1;
            continue;
        }
        let mut end = start;
        while end < text.len() && !text[end].is_whitespace() {
            end += 1;
        }
        swap_word(segments, &bounds, start..end, dictionary);
        start = end;
    }
}

fn swap_word(segments: &mut [Segment], bounds: &[Range<usize>], word: Range<usize>, dictionary: &Dictionary) {
    let members: Vec<usize> = bounds
        .iter()
        .enumerate()
        .filter(|(_, b)| b.start < word.end && b.end > word.start)
        .map(|(idx, _)| idx)
        .collect();
    if !members.iter().any(|&idx| segments[idx].alternative.is_some()) {
        return;
    }
    let contained = members
        .iter()
        .all(|&idx| bounds[idx].start >= word.start && bounds[idx].end <= word.end);
    let clean_alternatives = members.iter().all(|&idx| {
        segments[idx]
            .alternative
            .as_ref()
            .map_or(true, |alt| !alt.chars().any(char::is_whitespace))
    });
    if !contained || !clean_alternatives {
        return;
    }

    let chosen_word: String = members.iter().map(|&idx| segments[idx].chosen.as_str()).collect();
    let alternative_word: String = members
        .iter()
        .map(|&idx| {
            let segment = &segments[idx];
            segment.alternative.as_deref().unwrap_or(segment.chosen.as_str())
        })
        .collect();

    if looks_like_proper_noun(&chosen_word) || looks_like_proper_noun(&alternative_word) {
        return;
    }
    let chosen_known = in_vocabulary(&chosen_word, dictionary);
    let alternative_known = in_vocabulary(&alternative_word, dictionary);
    if chosen_known == Some(false) && alternative_known == Some(true) {
        debug!(from = %chosen_word, to = %alternative_word, "dictionary tie-break");
        for idx in members {
            if let Some(alternative) = segments[idx].alternative.take() {
                segments[idx].chosen = alternative;
            }
        }
    }
}

fn agreeing_engines(fused: &str, candidates: &[(&str, &str)]) -> Vec<String> {
    let fused_chars: Vec<char> = fused.chars().collect();
    let mut agreeing: Vec<String> = candidates
        .iter()
        .filter(|(_, text)| {
            let chars: Vec<char> = text.chars().collect();
            let matched = matched_len(&opcodes(&fused_chars, &chars));
            (fused_chars.is_empty() && chars.is_empty()) || matched * 2 >= fused_chars.len().max(1)
        })
        .map(|(id, _)| id.to_string())
        .collect();
    if agreeing.is_empty() {
        agreeing.push(candidates[0].0.to_string());
    }
    agreeing
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn fuse(candidates: &[(&str, &str)]) -> String {
        fuse_chars(candidates, None).text
    }

    #[test]
    fn prefers_uppercase_on_case_conflict() {
        assert_eq!(fuse(&[("a", "STAMINA"), ("b", "sTAMINA")]), "STAMINA");
        assert_eq!(fuse(&[("b", "sTAMINA"), ("a", "STAMINA")]), "STAMINA");
    }

    #[test]
    fn primary_decides_unresolved_spans() {
        assert_eq!(fuse(&[("t", "Turn to 157"), ("e", "Tum to 157")]), "Turn to 157");
        assert_eq!(fuse(&[("e", "Tum to 157"), ("t", "Turn to 157")]), "Tum to 157");
    }

    #[test]
    fn prefers_letters_over_digits() {
        assert_eq!(fuse(&[("a", "G0LD"), ("b", "GOLD")]), "GOLD");
        assert_eq!(fuse(&[("a", "1ight"), ("b", "light")]), "light");
        assert_eq!(fuse(&[("a", "5KILL"), ("b", "SKILL")]), "SKILL");
    }

    #[test]
    fn majority_with_three_candidates() {
        assert_eq!(fuse(&[("a", "cat"), ("b", "cot"), ("c", "cot")]), "cot");
        assert_eq!(fuse(&[("a", "cat"), ("b", "cot"), ("c", "cut")]), "cat");
    }

    #[test]
    fn two_two_split_keeps_primary() {
        let result = fuse(&[("a", "cat"), ("b", "cot"), ("c", "cot"), ("d", "cat")]);
        assert_eq!(result, "cat");
    }

    #[test]
    fn tie_without_primary_follows_engine_priority() {
        // primary votes 'a' alone; 'o' and 'u' tie with two votes each.
        let result = fuse(&[("p", "cat"), ("q", "cut"), ("r", "cot"), ("s", "cot"), ("t", "cut")]);
        assert_eq!(result, "cut");
    }

    #[test]
    fn inserted_characters_are_kept() {
        let fusion = fuse_chars(&[("a", "Turn to 15"), ("b", "Turn to 157")], None);
        assert_eq!(fusion.text, "Turn to 157");
        assert_eq!(fusion.inserted_chars, 1);

        let fusion = fuse_chars(&[("a", "Turn to 157"), ("b", "Turn t 157")], None);
        assert_eq!(fusion.text, "Turn to 157");
    }

    #[test]
    fn majority_of_uneven_spans_replaces_primary() {
        let fusion = fuse_chars(
            &[("a", "Tum to 157 now"), ("b", "Turn to 157 no"), ("c", "Turn to 157 nw")],
            None,
        );
        assert_eq!(fusion.text, "Turn to 157 now");
        assert_eq!(fusion.agreeing_engines, vec!["a".to_string(), "b".to_string(), "c".to_string()]);
    }

    #[test]
    fn uneven_span_without_majority_keeps_primary() {
        assert_eq!(
            fuse(&[("a", "Tum to 157"), ("b", "Turn to 157"), ("c", "Tuin to 157")]),
            "Tum to 157"
        );
        assert_eq!(
            fuse(&[("a", "Tum to 157"), ("b", "Turn to 157"), ("c", "Tum to 157"), ("d", "Turn to 157")]),
            "Tum to 157"
        );
    }

    #[test]
    fn conflicting_insertions_keep_most_common() {
        assert_eq!(fuse(&[("a", "ab"), ("b", "aXb"), ("c", "aYb")]), "aXb");
        assert_eq!(fuse(&[("a", "ab"), ("b", "aXb"), ("c", "aYb"), ("d", "aYb")]), "aYb");

        let fusion = fuse_chars(&[("a", "ab"), ("b", "aXb"), ("c", "aYb")], None);
        assert_eq!(fusion.inserted_chars, 1);
    }

    #[test]
    fn dictionary_fixes_out_of_vocabulary_word() {
        let dict = Dictionary::english();
        let fusion = fuse_chars(&[("a", "tne sword"), ("b", "the sword")], Some(&dict));
        assert_eq!(fusion.text, "the sword");

        let fusion = fuse_chars(&[("a", "tum to 157"), ("b", "turn to 157")], Some(&dict));
        assert_eq!(fusion.text, "turn to 157");
    }

    #[test]
    fn dictionary_never_touches_proper_nouns() {
        let dict = Dictionary::from_words(["man", "turn"]);
        assert_eq!(
            fuse_chars(&[("a", "Mab"), ("b", "Man")], Some(&dict)).text,
            "Mab"
        );
        assert_eq!(
            fuse_chars(&[("a", "Tum to 157"), ("b", "Turn to 157")], Some(&dict)).text,
            "Tum to 157"
        );
    }

    #[test]
    fn dictionary_silent_when_both_or_neither_known() {
        let dict = Dictionary::from_words(["cat", "cot"]);
        assert_eq!(fuse_chars(&[("a", "cat"), ("b", "cot")], Some(&dict)).text, "cat");
        let dict = Dictionary::from_words(["dog"]);
        assert_eq!(fuse_chars(&[("a", "cat"), ("b", "cot")], Some(&dict)).text, "cat");
    }

    #[test]
    fn reports_agreeing_engines() {
        let fusion = fuse_chars(&[("a", "STAMINA"), ("b", "sTAMINA"), ("c", "xxxxxxxxxxxxxx")], None);
        assert_eq!(fusion.agreeing_engines, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn never_shorter_than_primary_without_dictionary() {
        let pairs = [
            ("You have 12 STAMINA", "You have l2 STAMlNA points"),
            ("abc", ""),
            ("", "abc"),
            ("Turn to 157", "Tum to 15"),
        ];
        for (primary, other) in pairs {
            let fused = fuse(&[("a", primary), ("b", other)]);
            assert!(fused.chars().count() >= primary.chars().count(), "{fused:?}");
        }
    }
}
