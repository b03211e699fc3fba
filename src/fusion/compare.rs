use std::ops::Range;

use strsim::normalized_levenshtein;

/// Normalized edit similarity in `[0, 1]`; two empty strings are identical.
pub fn similarity_ratio(a: &str, b: &str) -> f32 {
    (normalized_levenshtein(a, b) as f32).clamp(0.0, 1.0)
}

pub fn text_distance(a: &str, b: &str) -> f32 {
    1.0 - similarity_ratio(a, b)
}

/// Mean distance over every unordered pair, `None` with fewer than two texts.
pub fn mean_pairwise_distance(texts: &[&str]) -> Option<f32> {
    if texts.len() < 2 {
        return None;
    }
    let mut total = 0.0;
    let mut pairs = 0usize;
    for (idx, a) in texts.iter().enumerate() {
        for b in &texts[idx + 1..] {
            total += text_distance(a, b);
            pairs += 1;
        }
    }
    Some((total / pairs as f32).clamp(0.0, 1.0))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpTag {
    Equal,
    Replace,
    Insert,
    Delete,
}

/// Edit operation turning `a[a_range]` into `b[b_range]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Opcode {
    pub tag: OpTag,
    pub a: Range<usize>,
    pub b: Range<usize>,
}

/// Longest-common-subsequence alignment of two token sequences.
///
/// Gaps between matched tokens become `replace` when both sides have tokens,
/// otherwise `delete` (only `a`) or `insert` (only `b`).
pub fn opcodes<T: PartialEq>(a: &[T], b: &[T]) -> Vec<Opcode> {
    let n = a.len();
    let m = b.len();
    let width = m + 1;
    let mut lcs = vec![0u32; (n + 1) * width];
    for i in (0..n).rev() {
        for j in (0..m).rev() {
            lcs[i * width + j] = if a[i] == b[j] {
                lcs[(i + 1) * width + j + 1] + 1
            } else {
                lcs[(i + 1) * width + j].max(lcs[i * width + j + 1])
            };
        }
    }

    let mut ops = Vec::new();
    let (mut i, mut j) = (0, 0);
    let (mut gap_a, mut gap_b) = (0, 0);
    while i < n && j < m {
        if a[i] == b[j] {
            push_gap(&mut ops, gap_a..i, gap_b..j);
            push_equal(&mut ops, i, j);
            i += 1;
            j += 1;
            gap_a = i;
            gap_b = j;
        } else if lcs[(i + 1) * width + j] >= lcs[i * width + j + 1] {
            i += 1;
        } else {
            j += 1;
        }
    }
    push_gap(&mut ops, gap_a..n, gap_b..m);
    ops
}

fn push_equal(ops: &mut Vec<Opcode>, i: usize, j: usize) {
    if let Some(last) = ops.last_mut() {
        if last.tag == OpTag::Equal && last.a.end == i && last.b.end == j {
            last.a.end += 1;
            last.b.end += 1;
            return;
        }
    }
    ops.push(Opcode {
        tag: OpTag::Equal,
        a: i..i + 1,
        b: j..j + 1,
    });
}

fn push_gap(ops: &mut Vec<Opcode>, a: Range<usize>, b: Range<usize>) {
    let tag = match (a.is_empty(), b.is_empty()) {
        (true, true) => return,
        (false, false) => OpTag::Replace,
        (false, true) => OpTag::Delete,
        (true, false) => OpTag::Insert,
    };
    ops.push(Opcode { tag, a, b });
}

/// Number of `a` tokens matched one-to-one with `b`.
pub fn matched_len(ops: &[Opcode]) -> usize {
    ops.iter()
        .filter(|op| op.tag == OpTag::Equal)
        .map(|op| op.a.len())
        .sum()
}
