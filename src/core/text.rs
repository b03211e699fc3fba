//! Text helpers shared by the fusion stages.
use unicode_normalization::UnicodeNormalization;

/// Canonical form of an engine line: NFC composed, trailing whitespace removed.
pub fn normalize_line(text: &str) -> String {
    let composed = text.nfc().collect::<String>();
    composed.trim_end().to_string()
}

/// Collapses every whitespace run to a single space and trims both ends.
pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub fn trimmed_char_len(text: &str) -> usize {
    text.trim().chars().count()
}

/// Share of non-whitespace characters that are alphabetic. `None` for blank text.
pub fn alphabetic_ratio(text: &str) -> Option<f32> {
    let mut total = 0usize;
    let mut alpha = 0usize;
    for c in text.chars().filter(|c| !c.is_whitespace()) {
        total += 1;
        if c.is_alphabetic() {
            alpha += 1;
        }
    }
    if total == 0 {
        None
    } else {
        Some(alpha as f32 / total as f32)
    }
}

/// Digits and punctuation only, e.g. a section number or "12-14.".
pub fn is_numeric_like(text: &str) -> bool {
    let mut saw_digit = false;
    for c in text.chars().filter(|c| !c.is_whitespace()) {
        if c.is_ascii_digit() {
            saw_digit = true;
        } else if !c.is_ascii_punctuation() {
            return false;
        }
    }
    saw_digit
}

/// Strips leading and trailing non-alphanumeric characters from a token.
pub fn word_core(token: &str) -> &str {
    token.trim_matches(|c: char| !c.is_alphanumeric())
}

/// Uppercase letter followed by a lowercase letter, e.g. "Gwendolyn".
pub fn looks_like_proper_noun(token: &str) -> bool {
    let mut chars = word_core(token).chars();
    match (chars.next(), chars.next()) {
        (Some(first), Some(second)) => first.is_uppercase() && second.is_lowercase(),
        _ => false,
    }
}
