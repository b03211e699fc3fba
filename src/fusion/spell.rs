use std::collections::HashSet;
use std::fs;
use std::path::Path;

use crate::core::error::FusionError;
use crate::core::model::EngineSpellMetrics;
use crate::core::text::word_core;
use crate::fusion::normalize::NormalizedEngine;

const ENGLISH_WORDS: &str = include_str!("../../data/english_words.txt");

/// Characters OCR engines commonly emit in place of letters.
const CONFUSABLES: &[char] = &['0', '1', '2', '5', '6', '8', '|', '@', '$'];

/// Read-only lowercase word set, shared by reference across page calls.
#[derive(Debug, Clone, Default)]
pub struct Dictionary {
    words: HashSet<String>,
}

impl Dictionary {
    pub fn from_words<I, S>(words: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let words = words
            .into_iter()
            .map(|w| w.as_ref().trim().to_lowercase())
            .filter(|w| !w.is_empty())
            .collect();
        Self { words }
    }

    /// Parses a wordlist: one word per line, `#` starts a comment line.
    pub fn parse(source: &str) -> Self {
        Self::from_words(
            source
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty() && !line.starts_with('#')),
        )
    }

    pub fn from_path(path: &Path) -> Result<Self, FusionError> {
        let source = fs::read_to_string(path).map_err(|source| FusionError::Dictionary {
            path: path.display().to_string(),
            source,
        })?;
        Ok(Self::parse(&source))
    }

    /// The built-in English list.
    pub fn english() -> Self {
        Self::parse(ENGLISH_WORDS)
    }

    pub fn contains(&self, word: &str) -> bool {
        self.words.contains(&word.to_lowercase())
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }
}

/// Dictionary status of a single token, `None` when it has no alphabetic core.
pub fn in_vocabulary(token: &str, dictionary: &Dictionary) -> Option<bool> {
    let core = word_core(token);
    if core.is_empty() || !core.chars().all(char::is_alphabetic) {
        return None;
    }
    Some(dictionary.contains(core))
}

fn has_confusable(core: &str) -> bool {
    let chars: Vec<char> = core.chars().collect();
    chars.iter().enumerate().any(|(idx, c)| {
        if !CONFUSABLES.contains(c) {
            return false;
        }
        let prev = idx.checked_sub(1).and_then(|p| chars.get(p));
        let next = chars.get(idx + 1);
        prev.is_some_and(|p| p.is_alphabetic()) || next.is_some_and(|n| n.is_alphabetic())
    })
}

/// Lexical quality of one engine's page.
///
/// Returns `None` for pages with fewer than `min_total_words` words: the
/// ratios are too noisy to be useful there.
pub fn score_engine(
    engine: &NormalizedEngine,
    dictionary: &Dictionary,
    min_total_words: usize,
) -> Option<EngineSpellMetrics> {
    let tokens: Vec<&str> = engine
        .lines
        .iter()
        .flat_map(|line| line.split_whitespace())
        .collect();
    let total_words = tokens.len();
    if total_words < min_total_words || total_words == 0 {
        return None;
    }

    let mut alpha_tokens = 0usize;
    let mut oov = 0usize;
    let mut letter_tokens = 0usize;
    let mut confused = 0usize;

    for token in tokens {
        let core = word_core(token);
        if !core.chars().any(char::is_alphabetic) {
            continue;
        }
        letter_tokens += 1;
        if has_confusable(core) {
            confused += 1;
        }
        if core.chars().all(char::is_alphabetic) {
            alpha_tokens += 1;
            if !dictionary.contains(core) {
                oov += 1;
            }
        }
    }

    let ratio = |num: usize, den: usize| {
        if den == 0 {
            0.0
        } else {
            (num as f32 / den as f32).clamp(0.0, 1.0)
        }
    };
    let oov_ratio = ratio(oov, alpha_tokens);
    let char_confusion_score = ratio(confused, letter_tokens);

    Some(EngineSpellMetrics {
        engine_id: engine.engine_id.clone(),
        oov_ratio,
        char_confusion_score,
        total_words,
        quality_weight: (1.0 - oov_ratio.max(char_confusion_score)).clamp(0.0, 1.0),
    })
}
