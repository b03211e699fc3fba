//! Tunables for the fusion cascade and the page pipeline.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::core::error::FusionError;

/// Parameters consumed by a single page-fusion call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FusionConfig {
    /// Engines to include. Empty means every supplied engine.
    #[serde(default)]
    pub engine_ids: Vec<String>,

    /// Average page distance above which an engine is excluded as an outlier.
    #[serde(default = "FusionConfig::default_outlier_threshold")]
    pub outlier_threshold: f32,

    /// Row distance at or below which candidates count as near-identical.
    #[serde(default = "FusionConfig::default_char_fusion_threshold")]
    pub char_fusion_threshold: f32,

    /// Row distance above which candidates are too dissimilar to fuse.
    #[serde(default = "FusionConfig::default_distance_drop")]
    pub distance_drop: f32,

    /// Share of the spell quality weight in the confidence blend.
    #[serde(default = "FusionConfig::default_confidence_blend_weight")]
    pub confidence_blend_weight: f32,

    /// Top-two confidence gap below which the blend is consulted.
    #[serde(default = "FusionConfig::default_confidence_tie_margin")]
    pub confidence_tie_margin: f32,

    /// Minimum words on the page before an engine gets spell metrics.
    #[serde(default = "FusionConfig::default_spell_min_total_words")]
    pub spell_min_total_words: usize,

    #[serde(default)]
    pub enable_spell_weighted_voting: bool,

    #[serde(default = "FusionConfig::default_critical_disagreement_threshold")]
    pub critical_disagreement_threshold: f32,

    #[serde(default = "FusionConfig::default_critical_corruption_threshold")]
    pub critical_corruption_threshold: f32,

    #[serde(default = "FusionConfig::default_critical_missing_content_threshold")]
    pub critical_missing_content_threshold: f32,
}

impl FusionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_engine_ids<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.engine_ids = ids.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_outlier_threshold(mut self, threshold: f32) -> Self {
        self.outlier_threshold = threshold;
        self
    }

    pub fn with_spell_weighted_voting(mut self, enabled: bool) -> Self {
        self.enable_spell_weighted_voting = enabled;
        self
    }

    pub fn validate(&self) -> Result<(), FusionError> {
        let unit_fields = [
            ("outlier_threshold", self.outlier_threshold),
            ("char_fusion_threshold", self.char_fusion_threshold),
            ("distance_drop", self.distance_drop),
            ("confidence_blend_weight", self.confidence_blend_weight),
            ("confidence_tie_margin", self.confidence_tie_margin),
            ("critical_disagreement_threshold", self.critical_disagreement_threshold),
            ("critical_corruption_threshold", self.critical_corruption_threshold),
            (
                "critical_missing_content_threshold",
                self.critical_missing_content_threshold,
            ),
        ];
        for (name, value) in unit_fields {
            if !(0.0..=1.0).contains(&value) {
                return Err(FusionError::InvalidConfig(format!(
                    "{name} must be within [0, 1], got {value}"
                )));
            }
        }
        if self.char_fusion_threshold > self.distance_drop {
            return Err(FusionError::InvalidConfig(format!(
                "char_fusion_threshold ({}) must not exceed distance_drop ({})",
                self.char_fusion_threshold, self.distance_drop
            )));
        }
        Ok(())
    }

    fn default_outlier_threshold() -> f32 {
        0.6
    }

    fn default_char_fusion_threshold() -> f32 {
        0.15
    }

    fn default_distance_drop() -> f32 {
        0.35
    }

    fn default_confidence_blend_weight() -> f32 {
        0.3
    }

    fn default_confidence_tie_margin() -> f32 {
        0.1
    }

    fn default_spell_min_total_words() -> usize {
        10
    }

    fn default_critical_disagreement_threshold() -> f32 {
        0.45
    }

    fn default_critical_corruption_threshold() -> f32 {
        0.5
    }

    fn default_critical_missing_content_threshold() -> f32 {
        0.5
    }
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            engine_ids: Vec::new(),
            outlier_threshold: Self::default_outlier_threshold(),
            char_fusion_threshold: Self::default_char_fusion_threshold(),
            distance_drop: Self::default_distance_drop(),
            confidence_blend_weight: Self::default_confidence_blend_weight(),
            confidence_tie_margin: Self::default_confidence_tie_margin(),
            spell_min_total_words: Self::default_spell_min_total_words(),
            enable_spell_weighted_voting: false,
            critical_disagreement_threshold: Self::default_critical_disagreement_threshold(),
            critical_corruption_threshold: Self::default_critical_corruption_threshold(),
            critical_missing_content_threshold: Self::default_critical_missing_content_threshold(),
        }
    }
}

/// Settings file for the batch pipeline (`ocrfuse.toml`).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PipelineSettings {
    /// Worker threads for page fusion. `None` uses every available core.
    #[serde(default)]
    pub threads: Option<usize>,

    /// Wordlist for the spell scorer. `None` uses the built-in English list.
    #[serde(default)]
    pub dictionary: Option<PathBuf>,

    #[serde(default)]
    pub fusion: FusionConfig,
}

impl PipelineSettings {
    pub fn from_toml_str(source: &str) -> Result<Self, FusionError> {
        let settings: Self =
            toml::from_str(source).map_err(|err| FusionError::InvalidConfig(err.to_string()))?;
        settings.fusion.validate()?;
        Ok(settings)
    }

    pub fn from_file(path: &Path) -> Result<Self, FusionError> {
        let source = fs::read_to_string(path).map_err(|err| {
            FusionError::InvalidConfig(format!("cannot read {}: {err}", path.display()))
        })?;
        Self::from_toml_str(&source)
    }
}
