use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use rayon::prelude::*;
use serde::Serialize;
use tracing::{info, warn};

use crate::core::config::PipelineSettings;
use crate::core::model::{EngineSet, PageFusionResult};
use crate::export::json_export::JsonLinesExporter;
use crate::export::text_export::TextExporter;
use crate::export::Exporter;
use crate::fusion::spell::Dictionary;
use crate::fusion::{FusionEngine, VotingFusionEngine};

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub input: PathBuf,
    pub output: PathBuf,
    pub settings: PipelineSettings,
    pub per_page_text: bool,
}

impl PipelineConfig {
    pub fn new(input: PathBuf, output: PathBuf, settings: PipelineSettings) -> Self {
        Self {
            input,
            output,
            settings,
            per_page_text: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PageFailure {
    pub page_id: String,
    pub error: String,
}

/// Every page that fused, plus the ones whose input was rejected.
#[derive(Debug, Clone, Default)]
pub struct FusedDocument {
    pub pages: Vec<PageFusionResult>,
    pub failures: Vec<PageFailure>,
}

/// Parses engine sets from either JSON Lines or a single JSON array.
pub fn parse_pages(source: &str) -> Result<Vec<EngineSet>> {
    if source.trim_start().starts_with('[') {
        return serde_json::from_str(source).context("parsing JSON array of engine sets");
    }
    source
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(idx, line)| {
            serde_json::from_str(line).with_context(|| format!("parsing engine set on line {}", idx + 1))
        })
        .collect()
}

pub fn load_pages(path: &Path) -> Result<Vec<EngineSet>> {
    let source = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    parse_pages(&source)
}

pub fn load_dictionary(settings: &PipelineSettings) -> Result<Dictionary> {
    match &settings.dictionary {
        Some(path) => Ok(Dictionary::from_path(path)?),
        None => Ok(Dictionary::english()),
    }
}

/// Fuses pages in parallel on a dedicated pool; output keeps input order.
///
/// A rejected page is reported in `failures` and never stops the others.
pub fn fuse_pages(pages: &[EngineSet], engine: &VotingFusionEngine<'_>, threads: Option<usize>) -> Result<FusedDocument> {
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(threads.unwrap_or(0))
        .build()
        .context("building fusion thread pool")?;

    let results: Vec<_> = pool.install(|| pages.par_iter().map(|page| engine.fuse(page)).collect());

    let mut document = FusedDocument::default();
    for (page, result) in pages.iter().zip(results) {
        match result {
            Ok(fused) => document.pages.push(fused),
            Err(err) => {
                warn!(page = %page.page_id, error = %err, "page rejected");
                document.failures.push(PageFailure {
                    page_id: page.page_id.clone(),
                    error: err.to_string(),
                });
            }
        }
    }
    Ok(document)
}

pub fn build_document(config: &PipelineConfig) -> Result<FusedDocument> {
    let pages = load_pages(&config.input)?;
    let dictionary = load_dictionary(&config.settings)?;
    let engine = VotingFusionEngine::new(config.settings.fusion.clone())?.with_dictionary(&dictionary);

    info!(pages = pages.len(), input = %config.input.display(), "fusing pages");
    fuse_pages(&pages, &engine, config.settings.threads)
}

pub fn export_document(document: &FusedDocument, output: &Path, per_page_text: bool) -> Result<()> {
    JsonLinesExporter::new(output.to_path_buf()).export(&document.pages)?;
    TextExporter::new(output.to_path_buf())
        .with_per_page(per_page_text)
        .export(&document.pages)?;
    Ok(())
}

/// Reads a `pages.jsonl` written by [`export_document`].
pub fn load_results(path: &Path) -> Result<Vec<PageFusionResult>> {
    let source = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    source
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(idx, line)| {
            serde_json::from_str(line).with_context(|| format!("parsing page result on line {}", idx + 1))
        })
        .collect()
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DocumentSummary {
    pub pages: usize,
    pub lines: usize,
    pub methods: BTreeMap<String, usize>,
    pub mean_disagreement: f32,
    pub escalations: BTreeMap<String, usize>,
    pub outliers: BTreeMap<String, usize>,
}

pub fn summarize(pages: &[PageFusionResult]) -> DocumentSummary {
    let mut summary = DocumentSummary {
        pages: pages.len(),
        ..DocumentSummary::default()
    };
    for page in pages {
        summary.lines += page.fused_lines.len();
        for (method, count) in page.method_counts() {
            *summary.methods.entry(method.to_string()).or_insert(0) += count;
        }
        if page.needs_escalation {
            let reason = page.escalation_reason.clone().unwrap_or_else(|| "unknown".to_string());
            *summary.escalations.entry(reason).or_insert(0) += 1;
        }
        for engine in &page.outlier_engines {
            *summary.outliers.entry(engine.clone()).or_insert(0) += 1;
        }
    }
    if !pages.is_empty() {
        summary.mean_disagreement =
            pages.iter().map(|page| page.disagreement_score).sum::<f32>() / pages.len() as f32;
    }
    summary
}
