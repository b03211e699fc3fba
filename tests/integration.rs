use std::fs;

use anyhow::Result;
use pretty_assertions::assert_eq;

use ocrfuse::core::config::PipelineSettings;
use ocrfuse::export::json_export::PAGES_FILE;
use ocrfuse::export::text_export::DOCUMENT_FILE;
use ocrfuse::pipeline::{build_document, export_document, load_results, summarize, PipelineConfig};
use ocrfuse::FusionMethod;

const INPUT: &str = r#"{"page_id":"12","engines":[{"engine_id":"easyocr","lines":["You have l2 STAMINA.","Tum to 157"],"line_confidences":[0.61,0.58]},{"engine_id":"tesseract","lines":["You have 12 STAMINA.","Turn to 157."]},{"engine_id":"pdftext","lines":["@@#%$ ^^&* ~~~ ((()))"]}]}
{"page_id":"13","engines":[{"engine_id":"easyocr","lines":[],"error":"model crashed"},{"engine_id":"tesseract","lines":["", "  "]}]}
{"page_id":"14","engines":[]}
"#;

/// End-to-end: JSONL in, pages.jsonl and document.txt out.
#[test]
fn test_full_pipeline_with_engine_sets() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let input = dir.path().join("book.jsonl");
    fs::write(&input, INPUT)?;
    let output = dir.path().join("out");

    let config = PipelineConfig::new(input, output.clone(), PipelineSettings::default());
    let document = build_document(&config)?;
    export_document(&document, &output, false)?;

    assert_eq!(document.pages.len(), 2);
    assert_eq!(document.failures.len(), 1);
    assert_eq!(document.failures[0].page_id, "14");

    let fused = &document.pages[0];
    assert!(fused.outlier_engines.contains("pdftext"));
    assert_eq!(fused.fused_lines[1].text, "Turn to 157.");
    assert!(fused
        .fused_lines
        .iter()
        .all(|line| line.method == FusionMethod::CharFusion));

    let empty = &document.pages[1];
    assert!(empty.fused_lines.is_empty());
    assert!(empty.needs_escalation);
    assert_eq!(empty.escalation_reason.as_deref(), Some("no_text"));

    let reloaded = load_results(&output.join(PAGES_FILE))?;
    assert_eq!(reloaded, document.pages);

    let text = fs::read_to_string(output.join(DOCUMENT_FILE))?;
    assert!(text.starts_with("=== page 12 ===\n"));
    assert!(text.contains("Turn to 157.\n"));
    assert!(text.contains("=== page 13 ===\n"));

    let summary = summarize(&reloaded);
    assert_eq!(summary.pages, 2);
    assert_eq!(summary.escalations.get("no_text"), Some(&1));
    assert_eq!(summary.outliers.get("pdftext"), Some(&1));
    Ok(())
}

#[test]
fn test_settings_file_drives_fusion() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let settings_path = dir.path().join("ocrfuse.toml");
    fs::write(
        &settings_path,
        r#"
threads = 1

[fusion]
engine_ids = ["tesseract"]
critical_disagreement_threshold = 0.2
"#,
    )?;
    let settings = PipelineSettings::from_file(&settings_path)?;
    assert_eq!(settings.threads, Some(1));
    assert_eq!(settings.fusion.outlier_threshold, 0.6);

    let input = dir.path().join("pages.jsonl");
    fs::write(&input, INPUT)?;
    let document = build_document(&PipelineConfig::new(input, dir.path().join("out"), settings))?;

    let fused = &document.pages[0];
    assert_eq!(fused.engines.len(), 1);
    assert_eq!(fused.text(), "You have 12 STAMINA.\nTurn to 157.");
    assert!(fused
        .fused_lines
        .iter()
        .all(|line| line.method == FusionMethod::SingleEngine));
    Ok(())
}

#[test]
fn test_invalid_settings_are_rejected() {
    let result = PipelineSettings::from_toml_str("[fusion]\nchar_fusion_threshold = 0.5\ndistance_drop = 0.3\n");
    assert!(result.is_err());
}

#[test]
fn test_missing_dictionary_fails_the_run() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let input = dir.path().join("pages.jsonl");
    fs::write(&input, INPUT)?;
    let settings = PipelineSettings {
        dictionary: Some(dir.path().join("missing.txt")),
        ..PipelineSettings::default()
    };
    assert!(build_document(&PipelineConfig::new(input, dir.path().join("out"), settings)).is_err());
    Ok(())
}
