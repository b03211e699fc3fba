use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};

use crate::core::model::PageFusionResult;
use crate::export::Exporter;

pub const PAGES_FILE: &str = "pages.jsonl";

/// One self-contained JSON object per page, in page order.
#[derive(Debug, Clone)]
pub struct JsonLinesExporter {
    out_dir: PathBuf,
}

impl JsonLinesExporter {
    pub fn new(out_dir: PathBuf) -> Self {
        Self { out_dir }
    }
}

impl Exporter for JsonLinesExporter {
    fn export(&self, pages: &[PageFusionResult]) -> Result<()> {
        fs::create_dir_all(&self.out_dir)?;
        let path = self.out_dir.join(PAGES_FILE);
        let file = File::create(&path).with_context(|| format!("creating {}", path.display()))?;
        let mut writer = BufWriter::new(file);
        for page in pages {
            serde_json::to_writer(&mut writer, page)?;
            writer.write_all(b"\n")?;
        }
        writer.flush()?;
        Ok(())
    }
}
