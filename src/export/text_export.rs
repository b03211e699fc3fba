use std::fs;
use std::path::PathBuf;

use anyhow::Result;

use crate::core::model::PageFusionResult;
use crate::export::Exporter;

pub const DOCUMENT_FILE: &str = "document.txt";

#[derive(Debug, Clone)]
pub struct TextExporter {
    out_dir: PathBuf,
    per_page: bool,
}

impl TextExporter {
    pub fn new(out_dir: PathBuf) -> Self {
        Self {
            out_dir,
            per_page: false,
        }
    }

    /// Also write `pages/<page_id>.txt` for every page.
    pub fn with_per_page(mut self, per_page: bool) -> Self {
        self.per_page = per_page;
        self
    }

    fn page_file_name(page_id: &str) -> String {
        let safe: String = page_id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        format!("{safe}.txt")
    }
}

impl Exporter for TextExporter {
    fn export(&self, pages: &[PageFusionResult]) -> Result<()> {
        fs::create_dir_all(&self.out_dir)?;

        let mut full_text = String::new();
        for page in pages {
            full_text.push_str(&format!("=== page {} ===\n", page.page_id));
            for line in &page.fused_lines {
                full_text.push_str(&line.text);
                full_text.push('\n');
            }
            full_text.push('\n');
        }
        fs::write(self.out_dir.join(DOCUMENT_FILE), full_text)?;

        if self.per_page {
            let page_dir = self.out_dir.join("pages");
            fs::create_dir_all(&page_dir)?;
            for page in pages {
                let mut text = page.text();
                text.push('\n');
                fs::write(page_dir.join(Self::page_file_name(&page.page_id)), text)?;
            }
        }

        Ok(())
    }
}
