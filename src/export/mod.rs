pub mod json_export;
pub mod text_export;

use anyhow::Result;

use crate::core::model::PageFusionResult;

pub use json_export::JsonLinesExporter;
pub use text_export::TextExporter;

pub trait Exporter {
    fn export(&self, pages: &[PageFusionResult]) -> Result<()>;
}
