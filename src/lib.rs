pub mod core;
pub mod escalation;
pub mod export;
pub mod fusion;
pub mod pipeline;

pub use crate::core::config::{FusionConfig, PipelineSettings};
pub use crate::core::error::{FusionDiagnostic, FusionError};
pub use crate::core::model::{EngineSet, FusedLine, FusionMethod, PageFusionResult, RawEngineOutput};
pub use crate::fusion::spell::Dictionary;
pub use crate::fusion::{FusionEngine, VotingFusionEngine};
