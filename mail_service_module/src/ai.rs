//! Language-model pipelines: label classification, summaries, smart replies
//! and compose assistance. Each run either completes or fails as a whole.

mod classify;
mod compose;
mod context;
mod settings;

pub use classify::{
    ClassificationPipeline, ClassifyOutcome, ClassifyRequest, ClassifyTarget, LabelCandidate,
    DEFAULT_MIN_CONFIDENCE,
};
pub use compose::{ComposePipeline, ComposeRequest};
pub use context::ThreadContext;
pub use settings::{load_settings, merge_settings, update_settings, AiSettings};

use crate::llm::LlmError;
use crate::store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("model error: {0}")]
    Llm(#[from] LlmError),
    #[error("thread not found: {0}")]
    ThreadNotFound(String),
    #[error("invalid input: {0}")]
    Invalid(String),
}
