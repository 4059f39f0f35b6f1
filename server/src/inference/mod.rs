//! Strict batch label prediction.
//!
//! [`BatchInferenceEngine`] splits work into sub-batches, makes one
//! [`LabelModel`] call per sub-batch and either returns a label set for every
//! input, in order, or fails as a whole.

mod engine;
pub mod mistral;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use engine::BatchInferenceEngine;

/// Ordered labels for one item, best first.
pub type LabelSet = Vec<String>;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextPair {
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub body: String,
}

impl TextPair {
    pub fn new(subject: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            body: body.into(),
        }
    }
}

/// One model invocation over a whole sub-batch.
#[async_trait]
pub trait LabelModel: Send + Sync {
    async fn label_batch(&self, pairs: &[TextPair]) -> anyhow::Result<Vec<LabelSet>>;
}

#[derive(Debug, Error)]
pub enum InferenceError {
    #[error("sub-batch size must be at least 1")]
    InvalidSubBatchSize,
    #[error("sub-batch {index} (items {start}..{end}) failed: {reason}")]
    SubBatchFailed {
        index: usize,
        start: usize,
        end: usize,
        reason: String,
    },
    #[error("model returned {got} label sets for {expected} items")]
    LengthMismatch { expected: usize, got: usize },
    #[error("item {position} got {got} labels, {expected} required")]
    MissingLabels {
        position: usize,
        expected: usize,
        got: usize,
    },
    #[error("remote inference failed: {0}")]
    Remote(String),
}
