//! Fetch-and-classify: pull new inbox messages, label them, and report the
//! freshly classified items back to the caller.

mod client;
mod pipeline;

use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::{email::GmailError, inference::InferenceError, model::Item};

pub use client::{HttpClassificationClient, LocalClassificationClient};
pub use pipeline::{search_window, ClassificationPipeline, PipelineSettings};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("authentication failed: {0}")]
    AuthenticationFailure(String),
    #[error("fetch failed: {0}")]
    TransientFetchFailure(String),
    #[error("inference failed: {0}")]
    InferenceFailure(#[from] InferenceError),
    #[error("invalid input: {0}")]
    ValidationFailure(String),
    #[error("cache write failed: {0:#}")]
    Store(anyhow::Error),
}

impl From<GmailError> for PipelineError {
    fn from(error: GmailError) -> Self {
        match error {
            GmailError::Unauthorized => PipelineError::AuthenticationFailure(error.to_string()),
            other => PipelineError::TransientFetchFailure(other.to_string()),
        }
    }
}

/// Response of one fetch-and-classify call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchOutcome {
    #[serde(default, deserialize_with = "list_or_empty")]
    pub processed: Vec<Item>,
    #[serde(default)]
    pub new_count: usize,
    #[serde(default)]
    pub estimated_ms: u64,
}

/// A `processed` value that is not a list reads as no items.
fn list_or_empty<'de, D>(deserializer: D) -> Result<Vec<Item>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    let Value::Array(entries) = value else {
        if !value.is_null() {
            tracing::warn!("Ignoring non-list processed field: {}", value);
        }
        return Ok(Vec::new());
    };

    Ok(entries
        .into_iter()
        .filter_map(|entry| match serde_json::from_value::<Item>(entry) {
            Ok(item) => Some(item),
            Err(e) => {
                tracing::warn!("Ignoring unreadable processed item: {}", e);
                None
            }
        })
        .collect())
}

/// Source of freshly classified items for the sync coordinator.
#[async_trait]
pub trait ClassificationClient: Send + Sync {
    async fn fetch_and_classify(
        &self,
        credential: &str,
        max_results: usize,
        query: Option<&str>,
    ) -> Result<FetchOutcome, PipelineError>;
}
