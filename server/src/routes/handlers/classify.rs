use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;

use crate::{
    auth::BearerToken,
    classify::{ClassificationPipeline, FetchOutcome},
    error::AppJsonResult,
    model::Item,
};

const DEFAULT_MAX_RESULTS: usize = 30;

#[derive(Debug, Deserialize)]
pub struct FetchParams {
    #[serde(default = "default_max_results")]
    pub max_results: usize,
    pub q: Option<String>,
}

fn default_max_results() -> usize {
    DEFAULT_MAX_RESULTS
}

pub async fn fetch_and_classify(
    token: BearerToken,
    State(pipeline): State<Arc<ClassificationPipeline>>,
    Query(params): Query<FetchParams>,
) -> AppJsonResult<FetchOutcome> {
    let mailbox = pipeline.mailbox_for(&token.0);
    let outcome = pipeline
        .fetch_and_classify(&mailbox, params.max_results, params.q.as_deref())
        .await?;

    Ok(Json(outcome))
}

pub async fn reclassify(
    token: BearerToken,
    State(pipeline): State<Arc<ClassificationPipeline>>,
    Path(message_id): Path<String>,
) -> AppJsonResult<Item> {
    let mailbox = pipeline.mailbox_for(&token.0);
    Ok(Json(pipeline.reclassify(&mailbox, &message_id).await?))
}

/// Classifies whatever is new, then lists everything stored so far.
pub async fn list_emails(
    token: BearerToken,
    State(pipeline): State<Arc<ClassificationPipeline>>,
) -> AppJsonResult<Vec<Item>> {
    let mailbox = pipeline.mailbox_for(&token.0);
    let outcome = pipeline
        .fetch_and_classify(&mailbox, DEFAULT_MAX_RESULTS, None)
        .await?;
    tracing::debug!("Listing emails after classifying {} new", outcome.new_count);

    Ok(Json(pipeline.emails().all()?))
}
