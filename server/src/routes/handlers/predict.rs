use std::sync::Arc;

use axum::{extract::State, Json};
use serde::Deserialize;

use crate::{
    classify::ClassificationPipeline,
    error::AppJsonResult,
    inference::{LabelSet, TextPair},
};

pub async fn predict(
    State(pipeline): State<Arc<ClassificationPipeline>>,
    Json(pair): Json<TextPair>,
) -> AppJsonResult<LabelSet> {
    Ok(Json(pipeline.predict(pair).await?))
}

#[derive(Debug, Deserialize)]
pub struct PredictBatchRequest {
    #[serde(default)]
    pub emails: Vec<TextPair>,
}

pub async fn predict_batch(
    State(pipeline): State<Arc<ClassificationPipeline>>,
    Json(request): Json<PredictBatchRequest>,
) -> AppJsonResult<Vec<LabelSet>> {
    Ok(Json(pipeline.predict_batch(request.emails).await?))
}
