use std::sync::Arc;

use anyhow::Context;
use axum::{extract::State, Json};
use serde::Serialize;

use crate::{
    auth::BearerToken, classify::ClassificationPipeline, error::AppJsonResult,
    sync::RunCoordinator,
};

#[derive(Debug, Serialize)]
pub struct ClearUserDataResponse {
    pub success: bool,
    pub message: String,
}

pub async fn clear_user_data(
    _token: BearerToken,
    State(pipeline): State<Arc<ClassificationPipeline>>,
    State(coordinator): State<RunCoordinator>,
) -> AppJsonResult<ClearUserDataResponse> {
    pipeline
        .clear()
        .context("Failed to clear classification stores")?;
    coordinator
        .store()
        .clear()
        .context("Failed to clear item cache")?;
    tracing::info!("Cleared processed ids, stored emails and the item cache");

    Ok(Json(ClearUserDataResponse {
        success: true,
        message: "All user data cleared".to_string(),
    }))
}
