use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use derive_more::derive::Display;
use serde_json::json;

use crate::{auth::bearer::AuthError, classify::PipelineError, inference::InferenceError};

pub type AppResult<T> = Result<T, AppError>;
pub type AppJsonResult<T> = AppResult<Json<T>>;

#[derive(Debug, Display)]
pub enum AppError {
    NotFound(String),
    BadRequest(String),
    Internal(anyhow::Error),
    RequestTimeout,
    Unauthorized(String),
    ModelFailure(String),
    ServiceUnavailable(String),
}

impl std::error::Error for AppError {}

impl From<anyhow::Error> for AppError {
    fn from(error: anyhow::Error) -> Self {
        AppError::Internal(error)
    }
}

impl From<tower::BoxError> for AppError {
    fn from(error: tower::BoxError) -> Self {
        if error.is::<tower::timeout::error::Elapsed>() {
            AppError::RequestTimeout
        } else {
            AppError::Internal(anyhow::anyhow!(error.to_string()))
        }
    }
}

impl From<AuthError> for AppError {
    fn from(error: AuthError) -> Self {
        match error {
            AuthError::MissingCredentials => {
                AppError::Unauthorized("Missing or malformed bearer token".to_string())
            }
            AuthError::InvalidToken => AppError::Unauthorized("Empty bearer token".to_string()),
        }
    }
}

impl From<InferenceError> for AppError {
    fn from(error: InferenceError) -> Self {
        AppError::ModelFailure(error.to_string())
    }
}

impl From<PipelineError> for AppError {
    fn from(error: PipelineError) -> Self {
        match error {
            PipelineError::AuthenticationFailure(msg) => AppError::Unauthorized(msg),
            PipelineError::InferenceFailure(e) => e.into(),
            PipelineError::ValidationFailure(msg) => AppError::BadRequest(msg),
            PipelineError::TransientFetchFailure(msg) => AppError::ServiceUnavailable(msg),
            PipelineError::Store(e) => AppError::Internal(e),
        }
    }
}

fn error_body(status: StatusCode, message: impl Into<String>) -> (StatusCode, Json<serde_json::Value>) {
    (
        status,
        Json(json!({"error": {
            "code": status.as_u16(),
            "message": message.into()
        }})),
    )
}

// This centralizes all different errors from our app in one place
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let err = match self {
            AppError::BadRequest(error) => error_body(StatusCode::BAD_REQUEST, error),
            AppError::NotFound(msg) => error_body(StatusCode::NOT_FOUND, msg),
            AppError::Internal(e) => {
                tracing::error!("Internal error: {:#}", e);
                error_body(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
            }
            AppError::RequestTimeout => {
                error_body(StatusCode::REQUEST_TIMEOUT, "Request took too long")
            }
            AppError::Unauthorized(error) => error_body(StatusCode::UNAUTHORIZED, error),
            AppError::ModelFailure(error) => {
                tracing::error!("Model failure: {}", error);
                error_body(StatusCode::BAD_GATEWAY, error)
            }
            AppError::ServiceUnavailable(error) => {
                error_body(StatusCode::SERVICE_UNAVAILABLE, error)
            }
        };
        tracing::error!("Error: {:?}", err.1);

        err.into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    fn status_of(error: PipelineError) -> StatusCode {
        AppError::from(error).into_response().status()
    }

    #[test]
    fn test_pipeline_error_statuses() {
        assert_eq!(
            status_of(PipelineError::AuthenticationFailure("expired".into())),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            status_of(PipelineError::InferenceFailure(InferenceError::InvalidSubBatchSize)),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            status_of(PipelineError::ValidationFailure("empty".into())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_of(PipelineError::TransientFetchFailure("503 backend".into())),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            status_of(PipelineError::Store(anyhow!("disk full"))),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
