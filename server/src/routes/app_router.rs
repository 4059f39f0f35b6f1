use axum::{
    error_handling::HandleErrorLayer,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post, put},
    BoxError, Json, Router,
};
use http::HeaderValue;
use serde_json::json;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;

use crate::{
    error::AppError, rate_limiters::RateLimiters, request_tracing::with_request_tracing,
    server_config::cfg, ServerState,
};

use super::handlers::{classify, predict, sync, user_data};

pub struct AppRouter;

impl AppRouter {
    pub fn create(state: ServerState) -> Router {
        let origins = [
            HeaderValue::from_static("http://localhost:3000"),
            HeaderValue::from_static("https://localhost:3000"),
            HeaderValue::from_static("http://127.0.0.1:3000"),
        ];

        let cors_layer = CorsLayer::new()
            .allow_origin(origins)
            .allow_credentials(true);

        let router = Router::new()
            .route("/", get(|| async { "Inboxsort server" }))
            .route("/health", get(health))
            .route("/fetch-and-classify", post(classify::fetch_and_classify))
            .route("/reclassify/:message_id", post(classify::reclassify))
            .route("/emails", get(classify::list_emails))
            .route("/predict", post(predict::predict))
            .route("/predict-batch", post(predict::predict_batch))
            .route("/clear-user-data", post(user_data::clear_user_data))
            .route("/sync/start", post(sync::start))
            .route("/sync/state", get(sync::state))
            .route("/sync/settings", put(sync::update_settings))
            .route("/sync/ws", get(sync::state_ws))
            .route("/cache", get(sync::cache))
            .fallback(handler_404)
            .layer(
                ServiceBuilder::new()
                    .layer(HandleErrorLayer::new(handle_layer_error))
                    .timeout(cfg.sync.request_timeout()),
            )
            .layer(cors_layer)
            .with_state(state);

        with_request_tracing(router)
    }
}

async fn health(State(rate_limiters): State<RateLimiters>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "limits": rate_limiters.get_status(),
    }))
}

async fn handle_layer_error(error: BoxError) -> AppError {
    error.into()
}

pub async fn handler_404() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, "Route does not exist")
}
