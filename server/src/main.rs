mod auth;
mod classify;
mod email;
mod error;
mod inference;
mod model;
mod observability;
mod rate_limiters;
mod request_tracing;
mod routes;
mod server_config;
mod store;
mod sync;
#[cfg(test)]
mod testing;

use std::{env, net::SocketAddr, sync::Arc};

use anyhow::Context;
use axum::{extract::FromRef, Router};
use classify::{
    ClassificationClient, ClassificationPipeline, HttpClassificationClient,
    LocalClassificationClient, PipelineSettings,
};
use inference::{mistral::MistralLabelModel, BatchInferenceEngine};
use mimalloc::MiMalloc;
use observability::RunLogger;
use rate_limiters::RateLimiters;
use routes::AppRouter;
use server_config::cfg;
use store::{ItemStore, ProcessedIdStore};
use sync::{CoordinatorSettings, RunCoordinator};
use tokio::signal;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

pub type HttpClient = reqwest::Client;

#[derive(Clone, FromRef)]
struct ServerState {
    coordinator: RunCoordinator,
    pipeline: Arc<ClassificationPipeline>,
    rate_limiters: RateLimiters,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::Layer::default().with_ansi(false))
        .init();

    tracing::info!("{}", *cfg);
    if cfg.api.key.is_empty() {
        tracing::warn!("No model API key configured, predictions will fail");
    }

    let http_client = reqwest::ClientBuilder::new().use_rustls_tls().build()?;
    let rate_limiters = RateLimiters::from_config();

    let model = MistralLabelModel::from_config(http_client.clone(), rate_limiters.clone());
    let engine = BatchInferenceEngine::new(
        Arc::new(model),
        rate_limiters.clone(),
        cfg.model.labels_per_item,
    );
    let pipeline = Arc::new(ClassificationPipeline::new(
        http_client.clone(),
        engine,
        Arc::new(ProcessedIdStore::new(cfg.storage.processed_ids_path.clone())),
        Arc::new(ItemStore::new(cfg.storage.processed_emails_path.clone())),
        PipelineSettings::from_config(),
    ));

    let client: Arc<dyn ClassificationClient> = match cfg.sync.classifier_url.as_deref() {
        Some(url) if !url.is_empty() => {
            tracing::info!("Sync runs call the remote classifier at {}", url);
            Arc::new(HttpClassificationClient::new(
                http_client.clone(),
                url,
                cfg.sync.request_timeout(),
            )?)
        }
        _ => {
            tracing::info!("Sync runs use the in-process classification pipeline");
            Arc::new(LocalClassificationClient::new(pipeline.clone()))
        }
    };

    let coordinator = RunCoordinator::new(
        client,
        Arc::new(ItemStore::new(cfg.storage.item_cache_path.clone())),
        CoordinatorSettings {
            initial_batch: cfg.sync.initial_batch,
            target: cfg.sync.target,
            batch_size: cfg.sync.batch_size,
            per_item_delay: cfg.sync.per_item_delay(),
            query: cfg.sync.query.clone(),
        },
    );
    // Lives as long as the server
    let _run_log = coordinator.subscribe(Arc::new(RunLogger::new()));

    let state = ServerState {
        coordinator,
        pipeline,
        rate_limiters,
    };

    run_server(AppRouter::create(state)).await
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received, draining connections");
}

async fn run_server(router: Router) -> anyhow::Result<()> {
    let port = env::var("PORT").unwrap_or_else(|_| "5006".to_string());
    let port = port
        .parse::<u16>()
        .with_context(|| format!("PORT must be a port number, got {port}"))?;

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("Inboxsort server running on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    tracing::info!("Server shut down");
    Ok(())
}
