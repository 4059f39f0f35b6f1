use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
    Json,
};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::{
    auth::BearerToken,
    error::AppJsonResult,
    model::Item,
    sync::{RunCoordinator, RunState, StartOutcome},
};

#[derive(Debug, Serialize)]
pub struct StartSyncResponse {
    pub started: bool,
    pub state: RunState,
}

pub async fn start(
    token: BearerToken,
    State(coordinator): State<RunCoordinator>,
) -> AppJsonResult<StartSyncResponse> {
    coordinator.set_credential(Some(token.0));

    let started = match coordinator.start_if_needed().await? {
        StartOutcome::Started(run) => {
            tracing::info!(
                "Sync run started, initial phase added {} items",
                run.initial_added
            );
            true
        }
        StartOutcome::AlreadyRunning => {
            tracing::debug!("Sync run already in progress");
            false
        }
        StartOutcome::MissingCredential => false,
    };

    Ok(Json(StartSyncResponse {
        started,
        state: coordinator.snapshot(),
    }))
}

pub async fn state(State(coordinator): State<RunCoordinator>) -> Json<RunState> {
    Json(coordinator.snapshot())
}

#[derive(Debug, Default, Deserialize)]
pub struct SettingsUpdate {
    pub target: Option<usize>,
    #[serde(alias = "batchSize")]
    pub batch_size: Option<usize>,
}

pub async fn update_settings(
    State(coordinator): State<RunCoordinator>,
    Json(update): Json<SettingsUpdate>,
) -> Json<RunState> {
    if let Some(target) = update.target {
        coordinator.set_target(target);
    }
    if let Some(batch_size) = update.batch_size {
        coordinator.set_batch_size(batch_size);
    }
    Json(coordinator.snapshot())
}

pub async fn cache(State(coordinator): State<RunCoordinator>) -> AppJsonResult<Vec<Item>> {
    Ok(Json(coordinator.store().all()?))
}

/// Streams every run state change as JSON, starting with the current one.
pub async fn state_ws(
    ws: WebSocketUpgrade,
    State(coordinator): State<RunCoordinator>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_state_socket(socket, coordinator))
}

async fn handle_state_socket(socket: WebSocket, coordinator: RunCoordinator) {
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<RunState>();

    let subscription = coordinator.subscribe(Arc::new(move |snapshot: RunState| {
        // Receiver gone means the socket loop already ended
        let _ = tx.send(snapshot);
    }));

    loop {
        tokio::select! {
            Some(snapshot) = rx.recv() => {
                let text = match serde_json::to_string(&snapshot) {
                    Ok(text) => text,
                    Err(e) => {
                        tracing::error!("Failed to serialize run state: {:?}", e);
                        break;
                    }
                };
                if let Err(e) = sender.send(Message::Text(text)).await {
                    tracing::debug!("State socket closed while sending: {:?}", e);
                    break;
                }
            }
            incoming = receiver.next() => match incoming {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }

    subscription.unsubscribe();
    tracing::debug!("State socket subscriber removed");
}
