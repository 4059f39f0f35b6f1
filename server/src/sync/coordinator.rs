use std::{
    sync::{Arc, Mutex, MutexGuard, RwLock},
    time::Duration,
};

use chrono::Utc;
use tokio::{sync::oneshot, task::JoinHandle};

use crate::{
    classify::{ClassificationClient, PipelineError},
    store::ItemStore,
};

use super::{
    merger::apply_processed,
    run_state::{Phase, Progress, RunState},
    subscribers::{Subscriber, SubscriberRegistry, Subscription},
};

#[derive(Debug, Clone)]
pub struct CoordinatorSettings {
    pub initial_batch: usize,
    pub target: usize,
    pub batch_size: usize,
    pub per_item_delay: Duration,
    pub query: Option<String>,
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self {
            initial_batch: 15,
            target: super::run_state::DEFAULT_TARGET,
            batch_size: super::run_state::DEFAULT_BATCH_SIZE,
            per_item_delay: Duration::ZERO,
            query: None,
        }
    }
}

pub struct BackgroundRun {
    pub handle: JoinHandle<()>,
    pub initial_added: usize,
}

pub enum StartOutcome {
    MissingCredential,
    AlreadyRunning,
    Started(BackgroundRun),
}

struct CoordinatorInner {
    state: Mutex<RunState>,
    credential: RwLock<Option<String>>,
    subscribers: SubscriberRegistry,
    client: Arc<dyn ClassificationClient>,
    store: Arc<ItemStore>,
    initial_batch: usize,
    per_item_delay: Duration,
    query: Option<String>,
}

/// Owns the process-wide sync run: at most one run at a time, an initial
/// bounded fetch followed by a background loop up to `target` new items.
#[derive(Clone)]
pub struct RunCoordinator {
    inner: Arc<CoordinatorInner>,
}

impl RunCoordinator {
    pub fn new(
        client: Arc<dyn ClassificationClient>,
        store: Arc<ItemStore>,
        settings: CoordinatorSettings,
    ) -> Self {
        Self {
            inner: Arc::new(CoordinatorInner {
                state: Mutex::new(RunState::with_limits(settings.target, settings.batch_size)),
                credential: RwLock::new(None),
                subscribers: SubscriberRegistry::new(),
                client,
                store,
                initial_batch: settings.initial_batch.max(1),
                per_item_delay: settings.per_item_delay,
                query: settings.query,
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, RunState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Applies `f` and notifies with the result while still holding the lock,
    /// so subscribers see snapshots in the order the changes happened.
    fn update_and_notify(&self, f: impl FnOnce(&mut RunState)) -> RunState {
        let mut state = self.state();
        f(&mut state);
        let snapshot = state.clone();
        self.inner.subscribers.notify(&snapshot);
        snapshot
    }

    pub fn snapshot(&self) -> RunState {
        self.state().clone()
    }

    pub fn store(&self) -> &Arc<ItemStore> {
        &self.inner.store
    }

    pub fn set_credential(&self, credential: Option<String>) {
        let credential = credential.filter(|c| !c.is_empty());
        *self
            .inner
            .credential
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = credential;
    }

    fn credential(&self) -> Option<String> {
        self.inner
            .credential
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn set_target(&self, target: usize) -> RunState {
        self.update_and_notify(|state| state.target = target.max(1))
    }

    pub fn set_batch_size(&self, batch_size: usize) -> RunState {
        self.update_and_notify(|state| state.batch_size = batch_size.max(1))
    }

    /// Registers `subscriber` and hands it the current snapshot right away.
    pub fn subscribe(&self, subscriber: Arc<dyn Subscriber>) -> Subscription {
        let state = self.state();
        let subscription = self.inner.subscribers.register(subscriber.clone());
        subscriber.on_state_changed(state.clone());
        subscription
    }

    /// Starts a run unless one is already going or no credential is set.
    ///
    /// The whole run executes on a spawned task. The caller waits for the
    /// initial phase and gets its failure back here. Dropping the returned
    /// future does not abandon the run: it still ends in `Idle`.
    pub async fn start_if_needed(&self) -> Result<StartOutcome, PipelineError> {
        let Some(credential) = self.credential() else {
            tracing::debug!("No credential set, not starting a sync run");
            return Ok(StartOutcome::MissingCredential);
        };

        {
            let mut state = self.state();
            if state.is_running() {
                return Ok(StartOutcome::AlreadyRunning);
            }
            state.phase = Phase::Initial;
            state.session_added = 0;
            state.progress = Progress::default();
            state.started_at = Some(Utc::now());
            self.inner.subscribers.notify(&state);
        }

        let (initial_tx, initial_rx) = oneshot::channel();
        let this = self.clone();
        let handle = tokio::spawn(async move {
            match this.run_initial(&credential).await {
                Ok(added) => {
                    let _ = initial_tx.send(Ok(added));
                    this.run_background().await;
                }
                Err(e) => {
                    tracing::error!("Initial sync phase failed: {}", e);
                    this.state().phase = Phase::Idle;
                    let _ = initial_tx.send(Err(e));
                }
            }
        });

        match initial_rx.await {
            Ok(Ok(initial_added)) => Ok(StartOutcome::Started(BackgroundRun {
                handle,
                initial_added,
            })),
            Ok(Err(e)) => Err(e),
            Err(_) => {
                // The run task died before reporting
                let reason = match handle.await {
                    Err(e) => e.to_string(),
                    Ok(()) => "initial phase ended without a result".to_string(),
                };
                self.state().phase = Phase::Idle;
                Err(PipelineError::TransientFetchFailure(reason))
            }
        }
    }

    async fn run_initial(&self, credential: &str) -> Result<usize, PipelineError> {
        let outcome = self
            .inner
            .client
            .fetch_and_classify(credential, self.inner.initial_batch, self.inner.query.as_deref())
            .await?;

        let mut on_progress = |progress: Progress| {
            self.update_and_notify(|state| state.progress = progress);
        };
        let added = apply_processed(
            &self.inner.store,
            outcome.processed,
            self.inner.per_item_delay,
            Some(&mut on_progress),
        )
        .await
        .map_err(PipelineError::Store)?;

        let snapshot = self.update_and_notify(|state| {
            state.session_added += added;
            state.phase = Phase::Background;
        });
        tracing::info!(
            "Initial sync phase added {} items, continuing toward {}",
            added,
            snapshot.target
        );

        Ok(added)
    }

    async fn run_background(&self) {
        loop {
            let batch = self.state().next_batch();
            if batch == 0 {
                break;
            }
            let Some(credential) = self.credential() else {
                tracing::warn!("Credential cleared, ending background sync");
                break;
            };

            let outcome = match self
                .inner
                .client
                .fetch_and_classify(&credential, batch, self.inner.query.as_deref())
                .await
            {
                Ok(outcome) => outcome,
                Err(e) => {
                    tracing::warn!("Background sync call failed, stopping: {}", e);
                    break;
                }
            };

            let added =
                match apply_processed(&self.inner.store, outcome.processed, Duration::ZERO, None)
                    .await
                {
                    Ok(added) => added,
                    Err(e) => {
                        tracing::warn!("Background merge failed, stopping: {:#}", e);
                        break;
                    }
                };

            self.update_and_notify(|state| state.session_added += added);
            if added == 0 {
                tracing::info!("Background sync found nothing new, stopping");
                break;
            }
        }

        let snapshot = self.update_and_notify(|state| state.phase = Phase::Idle);
        tracing::info!(
            "Sync run finished with {} new items (target {})",
            snapshot.session_added,
            snapshot.target
        );
    }
}
