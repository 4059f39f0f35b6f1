use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, Mutex},
    time::Duration,
};

use anyhow::anyhow;
use async_trait::async_trait;
use google_gmail1::api::Message;
use tempfile::TempDir;

use crate::{
    classify::{
        ClassificationClient, ClassificationPipeline, FetchOutcome, PipelineError,
        PipelineSettings,
    },
    email::{GmailError, MailContent, Mailbox},
    inference::{BatchInferenceEngine, LabelModel, LabelSet, TextPair},
    model::Item,
    rate_limiters::RateLimiters,
    store::{ItemStore, ProcessedIdStore},
    HttpClient,
};

/// 2025-10-17T12:00:00Z
pub const TEST_INTERNAL_DATE_MS: i64 = 1_760_702_400_000;

pub fn item(id: &str) -> Item {
    Item {
        id: id.to_string(),
        subject: format!("subject {id}"),
        body: format!("body {id}"),
        categories: vec!["work".to_string(), "events".to_string()],
        ..Default::default()
    }
}

/// `n` items with ids `{prefix}0..{prefix}{n-1}`.
pub fn items(prefix: &str, n: usize) -> Vec<Item> {
    (0..n).map(|i| item(&format!("{prefix}{i}"))).collect()
}

pub fn temp_store() -> (TempDir, ItemStore) {
    let dir = tempfile::tempdir().unwrap();
    let store = ItemStore::new(dir.path().join("item_cache.json"));
    (dir, store)
}

pub fn test_rate_limiters() -> RateLimiters {
    RateLimiters::new(10_000, 1, 10_000, Duration::from_millis(10))
}

pub fn raw_gmail_message(id: &str, raw: &str) -> Message {
    Message {
        id: Some(id.to_string()),
        thread_id: Some(format!("t-{id}")),
        internal_date: Some(TEST_INTERNAL_DATE_MS),
        raw: Some(raw.as_bytes().to_vec()),
        ..Default::default()
    }
}

pub fn test_pipeline(model: Arc<FakeLabelModel>) -> (TempDir, ClassificationPipeline) {
    let dir = tempfile::tempdir().unwrap();
    let engine = BatchInferenceEngine::new(model, test_rate_limiters(), 2);
    let pipeline = ClassificationPipeline::new(
        HttpClient::new(),
        engine,
        Arc::new(ProcessedIdStore::new(dir.path().join("processed_ids.json"))),
        Arc::new(ItemStore::new(dir.path().join("processed_emails.json"))),
        PipelineSettings {
            sub_batch_size: 2,
            ..Default::default()
        },
    );
    (dir, pipeline)
}

/// Labels each pair `[subject, "second", "third"]`, cut to `labels_per_item`.
pub struct FakeLabelModel {
    labels_per_item: usize,
    fail_on_call: Option<usize>,
    calls: Mutex<Vec<usize>>,
}

impl FakeLabelModel {
    pub fn new() -> Self {
        Self {
            labels_per_item: 3,
            fail_on_call: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Fails the `call`-th invocation, counting from 0.
    pub fn failing_on_call(call: usize) -> Self {
        Self {
            fail_on_call: Some(call),
            ..Self::new()
        }
    }

    pub fn with_labels_per_item(labels_per_item: usize) -> Self {
        Self {
            labels_per_item,
            ..Self::new()
        }
    }

    pub fn call_sizes(&self) -> Vec<usize> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl LabelModel for FakeLabelModel {
    async fn label_batch(&self, pairs: &[TextPair]) -> anyhow::Result<Vec<LabelSet>> {
        let call = {
            let mut calls = self.calls.lock().unwrap();
            calls.push(pairs.len());
            calls.len() - 1
        };
        if self.fail_on_call == Some(call) {
            return Err(anyhow!("model exploded on call {call}"));
        }

        Ok(pairs
            .iter()
            .map(|pair| {
                [pair.subject.as_str(), "second", "third"]
                    .iter()
                    .take(self.labels_per_item)
                    .map(|s| s.to_string())
                    .collect()
            })
            .collect())
    }
}

/// Replays queued outcomes in order, then returns empty outcomes.
pub struct FakeClassificationClient {
    outcomes: Mutex<VecDeque<Result<FetchOutcome, PipelineError>>>,
    calls: Mutex<Vec<usize>>,
    delay: Duration,
}

impl FakeClassificationClient {
    pub fn new() -> Self {
        Self::with_delay(Duration::ZERO)
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self {
            outcomes: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
            delay,
        }
    }

    pub fn push_ok(&self, processed: Vec<Item>) {
        self.outcomes.lock().unwrap().push_back(Ok(FetchOutcome {
            new_count: processed.len(),
            processed,
            estimated_ms: 0,
        }));
    }

    pub fn push_err(&self, error: PipelineError) {
        self.outcomes.lock().unwrap().push_back(Err(error));
    }

    /// `max_results` of every call so far.
    pub fn calls(&self) -> Vec<usize> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ClassificationClient for FakeClassificationClient {
    async fn fetch_and_classify(
        &self,
        _credential: &str,
        max_results: usize,
        _query: Option<&str>,
    ) -> Result<FetchOutcome, PipelineError> {
        self.calls.lock().unwrap().push(max_results);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let next = self.outcomes.lock().unwrap().pop_front();
        next.unwrap_or_else(|| Ok(FetchOutcome::default()))
    }
}

/// In-memory mailbox listing ids in the given order.
pub struct FakeMailbox {
    ids: Vec<String>,
    failures: Mutex<HashMap<String, GmailError>>,
    list_limits: Mutex<Vec<usize>>,
}

impl FakeMailbox {
    pub fn with_messages(ids: &[&str]) -> Self {
        Self {
            ids: ids.iter().map(|s| s.to_string()).collect(),
            failures: Mutex::new(HashMap::new()),
            list_limits: Mutex::new(Vec::new()),
        }
    }

    /// The next fetch of `id` fails with `error`.
    pub fn fail_message(&self, id: &str, error: GmailError) {
        self.failures.lock().unwrap().insert(id.to_string(), error);
    }

    pub fn list_limits(&self) -> Vec<usize> {
        self.list_limits.lock().unwrap().clone()
    }
}

#[async_trait]
impl Mailbox for FakeMailbox {
    async fn list_message_ids(
        &self,
        _query: Option<&str>,
        max_results: usize,
    ) -> Result<Vec<String>, GmailError> {
        self.list_limits.lock().unwrap().push(max_results);
        Ok(self.ids.iter().take(max_results).cloned().collect())
    }

    async fn get_message(&self, id: &str) -> Result<MailContent, GmailError> {
        if let Some(error) = self.failures.lock().unwrap().remove(id) {
            return Err(error);
        }
        Ok(MailContent {
            id: id.to_string(),
            thread_id: Some(format!("t-{id}")),
            subject: format!("subject {id}"),
            sender: Some("Sender <sender@example.com>".to_string()),
            body: format!("body {id}"),
            date: Some("2025-10-17".to_string()),
        })
    }
}
