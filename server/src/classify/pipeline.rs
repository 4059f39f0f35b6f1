use std::sync::Arc;

use crate::{
    email::{GmailClient, GmailError, MailContent, Mailbox},
    inference::{BatchInferenceEngine, LabelSet, TextPair},
    model::{item::now_timestamp, Item},
    server_config::cfg,
    store::{ItemStore, ProcessedIdStore},
    HttpClient,
};

use super::{FetchOutcome, PipelineError};

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub sub_batch_size: usize,
    pub estimated_ms_per_item: u64,
    pub max_search_results: usize,
}

impl PipelineSettings {
    pub fn from_config() -> Self {
        Self {
            sub_batch_size: cfg.inference.sub_batch_size,
            estimated_ms_per_item: cfg.inference.estimated_ms_per_item,
            max_search_results: cfg.gmail.max_search_results,
        }
    }
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            sub_batch_size: 3,
            estimated_ms_per_item: 500,
            max_search_results: 500,
        }
    }
}

/// How many ids to list so that enough unprocessed ones turn up.
pub fn search_window(max_results: usize, cap: usize) -> usize {
    (max_results.saturating_mul(10)).max(50).min(cap)
}

/// Server side of fetch-and-classify: Gmail in, labeled items out, with the
/// processed-id store preventing repeat work.
pub struct ClassificationPipeline {
    http_client: HttpClient,
    engine: BatchInferenceEngine,
    processed_ids: Arc<ProcessedIdStore>,
    emails: Arc<ItemStore>,
    settings: PipelineSettings,
}

impl ClassificationPipeline {
    pub fn new(
        http_client: HttpClient,
        engine: BatchInferenceEngine,
        processed_ids: Arc<ProcessedIdStore>,
        emails: Arc<ItemStore>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            http_client,
            engine,
            processed_ids,
            emails,
            settings,
        }
    }

    pub fn mailbox_for(&self, access_token: &str) -> GmailClient {
        GmailClient::new(self.http_client.clone(), access_token)
    }

    pub fn emails(&self) -> &Arc<ItemStore> {
        &self.emails
    }

    pub fn processed_ids(&self) -> &Arc<ProcessedIdStore> {
        &self.processed_ids
    }

    fn labeled_item(&self, content: MailContent, labels: LabelSet) -> Item {
        Item {
            id: content.id,
            thread_id: content.thread_id,
            subject: content.subject,
            body: content.body,
            sender: content.sender,
            date: content.date,
            categories: labels,
            received_at: None,
            processed_at: Some(now_timestamp()),
        }
    }

    /// Classifies up to `max_results` messages not seen before.
    ///
    /// A single message that fails to download is skipped. An authentication
    /// failure or any inference failure fails the call and nothing is marked
    /// processed.
    pub async fn fetch_and_classify(
        &self,
        mailbox: &dyn Mailbox,
        max_results: usize,
        query: Option<&str>,
    ) -> Result<FetchOutcome, PipelineError> {
        let window = search_window(max_results, self.settings.max_search_results);
        let ids = mailbox.list_message_ids(query, window).await?;

        let mut new_ids = Vec::with_capacity(max_results);
        for id in ids.iter().filter(|id| !id.is_empty()) {
            if new_ids.len() == max_results {
                break;
            }
            if !self.processed_ids.has(id).map_err(PipelineError::Store)? {
                new_ids.push(id.clone());
            }
        }
        let estimated_ms = self.settings.estimated_ms_per_item * new_ids.len() as u64;
        tracing::info!(
            "fetch-and-classify: scanned={}, new={}, est ~{} ms",
            ids.len(),
            new_ids.len(),
            estimated_ms
        );

        let mut fetched = Vec::with_capacity(new_ids.len());
        for id in &new_ids {
            match mailbox.get_message(id).await {
                Ok(content) => fetched.push(content),
                Err(GmailError::Unauthorized) => {
                    return Err(GmailError::Unauthorized.into());
                }
                Err(e) => tracing::warn!("Failed to fetch message {}: {}", id, e),
            }
        }

        if fetched.is_empty() {
            return Ok(FetchOutcome::default());
        }

        let pairs: Vec<TextPair> = fetched
            .iter()
            .map(|m| TextPair::new(m.subject.clone(), m.body.clone()))
            .collect();
        let labels = self
            .engine
            .predict_batch(&pairs, self.settings.sub_batch_size)
            .await?;
        drop(pairs);

        let processed: Vec<Item> = fetched
            .into_iter()
            .zip(labels)
            .map(|(content, labels)| self.labeled_item(content, labels))
            .collect();

        self.processed_ids
            .add_many(processed.iter().map(|item| item.id.as_str()))
            .map_err(PipelineError::Store)?;
        self.emails
            .upsert_many(processed.clone())
            .map_err(PipelineError::Store)?;

        tracing::info!("fetch-and-classify: classified {} messages", processed.len());
        Ok(FetchOutcome {
            new_count: processed.len(),
            processed,
            estimated_ms,
        })
    }

    /// Re-labels one message regardless of whether it was processed before.
    pub async fn reclassify(
        &self,
        mailbox: &dyn Mailbox,
        message_id: &str,
    ) -> Result<Item, PipelineError> {
        let content = mailbox.get_message(message_id).await?;
        let labels = self
            .engine
            .predict_one(TextPair::new(content.subject.clone(), content.body.clone()))
            .await?;

        let item = self.labeled_item(content, labels);
        self.emails
            .upsert(item.clone())
            .map_err(PipelineError::Store)?;
        self.processed_ids
            .add(&item.id)
            .map_err(PipelineError::Store)?;

        Ok(item)
    }

    fn validate(pair: &TextPair, position: usize) -> Result<(), PipelineError> {
        if pair.subject.trim().is_empty() && pair.body.trim().is_empty() {
            return Err(PipelineError::ValidationFailure(format!(
                "email {} has neither subject nor body",
                position
            )));
        }
        Ok(())
    }

    pub async fn predict(&self, pair: TextPair) -> Result<LabelSet, PipelineError> {
        Self::validate(&pair, 0)?;
        Ok(self.engine.predict_one(pair).await?)
    }

    pub async fn predict_batch(&self, pairs: Vec<TextPair>) -> Result<Vec<LabelSet>, PipelineError> {
        if pairs.is_empty() {
            return Err(PipelineError::ValidationFailure(
                "emails must not be empty".to_string(),
            ));
        }
        for (position, pair) in pairs.iter().enumerate() {
            Self::validate(pair, position)?;
        }
        Ok(self
            .engine
            .predict_batch(&pairs, self.settings.sub_batch_size)
            .await?)
    }

    /// Empties the processed-id store and the server email store.
    pub fn clear(&self) -> anyhow::Result<()> {
        self.processed_ids.clear()?;
        self.emails.clear()?;
        Ok(())
    }
}
