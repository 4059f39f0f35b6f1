use std::sync::Arc;

use crate::rate_limiters::RateLimiters;

use super::{InferenceError, LabelModel, LabelSet, TextPair};

#[derive(Clone)]
pub struct BatchInferenceEngine {
    model: Arc<dyn LabelModel>,
    rate_limiters: RateLimiters,
    labels_per_item: usize,
}

impl BatchInferenceEngine {
    pub fn new(
        model: Arc<dyn LabelModel>,
        rate_limiters: RateLimiters,
        labels_per_item: usize,
    ) -> Self {
        Self {
            model,
            rate_limiters,
            labels_per_item: labels_per_item.max(1),
        }
    }

    pub fn labels_per_item(&self) -> usize {
        self.labels_per_item
    }

    /// Predicts labels for every pair, `sub_batch_size` pairs per model call.
    ///
    /// # Arguments
    ///
    /// * `pairs` - Items to label, in the order results are returned
    /// * `sub_batch_size` - Upper bound on items per model call, at least 1
    ///
    /// # Returns
    ///
    /// One label set per pair, each truncated to `labels_per_item`. If any
    /// sub-batch fails nothing is returned.
    pub async fn predict_batch(
        &self,
        pairs: &[TextPair],
        sub_batch_size: usize,
    ) -> Result<Vec<LabelSet>, InferenceError> {
        if sub_batch_size == 0 {
            return Err(InferenceError::InvalidSubBatchSize);
        }

        let mut results = Vec::with_capacity(pairs.len());
        for (index, chunk) in pairs.chunks(sub_batch_size).enumerate() {
            let start = index * sub_batch_size;
            self.rate_limiters.acquire_one().await;

            // Model output for this chunk is dropped before the next call
            let labels = self.model.label_batch(chunk).await.map_err(|e| {
                InferenceError::SubBatchFailed {
                    index,
                    start,
                    end: start + chunk.len(),
                    reason: format!("{e:#}"),
                }
            })?;

            if labels.len() != chunk.len() {
                return Err(InferenceError::LengthMismatch {
                    expected: chunk.len(),
                    got: labels.len(),
                });
            }

            for (offset, mut set) in labels.into_iter().enumerate() {
                if set.len() < self.labels_per_item {
                    return Err(InferenceError::MissingLabels {
                        position: start + offset,
                        expected: self.labels_per_item,
                        got: set.len(),
                    });
                }
                set.truncate(self.labels_per_item);
                results.push(set);
            }

            tracing::debug!(
                "Sub-batch {} labeled items {}..{}",
                index,
                start,
                start + chunk.len()
            );
        }

        Ok(results)
    }

    pub async fn predict_one(&self, pair: TextPair) -> Result<LabelSet, InferenceError> {
        let mut labels = self.predict_batch(std::slice::from_ref(&pair), 1).await?;
        labels.pop().ok_or(InferenceError::LengthMismatch {
            expected: 1,
            got: 0,
        })
    }
}
