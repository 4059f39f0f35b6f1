use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use anyhow::Context;

use crate::{
    model::{item::now_timestamp, Item},
    store::ItemStore,
};

use super::{estimator::ProgressEstimator, run_state::Progress};

fn non_empty(value: Option<&String>) -> Option<String> {
    value.filter(|v| !v.is_empty()).cloned()
}

/// Incoming fields win, except `receivedAt` which keeps the first value
/// ever stored for the id.
pub fn merge_record(existing: Option<&Item>, incoming: Item) -> Item {
    let received_at = non_empty(existing.and_then(|e| e.received_at.as_ref()))
        .or_else(|| non_empty(incoming.received_at.as_ref()))
        .or_else(|| non_empty(incoming.processed_at.as_ref()))
        .unwrap_or_else(now_timestamp);

    Item {
        received_at: Some(received_at),
        ..incoming
    }
}

/// Merges freshly classified items into `store`, writing through after each
/// one, and returns how many ids were not in the store before.
///
/// Each write runs on the blocking pool, so other tasks keep running while
/// the cache file is rewritten.
///
/// # Arguments
///
/// * `per_item_delay` - pause after every item, skipped when zero
/// * `on_progress` - called after every item with the running done/total/ETA
pub async fn apply_processed(
    store: &Arc<ItemStore>,
    items: Vec<Item>,
    per_item_delay: Duration,
    mut on_progress: Option<&mut (dyn FnMut(Progress) + Send)>,
) -> anyhow::Result<usize> {
    if items.is_empty() {
        return Ok(0);
    }

    let mut estimator = ProgressEstimator::new(items.len());
    let mut added = 0;
    let mut mark = Instant::now();

    for item in items {
        if item.has_id() {
            let store = store.clone();
            let is_new = tokio::task::spawn_blocking(move || {
                let id = item.id.clone();
                store.upsert_with(&id, |existing| merge_record(existing, item))
            })
            .await
            .context("cache write task failed")??;
            if is_new {
                added += 1;
            }
        } else {
            tracing::warn!("Skipping classified item without id: {:?}", item.subject);
        }

        if let Some(callback) = on_progress.as_mut() {
            callback(estimator.record(mark.elapsed()));
        }

        if !per_item_delay.is_zero() {
            tokio::time::sleep(per_item_delay).await;
        }
        mark = Instant::now();
    }

    Ok(added)
}
