use std::sync::atomic::Ordering::Relaxed;
use std::sync::{atomic::AtomicBool, Arc};
use tokio::time::Duration;

use leaky_bucket::RateLimiter;

use crate::server_config::cfg;

/// Gates every model invocation. The bucket starts full so short bursts
/// (a single sub-batched request) go straight through.
#[derive(Clone)]
pub struct RateLimiters {
    model: Arc<RateLimiter>,
    backoff: Arc<AtomicBool>,
    backoff_duration: Duration,
}

impl RateLimiters {
    pub fn new(
        max_requests: usize,
        refill_interval_ms: usize,
        refill_amount: usize,
        backoff_duration: Duration,
    ) -> Self {
        let model = RateLimiter::builder()
            .initial(max_requests)
            .interval(Duration::from_millis(refill_interval_ms as u64))
            .max(max_requests)
            .refill(refill_amount)
            .build();

        Self {
            model: Arc::new(model),
            backoff: Arc::new(AtomicBool::new(false)),
            backoff_duration,
        }
    }

    pub fn from_config() -> Self {
        let limits = &cfg.api.request_limits;
        Self::new(
            limits.max_requests,
            limits.refill_interval_ms,
            limits.refill_amount,
            Duration::from_secs(limits.backoff_secs),
        )
    }

    pub async fn acquire_one(&self) {
        if self.backoff.load(Relaxed) {
            tokio::time::sleep(self.backoff_duration).await;
        }
        self.model.acquire_one().await;
    }

    pub fn trigger_backoff(&self) {
        tracing::info!("Triggering backoff...");
        self.backoff.store(true, Relaxed);
        let self_ = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(self_.backoff_duration).await;
            tracing::info!("Backoff expired");
            self_.backoff.store(false, Relaxed);
        });
    }

    pub fn is_backing_off(&self) -> bool {
        self.backoff.load(Relaxed)
    }

    pub fn get_status(&self) -> String {
        let bucket = format!("{}/{}", self.model.balance(), self.model.max());
        if self.is_backing_off() {
            format!("model requests: {} (BACKOFF)", bucket)
        } else {
            format!("model requests: {}", bucket)
        }
    }
}
