use std::time::Duration;

use super::run_state::Progress;

/// Lower bound on the per-item average used for ETAs, so a few cache-only
/// merges don't report an ETA of zero for a long remaining tail.
pub const MIN_AVG_ITEM_MS: f64 = 150.0;

/// Running average of per-item latency over one merge.
#[derive(Debug, Clone)]
pub struct ProgressEstimator {
    total: usize,
    done: usize,
    avg_ms: f64,
    floor_ms: f64,
}

impl ProgressEstimator {
    pub fn new(total: usize) -> Self {
        Self::with_floor(total, MIN_AVG_ITEM_MS)
    }

    pub fn with_floor(total: usize, floor_ms: f64) -> Self {
        Self {
            total,
            done: 0,
            avg_ms: 0.0,
            floor_ms: floor_ms.max(0.0),
        }
    }

    /// Records one finished item and returns the updated progress.
    pub fn record(&mut self, elapsed: Duration) -> Progress {
        self.done += 1;
        let elapsed_ms = elapsed.as_secs_f64() * 1000.0;
        let done = self.done as f64;
        self.avg_ms = (self.avg_ms * (done - 1.0) + elapsed_ms) / done;
        self.progress()
    }

    pub fn progress(&self) -> Progress {
        Progress {
            done: self.done,
            total: self.total,
            eta_ms: self.eta_ms(),
        }
    }

    pub fn eta_ms(&self) -> u64 {
        if self.total == 0 || self.done >= self.total {
            return 0;
        }
        let remaining = (self.total - self.done) as f64;
        (remaining * self.avg_ms.max(self.floor_ms)).round() as u64
    }

    pub fn avg_ms(&self) -> f64 {
        self.avg_ms
    }
}
