use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::Display;

pub const DEFAULT_TARGET: usize = 100;
pub const DEFAULT_BATCH_SIZE: usize = 10;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "camelCase")]
#[strum(serialize_all = "lowercase")]
pub enum Phase {
    #[default]
    Idle,
    Initial,
    Background,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Progress {
    pub done: usize,
    pub total: usize,
    pub eta_ms: u64,
}

/// Snapshot of a sync run. Subscribers always receive an owned copy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunState {
    pub phase: Phase,
    pub session_added: usize,
    pub target: usize,
    pub batch_size: usize,
    pub progress: Progress,
    pub started_at: Option<DateTime<Utc>>,
}

impl Default for RunState {
    fn default() -> Self {
        Self {
            phase: Phase::Idle,
            session_added: 0,
            target: DEFAULT_TARGET,
            batch_size: DEFAULT_BATCH_SIZE,
            progress: Progress::default(),
            started_at: None,
        }
    }
}

impl RunState {
    pub fn with_limits(target: usize, batch_size: usize) -> Self {
        Self {
            target: target.max(1),
            batch_size: batch_size.max(1),
            ..Default::default()
        }
    }

    pub fn is_running(&self) -> bool {
        self.phase != Phase::Idle
    }

    /// Items the background phase should request next, or 0 when the target is met.
    pub fn next_batch(&self) -> usize {
        self.batch_size
            .min(self.target.saturating_sub(self.session_added))
    }
}
