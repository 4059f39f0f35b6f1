//! Run Log
//!
//! A sync subscriber that renders run state as a status table whenever the
//! phase changes, and logs per-item progress at debug level.

use std::sync::Mutex;

use chrono::Utc;
use tracing::{debug, info};

use crate::sync::{Phase, RunState, Subscriber};

// ============================================================================
// Table Formatting Utilities
// ============================================================================

/// Format a table with headers and rows
fn format_table(headers: &[&str], rows: &[Vec<String>]) -> String {
    if rows.is_empty() {
        return String::new();
    }

    let mut widths: Vec<usize> = headers.iter().map(|h| h.len()).collect();
    for row in rows {
        for (i, cell) in row.iter().enumerate() {
            if i < widths.len() {
                widths[i] = widths[i].max(cell.len());
            }
        }
    }

    let mut output = String::new();

    let header_line: Vec<String> = headers
        .iter()
        .enumerate()
        .map(|(i, h)| format!("{:width$}", h, width = widths[i]))
        .collect();
    output.push_str(&format!("| {} |\n", header_line.join(" | ")));

    let separator: Vec<String> = widths.iter().map(|w| "-".repeat(*w)).collect();
    output.push_str(&format!("|-{}-|\n", separator.join("-|-")));

    for row in rows {
        let cells: Vec<String> = row
            .iter()
            .enumerate()
            .map(|(i, cell)| {
                let width = widths.get(i).copied().unwrap_or(cell.len());
                format!("{:width$}", cell, width = width)
            })
            .collect();
        output.push_str(&format!("| {} |\n", cells.join(" | ")));
    }

    output
}

fn format_elapsed(state: &RunState) -> String {
    state
        .started_at
        .map(|started| {
            let secs = (Utc::now() - started).num_seconds().max(0);
            format!("{}m {:02}s", secs / 60, secs % 60)
        })
        .unwrap_or_else(|| "-".to_string())
}

fn format_eta(eta_ms: u64) -> String {
    if eta_ms == 0 {
        "-".to_string()
    } else {
        format!("{:.1}s", eta_ms as f64 / 1000.0)
    }
}

/// Status table for one snapshot.
pub fn run_table(state: &RunState) -> String {
    let headers = ["Phase", "Added", "Batch", "Progress", "ETA", "Elapsed"];
    let rows = vec![vec![
        state.phase.to_string(),
        format!("{}/{}", state.session_added, state.target),
        state.batch_size.to_string(),
        format!("{}/{}", state.progress.done, state.progress.total),
        format_eta(state.progress.eta_ms),
        format_elapsed(state),
    ]];

    format_table(&headers, &rows)
}

#[derive(Default)]
pub struct RunLogger {
    last_phase: Mutex<Option<Phase>>,
}

impl RunLogger {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Subscriber for RunLogger {
    fn on_state_changed(&self, snapshot: RunState) {
        let phase_changed = {
            let mut last = self
                .last_phase
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            let changed = *last != Some(snapshot.phase);
            *last = Some(snapshot.phase);
            changed
        };

        if phase_changed {
            info!("Sync run:\n{}", run_table(&snapshot));
        } else {
            debug!(
                "Sync progress {}/{} (eta {}), added {}/{}",
                snapshot.progress.done,
                snapshot.progress.total,
                format_eta(snapshot.progress.eta_ms),
                snapshot.session_added,
                snapshot.target
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::Progress;

    #[test]
    fn test_format_table_aligns_columns() {
        let table = format_table(
            &["A", "Long header"],
            &[vec!["wide value".to_string(), "x".to_string()]],
        );
        let lines: Vec<_> = table.lines().collect();

        assert_eq!(lines[0], "| A          | Long header |");
        assert_eq!(lines[1], "|------------|-------------|");
        assert_eq!(lines[2], "| wide value | x           |");
        assert!(format_table(&["A"], &[]).is_empty());
    }

    #[test]
    fn test_run_table() {
        let state = RunState {
            phase: Phase::Initial,
            session_added: 3,
            progress: Progress {
                done: 3,
                total: 15,
                eta_ms: 2400,
            },
            ..Default::default()
        };
        let table = run_table(&state);

        assert!(table.contains("| initial |"));
        assert!(table.contains("3/100"));
        assert!(table.contains("3/15"));
        assert!(table.contains("2.4s"));
    }
}
