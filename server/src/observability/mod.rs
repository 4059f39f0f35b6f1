//! Observability Module
//!
//! Logging views over sync run state.

mod run_log;

pub use run_log::{run_table, RunLogger};
