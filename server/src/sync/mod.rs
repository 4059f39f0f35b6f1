//! Background sync of classified inbox items into the local item cache.
//!
//! [`RunCoordinator`] owns the shared [`RunState`] and drives a run through
//! its initial and background phases. The merger and estimator are the pure
//! pieces it leans on, and subscribers observe every state change.

mod coordinator;
mod estimator;
pub mod merger;
mod run_state;
mod subscribers;

pub use coordinator::{BackgroundRun, CoordinatorSettings, RunCoordinator, StartOutcome};
pub use estimator::ProgressEstimator;
pub use run_state::{Phase, Progress, RunState};
pub use subscribers::{Subscriber, Subscription};
