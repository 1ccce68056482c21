//! Cue list playback
//!
//! [`CueScheduler`] owns the show and its transport; the executor half runs
//! dispatched cues as tasks.

mod executor;
mod scheduler;

pub use executor::CueOutcome;
pub use scheduler::{CueScheduler, GoOutcome, SchedulerStatus};
