//! # CueForge Engine Library
//!
//! Show-control playback: cues fire in sequence from a single GO while the
//! operator pauses, stops or re-targets any of them independently.
//!
//! **Architecture:** every cue feeds its own matrix router; the matrix outputs
//! feed an output patch that maps logical cue outputs onto device channels.
//! The render callback reads lock-free snapshots published by the control
//! side and never waits on it.
//!
//! - [`routing`]: matrix router and output patch
//! - [`fade`]: fade automation on a fixed tick
//! - [`audio`]: sample sources, render graph, output sinks
//! - [`engine`]: per-cue playback over the audio path
//! - [`playback`]: cue list scheduler and transport
//! - [`command`]: JSON command processor

pub mod audio;
pub mod command;
pub mod config;
pub mod engine;
pub mod error;
pub mod fade;
pub mod playback;
pub mod routing;
pub mod video;

pub use command::CommandProcessor;
pub use config::EngineConfig;
pub use engine::{AudioEngine, PlayOptions};
pub use error::{Error, Result};
pub use playback::{CueScheduler, GoOutcome};
