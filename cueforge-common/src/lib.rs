//! # CueForge Common Library
//!
//! Shared code for the CueForge show-control workspace including:
//! - Cue data model (cue kinds, status, type-specific parameters)
//! - Show document schema (load/save)
//! - Routing snapshots (matrix and patch state)
//! - Event types (ShowEvent enum) and EventBus
//! - Configuration file resolution
//! - Fade curve definitions and calculations

pub mod config;
pub mod cue;
pub mod error;
pub mod events;
pub mod fade_curves;
pub mod routing;
pub mod show;
pub mod time;

pub use cue::{Cue, CueId, CueParams, CueStatus, CueType, GroupMode, MediaParams};
pub use error::{Error, Result};
pub use fade_curves::FadeCurve;
pub use show::{ShowDocument, ShowSettings};
