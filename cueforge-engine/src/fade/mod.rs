//! Fade automation
//!
//! - [`FadeEngine`]: fixed-rate interpolator driving [`Fadeable`] targets
//! - [`FadeSequence`]: chained steps on one target
//! - [`AtomicGain`]: lock-free gain cell shared with the renderer

pub mod engine;
pub mod sequence;
pub mod target;

pub use engine::{FadeCallback, FadeEngine, FadeId};
pub use sequence::{FadeSequence, FadeStep};
pub use target::{AtomicGain, Fadeable, FieldTarget, GainTarget, ValueTarget};
