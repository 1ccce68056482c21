//! Test helper modules for CueForge engine integration tests
//!
//! - TestShow: scheduler wired to an in-memory source and the software clock
//! - RecordingPresenter: video presenter that records every request
//! - audio_generator: WAV fixtures written with hound

#![allow(dead_code)]

pub mod audio_generator;
pub mod test_show;

pub use audio_generator::{generate_constant_wav, generate_sine_wav};
pub use test_show::{audio_cue, drain, group_cue, wait_cue, RecordingPresenter, TestShow};
