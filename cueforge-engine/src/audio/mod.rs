//! Audio path
//!
//! Sample loading, the lock-free render graph, and the output sinks that
//! drive it.

pub mod renderer;
pub mod sink;
pub mod source;

pub use renderer::{AudioRenderer, PatchTap, RenderGraph, RenderStats, Voice, VoiceParams};
#[cfg(feature = "cpal-output")]
pub use sink::CpalSink;
pub use sink::{AudioOutputSink, ClockedSink, DeviceInfo};
pub use source::{MemorySource, SampleArena, SampleBuffer, SampleSource, SymphoniaSource};
