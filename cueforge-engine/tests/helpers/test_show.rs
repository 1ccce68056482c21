//! Scheduler fixture
//!
//! Builds the full engine stack against a [`MemorySource`] and a running
//! [`ClockedSink`] so audio cues play in (paused) tokio time.

use cueforge_common::events::ShowEvent;
use cueforge_common::{Cue, CueId, CueParams, CueType, GroupMode};
use cueforge_engine::audio::{ClockedSink, MemorySource, SampleBuffer};
use cueforge_engine::fade::FadeEngine;
use cueforge_engine::video::{NullDisplay, VideoPresenter};
use cueforge_engine::{AudioEngine, CueScheduler, EngineConfig, Result};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

pub const TEST_SAMPLE_RATE: u32 = 48_000;
pub const TEST_BUFFER: usize = 480;

pub struct TestShow {
    pub scheduler: CueScheduler,
    pub audio: Arc<AudioEngine>,
    pub source: Arc<MemorySource>,
    pub sink: Arc<ClockedSink>,
    pub presenter: Arc<RecordingPresenter>,
    pub display: Arc<NullDisplay>,
    shutdown: CancellationToken,
}

impl TestShow {
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    /// Must be called inside a tokio runtime (the fade engine is spawned)
    pub fn with_config(config: EngineConfig) -> Self {
        Self::with_sink(config, ClockedSink::new(TEST_SAMPLE_RATE, TEST_BUFFER, 2))
    }

    pub fn with_sink(config: EngineConfig, sink: ClockedSink) -> Self {
        let source = Arc::new(MemorySource::new());
        let sink = Arc::new(sink);
        let shutdown = CancellationToken::new();
        let fades = FadeEngine::new(config.fade_tick_interval());
        fades.start(shutdown.child_token());

        let audio = AudioEngine::new(&config, source.clone(), sink.clone(), fades);
        let presenter = Arc::new(RecordingPresenter::default());
        let display = Arc::new(NullDisplay::new());
        let scheduler = CueScheduler::new(&config, Arc::clone(&audio), presenter.clone(), display.clone());

        Self {
            scheduler,
            audio,
            source,
            sink,
            presenter,
            display,
            shutdown,
        }
    }

    /// Start the software clock so voices advance
    pub fn start_audio(&self) {
        self.audio.start(None).expect("clock sink starts");
    }

    /// Register constant-valued material under `path`
    pub fn add_material(&self, path: &str, channels: usize, seconds: f64, value: f32) {
        let frames = (seconds * f64::from(TEST_SAMPLE_RATE)) as usize;
        let buffer = SampleBuffer::new(channels, TEST_SAMPLE_RATE, vec![value; channels * frames])
            .expect("valid buffer");
        self.source.insert(path, buffer);
    }

    pub async fn push(&self, cue: Cue) -> CueId {
        self.scheduler.push_cue(cue).await.expect("cue added")
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ShowEvent> {
        self.scheduler.subscribe()
    }
}

impl Drop for TestShow {
    fn drop(&mut self) {
        self.shutdown.cancel();
        self.audio.shutdown();
    }
}

pub fn audio_cue(number: &str, path: &str) -> Cue {
    let mut cue = Cue::new(CueType::Audio, number);
    if let Some(media) = cue.params.media_mut() {
        media.file_path = PathBuf::from(path);
    }
    cue
}

pub fn wait_cue(number: &str, duration_ms: u64) -> Cue {
    let mut cue = Cue::new(CueType::Wait, number);
    cue.params = CueParams::Wait { duration_ms };
    cue
}

pub fn group_cue(number: &str, children: Vec<CueId>, mode: GroupMode) -> Cue {
    let mut cue = Cue::new(CueType::Group, number);
    cue.params = CueParams::Group { children, mode };
    cue
}

/// Drain every event currently buffered
pub fn drain(events: &mut broadcast::Receiver<ShowEvent>) -> Vec<ShowEvent> {
    let mut drained = Vec::new();
    while let Ok(event) = events.try_recv() {
        drained.push(event);
    }
    drained
}

/// Presenter recording every call, with a configurable clip length
#[derive(Default)]
pub struct RecordingPresenter {
    pub calls: Mutex<Vec<String>>,
    pub clip_length: Mutex<Option<Duration>>,
}

impl RecordingPresenter {
    pub fn set_clip_length(&self, length: Option<Duration>) {
        *self.clip_length.lock() = length;
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    fn record(&self, call: String) {
        self.calls.lock().push(call);
    }
}

impl VideoPresenter for RecordingPresenter {
    fn play(&self, cue_id: CueId, path: &Path, _start_time: Duration) -> Result<Option<Duration>> {
        self.record(format!("play {} {}", cue_id, path.display()));
        Ok(*self.clip_length.lock())
    }

    fn pause(&self, cue_id: CueId) {
        self.record(format!("pause {}", cue_id));
    }

    fn resume(&self, cue_id: CueId) {
        self.record(format!("resume {}", cue_id));
    }

    fn stop(&self, cue_id: CueId) {
        self.record(format!("stop {}", cue_id));
    }

    fn stop_all(&self) {
        self.record("stop_all".to_string());
    }
}
