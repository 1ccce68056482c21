//! Render graph and the per-callback mixer
//!
//! The control side owns an `Arc<RenderGraph>` and mutates it only by
//! swapping snapshots: the voice list, each voice's compiled cue routes and
//! its patch tap. [`AudioRenderer::process`] runs on the output callback,
//! loads those snapshots once per buffer and never blocks on the control
//! side.
//!
//! Per frame, each voice:
//! 1. reads its source frame (linear interpolation at fractional positions)
//! 2. sums through its cue matrix into the patch's cue-output busses, scaled
//!    by the voice volume
//! 3. maps the busses onto device outputs through the patch table, scaled by
//!    the master volume

use crate::audio::source::SampleBuffer;
use crate::fade::AtomicGain;
use crate::routing::{PatchId, RouteTable, SharedRoutes};
use arc_swap::ArcSwap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use uuid::Uuid;

/// A patch as seen by the renderer
#[derive(Debug, Clone)]
pub struct PatchTap {
    pub patch_id: PatchId,
    pub cue_outputs: usize,
    pub routes: SharedRoutes,
}

impl PatchTap {
    pub fn new(patch_id: PatchId, cue_outputs: usize, table: RouteTable) -> Self {
        Self {
            patch_id,
            cue_outputs,
            routes: SharedRoutes::new(table),
        }
    }
}

/// Playback parameters fixed when a voice starts
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VoiceParams {
    /// First frame played (and loop start)
    pub start_frame: usize,
    /// One past the last frame played (and loop end)
    pub end_frame: usize,
    pub looping: bool,
    /// Source frames advanced per output frame
    pub step: f64,
}

/// One playing cue's audio
pub struct Voice {
    cue_id: Uuid,
    buffer: Arc<SampleBuffer>,
    routes: SharedRoutes,
    patch: ArcSwap<PatchTap>,
    volume: Arc<AtomicGain>,
    position: AtomicU64,
    step: AtomicU64,
    start_frame: usize,
    end_frame: usize,
    looping: AtomicBool,
    paused: AtomicBool,
    finished: AtomicBool,
    done: Notify,
}

impl Voice {
    pub fn new(
        cue_id: Uuid,
        buffer: Arc<SampleBuffer>,
        routes: SharedRoutes,
        patch: Arc<PatchTap>,
        volume: Arc<AtomicGain>,
        params: VoiceParams,
    ) -> Arc<Self> {
        let end_frame = params.end_frame.min(buffer.frames());
        let start_frame = params.start_frame.min(end_frame);
        Arc::new(Self {
            cue_id,
            buffer,
            routes,
            patch: ArcSwap::new(patch),
            volume,
            position: AtomicU64::new((start_frame as f64).to_bits()),
            step: AtomicU64::new(params.step.max(0.0).to_bits()),
            start_frame,
            end_frame,
            looping: AtomicBool::new(params.looping),
            paused: AtomicBool::new(false),
            finished: AtomicBool::new(start_frame >= end_frame),
            done: Notify::new(),
        })
    }

    pub fn cue_id(&self) -> Uuid {
        self.cue_id
    }

    pub fn buffer(&self) -> &Arc<SampleBuffer> {
        &self.buffer
    }

    pub fn routes(&self) -> &SharedRoutes {
        &self.routes
    }

    pub fn volume(&self) -> &Arc<AtomicGain> {
        &self.volume
    }

    pub fn patch_id(&self) -> PatchId {
        self.patch.load().patch_id
    }

    /// Move the voice to another patch between callbacks
    pub fn set_patch(&self, patch: Arc<PatchTap>) {
        self.patch.store(patch);
    }

    /// Current position in source frames
    pub fn position(&self) -> f64 {
        f64::from_bits(self.position.load(Ordering::Acquire))
    }

    pub fn position_seconds(&self) -> f64 {
        self.position() / f64::from(self.buffer.sample_rate())
    }

    pub fn set_step(&self, step: f64) {
        self.step.store(step.max(0.0).to_bits(), Ordering::Release);
    }

    pub fn set_looping(&self, looping: bool) {
        self.looping.store(looping, Ordering::Release);
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    pub fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::Release);
    }

    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    /// Mark finished and wake every waiter; idempotent
    pub fn finish(&self) {
        self.finished.store(true, Ordering::Release);
        self.done.notify_waiters();
    }

    /// Resolve once the voice reaches its end or is stopped
    pub async fn wait_finished(&self) {
        loop {
            let notified = self.done.notified();
            if self.is_finished() {
                return;
            }
            notified.await;
        }
    }

    /// Render into `out`, accumulating
    fn render(&self, out: &mut [f32], channels: usize, scratch: &mut Scratch, master: f32) {
        if self.is_paused() || self.is_finished() {
            return;
        }

        let routes = self.routes.load();
        let tap = self.patch.load();
        let patch_routes = tap.routes.load();
        if routes.is_silent() || patch_routes.is_silent() {
            // Still advance so timing holds while muted
            self.advance(out.len() / channels.max(1));
            return;
        }

        let source_channels = self.buffer.channel_count();
        scratch.prepare(source_channels, tap.cue_outputs);
        let volume = self.volume.load();
        let step = f64::from_bits(self.step.load(Ordering::Acquire));
        let looping = self.looping.load(Ordering::Acquire);
        let mut position = self.position();
        let mut reached_end = false;

        for frame_out in out.chunks_exact_mut(channels) {
            if position >= self.end_frame as f64 {
                if looping && self.end_frame > self.start_frame {
                    let span = (self.end_frame - self.start_frame) as f64;
                    position = self.start_frame as f64 + (position - self.end_frame as f64) % span;
                } else {
                    reached_end = true;
                    break;
                }
            }

            self.read_interpolated(position, &mut scratch.input);
            scratch.bus.iter_mut().for_each(|s| *s = 0.0);
            routes.mix_frame(&scratch.input, &mut scratch.bus, volume);
            patch_routes.mix_frame(&scratch.bus, frame_out, master);
            position += step;
        }

        if !reached_end && !looping && position >= self.end_frame as f64 {
            reached_end = true;
        }
        self.position.store(position.to_bits(), Ordering::Release);
        if reached_end {
            self.finish();
        }
    }

    fn advance(&self, frames: usize) {
        let step = f64::from_bits(self.step.load(Ordering::Acquire));
        let mut position = self.position() + step * frames as f64;
        if position >= self.end_frame as f64 {
            if self.looping.load(Ordering::Acquire) && self.end_frame > self.start_frame {
                let span = (self.end_frame - self.start_frame) as f64;
                position = self.start_frame as f64 + (position - self.end_frame as f64) % span;
            } else {
                self.position.store(position.to_bits(), Ordering::Release);
                self.finish();
                return;
            }
        }
        self.position.store(position.to_bits(), Ordering::Release);
    }

    fn read_interpolated(&self, position: f64, frame: &mut [f32]) {
        let index = position.floor() as usize;
        let frac = (position - index as f64) as f32;
        let current = self.buffer.frame(index);
        let next = if index + 1 < self.end_frame {
            self.buffer.frame(index + 1)
        } else {
            None
        };

        match (current, next) {
            (Some(a), Some(b)) if frac > 0.0 => {
                for ((out, a), b) in frame.iter_mut().zip(a).zip(b) {
                    *out = a + (b - a) * frac;
                }
            }
            (Some(a), _) => frame.copy_from_slice(a),
            (None, _) => frame.iter_mut().for_each(|s| *s = 0.0),
        }
    }
}

/// Reusable per-renderer buffers
#[derive(Default)]
struct Scratch {
    input: Vec<f32>,
    bus: Vec<f32>,
}

impl Scratch {
    fn prepare(&mut self, source_channels: usize, cue_outputs: usize) {
        self.input.resize(source_channels, 0.0);
        self.bus.resize(cue_outputs, 0.0);
    }
}

/// Callback counters published by the renderer and sinks
#[derive(Debug, Default)]
pub struct RenderStats {
    callbacks: AtomicU64,
    frames: AtomicU64,
    overruns: AtomicU64,
    load: AtomicGain,
}

impl RenderStats {
    pub fn callbacks(&self) -> u64 {
        self.callbacks.load(Ordering::Relaxed)
    }

    pub fn frames(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }

    /// Callbacks that took longer than their buffer period
    pub fn overruns(&self) -> u64 {
        self.overruns.load(Ordering::Relaxed)
    }

    /// Fraction of the last buffer period spent rendering
    pub fn load(&self) -> f32 {
        self.load.load()
    }

    /// Record one callback's processing time against its period
    pub fn record_timing(&self, busy: std::time::Duration, period: std::time::Duration) {
        if period.is_zero() {
            return;
        }
        let load = busy.as_secs_f32() / period.as_secs_f32();
        self.load.store(load);
        if load > 1.0 {
            self.overruns.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// State shared between the control side and the renderer
pub struct RenderGraph {
    voices: ArcSwap<Vec<Arc<Voice>>>,
    master: AtomicGain,
    stats: RenderStats,
}

impl Default for RenderGraph {
    fn default() -> Self {
        Self {
            voices: ArcSwap::from_pointee(Vec::new()),
            master: AtomicGain::new(1.0),
            stats: RenderStats::default(),
        }
    }
}

impl RenderGraph {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add_voice(&self, voice: Arc<Voice>) {
        self.voices.rcu(|voices| {
            let mut next = Vec::with_capacity(voices.len() + 1);
            next.extend(voices.iter().filter(|v| v.cue_id() != voice.cue_id()).cloned());
            next.push(Arc::clone(&voice));
            next
        });
    }

    /// Remove the voice for `cue_id`, returning it
    pub fn remove_voice(&self, cue_id: Uuid) -> Option<Arc<Voice>> {
        let mut removed = None;
        self.voices.rcu(|voices| {
            removed = voices.iter().find(|v| v.cue_id() == cue_id).cloned();
            voices
                .iter()
                .filter(|v| v.cue_id() != cue_id)
                .cloned()
                .collect::<Vec<_>>()
        });
        removed
    }

    pub fn voice(&self, cue_id: Uuid) -> Option<Arc<Voice>> {
        self.voices.load().iter().find(|v| v.cue_id() == cue_id).cloned()
    }

    pub fn voices(&self) -> Arc<Vec<Arc<Voice>>> {
        self.voices.load_full()
    }

    /// Remove every voice, returning them
    pub fn clear(&self) -> Vec<Arc<Voice>> {
        let previous = self.voices.swap(Arc::new(Vec::new()));
        previous.iter().cloned().collect()
    }

    pub fn master_volume(&self) -> f32 {
        self.master.load()
    }

    pub fn set_master_volume(&self, volume: f32) {
        self.master.store(volume.max(0.0));
    }

    pub fn stats(&self) -> &RenderStats {
        &self.stats
    }
}

/// Pulls frames from the render graph on the output callback
pub struct AudioRenderer {
    graph: Arc<RenderGraph>,
    scratch: Scratch,
}

impl AudioRenderer {
    pub fn new(graph: Arc<RenderGraph>) -> Self {
        Self {
            graph,
            scratch: Scratch::default(),
        }
    }

    pub fn graph(&self) -> &Arc<RenderGraph> {
        &self.graph
    }

    /// Fill an interleaved buffer of `channels` device outputs
    pub fn process(&mut self, out: &mut [f32], channels: usize) {
        out.iter_mut().for_each(|s| *s = 0.0);
        if channels == 0 {
            return;
        }

        let voices = self.graph.voices.load();
        let master = self.graph.master.load();
        for voice in voices.iter() {
            voice.render(out, channels, &mut self.scratch, master);
        }

        self.graph.stats.callbacks.fetch_add(1, Ordering::Relaxed);
        self.graph
            .stats
            .frames
            .fetch_add((out.len() / channels) as u64, Ordering::Relaxed);
    }
}
