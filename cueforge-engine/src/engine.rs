//! Audio engine
//!
//! Owns every loaded cue's matrix router, the output patches and the render
//! graph. Control-side edits compile a new route table and swap it into the
//! graph; the output callback never waits on this side.
//!
//! Cue lifecycle as seen by the engine:
//! - [`AudioEngine::load_cue`] decodes on the blocking pool, sizes the cue
//!   matrix to the source channel count and applies default routing
//! - [`AudioEngine::play_cue`] adds a voice to the graph
//! - [`AudioEngine::stop_cue`] fades the voice out and retires it

use crate::audio::renderer::{AudioRenderer, PatchTap, RenderGraph, Voice, VoiceParams};
use crate::audio::sink::{AudioOutputSink, DeviceInfo};
use crate::audio::source::{SampleArena, SampleSource};
use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::fade::{AtomicGain, FadeEngine, FadeId, FieldTarget, GainTarget};
use crate::routing::matrix::SILENCE_DB;
use crate::routing::patch::{MAX_DEVICE_OUTPUTS, MIN_DEVICE_OUTPUTS};
use crate::routing::{MatrixRouter, OutputPatch, PatchId, PatchManager, SharedRoutes};
use cueforge_common::routing::{MatrixState, PatchRecord};
use cueforge_common::{Cue, FadeCurve, MediaParams};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Upper bound for cue and master volume (linear)
pub const MAX_VOLUME: f32 = 4.0;

/// Parameters of one `play` request
#[derive(Debug, Clone, PartialEq)]
pub struct PlayOptions {
    pub start_time: Duration,
    pub end_time: Option<Duration>,
    pub fade_in: Duration,
    /// Linear gain, 0.0..=4.0
    pub volume: f32,
    pub rate: f32,
    pub looping: bool,
    /// Patch to play through (None = default patch)
    pub patch_id: Option<PatchId>,
}

impl Default for PlayOptions {
    fn default() -> Self {
        Self {
            start_time: Duration::ZERO,
            end_time: None,
            fade_in: Duration::ZERO,
            volume: 1.0,
            rate: 1.0,
            looping: false,
            patch_id: None,
        }
    }
}

impl PlayOptions {
    pub fn from_media(media: &MediaParams) -> Self {
        Self {
            start_time: Duration::from_millis(media.start_time_ms),
            end_time: media.end_time_ms.map(Duration::from_millis),
            fade_in: Duration::from_millis(media.fade_in_ms),
            volume: media.volume,
            rate: media.rate,
            looping: media.loop_playback,
            patch_id: media.patch_id,
        }
    }
}

/// Material description returned by a successful load
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadedCue {
    pub channels: usize,
    pub sample_rate: u32,
    pub duration_seconds: f64,
}

/// Handle on a started voice
#[derive(Clone)]
pub struct PlaybackHandle {
    voice: Arc<Voice>,
}

impl PlaybackHandle {
    pub fn cue_id(&self) -> Uuid {
        self.voice.cue_id()
    }

    pub fn is_finished(&self) -> bool {
        self.voice.is_finished()
    }

    pub fn position_seconds(&self) -> f64 {
        self.voice.position_seconds()
    }

    /// Resolve when playback reaches its end or is stopped
    pub async fn finished(&self) {
        self.voice.wait_finished().await
    }
}

/// Snapshot reported by `getStatus`
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineStatus {
    pub is_running: bool,
    pub sample_rate: u32,
    pub buffer_size: usize,
    pub cpu_usage: f32,
    pub dropout_count: u64,
    pub current_device: Option<String>,
    pub active_voices: usize,
    pub loaded_cues: usize,
    pub cache_bytes: usize,
    pub master_volume: f32,
}

struct CueSlot {
    path: PathBuf,
    matrix: MatrixRouter,
    routes: SharedRoutes,
    volume: Arc<AtomicGain>,
    voice: Option<Arc<Voice>>,
    /// A stop (possibly fading) is in progress
    stopping: bool,
}

struct EngineState {
    cues: HashMap<Uuid, CueSlot>,
    arena: SampleArena,
    patches: PatchManager,
    taps: HashMap<PatchId, Arc<PatchTap>>,
    device: Option<DeviceInfo>,
}

impl EngineState {
    /// Publish the patch's current table, creating its tap on first use
    fn publish_patch(&mut self, id: PatchId) {
        let Some(patch) = self.patches.get(id) else {
            return;
        };
        let table = patch.compile();
        match self.taps.get(&id) {
            Some(tap) => tap.routes.publish(table),
            None => {
                let tap = PatchTap::new(id, patch.cue_outputs(), table);
                self.taps.insert(id, Arc::new(tap));
            }
        }
    }

    fn publish_all_patches(&mut self) {
        let ids: Vec<PatchId> = self.patches.patches().iter().map(OutputPatch::id).collect();
        self.taps.retain(|id, _| ids.contains(id));
        for id in ids {
            self.publish_patch(id);
        }
    }

    fn default_tap(&self) -> Option<Arc<PatchTap>> {
        self.taps.get(&self.patches.default_id()).cloned()
    }
}

/// Bind patches to `device`
///
/// Unbound patches, patches already on `device` and patches on `previous`
/// follow it. A changed output count resets a patch to direct routing.
fn follow_device(state: &mut EngineState, device: &DeviceInfo, previous: Option<&str>) {
    let outputs = device.output_channels.clamp(MIN_DEVICE_OUTPUTS, MAX_DEVICE_OUTPUTS);
    let bound: Vec<PatchId> = state
        .patches
        .patches()
        .iter()
        .filter(|p| match p.device_id() {
            None => true,
            Some(id) => id == device.id || Some(id) == previous,
        })
        .map(OutputPatch::id)
        .collect();
    for id in bound {
        if let Some(patch) = state.patches.get_mut(id) {
            let rebind = patch.device_id() != Some(device.id.as_str());
            if patch.device_outputs() != outputs {
                patch.set_audio_device(device);
                patch.set_direct_routing();
            } else if rebind {
                let matrix = patch.matrix().clone();
                patch.set_audio_device(device);
                *patch.matrix_mut() = matrix;
            }
        }
    }
    state.publish_all_patches();
}

/// Default cue routing: mono to outputs 0 and 1, otherwise one-to-one
pub fn default_cue_matrix(channels: usize, cue_outputs: usize) -> Result<MatrixRouter> {
    let mut matrix = MatrixRouter::identity(channels, cue_outputs, 0.0);
    if channels == 1 && cue_outputs > 1 {
        matrix.set_crosspoint(0, 1, Some(0.0))?;
    }
    Ok(matrix)
}

/// Playback and routing core shared by the scheduler and command surface
pub struct AudioEngine {
    source: Arc<dyn SampleSource>,
    sink: Arc<dyn AudioOutputSink>,
    fades: Arc<FadeEngine>,
    graph: Arc<RenderGraph>,
    state: Mutex<EngineState>,
    /// Device requested by configuration
    preferred_device: Option<String>,
}

impl AudioEngine {
    pub fn new(
        config: &EngineConfig,
        source: Arc<dyn SampleSource>,
        sink: Arc<dyn AudioOutputSink>,
        fades: Arc<FadeEngine>,
    ) -> Arc<Self> {
        let preferred_device = config.audio.device.clone();
        let device_outputs = sink
            .list_devices()
            .ok()
            .and_then(|devices| {
                devices
                    .into_iter()
                    .find(|d| preferred_device.as_deref().map_or(true, |id| d.id == id))
            })
            .map_or(config.audio.clocked_output_channels, |d| d.output_channels);

        let mut state = EngineState {
            cues: HashMap::new(),
            arena: SampleArena::new(config.sample_budget_bytes()),
            patches: PatchManager::new(config.audio.cue_outputs, device_outputs),
            taps: HashMap::new(),
            device: None,
        };
        state.publish_all_patches();

        info!(
            "Audio engine created ({} cue outputs, {} device outputs)",
            config.audio.cue_outputs, device_outputs
        );

        Arc::new(Self {
            source,
            sink,
            fades,
            graph: RenderGraph::new(),
            state: Mutex::new(state),
            preferred_device,
        })
    }

    pub fn graph(&self) -> &Arc<RenderGraph> {
        &self.graph
    }

    pub fn fades(&self) -> &Arc<FadeEngine> {
        &self.fades
    }

    // ---- device ----

    pub fn list_devices(&self) -> Result<Vec<DeviceInfo>> {
        self.sink.list_devices()
    }

    /// Open the output device and start rendering
    ///
    /// Patches bound to no device (or to this one) follow the device's
    /// output count; a count change resets them to direct routing.
    pub fn start(&self, device_id: Option<&str>) -> Result<DeviceInfo> {
        let requested = device_id.or(self.preferred_device.as_deref());
        let device = self
            .sink
            .start(requested, AudioRenderer::new(Arc::clone(&self.graph)))?;
        let mut state = self.state.lock();
        follow_device(&mut state, &device, None);
        state.device = Some(device.clone());
        Ok(device)
    }

    /// Move output to another device
    ///
    /// Patches that followed the previous device move with it. An unknown
    /// device leaves the current one running.
    pub fn set_audio_device(&self, device_id: &str) -> Result<DeviceInfo> {
        let current = self.state.lock().device.clone();
        if let Some(current) = &current {
            if current.id == device_id && self.sink.is_running() {
                return Ok(current.clone());
            }
        }
        let previous = current.map(|d| d.id);

        let device = self
            .sink
            .start(Some(device_id), AudioRenderer::new(Arc::clone(&self.graph)))?;
        let mut state = self.state.lock();
        follow_device(&mut state, &device, previous.as_deref());
        state.device = Some(device.clone());
        info!(
            "Audio device set to '{}' ({} outputs)",
            device.name, device.output_channels
        );
        Ok(device)
    }

    /// Stop the output device and every voice
    pub fn shutdown(&self) {
        self.stop_all();
        self.sink.stop();
        self.state.lock().device = None;
        info!("Audio engine stopped");
    }

    pub fn status(&self) -> EngineStatus {
        let state = self.state.lock();
        let stats = self.graph.stats();
        EngineStatus {
            is_running: self.sink.is_running(),
            sample_rate: self.sink.sample_rate(),
            buffer_size: self.sink.buffer_size(),
            cpu_usage: stats.load(),
            dropout_count: stats.overruns(),
            current_device: state.device.as_ref().map(|d| d.name.clone()),
            active_voices: self.graph.voices().len(),
            loaded_cues: state.arena.len(),
            cache_bytes: state.arena.used_bytes(),
            master_volume: self.graph.master_volume(),
        }
    }

    // ---- material ----

    /// Decode `media.file_path` and prepare the cue's matrix
    ///
    /// Saved routing in `media.routing` is restored when it matches the
    /// source channel count; otherwise default routing applies.
    pub async fn load_cue(&self, cue_id: Uuid, media: &MediaParams) -> Result<LoadedCue> {
        if self.is_playing(cue_id) {
            return Err(Error::AlreadyPlaying(cue_id));
        }

        let source = Arc::clone(&self.source);
        let path = media.file_path.clone();
        let buffer = tokio::task::spawn_blocking(move || source.load(&path))
            .await
            .map_err(|e| Error::load_failed(&media.file_path, e))??;

        let loaded = LoadedCue {
            channels: buffer.channel_count(),
            sample_rate: buffer.sample_rate(),
            duration_seconds: buffer.duration_seconds(),
        };

        let mut state = self.state.lock();
        let cue_outputs = state.patches.cue_outputs();
        // material evicted from the arena comes back with its live routing
        let kept = state
            .cues
            .remove(&cue_id)
            .filter(|slot| slot.path == media.file_path && slot.matrix.num_inputs() == loaded.channels)
            .map(|slot| slot.matrix);
        let matrix = match kept {
            Some(matrix) => matrix,
            None => Self::initial_matrix(cue_id, media, loaded.channels, cue_outputs)?,
        };

        state.arena.insert(cue_id, buffer);
        let routes = SharedRoutes::new(matrix.compile());
        state.cues.insert(
            cue_id,
            CueSlot {
                path: media.file_path.clone(),
                matrix,
                routes,
                volume: Arc::new(AtomicGain::new(media.volume)),
                voice: None,
                stopping: false,
            },
        );

        info!(
            "Loaded cue {} from {} ({} ch, {} Hz, {:.2}s)",
            cue_id,
            media.file_path.display(),
            loaded.channels,
            loaded.sample_rate,
            loaded.duration_seconds
        );
        Ok(loaded)
    }

    /// Saved routing when it fits the source, else the default layout
    fn initial_matrix(
        cue_id: Uuid,
        media: &MediaParams,
        channels: usize,
        cue_outputs: usize,
    ) -> Result<MatrixRouter> {
        match media.routing.as_ref().filter(|r| r.num_inputs == channels) {
            Some(saved) => match MatrixRouter::from_state(saved) {
                Ok(mut matrix) => {
                    matrix.resize(channels, cue_outputs);
                    Ok(matrix)
                }
                Err(e) => {
                    warn!("Ignoring saved routing for cue {}: {}", cue_id, e);
                    default_cue_matrix(channels, cue_outputs)
                }
            },
            None => default_cue_matrix(channels, cue_outputs),
        }
    }

    /// Material is decoded and held
    pub fn is_loaded(&self, cue_id: Uuid) -> bool {
        let state = self.state.lock();
        state.cues.contains_key(&cue_id) && state.arena.contains(cue_id)
    }

    /// Path the cue was loaded from
    pub fn loaded_path(&self, cue_id: Uuid) -> Option<PathBuf> {
        self.state.lock().cues.get(&cue_id).map(|slot| slot.path.clone())
    }

    /// `path` is decoded for the cue and still held by the arena
    pub fn has_material(&self, cue_id: Uuid, path: &Path) -> bool {
        let state = self.state.lock();
        state.arena.contains(cue_id) && state.cues.get(&cue_id).is_some_and(|slot| slot.path.as_path() == path)
    }

    /// Stop the cue and release its material
    pub fn unload_cue(&self, cue_id: Uuid) -> bool {
        self.stop_now(cue_id);
        let mut state = self.state.lock();
        state.arena.release(cue_id);
        let removed = state.cues.remove(&cue_id).is_some();
        if removed {
            debug!("Unloaded cue {}", cue_id);
        }
        removed
    }

    // ---- transport ----

    /// Start a voice for a loaded cue
    pub fn play_cue(self: &Arc<Self>, cue_id: Uuid, options: PlayOptions) -> Result<PlaybackHandle> {
        if options.rate.is_nan() || options.rate <= 0.0 {
            return Err(Error::InvalidState(format!("Playback rate must be positive, got {}", options.rate)));
        }
        let volume = options.volume.clamp(0.0, MAX_VOLUME);

        self.fades.cancel_fades_for_target(cue_id);
        let voice = {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            if let Some(slot) = state.cues.get(&cue_id) {
                match &slot.voice {
                    // a voice still fading out is replaced
                    Some(voice) if !voice.is_finished() && slot.stopping => voice.finish(),
                    Some(voice) if !voice.is_finished() => return Err(Error::AlreadyPlaying(cue_id)),
                    _ => {}
                }
            }
            let buffer = state.arena.get(cue_id).ok_or(Error::NotLoaded(cue_id))?;
            let patch_id = state.patches.resolve(options.patch_id).id();
            let tap = state
                .taps
                .get(&patch_id)
                .cloned()
                .ok_or(Error::PatchNotFound(patch_id))?;
            let slot = state.cues.get_mut(&cue_id).ok_or(Error::NotLoaded(cue_id))?;

            let source_rate = f64::from(buffer.sample_rate());
            let start_frame = (options.start_time.as_secs_f64() * source_rate) as usize;
            let end_frame = options
                .end_time
                .map_or(buffer.frames(), |end| (end.as_secs_f64() * source_rate) as usize);
            let step = f64::from(options.rate) * source_rate / f64::from(self.sink.sample_rate().max(1));

            slot.volume = Arc::new(AtomicGain::new(if options.fade_in.is_zero() { volume } else { 0.0 }));
            slot.routes.publish(slot.matrix.compile());
            slot.stopping = false;

            let voice = Voice::new(
                cue_id,
                buffer,
                slot.routes.clone(),
                tap,
                Arc::clone(&slot.volume),
                VoiceParams {
                    start_frame,
                    end_frame,
                    looping: options.looping,
                    step,
                },
            );
            slot.voice = Some(Arc::clone(&voice));
            voice
        };

        self.graph.add_voice(Arc::clone(&voice));
        if !options.fade_in.is_zero() {
            let target = GainTarget::new(cue_id, "volume", Arc::clone(voice.volume()));
            self.fades
                .create_fade(target, 0.0, volume, options.fade_in, FadeCurve::Linear, None);
        }

        let engine = Arc::downgrade(self);
        let watched = Arc::clone(&voice);
        tokio::spawn(async move {
            watched.wait_finished().await;
            if let Some(engine) = engine.upgrade() {
                engine.retire_voice(&watched);
            }
        });

        info!(
            "Playing cue {} (volume {:.2}, rate {:.2}, fade in {:?})",
            cue_id, volume, options.rate, options.fade_in
        );
        Ok(PlaybackHandle { voice })
    }

    fn retire_voice(&self, voice: &Arc<Voice>) {
        let cue_id = voice.cue_id();
        if self
            .graph
            .voice(cue_id)
            .is_some_and(|current| Arc::ptr_eq(&current, voice))
        {
            self.graph.remove_voice(cue_id);
        }

        let mut state = self.state.lock();
        if let Some(slot) = state.cues.get_mut(&cue_id) {
            if slot.voice.as_ref().is_some_and(|v| Arc::ptr_eq(v, voice)) {
                slot.voice = None;
                slot.stopping = false;
            }
        }
        debug!("Retired voice for cue {}", cue_id);
    }

    pub fn is_playing(&self, cue_id: Uuid) -> bool {
        self.state
            .lock()
            .cues
            .get(&cue_id)
            .and_then(|slot| slot.voice.as_ref())
            .is_some_and(|voice| !voice.is_finished())
    }

    /// Playback position of a sounding cue
    pub fn position_seconds(&self, cue_id: Uuid) -> Option<f64> {
        self.graph.voice(cue_id).map(|voice| voice.position_seconds())
    }

    /// Stop a cue, fading its volume to zero first
    ///
    /// Idempotent: stopping a silent cue, or one already fading out, does
    /// nothing.
    pub fn stop_cue(&self, cue_id: Uuid, fade_out: Duration) {
        let voice = {
            let mut state = self.state.lock();
            let Some(slot) = state.cues.get_mut(&cue_id) else {
                return;
            };
            let Some(voice) = slot.voice.clone() else {
                return;
            };
            if voice.is_finished() || slot.stopping {
                return;
            }
            slot.stopping = true;
            voice
        };

        self.fades.cancel_fades_for_target(cue_id);
        if fade_out.is_zero() || voice.is_paused() {
            voice.finish();
            self.retire_voice(&voice);
            debug!("Stopped cue {}", cue_id);
        } else {
            let target = GainTarget::new(cue_id, "volume", Arc::clone(voice.volume()));
            let done = Arc::clone(&voice);
            self.fades.fade_to(
                target,
                0.0,
                fade_out,
                FadeCurve::Linear,
                Some(Box::new(move || done.finish())),
            );
            debug!("Fading out cue {} over {:?}", cue_id, fade_out);
        }
    }

    /// Stop a cue without fading
    pub fn stop_now(&self, cue_id: Uuid) {
        if let Some(voice) = self.graph.remove_voice(cue_id) {
            self.fades.cancel_fades_for_target(cue_id);
            voice.finish();
        }
        if let Some(slot) = self.state.lock().cues.get_mut(&cue_id) {
            if let Some(voice) = slot.voice.take() {
                voice.finish();
            }
            slot.stopping = false;
        }
    }

    /// Silence every voice immediately
    pub fn stop_all(&self) -> usize {
        let voices = self.graph.clear();
        for voice in &voices {
            self.fades.cancel_fades_for_target(voice.cue_id());
            voice.finish();
        }
        let mut state = self.state.lock();
        for slot in state.cues.values_mut() {
            slot.voice = None;
            slot.stopping = false;
        }
        if !voices.is_empty() {
            info!("Stopped {} voices", voices.len());
        }
        voices.len()
    }

    pub fn pause_cue(&self, cue_id: Uuid) -> bool {
        match self.graph.voice(cue_id) {
            Some(voice) if !voice.is_paused() => {
                voice.set_paused(true);
                true
            }
            _ => false,
        }
    }

    pub fn resume_cue(&self, cue_id: Uuid) -> bool {
        match self.graph.voice(cue_id) {
            Some(voice) if voice.is_paused() => {
                voice.set_paused(false);
                true
            }
            _ => false,
        }
    }

    /// Change the playback rate of a sounding cue
    ///
    /// Returns false when the cue has no voice.
    pub fn set_cue_rate(&self, cue_id: Uuid, rate: f32) -> Result<bool> {
        if rate.is_nan() || rate <= 0.0 {
            return Err(Error::InvalidState(format!("Playback rate must be positive, got {}", rate)));
        }
        let Some(voice) = self.graph.voice(cue_id) else {
            return Ok(false);
        };
        let source_rate = f64::from(voice.buffer().sample_rate());
        voice.set_step(f64::from(rate) * source_rate / f64::from(self.sink.sample_rate().max(1)));
        debug!("Cue {} rate set to {}", cue_id, rate);
        Ok(true)
    }

    /// Turn looping on or off for a sounding cue
    pub fn set_cue_looping(&self, cue_id: Uuid, looping: bool) -> bool {
        match self.graph.voice(cue_id) {
            Some(voice) => {
                voice.set_looping(looping);
                true
            }
            None => false,
        }
    }

    /// Fade a cue's volume from its current value
    pub fn fade_volume(&self, cue_id: Uuid, target: f32, duration: Duration, curve: FadeCurve) -> Result<FadeId> {
        let volume = {
            let state = self.state.lock();
            let slot = state.cues.get(&cue_id).ok_or(Error::NotLoaded(cue_id))?;
            Arc::clone(&slot.volume)
        };
        let target_gain = target.clamp(0.0, MAX_VOLUME);
        Ok(self.fades.fade_to(
            GainTarget::new(cue_id, "volume", volume),
            target_gain,
            duration,
            curve,
            None,
        ))
    }

    pub fn master_volume(&self) -> f32 {
        self.graph.master_volume()
    }

    /// Set the master volume, returning the applied (clamped) value
    pub fn set_master_volume(&self, volume: f32) -> Result<f32> {
        if !volume.is_finite() {
            return Err(Error::InvalidState(format!("Invalid master volume {}", volume)));
        }
        let volume = volume.clamp(0.0, MAX_VOLUME);
        self.graph.set_master_volume(volume);
        debug!("Master volume {:.3}", volume);
        Ok(volume)
    }

    // ---- cue routing ----

    /// Edit a cue's matrix and republish its live table
    pub fn edit_cue_matrix<T>(&self, cue_id: Uuid, edit: impl FnOnce(&mut MatrixRouter) -> Result<T>) -> Result<T> {
        let mut state = self.state.lock();
        let slot = state.cues.get_mut(&cue_id).ok_or(Error::NotLoaded(cue_id))?;
        let result = edit(&mut slot.matrix)?;
        slot.routes.publish(slot.matrix.compile());
        Ok(result)
    }

    fn read_cue_matrix<T>(&self, cue_id: Uuid, read: impl FnOnce(&MatrixRouter) -> Result<T>) -> Result<T> {
        let state = self.state.lock();
        let slot = state.cues.get(&cue_id).ok_or(Error::NotLoaded(cue_id))?;
        read(&slot.matrix)
    }

    pub fn set_crosspoint(&self, cue_id: Uuid, input: usize, output: usize, level_db: Option<f32>) -> Result<()> {
        self.edit_cue_matrix(cue_id, |m| m.set_crosspoint(input, output, level_db))
    }

    pub fn crosspoint(&self, cue_id: Uuid, input: usize, output: usize) -> Result<Option<f32>> {
        self.read_cue_matrix(cue_id, |m| m.crosspoint(input, output))
    }

    pub fn set_input_level(&self, cue_id: Uuid, input: usize, level_db: f32) -> Result<()> {
        self.edit_cue_matrix(cue_id, |m| m.set_input_level(input, level_db))
    }

    pub fn set_output_level(&self, cue_id: Uuid, output: usize, level_db: f32) -> Result<()> {
        self.edit_cue_matrix(cue_id, |m| m.set_output_level(output, level_db))
    }

    pub fn calculate_gain(&self, cue_id: Uuid, input: usize, output: usize) -> Result<f32> {
        self.read_cue_matrix(cue_id, |m| Ok(m.calculate_gain(input, output)))
    }

    /// Persistable copy of a cue's routing
    pub fn cue_routing(&self, cue_id: Uuid) -> Option<MatrixState> {
        self.state.lock().cues.get(&cue_id).map(|slot| slot.matrix.to_state())
    }

    /// Fade one crosspoint to `target_db`
    ///
    /// A missing crosspoint starts from silence. Ganged crosspoints follow.
    pub fn fade_crosspoint(
        self: &Arc<Self>,
        cue_id: Uuid,
        input: usize,
        output: usize,
        target_db: f32,
        duration: Duration,
        curve: FadeCurve,
    ) -> Result<FadeId> {
        let current = self.crosspoint(cue_id, input, output)?.unwrap_or(SILENCE_DB);

        let reader = Arc::downgrade(self);
        let writer = Arc::downgrade(self);
        let target = FieldTarget::new(
            cue_id,
            format!("crosspoint {}→{}", input, output),
            move || {
                reader
                    .upgrade()
                    .and_then(|engine| engine.crosspoint(cue_id, input, output).ok().flatten())
                    .unwrap_or(SILENCE_DB)
            },
            move |level_db| {
                if let Some(engine) = writer.upgrade() {
                    if let Err(e) = engine.set_crosspoint(cue_id, input, output, Some(level_db)) {
                        debug!("Crosspoint fade on cue {} dropped: {}", cue_id, e);
                    }
                }
            },
        );

        Ok(self.fades.create_fade(target, current, target_db, duration, curve, None))
    }

    // ---- output patches ----

    pub fn default_patch_id(&self) -> PatchId {
        self.state.lock().patches.default_id()
    }

    pub fn create_patch(&self, name: impl Into<String>) -> PatchId {
        let mut state = self.state.lock();
        let id = state.patches.create_patch(name);
        state.publish_patch(id);
        id
    }

    /// Delete a patch; cues and voices using it move to the default patch
    pub fn delete_patch(&self, id: PatchId, cues: &mut [Cue]) -> Result<usize> {
        let mut state = self.state.lock();
        let reassigned = state.patches.delete_patch(id, cues)?;
        state.taps.remove(&id);
        if let Some(default_tap) = state.default_tap() {
            for voice in self.graph.voices().iter().filter(|v| v.patch_id() == id) {
                voice.set_patch(Arc::clone(&default_tap));
            }
        }
        Ok(reassigned)
    }

    pub fn set_default_patch(&self, id: PatchId) -> Result<()> {
        self.state.lock().patches.set_default(id)
    }

    /// Edit a patch (None = default) and republish its live table
    pub fn edit_patch<T>(&self, id: Option<PatchId>, edit: impl FnOnce(&mut OutputPatch) -> Result<T>) -> Result<T> {
        let mut state = self.state.lock();
        let id = id.unwrap_or_else(|| state.patches.default_id());
        let patch = state.patches.get_mut(id).ok_or(Error::PatchNotFound(id))?;
        let result = edit(patch)?;
        state.publish_patch(id);
        Ok(result)
    }

    pub fn set_patch_routing(
        &self,
        id: Option<PatchId>,
        cue_output: usize,
        device_output: usize,
        level_db: Option<f32>,
    ) -> Result<()> {
        self.edit_patch(id, |p| p.set_patch_routing(cue_output, device_output, level_db))
    }

    pub fn patch_routing(&self, id: Option<PatchId>, cue_output: usize, device_output: usize) -> Result<Option<f32>> {
        let state = self.state.lock();
        let id = id.unwrap_or_else(|| state.patches.default_id());
        let patch = state.patches.get(id).ok_or(Error::PatchNotFound(id))?;
        patch.patch_routing(cue_output, device_output)
    }

    /// Move a sounding cue to another patch between callbacks
    pub fn set_cue_patch(&self, cue_id: Uuid, id: Option<PatchId>) -> Result<()> {
        let state = self.state.lock();
        let id = match id {
            Some(id) => id,
            None => state.patches.default_id(),
        };
        let tap = state.taps.get(&id).cloned().ok_or(Error::PatchNotFound(id))?;
        drop(state);
        if let Some(voice) = self.graph.voice(cue_id) {
            voice.set_patch(tap);
        }
        Ok(())
    }

    pub fn patch_records(&self) -> Vec<PatchRecord> {
        self.state.lock().patches.to_records()
    }

    /// Replace the patch set from a show document
    pub fn load_patches(&self, records: &[PatchRecord]) -> Result<()> {
        let mut state = self.state.lock();
        state.patches.load_records(records)?;
        state.publish_all_patches();

        let default_tap = state.default_tap();
        for voice in self.graph.voices().iter() {
            if state.taps.contains_key(&voice.patch_id()) {
                continue;
            }
            if let Some(tap) = &default_tap {
                voice.set_patch(Arc::clone(tap));
            }
        }
        info!("Loaded {} output patches", state.patches.patches().len());
        Ok(())
    }
}
