//! JSON command processor
//!
//! Line protocol for remote control surfaces:
//! `{"command": "setCrosspoint", "params": {...}}` answers
//! `{"success": true, "result": ...}` or `{"success": false, "error": "..."}`.
//! Levels are in dB; a `null` crosspoint or patch level clears the route.
//! Times (`startTime`, `fadeInTime`) are in seconds.

use crate::engine::{EngineStatus, PlayOptions};
use crate::error::{Error, Result};
use crate::playback::{CueScheduler, GoOutcome, SchedulerStatus};
use crate::routing::PatchId;
use cueforge_common::CueType;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
struct Envelope {
    command: String,
    #[serde(default)]
    params: Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CueRequest {
    cue_id: Uuid,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeviceRequest {
    #[serde(alias = "deviceName")]
    device_id: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateCueRequest {
    #[serde(rename = "type")]
    cue_type: Option<CueType>,
    file_path: Option<PathBuf>,
}

/// Load material for a cue, optionally pointing it at a new file first
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoadFileRequest {
    cue_id: Uuid,
    file_path: Option<PathBuf>,
}

/// Times in seconds; defaults come from the cue
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlayCueRequest {
    cue_id: Uuid,
    start_time: Option<f64>,
    fade_in_time: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RateRequest {
    cue_id: Uuid,
    rate: f32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoopRequest {
    cue_id: Uuid,
    #[serde(rename = "loop")]
    looping: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PatchRequest {
    patch_id: PatchId,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CrosspointRequest {
    cue_id: Uuid,
    input: usize,
    output: usize,
    /// dB; null clears the crosspoint
    level: Option<f32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CrosspointQuery {
    cue_id: Uuid,
    input: usize,
    output: usize,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InputLevelRequest {
    cue_id: Uuid,
    input: usize,
    level: f32,
}

/// Cue matrix output when `cue_id` is present, else a device output
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OutputLevelRequest {
    cue_id: Option<Uuid>,
    output: usize,
    level: f32,
    patch_id: Option<PatchId>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OutputFlagRequest {
    output: usize,
    #[serde(alias = "mute", alias = "solo")]
    enabled: bool,
    patch_id: Option<PatchId>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PatchRoutingRequest {
    cue_output: usize,
    device_output: usize,
    level: Option<f32>,
    patch_id: Option<PatchId>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PatchRoutingQuery {
    cue_output: usize,
    device_output: usize,
    patch_id: Option<PatchId>,
}

#[derive(Debug, Deserialize)]
struct VolumeRequest {
    volume: f32,
}

#[derive(Debug, Default, Deserialize)]
struct SaveRequest {
    path: Option<PathBuf>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusResponse {
    scheduler: SchedulerStatus,
    engine: EngineStatus,
}

// ============================================================================
// Processor
// ============================================================================

/// Executes control commands against a scheduler
#[derive(Clone)]
pub struct CommandProcessor {
    scheduler: CueScheduler,
}

impl CommandProcessor {
    pub fn new(scheduler: CueScheduler) -> Self {
        Self { scheduler }
    }

    /// Handle one JSON request line, always answering with a JSON response
    pub async fn process(&self, line: &str) -> String {
        let response = match serde_json::from_str::<Envelope>(line) {
            Ok(envelope) => match self.execute(&envelope.command, &envelope.params).await {
                Ok(result) => json!({ "success": true, "result": result }),
                Err(e) => {
                    warn!("Command '{}' failed: {}", envelope.command, e);
                    json!({ "success": false, "error": e.to_string() })
                }
            },
            Err(e) => json!({ "success": false, "error": format!("Malformed command: {}", e) }),
        };
        response.to_string()
    }

    /// Run a named command with its parameters
    pub async fn execute(&self, command: &str, params: &Value) -> Result<Value> {
        debug!("Command: {} {}", command, params);
        let scheduler = &self.scheduler;
        let audio = scheduler.audio();

        match command {
            // transport
            "go" => Ok(go_result(scheduler.go().await)),
            "stop" => {
                scheduler.stop().await;
                Ok(Value::Null)
            }
            "pause" => Ok(json!(scheduler.pause().await)),
            "resume" => Ok(json!(scheduler.resume().await)),
            "goTo" => {
                let request: CueRequest = parse(params)?;
                Ok(go_result(scheduler.go_to(request.cue_id).await?))
            }
            "stopCue" => {
                let request: CueRequest = parse(params)?;
                scheduler.stop_cue(request.cue_id).await?;
                Ok(Value::Null)
            }
            "pauseCue" => {
                let request: CueRequest = parse(params)?;
                Ok(json!(audio.pause_cue(request.cue_id)))
            }
            "resumeCue" => {
                let request: CueRequest = parse(params)?;
                Ok(json!(audio.resume_cue(request.cue_id)))
            }
            "stopAllCues" => Ok(json!(audio.stop_all())),
            "playCue" => {
                let request: PlayCueRequest = parse(params)?;
                self.play_cue(request).await?;
                Ok(Value::Null)
            }
            "setCueRate" => {
                let request: RateRequest = parse(params)?;
                let applied = audio.set_cue_rate(request.cue_id, request.rate)?;
                scheduler
                    .update_cue(request.cue_id, |cue| {
                        if let Some(media) = cue.params.media_mut() {
                            media.rate = request.rate;
                        }
                    })
                    .await?;
                Ok(json!(applied))
            }
            "setCueLoop" => {
                let request: LoopRequest = parse(params)?;
                scheduler
                    .update_cue(request.cue_id, |cue| {
                        if let Some(media) = cue.params.media_mut() {
                            media.loop_playback = request.looping;
                        }
                    })
                    .await?;
                Ok(json!(audio.set_cue_looping(request.cue_id, request.looping)))
            }

            // engine
            "initialize" => to_value(audio.start(None)?),
            "shutdown" => {
                scheduler.stop().await;
                audio.shutdown();
                Ok(Value::Null)
            }
            "setAudioDevice" => {
                let request: DeviceRequest = parse(params)?;
                to_value(audio.set_audio_device(&request.device_id)?)
            }

            // cue list
            "createCue" => {
                let request: CreateCueRequest = if params.is_null() {
                    CreateCueRequest::default()
                } else {
                    parse(params)?
                };
                let cue = scheduler.add_cue(request.cue_type.unwrap_or(CueType::Audio)).await;
                let cue = match request.file_path {
                    Some(path) => {
                        scheduler
                            .update_cue(cue.id, |cue| {
                                if let Some(media) = cue.params.media_mut() {
                                    media.file_path = path;
                                }
                            })
                            .await?
                    }
                    None => cue,
                };
                to_value(cue)
            }
            "loadFile" => {
                let request: LoadFileRequest = parse(params)?;
                if let Some(path) = request.file_path {
                    scheduler
                        .update_cue(request.cue_id, |cue| {
                            if let Some(media) = cue.params.media_mut() {
                                media.file_path = path;
                            }
                        })
                        .await?;
                }
                to_value(scheduler.prepare_cue(request.cue_id).await?)
            }

            // status
            "getStatus" => to_value(StatusResponse {
                scheduler: scheduler.status().await,
                engine: audio.status(),
            }),
            "getDevices" => to_value(audio.list_devices()?),

            // cue matrix
            "setCrosspoint" => {
                let request: CrosspointRequest = parse(params)?;
                audio.set_crosspoint(request.cue_id, request.input, request.output, request.level)?;
                Ok(Value::Null)
            }
            "getCrosspoint" => {
                let request: CrosspointQuery = parse(params)?;
                Ok(json!(audio.crosspoint(request.cue_id, request.input, request.output)?))
            }
            "setInputLevel" => {
                let request: InputLevelRequest = parse(params)?;
                audio.set_input_level(request.cue_id, request.input, request.level)?;
                Ok(Value::Null)
            }
            "setOutputLevel" => {
                let request: OutputLevelRequest = parse(params)?;
                match request.cue_id {
                    Some(cue_id) => audio.set_output_level(cue_id, request.output, request.level)?,
                    None => audio.edit_patch(request.patch_id, |patch| {
                        patch.set_device_output_level(request.output, request.level)
                    })?,
                }
                Ok(Value::Null)
            }

            // output patch
            "setPatchRouting" => {
                let request: PatchRoutingRequest = parse(params)?;
                audio.set_patch_routing(
                    request.patch_id,
                    request.cue_output,
                    request.device_output,
                    request.level,
                )?;
                Ok(Value::Null)
            }
            "getPatchRouting" => {
                let request: PatchRoutingQuery = parse(params)?;
                Ok(json!(audio.patch_routing(
                    request.patch_id,
                    request.cue_output,
                    request.device_output
                )?))
            }
            "muteOutput" => {
                let request: OutputFlagRequest = parse(params)?;
                audio.edit_patch(request.patch_id, |patch| {
                    patch.mute_device_output(request.output, request.enabled)
                })?;
                Ok(Value::Null)
            }
            "soloOutput" => {
                let request: OutputFlagRequest = parse(params)?;
                audio.edit_patch(request.patch_id, |patch| {
                    patch.matrix_mut().set_output_solo(request.output, request.enabled)
                })?;
                Ok(Value::Null)
            }

            "setDefaultPatch" => {
                let request: PatchRequest = parse(params)?;
                audio.set_default_patch(request.patch_id)?;
                Ok(Value::Null)
            }

            // show
            "setMasterVolume" => {
                let request: VolumeRequest = parse(params)?;
                Ok(json!(scheduler.set_master_volume(request.volume).await?))
            }
            "saveShow" => {
                let request: SaveRequest = if params.is_null() {
                    SaveRequest::default()
                } else {
                    parse(params)?
                };
                let path = scheduler.save_show(request.path.as_deref()).await?;
                Ok(json!(path.display().to_string()))
            }

            other => Err(Error::InvalidCommand(format!("Unknown command: {}", other))),
        }
    }
}

impl CommandProcessor {
    /// Start a cue's voice directly, loading its material on demand
    async fn play_cue(&self, request: PlayCueRequest) -> Result<()> {
        let scheduler = &self.scheduler;
        let cue = scheduler
            .cue(request.cue_id)
            .await
            .ok_or(Error::TargetNotFound(request.cue_id))?;
        let media = cue
            .params
            .media()
            .ok_or_else(|| Error::InvalidState(format!("Cue {} has no media", cue.number)))?;

        let mut options = PlayOptions::from_media(media);
        if let Some(start) = request.start_time {
            options.start_time = seconds(start)?;
        }
        if let Some(fade_in) = request.fade_in_time {
            options.fade_in = seconds(fade_in)?;
        }

        if !scheduler.audio().has_material(cue.id, &media.file_path) {
            scheduler.prepare_cue(cue.id).await?;
        }
        scheduler.audio().play_cue(cue.id, options)?;
        Ok(())
    }
}

fn seconds(value: f64) -> Result<Duration> {
    Duration::try_from_secs_f64(value)
        .map_err(|e| Error::InvalidCommand(format!("Bad time {}: {}", value, e)))
}

fn parse<T: DeserializeOwned>(params: &Value) -> Result<T> {
    T::deserialize(params).map_err(|e| Error::InvalidCommand(format!("Bad parameters: {}", e)))
}

fn to_value(value: impl Serialize) -> Result<Value> {
    Ok(serde_json::to_value(value)?)
}

fn go_result(outcome: GoOutcome) -> Value {
    match outcome {
        GoOutcome::Dispatched(id) => json!({ "dispatched": id }),
        GoOutcome::Debounced => json!({ "ignored": "debounced" }),
        GoOutcome::Resumed => json!({ "resumed": true }),
        GoOutcome::AlreadyExecuting(id) => json!({ "ignored": "alreadyExecuting", "cueId": id }),
        GoOutcome::NothingToGo => json!({ "ignored": "empty" }),
    }
}
