//! Integration tests for the JSON command line protocol

mod helpers;

use cueforge_engine::audio::{ClockedSink, DeviceInfo};
use cueforge_engine::{CommandProcessor, EngineConfig};
use helpers::{audio_cue, wait_cue, TestShow};
use serde_json::{json, Value};
use std::time::Duration;
use tokio::time::sleep;
use uuid::Uuid;

async fn send(processor: &CommandProcessor, request: Value) -> Value {
    let line = processor.process(&request.to_string()).await;
    serde_json::from_str(&line).unwrap()
}

async fn ok(processor: &CommandProcessor, request: Value) -> Value {
    let response = send(processor, request).await;
    assert_eq!(response["success"], json!(true), "response {}", response);
    response["result"].clone()
}

/// Fixture with one loaded stereo audio cue
async fn loaded_show() -> (TestShow, CommandProcessor, Uuid) {
    let show = TestShow::new();
    show.add_material("pad.wav", 2, 2.0, 0.1);
    show.start_audio();
    let cue = audio_cue("1", "pad.wav");
    let media = cue.params.media().cloned().unwrap();
    show.audio.load_cue(cue.id, &media).await.unwrap();
    let id = show.push(cue).await;
    let processor = CommandProcessor::new(show.scheduler.clone());
    (show, processor, id)
}

#[tokio::test(start_paused = true)]
async fn test_go_and_status_follow_the_wait() {
    let show = TestShow::new();
    let id = show.push(wait_cue("1", 200)).await;
    let processor = CommandProcessor::new(show.scheduler.clone());

    let result = ok(&processor, json!({ "command": "go" })).await;
    assert_eq!(result, json!({ "dispatched": id }));

    let status = ok(&processor, json!({ "command": "getStatus" })).await;
    assert_eq!(status["scheduler"]["transport"], json!("playing"));
    assert_eq!(status["scheduler"]["executingCueIds"], json!([id]));
    assert_eq!(status["engine"]["sampleRate"], json!(48_000));

    let again = ok(&processor, json!({ "command": "go" })).await;
    assert_eq!(again, json!({ "ignored": "debounced" }));

    sleep(Duration::from_millis(300)).await;
    let status = ok(&processor, json!({ "command": "getStatus" })).await;
    assert_eq!(status["scheduler"]["transport"], json!("stopped"));
    assert_eq!(status["scheduler"]["isPlaying"], json!(false));
}

#[tokio::test(start_paused = true)]
async fn test_empty_list_reports_nothing_to_go() {
    let show = TestShow::new();
    let processor = CommandProcessor::new(show.scheduler.clone());
    let result = ok(&processor, json!({ "command": "go", "params": {} })).await;
    assert_eq!(result, json!({ "ignored": "empty" }));
}

#[tokio::test(start_paused = true)]
async fn test_crosspoint_set_get_and_clear() {
    let (_show, processor, id) = loaded_show().await;

    ok(
        &processor,
        json!({ "command": "setCrosspoint", "params": { "cueId": id, "input": 0, "output": 1, "level": -6.0 } }),
    )
    .await;
    let level = ok(
        &processor,
        json!({ "command": "getCrosspoint", "params": { "cueId": id, "input": 0, "output": 1 } }),
    )
    .await;
    assert_eq!(level, json!(-6.0));

    ok(
        &processor,
        json!({ "command": "setCrosspoint", "params": { "cueId": id, "input": 0, "output": 1, "level": null } }),
    )
    .await;
    let level = ok(
        &processor,
        json!({ "command": "getCrosspoint", "params": { "cueId": id, "input": 0, "output": 1 } }),
    )
    .await;
    assert_eq!(level, Value::Null);
}

#[tokio::test(start_paused = true)]
async fn test_crosspoint_on_unknown_cue_fails() {
    let (_show, processor, _id) = loaded_show().await;
    let response = send(
        &processor,
        json!({ "command": "getCrosspoint", "params": { "cueId": Uuid::new_v4(), "input": 0, "output": 0 } }),
    )
    .await;
    assert_eq!(response["success"], json!(false));
    assert!(response["error"].is_string());
}

#[tokio::test(start_paused = true)]
async fn test_patch_routing_round_trip() {
    let (_show, processor, _id) = loaded_show().await;

    ok(
        &processor,
        json!({ "command": "setPatchRouting", "params": { "cueOutput": 0, "deviceOutput": 1, "level": -3.0 } }),
    )
    .await;
    let level = ok(
        &processor,
        json!({ "command": "getPatchRouting", "params": { "cueOutput": 0, "deviceOutput": 1 } }),
    )
    .await;
    assert_eq!(level, json!(-3.0));

    let direct = ok(
        &processor,
        json!({ "command": "getPatchRouting", "params": { "cueOutput": 0, "deviceOutput": 0 } }),
    )
    .await;
    assert_eq!(direct, json!(0.0));
}

#[tokio::test(start_paused = true)]
async fn test_output_mute_checks_range() {
    let (_show, processor, _id) = loaded_show().await;

    ok(&processor, json!({ "command": "muteOutput", "params": { "output": 0, "mute": true } })).await;
    let response = send(
        &processor,
        json!({ "command": "muteOutput", "params": { "output": 99, "mute": true } }),
    )
    .await;
    assert_eq!(response["success"], json!(false));
}

#[tokio::test(start_paused = true)]
async fn test_master_volume_is_clamped() {
    let show = TestShow::new();
    let processor = CommandProcessor::new(show.scheduler.clone());
    let applied = ok(&processor, json!({ "command": "setMasterVolume", "params": { "volume": 0.5 } })).await;
    assert_eq!(applied, json!(0.5));
    let applied = ok(&processor, json!({ "command": "setMasterVolume", "params": { "volume": -1.0 } })).await;
    assert_eq!(applied, json!(0.0));
}

#[tokio::test]
async fn test_unknown_and_malformed_requests() {
    let show = TestShow::new();
    let processor = CommandProcessor::new(show.scheduler.clone());

    let unknown = send(&processor, json!({ "command": "launchFireworks" })).await;
    assert_eq!(unknown["success"], json!(false));
    assert!(unknown["error"].as_str().unwrap().contains("launchFireworks"));

    let line = processor.process("{ not json").await;
    let malformed: Value = serde_json::from_str(&line).unwrap();
    assert_eq!(malformed["success"], json!(false));
    assert!(malformed["error"].as_str().unwrap().starts_with("Malformed command"));

    let bad_params = send(&processor, json!({ "command": "goTo", "params": { "cue": 1 } })).await;
    assert_eq!(bad_params["success"], json!(false));
}

#[tokio::test]
async fn test_save_show_needs_a_path_once() {
    let show = TestShow::new();
    show.push(wait_cue("1", 100)).await;
    let processor = CommandProcessor::new(show.scheduler.clone());

    let unnamed = send(&processor, json!({ "command": "saveShow" })).await;
    assert_eq!(unnamed["success"], json!(false));

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("show.json");
    let saved = ok(
        &processor,
        json!({ "command": "saveShow", "params": { "path": path } }),
    )
    .await;
    assert_eq!(saved, json!(path.display().to_string()));
    assert!(path.exists());

    let resaved = ok(&processor, json!({ "command": "saveShow" })).await;
    assert_eq!(resaved, saved);
}

#[tokio::test(start_paused = true)]
async fn test_initialize_device_switch_and_shutdown() {
    let sink = ClockedSink::new(48_000, 480, 2).with_device(DeviceInfo {
        id: "stage".to_string(),
        name: "Stage Rack".to_string(),
        input_channels: 0,
        output_channels: 8,
    });
    let show = TestShow::with_sink(EngineConfig::default(), sink);
    let processor = CommandProcessor::new(show.scheduler.clone());

    let device = ok(&processor, json!({ "command": "initialize" })).await;
    assert_eq!(device["id"], json!("clock"));

    let device = ok(
        &processor,
        json!({ "command": "setAudioDevice", "params": { "deviceId": "stage" } }),
    )
    .await;
    assert_eq!(device["outputChannels"], json!(8));
    let status = ok(&processor, json!({ "command": "getStatus" })).await;
    assert_eq!(status["engine"]["currentDevice"], json!("Stage Rack"));
    assert_eq!(status["engine"]["isRunning"], json!(true));

    let level = ok(
        &processor,
        json!({ "command": "getPatchRouting", "params": { "cueOutput": 7, "deviceOutput": 7 } }),
    )
    .await;
    assert_eq!(level, json!(0.0));

    let unknown = send(
        &processor,
        json!({ "command": "setAudioDevice", "params": { "deviceName": "nowhere" } }),
    )
    .await;
    assert_eq!(unknown["success"], json!(false));
    let status = ok(&processor, json!({ "command": "getStatus" })).await;
    assert_eq!(status["engine"]["currentDevice"], json!("Stage Rack"));

    ok(&processor, json!({ "command": "shutdown" })).await;
    let status = ok(&processor, json!({ "command": "getStatus" })).await;
    assert_eq!(status["engine"]["isRunning"], json!(false));
}

#[tokio::test(start_paused = true)]
async fn test_create_cue_and_load_file() {
    let show = TestShow::new();
    show.add_material("pad.wav", 2, 2.0, 0.1);
    let processor = CommandProcessor::new(show.scheduler.clone());

    let cue = ok(
        &processor,
        json!({ "command": "createCue", "params": { "type": "audio", "filePath": "pad.wav" } }),
    )
    .await;
    let id: Uuid = serde_json::from_value(cue["id"].clone()).unwrap();
    assert!(!show.audio.is_loaded(id));

    let loaded = ok(&processor, json!({ "command": "loadFile", "params": { "cueId": id } })).await;
    assert_eq!(loaded["channels"], json!(2));
    assert_eq!(loaded["sampleRate"], json!(48_000));
    assert!(show.audio.is_loaded(id));

    let missing = send(
        &processor,
        json!({ "command": "loadFile", "params": { "cueId": id, "filePath": "missing.wav" } }),
    )
    .await;
    assert_eq!(missing["success"], json!(false));
    let cue = show.scheduler.cue(id).await.unwrap();
    assert_eq!(cue.params.media().unwrap().file_path.to_str(), Some("missing.wav"));
}

#[tokio::test(start_paused = true)]
async fn test_play_cue_honours_start_time() {
    let (show, processor, id) = loaded_show().await;

    ok(
        &processor,
        json!({ "command": "playCue", "params": { "cueId": id, "startTime": 1.0, "fadeInTime": 0.0 } }),
    )
    .await;
    sleep(Duration::from_millis(20)).await;
    assert!(show.audio.is_playing(id));
    assert!(show.audio.position_seconds(id).unwrap() >= 1.0);

    let again = send(&processor, json!({ "command": "playCue", "params": { "cueId": id } })).await;
    assert_eq!(again["success"], json!(false));
}

#[tokio::test(start_paused = true)]
async fn test_play_cue_loads_on_demand_and_rejects_negative_times() {
    let show = TestShow::new();
    show.add_material("pad.wav", 2, 2.0, 0.1);
    show.start_audio();
    let id = show.push(audio_cue("1", "pad.wav")).await;
    let processor = CommandProcessor::new(show.scheduler.clone());

    let negative = send(
        &processor,
        json!({ "command": "playCue", "params": { "cueId": id, "startTime": -1.0 } }),
    )
    .await;
    assert_eq!(negative["success"], json!(false));
    assert!(!show.audio.is_playing(id));

    ok(&processor, json!({ "command": "playCue", "params": { "cueId": id } })).await;
    assert!(show.audio.is_loaded(id));
    assert!(show.audio.is_playing(id));
}

#[tokio::test(start_paused = true)]
async fn test_rate_and_loop_follow_the_voice_and_the_cue() {
    let (show, processor, id) = loaded_show().await;
    ok(&processor, json!({ "command": "playCue", "params": { "cueId": id } })).await;

    let applied = ok(&processor, json!({ "command": "setCueRate", "params": { "cueId": id, "rate": 2.0 } })).await;
    assert_eq!(applied, json!(true));
    sleep(Duration::from_millis(100)).await;
    let position = show.audio.position_seconds(id).unwrap();
    assert!(position > 0.15, "position {}", position);

    let rejected = send(&processor, json!({ "command": "setCueRate", "params": { "cueId": id, "rate": 0.0 } })).await;
    assert_eq!(rejected["success"], json!(false));

    let looped = ok(&processor, json!({ "command": "setCueLoop", "params": { "cueId": id, "loop": true } })).await;
    assert_eq!(looped, json!(true));

    let cue = show.scheduler.cue(id).await.unwrap();
    let media = cue.params.media().unwrap();
    assert_eq!(media.rate, 2.0);
    assert!(media.loop_playback);
}

#[tokio::test(start_paused = true)]
async fn test_set_default_patch() {
    let (show, processor, _id) = loaded_show().await;
    let side = show.audio.create_patch("Side");

    ok(&processor, json!({ "command": "setDefaultPatch", "params": { "patchId": side } })).await;
    assert_eq!(show.audio.default_patch_id(), side);

    let unknown = send(
        &processor,
        json!({ "command": "setDefaultPatch", "params": { "patchId": Uuid::new_v4() } }),
    )
    .await;
    assert_eq!(unknown["success"], json!(false));
    assert_eq!(show.audio.default_patch_id(), side);
}
