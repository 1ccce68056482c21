//! Integration tests for the cue scheduler
//!
//! Every test runs on paused tokio time; the software clock sink renders
//! audio voices in step with it.

mod helpers;

use cueforge_common::events::{ShowEvent, TransportState};
use cueforge_common::{CueStatus, GroupMode};
use cueforge_engine::{EngineConfig, GoOutcome};
use helpers::{audio_cue, drain, group_cue, wait_cue, TestShow};
use std::time::Duration;
use tokio::time::{sleep, sleep_until, Instant};

fn ms(millis: u64) -> Duration {
    Duration::from_millis(millis)
}

fn fired(events: &[ShowEvent]) -> Vec<uuid::Uuid> {
    events
        .iter()
        .filter_map(|event| match event {
            ShowEvent::CueFired { cue_id, .. } => Some(*cue_id),
            _ => None,
        })
        .collect()
}

// ============================================================================
// Transport
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_go_is_debounced_and_idempotent() {
    let show = TestShow::new();
    let long = show.push(wait_cue("1", 5_000)).await;

    assert_eq!(show.scheduler.go().await, GoOutcome::Dispatched(long));
    assert_eq!(show.scheduler.go().await, GoOutcome::Debounced);

    sleep(ms(300)).await;
    assert_eq!(show.scheduler.go().await, GoOutcome::AlreadyExecuting(long));
    assert_eq!(show.scheduler.status().await.executing_cue_ids, vec![long]);
}

#[tokio::test(start_paused = true)]
async fn test_zero_debounce_accepts_rapid_presses() {
    let mut config = EngineConfig::default();
    config.transport.go_debounce_ms = 0;
    let show = TestShow::with_config(config);
    let first = show.push(wait_cue("1", 1_000)).await;
    let second = show.push(wait_cue("2", 1_000)).await;

    assert_eq!(show.scheduler.go().await, GoOutcome::Dispatched(first));
    assert_eq!(show.scheduler.go().await, GoOutcome::Dispatched(second));

    let status = show.scheduler.status().await;
    assert_eq!(status.executing_cue_ids, vec![first, second]);
    assert_eq!(status.current_cue_index, Some(1));
}

#[tokio::test(start_paused = true)]
async fn test_stop_clears_running_cues() {
    let show = TestShow::new();
    let ids = vec![
        show.push(wait_cue("1", 5_000)).await,
        show.push(wait_cue("2", 5_000)).await,
        show.push(wait_cue("3", 5_000)).await,
    ];
    for id in &ids {
        show.scheduler.go_to(*id).await.unwrap();
    }
    sleep(ms(100)).await;
    assert_eq!(show.scheduler.status().await.executing_cue_ids.len(), 3);

    show.scheduler.stop().await;

    let status = show.scheduler.status().await;
    assert!(status.executing_cue_ids.is_empty());
    assert_eq!(status.transport, TransportState::Stopped);
    for id in &ids {
        assert_eq!(show.scheduler.cue(*id).await.unwrap().status, CueStatus::Ready);
    }
    assert!(show.presenter.calls().contains(&"stop_all".to_string()));

    sleep(ms(6_000)).await;
    assert!(show.scheduler.status().await.executing_cue_ids.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_single_cue_mode_stops_before_go() {
    let show = TestShow::new();
    show.scheduler.set_single_cue_mode(true).await;
    let first = show.push(wait_cue("1", 5_000)).await;
    let second = show.push(wait_cue("2", 5_000)).await;

    show.scheduler.go().await;
    sleep(ms(300)).await;
    assert_eq!(show.scheduler.go().await, GoOutcome::Dispatched(second));

    let status = show.scheduler.status().await;
    assert_eq!(status.executing_cue_ids, vec![second]);
    assert_eq!(show.scheduler.cue(first).await.unwrap().status, CueStatus::Ready);
}

#[tokio::test(start_paused = true)]
async fn test_pre_wait_delays_the_action() {
    let show = TestShow::new();
    let mut cue = wait_cue("1", 100);
    cue.pre_wait_ms = 100;
    let id = show.push(cue).await;
    let start = Instant::now();

    show.scheduler.go().await;
    sleep_until(start + ms(150)).await;
    assert!(show.scheduler.is_executing(id).await);

    sleep_until(start + ms(210)).await;
    assert!(!show.scheduler.is_executing(id).await);
}

// ============================================================================
// Auto-continue
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_audio_auto_continues_into_wait() {
    let show = TestShow::new();
    show.add_material("a.wav", 2, 0.5, 0.1);
    show.start_audio();

    let mut a = audio_cue("1", "a.wav");
    a.auto_continue = true;
    let a_id = show.push(a).await;
    let b_id = show.push(wait_cue("2", 2_000)).await;
    let mut events = show.subscribe();
    let start = Instant::now();

    assert_eq!(show.scheduler.go().await, GoOutcome::Dispatched(a_id));

    sleep_until(start + ms(200)).await;
    assert_eq!(show.scheduler.cue(a_id).await.unwrap().status, CueStatus::Playing);
    assert!(show.audio.is_playing(a_id));

    sleep_until(start + ms(1_000)).await;
    assert_eq!(show.scheduler.cue(a_id).await.unwrap().status, CueStatus::Ready);
    assert_eq!(show.scheduler.cue(b_id).await.unwrap().status, CueStatus::Playing);
    assert_eq!(show.scheduler.status().await.executing_cue_ids, vec![b_id]);

    sleep_until(start + ms(2_300)).await;
    assert!(show.scheduler.is_executing(b_id).await);

    sleep_until(start + ms(3_000)).await;
    let status = show.scheduler.status().await;
    assert!(status.executing_cue_ids.is_empty());
    assert_eq!(status.transport, TransportState::Stopped);

    let events = drain(&mut events);
    assert_eq!(fired(&events), vec![a_id, b_id]);
    assert!(events.iter().any(|event| matches!(
        event,
        ShowEvent::CueFinished { cue_id, completed: true, .. } if *cue_id == a_id
    )));
}

#[tokio::test(start_paused = true)]
async fn test_auto_continue_honours_delay_and_target() {
    let show = TestShow::new();
    let mut a = wait_cue("1", 100);
    a.auto_continue = true;
    a.continue_delay_ms = 200;
    let skipped = wait_cue("2", 100);
    let target = wait_cue("3", 100);
    a.auto_follow_target = Some(target.id);
    let a_id = show.push(a).await;
    let skipped_id = show.push(skipped).await;
    let target_id = show.push(target).await;
    let start = Instant::now();

    show.scheduler.go().await;
    sleep_until(start + ms(250)).await;
    assert!(!show.scheduler.is_executing(a_id).await);
    assert!(!show.scheduler.is_executing(target_id).await);
    assert!(show.scheduler.is_playing().await);

    sleep_until(start + ms(350)).await;
    assert!(show.scheduler.is_executing(target_id).await);
    assert!(!show.scheduler.is_executing(skipped_id).await);
}

#[tokio::test(start_paused = true)]
async fn test_global_flag_disables_auto_continue() {
    let show = TestShow::new();
    show.scheduler.set_auto_continue_enabled(false).await;
    let mut a = wait_cue("1", 100);
    a.auto_continue = true;
    show.push(a).await;
    let b = show.push(wait_cue("2", 100)).await;

    show.scheduler.go().await;
    sleep(ms(300)).await;
    assert_eq!(show.scheduler.cue(b).await.unwrap().status, CueStatus::Ready);
    assert_eq!(show.scheduler.status().await.transport, TransportState::Stopped);
}

#[tokio::test(start_paused = true)]
async fn test_auto_follow_cycle_stops_the_chain() {
    let show = TestShow::new();
    let mut a = wait_cue("1", 100);
    let mut b = wait_cue("2", 100);
    a.auto_continue = true;
    a.auto_follow_target = Some(b.id);
    b.auto_continue = true;
    b.auto_follow_target = Some(a.id);
    let a_id = show.push(a).await;
    let b_id = show.push(b).await;
    let mut events = show.subscribe();

    show.scheduler.go().await;
    sleep(ms(1_000)).await;

    let status = show.scheduler.status().await;
    assert!(status.executing_cue_ids.is_empty());
    assert_eq!(status.transport, TransportState::Stopped);
    assert_eq!(fired(&drain(&mut events)), vec![a_id, b_id]);
}

// ============================================================================
// Groups
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_parallel_group_waits_for_longest_child() {
    let show = TestShow::new();
    let x = show.push(wait_cue("2", 100)).await;
    let y = show.push(wait_cue("3", 50)).await;
    let group = show.push(group_cue("1", vec![x, y], GroupMode::Parallel)).await;
    let start = Instant::now();

    assert_eq!(show.scheduler.go().await, GoOutcome::Dispatched(group));

    sleep_until(start + ms(60)).await;
    assert_eq!(show.scheduler.cue(y).await.unwrap().status, CueStatus::Ready);
    assert_eq!(show.scheduler.cue(x).await.unwrap().status, CueStatus::Playing);
    assert!(show.scheduler.is_executing(group).await);

    sleep_until(start + ms(95)).await;
    assert!(show.scheduler.is_executing(group).await);

    sleep_until(start + ms(105)).await;
    assert!(!show.scheduler.is_executing(group).await);
    assert_eq!(show.scheduler.cue(group).await.unwrap().status, CueStatus::Ready);
    assert_eq!(show.scheduler.status().await.transport, TransportState::Stopped);
}

#[tokio::test(start_paused = true)]
async fn test_sequential_group_runs_children_in_order() {
    let show = TestShow::new();
    let x = show.push(wait_cue("2", 100)).await;
    let y = show.push(wait_cue("3", 100)).await;
    let group = show.push(group_cue("1", vec![x, y], GroupMode::Sequential)).await;
    let start = Instant::now();

    show.scheduler.go_to(group).await.unwrap();

    sleep_until(start + ms(50)).await;
    assert_eq!(show.scheduler.cue(x).await.unwrap().status, CueStatus::Playing);
    assert_eq!(show.scheduler.cue(y).await.unwrap().status, CueStatus::Ready);

    sleep_until(start + ms(150)).await;
    assert_eq!(show.scheduler.cue(x).await.unwrap().status, CueStatus::Ready);
    assert_eq!(show.scheduler.cue(y).await.unwrap().status, CueStatus::Playing);

    sleep_until(start + ms(250)).await;
    assert!(!show.scheduler.is_executing(group).await);
}

#[tokio::test(start_paused = true)]
async fn test_stopping_group_stops_members() {
    let show = TestShow::new();
    let x = show.push(wait_cue("2", 5_000)).await;
    let group = show.push(group_cue("1", vec![x], GroupMode::Parallel)).await;

    show.scheduler.go().await;
    sleep(ms(100)).await;
    assert!(show.scheduler.is_executing(x).await);

    show.scheduler.stop_cue(group).await.unwrap();
    sleep(ms(10)).await;
    assert!(!show.scheduler.is_executing(x).await);
    assert!(!show.scheduler.is_executing(group).await);
    assert_eq!(show.scheduler.cue(x).await.unwrap().status, CueStatus::Ready);
}

// ============================================================================
// Audio and video cues
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_failed_load_isolates_the_cue() {
    let show = TestShow::new();
    show.start_audio();
    let broken = show.push(audio_cue("1", "missing.wav")).await;
    let next = show.push(wait_cue("2", 100)).await;
    let mut events = show.subscribe();

    show.scheduler.go().await;
    sleep(ms(50)).await;

    assert_eq!(show.scheduler.cue(broken).await.unwrap().status, CueStatus::Error);
    assert!(drain(&mut events).iter().any(|event| matches!(
        event,
        ShowEvent::CueError { cue_id, .. } if *cue_id == broken
    )));
    assert_eq!(show.scheduler.status().await.transport, TransportState::Stopped);

    sleep(ms(300)).await;
    assert_eq!(show.scheduler.go().await, GoOutcome::Dispatched(next));

    show.scheduler.acknowledge_error(broken).await.unwrap();
    assert_eq!(show.scheduler.cue(broken).await.unwrap().status, CueStatus::Ready);
}

#[tokio::test(start_paused = true)]
async fn test_evicted_cue_reloads_on_go() {
    let mut config = EngineConfig::default();
    config.samples.cache_budget_mb = 1;
    let show = TestShow::with_config(config);
    show.add_material("a.wav", 2, 2.0, 0.1);
    show.add_material("b.wav", 2, 2.0, 0.1);
    show.start_audio();
    let a = show.push(audio_cue("1", "a.wav")).await;
    let b = show.push(audio_cue("2", "b.wav")).await;

    show.scheduler.prepare_cue(a).await.unwrap();
    show.audio.set_crosspoint(a, 0, 1, Some(-6.0)).unwrap();
    show.scheduler.prepare_cue(b).await.unwrap();
    assert!(!show.audio.is_loaded(a));
    assert!(show.audio.is_loaded(b));

    show.scheduler.go_to(a).await.unwrap();
    sleep(ms(50)).await;

    assert_eq!(show.scheduler.cue(a).await.unwrap().status, CueStatus::Playing);
    assert!(show.audio.is_playing(a));
    assert_eq!(show.audio.crosspoint(a, 0, 1).unwrap(), Some(-6.0));
}

#[tokio::test(start_paused = true)]
async fn test_stop_cue_uses_fade_out() {
    let show = TestShow::new();
    show.add_material("bed.wav", 2, 10.0, 0.2);
    show.start_audio();
    let mut cue = audio_cue("1", "bed.wav");
    if let Some(media) = cue.params.media_mut() {
        media.fade_out_ms = 200;
    }
    let id = show.push(cue).await;

    show.scheduler.go().await;
    sleep(ms(100)).await;
    assert!(show.audio.is_playing(id));

    show.scheduler.stop_cue(id).await.unwrap();
    assert_eq!(show.scheduler.cue(id).await.unwrap().status, CueStatus::Ready);
    assert!(show.audio.is_playing(id));

    sleep(ms(300)).await;
    assert!(!show.audio.is_playing(id));
}

#[tokio::test(start_paused = true)]
async fn test_critical_failure_pauses_and_recovers() {
    let show = TestShow::new();
    show.add_material("long.wav", 2, 10.0, 0.2);
    show.start_audio();
    let id = show.push(audio_cue("1", "long.wav")).await;

    show.scheduler.go().await;
    sleep(ms(100)).await;

    assert_eq!(show.scheduler.report_critical_failure("device lost").await, vec![id]);
    assert_eq!(show.scheduler.cue(id).await.unwrap().status, CueStatus::Paused);
    let frozen = show.audio.position_seconds(id).unwrap();
    sleep(ms(200)).await;
    assert_eq!(show.audio.position_seconds(id).unwrap(), frozen);

    assert_eq!(show.scheduler.recover_from_failure().await, vec![id]);
    assert_eq!(show.scheduler.cue(id).await.unwrap().status, CueStatus::Playing);
    sleep(ms(200)).await;
    assert!(show.audio.position_seconds(id).unwrap() > frozen);
}

#[tokio::test(start_paused = true)]
async fn test_video_cue_runs_for_clip_length() {
    let show = TestShow::new();
    show.presenter.set_clip_length(Some(ms(200)));
    let mut cue = cueforge_common::Cue::new(cueforge_common::CueType::Video, "1");
    if let Some(media) = cue.params.media_mut() {
        media.file_path = "intro.mp4".into();
    }
    let id = show.push(cue).await;
    let start = Instant::now();

    show.scheduler.go().await;
    sleep_until(start + ms(150)).await;
    assert!(show.scheduler.is_executing(id).await);
    assert_eq!(show.presenter.calls(), vec![format!("play {} intro.mp4", id)]);

    sleep_until(start + ms(250)).await;
    assert!(!show.scheduler.is_executing(id).await);
    assert!(show.presenter.calls().contains(&format!("stop {}", id)));
}

// ============================================================================
// Show documents
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_show_save_and_open() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("evening.json");

    let show = TestShow::new();
    let mut cue = wait_cue("1", 500);
    cue.name = "Preshow hold".to_string();
    show.push(cue).await;
    show.scheduler.add_cue(cueforge_common::CueType::Group).await;

    let saved = show.scheduler.save_show(Some(&path)).await.unwrap();
    assert_eq!(saved, path);
    assert!(!show.scheduler.status().await.unsaved);

    let reopened = TestShow::new();
    reopened.scheduler.open_show(&path).await.unwrap();
    let cues = reopened.scheduler.cues().await;
    assert_eq!(cues.len(), 2);
    assert_eq!(cues[0].name, "Preshow hold");

    reopened.scheduler.add_cue(cueforge_common::CueType::Wait).await;
    reopened.scheduler.save_show(None).await.unwrap();
}
