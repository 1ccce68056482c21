//! Integration tests for fade automation on the running tick
//!
//! The fade engine ticks at 60 Hz on paused tokio time, so mid-fade values
//! are checked to within one tick.

mod helpers;

use cueforge_common::FadeCurve;
use cueforge_engine::fade::{FadeEngine, FadeSequence, FadeStep, Fadeable, ValueTarget};
use cueforge_engine::PlayOptions;
use helpers::{audio_cue, TestShow};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

const ONE_TICK: f32 = 0.04;

fn ms(millis: u64) -> Duration {
    Duration::from_millis(millis)
}

fn running_engine() -> (Arc<FadeEngine>, CancellationToken) {
    let shutdown = CancellationToken::new();
    let engine = FadeEngine::new(Duration::from_nanos(1_000_000_000 / 60));
    engine.start(shutdown.clone());
    (engine, shutdown)
}

fn counter() -> (Arc<AtomicUsize>, Box<dyn FnOnce() + Send>) {
    let count = Arc::new(AtomicUsize::new(0));
    let hits = Arc::clone(&count);
    (count, Box::new(move || {
        hits.fetch_add(1, Ordering::SeqCst);
    }))
}

#[tokio::test(start_paused = true)]
async fn test_linear_fade_midpoint_and_exact_end() {
    let (engine, _shutdown) = running_engine();
    let target = ValueTarget::new(Uuid::new_v4(), 0.0);
    let (completions, callback) = counter();
    let start = Instant::now();

    engine.create_fade(target.clone(), 0.0, 1.0, ms(1_000), FadeCurve::Linear, Some(callback));

    sleep_until(start + ms(500)).await;
    assert!((target.get() - 0.5).abs() <= ONE_TICK, "midpoint {}", target.get());
    assert_eq!(completions.load(Ordering::SeqCst), 0);

    sleep_until(start + ms(1_100)).await;
    assert_eq!(target.get(), 1.0);
    assert_eq!(completions.load(Ordering::SeqCst), 1);
    assert!(!engine.is_fading(target.target_id()));

    sleep(ms(500)).await;
    assert_eq!(completions.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_fade_never_completes() {
    let (engine, _shutdown) = running_engine();
    let owner = Uuid::new_v4();
    let target = ValueTarget::new(owner, 1.0);
    let (completions, callback) = counter();

    engine.fade_to(target.clone(), 0.0, ms(1_000), FadeCurve::SCurve, Some(callback));
    sleep(ms(300)).await;
    assert_eq!(engine.cancel_fades_for_target(owner), 1);
    let held = target.get();

    sleep(ms(1_000)).await;
    assert_eq!(target.get(), held);
    assert!(held > 0.0 && held < 1.0);
    assert_eq!(completions.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn test_sequence_steps_chain_from_completion() {
    let (engine, _shutdown) = running_engine();
    let target = ValueTarget::new(Uuid::new_v4(), 0.0);
    let (completions, callback) = counter();
    let start = Instant::now();

    FadeSequence::new(target.clone())
        .then(FadeStep::to(1.0, ms(200), FadeCurve::Linear))
        .then(FadeStep::to(0.25, ms(200), FadeCurve::Linear))
        .start(&engine, Some(callback))
        .unwrap();

    sleep_until(start + ms(250)).await;
    assert!(target.get() < 1.0 && target.get() > 0.25);
    assert_eq!(completions.load(Ordering::SeqCst), 0);

    sleep_until(start + ms(500)).await;
    assert_eq!(target.get(), 0.25);
    assert_eq!(completions.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_crosspoint_fade_lands_on_target_level() {
    let show = TestShow::new();
    show.add_material("pad.wav", 2, 5.0, 0.1);
    show.start_audio();
    let cue = audio_cue("1", "pad.wav");
    let media = cue.params.media().cloned().unwrap();
    show.audio.load_cue(cue.id, &media).await.unwrap();
    show.audio.play_cue(cue.id, PlayOptions::default()).unwrap();

    show.audio
        .fade_crosspoint(cue.id, 0, 1, -20.0, ms(300), FadeCurve::SCurve)
        .unwrap();
    assert_eq!(show.audio.crosspoint(cue.id, 0, 1).unwrap(), Some(-100.0));

    sleep(ms(400)).await;
    assert_eq!(show.audio.crosspoint(cue.id, 0, 1).unwrap(), Some(-20.0));
}

#[tokio::test(start_paused = true)]
async fn test_volume_fade_then_stop() {
    let show = TestShow::new();
    show.add_material("pad.wav", 2, 5.0, 0.1);
    show.start_audio();
    let cue = audio_cue("1", "pad.wav");
    let media = cue.params.media().cloned().unwrap();
    show.audio.load_cue(cue.id, &media).await.unwrap();
    let handle = show.audio.play_cue(cue.id, PlayOptions::default()).unwrap();

    show.audio
        .fade_volume(cue.id, 0.5, ms(200), FadeCurve::Linear)
        .unwrap();
    sleep(ms(300)).await;
    let peaks = show.sink.last_peaks();
    assert!((peaks[0] - 0.05).abs() < 1e-4, "peak {}", peaks[0]);

    show.audio.stop_cue(cue.id, ms(100));
    sleep(ms(200)).await;
    assert!(handle.is_finished());
    assert!(!show.audio.is_playing(cue.id));
}
