//! Fade automation engine
//!
//! Interpolates [`Fadeable`] targets on a fixed-rate tick (60 Hz by default)
//! running on the control runtime. Audio gain is applied separately at the
//! callback rate; the engine only moves the values the renderer reads.
//!
//! Per tick, in creation order:
//! - cancelled fades are dropped without firing their callback
//! - running fades write `start + (end - start) × curve(p)`
//! - finished fades (`p ≥ 1`) write exactly `end`, are removed, then fire
//!   their completion callback once
//!
//! Writes happen outside the fade list lock, so a setter may call back into
//! the audio engine. A tick and a cancellation never interleave: once
//! `cancel_fade` returns, the cancelled fade writes nothing more. Callbacks
//! run after the tick, so a callback may start or cancel fades.

use crate::fade::target::Fadeable;
use cueforge_common::FadeCurve;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};
use uuid::Uuid;

/// Fade identifier, unique per engine
pub type FadeId = u64;

/// Completion callback, fired at most once
pub type FadeCallback = Box<dyn FnOnce() + Send + 'static>;

struct Fade {
    id: FadeId,
    target: Arc<dyn Fadeable>,
    start: f32,
    end: f32,
    duration: Duration,
    curve: FadeCurve,
    started: Instant,
    active: bool,
    on_complete: Option<FadeCallback>,
}

impl Fade {
    fn progress(&self, now: Instant) -> f64 {
        if self.duration.is_zero() {
            return 1.0;
        }
        let elapsed = now.saturating_duration_since(self.started);
        elapsed.as_secs_f64() / self.duration.as_secs_f64()
    }
}

#[derive(Default)]
struct FadeState {
    fades: Vec<Fade>,
    next_id: FadeId,
}

/// Time-driven interpolator for fade targets
pub struct FadeEngine {
    state: Mutex<FadeState>,
    /// Held across a tick's writes and by cancellation; taken before `state`
    ticking: Mutex<()>,
    tick_interval: Duration,
}

impl FadeEngine {
    pub fn new(tick_interval: Duration) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(FadeState::default()),
            ticking: Mutex::new(()),
            tick_interval,
        })
    }

    pub fn tick_interval(&self) -> Duration {
        self.tick_interval
    }

    /// Spawn the tick loop on the current runtime
    pub fn start(self: &Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(engine.tick_interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            debug!("Fade engine ticking every {:?}", engine.tick_interval);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = interval.tick() => engine.tick(),
                }
            }
            debug!("Fade engine stopped");
        })
    }

    /// Start a fade from `start` to `end`
    ///
    /// `start` is written immediately; a zero duration completes on the next
    /// tick.
    pub fn create_fade(
        &self,
        target: Arc<dyn Fadeable>,
        start: f32,
        end: f32,
        duration: Duration,
        curve: FadeCurve,
        on_complete: Option<FadeCallback>,
    ) -> FadeId {
        target.set(start);

        let mut state = self.state.lock();
        state.next_id += 1;
        let id = state.next_id;
        trace!(
            "Fade {} on {} '{}': {} → {} over {:?} ({})",
            id,
            target.target_id(),
            target.label(),
            start,
            end,
            duration,
            curve
        );
        state.fades.push(Fade {
            id,
            target,
            start,
            end,
            duration,
            curve,
            started: Instant::now(),
            active: true,
            on_complete,
        });
        id
    }

    /// Fade from the target's current value
    pub fn fade_to(
        &self,
        target: Arc<dyn Fadeable>,
        end: f32,
        duration: Duration,
        curve: FadeCurve,
        on_complete: Option<FadeCallback>,
    ) -> FadeId {
        let start = target.get();
        self.create_fade(target, start, end, duration, curve, on_complete)
    }

    /// Deactivate a fade; its callback never fires
    pub fn cancel_fade(&self, id: FadeId) -> bool {
        let callback = {
            let _ticking = self.ticking.lock();
            let mut state = self.state.lock();
            match state.fades.iter_mut().find(|f| f.id == id && f.active) {
                Some(fade) => {
                    fade.active = false;
                    Some(fade.on_complete.take())
                }
                None => None,
            }
        };
        let cancelled = callback.is_some();
        drop(callback);
        cancelled
    }

    /// Deactivate every fade on fields owned by `target_id`
    pub fn cancel_fades_for_target(&self, target_id: Uuid) -> usize {
        // Callbacks are dropped outside the lock; they may own engine handles
        let mut dropped: Vec<FadeCallback> = Vec::new();
        let cancelled = {
            let _ticking = self.ticking.lock();
            let mut state = self.state.lock();
            let mut count = 0;
            for fade in state
                .fades
                .iter_mut()
                .filter(|f| f.active && f.target.target_id() == target_id)
            {
                fade.active = false;
                if let Some(callback) = fade.on_complete.take() {
                    dropped.push(callback);
                }
                count += 1;
            }
            count
        };
        drop(dropped);
        if cancelled > 0 {
            debug!("Cancelled {} fades for {}", cancelled, target_id);
        }
        cancelled
    }

    /// Number of fades still running
    pub fn active_count(&self) -> usize {
        self.state.lock().fades.iter().filter(|f| f.active).count()
    }

    pub fn is_fading(&self, target_id: Uuid) -> bool {
        self.state
            .lock()
            .fades
            .iter()
            .any(|f| f.active && f.target.target_id() == target_id)
    }

    /// Advance every fade to the current instant
    pub fn tick(&self) {
        self.tick_at(Instant::now());
    }

    /// Advance every fade to `now`
    pub fn tick_at(&self, now: Instant) {
        let mut writes: Vec<(Arc<dyn Fadeable>, f32)> = Vec::new();
        let mut completions: Vec<FadeCallback> = Vec::new();

        let ticking = self.ticking.lock();
        {
            let mut state = self.state.lock();
            state.fades.retain_mut(|fade| {
                if !fade.active {
                    return false;
                }

                let progress = fade.progress(now);
                if progress >= 1.0 {
                    writes.push((Arc::clone(&fade.target), fade.end));
                    if let Some(callback) = fade.on_complete.take() {
                        completions.push(callback);
                    }
                    return false;
                }

                let value = fade
                    .curve
                    .interpolate(f64::from(fade.start), f64::from(fade.end), progress);
                writes.push((Arc::clone(&fade.target), value as f32));
                true
            });
        }

        for (target, value) in writes {
            target.set(value);
        }
        drop(ticking);

        for callback in completions {
            callback();
        }
    }
}
