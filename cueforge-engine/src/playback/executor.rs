//! Cue execution
//!
//! One task per dispatched cue: pre-wait, the type strategy, post-wait.
//! Every wait observes the global pause flag and the execution's token.
//! Settling removes the execution entry (only if its serial is still the
//! live one) and schedules auto-continue.

use super::scheduler::{CueScheduler, ShowState};
use crate::engine::{LoadedCue, PlayOptions};
use crate::error::{Error, Result};
use cueforge_common::events::{ShowEvent, TransportState};
use cueforge_common::time;
use cueforge_common::{Cue, CueId, CueParams, CueStatus, GroupMode, MediaParams};
use futures::future::{join_all, BoxFuture, FutureExt};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// How an execution ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CueOutcome {
    Completed,
    Cancelled,
    Failed(String),
}

impl CueScheduler {
    /// Start `cue_id` as a top-level execution
    ///
    /// `chain` lists the cues already fired by this run of auto-continues,
    /// ending with `cue_id`.
    pub(super) fn dispatch_locked(
        &self,
        state: &mut ShowState,
        cue_id: CueId,
        chain: Vec<CueId>,
    ) -> Result<()> {
        if state.executing.contains_key(&cue_id) {
            return Err(Error::AlreadyExecuting(cue_id));
        }
        let index = state.index_of(cue_id).ok_or(Error::TargetNotFound(cue_id))?;
        let number = state.cues[index].number.clone();

        let (serial, token) = state.begin_execution(cue_id, None);
        state.current_index = Some(index);
        let next = state.next_sequential(index);
        state.set_standby(next, &self.events);
        state.set_transport(TransportState::Playing, &self.events);

        info!("GO cue {} ({})", number, cue_id);
        self.events.emit_lossy(ShowEvent::CueFired {
            cue_id,
            number,
            timestamp: time::now(),
        });

        let scheduler = self.clone();
        tokio::spawn(async move {
            let outcome = scheduler.execute_cue(cue_id, token).await;
            scheduler.settle(cue_id, serial, outcome, chain).await;
        });
        Ok(())
    }

    async fn settle(&self, cue_id: CueId, serial: u64, outcome: CueOutcome, chain: Vec<CueId>) {
        let mut state = self.state.lock().await;
        if !state.end_execution(cue_id, serial) {
            debug!("Cue {} settled after being superseded", cue_id);
            return;
        }
        self.events.emit_lossy(ShowEvent::CueFinished {
            cue_id,
            completed: outcome == CueOutcome::Completed,
            timestamp: time::now(),
        });
        if outcome == CueOutcome::Completed {
            self.schedule_auto_continue(&mut state, cue_id, chain);
        }
        state.settle_transport(&self.events);
    }

    fn schedule_auto_continue(&self, state: &mut ShowState, source: CueId, chain: Vec<CueId>) {
        let Some(cue) = state.cue(source) else {
            return;
        };
        let paused = *self.paused.borrow();
        if !cue.auto_continue || !state.auto_continue_enabled || paused {
            return;
        }

        let delay = Duration::from_millis(cue.continue_delay_ms);
        debug!("Auto-continue from cue {} in {:?}", cue.number, delay);
        let token = state.session.child_token();
        let scheduler = self.clone();
        let timer = tokio::spawn(async move {
            if scheduler.pausable_sleep(delay, &token).await {
                scheduler.fire_auto_continue(source, chain).await;
            }
        });
        if let Some(previous) = state.timers.insert(source, timer) {
            previous.abort();
        }
    }

    async fn fire_auto_continue(&self, source: CueId, mut chain: Vec<CueId>) {
        let mut state = self.state.lock().await;
        state.timers.remove(&source);

        match state.follow_target(source) {
            Ok(Some(target)) if chain.contains(&target) => {
                warn!(
                    "Auto-continue from cue {} loops back to cue {}; chain stopped",
                    source, target
                );
            }
            Ok(Some(target)) => {
                chain.push(target);
                match self.dispatch_locked(&mut state, target, chain) {
                    Ok(()) => {}
                    Err(Error::AlreadyExecuting(id)) => {
                        debug!("Auto-continue target {} is already executing", id)
                    }
                    Err(e) => warn!("Auto-continue from cue {} failed: {}", source, e),
                }
            }
            Ok(None) => debug!("Auto-continue from cue {} reached the end of the list", source),
            Err(e) => warn!("Auto-continue from cue {} failed: {}", source, e),
        }
        state.settle_transport(&self.events);
    }

    /// Run one cue to its end
    ///
    /// Boxed so group cues can recurse into their children.
    pub(super) fn execute_cue(&self, cue_id: CueId, token: CancellationToken) -> BoxFuture<'static, CueOutcome> {
        let scheduler = self.clone();
        async move {
            let snapshot = {
                let state = scheduler.state.lock().await;
                state.cue(cue_id).cloned()
            };
            let Some(cue) = snapshot else {
                return CueOutcome::Cancelled;
            };

            let mut outcome = scheduler.run_cue(&cue, &token).await;
            if token.is_cancelled() {
                outcome = CueOutcome::Cancelled;
            }
            scheduler.finish_cue(&cue, &outcome).await;
            outcome
        }
        .boxed()
    }

    async fn finish_cue(&self, cue: &Cue, outcome: &CueOutcome) {
        let mut state = self.state.lock().await;
        let Some(status) = state.cue(cue.id).map(|c| c.status) else {
            return;
        };
        match outcome {
            CueOutcome::Cancelled => {}
            CueOutcome::Completed => {
                if status.is_active() {
                    state.set_status(cue.id, CueStatus::Ready, &self.events);
                }
            }
            CueOutcome::Failed(message) => {
                warn!("Cue {} failed: {}", cue.number, message);
                if status != CueStatus::Error {
                    state.set_status(cue.id, CueStatus::Error, &self.events);
                    self.events.emit_lossy(ShowEvent::CueError {
                        cue_id: cue.id,
                        message: message.clone(),
                        timestamp: time::now(),
                    });
                }
            }
        }
    }

    async fn run_cue(&self, cue: &Cue, token: &CancellationToken) -> CueOutcome {
        if let CueParams::Audio(media) = &cue.params {
            if !self.audio.has_material(cue.id, &media.file_path) {
                if let Err(e) = self.load_media(cue.id, media).await {
                    return CueOutcome::Failed(e.to_string());
                }
            }
        }
        if token.is_cancelled() {
            return CueOutcome::Cancelled;
        }

        self.mark_started(cue.id).await;
        if !self.pausable_sleep(Duration::from_millis(cue.pre_wait_ms), token).await {
            return CueOutcome::Cancelled;
        }

        let outcome = match &cue.params {
            CueParams::Audio(media) => self.run_audio(cue, media, token).await,
            CueParams::Video(media) => self.run_video(cue, media, token).await,
            CueParams::Wait { duration_ms } => {
                if self.pausable_sleep(Duration::from_millis(*duration_ms), token).await {
                    CueOutcome::Completed
                } else {
                    CueOutcome::Cancelled
                }
            }
            CueParams::Group { children, mode } => self.run_group(cue, children, *mode, token).await,
        };
        if outcome != CueOutcome::Completed {
            return outcome;
        }

        if !self.pausable_sleep(Duration::from_millis(cue.post_wait_ms), token).await {
            return CueOutcome::Cancelled;
        }
        CueOutcome::Completed
    }

    /// Playing, or Paused when the transport is paused
    async fn mark_started(&self, cue_id: CueId) {
        let mut state = self.state.lock().await;
        let paused = *self.paused.borrow();
        let status = if paused { CueStatus::Paused } else { CueStatus::Playing };
        state.set_status(cue_id, status, &self.events);
    }

    async fn is_cue_paused(&self, cue_id: CueId) -> bool {
        let state = self.state.lock().await;
        state.cue(cue_id).is_some_and(|c| c.status == CueStatus::Paused)
    }

    /// Load audio material, tracking Loading/Ready/Error on the cue
    pub(super) async fn load_media(&self, cue_id: CueId, media: &MediaParams) -> Result<LoadedCue> {
        {
            let mut state = self.state.lock().await;
            if let Some(CueStatus::Ready | CueStatus::Error) = state.cue(cue_id).map(|c| c.status) {
                state.set_status(cue_id, CueStatus::Loading, &self.events);
            }
        }

        let result = self.audio.load_cue(cue_id, media).await;

        let mut state = self.state.lock().await;
        let loading = state
            .cue(cue_id)
            .is_some_and(|c| c.status == CueStatus::Loading);
        match &result {
            Ok(loaded) => {
                debug!(
                    "Cue {} loaded: {} ch @ {} Hz, {:.2}s",
                    cue_id, loaded.channels, loaded.sample_rate, loaded.duration_seconds
                );
                if loading {
                    state.set_status(cue_id, CueStatus::Ready, &self.events);
                }
            }
            Err(e) => {
                if loading {
                    state.set_status(cue_id, CueStatus::Error, &self.events);
                    self.events.emit_lossy(ShowEvent::CueError {
                        cue_id,
                        message: e.to_string(),
                        timestamp: time::now(),
                    });
                }
            }
        }
        result
    }

    async fn run_audio(&self, cue: &Cue, media: &MediaParams, token: &CancellationToken) -> CueOutcome {
        let handle = match self.audio.play_cue(cue.id, PlayOptions::from_media(media)) {
            Ok(handle) => handle,
            Err(e) => return CueOutcome::Failed(e.to_string()),
        };
        if self.is_cue_paused(cue.id).await {
            self.audio.pause_cue(cue.id);
        }

        tokio::select! {
            _ = handle.finished() => CueOutcome::Completed,
            _ = token.cancelled() => CueOutcome::Cancelled,
        }
    }

    /// Picture through the presenter, sound through the audio engine
    ///
    /// A decodable audio track decides completion. Without one the clip
    /// length reported by the presenter does; when that is unknown too the
    /// cue completes once presentation starts and the picture stays up.
    async fn run_video(&self, cue: &Cue, media: &MediaParams, token: &CancellationToken) -> CueOutcome {
        let has_track = if self.audio.has_material(cue.id, &media.file_path) {
            true
        } else {
            match self.audio.load_cue(cue.id, media).await {
                Ok(_) => true,
                Err(e) => {
                    debug!("Video cue {} plays without sound: {}", cue.number, e);
                    false
                }
            }
        };
        if token.is_cancelled() {
            return CueOutcome::Cancelled;
        }

        let soundtrack = if has_track {
            match self.audio.play_cue(cue.id, PlayOptions::from_media(media)) {
                Ok(handle) => Some(handle),
                Err(e) => {
                    warn!("Video cue {} audio track not started: {}", cue.number, e);
                    None
                }
            }
        } else {
            None
        };

        let start = Duration::from_millis(media.start_time_ms);
        let clip_length = match self.video.play(cue.id, &media.file_path, start) {
            Ok(length) => length,
            Err(e) => {
                if soundtrack.is_some() {
                    self.audio.stop_now(cue.id);
                }
                return CueOutcome::Failed(e.to_string());
            }
        };
        if self.is_cue_paused(cue.id).await {
            self.audio.pause_cue(cue.id);
            self.video.pause(cue.id);
        }

        let outcome = match (soundtrack, clip_length) {
            (Some(handle), _) => tokio::select! {
                _ = handle.finished() => CueOutcome::Completed,
                _ = token.cancelled() => CueOutcome::Cancelled,
            },
            (None, Some(length)) if media.loop_playback => {
                debug!("Video cue {} loops ({:?} clip) until stopped", cue.number, length);
                token.cancelled().await;
                CueOutcome::Cancelled
            }
            (None, Some(length)) => {
                let end = media
                    .end_time_ms
                    .map_or(length, |ms| Duration::from_millis(ms).min(length));
                let rate = f64::from(media.rate).max(0.01);
                let remaining = Duration::from_secs_f64(end.saturating_sub(start).as_secs_f64() / rate);
                if self.pausable_sleep(remaining, token).await {
                    CueOutcome::Completed
                } else {
                    CueOutcome::Cancelled
                }
            }
            (None, None) => return CueOutcome::Completed,
        };

        if outcome == CueOutcome::Completed {
            self.video.stop(cue.id);
        }
        outcome
    }

    async fn run_group(
        &self,
        cue: &Cue,
        children: &[CueId],
        mode: GroupMode,
        token: &CancellationToken,
    ) -> CueOutcome {
        debug!("Group cue {}: {} children ({:?})", cue.number, children.len(), mode);
        match mode {
            GroupMode::Sequential => {
                for child in children {
                    if token.is_cancelled() {
                        return CueOutcome::Cancelled;
                    }
                    if let CueOutcome::Failed(reason) = self.run_child(*child, token).await {
                        debug!("Group cue {} continues past failed child: {}", cue.number, reason);
                    }
                }
            }
            GroupMode::Parallel => {
                join_all(children.iter().map(|child| self.run_child(*child, token))).await;
            }
        }

        if token.is_cancelled() {
            CueOutcome::Cancelled
        } else {
            CueOutcome::Completed
        }
    }

    /// Run a group member under its parent's token
    ///
    /// Members never trigger auto-continue.
    async fn run_child(&self, child: CueId, parent: &CancellationToken) -> CueOutcome {
        let started = {
            let mut state = self.state.lock().await;
            match state.cue(child).map(|c| c.number.clone()) {
                None => None,
                Some(_) if state.executing.contains_key(&child) => {
                    warn!("Group member {} is already executing; skipped", child);
                    None
                }
                Some(number) => {
                    let (serial, token) = state.begin_execution(child, Some(parent));
                    self.events.emit_lossy(ShowEvent::CueFired {
                        cue_id: child,
                        number,
                        timestamp: time::now(),
                    });
                    Some((serial, token))
                }
            }
        };
        let Some((serial, token)) = started else {
            return CueOutcome::Cancelled;
        };

        let outcome = self.execute_cue(child, token).await;

        let mut state = self.state.lock().await;
        if state.end_execution(child, serial) {
            self.events.emit_lossy(ShowEvent::CueFinished {
                cue_id: child,
                completed: outcome == CueOutcome::Completed,
                timestamp: time::now(),
            });
        }
        outcome
    }

    /// Sleep for `duration` of unpaused time
    ///
    /// Returns false when `token` is cancelled first.
    pub(super) async fn pausable_sleep(&self, duration: Duration, token: &CancellationToken) -> bool {
        let mut paused = self.paused.subscribe();
        let mut remaining = duration;
        loop {
            if token.is_cancelled() {
                return false;
            }
            let is_paused = *paused.borrow_and_update();
            if is_paused {
                tokio::select! {
                    changed = paused.changed() => {
                        if changed.is_err() {
                            return false;
                        }
                    }
                    _ = token.cancelled() => return false,
                }
                continue;
            }
            if remaining.is_zero() {
                return true;
            }

            let started = Instant::now();
            tokio::select! {
                _ = tokio::time::sleep(remaining) => return true,
                _ = token.cancelled() => return false,
                changed = paused.changed() => {
                    remaining = remaining.saturating_sub(started.elapsed());
                    if changed.is_err() {
                        return false;
                    }
                }
            }
        }
    }
}
