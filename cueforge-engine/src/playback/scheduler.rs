//! Cue scheduler
//!
//! Owns the ordered cue list, the standby playhead and the transport state
//! machine. All state sits behind one async mutex that is never held across
//! an await; each dispatched cue runs as its own task under a cancellation
//! token derived from the current session token, which `stop()` replaces.
//!
//! **GO resolution:**
//! 1. inside the debounce window → ignored
//! 2. paused → resume
//! 3. single-cue mode with anything running → stop everything first
//! 4. target = standby, else the cue after the current one, else the first
//! 5. target already executing → ignored
//! 6. dispatch; the playhead moves to the next sequential cue
//!
//! Group members are skipped when the playhead advances: they run through
//! their group.

use crate::config::EngineConfig;
use crate::engine::{AudioEngine, LoadedCue};
use crate::error::{Error, Result};
use crate::routing::PatchId;
use crate::video::{DisplayOutput, VideoPresenter};
use cueforge_common::cue::{cue_number_between, next_cue_number};
use cueforge_common::events::{EventBus, ShowEvent, TransportState};
use cueforge_common::time;
use cueforge_common::{Cue, CueId, CueParams, CueStatus, CueType, ShowDocument, ShowSettings};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Result of a `go` request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GoOutcome {
    Dispatched(CueId),
    /// Pressed again inside the debounce window
    Debounced,
    /// Transport was paused; go resumed it
    Resumed,
    /// Target cue is still executing
    AlreadyExecuting(CueId),
    /// Empty cue list
    NothingToGo,
}

/// Scheduler snapshot for status reporting
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerStatus {
    pub show_name: String,
    pub transport: TransportState,
    pub is_playing: bool,
    pub is_paused: bool,
    pub standby_cue_id: Option<CueId>,
    pub current_cue_index: Option<usize>,
    pub executing_cue_ids: Vec<CueId>,
    pub cue_count: usize,
    pub unsaved: bool,
    pub single_cue_mode: bool,
    pub auto_continue_enabled: bool,
    pub master_volume: f32,
}

pub(super) struct ShowState {
    pub(super) name: String,
    pub(super) cues: Vec<Cue>,
    pub(super) standby: Option<CueId>,
    pub(super) current_index: Option<usize>,
    pub(super) transport: TransportState,
    /// Cue id → execution serial of the live run
    pub(super) executing: HashMap<CueId, u64>,
    pub(super) next_serial: u64,
    pub(super) last_go: Option<Instant>,
    pub(super) single_cue_mode: bool,
    pub(super) auto_continue_enabled: bool,
    pub(super) master_volume: f32,
    pub(super) unsaved: bool,
    /// Parent of every execution token; replaced on stop
    pub(super) session: CancellationToken,
    pub(super) cue_tokens: HashMap<CueId, CancellationToken>,
    /// Pending auto-continue timers keyed by source cue
    pub(super) timers: HashMap<CueId, JoinHandle<()>>,
    /// Cues paused by the last critical failure
    pub(super) failure_paused: Vec<CueId>,
    pub(super) show_path: Option<PathBuf>,
}

impl ShowState {
    fn new(config: &EngineConfig) -> Self {
        Self {
            name: "Untitled".to_string(),
            cues: Vec::new(),
            standby: None,
            current_index: None,
            transport: TransportState::Stopped,
            executing: HashMap::new(),
            next_serial: 0,
            last_go: None,
            single_cue_mode: config.transport.single_cue_mode,
            auto_continue_enabled: config.transport.auto_continue_enabled,
            master_volume: 1.0,
            unsaved: false,
            session: CancellationToken::new(),
            cue_tokens: HashMap::new(),
            timers: HashMap::new(),
            failure_paused: Vec::new(),
            show_path: None,
        }
    }

    pub(super) fn index_of(&self, id: CueId) -> Option<usize> {
        self.cues.iter().position(|c| c.id == id)
    }

    pub(super) fn cue(&self, id: CueId) -> Option<&Cue> {
        self.cues.iter().find(|c| c.id == id)
    }

    /// Set a cue's status, broadcasting the change
    pub(super) fn set_status(&mut self, id: CueId, status: CueStatus, events: &EventBus) -> bool {
        let Some(cue) = self.cues.iter_mut().find(|c| c.id == id) else {
            return false;
        };
        if cue.status == status {
            return false;
        }
        let old_status = std::mem::replace(&mut cue.status, status);
        debug!("Cue {} {} → {}", cue.number, old_status, status);
        events.emit_lossy(ShowEvent::CueStatusChanged {
            cue_id: id,
            old_status,
            new_status: status,
            timestamp: time::now(),
        });
        true
    }

    pub(super) fn set_transport(&mut self, transport: TransportState, events: &EventBus) {
        if self.transport == transport {
            return;
        }
        let old_state = std::mem::replace(&mut self.transport, transport);
        info!("Transport {} → {}", old_state, transport);
        events.emit_lossy(ShowEvent::TransportChanged {
            old_state,
            new_state: transport,
            timestamp: time::now(),
        });
    }

    pub(super) fn set_standby(&mut self, standby: Option<CueId>, events: &EventBus) {
        if self.standby == standby {
            return;
        }
        self.standby = standby;
        events.emit_lossy(ShowEvent::StandbyChanged {
            cue_id: standby,
            timestamp: time::now(),
        });
    }

    fn group_members(&self) -> HashSet<CueId> {
        self.cues
            .iter()
            .flat_map(|c| c.children().iter().copied())
            .collect()
    }

    /// First non-member cue after `index` (no wrap)
    pub(super) fn next_sequential(&self, index: usize) -> Option<CueId> {
        let members = self.group_members();
        self.cues
            .iter()
            .skip(index + 1)
            .find(|c| !members.contains(&c.id))
            .map(|c| c.id)
    }

    fn first_sequential(&self) -> Option<CueId> {
        let members = self.group_members();
        self.cues.iter().find(|c| !members.contains(&c.id)).map(|c| c.id)
    }

    /// Standby, else the cue after the current one, else the first cue
    fn resolve_go_target(&self) -> Option<CueId> {
        if let Some(standby) = self.standby.filter(|id| self.index_of(*id).is_some()) {
            return Some(standby);
        }
        self.current_index
            .and_then(|index| self.next_sequential(index))
            .or_else(|| self.first_sequential())
    }

    /// Cue an auto-continue from `source` should dispatch
    pub(super) fn follow_target(&self, source: CueId) -> Result<Option<CueId>> {
        let index = self.index_of(source).ok_or(Error::TargetNotFound(source))?;
        match self.cues[index].auto_follow_target {
            Some(target) if self.index_of(target).is_some() => Ok(Some(target)),
            Some(target) => Err(Error::TargetNotFound(target)),
            None => Ok(self.next_sequential(index)),
        }
    }

    /// Register a run of `cue_id`; returns its serial and token
    pub(super) fn begin_execution(
        &mut self,
        cue_id: CueId,
        parent: Option<&CancellationToken>,
    ) -> (u64, CancellationToken) {
        let token = parent.unwrap_or(&self.session).child_token();
        self.next_serial += 1;
        self.executing.insert(cue_id, self.next_serial);
        self.cue_tokens.insert(cue_id, token.clone());
        (self.next_serial, token)
    }

    /// Drop the run's entry unless a newer run replaced it
    pub(super) fn end_execution(&mut self, cue_id: CueId, serial: u64) -> bool {
        if self.executing.get(&cue_id) != Some(&serial) {
            return false;
        }
        self.executing.remove(&cue_id);
        self.cue_tokens.remove(&cue_id);
        true
    }

    fn anything_running(&self) -> bool {
        !self.executing.is_empty()
            || !self.timers.is_empty()
            || self.cues.iter().any(|c| c.status.is_active())
    }

    /// Clear the transport once nothing is executing or pending
    pub(super) fn settle_transport(&mut self, events: &EventBus) {
        if self.transport == TransportState::Stopped || self.anything_running() {
            return;
        }
        self.set_transport(TransportState::Stopped, events);
    }

    /// Ids of `root` and every cue nested under it
    fn subtree(&self, root: CueId) -> Vec<CueId> {
        let mut seen = HashSet::new();
        let mut pending = vec![root];
        let mut ordered = Vec::new();
        while let Some(id) = pending.pop() {
            if !seen.insert(id) {
                continue;
            }
            ordered.push(id);
            if let Some(cue) = self.cue(id) {
                pending.extend(cue.children().iter().copied());
            }
        }
        ordered
    }

    fn list_changed(&mut self, events: &EventBus) {
        self.unsaved = true;
        events.emit_lossy(ShowEvent::CueListChanged {
            cue_count: self.cues.len(),
            timestamp: time::now(),
        });
    }
}

/// Show-level transport over a cue list
///
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct CueScheduler {
    pub(super) state: Arc<Mutex<ShowState>>,
    pub(super) audio: Arc<AudioEngine>,
    pub(super) video: Arc<dyn VideoPresenter>,
    pub(super) display: Arc<dyn DisplayOutput>,
    pub(super) events: EventBus,
    /// Global pause flag observed by every pausable wait
    pub(super) paused: Arc<watch::Sender<bool>>,
    debounce: Duration,
}

impl CueScheduler {
    pub fn new(
        config: &EngineConfig,
        audio: Arc<AudioEngine>,
        video: Arc<dyn VideoPresenter>,
        display: Arc<dyn DisplayOutput>,
    ) -> Self {
        let (paused, _) = watch::channel(false);
        Self {
            state: Arc::new(Mutex::new(ShowState::new(config))),
            audio,
            video,
            display,
            events: EventBus::new(config.transport.event_capacity),
            paused: Arc::new(paused),
            debounce: config.go_debounce(),
        }
    }

    pub fn audio(&self) -> &Arc<AudioEngine> {
        &self.audio
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ShowEvent> {
        self.events.subscribe()
    }

    pub(super) fn set_paused_flag(&self, paused: bool) {
        self.paused.send_if_modified(|current| {
            let changed = *current != paused;
            *current = paused;
            changed
        });
    }

    // ---- transport ----

    /// Fire the standby cue
    pub async fn go(&self) -> GoOutcome {
        let mut state = self.state.lock().await;

        let now = Instant::now();
        if state
            .last_go
            .is_some_and(|last| now.saturating_duration_since(last) < self.debounce)
        {
            debug!("GO ignored inside debounce window");
            return GoOutcome::Debounced;
        }
        state.last_go = Some(now);

        if state.transport == TransportState::Paused {
            self.resume_locked(&mut state);
            return GoOutcome::Resumed;
        }

        if state.single_cue_mode && state.anything_running() {
            info!("Single-cue mode: stopping running cues before GO");
            self.stop_locked(&mut state);
        }

        let Some(target) = state.resolve_go_target() else {
            debug!("GO with an empty cue list");
            return GoOutcome::NothingToGo;
        };

        match self.dispatch_locked(&mut state, target, vec![target]) {
            Ok(()) => GoOutcome::Dispatched(target),
            Err(Error::AlreadyExecuting(id)) => {
                debug!("GO ignored: cue {} is already executing", id);
                GoOutcome::AlreadyExecuting(id)
            }
            Err(e) => {
                warn!("GO failed: {}", e);
                GoOutcome::NothingToGo
            }
        }
    }

    /// Fire a specific cue now, bypassing the debounce
    pub async fn go_to(&self, cue_id: CueId) -> Result<GoOutcome> {
        let mut state = self.state.lock().await;
        if state.index_of(cue_id).is_none() {
            return Err(Error::TargetNotFound(cue_id));
        }
        match self.dispatch_locked(&mut state, cue_id, vec![cue_id]) {
            Ok(()) => Ok(GoOutcome::Dispatched(cue_id)),
            Err(Error::AlreadyExecuting(id)) => Ok(GoOutcome::AlreadyExecuting(id)),
            Err(e) => Err(e),
        }
    }

    /// Arm a cue for the next GO (None clears the playhead)
    pub async fn set_standby(&self, cue_id: Option<CueId>) -> Result<()> {
        let mut state = self.state.lock().await;
        if let Some(id) = cue_id {
            if state.index_of(id).is_none() {
                return Err(Error::TargetNotFound(id));
            }
        }
        state.set_standby(cue_id, &self.events);
        Ok(())
    }

    /// Stop everything unconditionally
    pub async fn stop(&self) {
        let mut state = self.state.lock().await;
        self.stop_locked(&mut state);
    }

    pub(super) fn stop_locked(&self, state: &mut ShowState) {
        for (_, timer) in state.timers.drain() {
            timer.abort();
        }
        state.session.cancel();
        state.session = CancellationToken::new();
        state.cue_tokens.clear();
        state.executing.clear();
        state.failure_paused.clear();

        let active: Vec<CueId> = state
            .cues
            .iter()
            .filter(|c| c.status.is_active())
            .map(|c| c.id)
            .collect();
        for id in &active {
            state.set_status(*id, CueStatus::Ready, &self.events);
        }

        self.audio.stop_all();
        self.video.stop_all();
        self.display.clear_all();
        self.set_paused_flag(false);
        state.set_transport(TransportState::Stopped, &self.events);
        info!("STOP ({} cues reset)", active.len());
    }

    /// Pause every playing cue; the playhead is untouched
    pub async fn pause(&self) -> Vec<CueId> {
        let mut state = self.state.lock().await;
        self.pause_locked(&mut state)
    }

    pub(super) fn pause_locked(&self, state: &mut ShowState) -> Vec<CueId> {
        let playing: Vec<(CueId, CueType)> = state
            .cues
            .iter()
            .filter(|c| c.status == CueStatus::Playing)
            .map(|c| (c.id, c.cue_type()))
            .collect();
        if playing.is_empty() {
            return Vec::new();
        }

        for (id, cue_type) in &playing {
            state.set_status(*id, CueStatus::Paused, &self.events);
            self.audio.pause_cue(*id);
            if *cue_type == CueType::Video {
                self.video.pause(*id);
            }
        }
        self.set_paused_flag(true);
        state.set_transport(TransportState::Paused, &self.events);
        info!("PAUSE ({} cues)", playing.len());
        playing.into_iter().map(|(id, _)| id).collect()
    }

    /// Resume every paused cue
    pub async fn resume(&self) -> Vec<CueId> {
        let mut state = self.state.lock().await;
        self.resume_locked(&mut state)
    }

    pub(super) fn resume_locked(&self, state: &mut ShowState) -> Vec<CueId> {
        let paused: Vec<CueId> = state
            .cues
            .iter()
            .filter(|c| c.status == CueStatus::Paused)
            .map(|c| c.id)
            .collect();
        self.resume_cues(state, &paused)
    }

    /// Resume the listed cues that are still paused
    fn resume_cues(&self, state: &mut ShowState, ids: &[CueId]) -> Vec<CueId> {
        let mut resumed = Vec::new();
        for id in ids {
            let Some(cue) = state.cue(*id) else {
                continue;
            };
            if cue.status != CueStatus::Paused {
                continue;
            }
            let cue_type = cue.cue_type();
            state.set_status(*id, CueStatus::Playing, &self.events);
            self.audio.resume_cue(*id);
            if cue_type == CueType::Video {
                self.video.resume(*id);
            }
            resumed.push(*id);
        }

        let still_paused = state.cues.iter().any(|c| c.status == CueStatus::Paused);
        if !still_paused {
            self.set_paused_flag(false);
            if state.transport == TransportState::Paused {
                if state.anything_running() {
                    state.set_transport(TransportState::Playing, &self.events);
                } else {
                    state.set_transport(TransportState::Stopped, &self.events);
                }
            }
        }
        if !resumed.is_empty() {
            info!("RESUME ({} cues)", resumed.len());
        }
        resumed
    }

    /// Stop one cue (and its group members) using its fade-out time
    pub async fn stop_cue(&self, cue_id: CueId) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.index_of(cue_id).is_none() {
            return Err(Error::TargetNotFound(cue_id));
        }

        for id in state.subtree(cue_id) {
            if let Some(token) = state.cue_tokens.get(&id) {
                token.cancel();
            }
            if let Some(timer) = state.timers.remove(&id) {
                timer.abort();
            }
            let Some(cue) = state.cue(id) else {
                continue;
            };
            if let Some(media) = cue.params.media() {
                self.audio
                    .stop_cue(id, Duration::from_millis(media.fade_out_ms));
            }
            if cue.cue_type() == CueType::Video {
                self.video.stop(id);
            }
            if cue.status.is_active() {
                state.set_status(id, CueStatus::Ready, &self.events);
            }
        }
        state.settle_transport(&self.events);
        Ok(())
    }

    /// Clear a cue's error status
    pub async fn acknowledge_error(&self, cue_id: CueId) -> Result<()> {
        let mut state = self.state.lock().await;
        match state.cue(cue_id).map(|c| c.status) {
            None => Err(Error::TargetNotFound(cue_id)),
            Some(CueStatus::Error) => {
                state.set_status(cue_id, CueStatus::Ready, &self.events);
                Ok(())
            }
            Some(status) => Err(Error::InvalidState(format!(
                "Cue {} is {}, not in error",
                cue_id, status
            ))),
        }
    }

    /// Decode a media cue ahead of GO
    pub async fn prepare_cue(&self, cue_id: CueId) -> Result<LoadedCue> {
        let media = {
            let state = self.state.lock().await;
            let cue = state.cue(cue_id).ok_or(Error::TargetNotFound(cue_id))?;
            cue.params
                .media()
                .cloned()
                .ok_or_else(|| Error::InvalidState(format!("Cue {} has no media", cue.number)))?
        };
        self.load_media(cue_id, &media).await
    }

    // ---- cue list ----

    /// Append a new cue with the next ordinal and type defaults
    pub async fn add_cue(&self, cue_type: CueType) -> Cue {
        let mut state = self.state.lock().await;
        let number = next_cue_number(state.cues.iter().map(|c| c.number.as_str()));
        let cue = Cue::new(cue_type, number);
        state.cues.push(cue.clone());
        state.list_changed(&self.events);
        debug!("Added {} cue {}", cue_type, cue.number);
        cue
    }

    /// Append a fully built cue
    pub async fn push_cue(&self, mut cue: Cue) -> Result<CueId> {
        let mut state = self.state.lock().await;
        if state.index_of(cue.id).is_some() {
            return Err(Error::InvalidState(format!("Duplicate cue id {}", cue.id)));
        }
        cue.status = CueStatus::Ready;
        let id = cue.id;
        state.cues.push(cue);
        state.list_changed(&self.events);
        Ok(id)
    }

    /// Insert a new cue after `after` (None = at the top) with a fractional number
    pub async fn insert_cue_after(&self, after: Option<CueId>, cue_type: CueType) -> Result<Cue> {
        let mut state = self.state.lock().await;
        let position = match after {
            Some(id) => state.index_of(id).ok_or(Error::TargetNotFound(id))? + 1,
            None => 0,
        };
        let previous = position
            .checked_sub(1)
            .and_then(|i| state.cues.get(i))
            .map(|c| c.number.as_str());
        let next = state.cues.get(position).map(|c| c.number.as_str());
        let number = cue_number_between(previous, next, state.cues.iter().map(|c| c.number.as_str()));
        let cue = Cue::new(cue_type, number);

        state.cues.insert(position, cue.clone());
        if let Some(current) = state.current_index {
            if current >= position {
                state.current_index = Some(current + 1);
            }
        }
        state.list_changed(&self.events);
        Ok(cue)
    }

    /// Edit a cue in place; always marks the show unsaved
    ///
    /// Id and status are scheduler-owned and survive the edit. An
    /// auto-follow target that names no cue rejects the edit.
    pub async fn update_cue(&self, cue_id: CueId, edit: impl FnOnce(&mut Cue)) -> Result<Cue> {
        let mut state = self.state.lock().await;
        let index = state.index_of(cue_id).ok_or(Error::TargetNotFound(cue_id))?;
        let before = state.cues[index].clone();

        let mut edited = before.clone();
        edit(&mut edited);
        edited.id = before.id;
        edited.status = before.status;
        if let Some(target) = edited.auto_follow_target {
            if state.index_of(target).is_none() {
                return Err(Error::TargetNotFound(target));
            }
        }

        if let (Some(old), Some(new)) = (before.params.media(), edited.params.media()) {
            if old.file_path != new.file_path && !self.audio.is_playing(cue_id) {
                self.audio.unload_cue(cue_id);
            }
            if old.patch_id != new.patch_id {
                if let Err(e) = self.audio.set_cue_patch(cue_id, new.patch_id) {
                    warn!("Cue {} keeps its current patch: {}", edited.number, e);
                }
            }
        } else if before.cue_type() != edited.cue_type() {
            self.audio.unload_cue(cue_id);
        }

        state.cues[index] = edited.clone();
        state.list_changed(&self.events);
        Ok(edited)
    }

    /// Remove a cue, force-stopping it
    ///
    /// References to it are cleared: auto-follow targets (which also disables
    /// the referrer's auto-continue) and group membership.
    pub async fn remove_cue(&self, cue_id: CueId) -> Result<Cue> {
        let mut state = self.state.lock().await;
        let index = state.index_of(cue_id).ok_or(Error::TargetNotFound(cue_id))?;

        if let Some(token) = state.cue_tokens.remove(&cue_id) {
            token.cancel();
        }
        state.executing.remove(&cue_id);
        if let Some(timer) = state.timers.remove(&cue_id) {
            timer.abort();
        }
        self.audio.unload_cue(cue_id);
        self.video.stop(cue_id);

        let removed = state.cues.remove(index);
        for cue in &mut state.cues {
            if cue.auto_follow_target == Some(cue_id) {
                cue.auto_follow_target = None;
                cue.auto_continue = false;
            }
            if let CueParams::Group { children, .. } = &mut cue.params {
                children.retain(|child| *child != cue_id);
            }
        }

        state.current_index = match state.current_index {
            Some(current) if current > index => Some(current - 1),
            Some(current) if current == index => current.checked_sub(1),
            other => other,
        };
        if state.standby == Some(cue_id) {
            let next = state.cues.get(index).map(|c| c.id);
            state.set_standby(next, &self.events);
        }

        state.settle_transport(&self.events);
        state.list_changed(&self.events);
        info!("Removed cue {} ({})", removed.number, removed.id);
        Ok(removed)
    }

    /// Move a cue to `to_index` (clamped); the current cue stays current
    pub async fn move_cue(&self, cue_id: CueId, to_index: usize) -> Result<()> {
        let mut state = self.state.lock().await;
        let from = state.index_of(cue_id).ok_or(Error::TargetNotFound(cue_id))?;
        let current_id = state.current_index.and_then(|i| state.cues.get(i)).map(|c| c.id);

        let cue = state.cues.remove(from);
        let to = to_index.min(state.cues.len());
        state.cues.insert(to, cue);

        state.current_index = current_id.and_then(|id| state.index_of(id));
        state.list_changed(&self.events);
        Ok(())
    }

    pub async fn cue(&self, cue_id: CueId) -> Option<Cue> {
        self.state.lock().await.cue(cue_id).cloned()
    }

    pub async fn cues(&self) -> Vec<Cue> {
        self.state.lock().await.cues.clone()
    }

    // ---- settings ----

    pub async fn set_single_cue_mode(&self, enabled: bool) {
        let mut state = self.state.lock().await;
        state.single_cue_mode = enabled;
        state.unsaved = true;
    }

    pub async fn set_auto_continue_enabled(&self, enabled: bool) {
        let mut state = self.state.lock().await;
        state.auto_continue_enabled = enabled;
        state.unsaved = true;
    }

    pub async fn set_master_volume(&self, volume: f32) -> Result<f32> {
        let applied = self.audio.set_master_volume(volume)?;
        let mut state = self.state.lock().await;
        state.master_volume = applied;
        state.unsaved = true;
        self.events.emit_lossy(ShowEvent::MasterVolumeChanged {
            volume: applied,
            timestamp: time::now(),
        });
        Ok(applied)
    }

    /// Delete an output patch; cues on it move to the default patch
    pub async fn delete_patch(&self, patch_id: PatchId) -> Result<usize> {
        let mut state = self.state.lock().await;
        let moved = self.audio.delete_patch(patch_id, &mut state.cues)?;
        state.list_changed(&self.events);
        Ok(moved)
    }

    // ---- status ----

    pub async fn status(&self) -> SchedulerStatus {
        let state = self.state.lock().await;
        let mut executing: Vec<CueId> = state.executing.keys().copied().collect();
        executing.sort_by_key(|id| state.index_of(*id));
        SchedulerStatus {
            show_name: state.name.clone(),
            transport: state.transport,
            is_playing: state.transport == TransportState::Playing,
            is_paused: state.transport == TransportState::Paused,
            standby_cue_id: state.standby,
            current_cue_index: state.current_index,
            executing_cue_ids: executing,
            cue_count: state.cues.len(),
            unsaved: state.unsaved,
            single_cue_mode: state.single_cue_mode,
            auto_continue_enabled: state.auto_continue_enabled,
            master_volume: state.master_volume,
        }
    }

    pub async fn is_playing(&self) -> bool {
        self.state.lock().await.transport == TransportState::Playing
    }

    pub async fn is_paused(&self) -> bool {
        self.state.lock().await.transport == TransportState::Paused
    }

    pub async fn is_executing(&self, cue_id: CueId) -> bool {
        self.state.lock().await.executing.contains_key(&cue_id)
    }

    // ---- failure handling ----

    /// Pause playing cues after an output failure, remembering them
    pub async fn report_critical_failure(&self, reason: &str) -> Vec<CueId> {
        let mut state = self.state.lock().await;
        let paused = self.pause_locked(&mut state);
        warn!("Critical output failure: {} ({} cues paused)", reason, paused.len());
        for id in &paused {
            if !state.failure_paused.contains(id) {
                state.failure_paused.push(*id);
            }
        }
        self.events.emit_lossy(ShowEvent::CriticalFailure {
            reason: reason.to_string(),
            paused_cues: paused.clone(),
            timestamp: time::now(),
        });
        paused
    }

    /// Resume exactly the cues the last failure paused
    pub async fn recover_from_failure(&self) -> Vec<CueId> {
        let mut state = self.state.lock().await;
        let ids = std::mem::take(&mut state.failure_paused);
        let resumed = self.resume_cues(&mut state, &ids);
        info!("Recovered from output failure ({} cues resumed)", resumed.len());
        self.events.emit_lossy(ShowEvent::Recovered {
            resumed_cues: resumed.clone(),
            timestamp: time::now(),
        });
        resumed
    }

    // ---- show documents ----

    /// Replace the show with `document`, stopping everything first
    pub async fn load_document(&self, mut document: ShowDocument) -> Result<()> {
        document.validate()?;
        document.normalize();

        let mut state = self.state.lock().await;
        self.stop_locked(&mut state);
        for cue in &state.cues {
            self.audio.unload_cue(cue.id);
        }
        self.audio.load_patches(&document.patches)?;
        let master = self.audio.set_master_volume(document.settings.master_volume)?;

        state.name = document.name;
        state.cues = document.cues;
        state.current_index = document.settings.current_cue_index;
        state.single_cue_mode = document.settings.single_cue_mode;
        state.auto_continue_enabled = document.settings.auto_continue_enabled;
        state.master_volume = master;
        state.last_go = None;
        state.unsaved = false;
        state.set_standby(None, &self.events);

        info!("Loaded show '{}' ({} cues)", state.name, state.cues.len());
        self.events.emit_lossy(ShowEvent::ShowLoaded {
            name: state.name.clone(),
            cue_count: state.cues.len(),
            timestamp: time::now(),
        });
        Ok(())
    }

    /// Snapshot the show, including live routing and patches
    pub async fn to_document(&self) -> ShowDocument {
        let state = self.state.lock().await;
        let mut document = ShowDocument::new(state.name.clone());
        document.cues = state
            .cues
            .iter()
            .cloned()
            .map(|mut cue| {
                let id = cue.id;
                if let Some(media) = cue.params.media_mut() {
                    if let Some(routing) = self.audio.cue_routing(id) {
                        media.routing = Some(routing);
                    }
                }
                cue
            })
            .collect();
        document.settings = ShowSettings {
            current_cue_index: state.current_index,
            master_volume: state.master_volume,
            auto_continue_enabled: state.auto_continue_enabled,
            single_cue_mode: state.single_cue_mode,
        };
        document.patches = self.audio.patch_records();
        document
    }

    pub async fn open_show(&self, path: &Path) -> Result<()> {
        let document = ShowDocument::load(path).await?;
        self.load_document(document).await?;
        self.state.lock().await.show_path = Some(path.to_path_buf());
        Ok(())
    }

    /// Save to `path`, or to the file the show was opened from
    pub async fn save_show(&self, path: Option<&Path>) -> Result<PathBuf> {
        let target = match path {
            Some(path) => path.to_path_buf(),
            None => self
                .state
                .lock()
                .await
                .show_path
                .clone()
                .ok_or_else(|| Error::InvalidState("No show file to save to".to_string()))?,
        };

        let document = self.to_document().await;
        document.save(&target).await?;

        let mut state = self.state.lock().await;
        state.unsaved = false;
        state.show_path = Some(target.clone());
        self.events.emit_lossy(ShowEvent::ShowSaved {
            name: state.name.clone(),
            timestamp: time::now(),
        });
        Ok(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::sink::ClockedSink;
    use crate::audio::source::MemorySource;
    use crate::fade::FadeEngine;
    use crate::video::{NullDisplay, NullPresenter};
    use cueforge_common::GroupMode;
    use uuid::Uuid;

    fn scheduler() -> CueScheduler {
        let config = EngineConfig::default();
        let audio = AudioEngine::new(
            &config,
            Arc::new(MemorySource::new()),
            Arc::new(ClockedSink::new(48_000, 480, 2)),
            FadeEngine::new(config.fade_tick_interval()),
        );
        CueScheduler::new(
            &config,
            audio,
            Arc::new(NullPresenter::new()),
            Arc::new(NullDisplay::new()),
        )
    }

    fn wait_cue(number: &str, duration_ms: u64) -> Cue {
        let mut cue = Cue::new(CueType::Wait, number);
        cue.params = CueParams::Wait { duration_ms };
        cue
    }

    #[test]
    fn test_next_sequential_skips_group_members() {
        let mut state = ShowState::new(&EngineConfig::default());
        let member = wait_cue("2", 10);
        let after = wait_cue("3", 10);
        let mut group = Cue::new(CueType::Group, "1");
        group.params = CueParams::Group {
            children: vec![member.id],
            mode: GroupMode::Parallel,
        };
        let (group_id, after_id) = (group.id, after.id);
        state.cues = vec![group, member, after];

        assert_eq!(state.next_sequential(0), Some(after_id));
        assert_eq!(state.next_sequential(2), None);
        assert_eq!(state.resolve_go_target(), Some(group_id));

        state.current_index = Some(2);
        assert_eq!(state.resolve_go_target(), Some(group_id));
    }

    #[test]
    fn test_stale_serial_does_not_clear_newer_execution() {
        let mut state = ShowState::new(&EngineConfig::default());
        let id = Uuid::new_v4();
        let (first, _) = state.begin_execution(id, None);
        let (second, _) = state.begin_execution(id, None);

        assert!(!state.end_execution(id, first));
        assert!(state.executing.contains_key(&id));
        assert!(state.end_execution(id, second));
        assert!(state.executing.is_empty());
    }

    #[test]
    fn test_follow_target_missing_is_an_error() {
        let mut state = ShowState::new(&EngineConfig::default());
        let mut source = wait_cue("1", 10);
        let ghost = Uuid::new_v4();
        source.auto_follow_target = Some(ghost);
        let source_id = source.id;
        state.cues = vec![source];

        assert!(matches!(
            state.follow_target(source_id),
            Err(Error::TargetNotFound(id)) if id == ghost
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_go_on_empty_list() {
        let scheduler = scheduler();
        assert_eq!(scheduler.go().await, GoOutcome::NothingToGo);
        assert!(!scheduler.is_playing().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_cue_runs_and_settles() {
        let scheduler = scheduler();
        let id = scheduler.push_cue(wait_cue("1", 1000)).await.unwrap();

        assert_eq!(scheduler.go().await, GoOutcome::Dispatched(id));
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(scheduler.is_executing(id).await);
        assert_eq!(scheduler.cue(id).await.unwrap().status, CueStatus::Playing);
        assert!(scheduler.is_playing().await);

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert!(!scheduler.is_executing(id).await);
        assert_eq!(scheduler.cue(id).await.unwrap().status, CueStatus::Ready);
        assert!(!scheduler.is_playing().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_go_debounce_and_reentrancy() {
        let scheduler = scheduler();
        let id = scheduler.push_cue(wait_cue("1", 1000)).await.unwrap();

        assert_eq!(scheduler.go().await, GoOutcome::Dispatched(id));
        assert_eq!(scheduler.go().await, GoOutcome::Debounced);

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(scheduler.go().await, GoOutcome::AlreadyExecuting(id));
        assert_eq!(scheduler.status().await.executing_cue_ids, vec![id]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_holds_remaining_wait() {
        let scheduler = scheduler();
        let id = scheduler.push_cue(wait_cue("1", 1000)).await.unwrap();
        scheduler.go().await;

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(scheduler.pause().await, vec![id]);
        assert!(scheduler.is_paused().await);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(scheduler.is_executing(id).await);
        assert_eq!(scheduler.cue(id).await.unwrap().status, CueStatus::Paused);

        assert_eq!(scheduler.resume().await, vec![id]);
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(scheduler.is_executing(id).await);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!scheduler.is_executing(id).await);
        assert_eq!(scheduler.cue(id).await.unwrap().status, CueStatus::Ready);
    }

    #[tokio::test(start_paused = true)]
    async fn test_go_while_paused_resumes() {
        let scheduler = scheduler();
        scheduler.push_cue(wait_cue("1", 1000)).await.unwrap();
        scheduler.go().await;
        tokio::time::sleep(Duration::from_millis(300)).await;
        scheduler.pause().await;

        assert_eq!(scheduler.go().await, GoOutcome::Resumed);
        assert!(scheduler.is_playing().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_standby_advances_on_go() {
        let scheduler = scheduler();
        let first = scheduler.push_cue(wait_cue("1", 100)).await.unwrap();
        let second = scheduler.push_cue(wait_cue("2", 100)).await.unwrap();

        scheduler.go().await;
        let status = scheduler.status().await;
        assert_eq!(status.current_cue_index, Some(0));
        assert_eq!(status.standby_cue_id, Some(second));

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(scheduler.go().await, GoOutcome::Dispatched(second));
        assert_eq!(scheduler.status().await.standby_cue_id, None);

        scheduler.set_standby(Some(first)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(scheduler.go().await, GoOutcome::Dispatched(first));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_cue_cancels_one_execution() {
        let scheduler = scheduler();
        let id = scheduler.push_cue(wait_cue("1", 5000)).await.unwrap();
        scheduler.go().await;
        tokio::time::sleep(Duration::from_millis(100)).await;

        scheduler.stop_cue(id).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!scheduler.is_executing(id).await);
        assert_eq!(scheduler.cue(id).await.unwrap().status, CueStatus::Ready);
        assert!(!scheduler.is_playing().await);
    }

    #[tokio::test]
    async fn test_insert_cue_after_numbers_between() {
        let scheduler = scheduler();
        let first = scheduler.add_cue(CueType::Wait).await;
        scheduler.add_cue(CueType::Wait).await;

        let inserted = scheduler.insert_cue_after(Some(first.id), CueType::Audio).await.unwrap();
        assert_eq!(inserted.number, "1.5");
        let numbers: Vec<String> = scheduler.cues().await.into_iter().map(|c| c.number).collect();
        assert_eq!(numbers, vec!["1", "1.5", "2"]);
        assert!(scheduler.status().await.unsaved);
    }

    #[tokio::test]
    async fn test_insert_cue_after_skips_duplicate_numbers() {
        let scheduler = scheduler();
        let first = scheduler.add_cue(CueType::Wait).await;
        let second = scheduler.add_cue(CueType::Wait).await;
        scheduler.add_cue(CueType::Wait).await;
        scheduler.update_cue(second.id, |c| c.number = "1".to_string()).await.unwrap();

        let inserted = scheduler.insert_cue_after(Some(first.id), CueType::Wait).await.unwrap();
        assert_eq!(inserted.number, "1.5");
        let again = scheduler.insert_cue_after(Some(first.id), CueType::Wait).await.unwrap();
        assert_eq!(again.number, "1.25");
    }

    #[tokio::test]
    async fn test_update_cue_rejects_missing_follow_target() {
        let scheduler = scheduler();
        let cue = scheduler.add_cue(CueType::Wait).await;
        let ghost = Uuid::new_v4();

        let result = scheduler
            .update_cue(cue.id, |c| c.auto_follow_target = Some(ghost))
            .await;
        assert!(matches!(result, Err(Error::TargetNotFound(id)) if id == ghost));
        assert_eq!(scheduler.cue(cue.id).await.unwrap().auto_follow_target, None);

        let renamed = scheduler
            .update_cue(cue.id, |c| {
                c.name = "House to half".to_string();
                c.id = Uuid::new_v4();
            })
            .await
            .unwrap();
        assert_eq!(renamed.id, cue.id);
        assert_eq!(renamed.name, "House to half");
    }

    #[tokio::test]
    async fn test_remove_cue_clears_references() {
        let scheduler = scheduler();
        let target = scheduler.add_cue(CueType::Wait).await;
        let mut source = wait_cue("2", 10);
        source.auto_continue = true;
        source.auto_follow_target = Some(target.id);
        let source_id = scheduler.push_cue(source).await.unwrap();
        let mut group = Cue::new(CueType::Group, "3");
        group.params = CueParams::Group {
            children: vec![target.id],
            mode: GroupMode::Sequential,
        };
        let group_id = scheduler.push_cue(group).await.unwrap();

        scheduler.remove_cue(target.id).await.unwrap();

        let source = scheduler.cue(source_id).await.unwrap();
        assert_eq!(source.auto_follow_target, None);
        assert!(!source.auto_continue);
        assert!(scheduler.cue(group_id).await.unwrap().children().is_empty());
        assert_eq!(scheduler.cues().await.len(), 2);
    }

    #[tokio::test]
    async fn test_acknowledge_error_requires_error_status() {
        let scheduler = scheduler();
        let cue = scheduler.add_cue(CueType::Wait).await;
        assert!(matches!(
            scheduler.acknowledge_error(cue.id).await,
            Err(Error::InvalidState(_))
        ));

        scheduler.state.lock().await.set_status(cue.id, CueStatus::Error, &scheduler.events);
        scheduler.acknowledge_error(cue.id).await.unwrap();
        assert_eq!(scheduler.cue(cue.id).await.unwrap().status, CueStatus::Ready);
    }

    #[tokio::test]
    async fn test_document_round_trip_keeps_settings() {
        let scheduler = scheduler();
        scheduler.add_cue(CueType::Wait).await;
        scheduler.set_single_cue_mode(true).await;
        scheduler.set_master_volume(0.5).await.unwrap();

        let document = scheduler.to_document().await;
        assert!(document.settings.single_cue_mode);
        assert_eq!(document.settings.master_volume, 0.5);

        let other = self::scheduler();
        other.load_document(document).await.unwrap();
        let status = other.status().await;
        assert_eq!(status.cue_count, 1);
        assert!(status.single_cue_mode);
        assert!(!status.unsaved);
        assert_eq!(other.audio().master_volume(), 0.5);
    }
}
