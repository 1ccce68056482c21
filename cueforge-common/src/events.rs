//! Event types for the CueForge event system
//!
//! Provides the shared [`ShowEvent`] definitions and the [`EventBus`] the
//! scheduler and engine broadcast on. Observers (command bridge, logging,
//! tests) subscribe independently; a slow subscriber only loses its own
//! backlog.

use crate::cue::{CueId, CueStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast;

/// Transport state of the cue scheduler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportState {
    #[default]
    Stopped,
    Playing,
    Paused,
}

impl fmt::Display for TransportState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportState::Stopped => write!(f, "stopped"),
            TransportState::Playing => write!(f, "playing"),
            TransportState::Paused => write!(f, "paused"),
        }
    }
}

/// Show control events
///
/// Every status or transport change made by the scheduler is broadcast as one
/// of these. Serialized with an internal `type` tag for the command bridge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ShowEvent {
    /// Transport moved between stopped, playing and paused
    TransportChanged {
        old_state: TransportState,
        new_state: TransportState,
        timestamp: DateTime<Utc>,
    },

    /// A cue changed lifecycle status
    CueStatusChanged {
        cue_id: CueId,
        old_status: CueStatus,
        new_status: CueStatus,
        timestamp: DateTime<Utc>,
    },

    /// A cue was dispatched by go, auto-continue or a group
    CueFired {
        cue_id: CueId,
        number: String,
        timestamp: DateTime<Utc>,
    },

    /// A cue execution settled
    CueFinished {
        cue_id: CueId,
        /// False when the cue was cancelled or failed
        completed: bool,
        timestamp: DateTime<Utc>,
    },

    /// A cue failed to load or play
    CueError {
        cue_id: CueId,
        message: String,
        timestamp: DateTime<Utc>,
    },

    /// The playhead moved
    StandbyChanged {
        cue_id: Option<CueId>,
        timestamp: DateTime<Utc>,
    },

    /// Cues were added, removed, reordered or edited
    CueListChanged {
        cue_count: usize,
        timestamp: DateTime<Utc>,
    },

    MasterVolumeChanged {
        volume: f32,
        timestamp: DateTime<Utc>,
    },

    ShowLoaded {
        name: String,
        cue_count: usize,
        timestamp: DateTime<Utc>,
    },

    ShowSaved {
        name: String,
        timestamp: DateTime<Utc>,
    },

    /// Output failure; listed cues were paused in place
    CriticalFailure {
        reason: String,
        paused_cues: Vec<CueId>,
        timestamp: DateTime<Utc>,
    },

    /// Recovery resumed the cues paused by the last critical failure
    Recovered {
        resumed_cues: Vec<CueId>,
        timestamp: DateTime<Utc>,
    },
}

impl ShowEvent {
    /// Event type name as used in the serialized `type` tag
    pub fn event_type(&self) -> &'static str {
        match self {
            ShowEvent::TransportChanged { .. } => "TransportChanged",
            ShowEvent::CueStatusChanged { .. } => "CueStatusChanged",
            ShowEvent::CueFired { .. } => "CueFired",
            ShowEvent::CueFinished { .. } => "CueFinished",
            ShowEvent::CueError { .. } => "CueError",
            ShowEvent::StandbyChanged { .. } => "StandbyChanged",
            ShowEvent::CueListChanged { .. } => "CueListChanged",
            ShowEvent::MasterVolumeChanged { .. } => "MasterVolumeChanged",
            ShowEvent::ShowLoaded { .. } => "ShowLoaded",
            ShowEvent::ShowSaved { .. } => "ShowSaved",
            ShowEvent::CriticalFailure { .. } => "CriticalFailure",
            ShowEvent::Recovered { .. } => "Recovered",
        }
    }
}

/// Broadcast bus for [`ShowEvent`]s
///
/// Wraps `tokio::sync::broadcast`. Cloning shares the same channel.
///
/// ```
/// use cueforge_common::events::{EventBus, ShowEvent, TransportState};
///
/// let bus = EventBus::new(100);
/// let mut rx = bus.subscribe();
/// bus.emit_lossy(ShowEvent::TransportChanged {
///     old_state: TransportState::Stopped,
///     new_state: TransportState::Playing,
///     timestamp: chrono::Utc::now(),
/// });
/// assert!(rx.try_recv().is_ok());
/// ```
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ShowEvent>,
    capacity: usize,
}

impl EventBus {
    /// Create a bus buffering up to `capacity` events per subscriber
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            tx,
            capacity: capacity.max(1),
        }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<ShowEvent> {
        self.tx.subscribe()
    }

    /// Emit an event, returning the number of subscribers reached
    ///
    /// Fails only when nobody is subscribed.
    #[allow(clippy::result_large_err)]
    pub fn emit(&self, event: ShowEvent) -> Result<usize, broadcast::error::SendError<ShowEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring the no-subscriber case
    pub fn emit_lossy(&self, event: ShowEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("capacity", &self.capacity)
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}
