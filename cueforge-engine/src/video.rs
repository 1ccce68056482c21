//! Video presentation and display collaborators
//!
//! Picture output belongs to the embedding application. The scheduler only
//! notifies these traits; the audio track of a video file plays through the
//! [`AudioEngine`](crate::engine::AudioEngine) like any audio cue.

use crate::error::Result;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

/// Display surface identifier
pub type SurfaceId = u64;

/// Surface placement in desktop coordinates
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SurfaceBounds {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

/// Picture playback for video cues
pub trait VideoPresenter: Send + Sync {
    /// Begin presenting `path` from `start_time`
    ///
    /// Returns the clip length when the presenter knows it.
    fn play(&self, cue_id: Uuid, path: &Path, start_time: Duration) -> Result<Option<Duration>>;

    fn pause(&self, cue_id: Uuid);

    fn resume(&self, cue_id: Uuid);

    fn stop(&self, cue_id: Uuid);

    fn stop_all(&self);
}

/// Output surfaces on attached displays
pub trait DisplayOutput: Send + Sync {
    fn create_output_surface(&self, bounds: SurfaceBounds) -> Result<SurfaceId>;

    fn close_surface(&self, id: SurfaceId);

    /// Blank every surface
    fn clear_all(&self);
}

/// Presenter without picture output; tracks and logs requests
#[derive(Debug, Default)]
pub struct NullPresenter {
    playing: Mutex<HashSet<Uuid>>,
}

impl NullPresenter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_presenting(&self, cue_id: Uuid) -> bool {
        self.playing.lock().contains(&cue_id)
    }
}

impl VideoPresenter for NullPresenter {
    fn play(&self, cue_id: Uuid, path: &Path, start_time: Duration) -> Result<Option<Duration>> {
        info!("Video cue {} → {} (from {:?}, no picture output)", cue_id, path.display(), start_time);
        self.playing.lock().insert(cue_id);
        Ok(None)
    }

    fn pause(&self, cue_id: Uuid) {
        debug!("Video cue {} paused", cue_id);
    }

    fn resume(&self, cue_id: Uuid) {
        debug!("Video cue {} resumed", cue_id);
    }

    fn stop(&self, cue_id: Uuid) {
        if self.playing.lock().remove(&cue_id) {
            debug!("Video cue {} stopped", cue_id);
        }
    }

    fn stop_all(&self) {
        self.playing.lock().clear();
    }
}

/// Display output that only hands out surface ids
#[derive(Debug, Default)]
pub struct NullDisplay {
    next_id: AtomicU64,
    surfaces: Mutex<HashMap<SurfaceId, SurfaceBounds>>,
}

impl NullDisplay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn surface_count(&self) -> usize {
        self.surfaces.lock().len()
    }
}

impl DisplayOutput for NullDisplay {
    fn create_output_surface(&self, bounds: SurfaceBounds) -> Result<SurfaceId> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        self.surfaces.lock().insert(id, bounds);
        debug!("Surface {} at {:?}", id, bounds);
        Ok(id)
    }

    fn close_surface(&self, id: SurfaceId) {
        self.surfaces.lock().remove(&id);
    }

    fn clear_all(&self) {
        debug!("Cleared {} surfaces", self.surfaces.lock().len());
    }
}
