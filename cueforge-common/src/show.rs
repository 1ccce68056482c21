//! Persisted show document
//!
//! Minimal JSON schema round-tripped by the engine:
//! `{ name, version, cues: [...], settings: {...} }` with optional `patches`.

use crate::cue::{Cue, CueStatus};
use crate::error::{Error, Result};
use crate::routing::PatchRecord;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use tracing::{debug, info, warn};

/// Current show document format version
pub const SHOW_VERSION: u32 = 1;

/// Show-wide transport settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ShowSettings {
    pub current_cue_index: Option<usize>,
    /// Linear master volume (1.0 = unity)
    pub master_volume: f32,
    pub auto_continue_enabled: bool,
    pub single_cue_mode: bool,
}

impl Default for ShowSettings {
    fn default() -> Self {
        Self {
            current_cue_index: None,
            master_volume: 1.0,
            auto_continue_enabled: true,
            single_cue_mode: false,
        }
    }
}

/// Show document as stored on disk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShowDocument {
    pub name: String,
    pub version: u32,
    #[serde(default)]
    pub cues: Vec<Cue>,
    #[serde(default)]
    pub settings: ShowSettings,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub patches: Vec<PatchRecord>,
}

impl ShowDocument {
    /// Create an empty show
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: SHOW_VERSION,
            cues: Vec::new(),
            settings: ShowSettings::default(),
            patches: Vec::new(),
        }
    }

    /// Parse and validate a document from JSON text
    pub fn from_json(json: &str) -> Result<Self> {
        let mut document: ShowDocument = serde_json::from_str(json)?;
        document.validate()?;
        document.normalize();
        Ok(document)
    }

    /// Serialize to pretty-printed JSON
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Load a show document from disk
    pub async fn load(path: &Path) -> Result<Self> {
        debug!("Loading show document: {}", path.display());
        let json = tokio::fs::read_to_string(path).await?;
        let document = Self::from_json(&json)?;
        info!(
            "Loaded show '{}' ({} cues) from {}",
            document.name,
            document.cues.len(),
            path.display()
        );
        Ok(document)
    }

    /// Write the show document to disk (write-then-rename)
    pub async fn save(&self, path: &Path) -> Result<()> {
        let json = self.to_json()?;
        let tmp_path = path.with_extension("json.tmp");
        tokio::fs::write(&tmp_path, json).await?;
        tokio::fs::rename(&tmp_path, path).await?;
        info!("Saved show '{}' to {}", self.name, path.display());
        Ok(())
    }

    /// Reject documents this build cannot interpret
    pub fn validate(&self) -> Result<()> {
        if self.version > SHOW_VERSION {
            return Err(Error::InvalidInput(format!(
                "Show version {} is newer than supported version {}",
                self.version, SHOW_VERSION
            )));
        }

        let mut seen = HashSet::new();
        for cue in &self.cues {
            if !seen.insert(cue.id) {
                return Err(Error::InvalidInput(format!("Duplicate cue id {}", cue.id)));
            }
        }

        if self.patches.iter().filter(|p| p.is_default).count() > 1 {
            return Err(Error::InvalidInput(
                "More than one patch is flagged default".to_string(),
            ));
        }

        Ok(())
    }

    /// Reset runtime state and drop dangling references
    pub fn normalize(&mut self) {
        let ids: HashSet<_> = self.cues.iter().map(|c| c.id).collect();

        for cue in &mut self.cues {
            cue.status = CueStatus::Ready;

            if let Some(target) = cue.auto_follow_target {
                if !ids.contains(&target) {
                    warn!(
                        "Cue {} auto-follows missing cue {}; clearing target",
                        cue.number, target
                    );
                    cue.auto_follow_target = None;
                    cue.auto_continue = false;
                }
            }

            if let crate::cue::CueParams::Group { children, .. } = &mut cue.params {
                children.retain(|child| ids.contains(child));
            }
        }

        if let Some(index) = self.settings.current_cue_index {
            if index >= self.cues.len() {
                self.settings.current_cue_index = None;
            }
        }
    }
}
