//! Cue data model
//!
//! A cue is the unit the operator arms and fires. Identity, numbering, waits
//! and continuation fields are common to every cue; everything that depends on
//! the cue's kind lives in the closed [`CueParams`] enum so each operation can
//! match exhaustively over the kinds.

use crate::routing::MatrixState;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use uuid::Uuid;

/// Stable cue identifier
pub type CueId = Uuid;

/// Default duration for newly created wait cues
pub const DEFAULT_WAIT_MS: u64 = 1000;

/// Cue kind, derived from [`CueParams`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CueType {
    Audio,
    Video,
    Wait,
    Group,
}

impl CueType {
    /// Default display name for a new cue of this kind
    pub fn default_name(&self) -> &'static str {
        match self {
            CueType::Audio => "Audio Cue",
            CueType::Video => "Video Cue",
            CueType::Wait => "Wait",
            CueType::Group => "Group",
        }
    }
}

impl fmt::Display for CueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CueType::Audio => write!(f, "audio"),
            CueType::Video => write!(f, "video"),
            CueType::Wait => write!(f, "wait"),
            CueType::Group => write!(f, "group"),
        }
    }
}

/// Cue lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CueStatus {
    #[default]
    Ready,
    Loading,
    Playing,
    Paused,
    Error,
}

impl CueStatus {
    /// True while the cue occupies an output (loading, playing or paused)
    pub fn is_active(&self) -> bool {
        matches!(self, CueStatus::Loading | CueStatus::Playing | CueStatus::Paused)
    }
}

impl fmt::Display for CueStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CueStatus::Ready => write!(f, "ready"),
            CueStatus::Loading => write!(f, "loading"),
            CueStatus::Playing => write!(f, "playing"),
            CueStatus::Paused => write!(f, "paused"),
            CueStatus::Error => write!(f, "error"),
        }
    }
}

/// How a group cue runs its children
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupMode {
    /// Each child runs to full completion before the next starts
    #[default]
    Sequential,
    /// All children start together; the group ends when the last one ends
    Parallel,
}

/// Parameters shared by audio and video cues
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MediaParams {
    pub file_path: PathBuf,
    /// Linear playback volume (1.0 = unity)
    pub volume: f32,
    pub fade_in_ms: u64,
    pub fade_out_ms: u64,
    pub start_time_ms: u64,
    pub end_time_ms: Option<u64>,
    #[serde(rename = "loop")]
    pub loop_playback: bool,
    /// Playback rate multiplier (1.0 = normal speed)
    pub rate: f32,
    /// Output patch this cue feeds (None = default patch)
    pub patch_id: Option<Uuid>,
    /// Saved cue matrix routing, re-applied when the cue is loaded
    pub routing: Option<MatrixState>,
}

impl Default for MediaParams {
    fn default() -> Self {
        Self {
            file_path: PathBuf::new(),
            volume: 1.0,
            fade_in_ms: 0,
            fade_out_ms: 0,
            start_time_ms: 0,
            end_time_ms: None,
            loop_playback: false,
            rate: 1.0,
            patch_id: None,
            routing: None,
        }
    }
}

/// Type-specific cue parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum CueParams {
    Audio(MediaParams),
    Video(MediaParams),
    Wait {
        #[serde(rename = "durationMs")]
        duration_ms: u64,
    },
    Group {
        #[serde(default)]
        children: Vec<CueId>,
        #[serde(default)]
        mode: GroupMode,
    },
}

impl CueParams {
    /// Default parameters for a new cue of the given kind
    pub fn defaults_for(cue_type: CueType) -> Self {
        match cue_type {
            CueType::Audio => CueParams::Audio(MediaParams::default()),
            CueType::Video => CueParams::Video(MediaParams::default()),
            CueType::Wait => CueParams::Wait {
                duration_ms: DEFAULT_WAIT_MS,
            },
            CueType::Group => CueParams::Group {
                children: Vec::new(),
                mode: GroupMode::Sequential,
            },
        }
    }

    pub fn cue_type(&self) -> CueType {
        match self {
            CueParams::Audio(_) => CueType::Audio,
            CueParams::Video(_) => CueType::Video,
            CueParams::Wait { .. } => CueType::Wait,
            CueParams::Group { .. } => CueType::Group,
        }
    }

    /// Media parameters for audio and video cues
    pub fn media(&self) -> Option<&MediaParams> {
        match self {
            CueParams::Audio(media) | CueParams::Video(media) => Some(media),
            CueParams::Wait { .. } | CueParams::Group { .. } => None,
        }
    }

    pub fn media_mut(&mut self) -> Option<&mut MediaParams> {
        match self {
            CueParams::Audio(media) | CueParams::Video(media) => Some(media),
            CueParams::Wait { .. } | CueParams::Group { .. } => None,
        }
    }
}

/// A single cue in the show
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cue {
    pub id: CueId,
    pub number: String,
    pub name: String,
    #[serde(default)]
    pub pre_wait_ms: u64,
    #[serde(default)]
    pub post_wait_ms: u64,
    #[serde(default)]
    pub status: CueStatus,
    #[serde(default)]
    pub auto_continue: bool,
    #[serde(default)]
    pub auto_follow_target: Option<CueId>,
    #[serde(default)]
    pub continue_delay_ms: u64,
    #[serde(flatten)]
    pub params: CueParams,
}

impl Cue {
    /// Create a cue of the given kind with type defaults
    pub fn new(cue_type: CueType, number: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            number: number.into(),
            name: cue_type.default_name().to_string(),
            pre_wait_ms: 0,
            post_wait_ms: 0,
            status: CueStatus::Ready,
            auto_continue: false,
            auto_follow_target: None,
            continue_delay_ms: 0,
            params: CueParams::defaults_for(cue_type),
        }
    }

    pub fn cue_type(&self) -> CueType {
        self.params.cue_type()
    }

    /// Child ids for group cues, empty for every other kind
    pub fn children(&self) -> &[CueId] {
        match &self.params {
            CueParams::Group { children, .. } => children,
            _ => &[],
        }
    }
}

/// Numeric value of a display number, if it is numeric
fn numeric(number: &str) -> Option<f64> {
    number.trim().parse::<f64>().ok().filter(|n| n.is_finite())
}

fn format_number(value: f64) -> String {
    // binary noise from repeated halving
    format!("{}", rounded(value))
}

/// Next ordinal for an appended cue: `floor(max) + 1`, ignoring non-numeric numbers
pub fn next_cue_number<'a>(existing: impl IntoIterator<Item = &'a str>) -> String {
    let max = existing
        .into_iter()
        .filter_map(numeric)
        .fold(None, |acc: Option<f64>, n| Some(acc.map_or(n, |m| m.max(n))));

    match max {
        Some(max) => format_number(max.floor() + 1.0),
        None => "1".to_string(),
    }
}

/// Number for a cue inserted between two neighbours (fractional insertion)
///
/// `("1", "2") → "1.5"`, `(None, "1") → "0.5"`, `("3", None) → "4"`.
/// Neighbours out of order give `previous + 0.5`. The result never repeats a
/// number in `existing`; a gap with no free number falls back to the next
/// ordinal.
pub fn cue_number_between<'a>(
    previous: Option<&str>,
    next: Option<&str>,
    existing: impl IntoIterator<Item = &'a str>,
) -> String {
    let existing: Vec<&str> = existing.into_iter().collect();
    let taken: Vec<f64> = existing.iter().filter_map(|n| numeric(n)).map(rounded).collect();
    let is_free = |candidate: f64| !taken.iter().any(|n| (n - rounded(candidate)).abs() < 1e-9);

    let candidates = match (previous.and_then(numeric), next.and_then(numeric)) {
        (Some(prev), Some(next)) if next > prev => halvings(prev, next),
        (Some(prev), Some(_)) => halvings(prev, prev + 1.0),
        (Some(prev), None) => vec![prev.floor() + 1.0],
        (None, Some(next)) if next > 0.0 => halvings(0.0, next),
        (None, Some(next)) => vec![next - 1.0],
        (None, None) => vec![1.0],
    };

    candidates
        .into_iter()
        .find(|candidate| is_free(*candidate))
        .map_or_else(|| next_cue_number(existing), format_number)
}

fn rounded(value: f64) -> f64 {
    (value * 1_000_000.0).round() / 1_000_000.0
}

/// Successive midpoints from `high` down towards `low`
fn halvings(low: f64, high: f64) -> Vec<f64> {
    let mut points = Vec::new();
    let mut upper = high;
    while upper - low > 2e-6 && points.len() < 20 {
        let mid = (low + upper) / 2.0;
        points.push(mid);
        upper = mid;
    }
    points
}
