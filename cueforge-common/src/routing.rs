//! Serializable routing snapshots
//!
//! Plain-data records of a matrix router and an output patch, used by the show
//! document to persist per-cue routing and the patch list. The live router
//! types in `cueforge-engine` convert to and from these records.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// One connected crosspoint
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrosspointRecord {
    pub input: usize,
    pub output: usize,
    pub level_db: f32,
}

/// Snapshot of a matrix router
///
/// Only connected crosspoints are stored; absent coordinates mean "no
/// connection". Level vectors are in dB and sized to the matrix dimensions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatrixState {
    pub num_inputs: usize,
    pub num_outputs: usize,
    #[serde(default)]
    pub crosspoints: Vec<CrosspointRecord>,
    #[serde(default)]
    pub input_levels: Vec<f32>,
    #[serde(default)]
    pub output_levels: Vec<f32>,
    #[serde(default)]
    pub main_level: f32,
    #[serde(default)]
    pub input_mutes: Vec<usize>,
    #[serde(default)]
    pub output_mutes: Vec<usize>,
    #[serde(default)]
    pub input_solos: Vec<usize>,
    #[serde(default)]
    pub output_solos: Vec<usize>,
    #[serde(default)]
    pub gangs: BTreeMap<char, Vec<(usize, usize)>>,
}

impl MatrixState {
    /// Empty snapshot of the given dimensions (unity levels, no connections)
    pub fn empty(num_inputs: usize, num_outputs: usize) -> Self {
        Self {
            num_inputs,
            num_outputs,
            crosspoints: Vec::new(),
            input_levels: vec![0.0; num_inputs],
            output_levels: vec![0.0; num_outputs],
            main_level: 0.0,
            input_mutes: Vec::new(),
            output_mutes: Vec::new(),
            input_solos: Vec::new(),
            output_solos: Vec::new(),
            gangs: BTreeMap::new(),
        }
    }
}

/// Snapshot of an output patch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatchRecord {
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub is_default: bool,
    #[serde(default)]
    pub device_id: Option<String>,
    pub matrix: MatrixState,
    /// Named cue-output busses (name → cue output index)
    #[serde(default)]
    pub busses: BTreeMap<String, usize>,
    /// Physical destination labels (device output index → label)
    #[serde(default)]
    pub destinations: BTreeMap<usize, String>,
}
