//! Output patches
//!
//! An output patch is a second [`MatrixRouter`] sized `cue_outputs ×
//! device_outputs`. Every playing cue sums into the cue-output busses of the
//! patch it references; the patch matrix then maps those busses onto the bound
//! device's physical outputs. Device output level and mute are the patch
//! matrix's output level and mute.
//!
//! Patches are shared by reference (id); only the [`PatchManager`] creates
//! and destroys them.

use crate::audio::sink::DeviceInfo;
use crate::error::{Error, Result};
use crate::routing::matrix::{linear_to_db, MatrixRouter};
use crate::routing::snapshot::RouteTable;
use cueforge_common::routing::PatchRecord;
use cueforge_common::Cue;
use std::collections::BTreeMap;
use std::f32::consts::FRAC_PI_2;
use std::f32::consts::FRAC_PI_4;
use tracing::{debug, info};
use uuid::Uuid;

/// Output patch identifier
pub type PatchId = Uuid;

/// Cue-output busses per patch unless configured otherwise
pub const DEFAULT_CUE_OUTPUTS: usize = 64;
pub const MIN_DEVICE_OUTPUTS: usize = 2;
pub const MAX_DEVICE_OUTPUTS: usize = 128;

/// Channels of a 5.1 layout (L R C LFE Ls Rs)
const SURROUND_CHANNELS: usize = 6;

/// Constant-power gain rounded to a crosspoint level (`None` when inaudible)
fn gain_to_level(gain: f32) -> Option<f32> {
    if gain < 1e-6 {
        None
    } else {
        Some(linear_to_db(gain))
    }
}

fn clamp_device_outputs(count: usize) -> usize {
    count.clamp(MIN_DEVICE_OUTPUTS, MAX_DEVICE_OUTPUTS)
}

/// Cue-output to device-output mapping
#[derive(Debug, Clone, PartialEq)]
pub struct OutputPatch {
    id: PatchId,
    name: String,
    device_id: Option<String>,
    matrix: MatrixRouter,
    /// Device output index → physical destination label
    destinations: BTreeMap<usize, String>,
    /// Named cue-output busses
    busses: BTreeMap<String, usize>,
}

impl OutputPatch {
    /// New patch with identity routing
    pub fn new(name: impl Into<String>, cue_outputs: usize, device_outputs: usize) -> Self {
        let device_outputs = clamp_device_outputs(device_outputs);
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            device_id: None,
            matrix: MatrixRouter::identity(cue_outputs, device_outputs, 0.0),
            destinations: BTreeMap::new(),
            busses: BTreeMap::new(),
        }
    }

    pub fn id(&self) -> PatchId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    pub fn device_id(&self) -> Option<&str> {
        self.device_id.as_deref()
    }

    pub fn cue_outputs(&self) -> usize {
        self.matrix.num_inputs()
    }

    pub fn device_outputs(&self) -> usize {
        self.matrix.num_outputs()
    }

    pub fn matrix(&self) -> &MatrixRouter {
        &self.matrix
    }

    pub fn matrix_mut(&mut self) -> &mut MatrixRouter {
        &mut self.matrix
    }

    /// Bind to a device and rebuild the matrix for its output count
    ///
    /// All routing is cleared; the caller re-patches.
    pub fn set_audio_device(&mut self, device: &DeviceInfo) {
        let device_outputs = clamp_device_outputs(device.output_channels);
        info!(
            "Patch '{}' bound to device '{}' ({} outputs)",
            self.name, device.name, device_outputs
        );
        self.device_id = Some(device.id.clone());
        self.matrix = MatrixRouter::new(self.cue_outputs(), device_outputs);
        self.destinations.retain(|out, _| *out < device_outputs);
    }

    // ---- routing ----

    pub fn set_patch_routing(&mut self, cue_output: usize, device_output: usize, level_db: Option<f32>) -> Result<()> {
        self.matrix.set_crosspoint(cue_output, device_output, level_db)
    }

    pub fn patch_routing(&self, cue_output: usize, device_output: usize) -> Result<Option<f32>> {
        self.matrix.crosspoint(cue_output, device_output)
    }

    /// One-to-one routing for every shared index
    pub fn set_direct_routing(&mut self) {
        self.matrix.apply_identity(0.0);
    }

    /// Constant-power stereo fold of every cue output onto one device pair
    ///
    /// Even cue outputs pan left, odd ones right. `spread` of 1 hard-pans,
    /// 0 sends everything to the centre.
    pub fn route_cue_outputs_to_stereo(&mut self, start_output: usize, spread: f32) -> Result<()> {
        let right = start_output + 1;
        if right >= self.device_outputs() {
            return Err(Error::out_of_range("device output", right, self.device_outputs()));
        }

        let spread = if spread.is_nan() { 1.0 } else { spread.clamp(0.0, 1.0) };
        self.matrix.set_silent();
        for cue_output in 0..self.cue_outputs() {
            let x = if cue_output % 2 == 0 {
                0.5 - spread / 2.0
            } else {
                0.5 + spread / 2.0
            };
            let theta = x * FRAC_PI_2;
            self.matrix
                .set_crosspoint(cue_output, start_output, gain_to_level(theta.cos()))?;
            self.matrix
                .set_crosspoint(cue_output, right, gain_to_level(theta.sin()))?;
        }

        debug!("Patch '{}' routed to stereo at {} (spread {})", self.name, start_output, spread);
        Ok(())
    }

    /// 5.1 layout at `start_output..start_output + 6`
    ///
    /// Cue outputs 0–5 map one-to-one. Each further pair folds onto the front
    /// and rear pairs at equal constant-power gain.
    pub fn route_cue_outputs_to_surround(&mut self, start_output: usize) -> Result<()> {
        let end = start_output + SURROUND_CHANNELS;
        if end > self.device_outputs() {
            return Err(Error::out_of_range("device output", end - 1, self.device_outputs()));
        }

        self.matrix.set_silent();
        for cue_output in 0..self.cue_outputs().min(SURROUND_CHANNELS) {
            self.matrix
                .set_crosspoint(cue_output, start_output + cue_output, Some(0.0))?;
        }

        let fold = gain_to_level(FRAC_PI_4.cos());
        for cue_output in SURROUND_CHANNELS..self.cue_outputs() {
            let (front, rear) = if cue_output % 2 == 0 { (0, 4) } else { (1, 5) };
            self.matrix
                .set_crosspoint(cue_output, start_output + front, fold)?;
            self.matrix.set_crosspoint(cue_output, start_output + rear, fold)?;
        }

        debug!("Patch '{}' routed to 5.1 at {}", self.name, start_output);
        Ok(())
    }

    /// Consecutive stereo pairs: cue `start_cue + k` → device `start_device + k`
    pub fn set_stereo_pairs(&mut self, start_cue: usize, start_device: usize) -> Result<()> {
        if start_cue >= self.cue_outputs() {
            return Err(Error::out_of_range("cue output", start_cue, self.cue_outputs()));
        }
        if start_device >= self.device_outputs() {
            return Err(Error::out_of_range("device output", start_device, self.device_outputs()));
        }

        let available = (self.cue_outputs() - start_cue).min(self.device_outputs() - start_device);
        let channels = available - available % 2;
        self.matrix.set_silent();
        for k in 0..channels {
            self.matrix
                .set_crosspoint(start_cue + k, start_device + k, Some(0.0))?;
        }
        Ok(())
    }

    /// Explicit `(cue_output, device_output)` pairs at unity
    ///
    /// Every pair is validated before anything changes.
    pub fn set_multi_room(&mut self, mappings: &[(usize, usize)]) -> Result<()> {
        for &(cue_output, device_output) in mappings {
            if cue_output >= self.cue_outputs() {
                return Err(Error::out_of_range("cue output", cue_output, self.cue_outputs()));
            }
            if device_output >= self.device_outputs() {
                return Err(Error::out_of_range(
                    "device output",
                    device_output,
                    self.device_outputs(),
                ));
            }
        }

        self.matrix.set_silent();
        for &(cue_output, device_output) in mappings {
            self.matrix.set_crosspoint(cue_output, device_output, Some(0.0))?;
        }
        Ok(())
    }

    /// Direct routing, unity device levels, nothing muted
    pub fn reset_to_default(&mut self) {
        let (inputs, outputs) = (self.cue_outputs(), self.device_outputs());
        self.matrix = MatrixRouter::identity(inputs, outputs, 0.0);
    }

    // ---- device outputs ----

    pub fn set_device_output_level(&mut self, device_output: usize, level_db: f32) -> Result<()> {
        self.matrix.set_output_level(device_output, level_db)
    }

    pub fn device_output_level(&self, device_output: usize) -> Result<f32> {
        self.matrix.output_level(device_output)
    }

    pub fn mute_device_output(&mut self, device_output: usize, muted: bool) -> Result<()> {
        self.matrix.set_output_mute(device_output, muted)
    }

    pub fn is_device_output_muted(&self, device_output: usize) -> bool {
        self.matrix.is_output_muted(device_output)
    }

    pub fn set_destination(&mut self, device_output: usize, label: impl Into<String>) -> Result<()> {
        if device_output >= self.device_outputs() {
            return Err(Error::out_of_range("device output", device_output, self.device_outputs()));
        }
        self.destinations.insert(device_output, label.into());
        Ok(())
    }

    pub fn destination(&self, device_output: usize) -> Option<&str> {
        self.destinations.get(&device_output).map(String::as_str)
    }

    // ---- busses ----

    /// Name a cue-output bus
    pub fn register_bus(&mut self, name: impl Into<String>, cue_output: usize) -> Result<()> {
        if cue_output >= self.cue_outputs() {
            return Err(Error::out_of_range("cue output", cue_output, self.cue_outputs()));
        }
        self.busses.insert(name.into(), cue_output);
        Ok(())
    }

    pub fn bus_index(&self, name: &str) -> Option<usize> {
        self.busses.get(name).copied()
    }

    pub fn compile(&self) -> RouteTable {
        self.matrix.compile()
    }

    // ---- persistence ----

    pub fn to_record(&self, is_default: bool) -> PatchRecord {
        PatchRecord {
            id: self.id,
            name: self.name.clone(),
            is_default,
            device_id: self.device_id.clone(),
            matrix: self.matrix.to_state(),
            busses: self.busses.clone(),
            destinations: self.destinations.clone(),
        }
    }

    pub fn from_record(record: &PatchRecord) -> Result<Self> {
        let mut matrix = MatrixRouter::from_state(&record.matrix)?;
        let device_outputs = clamp_device_outputs(matrix.num_outputs());
        matrix.resize(matrix.num_inputs(), device_outputs);
        Ok(Self {
            id: record.id,
            name: record.name.clone(),
            device_id: record.device_id.clone(),
            matrix,
            destinations: record.destinations.clone(),
            busses: record.busses.clone(),
        })
    }
}

/// Owner of every output patch
#[derive(Debug, Clone)]
pub struct PatchManager {
    patches: Vec<OutputPatch>,
    default_id: PatchId,
    cue_outputs: usize,
}

impl PatchManager {
    /// Manager holding a single default patch named "Main"
    pub fn new(cue_outputs: usize, device_outputs: usize) -> Self {
        let main = OutputPatch::new("Main", cue_outputs, device_outputs);
        Self {
            default_id: main.id(),
            patches: vec![main],
            cue_outputs,
        }
    }

    pub fn default_id(&self) -> PatchId {
        self.default_id
    }

    pub fn default_patch(&self) -> &OutputPatch {
        // The default id always names a held patch
        self.patches
            .iter()
            .find(|p| p.id() == self.default_id)
            .unwrap_or(&self.patches[0])
    }

    /// Create a patch shaped like the default patch
    pub fn create_patch(&mut self, name: impl Into<String>) -> PatchId {
        let device_outputs = self.default_patch().device_outputs();
        let patch = OutputPatch::new(name, self.cue_outputs, device_outputs);
        let id = patch.id();
        info!("Created output patch '{}' ({})", patch.name(), id);
        self.patches.push(patch);
        id
    }

    /// Delete a patch, moving cues that used it to the default patch
    ///
    /// Returns how many cues were reassigned.
    pub fn delete_patch(&mut self, id: PatchId, cues: &mut [Cue]) -> Result<usize> {
        if id == self.default_id {
            return Err(Error::InvalidState("The default patch cannot be deleted".to_string()));
        }
        let position = self
            .patches
            .iter()
            .position(|p| p.id() == id)
            .ok_or(Error::PatchNotFound(id))?;
        let removed = self.patches.remove(position);

        let mut reassigned = 0;
        for cue in cues.iter_mut() {
            if let Some(media) = cue.params.media_mut() {
                if media.patch_id == Some(id) {
                    media.patch_id = None;
                    reassigned += 1;
                }
            }
        }

        info!(
            "Deleted output patch '{}' ({} cues moved to default)",
            removed.name(),
            reassigned
        );
        Ok(reassigned)
    }

    pub fn set_default(&mut self, id: PatchId) -> Result<()> {
        if self.get(id).is_none() {
            return Err(Error::PatchNotFound(id));
        }
        self.default_id = id;
        Ok(())
    }

    pub fn get(&self, id: PatchId) -> Option<&OutputPatch> {
        self.patches.iter().find(|p| p.id() == id)
    }

    pub fn get_mut(&mut self, id: PatchId) -> Option<&mut OutputPatch> {
        self.patches.iter_mut().find(|p| p.id() == id)
    }

    /// Patch a cue plays through (`None` or an unknown id → default)
    pub fn resolve(&self, id: Option<PatchId>) -> &OutputPatch {
        id.and_then(|id| self.get(id))
            .unwrap_or_else(|| self.default_patch())
    }

    pub fn patches(&self) -> &[OutputPatch] {
        &self.patches
    }

    pub fn cue_outputs(&self) -> usize {
        self.cue_outputs
    }

    pub fn to_records(&self) -> Vec<PatchRecord> {
        self.patches
            .iter()
            .map(|p| p.to_record(p.id() == self.default_id))
            .collect()
    }

    /// Replace every patch with the given records
    ///
    /// An empty list leaves the manager unchanged. Without a flagged default
    /// the first record becomes the default.
    pub fn load_records(&mut self, records: &[PatchRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }

        let patches = records
            .iter()
            .map(OutputPatch::from_record)
            .collect::<Result<Vec<_>>>()?;
        let default_id = records
            .iter()
            .find(|r| r.is_default)
            .map_or(patches[0].id(), |r| r.id);

        self.patches = patches;
        self.default_id = default_id;
        Ok(())
    }
}
