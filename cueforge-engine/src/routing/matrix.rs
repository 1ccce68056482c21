//! N×M gain matrix with ganged crosspoints
//!
//! # Gain model
//!
//! A connected crosspoint contributes
//! `10^((crosspoint + input_level + output_level + main_level) / 20)` to its
//! output. A disconnected crosspoint (`None`, or a level of `-∞`) contributes
//! exactly zero; it is never "zero gain at 0 dB".
//!
//! Mute and solo work per input and per output: a muted channel contributes
//! nothing, and once any channel on a side is soloed every non-soloed channel
//! on that side is silent.
//!
//! # Gangs
//!
//! A gang links crosspoints under a letter. Editing a connected member moves
//! every other connected member by the same dB delta, preserving offsets.
//! Disconnected members are left alone, and a crosspoint belongs to at most
//! one gang.
//!
//! The router is plain data. The render path never reads it directly; it
//! consumes a [`RouteTable`] produced by [`MatrixRouter::compile`].

use crate::error::{Error, Result};
use crate::routing::snapshot::{Route, RouteTable};
use cueforge_common::routing::{CrosspointRecord, MatrixState};
use std::collections::BTreeMap;

/// Levels at or below this are treated as silence
pub const SILENCE_DB: f32 = -100.0;

/// Convert dB to linear gain (`-∞` and anything ≤ [`SILENCE_DB`] → 0)
pub fn db_to_linear(db: f32) -> f32 {
    if db.is_nan() || db <= SILENCE_DB {
        0.0
    } else {
        10f32.powf(db / 20.0)
    }
}

/// Convert linear gain to dB (0 or negative → `-∞`)
pub fn linear_to_db(gain: f32) -> f32 {
    if gain <= 0.0 || gain.is_nan() {
        f32::NEG_INFINITY
    } else {
        20.0 * gain.log10()
    }
}

/// Map "no connection" spellings onto `None`
fn normalize_level(level_db: Option<f32>) -> Option<f32> {
    level_db.filter(|db| !db.is_nan() && *db != f32::NEG_INFINITY)
}

/// One connected crosspoint
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Crosspoint {
    pub input: usize,
    pub output: usize,
    pub level_db: f32,
}

/// Routing matrix
#[derive(Debug, Clone, PartialEq)]
pub struct MatrixRouter {
    num_inputs: usize,
    num_outputs: usize,
    /// Row-major: `input * num_outputs + output`
    crosspoints: Vec<Option<f32>>,
    input_levels: Vec<f32>,
    output_levels: Vec<f32>,
    main_level: f32,
    input_mutes: Vec<bool>,
    input_solos: Vec<bool>,
    output_mutes: Vec<bool>,
    output_solos: Vec<bool>,
    gangs: BTreeMap<char, Vec<(usize, usize)>>,
}

impl MatrixRouter {
    /// Create an unconnected matrix with unity levels
    pub fn new(num_inputs: usize, num_outputs: usize) -> Self {
        Self {
            num_inputs,
            num_outputs,
            crosspoints: vec![None; num_inputs * num_outputs],
            input_levels: vec![0.0; num_inputs],
            output_levels: vec![0.0; num_outputs],
            main_level: 0.0,
            input_mutes: vec![false; num_inputs],
            input_solos: vec![false; num_inputs],
            output_mutes: vec![false; num_outputs],
            output_solos: vec![false; num_outputs],
            gangs: BTreeMap::new(),
        }
    }

    /// Matrix with `i → i` connected at `level_db` for every shared index
    pub fn identity(num_inputs: usize, num_outputs: usize, level_db: f32) -> Self {
        let mut matrix = Self::new(num_inputs, num_outputs);
        matrix.apply_identity(level_db);
        matrix
    }

    pub fn num_inputs(&self) -> usize {
        self.num_inputs
    }

    pub fn num_outputs(&self) -> usize {
        self.num_outputs
    }

    fn check_input(&self, input: usize) -> Result<()> {
        if input >= self.num_inputs {
            return Err(Error::out_of_range("input", input, self.num_inputs));
        }
        Ok(())
    }

    fn check_output(&self, output: usize) -> Result<()> {
        if output >= self.num_outputs {
            return Err(Error::out_of_range("output", output, self.num_outputs));
        }
        Ok(())
    }

    fn index(&self, input: usize, output: usize) -> usize {
        input * self.num_outputs + output
    }

    // ---- crosspoints ----

    /// Set a crosspoint level in dB, or disconnect it with `None`
    ///
    /// If the crosspoint belongs to a gang and was already connected, every
    /// other connected gang member moves by the same delta.
    pub fn set_crosspoint(&mut self, input: usize, output: usize, level_db: Option<f32>) -> Result<()> {
        self.check_input(input)?;
        self.check_output(output)?;

        let level_db = normalize_level(level_db);
        let idx = self.index(input, output);
        let previous = self.crosspoints[idx];
        self.crosspoints[idx] = level_db;

        let delta = match (previous, level_db) {
            (Some(old), Some(new)) => new - old,
            _ => return Ok(()),
        };
        if delta == 0.0 {
            return Ok(());
        }

        if let Some(letter) = self.gang_of(input, output) {
            let members = self.gangs.get(&letter).cloned().unwrap_or_default();
            for (i, o) in members {
                if (i, o) == (input, output) {
                    continue;
                }
                let member_idx = self.index(i, o);
                if let Some(level) = self.crosspoints[member_idx] {
                    self.crosspoints[member_idx] = Some(level + delta);
                }
            }
        }

        Ok(())
    }

    /// Crosspoint level in dB (`None` = no connection)
    pub fn crosspoint(&self, input: usize, output: usize) -> Result<Option<f32>> {
        self.check_input(input)?;
        self.check_output(output)?;
        Ok(self.crosspoints[self.index(input, output)])
    }

    /// Disconnect one crosspoint without touching its gang
    pub fn clear_crosspoint(&mut self, input: usize, output: usize) -> Result<()> {
        self.set_crosspoint(input, output, None)
    }

    /// Disconnect every crosspoint
    pub fn set_silent(&mut self) {
        self.crosspoints.iter_mut().for_each(|xp| *xp = None);
    }

    /// Disconnect everything, then connect `i → i` at `level_db`
    pub fn apply_identity(&mut self, level_db: f32) {
        self.set_silent();
        for i in 0..self.num_inputs.min(self.num_outputs) {
            let idx = self.index(i, i);
            self.crosspoints[idx] = normalize_level(Some(level_db));
        }
    }

    /// Every connected crosspoint, in row-major order
    pub fn active_routes(&self) -> Vec<Crosspoint> {
        self.crosspoints
            .iter()
            .enumerate()
            .filter_map(|(idx, level)| {
                level.map(|level_db| Crosspoint {
                    input: idx / self.num_outputs,
                    output: idx % self.num_outputs,
                    level_db,
                })
            })
            .collect()
    }

    pub fn has_active_routing(&self) -> bool {
        self.crosspoints.iter().any(Option::is_some)
    }

    // ---- levels ----

    pub fn set_input_level(&mut self, input: usize, level_db: f32) -> Result<()> {
        self.check_input(input)?;
        self.input_levels[input] = check_level(level_db)?;
        Ok(())
    }

    pub fn input_level(&self, input: usize) -> Result<f32> {
        self.check_input(input)?;
        Ok(self.input_levels[input])
    }

    pub fn set_output_level(&mut self, output: usize, level_db: f32) -> Result<()> {
        self.check_output(output)?;
        self.output_levels[output] = check_level(level_db)?;
        Ok(())
    }

    pub fn output_level(&self, output: usize) -> Result<f32> {
        self.check_output(output)?;
        Ok(self.output_levels[output])
    }

    pub fn set_main_level(&mut self, level_db: f32) -> Result<()> {
        self.main_level = check_level(level_db)?;
        Ok(())
    }

    pub fn main_level(&self) -> f32 {
        self.main_level
    }

    // ---- mute / solo ----

    pub fn set_input_mute(&mut self, input: usize, muted: bool) -> Result<()> {
        self.check_input(input)?;
        self.input_mutes[input] = muted;
        Ok(())
    }

    pub fn is_input_muted(&self, input: usize) -> bool {
        self.input_mutes.get(input).copied().unwrap_or(false)
    }

    pub fn set_input_solo(&mut self, input: usize, soloed: bool) -> Result<()> {
        self.check_input(input)?;
        self.input_solos[input] = soloed;
        Ok(())
    }

    pub fn is_input_soloed(&self, input: usize) -> bool {
        self.input_solos.get(input).copied().unwrap_or(false)
    }

    pub fn set_output_mute(&mut self, output: usize, muted: bool) -> Result<()> {
        self.check_output(output)?;
        self.output_mutes[output] = muted;
        Ok(())
    }

    pub fn is_output_muted(&self, output: usize) -> bool {
        self.output_mutes.get(output).copied().unwrap_or(false)
    }

    pub fn set_output_solo(&mut self, output: usize, soloed: bool) -> Result<()> {
        self.check_output(output)?;
        self.output_solos[output] = soloed;
        Ok(())
    }

    pub fn is_output_soloed(&self, output: usize) -> bool {
        self.output_solos.get(output).copied().unwrap_or(false)
    }

    fn input_audible(&self, input: usize) -> bool {
        let any_solo = self.input_solos.iter().any(|s| *s);
        !self.input_mutes[input] && (!any_solo || self.input_solos[input])
    }

    fn output_audible(&self, output: usize) -> bool {
        let any_solo = self.output_solos.iter().any(|s| *s);
        !self.output_mutes[output] && (!any_solo || self.output_solos[output])
    }

    // ---- gain ----

    /// Linear gain from `input` to `output`
    ///
    /// Zero when there is no connection, when either side is muted or soloed
    /// out, or when the coordinates are outside the matrix.
    pub fn calculate_gain(&self, input: usize, output: usize) -> f32 {
        if input >= self.num_inputs || output >= self.num_outputs {
            return 0.0;
        }
        let Some(xp) = self.crosspoints[self.index(input, output)] else {
            return 0.0;
        };
        if !self.input_audible(input) || !self.output_audible(output) {
            return 0.0;
        }

        let total = xp + self.input_levels[input] + self.output_levels[output] + self.main_level;
        if total == f32::NEG_INFINITY {
            return 0.0;
        }
        db_to_linear(total)
    }

    /// Compile the audible routes into a render-ready table
    pub fn compile(&self) -> RouteTable {
        let routes = self
            .active_routes()
            .into_iter()
            .filter_map(|xp| {
                let gain = self.calculate_gain(xp.input, xp.output);
                (gain > 0.0).then_some(Route {
                    input: xp.input,
                    output: xp.output,
                    gain,
                })
            })
            .collect();
        RouteTable::new(self.num_inputs, self.num_outputs, routes)
    }

    // ---- gangs ----

    /// Link crosspoints under `letter`
    ///
    /// Members are removed from any gang they previously belonged to. An
    /// existing gang with the same letter is replaced.
    pub fn create_gang(&mut self, letter: char, members: &[(usize, usize)]) -> Result<()> {
        if members.is_empty() {
            return Err(Error::InvalidState(format!("Gang '{}' needs at least one member", letter)));
        }
        for &(input, output) in members {
            self.check_input(input)?;
            self.check_output(output)?;
        }

        let mut unique: Vec<(usize, usize)> = Vec::with_capacity(members.len());
        for member in members {
            if !unique.contains(member) {
                unique.push(*member);
            }
        }

        self.gangs.remove(&letter);
        for gang in self.gangs.values_mut() {
            gang.retain(|m| !unique.contains(m));
        }
        self.gangs.retain(|_, gang| !gang.is_empty());
        self.gangs.insert(letter, unique);
        Ok(())
    }

    /// Remove a gang, returning whether it existed
    pub fn remove_gang(&mut self, letter: char) -> bool {
        self.gangs.remove(&letter).is_some()
    }

    pub fn gang_of(&self, input: usize, output: usize) -> Option<char> {
        self.gangs
            .iter()
            .find(|(_, members)| members.contains(&(input, output)))
            .map(|(letter, _)| *letter)
    }

    pub fn gang_members(&self, letter: char) -> Option<&[(usize, usize)]> {
        self.gangs.get(&letter).map(Vec::as_slice)
    }

    // ---- shape ----

    /// Change dimensions, keeping every setting that still fits
    pub fn resize(&mut self, num_inputs: usize, num_outputs: usize) {
        if num_inputs == self.num_inputs && num_outputs == self.num_outputs {
            return;
        }

        let mut resized = MatrixRouter::new(num_inputs, num_outputs);
        for xp in self.active_routes() {
            if xp.input < num_inputs && xp.output < num_outputs {
                let idx = resized.index(xp.input, xp.output);
                resized.crosspoints[idx] = Some(xp.level_db);
            }
        }
        for i in 0..num_inputs.min(self.num_inputs) {
            resized.input_levels[i] = self.input_levels[i];
            resized.input_mutes[i] = self.input_mutes[i];
            resized.input_solos[i] = self.input_solos[i];
        }
        for o in 0..num_outputs.min(self.num_outputs) {
            resized.output_levels[o] = self.output_levels[o];
            resized.output_mutes[o] = self.output_mutes[o];
            resized.output_solos[o] = self.output_solos[o];
        }
        resized.main_level = self.main_level;
        for (letter, members) in &self.gangs {
            let kept: Vec<_> = members
                .iter()
                .copied()
                .filter(|(i, o)| *i < num_inputs && *o < num_outputs)
                .collect();
            if !kept.is_empty() {
                resized.gangs.insert(*letter, kept);
            }
        }

        *self = resized;
    }

    // ---- persistence ----

    pub fn to_state(&self) -> MatrixState {
        let flagged = |flags: &[bool]| -> Vec<usize> {
            flags
                .iter()
                .enumerate()
                .filter_map(|(i, f)| f.then_some(i))
                .collect()
        };

        MatrixState {
            num_inputs: self.num_inputs,
            num_outputs: self.num_outputs,
            crosspoints: self
                .active_routes()
                .into_iter()
                .map(|xp| CrosspointRecord {
                    input: xp.input,
                    output: xp.output,
                    level_db: xp.level_db,
                })
                .collect(),
            input_levels: self.input_levels.clone(),
            output_levels: self.output_levels.clone(),
            main_level: self.main_level,
            input_mutes: flagged(&self.input_mutes),
            output_mutes: flagged(&self.output_mutes),
            input_solos: flagged(&self.input_solos),
            output_solos: flagged(&self.output_solos),
            gangs: self.gangs.clone(),
        }
    }

    /// Rebuild a router from a snapshot, validating every coordinate
    pub fn from_state(state: &MatrixState) -> Result<Self> {
        let mut matrix = MatrixRouter::new(state.num_inputs, state.num_outputs);

        for xp in &state.crosspoints {
            matrix.check_input(xp.input)?;
            matrix.check_output(xp.output)?;
            let idx = matrix.index(xp.input, xp.output);
            matrix.crosspoints[idx] = normalize_level(Some(xp.level_db));
        }
        for (i, level) in state.input_levels.iter().enumerate().take(state.num_inputs) {
            matrix.input_levels[i] = *level;
        }
        for (o, level) in state.output_levels.iter().enumerate().take(state.num_outputs) {
            matrix.output_levels[o] = *level;
        }
        matrix.main_level = state.main_level;

        for &i in &state.input_mutes {
            matrix.set_input_mute(i, true)?;
        }
        for &o in &state.output_mutes {
            matrix.set_output_mute(o, true)?;
        }
        for &i in &state.input_solos {
            matrix.set_input_solo(i, true)?;
        }
        for &o in &state.output_solos {
            matrix.set_output_solo(o, true)?;
        }
        for (letter, members) in &state.gangs {
            matrix.create_gang(*letter, members)?;
        }

        Ok(matrix)
    }
}

fn check_level(level_db: f32) -> Result<f32> {
    if level_db.is_nan() {
        return Err(Error::InvalidState("Level must be a number".to_string()));
    }
    Ok(level_db)
}
