//! Two-stage audio routing
//!
//! Stage one is each cue's [`MatrixRouter`] (source channels → cue outputs);
//! stage two is the shared [`OutputPatch`] (cue outputs → device outputs).

pub mod matrix;
pub mod patch;
pub mod snapshot;

pub use matrix::{db_to_linear, linear_to_db, Crosspoint, MatrixRouter};
pub use patch::{OutputPatch, PatchId, PatchManager, DEFAULT_CUE_OUTPUTS};
pub use snapshot::{Route, RouteTable, SharedRoutes};
