//! Immutable gain tables consumed by the render path
//!
//! Control-side edits compile a fresh [`RouteTable`] and publish it through a
//! [`SharedRoutes`] handle. The renderer loads the current table once per
//! buffer, so an edit never lands mid-buffer.

use arc_swap::ArcSwap;
use std::sync::Arc;

/// One audible route with its precomputed linear gain
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Route {
    pub input: usize,
    pub output: usize,
    pub gain: f32,
}

/// Compiled sparse gain matrix
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RouteTable {
    num_inputs: usize,
    num_outputs: usize,
    routes: Vec<Route>,
}

impl RouteTable {
    pub fn new(num_inputs: usize, num_outputs: usize, routes: Vec<Route>) -> Self {
        Self {
            num_inputs,
            num_outputs,
            routes,
        }
    }

    /// Table that routes nothing
    pub fn silent(num_inputs: usize, num_outputs: usize) -> Self {
        Self::new(num_inputs, num_outputs, Vec::new())
    }

    pub fn num_inputs(&self) -> usize {
        self.num_inputs
    }

    pub fn num_outputs(&self) -> usize {
        self.num_outputs
    }

    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    pub fn is_silent(&self) -> bool {
        self.routes.is_empty()
    }

    /// Linear gain for one coordinate (0 when not routed)
    pub fn gain(&self, input: usize, output: usize) -> f32 {
        self.routes
            .iter()
            .find(|r| r.input == input && r.output == output)
            .map_or(0.0, |r| r.gain)
    }

    /// Accumulate one input frame into an output frame, scaled by `scale`
    ///
    /// Inputs or outputs beyond the provided slices are skipped.
    #[inline]
    pub fn mix_frame(&self, input: &[f32], output: &mut [f32], scale: f32) {
        for route in &self.routes {
            if let (Some(sample), Some(out)) = (input.get(route.input), output.get_mut(route.output)) {
                *out += sample * route.gain * scale;
            }
        }
    }
}

/// Atomically swappable handle to the current [`RouteTable`]
#[derive(Debug, Clone)]
pub struct SharedRoutes {
    inner: Arc<ArcSwap<RouteTable>>,
}

impl SharedRoutes {
    pub fn new(table: RouteTable) -> Self {
        Self {
            inner: Arc::new(ArcSwap::from_pointee(table)),
        }
    }

    /// Publish a new table; readers pick it up on their next load
    pub fn publish(&self, table: RouteTable) {
        self.inner.store(Arc::new(table));
    }

    /// Current table
    pub fn load(&self) -> Arc<RouteTable> {
        self.inner.load_full()
    }
}
