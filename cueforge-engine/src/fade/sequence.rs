//! Chained fades on one target
//!
//! Step N+1 is created from step N's completion callback, so cancelling the
//! running step (directly or by target) ends the whole sequence.

use crate::fade::engine::{FadeCallback, FadeEngine, FadeId};
use crate::fade::target::Fadeable;
use cueforge_common::FadeCurve;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

/// One step of a [`FadeSequence`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FadeStep {
    /// Start value; `None` starts from whatever the target holds
    pub start: Option<f32>,
    pub end: f32,
    pub duration: Duration,
    pub curve: FadeCurve,
}

impl FadeStep {
    pub fn to(end: f32, duration: Duration, curve: FadeCurve) -> Self {
        Self {
            start: None,
            end,
            duration,
            curve,
        }
    }

    pub fn from_to(start: f32, end: f32, duration: Duration, curve: FadeCurve) -> Self {
        Self {
            start: Some(start),
            end,
            duration,
            curve,
        }
    }
}

/// Ordered fade steps on a single target
pub struct FadeSequence {
    target: Arc<dyn Fadeable>,
    steps: VecDeque<FadeStep>,
}

impl FadeSequence {
    pub fn new(target: Arc<dyn Fadeable>) -> Self {
        Self {
            target,
            steps: VecDeque::new(),
        }
    }

    pub fn then(mut self, step: FadeStep) -> Self {
        self.steps.push_back(step);
        self
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Start the first step; `on_complete` fires after the last one
    ///
    /// Returns the first step's fade id, or `None` for an empty sequence (in
    /// which case `on_complete` runs immediately).
    pub fn start(self, engine: &Arc<FadeEngine>, on_complete: Option<FadeCallback>) -> Option<FadeId> {
        run_next(Arc::clone(engine), self.target, self.steps, on_complete)
    }
}

fn run_next(
    engine: Arc<FadeEngine>,
    target: Arc<dyn Fadeable>,
    mut steps: VecDeque<FadeStep>,
    on_complete: Option<FadeCallback>,
) -> Option<FadeId> {
    let Some(step) = steps.pop_front() else {
        if let Some(callback) = on_complete {
            callback();
        }
        return None;
    };

    let start = step.start.unwrap_or_else(|| target.get());
    let next_engine = Arc::clone(&engine);
    let next_target = Arc::clone(&target);
    let chain: FadeCallback = Box::new(move || {
        run_next(next_engine, next_target, steps, on_complete);
    });

    Some(engine.create_fade(target, start, step.end, step.duration, step.curve, Some(chain)))
}
