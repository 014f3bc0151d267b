//! Temporal and spatial validation of per-frame detections.
//!
//! Three strategies turn noisy per-tick detections into symbol emissions and
//! are deliberately kept separate:
//! - [`gated`]: single target practice, `class && zone` recomputed every tick;
//! - [`hold`]: a label must be held continuously for a minimum duration;
//! - [`cadence`]: sample the best detection every `k`-th tick.

pub mod cadence;
pub mod gated;
pub mod hold;

use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use crate::{decode::Detection, geometry::ZoneRect};

pub use cadence::CadenceSampler;
pub use gated::{GateState, GatedValidator, ValidationState};
pub use hold::{HoldPhase, HoldValidator, StabilityTracker};

/// Exercise target supplied by the consumer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TargetSpec {
    pub expected_label: String,
    pub zone: ZoneRect,
    pub hold_duration: Duration,
}

impl TargetSpec {
    pub fn new(expected_label: impl Into<String>, zone: ZoneRect, hold_duration: Duration) -> Self {
        Self {
            expected_label: expected_label.into(),
            zone,
            hold_duration,
        }
    }
}

/// Everything a strategy sees on one tick.
#[derive(Debug, Clone, Copy)]
pub struct Observation<'a> {
    /// Display-space detections for this tick.
    pub detections: &'a [Detection],
    pub display_width: f32,
    pub display_height: f32,
    /// Monotonic tick time in milliseconds.
    pub now_ms: u64,
}

impl<'a> Observation<'a> {
    pub fn best(&self) -> Option<&'a Detection> {
        best_detection(self.detections)
    }
}

/// Symbol a strategy decided to confirm.
#[derive(Debug, Clone, PartialEq)]
pub struct Emission {
    pub symbol: String,
    pub confidence: f32,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum FinishRejected {
    #[error("no hand detected")]
    NoDetection,
    #[error("showing {observed:?} but the target is {expected:?}")]
    WrongLabel { expected: String, observed: String },
    #[error("hand is outside the target zone")]
    OutsideZone,
    #[error("the active mode has no finish action")]
    Unsupported,
}

/// Highest scoring detection, if any.
pub fn best_detection(detections: &[Detection]) -> Option<&Detection> {
    detections.iter().max_by(|a, b| a.score.total_cmp(&b.score))
}

/// Result of feeding one tick to a [`Strategy`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Verdict {
    /// Gated readiness for this tick; `None` for strategies without a gate.
    pub ready: Option<bool>,
    pub emission: Option<Emission>,
}

pub enum Strategy {
    Gated(GatedValidator),
    Hold(HoldValidator),
    Cadence(CadenceSampler),
}

impl Strategy {
    pub fn name(&self) -> &'static str {
        match self {
            Strategy::Gated(_) => "practice",
            Strategy::Hold(_) => "word",
            Strategy::Cadence(_) => "alphabet",
        }
    }

    pub fn observe(&mut self, obs: &Observation<'_>) -> Verdict {
        match self {
            Strategy::Gated(gate) => {
                let state = gate.observe(obs);
                Verdict {
                    ready: Some(state.is_validated()),
                    emission: gate.take_auto_finish(),
                }
            }
            Strategy::Hold(hold) => Verdict {
                ready: None,
                emission: hold.observe(obs),
            },
            Strategy::Cadence(cadence) => Verdict {
                ready: None,
                emission: cadence.observe(obs),
            },
        }
    }

    pub fn try_finish(&self) -> Result<Emission, FinishRejected> {
        match self {
            Strategy::Gated(gate) => gate.try_finish(),
            _ => Err(FinishRejected::Unsupported),
        }
    }

    /// Swap in a new target and forget all accumulated state.
    ///
    /// Only the gated strategy has a target; the others keep their configured
    /// hold, zone and cadence and just start over.
    pub fn set_target(&mut self, target: TargetSpec) {
        match self {
            Strategy::Gated(gate) => gate.set_target(target),
            Strategy::Hold(hold) => hold.reset(),
            Strategy::Cadence(cadence) => cadence.reset(),
        }
    }
}
