use serde::Serialize;
use tracing::debug;

use super::{Emission, FinishRejected, Observation, TargetSpec};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum GateState {
    Searching,
    Validated,
}

/// Per-tick match flags. Never carried over to the next tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct ValidationState {
    pub class_match: bool,
    pub zone_match: bool,
}

impl ValidationState {
    pub fn is_validated(&self) -> bool {
        self.class_match && self.zone_match
    }

    pub fn gate(&self) -> GateState {
        if self.is_validated() {
            GateState::Validated
        } else {
            GateState::Searching
        }
    }
}

/// Practice-mode gate for a single target symbol.
#[derive(Debug, Clone)]
pub struct GatedValidator {
    target: TargetSpec,
    state: ValidationState,
    observed: Option<(String, f32)>,
    auto_finish: bool,
    pending_auto_finish: Option<Emission>,
}

impl GatedValidator {
    pub fn new(target: TargetSpec) -> Self {
        Self {
            target,
            state: ValidationState::default(),
            observed: None,
            auto_finish: false,
            pending_auto_finish: None,
        }
    }

    /// Finish automatically whenever the gate opens.
    pub fn with_auto_finish(mut self, enabled: bool) -> Self {
        self.auto_finish = enabled;
        self
    }

    pub fn target(&self) -> &TargetSpec {
        &self.target
    }

    pub fn state(&self) -> ValidationState {
        self.state
    }

    /// Whether a finish would be accepted right now.
    pub fn is_ready(&self) -> bool {
        self.state.is_validated()
    }

    /// Recompute both conditions from this tick's best detection.
    pub fn observe(&mut self, obs: &Observation<'_>) -> ValidationState {
        let was_validated = self.state.is_validated();
        let best = obs.best();

        let state = match best {
            Some(det) => ValidationState {
                class_match: det.label == self.target.expected_label,
                zone_match: self.target.zone.contains_center_of(
                    &det.bbox,
                    obs.display_width,
                    obs.display_height,
                ),
            },
            None => ValidationState::default(),
        };
        self.observed = best.map(|det| (det.label.clone(), det.score));
        self.state = state;

        if state.is_validated() != was_validated {
            debug!(
                target_label = %self.target.expected_label,
                "practice gate {:?}",
                state.gate()
            );
        }

        self.pending_auto_finish = if self.auto_finish && state.is_validated() && !was_validated {
            self.try_finish().ok()
        } else {
            None
        };
        state
    }

    /// Accept a finish only while the latest tick is validated.
    pub fn try_finish(&self) -> Result<Emission, FinishRejected> {
        let Some((observed, score)) = &self.observed else {
            return Err(FinishRejected::NoDetection);
        };
        if !self.state.class_match {
            return Err(FinishRejected::WrongLabel {
                expected: self.target.expected_label.clone(),
                observed: observed.clone(),
            });
        }
        if !self.state.zone_match {
            return Err(FinishRejected::OutsideZone);
        }
        Ok(Emission {
            symbol: self.target.expected_label.clone(),
            confidence: *score,
        })
    }

    pub(crate) fn take_auto_finish(&mut self) -> Option<Emission> {
        self.pending_auto_finish.take()
    }

    pub fn set_target(&mut self, target: TargetSpec) {
        self.target = target;
        self.state = ValidationState::default();
        self.observed = None;
        self.pending_auto_finish = None;
    }
}
