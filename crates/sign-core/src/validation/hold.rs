use std::time::Duration;

use serde::Serialize;
use tracing::debug;

use super::{Emission, Observation};
use crate::geometry::ZoneRect;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum HoldPhase {
    Sampling,
    Holding,
    Confirmed,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StabilityTracker {
    pub tracked_label: Option<String>,
    pub tracking_started_at: u64,
    pub already_emitted_for_this_hold: bool,
}

impl StabilityTracker {
    fn restart(&mut self, label: Option<String>, now_ms: u64) {
        self.tracked_label = label;
        self.tracking_started_at = now_ms;
        self.already_emitted_for_this_hold = false;
    }
}

/// Emits a label once it has been observed continuously for longer than the
/// hold duration, and then stays quiet until the label changes.
#[derive(Debug, Clone)]
pub struct HoldValidator {
    hold_duration_ms: u64,
    zone: Option<ZoneRect>,
    tracker: StabilityTracker,
}

impl HoldValidator {
    pub fn new(hold_duration: Duration) -> Self {
        Self {
            hold_duration_ms: hold_duration.as_millis() as u64,
            zone: None,
            tracker: StabilityTracker::default(),
        }
    }

    /// Ignore detections whose centre falls outside `zone`.
    pub fn with_zone(mut self, zone: Option<ZoneRect>) -> Self {
        self.zone = zone;
        self
    }

    pub fn tracker(&self) -> &StabilityTracker {
        &self.tracker
    }

    pub fn phase(&self) -> HoldPhase {
        match (&self.tracker.tracked_label, self.tracker.already_emitted_for_this_hold) {
            (None, _) => HoldPhase::Sampling,
            (Some(_), false) => HoldPhase::Holding,
            (Some(_), true) => HoldPhase::Confirmed,
        }
    }

    pub fn observe(&mut self, obs: &Observation<'_>) -> Option<Emission> {
        let best = obs.best().filter(|det| match &self.zone {
            Some(zone) => zone.contains_center_of(&det.bbox, obs.display_width, obs.display_height),
            None => true,
        });
        let label = best.map(|det| det.label.as_str());

        if label != self.tracker.tracked_label.as_deref() {
            if let Some(label) = label {
                debug!("hold tracking {label:?}");
            }
            self.tracker.restart(label.map(str::to_string), obs.now_ms);
            return None;
        }

        let det = best?;
        if self.tracker.already_emitted_for_this_hold {
            return None;
        }
        let held_for = obs.now_ms.saturating_sub(self.tracker.tracking_started_at);
        if held_for <= self.hold_duration_ms {
            return None;
        }

        self.tracker.already_emitted_for_this_hold = true;
        debug!("hold confirmed {:?} after {held_for} ms", det.label);
        Some(Emission {
            symbol: det.label.clone(),
            confidence: det.score,
        })
    }

    /// Forget the current hold. The configured duration and zone stay in force.
    pub fn reset(&mut self) {
        self.tracker = StabilityTracker::default();
    }
}
