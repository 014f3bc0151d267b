use super::{Emission, Observation};

/// Fixed-cadence sampler for free alphabet capture.
///
/// Every `every`-th tick the best detection is emitted if it clears
/// `min_confidence`. The zone plays no part here.
#[derive(Debug, Clone)]
pub struct CadenceSampler {
    every: u64,
    min_confidence: f32,
    ticks: u64,
}

impl CadenceSampler {
    /// `every` is clamped to at least one tick.
    pub fn new(every: u64, min_confidence: f32) -> Self {
        Self {
            every: every.max(1),
            min_confidence,
            ticks: 0,
        }
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub fn observe(&mut self, obs: &Observation<'_>) -> Option<Emission> {
        self.ticks = self.ticks.wrapping_add(1);
        if self.ticks % self.every != 0 {
            return None;
        }
        let best = obs.best()?;
        (best.score >= self.min_confidence).then(|| Emission {
            symbol: best.label.clone(),
            confidence: best.score,
        })
    }

    pub fn reset(&mut self) {
        self.ticks = 0;
    }
}
