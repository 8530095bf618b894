//! Clock resolution with downward inheritance
//!
//! A row with its own clock input follows that clock. A row without one
//! follows whatever the row above it resolved to on the same sample, which
//! chains down through any run of unpatched rows. Row 0 has nothing above it,
//! so an unpatched row 0 never advances.

use crate::edge::{SchmittTrigger, Thresholds};

/// Resolved clock for one row on one sample
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ClockState {
    /// Rising edge this sample; the row advances
    pub trigger: bool,
    /// Clock is currently high; gates may open
    pub level: bool,
}

#[derive(Debug, Clone)]
pub struct ClockCascade {
    triggers: Vec<SchmittTrigger>,
    effective: Vec<ClockState>,
}

impl ClockCascade {
    #[must_use]
    pub fn new(rows: usize, thresholds: Thresholds) -> Self {
        Self {
            triggers: vec![SchmittTrigger::new(thresholds); rows],
            effective: vec![ClockState::default(); rows],
        }
    }

    /// Resolve every row's effective clock for this sample.
    ///
    /// `clocks[r]` is `None` when row `r` has nothing patched into its clock
    /// input. Rows are resolved in ascending order before anything moves, so
    /// the result does not depend on what the rows do with it.
    pub fn resolve(&mut self, clocks: &[Option<f32>]) -> &[ClockState] {
        for r in 0..self.effective.len() {
            let own = clocks.get(r).copied().flatten();
            self.effective[r] = match own {
                Some(sample) => {
                    let trigger = self.triggers[r].process(sample);
                    ClockState { trigger, level: self.triggers[r].is_high() }
                }
                None if r > 0 => self.effective[r - 1],
                None => ClockState::default(),
            };
        }
        &self.effective
    }

    /// Result of the most recent `resolve`
    #[must_use]
    pub fn effective(&self) -> &[ClockState] {
        &self.effective
    }

    pub fn reset(&mut self) {
        for trigger in &mut self.triggers {
            trigger.reset();
        }
        self.effective.fill(ClockState::default());
    }
}
