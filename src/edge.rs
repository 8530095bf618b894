//! Schmitt-trigger edge detection for clock, reset and trigger lines
//!
//! Every discrete input of the sequencer (clocks, reset, randomize lines and
//! the per-cell toggle buttons) goes through one of these. The detector is a
//! two-state automaton with separate enter/exit thresholds so a noisy signal
//! hovering around a single level cannot chatter.

/// Latched level of a trigger line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TriggerState {
    #[default]
    Low,
    High,
}

/// Enter/exit thresholds for a Schmitt trigger
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Thresholds {
    /// At or below this the line returns to `Low`
    pub low: f32,
    /// At or above this the line enters `High`
    pub high: f32,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self { low: 0.0, high: 1.0 }
    }
}

/// Advance the automaton by one sample.
///
/// Returns the new state and whether this sample was a rising edge.
/// NaN compares false against both thresholds and leaves the state alone.
#[must_use]
pub fn step(state: TriggerState, sample: f32, thresholds: Thresholds) -> (TriggerState, bool) {
    match state {
        TriggerState::Low if sample >= thresholds.high => (TriggerState::High, true),
        TriggerState::High if sample <= thresholds.low => (TriggerState::Low, false),
        _ => (state, false),
    }
}

/// Rising-edge detector with hysteresis
#[derive(Debug, Clone, Copy)]
pub struct SchmittTrigger {
    state: TriggerState,
    thresholds: Thresholds,
}

impl SchmittTrigger {
    #[must_use]
    pub fn new(thresholds: Thresholds) -> Self {
        Self { state: TriggerState::Low, thresholds }
    }

    /// Feed one sample; true only on the sample the line goes high
    pub fn process(&mut self, sample: f32) -> bool {
        let (state, fired) = step(self.state, sample, self.thresholds);
        self.state = state;
        fired
    }

    #[must_use]
    pub fn is_high(&self) -> bool {
        self.state == TriggerState::High
    }

    #[must_use]
    pub const fn state(&self) -> TriggerState {
        self.state
    }

    pub fn reset(&mut self) {
        self.state = TriggerState::Low;
    }
}

impl Default for SchmittTrigger {
    fn default() -> Self {
        Self::new(Thresholds::default())
    }
}
