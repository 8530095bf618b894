//! Sequencer configuration
//!
//! Everything that is fixed for the lifetime of a sequencer instance lives
//! here: table dimensions, voltage ranges and trigger thresholds.

use crate::edge::Thresholds;
use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

pub const DEFAULT_ROWS: usize = 4;
pub const DEFAULT_STEPS: usize = 16;
pub const DEFAULT_LANES: usize = 2;

/// Level emitted on a gate output while the gate is open
pub const GATE_HIGH_VOLTAGE: f32 = 10.0;

/// Samples between light intensity refreshes
pub const LIGHT_DIVISION: u32 = 128;

/// Largest gate matrix (rows * steps * lanes) a sequencer may allocate
pub const MAX_CELLS: usize = 1 << 16;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SequencerConfig {
    /// Number of independently clocked rows
    pub rows: usize,
    /// Maximum steps per row
    pub steps: usize,
    /// Gate lanes per step
    pub lanes: usize,
    pub value_min: f32,
    pub value_max: f32,
    pub gate_high: f32,
    pub trigger_low: f32,
    pub trigger_high: f32,
    pub light_division: u32,
    /// Fixed seed for the random source; entropy when unset
    pub seed: Option<u64>,
}

impl Default for SequencerConfig {
    fn default() -> Self {
        let thresholds = Thresholds::default();
        Self {
            rows: DEFAULT_ROWS,
            steps: DEFAULT_STEPS,
            lanes: DEFAULT_LANES,
            value_min: 0.0,
            value_max: 10.0,
            gate_high: GATE_HIGH_VOLTAGE,
            trigger_low: thresholds.low,
            trigger_high: thresholds.high,
            light_division: LIGHT_DIVISION,
            seed: None,
        }
    }
}

impl SequencerConfig {
    #[must_use]
    pub fn with_dimensions(rows: usize, steps: usize, lanes: usize) -> Self {
        Self { rows, steps, lanes, ..Self::default() }
    }

    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    #[must_use]
    pub const fn thresholds(&self) -> Thresholds {
        Thresholds { low: self.trigger_low, high: self.trigger_high }
    }

    /// Number of gate cells in the matrix, `None` on overflow
    #[must_use]
    pub fn cell_count(&self) -> Option<usize> {
        self.rows.checked_mul(self.steps)?.checked_mul(self.lanes)
    }

    /// Check that the configuration describes a usable sequencer
    ///
    /// # Errors
    /// Returns an error if any dimension is zero, the matrix would exceed
    /// [`MAX_CELLS`], the value range is empty or inverted, or the trigger
    /// thresholds do not leave a hysteresis band
    pub fn validate(&self) -> Result<()> {
        if self.rows == 0 || self.steps == 0 || self.lanes == 0 {
            return Err(anyhow!(
                "Sequencer dimensions must be non-zero (rows={}, steps={}, lanes={})",
                self.rows,
                self.steps,
                self.lanes
            ));
        }
        if !self.cell_count().is_some_and(|cells| cells <= MAX_CELLS) {
            return Err(anyhow!(
                "Sequencer of {} x {} x {} cells exceeds the limit of {} cells",
                self.rows,
                self.steps,
                self.lanes,
                MAX_CELLS
            ));
        }
        if !(self.value_min.is_finite() && self.value_max.is_finite())
            || self.value_min >= self.value_max
        {
            return Err(anyhow!(
                "Invalid value range [{}, {}]",
                self.value_min,
                self.value_max
            ));
        }
        if !(self.trigger_low < self.trigger_high) {
            return Err(anyhow!(
                "Trigger low threshold {} must be below high threshold {}",
                self.trigger_low,
                self.trigger_high
            ));
        }
        if self.light_division == 0 {
            return Err(anyhow!("Light division must be at least 1"));
        }
        Ok(())
    }

    /// Clamp a step value into the configured range
    #[must_use]
    pub fn clamp_value(&self, value: f32) -> f32 {
        if value.is_nan() {
            return self.value_min;
        }
        value.clamp(self.value_min, self.value_max)
    }
}
