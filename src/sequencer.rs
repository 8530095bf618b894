//! The multi-row gate/CV sequencer
//!
//! `Sequencer` owns every piece of state for one instance: the gate matrix,
//! the value table, the row playheads and all of the edge detectors. One call
//! to [`Sequencer::process`] advances it by exactly one sample. The call does
//! not allocate; the host keeps one [`SequencerInputs`] and one
//! [`SequencerOutputs`] around and reuses them.
//!
//! Order within a sample:
//!
//! 1. resolve every row's effective clock (ascending, with inheritance)
//! 2. advance rows that triggered
//! 3. reset all rows if the reset line rose
//! 4. apply value and gate-lane randomization
//! 5. apply manual toggles
//! 6. compute gate, CV and light outputs

use crate::cascade::{ClockCascade, ClockState};
use crate::config::SequencerConfig;
use crate::edge::SchmittTrigger;
use crate::matrix::{GateMatrix, ValueTable};
use crate::output::{OutputStage, SequencerOutputs};
use crate::persist;
use crate::randomize::Randomizer;
use crate::row::RowSequencer;
use anyhow::{anyhow, Result};

/// Input line samples for one tick. `None` means nothing is patched in.
#[derive(Debug, Clone, PartialEq)]
pub struct SequencerInputs {
    /// Per-row clock
    pub clocks: Vec<Option<f32>>,
    pub reset: f32,
    /// Per-row "randomize values"
    pub row_randomize: Vec<Option<f32>>,
    /// Per `(row, lane)` "randomize gates", indexed `row * lanes + lane`
    pub lane_randomize: Vec<Option<f32>>,
}

impl SequencerInputs {
    /// An all-unpatched frame sized for `config`
    #[must_use]
    pub fn new(config: &SequencerConfig) -> Self {
        Self {
            clocks: vec![None; config.rows],
            reset: 0.0,
            row_randomize: vec![None; config.rows],
            lane_randomize: vec![None; config.rows * config.lanes],
        }
    }
}

pub struct Sequencer {
    config: SequencerConfig,
    rows: RowSequencer,
    gates: GateMatrix,
    values: ValueTable,
    cascade: ClockCascade,
    reset_trigger: SchmittTrigger,
    // Manual toggle buttons, in gate matrix order
    buttons: Vec<f32>,
    toggle_triggers: Vec<SchmittTrigger>,
    randomizer: Randomizer,
    output: OutputStage,
}

impl Sequencer {
    /// Build a sequencer with all gates armed and every row at step 0
    ///
    /// # Errors
    /// Returns an error if the configuration is invalid
    pub fn new(config: SequencerConfig) -> Result<Self> {
        config.validate()?;
        let thresholds = config.thresholds();
        let cells = config.cell_count().ok_or_else(|| anyhow!("Sequencer is too large"))?;

        Ok(Self {
            rows: RowSequencer::new(config.rows, config.steps),
            gates: GateMatrix::new(config.rows, config.steps, config.lanes),
            values: ValueTable::new(config.rows, config.steps, config.value_min),
            cascade: ClockCascade::new(config.rows, thresholds),
            reset_trigger: SchmittTrigger::new(thresholds),
            buttons: vec![0.0; cells],
            toggle_triggers: vec![SchmittTrigger::new(thresholds); cells],
            randomizer: Randomizer::new(
                config.rows,
                config.lanes,
                (config.value_min, config.value_max),
                thresholds,
                config.seed,
            ),
            output: OutputStage::new(config.gate_high, config.light_division),
            config,
        })
    }

    #[must_use]
    pub const fn config(&self) -> &SequencerConfig {
        &self.config
    }

    #[must_use]
    pub const fn gates(&self) -> &GateMatrix {
        &self.gates
    }

    #[must_use]
    pub const fn values(&self) -> &ValueTable {
        &self.values
    }

    #[must_use]
    pub const fn rows(&self) -> &RowSequencer {
        &self.rows
    }

    #[must_use]
    pub fn index(&self, row: usize) -> usize {
        self.rows.index(row)
    }

    #[must_use]
    pub fn step_count(&self, row: usize) -> usize {
        self.rows.step_count(row)
    }

    /// Effective clocks resolved on the last tick
    #[must_use]
    pub fn clocks(&self) -> &[ClockState] {
        self.cascade.effective()
    }

    /// A fresh input frame for this sequencer's dimensions
    #[must_use]
    pub fn new_inputs(&self) -> SequencerInputs {
        SequencerInputs::new(&self.config)
    }

    /// A fresh output frame for this sequencer's dimensions
    #[must_use]
    pub fn new_outputs(&self) -> SequencerOutputs {
        SequencerOutputs::new(self.config.rows, self.config.steps, self.config.lanes)
    }

    /// Advance by one sample
    pub fn process(&mut self, inputs: &SequencerInputs, outputs: &mut SequencerOutputs) {
        let clocks = self.cascade.resolve(&inputs.clocks);
        for (row, clock) in clocks.iter().enumerate() {
            if clock.trigger {
                self.rows.advance(row);
            }
        }

        if self.reset_trigger.process(inputs.reset) {
            self.rows.reset_all();
        }

        self.randomizer.process(
            &inputs.row_randomize,
            &inputs.lane_randomize,
            &mut self.gates,
            &mut self.values,
        );

        for (i, (trigger, &level)) in
            self.toggle_triggers.iter_mut().zip(&self.buttons).enumerate()
        {
            if trigger.process(level) {
                self.gates.toggle_at(i);
            }
        }

        self.output.render(
            &self.rows,
            self.cascade.effective(),
            &self.gates,
            &self.values,
            outputs,
        );
    }

    /// Step-count control for a row (rounded and clamped when used)
    pub fn set_steps(&mut self, row: usize, value: f32) {
        self.rows.set_steps_control(row, value);
    }

    /// Step value knob; clamped into the configured range
    pub fn set_value(&mut self, row: usize, step: usize, value: f32) -> bool {
        let value = self.config.clamp_value(value);
        self.values.set(row, step, value)
    }

    #[must_use]
    pub fn value(&self, row: usize, step: usize) -> f32 {
        self.values.get(row, step)
    }

    /// Level of a cell's toggle button; a rising edge flips the cell
    pub fn set_button(&mut self, row: usize, step: usize, lane: usize, level: f32) -> bool {
        match self.gates.index(row, step, lane) {
            Some(i) => {
                self.buttons[i] = level;
                true
            }
            None => false,
        }
    }

    #[must_use]
    pub fn button(&self, row: usize, step: usize, lane: usize) -> Option<f32> {
        self.gates.index(row, step, lane).map(|i| self.buttons[i])
    }

    #[must_use]
    pub fn gate(&self, row: usize, step: usize, lane: usize) -> bool {
        self.gates.get(row, step, lane)
    }

    /// Write a cell directly, bypassing the toggle button
    pub fn set_gate(&mut self, row: usize, step: usize, lane: usize, armed: bool) -> bool {
        self.gates.set(row, step, lane, armed)
    }

    /// Arm every gate and return every row to step 0. Values are kept.
    pub fn reset(&mut self) {
        self.gates.fill(true);
        self.rows.reset_all();
    }

    /// Coin-flip every gate. Values are kept.
    pub fn randomize(&mut self) {
        self.randomizer.randomize_all(&mut self.gates);
    }

    /// Re-roll one row's values as if its randomize line had fired
    pub fn randomize_row_values(&mut self, row: usize) {
        self.randomizer.randomize_row_values(row, &mut self.values);
    }

    /// Re-roll one lane of a row as if its randomize line had fired
    pub fn randomize_lane(&mut self, row: usize, lane: usize) {
        self.randomizer.randomize_lane(row, lane, &mut self.gates);
    }

    pub fn reseed(&mut self, seed: u64) {
        self.randomizer.reseed(seed);
    }

    /// Gate pattern as a JSON document
    #[must_use]
    pub fn save_state(&self) -> serde_json::Value {
        persist::gates_to_json(&self.gates)
    }

    /// Restore the gate pattern; tolerant of short or patchy data
    pub fn load_state(&mut self, state: &serde_json::Value) -> usize {
        persist::gates_from_json(&mut self.gates, state)
    }
}
