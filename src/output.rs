//! Gate, CV and light computation

use crate::cascade::ClockState;
use crate::matrix::{GateMatrix, ValueTable};
use crate::row::RowSequencer;

/// Light intensity levels for a step button
pub const LIGHT_CURRENT_ARMED: f32 = 1.0;
pub const LIGHT_CURRENT_DISARMED: f32 = 0.33;
pub const LIGHT_ARMED: f32 = 0.5;
pub const LIGHT_DISARMED: f32 = 0.0;

/// Fires once every `division` calls
#[derive(Debug, Clone, Copy)]
pub struct ClockDivider {
    division: u32,
    clock: u32,
}

impl ClockDivider {
    #[must_use]
    pub fn new(division: u32) -> Self {
        Self { division: division.max(1), clock: 0 }
    }

    pub fn process(&mut self) -> bool {
        self.clock += 1;
        if self.clock >= self.division {
            self.clock = 0;
            true
        } else {
            false
        }
    }

    pub fn reset(&mut self) {
        self.clock = 0;
    }
}

/// Intensity for one gate button light
#[must_use]
pub const fn cell_brightness(is_current: bool, armed: bool) -> f32 {
    match (is_current, armed) {
        (true, true) => LIGHT_CURRENT_ARMED,
        (true, false) => LIGHT_CURRENT_DISARMED,
        (false, true) => LIGHT_ARMED,
        (false, false) => LIGHT_DISARMED,
    }
}

/// Per-sample output frame, preallocated for the sequencer's dimensions
#[derive(Debug, Clone, PartialEq)]
pub struct SequencerOutputs {
    /// Indexed by `row * lanes + lane`
    pub gates: Vec<f32>,
    /// Indexed by row
    pub cv: Vec<f32>,
    /// Same order as the gate matrix; only refreshed every light division
    pub lights: Vec<f32>,
    lanes: usize,
}

impl SequencerOutputs {
    #[must_use]
    pub fn new(rows: usize, steps: usize, lanes: usize) -> Self {
        Self {
            gates: vec![0.0; rows * lanes],
            cv: vec![0.0; rows],
            lights: vec![0.0; rows * steps * lanes],
            lanes,
        }
    }

    #[must_use]
    pub fn gate(&self, row: usize, lane: usize) -> f32 {
        if lane >= self.lanes {
            return 0.0;
        }
        self.gates.get(row * self.lanes + lane).copied().unwrap_or(0.0)
    }

    #[must_use]
    pub fn cv(&self, row: usize) -> f32 {
        self.cv.get(row).copied().unwrap_or(0.0)
    }
}

#[derive(Debug, Clone)]
pub struct OutputStage {
    gate_high: f32,
    light_divider: ClockDivider,
}

impl OutputStage {
    #[must_use]
    pub fn new(gate_high: f32, light_division: u32) -> Self {
        Self { gate_high, light_divider: ClockDivider::new(light_division) }
    }

    /// Gate level for a lane: open only while the clock is high on an armed step
    #[must_use]
    pub fn gate_voltage(&self, clock_high: bool, armed: bool) -> f32 {
        if clock_high && armed {
            self.gate_high
        } else {
            0.0
        }
    }

    /// Fill `out` from the current playheads and tables
    pub fn render(
        &mut self,
        rows: &RowSequencer,
        clocks: &[ClockState],
        gates: &GateMatrix,
        values: &ValueTable,
        out: &mut SequencerOutputs,
    ) {
        let lanes = gates.lanes();
        let refresh_lights = self.light_divider.process();

        for row in 0..rows.len() {
            let index = rows.index(row);
            let level = clocks.get(row).is_some_and(|c| c.level);

            for lane in 0..lanes {
                let armed = gates.get(row, index, lane);
                out.gates[row * lanes + lane] = self.gate_voltage(level, armed);
            }
            out.cv[row] = values.get(row, index);

            if refresh_lights {
                for step in 0..gates.steps() {
                    let is_current = level && step == index;
                    for lane in 0..lanes {
                        if let Some(i) = gates.index(row, step, lane) {
                            out.lights[i] = cell_brightness(is_current, gates.get(row, step, lane));
                        }
                    }
                }
            }
        }
    }

    pub fn reset(&mut self) {
        self.light_divider.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_divider_fires_every_nth() {
        let mut divider = ClockDivider::new(4);
        let fired: Vec<bool> = (0..8).map(|_| divider.process()).collect();
        assert_eq!(fired, vec![false, false, false, true, false, false, false, true]);
    }

    #[test]
    fn test_brightness_levels_are_distinct() {
        let levels = [
            cell_brightness(true, true),
            cell_brightness(true, false),
            cell_brightness(false, true),
            cell_brightness(false, false),
        ];
        for (i, a) in levels.iter().enumerate() {
            for b in &levels[i + 1..] {
                assert!((a - b).abs() > f32::EPSILON);
            }
        }
    }

    #[test]
    fn test_gate_follows_clock_level_on_armed_step() {
        let stage = OutputStage::new(10.0, 128);
        assert!((stage.gate_voltage(true, true) - 10.0).abs() < f32::EPSILON);
        assert!(stage.gate_voltage(false, true).abs() < f32::EPSILON);
        assert!(stage.gate_voltage(true, false).abs() < f32::EPSILON);
    }

    #[test]
    fn test_render_two_step_row() {
        let mut stage = OutputStage::new(10.0, 1);
        let mut rows = RowSequencer::new(1, 4);
        rows.set_steps_control(0, 2.0);
        let mut gates = GateMatrix::new(1, 4, 1);
        gates.set(0, 1, 0, false);
        let mut values = ValueTable::new(1, 4, 0.0);
        values.set(0, 0, 1.5);
        values.set(0, 1, 7.0);
        let mut out = SequencerOutputs::new(1, 4, 1);
        let clock_high = [ClockState { trigger: false, level: true }];

        stage.render(&rows, &clock_high, &gates, &values, &mut out);
        assert!((out.gate(0, 0) - 10.0).abs() < f32::EPSILON);
        assert!((out.cv(0) - 1.5).abs() < f32::EPSILON);
        assert!((out.lights[0] - LIGHT_CURRENT_ARMED).abs() < f32::EPSILON);
        assert!((out.lights[1] - LIGHT_DISARMED).abs() < f32::EPSILON);

        rows.advance(0);
        stage.render(&rows, &clock_high, &gates, &values, &mut out);
        assert!(out.gate(0, 0).abs() < f32::EPSILON);
        assert!((out.cv(0) - 7.0).abs() < f32::EPSILON);
        assert!((out.lights[0] - LIGHT_ARMED).abs() < f32::EPSILON);
        assert!((out.lights[1] - LIGHT_CURRENT_DISARMED).abs() < f32::EPSILON);
    }
}
