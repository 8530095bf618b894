//! Triggered and bulk randomization of the gate and value tables

use crate::edge::{SchmittTrigger, Thresholds};
use crate::matrix::{GateMatrix, ValueTable};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

pub struct Randomizer {
    row_triggers: Vec<SchmittTrigger>,
    // Indexed by row * lanes + lane
    lane_triggers: Vec<SchmittTrigger>,
    lanes: usize,
    value_min: f32,
    value_max: f32,
    rng: StdRng,
}

impl Randomizer {
    #[must_use]
    pub fn new(
        rows: usize,
        lanes: usize,
        value_range: (f32, f32),
        thresholds: Thresholds,
        seed: Option<u64>,
    ) -> Self {
        let rng = seed.map_or_else(StdRng::from_entropy, StdRng::seed_from_u64);
        Self {
            row_triggers: vec![SchmittTrigger::new(thresholds); rows],
            lane_triggers: vec![SchmittTrigger::new(thresholds); rows * lanes],
            lanes,
            value_min: value_range.0,
            value_max: value_range.1,
            rng,
        }
    }

    /// Replace the random source, e.g. to make a run repeatable
    pub fn reseed(&mut self, seed: u64) {
        self.rng = StdRng::seed_from_u64(seed);
    }

    /// Step the randomize lines for one sample and apply any re-rolls.
    ///
    /// `row_lines[r]` and `lane_lines[r * lanes + g]` are `None` when nothing
    /// is patched in; unpatched lines are not stepped at all.
    pub fn process(
        &mut self,
        row_lines: &[Option<f32>],
        lane_lines: &[Option<f32>],
        gates: &mut GateMatrix,
        values: &mut ValueTable,
    ) {
        for row in 0..self.row_triggers.len() {
            if let Some(sample) = row_lines.get(row).copied().flatten() {
                if self.row_triggers[row].process(sample) {
                    self.randomize_row_values(row, values);
                }
            }

            for lane in 0..self.lanes {
                let i = row * self.lanes + lane;
                if let Some(sample) = lane_lines.get(i).copied().flatten() {
                    if self.lane_triggers[i].process(sample) {
                        self.randomize_lane(row, lane, gates);
                    }
                }
            }
        }
    }

    /// Draw a fresh uniform value for every step of a row
    pub fn randomize_row_values(&mut self, row: usize, values: &mut ValueTable) {
        let span = self.value_max - self.value_min;
        for value in values.row_mut(row) {
            *value = self.value_min + self.rng.gen::<f32>() * span;
        }
    }

    /// Coin-flip every step of one lane in a row
    pub fn randomize_lane(&mut self, row: usize, lane: usize, gates: &mut GateMatrix) {
        let rng = &mut self.rng;
        gates.fill_lane_with(row, lane, || rng.gen_bool(0.5));
    }

    /// Coin-flip every gate cell; values are left alone
    pub fn randomize_all(&mut self, gates: &mut GateMatrix) {
        let rng = &mut self.rng;
        gates.fill_with(|| rng.gen_bool(0.5));
    }

    pub fn reset_triggers(&mut self) {
        for trigger in self.row_triggers.iter_mut().chain(self.lane_triggers.iter_mut()) {
            trigger.reset();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn randomizer(rows: usize, lanes: usize) -> Randomizer {
        Randomizer::new(rows, lanes, (0.0, 10.0), Thresholds::default(), Some(42))
    }

    #[test]
    fn test_row_trigger_changes_only_that_row() {
        let mut rnd = randomizer(3, 2);
        let mut gates = GateMatrix::new(3, 8, 2);
        let mut values = ValueTable::new(3, 8, 5.0);

        rnd.process(&[None, Some(0.0), None], &[], &mut gates, &mut values);
        rnd.process(&[None, Some(10.0), None], &[], &mut gates, &mut values);

        assert_eq!(values.row(0), &[5.0; 8]);
        assert_eq!(values.row(2), &[5.0; 8]);
        assert!(values.row(1).iter().all(|&v| v != 5.0));
        assert!(values.row(1).iter().all(|&v| (0.0..=10.0).contains(&v)));
        assert!(gates.as_slice().iter().all(|&g| g));
    }

    #[test]
    fn test_row_values_differ_from_previous_roll() {
        let mut rnd = randomizer(1, 1);
        let mut values = ValueTable::new(1, 16, 0.0);
        for _ in 0..50 {
            let before = values.row(0).to_vec();
            rnd.randomize_row_values(0, &mut values);
            let changed = before.iter().zip(values.row(0)).filter(|(a, b)| a != b).count();
            assert_eq!(changed, 16);
        }
    }

    #[test]
    fn test_lane_trigger_leaves_other_lanes() {
        let mut rnd = randomizer(2, 2);
        let mut gates = GateMatrix::new(2, 64, 2);
        let mut values = ValueTable::new(2, 64, 1.0);

        // Row 1, lane 0
        let lanes = [None, None, Some(10.0), None];
        rnd.process(&[], &lanes, &mut gates, &mut values);

        let flipped = (0..64).filter(|&s| !gates.get(1, s, 0)).count();
        assert!(flipped > 0 && flipped < 64, "expected a mix, got {flipped} off");
        assert!((0..64).all(|s| gates.get(1, s, 1)));
        assert!((0..64).all(|s| gates.get(0, s, 0) && gates.get(0, s, 1)));
        assert_eq!(values.row(1), &[1.0; 64]);
    }

    #[test]
    fn test_sustained_randomize_line_fires_once() {
        let mut rnd = randomizer(1, 1);
        let mut gates = GateMatrix::new(1, 4, 1);
        let mut values = ValueTable::new(1, 4, 0.0);

        rnd.process(&[Some(10.0)], &[], &mut gates, &mut values);
        let after_first = values.row(0).to_vec();
        for _ in 0..10 {
            rnd.process(&[Some(10.0)], &[], &mut gates, &mut values);
        }
        assert_eq!(values.row(0), after_first.as_slice());
    }

    #[test]
    fn test_randomize_all_is_roughly_fair() {
        let mut rnd = randomizer(4, 2);
        let mut gates = GateMatrix::new(4, 16, 2);
        let mut armed = 0;
        let trials = 100;
        for _ in 0..trials {
            rnd.randomize_all(&mut gates);
            armed += gates.as_slice().iter().filter(|&&g| g).count();
        }
        let ratio = f64::from(u32::try_from(armed).unwrap()) / f64::from(trials * 128);
        assert!((ratio - 0.5).abs() < 0.05, "armed ratio {ratio}");
    }

    #[test]
    fn test_same_seed_same_rolls() {
        let mut a = randomizer(1, 1);
        let mut b = randomizer(1, 1);
        let mut va = ValueTable::new(1, 8, 0.0);
        let mut vb = ValueTable::new(1, 8, 0.0);
        a.randomize_row_values(0, &mut va);
        b.randomize_row_values(0, &mut vb);
        assert_eq!(va, vb);
    }
}
