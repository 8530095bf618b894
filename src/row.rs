//! Per-row playhead state
//!
//! Each row keeps its current index and the live value of its step-count
//! control. The step count is re-derived from the control on every index
//! change, so turning the knob down mid-run takes effect on the next step.

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Row {
    /// Raw step-count control, rounded and clamped when read
    pub steps_control: f32,
    index: usize,
}

impl Row {
    #[must_use]
    pub const fn index(&self) -> usize {
        self.index
    }
}

/// Index advance/wrap/reset logic for every row of a sequencer
#[derive(Debug, Clone)]
pub struct RowSequencer {
    rows: Vec<Row>,
    max_steps: usize,
}

impl RowSequencer {
    /// All rows start at index 0 with the full step count
    #[must_use]
    pub fn new(rows: usize, max_steps: usize) -> Self {
        #[allow(clippy::cast_precision_loss)]
        let full = max_steps as f32;
        Self { rows: vec![Row { steps_control: full, index: 0 }; rows], max_steps }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    #[must_use]
    pub const fn max_steps(&self) -> usize {
        self.max_steps
    }

    #[must_use]
    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    /// Current index of a row (0 for rows that do not exist)
    #[must_use]
    pub fn index(&self, row: usize) -> usize {
        self.rows.get(row).map_or(0, Row::index)
    }

    /// Effective step count: the control rounded to the nearest integer and
    /// clamped to `[1, max_steps]`. Non-finite controls read as `max_steps`.
    #[must_use]
    pub fn step_count(&self, row: usize) -> usize {
        self.rows.get(row).map_or(1, |r| Self::steps_from_control(r.steps_control, self.max_steps))
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
    fn steps_from_control(control: f32, max_steps: usize) -> usize {
        if !control.is_finite() {
            return max_steps;
        }
        control.round().clamp(1.0, max_steps as f32) as usize
    }

    pub fn set_steps_control(&mut self, row: usize, value: f32) {
        if let Some(r) = self.rows.get_mut(row) {
            r.steps_control = value;
        }
    }

    #[must_use]
    pub fn steps_control(&self, row: usize) -> Option<f32> {
        self.rows.get(row).map(|r| r.steps_control)
    }

    /// Move a row to `new_index`, wrapping to 0 when it is past the row's
    /// current step count
    pub fn set_index(&mut self, row: usize, new_index: usize) {
        let step_count = self.step_count(row);
        if let Some(r) = self.rows.get_mut(row) {
            r.index = if new_index >= step_count { 0 } else { new_index };
        }
    }

    pub fn advance(&mut self, row: usize) {
        let next = self.index(row) + 1;
        self.set_index(row, next);
    }

    pub fn reset_all(&mut self) {
        for r in &mut self.rows {
            r.index = 0;
        }
    }
}
