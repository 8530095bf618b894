//! Gate and value tables owned by the sequencer
//!
//! `GateMatrix` is addressed by `(row, step, lane)` and stored flat in
//! row-major order with the lane varying fastest:
//!
//! ```text
//! index = row * steps * lanes + step * lanes + lane
//! ```
//!
//! The same ordering is used for the persisted gate sequence, the toggle
//! buttons and the light intensities, so all of them can be walked together.

/// Boolean gate pattern, one cell per `(row, step, lane)`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GateMatrix {
    rows: usize,
    steps: usize,
    lanes: usize,
    cells: Vec<bool>,
}

impl GateMatrix {
    /// Create a matrix with every gate armed
    #[must_use]
    pub fn new(rows: usize, steps: usize, lanes: usize) -> Self {
        Self { rows, steps, lanes, cells: vec![true; rows * steps * lanes] }
    }

    #[must_use]
    pub const fn rows(&self) -> usize {
        self.rows
    }

    #[must_use]
    pub const fn steps(&self) -> usize {
        self.steps
    }

    #[must_use]
    pub const fn lanes(&self) -> usize {
        self.lanes
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Flat position of a cell, or `None` if any coordinate is out of range
    #[must_use]
    pub const fn index(&self, row: usize, step: usize, lane: usize) -> Option<usize> {
        if row < self.rows && step < self.steps && lane < self.lanes {
            Some(row * self.steps * self.lanes + step * self.lanes + lane)
        } else {
            None
        }
    }

    /// Armed state of a cell; out-of-range coordinates read as disarmed
    #[must_use]
    pub fn get(&self, row: usize, step: usize, lane: usize) -> bool {
        self.index(row, step, lane).is_some_and(|i| self.cells[i])
    }

    /// Set a cell, returning false if the coordinates are out of range
    pub fn set(&mut self, row: usize, step: usize, lane: usize, armed: bool) -> bool {
        match self.index(row, step, lane) {
            Some(i) => {
                self.cells[i] = armed;
                true
            }
            None => false,
        }
    }

    /// Invert a cell, returning its new state
    pub fn toggle(&mut self, row: usize, step: usize, lane: usize) -> Option<bool> {
        let i = self.index(row, step, lane)?;
        self.cells[i] = !self.cells[i];
        Some(self.cells[i])
    }

    pub fn toggle_at(&mut self, index: usize) {
        if let Some(cell) = self.cells.get_mut(index) {
            *cell = !*cell;
        }
    }

    pub fn fill(&mut self, armed: bool) {
        self.cells.fill(armed);
    }

    /// Rewrite every step of one lane in a row
    pub fn fill_lane_with(&mut self, row: usize, lane: usize, mut f: impl FnMut() -> bool) {
        if row >= self.rows || lane >= self.lanes {
            return;
        }
        for step in 0..self.steps {
            let i = row * self.steps * self.lanes + step * self.lanes + lane;
            self.cells[i] = f();
        }
    }

    pub fn fill_with(&mut self, mut f: impl FnMut() -> bool) {
        for cell in &mut self.cells {
            *cell = f();
        }
    }

    #[must_use]
    pub fn as_slice(&self) -> &[bool] {
        &self.cells
    }

    /// The pattern as a flat 0/1 sequence in storage order
    #[must_use]
    pub fn to_flat(&self) -> Vec<u8> {
        self.cells.iter().map(|&armed| u8::from(armed)).collect()
    }

    /// Overwrite cells from a flat sequence in storage order.
    ///
    /// `None` entries and entries past the end of the matrix are skipped, so
    /// a short or patchy sequence leaves the remaining cells as they were.
    /// Returns the number of cells written.
    pub fn restore_flat<I>(&mut self, entries: I) -> usize
    where
        I: IntoIterator<Item = Option<bool>>,
    {
        let mut written = 0;
        for (cell, entry) in self.cells.iter_mut().zip(entries) {
            if let Some(armed) = entry {
                *cell = armed;
                written += 1;
            }
        }
        written
    }
}

/// Continuous per-step values, one per `(row, step)`
#[derive(Debug, Clone, PartialEq)]
pub struct ValueTable {
    rows: usize,
    steps: usize,
    values: Vec<f32>,
}

impl ValueTable {
    #[must_use]
    pub fn new(rows: usize, steps: usize, initial: f32) -> Self {
        Self { rows, steps, values: vec![initial; rows * steps] }
    }

    #[must_use]
    pub const fn rows(&self) -> usize {
        self.rows
    }

    #[must_use]
    pub const fn steps(&self) -> usize {
        self.steps
    }

    #[must_use]
    pub const fn index(&self, row: usize, step: usize) -> Option<usize> {
        if row < self.rows && step < self.steps {
            Some(row * self.steps + step)
        } else {
            None
        }
    }

    /// Value at a step; out-of-range coordinates read as 0
    #[must_use]
    pub fn get(&self, row: usize, step: usize) -> f32 {
        self.index(row, step).map_or(0.0, |i| self.values[i])
    }

    pub fn set(&mut self, row: usize, step: usize, value: f32) -> bool {
        match self.index(row, step) {
            Some(i) => {
                self.values[i] = value;
                true
            }
            None => false,
        }
    }

    /// All step values of one row
    #[must_use]
    pub fn row(&self, row: usize) -> &[f32] {
        if row >= self.rows {
            return &[];
        }
        &self.values[row * self.steps..(row + 1) * self.steps]
    }

    pub fn row_mut(&mut self, row: usize) -> &mut [f32] {
        if row >= self.rows {
            return &mut [];
        }
        &mut self.values[row * self.steps..(row + 1) * self.steps]
    }
}
