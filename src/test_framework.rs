//! Test framework for zim-seq using the observability system
//!
//! Runs patches offline with an `ObservationCollector` attached, then hands
//! back the observations together with the engine so tests can also query
//! module parameters after the run.

use crate::graph_engine::GraphEngine;
use crate::observability::{
    GateEvent, ObservationCollector, ParameterEvent, SignalEvent, SignalObserver,
};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

pub const TEST_SAMPLE_RATE: f32 = 44100.0;
pub const TEST_BUFFER_SIZE: usize = 512;

/// Result of running a test patch
pub struct TestResult {
    pub collector: ObservationCollector,
    pub samples: usize,
    pub sample_rate: f32,
}

impl TestResult {
    /// # Errors
    /// Returns an error if the signal did not vary during the test
    pub fn assert_signal_varied(&self, module: &str, port: &str) -> Result<(), String> {
        if self.collector.signal_varied(module, port) {
            Ok(())
        } else {
            Err(format!("Signal {module}.{port} did not vary during test"))
        }
    }

    /// # Errors
    /// Returns an error if the gate never rose during the test
    pub fn assert_gate_fired(&self, module: &str, gate: &str) -> Result<(), String> {
        if self.collector.gate_fired(module, gate) {
            Ok(())
        } else {
            Err(format!("Gate {module}.{gate} did not fire during test"))
        }
    }

    /// # Errors
    /// Returns an error if the gate rose a different number of times
    pub fn assert_gate_count(
        &self,
        module: &str,
        gate: &str,
        expected: usize,
    ) -> Result<(), String> {
        let actual = self.collector.gate_count(module, gate);
        if actual == expected {
            Ok(())
        } else {
            Err(format!("Gate {module}.{gate} fired {actual} times, expected {expected}"))
        }
    }

    /// # Errors
    /// Returns an error if the signal went outside the expected range
    pub fn assert_signal_range(
        &self,
        module: &str,
        port: &str,
        min: f32,
        max: f32,
    ) -> Result<(), String> {
        let (actual_min, actual_max) = self
            .collector
            .signal_range(module, port)
            .ok_or_else(|| format!("No signal data found for {module}.{port}"))?;
        if actual_min >= min && actual_max <= max {
            Ok(())
        } else {
            Err(format!(
                "Signal {module}.{port} range [{actual_min:.3}, {actual_max:.3}] outside expected [{min:.3}, {max:.3}]"
            ))
        }
    }

    #[must_use]
    pub fn gate_fire_count(&self, module: &str, gate: &str) -> usize {
        self.collector.gate_count(module, gate)
    }

    #[must_use]
    pub fn get_signal_values(&self, module: &str, port: &str) -> Vec<f32> {
        self.collector.get_signal_values(module, port)
    }

    /// Sequence of distinct consecutive values on a port
    #[must_use]
    pub fn runs(&self, module: &str, port: &str) -> Vec<f32> {
        self.collector.distinct_runs(module, port)
    }
}

/// Test runner that executes patches with observation
pub struct TestRunner {
    engine: GraphEngine,
    watched: Vec<String>,
}

impl TestRunner {
    #[must_use]
    pub fn new() -> Self {
        Self { engine: GraphEngine::new(), watched: Vec::new() }
    }

    /// Only record signals from these modules
    #[must_use]
    pub fn watching<I, S>(mut self, modules: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.watched = modules.into_iter().map(Into::into).collect();
        self
    }

    /// The engine the last patch was loaded into
    #[must_use]
    pub const fn engine(&self) -> &GraphEngine {
        &self.engine
    }

    /// Run a patch for a specified duration and collect observations
    ///
    /// # Errors
    /// Returns an error if the patch fails to load
    pub fn run_patch(
        &mut self,
        patch_content: &str,
        duration: Duration,
    ) -> Result<TestResult, String> {
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let total = (duration.as_secs_f32() * TEST_SAMPLE_RATE) as usize;
        self.run_patch_samples(patch_content, total)
    }

    /// Run a patch for an exact number of samples, in full buffers plus a
    /// final partial one
    ///
    /// # Errors
    /// Returns an error if the patch fails to load
    pub fn run_patch_samples(
        &mut self,
        patch_content: &str,
        total: usize,
    ) -> Result<TestResult, String> {
        self.engine
            .load_patch(patch_content)
            .map_err(|e| format!("Failed to load patch: {e:#}"))?;
        self.continue_samples(total)
    }

    /// Keep running the loaded patch with a fresh collector
    ///
    /// # Errors
    /// Never fails today; shares the signature of the loading runs
    pub fn continue_samples(&mut self, total: usize) -> Result<TestResult, String> {
        let collector =
            Arc::new(Mutex::new(ObservationCollector::watching(self.watched.clone())));
        self.engine
            .add_observer(Box::new(SharedObservationCollector::new(Arc::clone(&collector))));

        let mut done = 0;
        while done < total {
            let block = TEST_BUFFER_SIZE.min(total - done);
            self.engine.process_for_test(block);
            done += block;
        }

        // The engine keeps its clone of the observer, so take the data out
        let collected =
            std::mem::take(&mut *collector.lock().unwrap_or_else(PoisonError::into_inner));
        Ok(TestResult { collector: collected, samples: done, sample_rate: TEST_SAMPLE_RATE })
    }

    /// Run a test patch from a file
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or the patch fails to run
    pub fn run_patch_file(&mut self, path: &str, duration: Duration) -> Result<TestResult, String> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read patch file {path}: {e}"))?;

        self.run_patch(&content, duration)
    }
}

impl Default for TestRunner {
    fn default() -> Self {
        Self::new()
    }
}

/// Wrapper for shared observation collection in tests
struct SharedObservationCollector {
    collector: Arc<Mutex<ObservationCollector>>,
}

impl SharedObservationCollector {
    const fn new(collector: Arc<Mutex<ObservationCollector>>) -> Self {
        Self { collector }
    }
}

impl SignalObserver for SharedObservationCollector {
    fn observe_signal(&mut self, event: &SignalEvent) {
        if let Ok(mut collector) = self.collector.lock() {
            collector.observe_signal(event);
        }
    }

    fn observe_gate(&mut self, event: &GateEvent) {
        if let Ok(mut collector) = self.collector.lock() {
            collector.observe_gate(event);
        }
    }

    fn observe_parameter(&mut self, event: &ParameterEvent) {
        if let Ok(mut collector) = self.collector.lock() {
            collector.observe_parameter(event);
        }
    }

    fn begin_process_cycle(&mut self, cycle: usize) {
        if let Ok(mut collector) = self.collector.lock() {
            collector.begin_process_cycle(cycle);
        }
    }

    fn end_process_cycle(&mut self, cycle: usize) {
        if let Ok(mut collector) = self.collector.lock() {
            collector.end_process_cycle(cycle);
        }
    }
}
