//! Observability for patches
//!
//! Observers see every output sample, every gate rising edge and every
//! parameter change without the modules knowing about it. Tests use
//! `ObservationCollector`; the CLI uses `ConsoleObserver`.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};

/// A single output sample
#[derive(Debug, Clone)]
pub struct SignalEvent {
    pub module: String,
    pub port: String,
    pub sample_index: usize,
    pub value: f32,
}

/// A gate output going high
#[derive(Debug, Clone)]
pub struct GateEvent {
    pub module: String,
    pub gate: String,
    pub sample_index: usize,
    pub triggered: bool,
}

/// A parameter change
#[derive(Debug, Clone)]
pub struct ParameterEvent {
    pub module: String,
    pub parameter: String,
    pub value: f32,
}

/// Trait for observing signals and events in the audio graph
pub trait SignalObserver: Send {
    /// Called for every output sample
    fn observe_signal(&mut self, event: &SignalEvent);

    /// Called when a gate output rises
    fn observe_gate(&mut self, event: &GateEvent);

    /// Called when a parameter changes
    fn observe_parameter(&mut self, event: &ParameterEvent);

    fn begin_process_cycle(&mut self, _cycle: usize) {}

    fn end_process_cycle(&mut self, _cycle: usize) {}
}

/// Collects observations for testing and analysis
#[derive(Default)]
pub struct ObservationCollector {
    pub signals: Vec<SignalEvent>,
    pub gates: Vec<GateEvent>,
    pub parameters: Vec<ParameterEvent>,
    pub cycle_count: usize,
    // Only record these modules' signals; everything when empty
    watched: HashSet<String>,
}

impl ObservationCollector {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Restrict signal recording to the named modules
    #[must_use]
    pub fn watching<I, S>(modules: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self { watched: modules.into_iter().map(Into::into).collect(), ..Self::default() }
    }

    fn records(&self, module: &str) -> bool {
        self.watched.is_empty() || self.watched.contains(module)
    }

    /// All values seen on a port, in sample order
    #[must_use]
    pub fn get_signal_values(&self, module: &str, port: &str) -> Vec<f32> {
        self.signals
            .iter()
            .filter(|event| event.module == module && event.port == port)
            .map(|event| event.value)
            .collect()
    }

    /// The port's value collapsed to runs: each distinct consecutive value once
    #[must_use]
    pub fn distinct_runs(&self, module: &str, port: &str) -> Vec<f32> {
        let mut runs: Vec<f32> = Vec::new();
        for value in self.get_signal_values(module, port) {
            if runs.last().map_or(true, |&last| (last - value).abs() > f32::EPSILON) {
                runs.push(value);
            }
        }
        runs
    }

    #[must_use]
    pub fn get_gate_events(&self, module: &str, gate: &str) -> Vec<&GateEvent> {
        self.gates.iter().filter(|event| event.module == module && event.gate == gate).collect()
    }

    #[must_use]
    pub fn gate_fired(&self, module: &str, gate: &str) -> bool {
        self.gate_count(module, gate) > 0
    }

    /// Number of rising edges seen on a gate output
    #[must_use]
    pub fn gate_count(&self, module: &str, gate: &str) -> usize {
        self.get_gate_events(module, gate).iter().filter(|event| event.triggered).count()
    }

    #[must_use]
    pub fn signal_range(&self, module: &str, port: &str) -> Option<(f32, f32)> {
        let values = self.get_signal_values(module, port);
        if values.is_empty() {
            return None;
        }

        let min = values.iter().fold(f32::INFINITY, |a, &b| a.min(b));
        let max = values.iter().fold(f32::NEG_INFINITY, |a, &b| a.max(b));
        Some((min, max))
    }

    #[must_use]
    pub fn signal_varied(&self, module: &str, port: &str) -> bool {
        self.signal_range(module, port).is_some_and(|(min, max)| max - min > 0.001)
    }
}

impl SignalObserver for ObservationCollector {
    fn observe_signal(&mut self, event: &SignalEvent) {
        if self.records(&event.module) {
            self.signals.push(event.clone());
        }
    }

    fn observe_gate(&mut self, event: &GateEvent) {
        if self.records(&event.module) {
            self.gates.push(event.clone());
        }
    }

    fn observe_parameter(&mut self, event: &ParameterEvent) {
        self.parameters.push(event.clone());
    }

    fn begin_process_cycle(&mut self, cycle: usize) {
        self.cycle_count = cycle;
    }
}

/// Prints gate edges and parameter changes to the console
pub struct ConsoleObserver {
    pub verbose: bool,
    sample_rate: f32,
}

impl ConsoleObserver {
    #[must_use]
    pub const fn new(verbose: bool) -> Self {
        Self { verbose, sample_rate: 44100.0 }
    }

    #[must_use]
    pub fn with_sample_rate(mut self, sample_rate: f32) -> Self {
        self.sample_rate = sample_rate;
        self
    }

    #[allow(clippy::cast_precision_loss)]
    fn seconds(&self, sample_index: usize) -> f32 {
        sample_index as f32 / self.sample_rate
    }
}

impl SignalObserver for ConsoleObserver {
    fn observe_signal(&mut self, event: &SignalEvent) {
        if self.verbose {
            println!("[SIGNAL] {}.{} = {:.3}", event.module, event.port, event.value);
        }
    }

    fn observe_gate(&mut self, event: &GateEvent) {
        if event.triggered {
            println!(
                "[GATE] {:8.3}s {}.{}",
                self.seconds(event.sample_index),
                event.module,
                event.gate
            );
        }
    }

    fn observe_parameter(&mut self, event: &ParameterEvent) {
        println!("[PARAM] {}.{} = {:.3}", event.module, event.parameter, event.value);
    }

    fn begin_process_cycle(&mut self, cycle: usize) {
        if self.verbose {
            println!("[CYCLE] Begin cycle {cycle}");
        }
    }
}

/// Counts gate rising edges per `module.port`, ignoring everything else
pub struct GateCounter {
    counts: Arc<Mutex<BTreeMap<String, usize>>>,
}

impl GateCounter {
    /// Counter writing into a map the caller keeps a handle to
    #[must_use]
    pub const fn new(counts: Arc<Mutex<BTreeMap<String, usize>>>) -> Self {
        Self { counts }
    }
}

impl SignalObserver for GateCounter {
    fn observe_signal(&mut self, _event: &SignalEvent) {}

    fn observe_gate(&mut self, event: &GateEvent) {
        if event.triggered {
            let mut counts = self.counts.lock().unwrap_or_else(PoisonError::into_inner);
            *counts.entry(format!("{}.{}", event.module, event.gate)).or_insert(0) += 1;
        }
    }

    fn observe_parameter(&mut self, _event: &ParameterEvent) {}
}

/// Fans events out to every registered observer
#[derive(Default)]
pub struct ObserverManager {
    observers: Vec<Box<dyn SignalObserver>>,
}

impl ObserverManager {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_observer(&mut self, observer: Box<dyn SignalObserver>) {
        self.observers.push(observer);
    }

    /// True when at least one observer is registered
    #[must_use]
    pub fn is_active(&self) -> bool {
        !self.observers.is_empty()
    }

    pub fn observe_signal(&mut self, module: &str, port: &str, sample_index: usize, value: f32) {
        let event = SignalEvent {
            module: module.to_string(),
            port: port.to_string(),
            sample_index,
            value,
        };

        for observer in &mut self.observers {
            observer.observe_signal(&event);
        }
    }

    pub fn observe_gate(&mut self, module: &str, gate: &str, sample_index: usize, triggered: bool) {
        let event = GateEvent {
            module: module.to_string(),
            gate: gate.to_string(),
            sample_index,
            triggered,
        };

        for observer in &mut self.observers {
            observer.observe_gate(&event);
        }
    }

    pub fn observe_parameter(&mut self, module: &str, parameter: &str, value: f32) {
        let event = ParameterEvent {
            module: module.to_string(),
            parameter: parameter.to_string(),
            value,
        };

        for observer in &mut self.observers {
            observer.observe_parameter(&event);
        }
    }

    pub fn begin_process_cycle(&mut self, cycle: usize) {
        for observer in &mut self.observers {
            observer.begin_process_cycle(cycle);
        }
    }

    pub fn end_process_cycle(&mut self, cycle: usize) {
        for observer in &mut self.observers {
            observer.end_process_cycle(cycle);
        }
    }
}
