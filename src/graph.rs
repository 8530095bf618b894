//! Graph execution engine for audio-rate modular patches
//!
//! This module implements the graph executor that:
//! - Supports named inputs/outputs per module
//! - Allows multiple connections to the same input (mixing)
//! - Processes everything at audio rate, including clocks and gates
//! - Tells each module which of its inputs are actually patched

#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::module_name_repetitions)]

use crate::observability::{ObserverManager, SignalObserver};
use anyhow::{anyhow, Result};
use serde_json::Value;
use std::collections::{HashMap, HashSet};

/// What kind of signal a port carries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortKind {
    /// Continuous audio or control voltage
    Signal,
    /// Gate/trigger; rising edges are reported to observers
    Gate,
}

/// Describes a module input or output port
#[derive(Debug, Clone)]
pub struct PortDescriptor {
    pub name: String,
    pub default_value: f32,
    pub description: String,
    pub kind: PortKind,
}

impl PortDescriptor {
    pub fn signal(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            default_value: 0.0,
            description: description.into(),
            kind: PortKind::Signal,
        }
    }

    pub fn gate(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            default_value: 0.0,
            description: description.into(),
            kind: PortKind::Gate,
        }
    }
}

/// Buffer of audio samples for a single port
pub type PortBuffer = Vec<f32>;

/// Collection of buffers for all ports of a module
pub struct PortBuffers {
    buffers: HashMap<String, PortBuffer>,
    connected: HashSet<String>,
}

impl PortBuffers {
    #[must_use]
    pub fn new() -> Self {
        Self { buffers: HashMap::new(), connected: HashSet::new() }
    }

    #[must_use]
    pub fn get(&self, port: &str) -> Option<&PortBuffer> {
        self.buffers.get(port)
    }

    pub fn get_mut(&mut self, port: &str) -> Option<&mut PortBuffer> {
        self.buffers.get_mut(port)
    }

    /// Slice for a port, empty if the port has no buffer
    #[must_use]
    pub fn slice(&self, port: &str) -> &[f32] {
        self.buffers.get(port).map_or(&[], Vec::as_slice)
    }

    pub fn get_or_default(&mut self, port: &str, size: usize, default: f32) -> &mut PortBuffer {
        let buffer = self.buffers.entry(port.to_string()).or_insert_with(|| vec![default; size]);
        if buffer.len() != size {
            buffer.resize(size, default);
        }
        buffer
    }

    /// Whether anything is patched into this port
    #[must_use]
    pub fn is_connected(&self, port: &str) -> bool {
        self.connected.contains(port)
    }

    pub fn mark_connected(&mut self, port: &str) {
        if !self.connected.contains(port) {
            self.connected.insert(port.to_string());
        }
    }
}

impl Default for PortBuffers {
    fn default() -> Self {
        Self::new()
    }
}

/// Trait for audio modules with named ports
pub trait GraphModule: Send {
    /// Get descriptors for all input ports
    fn inputs(&self) -> Vec<PortDescriptor>;

    /// Get descriptors for all output ports
    fn outputs(&self) -> Vec<PortDescriptor>;

    /// Process audio buffers
    fn process(&mut self, inputs: &PortBuffers, outputs: &mut PortBuffers, sample_count: usize);

    /// Set a parameter by name
    fn set_param(&mut self, name: &str, value: f32) -> Result<()>;

    /// Get current parameter value
    fn get_param(&self, name: &str) -> Option<f32>;

    fn set_sample_rate(&mut self, _sample_rate: f32) {}

    /// Return to the module's initial state
    fn reset(&mut self) {}

    fn randomize(&mut self) {}

    /// Persistent state beyond parameters, if the module has any
    fn save_state(&self) -> Option<Value> {
        None
    }

    fn load_state(&mut self, _state: &Value) -> Result<()> {
        Err(anyhow!("Module has no persistent state"))
    }

    /// Human readable snapshot of internal state
    fn describe(&self) -> Option<String> {
        None
    }
}

/// Represents a connection expression with potential scaling/offset
#[derive(Debug, Clone)]
pub enum ConnectionExpr {
    /// Direct connection from a module output
    Direct { module: String, port: String },
    /// Scaled connection (e.g., clk.gate * 0.5)
    Scaled { expr: Box<ConnectionExpr>, factor: f32 },
    /// Offset connection (e.g., clk.gate + 2)
    Offset { expr: Box<ConnectionExpr>, offset: f32 },
    /// Sum of multiple connections
    Sum { exprs: Vec<ConnectionExpr> },
}

impl ConnectionExpr {
    /// Evaluate this expression given output buffers from all modules
    pub fn evaluate(&self, outputs: &HashMap<String, PortBuffers>, buffer: &mut PortBuffer) {
        match self {
            Self::Direct { module, port } => {
                if let Some(source) = outputs.get(module).and_then(|o| o.get(port)) {
                    let n = buffer.len().min(source.len());
                    buffer[..n].copy_from_slice(&source[..n]);
                }
            }
            Self::Scaled { expr, factor } => {
                expr.evaluate(outputs, buffer);
                for sample in buffer.iter_mut() {
                    *sample *= factor;
                }
            }
            Self::Offset { expr, offset } => {
                expr.evaluate(outputs, buffer);
                for sample in buffer.iter_mut() {
                    *sample += offset;
                }
            }
            Self::Sum { exprs } => {
                buffer.fill(0.0);

                let mut temp_buffer = vec![0.0; buffer.len()];
                for expr in exprs {
                    temp_buffer.fill(0.0);
                    expr.evaluate(outputs, &mut temp_buffer);
                    for (out, sample) in buffer.iter_mut().zip(&temp_buffer) {
                        *out += sample;
                    }
                }
            }
        }
    }

    /// Modules this expression reads from
    pub fn sources(&self) -> Vec<(&str, &str)> {
        match self {
            Self::Direct { module, port } => vec![(module.as_str(), port.as_str())],
            Self::Scaled { expr, .. } | Self::Offset { expr, .. } => expr.sources(),
            Self::Sum { exprs } => exprs.iter().flat_map(Self::sources).collect(),
        }
    }
}

/// Represents a connection to a module input
#[derive(Debug, Clone)]
pub struct Connection {
    pub to_module: String,
    pub to_port: String,
    pub expression: ConnectionExpr,
}

/// The main graph executor
pub struct GraphExecutor {
    modules: HashMap<String, Box<dyn GraphModule>>,
    connections: Vec<Connection>,
    output_buffers: HashMap<String, PortBuffers>,
    input_buffers: HashMap<String, PortBuffers>,
    // Modules run in the order they were added
    execution_order: Vec<String>,
    observers: ObserverManager,
    // Last sample of each observed gate output, for edge detection
    gate_levels: HashMap<(String, String), f32>,
    samples_processed: usize,
    cycle: usize,
    sample_rate: f32,
}

impl GraphExecutor {
    pub fn new() -> Self {
        Self {
            modules: HashMap::new(),
            connections: Vec::new(),
            output_buffers: HashMap::new(),
            input_buffers: HashMap::new(),
            execution_order: Vec::new(),
            observers: ObserverManager::new(),
            gate_levels: HashMap::new(),
            samples_processed: 0,
            cycle: 0,
            sample_rate: 44100.0,
        }
    }

    pub fn add_module(&mut self, name: String, mut module: Box<dyn GraphModule>) {
        module.set_sample_rate(self.sample_rate);
        if self.modules.insert(name.clone(), module).is_none() {
            self.execution_order.push(name);
        }
    }

    pub fn add_connection(&mut self, connection: Connection) {
        self.connections.push(connection);
    }

    pub fn add_observer(&mut self, observer: Box<dyn SignalObserver>) {
        self.observers.add_observer(observer);
    }

    pub fn set_sample_rate(&mut self, sample_rate: f32) {
        self.sample_rate = sample_rate;
        for module in self.modules.values_mut() {
            module.set_sample_rate(sample_rate);
        }
    }

    pub const fn sample_rate(&self) -> f32 {
        self.sample_rate
    }

    pub const fn samples_processed(&self) -> usize {
        self.samples_processed
    }

    pub fn process(&mut self, sample_count: usize) {
        self.prepare_buffers(sample_count);
        self.observers.begin_process_cycle(self.cycle);

        for module_name in &self.execution_order {
            let Some(module) = self.modules.get_mut(module_name) else {
                continue;
            };
            let Some(module_inputs) = self.input_buffers.get_mut(module_name) else {
                continue;
            };

            // Evaluate all connections to this module
            for conn in self.connections.iter().filter(|c| c.to_module == *module_name) {
                module_inputs.mark_connected(&conn.to_port);
                let buffer = module_inputs.get_or_default(&conn.to_port, sample_count, 0.0);
                conn.expression.evaluate(&self.output_buffers, buffer);
            }

            if let Some(module_outputs) = self.output_buffers.get_mut(module_name) {
                module.process(module_inputs, module_outputs, sample_count);
            }
        }

        if self.observers.is_active() {
            self.notify_observers(sample_count);
        }

        self.observers.end_process_cycle(self.cycle);
        self.samples_processed += sample_count;
        self.cycle += 1;
    }

    fn prepare_buffers(&mut self, sample_count: usize) {
        for (name, module) in &self.modules {
            let outputs = self.output_buffers.entry(name.clone()).or_default();
            for port in module.outputs() {
                outputs.get_or_default(&port.name, sample_count, 0.0).fill(0.0);
            }

            let inputs = self.input_buffers.entry(name.clone()).or_default();
            for port in module.inputs() {
                inputs.get_or_default(&port.name, sample_count, port.default_value);
            }
        }
    }

    fn notify_observers(&mut self, sample_count: usize) {
        for name in &self.execution_order {
            let (Some(module), Some(outputs)) =
                (self.modules.get(name), self.output_buffers.get(name))
            else {
                continue;
            };

            for port in module.outputs() {
                let samples = outputs.slice(&port.name);
                for (i, &value) in samples.iter().take(sample_count).enumerate() {
                    let sample_index = self.samples_processed + i;
                    self.observers.observe_signal(name, &port.name, sample_index, value);

                    if port.kind == PortKind::Gate {
                        let last = self
                            .gate_levels
                            .entry((name.clone(), port.name.clone()))
                            .or_insert(0.0);
                        let triggered = value > 0.0 && *last <= 0.0;
                        if triggered {
                            self.observers.observe_gate(name, &port.name, sample_index, true);
                        }
                        *last = value;
                    }
                }
            }
        }
    }

    pub fn get_output(&self, module: &str, port: &str) -> Option<&PortBuffer> {
        self.output_buffers.get(module)?.get(port)
    }

    pub fn get_module(&self, name: &str) -> Option<&dyn GraphModule> {
        self.modules.get(name).map(AsRef::as_ref)
    }

    pub fn get_module_mut(&mut self, name: &str) -> Option<&mut Box<dyn GraphModule>> {
        self.modules.get_mut(name)
    }

    pub fn set_module_param(&mut self, module: &str, param: &str, value: f32) -> Result<()> {
        let target =
            self.modules.get_mut(module).ok_or_else(|| anyhow!("Module '{module}' not found"))?;
        target.set_param(param, value)?;
        self.observers.observe_parameter(module, param, value);
        Ok(())
    }

    /// Get information about a module's ports
    pub fn inspect_module(&self, name: &str) -> Option<ModuleInfo> {
        let module = self.modules.get(name)?;
        Some(ModuleInfo {
            name: name.to_string(),
            inputs: module.inputs(),
            outputs: module.outputs(),
        })
    }

    /// List all modules in the graph, in execution order
    pub fn list_modules(&self) -> Vec<String> {
        self.execution_order.clone()
    }

    /// Get all connections in the graph
    pub fn list_connections(&self) -> &[Connection] {
        &self.connections
    }

    /// Validate that all connections reference valid modules and ports
    pub fn validate_connections(&self) -> Vec<String> {
        let mut errors = Vec::new();

        for conn in &self.connections {
            if let Some(module) = self.modules.get(&conn.to_module) {
                if !module.inputs().iter().any(|p| p.name == conn.to_port) {
                    errors.push(format!(
                        "Module '{to_module}' has no input port '{to_port}'",
                        to_module = conn.to_module,
                        to_port = conn.to_port
                    ));
                }
            } else {
                errors.push(format!("Module '{to_module}' not found", to_module = conn.to_module));
            }

            for (module, port) in conn.expression.sources() {
                if let Some(src_module) = self.modules.get(module) {
                    if !src_module.outputs().iter().any(|p| p.name == port) {
                        errors.push(format!("Module '{module}' has no output port '{port}'"));
                    }
                } else {
                    errors.push(format!("Source module '{module}' not found"));
                }
            }
        }

        errors
    }
}

impl Default for GraphExecutor {
    fn default() -> Self {
        Self::new()
    }
}

/// Information about a module for introspection
#[derive(Debug, Clone)]
pub struct ModuleInfo {
    pub name: String,
    pub inputs: Vec<PortDescriptor>,
    pub outputs: Vec<PortDescriptor>,
}
