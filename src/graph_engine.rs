//! Graph-based engine behind the CLI and REPL

use crate::config::SequencerConfig;
use crate::graph::{Connection, ConnectionExpr, GraphExecutor, GraphModule, ModuleInfo};
use crate::graph_modules::{GraphClock, GraphMonitor, GraphSequencer};
use crate::modules::{parse_module_type, ModuleType};
use crate::observability::{GateCounter, SignalObserver};
use crate::parser::{is_blank, parse_line, Command};
use crate::persist;
use anyhow::{anyhow, Context, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Name of the implicit monitor created by `out <- ...`
pub const OUTPUT_MODULE: &str = "_output";

const DEFAULT_CLOCK_HZ: f32 = 2.0;
const DEFAULT_CLOCK_WIDTH: f32 = 0.5;
const DEFAULT_MONITOR_GAIN: f32 = 0.1;
const RENDER_BLOCK: usize = 512;

/// What an offline render produced
#[derive(Debug, Clone)]
pub struct RenderReport {
    pub samples: usize,
    pub sample_rate: f32,
    /// Rising edges per `module.port`
    pub gate_counts: BTreeMap<String, usize>,
}

impl std::fmt::Display for RenderReport {
    #[allow(clippy::cast_precision_loss)]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(
            f,
            "Rendered {} samples ({:.2}s at {} Hz)",
            self.samples,
            self.samples as f32 / self.sample_rate,
            self.sample_rate
        )?;
        for (port, count) in &self.gate_counts {
            writeln!(f, "  {port:<20} {count} gates")?;
        }
        Ok(())
    }
}

/// Audio engine driving the graph executor
pub struct GraphEngine {
    graph: Arc<Mutex<GraphExecutor>>,
    stream: Option<cpal::Stream>,
    is_running: bool,
}

impl Default for GraphEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl GraphEngine {
    #[must_use]
    pub fn new() -> Self {
        Self { graph: Arc::new(Mutex::new(GraphExecutor::new())), stream: None, is_running: false }
    }

    // The audio thread never leaves the graph half-updated, so a poisoned
    // lock still guards a usable graph
    fn graph(&self) -> MutexGuard<'_, GraphExecutor> {
        self.graph.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Load a patch from text content, replacing the current one
    ///
    /// # Errors
    /// Returns an error naming the first line that fails to parse or apply
    pub fn load_patch(&mut self, patch_content: &str) -> Result<()> {
        self.clear_patch();

        for (number, line) in patch_content.lines().enumerate() {
            if is_blank(line) {
                continue;
            }
            self.process_line(line)
                .with_context(|| format!("Error on line {}: '{}'", number + 1, line.trim()))?;
        }

        Ok(())
    }

    /// Load a patch file
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or the patch is invalid
    pub fn load_patch_file<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read patch file {}", path.display()))?;
        self.load_patch(&content)
    }

    /// Process a line of patch code
    ///
    /// # Errors
    /// Returns an error if the line cannot be parsed or applied
    pub fn process_line(&mut self, line: &str) -> Result<String> {
        match parse_line(line)? {
            Command::CreateModule { name, module_type, params } => {
                self.create_module(&name, module_type, &params)?;
                Ok(format!("Created module: {name} ({module_type})"))
            }
            Command::Connect { from, to } => {
                let dest = if to == "out" {
                    self.ensure_output()?;
                    format!("{OUTPUT_MODULE}.mono")
                } else if let Some(port) = to.strip_prefix("out.") {
                    self.ensure_output()?;
                    format!("{OUTPUT_MODULE}.{port}")
                } else {
                    to
                };
                self.parse_connection(&dest, &from)
            }
            Command::SetParam { module, param, value } => {
                self.set_module_param(&module, &param, value)?;
                Ok(format!("Set {module}.{param} = {value}"))
            }
        }
    }

    fn ensure_output(&self) -> Result<()> {
        if self.graph().get_module(OUTPUT_MODULE).is_none() {
            self.create_module(OUTPUT_MODULE, ModuleType::Monitor, &[])?;
        }
        Ok(())
    }

    /// Connect a source expression to `module.port`
    ///
    /// # Errors
    /// Returns an error if the destination is not `module.port` or the
    /// expression is malformed
    pub fn parse_connection(&self, dest: &str, source_expr: &str) -> Result<String> {
        let (dest_module, dest_port) = dest
            .split_once('.')
            .filter(|(module, port)| !module.is_empty() && !port.is_empty() && !port.contains('.'))
            .ok_or_else(|| anyhow!("Invalid destination '{}'. Use: module.port", dest))?;

        let expression = Self::parse_connection_expr(source_expr)?;
        self.graph().add_connection(Connection {
            to_module: dest_module.to_string(),
            to_port: dest_port.to_string(),
            expression,
        });

        Ok(format!("Connected: {dest} <- {source_expr}"))
    }

    /// Parse `a.x * 0.5 + b.y + 1` style expressions
    fn parse_connection_expr(expr: &str) -> Result<ConnectionExpr> {
        let mut terms = Vec::new();
        let mut offset: Option<f32> = None;

        for term in expr.split('+').map(str::trim) {
            if let Ok(constant) = term.parse::<f32>() {
                *offset.get_or_insert(0.0) += constant;
            } else {
                terms.push(Self::parse_term(term)?);
            }
        }

        let base = match terms.len() {
            0 => return Err(anyhow!("Connection expression has no source: {}", expr)),
            1 => terms.remove(0),
            _ => ConnectionExpr::Sum { exprs: terms },
        };

        Ok(match offset {
            Some(offset) => ConnectionExpr::Offset { expr: Box::new(base), offset },
            None => base,
        })
    }

    /// One product term: `module.port` times any number of constants
    fn parse_term(term: &str) -> Result<ConnectionExpr> {
        let mut source = None;
        let mut factor: Option<f32> = None;

        for part in term.split('*').map(str::trim) {
            if let Ok(k) = part.parse::<f32>() {
                *factor.get_or_insert(1.0) *= k;
            } else if let Some((module, port)) = part.split_once('.') {
                if source.is_some() {
                    return Err(anyhow!("Only one source per product: {}", term));
                }
                source = Some(ConnectionExpr::Direct {
                    module: module.to_string(),
                    port: port.to_string(),
                });
            } else {
                return Err(anyhow!("Invalid connection expression: {}", term));
            }
        }

        let source = source.ok_or_else(|| anyhow!("Invalid connection expression: {}", term))?;
        Ok(match factor {
            Some(factor) => ConnectionExpr::Scaled { expr: Box::new(source), factor },
            None => source,
        })
    }

    fn create_module(&self, name: &str, module_type: ModuleType, params: &[f32]) -> Result<()> {
        let module = Self::build_module(module_type, params)?;
        self.graph().add_module(name.to_string(), module);
        Ok(())
    }

    fn build_module(module_type: ModuleType, params: &[f32]) -> Result<Box<dyn GraphModule>> {
        Ok(match module_type {
            ModuleType::Sequencer => {
                let defaults = SequencerConfig::default();
                let config = SequencerConfig::with_dimensions(
                    count_param(params, 0, "rows", defaults.rows)?,
                    count_param(params, 1, "steps", defaults.steps)?,
                    count_param(params, 2, "lanes", defaults.lanes)?,
                );
                Box::new(GraphSequencer::new(config)?)
            }
            ModuleType::Clock => Box::new(GraphClock::new(
                params.first().copied().unwrap_or(DEFAULT_CLOCK_HZ),
                params.get(1).copied().unwrap_or(DEFAULT_CLOCK_WIDTH),
            )),
            ModuleType::Monitor => {
                Box::new(GraphMonitor::new(params.first().copied().unwrap_or(DEFAULT_MONITOR_GAIN)))
            }
        })
    }

    /// Set a module parameter
    ///
    /// # Errors
    /// Returns an error if the module doesn't exist or rejects the parameter
    pub fn set_module_param(&self, module: &str, param: &str, value: f32) -> Result<()> {
        self.graph().set_module_param(module, param, value)
    }

    /// Read a module parameter
    #[must_use]
    pub fn module_param(&self, module: &str, param: &str) -> Option<f32> {
        self.graph().get_module(module)?.get_param(param)
    }

    fn with_module<T>(&self, name: &str, f: impl FnOnce(&mut dyn GraphModule) -> T) -> Result<T> {
        let mut graph = self.graph();
        let module =
            graph.get_module_mut(name).ok_or_else(|| anyhow!("Module '{}' not found", name))?;
        Ok(f(&mut **module))
    }

    /// Return a module to its initial pattern
    ///
    /// # Errors
    /// Returns an error if the module doesn't exist
    pub fn reset_module(&self, name: &str) -> Result<()> {
        self.with_module(name, |module| module.reset())
    }

    /// Randomize a module's pattern
    ///
    /// # Errors
    /// Returns an error if the module doesn't exist
    pub fn randomize_module(&self, name: &str) -> Result<()> {
        self.with_module(name, |module| module.randomize())
    }

    /// Momentarily press a sequencer cell button (1-based coordinates)
    ///
    /// # Errors
    /// Returns an error if the module doesn't exist or the cell is out of range
    pub fn press(&self, module: &str, row: usize, step: usize, lane: usize) -> Result<()> {
        self.set_module_param(module, &format!("press{row}_{step}_{lane}"), 1.0)
    }

    /// # Errors
    /// Returns an error if the module doesn't exist or has no state to save
    pub fn save_module_state(&self, name: &str) -> Result<Value> {
        self.with_module(name, |module| module.save_state())?
            .ok_or_else(|| anyhow!("Module '{}' has no saved state", name))
    }

    /// # Errors
    /// Returns an error if the module doesn't exist or rejects the state
    pub fn load_module_state(&self, name: &str, state: &Value) -> Result<()> {
        self.with_module(name, |module| module.load_state(state))?
    }

    /// Save a module's state to a JSON file
    ///
    /// # Errors
    /// Returns an error if the module has no state or the file can't be written
    pub fn save_state_file<P: AsRef<Path>>(&self, name: &str, path: P) -> Result<()> {
        persist::save_file(&self.save_module_state(name)?, path)
    }

    /// Restore a module's state from a JSON file
    ///
    /// # Errors
    /// Returns an error if the file can't be read or the module rejects it
    pub fn load_state_file<P: AsRef<Path>>(&self, name: &str, path: P) -> Result<()> {
        let state = persist::load_file(path)?;
        self.load_module_state(name, &state)
    }

    /// Text view of a module's state
    ///
    /// # Errors
    /// Returns an error if the module doesn't exist or has nothing to show
    pub fn describe_module(&self, name: &str) -> Result<String> {
        let graph = self.graph();
        let module = graph.get_module(name).ok_or_else(|| anyhow!("Module '{}' not found", name))?;
        module.describe().ok_or_else(|| anyhow!("Module '{}' has nothing to show", name))
    }

    /// Text views of every module that has one, in execution order
    #[must_use]
    pub fn describe_all(&self) -> Vec<(String, String)> {
        let graph = self.graph();
        graph
            .list_modules()
            .into_iter()
            .filter_map(|name| {
                let text = graph.get_module(&name)?.describe()?;
                Some((name, text))
            })
            .collect()
    }

    /// Start audio processing
    ///
    /// # Errors
    /// Returns an error if the audio system cannot be initialized
    pub fn start(&mut self) -> Result<()> {
        if self.is_running {
            return Ok(());
        }

        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| anyhow!("No audio output device available"))?;
        let config = device.default_output_config()?;

        #[allow(clippy::cast_precision_loss)]
        let sample_rate = config.sample_rate().0 as f32;
        self.graph().set_sample_rate(sample_rate);

        let graph = Arc::clone(&self.graph);
        let stream = match config.sample_format() {
            cpal::SampleFormat::F32 => Self::build_stream::<f32>(&device, &config.into(), graph)?,
            cpal::SampleFormat::I16 => Self::build_stream::<i16>(&device, &config.into(), graph)?,
            cpal::SampleFormat::U16 => Self::build_stream::<u16>(&device, &config.into(), graph)?,
            _ => return Err(anyhow!("Unsupported sample format")),
        };

        stream.play()?;
        self.stream = Some(stream);
        self.is_running = true;

        println!("Audio engine started at {sample_rate} Hz");
        Ok(())
    }

    /// Stop audio processing
    pub fn stop(&mut self) {
        if let Some(stream) = self.stream.take() {
            drop(stream);
        }
        self.is_running = false;
    }

    #[must_use]
    pub fn sample_rate(&self) -> f32 {
        self.graph().sample_rate()
    }

    #[must_use]
    pub const fn is_running(&self) -> bool {
        self.is_running
    }

    /// Run the patch offline for `duration`, counting gate edges
    pub fn render(&self, duration: Duration) -> RenderReport {
        let counts = Arc::new(Mutex::new(BTreeMap::new()));
        let sample_rate = {
            let mut graph = self.graph();
            graph.add_observer(Box::new(GateCounter::new(Arc::clone(&counts))));
            graph.sample_rate()
        };

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let total = (duration.as_secs_f64() * f64::from(sample_rate)) as usize;
        let mut done = 0;
        while done < total {
            let block = RENDER_BLOCK.min(total - done);
            self.graph().process(block);
            done += block;
        }

        let gate_counts = counts.lock().unwrap_or_else(PoisonError::into_inner).clone();
        RenderReport { samples: done, sample_rate, gate_counts }
    }

    /// Clear the patch
    pub fn clear_patch(&mut self) {
        self.stop();
        *self.graph() = GraphExecutor::new();
    }

    #[must_use]
    pub fn list_modules(&self) -> Vec<String> {
        self.graph().list_modules()
    }

    #[must_use]
    pub fn inspect_module(&self, name: &str) -> Option<ModuleInfo> {
        self.graph().inspect_module(name)
    }

    /// Ports of a module type, from a default instance
    #[must_use]
    pub fn inspect_module_type(module_type_name: &str) -> Option<ModuleInfo> {
        let module_type = parse_module_type(module_type_name).ok()?;
        let module = Self::build_module(module_type, &[]).ok()?;
        Some(ModuleInfo {
            name: module_type.to_string(),
            inputs: module.inputs(),
            outputs: module.outputs(),
        })
    }

    #[must_use]
    pub fn validate_connections(&self) -> Vec<String> {
        self.graph().validate_connections()
    }

    pub fn add_observer(&self, observer: Box<dyn SignalObserver>) {
        self.graph().add_observer(observer);
    }

    /// Process the graph directly, without audio output
    pub fn process_for_test(&self, sample_count: usize) {
        self.graph().process(sample_count);
    }

    /// Current value of an output port's last processed sample
    #[must_use]
    pub fn output_sample(&self, module: &str, port: &str) -> Option<f32> {
        self.graph().get_output(module, port)?.last().copied()
    }

    fn build_stream<T>(
        device: &cpal::Device,
        config: &cpal::StreamConfig,
        graph: Arc<Mutex<GraphExecutor>>,
    ) -> Result<cpal::Stream>
    where
        T: cpal::Sample + cpal::SizedSample + cpal::FromSample<f32>,
    {
        let channels = config.channels as usize;
        let err_fn = |err| eprintln!("Audio stream error: {err}");

        let stream = device.build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                data.fill(T::EQUILIBRIUM);

                let Ok(mut graph) = graph.lock() else {
                    return;
                };
                graph.process(data.len() / channels);

                let (Some(left), Some(right)) = (
                    graph.get_output(OUTPUT_MODULE, "left"),
                    graph.get_output(OUTPUT_MODULE, "right"),
                ) else {
                    return;
                };

                for (frame, (&l, &r)) in data.chunks_mut(channels).zip(left.iter().zip(right)) {
                    if channels >= 2 {
                        frame[0] = T::from_sample(l);
                        frame[1] = T::from_sample(r);
                    } else {
                        frame[0] = T::from_sample((l + r) * 0.5);
                    }
                }
            },
            err_fn,
            None,
        )?;

        Ok(stream)
    }
}

/// Whole-number module parameter such as a table dimension
fn count_param(params: &[f32], index: usize, what: &str, default: usize) -> Result<usize> {
    let Some(&value) = params.get(index) else {
        return Ok(default);
    };
    if value.is_finite() && value >= 1.0 && value.fract() == 0.0 {
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        Ok(value as usize)
    } else {
        Err(anyhow!("{} must be a whole number of at least 1, got {}", what, value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expression_forms() {
        let expr = GraphEngine::parse_connection_expr("clk.gate").unwrap();
        assert!(matches!(expr, ConnectionExpr::Direct { .. }));

        let expr = GraphEngine::parse_connection_expr("0.5 * clk.gate").unwrap();
        assert!(matches!(expr, ConnectionExpr::Scaled { .. }));

        let expr = GraphEngine::parse_connection_expr("seq.cv1 * 0.1 + seq.cv2 + 1").unwrap();
        let ConnectionExpr::Offset { expr, offset } = expr else {
            panic!("expected an offset");
        };
        assert!((offset - 1.0).abs() < f32::EPSILON);
        assert!(matches!(*expr, ConnectionExpr::Sum { ref exprs } if exprs.len() == 2));
    }

    #[test]
    fn test_bad_expressions() {
        assert!(GraphEngine::parse_connection_expr("3").is_err());
        assert!(GraphEngine::parse_connection_expr("a.x * b.y").is_err());
        assert!(GraphEngine::parse_connection_expr("nonsense").is_err());
    }

    #[test]
    fn test_out_creates_monitor() {
        let mut engine = GraphEngine::new();
        engine.load_patch("clk: clock 4\nout <- clk.gate * 0.1").unwrap();
        assert_eq!(engine.list_modules(), vec!["clk".to_string(), OUTPUT_MODULE.to_string()]);
        assert!(engine.validate_connections().is_empty());
    }

    #[test]
    fn test_sequencer_dimensions() {
        let mut engine = GraphEngine::new();
        engine.load_patch("seq: seq 2 8 3").unwrap();
        let info = engine.inspect_module("seq").unwrap();
        assert_eq!(info.outputs.len(), 2 + 2 * 3);
        assert!(engine.load_patch("seq: seq 2.5").is_err());
        assert!(engine.load_patch("seq: seq 0").is_err());
    }

    #[test]
    fn test_oversized_sequencer_is_rejected() {
        let mut engine = GraphEngine::new();
        let err = engine.load_patch("s: seq 10000000000 10000000000 2").unwrap_err();
        assert!(format!("{err:#}").contains("exceeds the limit"));
        assert!(engine.load_patch("s: seq 100000 100000 100").is_err());
        assert!(engine.list_modules().is_empty());
    }

    #[test]
    fn test_error_names_line() {
        let mut engine = GraphEngine::new();
        let err = engine.load_patch("# header\nseq: seq\nseq.steps9 <- 4").unwrap_err();
        assert!(err.to_string().contains("line 3"));
    }

    #[test]
    fn test_unknown_module_commands() {
        let engine = GraphEngine::new();
        assert!(engine.reset_module("ghost").is_err());
        assert!(engine.describe_module("ghost").is_err());
        assert!(engine.press("ghost", 1, 1, 1).is_err());
    }

    #[test]
    fn test_clock_has_no_state() {
        let mut engine = GraphEngine::new();
        engine.load_patch("clk: clock").unwrap();
        assert!(engine.save_module_state("clk").is_err());
        assert!(engine.load_module_state("clk", &serde_json::json!({})).is_err());
    }

    #[test]
    fn test_inspect_module_type() {
        let info = GraphEngine::inspect_module_type("seq").unwrap();
        assert!(info.inputs.iter().any(|p| p.name == "clock4"));
        assert!(GraphEngine::inspect_module_type("vco").is_none());
    }
}
