//! Module implementations for the graph-based engine

#![allow(clippy::module_name_repetitions)]

use crate::config::SequencerConfig;
use crate::edge::SchmittTrigger;
use crate::graph::{GraphModule, PortBuffers, PortDescriptor};
use crate::output::{
    cell_brightness, SequencerOutputs, LIGHT_ARMED, LIGHT_CURRENT_ARMED, LIGHT_CURRENT_DISARMED,
};
use crate::sequencer::{Sequencer, SequencerInputs};
use anyhow::{anyhow, Result};
use serde_json::Value;
use std::fmt::Write as _;

const CLOCK_HIGH: f32 = 10.0;

/// Slice for an input only if something is patched into it
fn patched<'a>(inputs: &'a PortBuffers, port: &str) -> Option<&'a [f32]> {
    inputs.is_connected(port).then(|| inputs.slice(port))
}

fn sample_at(line: Option<&[f32]>, i: usize) -> Option<f32> {
    line.map(|samples| samples.get(i).copied().unwrap_or(0.0))
}

/// Fill `slots` with sample `i` of each port; unpatched ports read `None`
fn read_lines(slots: &mut [Option<f32>], inputs: &PortBuffers, ports: &[String], i: usize) {
    for (slot, port) in slots.iter_mut().zip(ports) {
        *slot = sample_at(patched(inputs, port), i);
    }
}

/// Parse `prefix` followed by N 1-based indices joined by `_`, e.g.
/// `value2_13`, into 0-based indices
fn parse_indices<const N: usize>(name: &str, prefix: &str) -> Option<[usize; N]> {
    let rest = name.strip_prefix(prefix)?;
    let mut parts = rest.split('_');
    let mut indices = [0; N];
    for slot in &mut indices {
        let n: usize = parts.next()?.parse().ok()?;
        *slot = n.checked_sub(1)?;
    }
    parts.next().is_none().then_some(indices)
}

/// Parameters understood by the sequencer module
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SeqParam {
    Steps { row: usize },
    Value { row: usize, step: usize },
    Button { row: usize, step: usize, lane: usize },
    Press { row: usize, step: usize, lane: usize },
    Gate { row: usize, step: usize, lane: usize },
    Index { row: usize },
    Seed,
}

impl SeqParam {
    fn parse(name: &str) -> Option<Self> {
        if name == "seed" {
            return Some(Self::Seed);
        }
        if let Some([row]) = parse_indices(name, "steps") {
            return Some(Self::Steps { row });
        }
        if let Some([row]) = parse_indices(name, "index") {
            return Some(Self::Index { row });
        }
        if let Some([row, step]) = parse_indices(name, "value") {
            return Some(Self::Value { row, step });
        }
        if let Some([row, step, lane]) = parse_indices(name, "button") {
            return Some(Self::Button { row, step, lane });
        }
        if let Some([row, step, lane]) = parse_indices(name, "press") {
            return Some(Self::Press { row, step, lane });
        }
        parse_indices(name, "gate").map(|[row, step, lane]| Self::Gate { row, step, lane })
    }
}

/// Port names, computed once so processing never formats strings
struct SeqPorts {
    clock: Vec<String>,
    rnd: Vec<String>,
    grnd: Vec<String>,
    // cv1..cvR then gate1_1..gateR_G, matching the scratch buffers
    outputs: Vec<String>,
}

impl SeqPorts {
    fn new(rows: usize, lanes: usize) -> Self {
        let lane_names = |prefix: &str| {
            (1..=rows)
                .flat_map(|r| (1..=lanes).map(move |g| (r, g)))
                .map(|(r, g)| format!("{prefix}{r}_{g}"))
                .collect::<Vec<_>>()
        };
        let mut outputs: Vec<String> = (1..=rows).map(|r| format!("cv{r}")).collect();
        outputs.extend(lane_names("gate"));

        Self {
            clock: (1..=rows).map(|r| format!("clock{r}")).collect(),
            rnd: (1..=rows).map(|r| format!("rnd{r}")).collect(),
            grnd: lane_names("grnd"),
            outputs,
        }
    }
}

/// The multi-row sequencer as a patchable module
pub struct GraphSequencer {
    seq: Sequencer,
    frame_in: SequencerInputs,
    frame_out: SequencerOutputs,
    ports: SeqPorts,
    scratch: Vec<Vec<f32>>,
    // Buttons held by `press`, let go after the next block
    pending_release: Vec<(usize, usize, usize)>,
}

impl GraphSequencer {
    /// # Errors
    /// Returns an error if the configuration is invalid
    pub fn new(config: SequencerConfig) -> Result<Self> {
        let seq = Sequencer::new(config)?;
        let config = seq.config();
        let ports = SeqPorts::new(config.rows, config.lanes);
        Ok(Self {
            frame_in: seq.new_inputs(),
            frame_out: seq.new_outputs(),
            scratch: vec![Vec::new(); ports.outputs.len()],
            ports,
            pending_release: Vec::new(),
            seq,
        })
    }

    #[must_use]
    pub const fn sequencer(&self) -> &Sequencer {
        &self.seq
    }

    pub fn sequencer_mut(&mut self) -> &mut Sequencer {
        &mut self.seq
    }

    fn out_of_range(&self, name: &str) -> anyhow::Error {
        let config = self.seq.config();
        anyhow!(
            "Parameter '{}' is outside this sequencer ({} rows, {} steps, {} lanes)",
            name,
            config.rows,
            config.steps,
            config.lanes
        )
    }
}

impl GraphModule for GraphSequencer {
    fn inputs(&self) -> Vec<PortDescriptor> {
        let mut ports = vec![PortDescriptor::gate("reset", "Reset all rows to step 1")];
        for (r, name) in self.ports.clock.iter().enumerate() {
            let description = if r == 0 {
                "Clock for row 1 (row stops when unpatched)".to_string()
            } else {
                format!("Clock for row {} (follows row {} when unpatched)", r + 1, r)
            };
            ports.push(PortDescriptor::gate(name.clone(), description));
        }
        for (r, name) in self.ports.rnd.iter().enumerate() {
            let description = format!("Randomize row {} values", r + 1);
            ports.push(PortDescriptor::gate(name.clone(), description));
        }
        for name in &self.ports.grnd {
            ports.push(PortDescriptor::gate(name.clone(), "Randomize one gate lane of a row"));
        }
        ports
    }

    fn outputs(&self) -> Vec<PortDescriptor> {
        let rows = self.seq.config().rows;
        self.ports
            .outputs
            .iter()
            .enumerate()
            .map(|(i, name)| {
                if i < rows {
                    PortDescriptor::signal(name.clone(), format!("Row {} step value", i + 1))
                } else {
                    PortDescriptor::gate(name.clone(), "Gate while clock is high on an armed step")
                }
            })
            .collect()
    }

    fn process(&mut self, inputs: &PortBuffers, outputs: &mut PortBuffers, sample_count: usize) {
        let reset = inputs.slice("reset");

        for buffer in &mut self.scratch {
            buffer.resize(sample_count, 0.0);
        }

        for i in 0..sample_count {
            read_lines(&mut self.frame_in.clocks, inputs, &self.ports.clock, i);
            read_lines(&mut self.frame_in.row_randomize, inputs, &self.ports.rnd, i);
            read_lines(&mut self.frame_in.lane_randomize, inputs, &self.ports.grnd, i);
            self.frame_in.reset = reset.get(i).copied().unwrap_or(0.0);

            self.seq.process(&self.frame_in, &mut self.frame_out);

            let values = self.frame_out.cv.iter().chain(&self.frame_out.gates);
            for (buffer, &value) in self.scratch.iter_mut().zip(values) {
                buffer[i] = value;
            }
        }

        for (name, buffer) in self.ports.outputs.iter().zip(&self.scratch) {
            if let Some(out) = outputs.get_mut(name) {
                let n = out.len().min(buffer.len());
                out[..n].copy_from_slice(&buffer[..n]);
            }
        }

        for (row, step, lane) in self.pending_release.drain(..) {
            self.seq.set_button(row, step, lane, 0.0);
        }
    }

    fn set_param(&mut self, name: &str, value: f32) -> Result<()> {
        let param = SeqParam::parse(name).ok_or_else(|| anyhow!("Unknown parameter: {}", name))?;
        let rows = self.seq.config().rows;
        let accepted = match param {
            SeqParam::Steps { row } => {
                if row < rows {
                    self.seq.set_steps(row, value);
                }
                row < rows
            }
            SeqParam::Value { row, step } => self.seq.set_value(row, step, value),
            SeqParam::Button { row, step, lane } => self.seq.set_button(row, step, lane, value),
            SeqParam::Press { row, step, lane } => {
                let pressed = self.seq.set_button(row, step, lane, 1.0);
                if pressed {
                    self.pending_release.push((row, step, lane));
                }
                pressed
            }
            SeqParam::Seed => {
                #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
                self.seq.reseed(value as u64);
                true
            }
            SeqParam::Gate { .. } | SeqParam::Index { .. } => {
                return Err(anyhow!("Parameter '{}' is read-only", name));
            }
        };

        if accepted {
            Ok(())
        } else {
            Err(self.out_of_range(name))
        }
    }

    #[allow(clippy::cast_precision_loss)]
    fn get_param(&self, name: &str) -> Option<f32> {
        match SeqParam::parse(name)? {
            SeqParam::Steps { row } => self.seq.rows().steps_control(row),
            SeqParam::Value { row, step } => {
                self.seq.values().index(row, step).map(|_| self.seq.value(row, step))
            }
            SeqParam::Button { row, step, lane } | SeqParam::Press { row, step, lane } => {
                self.seq.button(row, step, lane)
            }
            SeqParam::Gate { row, step, lane } => self
                .seq
                .gates()
                .index(row, step, lane)
                .map(|_| if self.seq.gate(row, step, lane) { 1.0 } else { 0.0 }),
            SeqParam::Index { row } => {
                (row < self.seq.config().rows).then(|| self.seq.index(row) as f32)
            }
            SeqParam::Seed => None,
        }
    }

    fn reset(&mut self) {
        self.seq.reset();
    }

    fn randomize(&mut self) {
        self.seq.randomize();
    }

    fn save_state(&self) -> Option<Value> {
        Some(self.seq.save_state())
    }

    fn load_state(&mut self, state: &Value) -> Result<()> {
        self.seq.load_state(state);
        Ok(())
    }

    fn describe(&self) -> Option<String> {
        let config = self.seq.config();
        let clocks = self.seq.clocks();
        let mut text = String::new();

        for row in 0..config.rows {
            let index = self.seq.index(row);
            let level = clocks.get(row).is_some_and(|c| c.level);
            let _ = writeln!(
                text,
                "row {}  step {:>2}/{:<2}  cv {:5.2}  clock {}",
                row + 1,
                index + 1,
                self.seq.step_count(row),
                self.seq.value(row, index),
                if level { "high" } else { "low" }
            );
            for lane in 0..config.lanes {
                let _ = write!(text, "  lane {}  ", lane + 1);
                for step in 0..config.steps {
                    if step > 0 && step % 4 == 0 {
                        text.push(' ');
                    }
                    let brightness =
                        cell_brightness(level && step == index, self.seq.gate(row, step, lane));
                    text.push(light_glyph(brightness));
                }
                text.push('\n');
            }
        }
        Some(text)
    }
}

/// Character for a step light intensity
fn light_glyph(brightness: f32) -> char {
    if brightness >= LIGHT_CURRENT_ARMED {
        '#'
    } else if brightness >= LIGHT_ARMED {
        'o'
    } else if brightness >= LIGHT_CURRENT_DISARMED {
        '+'
    } else {
        '.'
    }
}

/// Pulse clock with gate and trigger outputs
pub struct GraphClock {
    frequency: f32,
    width: f32,
    phase: f64,
    sample_rate: f32,
    reset_trigger: SchmittTrigger,
}

impl GraphClock {
    #[must_use]
    pub fn new(frequency: f32, width: f32) -> Self {
        Self {
            frequency,
            width: width.clamp(0.0, 1.0),
            phase: 0.0,
            sample_rate: 44100.0,
            reset_trigger: SchmittTrigger::default(),
        }
    }
}

impl GraphModule for GraphClock {
    fn inputs(&self) -> Vec<PortDescriptor> {
        vec![PortDescriptor::gate("reset", "Restart the cycle on a rising edge")]
    }

    fn outputs(&self) -> Vec<PortDescriptor> {
        vec![
            PortDescriptor::gate("gate", "High for the first `width` of each cycle (0/10 V)"),
            PortDescriptor::gate("trig", "One-sample pulse at the start of each cycle"),
        ]
    }

    fn process(&mut self, inputs: &PortBuffers, outputs: &mut PortBuffers, sample_count: usize) {
        let reset = inputs.slice("reset");
        let mut gate = vec![0.0; sample_count];
        let mut trig = vec![0.0; sample_count];
        let increment = f64::from(self.frequency) / f64::from(self.sample_rate);

        for i in 0..sample_count {
            if self.reset_trigger.process(reset.get(i).copied().unwrap_or(0.0)) {
                self.phase = 0.0;
            }

            if self.phase == 0.0 {
                trig[i] = CLOCK_HIGH;
            }
            if self.phase < f64::from(self.width) {
                gate[i] = CLOCK_HIGH;
            }

            self.phase += increment;
            if self.phase >= 1.0 {
                self.phase = 0.0;
            }
        }

        if let Some(out) = outputs.get_mut("gate") {
            let n = out.len().min(sample_count);
            out[..n].copy_from_slice(&gate[..n]);
        }
        if let Some(out) = outputs.get_mut("trig") {
            let n = out.len().min(sample_count);
            out[..n].copy_from_slice(&trig[..n]);
        }
    }

    fn set_param(&mut self, name: &str, value: f32) -> Result<()> {
        match name {
            "frequency" | "freq" | "hz" => {
                self.frequency = value.max(0.0);
                Ok(())
            }
            "width" => {
                self.width = value.clamp(0.0, 1.0);
                Ok(())
            }
            _ => Err(anyhow!("Unknown parameter: {}", name)),
        }
    }

    fn get_param(&self, name: &str) -> Option<f32> {
        match name {
            "frequency" | "freq" | "hz" => Some(self.frequency),
            "width" => Some(self.width),
            _ => None,
        }
    }

    fn set_sample_rate(&mut self, sample_rate: f32) {
        self.sample_rate = sample_rate;
    }

    fn reset(&mut self) {
        self.phase = 0.0;
        self.reset_trigger.reset();
    }
}

/// Audio monitor: routes control signals to the sound card at a safe level
pub struct GraphMonitor {
    gain: f32,
}

impl GraphMonitor {
    #[must_use]
    pub const fn new(gain: f32) -> Self {
        Self { gain }
    }
}

impl GraphModule for GraphMonitor {
    fn inputs(&self) -> Vec<PortDescriptor> {
        vec![
            PortDescriptor::signal("mono", "Mono input (both channels)"),
            PortDescriptor::signal("left", "Left channel input"),
            PortDescriptor::signal("right", "Right channel input"),
        ]
    }

    fn outputs(&self) -> Vec<PortDescriptor> {
        vec![
            PortDescriptor::signal("left", "Left channel output"),
            PortDescriptor::signal("right", "Right channel output"),
        ]
    }

    fn process(&mut self, inputs: &PortBuffers, outputs: &mut PortBuffers, sample_count: usize) {
        let mono = inputs.slice("mono");
        // A patched side overrides mono; an unpatched side falls back to it
        let left = patched(inputs, "left").unwrap_or(mono);
        let right = patched(inputs, "right").unwrap_or(mono);

        for (port, source) in [("left", left), ("right", right)] {
            if let Some(out) = outputs.get_mut(port) {
                for (i, sample) in out.iter_mut().take(sample_count).enumerate() {
                    *sample = source.get(i).copied().unwrap_or(0.0) * self.gain;
                }
            }
        }
    }

    fn set_param(&mut self, name: &str, value: f32) -> Result<()> {
        match name {
            "gain" => {
                self.gain = value;
                Ok(())
            }
            _ => Err(anyhow!("Unknown parameter: {}", name)),
        }
    }

    fn get_param(&self, name: &str) -> Option<f32> {
        match name {
            "gain" => Some(self.gain),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_seq() -> GraphSequencer {
        GraphSequencer::new(SequencerConfig::with_dimensions(2, 4, 2).with_seed(3)).unwrap()
    }

    fn buffers_for(ports: &[PortDescriptor], n: usize) -> PortBuffers {
        let mut buffers = PortBuffers::new();
        for port in ports {
            buffers.get_or_default(&port.name, n, port.default_value);
        }
        buffers
    }

    #[test]
    fn test_parse_indices() {
        assert_eq!(parse_indices::<2>("value2_13", "value"), Some([1, 12]));
        assert_eq!(parse_indices::<1>("steps1", "steps"), Some([0]));
        assert_eq!(parse_indices::<1>("steps0", "steps"), None);
        assert_eq!(parse_indices::<2>("value2", "value"), None);
        assert_eq!(parse_indices::<2>("value2_3_4", "value"), None);
        assert_eq!(parse_indices::<1>("stepsx", "steps"), None);
    }

    #[test]
    fn test_port_names() {
        let seq = small_seq();
        let inputs: Vec<String> = seq.inputs().into_iter().map(|p| p.name).collect();
        assert_eq!(
            inputs,
            vec![
                "reset", "clock1", "clock2", "rnd1", "rnd2", "grnd1_1", "grnd1_2", "grnd2_1",
                "grnd2_2"
            ]
        );
        let outputs: Vec<String> = seq.outputs().into_iter().map(|p| p.name).collect();
        assert_eq!(outputs, vec!["cv1", "cv2", "gate1_1", "gate1_2", "gate2_1", "gate2_2"]);
    }

    #[test]
    fn test_params() {
        let mut seq = small_seq();
        seq.set_param("steps2", 3.0).unwrap();
        seq.set_param("value1_4", 7.5).unwrap();
        assert_eq!(seq.get_param("steps2"), Some(3.0));
        assert_eq!(seq.get_param("value1_4"), Some(7.5));
        assert_eq!(seq.get_param("gate2_4_2"), Some(1.0));
        assert_eq!(seq.get_param("index1"), Some(0.0));

        assert!(seq.set_param("steps3", 1.0).is_err());
        assert!(seq.set_param("value1_5", 1.0).is_err());
        assert!(seq.set_param("gate1_1_1", 0.0).is_err());
        assert!(seq.set_param("wobble", 0.0).is_err());
    }

    #[test]
    fn test_press_toggles_once_and_releases() {
        let mut seq = small_seq();
        let n = 16;
        let inputs = buffers_for(&seq.inputs(), n);
        let mut outputs = buffers_for(&seq.outputs(), n);

        seq.set_param("press1_2_1", 1.0).unwrap();
        seq.process(&inputs, &mut outputs, n);
        assert_eq!(seq.get_param("gate1_2_1"), Some(0.0));
        assert_eq!(seq.get_param("button1_2_1"), Some(0.0));

        seq.set_param("press1_2_1", 1.0).unwrap();
        seq.process(&inputs, &mut outputs, n);
        assert_eq!(seq.get_param("gate1_2_1"), Some(1.0));
    }

    #[test]
    fn test_unpatched_clock_does_not_run() {
        let mut seq = small_seq();
        let n = 8;
        let mut inputs = buffers_for(&seq.inputs(), n);
        let mut outputs = buffers_for(&seq.outputs(), n);

        // A high level on an unpatched port is ignored
        inputs.get_mut("clock1").unwrap().fill(10.0);
        seq.process(&inputs, &mut outputs, n);
        assert_eq!(seq.get_param("index1"), Some(0.0));

        inputs.mark_connected("clock1");
        seq.process(&inputs, &mut outputs, n);
        assert_eq!(seq.get_param("index1"), Some(1.0));
        assert_eq!(seq.get_param("index2"), Some(1.0));
        assert_eq!(outputs.get("gate2_1").unwrap(), &vec![10.0; n]);
    }

    #[test]
    fn test_lines_read_per_sample() {
        let mut seq = small_seq();
        let n = 8;
        let mut inputs = buffers_for(&seq.inputs(), n);
        let mut outputs = buffers_for(&seq.outputs(), n);

        // Two pulses inside one block; row 2 has its own silent clock
        let pulses = [0.0, 10.0, 0.0, 0.0, 0.0, 10.0, 0.0, 0.0];
        inputs.get_mut("clock1").unwrap().copy_from_slice(&pulses);
        inputs.mark_connected("clock1");
        inputs.mark_connected("clock2");
        seq.process(&inputs, &mut outputs, n);

        assert_eq!(seq.get_param("index1"), Some(2.0));
        assert_eq!(seq.get_param("index2"), Some(0.0));
        let gate = outputs.get("gate1_1").unwrap();
        assert_eq!(gate, &pulses.to_vec());
        assert_eq!(outputs.get("gate2_1").unwrap(), &vec![0.0; n]);
    }

    #[test]
    fn test_describe_shows_every_row() {
        let seq = small_seq();
        let text = seq.describe().unwrap();
        assert_eq!(text.lines().filter(|l| l.starts_with("row")).count(), 2);
        assert_eq!(text.lines().filter(|l| l.trim_start().starts_with("lane")).count(), 4);
    }

    #[test]
    fn test_clock_gate_and_trig() {
        let mut clock = GraphClock::new(1000.0, 0.5);
        clock.set_sample_rate(8000.0);
        let n = 16;
        let inputs = buffers_for(&clock.inputs(), n);
        let mut outputs = buffers_for(&clock.outputs(), n);
        clock.process(&inputs, &mut outputs, n);

        let gate = outputs.get("gate").unwrap();
        let trig = outputs.get("trig").unwrap();
        assert_eq!(&gate[..8], &[10.0, 10.0, 10.0, 10.0, 0.0, 0.0, 0.0, 0.0]);
        assert_eq!(trig.iter().filter(|&&v| v > 0.0).count(), 2);
    }

    #[test]
    fn test_clock_reset_needs_a_full_trigger() {
        let mut clock = GraphClock::new(1000.0, 0.5);
        clock.set_sample_rate(8000.0);
        let n = 8;
        let mut inputs = buffers_for(&clock.inputs(), n);
        let mut outputs = buffers_for(&clock.outputs(), n);
        inputs.mark_connected("reset");

        // 0.5 V sits inside the hysteresis band and must not restart the cycle
        let weak = [0.0, 0.0, 0.5, 0.5, 0.0, 0.0, 0.0, 0.0];
        inputs.get_mut("reset").unwrap().copy_from_slice(&weak);
        clock.process(&inputs, &mut outputs, n);
        let trig = outputs.get("trig").unwrap();
        assert_eq!(trig.iter().filter(|&&v| v > 0.0).count(), 1);

        // A 10 V edge on the third sample restarts it there, once
        let strong = [0.0, 0.0, 10.0, 10.0, 10.0, 0.0, 0.0, 0.0];
        inputs.get_mut("reset").unwrap().copy_from_slice(&strong);
        clock.process(&inputs, &mut outputs, n);
        let trig = outputs.get("trig").unwrap();
        assert_eq!(trig, &vec![10.0, 0.0, 10.0, 0.0, 0.0, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_monitor_falls_back_to_mono() {
        let mut monitor = GraphMonitor::new(0.5);
        let n = 4;
        let mut inputs = buffers_for(&monitor.inputs(), n);
        let mut outputs = buffers_for(&monitor.outputs(), n);
        inputs.get_mut("mono").unwrap().fill(2.0);
        inputs.get_mut("right").unwrap().fill(4.0);
        inputs.mark_connected("mono");
        inputs.mark_connected("right");
        monitor.process(&inputs, &mut outputs, n);
        assert_eq!(outputs.get("left").unwrap(), &vec![1.0; n]);
        assert_eq!(outputs.get("right").unwrap(), &vec![2.0; n]);
    }
}
