//! Save/restore of the gate pattern
//!
//! The pattern is stored as `{"gates": [1, 0, 1, ...]}`, one integer per
//! cell in gate matrix order (row-major, lane fastest). Values and playheads
//! are not part of it.

use crate::matrix::GateMatrix;
use anyhow::{Context, Result};
use serde_json::{json, Value};
use std::path::Path;

const GATES_KEY: &str = "gates";

#[must_use]
pub fn gates_to_json(gates: &GateMatrix) -> Value {
    json!({ GATES_KEY: gates.to_flat() })
}

/// Apply a saved pattern to `gates`.
///
/// Integers (non-zero is armed) and booleans are accepted. Anything else,
/// including entries missing from a short array, leaves the cell as it is.
/// A document without a `gates` array changes nothing. Returns the number
/// of cells written.
pub fn gates_from_json(gates: &mut GateMatrix, state: &Value) -> usize {
    let Some(entries) = state.get(GATES_KEY).and_then(Value::as_array) else {
        return 0;
    };
    gates.restore_flat(entries.iter().map(entry_to_gate))
}

fn entry_to_gate(entry: &Value) -> Option<bool> {
    match entry {
        Value::Bool(armed) => Some(*armed),
        Value::Number(n) => n.as_i64().map(|i| i != 0).or_else(|| n.as_u64().map(|u| u != 0)),
        _ => None,
    }
}

/// Serialize the pattern to pretty JSON text
///
/// # Errors
/// Returns an error if serialization fails
pub fn to_string(gates: &GateMatrix) -> Result<String> {
    serde_json::to_string_pretty(&gates_to_json(gates)).context("Failed to serialize gate state")
}

/// Parse JSON text and apply it to `gates`
///
/// # Errors
/// Returns an error if the text is not JSON; partial documents are accepted
pub fn from_str(gates: &mut GateMatrix, text: &str) -> Result<usize> {
    let state: Value = serde_json::from_str(text).context("Gate state is not valid JSON")?;
    Ok(gates_from_json(gates, &state))
}

/// Write a JSON state document to disk
///
/// # Errors
/// Returns an error if the file cannot be written
pub fn save_file<P: AsRef<Path>>(state: &Value, path: P) -> Result<()> {
    let path = path.as_ref();
    let text = serde_json::to_string_pretty(state).context("Failed to serialize state")?;
    std::fs::write(path, text)
        .with_context(|| format!("Failed to write state file {}", path.display()))
}

/// Read a JSON state document from disk
///
/// # Errors
/// Returns an error if the file cannot be read or is not JSON
pub fn load_file<P: AsRef<Path>>(path: P) -> Result<Value> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read state file {}", path.display()))?;
    serde_json::from_str(&text)
        .with_context(|| format!("State file {} is not valid JSON", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_is_lane_fastest() {
        let mut gates = GateMatrix::new(2, 2, 2);
        gates.set(0, 1, 1, false);
        gates.set(1, 0, 0, false);
        assert_eq!(gates_to_json(&gates), json!({ "gates": [1, 1, 1, 0, 0, 1, 1, 1] }));
    }

    #[test]
    fn test_round_trip_into_fresh_matrix() {
        let mut gates = GateMatrix::new(4, 16, 2);
        for i in (0..128).step_by(3) {
            gates.toggle_at(i);
        }
        let text = to_string(&gates).unwrap();

        let mut restored = GateMatrix::new(4, 16, 2);
        assert_eq!(from_str(&mut restored, &text).unwrap(), 128);
        assert_eq!(restored, gates);
    }

    #[test]
    fn test_short_and_patchy_state_keeps_defaults() {
        let mut gates = GateMatrix::new(1, 3, 1);
        let written = gates_from_json(&mut gates, &json!({ "gates": [0, "x", null] }));
        assert_eq!(written, 1);
        assert_eq!(gates.to_flat(), vec![0, 1, 1]);
    }

    #[test]
    fn test_extra_entries_are_ignored() {
        let mut gates = GateMatrix::new(1, 2, 1);
        gates_from_json(&mut gates, &json!({ "gates": [0, 0, 0, 0, 0] }));
        assert_eq!(gates.to_flat(), vec![0, 0]);
    }

    #[test]
    fn test_accepts_bools_and_nonzero_ints() {
        let mut gates = GateMatrix::new(1, 4, 1);
        gates.fill(false);
        gates_from_json(&mut gates, &json!({ "gates": [true, 7, false, -1] }));
        assert_eq!(gates.to_flat(), vec![1, 1, 0, 1]);
    }

    #[test]
    fn test_missing_key_changes_nothing() {
        let mut gates = GateMatrix::new(1, 2, 1);
        assert_eq!(gates_from_json(&mut gates, &json!({ "other": [0, 0] })), 0);
        assert_eq!(gates_from_json(&mut gates, &json!([0, 0])), 0);
        assert_eq!(gates.to_flat(), vec![1, 1]);
    }

    #[test]
    fn test_garbage_text_is_an_error() {
        let mut gates = GateMatrix::new(1, 2, 1);
        assert!(from_str(&mut gates, "not json").is_err());
        assert_eq!(gates.to_flat(), vec![1, 1]);
    }
}
