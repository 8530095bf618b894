//! Parser for the zim-seq patch language.
//!
//! A patch is a list of lines, each one of:
//!
//! ```text
//! seq: seq 4 16 2            # create a module: name, type, numeric params
//! seq.steps1 <- 4            # set a parameter to a number
//! seq.clock1 <- clk.gate     # connect (right side is an expression)
//! out <- seq.gate1_1 * 0.5   # route to the audio monitor
//! ```

use crate::modules::{parse_module_type, ModuleType};
use anyhow::{anyhow, Result};

/// Commands that can be parsed from a patch line.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Create a new module with the given name, type, and parameters.
    CreateModule { name: String, module_type: ModuleType, params: Vec<f32> },
    /// Connect an expression over module outputs to an input.
    Connect { from: String, to: String },
    /// Set a parameter value on a module.
    SetParam { module: String, param: String, value: f32 },
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CreateModule { name, module_type, .. } => {
                write!(f, "{name}: {module_type}")
            }
            Self::Connect { from, to } => {
                write!(f, "{to} <- {from}")
            }
            Self::SetParam { module, param, value } => {
                write!(f, "{module}.{param} = {value}")
            }
        }
    }
}

/// True for lines that carry no command
#[must_use]
pub fn is_blank(line: &str) -> bool {
    let line = line.trim();
    line.is_empty() || line.starts_with('#')
}

/// Parse a single line of patch notation
///
/// # Errors
/// Returns an error for blank lines, comments, unknown module types,
/// non-numeric module parameters and lines that match no command form
pub fn parse_line(line: &str) -> Result<Command> {
    // Trailing comments are allowed after a command
    let line = line.split('#').next().unwrap_or_default().trim();

    if line.is_empty() {
        return Err(anyhow!("Empty or comment line"));
    }

    // Module creation: "name: type [params]"
    if let Some((name, rest)) = line.split_once(':') {
        let name = name.trim();
        if name.is_empty() || name.contains('.') {
            return Err(anyhow!("Invalid module name: '{}'", name));
        }

        let mut parts = rest.split_whitespace();
        let type_name = parts.next().ok_or_else(|| anyhow!("Missing module type"))?;
        let module_type = parse_module_type(type_name)?;
        let params = parts
            .map(|part| {
                part.parse::<f32>().map_err(|_| {
                    anyhow!("Parameter '{}' for {} is not a number", part, module_type)
                })
            })
            .collect::<Result<Vec<_>>>()?;

        return Ok(Command::CreateModule { name: name.to_string(), module_type, params });
    }

    // "module.param <- number" or "dest[.port] <- expression"
    if let Some((left, right)) = line.split_once("<-") {
        let left = left.trim();
        let right = right.trim();
        if left.is_empty() || right.is_empty() {
            return Err(anyhow!("Incomplete connection: {line}"));
        }

        if let Some((module, param)) = left.split_once('.') {
            if let Ok(value) = right.parse::<f32>() {
                return Ok(Command::SetParam {
                    module: module.to_string(),
                    param: param.to_string(),
                    value,
                });
            }
        }

        return Ok(Command::Connect { from: right.to_string(), to: left.to_string() });
    }

    Err(anyhow!("Could not parse line: {line}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_module_creation() {
        let cmd = parse_line("seq: seq 2 8 3").unwrap();
        assert_eq!(
            cmd,
            Command::CreateModule {
                name: "seq".to_string(),
                module_type: ModuleType::Sequencer,
                params: vec![2.0, 8.0, 3.0],
            }
        );
    }

    #[test]
    fn test_parse_module_without_params() {
        let cmd = parse_line("clk: clock").unwrap();
        let Command::CreateModule { module_type, params, .. } = cmd else {
            panic!("Wrong command type");
        };
        assert_eq!(module_type, ModuleType::Clock);
        assert!(params.is_empty());
    }

    #[test]
    fn test_bad_module_params() {
        assert!(parse_line("clk: clock fast").is_err());
        assert!(parse_line("clk: drum").is_err());
        assert!(parse_line("clk:").is_err());
    }

    #[test]
    fn test_parse_connection() {
        let cmd = parse_line("seq.clock1 <- clk.gate").unwrap();
        assert_eq!(
            cmd,
            Command::Connect { from: "clk.gate".to_string(), to: "seq.clock1".to_string() }
        );
    }

    #[test]
    fn test_parse_expression_connection() {
        let cmd = parse_line("out <- seq.gate1_1 * 0.1 + seq.gate2_1 * 0.1").unwrap();
        assert!(matches!(cmd, Command::Connect { ref to, .. } if to == "out"));
    }

    #[test]
    fn test_parse_param() {
        let cmd = parse_line("seq.value2_13 <- 3.5").unwrap();
        assert_eq!(
            cmd,
            Command::SetParam {
                module: "seq".to_string(),
                param: "value2_13".to_string(),
                value: 3.5,
            }
        );
    }

    #[test]
    fn test_trailing_comment() {
        let cmd = parse_line("seq.steps1 <- 4  # four on the floor").unwrap();
        let Command::SetParam { value, .. } = cmd else {
            panic!("Wrong command type");
        };
        assert!((value - 4.0).abs() < f32::EPSILON);
    }

    #[test]
    fn test_blank_lines() {
        assert!(is_blank("   "));
        assert!(is_blank("# comment"));
        assert!(!is_blank("clk: clock"));
        assert!(parse_line("# comment").is_err());
    }
}
