//! Built-in module types available to patches

use anyhow::{anyhow, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleType {
    Clock,
    Sequencer,
    Monitor,
}

impl ModuleType {
    /// Every type, for help text and inspection
    pub const ALL: [Self; 3] = [Self::Clock, Self::Sequencer, Self::Monitor];

    #[must_use]
    pub const fn usage(self) -> &'static str {
        match self {
            Self::Clock => "clock [hz] [width]        pulse clock, 0/10 V",
            Self::Sequencer => "seq [rows] [steps] [lanes] multi-row gate/CV sequencer",
            Self::Monitor => "monitor [gain]            audio monitor output",
        }
    }
}

impl std::fmt::Display for ModuleType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Clock => write!(f, "clock"),
            Self::Sequencer => write!(f, "seq"),
            Self::Monitor => write!(f, "monitor"),
        }
    }
}

/// Parse module type from string
///
/// # Errors
/// Returns an error for names that are not built-in module types
pub fn parse_module_type(s: &str) -> Result<ModuleType> {
    match s {
        "clock" | "clk" => Ok(ModuleType::Clock),
        "seq" | "sequencer" => Ok(ModuleType::Sequencer),
        "monitor" | "mon" => Ok(ModuleType::Monitor),
        _ => Err(anyhow!("Unknown module type: {}", s)),
    }
}
