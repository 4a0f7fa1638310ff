//! Compiler configuration loaded from ~/.scorch/config.yaml.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::compiler::registry::DEFAULT_GAS;

/// Run-wide compiler settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompilerConfig {
    /// Work budget: every processed node burns one unit.
    #[serde(default = "CompilerConfig::default_gas")]
    pub gas: u64,
}

impl CompilerConfig {
    /// Load config from the standard path (~/.scorch/config.yaml).
    /// Returns None if the file doesn't exist or doesn't parse.
    pub fn load() -> Option<Self> {
        let home = dirs::home_dir()?;
        Self::load_from(&home.join(".scorch").join("config.yaml"))
    }

    pub fn load_from(path: &Path) -> Option<Self> {
        let content = std::fs::read_to_string(path).ok()?;
        serde_yaml::from_str(&content).ok()
    }

    fn default_gas() -> u64 {
        DEFAULT_GAS
    }
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            gas: Self::default_gas(),
        }
    }
}
