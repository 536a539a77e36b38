//! Calculator configuration.
//!
//! The bundled calculator runs an external command per item (see [`hook`]).
//! Which command, with which arguments, is read from a TOML file:
//!
//! ```toml
//! [calculator]
//! name = "pricing"
//! command = "hooks/calculate"
//! args = ["--mode", "full"]
//! work_dir = "/var/tmp/jobchain"
//! ```

pub mod hook;

pub use hook::HookCalculator;

use crate::error::{Error, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Top-level TOML wrapper.
#[derive(Debug, Deserialize)]
struct CalculatorFile {
    calculator: HookConfig,
}

/// How to run the calculation hook.
#[derive(Debug, Clone, Deserialize)]
pub struct HookConfig {
    pub name: String,
    /// Executable. Relative paths resolve against the process CWD.
    pub command: PathBuf,
    #[serde(default)]
    pub args: Vec<String>,
    /// Extra environment for the hook.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Base directory for per-item working directories.
    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,
}

fn default_work_dir() -> PathBuf {
    std::env::temp_dir().join("jobchain")
}

impl HookConfig {
    /// Load a calculator config file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("cannot read calculator config {}: {e}", path.display()))
        })?;
        Self::parse(&content)
            .map_err(|e| Error::Config(format!("bad calculator config {}: {e}", path.display())))
    }

    /// Parse calculator config from TOML text.
    pub fn parse(content: &str) -> std::result::Result<Self, toml::de::Error> {
        let file: CalculatorFile = toml::from_str(content)?;
        Ok(file.calculator)
    }
}
