use crate::types::{Difficulty, Mode, Side};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EngineConfig {
    pub path: String,
    #[serde(default)]
    pub args: Option<Vec<String>>,
    #[serde(default)]
    pub working_directory: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self { path: "./engine".to_string(), args: None, working_directory: None }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeControl {
    pub base_ms: u64,
    pub inc_ms: u64,
}

impl Default for TimeControl {
    fn default() -> Self { Self { base_ms: 5 * 60 * 1000, inc_ms: 0 } }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub engine: EngineConfig,
    pub difficulty: Difficulty,
    pub mode: Mode,
    pub human_side: Side,
    pub time_control: Option<TimeControl>,
    /// Capacity of the command and response-line channels.
    pub channel_capacity: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            engine: EngineConfig::default(),
            difficulty: Difficulty::default(),
            mode: Mode::default(),
            human_side: Side::default(),
            time_control: None,
            channel_capacity: 256,
        }
    }
}

impl AppConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let config = serde_json::from_str(&data)
            .with_context(|| format!("Failed to parse config {}", path.display()))?;
        Ok(config)
    }
}
