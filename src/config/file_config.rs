use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct FileConfig {
    // Core settings (can override CLI)
    pub log_level: Option<String>,
    pub idle_timeout_secs: Option<u64>,
    pub sweep_interval_secs: Option<u64>,
    pub max_params_bytes: Option<usize>,
    pub max_id_bytes: Option<usize>,
    pub outbound_buffer: Option<usize>,
    pub tools_page_size: Option<usize>,

    // Feature configs
    pub throttle: Option<ThrottleConfig>,
    pub capabilities: Option<CapabilitiesConfig>,
    pub tasks: Option<TasksConfig>,
    pub client: Option<ClientConfig>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct ThrottleConfig {
    pub requests_per_minute: Option<u32>,
    pub requests_per_second: Option<u32>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct CapabilitiesConfig {
    pub tools: Option<bool>,
    pub tasks: Option<bool>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct TasksConfig {
    pub stream_chunk_delay_ms: Option<u64>,
    pub max_history: Option<usize>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct ClientConfig {
    pub request_timeout_secs: Option<u64>,
    pub max_skipped_pages: Option<usize>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse config file: {:?}", path))
    }
}
