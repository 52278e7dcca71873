mod file_config;

pub use file_config::{CapabilitiesConfig, ClientConfig, FileConfig, TasksConfig, ThrottleConfig};

use crate::gateway::{GatewaySettings, DEFAULT_TOOLS_PAGE_SIZE};
use crate::session::{ClientSettings, DEFAULT_OUTBOUND_BUFFER};
use crate::task::store::DEFAULT_MAX_HISTORY;
use crate::task::ExecutorConfig;
use crate::validation::{
    ValidationSettings, DEFAULT_MAX_ID_BYTES, DEFAULT_MAX_PARAMS_BYTES,
    DEFAULT_REQUESTS_PER_MINUTE, DEFAULT_REQUESTS_PER_SECOND,
};
use anyhow::{bail, Result};
use clap::ValueEnum;
use std::time::Duration;
use tracing::level_filters::LevelFilter;

/// Verbosity of the process log.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_filter(&self) -> LevelFilter {
        match self {
            LogLevel::Trace => LevelFilter::TRACE,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Error => LevelFilter::ERROR,
        }
    }
}

/// CLI arguments that can be used for config resolution.
/// This struct mirrors the CLI arguments that can be overridden by TOML config.
#[derive(Debug, Clone)]
pub struct CliConfig {
    pub log_level: LogLevel,
    pub idle_timeout_secs: u64,
    pub sweep_interval_secs: u64,
    pub requests_per_minute: u32,
    pub requests_per_second: u32,
    pub max_params_bytes: usize,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            idle_timeout_secs: 1800,
            sweep_interval_secs: 60,
            requests_per_minute: DEFAULT_REQUESTS_PER_MINUTE,
            requests_per_second: DEFAULT_REQUESTS_PER_SECOND,
            max_params_bytes: DEFAULT_MAX_PARAMS_BYTES,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    // Core settings
    pub log_level: LogLevel,
    pub idle_timeout: Duration,
    pub sweep_interval: Duration,
    pub max_params_bytes: usize,
    pub max_id_bytes: usize,
    pub outbound_buffer: usize,
    pub tools_page_size: usize,

    // Feature configs (with defaults)
    pub throttle: ThrottleSettings,
    pub capabilities: CapabilitySettings,
    pub tasks: TaskSettings,
    pub client: ClientSettings,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThrottleSettings {
    pub requests_per_minute: u32,
    pub requests_per_second: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapabilitySettings {
    pub tools: bool,
    pub tasks: bool,
}

impl Default for CapabilitySettings {
    fn default() -> Self {
        Self {
            tools: true,
            tasks: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskSettings {
    pub stream_chunk_delay: Duration,
    pub max_history: usize,
}

impl AppConfig {
    /// Resolve configuration from CLI arguments and optional TOML file config.
    /// TOML values override CLI values where present.
    pub fn resolve(cli: &CliConfig, file_config: Option<FileConfig>) -> Result<Self> {
        let file = file_config.unwrap_or_default();

        let log_level = match file.log_level {
            Some(level) => match parse_log_level(&level) {
                Some(level) => level,
                None => bail!("Unknown log_level in config file: {}", level),
            },
            None => cli.log_level,
        };

        let idle_timeout = Duration::from_secs(file.idle_timeout_secs.unwrap_or(cli.idle_timeout_secs));
        let sweep_interval =
            Duration::from_secs(file.sweep_interval_secs.unwrap_or(cli.sweep_interval_secs));
        if idle_timeout.is_zero() {
            bail!("idle_timeout_secs must be greater than zero");
        }
        if sweep_interval.is_zero() {
            bail!("sweep_interval_secs must be greater than zero");
        }
        if sweep_interval > idle_timeout {
            bail!(
                "sweep_interval_secs ({}) must not exceed idle_timeout_secs ({})",
                sweep_interval.as_secs(),
                idle_timeout.as_secs()
            );
        }

        let max_params_bytes = file.max_params_bytes.unwrap_or(cli.max_params_bytes);
        if max_params_bytes == 0 {
            bail!("max_params_bytes must be greater than zero");
        }
        let max_id_bytes = file.max_id_bytes.unwrap_or(DEFAULT_MAX_ID_BYTES);
        let outbound_buffer = file.outbound_buffer.unwrap_or(DEFAULT_OUTBOUND_BUFFER);
        if outbound_buffer == 0 {
            bail!("outbound_buffer must be greater than zero");
        }
        let tools_page_size = file.tools_page_size.unwrap_or(DEFAULT_TOOLS_PAGE_SIZE);
        if tools_page_size == 0 {
            bail!("tools_page_size must be greater than zero");
        }

        // Throttle settings - merge file config with CLI
        let throttle_file = file.throttle.unwrap_or_default();
        let throttle = ThrottleSettings {
            requests_per_minute: throttle_file
                .requests_per_minute
                .unwrap_or(cli.requests_per_minute),
            requests_per_second: throttle_file
                .requests_per_second
                .unwrap_or(cli.requests_per_second),
        };
        if throttle.requests_per_minute == 0 || throttle.requests_per_second == 0 {
            bail!("Throttle limits must be greater than zero");
        }

        let capabilities_file = file.capabilities.unwrap_or_default();
        let capabilities = CapabilitySettings {
            tools: capabilities_file.tools.unwrap_or(true),
            tasks: capabilities_file.tasks.unwrap_or(true),
        };

        let tasks_file = file.tasks.unwrap_or_default();
        let tasks = TaskSettings {
            stream_chunk_delay: tasks_file
                .stream_chunk_delay_ms
                .map(Duration::from_millis)
                .unwrap_or_else(|| ExecutorConfig::default().stream_chunk_delay),
            max_history: tasks_file.max_history.unwrap_or(DEFAULT_MAX_HISTORY),
        };

        let client_file = file.client.unwrap_or_default();
        let client_defaults = ClientSettings::default();
        let client = ClientSettings {
            request_timeout: client_file
                .request_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(client_defaults.request_timeout),
            max_skipped_pages: client_file
                .max_skipped_pages
                .unwrap_or(client_defaults.max_skipped_pages),
        };

        Ok(Self {
            log_level,
            idle_timeout,
            sweep_interval,
            max_params_bytes,
            max_id_bytes,
            outbound_buffer,
            tools_page_size,
            throttle,
            capabilities,
            tasks,
            client,
        })
    }

    /// Settings handed to the gateway at construction.
    pub fn gateway_settings(&self) -> GatewaySettings {
        GatewaySettings {
            validation: ValidationSettings {
                max_id_bytes: self.max_id_bytes,
                max_params_bytes: self.max_params_bytes,
                default_requests_per_minute: self.throttle.requests_per_minute,
                default_requests_per_second: self.throttle.requests_per_second,
                ..ValidationSettings::default()
            },
            outbound_buffer: self.outbound_buffer,
            tools_page_size: self.tools_page_size,
            tools_enabled: self.capabilities.tools,
            tasks_enabled: self.capabilities.tasks,
            executor: ExecutorConfig {
                stream_chunk_delay: self.tasks.stream_chunk_delay,
            },
            max_task_history: self.tasks.max_history,
            client: self.client.clone(),
            ..GatewaySettings::default()
        }
    }
}

/// Parses a log level string into LogLevel.
/// Uses clap's ValueEnum trait for parsing.
fn parse_log_level(s: &str) -> Option<LogLevel> {
    LogLevel::from_str(s, true).ok()
}
