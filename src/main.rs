use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use pezzottify_gateway::config::{AppConfig, CliConfig, FileConfig, LogLevel};
use pezzottify_gateway::{Gateway, SessionSweeper};

fn parse_path(s: &str) -> Result<PathBuf> {
    let path_buf = PathBuf::from(s);
    if path_buf.is_absolute() {
        return Ok(path_buf);
    }
    let cwd = std::env::current_dir().context("Error resolving current directory")?;
    Ok(cwd.join(path_buf))
}

#[derive(Parser, Debug)]
struct CliArgs {
    /// Path to a TOML config file. Values in the file override CLI flags.
    #[clap(long, value_parser = parse_path)]
    pub config: Option<PathBuf>,

    /// Default log level, overridable with the LOG_LEVEL environment variable.
    #[clap(long, default_value = "info")]
    pub log_level: LogLevel,

    /// Seconds of inactivity after which a session is closed.
    #[clap(long, default_value_t = 1800)]
    pub idle_timeout_secs: u64,

    /// Seconds between idle-session sweeps.
    #[clap(long, default_value_t = 60)]
    pub sweep_interval_secs: u64,

    /// Default per-session request budget per minute.
    #[clap(long, default_value_t = 600)]
    pub requests_per_minute: u32,

    /// Default per-session request budget per second.
    #[clap(long, default_value_t = 60)]
    pub requests_per_second: u32,

    /// Maximum serialized size of request params, in bytes.
    #[clap(long, default_value_t = 102400)]
    pub max_params_bytes: usize,
}

impl CliArgs {
    fn to_cli_config(&self) -> CliConfig {
        CliConfig {
            log_level: self.log_level,
            idle_timeout_secs: self.idle_timeout_secs,
            sweep_interval_secs: self.sweep_interval_secs,
            requests_per_minute: self.requests_per_minute,
            requests_per_second: self.requests_per_second,
            max_params_bytes: self.max_params_bytes,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    let file_config = cli_args
        .config
        .as_deref()
        .map(FileConfig::load)
        .transpose()?;
    let config = AppConfig::resolve(&cli_args.to_cli_config(), file_config)?;

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(config.log_level.as_filter().into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init()
        .context("Failed to install tracing subscriber")?;

    #[cfg(not(feature = "no_metrics"))]
    {
        info!("Initializing metrics...");
        pezzottify_gateway::metrics::init_metrics();
    }

    let settings = config.gateway_settings();
    info!(
        "Starting {} {} (tools: {}, tasks: {})",
        settings.server_name, settings.server_version, settings.tools_enabled, settings.tasks_enabled
    );
    let gateway = Gateway::new(settings);

    let shutdown = CancellationToken::new();
    let sweeper = Arc::new(SessionSweeper::new(
        gateway.sessions().clone(),
        config.idle_timeout,
        config.sweep_interval,
    ));
    let sweeper_handle = {
        let sweeper = sweeper.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move { sweeper.run(shutdown).await })
    };

    info!("Gateway ready, press Ctrl-C to stop");
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;

    info!("Shutting down...");
    shutdown.cancel();
    sweeper_handle.await.context("Session sweeper panicked")?;
    let closed = gateway.shutdown().await;
    info!("Closed {} sessions, bye", closed);

    Ok(())
}
