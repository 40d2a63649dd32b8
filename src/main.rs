//! Sqlgate Entry Point
//!
//! Loads the gateway settings, opens nothing until the first request, and
//! serves forever. The only positional argument is the listening port.
//! Logs go to stderr.

use anyhow::{Context, Result};
use clap::Parser;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use sqlgate::config::{ConfigLoader, GatewayConfig};
use sqlgate::telemetry::{init_logging, LogFormat, DEFAULT_LOG_LEVEL};
use sqlgate::{GatewayState, PostgresDatabase};

/// Sqlgate - parameterized SQL statements as authenticated HTTP endpoints
#[derive(Parser)]
#[command(name = "sqlgate")]
#[command(version)]
struct Cli {
    /// Listening port [default: 880]
    port: Option<u16>,

    /// Directory holding `services/`, `config/` and `log/`
    #[arg(long, default_value = ".")]
    home: PathBuf,

    /// Address to bind
    #[arg(long)]
    bind: Option<IpAddr>,

    /// Load and validate every service at startup
    #[arg(long)]
    preload: bool,

    /// Log output format
    #[arg(long, value_enum)]
    log_format: Option<LogFormat>,

    /// Log level when RUST_LOG is not set
    #[arg(long, default_value = DEFAULT_LOG_LEVEL)]
    log_level: String,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_format.unwrap_or_default(), &cli.log_level)?;

    let mut config = GatewayConfig::load(&cli.home).context("failed to load gateway settings")?;
    if let Some(port) = cli.port {
        config.port = port;
    }
    if let Some(bind) = cli.bind {
        config.bind_host = bind.to_string();
    }
    config.preload_services |= cli.preload;

    let mut loader = ConfigLoader::new(&config);
    let database = PostgresDatabase::new(loader.connection_string()?.as_deref())
        .context("invalid database connection settings")?;
    if config.preload_services {
        loader = loader.preload().await.context("service preload failed")?;
    }

    let host: IpAddr = config
        .bind_host
        .parse()
        .with_context(|| format!("invalid bind address '{}'", config.bind_host))?;
    let addr = SocketAddr::new(host, config.port);

    info!(
        home = %config.home.display(),
        services = %config.services_path().display(),
        preload = config.preload_services,
        "starting sqlgate"
    );

    let state = Arc::new(GatewayState::new(&config, loader, database));
    sqlgate::serve(state, addr).await.with_context(|| format!("failed to serve on {addr}"))
}
