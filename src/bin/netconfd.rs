//! NETCONF server daemon.
//!
//! Binds the configured address, serves NETCONF sessions until
//! interrupted, then closes the notification manager so producers
//! observe shutdown.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use netconf::{Config, NetconfServer, VERSION};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "netconfd")]
#[command(version = VERSION)]
#[command(about = "NETCONF session and message-exchange server", long_about = None)]
struct Cli {
    /// Path to a TOML config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listen address override (host:port)
    #[arg(short, long)]
    listen: Option<String>,

    /// Log filter (overrides RUST_LOG)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(cli.log_level.clone()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut config = match &cli.config {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => Config::from_env(),
    };

    if let Some(listen) = &cli.listen {
        let (host, port) = listen
            .rsplit_once(':')
            .context("listen address must be host:port")?;
        config.server.host = host.to_string();
        config.server.port = port.parse().context("invalid listen port")?;
    }

    tracing::info!(version = VERSION, addr = %config.server.listen_addr(), "starting netconfd");

    let server = Arc::new(NetconfServer::new(config)?);
    let notifications = server.notifications();

    tokio::select! {
        result = Arc::clone(&server).serve() => {
            result.context("server terminated")?;
        },
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown requested");
        },
    }

    notifications.close();
    Ok(())
}
