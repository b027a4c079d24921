//! Tabula reference plugin
//!
//! Usage:
//!     tabula-plugin --bind 127.0.0.1:0
//!
//! The first stdout line is the bound port. Logs go to stderr.

use std::io::Write;

use anyhow::Context;
use clap::Parser;
use tabula_logging::{init_logging, LogConfig};
use tabula_plugin::{PluginArgs, PluginServer};
use tabula_protocol::cancel::install_signal_handlers;
use tabula_protocol::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = PluginArgs::parse();

    init_logging(LogConfig {
        app_name: "tabula_plugin",
        default_filter: "tabula_plugin=info",
        verbose: args.verbose,
        log_file: args.log_file.clone(),
    })?;

    let config = args.into_config()?;

    let cancel = CancellationToken::new();
    install_signal_handlers(cancel.clone()).context("Failed to install signal handlers")?;

    let server = PluginServer::bind(&config, cancel).await?;
    let port = server.local_port()?;

    // Handshake: the port alone, before any other stdout output
    let mut stdout = std::io::stdout().lock();
    writeln!(stdout, "{}", port).context("Failed to write handshake")?;
    stdout.flush().context("Failed to flush handshake")?;
    drop(stdout);

    tracing::info!("Starting tabula plugin");
    tracing::info!("  Port: {}", port);
    tracing::info!("  Reference zone: {}", config.inference.reference_tz);
    tracing::info!("  Sample rows: {}", config.inference.sample_rows);

    server.run().await?;

    tracing::info!("Plugin stopped");
    Ok(())
}
