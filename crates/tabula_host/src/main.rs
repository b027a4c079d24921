//! Tabula conformance host
//!
//! Usage:
//!     tabula-host [--data-dir data] [--transcript .log] <plugin-cmd> [args...]
//!
//! The report goes to stdout; logs (including forwarded plugin output) go
//! to stderr.

use std::net::{Ipv4Addr, SocketAddr};
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tabula_host::cases::builtin_cases;
use tabula_host::{
    report, run_suite, ExitOutcome, HostArgs, PluginClient, PluginProcess, SupervisorError,
    Transcript,
};
use tabula_logging::{init_logging, LogConfig};
use tabula_protocol::cancel::install_signal_handlers;
use tabula_protocol::CancellationToken;
use tracing::{error, info, warn};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(1);

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = HostArgs::parse();

    init_logging(LogConfig {
        app_name: "tabula_host",
        default_filter: "tabula_host=info,plugin=info",
        verbose: args.verbose,
        log_file: None,
    })?;

    let config = args.into_config()?;

    let cancel = CancellationToken::new();
    install_signal_handlers(cancel.clone()).context("Failed to install signal handlers")?;

    let mut plugin = PluginProcess::spawn(&config.program, &config.args)?;

    enum Startup {
        Port(std::result::Result<u16, SupervisorError>),
        Cancelled,
    }

    let startup = tokio::select! {
        port = plugin.handshake(config.startup_timeout) => Startup::Port(port),
        _ = cancel.cancelled() => Startup::Cancelled,
    };

    let port = match startup {
        Startup::Port(Ok(port)) => port,
        Startup::Port(Err(SupervisorError::EarlyExit(outcome))) if outcome.success() => {
            info!("Plugin exited cleanly before the handshake");
            return Ok(ExitCode::SUCCESS);
        }
        Startup::Port(Err(e)) => {
            plugin.terminate().await;
            return Err(e).context("Plugin startup failed");
        }
        Startup::Cancelled => {
            plugin.terminate().await;
            return Ok(ExitCode::SUCCESS);
        }
    };

    let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, port));
    let mut client = match PluginClient::connect(addr, CONNECT_TIMEOUT).await {
        Ok(client) => client,
        Err(e) => {
            plugin.terminate().await;
            return Err(e).context("Couldn't connect to plugin");
        }
    };
    info!("Connected to plugin at {}", addr);

    let mut transcript = Transcript::create(&config.transcript)
        .with_context(|| format!("Failed to create {}", config.transcript.display()))?;
    let cases = builtin_cases();

    enum Run {
        Finished(Vec<tabula_host::CaseResult>),
        PluginExited(ExitOutcome),
        Cancelled,
    }

    let run = tokio::select! {
        results = run_suite(&mut client, &cases, &config, Some(&mut transcript)) => Run::Finished(results),
        outcome = plugin.exited() => Run::PluginExited(outcome),
        _ = cancel.cancelled() => Run::Cancelled,
    };

    let results = match run {
        Run::Finished(results) => results,
        Run::PluginExited(outcome) => {
            error!("Plugin exited during the suite ({})", outcome);
            return Ok(ExitCode::FAILURE);
        }
        Run::Cancelled => {
            plugin.terminate().await;
            return Ok(ExitCode::SUCCESS);
        }
    };

    if plugin.terminate().await.is_none() {
        warn!("Plugin may still be running");
    }
    if let Err(e) = transcript.flush() {
        warn!("Failed to flush transcript: {}", e);
    }

    let transcript_path = config.transcript.display().to_string();
    print!("{}", report::render(&results, Some(&transcript_path)));

    if report::failures(&results) > 0 {
        Ok(ExitCode::FAILURE)
    } else {
        Ok(ExitCode::SUCCESS)
    }
}
