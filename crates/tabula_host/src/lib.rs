pub mod cases;
pub mod client;
pub mod conformance;
pub mod report;
pub mod supervisor;
pub mod transcript;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, Result};
use tabula_protocol::defaults;
use tracing::info;

pub use client::{ClientError, PluginClient, RecordStream};
pub use conformance::{run_case, Case, CaseResult, Phase, Timeouts};
pub use supervisor::{ExitOutcome, PluginProcess, SupervisorError};
pub use transcript::Transcript;

#[derive(clap::Parser, Debug)]
#[command(
    name = "tabula-host",
    about = "Runs the conformance suite against a tabula plugin"
)]
pub struct HostArgs {
    /// Directory holding the fixture files
    #[arg(long, env = "TABULA_DATA_DIR", default_value = defaults::DEFAULT_DATA_DIR)]
    pub data_dir: PathBuf,

    /// File receiving every discover response and record
    #[arg(long, env = "TABULA_TRANSCRIPT", default_value = defaults::DEFAULT_TRANSCRIPT_PATH)]
    pub transcript: PathBuf,

    /// How long the plugin has to print its port (e.g. 5s, 500ms)
    #[arg(long, default_value = "5s", value_parser = parse_duration)]
    pub startup_timeout: Duration,

    /// Deadline of each discover call
    #[arg(long, default_value = "1s", value_parser = parse_duration)]
    pub discover_timeout: Duration,

    /// Deadline of each whole publish stream
    #[arg(long, default_value = "2s", value_parser = parse_duration)]
    pub publish_timeout: Duration,

    /// Debug logging for the host
    #[arg(short, long)]
    pub verbose: bool,

    /// Plugin command and its arguments
    #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
    pub command: Vec<String>,
}

/// Host configuration.
#[derive(Debug, Clone)]
pub struct HostConfig {
    pub program: String,
    pub args: Vec<String>,
    pub data_dir: PathBuf,
    pub transcript: PathBuf,
    pub startup_timeout: Duration,
    pub timeouts: Timeouts,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            program: String::new(),
            args: Vec::new(),
            data_dir: PathBuf::from(defaults::DEFAULT_DATA_DIR),
            transcript: PathBuf::from(defaults::DEFAULT_TRANSCRIPT_PATH),
            startup_timeout: defaults::STARTUP_TIMEOUT,
            timeouts: Timeouts {
                discover: defaults::DISCOVER_TIMEOUT,
                publish: defaults::PUBLISH_TIMEOUT,
            },
        }
    }
}

impl HostArgs {
    pub fn into_config(self) -> Result<HostConfig> {
        let mut command = self.command.into_iter();
        let program = command
            .next()
            .filter(|p| !p.is_empty())
            .ok_or_else(|| anyhow!("Missing plugin command"))?;

        Ok(HostConfig {
            program,
            args: command.collect(),
            data_dir: self.data_dir,
            transcript: self.transcript,
            startup_timeout: self.startup_timeout,
            timeouts: Timeouts {
                discover: self.discover_timeout,
                publish: self.publish_timeout,
            },
        })
    }
}

/// Parse `500ms`, `5s`, `2m` or plain seconds.
pub fn parse_duration(raw: &str) -> Result<Duration> {
    let raw = raw.trim();
    if let Some(ms) = raw.strip_suffix("ms") {
        return Ok(Duration::from_millis(ms.trim().parse()?));
    }
    if let Some(secs) = raw.strip_suffix('s') {
        return secs_to_duration(parse_secs(secs)?);
    }
    if let Some(mins) = raw.strip_suffix('m') {
        return secs_to_duration(parse_secs(mins)? * 60.0);
    }
    if let Ok(secs) = parse_secs(raw) {
        return secs_to_duration(secs);
    }

    Err(anyhow!(
        "Unsupported duration '{}'. Use e.g. 500ms, 5s, 2m or a number of seconds.",
        raw
    ))
}

fn parse_secs(raw: &str) -> Result<f64> {
    let secs: f64 = raw.trim().parse()?;
    if !secs.is_finite() || secs < 0.0 {
        return Err(anyhow!("Duration must be a non-negative number"));
    }
    Ok(secs)
}

fn secs_to_duration(secs: f64) -> Result<Duration> {
    Duration::try_from_secs_f64(secs).map_err(|e| anyhow!("Duration out of range: {}", e))
}

/// Run `cases` in order over one client.
pub async fn run_suite(
    client: &mut PluginClient,
    cases: &[Case],
    config: &HostConfig,
    mut transcript: Option<&mut Transcript>,
) -> Vec<CaseResult> {
    let mut results = Vec::with_capacity(cases.len());
    for case in cases {
        let result = run_case(
            client,
            case,
            &config.data_dir,
            config.timeouts,
            transcript.as_deref_mut(),
        )
        .await;
        match &result.error {
            None => info!("{}: passed", case.name),
            Some(e) => {
                info!("{}: failed: {}", case.name, e);
                if let Some(t) = transcript.as_deref_mut() {
                    let _ = t.note(&format!("case failed: {}", e));
                }
            }
        }
        results.push(result);
    }
    if let Some(t) = transcript {
        let _ = t.flush();
    }
    results
}
