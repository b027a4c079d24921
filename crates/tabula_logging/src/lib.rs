//! Shared logging utilities for tabula binaries.

use anyhow::{Context, Result};
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Logging configuration shared by tabula binaries.
pub struct LogConfig<'a> {
    pub app_name: &'a str,
    /// Filter used when `RUST_LOG` is unset.
    pub default_filter: &'a str,
    /// Lower the console filter to `debug` for this app.
    pub verbose: bool,
    /// Optional file that receives a copy of every event, without ANSI colors.
    pub log_file: Option<PathBuf>,
}

/// Initialize tracing with stderr output and an optional file writer.
///
/// Console output goes to stderr so stdout stays free for protocol use
/// (the plugin handshake) and reports.
pub fn init_logging(config: LogConfig<'_>) -> Result<()> {
    let console_filter = build_filter(&config);

    let file_layer = match &config.log_file {
        Some(path) => {
            let file = open_log_file(path)?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_writer(Mutex::new(file))
                    .with_ansi(false)
                    .with_filter(build_filter(&config)),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_filter(console_filter),
        )
        .with(file_layer)
        .try_init()
        .with_context(|| format!("Failed to initialize logging for {}", config.app_name))?;

    Ok(())
}

fn build_filter(config: &LogConfig<'_>) -> EnvFilter {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return filter;
    }
    if config.verbose {
        EnvFilter::new(format!("{},{}=debug", config.default_filter, config.app_name))
    } else {
        EnvFilter::new(config.default_filter)
    }
}

fn open_log_file(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create log directory: {}", parent.display()))?;
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open log file: {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_log_file_creates_parent() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("nested").join("plugin.log");
        open_log_file(&path).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_verbose_filter_mentions_app() {
        if std::env::var("RUST_LOG").is_ok() {
            return;
        }
        let config = LogConfig {
            app_name: "tabula_plugin",
            default_filter: "info",
            verbose: true,
            log_file: None,
        };
        let filter = build_filter(&config).to_string();
        assert!(filter.contains("tabula_plugin=debug"));
    }
}
