//! Plugin process supervision
//!
//! The plugin is spawned with piped output. Its first stdout line must be
//! the port it listens on; everything after that, and all of stderr, is
//! forwarded to the `plugin` log target. A monitor task owns the child and
//! publishes its exit through a watch channel so any number of callers can
//! wait for it.

use std::fmt;
use std::io;
use std::process::Stdio;
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader, Lines};
use tokio::process::{Child, ChildStdout, Command};
use tokio::sync::{oneshot, watch};
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum SupervisorError {
    #[error("Couldn't start plugin '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },

    #[error("Did not get a port from the plugin within timeout of {0:?}")]
    StartupTimeout(Duration),

    #[error("Bad port number {line:?}")]
    BadPort { line: String },

    #[error("Plugin exited before the handshake ({0})")]
    EarlyExit(ExitOutcome),

    #[error("Handshake already performed")]
    HandshakeDone,

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// How the plugin process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitOutcome {
    /// `None` when the process was ended by a signal.
    pub code: Option<i32>,
}

impl ExitOutcome {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

impl fmt::Display for ExitOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(f, "exit code {}", code),
            None => write!(f, "terminated by signal"),
        }
    }
}

/// A running plugin process.
pub struct PluginProcess {
    command: String,
    pid: Option<u32>,
    stdout: Option<Lines<BufReader<ChildStdout>>>,
    exit_rx: watch::Receiver<Option<ExitOutcome>>,
    kill_tx: Option<oneshot::Sender<()>>,
}

impl PluginProcess {
    /// Start `program` with `args`. Does not wait for the handshake.
    pub fn spawn(program: &str, args: &[String]) -> Result<Self, SupervisorError> {
        let command = std::iter::once(program)
            .chain(args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ");

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| SupervisorError::Spawn {
                command: command.clone(),
                source,
            })?;

        let pid = child.id();
        info!("Started plugin '{}' (pid {:?})", command, pid);

        let stdout = child.stdout.take().map(|s| BufReader::new(s).lines());
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_lines(BufReader::new(stderr).lines()));
        }

        let (exit_tx, exit_rx) = watch::channel(None);
        let (kill_tx, kill_rx) = oneshot::channel();
        tokio::spawn(monitor(child, exit_tx, kill_rx));

        Ok(Self {
            command,
            pid,
            stdout,
            exit_rx,
            kill_tx: Some(kill_tx),
        })
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Wait for the port line, racing the timeout and process exit.
    ///
    /// On success the rest of stdout is forwarded to the log.
    pub async fn handshake(&mut self, timeout: Duration) -> Result<u16, SupervisorError> {
        let mut lines = self.stdout.take().ok_or(SupervisorError::HandshakeDone)?;
        let mut exit_rx = self.exit_rx.clone();
        let deadline = tokio::time::Instant::now() + timeout;

        enum Race {
            Line(io::Result<Option<String>>),
            Exited(ExitOutcome),
            Timeout,
        }

        let race = tokio::select! {
            biased;
            line = lines.next_line() => Race::Line(line),
            outcome = wait_for_exit(&mut exit_rx) => Race::Exited(outcome),
            _ = tokio::time::sleep_until(deadline) => Race::Timeout,
        };

        match race {
            Race::Line(Ok(Some(line))) => {
                let port = parse_port(&line)?;
                info!("Got port: {}", port);
                tokio::spawn(forward_lines(lines));
                Ok(port)
            }
            Race::Line(Ok(None)) => {
                // Stdout closed; the exit status says why
                match tokio::time::timeout_at(deadline, wait_for_exit(&mut exit_rx)).await {
                    Ok(outcome) => Err(SupervisorError::EarlyExit(outcome)),
                    Err(_) => Err(SupervisorError::StartupTimeout(timeout)),
                }
            }
            Race::Line(Err(e)) => Err(SupervisorError::Io(e)),
            Race::Exited(outcome) => Err(SupervisorError::EarlyExit(outcome)),
            Race::Timeout => Err(SupervisorError::StartupTimeout(timeout)),
        }
    }

    /// Resolves when the plugin has exited.
    pub async fn exited(&self) -> ExitOutcome {
        let mut exit_rx = self.exit_rx.clone();
        wait_for_exit(&mut exit_rx).await
    }

    /// Exit status if the plugin has already exited.
    pub fn try_exit(&self) -> Option<ExitOutcome> {
        *self.exit_rx.borrow()
    }

    /// Kill the plugin (if still running) and wait for it to be reaped.
    pub async fn terminate(&mut self) -> Option<ExitOutcome> {
        if let Some(kill_tx) = self.kill_tx.take() {
            if self.try_exit().is_none() {
                info!("Terminating plugin '{}'", self.command);
            }
            let _ = kill_tx.send(());
        }
        match tokio::time::timeout(Duration::from_secs(5), self.exited()).await {
            Ok(outcome) => Some(outcome),
            Err(_) => {
                warn!("Plugin '{}' did not exit after kill", self.command);
                None
            }
        }
    }
}

/// Parse a handshake line: a positive decimal port and nothing else.
pub fn parse_port(line: &str) -> Result<u16, SupervisorError> {
    match line.trim().parse::<u16>() {
        Ok(port) if port > 0 => Ok(port),
        _ => Err(SupervisorError::BadPort {
            line: line.to_string(),
        }),
    }
}

async fn monitor(
    mut child: Child,
    exit_tx: watch::Sender<Option<ExitOutcome>>,
    kill_rx: oneshot::Receiver<()>,
) {
    let status = tokio::select! {
        status = child.wait() => status,
        _ = kill_rx => {
            if let Err(e) = child.start_kill() {
                debug!("Kill failed (already exited?): {}", e);
            }
            child.wait().await
        }
    };

    let outcome = match status {
        Ok(status) => ExitOutcome {
            code: status.code(),
        },
        Err(e) => {
            warn!("Failed to wait for plugin: {}", e);
            ExitOutcome { code: None }
        }
    };
    info!("Plugin exited ({})", outcome);
    let _ = exit_tx.send(Some(outcome));
}

async fn wait_for_exit(exit_rx: &mut watch::Receiver<Option<ExitOutcome>>) -> ExitOutcome {
    loop {
        if let Some(outcome) = *exit_rx.borrow_and_update() {
            return outcome;
        }
        if exit_rx.changed().await.is_err() {
            // Monitor gone without reporting; treat as killed
            return ExitOutcome { code: None };
        }
    }
}

async fn forward_lines<R>(mut lines: Lines<BufReader<R>>)
where
    R: AsyncRead + Unpin,
{
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => info!(target: "plugin", "{}", line),
            Ok(None) => break,
            Err(e) => {
                debug!("Stopped forwarding plugin output: {}", e);
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_port() {
        assert_eq!(parse_port("4242").unwrap(), 4242);
        assert_eq!(parse_port(" 4242\r").unwrap(), 4242);
        assert!(matches!(parse_port("0"), Err(SupervisorError::BadPort { .. })));
        assert!(matches!(parse_port("-1"), Err(SupervisorError::BadPort { .. })));
        assert!(matches!(parse_port("70000"), Err(SupervisorError::BadPort { .. })));
        assert!(matches!(parse_port("port 80"), Err(SupervisorError::BadPort { .. })));
    }

    #[test]
    fn test_exit_outcome_display() {
        assert_eq!(ExitOutcome { code: Some(3) }.to_string(), "exit code 3");
        assert_eq!(ExitOutcome { code: None }.to_string(), "terminated by signal");
        assert!(ExitOutcome { code: Some(0) }.success());
    }

    #[tokio::test]
    async fn test_missing_program_is_spawn_error() {
        let result = PluginProcess::spawn("/definitely/not/a/plugin", &[]);
        assert!(matches!(result, Err(SupervisorError::Spawn { .. })));
    }
}
