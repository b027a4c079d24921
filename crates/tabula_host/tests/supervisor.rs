//! Handshake outcomes against small shell-script plugins.
#![cfg(unix)]

use std::time::Duration;

use tabula_host::{PluginProcess, SupervisorError};

fn sh(script: &str) -> PluginProcess {
    PluginProcess::spawn("sh", &["-c".to_string(), script.to_string()]).unwrap()
}

#[tokio::test]
async fn test_port_line_is_accepted() {
    let mut plugin = sh("echo 4242; echo after handshake; sleep 30");
    let port = plugin.handshake(Duration::from_secs(5)).await.unwrap();
    assert_eq!(port, 4242);
    assert!(plugin.try_exit().is_none());

    let outcome = plugin.terminate().await.expect("reaped");
    assert!(!outcome.success());
    assert!(plugin.try_exit().is_some());
}

#[tokio::test]
async fn test_bad_port_line() {
    let mut plugin = sh("echo listening on 4242; sleep 30");
    let err = plugin.handshake(Duration::from_secs(5)).await.unwrap_err();
    match err {
        SupervisorError::BadPort { line } => assert_eq!(line, "listening on 4242"),
        other => panic!("unexpected {:?}", other),
    }
    plugin.terminate().await;
}

#[tokio::test]
async fn test_clean_exit_before_handshake() {
    let mut plugin = sh("exit 0");
    let err = plugin.handshake(Duration::from_secs(5)).await.unwrap_err();
    match err {
        SupervisorError::EarlyExit(outcome) => assert!(outcome.success()),
        other => panic!("unexpected {:?}", other),
    }
}

#[tokio::test]
async fn test_failed_exit_before_handshake() {
    let mut plugin = sh("echo oops >&2; exit 3");
    let err = plugin.handshake(Duration::from_secs(5)).await.unwrap_err();
    match err {
        SupervisorError::EarlyExit(outcome) => assert_eq!(outcome.code, Some(3)),
        other => panic!("unexpected {:?}", other),
    }
}

#[tokio::test]
async fn test_silent_plugin_times_out() {
    let mut plugin = sh("sleep 30");
    let err = plugin
        .handshake(Duration::from_millis(200))
        .await
        .unwrap_err();
    assert!(matches!(err, SupervisorError::StartupTimeout(_)), "{:?}", err);
    plugin.terminate().await.expect("reaped");
}

#[tokio::test]
async fn test_handshake_only_once() {
    let mut plugin = sh("echo 4242; sleep 30");
    plugin.handshake(Duration::from_secs(5)).await.unwrap();
    let err = plugin.handshake(Duration::from_secs(5)).await.unwrap_err();
    assert!(matches!(err, SupervisorError::HandshakeDone));
    plugin.terminate().await;
}

#[tokio::test]
async fn test_exited_resolves_after_plugin_ends() {
    let mut plugin = sh("echo 4242; exit 0");
    plugin.handshake(Duration::from_secs(5)).await.unwrap();
    let outcome = tokio::time::timeout(Duration::from_secs(5), plugin.exited())
        .await
        .expect("plugin exits on its own");
    assert!(outcome.success());
}

#[tokio::test]
async fn test_host_binary_exits_zero_when_plugin_declines() {
    let output = tokio::process::Command::new(env!("CARGO_BIN_EXE_tabula-host"))
        .args(["sh", "-c", "exit 0"])
        .output()
        .await
        .unwrap();
    assert!(output.status.success());
    assert!(output.stdout.is_empty());
}

#[tokio::test]
async fn test_host_binary_fails_on_bad_handshake() {
    let output = tokio::process::Command::new(env!("CARGO_BIN_EXE_tabula-host"))
        .args(["sh", "-c", "echo nope"])
        .output()
        .await
        .unwrap();
    assert!(!output.status.success());
    assert!(output.stdout.is_empty());
}

fn pid_alive(pid: &str) -> bool {
    std::process::Command::new("kill")
        .args(["-0", pid])
        .stderr(std::process::Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

#[tokio::test]
async fn test_host_sigterm_kills_plugin_and_exits_zero() {
    let tmp = tempfile::tempdir().unwrap();
    let marker = tmp.path().join("plugin.pid");
    let script = format!("echo $$ > {}; exec sleep 30", marker.display());

    let mut host = tokio::process::Command::new(env!("CARGO_BIN_EXE_tabula-host"))
        .args(["sh", "-c", &script])
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .unwrap();

    // The marker appears once the plugin runs, after the host installed its handlers
    let mut plugin_pid = String::new();
    for _ in 0..100 {
        if let Ok(text) = std::fs::read_to_string(&marker) {
            if text.ends_with('\n') {
                plugin_pid = text.trim().to_string();
                break;
            }
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert!(!plugin_pid.is_empty(), "plugin never started");
    assert!(pid_alive(&plugin_pid));

    let host_pid = host.id().unwrap().to_string();
    let status = std::process::Command::new("kill")
        .args(["-TERM", &host_pid])
        .status()
        .unwrap();
    assert!(status.success());

    let exit = tokio::time::timeout(Duration::from_secs(5), host.wait())
        .await
        .expect("host exits after SIGTERM")
        .unwrap();
    assert_eq!(exit.code(), Some(0));

    let mut gone = false;
    for _ in 0..40 {
        if !pid_alive(&plugin_pid) {
            gone = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert!(gone, "plugin {} still running", plugin_pid);
}
