use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

/// Token for cooperative cancellation of in-flight calls.
///
/// Clone is cheap and shares state. Blocking code polls
/// [`is_cancelled`](Self::is_cancelled); async code awaits
/// [`cancelled`](Self::cancelled).
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    cancelled: AtomicBool,
    notify: Notify,
}

impl CancellationToken {
    /// Create a new cancellation token (not cancelled).
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Request cancellation and wake every waiter.
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    /// Resolves once cancellation has been requested.
    pub async fn cancelled(&self) {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            // Register before checking the flag so a concurrent cancel() is not missed.
            notified.as_mut().enable();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

/// Exit code when a repeated signal skips the graceful shutdown.
pub const FORCED_EXIT_CODE: i32 = 130;

/// What a received signal should do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalAction {
    /// First signal: cancel and let in-flight work wind down.
    Cancel,
    /// Already cancelling: exit immediately.
    ForceExit,
}

/// Record one signal against `token`.
pub fn on_signal(token: &CancellationToken) -> SignalAction {
    if token.is_cancelled() {
        SignalAction::ForceExit
    } else {
        token.cancel();
        SignalAction::Cancel
    }
}

fn handle_signal(token: &CancellationToken, name: &str) {
    match on_signal(token) {
        SignalAction::Cancel => tracing::info!("Received {}, shutting down...", name),
        SignalAction::ForceExit => {
            tracing::warn!("Received {} again, exiting immediately", name);
            std::process::exit(FORCED_EXIT_CODE);
        }
    }
}

/// Cancel `token` on SIGINT/SIGTERM (Ctrl+C on Windows). A second signal
/// exits the process with [`FORCED_EXIT_CODE`].
pub fn install_signal_handlers(token: CancellationToken) -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use signal_hook::consts::{SIGINT, SIGTERM};
        use signal_hook::iterator::Signals;

        let mut signals = Signals::new([SIGINT, SIGTERM])?;
        std::thread::spawn(move || {
            for sig in signals.forever() {
                handle_signal(&token, &format!("signal {}", sig));
            }
        });
    }

    #[cfg(windows)]
    {
        ctrlc::set_handler(move || handle_signal(&token, "Ctrl+C"))
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
    }

    Ok(())
}
