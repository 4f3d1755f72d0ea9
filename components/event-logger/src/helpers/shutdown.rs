// External crates
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

/// Process-wide shutdown switch, built on a `CancellationToken`.
///
/// - The tailer and the metrics server each hold a clone of `token()`.
/// - `trigger()` cancels every clone at once; triggering twice is a no-op.
/// - `listen_for_signals()` triggers it on Ctrl+C or SIGTERM.
#[derive(Debug, Clone, Default)]
pub struct Shutdown {
    token: CancellationToken,
}

impl Shutdown {
    #[instrument(
        name = "vcel_shutdown_channel",
        target = "helpers::shutdown",
        level = "trace"
    )]
    pub fn new() -> Self {
        tracing::trace!("Creating global shutdown token");
        Self::default()
    }

    /// Token handed to a component that must stop on shutdown.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    #[instrument(
        name = "vcel_shutdown_trigger",
        target = "helpers::shutdown",
        level = "trace",
        skip(self)
    )]
    pub fn trigger(&self) {
        tracing::trace!("Shutdown triggered, cancelling all token holders");
        self.token.cancel();
    }

    pub fn is_triggered(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Spawn a task that triggers shutdown on the first Ctrl+C or SIGTERM.
    /// The task ends on its own once shutdown happens for any other reason.
    pub fn listen_for_signals(&self) -> JoinHandle<()> {
        let shutdown = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = shutdown.token.cancelled() => return,
                received = wait_for_signal() => match received {
                    Ok(signal) => tracing::info!(signal, "Signal received, shutting down"),
                    Err(e) => {
                        tracing::warn!(error = %e, "Failed to listen for shutdown signals");
                        return;
                    }
                },
            }
            shutdown.trigger();
        })
    }
}

#[cfg(unix)]
async fn wait_for_signal() -> std::io::Result<&'static str> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut terminate = signal(SignalKind::terminate())?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result.map(|_| "SIGINT"),
        _ = terminate.recv() => Ok("SIGTERM"),
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() -> std::io::Result<&'static str> {
    tokio::signal::ctrl_c().await.map(|_| "ctrl-c")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_trigger_cancels_every_token() {
        let shutdown = Shutdown::new();
        let first = shutdown.token();
        let second = shutdown.clone().token();
        assert!(!shutdown.is_triggered());

        shutdown.trigger();
        shutdown.trigger();

        first.cancelled().await;
        second.cancelled().await;
        assert!(shutdown.is_triggered());
    }

    #[tokio::test]
    async fn test_signal_listener_exits_after_trigger() {
        let shutdown = Shutdown::new();
        let listener = shutdown.listen_for_signals();
        shutdown.trigger();
        listener.await.unwrap();
    }
}
