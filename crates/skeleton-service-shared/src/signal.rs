//! OS termination signals.
//!
//! SIGINT and SIGTERM are handled identically: the first one cancels the
//! termination token, later ones are logged and ignored so a second Ctrl+C
//! cannot cut a drain short.

use std::io;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Register signal handlers and cancel `token` when one fires.
///
/// Handlers are installed before this function returns, so a signal arriving
/// while the server is still starting is not lost. The task runs until it is
/// aborted.
#[cfg(unix)]
pub fn spawn_signal_listener(token: CancellationToken) -> io::Result<JoinHandle<()>> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;

    Ok(tokio::spawn(async move {
        loop {
            let name = tokio::select! {
                _ = interrupt.recv() => "SIGINT",
                _ = terminate.recv() => "SIGTERM",
            };

            if token.is_cancelled() {
                tracing::warn!(signal = name, "shutdown already in progress, ignoring signal");
            } else {
                tracing::info!(signal = name, "termination signal received");
                token.cancel();
            }
        }
    }))
}

/// Register a Ctrl+C handler and cancel `token` when it fires.
///
/// As on unix, the handler is armed before this function returns.
#[cfg(windows)]
pub fn spawn_signal_listener(token: CancellationToken) -> io::Result<JoinHandle<()>> {
    let mut ctrl_c = tokio::signal::windows::ctrl_c()?;

    Ok(tokio::spawn(async move {
        while ctrl_c.recv().await.is_some() {
            if token.is_cancelled() {
                tracing::warn!(signal = "Ctrl+C", "shutdown already in progress, ignoring signal");
            } else {
                tracing::info!(signal = "Ctrl+C", "termination signal received");
                token.cancel();
            }
        }
    }))
}
