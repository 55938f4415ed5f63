//! Service lifecycle and graceful shutdown.
//!
//! [`Lifecycle`] owns the HTTP server from bind to exit:
//!
//! ```text
//! Starting ──start()──▶ Running ──token cancelled──▶ ShuttingDown ──▶ Stopped
//!     │                    │                              │
//!     └──bind error──┐     └──server exited──┐            └──deadline passed──┐
//!                    ▼                       ▼                                ▼
//!                              StoppedWithError
//! ```
//!
//! Shutdown is requested through a [`CancellationToken`] supplied by the
//! caller. In production [`spawn_signal_listener`](crate::signal::spawn_signal_listener)
//! cancels it on SIGINT/SIGTERM; tests cancel it directly.
//!
//! Every accepted connection runs on a task owned by the serving task. On
//! drain, each connection finishes its current request and closes. If the
//! deadline passes first, the serving task is aborted and takes every open
//! connection, and the handlers running on them, down with it.
//!
//! # Example
//!
//! ```ignore
//! let token = CancellationToken::new();
//! let _signals = spawn_signal_listener(token.clone())?;
//!
//! let status = Lifecycle::new(token).run(config.server.addr(), app).await;
//! std::process::exit(status.code().into());
//! ```

use std::io;
use std::net::SocketAddr;
use std::process::ExitCode;
use std::time::Duration;

use axum::extract::ConnectInfo;
use axum::serve::Listener;
use axum::Router;
use hyper::body::Incoming;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tower::Service;
use tracing::{debug, error, info, warn};

/// How long in-flight requests may take to finish once shutdown starts.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Where the coordinator is in its life.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Starting,
    Running,
    ShuttingDown,
    Stopped,
    StoppedWithError,
}

/// Process outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    /// Graceful stop, exit code 0.
    Success,
    /// Any failure path, exit code 1.
    Failure,
}

impl ExitStatus {
    pub fn code(self) -> u8 {
        match self {
            ExitStatus::Success => 0,
            ExitStatus::Failure => 1,
        }
    }
}

impl From<ExitStatus> for ExitCode {
    fn from(status: ExitStatus) -> Self {
        ExitCode::from(status.code())
    }
}

/// Errors from starting, running or stopping the server.
#[derive(Debug, Error)]
pub enum LifecycleError {
    /// The listen address could not be bound.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    /// The listener reported an I/O error.
    #[error("server error: {0}")]
    Server(#[source] io::Error),

    /// The server returned while no shutdown was requested.
    #[error("server stopped without a shutdown request")]
    UnexpectedExit,

    /// The serving task panicked or was cancelled.
    #[error("server task failed: {0}")]
    TaskFailed(String),

    /// In-flight requests were still running when the deadline passed.
    #[error("graceful shutdown did not complete within {0:?}")]
    ShutdownTimeout(Duration),

    /// `start` was called more than once.
    #[error("server already started")]
    AlreadyStarted,

    /// There is no running server to wait on.
    #[error("server is not running")]
    NotRunning,
}

/// Why the coordinator left the running state.
#[derive(Debug)]
pub enum Termination {
    /// The termination token was cancelled.
    Signal,
    /// The server stopped on its own.
    ServerError(LifecycleError),
}

struct RunningServer {
    local_addr: SocketAddr,
    drain: CancellationToken,
    task: JoinHandle<()>,
}

/// Coordinator that runs an axum router until told to stop.
pub struct Lifecycle {
    termination: CancellationToken,
    shutdown_timeout: Duration,
    state: LifecycleState,
    server: Option<RunningServer>,
}

impl Lifecycle {
    /// Create a coordinator that shuts down when `termination` is cancelled.
    pub fn new(termination: CancellationToken) -> Self {
        Self {
            termination,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            state: LifecycleState::Starting,
            server: None,
        }
    }

    /// Override [`DEFAULT_SHUTDOWN_TIMEOUT`].
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn shutdown_timeout(&self) -> Duration {
        self.shutdown_timeout
    }

    /// Address the server is listening on, while it runs.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.server.as_ref().map(|s| s.local_addr)
    }

    /// Bind `addr` and serve `router` on a background task.
    ///
    /// Returns the bound address once the listener is ready; serving continues
    /// in the background. A bind failure leaves the coordinator in
    /// [`LifecycleState::StoppedWithError`].
    pub async fn start(
        &mut self,
        addr: SocketAddr,
        router: Router,
    ) -> Result<SocketAddr, LifecycleError> {
        if self.state != LifecycleState::Starting {
            return Err(LifecycleError::AlreadyStarted);
        }

        let listener = match TcpListener::bind(addr).await {
            Ok(listener) => listener,
            Err(source) => {
                self.state = LifecycleState::StoppedWithError;
                return Err(LifecycleError::Bind { addr, source });
            }
        };

        self.start_with_listener(listener, router)
    }

    /// Serve `router` on an already bound listener.
    ///
    /// Handlers can read the peer address through
    /// [`ConnectInfo<SocketAddr>`](ConnectInfo).
    pub fn start_with_listener<L>(
        &mut self,
        listener: L,
        router: Router,
    ) -> Result<SocketAddr, LifecycleError>
    where
        L: Listener<Addr = SocketAddr>,
    {
        if self.state != LifecycleState::Starting {
            return Err(LifecycleError::AlreadyStarted);
        }

        let local_addr = match listener.local_addr() {
            Ok(local_addr) => local_addr,
            Err(e) => {
                self.state = LifecycleState::StoppedWithError;
                return Err(LifecycleError::Server(e));
            }
        };

        let drain = CancellationToken::new();
        let task = tokio::spawn(accept_loop(listener, router, drain.clone()));

        info!(addr = %local_addr, "server listening");

        self.state = LifecycleState::Running;
        self.server = Some(RunningServer {
            local_addr,
            drain,
            task,
        });
        Ok(local_addr)
    }

    /// Wait until the termination token is cancelled or the server stops.
    ///
    /// Whichever happens first wins. A server that stops before shutdown was
    /// requested is always reported as [`Termination::ServerError`].
    pub async fn await_termination(&mut self) -> Termination {
        let Some(server) = self.server.as_mut() else {
            return Termination::ServerError(LifecycleError::NotRunning);
        };

        enum Event {
            Cancelled,
            Exited(Result<(), JoinError>),
        }

        let event = tokio::select! {
            _ = self.termination.cancelled() => Event::Cancelled,
            result = &mut server.task => Event::Exited(result),
        };

        match event {
            Event::Cancelled => {
                self.state = LifecycleState::ShuttingDown;
                Termination::Signal
            }
            Event::Exited(result) => {
                self.server = None;
                self.state = LifecycleState::StoppedWithError;
                Termination::ServerError(unexpected_exit(result))
            }
        }
    }

    /// Gracefully stop the server within the configured timeout.
    pub async fn shutdown(&mut self) -> Result<(), LifecycleError> {
        self.shutdown_within(self.shutdown_timeout).await
    }

    /// Stop accepting connections and wait up to `deadline` for in-flight
    /// requests. Connections still open at the deadline are closed and their
    /// handlers cancelled before this returns.
    ///
    /// Calling this when no server is running, including a second time, does
    /// nothing and returns `Ok(())`.
    pub async fn shutdown_within(&mut self, deadline: Duration) -> Result<(), LifecycleError> {
        let Some(mut server) = self.server.take() else {
            return Ok(());
        };

        self.state = LifecycleState::ShuttingDown;
        info!(
            addr = %server.local_addr,
            timeout_secs = deadline.as_secs_f64(),
            "draining in-flight requests"
        );
        server.drain.cancel();

        let result = match tokio::time::timeout(deadline, &mut server.task).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(join)) => Err(LifecycleError::TaskFailed(join.to_string())),
            Err(_) => {
                warn!(
                    addr = %server.local_addr,
                    "deadline passed, closing remaining connections"
                );
                // Dropping the serving task drops the JoinSet, which aborts
                // every connection task.
                server.task.abort();
                let _ = (&mut server.task).await;
                Err(LifecycleError::ShutdownTimeout(deadline))
            }
        };

        self.state = match result {
            Ok(()) => LifecycleState::Stopped,
            Err(_) => LifecycleState::StoppedWithError,
        };
        result
    }

    /// Serve `router` on `addr` until the termination token is cancelled, then
    /// shut down gracefully.
    ///
    /// Signal handlers must be registered before calling this.
    pub async fn run(&mut self, addr: SocketAddr, router: Router) -> ExitStatus {
        if let Err(e) = self.start(addr, router).await {
            error!(error = %e, "server failed to start");
            return ExitStatus::Failure;
        }

        self.run_until_stopped().await
    }

    /// Like [`Lifecycle::run`] on an already bound listener.
    pub async fn run_with_listener<L>(&mut self, listener: L, router: Router) -> ExitStatus
    where
        L: Listener<Addr = SocketAddr>,
    {
        if let Err(e) = self.start_with_listener(listener, router) {
            error!(error = %e, "server failed to start");
            return ExitStatus::Failure;
        }

        self.run_until_stopped().await
    }

    async fn run_until_stopped(&mut self) -> ExitStatus {
        match self.await_termination().await {
            Termination::ServerError(e) => {
                error!(error = %e, "server stopped unexpectedly");
                ExitStatus::Failure
            }
            Termination::Signal => {
                info!("shutdown signal received");
                match self.shutdown().await {
                    Ok(()) => {
                        info!("service stopped gracefully");
                        ExitStatus::Success
                    }
                    Err(e) => {
                        error!(error = %e, "server shutdown failed");
                        ExitStatus::Failure
                    }
                }
            }
        }
    }
}

impl std::fmt::Debug for Lifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lifecycle")
            .field("state", &self.state)
            .field("local_addr", &self.local_addr())
            .field("shutdown_timeout", &self.shutdown_timeout)
            .finish()
    }
}

/// Every way the serving task can end on its own is fatal.
fn unexpected_exit(result: Result<(), JoinError>) -> LifecycleError {
    match result {
        Ok(()) => LifecycleError::UnexpectedExit,
        Err(join) => LifecycleError::TaskFailed(join.to_string()),
    }
}

/// Accept connections until `drain` is cancelled, then wait for the open ones
/// to finish.
///
/// Connection tasks live in a [`JoinSet`] owned by this future, so aborting
/// the task running it closes them all.
async fn accept_loop<L>(mut listener: L, router: Router, drain: CancellationToken)
where
    L: Listener<Addr = SocketAddr>,
{
    let mut connections = JoinSet::new();

    loop {
        tokio::select! {
            _ = drain.cancelled() => break,
            (io, remote) = listener.accept() => {
                connections.spawn(serve_connection(io, remote, router.clone(), drain.clone()));
            }
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
        }
    }

    drop(listener);
    debug!(open = connections.len(), "listener closed, waiting for open connections");
    while connections.join_next().await.is_some() {}
}

async fn serve_connection<I>(io: I, remote: SocketAddr, router: Router, drain: CancellationToken)
where
    I: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let service = hyper::service::service_fn(move |mut request: hyper::Request<Incoming>| {
        request.extensions_mut().insert(ConnectInfo(remote));
        // Router is always ready, so poll_ready can be skipped.
        router.clone().call(request)
    });

    let builder = auto::Builder::new(TokioExecutor::new());
    let connection = builder.serve_connection_with_upgrades(TokioIo::new(io), service);
    tokio::pin!(connection);

    let mut draining = false;
    loop {
        tokio::select! {
            result = connection.as_mut() => {
                if let Err(e) = result {
                    debug!(error = %e, %remote, "connection closed with error");
                }
                break;
            }
            _ = drain.cancelled(), if !draining => {
                draining = true;
                connection.as_mut().graceful_shutdown();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_status_codes() {
        assert_eq!(ExitStatus::Success.code(), 0);
        assert_eq!(ExitStatus::Failure.code(), 1);
    }

    #[test]
    fn test_new_lifecycle() {
        let lifecycle = Lifecycle::new(CancellationToken::new());
        assert_eq!(lifecycle.state(), LifecycleState::Starting);
        assert_eq!(lifecycle.shutdown_timeout(), Duration::from_secs(30));
        assert!(lifecycle.local_addr().is_none());

        let lifecycle = lifecycle.with_shutdown_timeout(Duration::from_secs(2));
        assert_eq!(lifecycle.shutdown_timeout(), Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_unexpected_exit_is_always_fatal() {
        assert!(matches!(
            unexpected_exit(Ok(())),
            LifecycleError::UnexpectedExit
        ));

        let panicked = tokio::spawn(async { panic!("serve loop crashed") }).await;
        assert!(matches!(
            unexpected_exit(panicked),
            LifecycleError::TaskFailed(_)
        ));
    }

    #[tokio::test]
    async fn test_await_termination_without_server() {
        let mut lifecycle = Lifecycle::new(CancellationToken::new());
        assert!(matches!(
            lifecycle.await_termination().await,
            Termination::ServerError(LifecycleError::NotRunning)
        ));
    }

    #[test]
    fn test_error_display() {
        let err = LifecycleError::ShutdownTimeout(Duration::from_secs(30));
        assert_eq!(err.to_string(), "graceful shutdown did not complete within 30s");

        let err = LifecycleError::Bind {
            addr: "127.0.0.1:8080".parse().unwrap(),
            source: io::Error::from(io::ErrorKind::AddrInUse),
        };
        assert!(err.to_string().starts_with("failed to bind 127.0.0.1:8080"));
    }
}
