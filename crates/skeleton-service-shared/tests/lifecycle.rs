//! Integration tests for the service lifecycle coordinator.
//!
//! Every test serves a real router on a loopback port and drives shutdown
//! through the injected cancellation token.

mod common;

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::{routing::get, serve::Listener, Router};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::instrument::WithSubscriber;

use common::CapturedLogs;
use skeleton_service_shared::{
    AppState, ExitStatus, Lifecycle, LifecycleError, LifecycleState, Metrics, RouterBuilder,
    ServiceConfig, Termination,
};

fn loopback() -> SocketAddr {
    "127.0.0.1:0".parse().unwrap()
}

/// Send a GET request and read the whole response.
async fn http_get(addr: SocketAddr, path: &str) -> std::io::Result<String> {
    let mut stream = TcpStream::connect(addr).await?;
    let request = format!("GET {path} HTTP/1.1\r\nHost: {addr}\r\nConnection: close\r\n\r\n");
    stream.write_all(request.as_bytes()).await?;

    let mut response = String::new();
    stream.read_to_string(&mut response).await?;
    Ok(response)
}

/// Like [`http_get`], retrying the connection while the server starts up.
async fn http_get_with_retry(addr: SocketAddr, path: &str) -> std::io::Result<String> {
    let mut last_err = None;
    for _ in 0..50 {
        match http_get(addr, path).await {
            Ok(response) => return Ok(response),
            Err(e) => {
                last_err = Some(e);
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        }
    }
    Err(last_err.unwrap())
}

/// `/ok` answers immediately; `/slow` notifies `started` then sleeps for `delay`.
fn test_router(started: Arc<Notify>, delay: Duration) -> Router {
    Router::new().route("/ok", get(|| async { "ok" })).route(
        "/slow",
        get(move || {
            let started = started.clone();
            async move {
                started.notify_one();
                tokio::time::sleep(delay).await;
                "done"
            }
        }),
    )
}

fn quick_router() -> Router {
    test_router(Arc::new(Notify::new()), Duration::ZERO)
}

/// A listener that crashes on its first accept.
struct CrashingListener {
    addr: SocketAddr,
}

impl Listener for CrashingListener {
    type Io = TcpStream;
    type Addr = SocketAddr;

    async fn accept(&mut self) -> (Self::Io, Self::Addr) {
        tokio::time::sleep(Duration::from_millis(50)).await;
        panic!("accept failed");
    }

    fn local_addr(&self) -> std::io::Result<SocketAddr> {
        Ok(self.addr)
    }
}

/// Reserve a free loopback port by binding and releasing it.
fn free_port_addr() -> SocketAddr {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap()
}

#[tokio::test]
async fn test_start_serves_requests_without_blocking() {
    let mut lifecycle = Lifecycle::new(CancellationToken::new());

    let addr = lifecycle.start(loopback(), quick_router()).await.unwrap();
    assert_eq!(lifecycle.state(), LifecycleState::Running);
    assert_eq!(lifecycle.local_addr(), Some(addr));
    assert_ne!(addr.port(), 0);

    let response = http_get(addr, "/ok").await.unwrap();
    assert!(response.starts_with("HTTP/1.1 200 OK"), "{response}");
    assert!(response.ends_with("ok"));

    lifecycle.shutdown().await.unwrap();
    assert_eq!(lifecycle.state(), LifecycleState::Stopped);
}

#[tokio::test]
async fn test_run_stops_gracefully_when_token_cancelled() {
    let token = CancellationToken::new();

    let runner = tokio::spawn({
        let token = token.clone();
        async move {
            let mut lifecycle = Lifecycle::new(token);
            let status = lifecycle.run(loopback(), quick_router()).await;
            (status, lifecycle.state())
        }
    });

    tokio::time::sleep(Duration::from_millis(100)).await;
    token.cancel();

    let (status, state) = runner.await.unwrap();
    assert_eq!(status, ExitStatus::Success);
    assert_eq!(status.code(), 0);
    assert_eq!(state, LifecycleState::Stopped);
}

#[tokio::test]
async fn test_cancellation_before_await_is_observed() {
    let token = CancellationToken::new();
    let mut lifecycle = Lifecycle::new(token.clone());
    lifecycle.start(loopback(), quick_router()).await.unwrap();

    token.cancel();

    assert!(matches!(
        lifecycle.await_termination().await,
        Termination::Signal
    ));
    assert_eq!(lifecycle.state(), LifecycleState::ShuttingDown);
    lifecycle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_shutdown_waits_for_in_flight_request() {
    let started = Arc::new(Notify::new());
    let mut lifecycle = Lifecycle::new(CancellationToken::new());
    let addr = lifecycle
        .start(
            loopback(),
            test_router(started.clone(), Duration::from_millis(300)),
        )
        .await
        .unwrap();

    let client = tokio::spawn(async move { http_get(addr, "/slow").await });
    started.notified().await;

    lifecycle
        .shutdown_within(Duration::from_secs(5))
        .await
        .unwrap();
    assert_eq!(lifecycle.state(), LifecycleState::Stopped);

    let response = client.await.unwrap().unwrap();
    assert!(response.starts_with("HTTP/1.1 200 OK"), "{response}");
    assert!(response.ends_with("done"));

    // The listener is closed once shutdown returns.
    assert!(TcpStream::connect(addr).await.is_err());
}

#[tokio::test]
async fn test_shutdown_times_out_on_slow_request() {
    let started = Arc::new(Notify::new());
    let mut lifecycle = Lifecycle::new(CancellationToken::new());
    let addr = lifecycle
        .start(
            loopback(),
            test_router(started.clone(), Duration::from_secs(30)),
        )
        .await
        .unwrap();

    let client = tokio::spawn(async move { http_get(addr, "/slow").await });
    started.notified().await;

    let deadline = Duration::from_millis(200);
    let err = lifecycle.shutdown_within(deadline).await.unwrap_err();

    assert!(matches!(err, LifecycleError::ShutdownTimeout(d) if d == deadline));
    assert_eq!(lifecycle.state(), LifecycleState::StoppedWithError);
    client.abort();
}

#[tokio::test]
async fn test_run_fails_when_in_flight_work_exceeds_deadline() {
    let started = Arc::new(Notify::new());
    let token = CancellationToken::new();
    let addr = free_port_addr();

    let runner = tokio::spawn({
        let token = token.clone();
        let router = test_router(started.clone(), Duration::from_secs(30));
        async move {
            let mut lifecycle =
                Lifecycle::new(token).with_shutdown_timeout(Duration::from_millis(200));
            lifecycle.run(addr, router).await
        }
    });

    let client = tokio::spawn(async move { http_get_with_retry(addr, "/slow").await });
    started.notified().await;
    token.cancel();

    let status = runner.await.unwrap();
    assert_eq!(status, ExitStatus::Failure);
    assert_eq!(status.code(), 1);
    client.abort();
}

#[tokio::test]
async fn test_shutdown_twice_is_noop() {
    let mut lifecycle = Lifecycle::new(CancellationToken::new());
    lifecycle.start(loopback(), quick_router()).await.unwrap();

    lifecycle.shutdown().await.unwrap();
    lifecycle.shutdown().await.unwrap();

    assert_eq!(lifecycle.state(), LifecycleState::Stopped);
    assert!(lifecycle.local_addr().is_none());
}

#[tokio::test]
async fn test_shutdown_before_start_is_noop() {
    let mut lifecycle = Lifecycle::new(CancellationToken::new());

    lifecycle.shutdown().await.unwrap();
    assert_eq!(lifecycle.state(), LifecycleState::Starting);
}

#[tokio::test]
async fn test_start_twice_is_rejected() {
    let mut lifecycle = Lifecycle::new(CancellationToken::new());
    lifecycle.start(loopback(), quick_router()).await.unwrap();

    let err = lifecycle
        .start(loopback(), quick_router())
        .await
        .unwrap_err();
    assert!(matches!(err, LifecycleError::AlreadyStarted));
    assert_eq!(lifecycle.state(), LifecycleState::Running);

    lifecycle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_bind_failure_never_reaches_running() {
    let occupied = tokio::net::TcpListener::bind(loopback()).await.unwrap();
    let addr = occupied.local_addr().unwrap();

    let mut lifecycle = Lifecycle::new(CancellationToken::new());
    let err = lifecycle.start(addr, quick_router()).await.unwrap_err();

    match err {
        LifecycleError::Bind { addr: failed, .. } => assert_eq!(failed, addr),
        other => panic!("expected bind error, got {other:?}"),
    }
    assert_eq!(lifecycle.state(), LifecycleState::StoppedWithError);
    assert!(lifecycle.local_addr().is_none());

    // Nothing to drain.
    lifecycle.shutdown().await.unwrap();
    assert_eq!(lifecycle.state(), LifecycleState::StoppedWithError);
}

#[tokio::test]
async fn test_run_reports_failure_on_bind_error() {
    let occupied = tokio::net::TcpListener::bind(loopback()).await.unwrap();
    let addr = occupied.local_addr().unwrap();

    let mut lifecycle = Lifecycle::new(CancellationToken::new());
    let status = tokio::time::timeout(Duration::from_secs(5), lifecycle.run(addr, quick_router()))
        .await
        .expect("run must return immediately on bind failure");

    assert_eq!(status, ExitStatus::Failure);
    assert_eq!(lifecycle.state(), LifecycleState::StoppedWithError);
}

#[tokio::test]
async fn test_timeout_closes_open_connections() {
    let started = Arc::new(Notify::new());
    let finished = Arc::new(AtomicBool::new(false));
    let router = Router::new().route(
        "/slow",
        get({
            let started = started.clone();
            let finished = finished.clone();
            move || async move {
                started.notify_one();
                tokio::time::sleep(Duration::from_millis(600)).await;
                finished.store(true, Ordering::SeqCst);
                "done"
            }
        }),
    );

    let mut lifecycle = Lifecycle::new(CancellationToken::new());
    let addr = lifecycle.start(loopback(), router).await.unwrap();

    let client = tokio::spawn(async move { http_get(addr, "/slow").await });
    started.notified().await;

    let err = lifecycle
        .shutdown_within(Duration::from_millis(100))
        .await
        .unwrap_err();
    assert!(matches!(err, LifecycleError::ShutdownTimeout(_)));

    // The client sees the connection close well before the handler would
    // have answered.
    let response = tokio::time::timeout(Duration::from_millis(400), client)
        .await
        .expect("connection left open after the deadline")
        .unwrap();
    match response {
        Ok(body) => assert!(!body.contains("done"), "{body}"),
        Err(e) => assert!(
            matches!(
                e.kind(),
                std::io::ErrorKind::ConnectionReset | std::io::ErrorKind::UnexpectedEof
            ),
            "{e}"
        ),
    }

    tokio::time::sleep(Duration::from_millis(800)).await;
    assert!(
        !finished.load(Ordering::SeqCst),
        "handler kept running after the deadline"
    );
}

#[tokio::test]
async fn test_default_middleware_stack_does_not_preempt_shutdown_deadline() {
    let config = ServiceConfig::default();
    config.validate().unwrap();
    let metrics = Metrics::new(&config.metrics).unwrap();
    let state = AppState::new(config, metrics, CancellationToken::new());

    let started = Arc::new(Notify::new());
    let router = RouterBuilder::new(state)
        .route(
            "/slow",
            get({
                let started = started.clone();
                move || async move {
                    started.notify_one();
                    tokio::time::sleep(Duration::from_secs(3)).await;
                    "done"
                }
            }),
        )
        .build();

    let token = CancellationToken::new();
    let addr = free_port_addr();
    let runner = tokio::spawn({
        let token = token.clone();
        async move {
            let mut lifecycle =
                Lifecycle::new(token).with_shutdown_timeout(Duration::from_millis(500));
            lifecycle.run(addr, router).await
        }
    });

    let client = tokio::spawn(async move { http_get_with_retry(addr, "/slow").await });
    started.notified().await;
    token.cancel();

    let status = runner.await.unwrap();
    assert_eq!(status, ExitStatus::Failure);

    if let Ok(Ok(response)) = client.await {
        assert!(!response.contains("408"), "{response}");
    }
}

#[tokio::test]
async fn test_graceful_stop_is_logged_in_order() {
    let logs = CapturedLogs::default();
    let token = CancellationToken::new();

    let runner = tokio::spawn({
        let token = token.clone();
        let subscriber = logs.subscriber();
        async move {
            let mut lifecycle = Lifecycle::new(token);
            lifecycle
                .run(loopback(), quick_router())
                .with_subscriber(subscriber)
                .await
        }
    });

    tokio::time::sleep(Duration::from_millis(100)).await;
    token.cancel();
    assert_eq!(runner.await.unwrap(), ExitStatus::Success);

    let listening = logs.position("server listening").expect("no listening log");
    let received = logs
        .position("shutdown signal received")
        .expect("no signal log");
    let draining = logs
        .position("draining in-flight requests")
        .expect("no drain log");
    let stopped = logs
        .position("service stopped gracefully")
        .expect("no stop log");

    assert!(listening < received);
    assert!(received < draining);
    assert!(draining < stopped);
    assert!(!logs.contains("server shutdown failed"));
}

#[tokio::test]
async fn test_bind_failure_logs_fatal_without_draining() {
    let occupied = tokio::net::TcpListener::bind(loopback()).await.unwrap();
    let addr = occupied.local_addr().unwrap();
    let logs = CapturedLogs::default();

    let mut lifecycle = Lifecycle::new(CancellationToken::new());
    let status = lifecycle
        .run(addr, quick_router())
        .with_subscriber(logs.subscriber())
        .await;

    assert_eq!(status, ExitStatus::Failure);
    let fatal = logs
        .lines()
        .into_iter()
        .find(|line| line.contains("server failed to start"))
        .expect("no startup failure log");
    assert!(fatal.contains("ERROR"), "{fatal}");
    assert!(fatal.contains(&addr.to_string()), "{fatal}");
    assert!(!logs.contains("draining in-flight requests"));
    assert!(!logs.contains("shutdown signal received"));
}

#[tokio::test]
async fn test_run_fails_when_serving_task_dies() {
    let logs = CapturedLogs::default();
    let token = CancellationToken::new();
    let listener = CrashingListener {
        addr: free_port_addr(),
    };

    let mut lifecycle = Lifecycle::new(token.clone());
    let status = tokio::time::timeout(
        Duration::from_secs(5),
        lifecycle
            .run_with_listener(listener, quick_router())
            .with_subscriber(logs.subscriber()),
    )
    .await
    .expect("run did not notice the serving task exit");

    assert_eq!(status, ExitStatus::Failure);
    assert_eq!(lifecycle.state(), LifecycleState::StoppedWithError);
    assert!(!token.is_cancelled());
    assert!(logs.contains("server stopped unexpectedly"));
    assert!(!logs.contains("draining in-flight requests"));
}
