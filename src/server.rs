//! Server lifecycle management.
//!
//! All transport mutations funnel through [`ServerManager`] so observers of
//! [`ServerState`] see one consistent, race-free sequence of states.
//! Concurrent `start`/`stop`/`restart`/`switch_transport` calls serialize
//! behind a single async lock rather than interleaving.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::context::AppContext;
use crate::dispatch::Dispatcher;
use crate::error::{AppError, AppResult};
use crate::transport::http::{build_router, HttpContext};
use crate::transport::stdio::run_stdio_transport;
use crate::transport::TransportKind;

/// How long `stop` waits for in-flight connections before aborting them.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Default pause between `stop` and `start` during a restart, giving the OS
/// time to release the listening port.
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_millis(200);

/// Snapshot of the server's externally observable state.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerState {
    pub is_running: bool,
    pub transport: TransportKind,
    pub port: Option<u16>,
    pub started_at: Option<DateTime<Utc>>,
    /// Mirrors the live SSE subscriber set size.
    pub client_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ServerState {
    pub fn stopped(transport: TransportKind) -> Self {
        Self {
            is_running: false,
            transport,
            port: None,
            started_at: None,
            client_count: 0,
            error: None,
        }
    }
}

/// Single-writer cell for [`ServerState`], observable as current + future
/// values by any number of subscribers.
#[derive(Clone)]
pub struct StateCell {
    tx: Arc<watch::Sender<ServerState>>,
}

impl StateCell {
    pub fn new(initial: ServerState) -> Self {
        let (tx, _) = watch::channel(initial);
        Self { tx: Arc::new(tx) }
    }

    pub fn update(&self, f: impl FnOnce(&mut ServerState)) {
        self.tx.send_modify(f);
    }

    pub fn snapshot(&self) -> ServerState {
        self.tx.borrow().clone()
    }

    /// The receiver observes the current value immediately, then every
    /// subsequent change.
    pub fn subscribe(&self) -> watch::Receiver<ServerState> {
        self.tx.subscribe()
    }
}

#[derive(Default)]
struct Lifecycle {
    shutdown: Option<watch::Sender<bool>>,
    http_handle: Option<JoinHandle<()>>,
    stdio_handle: Option<JoinHandle<()>>,
}

/// Spawns the stdio pump when the stdio transport is activated. Injectable
/// so tests can drive the adapter over in-memory pipes instead of the real
/// terminal (reading the terminal from a test would wedge runtime shutdown).
type StdioLauncher = Box<dyn Fn(Dispatcher) -> JoinHandle<()> + Send + Sync>;

/// Owns the HTTP listener's bind/unbind lifecycle, port probing, transport
/// hot-switching, and restart.
pub struct ServerManager {
    ctx: Arc<AppContext>,
    state: StateCell,
    lifecycle: Mutex<Lifecycle>,
    settle_delay: Duration,
    default_port: u16,
    stdio_launcher: Option<StdioLauncher>,
}

impl ServerManager {
    pub fn new(ctx: Arc<AppContext>, initial_transport: TransportKind, default_port: u16) -> Self {
        Self {
            ctx,
            state: StateCell::new(ServerState::stopped(initial_transport)),
            lifecycle: Mutex::new(Lifecycle::default()),
            settle_delay: DEFAULT_SETTLE_DELAY,
            default_port,
            stdio_launcher: None,
        }
    }

    pub fn with_settle_delay(mut self, settle_delay: Duration) -> Self {
        self.settle_delay = settle_delay;
        self
    }

    /// Wire a custom stdio pump (tests use in-memory pipes).
    pub fn with_stdio_launcher(
        mut self,
        launcher: impl Fn(Dispatcher) -> JoinHandle<()> + Send + Sync + 'static,
    ) -> Self {
        self.stdio_launcher = Some(Box::new(launcher));
        self
    }

    /// Wire the default pump over the process's real stdin/stdout.
    pub fn with_process_stdio(self) -> Self {
        self.with_stdio_launcher(|dispatcher| {
            tokio::spawn(async move {
                if let Err(e) = run_stdio_transport(dispatcher).await {
                    error!(error = %e, "stdio transport terminated abnormally");
                }
            })
        })
    }

    pub fn state(&self) -> ServerState {
        self.state.snapshot()
    }

    /// Current state now, plus every future state change.
    pub fn subscribe(&self) -> watch::Receiver<ServerState> {
        self.state.subscribe()
    }

    /// Bind the HTTP listener on the loopback interface.
    ///
    /// Calling `start` while already running is a no-op success.
    pub async fn start(&self, port: u16) -> AppResult<()> {
        let mut life = self.lifecycle.lock().await;
        self.start_locked(&mut life, port).await
    }

    async fn start_locked(&self, life: &mut Lifecycle, port: u16) -> AppResult<()> {
        if life.http_handle.as_ref().is_some_and(|h| !h.is_finished()) {
            return Ok(());
        }

        let addr = SocketAddr::from(([127, 0, 0, 1], port));
        let listener = match TcpListener::bind(addr).await {
            Ok(listener) => listener,
            Err(e) => {
                self.state.update(|s| s.error = Some(e.to_string()));
                return Err(if e.kind() == std::io::ErrorKind::AddrInUse {
                    AppError::PortUnavailable(port)
                } else {
                    AppError::IoError(e)
                });
            }
        };

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let http_ctx = HttpContext::new(
            Dispatcher::new(self.ctx.clone()),
            self.state.clone(),
            shutdown_rx.clone(),
        );
        let app = build_router(http_ctx);

        let mut serve_shutdown = shutdown_rx;
        let handle = tokio::spawn(async move {
            let shutdown = async move {
                let _ = serve_shutdown.wait_for(|stop| *stop).await;
            };
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(shutdown)
                .await
            {
                error!(error = %e, "http server terminated abnormally");
            }
        });

        life.shutdown = Some(shutdown_tx);
        life.http_handle = Some(handle);
        self.state.update(|s| {
            s.is_running = true;
            s.transport = TransportKind::Http;
            s.port = Some(port);
            s.started_at = Some(Utc::now());
            s.client_count = 0;
            s.error = None;
        });
        info!(port, "http transport listening on 127.0.0.1");
        Ok(())
    }

    /// Close every live SSE connection, then the listener, then clear state.
    pub async fn stop(&self) {
        let mut life = self.lifecycle.lock().await;
        self.stop_locked(&mut life).await;
    }

    async fn stop_locked(&self, life: &mut Lifecycle) {
        if let Some(tx) = life.shutdown.take() {
            // SSE streams watch this signal and end themselves, which lets
            // the graceful shutdown below complete.
            let _ = tx.send(true);
        }
        if let Some(mut handle) = life.http_handle.take() {
            if tokio::time::timeout(SHUTDOWN_GRACE, &mut handle).await.is_err() {
                warn!("graceful shutdown timed out; aborting http task");
                handle.abort();
                let _ = handle.await;
            }
            info!("http transport stopped");
        }
        self.state.update(|s| {
            s.is_running = false;
            s.port = None;
            s.started_at = None;
            s.client_count = 0;
        });
    }

    /// Full teardown at host exit: stop the HTTP listener and abort any
    /// stdio pump. Unlike `stop`, this also deactivates the stdio adapter.
    pub async fn shutdown(&self) {
        let mut life = self.lifecycle.lock().await;
        self.stop_locked(&mut life).await;
        if let Some(handle) = life.stdio_handle.take() {
            handle.abort();
        }
    }

    /// Stop, wait for the OS to release the port, start on `new_port`.
    ///
    /// A failure of the new `start` is returned to the caller; the error is
    /// also recorded in `ServerState.error` so observers can see the
    /// manager did not silently stay down.
    pub async fn restart(&self, new_port: u16) -> AppResult<()> {
        let mut life = self.lifecycle.lock().await;
        self.stop_locked(&mut life).await;
        tokio::time::sleep(self.settle_delay).await;
        self.start_locked(&mut life, new_port).await
    }

    /// Switch the active transport, optionally moving to a new port.
    pub async fn switch_transport(
        &self,
        kind: TransportKind,
        port: Option<u16>,
    ) -> AppResult<()> {
        match kind {
            TransportKind::Stdio => {
                let mut life = self.lifecycle.lock().await;
                self.stop_locked(&mut life).await;
                if life.stdio_handle.as_ref().map_or(true, |h| h.is_finished()) {
                    if let Some(launcher) = &self.stdio_launcher {
                        life.stdio_handle =
                            Some(launcher(Dispatcher::new(self.ctx.clone())));
                    } else {
                        warn!("no stdio launcher wired; transport marked active only");
                    }
                }
                self.state.update(|s| {
                    s.transport = TransportKind::Stdio;
                    s.is_running = true;
                    s.port = None;
                    s.started_at = Some(Utc::now());
                    s.error = None;
                });
                info!("switched to stdio transport");
                Ok(())
            }
            TransportKind::Http | TransportKind::Auto => {
                let mut life = self.lifecycle.lock().await;
                if let Some(handle) = life.stdio_handle.take() {
                    handle.abort();
                }

                let current = self.state.snapshot();
                let port = port.or(current.port).unwrap_or(self.default_port);
                let already_bound =
                    current.is_running && current.transport == TransportKind::Http
                        && current.port == Some(port);
                if already_bound {
                    return Ok(());
                }

                if !check_port_available(port).await {
                    self.state
                        .update(|s| s.error = Some(format!("port {port} unavailable")));
                    return Err(AppError::PortUnavailable(port));
                }

                if current.is_running {
                    self.stop_locked(&mut life).await;
                    tokio::time::sleep(self.settle_delay).await;
                }
                self.start_locked(&mut life, port).await
            }
        }
    }

    pub async fn check_port_available(&self, port: u16) -> bool {
        check_port_available(port).await
    }

    pub async fn find_available_port(&self, candidates: &[u16]) -> Option<u16> {
        find_available_port(candidates).await
    }
}

/// Probe availability by binding then immediately dropping a listener.
/// A failed client connect proves nothing (firewalls produce the same
/// symptom), so this is the only probe we trust.
pub async fn check_port_available(port: u16) -> bool {
    TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], port)))
        .await
        .is_ok()
}

/// First candidate that currently accepts a bind, if any.
pub async fn find_available_port(candidates: &[u16]) -> Option<u16> {
    for &port in candidates {
        if check_port_available(port).await {
            return Some(port);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::DEFAULT_SESSION_TIMEOUT;

    fn manager() -> ServerManager {
        let ctx = AppContext::new(false, DEFAULT_SESSION_TIMEOUT);
        ServerManager::new(ctx, TransportKind::Http, 7850)
            .with_settle_delay(Duration::from_millis(10))
    }

    async fn free_port() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        listener.local_addr().expect("addr").port()
    }

    #[tokio::test]
    async fn start_is_idempotent_and_stop_clears_state() {
        let manager = manager();
        let port = free_port().await;

        manager.start(port).await.expect("first start");
        manager.start(port).await.expect("second start is a no-op");
        let state = manager.state();
        assert!(state.is_running);
        assert_eq!(state.port, Some(port));
        assert!(state.started_at.is_some());

        manager.stop().await;
        let state = manager.state();
        assert!(!state.is_running);
        assert_eq!(state.port, None);
        assert_eq!(state.client_count, 0);
    }

    #[tokio::test]
    async fn port_probe_reflects_actual_bind_state() {
        let port = free_port().await;
        assert!(check_port_available(port).await);

        let held = TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], port)))
            .await
            .expect("bind");
        assert!(!check_port_available(port).await);
        drop(held);
    }

    #[tokio::test]
    async fn find_available_port_skips_bound_candidates() {
        let bound = free_port().await;
        let held = TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], bound)))
            .await
            .expect("bind");
        let open = free_port().await;

        let picked = find_available_port(&[bound, open]).await;
        assert_eq!(picked, Some(open));
        drop(held);
    }

    #[tokio::test]
    async fn start_on_held_port_errors_and_leaves_manager_stopped() {
        let manager = manager();
        let port = free_port().await;
        let _held = TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], port)))
            .await
            .expect("bind");

        let err = manager.start(port).await.expect_err("bind must fail");
        assert!(matches!(err, AppError::PortUnavailable(p) if p == port));
        let state = manager.state();
        assert!(!state.is_running);
        assert!(state.error.is_some());
    }

    #[tokio::test]
    async fn restart_moves_to_the_new_port() {
        let manager = manager();
        let first = free_port().await;
        let second = free_port().await;

        manager.start(first).await.expect("start");
        manager.restart(second).await.expect("restart");

        let state = manager.state();
        assert!(state.is_running);
        assert_eq!(state.port, Some(second));
        // The old port is free again once the settle delay has passed.
        assert!(check_port_available(first).await);
        manager.stop().await;
    }

    #[tokio::test]
    async fn switch_to_stdio_stops_the_http_listener() {
        let manager = manager();
        let port = free_port().await;
        manager.start(port).await.expect("start");

        manager
            .switch_transport(TransportKind::Stdio, None)
            .await
            .expect("switch");
        let state = manager.state();
        assert_eq!(state.transport, TransportKind::Stdio);
        assert_eq!(state.port, None);
        assert!(check_port_available(port).await);
        manager.stop().await;
    }
}
