//! Client-side connection monitor.
//!
//! Runs beside the presentation layer and supervises server liveness: one
//! `GET /health` probe every interval (plus one immediately on start), a
//! latency-derived quality score, and exponential-backoff reconnection
//! after failures. Exhausting the attempt cap parks the monitor in the
//! terminal `Error` status until [`ConnectionMonitor::force_reconnect`].

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tracing::debug;

pub const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(30);
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_RECONNECT_BASE: Duration = Duration::from_secs(1);
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Connected,
    Connecting,
    Disconnected,
    /// Backoff cap exhausted; only `force_reconnect` leaves this state.
    Error,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionState {
    pub status: ConnectionStatus,
    pub latency_ms: Option<u64>,
    pub last_ping_at: Option<DateTime<Utc>>,
    pub reconnect_attempts: u32,
    /// Deterministic step function of latency; zero when not connected.
    pub quality_score: u8,
}

impl ConnectionState {
    fn disconnected() -> Self {
        Self {
            status: ConnectionStatus::Disconnected,
            latency_ms: None,
            last_ping_at: None,
            reconnect_attempts: 0,
            quality_score: 0,
        }
    }
}

/// Probe cadence and backoff policy.
#[derive(Debug, Clone)]
pub struct MonitorSettings {
    /// Base URL of the server, e.g. `http://127.0.0.1:7850`.
    pub base_url: String,
    pub ping_interval: Duration,
    pub probe_timeout: Duration,
    pub reconnect_base: Duration,
    pub max_reconnect_attempts: u32,
}

impl MonitorSettings {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ping_interval: DEFAULT_PING_INTERVAL,
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
            reconnect_base: DEFAULT_RECONNECT_BASE,
            max_reconnect_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
        }
    }
}

struct MonitorInner {
    settings: MonitorSettings,
    client: reqwest::Client,
    state: watch::Sender<ConnectionState>,
    /// Poked by `force_reconnect` to skip whatever wait is in progress.
    wake: Notify,
}

pub struct ConnectionMonitor {
    inner: Arc<MonitorInner>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectionMonitor {
    pub fn new(settings: MonitorSettings) -> Self {
        let (state, _) = watch::channel(ConnectionState::disconnected());
        Self {
            inner: Arc::new(MonitorInner {
                settings,
                client: reqwest::Client::new(),
                state,
                wake: Notify::new(),
            }),
            task: Mutex::new(None),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.state.borrow().clone()
    }

    /// Current state now, plus every future change.
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    /// Begin probing: one probe immediately, then one per interval.
    /// Idempotent while the probe loop is alive.
    pub fn start(&self) {
        let mut task = self.task.lock();
        if task.as_ref().is_some_and(|h| !h.is_finished()) {
            return;
        }
        self.inner.state.send_modify(|s| {
            s.status = ConnectionStatus::Connecting;
            s.quality_score = 0;
        });
        let inner = self.inner.clone();
        *task = Some(tokio::spawn(run_loop(inner)));
    }

    /// Cancel the probe loop and any scheduled reconnect as a unit.
    pub fn stop(&self) {
        if let Some(handle) = self.task.lock().take() {
            handle.abort();
        }
        self.inner.state.send_modify(|s| {
            s.status = ConnectionStatus::Disconnected;
            s.latency_ms = None;
            s.quality_score = 0;
        });
    }

    /// Reset the attempt count and probe immediately, bypassing backoff.
    pub fn force_reconnect(&self) {
        self.inner.state.send_modify(|s| {
            s.reconnect_attempts = 0;
            s.status = ConnectionStatus::Connecting;
        });
        let running = self.task.lock().as_ref().is_some_and(|h| !h.is_finished());
        if running {
            self.inner.wake.notify_one();
        } else {
            self.start();
        }
    }
}

impl Drop for ConnectionMonitor {
    fn drop(&mut self) {
        if let Some(handle) = self.task.lock().take() {
            handle.abort();
        }
    }
}

async fn run_loop(inner: Arc<MonitorInner>) {
    loop {
        let healthy = probe(&inner).await;
        let delay = if healthy {
            inner.settings.ping_interval
        } else {
            let attempts = inner.state.borrow().reconnect_attempts;
            if attempts >= inner.settings.max_reconnect_attempts {
                inner.state.send_modify(|s| {
                    s.status = ConnectionStatus::Error;
                    s.quality_score = 0;
                    s.latency_ms = None;
                });
                debug!("reconnect attempts exhausted; waiting for force_reconnect");
                inner.wake.notified().await;
                continue;
            }
            let delay = backoff_delay(inner.settings.reconnect_base, attempts);
            inner.state.send_modify(|s| {
                s.status = ConnectionStatus::Connecting;
                s.reconnect_attempts = attempts + 1;
                s.quality_score = 0;
                s.latency_ms = None;
            });
            debug!(attempt = attempts + 1, delay_ms = delay.as_millis() as u64, "scheduling reconnect");
            delay
        };

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = inner.wake.notified() => {
                // force_reconnect already reset the attempt count.
            }
        }
    }
}

async fn probe(inner: &MonitorInner) -> bool {
    let url = format!("{}/health", inner.settings.base_url.trim_end_matches('/'));
    let started = Instant::now();
    let result = inner
        .client
        .get(&url)
        .timeout(inner.settings.probe_timeout)
        .send()
        .await;
    match result {
        Ok(response) if response.status().is_success() => {
            let latency_ms = started.elapsed().as_millis() as u64;
            inner.state.send_modify(|s| {
                s.status = ConnectionStatus::Connected;
                s.latency_ms = Some(latency_ms);
                s.last_ping_at = Some(Utc::now());
                s.reconnect_attempts = 0;
                s.quality_score = quality_score(latency_ms);
            });
            true
        }
        Ok(response) => {
            debug!(status = %response.status(), "health probe rejected");
            false
        }
        Err(e) => {
            debug!(error = %e, "health probe failed");
            false
        }
    }
}

/// Latency → score: 100 below 50ms, 80 below 100ms, 60 below 200ms,
/// 40 below 500ms, 20 below 1000ms, else 10.
pub fn quality_score(latency_ms: u64) -> u8 {
    match latency_ms {
        0..=49 => 100,
        50..=99 => 80,
        100..=199 => 60,
        200..=499 => 40,
        500..=999 => 20,
        _ => 10,
    }
}

/// Delay before retry number `attempts + 1`: `base * 2^attempts`.
pub fn backoff_delay(base: Duration, attempts: u32) -> Duration {
    base.saturating_mul(2u32.saturating_pow(attempts.min(16)))
}
