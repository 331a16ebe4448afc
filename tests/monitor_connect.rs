//! Connection monitor against a live loopback server.

use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

use checkpoint_mcp_agent::context::AppContext;
use checkpoint_mcp_agent::monitor::{ConnectionMonitor, ConnectionStatus, MonitorSettings};
use checkpoint_mcp_agent::server::ServerManager;
use checkpoint_mcp_agent::transport::TransportKind;

async fn free_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    listener.local_addr().expect("addr").port()
}

fn fast_settings(port: u16) -> MonitorSettings {
    let mut settings = MonitorSettings::new(format!("http://127.0.0.1:{port}"));
    settings.ping_interval = Duration::from_millis(50);
    settings.reconnect_base = Duration::from_millis(10);
    settings.probe_timeout = Duration::from_secs(2);
    settings.max_reconnect_attempts = 3;
    settings
}

#[tokio::test]
async fn monitor_connects_and_scores_latency() {
    let ctx: Arc<AppContext> = AppContext::new(false, Duration::from_secs(5));
    let manager = ServerManager::new(ctx, TransportKind::Http, 7850);
    let port = free_port().await;
    manager.start(port).await.expect("start");

    let monitor = ConnectionMonitor::new(fast_settings(port));
    let mut rx = monitor.subscribe();
    monitor.start();

    let state = tokio::time::timeout(Duration::from_secs(5), async {
        rx.wait_for(|s| s.status == ConnectionStatus::Connected)
            .await
            .map(|s| s.clone())
    })
    .await
    .expect("connected in time")
    .expect("sender alive");

    assert!(state.latency_ms.is_some());
    assert!(state.quality_score > 0);
    assert_eq!(state.reconnect_attempts, 0);
    assert!(state.last_ping_at.is_some());

    monitor.stop();
    assert_eq!(monitor.state().status, ConnectionStatus::Disconnected);
    assert_eq!(monitor.state().quality_score, 0);
    manager.stop().await;
}

#[tokio::test]
async fn monitor_recovers_when_the_server_comes_back() {
    let ctx: Arc<AppContext> = AppContext::new(false, Duration::from_secs(5));
    let manager = ServerManager::new(ctx, TransportKind::Http, 7850)
        .with_settle_delay(Duration::from_millis(10));
    let port = free_port().await;

    // Server is down: the monitor exhausts its retries and parks in Error.
    let monitor = ConnectionMonitor::new(fast_settings(port));
    let mut rx = monitor.subscribe();
    monitor.start();
    tokio::time::timeout(Duration::from_secs(5), async {
        rx.wait_for(|s| s.status == ConnectionStatus::Error).await
    })
    .await
    .expect("error state in time")
    .expect("sender alive");

    // Bring the server up; only an explicit force_reconnect leaves Error.
    manager.start(port).await.expect("start");
    monitor.force_reconnect();

    let state = tokio::time::timeout(Duration::from_secs(5), async {
        rx.wait_for(|s| s.status == ConnectionStatus::Connected)
            .await
            .map(|s| s.clone())
    })
    .await
    .expect("reconnected in time")
    .expect("sender alive");
    assert_eq!(state.reconnect_attempts, 0);

    monitor.stop();
    manager.stop().await;
}
