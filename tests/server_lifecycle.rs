//! HTTP transport and lifecycle-manager tests against a real listener.

use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;

use checkpoint_mcp_agent::context::AppContext;
use checkpoint_mcp_agent::error::AppError;
use checkpoint_mcp_agent::server::{check_port_available, ServerManager};
use checkpoint_mcp_agent::transport::stdio::serve_lines;
use checkpoint_mcp_agent::transport::TransportKind;

async fn free_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    listener.local_addr().expect("addr").port()
}

fn manager(ctx: Arc<AppContext>) -> ServerManager {
    ServerManager::new(ctx, TransportKind::Http, 7850)
        .with_settle_delay(Duration::from_millis(20))
}

fn test_context() -> Arc<AppContext> {
    AppContext::new(false, Duration::from_secs(5))
}

#[tokio::test]
async fn health_endpoint_reports_status_and_subscribers() {
    let manager = manager(test_context());
    let port = free_port().await;
    manager.start(port).await.expect("start");

    let client = reqwest::Client::new();
    let health: Value = client
        .get(format!("http://127.0.0.1:{port}/health"))
        .send()
        .await
        .expect("request")
        .json()
        .await
        .expect("json");
    assert_eq!(health["status"], "ok");
    assert_eq!(health["clientCount"], json!(0));
    assert!(health["version"].as_str().is_some());
    assert!(health["uptimeSeconds"].as_u64().is_some());

    manager.stop().await;
}

#[tokio::test]
async fn post_dispatches_and_parse_failures_are_400_with_parse_error() {
    let manager = manager(test_context());
    let port = free_port().await;
    manager.start(port).await.expect("start");
    let url = format!("http://127.0.0.1:{port}/");
    let client = reqwest::Client::new();

    // Valid request: 200 with matching id and three tools.
    let response = client
        .post(&url)
        .body(r#"{"jsonrpc":"2.0","id":1,"method":"tools/list"}"#)
        .send()
        .await
        .expect("post");
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.expect("json");
    assert_eq!(body["id"], json!(1));
    assert_eq!(body["result"]["tools"].as_array().map(Vec::len), Some(3));

    // Unparseable body: 400 with a -32700 envelope.
    let response = client
        .post(&url)
        .body("this is not json")
        .send()
        .await
        .expect("post");
    assert_eq!(response.status(), 400);
    let body: Value = response.json().await.expect("json");
    assert_eq!(body["error"]["code"], json!(-32700));

    // Notification: accepted, no response body.
    let response = client
        .post(&url)
        .body(r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#)
        .send()
        .await
        .expect("post");
    assert_eq!(response.status(), 202);

    manager.stop().await;
}

#[tokio::test]
async fn sse_subscribers_receive_broadcast_responses_and_count() {
    let manager = manager(test_context());
    let port = free_port().await;
    manager.start(port).await.expect("start");
    let client = reqwest::Client::new();

    let mut sse = client
        .get(format!("http://127.0.0.1:{port}/events"))
        .send()
        .await
        .expect("sse connect");

    // First frame is the endpoint event.
    let first = tokio::time::timeout(Duration::from_secs(5), sse.chunk())
        .await
        .expect("timely")
        .expect("chunk ok")
        .expect("some chunk");
    let first = String::from_utf8_lossy(&first).to_string();
    assert!(first.contains("endpoint"), "first frame: {first}");

    // Subscriber registered: clientCount is now 1.
    let health: Value = client
        .get(format!("http://127.0.0.1:{port}/health"))
        .send()
        .await
        .expect("health")
        .json()
        .await
        .expect("json");
    assert_eq!(health["clientCount"], json!(1));

    // Every POSTed response fans out to the stream.
    let _ = client
        .post(format!("http://127.0.0.1:{port}/"))
        .body(r#"{"jsonrpc":"2.0","id":5,"method":"tools/list"}"#)
        .send()
        .await
        .expect("post");

    let mut broadcast = String::new();
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !broadcast.contains("tools") {
        let chunk = tokio::time::timeout_at(deadline, sse.chunk())
            .await
            .expect("timely")
            .expect("chunk ok")
            .expect("stream still open");
        broadcast.push_str(&String::from_utf8_lossy(&chunk));
    }
    assert!(broadcast.contains("\"id\":5"), "broadcast: {broadcast}");

    drop(sse);
    manager.stop().await;
}

#[tokio::test]
async fn start_is_idempotent_and_restart_surfaces_held_port() {
    let manager = manager(test_context());
    let first = free_port().await;
    manager.start(first).await.expect("start");
    manager.start(first).await.expect("idempotent start");

    // Hold the target port so the restart's bind must fail.
    let second = free_port().await;
    let _held = TcpListener::bind(("127.0.0.1", second)).await.expect("hold");

    let err = manager.restart(second).await.expect_err("restart must fail");
    assert!(matches!(err, AppError::PortUnavailable(p) if p == second));
    let state = manager.state();
    assert!(!state.is_running);
    assert!(state.error.is_some());

    // The manager recovers on the next successful start.
    let third = free_port().await;
    manager.start(third).await.expect("recovery start");
    assert_eq!(manager.state().port, Some(third));
    manager.stop().await;
}

#[tokio::test]
async fn switch_to_stdio_frees_the_port_and_serves_lines() {
    let ctx = test_context();
    let (client_io, server_io) = tokio::io::duplex(4096);
    let server_half = Mutex::new(Some(server_io));

    let manager = ServerManager::new(ctx, TransportKind::Http, 7850)
        .with_settle_delay(Duration::from_millis(20))
        .with_stdio_launcher(move |dispatcher| {
            let io = server_half.lock().take().expect("single activation");
            let (reader, writer) = tokio::io::split(io);
            tokio::spawn(async move {
                let _ = serve_lines(dispatcher, reader, writer).await;
            })
        });

    let port = free_port().await;
    manager.start(port).await.expect("start http");
    assert!(!check_port_available(port).await);

    manager
        .switch_transport(TransportKind::Stdio, None)
        .await
        .expect("switch");
    let state = manager.state();
    assert_eq!(state.transport, TransportKind::Stdio);
    assert!(state.is_running);
    assert!(check_port_available(port).await, "port released");

    // The stdio adapter is live: a request line comes back as a response line.
    let (read_half, mut write_half) = tokio::io::split(client_io);
    write_half
        .write_all(b"{\"jsonrpc\":\"2.0\",\"id\":21,\"method\":\"ping\"}\n")
        .await
        .expect("write line");
    write_half.flush().await.expect("flush");

    let mut lines = BufReader::new(read_half).lines();
    let line = tokio::time::timeout(Duration::from_secs(5), lines.next_line())
        .await
        .expect("timely")
        .expect("read ok")
        .expect("one line");
    let response: Value = serde_json::from_str(&line).expect("valid frame");
    assert_eq!(response["id"], json!(21));

    manager.shutdown().await;
}

#[tokio::test]
async fn switch_to_http_rejects_a_held_port() {
    let manager = manager(test_context());
    let port = free_port().await;
    let _held = TcpListener::bind(("127.0.0.1", port)).await.expect("hold");

    let err = manager
        .switch_transport(TransportKind::Http, Some(port))
        .await
        .expect_err("must refuse the held port");
    assert!(matches!(err, AppError::PortUnavailable(p) if p == port));
    assert!(!manager.state().is_running);
}

#[tokio::test]
async fn switch_to_same_bound_port_is_a_noop() {
    let manager = manager(test_context());
    let port = free_port().await;
    manager.start(port).await.expect("start");
    let started_at = manager.state().started_at;

    manager
        .switch_transport(TransportKind::Http, Some(port))
        .await
        .expect("no-op switch");
    assert_eq!(manager.state().started_at, started_at, "no restart happened");
    manager.stop().await;
}
