//! Loopback HTTP transport with SSE fan-out.
//!
//! One POST endpoint carries JSON-RPC requests; a GET endpoint upgrades to
//! a Server-Sent-Events stream that receives every response the server
//! produces, so any number of observers stay in sync. CORS is permissive:
//! the listener binds to 127.0.0.1 only and carries no credentials.

use axum::{
    extract::State,
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::get,
    Json, Router,
};
use futures::stream::{self, Stream, StreamExt};
use serde_json::{json, Value};
use std::convert::Infallible;
use std::time::Instant;
use tokio::sync::{broadcast, watch};
use tokio_stream::wrappers::{errors::BroadcastStreamRecvError, BroadcastStream};
use tower_http::cors::CorsLayer;
use tracing::{debug, warn};

use crate::dispatch::Dispatcher;
use crate::protocol::{RpcRequest, RpcResponse};
use crate::server::StateCell;

/// Frames buffered per SSE subscriber before a slow consumer starts lagging.
const BROADCAST_CAPACITY: usize = 256;

/// Shared state behind every HTTP handler.
#[derive(Clone)]
pub struct HttpContext {
    pub dispatcher: Dispatcher,
    pub broadcast: broadcast::Sender<String>,
    pub state: StateCell,
    pub started_at: Instant,
    /// Flips to `true` when the lifecycle manager wants streams closed.
    pub shutdown: watch::Receiver<bool>,
}

impl HttpContext {
    pub fn new(
        dispatcher: Dispatcher,
        state: StateCell,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let (broadcast, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            dispatcher,
            broadcast,
            state,
            started_at: Instant::now(),
            shutdown,
        }
    }
}

/// Build the router. `/`, `/sse` and `/events` all serve the same SSE
/// stream because different client runtimes hardcode different paths.
pub fn build_router(ctx: HttpContext) -> Router {
    Router::new()
        .route("/", get(sse_handler).post(rpc_handler))
        .route("/sse", get(sse_handler))
        .route("/events", get(sse_handler))
        .route("/health", get(health_handler))
        .layer(CorsLayer::permissive())
        .with_state(ctx)
}

async fn health_handler(State(ctx): State<HttpContext>) -> Json<Value> {
    let snapshot = ctx.state.snapshot();
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "uptimeSeconds": ctx.started_at.elapsed().as_secs(),
        "clientCount": snapshot.client_count,
    }))
}

/// POST: one request in, one response out, with the response also fanned
/// out to every SSE subscriber. A body that does not parse is a 400 with a
/// JSON-RPC parse-error envelope; a notification is a 202 with no body.
async fn rpc_handler(State(ctx): State<HttpContext>, body: String) -> Response {
    let request: RpcRequest = match serde_json::from_str(&body) {
        Ok(request) => request,
        Err(e) => {
            debug!(error = %e, "rejecting unparseable request body");
            return (
                StatusCode::BAD_REQUEST,
                Json(RpcResponse::parse_error(e.to_string())),
            )
                .into_response();
        }
    };

    match ctx.dispatcher.handle(request).await {
        Some(response) => {
            if let Ok(frame) = serde_json::to_string(&response) {
                // No subscribers is not an error.
                let _ = ctx.broadcast.send(frame);
            }
            (StatusCode::OK, Json(response)).into_response()
        }
        None => StatusCode::ACCEPTED.into_response(),
    }
}

/// GET: upgrade to an SSE stream. Subscribers receive one initial
/// `endpoint` event, then every broadcast response until they disconnect
/// or the server shuts down. Late joiners see nothing retroactively.
async fn sse_handler(
    State(ctx): State<HttpContext>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = ctx.broadcast.subscribe();
    let guard = SubscriberGuard::register(ctx.state.clone());

    let endpoint = stream::once(async { Ok(Event::default().event("endpoint").data("/")) });
    let responses = BroadcastStream::new(rx).filter_map(|frame| async move {
        match frame {
            Ok(frame) => Some(Ok(Event::default().event("message").data(frame))),
            Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                warn!(skipped, "sse subscriber lagged; dropping missed frames");
                None
            }
        }
    });

    let mut shutdown = ctx.shutdown.clone();
    let stream = endpoint
        .chain(responses)
        .take_until(async move {
            let _ = shutdown.wait_for(|stop| *stop).await;
        })
        .map(move |event| {
            // Keeps the guard alive for the lifetime of the stream; its Drop
            // deregisters the subscriber.
            let _guard = &guard;
            event
        });

    Sse::new(stream).keep_alive(KeepAlive::default())
}

/// Mirrors the live subscriber set into `ServerState.client_count`.
struct SubscriberGuard {
    state: StateCell,
}

impl SubscriberGuard {
    fn register(state: StateCell) -> Self {
        state.update(|s| s.client_count += 1);
        Self { state }
    }
}

impl Drop for SubscriberGuard {
    fn drop(&mut self) {
        self.state
            .update(|s| s.client_count = s.client_count.saturating_sub(1));
    }
}
