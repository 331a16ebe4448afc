//! Newline-delimited stdio transport.
//!
//! One JSON-RPC frame per line on stdin, one response frame per line on
//! stdout. Diagnostics go exclusively to stderr (via `tracing`) so the
//! protocol stream stays parseable. Each request is handled on its own
//! task: a checkpoint call blocked on a human answer must not stall the
//! read loop, and responses are matched by `id`, not arrival order.

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use crate::dispatch::Dispatcher;
use crate::protocol::{RpcRequest, RpcResponse};

/// Run the stdio adapter over the process's real stdin/stdout until EOF.
pub async fn run_stdio_transport(dispatcher: Dispatcher) -> std::io::Result<()> {
    serve_lines(dispatcher, tokio::io::stdin(), tokio::io::stdout()).await
}

/// Serve newline-delimited JSON-RPC over any byte pair. Split out from
/// [`run_stdio_transport`] so tests and hosts can drive the adapter over
/// in-memory pipes instead of the real terminal.
///
/// Malformed lines are logged and skipped; they never crash the process or
/// stall subsequent lines.
pub async fn serve_lines<R, W>(dispatcher: Dispatcher, reader: R, writer: W) -> std::io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::unbounded_channel::<RpcResponse>();
    let writer_task = tokio::spawn(write_responses(rx, writer));

    let mut lines = BufReader::new(reader).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let request: RpcRequest = match serde_json::from_str(line) {
            Ok(request) => request,
            Err(e) => {
                warn!(error = %e, "skipping malformed stdio line");
                continue;
            }
        };

        let dispatcher = dispatcher.clone();
        let tx = tx.clone();
        tokio::spawn(async move {
            if let Some(response) = dispatcher.handle(request).await {
                // The writer only disappears at shutdown; drop the frame then.
                let _ = tx.send(response);
            }
        });
    }

    debug!("input closed; stdio transport shutting down");
    drop(tx);
    let _ = writer_task.await;
    Ok(())
}

async fn write_responses<W>(mut rx: mpsc::UnboundedReceiver<RpcResponse>, mut writer: W)
where
    W: AsyncWrite + Unpin,
{
    while let Some(response) = rx.recv().await {
        let frame = match serde_json::to_string(&response) {
            Ok(frame) => frame,
            Err(e) => {
                error!(error = %e, "failed to encode response frame");
                continue;
            }
        };
        if writer.write_all(frame.as_bytes()).await.is_err()
            || writer.write_all(b"\n").await.is_err()
            || writer.flush().await.is_err()
        {
            error!("output closed; stopping stdio writer");
            break;
        }
    }
}
