//! Protocol dispatcher: routes parsed JSON-RPC frames to handlers.
//!
//! Transport adapters hand every inbound frame to [`Dispatcher::handle`];
//! whatever comes back (if anything) goes out on the same channel. All
//! failures become well-formed JSON-RPC envelopes; nothing here panics or
//! tears down a transport.

use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::{debug, trace};

use crate::context::{AppContext, FillOutcome, OptimizeOutcome};
use crate::protocol::{
    RpcRequest, RpcResponse, INTERNAL_ERROR, INVALID_PARAMS, MCP_PROTOCOL_VERSION,
    METHOD_NOT_FOUND,
};
use crate::registry::CanonicalTool;

/// Maximum recursion while unwrapping string-encoded argument payloads.
const MAX_NORMALIZE_DEPTH: usize = 8;

/// Stateless request router over a shared [`AppContext`].
#[derive(Clone)]
pub struct Dispatcher {
    ctx: Arc<AppContext>,
}

impl Dispatcher {
    pub fn new(ctx: Arc<AppContext>) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &Arc<AppContext> {
        &self.ctx
    }

    /// Handle one frame. Returns `None` for notifications, which by
    /// contract never receive a response.
    pub async fn handle(&self, request: RpcRequest) -> Option<RpcResponse> {
        if request.is_notification() {
            trace!(method = %request.method, "dropping notification");
            return None;
        }
        // is_notification() returned false, so an id is present.
        let id = request.id.clone().unwrap_or(Value::Null);

        let response = match request.method.as_str() {
            "initialize" => RpcResponse::success(id, self.initialize_result()),
            "ping" => RpcResponse::success(id, json!({})),
            "tools/list" => {
                RpcResponse::success(id, json!({ "tools": self.ctx.registry.list_tools() }))
            }
            "tools/call" => match self.handle_tool_call(request.params.as_ref()).await {
                Ok(result) => RpcResponse::success(id, result),
                Err((code, message)) => RpcResponse::failure(id, code, message),
            },
            other => {
                debug!(method = %other, "method not found");
                RpcResponse::failure(id, METHOD_NOT_FOUND, format!("Method not found: {other}"))
            }
        };
        Some(response)
    }

    fn initialize_result(&self) -> Value {
        json!({
            "protocolVersion": MCP_PROTOCOL_VERSION,
            "capabilities": { "tools": { "listChanged": true } },
            "serverInfo": {
                "name": env!("CARGO_PKG_NAME"),
                "version": env!("CARGO_PKG_VERSION"),
            }
        })
    }

    /// `tools/call`. Unknown tools are reported *inside* the tool result
    /// (`isError: true`), not as protocol errors; only a missing tool name
    /// is a protocol-level invalid-params failure.
    async fn handle_tool_call(&self, params: Option<&Value>) -> Result<Value, (i64, String)> {
        let params = params.unwrap_or(&Value::Null);
        let name = params
            .get("name")
            .and_then(Value::as_str)
            .ok_or((INVALID_PARAMS, "tools/call requires params.name".to_string()))?;
        let args = normalize_arguments(params.get("arguments"));

        let Some(tool) = self.ctx.registry.resolve_canonical(name) else {
            return Ok(tool_error(format!("Unknown tool: {name}")));
        };

        match tool {
            CanonicalTool::Checkpoint => self.call_checkpoint(&args).await,
            CanonicalTool::OptimizePrompt => Ok(self.call_optimize(&args).await),
            CanonicalTool::FillInput => Ok(self.call_fill(&args).await),
        }
    }

    async fn call_checkpoint(&self, args: &Map<String, Value>) -> Result<Value, (i64, String)> {
        let summary = string_arg(args, &["summary", "content", "value"])
            .unwrap_or_else(|| "Task update".to_string());
        let reason = string_arg(args, &["reason"]).unwrap_or_default();

        let outcome = self.ctx.sessions.open_session(&summary, &reason).await;
        let text = serde_json::to_string(&outcome)
            .map_err(|e| (INTERNAL_ERROR, format!("failed to encode outcome: {e}")))?;
        Ok(text_result(text))
    }

    async fn call_optimize(&self, args: &Map<String, Value>) -> Value {
        let outcome = match string_arg(args, &["prompt", "text", "content", "value"]) {
            None => OptimizeOutcome {
                success: false,
                optimized_prompt: None,
                error: Some("missing 'prompt' argument".to_string()),
            },
            Some(text) => match self.ctx.optimizer() {
                Some(optimizer) => optimizer.optimize(&text).await,
                None => OptimizeOutcome::not_configured(),
            },
        };
        outcome_result(&outcome)
    }

    async fn call_fill(&self, args: &Map<String, Value>) -> Value {
        let outcome = match string_arg(args, &["content", "text", "value"]) {
            None => FillOutcome {
                success: false,
                error: Some("missing 'content' argument".to_string()),
            },
            Some(content) => match self.ctx.filler() {
                Some(filler) => filler.fill(&content).await,
                None => FillOutcome::not_configured(),
            },
        };
        outcome_result(&outcome)
    }
}

/// MCP tool result carrying one text block.
fn text_result(text: impl Into<String>) -> Value {
    json!({ "content": [{ "type": "text", "text": text.into() }] })
}

/// Tool-scoped failure: still a successful JSON-RPC response.
fn tool_error(message: impl Into<String>) -> Value {
    json!({
        "content": [{ "type": "text", "text": message.into() }],
        "isError": true
    })
}

fn outcome_result<T: serde::Serialize>(outcome: &T) -> Value {
    match serde_json::to_string(outcome) {
        Ok(text) => text_result(text),
        Err(e) => tool_error(format!("failed to encode outcome: {e}")),
    }
}

/// First present string among the candidate keys.
fn string_arg(args: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter()
        .find_map(|k| args.get(*k).and_then(Value::as_str))
        .map(str::to_string)
}

/// Normalize the many shapes clients send tool arguments in.
///
/// Precedence: a map is used as-is (with any nested `input`/`arguments`
/// sub-map merged over the top level, sub-map winning); a string is parsed
/// as JSON and normalized recursively, degrading to `{content: s}` when it
/// does not parse; any other scalar wraps as `{value: v}`; null and absence
/// yield an empty map. Idempotent, and never fails.
pub fn normalize_arguments(raw: Option<&Value>) -> Map<String, Value> {
    match raw {
        None => Map::new(),
        Some(value) => normalize_value(value, 0),
    }
}

fn normalize_value(value: &Value, depth: usize) -> Map<String, Value> {
    if depth > MAX_NORMALIZE_DEPTH {
        // Pathologically nested payload; refuse to loop forever.
        return Map::new();
    }
    match value {
        Value::Object(map) => {
            let mut out = map.clone();
            for key in ["input", "arguments"] {
                if let Some(Value::Object(inner)) = out.remove(key) {
                    // Normalizing the sub-map before merging keeps the whole
                    // operation idempotent even when wrappers nest.
                    for (k, v) in normalize_value(&Value::Object(inner), depth + 1) {
                        out.insert(k, v);
                    }
                }
            }
            out
        }
        Value::String(s) => match serde_json::from_str::<Value>(s) {
            Ok(parsed) if !parsed.is_string() => normalize_value(&parsed, depth + 1),
            _ => {
                let mut out = Map::new();
                out.insert("content".to_string(), Value::String(s.clone()));
                out
            }
        },
        Value::Null => Map::new(),
        other => {
            let mut out = Map::new();
            out.insert("value".to_string(), other.clone());
            out
        }
    }
}
