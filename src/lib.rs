//! Checkpoint MCP Agent Library
//!
//! This library provides the core functionality of the checkpoint MCP
//! server: an embedded JSON-RPC tool server that lets a coding agent pause
//! after a turn, ask a human "should I keep going?", and resume with
//! optional new instructions, over stdio or loopback HTTP+SSE.
//!
//! # Modules
//!
//! - `config`: Configuration management with TOML support
//! - `context`: Shared application context and collaborator traits
//! - `dispatch`: JSON-RPC request routing and argument normalization
//! - `error`: Unified error handling
//! - `monitor`: Client-side connection health monitor
//! - `protocol`: JSON-RPC 2.0 wire types
//! - `registry`: Tool registry with optional name rotation
//! - `server`: HTTP listener lifecycle and transport switching
//! - `session`: Checkpoint session coordination
//! - `transport`: stdio and HTTP+SSE transport adapters

pub mod config;
pub mod context;
pub mod dispatch;
pub mod error;
pub mod monitor;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod session;
pub mod transport;

// Re-export commonly used types for convenience
pub use config::{Config, ConfigError, ConfigLoader, ConfigResult};
pub use context::{AppContext, FillOutcome, InputFiller, OptimizeOutcome, PromptOptimizer};
pub use dispatch::{normalize_arguments, Dispatcher};
pub use error::{AppError, AppResult};
pub use monitor::{ConnectionMonitor, ConnectionState, ConnectionStatus, MonitorSettings};
pub use protocol::{RpcError, RpcRequest, RpcResponse};
pub use registry::{CanonicalTool, ToolDescriptor, ToolRegistry};
pub use server::{ServerManager, ServerState};
pub use session::{CheckpointOutcome, Presenter, SessionCoordinator, SessionInfo};
pub use transport::TransportKind;
