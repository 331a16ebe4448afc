//! Transport adapters carrying JSON-RPC frames.
//!
//! Two independent channels: newline-delimited stdio, and HTTP with an SSE
//! fan-out. Both feed the same [`crate::dispatch::Dispatcher`].

pub mod http;
pub mod stdio;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Which channel the server is (or should be) speaking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Newline-delimited JSON over stdin/stdout.
    Stdio,
    /// Loopback HTTP with SSE broadcast.
    Http,
    /// Prefer HTTP when a port is available, otherwise stdio.
    Auto,
}

impl Default for TransportKind {
    fn default() -> Self {
        Self::Stdio
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stdio => write!(f, "stdio"),
            Self::Http => write!(f, "http"),
            Self::Auto => write!(f, "auto"),
        }
    }
}

impl FromStr for TransportKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "stdio" => Ok(Self::Stdio),
            "http" => Ok(Self::Http),
            "auto" => Ok(Self::Auto),
            other => Err(format!("unknown transport: {other}")),
        }
    }
}
