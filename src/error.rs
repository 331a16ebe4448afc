use std::fmt;

/// A specialized `Result` type for fallible core operations.
pub type AppResult<T> = Result<T, AppError>;

/// Unified application error type.
///
/// Protocol-level failures (bad JSON, unknown method/tool) never surface
/// here; they are converted into JSON-RPC error envelopes at the dispatch
/// layer. `AppError` covers the transport and lifecycle faults that callers
/// of `start`/`restart`/`switch_transport` need to see.
#[derive(Debug)]
pub enum AppError {
    /// The requested TCP port is already bound by another process.
    PortUnavailable(u16),
    /// A lifecycle operation needed a running server and found none.
    ServerNotRunning,
    /// The request payload was structurally invalid.
    InvalidPayload(String),
    IoError(std::io::Error),
    SerdeError(serde_json::Error),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PortUnavailable(port) => {
                write!(f, "Port {port} is unavailable (already bound by another process).")
            }
            Self::ServerNotRunning => write!(f, "Operation requires a running server."),
            Self::InvalidPayload(details) => {
                write!(f, "The request payload is invalid: {details}")
            }
            Self::IoError(e) => write!(f, "An I/O error occurred: {e}"),
            Self::SerdeError(e) => {
                write!(f, "A serialization/deserialization error occurred: {e}")
            }
        }
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::IoError(e) => Some(e),
            Self::SerdeError(e) => Some(e),
            _ => None,
        }
    }
}

// Implement `From` conversions to allow the `?` operator to work seamlessly.
impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::IoError(err)
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::SerdeError(err)
    }
}
