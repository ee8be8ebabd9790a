//! Error types for the peer engine.
//!
//! `PeerError` covers local faults (transport, framing, identifier pool,
//! callback binding). `ErrorCode` is the JSON-RPC 2.0 code vocabulary used on
//! the wire when a request cannot be served.

use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

/// Main error type for the peer engine.
#[derive(Debug, Error)]
pub enum PeerError {
    // Transport errors
    #[error("IO error: {message}")]
    Io {
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("Failed to connect to {addr}: {message}")]
    ConnectFailed {
        addr: SocketAddr,
        message: String,
    },

    #[error("Peer is disconnected")]
    Disconnected,

    #[error("Message size {size} exceeds maximum {max}")]
    MessageTooLarge { size: usize, max: usize },

    // Serialization errors
    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    // Outbound call outcomes that carry no result
    #[error("Request timeout after {0:?}")]
    Timeout(Duration),

    #[error("No request identifier available (capacity {capacity})")]
    PoolExhausted { capacity: usize },

    // Binding errors
    #[error("Invalid callback: {reason}")]
    InvalidCallback { reason: String },
}

/// Result type alias using `PeerError`.
pub type Result<T> = std::result::Result<T, PeerError>;

impl From<std::io::Error> for PeerError {
    fn from(err: std::io::Error) -> Self {
        PeerError::Io {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for PeerError {
    fn from(err: serde_json::Error) -> Self {
        PeerError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl PeerError {
    /// Create an invalid-callback error.
    pub fn invalid_callback(reason: impl Into<String>) -> Self {
        PeerError::InvalidCallback {
            reason: reason.into(),
        }
    }

    /// Convert to a JSON-RPC error code.
    ///
    /// Standard JSON-RPC error codes:
    /// - -32700: Parse error
    /// - -32600: Invalid Request
    /// - -32602: Invalid params
    /// - -32099: Server error (catch-all for local faults)
    pub fn to_rpc_error_code(&self) -> i32 {
        match self {
            PeerError::Json { .. } | PeerError::MessageTooLarge { .. } => {
                ErrorCode::ParseError.code()
            }
            PeerError::InvalidCallback { .. } => ErrorCode::InvalidParams.code(),
            _ => ErrorCode::ServerError.code(),
        }
    }

    /// True for the outcomes a synchronous caller sees when no result exists.
    pub fn is_no_result(&self) -> bool {
        matches!(
            self,
            PeerError::Timeout(_) | PeerError::PoolExhausted { .. }
        )
    }
}

/// JSON-RPC 2.0 error codes understood by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    ParseError,
    InvalidRequest,
    MethodNotFound,
    InvalidParams,
    ServerError,
}

impl ErrorCode {
    pub const fn code(self) -> i32 {
        match self {
            ErrorCode::ParseError => -32700,
            ErrorCode::InvalidRequest => -32600,
            ErrorCode::MethodNotFound => -32601,
            ErrorCode::InvalidParams => -32602,
            ErrorCode::ServerError => -32099,
        }
    }

    /// Canonical message sent alongside the code.
    pub const fn message(self) -> &'static str {
        match self {
            ErrorCode::ParseError => "Parse Error",
            ErrorCode::InvalidRequest => "Invalid Request",
            ErrorCode::MethodNotFound => "Method Not Found",
            ErrorCode::InvalidParams => "Invalid params",
            ErrorCode::ServerError => "Server Error",
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            -32700 => Some(ErrorCode::ParseError),
            -32600 => Some(ErrorCode::InvalidRequest),
            -32601 => Some(ErrorCode::MethodNotFound),
            -32602 => Some(ErrorCode::InvalidParams),
            -32099 => Some(ErrorCode::ServerError),
            _ => None,
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.message(), self.code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = PeerError::PoolExhausted { capacity: 100 };
        assert_eq!(
            err.to_string(),
            "No request identifier available (capacity 100)"
        );
    }

    #[test]
    fn test_error_codes_are_reserved_range() {
        for code in [
            ErrorCode::ParseError,
            ErrorCode::InvalidRequest,
            ErrorCode::MethodNotFound,
            ErrorCode::InvalidParams,
            ErrorCode::ServerError,
        ] {
            assert!((-32768..=-32000).contains(&code.code()));
            assert_eq!(ErrorCode::from_code(code.code()), Some(code));
        }
        assert_eq!(ErrorCode::from_code(-1), None);
    }

    #[test]
    fn test_rpc_error_codes() {
        assert_eq!(
            PeerError::MessageTooLarge { size: 10, max: 5 }.to_rpc_error_code(),
            -32700
        );
        assert_eq!(PeerError::Disconnected.to_rpc_error_code(), -32099);
        assert_eq!(
            PeerError::invalid_callback("bad").to_rpc_error_code(),
            -32602
        );
    }

    #[test]
    fn test_no_result_errors() {
        assert!(PeerError::Timeout(Duration::from_secs(3)).is_no_result());
        assert!(PeerError::PoolExhausted { capacity: 1 }.is_no_result());
        assert!(!PeerError::Disconnected.is_no_result());
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe");
        let err: PeerError = io.into();
        assert!(matches!(err, PeerError::Io { source: Some(_), .. }));
    }
}
