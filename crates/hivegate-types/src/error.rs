//! Top-level error type for the hivegate workspace.
//!
//! Crates with richer failure domains (LLM providers, tools, services)
//! define their own error enums and convert into [`GatewayError`] at the
//! boundary where they meet the agent loop.

use thiserror::Error;

/// Top-level error type for the gateway.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum GatewayError {
    /// An LLM provider call failed after all fallbacks were exhausted.
    #[error("provider error: {message}")]
    Provider {
        /// Provider-supplied error message.
        message: String,
    },

    /// An operation exceeded its deadline.
    #[error("operation timed out: {operation}")]
    Timeout {
        /// Human-readable name of the operation that timed out.
        operation: String,
    },

    /// Configuration is malformed or semantically invalid.
    #[error("invalid config: {reason}")]
    ConfigInvalid {
        /// What is wrong with the configuration.
        reason: String,
    },

    /// A bus publish or consume failed (closed channel, backpressure).
    #[error("bus error: {0}")]
    Bus(String),

    /// A node-protocol operation failed; carries one of the
    /// [`node::error_code`](crate::node::error_code) constants.
    #[error("node error [{code}]: {message}")]
    Node {
        /// Machine-readable error code.
        code: String,
        /// Human-readable detail.
        message: String,
    },

    /// Underlying I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization / deserialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// A session key or other identifier failed validation.
    #[error("invalid identifier: {0}")]
    InvalidIdentifier(String),
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, GatewayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_formats() {
        let err = GatewayError::Timeout {
            operation: "provider chat".into(),
        };
        assert_eq!(err.to_string(), "operation timed out: provider chat");

        let err = GatewayError::Node {
            code: "NODE_UNAVAILABLE".into(),
            message: "build-server is offline".into(),
        };
        assert_eq!(
            err.to_string(),
            "node error [NODE_UNAVAILABLE]: build-server is offline"
        );
    }

    #[test]
    fn from_io() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: GatewayError = io.into();
        assert!(matches!(err, GatewayError::Io(_)));
        assert!(err.to_string().contains("missing"));
    }

    #[test]
    fn from_json() {
        let bad = serde_json::from_str::<serde_json::Value>("{nope").unwrap_err();
        let err: GatewayError = bad.into();
        assert!(matches!(err, GatewayError::Json(_)));
    }

    #[test]
    fn result_alias() {
        fn ok() -> Result<u8> {
            Ok(7)
        }
        assert_eq!(ok().unwrap(), 7);
    }
}
