use std::time::Duration;

use thiserror::Error;

/// Failure reported by a protocol engine for a single lifecycle step or
/// elementary word operation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("{0}")]
    Message(String),

    #[error("engine dropped the request without replying")]
    NoReply,

    #[error("engine is not connected")]
    NotConnected,
}

impl EngineError {
    pub fn msg(m: impl Into<String>) -> Self {
        Self::Message(m.into())
    }
}

#[derive(Error, Debug)]
pub enum ClientError {
    /// The connect attempt, or the wait for another caller's attempt, ran out of time.
    #[error("connection timeout for {endpoint} after {timeout:?}")]
    ConnectionTimeout { endpoint: String, timeout: Duration },

    #[error("connection error for {endpoint}: {message}")]
    ConnectionError { endpoint: String, message: String },

    #[error("read timeout for tag {tag} after {timeout:?}")]
    ReadTimeout { tag: String, timeout: Duration },

    #[error("write timeout for tag {tag} after {timeout:?}")]
    WriteTimeout { tag: String, timeout: Duration },

    #[error("invalid address format: {0}")]
    InvalidAddress(String),

    /// An elementary word operation failed inside an array or string expansion.
    #[error("error on element {index} ({address}): {message}")]
    ElementaryOperation {
        index: usize,
        address: String,
        message: String,
    },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("encoding error: {0}")]
    Encoding(String),

    #[error("config error: {0}")]
    Config(String),
}

impl ClientError {
    /// True for failures that leave the connection itself in doubt.
    #[must_use]
    pub const fn is_connection_failure(&self) -> bool {
        matches!(
            self,
            Self::ConnectionTimeout { .. } | Self::ConnectionError { .. }
        )
    }

    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(
            self,
            Self::ConnectionTimeout { .. } | Self::ReadTimeout { .. } | Self::WriteTimeout { .. }
        )
    }
}

pub type Result<T, E = ClientError> = std::result::Result<T, E>;
