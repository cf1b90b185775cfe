//! Error types for MerkleKV cluster client operations
//!
//! Three layers of errors live here:
//! - [`TransportError`]: the status set reported by a node's RPC transport
//! - [`KeyError`]: failures of the key codec layer
//! - [`Error`]: what callers of the node and cluster clients observe
//!
//! Only [`Error::Operation`] is a node-health signal and only it is retried by
//! the cluster client. Not-found, cancellation and timeout are surfaced as
//! distinct conditions and never count against a node.

use std::time::Duration;
use thiserror::Error;

use crate::address::NodeAddress;

/// Result type alias for cluster client operations
pub type Result<T> = std::result::Result<T, Error>;

/// Status reported by a node transport for a single call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The key does not exist on the node
    #[error("key not found")]
    NotFound,

    /// The call observed the caller's cancellation signal
    #[error("call cancelled")]
    Cancelled,

    /// The call did not complete before its deadline
    #[error("deadline exceeded")]
    DeadlineExceeded,

    /// The node could not be reached
    #[error("node unavailable: {0}")]
    Unavailable(String),

    /// The node reported an internal failure
    #[error("internal node error: {0}")]
    Internal(String),
}

/// Errors raised by key identities, key codecs and the buffer pool.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KeyError {
    #[error("key identity must contain at least one byte")]
    Empty,

    #[error("key buffer has length {actual}, codec requires exactly {expected}")]
    WidthMismatch { expected: usize, actual: usize },

    #[error("key codec is one-way and cannot decode")]
    Irreversible,

    #[error("failed to decode key: {0}")]
    Decode(String),
}

/// Errors surfaced by node clients and the cluster client.
#[derive(Error, Debug)]
pub enum Error {
    /// The key is absent; a valid protocol outcome
    #[error("key not found on {node}")]
    NotFound { node: NodeAddress },

    /// The caller withdrew interest before the call completed
    #[error("operation on {node} was cancelled")]
    Cancelled { node: NodeAddress },

    /// The per-call deadline elapsed
    #[error("operation on {node} timed out after {timeout:?}")]
    Timeout { node: NodeAddress, timeout: Duration },

    /// Any other transport or protocol failure
    #[error("operation on {node} failed: {source}")]
    Operation {
        node: NodeAddress,
        #[source]
        source: TransportError,
    },

    /// Invalid construction input
    #[error("invalid configuration: {message}")]
    Configuration { message: String },

    /// Key encoding or decoding failed
    #[error("key error: {0}")]
    Key(#[from] KeyError),

    /// One or more nodes failed to shut down
    #[error("failed to close {} node(s)", .failures.len())]
    Close { failures: Vec<(NodeAddress, Error)> },

    /// Configuration file could not be loaded
    #[error("failed to load configuration: {0}")]
    Config(#[from] config::ConfigError),
}

impl Error {
    /// Create a not found error
    pub fn not_found(node: &NodeAddress) -> Self {
        Error::NotFound { node: node.clone() }
    }

    /// Create a cancellation error
    pub fn cancelled(node: &NodeAddress) -> Self {
        Error::Cancelled { node: node.clone() }
    }

    /// Create a timeout error
    pub fn timeout(node: &NodeAddress, timeout: Duration) -> Self {
        Error::Timeout {
            node: node.clone(),
            timeout,
        }
    }

    /// Create an operation error
    pub fn operation(node: &NodeAddress, source: TransportError) -> Self {
        Error::Operation {
            node: node.clone(),
            source,
        }
    }

    /// Create a configuration error
    pub fn configuration<S: Into<String>>(msg: S) -> Self {
        Error::Configuration {
            message: msg.into(),
        }
    }

    /// Whether the cluster client may retry this error on another node.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Operation { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled { .. })
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout { .. })
    }
}
