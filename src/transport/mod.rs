//! # Node Transport
//!
//! The RPC transport is the collaborator that actually talks to a storage
//! node. The engine treats it as opaque: it only needs the four primitive
//! calls, their blocking and async forms, and the live channel state.
//!
//! ## Implementations
//!
//! - `MemoryTransport`: in-process node backed by a shared map, with fault
//!   injection; used by the test suite and the bench binary
//! - Network transports live outside this crate and implement `Transport`

use async_trait::async_trait;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::TransportError;
use crate::node::ConnectionState;

pub mod memory;

pub use memory::{MemoryNode, MemoryStore, MemoryTransport};

/// Per-call limits handed to the transport.
#[derive(Debug, Clone)]
pub struct CallOptions {
    /// Absolute deadline for this call
    pub deadline: Instant,
    /// Caller's cancellation signal
    pub cancellation: CancellationToken,
}

impl CallOptions {
    pub fn new(deadline: Instant, cancellation: CancellationToken) -> Self {
        Self {
            deadline,
            cancellation,
        }
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.deadline
    }
}

/// Connection to one storage node.
///
/// Blocking methods may park the calling thread; they must not be called
/// from inside an async task. Transports are expected to honour
/// `CallOptions::deadline` and `CallOptions::cancellation`, reporting them as
/// `TransportError::DeadlineExceeded` and `TransportError::Cancelled`.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Live state of the underlying channel.
    fn channel_state(&self) -> ConnectionState;

    /// Establish the channel.
    fn connect(&self, deadline: Instant) -> Result<(), TransportError>;

    async fn connect_async(&self, deadline: Instant) -> Result<(), TransportError>;

    /// Tear the channel down. Subsequent calls fail.
    fn shutdown(&self) -> Result<(), TransportError>;

    async fn shutdown_async(&self) -> Result<(), TransportError>;

    /// Store `value` under `key`.
    fn put(&self, key: &[u8], value: &[u8], options: &CallOptions) -> Result<(), TransportError>;

    async fn put_async(
        &self,
        key: &[u8],
        value: &[u8],
        options: &CallOptions,
    ) -> Result<(), TransportError>;

    /// Fetch the value under `key`; `TransportError::NotFound` when absent.
    ///
    /// `full_get` asks the node to consult replica nodes on a local miss.
    fn get(
        &self,
        key: &[u8],
        full_get: bool,
        options: &CallOptions,
    ) -> Result<Vec<u8>, TransportError>;

    async fn get_async(
        &self,
        key: &[u8],
        full_get: bool,
        options: &CallOptions,
    ) -> Result<Vec<u8>, TransportError>;

    /// One flag per key, in order.
    fn exists(
        &self,
        keys: &[&[u8]],
        full_get: bool,
        options: &CallOptions,
    ) -> Result<Vec<bool>, TransportError>;

    async fn exists_async(
        &self,
        keys: &[&[u8]],
        full_get: bool,
        options: &CallOptions,
    ) -> Result<Vec<bool>, TransportError>;

    fn ping(&self, options: &CallOptions) -> Result<(), TransportError>;

    async fn ping_async(&self, options: &CallOptions) -> Result<(), TransportError>;
}
