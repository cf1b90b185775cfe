//! # Node Client
//!
//! A `NodeClient` owns the transport for one storage node and runs the
//! primitive Put/Get/Exists/Ping calls against it. It never retries and
//! never switches nodes; that is the cluster client's job.
//!
//! ## Outcome classification
//!
//! | transport outcome  | surfaced as        | consecutive errors |
//! |--------------------|--------------------|--------------------|
//! | success            | `Ok`               | reset to 0         |
//! | `NotFound`         | `Error::NotFound`  | reset to 0         |
//! | `Cancelled`        | `Error::Cancelled` | unchanged          |
//! | `DeadlineExceeded` | `Error::Timeout`   | unchanged          |
//! | anything else      | `Error::Operation` | +1                 |
//!
//! ## Connection state
//!
//! The state is read from the transport's live channel every time it is
//! asked for, so it can never drift from the real connection. The only
//! state the client keeps itself is whether `close` has been called:
//! after that the node reports `Shutdown` forever.

use log::{debug, warn};
use serde::Serialize;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

use super::state::ConnectionState;
use crate::address::NodeAddress;
use crate::error::{Error, Result, TransportError};
use crate::transport::{CallOptions, Transport};

/// Point-in-time health of a node, as seen by selection policies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeHealth {
    pub state: ConnectionState,
    pub consecutive_errors: u64,
    pub since_last_operation: Duration,
}

impl NodeHealth {
    /// A ready node with no errors that was used just now.
    pub fn ready() -> Self {
        Self {
            state: ConnectionState::Ready,
            consecutive_errors: 0,
            since_last_operation: Duration::ZERO,
        }
    }
}

/// Diagnostic snapshot of a node, serializable for status reports.
#[derive(Debug, Clone, Serialize)]
pub struct NodeStatus {
    pub address: String,
    pub state: ConnectionState,
    pub consecutive_errors: u64,
    pub since_last_operation_ms: u64,
}

/// Client for a single storage node.
pub struct NodeClient<T> {
    address: NodeAddress,
    transport: T,
    timeout: Duration,
    consecutive_errors: AtomicU64,
    created: Instant,
    /// Nanoseconds after `created` at which the last call completed
    last_operation: AtomicU64,
    closed: AtomicBool,
    /// Last state reported by `state()`, used to log transitions
    observed: AtomicU8,
}

impl<T: Transport> NodeClient<T> {
    /// Create a client for `address` that gives every call `timeout` to complete.
    pub fn new(address: NodeAddress, transport: T, timeout: Duration) -> Self {
        let observed = transport.channel_state().as_u8();
        Self {
            address,
            transport,
            timeout,
            consecutive_errors: AtomicU64::new(0),
            created: Instant::now(),
            last_operation: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            observed: AtomicU8::new(observed),
        }
    }

    pub fn address(&self) -> &NodeAddress {
        &self.address
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Current connection state, refreshed from the transport.
    pub fn state(&self) -> ConnectionState {
        if self.closed.load(Ordering::Acquire) {
            return ConnectionState::Shutdown;
        }
        let current = self.transport.channel_state();
        let previous = ConnectionState::from_u8(self.observed.swap(current.as_u8(), Ordering::AcqRel));
        if previous != current {
            if previous.allows(current) {
                debug!("Node {} moved {} -> {}", self.address, previous, current);
            } else {
                warn!(
                    "Node {} reported unexpected transition {} -> {}",
                    self.address, previous, current
                );
            }
        }
        current
    }

    /// Operation errors since the last non-error outcome.
    pub fn consecutive_errors(&self) -> u64 {
        self.consecutive_errors.load(Ordering::Acquire)
    }

    /// Time since the last call on this node completed (or since creation).
    pub fn since_last_operation(&self) -> Duration {
        let last = Duration::from_nanos(self.last_operation.load(Ordering::Acquire));
        self.created.elapsed().saturating_sub(last)
    }

    pub fn health(&self) -> NodeHealth {
        NodeHealth {
            state: self.state(),
            consecutive_errors: self.consecutive_errors(),
            since_last_operation: self.since_last_operation(),
        }
    }

    pub fn status(&self) -> NodeStatus {
        let health = self.health();
        NodeStatus {
            address: self.address.to_string(),
            state: health.state,
            consecutive_errors: health.consecutive_errors,
            since_last_operation_ms: u64::try_from(health.since_last_operation.as_millis())
                .unwrap_or(u64::MAX),
        }
    }

    /// Connect the node's channel, giving up after `timeout`.
    pub fn open(&self, timeout: Duration) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(self.closed_error());
        }
        let outcome = self.transport.connect(Instant::now() + timeout);
        self.connect_outcome(outcome, timeout)
    }

    pub async fn open_async(&self, timeout: Duration) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(self.closed_error());
        }
        let deadline = Instant::now() + timeout;
        let outcome = match tokio::time::timeout_at(
            tokio::time::Instant::from_std(deadline),
            self.transport.connect_async(deadline),
        )
        .await
        {
            Ok(outcome) => outcome,
            Err(_) => Err(TransportError::DeadlineExceeded),
        };
        self.connect_outcome(outcome, timeout)
    }

    /// Shut the node down. The node reports `Shutdown` from here on, even
    /// if the transport fails to close cleanly.
    pub fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        debug!("Closing node {}", self.address);
        self.transport
            .shutdown()
            .map_err(|e| Error::operation(&self.address, e))
    }

    pub async fn close_async(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        debug!("Closing node {}", self.address);
        self.transport
            .shutdown_async()
            .await
            .map_err(|e| Error::operation(&self.address, e))
    }

    pub fn put(&self, key: &[u8], value: &[u8], cancellation: &CancellationToken) -> Result<()> {
        let options = self.call_options(cancellation)?;
        let outcome = self.transport.put(key, value, &options);
        self.complete(outcome)
    }

    pub async fn put_async(
        &self,
        key: &[u8],
        value: &[u8],
        cancellation: &CancellationToken,
    ) -> Result<()> {
        let options = self.call_options(cancellation)?;
        let outcome = guarded(&options, self.transport.put_async(key, value, &options)).await;
        self.complete(outcome)
    }

    pub fn get(
        &self,
        key: &[u8],
        full_get: bool,
        cancellation: &CancellationToken,
    ) -> Result<Vec<u8>> {
        let options = self.call_options(cancellation)?;
        let outcome = self.transport.get(key, full_get, &options);
        self.complete(outcome)
    }

    pub async fn get_async(
        &self,
        key: &[u8],
        full_get: bool,
        cancellation: &CancellationToken,
    ) -> Result<Vec<u8>> {
        let options = self.call_options(cancellation)?;
        let outcome = guarded(&options, self.transport.get_async(key, full_get, &options)).await;
        self.complete(outcome)
    }

    /// One flag per key. A transport answer of the wrong length counts as
    /// an operation error.
    pub fn exists(
        &self,
        keys: &[&[u8]],
        full_get: bool,
        cancellation: &CancellationToken,
    ) -> Result<Vec<bool>> {
        let options = self.call_options(cancellation)?;
        let outcome = self.transport.exists(keys, full_get, &options);
        self.complete(check_exists_len(outcome, keys.len()))
    }

    pub async fn exists_async(
        &self,
        keys: &[&[u8]],
        full_get: bool,
        cancellation: &CancellationToken,
    ) -> Result<Vec<bool>> {
        let options = self.call_options(cancellation)?;
        let outcome =
            guarded(&options, self.transport.exists_async(keys, full_get, &options)).await;
        self.complete(check_exists_len(outcome, keys.len()))
    }

    pub fn ping(&self, cancellation: &CancellationToken) -> Result<()> {
        let options = self.call_options(cancellation)?;
        let outcome = self.transport.ping(&options);
        self.complete(outcome)
    }

    pub async fn ping_async(&self, cancellation: &CancellationToken) -> Result<()> {
        let options = self.call_options(cancellation)?;
        let outcome = guarded(&options, self.transport.ping_async(&options)).await;
        self.complete(outcome)
    }

    /// Build the call limits; an already-cancelled caller never reaches the
    /// transport.
    fn call_options(&self, cancellation: &CancellationToken) -> Result<CallOptions> {
        if cancellation.is_cancelled() {
            return Err(Error::cancelled(&self.address));
        }
        Ok(CallOptions::new(
            Instant::now() + self.timeout,
            cancellation.clone(),
        ))
    }

    /// Classify a transport outcome and update the health counters.
    fn complete<R>(&self, outcome: std::result::Result<R, TransportError>) -> Result<R> {
        self.touch();
        match outcome {
            Ok(value) => {
                self.consecutive_errors.store(0, Ordering::Release);
                Ok(value)
            }
            Err(TransportError::NotFound) => {
                self.consecutive_errors.store(0, Ordering::Release);
                Err(Error::not_found(&self.address))
            }
            Err(TransportError::Cancelled) => Err(Error::cancelled(&self.address)),
            Err(TransportError::DeadlineExceeded) => Err(Error::timeout(&self.address, self.timeout)),
            Err(err) => {
                let errors = self.consecutive_errors.fetch_add(1, Ordering::AcqRel) + 1;
                debug!(
                    "Node {} call failed ({} consecutive): {}",
                    self.address, errors, err
                );
                Err(Error::operation(&self.address, err))
            }
        }
    }

    fn connect_outcome(
        &self,
        outcome: std::result::Result<(), TransportError>,
        timeout: Duration,
    ) -> Result<()> {
        match outcome {
            Ok(()) => {
                debug!("Node {} connected", self.address);
                Ok(())
            }
            Err(TransportError::DeadlineExceeded) => Err(Error::timeout(&self.address, timeout)),
            Err(TransportError::Cancelled) => Err(Error::cancelled(&self.address)),
            Err(err) => Err(Error::operation(&self.address, err)),
        }
    }

    fn closed_error(&self) -> Error {
        Error::operation(
            &self.address,
            TransportError::Unavailable("node client is closed".into()),
        )
    }

    fn touch(&self) {
        let nanos = u64::try_from(self.created.elapsed().as_nanos()).unwrap_or(u64::MAX);
        self.last_operation.store(nanos, Ordering::Release);
    }
}

impl<T> std::fmt::Debug for NodeClient<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeClient")
            .field("address", &self.address)
            .field("timeout", &self.timeout)
            .field("consecutive_errors", &self.consecutive_errors.load(Ordering::Relaxed))
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish()
    }
}

/// Race a transport call against the caller's cancellation and deadline, so
/// a transport that ignores them still cannot overrun either.
async fn guarded<R>(
    options: &CallOptions,
    call: impl Future<Output = std::result::Result<R, TransportError>>,
) -> std::result::Result<R, TransportError> {
    let deadline = tokio::time::Instant::from_std(options.deadline);
    tokio::select! {
        biased;
        _ = options.cancellation.cancelled() => Err(TransportError::Cancelled),
        outcome = tokio::time::timeout_at(deadline, call) => {
            outcome.unwrap_or(Err(TransportError::DeadlineExceeded))
        }
    }
}

fn check_exists_len(
    outcome: std::result::Result<Vec<bool>, TransportError>,
    expected: usize,
) -> std::result::Result<Vec<bool>, TransportError> {
    match outcome {
        Ok(flags) if flags.len() != expected => Err(TransportError::Internal(format!(
            "exists returned {} flags for {} keys",
            flags.len(),
            expected
        ))),
        other => other,
    }
}
