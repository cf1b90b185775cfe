//! # In-Memory Transport
//!
//! An in-process stand-in for a storage node. Several `MemoryNode`s can share
//! one `MemoryStore`, which plays the role of a replicated cluster: a value
//! written through one node is readable through any other.
//!
//! Each node carries knobs for exercising the engine's failure handling:
//! - `fail_with(Some(err))` makes every call fail with `err`
//! - `set_reachable(false)` refuses connections and calls as `Unavailable`
//! - `set_latency(d)` delays every call by `d`
//! - `fail_shutdown(true)` makes `shutdown` report an error
//!
//! Channel state follows the same transition table as a network channel:
//! connecting moves `Idle` to `Ready` (or `TransientFailure`), unreachable
//! calls move the channel to `TransientFailure`, the next good call moves it
//! back to `Ready`, and `shutdown` is terminal.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::{CallOptions, Transport};
use crate::error::TransportError;
use crate::key::KeyIdentity;
use crate::node::ConnectionState;

/// Key/value data shared by one or more in-memory nodes.
#[derive(Debug, Default)]
pub struct MemoryStore {
    data: RwLock<HashMap<KeyIdentity, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        let key = KeyIdentity::new(key).ok()?;
        self.data.read().get(&key).cloned()
    }

    pub fn contains(&self, key: &[u8]) -> bool {
        match KeyIdentity::new(key) {
            Ok(key) => self.data.read().contains_key(&key),
            Err(_) => false,
        }
    }

    fn insert(&self, key: &[u8], value: &[u8]) -> Result<(), TransportError> {
        let key = KeyIdentity::new(key).map_err(|e| TransportError::Internal(e.to_string()))?;
        self.data.write().insert(key, value.to_vec());
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }
}

/// Behaviour and counters of one simulated storage node.
#[derive(Debug)]
pub struct MemoryNode {
    store: Arc<MemoryStore>,
    fault: RwLock<Option<TransportError>>,
    reachable: AtomicBool,
    fail_shutdown: AtomicBool,
    latency_micros: AtomicU64,
    requests: AtomicU64,
    full_gets: AtomicU64,
}

impl MemoryNode {
    /// A node with its own private store.
    pub fn new() -> Arc<Self> {
        Self::with_store(MemoryStore::new())
    }

    /// A node serving `store`, possibly shared with other nodes.
    pub fn with_store(store: Arc<MemoryStore>) -> Arc<Self> {
        Arc::new(Self {
            store,
            fault: RwLock::new(None),
            reachable: AtomicBool::new(true),
            fail_shutdown: AtomicBool::new(false),
            latency_micros: AtomicU64::new(0),
            requests: AtomicU64::new(0),
            full_gets: AtomicU64::new(0),
        })
    }

    pub fn store(&self) -> &Arc<MemoryStore> {
        &self.store
    }

    /// Make every subsequent call fail with `fault`; `None` heals the node.
    pub fn fail_with(&self, fault: Option<TransportError>) {
        *self.fault.write() = fault;
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::Release);
    }

    pub fn fail_shutdown(&self, fail: bool) {
        self.fail_shutdown.store(fail, Ordering::Release);
    }

    pub fn set_latency(&self, latency: Duration) {
        let micros = u64::try_from(latency.as_micros()).unwrap_or(u64::MAX);
        self.latency_micros.store(micros, Ordering::Release);
    }

    pub fn latency(&self) -> Duration {
        Duration::from_micros(self.latency_micros.load(Ordering::Acquire))
    }

    /// Calls that reached this node, successful or not.
    pub fn request_count(&self) -> u64 {
        self.requests.load(Ordering::Acquire)
    }

    /// Get/Exists calls that carried the full-get hint.
    pub fn full_get_count(&self) -> u64 {
        self.full_gets.load(Ordering::Acquire)
    }

    fn is_reachable(&self) -> bool {
        self.reachable.load(Ordering::Acquire)
    }

    fn fault(&self) -> Option<TransportError> {
        self.fault.read().clone()
    }
}

/// `Transport` over a `MemoryNode`.
#[derive(Debug)]
pub struct MemoryTransport {
    node: Arc<MemoryNode>,
    state: AtomicU8,
}

impl MemoryTransport {
    pub fn new(node: Arc<MemoryNode>) -> Self {
        Self {
            node,
            state: AtomicU8::new(ConnectionState::Idle.as_u8()),
        }
    }

    pub fn node(&self) -> &Arc<MemoryNode> {
        &self.node
    }

    /// Move the channel to `next` if the transition table allows it.
    fn transition(&self, next: ConnectionState) {
        let mut current = self.state.load(Ordering::Acquire);
        loop {
            let from = ConnectionState::from_u8(current);
            if from == next || !from.allows(next) {
                return;
            }
            match self.state.compare_exchange_weak(
                current,
                next.as_u8(),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return,
                Err(actual) => current = actual,
            }
        }
    }

    /// Common checks every call goes through before touching the store.
    fn admit(&self, options: &CallOptions) -> Result<(), TransportError> {
        self.node.requests.fetch_add(1, Ordering::AcqRel);

        if self.channel_state() == ConnectionState::Shutdown {
            return Err(TransportError::Unavailable("channel is shut down".into()));
        }
        if options.cancellation.is_cancelled() {
            return Err(TransportError::Cancelled);
        }
        if options.is_expired() {
            return Err(TransportError::DeadlineExceeded);
        }
        if !self.node.is_reachable() {
            self.transition(ConnectionState::TransientFailure);
            return Err(TransportError::Unavailable("node unreachable".into()));
        }
        if let Some(fault) = self.node.fault() {
            if matches!(fault, TransportError::Unavailable(_)) {
                self.transition(ConnectionState::TransientFailure);
            }
            return Err(fault);
        }
        self.transition(ConnectionState::Ready);
        Ok(())
    }

    fn block_for_latency(&self, options: &CallOptions) -> Result<(), TransportError> {
        let latency = self.node.latency();
        if latency.is_zero() {
            return Ok(());
        }
        let remaining = options.deadline.saturating_duration_since(Instant::now());
        if latency >= remaining {
            std::thread::sleep(remaining);
            return Err(TransportError::DeadlineExceeded);
        }
        std::thread::sleep(latency);
        Ok(())
    }

    async fn delay(&self) {
        let latency = self.node.latency();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
    }

    fn lookup(&self, key: &[u8], full_get: bool) -> Result<Vec<u8>, TransportError> {
        if full_get {
            self.node.full_gets.fetch_add(1, Ordering::AcqRel);
        }
        self.node.store.get(key).ok_or(TransportError::NotFound)
    }

    fn lookup_many(&self, keys: &[&[u8]], full_get: bool) -> Vec<bool> {
        if full_get {
            self.node.full_gets.fetch_add(1, Ordering::AcqRel);
        }
        keys.iter().map(|key| self.node.store.contains(key)).collect()
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    fn channel_state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn connect(&self, deadline: Instant) -> Result<(), TransportError> {
        if self.channel_state() == ConnectionState::Shutdown {
            return Err(TransportError::Unavailable("channel is shut down".into()));
        }
        self.transition(ConnectionState::Connecting);
        if Instant::now() >= deadline {
            self.transition(ConnectionState::TransientFailure);
            return Err(TransportError::DeadlineExceeded);
        }
        if !self.node.is_reachable() {
            self.transition(ConnectionState::TransientFailure);
            return Err(TransportError::Unavailable("connection refused".into()));
        }
        self.transition(ConnectionState::Ready);
        Ok(())
    }

    async fn connect_async(&self, deadline: Instant) -> Result<(), TransportError> {
        self.delay().await;
        self.connect(deadline)
    }

    fn shutdown(&self) -> Result<(), TransportError> {
        if self.node.fail_shutdown.load(Ordering::Acquire) {
            return Err(TransportError::Internal("shutdown failed".into()));
        }
        self.transition(ConnectionState::Shutdown);
        Ok(())
    }

    async fn shutdown_async(&self) -> Result<(), TransportError> {
        self.shutdown()
    }

    fn put(&self, key: &[u8], value: &[u8], options: &CallOptions) -> Result<(), TransportError> {
        self.admit(options)?;
        self.block_for_latency(options)?;
        self.node.store.insert(key, value)
    }

    async fn put_async(
        &self,
        key: &[u8],
        value: &[u8],
        options: &CallOptions,
    ) -> Result<(), TransportError> {
        self.admit(options)?;
        self.delay().await;
        self.node.store.insert(key, value)
    }

    fn get(
        &self,
        key: &[u8],
        full_get: bool,
        options: &CallOptions,
    ) -> Result<Vec<u8>, TransportError> {
        self.admit(options)?;
        self.block_for_latency(options)?;
        self.lookup(key, full_get)
    }

    async fn get_async(
        &self,
        key: &[u8],
        full_get: bool,
        options: &CallOptions,
    ) -> Result<Vec<u8>, TransportError> {
        self.admit(options)?;
        self.delay().await;
        self.lookup(key, full_get)
    }

    fn exists(
        &self,
        keys: &[&[u8]],
        full_get: bool,
        options: &CallOptions,
    ) -> Result<Vec<bool>, TransportError> {
        self.admit(options)?;
        self.block_for_latency(options)?;
        Ok(self.lookup_many(keys, full_get))
    }

    async fn exists_async(
        &self,
        keys: &[&[u8]],
        full_get: bool,
        options: &CallOptions,
    ) -> Result<Vec<bool>, TransportError> {
        self.admit(options)?;
        self.delay().await;
        Ok(self.lookup_many(keys, full_get))
    }

    fn ping(&self, options: &CallOptions) -> Result<(), TransportError> {
        self.admit(options)?;
        self.block_for_latency(options)
    }

    async fn ping_async(&self, options: &CallOptions) -> Result<(), TransportError> {
        self.admit(options)?;
        self.delay().await;
        Ok(())
    }
}
