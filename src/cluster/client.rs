//! Multi-node client with node selection and retries.
//!
//! Every operation runs the same loop:
//!
//! ```text
//! encode key(s) into pooled buffers
//! index = policy.select_fresh(...)
//! loop {
//!     call node[index]
//!     ok / not found / cancelled / timeout   -> return
//!     operation error, budget left            -> index = policy.select_on_retry(...) or return
//!     operation error, budget spent           -> return
//! }
//! buffers released on drop
//! ```

use futures::future::join_all;
use log::{debug, info, warn};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::address::NodeAddress;
use crate::error::{Error, Result};
use crate::key::{BufferPool, KeyIdentity, KeySerializer, PooledBuffer};
use crate::node::{NodeClient, NodeHealth, NodeStatus};
use crate::policy::{OperationKind, SelectionPolicy};
use crate::transport::Transport;

/// What `open` does when a node fails to connect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OpenErrorMode {
    /// Stop and return the first failure
    #[default]
    ThrowOnFirstError,
    /// Log the failure and leave the node in whatever state it reached
    SkipErrors,
}

/// Client for a cluster of storage nodes, keyed by `K`.
///
/// Safe to share between threads; all methods take `&self`. Dropping the
/// client does not close its nodes; call [`close`](Self::close) or
/// [`close_async`](Self::close_async) for that.
pub struct ClusterClient<K, T> {
    nodes: Vec<NodeClient<T>>,
    policy: Box<dyn SelectionPolicy>,
    retry_budget: usize,
    serializer: Arc<dyn KeySerializer<K>>,
    pool: Arc<BufferPool>,
}

impl<K: 'static, T: Transport> ClusterClient<K, T> {
    pub(super) fn from_parts(
        nodes: Vec<NodeClient<T>>,
        policy: Box<dyn SelectionPolicy>,
        retry_budget: usize,
        serializer: Arc<dyn KeySerializer<K>>,
        pool: Arc<BufferPool>,
    ) -> Self {
        Self {
            nodes,
            policy,
            retry_budget,
            serializer,
            pool,
        }
    }

    pub fn nodes(&self) -> &[NodeClient<T>] {
        &self.nodes
    }

    /// Retries allowed after the first attempt of an operation.
    pub fn retry_budget(&self) -> usize {
        self.retry_budget
    }

    pub fn pool(&self) -> &Arc<BufferPool> {
        &self.pool
    }

    /// Width in bytes of every encoded key.
    pub fn key_width(&self) -> usize {
        self.serializer.serialized_size()
    }

    /// The identity `key` is stored under.
    pub fn key_identity(&self, key: &K) -> Result<KeyIdentity> {
        Ok(KeyIdentity::from_key(&*self.serializer, key)?)
    }

    /// Diagnostic snapshot of every node, in configuration order.
    pub fn status(&self) -> Vec<NodeStatus> {
        self.nodes.iter().map(NodeClient::status).collect()
    }

    /// Connect every node.
    pub fn open(&self, timeout: Duration, mode: OpenErrorMode) -> Result<()> {
        info!("Opening {} cluster node(s)", self.nodes.len());
        for node in &self.nodes {
            self.check_open(node, node.open(timeout), mode)?;
        }
        Ok(())
    }

    /// Connect every node concurrently. With `ThrowOnFirstError` the error
    /// of the first failed node in configuration order is returned.
    pub async fn open_async(&self, timeout: Duration, mode: OpenErrorMode) -> Result<()> {
        info!("Opening {} cluster node(s)", self.nodes.len());
        let outcomes = join_all(self.nodes.iter().map(|node| node.open_async(timeout))).await;
        for (node, outcome) in self.nodes.iter().zip(outcomes) {
            self.check_open(node, outcome, mode)?;
        }
        Ok(())
    }

    /// Shut down every node. Every node is attempted; failures are collected
    /// into one `Error::Close`.
    pub fn close(&self) -> Result<()> {
        let failures = self
            .nodes
            .iter()
            .filter_map(|node| node.close().err().map(|e| (node.address().clone(), e)))
            .collect();
        self.finish_close(failures)
    }

    pub async fn close_async(&self) -> Result<()> {
        let outcomes = join_all(self.nodes.iter().map(|node| node.close_async())).await;
        let failures = self
            .nodes
            .iter()
            .zip(outcomes)
            .filter_map(|(node, outcome)| outcome.err().map(|e| (node.address().clone(), e)))
            .collect();
        self.finish_close(failures)
    }

    /// Probe a single node. Never retried.
    pub fn ping(&self, index: usize, cancellation: &CancellationToken) -> Result<()> {
        self.node(index)?.ping(cancellation)
    }

    pub async fn ping_async(&self, index: usize, cancellation: &CancellationToken) -> Result<()> {
        self.node(index)?.ping_async(cancellation).await
    }

    /// Store `value` under `key`.
    pub fn put(&self, key: &K, value: &[u8], cancellation: &CancellationToken) -> Result<()> {
        let buffer = self.encode(key, false)?;
        self.execute(OperationKind::Put, &buffer, |node| {
            node.put(&buffer, value, cancellation)
        })
    }

    pub async fn put_async(
        &self,
        key: &K,
        value: &[u8],
        cancellation: &CancellationToken,
    ) -> Result<()> {
        let buffer = self.encode(key, true)?;
        let encoded: &[u8] = &buffer;
        self.execute_async(OperationKind::Put, encoded, move |node| {
            node.put_async(encoded, value, cancellation)
        })
        .await
    }

    /// Fetch the value under `key`; `Error::NotFound` when it is absent.
    ///
    /// `full_get` asks the serving node to consult its replicas on a miss.
    pub fn get(&self, key: &K, full_get: bool, cancellation: &CancellationToken) -> Result<Vec<u8>> {
        let buffer = self.encode(key, false)?;
        self.execute(OperationKind::Get, &buffer, |node| {
            node.get(&buffer, full_get, cancellation)
        })
    }

    pub async fn get_async(
        &self,
        key: &K,
        full_get: bool,
        cancellation: &CancellationToken,
    ) -> Result<Vec<u8>> {
        let buffer = self.encode(key, true)?;
        let encoded: &[u8] = &buffer;
        self.execute_async(OperationKind::Get, encoded, move |node| {
            node.get_async(encoded, full_get, cancellation)
        })
        .await
    }

    /// One flag per key, in the order given. An empty key list returns an
    /// empty result without contacting any node.
    pub fn exists(
        &self,
        keys: &[K],
        full_get: bool,
        cancellation: &CancellationToken,
    ) -> Result<Vec<bool>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let buffers = self.encode_batch(keys, false)?;
        let encoded: Vec<&[u8]> = buffers.iter().map(|buffer| &**buffer).collect();
        self.execute(OperationKind::Exists, encoded[0], |node| {
            node.exists(&encoded, full_get, cancellation)
        })
    }

    pub async fn exists_async(
        &self,
        keys: &[K],
        full_get: bool,
        cancellation: &CancellationToken,
    ) -> Result<Vec<bool>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let buffers = self.encode_batch(keys, true)?;
        let encoded: Vec<&[u8]> = buffers.iter().map(|buffer| &**buffer).collect();
        let encoded: &[&[u8]] = &encoded;
        self.execute_async(OperationKind::Exists, encoded[0], move |node| {
            node.exists_async(encoded, full_get, cancellation)
        })
        .await
    }

    fn node(&self, index: usize) -> Result<&NodeClient<T>> {
        self.nodes.get(index).ok_or_else(|| {
            Error::configuration(format!(
                "node index {} out of range for {} node(s)",
                index,
                self.nodes.len()
            ))
        })
    }

    fn health(&self) -> Vec<NodeHealth> {
        self.nodes.iter().map(NodeClient::health).collect()
    }

    /// Encode one key. A buffer that lives across an await must skip the
    /// thread-local slot.
    fn encode(&self, key: &K, skip_local_slot: bool) -> Result<PooledBuffer<'_>> {
        let mut buffer = self.pool.rent(skip_local_slot);
        self.serializer.encode(key, &mut buffer)?;
        Ok(buffer)
    }

    /// Encode a batch. The thread has a single local slot, so at most the
    /// first buffer of a synchronous batch may use it.
    fn encode_batch(&self, keys: &[K], is_async: bool) -> Result<Vec<PooledBuffer<'_>>> {
        let mut buffers = Vec::with_capacity(keys.len());
        for (i, key) in keys.iter().enumerate() {
            buffers.push(self.encode(key, is_async || i > 0)?);
        }
        Ok(buffers)
    }

    /// Pick the node for the next attempt, or `None` when the caller should
    /// surface `err`.
    fn next_attempt(
        &self,
        err: &Error,
        attempt: usize,
        previous: usize,
        operation: OperationKind,
        key: &[u8],
    ) -> Option<usize> {
        if !err.is_retryable() {
            return None;
        }
        if attempt > self.retry_budget {
            debug!("{:?} retry budget of {} spent: {}", operation, self.retry_budget, err);
            return None;
        }
        match self
            .policy
            .select_on_retry(&self.health(), previous, operation, key)
        {
            Some(next) => {
                let next = next % self.nodes.len();
                warn!(
                    "{:?} failed on {} ({}), retrying on {} (retry {}/{})",
                    operation,
                    self.nodes[previous].address(),
                    err,
                    self.nodes[next].address(),
                    attempt,
                    self.retry_budget
                );
                Some(next)
            }
            None => {
                debug!("{:?} selection policy stopped retrying: {}", operation, err);
                None
            }
        }
    }

    fn execute<R, F>(&self, operation: OperationKind, key: &[u8], mut call: F) -> Result<R>
    where
        F: FnMut(&NodeClient<T>) -> Result<R>,
    {
        let mut index = self.policy.select_fresh(&self.health(), operation, key) % self.nodes.len();
        let mut attempt = 1;
        loop {
            debug!(
                "{:?} attempt {} on {}",
                operation,
                attempt,
                self.nodes[index].address()
            );
            let err = match call(&self.nodes[index]) {
                Err(err) => err,
                done => return done,
            };
            match self.next_attempt(&err, attempt, index, operation, key) {
                Some(next) => {
                    index = next;
                    attempt += 1;
                }
                None => return Err(err),
            }
        }
    }

    async fn execute_async<'a, R, F, Fut>(
        &'a self,
        operation: OperationKind,
        key: &[u8],
        mut call: F,
    ) -> Result<R>
    where
        F: FnMut(&'a NodeClient<T>) -> Fut,
        Fut: Future<Output = Result<R>>,
    {
        let mut index = self.policy.select_fresh(&self.health(), operation, key) % self.nodes.len();
        let mut attempt = 1;
        loop {
            debug!(
                "{:?} attempt {} on {}",
                operation,
                attempt,
                self.nodes[index].address()
            );
            let err = match call(&self.nodes[index]).await {
                Err(err) => err,
                done => return done,
            };
            match self.next_attempt(&err, attempt, index, operation, key) {
                Some(next) => {
                    index = next;
                    attempt += 1;
                }
                None => return Err(err),
            }
        }
    }

    fn check_open(&self, node: &NodeClient<T>, outcome: Result<()>, mode: OpenErrorMode) -> Result<()> {
        match (outcome, mode) {
            (Ok(()), _) => Ok(()),
            (Err(err), OpenErrorMode::SkipErrors) => {
                warn!(
                    "Node {} failed to open, leaving it {}: {}",
                    node.address(),
                    node.state(),
                    err
                );
                Ok(())
            }
            (Err(err), OpenErrorMode::ThrowOnFirstError) => Err(err),
        }
    }

    fn finish_close(&self, failures: Vec<(NodeAddress, Error)>) -> Result<()> {
        if failures.is_empty() {
            info!("Closed {} cluster node(s)", self.nodes.len());
            return Ok(());
        }
        for (address, err) in &failures {
            warn!("Node {} failed to close: {}", address, err);
        }
        Err(Error::Close { failures })
    }
}

impl<K, T> std::fmt::Debug for ClusterClient<K, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterClient")
            .field("nodes", &self.nodes)
            .field("retry_budget", &self.retry_budget)
            .field("pool", &self.pool)
            .finish()
    }
}
