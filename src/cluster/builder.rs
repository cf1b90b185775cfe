//! Construction and validation of cluster clients.

use log::{debug, info};
use std::any::TypeId;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use super::client::ClusterClient;
use crate::address::NodeAddress;
use crate::error::{Error, Result};
use crate::key::{BufferPool, DefaultKeySerializer, KeySerializer};
use crate::node::NodeClient;
use crate::policy::{PolicyKind, SelectionPolicy};
use crate::transport::Transport;

/// Per-operation timeout used when none is configured.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Turn a configured retry count into the number of retries per operation.
///
/// * `None` means no retries
/// * `-1` means one retry per remaining node (`node_count - 1`)
/// * `N >= 0` means exactly `N` retries
///
/// Anything below `-1` is rejected.
pub fn resolve_retry_budget(retry_count: Option<i32>, node_count: usize) -> Result<usize> {
    match retry_count {
        None => Ok(0),
        Some(-1) => Ok(node_count.saturating_sub(1)),
        Some(n) if n >= 0 => Ok(n as usize),
        Some(n) => Err(Error::configuration(format!(
            "retry count must be -1 or greater, got {}",
            n
        ))),
    }
}

enum PolicySource {
    Kind(PolicyKind),
    Factory(Box<dyn FnOnce() -> Box<dyn SelectionPolicy>>),
}

/// Builder for [`ClusterClient`].
///
/// # Example
///
/// ```rust,no_run
/// use merklekv_cluster::{ClusterBuilder, MemoryNode, MemoryTransport, NodeAddress, PolicyKind};
/// use std::time::Duration;
///
/// let cluster = ClusterBuilder::<u64>::new(vec![
///     NodeAddress::new("10.0.0.1", 7379),
///     NodeAddress::new("10.0.0.2", 7379),
/// ])
/// .timeout(Duration::from_secs(2))
/// .selection_policy(PolicyKind::FirstWorking)
/// .retry_count(Some(-1))
/// .build(|_| MemoryTransport::new(MemoryNode::new()))?;
/// # Ok::<(), merklekv_cluster::Error>(())
/// ```
pub struct ClusterBuilder<K> {
    addresses: Vec<NodeAddress>,
    serializer: Arc<dyn KeySerializer<K>>,
    codec: TypeId,
    timeout: Duration,
    policy: PolicySource,
    retry_count: Option<i32>,
    key_width: Option<usize>,
    pool_size: Option<i64>,
}

impl<K: DefaultKeySerializer> ClusterBuilder<K> {
    /// Start a cluster for a key type with a built-in codec.
    pub fn new(addresses: impl IntoIterator<Item = NodeAddress>) -> Self {
        Self::with_serializer(addresses, K::Serializer::default())
    }
}

impl<K: 'static> ClusterBuilder<K> {
    /// Start a cluster that encodes keys with `serializer`.
    pub fn with_serializer<S: KeySerializer<K>>(
        addresses: impl IntoIterator<Item = NodeAddress>,
        serializer: S,
    ) -> Self {
        Self {
            addresses: addresses.into_iter().collect(),
            serializer: Arc::new(serializer),
            codec: TypeId::of::<S>(),
            timeout: DEFAULT_TIMEOUT,
            policy: PolicySource::Kind(PolicyKind::default()),
            retry_count: None,
            key_width: None,
            pool_size: None,
        }
    }

    /// Deadline given to every call on a node.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Use one of the built-in selection policies.
    pub fn selection_policy(mut self, kind: PolicyKind) -> Self {
        self.policy = PolicySource::Kind(kind);
        self
    }

    /// Use a custom selection policy, created once at build time.
    pub fn selection_policy_factory<F, P>(mut self, factory: F) -> Self
    where
        F: FnOnce() -> P + 'static,
        P: SelectionPolicy + 'static,
    {
        self.policy = PolicySource::Factory(Box::new(move || {
            Box::new(factory()) as Box<dyn SelectionPolicy>
        }));
        self
    }

    /// Retries per operation; see [`resolve_retry_budget`].
    pub fn retry_count(mut self, retry_count: Option<i32>) -> Self {
        self.retry_count = retry_count;
        self
    }

    /// Expected encoded key width; must match the codec.
    pub fn key_width(mut self, width: usize) -> Self {
        self.key_width = Some(width);
        self
    }

    /// Buffer pool override: `None` shares the process-wide pool for this
    /// codec, zero or less disables pooling, a positive value creates a
    /// private pool of that capacity.
    pub fn pool_size(mut self, pool_size: Option<i64>) -> Self {
        self.pool_size = pool_size;
        self
    }

    /// Validate the settings and create a node client per address, using
    /// `connect` to create each node's transport.
    ///
    /// Nodes are not connected yet; call `open` on the result.
    pub fn build<T, F>(self, mut connect: F) -> Result<ClusterClient<K, T>>
    where
        T: Transport,
        F: FnMut(&NodeAddress) -> T,
    {
        if self.addresses.is_empty() {
            return Err(Error::configuration("cluster needs at least one node"));
        }
        let mut seen = HashSet::with_capacity(self.addresses.len());
        for address in &self.addresses {
            if !seen.insert(address) {
                return Err(Error::configuration(format!(
                    "node {} is listed more than once",
                    address
                )));
            }
        }
        if self.timeout.is_zero() {
            return Err(Error::configuration("operation timeout must be greater than zero"));
        }

        let width = self.serializer.serialized_size();
        if width == 0 {
            return Err(Error::configuration("key serializer produces empty keys"));
        }
        if let Some(expected) = self.key_width {
            if expected != width {
                return Err(Error::configuration(format!(
                    "key width {} does not match the serializer's width {}",
                    expected, width
                )));
            }
        }

        if let PolicySource::Kind(kind) = &self.policy {
            kind.validate()?;
        }

        let retry_budget = resolve_retry_budget(self.retry_count, self.addresses.len())?;
        let pool = match self.pool_size {
            None => BufferPool::shared(self.codec, width),
            Some(size) if size <= 0 => Arc::new(BufferPool::disabled(width)),
            Some(size) => {
                let capacity = usize::try_from(size)
                    .map_err(|_| Error::configuration(format!("pool size {} is too large", size)))?;
                Arc::new(BufferPool::new(width, capacity))
            }
        };
        let policy = match self.policy {
            PolicySource::Kind(kind) => {
                debug!("Using {} selection policy", kind.name());
                kind.build()
            }
            PolicySource::Factory(factory) => factory(),
        };

        let nodes: Vec<NodeClient<T>> = self
            .addresses
            .into_iter()
            .map(|address| {
                let transport = connect(&address);
                NodeClient::new(address, transport, self.timeout)
            })
            .collect();

        info!(
            "Built cluster client with {} node(s), retry budget {}, key width {}",
            nodes.len(),
            retry_budget,
            width
        );

        Ok(ClusterClient::from_parts(
            nodes,
            policy,
            retry_budget,
            self.serializer,
            pool,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::{HashedKeySerializer, PaddedKeySerializer};
    use crate::transport::{MemoryNode, MemoryTransport};

    fn addresses(n: u16) -> Vec<NodeAddress> {
        (0..n).map(|i| NodeAddress::new("127.0.0.1", 7000 + i)).collect()
    }

    fn memory(_: &NodeAddress) -> MemoryTransport {
        MemoryTransport::new(MemoryNode::new())
    }

    #[test]
    fn test_resolve_retry_budget() {
        assert_eq!(resolve_retry_budget(None, 4).unwrap(), 0);
        assert_eq!(resolve_retry_budget(Some(0), 4).unwrap(), 0);
        assert_eq!(resolve_retry_budget(Some(7), 4).unwrap(), 7);
        assert_eq!(resolve_retry_budget(Some(-1), 4).unwrap(), 3);
        assert_eq!(resolve_retry_budget(Some(-1), 1).unwrap(), 0);
        assert!(matches!(
            resolve_retry_budget(Some(-2), 4),
            Err(Error::Configuration { .. })
        ));
    }

    #[test]
    fn test_build_defaults() {
        let cluster = ClusterBuilder::<u64>::new(addresses(3)).build(memory).unwrap();
        assert_eq!(cluster.nodes().len(), 3);
        assert_eq!(cluster.retry_budget(), 0);
        assert_eq!(cluster.nodes()[0].timeout(), DEFAULT_TIMEOUT);
        assert_eq!(cluster.pool().buffer_len(), 8);
    }

    #[test]
    fn test_rejects_empty_node_list() {
        let err = ClusterBuilder::<u32>::new(Vec::new()).build(memory).unwrap_err();
        assert!(matches!(err, Error::Configuration { .. }));
    }

    #[test]
    fn test_rejects_duplicate_nodes() {
        let nodes = vec![NodeAddress::new("Node-A", 1), NodeAddress::new("node-a", 1)];
        let err = ClusterBuilder::<u32>::new(nodes).build(memory).unwrap_err();
        assert!(matches!(err, Error::Configuration { .. }));
    }

    #[test]
    fn test_rejects_zero_timeout() {
        let err = ClusterBuilder::<u32>::new(addresses(1))
            .timeout(Duration::ZERO)
            .build(memory)
            .unwrap_err();
        assert!(matches!(err, Error::Configuration { .. }));
    }

    #[test]
    fn test_key_width_must_match_codec() {
        let err = ClusterBuilder::<u32>::new(addresses(1))
            .key_width(8)
            .build(memory)
            .unwrap_err();
        assert!(matches!(err, Error::Configuration { .. }));

        let cluster = ClusterBuilder::with_serializer(
            addresses(1),
            PaddedKeySerializer::new(12).unwrap(),
        )
        .key_width(12)
        .build(memory)
        .unwrap();
        assert_eq!(cluster.pool().buffer_len(), 12);
    }

    #[test]
    fn test_retry_count_resolved_against_node_count() {
        let cluster = ClusterBuilder::<u32>::new(addresses(5))
            .retry_count(Some(-1))
            .build(memory)
            .unwrap();
        assert_eq!(cluster.retry_budget(), 4);

        let err = ClusterBuilder::<u32>::new(addresses(5))
            .retry_count(Some(-3))
            .build(memory)
            .unwrap_err();
        assert!(matches!(err, Error::Configuration { .. }));
    }

    #[test]
    fn test_rejects_zero_unhealthy_threshold() {
        let err = ClusterBuilder::<u32>::new(addresses(2))
            .retry_count(Some(-1))
            .selection_policy(PolicyKind::SequentialWorking {
                unhealthy_threshold: 0,
                recovery_window: Duration::from_secs(60),
            })
            .build(memory)
            .unwrap_err();
        assert!(matches!(err, Error::Configuration { .. }));
    }

    #[test]
    fn test_pool_size_override() {
        let hashed = || HashedKeySerializer::new(20).unwrap();
        let shared_a = ClusterBuilder::with_serializer(addresses(1), hashed())
            .build(memory)
            .unwrap();
        let shared_b = ClusterBuilder::with_serializer(addresses(1), hashed())
            .build(memory)
            .unwrap();
        assert!(Arc::ptr_eq(shared_a.pool(), shared_b.pool()));

        let disabled = ClusterBuilder::<u32>::new(addresses(1))
            .pool_size(Some(0))
            .build(memory)
            .unwrap();
        assert!(!disabled.pool().is_enabled());

        let private = ClusterBuilder::<u32>::new(addresses(1))
            .pool_size(Some(16))
            .build(memory)
            .unwrap();
        assert!(private.pool().is_enabled());
        assert_eq!(private.pool().capacity(), 16);
    }

    #[test]
    fn test_transport_factory_sees_every_address() {
        let mut seen = Vec::new();
        ClusterBuilder::<u32>::new(addresses(3))
            .build(|address| {
                seen.push(address.clone());
                MemoryTransport::new(MemoryNode::new())
            })
            .unwrap();
        assert_eq!(seen, addresses(3));
    }
}
