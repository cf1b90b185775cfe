//! # MerkleKV Cluster Client Engine
//!
//! The client-side engine an application embeds to talk to a multi-node
//! MerkleKV cluster. It keeps a connection per storage node, watches each
//! node's health, picks the node that serves each operation, retries failed
//! operations on other nodes within a bounded budget, and turns typed keys
//! into the fixed-width bytes the storage protocol uses without allocating
//! on every call.
//!
//! ## Architecture Overview
//!
//! - **Key layer** (`key`): key codecs, key identities and the buffer pool
//! - **Transport** (`transport`): the RPC seam to a node, plus an in-memory node
//! - **Node client** (`node`): one connection, its state and health counters
//! - **Selection policies** (`policy`): which node serves an attempt
//! - **Cluster client** (`cluster`): encode, select, call, retry
//! - **Configuration** (`config`): TOML and environment settings
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use merklekv_cluster::{ClusterBuilder, MemoryNode, MemoryTransport, NodeAddress, OpenErrorMode};
//! use std::time::Duration;
//! use tokio_util::sync::CancellationToken;
//!
//! fn main() -> merklekv_cluster::Result<()> {
//!     let cluster = ClusterBuilder::<u64>::new(vec![
//!         NodeAddress::new("127.0.0.1", 7379),
//!         NodeAddress::new("127.0.0.1", 7380),
//!     ])
//!     .retry_count(Some(-1))
//!     .build(|_| MemoryTransport::new(MemoryNode::new()))?;
//!
//!     cluster.open(Duration::from_secs(1), OpenErrorMode::SkipErrors)?;
//!
//!     let token = CancellationToken::new();
//!     cluster.put(&1, &[1, 2, 3], &token)?;
//!     let value = cluster.get(&1, false, &token)?;
//!     println!("Value: {:?}", value);
//!
//!     cluster.close()
//! }
//! ```

pub mod address;
pub mod cluster;
pub mod config;
pub mod error;
pub mod key;
pub mod node;
pub mod policy;
pub mod transport;

pub use address::NodeAddress;
pub use cluster::{resolve_retry_budget, ClusterBuilder, ClusterClient, OpenErrorMode};
pub use config::ClusterConfig;
pub use error::{Error, KeyError, Result, TransportError};
pub use key::{BufferPool, KeyIdentity, KeySerializer, PooledBuffer};
pub use node::{ConnectionState, NodeClient, NodeHealth, NodeStatus};
pub use policy::{OperationKind, PolicyKind, SelectionPolicy};
pub use transport::{CallOptions, MemoryNode, MemoryStore, MemoryTransport, Transport};
