//! # Configuration Management
//!
//! This module handles loading the settings a cluster client is built from.
//! Configuration is loaded from TOML files and includes:
//! - The storage node list
//! - Per-operation timeout and retry count
//! - The node selection policy and its parameters
//! - Key width and buffer pool overrides
//!
//! Any value can be overridden from the environment with the
//! `MERKLEKV_CLUSTER_` prefix, e.g. `MERKLEKV_CLUSTER_TIMEOUT_MS=2500`.
//! Keys inside a table are joined with a double underscore:
//! `MERKLEKV_CLUSTER_POLICY__KIND=first_working` sets `policy.kind`.
//!
//! ## Example Configuration File (cluster.toml)
//! ```toml
//! nodes = ["10.0.0.1:7379", "10.0.0.2:7379", "10.0.0.3:7379"]
//! timeout_ms = 2000
//! retry_count = -1
//! pool_size = 256
//!
//! [policy]
//! kind = "sequential_working"
//! unhealthy_threshold = 3
//! recovery_window_ms = 30000
//! ```

use config::{Config as ConfigLib, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::address::NodeAddress;
use crate::cluster::ClusterBuilder;
use crate::error::{Error, Result};
use crate::policy::PolicyKind;

/// Prefix for environment overrides.
pub const ENV_PREFIX: &str = "MERKLEKV_CLUSTER";

/// Settings for a cluster client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// Storage nodes as "host:port"
    pub nodes: Vec<String>,

    /// Deadline for each call on a node, in milliseconds
    pub timeout_ms: u64,

    /// Retries per operation: absent for none, -1 for one per other node
    pub retry_count: Option<i32>,

    /// Node selection policy
    pub policy: PolicyConfig,

    /// Expected encoded key width; checked against the key codec
    pub key_width: Option<usize>,

    /// Buffer pool override: absent to share the process-wide pool,
    /// zero or less to disable pooling, positive for a private pool
    pub pool_size: Option<i64>,
}

/// Selection policy settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    /// "sequential", "first_working" or "sequential_working"
    pub kind: String,

    /// Consecutive errors at which a node is skipped (sequential_working)
    pub unhealthy_threshold: u64,

    /// How long a failing node is skipped after its last call (sequential_working)
    pub recovery_window_ms: u64,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            kind: "sequential".to_string(),
            unhealthy_threshold: 3,
            recovery_window_ms: 30_000,
        }
    }
}

impl Default for ClusterConfig {
    /// A single local node on the default MerkleKV port, 5 second timeout,
    /// no retries, round-robin selection, shared buffer pool.
    fn default() -> Self {
        Self {
            nodes: vec!["127.0.0.1:7379".to_string()],
            timeout_ms: 5_000,
            retry_count: None,
            policy: PolicyConfig::default(),
            key_width: None,
            pool_size: None,
        }
    }
}

impl ClusterConfig {
    /// Load configuration from a TOML file, then apply environment overrides.
    ///
    /// # Arguments
    /// * `path` - Path to the configuration file
    ///
    /// # Returns
    /// * `Result<ClusterConfig>` - Parsed and validated configuration
    pub fn load(path: &Path) -> Result<Self> {
        Self::load_with_prefix(path, ENV_PREFIX)
    }

    fn load_with_prefix(path: &Path, prefix: &str) -> Result<Self> {
        let environment = Environment::with_prefix(prefix)
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true);
        let settings = ConfigLib::builder()
            .add_source(File::from(path).format(FileFormat::Toml))
            .add_source(environment)
            .build()?;

        let config: ClusterConfig = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Check the settings without building anything.
    pub fn validate(&self) -> Result<()> {
        if self.nodes.is_empty() {
            return Err(Error::configuration("at least one node must be configured"));
        }
        if self.timeout_ms == 0 {
            return Err(Error::configuration("timeout_ms must be greater than zero"));
        }
        self.node_addresses()?;
        self.policy_kind()?.validate()?;
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Parse the node list.
    pub fn node_addresses(&self) -> Result<Vec<NodeAddress>> {
        self.nodes.iter().map(|node| node.parse()).collect()
    }

    pub fn policy_kind(&self) -> Result<PolicyKind> {
        match self.policy.kind.as_str() {
            "sequential" => Ok(PolicyKind::Sequential),
            "first_working" => Ok(PolicyKind::FirstWorking),
            "sequential_working" => Ok(PolicyKind::SequentialWorking {
                unhealthy_threshold: self.policy.unhealthy_threshold,
                recovery_window: Duration::from_millis(self.policy.recovery_window_ms),
            }),
            other => Err(Error::configuration(format!(
                "unknown selection policy '{}'",
                other
            ))),
        }
    }

    /// Copy every setting except the node list onto `builder`.
    pub fn apply<K: 'static>(&self, builder: ClusterBuilder<K>) -> Result<ClusterBuilder<K>> {
        let mut builder = builder
            .timeout(self.timeout())
            .selection_policy(self.policy_kind()?)
            .retry_count(self.retry_count)
            .pool_size(self.pool_size);
        if let Some(width) = self.key_width {
            builder = builder.key_width(width);
        }
        Ok(builder)
    }

    /// A builder for default-codec keys over the configured nodes.
    pub fn builder<K: crate::key::DefaultKeySerializer>(&self) -> Result<ClusterBuilder<K>> {
        self.apply(ClusterBuilder::new(self.node_addresses()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{MemoryNode, MemoryTransport};
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_config(contents: &str) -> NamedTempFile {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(temp_file.as_file_mut(), "{}", contents).unwrap();
        temp_file
    }

    #[test]
    fn test_config_load() {
        let file = write_config(
            r#"
nodes = ["10.0.0.1:7379", "10.0.0.2:7380"]
timeout_ms = 1500
retry_count = -1

[policy]
kind = "sequential_working"
unhealthy_threshold = 5
recovery_window_ms = 2000
            "#,
        );

        let config = ClusterConfig::load(file.path()).unwrap();
        assert_eq!(
            config.node_addresses().unwrap(),
            vec![NodeAddress::new("10.0.0.1", 7379), NodeAddress::new("10.0.0.2", 7380)]
        );
        assert_eq!(config.timeout(), Duration::from_millis(1500));
        assert_eq!(config.retry_count, Some(-1));
        assert_eq!(
            config.policy_kind().unwrap(),
            PolicyKind::SequentialWorking {
                unhealthy_threshold: 5,
                recovery_window: Duration::from_secs(2),
            }
        );
    }

    #[test]
    fn test_missing_fields_use_defaults() {
        let file = write_config(r#"nodes = ["node-a:7000"]"#);
        let config = ClusterConfig::load(file.path()).unwrap();
        assert_eq!(config.policy, PolicyConfig::default());
        assert_eq!(config.policy_kind().unwrap(), PolicyKind::Sequential);
        assert_eq!(config.key_width, None);
    }

    #[test]
    fn test_environment_override() {
        std::env::set_var("MERKLEKV_CLUSTER_POOL_SIZE", "64");
        let file = write_config(r#"nodes = ["node-a:7000"]"#);
        let config = ClusterConfig::load(file.path()).unwrap();
        std::env::remove_var("MERKLEKV_CLUSTER_POOL_SIZE");
        assert_eq!(config.pool_size, Some(64));
    }

    #[test]
    fn test_environment_overrides_policy_table() {
        let prefix = "MERKLEKV_CLUSTER_NESTED_TEST";
        std::env::set_var("MERKLEKV_CLUSTER_NESTED_TEST_POLICY__KIND", "sequential_working");
        std::env::set_var("MERKLEKV_CLUSTER_NESTED_TEST_POLICY__UNHEALTHY_THRESHOLD", "7");
        std::env::set_var("MERKLEKV_CLUSTER_NESTED_TEST_TIMEOUT_MS", "900");
        let file = write_config(
            r#"
nodes = ["node-a:7000"]

[policy]
kind = "first_working"
recovery_window_ms = 4000
            "#,
        );
        let config = ClusterConfig::load_with_prefix(file.path(), prefix).unwrap();
        std::env::remove_var("MERKLEKV_CLUSTER_NESTED_TEST_POLICY__KIND");
        std::env::remove_var("MERKLEKV_CLUSTER_NESTED_TEST_POLICY__UNHEALTHY_THRESHOLD");
        std::env::remove_var("MERKLEKV_CLUSTER_NESTED_TEST_TIMEOUT_MS");

        assert_eq!(config.timeout_ms, 900);
        assert_eq!(
            config.policy_kind().unwrap(),
            PolicyKind::SequentialWorking {
                unhealthy_threshold: 7,
                recovery_window: Duration::from_secs(4),
            }
        );
    }

    #[test]
    fn test_invalid_settings_rejected() {
        let mut config = ClusterConfig::default();
        config.nodes.clear();
        assert!(matches!(config.validate(), Err(Error::Configuration { .. })));

        let mut config = ClusterConfig::default();
        config.nodes.push("no-port".to_string());
        assert!(matches!(config.validate(), Err(Error::Configuration { .. })));

        let mut config = ClusterConfig::default();
        config.policy.kind = "random".to_string();
        assert!(matches!(config.validate(), Err(Error::Configuration { .. })));

        let mut config = ClusterConfig::default();
        config.policy.kind = "sequential_working".to_string();
        config.policy.unhealthy_threshold = 0;
        assert!(matches!(config.validate(), Err(Error::Configuration { .. })));
        let builder = config.builder::<u32>().unwrap();
        assert!(builder
            .build(|_| MemoryTransport::new(MemoryNode::new()))
            .is_err());

        let file = write_config("timeout_ms = 0");
        assert!(ClusterConfig::load(file.path()).is_err());
    }

    #[test]
    fn test_malformed_file_is_config_error() {
        let file = write_config("nodes = [unterminated");
        assert!(matches!(ClusterConfig::load(file.path()), Err(Error::Config(_))));
    }

    #[test]
    fn test_apply_to_builder() {
        let config = ClusterConfig {
            nodes: vec!["a:1".into(), "b:2".into(), "c:3".into()],
            timeout_ms: 250,
            retry_count: Some(-1),
            key_width: Some(8),
            pool_size: Some(4),
            ..ClusterConfig::default()
        };

        let cluster = config
            .builder::<u64>()
            .unwrap()
            .build(|_| MemoryTransport::new(MemoryNode::new()))
            .unwrap();
        assert_eq!(cluster.retry_budget(), 2);
        assert_eq!(cluster.nodes()[0].timeout(), Duration::from_millis(250));
        assert_eq!(cluster.pool().capacity(), 4);

        let mismatched = ClusterConfig {
            key_width: Some(4),
            ..config
        };
        assert!(mismatched
            .builder::<u64>()
            .unwrap()
            .build(|_| MemoryTransport::new(MemoryNode::new()))
            .is_err());
    }

    #[test]
    fn test_round_trips_through_serde() {
        let config = ClusterConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let back: ClusterConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);
    }
}
