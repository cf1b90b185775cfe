//! # Node Addresses
//!
//! A `NodeAddress` names one endpoint of the storage cluster. Addresses are
//! immutable and compare by case-insensitive host plus port, so
//! `"Node-A:7379"` and `"node-a:7379"` refer to the same node.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use crate::error::Error;

/// Host/port pair identifying a storage node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeAddress {
    host: String,
    port: u16,
}

impl NodeAddress {
    /// Create a new address.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

impl PartialEq for NodeAddress {
    fn eq(&self, other: &Self) -> bool {
        self.port == other.port && self.host.eq_ignore_ascii_case(&other.host)
    }
}

impl Eq for NodeAddress {}

impl Hash for NodeAddress {
    fn hash<H: Hasher>(&self, state: &mut H) {
        // Must agree with the case-insensitive `eq` above.
        for b in self.host.bytes() {
            state.write_u8(b.to_ascii_lowercase());
        }
        state.write_u16(self.port);
    }
}

impl fmt::Display for NodeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Parses the `host:port` form used in configuration files.
impl FromStr for NodeAddress {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| Error::configuration(format!("node address '{}' is not host:port", s)))?;
        if host.is_empty() {
            return Err(Error::configuration(format!("node address '{}' has an empty host", s)));
        }
        let port = port
            .parse::<u16>()
            .map_err(|_| Error::configuration(format!("node address '{}' has an invalid port", s)))?;
        Ok(Self::new(host, port))
    }
}
