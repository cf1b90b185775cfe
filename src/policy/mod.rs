//! # Node Selection Policies
//!
//! A selection policy decides which node serves an attempt. The cluster
//! client asks it once per operation (`select_fresh`) and again after every
//! retryable failure (`select_on_retry`).
//!
//! - **`sequential`**: plain round-robin, ignores health
//! - **`first_working`**: sticks to the last healthy node
//! - **`sequential_working`**: round-robin that skips unhealthy nodes, with a
//!   recovery window so a failed node is eventually tried again
//!
//! Policies are shared by every caller of a cluster client. Their only
//! mutable state is a counter or pointer updated with atomics, so selection
//! never takes a lock.

pub mod first_working;
pub mod sequential;
pub mod sequential_working;

use std::time::Duration;

use crate::error::{Error, Result};
use crate::node::NodeHealth;

pub use first_working::FirstWorking;
pub use sequential::Sequential;
pub use sequential_working::SequentialWorking;

/// The operation an attempt belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    Put,
    Get,
    Exists,
}

/// Interface every node selection algorithm implements.
///
/// `nodes` is a health snapshot of the cluster's node list, in the order the
/// nodes were configured. It is never empty. Returned indices are taken
/// modulo the node count by the caller.
#[cfg_attr(test, mockall::automock)]
pub trait SelectionPolicy: Send + Sync {
    /// Pick the node for the first attempt of an operation.
    ///
    /// # Arguments
    /// * `nodes` - Health of every node, in configuration order
    /// * `operation` - The operation being attempted
    /// * `key` - The encoded key (first key of a batch)
    fn select_fresh(&self, nodes: &[NodeHealth], operation: OperationKind, key: &[u8]) -> usize;

    /// Pick the node for a retry after the attempt on `previous` failed.
    ///
    /// # Returns
    /// * `Option<usize>` - The next node, or `None` to stop retrying
    fn select_on_retry(
        &self,
        nodes: &[NodeHealth],
        previous: usize,
        operation: OperationKind,
        key: &[u8],
    ) -> Option<usize>;
}

/// The built-in policies, with their parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PolicyKind {
    #[default]
    Sequential,
    FirstWorking,
    SequentialWorking {
        /// Consecutive errors at which a node counts as unhealthy
        unhealthy_threshold: u64,
        /// How long after its last call an unhealthy node is skipped
        recovery_window: Duration,
    },
}

impl PolicyKind {
    /// Create a fresh policy instance of this kind.
    pub fn build(&self) -> Box<dyn SelectionPolicy> {
        match *self {
            PolicyKind::Sequential => Box::new(Sequential::new()),
            PolicyKind::FirstWorking => Box::new(FirstWorking::new()),
            PolicyKind::SequentialWorking {
                unhealthy_threshold,
                recovery_window,
            } => Box::new(SequentialWorking::new(unhealthy_threshold, recovery_window)),
        }
    }

    /// Reject parameters that would make the policy unusable.
    ///
    /// A zero `unhealthy_threshold` marks every node as unhealthy, which
    /// silently turns retries off.
    pub fn validate(&self) -> Result<()> {
        match *self {
            PolicyKind::SequentialWorking {
                unhealthy_threshold: 0,
                ..
            } => Err(Error::configuration(
                "sequential_working needs an unhealthy threshold of at least 1",
            )),
            _ => Ok(()),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            PolicyKind::Sequential => "sequential",
            PolicyKind::FirstWorking => "first_working",
            PolicyKind::SequentialWorking { .. } => "sequential_working",
        }
    }
}
