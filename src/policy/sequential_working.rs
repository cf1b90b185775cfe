//! Round-robin selection that skips unhealthy nodes.
//!
//! A node is skipped when it is shut down, or when it has at least
//! `unhealthy_threshold` consecutive errors and was last used no longer than
//! `recovery_window` ago. Once the window has passed the node is offered
//! again even though its error count is still high; one good call then
//! clears the count. A zero window disables skipping on errors.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use super::{OperationKind, SelectionPolicy};
use crate::node::{ConnectionState, NodeHealth};

/// Health-aware round-robin.
///
/// A retry always moves to a different node, so `select_on_retry` stops the
/// operation when no other node is usable. On a single-node cluster that
/// means the first failure is final and any configured retry budget is
/// never spent.
#[derive(Debug)]
pub struct SequentialWorking {
    next: AtomicUsize,
    unhealthy_threshold: u64,
    recovery_window: Duration,
}

impl SequentialWorking {
    pub fn new(unhealthy_threshold: u64, recovery_window: Duration) -> Self {
        Self {
            next: AtomicUsize::new(0),
            unhealthy_threshold,
            recovery_window,
        }
    }

    pub fn unhealthy_threshold(&self) -> u64 {
        self.unhealthy_threshold
    }

    pub fn recovery_window(&self) -> Duration {
        self.recovery_window
    }

    pub fn is_usable(&self, health: &NodeHealth) -> bool {
        if health.state == ConnectionState::Shutdown {
            return false;
        }
        if self.recovery_window.is_zero() {
            return true;
        }
        !(health.consecutive_errors >= self.unhealthy_threshold
            && health.since_last_operation <= self.recovery_window)
    }
}

impl SelectionPolicy for SequentialWorking {
    /// Next node in turn that is usable; if none is, the node whose turn it
    /// was.
    fn select_fresh(&self, nodes: &[NodeHealth], _operation: OperationKind, _key: &[u8]) -> usize {
        let n = nodes.len();
        if n == 0 {
            return 0;
        }
        let start = self.next.fetch_add(1, Ordering::Relaxed) % n;
        (0..n)
            .map(|step| (start + step) % n)
            .find(|&index| self.is_usable(&nodes[index]))
            .unwrap_or(start)
    }

    /// Next usable node after `previous`, or stop when there is none.
    fn select_on_retry(
        &self,
        nodes: &[NodeHealth],
        previous: usize,
        _operation: OperationKind,
        _key: &[u8],
    ) -> Option<usize> {
        let n = nodes.len();
        (1..n)
            .map(|step| (previous + step) % n)
            .find(|&index| self.is_usable(&nodes[index]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::test_support::{failing, healthy};

    fn policy() -> SequentialWorking {
        SequentialWorking::new(3, Duration::from_secs(10))
    }

    #[test]
    fn test_rotates_over_healthy_nodes() {
        let policy = policy();
        let nodes = healthy(3);
        let picks: Vec<usize> = (0..6)
            .map(|_| policy.select_fresh(&nodes, OperationKind::Get, b"k"))
            .collect();
        assert_eq!(picks, vec![0, 1, 2, 0, 1, 2]);
    }

    #[test]
    fn test_skips_node_over_threshold_inside_window() {
        let policy = policy();
        let mut nodes = healthy(3);
        nodes[1] = failing(3, Duration::from_secs(1));

        let picks: Vec<usize> = (0..3)
            .map(|_| policy.select_fresh(&nodes, OperationKind::Put, b"k"))
            .collect();
        assert_eq!(picks, vec![0, 2, 2]);
    }

    #[test]
    fn test_below_threshold_is_still_used() {
        let policy = policy();
        let nodes = vec![failing(2, Duration::ZERO)];
        assert!(policy.is_usable(&nodes[0]));
    }

    #[test]
    fn test_node_recovers_after_window() {
        let policy = policy();
        assert!(!policy.is_usable(&failing(50, Duration::from_secs(5))));
        assert!(policy.is_usable(&failing(50, Duration::from_secs(11))));
    }

    #[test]
    fn test_zero_window_never_skips_on_errors() {
        let policy = SequentialWorking::new(1, Duration::ZERO);
        assert!(policy.is_usable(&failing(100, Duration::ZERO)));
    }

    #[test]
    fn test_shutdown_always_skipped() {
        let policy = SequentialWorking::new(1, Duration::ZERO);
        let mut nodes = healthy(2);
        nodes[0].state = ConnectionState::Shutdown;
        assert!(!policy.is_usable(&nodes[0]));
        assert_eq!(policy.select_fresh(&nodes, OperationKind::Get, b"k"), 1);
        assert_eq!(policy.select_fresh(&nodes, OperationKind::Get, b"k"), 1);
    }

    #[test]
    fn test_fresh_falls_back_when_nothing_usable() {
        let policy = policy();
        let nodes = vec![failing(5, Duration::ZERO); 2];
        assert_eq!(policy.select_fresh(&nodes, OperationKind::Get, b"k"), 0);
        assert_eq!(policy.select_fresh(&nodes, OperationKind::Get, b"k"), 1);
    }

    #[test]
    fn test_retry_stops_without_alternative() {
        let policy = policy();
        let mut nodes = healthy(3);
        nodes[0] = failing(3, Duration::ZERO);
        nodes[2] = failing(3, Duration::ZERO);

        assert_eq!(policy.select_on_retry(&nodes, 0, OperationKind::Get, b"k"), Some(1));

        nodes[1] = failing(3, Duration::ZERO);
        assert_eq!(policy.select_on_retry(&nodes, 1, OperationKind::Get, b"k"), None);
        assert_eq!(policy.select_on_retry(&healthy(1), 0, OperationKind::Get, b"k"), None);
    }

    #[test]
    fn test_single_node_never_retries() {
        let policy = policy();
        let nodes = healthy(1);
        assert_eq!(policy.select_fresh(&nodes, OperationKind::Put, b"k"), 0);
        assert_eq!(policy.select_on_retry(&nodes, 0, OperationKind::Put, b"k"), None);
    }
}
