//! Sticky selection of the first healthy node.
//!
//! Every caller is steered to the same node while that node stays healthy.
//! When it is not, the policy scans forward for the next healthy node and
//! moves the shared pointer there. If no node is healthy, it still picks the
//! node after the pointer: an attempt on a suspect node beats refusing the
//! operation outright.

use std::sync::atomic::{AtomicUsize, Ordering};

use super::{OperationKind, SelectionPolicy};
use crate::node::{ConnectionState, NodeHealth};

#[derive(Debug, Default)]
pub struct FirstWorking {
    current: AtomicUsize,
}

impl FirstWorking {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index of the node currently preferred.
    pub fn current(&self) -> usize {
        self.current.load(Ordering::Acquire)
    }

    fn is_healthy(health: &NodeHealth) -> bool {
        !matches!(
            health.state,
            ConnectionState::TransientFailure | ConnectionState::Shutdown
        ) && health.consecutive_errors == 0
    }

    /// First healthy node after `from`, moving the pointer off `from` when
    /// found. Falls back to the node right after `from`.
    fn advance(&self, nodes: &[NodeHealth], from: usize) -> usize {
        let n = nodes.len();
        let next = (1..n)
            .map(|step| (from + step) % n)
            .find(|&index| Self::is_healthy(&nodes[index]))
            .unwrap_or((from + 1) % n);
        // Losing the race means another caller already moved the pointer.
        let _ = self
            .current
            .compare_exchange(from, next, Ordering::AcqRel, Ordering::Acquire);
        next
    }
}

impl SelectionPolicy for FirstWorking {
    fn select_fresh(&self, nodes: &[NodeHealth], _operation: OperationKind, _key: &[u8]) -> usize {
        let n = nodes.len();
        if n == 0 {
            return 0;
        }
        let current = self.current.load(Ordering::Acquire) % n;
        if Self::is_healthy(&nodes[current]) {
            return current;
        }
        self.advance(nodes, current)
    }

    fn select_on_retry(
        &self,
        nodes: &[NodeHealth],
        previous: usize,
        _operation: OperationKind,
        _key: &[u8],
    ) -> Option<usize> {
        match nodes.len() {
            0 => None,
            n => Some(self.advance(nodes, previous % n)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::test_support::{failing, healthy};
    use std::time::Duration;

    #[test]
    fn test_sticks_to_healthy_node() {
        let policy = FirstWorking::new();
        let nodes = healthy(3);
        for _ in 0..10 {
            assert_eq!(policy.select_fresh(&nodes, OperationKind::Get, b"k"), 0);
        }
    }

    #[test]
    fn test_moves_past_unhealthy_nodes() {
        let policy = FirstWorking::new();
        let mut nodes = healthy(3);
        nodes[0] = failing(1, Duration::ZERO);
        nodes[1] = failing(2, Duration::ZERO);

        assert_eq!(policy.select_fresh(&nodes, OperationKind::Put, b"k"), 2);
        assert_eq!(policy.current(), 2);

        // Node 0 recovering does not pull the pointer back.
        nodes[0] = NodeHealth::ready();
        assert_eq!(policy.select_fresh(&nodes, OperationKind::Put, b"k"), 2);
    }

    #[test]
    fn test_errors_alone_make_node_unhealthy() {
        let policy = FirstWorking::new();
        let mut nodes = healthy(2);
        nodes[0].consecutive_errors = 1;
        assert_eq!(policy.select_fresh(&nodes, OperationKind::Get, b"k"), 1);
    }

    #[test]
    fn test_falls_back_when_none_healthy() {
        let policy = FirstWorking::new();
        let nodes = vec![failing(1, Duration::ZERO), failing(1, Duration::ZERO)];
        assert_eq!(policy.select_fresh(&nodes, OperationKind::Get, b"k"), 1);
        assert_eq!(policy.select_fresh(&nodes, OperationKind::Get, b"k"), 0);

        let single = vec![failing(1, Duration::ZERO)];
        assert_eq!(policy.select_fresh(&single, OperationKind::Get, b"k"), 0);
    }

    #[test]
    fn test_retry_scans_from_failed_node() {
        let policy = FirstWorking::new();
        let mut nodes = healthy(3);
        nodes[0] = failing(1, Duration::ZERO);

        assert_eq!(policy.select_on_retry(&nodes, 0, OperationKind::Put, b"k"), Some(1));
        assert_eq!(policy.current(), 1);
        assert_eq!(policy.select_fresh(&nodes, OperationKind::Put, b"k"), 1);
    }

    #[test]
    fn test_retry_never_stops() {
        let policy = FirstWorking::new();
        let nodes = vec![failing(3, Duration::ZERO); 2];
        assert_eq!(policy.select_on_retry(&nodes, 0, OperationKind::Get, b"k"), Some(1));
        assert_eq!(policy.select_on_retry(&nodes, 1, OperationKind::Get, b"k"), Some(0));
    }
}
