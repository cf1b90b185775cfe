//! Round-robin selection.

use std::sync::atomic::{AtomicUsize, Ordering};

use super::{OperationKind, SelectionPolicy};
use crate::node::NodeHealth;

/// Hands out nodes in turn, regardless of health. A retry moves to the next
/// node after the one that failed; this policy never stops retrying.
#[derive(Debug, Default)]
pub struct Sequential {
    next: AtomicUsize,
}

impl Sequential {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SelectionPolicy for Sequential {
    fn select_fresh(&self, nodes: &[NodeHealth], _operation: OperationKind, _key: &[u8]) -> usize {
        match nodes.len() {
            0 => 0,
            n => self.next.fetch_add(1, Ordering::Relaxed) % n,
        }
    }

    fn select_on_retry(
        &self,
        nodes: &[NodeHealth],
        previous: usize,
        _operation: OperationKind,
        _key: &[u8],
    ) -> Option<usize> {
        Some((previous + 1) % nodes.len().max(1))
    }
}
