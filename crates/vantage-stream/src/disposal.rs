//! Throttled eviction queue in front of the disposal worker.

use std::collections::VecDeque;

use rustc_hash::FxHashSet;
use tracing::trace;

use vantage_workers::{DispatchError, WorkerGateway};

/// Nodes forwarded to the disposal worker per dispatch.
const DISPOSAL_BATCH_SIZE: usize = 8;

/// Queues eviction requests and forwards them to the disposal worker in
/// batches, respecting its concurrency ceiling.
///
/// An `ActiveMesh` is destroyed only after the worker's terminal response
/// comes back through [`acknowledge`](Self::acknowledge) — never
/// speculatively at enqueue time.
#[derive(Default)]
pub struct DisposalCoordinator {
    queue: VecDeque<u64>,
    queued: FxHashSet<u64>,
    in_flight: FxHashSet<u64>,
}

impl DisposalCoordinator {
    /// Create an empty coordinator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a node for eviction. Duplicates of queued or in-flight
    /// evictions are ignored.
    pub fn enqueue(&mut self, node: u64) {
        if self.queued.insert(node) && !self.in_flight.contains(&node) {
            self.queue.push_back(node);
        }
    }

    /// Whether this node has an eviction queued or in flight.
    pub fn is_pending(&self, node: u64) -> bool {
        self.queued.contains(&node) || self.in_flight.contains(&node)
    }

    /// Queued plus in-flight evictions.
    pub fn pending_count(&self) -> usize {
        self.queue.len() + self.in_flight.len()
    }

    /// Forward queued evictions to the disposal worker, one batch per
    /// dispatch, until its ceiling refuses.
    ///
    /// With a degraded gateway the batch is returned directly as already
    /// disposed, so eviction still works (synchronously) with zero
    /// workers available.
    pub fn pump(&mut self, gateway: &mut WorkerGateway) -> Vec<u64> {
        let mut locally_disposed = Vec::new();

        while !self.queue.is_empty() {
            let take = self.queue.len().min(DISPOSAL_BATCH_SIZE);
            let batch: Vec<u64> = self.queue.iter().take(take).copied().collect();

            match gateway.dispatch_dispose(batch.clone(), 1.0) {
                Ok(_) => {
                    for node in batch {
                        self.queue.pop_front();
                        self.queued.remove(&node);
                        self.in_flight.insert(node);
                    }
                }
                Err(DispatchError::AtCapacity(_)) => break,
                Err(_) => {
                    // No disposal worker: evict inline.
                    trace!(count = batch.len(), "disposal worker unavailable, evicting inline");
                    for node in batch {
                        self.queue.pop_front();
                        self.queued.remove(&node);
                        locally_disposed.push(node);
                    }
                }
            }
        }

        locally_disposed
    }

    /// Record the worker's terminal response for a batch. Returns the
    /// nodes whose resources may now be destroyed.
    pub fn acknowledge(&mut self, disposed: &[u64]) -> Vec<u64> {
        let mut confirmed = Vec::with_capacity(disposed.len());
        for &node in disposed {
            if self.in_flight.remove(&node) {
                confirmed.push(node);
            } else {
                trace!(node, "disposal ack for node not in flight");
                confirmed.push(node);
            }
        }
        confirmed
    }

    /// Drop all queued (not yet dispatched) evictions.
    pub fn clear(&mut self) {
        self.queue.clear();
        self.queued.clear();
        self.in_flight.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Duplicates are ignored while queued or in flight.
    #[test]
    fn test_enqueue_deduplicates() {
        let mut coordinator = DisposalCoordinator::new();
        coordinator.enqueue(1);
        coordinator.enqueue(1);
        assert_eq!(coordinator.pending_count(), 1);
        assert!(coordinator.is_pending(1));
    }

    /// A degraded gateway evicts inline instead of leaking.
    #[test]
    fn test_degraded_gateway_evicts_inline() {
        let mut coordinator = DisposalCoordinator::new();
        let mut gateway = WorkerGateway::degraded();
        coordinator.enqueue(1);
        coordinator.enqueue(2);

        let disposed = coordinator.pump(&mut gateway);
        assert_eq!(disposed, vec![1, 2]);
        assert_eq!(coordinator.pending_count(), 0);
    }

    /// Acknowledgment clears in-flight tracking and confirms destruction.
    #[test]
    fn test_acknowledge_confirms_destruction() {
        let mut coordinator = DisposalCoordinator::new();
        coordinator.enqueue(5);
        // Simulate a successful dispatch.
        coordinator.queue.pop_front();
        coordinator.queued.remove(&5);
        coordinator.in_flight.insert(5);

        assert!(coordinator.is_pending(5));
        let confirmed = coordinator.acknowledge(&[5]);
        assert_eq!(confirmed, vec![5]);
        assert!(!coordinator.is_pending(5));
    }
}
