//! # Replica Load Balancer
//!
//! Holds an ordered list of replica adapters and their health state,
//! returning the next healthy one per a configured strategy, via an
//! atomic-counters-plus-health-snapshot design over `Adapter`.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use rand::Rng;
use tokio::sync::RwLock;

use crate::adapter::Adapter;

/// The strategy a `ReplicaLoadBalancer` uses to pick among healthy replicas.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BalanceStrategy {
    RoundRobin,
    Random,
    LeastConnections,
}

struct Replica {
    adapter: Adapter,
    healthy: bool,
    in_use: AtomicU64,
}

/// Picks among healthy replica adapters for a single logical database.
/// `least-connections` only stays accurate when callers pair every
/// `next_replica()` with a matching `release()`; short exec paths that
/// can't guarantee that should prefer round-robin instead.
#[derive(Clone)]
pub struct ReplicaLoadBalancer {
    inner: Arc<Inner>,
}

struct Inner {
    strategy: BalanceStrategy,
    replicas: RwLock<Vec<Replica>>,
    round_robin_idx: AtomicUsize,
}

impl ReplicaLoadBalancer {
    pub fn new(strategy: BalanceStrategy) -> Self {
        Self { inner: Arc::new(Inner { strategy, replicas: RwLock::new(Vec::new()), round_robin_idx: AtomicUsize::new(0) }) }
    }

    pub async fn register(&self, adapter: Adapter) {
        let mut replicas = self.inner.replicas.write().await;
        replicas.push(Replica { adapter, healthy: true, in_use: AtomicU64::new(0) });
    }

    pub async fn mark_healthy(&self, index: usize, healthy: bool) {
        let mut replicas = self.inner.replicas.write().await;
        if let Some(r) = replicas.get_mut(index) {
            r.healthy = healthy;
        }
    }

    /// Returns the next healthy replica's `(index, Adapter)` per the
    /// configured strategy, or `None` if no replica is healthy (callers
    /// are expected to fall back to the registry's degrade chain).
    pub async fn next_replica(&self) -> Option<(usize, Adapter)> {
        let replicas = self.inner.replicas.read().await;
        let healthy_indices: Vec<usize> = replicas.iter().enumerate().filter(|(_, r)| r.healthy).map(|(i, _)| i).collect();
        if healthy_indices.is_empty() {
            return None;
        }

        let chosen = match self.inner.strategy {
            BalanceStrategy::RoundRobin => {
                let idx = self.inner.round_robin_idx.fetch_add(1, Ordering::Relaxed);
                healthy_indices[idx % healthy_indices.len()]
            }
            BalanceStrategy::Random => {
                let pick = rand::thread_rng().gen_range(0..healthy_indices.len());
                healthy_indices[pick]
            }
            BalanceStrategy::LeastConnections => *healthy_indices
                .iter()
                .min_by_key(|&&i| replicas[i].in_use.load(Ordering::Relaxed))
                .expect("healthy_indices is non-empty"),
        };

        if self.inner.strategy == BalanceStrategy::LeastConnections {
            replicas[chosen].in_use.fetch_add(1, Ordering::Relaxed);
        }
        Some((chosen, replicas[chosen].adapter.clone()))
    }

    /// Releases a least-connections checkout acquired via `next_replica`.
    /// Callers on long-lived streams should always pair this with their
    /// `next_replica` call; short exec paths may skip it at the cost of
    /// skewed in-use counts.
    pub async fn release(&self, index: usize) {
        let replicas = self.inner.replicas.read().await;
        if let Some(r) = replicas.get(index) {
            r.in_use.fetch_sub(1, Ordering::Relaxed);
        }
    }

    pub async fn healthy_count(&self) -> usize {
        self.inner.replicas.read().await.iter().filter(|r| r.healthy).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn round_robin_skips_unhealthy_and_wraps() {
        let balancer = ReplicaLoadBalancer::new(BalanceStrategy::RoundRobin);
        balancer.register(Adapter::builder().max_connections(1).connect("sqlite::memory:").await.unwrap()).await;
        balancer.register(Adapter::builder().max_connections(1).connect("sqlite::memory:").await.unwrap()).await;
        balancer.mark_healthy(0, false).await;
        let (idx, _) = balancer.next_replica().await.unwrap();
        assert_eq!(idx, 1);
        let (idx, _) = balancer.next_replica().await.unwrap();
        assert_eq!(idx, 1);
    }

    #[tokio::test]
    async fn empty_balancer_returns_none() {
        let balancer = ReplicaLoadBalancer::new(BalanceStrategy::Random);
        assert!(balancer.next_replica().await.is_none());
    }

    #[tokio::test]
    async fn least_connections_never_picks_a_replica_with_more_in_use_than_another() {
        let balancer = ReplicaLoadBalancer::new(BalanceStrategy::LeastConnections);
        balancer.register(Adapter::builder().max_connections(1).connect("sqlite::memory:").await.unwrap()).await;
        balancer.register(Adapter::builder().max_connections(1).connect("sqlite::memory:").await.unwrap()).await;

        // Load up replica 0 with two outstanding checkouts, then release one.
        let (first, _) = balancer.next_replica().await.unwrap();
        assert_eq!(first, 0);
        let (second, _) = balancer.next_replica().await.unwrap();
        assert_eq!(second, 1, "replica 1 has strictly fewer in-use connections and must be chosen");
        balancer.release(first).await;

        // Replica 0 is back to 0 in-use, replica 1 is at 1; the next pick
        // must never land on the replica with strictly more in-use than an
        // alternative.
        let (third, _) = balancer.next_replica().await.unwrap();
        assert_eq!(third, 0);
    }
}
