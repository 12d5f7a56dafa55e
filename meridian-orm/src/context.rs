//! # Context
//!
//! A single injected value owning every process-wide mutable table
//! (connection pools, health monitors, load balancers, polymorphic types,
//! shard configs) instead of scattering them across class-level
//! singletons, with per-test isolation via `Context::new_for_test()`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::time::Instant;

use crate::association::PolymorphicRegistry;
use crate::balancer::ReplicaLoadBalancer;
use crate::registry::ConnectionRegistry;
use crate::sharding::ShardRegistry;

/// Default "sticky to primary" window: how long reads against a
/// `(database, shard)` pair are routed to the writer after the last write
/// there, to avoid reading a replica that hasn't caught up yet.
const DEFAULT_CONNECTION_SWITCH_WAIT_PERIOD: Duration = Duration::from_secs(2);

/// Process-scoped service locator owning every table the ORM would
/// otherwise keep as class-level mutable singletons: the connection
/// registry, per-database replica balancers, the polymorphic type
/// registry, and shard configuration. One `Context` per process in
/// production; `Context::new_for_test()` gives each test its own isolated
/// instance so tests never share pools or registries.
#[derive(Clone)]
pub struct Context {
    inner: Arc<ContextInner>,
}

struct ContextInner {
    connections: ConnectionRegistry,
    balancers: RwLock<HashMap<String, ReplicaLoadBalancer>>,
    polymorphic_types: PolymorphicRegistry,
    shards: RwLock<HashMap<String, ShardRegistry>>,
    test_mode: bool,
    last_write: RwLock<HashMap<String, Instant>>,
    connection_switch_wait_period: Duration,
}

impl Context {
    /// Creates a production context: health monitors run as background
    /// tasks.
    pub fn new() -> Self {
        Self::build(false, DEFAULT_CONNECTION_SWITCH_WAIT_PERIOD)
    }

    /// Creates an isolated context for a single test: health monitors are
    /// disabled (background probing has no place in test mode), and no
    /// state is shared with any other `Context`.
    pub fn new_for_test() -> Self {
        Self::build(true, DEFAULT_CONNECTION_SWITCH_WAIT_PERIOD)
    }

    /// Creates a production context with a non-default "sticky to primary"
    /// window (see `Base::connected_to`).
    pub fn new_with_wait_period(wait_period: Duration) -> Self {
        Self::build(false, wait_period)
    }

    fn build(test_mode: bool, connection_switch_wait_period: Duration) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                connections: ConnectionRegistry::new(test_mode),
                balancers: RwLock::new(HashMap::new()),
                polymorphic_types: PolymorphicRegistry::new(),
                shards: RwLock::new(HashMap::new()),
                test_mode,
                last_write: RwLock::new(HashMap::new()),
                connection_switch_wait_period,
            }),
        }
    }

    pub fn test_mode(&self) -> bool {
        self.inner.test_mode
    }

    pub fn connection_switch_wait_period(&self) -> Duration {
        self.inner.connection_switch_wait_period
    }

    /// Records that a write just happened against `key` (normally
    /// `database` or `database:shard`), so subsequent reads within the
    /// sticky window route to the writer instead of a replica.
    pub async fn record_write(&self, key: &str) {
        self.inner.last_write.write().await.insert(key.to_string(), Instant::now());
    }

    /// `true` if `key` saw a write within the sticky window, meaning reads
    /// against it should still be routed to the writer.
    pub async fn recently_written(&self, key: &str) -> bool {
        let guard = self.inner.last_write.read().await;
        match guard.get(key) {
            Some(at) => at.elapsed() < self.inner.connection_switch_wait_period,
            None => false,
        }
    }

    pub fn connections(&self) -> &ConnectionRegistry {
        &self.inner.connections
    }

    pub fn polymorphic_types(&self) -> &PolymorphicRegistry {
        &self.inner.polymorphic_types
    }

    /// The replica load balancer for `database`, creating one (with the
    /// given strategy) on first access.
    pub async fn balancer_for(
        &self,
        database: &str,
        strategy: crate::balancer::BalanceStrategy,
    ) -> ReplicaLoadBalancer {
        let mut balancers = self.inner.balancers.write().await;
        balancers.entry(database.to_string()).or_insert_with(|| ReplicaLoadBalancer::new(strategy)).clone()
    }

    /// The shard registry for `database`, creating an empty one on first
    /// access.
    pub async fn shards_for(&self, database: &str) -> ShardRegistry {
        let mut shards = self.inner.shards.write().await;
        shards.entry(database.to_string()).or_insert_with(ShardRegistry::new).clone()
    }

    /// Stops every health monitor, drops every balancer and shard registry,
    /// and closes every pool.
    pub async fn clear_all(&self) {
        self.inner.connections.clear_all().await;
        self.inner.balancers.write().await.clear();
        self.inner.shards.write().await.clear();
        self.inner.last_write.write().await.clear();
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_context_is_isolated_and_disables_monitors() {
        let ctx = Context::new_for_test();
        assert!(ctx.test_mode());
        ctx.clear_all().await;
    }

    #[tokio::test]
    async fn recently_written_is_true_only_within_the_wait_period() {
        let ctx = Context::new_with_wait_period(Duration::from_millis(20));
        assert!(!ctx.recently_written("primary").await);
        ctx.record_write("primary").await;
        assert!(ctx.recently_written("primary").await);
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(!ctx.recently_written("primary").await);
    }
}
