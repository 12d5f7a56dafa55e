//! # Connection Registry
//!
//! A process-wide store of pooled `Adapter`s keyed by `database:role[:shard]`,
//! generalizing a single-`Database`-per-process model to the multi-database
//! / read-write-split / sharded world this core targets.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;

use crate::adapter::Adapter;
use crate::error::Error;
use crate::health::HealthMonitor;

/// A connection's purpose within a logical database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Primary,
    Writing,
    Reading,
}

impl Role {
    fn as_str(&self) -> &'static str {
        match self {
            Role::Primary => "primary",
            Role::Writing => "writing",
            Role::Reading => "reading",
        }
    }

    /// The next role to fall back to when the requested one has no adapter:
    /// reading → writing → primary.
    fn degrade(&self) -> Option<Role> {
        match self {
            Role::Reading => Some(Role::Writing),
            Role::Writing => Some(Role::Primary),
            Role::Primary => None,
        }
    }
}

/// Pool sizing and retry knobs.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub max: u32,
    pub initial: u32,
    pub checkout_timeout: Duration,
    pub retries: u32,
    pub retry_delay: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self { max: 5, initial: 1, checkout_timeout: Duration::from_secs(5), retries: 1, retry_delay: Duration::from_millis(100) }
    }
}

/// Health monitor probe cadence.
#[derive(Debug, Clone)]
pub struct HealthConfig {
    pub interval: Duration,
    pub timeout: Duration,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self { interval: Duration::from_secs(10), timeout: Duration::from_secs(2) }
    }
}

/// A fully-specified connection to establish.
#[derive(Debug, Clone)]
pub struct ConnectionSpec {
    pub database: String,
    pub role: Role,
    pub shard: Option<String>,
    pub url: String,
    pub pool: PoolConfig,
    pub health: HealthConfig,
}

impl ConnectionSpec {
    pub fn new(database: impl Into<String>, role: Role, url: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            role,
            shard: None,
            url: url.into(),
            pool: PoolConfig::default(),
            health: HealthConfig::default(),
        }
    }

    pub fn shard(mut self, name: impl Into<String>) -> Self {
        self.shard = Some(name.into());
        self
    }

    pub fn pool(mut self, pool: PoolConfig) -> Self {
        self.pool = pool;
        self
    }

    pub fn health(mut self, health: HealthConfig) -> Self {
        self.health = health;
        self
    }

    /// The registry key: `database:role[:shard]`.
    pub fn key(&self) -> String {
        match &self.shard {
            Some(shard) => format!("{}:{}:{}", self.database, self.role.as_str(), shard),
            None => format!("{}:{}", self.database, self.role.as_str()),
        }
    }
}

struct Entry {
    adapter: Adapter,
    monitor: Option<HealthMonitor>,
}

/// The process-wide connection registry. Normally accessed
/// through a `Context`, never constructed directly by application code.
pub struct ConnectionRegistry {
    entries: RwLock<HashMap<String, Entry>>,
    test_mode: bool,
}

impl ConnectionRegistry {
    pub(crate) fn new(test_mode: bool) -> Self {
        Self { entries: RwLock::new(HashMap::new()), test_mode }
    }

    /// Creates (or replaces) a pool for `spec`. Attaches a health monitor
    /// unless the registry is in test mode. If `spec.role` is `Reading`,
    /// also registers the adapter with the database's replica load
    /// balancer — callers typically do this via `Context::balancer_for`
    /// immediately after `establish_connection` returns.
    pub async fn establish_connection(&self, spec: &ConnectionSpec) -> Result<Adapter, Error> {
        let adapter = Adapter::builder()
            .max_connections(spec.pool.max)
            .min_connections(spec.pool.initial)
            .acquire_timeout(spec.pool.checkout_timeout)
            .connect(&spec.url)
            .await?;

        let monitor = if self.test_mode {
            None
        } else {
            Some(HealthMonitor::spawn(adapter.clone(), spec.health.interval, spec.health.timeout))
        };

        let mut entries = self.entries.write().await;
        if let Some(old) = entries.insert(spec.key(), Entry { adapter: adapter.clone(), monitor }) {
            if let Some(old_monitor) = old.monitor {
                old_monitor.stop().await;
            }
        }
        Ok(adapter)
    }

    /// Bulk variant of `establish_connection`.
    pub async fn establish_connections(&self, specs: &[ConnectionSpec]) -> Result<Vec<Adapter>, Error> {
        let mut adapters = Vec::with_capacity(specs.len());
        for spec in specs {
            adapters.push(self.establish_connection(spec).await?);
        }
        Ok(adapters)
    }

    /// Resolves an adapter with the standard fallback chain:
    /// exact key, then (for `reading`) the caller's balancer, then role
    /// degradation reading→writing→primary, then `NoAdapterError`.
    ///
    /// Balancer consultation happens one layer up (in `Context`/`base.rs`,
    /// which has access to `ReplicaLoadBalancer::next_replica`); this method
    /// implements the exact-key and degrade-chain portions that don't need
    /// balancer state.
    pub async fn get_adapter(&self, database: &str, role: Role, shard: Option<&str>) -> Result<Adapter, Error> {
        let mut current_role = Some(role);
        let entries = self.entries.read().await;
        while let Some(r) = current_role {
            let key = match shard {
                Some(s) => format!("{}:{}:{}", database, r.as_str(), s),
                None => format!("{}:{}", database, r.as_str()),
            };
            if let Some(entry) = entries.get(&key) {
                return Ok(entry.adapter.clone());
            }
            current_role = r.degrade();
        }
        Err(Error::NoAdapterError { database: database.to_string(), role: role.as_str().to_string(), shard: shard.map(String::from) })
    }

    /// Stops every health monitor and drops every pool.
    pub async fn clear_all(&self) {
        let mut entries = self.entries.write().await;
        for (_, entry) in entries.drain() {
            if let Some(monitor) = entry.monitor {
                monitor.stop().await;
            }
        }
    }
}

/// Shared, cheaply-clonable handle some call sites prefer over borrowing a
/// `Context` directly (e.g. spawned health-monitor tasks).
pub type SharedRegistry = Arc<ConnectionRegistry>;
