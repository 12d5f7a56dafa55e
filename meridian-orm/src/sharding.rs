//! # Sharding
//!
//! Hash/range/geo shard resolution, task-local `current_shard` context, and
//! scatter-gather fan-out across every shard, built on top of `Adapter`.
//! `current_shard` uses `tokio::task_local!` for RAII-like save/restore of
//! ambient task-local state.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::join_all;

use crate::adapter::Adapter;
use crate::error::Error;
use crate::model::ColumnValue;

tokio::task_local! {
    static CURRENT_SHARD: String;
}

/// Runs `f` with `current_shard` set to `name` for the duration, restoring
/// the previous value (or absence of one) on return — the RAII-like
/// save/restore discipline task-local state requires.
pub async fn with_shard<F, Fut, R>(name: impl Into<String>, f: F) -> R
where
    F: FnOnce() -> Fut,
    Fut: std::future::Future<Output = R>,
{
    CURRENT_SHARD.scope(name.into(), f()).await
}

/// The shard bound to the current task, if any.
pub fn current_shard() -> Option<String> {
    CURRENT_SHARD.try_with(|s| s.clone()).ok()
}

/// A strategy for mapping shard-key column values to a shard name.
#[derive(Clone)]
pub enum ShardStrategy {
    /// Consistent hash of the concatenated key values, mod shard count.
    Hash { shard_names: Vec<String> },
    /// Ordered, disjoint `[low, high)` ranges over a single integer key.
    /// Validated at construction: overlapping ranges are rejected.
    Range { ranges: Vec<(i64, i64, String)> },
    /// Ordered list of geo regions; first match wins, else `default_shard`.
    /// Comparisons are case-insensitive.
    Geo { regions: Vec<GeoRegion>, default_shard: Option<String> },
}

#[derive(Clone, Debug)]
pub struct GeoRegion {
    pub shard: String,
    pub countries: Vec<String>,
    pub states: Vec<String>,
    pub cities: Vec<String>,
}

impl ShardStrategy {
    /// Validates a `Range` strategy's invariant: no two ranges overlap, so
    /// a value always falls in exactly one range.
    pub fn validated_range(mut ranges: Vec<(i64, i64, String)>) -> Result<Self, Error> {
        ranges.sort_by_key(|(low, _, _)| *low);
        for window in ranges.windows(2) {
            let (_, high_a, _) = &window[0];
            let (low_b, _, _) = &window[1];
            if high_a > low_b {
                return Err(Error::invalid_argument("overlapping shard ranges"));
            }
        }
        Ok(ShardStrategy::Range { ranges })
    }

    /// Resolves a shard name from the shard key's string value(s).
    pub fn resolve(&self, key_values: &[String]) -> Option<String> {
        match self {
            ShardStrategy::Hash { shard_names } => {
                if shard_names.is_empty() {
                    return None;
                }
                let joined = key_values.join("\u{1}");
                let hash = fnv1a(joined.as_bytes());
                Some(shard_names[(hash as usize) % shard_names.len()].clone())
            }
            ShardStrategy::Range { ranges } => {
                let value: i64 = key_values.first()?.parse().ok()?;
                ranges.iter().find(|(low, high, _)| value >= *low && value < *high).map(|(_, _, name)| name.clone())
            }
            ShardStrategy::Geo { regions, default_shard } => {
                let country = key_values.first().map(|s| s.to_lowercase());
                let state = key_values.get(1).map(|s| s.to_lowercase());
                let city = key_values.get(2).map(|s| s.to_lowercase());
                for region in regions {
                    let country_matches =
                        country.as_ref().map(|c| region.countries.iter().any(|x| x.to_lowercase() == *c)).unwrap_or(false);
                    if !country_matches {
                        continue;
                    }
                    if !region.states.is_empty() {
                        let state_matches =
                            state.as_ref().map(|s| region.states.iter().any(|x| x.to_lowercase() == *s)).unwrap_or(false);
                        if !state_matches {
                            continue;
                        }
                    }
                    if !region.cities.is_empty() {
                        let city_matches =
                            city.as_ref().map(|c| region.cities.iter().any(|x| x.to_lowercase() == *c)).unwrap_or(false);
                        if !city_matches {
                            continue;
                        }
                    }
                    return Some(region.shard.clone());
                }
                default_shard.clone()
            }
        }
    }
}

/// A 64-bit FNV-1a hash, used for deterministic hash-based shard resolution —
/// identical key values always resolve to the same shard.
fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for &b in bytes {
        hash ^= b as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

/// How an aggregate's per-shard results are reduced into one.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Reduction {
    Sum,
    MinOf,
    MaxOf,
    /// AVG must be weighted by each shard's row count, not averaged again —
    /// a naive mean-of-means skews toward smaller shards.
    WeightedAverage,
}

/// Per-database registry of shards and the resolution strategy.
#[derive(Clone)]
pub struct ShardRegistry {
    inner: Arc<ShardRegistryInner>,
}

struct ShardRegistryInner {
    shards: HashMap<String, Adapter>,
    strategy: Option<ShardStrategy>,
}

impl ShardRegistry {
    pub fn new() -> Self {
        Self { inner: Arc::new(ShardRegistryInner { shards: HashMap::new(), strategy: None }) }
    }

    pub fn with_shards(shards: HashMap<String, Adapter>, strategy: ShardStrategy) -> Self {
        Self { inner: Arc::new(ShardRegistryInner { shards, strategy: Some(strategy) }) }
    }

    pub fn shard(&self, name: &str) -> Option<Adapter> {
        self.inner.shards.get(name).cloned()
    }

    pub fn strategy(&self) -> Option<&ShardStrategy> {
        self.inner.strategy.as_ref()
    }

    pub fn all_shards(&self) -> Vec<(String, Adapter)> {
        self.inner.shards.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
    }

    /// Resolves the single shard a query touches if its WHERE clause
    /// constrains every shard-key column; `None` means scatter-gather is
    /// required.
    pub fn resolve_single_shard(&self, key_values: &[String]) -> Option<Adapter> {
        let strategy = self.inner.strategy.as_ref()?;
        let name = strategy.resolve(key_values)?;
        self.shard(&name)
    }

    /// Executes `f` against every shard in parallel, collecting results in
    /// shard-registration order. Any shard's error aborts the gather.
    pub async fn scatter_gather<F, Fut, R>(&self, f: F) -> Result<Vec<R>, Error>
    where
        F: Fn(Adapter) -> Fut + Send + Sync,
        Fut: std::future::Future<Output = Result<R, Error>> + Send,
    {
        let futures = self.inner.shards.values().cloned().map(&f);
        let results = join_all(futures).await;
        results.into_iter().collect()
    }

    /// Reduces per-shard scalar results: count/sum → sum, avg → weighted
    /// by count, min/max → min/max.
    pub fn reduce(reduction: Reduction, per_shard: Vec<(f64, i64)>) -> f64 {
        match reduction {
            Reduction::Sum => per_shard.iter().map(|(v, _)| v).sum(),
            Reduction::MinOf => per_shard.iter().map(|(v, _)| *v).fold(f64::INFINITY, f64::min),
            Reduction::MaxOf => per_shard.iter().map(|(v, _)| *v).fold(f64::NEG_INFINITY, f64::max),
            Reduction::WeightedAverage => {
                let total_count: i64 = per_shard.iter().map(|(_, c)| c).sum();
                if total_count == 0 {
                    return 0.0;
                }
                per_shard.iter().map(|(v, c)| v * (*c as f64)).sum::<f64>() / (total_count as f64)
            }
        }
    }
}

impl Default for ShardRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Raised when a query's WHERE clause would require joining across shards,
/// or a transaction would span more than one.
pub fn unsupported_cross_shard_join() -> Error {
    Error::CrossShardJoinError
}

pub fn unsupported_distributed_transaction() -> Error {
    Error::DistributedTransactionError
}

/// Converts shard-key column values read off a model instance into the
/// string form `ShardStrategy::resolve` expects.
pub fn key_values_as_strings(values: &[ColumnValue]) -> Vec<String> {
    values.iter().filter_map(|v| v.as_db_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_resolution_is_constant_for_identical_keys() {
        let strategy =
            ShardStrategy::Hash { shard_names: vec!["shard_a".into(), "shard_b".into(), "shard_c".into(), "shard_d".into()] };
        let a = strategy.resolve(&["42".to_string()]);
        let b = strategy.resolve(&["42".to_string()]);
        assert_eq!(a, b);
    }

    #[test]
    fn overlapping_ranges_are_rejected() {
        let result =
            ShardStrategy::validated_range(vec![(0, 100, "a".into()), (50, 150, "b".into())]);
        assert!(result.is_err());
    }

    #[test]
    fn disjoint_ranges_are_accepted_and_resolve() {
        let strategy =
            ShardStrategy::validated_range(vec![(0, 100, "a".into()), (100, 200, "b".into())]).unwrap();
        assert_eq!(strategy.resolve(&["150".to_string()]), Some("b".to_string()));
    }

    #[test]
    fn weighted_average_accounts_for_shard_counts() {
        let avg = ShardRegistry::reduce(Reduction::WeightedAverage, vec![(10.0, 1), (20.0, 9)]);
        assert!((avg - 19.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn with_shard_scopes_and_restores() {
        assert_eq!(current_shard(), None);
        with_shard("shard_a", || async {
            assert_eq!(current_shard(), Some("shard_a".to_string()));
        })
        .await;
        assert_eq!(current_shard(), None);
    }
}
