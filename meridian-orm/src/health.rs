//! # Health Monitor
//!
//! A background task probing an adapter with `SELECT 1` at a fixed
//! interval, marking it unhealthy if the probe exceeds `timeout`.
//! Disabled entirely when the owning `Context` is in test mode. Built on
//! `Adapter::probe()`'s plain `sqlx::query("...").execute(&pool)` idiom,
//! with logged state transitions.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::timeout;

use crate::adapter::Adapter;

struct State {
    healthy: AtomicBool,
    stop: Notify,
    stopped: AtomicBool,
}

/// A handle to a running health-check task. Dropping the handle does not
/// stop the task — call `stop().await` explicitly so shutdown is observable
/// and awaitable, matching `ConnectionRegistry::clear_all`'s needs.
#[derive(Clone)]
pub struct HealthMonitor {
    state: Arc<State>,
}

impl HealthMonitor {
    /// Spawns the probe loop. Logs under the `health_monitor` source
    /// on every state transition.
    pub fn spawn(adapter: Adapter, interval: Duration, probe_timeout: Duration) -> Self {
        let state = Arc::new(State { healthy: AtomicBool::new(true), stop: Notify::new(), stopped: AtomicBool::new(false) });
        let task_state = state.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {}
                    _ = task_state.stop.notified() => break,
                }

                let was_healthy = task_state.healthy.load(Ordering::Relaxed);
                let probe_result = timeout(probe_timeout, adapter.probe()).await;
                let now_healthy = matches!(probe_result, Ok(Ok(())));

                if now_healthy != was_healthy {
                    task_state.healthy.store(now_healthy, Ordering::Relaxed);
                    if now_healthy {
                        log::info!(target: "health_monitor", "adapter recovered");
                    } else {
                        log::warn!(target: "health_monitor", "adapter marked unhealthy");
                    }
                }
            }
        });
        Self { state }
    }

    pub fn is_healthy(&self) -> bool {
        self.state.healthy.load(Ordering::Relaxed)
    }

    /// Stops the probe loop. Idempotent.
    pub async fn stop(&self) {
        if !self.state.stopped.swap(true, Ordering::Relaxed) {
            self.state.stop.notify_one();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn marks_unhealthy_after_a_failing_probe_and_recovers_after_a_passing_one() {
        let adapter = Adapter::connect("sqlite::memory:").await.unwrap();
        let monitor = HealthMonitor::spawn(adapter.clone(), Duration::from_millis(20), Duration::from_millis(50));
        assert!(monitor.is_healthy());

        adapter.pool.close().await;
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(!monitor.is_healthy(), "probe against a closed pool must flip the monitor unhealthy");

        monitor.stop().await;
    }
}
