//! Recovery of messages left in flight past the orphan threshold.

use std::panic::AssertUnwindSafe;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashSet;
use futures::future::join_all;
use futures::FutureExt;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::config::QueueConfig;
use crate::metrics::ReconcilerMetrics;
use crate::queue::{QueueError, QueueRegistry};

/// Upper bound on the pause between sweeps
const MAX_SWEEP_INTERVAL_MS: u64 = 10_000;

/// What to do with a message left in flight past the threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrphanPolicy {
    /// Drop the message
    Discard,
    /// Put it back into the queue, counting a requeue
    Requeue,
}

impl OrphanPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrphanPolicy::Discard => "discard",
            OrphanPolicy::Requeue => "requeue",
        }
    }
}

impl FromStr for OrphanPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "discard" => Ok(OrphanPolicy::Discard),
            "requeue" => Ok(OrphanPolicy::Requeue),
            other => Err(format!("unknown orphan policy: {}", other)),
        }
    }
}

/// Removes a name from the in-flight set when its scan ends, even by panic.
struct InFlightGuard {
    in_flight: Arc<DashSet<String>>,
    name: String,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.in_flight.remove(&self.name);
    }
}

/// Background task that recovers orphan messages.
///
/// Each cycle drains the registry's pending-scan set and spawns one scan
/// task per name. At most one scan runs per name; a name whose scan is still
/// running is put back for the next cycle. A scan that leaves messages in
/// flight re-adds its name, so queues are rechecked until they drain.
pub struct OrphanReconciler {
    registry: Arc<QueueRegistry>,
    policy: OrphanPolicy,
    threshold_ms: u64,
    in_flight: Arc<DashSet<String>>,
}

impl OrphanReconciler {
    pub fn new(registry: Arc<QueueRegistry>, policy: OrphanPolicy, threshold_ms: u64) -> Self {
        Self {
            registry,
            policy,
            threshold_ms,
            in_flight: Arc::new(DashSet::new()),
        }
    }

    /// Build from settings. An unknown policy falls back to discard.
    pub fn from_config(registry: Arc<QueueRegistry>, config: &QueueConfig) -> Self {
        let policy = config.orphan_policy.parse::<OrphanPolicy>().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Falling back to discard orphan policy");
            OrphanPolicy::Discard
        });
        Self::new(registry, policy, config.orphan_threshold_ms)
    }

    pub fn policy(&self) -> OrphanPolicy {
        self.policy
    }

    /// Pause between cycles: half of `min(10s, threshold)`, at least 1ms.
    pub fn sweep_interval(&self) -> Duration {
        let ms = self.threshold_ms.min(MAX_SWEEP_INTERVAL_MS) / 2;
        Duration::from_millis(ms.max(1))
    }

    /// Schedule every known queue for a scan.
    pub async fn seed(&self) -> usize {
        match self.registry.all_queue_names().await {
            Ok(names) => {
                let count = names.len();
                for name in names {
                    self.registry.pending().insert(name);
                }
                tracing::info!(queues = count, "Queues scheduled for startup orphan scan");
                count
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to list queues for startup orphan scan");
                0
            }
        }
    }

    /// Drain the pending set and spawn a scan per name.
    pub fn dispatch(&self) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::new();

        for name in self.registry.pending().drain() {
            if !self.in_flight.insert(name.clone()) {
                // Still scanning; try again next cycle
                self.registry.pending().insert(name);
                continue;
            }

            let guard = InFlightGuard {
                in_flight: self.in_flight.clone(),
                name: name.clone(),
            };
            let registry = self.registry.clone();
            let policy = self.policy;
            let threshold_ms = self.threshold_ms;

            handles.push(tokio::spawn(async move {
                let _guard = guard;
                let scan = scan_queue(registry.clone(), policy, threshold_ms, name.clone());
                if AssertUnwindSafe(scan).catch_unwind().await.is_err() {
                    tracing::error!(queue = %name, "Orphan scan panicked, will retry");
                    registry.pending().insert(name);
                }
            }));
        }

        handles
    }

    /// Run one full cycle and wait for its scans.
    ///
    /// Returns the number of queues scanned.
    pub async fn sweep(&self) -> usize {
        let handles = self.dispatch();
        let count = handles.len();

        for result in join_all(handles).await {
            if let Err(e) = result {
                tracing::error!(error = %e, "Orphan scan task failed");
            }
        }

        ReconcilerMetrics::record_sweep();
        count
    }

    /// Run until the shutdown signal.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        let interval = self.sweep_interval();

        tracing::info!(
            policy = self.policy.as_str(),
            threshold_ms = self.threshold_ms,
            interval_ms = interval.as_millis() as u64,
            "Orphan reconciler started"
        );

        self.seed().await;

        loop {
            let cycle = AssertUnwindSafe(async { self.dispatch().len() })
                .catch_unwind()
                .await;
            match cycle {
                Ok(0) => {}
                Ok(dispatched) => {
                    tracing::debug!(queues = dispatched, "Dispatched orphan scans");
                }
                Err(_) => {
                    tracing::error!("Orphan reconciler cycle panicked, continuing");
                }
            }
            ReconcilerMetrics::record_sweep();

            tokio::select! {
                _ = shutdown.recv() => {
                    tracing::info!("Orphan reconciler received shutdown signal");
                    break;
                }
                _ = tokio::time::sleep(interval) => {}
            }
        }

        tracing::info!("Orphan reconciler stopped");
    }
}

/// Scan one queue. Failures put the name back for the next cycle.
async fn scan_queue(
    registry: Arc<QueueRegistry>,
    policy: OrphanPolicy,
    threshold_ms: u64,
    name: String,
) {
    let start = Instant::now();

    match recover_orphans(&registry, policy, threshold_ms, &name).await {
        Ok(0) => {}
        Ok(recovered) => {
            tracing::debug!(
                queue = %name,
                recovered = recovered,
                policy = policy.as_str(),
                "Orphan scan completed"
            );
        }
        Err(e) => {
            tracing::warn!(queue = %name, error = %e, "Orphan scan failed, will retry");
            registry.pending().insert(name);
        }
    }

    ReconcilerMetrics::record_scan_duration(start.elapsed().as_secs_f64());
}

async fn recover_orphans(
    registry: &QueueRegistry,
    policy: OrphanPolicy,
    threshold_ms: u64,
    name: &str,
) -> Result<usize, QueueError> {
    let Some(instance) = registry.get_instance(name).await? else {
        return Ok(0);
    };

    let orphans = instance.orphan_messages(threshold_ms).await?;
    let mut recovered = 0;

    for msg in orphans {
        let outcome = match policy {
            OrphanPolicy::Discard => {
                tracing::info!(queue = %name, message_id = msg.id, "Discarding orphan message");
                instance.finish(&msg).await
            }
            OrphanPolicy::Requeue => {
                tracing::info!(queue = %name, message_id = msg.id, "Requeueing orphan message");
                instance.move_from_ephemeral_to_queue_storage(&msg).await
            }
        };

        match outcome {
            Ok(true) => {
                recovered += 1;
                ReconcilerMetrics::record_recovered(policy.as_str());
            }
            Ok(false) => {
                tracing::debug!(queue = %name, message_id = msg.id, "Orphan message already gone");
            }
            Err(e) => {
                ReconcilerMetrics::record_failure();
                tracing::warn!(
                    queue = %name,
                    message_id = msg.id,
                    error = %e,
                    "Failed to recover orphan message"
                );
            }
        }
    }

    if instance.ephemeral_size().await? > 0 {
        registry.pending().insert(name.to_string());
    }

    Ok(recovered)
}
