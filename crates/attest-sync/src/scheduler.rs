//! # Background Scheduler
//!
//! Periodic tasks for the queue drain, the session expiry sweep and, when a
//! webhook is configured, outbox delivery. All share a `watch` shutdown
//! signal. A tick that finds the previous pass still running waits for it
//! instead of overlapping.

use std::sync::Arc;
use std::time::Duration;

use attest_core::Clock;
use attest_state::SessionEngine;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::reconciler::SyncReconciler;
use crate::webhook::WebhookDispatcher;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerConfig {
    pub sync_interval: Duration,
    pub sweep_interval: Duration,
    pub delivery_interval: Duration,
}

impl SchedulerConfig {
    pub const DEFAULT_SYNC_INTERVAL: Duration = Duration::from_secs(5);
    pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(5);
    pub const DEFAULT_DELIVERY_INTERVAL: Duration = Duration::from_secs(2);
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            sync_interval: Self::DEFAULT_SYNC_INTERVAL,
            sweep_interval: Self::DEFAULT_SWEEP_INTERVAL,
            delivery_interval: Self::DEFAULT_DELIVERY_INTERVAL,
        }
    }
}

pub struct Scheduler;

impl Scheduler {
    /// Start the tasks on the current runtime. Delivery runs only when a
    /// dispatcher is given.
    pub fn spawn(
        reconciler: Arc<SyncReconciler>,
        engine: Arc<SessionEngine>,
        webhooks: Option<Arc<WebhookDispatcher>>,
        clock: Arc<dyn Clock>,
        config: SchedulerConfig,
    ) -> SchedulerHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let drain = {
            let mut shutdown = shutdown_rx.clone();
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(config.sync_interval);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    tokio::select! {
                        _ = ticker.tick() => {
                            if let Err(e) = reconciler.drain_once().await {
                                tracing::warn!(error = %e, "queue drain failed");
                            }
                        }
                        _ = shutdown.changed() => break,
                    }
                }
                tracing::debug!("drain task stopped");
            })
        };

        let sweep = {
            let mut shutdown = shutdown_rx.clone();
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(config.sweep_interval);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    tokio::select! {
                        _ = ticker.tick() => {
                            engine.expire_sweep(clock.now()).await;
                        }
                        _ = shutdown.changed() => break,
                    }
                }
                tracing::debug!("expiry sweep task stopped");
            })
        };

        let mut tasks = vec![drain, sweep];
        let delivering = webhooks.is_some();
        if let Some(dispatcher) = webhooks {
            let mut shutdown = shutdown_rx;
            tasks.push(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(config.delivery_interval);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    tokio::select! {
                        _ = ticker.tick() => {
                            if let Err(e) = dispatcher.deliver_once().await {
                                tracing::warn!(error = %e, "webhook delivery pass failed");
                            }
                        }
                        _ = shutdown.changed() => break,
                    }
                }
                tracing::debug!("webhook delivery task stopped");
            }));
        }

        tracing::info!(
            sync_interval_ms = config.sync_interval.as_millis() as u64,
            sweep_interval_ms = config.sweep_interval.as_millis() as u64,
            delivering,
            "scheduler started"
        );
        SchedulerHandle {
            shutdown: shutdown_tx,
            tasks,
        }
    }
}

/// Owns the scheduler's tasks. Dropping it without calling
/// [`shutdown`](Self::shutdown) also stops them, without waiting.
pub struct SchedulerHandle {
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl SchedulerHandle {
    /// Signal every task and wait for the passes in flight to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        for task in self.tasks {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "scheduler task ended abnormally");
            }
        }
        tracing::info!("scheduler stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use attest_audit::{AuditChain, MemoryAuditStore};
    use attest_core::{
        ManualClock, OperationId, OperationKind, OwnerId, RandomIds, Submission, Timestamp,
    };
    use attest_geo::Coordinate;
    use attest_queue::{NewOperation, OperationQueue, OperationStatus, Priority, QueueConfig};
    use attest_state::{Destination, EngineConfig, SessionStatus};
    use sqlx::sqlite::SqlitePoolOptions;

    use crate::reconciler::DEFAULT_BATCH_SIZE;
    use crate::submitter::EngineSubmitter;

    async fn wait_for<F: Fn() -> bool>(cond: F) -> bool {
        for _ in 0..200 {
            if cond() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }

    #[tokio::test]
    async fn drains_queue_and_expires_sessions_until_shutdown() {
        let clock = Arc::new(ManualClock::new(
            Timestamp::parse("2026-03-02T09:00:00Z").unwrap(),
        ));
        let audit = Arc::new(AuditChain::new(
            Arc::new(MemoryAuditStore::new()),
            clock.clone(),
        ));
        let engine = Arc::new(
            SessionEngine::new(
                EngineConfig::default(),
                audit,
                clock.clone(),
                Arc::new(RandomIds),
            )
            .unwrap(),
        );
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        let queue = OperationQueue::new(pool, clock.clone(), QueueConfig::default())
            .await
            .unwrap();

        let destination = Destination {
            name: "Depot".into(),
            address: None,
            coordinate: Coordinate::new(38.5816, -121.4944).unwrap(),
        };
        let to_check_in = engine
            .create_session(OwnerId::new("a").unwrap(), destination.clone(), None)
            .await
            .unwrap();
        let to_expire = engine
            .create_session(OwnerId::new("b").unwrap(), destination, None)
            .await
            .unwrap();

        let mut payload = serde_json::Map::new();
        payload.insert("latitude".into(), serde_json::json!(38.5816));
        payload.insert("longitude".into(), serde_json::json!(-121.4944));
        let op_id = OperationId::new("sched-op").unwrap();
        queue
            .enqueue(NewOperation::new(
                Submission {
                    operation_id: op_id.clone(),
                    kind: OperationKind::CheckIn,
                    session_id: Some(to_check_in.id),
                    payload,
                },
                Priority::Critical,
            ))
            .await
            .unwrap();

        let reconciler = Arc::new(SyncReconciler::new(
            queue.clone(),
            Arc::new(EngineSubmitter::new(engine.clone())),
            DEFAULT_BATCH_SIZE,
        ));
        let handle = Scheduler::spawn(
            reconciler,
            engine.clone(),
            None,
            clock.clone(),
            SchedulerConfig {
                sync_interval: Duration::from_millis(10),
                sweep_interval: Duration::from_millis(10),
                delivery_interval: Duration::from_millis(10),
            },
        );

        assert!(
            wait_for(|| engine.session(to_check_in.id).unwrap().status
                == SessionStatus::CheckedIn)
            .await
        );
        let mut acknowledged = false;
        for _ in 0..200 {
            if queue.status(&op_id).await.unwrap() == Some(OperationStatus::Succeeded) {
                acknowledged = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(acknowledged);

        clock.advance(chrono::Duration::minutes(16));
        assert!(
            wait_for(|| engine.session(to_expire.id).unwrap().status == SessionStatus::Expired)
                .await
        );
        // Checked-in sessions are never expired.
        assert_eq!(
            engine.session(to_check_in.id).unwrap().status,
            SessionStatus::CheckedIn
        );

        tokio::time::timeout(Duration::from_secs(5), handle.shutdown())
            .await
            .unwrap();
    }
}
