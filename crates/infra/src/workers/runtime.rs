//! Background loops of one worker process.
//!
//! Claim/execute, stale recovery and retention each run on their own
//! interval and stop together when the shared token is cancelled.

use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::config::{to_delta, PipelineConfig};
use crate::jobs::{PipelineDeps, PipelineWorker, RetentionSweeper, StaleRecoveryMonitor};

/// Handle to stop the background loops of one worker process.
#[derive(Debug)]
pub struct WorkerHandle {
    shutdown: CancellationToken,
    joins: Vec<JoinHandle<()>>,
}

impl WorkerHandle {
    /// Token observed by every loop; cancelling it is equivalent to `shutdown`.
    pub fn token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Request graceful shutdown and wait for all loops to stop.
    ///
    /// An in-flight request is handed back to the pool at its next chunk boundary.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        for join in self.joins {
            if let Err(err) = join.await {
                error!(error = %err, "worker loop panicked");
            }
        }
    }
}

/// Runs the claim/execute loop, stale recovery and the retention sweep.
#[derive(Debug)]
pub struct WorkerRuntime;

impl WorkerRuntime {
    pub fn spawn(deps: PipelineDeps, config: PipelineConfig) -> WorkerHandle {
        let shutdown = CancellationToken::new();
        let worker = PipelineWorker::new(deps.clone(), &config);
        let recovery = StaleRecoveryMonitor::new(deps.store.clone(), to_delta(config.recovery.stale_timeout));
        let sweeper = RetentionSweeper::new(
            deps.store.clone(),
            deps.outputs.clone(),
            config.retention.output_retention_delta(),
        );

        info!(
            worker_id = %config.scheduler.worker_id,
            config = ?config,
            "worker runtime starting"
        );

        let joins = vec![
            tokio::spawn(claim_loop(worker, config.scheduler.poll_interval, shutdown.clone())),
            tokio::spawn(recovery_loop(recovery, config.recovery.interval, shutdown.clone())),
            tokio::spawn(retention_loop(sweeper, config.retention.interval, shutdown.clone())),
        ];

        WorkerHandle { shutdown, joins }
    }
}

fn ticker(period: Duration) -> tokio::time::Interval {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

async fn claim_loop(worker: PipelineWorker, period: Duration, shutdown: CancellationToken) {
    let mut ticker = ticker(period);
    info!(worker_id = %worker.worker_id(), "claim loop started");

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {}
        }

        // Keep claiming while there is work; go back to sleep once idle.
        while !shutdown.is_cancelled() {
            match worker.process_next(&shutdown).await {
                Ok(Some(processed)) => debug!(
                    request_id = %processed.request_id,
                    outcome = ?processed.execution.outcome,
                    "request processed"
                ),
                Ok(None) => break,
                Err(err) => {
                    error!(error = %err, "claim cycle failed");
                    break;
                }
            }
        }
    }

    info!(worker_id = %worker.worker_id(), "claim loop stopped");
}

async fn recovery_loop(monitor: StaleRecoveryMonitor, period: Duration, shutdown: CancellationToken) {
    let mut ticker = ticker(period);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {}
        }
        if let Err(err) = monitor.recover().await {
            error!(error = %err, "stale recovery failed");
        }
    }
    debug!("recovery loop stopped");
}

async fn retention_loop(sweeper: RetentionSweeper, period: Duration, shutdown: CancellationToken) {
    let mut ticker = ticker(period);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {}
        }
        if let Err(err) = sweeper.sweep(Utc::now()).await {
            error!(error = %err, "retention sweep failed");
        }
    }
    debug!("retention loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use crate::jobs::BatchSubmitter;
    use crate::test_support::{deps, spec, ScriptedRenderer};
    use crate::work_store::{InMemoryWorkStore, WorkStore};
    use docpipe_core::{TenantId, WorkerId};
    use docpipe_generation::{ConcurrencyMode, RequestStatus};

    fn fast_config() -> PipelineConfig {
        let mut config = PipelineConfig::default();
        config.scheduler.worker_id = WorkerId::generate("test");
        config.scheduler.poll_interval = Duration::from_millis(10);
        config.recovery.interval = Duration::from_millis(50);
        config.retention.interval = Duration::from_millis(50);
        config
    }

    #[tokio::test]
    async fn runtime_drains_submitted_work_and_shuts_down() {
        let store = InMemoryWorkStore::arc();
        let tenant = TenantId::new();
        let receipt = BatchSubmitter::new(store.clone())
            .submit_batch(tenant, (0..6).map(spec).collect(), ConcurrencyMode::Bounded)
            .await
            .unwrap();

        let handle = WorkerRuntime::spawn(
            deps(store.clone(), Arc::new(ScriptedRenderer::default())),
            fast_config(),
        );

        let mut status = RequestStatus::Pending;
        for _ in 0..200 {
            status = store
                .get_request(tenant, receipt.request_id)
                .await
                .unwrap()
                .unwrap()
                .status;
            if status.is_terminal() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        handle.shutdown().await;

        assert_eq!(status, RequestStatus::Completed);
    }

    #[tokio::test]
    async fn shutdown_hands_in_flight_request_back() {
        let store = InMemoryWorkStore::arc();
        let tenant = TenantId::new();
        let receipt = BatchSubmitter::new(store.clone())
            .submit_batch(tenant, (0..20).map(spec).collect(), ConcurrencyMode::Bounded)
            .await
            .unwrap();

        let mut config = fast_config();
        config.executor.chunk_size = 1;
        config.executor.item_concurrency = 1;
        let renderer = ScriptedRenderer::default().with_delay(Duration::from_millis(20));
        let handle = WorkerRuntime::spawn(deps(store.clone(), Arc::new(renderer)), config);

        // Wait until the request is claimed.
        for _ in 0..100 {
            let request = store.get_request(tenant, receipt.request_id).await.unwrap().unwrap();
            if request.status == RequestStatus::InProgress {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        handle.shutdown().await;

        let request = store.get_request(tenant, receipt.request_id).await.unwrap().unwrap();
        assert!(request.is_claimable());
        assert!(request.completed_count < 20);
    }
}
