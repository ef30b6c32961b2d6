//! Queue worker pools
//!
//! Fixed-size worker pools per stage, all pulling from the durable
//! queue in SQLite. A worker claims one item, runs the stage executor,
//! then settles the item: success completes it and chains the next
//! stage; a retryable failure with attempts left reschedules it with
//! backoff; anything else finalizes the failure and the item goes dead.
//!
//! A janitor task sweeps expired leases so items held by a crashed
//! worker come back into rotation.

use crate::coordinator::Coordinator;
use crate::db::queue::{self as work_queue, WorkItem};
use crate::executors;
use sfa_common::events::Stage;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Handles to the running worker pools
pub struct QueueWorkers {
    handles: Vec<JoinHandle<()>>,
    token: CancellationToken,
}

impl QueueWorkers {
    /// Spawn all stage pools plus the lease janitor
    pub fn spawn(coordinator: Coordinator, token: CancellationToken) -> Self {
        let queue_config = &coordinator.context().config.queue;
        let pools = [
            (Stage::Download, queue_config.download_workers),
            (Stage::Processing, queue_config.processing_workers),
            (Stage::Analysis, queue_config.analysis_workers),
        ];

        let mut handles = Vec::new();
        for (stage, count) in pools {
            for worker in 0..count.max(1) {
                let coordinator = coordinator.clone();
                let token = token.clone();
                handles.push(tokio::spawn(async move {
                    worker_loop(coordinator, stage, worker, token).await;
                }));
            }
        }

        let janitor_coordinator = coordinator.clone();
        let janitor_token = token.clone();
        handles.push(tokio::spawn(async move {
            janitor_loop(janitor_coordinator, janitor_token).await;
        }));

        Self { handles, token }
    }

    /// Signal shutdown and wait for all workers to drain
    pub async fn shutdown(self) {
        self.token.cancel();
        for handle in self.handles {
            let _ = handle.await;
        }
    }
}

async fn worker_loop(
    coordinator: Coordinator,
    stage: Stage,
    worker: usize,
    token: CancellationToken,
) {
    let poll_interval =
        Duration::from_millis(coordinator.context().config.queue.poll_interval_ms.max(10));
    tracing::debug!(%stage, worker, "Queue worker started");

    loop {
        if token.is_cancelled() {
            break;
        }
        match work_queue::claim(&coordinator.context().db, stage).await {
            Ok(Some(item)) => {
                if let Err(e) = process_item(&coordinator, &item).await {
                    tracing::error!(%stage, item_id = %item.item_id, error = %e, "Failed to settle work item");
                }
            }
            Ok(None) => {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(poll_interval) => {}
                }
            }
            Err(e) => {
                tracing::error!(%stage, error = %e, "Queue claim failed");
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(poll_interval) => {}
                }
            }
        }
    }
    tracing::debug!(%stage, worker, "Queue worker stopped");
}

/// Run one claimed item and settle its queue state
async fn process_item(coordinator: &Coordinator, item: &WorkItem) -> sfa_common::Result<()> {
    let ctx = coordinator.context();
    match executors::run_stage(ctx, item.stage, item.job_id).await {
        Ok(()) => {
            work_queue::complete(&ctx.db, item.item_id).await?;
            coordinator.chain_after(item.stage, item.job_id).await?;
        }
        Err(err) if err.retryable && item.attempts_remaining() => {
            tracing::warn!(
                stage = %item.stage,
                job_id = %item.job_id,
                attempts = item.attempts,
                error = %err,
                "Stage failed, rescheduling"
            );
            executors::record_retryable_error(ctx, item.stage, item.job_id, &err.message).await?;
            work_queue::reschedule(&ctx.db, item, ctx.config.queue.backoff_base_secs).await?;
        }
        Err(err) => {
            work_queue::mark_dead(&ctx.db, item.item_id).await?;
            executors::finalize_failure(ctx, item.stage, item.job_id, item.track_id, &err.message)
                .await?;
        }
    }
    Ok(())
}

async fn janitor_loop(coordinator: Coordinator, token: CancellationToken) {
    let lease_secs = coordinator.context().config.queue.lease_secs;
    // Sweep at a fraction of the lease bound, at least every minute
    let sweep_interval = Duration::from_secs((lease_secs / 4).clamp(5, 60));
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = tokio::time::sleep(sweep_interval) => {}
        }
        match work_queue::requeue_expired_leases(&coordinator.context().db, lease_secs).await {
            Ok(0) => {}
            Ok(count) => tracing::warn!(count, "Requeued expired leases"),
            Err(e) => tracing::error!(error = %e, "Lease sweep failed"),
        }
    }
}
