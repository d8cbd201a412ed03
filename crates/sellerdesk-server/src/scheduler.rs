//! Background job scheduler.
//!
//! Initialises a [`JobScheduler`] at server startup and registers the
//! recurring order sync and the cache cleanup sweep.

use std::sync::Arc;

use sellerdesk_orders::{JobState, OrderService};
use sellerdesk_spapi::SpApiClient;
use tokio_cron_scheduler::{Job, JobScheduler, JobSchedulerError};

/// Every ten minutes, on the minute.
const CACHE_CLEANUP_CRON: &str = "0 */10 * * * *";

/// Builds and starts the background job scheduler.
///
/// Returns the running [`JobScheduler`] handle, which must be kept alive
/// for the lifetime of the process. Dropping it shuts down all jobs.
///
/// # Errors
///
/// Returns [`JobSchedulerError`] if the scheduler cannot be initialised,
/// a job cannot be registered (including an invalid cron expression), or
/// the scheduler fails to start.
pub async fn build_scheduler(
    service: Arc<OrderService<SpApiClient>>,
    sync_cron: &str,
) -> Result<JobScheduler, JobSchedulerError> {
    let scheduler = JobScheduler::new().await?;

    register_sync_job(&scheduler, Arc::clone(&service), sync_cron).await?;
    register_cache_cleanup_job(&scheduler, service).await?;

    scheduler.start().await?;
    Ok(scheduler)
}

/// Runs the sync cycle on the configured cadence. Each run goes through the
/// job registry, so a run still in progress is cancelled by the next one.
async fn register_sync_job(
    scheduler: &JobScheduler,
    service: Arc<OrderService<SpApiClient>>,
    cron: &str,
) -> Result<(), JobSchedulerError> {
    let job = Job::new_async(cron, move |_uuid, _lock| {
        let service = Arc::clone(&service);

        Box::pin(async move {
            tracing::info!("scheduler: starting order sync");
            let handle = service.start_sync().await;
            let last = handle.wait().await;
            match last.state {
                JobState::Completed => tracing::info!(
                    job_id = %last.id,
                    summary = last.message.as_deref().unwrap_or(""),
                    "scheduler: order sync complete"
                ),
                JobState::Cancelled => {
                    tracing::info!(job_id = %last.id, "scheduler: order sync cancelled");
                }
                JobState::Failed | JobState::Running => tracing::error!(
                    job_id = %last.id,
                    error = last.message.as_deref().unwrap_or("unknown"),
                    "scheduler: order sync failed"
                ),
            }
        })
    })?;

    scheduler.add(job).await?;
    tracing::info!(cron, "scheduler: registered order sync");
    Ok(())
}

async fn register_cache_cleanup_job(
    scheduler: &JobScheduler,
    service: Arc<OrderService<SpApiClient>>,
) -> Result<(), JobSchedulerError> {
    let job = Job::new_async(CACHE_CLEANUP_CRON, move |_uuid, _lock| {
        let service = Arc::clone(&service);

        Box::pin(async move {
            let removed = service.cleanup_cache().await;
            tracing::debug!(removed, "scheduler: cache cleanup run complete");
        })
    })?;

    scheduler.add(job).await?;
    Ok(())
}
