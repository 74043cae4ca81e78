use crate::errors::DustboxError;
use crate::registry::Registry;
use std::sync::Arc;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info};

/// Initialize and start the job scheduler with all background tasks
pub async fn init_scheduler(registry: Arc<Registry>) -> Result<JobScheduler, DustboxError> {
    let sched = JobScheduler::new()
        .await
        .map_err(|e| DustboxError::Storage(format!("Failed to create job scheduler: {e}")))?;

    // Prune expired credentials - runs every hour
    let prune_job = Job::new_async("0 0 * * * *", move |_uuid, _l| {
        let registry = registry.clone();
        Box::pin(async move {
            info!("Running prune_expired_credentials job");
            match registry.prune_expired_credentials(registry.now()).await {
                Ok(count) => info!("Pruned {} expired credentials", count),
                Err(e) => error!("Failed to prune expired credentials: {}", e),
            }
        })
    })
    .map_err(|e| DustboxError::Storage(format!("Failed to create prune job: {e}")))?;

    sched
        .add(prune_job)
        .await
        .map_err(|e| DustboxError::Storage(format!("Failed to add prune job: {e}")))?;

    sched
        .start()
        .await
        .map_err(|e| DustboxError::Storage(format!("Failed to start job scheduler: {e}")))?;

    info!("Job scheduler started");

    Ok(sched)
}
