// Job Scheduler - background jobs for the workflow service

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use tokio_cron_scheduler::{Job, JobScheduler as TokioScheduler, JobSchedulerError};
use tracing::{error, info};
use uuid::Uuid;

use super::OrphanReaperJob;
use crate::config::WorkerConfig;
use crate::store::{StoreError, WorkflowStore};

/// Execution logs kept in memory
const MAX_EXECUTION_LOGS: usize = 100;

const ORPHAN_REAPER_JOB: &str = "Orphan Reaper";

#[derive(Error, Debug)]
pub enum JobError {
    #[error("Scheduler error: {0}")]
    SchedulerError(#[from] JobSchedulerError),
    #[error("Store error: {0}")]
    StoreError(#[from] StoreError),
    #[error("Startup sweep failed: {0}")]
    Startup(String),
}

pub type JobResult<T> = Result<T, JobError>;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobExecutionLog {
    pub id: Uuid,
    pub job_name: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub status: JobStatus,
    pub items_processed: u64,
    pub errors: Vec<String>,
    pub duration_ms: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Completed,
    Failed,
}

/// Bounded history of background job runs, shared with the health endpoint
#[derive(Clone, Default)]
pub struct JobLog {
    entries: Arc<RwLock<Vec<JobExecutionLog>>>,
}

impl JobLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn latest(&self) -> Option<JobExecutionLog> {
        self.entries.read().await.last().cloned()
    }

    async fn push(&self, log: JobExecutionLog) {
        let mut entries = self.entries.write().await;
        entries.push(log);
        if entries.len() > MAX_EXECUTION_LOGS {
            entries.remove(0);
        }
    }
}

pub struct JobScheduler {
    scheduler: TokioScheduler,
    store: Arc<dyn WorkflowStore>,
    config: WorkerConfig,
    log: JobLog,
}

impl JobScheduler {
    pub async fn new(store: Arc<dyn WorkflowStore>, config: WorkerConfig, log: JobLog) -> JobResult<Self> {
        let scheduler = TokioScheduler::new().await?;

        Ok(Self {
            scheduler,
            store,
            config,
            log,
        })
    }

    pub async fn start(&self) -> JobResult<()> {
        info!("Starting background job scheduler");

        self.schedule_orphan_reaper().await?;
        self.scheduler.start().await?;

        info!("Background job scheduler started successfully");
        Ok(())
    }

    pub async fn shutdown(&mut self) -> JobResult<()> {
        info!("Shutting down background job scheduler");
        self.scheduler.shutdown().await?;
        Ok(())
    }

    /// Run the orphan reaper once, outside the cron schedule (startup sweep).
    pub async fn sweep_orphans(&self) -> JobResult<u64> {
        let store = self.store.clone();
        let config = self.config.clone();
        let log = run_logged(ORPHAN_REAPER_JOB, move || async move {
            OrphanReaperJob::from_config(store, &config)
                .run()
                .await
                .map(|r| r.executions_failed)
        })
        .await;

        let outcome = match log.status {
            JobStatus::Completed => Ok(log.items_processed),
            JobStatus::Failed => Err(JobError::Startup(log.errors.join("; "))),
        };
        self.log.push(log).await;
        outcome
    }

    async fn schedule_orphan_reaper(&self) -> JobResult<()> {
        let interval = self.config.reaper_interval_minutes;
        let cron_expr = format!("0 */{} * * * *", interval); // Every N minutes

        let store = self.store.clone();
        let config = self.config.clone();
        let job_log = self.log.clone();

        let job = Job::new_async(cron_expr.as_str(), move |_uuid, _lock| {
            let store = store.clone();
            let config = config.clone();
            let job_log = job_log.clone();

            Box::pin(async move {
                info!("Running orphan reaper job");
                let log = run_logged(ORPHAN_REAPER_JOB, move || async move {
                    OrphanReaperJob::from_config(store, &config)
                        .run()
                        .await
                        .map(|r| r.executions_failed)
                })
                .await;
                job_log.push(log).await;
            })
        })?;

        self.scheduler.add(job).await?;
        info!("Scheduled orphan reaper to run every {} minutes", interval);
        Ok(())
    }
}

/// Run a job body and describe the outcome
async fn run_logged<F, Fut>(job_name: &str, body: F) -> JobExecutionLog
where
    F: FnOnce() -> Fut,
    Fut: std::future::Future<Output = JobResult<u64>>,
{
    let started_at = Utc::now();
    let result = body().await;
    let completed_at = Utc::now();

    let (status, items_processed, errors) = match result {
        Ok(items) => (JobStatus::Completed, items, Vec::new()),
        Err(e) => {
            error!("{} failed: {}", job_name, e);
            (JobStatus::Failed, 0, vec![e.to_string()])
        }
    };

    JobExecutionLog {
        id: Uuid::new_v4(),
        job_name: job_name.to_string(),
        started_at,
        completed_at: Some(completed_at),
        status,
        items_processed,
        errors,
        duration_ms: Some((completed_at - started_at).num_milliseconds()),
    }
}
