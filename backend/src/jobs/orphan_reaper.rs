// Orphan Reaper Job - fails executions whose worker stopped heartbeating

use chrono::{Duration, Utc};
use std::sync::Arc;
use tracing::{info, warn};

use super::JobResult;
use crate::config::WorkerConfig;
use crate::store::WorkflowStore;

/// Error recorded on executions failed by the reaper
pub const ORPHANED_EXECUTION_ERROR: &str = "Execution orphaned: no heartbeat within lease";

#[derive(Debug, Default)]
pub struct ReaperResult {
    pub executions_failed: u64,
}

pub struct OrphanReaperJob {
    store: Arc<dyn WorkflowStore>,
    lease: Duration,
    queue_timeout: Duration,
}

impl OrphanReaperJob {
    pub fn new(store: Arc<dyn WorkflowStore>, lease: Duration, queue_timeout: Duration) -> Self {
        Self {
            store,
            lease,
            queue_timeout,
        }
    }

    pub fn from_config(store: Arc<dyn WorkflowStore>, config: &WorkerConfig) -> Self {
        Self::new(store, config.lease(), config.queue_timeout())
    }

    /// Executions still waiting in a live queue are left alone until `queue_timeout`.
    pub async fn run(&self) -> JobResult<ReaperResult> {
        let now = Utc::now();
        let executions_failed = self
            .store
            .fail_orphaned_executions(now - self.lease, now - self.queue_timeout, ORPHANED_EXECUTION_ERROR)
            .await?;

        if executions_failed > 0 {
            warn!("Failed {} orphaned workflow executions", executions_failed);
        } else {
            info!("No orphaned workflow executions");
        }

        Ok(ReaperResult { executions_failed })
    }
}
