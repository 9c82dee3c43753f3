// Execution queue - bounded channel drained by a concurrency-limited dispatcher

use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, info};
use uuid::Uuid;

use super::engine::{EngineError, WorkflowEngine};

/// A queued request to run one persisted execution
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionJob {
    pub execution_id: Uuid,
    pub organization_id: Uuid,
}

pub type ExecutionReceiver = mpsc::Receiver<ExecutionJob>;

#[derive(Clone)]
pub struct ExecutionQueue {
    sender: mpsc::Sender<ExecutionJob>,
}

impl ExecutionQueue {
    pub fn new(capacity: usize) -> (Self, ExecutionReceiver) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (Self { sender }, receiver)
    }

    /// Waits for room when the queue is full; fails only once the dispatcher is gone.
    pub async fn enqueue(&self, job: ExecutionJob) -> Result<(), EngineError> {
        self.sender
            .send(job)
            .await
            .map_err(|_| EngineError::QueueUnavailable)?;
        debug!(execution_id = %job.execution_id, "Execution queued");
        Ok(())
    }
}

/// Spawn the dispatcher. At most `concurrency` executions run at once.
pub fn spawn_dispatcher(
    engine: Arc<WorkflowEngine>,
    mut receiver: ExecutionReceiver,
    concurrency: usize,
) -> JoinHandle<()> {
    let permits = Arc::new(Semaphore::new(concurrency.max(1)));
    info!("Starting execution dispatcher with {} workers", concurrency.max(1));

    tokio::spawn(async move {
        while let Some(job) = receiver.recv().await {
            let Ok(permit) = permits.clone().acquire_owned().await else {
                break;
            };
            let engine = engine.clone();
            tokio::spawn(async move {
                engine.run_execution(job).await;
                drop(permit);
            });
        }
        info!("Execution queue closed, dispatcher stopped");
    })
}
