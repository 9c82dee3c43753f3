// Workflow Engine - starts executions and drives them through their actions

use chrono::Utc;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

use verigrade_shared::{
    ActionStatus, ExecutionSource, ExecutionStatus, Workflow, WorkflowExecution,
};

use super::executor::ActionExecutor;
use super::queue::{ExecutionJob, ExecutionQueue, ExecutionReceiver};
use super::triggers::{self, EventPayload, TriggerEvent};
use crate::store::{StoreError, WorkflowStore};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Workflow {0} not found")]
    WorkflowNotFound(Uuid),
    #[error("Workflow {0} is not active")]
    WorkflowInactive(Uuid),
    #[error("Execution queue is unavailable")]
    QueueUnavailable,
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Why a run stopped before writing its own outcome
#[derive(Error, Debug)]
enum Interrupted {
    #[error("execution is no longer running")]
    LeaseLost,
    #[error(transparent)]
    Store(#[from] StoreError),
}

pub struct WorkflowEngine {
    store: Arc<dyn WorkflowStore>,
    executor: ActionExecutor,
    queue: ExecutionQueue,
}

impl WorkflowEngine {
    /// The receiver must be handed to `queue::spawn_dispatcher` (or drained by a test).
    pub fn new(
        store: Arc<dyn WorkflowStore>,
        executor: ActionExecutor,
        queue_capacity: usize,
    ) -> (Arc<Self>, ExecutionReceiver) {
        let (queue, receiver) = ExecutionQueue::new(queue_capacity);
        let engine = Arc::new(Self { store, executor, queue });
        (engine, receiver)
    }

    /// Create a pending execution for a manual run and queue it. Returns before any action runs.
    pub async fn start_manual_run(
        &self,
        organization_id: Uuid,
        workflow_id: Uuid,
        payload: EventPayload,
    ) -> Result<WorkflowExecution, EngineError> {
        let workflow = self
            .store
            .get_workflow(organization_id, workflow_id)
            .await?
            .ok_or(EngineError::WorkflowNotFound(workflow_id))?;

        if !workflow.is_active {
            return Err(EngineError::WorkflowInactive(workflow_id));
        }

        info!(workflow_id = %workflow.id, "Manual run requested for workflow '{}'", workflow.name);
        self.start(&workflow, ExecutionSource::Manual, payload).await
    }

    /// Start every workflow of the organization whose trigger matches the event.
    pub async fn dispatch_event(
        &self,
        organization_id: Uuid,
        event: TriggerEvent,
    ) -> Result<Vec<WorkflowExecution>, EngineError> {
        let candidates = self
            .store
            .workflows_for_trigger(organization_id, event.trigger_type)
            .await?;

        let mut started = Vec::new();
        for workflow in candidates.iter().filter(|w| triggers::matches(w, &event)) {
            started.push(self.start(workflow, ExecutionSource::Event, event.payload.clone()).await?);
        }

        info!(
            trigger = event.trigger_type.as_str(),
            candidates = candidates.len(),
            started = started.len(),
            "Event dispatched"
        );
        Ok(started)
    }

    async fn start(
        &self,
        workflow: &Workflow,
        source: ExecutionSource,
        payload: EventPayload,
    ) -> Result<WorkflowExecution, EngineError> {
        let execution = WorkflowExecution::start(workflow, source, payload);
        self.store.insert_execution(&execution).await?;

        let job = ExecutionJob {
            execution_id: execution.id,
            organization_id: execution.organization_id,
        };
        if let Err(e) = self.queue.enqueue(job).await {
            let mut failed = execution;
            self.fail(&mut failed, e.to_string()).await;
            return Err(e);
        }

        Ok(execution)
    }

    /// Run a queued execution to completion. Failures are recorded on the execution, never returned.
    pub async fn run_execution(&self, job: ExecutionJob) {
        let mut execution = match self.store.get_execution(job.organization_id, job.execution_id).await {
            Ok(Some(execution)) => execution,
            Ok(None) => {
                warn!(execution_id = %job.execution_id, "Queued execution no longer exists");
                return;
            }
            Err(e) => {
                error!(execution_id = %job.execution_id, "Failed to load execution: {}", e);
                return;
            }
        };

        if execution.status.is_terminal() {
            warn!(execution_id = %execution.id, "Execution already finished, skipping");
            return;
        }

        let now = Utc::now();
        execution.picked_up_at = Some(now);
        execution.heartbeat_at = now;
        match self.checkpoint(&execution).await {
            Ok(()) => {}
            Err(Interrupted::LeaseLost) => {
                warn!(execution_id = %execution.id, "Execution finished before a worker picked it up");
                return;
            }
            Err(Interrupted::Store(e)) => {
                error!(execution_id = %execution.id, "Failed to claim execution: {}", e);
                return;
            }
        }

        let workflow = match self
            .store
            .get_workflow(execution.organization_id, execution.workflow_id)
            .await
        {
            Ok(Some(workflow)) => workflow,
            Ok(None) => {
                self.fail(&mut execution, "Workflow no longer exists".to_string()).await;
                return;
            }
            Err(e) => {
                self.fail(&mut execution, e.to_string()).await;
                return;
            }
        };

        info!(execution_id = %execution.id, workflow_id = %workflow.id, "Executing workflow '{}'", workflow.name);

        match self.run_actions(&workflow, &mut execution).await {
            Ok(()) => {}
            Err(Interrupted::LeaseLost) => {
                warn!(
                    execution_id = %execution.id,
                    "Execution was failed while running (lease expired), abandoning it"
                );
            }
            Err(Interrupted::Store(e)) => {
                error!(execution_id = %execution.id, "Store error during execution: {}", e);
                self.fail(&mut execution, e.to_string()).await;
            }
        }
    }

    /// Persist progress. Fails with `LeaseLost` once the stored execution is no longer running.
    async fn checkpoint(&self, execution: &WorkflowExecution) -> Result<(), Interrupted> {
        if self.store.update_execution(execution).await? {
            Ok(())
        } else {
            Err(Interrupted::LeaseLost)
        }
    }

    async fn run_actions(&self, workflow: &Workflow, execution: &mut WorkflowExecution) -> Result<(), Interrupted> {
        for index in 0..execution.actions.len() {
            let action_id = execution.actions[index].id;
            let action_type = execution.actions[index].action_type;

            let now = Utc::now();
            {
                let run = &mut execution.actions[index];
                run.status = ActionStatus::Running;
                run.started_at = Some(now);
            }
            execution.heartbeat_at = now;
            self.checkpoint(execution).await?;

            let result = match workflow.actions.iter().find(|a| a.id == action_id) {
                Some(action) => self
                    .executor
                    .execute(action, &execution.trigger_payload)
                    .await
                    .map_err(|e| e.to_string()),
                None => Err("action was removed from the workflow".to_string()),
            };

            let now = Utc::now();
            execution.heartbeat_at = now;
            let run = &mut execution.actions[index];
            run.completed_at = Some(now);

            match result {
                Ok(output) => {
                    run.status = ActionStatus::Completed;
                    run.output = Some(output);
                    self.checkpoint(execution).await?;
                }
                Err(message) => {
                    run.status = ActionStatus::Failed;
                    run.error = Some(message.clone());
                    execution.status = ExecutionStatus::Failed;
                    execution.completed_at = Some(now);
                    execution.error = Some(format!(
                        "Action {} ({}) failed: {}",
                        index + 1,
                        action_type.as_str(),
                        message
                    ));
                    self.checkpoint(execution).await?;
                    warn!(
                        execution_id = %execution.id,
                        "Workflow '{}' failed at action {}: {}",
                        workflow.name,
                        index + 1,
                        message
                    );
                    return Ok(());
                }
            }
        }

        let now = Utc::now();
        execution.status = ExecutionStatus::Completed;
        execution.completed_at = Some(now);
        execution.heartbeat_at = now;
        self.checkpoint(execution).await?;
        self.store.record_completed_run(workflow.id, now).await?;

        info!(execution_id = %execution.id, "Workflow '{}' completed", workflow.name);
        Ok(())
    }

    async fn fail(&self, execution: &mut WorkflowExecution, message: String) {
        let now = Utc::now();
        for run in execution
            .actions
            .iter_mut()
            .filter(|a| a.status == ActionStatus::Running)
        {
            run.status = ActionStatus::Failed;
            run.completed_at = Some(now);
            run.error = Some(message.clone());
        }
        execution.status = ExecutionStatus::Failed;
        execution.completed_at = Some(now);
        execution.heartbeat_at = now;
        execution.error = Some(message);

        match self.store.update_execution(execution).await {
            Ok(true) => {}
            Ok(false) => warn!(execution_id = %execution.id, "Execution already finished, failure not recorded"),
            // The reaper will fail it once the lease expires
            Err(e) => error!(execution_id = %execution.id, "Could not record execution failure: {}", e),
        }
    }
}
