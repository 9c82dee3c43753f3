// Workflow persistence
//
// `WorkflowStore` is the seam between the HTTP/engine layers and storage.
// `PgWorkflowStore` is the production implementation; `MemoryWorkflowStore`
// backs tests and database-less local runs.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::HashMap;
use thiserror::Error;
use uuid::Uuid;

use verigrade_shared::{
    ActionSpec, Condition, ExecutionStatus, ExecutionWithWorkflow, TriggerType, Workflow,
    WorkflowAction, WorkflowCondition, WorkflowExecution, WorkflowStats, WorkflowTrigger,
};

use crate::pagination::PaginationParams;

pub use memory::MemoryWorkflowStore;
pub use postgres::PgWorkflowStore;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Trigger definition as supplied on create/update.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct TriggerInput {
    #[serde(rename = "type")]
    pub trigger_type: TriggerType,
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

/// A validated workflow ready to be persisted.
#[derive(Debug, Clone)]
pub struct NewWorkflow {
    pub organization_id: Uuid,
    pub created_by: Option<Uuid>,
    pub name: String,
    pub description: Option<String>,
    pub conditions: Vec<WorkflowCondition>,
    pub trigger: TriggerInput,
    pub actions: Vec<ActionSpec>,
}

impl NewWorkflow {
    /// Assigns ids and timestamps; new workflows start active with a zero run count.
    pub fn into_workflow(self) -> Workflow {
        let id = Uuid::new_v4();
        let now = Utc::now();
        Workflow {
            id,
            organization_id: self.organization_id,
            name: self.name,
            description: self.description,
            is_active: true,
            conditions: self.conditions,
            run_count: 0,
            last_run: None,
            trigger: build_trigger(id, self.trigger),
            actions: build_actions(id, self.actions),
            created_by: self.created_by,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Partial update. `trigger` is updated in place; `actions` replaces the whole list.
#[derive(Debug, Clone, Default)]
pub struct WorkflowChanges {
    pub name: Option<String>,
    pub description: Option<String>,
    pub is_active: Option<bool>,
    pub conditions: Option<Vec<WorkflowCondition>>,
    pub trigger: Option<TriggerInput>,
    pub actions: Option<Vec<ActionSpec>>,
}

#[derive(Debug, Clone, Default)]
pub struct WorkflowFilter {
    pub is_active: Option<bool>,
    pub search: Option<String>,
}

impl WorkflowFilter {
    pub fn search_term(&self) -> Option<&str> {
        self.search.as_deref().map(str::trim).filter(|s| !s.is_empty())
    }

    pub fn matches(&self, workflow: &Workflow) -> bool {
        if let Some(active) = self.is_active {
            if workflow.is_active != active {
                return false;
            }
        }
        if let Some(term) = self.search_term() {
            let term = term.to_lowercase();
            let in_name = workflow.name.to_lowercase().contains(&term);
            let in_description = workflow
                .description
                .as_ref()
                .is_some_and(|d| d.to_lowercase().contains(&term));
            if !in_name && !in_description {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Clone, Default)]
pub struct ExecutionFilter {
    pub workflow_id: Option<Uuid>,
    pub status: Option<ExecutionStatus>,
}

impl ExecutionFilter {
    pub fn matches(&self, execution: &WorkflowExecution) -> bool {
        self.workflow_id.is_none_or(|id| execution.workflow_id == id)
            && self.status.is_none_or(|s| execution.status == s)
    }
}

pub(crate) fn build_trigger(workflow_id: Uuid, input: TriggerInput) -> WorkflowTrigger {
    WorkflowTrigger {
        id: Uuid::new_v4(),
        workflow_id,
        trigger_type: input.trigger_type,
        name: input.trigger_type.display_name().to_string(),
        description: input.trigger_type.description().to_string(),
        conditions: input.conditions,
        is_active: true,
    }
}

pub(crate) fn build_actions(workflow_id: Uuid, specs: Vec<ActionSpec>) -> Vec<WorkflowAction> {
    specs
        .into_iter()
        .enumerate()
        .map(|(position, spec)| {
            let action_type = spec.action_type();
            WorkflowAction {
                id: Uuid::new_v4(),
                workflow_id,
                position: position as i32,
                name: action_type.display_name().to_string(),
                description: action_type.description().to_string(),
                spec,
                is_active: true,
            }
        })
        .collect()
}

#[async_trait]
pub trait WorkflowStore: Send + Sync {
    async fn health_check(&self) -> bool;

    // ===== Workflows =====

    /// Newest first, scoped to one organization. Returns the page and the total match count.
    async fn list_workflows(
        &self,
        organization_id: Uuid,
        filter: &WorkflowFilter,
        page: &PaginationParams,
    ) -> StoreResult<(Vec<Workflow>, i64)>;

    async fn get_workflow(&self, organization_id: Uuid, id: Uuid) -> StoreResult<Option<Workflow>>;

    async fn create_workflow(&self, workflow: NewWorkflow) -> StoreResult<Workflow>;

    /// `None` when the workflow does not exist in this organization.
    async fn update_workflow(
        &self,
        organization_id: Uuid,
        id: Uuid,
        changes: WorkflowChanges,
    ) -> StoreResult<Option<Workflow>>;

    /// Deletes the workflow with its trigger, actions and executions.
    async fn delete_workflow(&self, organization_id: Uuid, id: Uuid) -> StoreResult<bool>;

    /// Active workflows whose active trigger has the given type.
    async fn workflows_for_trigger(
        &self,
        organization_id: Uuid,
        trigger_type: TriggerType,
    ) -> StoreResult<Vec<Workflow>>;

    /// Atomically bumps `run_count` and sets `last_run`.
    async fn record_completed_run(&self, workflow_id: Uuid, at: DateTime<Utc>) -> StoreResult<()>;

    // ===== Executions =====

    async fn insert_execution(&self, execution: &WorkflowExecution) -> StoreResult<()>;

    /// Persists status, timestamps, heartbeat, action snapshots and error.
    /// Only a running execution is written; `false` means it was already finished
    /// (e.g. failed by the reaper) or deleted, and the caller must stop driving it.
    async fn update_execution(&self, execution: &WorkflowExecution) -> StoreResult<bool>;

    async fn get_execution(&self, organization_id: Uuid, id: Uuid) -> StoreResult<Option<WorkflowExecution>>;

    async fn list_executions(
        &self,
        organization_id: Uuid,
        filter: &ExecutionFilter,
        page: &PaginationParams,
    ) -> StoreResult<(Vec<ExecutionWithWorkflow>, i64)>;

    async fn recent_executions(
        &self,
        organization_id: Uuid,
        workflow_id: Uuid,
        limit: i64,
    ) -> StoreResult<Vec<WorkflowExecution>>;

    /// Up to `limit` newest executions of each listed workflow, keyed by workflow id.
    /// Workflows with no executions are absent from the map.
    async fn recent_executions_by_workflow(
        &self,
        organization_id: Uuid,
        workflow_ids: &[Uuid],
        limit: i64,
    ) -> StoreResult<HashMap<Uuid, Vec<WorkflowExecution>>>;

    async fn workflow_stats(&self, organization_id: Uuid, workflow_id: Uuid) -> StoreResult<WorkflowStats>;

    /// Fails running executions a worker picked up whose heartbeat is older than `stale_before`,
    /// and queued ones never picked up that started before `unclaimed_before`.
    /// Actions caught mid-run are failed with the same reason. Returns the number of executions.
    async fn fail_orphaned_executions(
        &self,
        stale_before: DateTime<Utc>,
        unclaimed_before: DateTime<Utc>,
        reason: &str,
    ) -> StoreResult<u64>;
}
