// In-process workflow store used by tests and `DATABASE_URL=memory`

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use verigrade_shared::{
    ActionStatus, ExecutionStatus, ExecutionWithWorkflow, TriggerType, Workflow, WorkflowExecution,
    WorkflowRef, WorkflowStats,
};

use super::{
    build_actions, build_trigger, ExecutionFilter, NewWorkflow, StoreError, StoreResult,
    WorkflowChanges, WorkflowFilter, WorkflowStore,
};
use crate::pagination::PaginationParams;

#[derive(Default)]
struct Tables {
    // Both kept in insertion order
    workflows: Vec<Workflow>,
    executions: Vec<WorkflowExecution>,
}

#[derive(Default)]
pub struct MemoryWorkflowStore {
    tables: RwLock<Tables>,
}

impl MemoryWorkflowStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn paginate<T>(items: Vec<T>, page: &PaginationParams) -> Vec<T> {
    items
        .into_iter()
        .skip(page.offset() as usize)
        .take(page.limit() as usize)
        .collect()
}

#[async_trait]
impl WorkflowStore for MemoryWorkflowStore {
    async fn health_check(&self) -> bool {
        true
    }

    async fn list_workflows(
        &self,
        organization_id: Uuid,
        filter: &WorkflowFilter,
        page: &PaginationParams,
    ) -> StoreResult<(Vec<Workflow>, i64)> {
        let tables = self.tables.read().await;
        let matching: Vec<Workflow> = tables
            .workflows
            .iter()
            .rev()
            .filter(|w| w.organization_id == organization_id && filter.matches(w))
            .cloned()
            .collect();
        let total = matching.len() as i64;

        Ok((paginate(matching, page), total))
    }

    async fn get_workflow(&self, organization_id: Uuid, id: Uuid) -> StoreResult<Option<Workflow>> {
        let tables = self.tables.read().await;
        Ok(tables
            .workflows
            .iter()
            .find(|w| w.id == id && w.organization_id == organization_id)
            .cloned())
    }

    async fn create_workflow(&self, workflow: NewWorkflow) -> StoreResult<Workflow> {
        let workflow = workflow.into_workflow();
        self.tables.write().await.workflows.push(workflow.clone());
        Ok(workflow)
    }

    async fn update_workflow(
        &self,
        organization_id: Uuid,
        id: Uuid,
        changes: WorkflowChanges,
    ) -> StoreResult<Option<Workflow>> {
        let mut tables = self.tables.write().await;
        let Some(workflow) = tables
            .workflows
            .iter_mut()
            .find(|w| w.id == id && w.organization_id == organization_id)
        else {
            return Ok(None);
        };

        if let Some(name) = changes.name {
            workflow.name = name;
        }
        if let Some(description) = changes.description {
            workflow.description = Some(description);
        }
        if let Some(is_active) = changes.is_active {
            workflow.is_active = is_active;
        }
        if let Some(conditions) = changes.conditions {
            workflow.conditions = conditions;
        }
        if let Some(trigger) = changes.trigger {
            let rebuilt = build_trigger(id, trigger);
            // Same row, new definition
            workflow.trigger = verigrade_shared::WorkflowTrigger {
                id: workflow.trigger.id,
                is_active: workflow.trigger.is_active,
                ..rebuilt
            };
        }
        if let Some(actions) = changes.actions {
            workflow.actions = build_actions(id, actions);
        }
        workflow.updated_at = Utc::now();

        Ok(Some(workflow.clone()))
    }

    async fn delete_workflow(&self, organization_id: Uuid, id: Uuid) -> StoreResult<bool> {
        let mut tables = self.tables.write().await;
        let before = tables.workflows.len();
        tables
            .workflows
            .retain(|w| !(w.id == id && w.organization_id == organization_id));

        if tables.workflows.len() == before {
            return Ok(false);
        }
        tables.executions.retain(|e| e.workflow_id != id);
        Ok(true)
    }

    async fn workflows_for_trigger(
        &self,
        organization_id: Uuid,
        trigger_type: TriggerType,
    ) -> StoreResult<Vec<Workflow>> {
        let tables = self.tables.read().await;
        Ok(tables
            .workflows
            .iter()
            .filter(|w| {
                w.organization_id == organization_id
                    && w.is_active
                    && w.trigger.is_active
                    && w.trigger.trigger_type == trigger_type
            })
            .cloned()
            .collect())
    }

    async fn record_completed_run(&self, workflow_id: Uuid, at: DateTime<Utc>) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        if let Some(workflow) = tables.workflows.iter_mut().find(|w| w.id == workflow_id) {
            workflow.run_count += 1;
            workflow.last_run = Some(at);
        }
        Ok(())
    }

    async fn insert_execution(&self, execution: &WorkflowExecution) -> StoreResult<()> {
        self.tables.write().await.executions.push(execution.clone());
        Ok(())
    }

    async fn update_execution(&self, execution: &WorkflowExecution) -> StoreResult<bool> {
        let mut tables = self.tables.write().await;
        let Some(stored) = tables
            .executions
            .iter_mut()
            .find(|e| e.id == execution.id && e.status == ExecutionStatus::Running)
        else {
            return Ok(false);
        };

        stored.status = execution.status;
        stored.completed_at = execution.completed_at;
        stored.heartbeat_at = execution.heartbeat_at;
        stored.picked_up_at = execution.picked_up_at;
        stored.actions = execution.actions.clone();
        stored.error = execution.error.clone();
        Ok(true)
    }

    async fn get_execution(&self, organization_id: Uuid, id: Uuid) -> StoreResult<Option<WorkflowExecution>> {
        let tables = self.tables.read().await;
        Ok(tables
            .executions
            .iter()
            .find(|e| e.id == id && e.organization_id == organization_id)
            .cloned())
    }

    async fn list_executions(
        &self,
        organization_id: Uuid,
        filter: &ExecutionFilter,
        page: &PaginationParams,
    ) -> StoreResult<(Vec<ExecutionWithWorkflow>, i64)> {
        let tables = self.tables.read().await;
        let matching: Vec<ExecutionWithWorkflow> = tables
            .executions
            .iter()
            .rev()
            .filter(|e| e.organization_id == organization_id && filter.matches(e))
            .filter_map(|e| {
                let workflow = tables.workflows.iter().find(|w| w.id == e.workflow_id)?;
                Some(ExecutionWithWorkflow {
                    execution: e.clone(),
                    workflow: WorkflowRef {
                        id: workflow.id,
                        name: workflow.name.clone(),
                    },
                })
            })
            .collect();
        let total = matching.len() as i64;

        Ok((paginate(matching, page), total))
    }

    async fn recent_executions(
        &self,
        organization_id: Uuid,
        workflow_id: Uuid,
        limit: i64,
    ) -> StoreResult<Vec<WorkflowExecution>> {
        let tables = self.tables.read().await;
        Ok(tables
            .executions
            .iter()
            .rev()
            .filter(|e| e.workflow_id == workflow_id && e.organization_id == organization_id)
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn recent_executions_by_workflow(
        &self,
        organization_id: Uuid,
        workflow_ids: &[Uuid],
        limit: i64,
    ) -> StoreResult<HashMap<Uuid, Vec<WorkflowExecution>>> {
        let tables = self.tables.read().await;
        let limit = limit.max(0) as usize;
        let mut grouped: HashMap<Uuid, Vec<WorkflowExecution>> = HashMap::new();

        for execution in tables
            .executions
            .iter()
            .rev()
            .filter(|e| e.organization_id == organization_id && workflow_ids.contains(&e.workflow_id))
        {
            let recent = grouped.entry(execution.workflow_id).or_default();
            if recent.len() < limit {
                recent.push(execution.clone());
            }
        }
        Ok(grouped)
    }

    async fn workflow_stats(&self, organization_id: Uuid, workflow_id: Uuid) -> StoreResult<WorkflowStats> {
        let tables = self.tables.read().await;
        if !tables
            .workflows
            .iter()
            .any(|w| w.id == workflow_id && w.organization_id == organization_id)
        {
            return Err(StoreError::NotFound("Workflow"));
        }

        let (mut running, mut completed, mut failed) = (0, 0, 0);
        let mut durations = Vec::new();
        for execution in tables.executions.iter().filter(|e| e.workflow_id == workflow_id) {
            match execution.status {
                ExecutionStatus::Running => running += 1,
                ExecutionStatus::Completed => {
                    completed += 1;
                    if let Some(done) = execution.completed_at {
                        durations.push((done - execution.started_at).num_milliseconds() as f64);
                    }
                }
                ExecutionStatus::Failed => failed += 1,
            }
        }

        let average = if durations.is_empty() {
            None
        } else {
            Some(durations.iter().sum::<f64>() / durations.len() as f64)
        };

        Ok(WorkflowStats::from_counts(workflow_id, running, completed, failed, average))
    }

    async fn fail_orphaned_executions(
        &self,
        stale_before: DateTime<Utc>,
        unclaimed_before: DateTime<Utc>,
        reason: &str,
    ) -> StoreResult<u64> {
        let mut tables = self.tables.write().await;
        let now = Utc::now();
        let mut reaped = 0;

        for execution in tables
            .executions
            .iter_mut()
            .filter(|e| e.status == ExecutionStatus::Running)
            .filter(|e| match e.picked_up_at {
                Some(_) => e.heartbeat_at < stale_before,
                None => e.started_at < unclaimed_before,
            })
        {
            execution.status = ExecutionStatus::Failed;
            execution.completed_at = Some(now);
            execution.error = Some(reason.to_string());
            for action in execution
                .actions
                .iter_mut()
                .filter(|a| a.status == ActionStatus::Running)
            {
                action.status = ActionStatus::Failed;
                action.completed_at = Some(now);
                action.error = Some(reason.to_string());
            }
            reaped += 1;
        }

        Ok(reaped)
    }
}
