// Postgres-backed workflow store

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{types::Json, FromRow, PgPool, Postgres, QueryBuilder, Transaction};
use std::collections::HashMap;
use uuid::Uuid;

use verigrade_shared::{
    ActionRun, ActionSpec, Condition, ExecutionSource, ExecutionStatus, ExecutionWithWorkflow,
    TriggerType, Workflow, WorkflowAction, WorkflowCondition, WorkflowExecution, WorkflowRef,
    WorkflowStats, WorkflowTrigger,
};

use super::{
    build_actions, build_trigger, ExecutionFilter, NewWorkflow, StoreError, StoreResult,
    WorkflowChanges, WorkflowFilter, WorkflowStore,
};
use crate::pagination::PaginationParams;

#[derive(Debug, FromRow)]
struct WorkflowRow {
    id: Uuid,
    organization_id: Uuid,
    name: String,
    description: Option<String>,
    is_active: bool,
    conditions: Json<Vec<WorkflowCondition>>,
    run_count: i64,
    last_run: Option<DateTime<Utc>>,
    created_by: Option<Uuid>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(Debug, FromRow)]
struct TriggerRow {
    id: Uuid,
    workflow_id: Uuid,
    trigger_type: TriggerType,
    name: String,
    description: String,
    conditions: Json<Vec<Condition>>,
    is_active: bool,
}

impl From<TriggerRow> for WorkflowTrigger {
    fn from(row: TriggerRow) -> Self {
        Self {
            id: row.id,
            workflow_id: row.workflow_id,
            trigger_type: row.trigger_type,
            name: row.name,
            description: row.description,
            conditions: row.conditions.0,
            is_active: row.is_active,
        }
    }
}

#[derive(Debug, FromRow)]
struct ActionRow {
    id: Uuid,
    workflow_id: Uuid,
    position: i32,
    name: String,
    description: String,
    spec: Json<ActionSpec>,
    is_active: bool,
}

impl From<ActionRow> for WorkflowAction {
    fn from(row: ActionRow) -> Self {
        Self {
            id: row.id,
            workflow_id: row.workflow_id,
            position: row.position,
            name: row.name,
            description: row.description,
            spec: row.spec.0,
            is_active: row.is_active,
        }
    }
}

#[derive(Debug, FromRow)]
struct ExecutionRow {
    id: Uuid,
    workflow_id: Uuid,
    organization_id: Uuid,
    status: ExecutionStatus,
    source: ExecutionSource,
    trigger_payload: serde_json::Value,
    started_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
    heartbeat_at: DateTime<Utc>,
    picked_up_at: Option<DateTime<Utc>>,
    actions: Json<Vec<ActionRun>>,
    error: Option<String>,
}

impl From<ExecutionRow> for WorkflowExecution {
    fn from(row: ExecutionRow) -> Self {
        Self {
            id: row.id,
            workflow_id: row.workflow_id,
            organization_id: row.organization_id,
            status: row.status,
            source: row.source,
            trigger_payload: row.trigger_payload,
            started_at: row.started_at,
            completed_at: row.completed_at,
            heartbeat_at: row.heartbeat_at,
            picked_up_at: row.picked_up_at,
            actions: row.actions.0,
            error: row.error,
        }
    }
}

#[derive(Debug, FromRow)]
struct ExecutionListRow {
    #[sqlx(flatten)]
    execution: ExecutionRow,
    workflow_name: String,
}

#[derive(Debug, FromRow)]
struct StatsRow {
    running: i64,
    completed: i64,
    failed: i64,
    average_duration_ms: Option<f64>,
}

const WORKFLOW_COLUMNS: &str = "w.id, w.organization_id, w.name, w.description, w.is_active, w.conditions, \
     w.run_count, w.last_run, w.created_by, w.created_at, w.updated_at";

const EXECUTION_COLUMNS: &str = "e.id, e.workflow_id, e.organization_id, e.status, e.source, e.trigger_payload, \
     e.started_at, e.completed_at, e.heartbeat_at, e.picked_up_at, e.actions, e.error";

#[derive(Clone)]
pub struct PgWorkflowStore {
    pool: PgPool,
}

impl PgWorkflowStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Attaches triggers and ordered actions to a batch of workflow rows, preserving row order.
    async fn hydrate(&self, rows: Vec<WorkflowRow>) -> StoreResult<Vec<Workflow>> {
        if rows.is_empty() {
            return Ok(Vec::new());
        }
        let ids: Vec<Uuid> = rows.iter().map(|r| r.id).collect();

        let triggers = sqlx::query_as::<_, TriggerRow>(
            "SELECT id, workflow_id, trigger_type, name, description, conditions, is_active
             FROM workflow_triggers WHERE workflow_id = ANY($1)",
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await?;

        let actions = sqlx::query_as::<_, ActionRow>(
            "SELECT id, workflow_id, position, name, description, spec, is_active
             FROM workflow_actions WHERE workflow_id = ANY($1)
             ORDER BY workflow_id, position",
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await?;

        let mut triggers: HashMap<Uuid, WorkflowTrigger> = triggers
            .into_iter()
            .map(|t| (t.workflow_id, WorkflowTrigger::from(t)))
            .collect();

        let mut actions_by_workflow: HashMap<Uuid, Vec<WorkflowAction>> = HashMap::new();
        for action in actions {
            actions_by_workflow
                .entry(action.workflow_id)
                .or_default()
                .push(action.into());
        }

        rows.into_iter()
            .map(|row| {
                let trigger = triggers
                    .remove(&row.id)
                    .ok_or(StoreError::NotFound("Workflow trigger"))?;
                Ok(Workflow {
                    id: row.id,
                    organization_id: row.organization_id,
                    name: row.name,
                    description: row.description,
                    is_active: row.is_active,
                    conditions: row.conditions.0,
                    run_count: row.run_count,
                    last_run: row.last_run,
                    trigger,
                    actions: actions_by_workflow.remove(&row.id).unwrap_or_default(),
                    created_by: row.created_by,
                    created_at: row.created_at,
                    updated_at: row.updated_at,
                })
            })
            .collect()
    }

    async fn insert_actions(
        tx: &mut Transaction<'_, Postgres>,
        actions: &[WorkflowAction],
    ) -> StoreResult<()> {
        for action in actions {
            sqlx::query(
                "INSERT INTO workflow_actions (id, workflow_id, position, action_type, name, description, spec, is_active)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
            )
            .bind(action.id)
            .bind(action.workflow_id)
            .bind(action.position)
            .bind(action.action_type())
            .bind(&action.name)
            .bind(&action.description)
            .bind(Json(&action.spec))
            .bind(action.is_active)
            .execute(&mut **tx)
            .await?;
        }
        Ok(())
    }
}

fn push_workflow_filters(qb: &mut QueryBuilder<'_, Postgres>, organization_id: Uuid, filter: &WorkflowFilter) {
    qb.push(" WHERE w.organization_id = ").push_bind(organization_id);
    if let Some(active) = filter.is_active {
        qb.push(" AND w.is_active = ").push_bind(active);
    }
    if let Some(term) = filter.search_term() {
        let pattern = format!("%{}%", term);
        qb.push(" AND (w.name ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR w.description ILIKE ")
            .push_bind(pattern)
            .push(")");
    }
}

fn push_execution_filters(qb: &mut QueryBuilder<'_, Postgres>, organization_id: Uuid, filter: &ExecutionFilter) {
    qb.push(" WHERE e.organization_id = ").push_bind(organization_id);
    if let Some(workflow_id) = filter.workflow_id {
        qb.push(" AND e.workflow_id = ").push_bind(workflow_id);
    }
    if let Some(status) = filter.status {
        qb.push(" AND e.status = ").push_bind(status);
    }
}

#[async_trait]
impl WorkflowStore for PgWorkflowStore {
    async fn health_check(&self) -> bool {
        sqlx::query("SELECT 1").execute(&self.pool).await.is_ok()
    }

    async fn list_workflows(
        &self,
        organization_id: Uuid,
        filter: &WorkflowFilter,
        page: &PaginationParams,
    ) -> StoreResult<(Vec<Workflow>, i64)> {
        let mut count = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM workflows w");
        push_workflow_filters(&mut count, organization_id, filter);
        let total = count.build_query_scalar::<i64>().fetch_one(&self.pool).await?;

        let mut select = QueryBuilder::<Postgres>::new(format!("SELECT {} FROM workflows w", WORKFLOW_COLUMNS));
        push_workflow_filters(&mut select, organization_id, filter);
        select
            .push(" ORDER BY w.created_at DESC LIMIT ")
            .push_bind(page.limit())
            .push(" OFFSET ")
            .push_bind(page.offset());
        let rows = select.build_query_as::<WorkflowRow>().fetch_all(&self.pool).await?;

        Ok((self.hydrate(rows).await?, total))
    }

    async fn get_workflow(&self, organization_id: Uuid, id: Uuid) -> StoreResult<Option<Workflow>> {
        let row = sqlx::query_as::<_, WorkflowRow>(&format!(
            "SELECT {} FROM workflows w WHERE w.id = $1 AND w.organization_id = $2",
            WORKFLOW_COLUMNS
        ))
        .bind(id)
        .bind(organization_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(self.hydrate(vec![row]).await?.pop()),
            None => Ok(None),
        }
    }

    async fn create_workflow(&self, workflow: NewWorkflow) -> StoreResult<Workflow> {
        let workflow = workflow.into_workflow();
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO workflows (id, organization_id, name, description, is_active, conditions, run_count,
                                    last_run, created_by, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
        )
        .bind(workflow.id)
        .bind(workflow.organization_id)
        .bind(&workflow.name)
        .bind(&workflow.description)
        .bind(workflow.is_active)
        .bind(Json(&workflow.conditions))
        .bind(workflow.run_count)
        .bind(workflow.last_run)
        .bind(workflow.created_by)
        .bind(workflow.created_at)
        .bind(workflow.updated_at)
        .execute(&mut *tx)
        .await?;

        let trigger = &workflow.trigger;
        sqlx::query(
            "INSERT INTO workflow_triggers (id, workflow_id, trigger_type, name, description, conditions, is_active)
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(trigger.id)
        .bind(trigger.workflow_id)
        .bind(trigger.trigger_type)
        .bind(&trigger.name)
        .bind(&trigger.description)
        .bind(Json(&trigger.conditions))
        .bind(trigger.is_active)
        .execute(&mut *tx)
        .await?;

        Self::insert_actions(&mut tx, &workflow.actions).await?;
        tx.commit().await?;

        Ok(workflow)
    }

    async fn update_workflow(
        &self,
        organization_id: Uuid,
        id: Uuid,
        changes: WorkflowChanges,
    ) -> StoreResult<Option<Workflow>> {
        let mut tx = self.pool.begin().await?;

        let existing = sqlx::query_as::<_, WorkflowRow>(&format!(
            "SELECT {} FROM workflows w WHERE w.id = $1 AND w.organization_id = $2 FOR UPDATE",
            WORKFLOW_COLUMNS
        ))
        .bind(id)
        .bind(organization_id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(existing) = existing else {
            return Ok(None);
        };

        let conditions = changes.conditions.unwrap_or(existing.conditions.0);
        sqlx::query(
            "UPDATE workflows
             SET name = $2, description = $3, is_active = $4, conditions = $5, updated_at = NOW()
             WHERE id = $1",
        )
        .bind(id)
        .bind(changes.name.unwrap_or(existing.name))
        .bind(changes.description.or(existing.description))
        .bind(changes.is_active.unwrap_or(existing.is_active))
        .bind(Json(&conditions))
        .execute(&mut *tx)
        .await?;

        if let Some(trigger) = changes.trigger {
            let trigger = build_trigger(id, trigger);
            sqlx::query(
                "UPDATE workflow_triggers
                 SET trigger_type = $2, name = $3, description = $4, conditions = $5
                 WHERE workflow_id = $1",
            )
            .bind(id)
            .bind(trigger.trigger_type)
            .bind(&trigger.name)
            .bind(&trigger.description)
            .bind(Json(&trigger.conditions))
            .execute(&mut *tx)
            .await?;
        }

        if let Some(actions) = changes.actions {
            sqlx::query("DELETE FROM workflow_actions WHERE workflow_id = $1")
                .bind(id)
                .execute(&mut *tx)
                .await?;
            Self::insert_actions(&mut tx, &build_actions(id, actions)).await?;
        }

        tx.commit().await?;
        self.get_workflow(organization_id, id).await
    }

    async fn delete_workflow(&self, organization_id: Uuid, id: Uuid) -> StoreResult<bool> {
        // Trigger, actions and executions go with it via ON DELETE CASCADE
        let result = sqlx::query("DELETE FROM workflows WHERE id = $1 AND organization_id = $2")
            .bind(id)
            .bind(organization_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn workflows_for_trigger(
        &self,
        organization_id: Uuid,
        trigger_type: TriggerType,
    ) -> StoreResult<Vec<Workflow>> {
        let rows = sqlx::query_as::<_, WorkflowRow>(&format!(
            "SELECT {} FROM workflows w
             JOIN workflow_triggers t ON t.workflow_id = w.id
             WHERE w.organization_id = $1 AND w.is_active = TRUE
               AND t.is_active = TRUE AND t.trigger_type = $2
             ORDER BY w.created_at ASC",
            WORKFLOW_COLUMNS
        ))
        .bind(organization_id)
        .bind(trigger_type)
        .fetch_all(&self.pool)
        .await?;

        self.hydrate(rows).await
    }

    async fn record_completed_run(&self, workflow_id: Uuid, at: DateTime<Utc>) -> StoreResult<()> {
        sqlx::query("UPDATE workflows SET run_count = run_count + 1, last_run = $2 WHERE id = $1")
            .bind(workflow_id)
            .bind(at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn insert_execution(&self, execution: &WorkflowExecution) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO workflow_executions (id, workflow_id, organization_id, status, source, trigger_payload,
                                              started_at, completed_at, heartbeat_at, picked_up_at, actions, error)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)",
        )
        .bind(execution.id)
        .bind(execution.workflow_id)
        .bind(execution.organization_id)
        .bind(execution.status)
        .bind(execution.source)
        .bind(&execution.trigger_payload)
        .bind(execution.started_at)
        .bind(execution.completed_at)
        .bind(execution.heartbeat_at)
        .bind(execution.picked_up_at)
        .bind(Json(&execution.actions))
        .bind(&execution.error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_execution(&self, execution: &WorkflowExecution) -> StoreResult<bool> {
        let result = sqlx::query(
            "UPDATE workflow_executions
             SET status = $2, completed_at = $3, heartbeat_at = $4, picked_up_at = $5, actions = $6, error = $7
             WHERE id = $1 AND status = 'running'",
        )
        .bind(execution.id)
        .bind(execution.status)
        .bind(execution.completed_at)
        .bind(execution.heartbeat_at)
        .bind(execution.picked_up_at)
        .bind(Json(&execution.actions))
        .bind(&execution.error)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn get_execution(&self, organization_id: Uuid, id: Uuid) -> StoreResult<Option<WorkflowExecution>> {
        let row = sqlx::query_as::<_, ExecutionRow>(&format!(
            "SELECT {} FROM workflow_executions e WHERE e.id = $1 AND e.organization_id = $2",
            EXECUTION_COLUMNS
        ))
        .bind(id)
        .bind(organization_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Into::into))
    }

    async fn list_executions(
        &self,
        organization_id: Uuid,
        filter: &ExecutionFilter,
        page: &PaginationParams,
    ) -> StoreResult<(Vec<ExecutionWithWorkflow>, i64)> {
        let mut count = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM workflow_executions e");
        push_execution_filters(&mut count, organization_id, filter);
        let total = count.build_query_scalar::<i64>().fetch_one(&self.pool).await?;

        let mut select = QueryBuilder::<Postgres>::new(format!(
            "SELECT {}, w.name AS workflow_name FROM workflow_executions e JOIN workflows w ON w.id = e.workflow_id",
            EXECUTION_COLUMNS
        ));
        push_execution_filters(&mut select, organization_id, filter);
        select
            .push(" ORDER BY e.started_at DESC LIMIT ")
            .push_bind(page.limit())
            .push(" OFFSET ")
            .push_bind(page.offset());

        let rows = select.build_query_as::<ExecutionListRow>().fetch_all(&self.pool).await?;
        let executions = rows
            .into_iter()
            .map(|row| {
                let workflow = WorkflowRef {
                    id: row.execution.workflow_id,
                    name: row.workflow_name,
                };
                ExecutionWithWorkflow {
                    execution: row.execution.into(),
                    workflow,
                }
            })
            .collect();

        Ok((executions, total))
    }

    async fn recent_executions(
        &self,
        organization_id: Uuid,
        workflow_id: Uuid,
        limit: i64,
    ) -> StoreResult<Vec<WorkflowExecution>> {
        let rows = sqlx::query_as::<_, ExecutionRow>(&format!(
            "SELECT {} FROM workflow_executions e
             WHERE e.workflow_id = $1 AND e.organization_id = $2
             ORDER BY e.started_at DESC LIMIT $3",
            EXECUTION_COLUMNS
        ))
        .bind(workflow_id)
        .bind(organization_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn recent_executions_by_workflow(
        &self,
        organization_id: Uuid,
        workflow_ids: &[Uuid],
        limit: i64,
    ) -> StoreResult<HashMap<Uuid, Vec<WorkflowExecution>>> {
        if workflow_ids.is_empty() {
            return Ok(HashMap::new());
        }

        let rows = sqlx::query_as::<_, ExecutionRow>(&format!(
            "SELECT {} FROM (
                 SELECT *, ROW_NUMBER() OVER (PARTITION BY workflow_id ORDER BY started_at DESC) AS recent_rank
                 FROM workflow_executions
                 WHERE organization_id = $1 AND workflow_id = ANY($2)
             ) e
             WHERE e.recent_rank <= $3
             ORDER BY e.workflow_id, e.started_at DESC",
            EXECUTION_COLUMNS
        ))
        .bind(organization_id)
        .bind(workflow_ids)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        let mut grouped: HashMap<Uuid, Vec<WorkflowExecution>> = HashMap::new();
        for row in rows {
            let execution = WorkflowExecution::from(row);
            grouped.entry(execution.workflow_id).or_default().push(execution);
        }
        Ok(grouped)
    }

    async fn workflow_stats(&self, organization_id: Uuid, workflow_id: Uuid) -> StoreResult<WorkflowStats> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM workflows WHERE id = $1 AND organization_id = $2)",
        )
        .bind(workflow_id)
        .bind(organization_id)
        .fetch_one(&self.pool)
        .await?;

        if !exists {
            return Err(StoreError::NotFound("Workflow"));
        }

        let stats = sqlx::query_as::<_, StatsRow>(
            "SELECT
                COUNT(*) FILTER (WHERE status = 'running') AS running,
                COUNT(*) FILTER (WHERE status = 'completed') AS completed,
                COUNT(*) FILTER (WHERE status = 'failed') AS failed,
                (AVG(EXTRACT(EPOCH FROM (completed_at - started_at)) * 1000)
                    FILTER (WHERE status = 'completed' AND completed_at IS NOT NULL))::float8 AS average_duration_ms
             FROM workflow_executions
             WHERE workflow_id = $1",
        )
        .bind(workflow_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(WorkflowStats::from_counts(
            workflow_id,
            stats.running,
            stats.completed,
            stats.failed,
            stats.average_duration_ms,
        ))
    }

    async fn fail_orphaned_executions(
        &self,
        stale_before: DateTime<Utc>,
        unclaimed_before: DateTime<Utc>,
        reason: &str,
    ) -> StoreResult<u64> {
        let result = sqlx::query(
            "UPDATE workflow_executions e
             SET status = 'failed',
                 completed_at = NOW(),
                 error = $3::text,
                 actions = COALESCE((
                     SELECT jsonb_agg(
                         CASE WHEN a->>'status' = 'running'
                              THEN a || jsonb_build_object('status', 'failed', 'error', $3::text,
                                                           'completedAt', to_jsonb(NOW()))
                              ELSE a
                         END ORDER BY ord)
                     FROM jsonb_array_elements(e.actions) WITH ORDINALITY AS t(a, ord)
                 ), '[]'::jsonb)
             WHERE e.status = 'running'
               AND ((e.picked_up_at IS NOT NULL AND e.heartbeat_at < $1)
                    OR (e.picked_up_at IS NULL AND e.started_at < $2))",
        )
        .bind(stale_before)
        .bind(unclaimed_before)
        .bind(reason)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}
