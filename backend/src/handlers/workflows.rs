use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use uuid::Uuid;

use verigrade_shared::{
    ActionSpec, ActionType, ExecutionStatus, ExecutionWithWorkflow, TriggerType, Workflow, WorkflowCondition,
    WorkflowExecution, WorkflowStats,
};

use crate::auth::AuthUser;
use crate::error::{ApiError, ApiResult, ValidationBuilder};
use crate::pagination::{PaginationMeta, PaginationParams, DEFAULT_PAGE, DEFAULT_PAGE_SIZE};
use crate::store::{ExecutionFilter, NewWorkflow, TriggerInput, WorkflowChanges, WorkflowFilter};
use crate::validation::{self, JsonBody, OptionalJsonBody, QueryParams};
use crate::workflows::TriggerEvent;
use crate::AppState;

/// Executions embedded in a workflow detail response
const RECENT_EXECUTIONS: i64 = 10;

/// Executions embedded per workflow in list responses
const LIST_RECENT_EXECUTIONS: i64 = 5;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateWorkflowRequest {
    #[serde(default)]
    pub name: String,
    pub description: Option<String>,
    #[serde(default)]
    pub conditions: Vec<WorkflowCondition>,
    pub trigger: TriggerInput,
    #[serde(default)]
    pub actions: Vec<ActionSpec>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateWorkflowRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub is_active: Option<bool>,
    pub conditions: Option<Vec<WorkflowCondition>>,
    pub trigger: Option<TriggerInput>,
    pub actions: Option<Vec<ActionSpec>>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RunWorkflowRequest {
    #[serde(default)]
    pub payload: Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowQuery {
    pub page: Option<i64>,
    #[serde(alias = "per_page")]
    pub limit: Option<i64>,
    #[serde(alias = "is_active")]
    pub is_active: Option<bool>,
    pub search: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionQuery {
    pub page: Option<i64>,
    #[serde(alias = "per_page")]
    pub limit: Option<i64>,
    #[serde(alias = "workflow_id")]
    pub workflow_id: Option<Uuid>,
    pub status: Option<ExecutionStatus>,
}

fn page_params(page: Option<i64>, limit: Option<i64>) -> PaginationParams {
    PaginationParams::new(page.unwrap_or(DEFAULT_PAGE), limit.unwrap_or(DEFAULT_PAGE_SIZE))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowDetail {
    #[serde(flatten)]
    pub workflow: Workflow,
    pub executions: Vec<WorkflowExecution>,
}

#[derive(Debug, Serialize)]
pub struct WorkflowListResponse {
    pub workflows: Vec<WorkflowDetail>,
    pub pagination: PaginationMeta,
}

#[derive(Debug, Serialize)]
pub struct ExecutionListResponse {
    pub executions: Vec<ExecutionWithWorkflow>,
    pub pagination: PaginationMeta,
}

#[derive(Debug, Serialize)]
pub struct CatalogEntry {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub name: &'static str,
    pub description: &'static str,
}

#[derive(Debug, Serialize)]
pub struct Catalog {
    pub triggers: Vec<CatalogEntry>,
    pub actions: Vec<CatalogEntry>,
}

pub fn workflow_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_workflows).post(create_workflow))
        .route("/catalog", get(get_catalog))
        .route("/events", post(dispatch_event))
        .route("/executions", get(list_executions))
        .route("/executions/:id", get(get_execution))
        .route("/:id", get(get_workflow).put(update_workflow).delete(delete_workflow))
        .route("/:id/run", post(run_workflow))
        .route("/:id/stats", get(get_workflow_stats))
}

async fn list_workflows(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    QueryParams(params): QueryParams<WorkflowQuery>,
) -> ApiResult<Json<WorkflowListResponse>> {
    let page = page_params(params.page, params.limit);
    let filter = WorkflowFilter {
        is_active: params.is_active,
        search: params.search,
    };

    let (workflows, total) = state
        .store
        .list_workflows(auth.organization_id, &filter, &page)
        .await?;

    let ids: Vec<Uuid> = workflows.iter().map(|w| w.id).collect();
    let mut recent = state
        .store
        .recent_executions_by_workflow(auth.organization_id, &ids, LIST_RECENT_EXECUTIONS)
        .await?;

    let workflows = workflows
        .into_iter()
        .map(|workflow| WorkflowDetail {
            executions: recent.remove(&workflow.id).unwrap_or_default(),
            workflow,
        })
        .collect();

    Ok(Json(WorkflowListResponse {
        workflows,
        pagination: PaginationMeta::new(&page, total),
    }))
}

async fn get_workflow(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Value>> {
    let workflow = state
        .store
        .get_workflow(auth.organization_id, id)
        .await?
        .ok_or_else(|| ApiError::not_found("Workflow"))?;

    let executions = state
        .store
        .recent_executions(auth.organization_id, id, RECENT_EXECUTIONS)
        .await?;

    Ok(Json(json!({ "workflow": WorkflowDetail { workflow, executions } })))
}

async fn create_workflow(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    JsonBody(req): JsonBody<CreateWorkflowRequest>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let mut v = ValidationBuilder::new();
    validation::validate_name(&mut v, &req.name);
    validation::validate_actions(&mut v, &req.actions);
    validation::validate_workflow_conditions(&mut v, &req.conditions);
    validation::validate_trigger_conditions(&mut v, &req.trigger.conditions);
    v.finish()?;

    let workflow = state
        .store
        .create_workflow(NewWorkflow {
            organization_id: auth.organization_id,
            created_by: Some(auth.user_id),
            name: req.name.trim().to_string(),
            description: req.description,
            conditions: req.conditions,
            trigger: req.trigger,
            actions: req.actions,
        })
        .await?;

    tracing::info!(workflow_id = %workflow.id, organization_id = %auth.organization_id, "Workflow created");
    Ok((StatusCode::CREATED, Json(json!({ "workflow": workflow }))))
}

async fn update_workflow(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
    JsonBody(req): JsonBody<UpdateWorkflowRequest>,
) -> ApiResult<Json<Value>> {
    let mut v = ValidationBuilder::new();
    if let Some(name) = &req.name {
        validation::validate_name(&mut v, name);
    }
    if let Some(actions) = &req.actions {
        validation::validate_actions(&mut v, actions);
    }
    if let Some(conditions) = &req.conditions {
        validation::validate_workflow_conditions(&mut v, conditions);
    }
    if let Some(trigger) = &req.trigger {
        validation::validate_trigger_conditions(&mut v, &trigger.conditions);
    }
    v.finish()?;

    let changes = WorkflowChanges {
        name: req.name.map(|n| n.trim().to_string()),
        description: req.description,
        is_active: req.is_active,
        conditions: req.conditions,
        trigger: req.trigger,
        actions: req.actions,
    };

    let workflow = state
        .store
        .update_workflow(auth.organization_id, id, changes)
        .await?
        .ok_or_else(|| ApiError::not_found("Workflow"))?;

    tracing::info!(workflow_id = %workflow.id, "Workflow updated");
    Ok(Json(json!({ "workflow": workflow })))
}

async fn delete_workflow(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Value>> {
    if !state.store.delete_workflow(auth.organization_id, id).await? {
        return Err(ApiError::not_found("Workflow"));
    }

    tracing::info!(workflow_id = %id, "Workflow deleted");
    Ok(Json(json!({ "message": "Workflow deleted successfully" })))
}

async fn run_workflow(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
    OptionalJsonBody(body): OptionalJsonBody<RunWorkflowRequest>,
) -> ApiResult<Json<Value>> {
    let payload = match body {
        Some(req) if !req.payload.is_null() => req.payload,
        _ => json!({}),
    };

    let execution = state
        .engine
        .start_manual_run(auth.organization_id, id, payload)
        .await?;

    Ok(Json(json!({ "execution": execution })))
}

async fn dispatch_event(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    JsonBody(event): JsonBody<TriggerEvent>,
) -> ApiResult<Json<Value>> {
    let executions = state.engine.dispatch_event(auth.organization_id, event).await?;
    Ok(Json(json!({ "executions": executions })))
}

async fn list_executions(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    QueryParams(params): QueryParams<ExecutionQuery>,
) -> ApiResult<Json<ExecutionListResponse>> {
    let page = page_params(params.page, params.limit);
    let filter = ExecutionFilter {
        workflow_id: params.workflow_id,
        status: params.status,
    };

    let (executions, total) = state
        .store
        .list_executions(auth.organization_id, &filter, &page)
        .await?;

    Ok(Json(ExecutionListResponse {
        executions,
        pagination: PaginationMeta::new(&page, total),
    }))
}

async fn get_execution(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Value>> {
    let execution = state
        .store
        .get_execution(auth.organization_id, id)
        .await?
        .ok_or_else(|| ApiError::not_found("Execution"))?;

    Ok(Json(json!({ "execution": execution })))
}

async fn get_workflow_stats(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Value>> {
    let stats: WorkflowStats = state.store.workflow_stats(auth.organization_id, id).await?;
    Ok(Json(json!({ "stats": stats })))
}

async fn get_catalog(_auth: AuthUser) -> Json<Catalog> {
    Json(Catalog {
        triggers: TriggerType::ALL
            .iter()
            .map(|t| CatalogEntry {
                kind: t.as_str(),
                name: t.display_name(),
                description: t.description(),
            })
            .collect(),
        actions: ActionType::ALL
            .iter()
            .map(|a| CatalogEntry {
                kind: a.as_str(),
                name: a.display_name(),
                description: a.description(),
            })
            .collect(),
    })
}
