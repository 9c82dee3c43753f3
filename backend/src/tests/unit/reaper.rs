use chrono::{Duration, Utc};
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

use verigrade_shared::{ActionStatus, ExecutionSource, ExecutionStatus, TriggerType, WorkflowExecution};

use crate::config::WorkerConfig;
use crate::jobs::{JobLog, JobScheduler, OrphanReaperJob, ORPHANED_EXECUTION_ERROR};
use crate::store::{MemoryWorkflowStore, WorkflowStore};
use crate::tests::fixtures::{new_workflow, task_spec};

async fn running_execution(
    store: &Arc<dyn WorkflowStore>,
    organization_id: Uuid,
    heartbeat_age: Duration,
) -> WorkflowExecution {
    let workflow = store
        .create_workflow(new_workflow(
            organization_id,
            TriggerType::DueDateApproaching,
            vec![task_spec("Chase invoice"), task_spec("Escalate")],
        ))
        .await
        .unwrap();

    let mut execution = WorkflowExecution::start(&workflow, ExecutionSource::Event, json!({"daysUntilDue": 3}));
    execution.heartbeat_at = Utc::now() - heartbeat_age;
    execution.picked_up_at = Some(execution.heartbeat_at);
    execution.actions[0].status = ActionStatus::Running;
    execution.actions[0].started_at = Some(execution.heartbeat_at);
    store.insert_execution(&execution).await.unwrap();
    execution
}

#[tokio::test]
async fn test_reaper_fails_only_stale_executions() {
    let store: Arc<dyn WorkflowStore> = Arc::new(MemoryWorkflowStore::new());
    let org = Uuid::new_v4();

    let stale = running_execution(&store, org, Duration::minutes(30)).await;
    let fresh = running_execution(&store, org, Duration::seconds(5)).await;

    let result = OrphanReaperJob::new(store.clone(), Duration::minutes(5), Duration::hours(1)).run().await.unwrap();
    assert_eq!(result.executions_failed, 1);

    let stale = store.get_execution(org, stale.id).await.unwrap().unwrap();
    assert_eq!(stale.status, ExecutionStatus::Failed);
    assert_eq!(stale.error.as_deref(), Some(ORPHANED_EXECUTION_ERROR));
    assert_eq!(stale.actions[0].status, ActionStatus::Failed);
    assert_eq!(stale.actions[1].status, ActionStatus::Pending);

    let fresh = store.get_execution(org, fresh.id).await.unwrap().unwrap();
    assert_eq!(fresh.status, ExecutionStatus::Running);
}

#[tokio::test]
async fn test_reaper_leaves_finished_executions_alone() {
    let store: Arc<dyn WorkflowStore> = Arc::new(MemoryWorkflowStore::new());
    let org = Uuid::new_v4();

    let mut execution = running_execution(&store, org, Duration::hours(2)).await;
    execution.status = ExecutionStatus::Completed;
    execution.completed_at = Some(Utc::now());
    store.update_execution(&execution).await.unwrap();

    let result = OrphanReaperJob::new(store.clone(), Duration::minutes(5), Duration::hours(1)).run().await.unwrap();
    assert_eq!(result.executions_failed, 0);

    let stored = store.get_execution(org, execution.id).await.unwrap().unwrap();
    assert_eq!(stored.status, ExecutionStatus::Completed);
    assert!(stored.error.is_none());
}

#[tokio::test]
async fn test_reaper_waits_for_queued_executions() {
    let store: Arc<dyn WorkflowStore> = Arc::new(MemoryWorkflowStore::new());
    let org = Uuid::new_v4();
    let workflow = store
        .create_workflow(new_workflow(org, TriggerType::InvoiceSent, vec![task_spec("Chase")]))
        .await
        .unwrap();

    // Backlogged behind slow workers: older than the lease but never picked up
    let mut queued = WorkflowExecution::start(&workflow, ExecutionSource::Event, json!({}));
    queued.started_at = Utc::now() - Duration::minutes(30);
    queued.heartbeat_at = queued.started_at;
    store.insert_execution(&queued).await.unwrap();

    let job = OrphanReaperJob::new(store.clone(), Duration::minutes(5), Duration::hours(1));
    assert_eq!(job.run().await.unwrap().executions_failed, 0);
    let stored = store.get_execution(org, queued.id).await.unwrap().unwrap();
    assert_eq!(stored.status, ExecutionStatus::Running);

    let job = OrphanReaperJob::new(store.clone(), Duration::minutes(5), Duration::minutes(20));
    assert_eq!(job.run().await.unwrap().executions_failed, 1);
}

#[tokio::test]
async fn test_startup_sweep_is_recorded_in_job_log() {
    let store: Arc<dyn WorkflowStore> = Arc::new(MemoryWorkflowStore::new());
    let org = Uuid::new_v4();
    running_execution(&store, org, Duration::hours(1)).await;

    let log = JobLog::new();
    let scheduler = JobScheduler::new(store, WorkerConfig::default(), log.clone())
        .await
        .unwrap();

    assert!(log.latest().await.is_none());
    assert_eq!(scheduler.sweep_orphans().await.unwrap(), 1);

    let entry = log.latest().await.unwrap();
    assert_eq!(entry.job_name, "Orphan Reaper");
    assert_eq!(entry.items_processed, 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_scheduler_starts_and_stops() {
    let store: Arc<dyn WorkflowStore> = Arc::new(MemoryWorkflowStore::new());
    let log = JobLog::new();
    let mut scheduler = JobScheduler::new(store, WorkerConfig::default(), log.clone())
        .await
        .unwrap();

    scheduler.start().await.unwrap();
    assert!(log.latest().await.is_none());
    scheduler.shutdown().await.unwrap();
}
