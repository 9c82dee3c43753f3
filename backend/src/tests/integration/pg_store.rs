// Postgres store tests. Run with TEST_DATABASE_URL set:
//   cargo test -- --ignored pg_store

use chrono::{Duration, Utc};
use serde_json::json;
use serial_test::serial;
use uuid::Uuid;

use verigrade_shared::{ActionStatus, ExecutionSource, ExecutionStatus, TriggerType, WorkflowExecution};

use crate::database;
use crate::pagination::PaginationParams;
use crate::store::{ExecutionFilter, PgWorkflowStore, WorkflowChanges, WorkflowFilter, WorkflowStore};
use crate::tests::fixtures::{email_spec, new_workflow, task_spec};

async fn store() -> PgWorkflowStore {
    let url = std::env::var("TEST_DATABASE_URL").expect("TEST_DATABASE_URL must be set");
    let pool = database::create_pool(&url).await.expect("Failed to connect to test database");
    database::migrate(&pool).await.expect("Failed to run migrations");
    PgWorkflowStore::new(pool)
}

#[tokio::test]
#[serial]
#[ignore]
async fn test_pg_workflow_round_trip_and_cascade() {
    let store = store().await;
    let org = Uuid::new_v4();

    let workflow = store
        .create_workflow(new_workflow(
            org,
            TriggerType::InvoiceSent,
            vec![email_spec("ap@acme.test"), task_spec("Follow up")],
        ))
        .await
        .unwrap();

    let loaded = store.get_workflow(org, workflow.id).await.unwrap().unwrap();
    assert_eq!(loaded.actions.len(), 2);
    assert_eq!(loaded.actions[0].spec, workflow.actions[0].spec);
    assert_eq!(loaded.trigger.trigger_type, TriggerType::InvoiceSent);
    assert!(store.get_workflow(Uuid::new_v4(), workflow.id).await.unwrap().is_none());

    let execution = WorkflowExecution::start(&loaded, ExecutionSource::Manual, json!({"a": 1}));
    store.insert_execution(&execution).await.unwrap();

    let recent = store
        .recent_executions_by_workflow(org, &[workflow.id, Uuid::new_v4()], 5)
        .await
        .unwrap();
    assert_eq!(recent.len(), 1);
    assert_eq!(recent[&workflow.id][0].id, execution.id);

    assert!(store.delete_workflow(org, workflow.id).await.unwrap());
    assert!(store.get_workflow(org, workflow.id).await.unwrap().is_none());
    assert!(store.get_execution(org, execution.id).await.unwrap().is_none());
}

#[tokio::test]
#[serial]
#[ignore]
async fn test_pg_filters_and_run_count() {
    let store = store().await;
    let org = Uuid::new_v4();

    let active = store
        .create_workflow(new_workflow(org, TriggerType::PaymentReceived, vec![task_spec("A")]))
        .await
        .unwrap();
    let paused = store
        .create_workflow(new_workflow(org, TriggerType::PaymentReceived, vec![task_spec("B")]))
        .await
        .unwrap();
    store
        .update_workflow(
            org,
            paused.id,
            WorkflowChanges {
                is_active: Some(false),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let filter = WorkflowFilter {
        is_active: Some(true),
        search: None,
    };
    let (workflows, total) = store
        .list_workflows(org, &filter, &PaginationParams::default())
        .await
        .unwrap();
    assert_eq!(total, 1);
    assert_eq!(workflows[0].id, active.id);

    let candidates = store
        .workflows_for_trigger(org, TriggerType::PaymentReceived)
        .await
        .unwrap();
    assert_eq!(candidates.len(), 1);

    store.record_completed_run(active.id, Utc::now()).await.unwrap();
    store.record_completed_run(active.id, Utc::now()).await.unwrap();
    let reloaded = store.get_workflow(org, active.id).await.unwrap().unwrap();
    assert_eq!(reloaded.run_count, 2);
    assert!(reloaded.last_run.is_some());

    store.delete_workflow(org, active.id).await.unwrap();
    store.delete_workflow(org, paused.id).await.unwrap();
}

#[tokio::test]
#[serial]
#[ignore]
async fn test_pg_orphaned_executions_are_failed() {
    let store = store().await;
    let org = Uuid::new_v4();
    let workflow = store
        .create_workflow(new_workflow(org, TriggerType::Custom, vec![task_spec("A"), task_spec("B")]))
        .await
        .unwrap();

    let mut execution = WorkflowExecution::start(&workflow, ExecutionSource::Event, json!({}));
    execution.heartbeat_at = Utc::now() - Duration::hours(1);
    execution.picked_up_at = Some(execution.heartbeat_at);
    execution.actions[0].status = ActionStatus::Running;
    store.insert_execution(&execution).await.unwrap();

    let failed = store
        .fail_orphaned_executions(Utc::now() - Duration::minutes(5), Utc::now() - Duration::hours(1), "lost")
        .await
        .unwrap();
    assert!(failed >= 1);

    let stored = store.get_execution(org, execution.id).await.unwrap().unwrap();
    assert_eq!(stored.status, ExecutionStatus::Failed);
    assert_eq!(stored.error.as_deref(), Some("lost"));
    assert!(!store.update_execution(&execution).await.unwrap());
    assert_eq!(stored.actions[0].status, ActionStatus::Failed);
    assert_eq!(stored.actions[1].status, ActionStatus::Pending);

    let filter = ExecutionFilter {
        workflow_id: Some(workflow.id),
        status: Some(ExecutionStatus::Failed),
    };
    let (executions, total) = store
        .list_executions(org, &filter, &PaginationParams::default())
        .await
        .unwrap();
    assert_eq!(total, 1);
    assert_eq!(executions[0].workflow.id, workflow.id);

    store.delete_workflow(org, workflow.id).await.unwrap();
}
