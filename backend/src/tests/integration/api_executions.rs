use axum::body::Body;
use axum::http::{header::AUTHORIZATION, Method, Request, StatusCode};
use serde_json::json;
use tower::ServiceExt;
use uuid::Uuid;
use wiremock::matchers::{body_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use verigrade_shared::{ActionStatus, ExecutionStatus, TriggerType};

use crate::tests::fixtures::*;
use crate::tests::helpers::{wait_for_execution, TestApp, TestUser};

fn execution_id(body: &serde_json::Value) -> Uuid {
    body["execution"]["id"].as_str().unwrap().parse().unwrap()
}

#[tokio::test]
async fn test_run_completes_and_increments_run_count() {
    let app = TestApp::new();
    let user = TestUser::new();
    let id = app.create_workflow(&user, WorkflowFixture::default().body()).await;

    let (status, body) = app
        .post(
            &format!("/api/workflows/{id}/run"),
            &user,
            json!({"payload": {"invoice": {"number": 1042}, "customer": {"name": "Acme"}}}),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["execution"]["workflowId"], id.to_string());
    assert_eq!(body["execution"]["source"], "manual");

    let execution = wait_for_execution(&app.store, user.organization_id, execution_id(&body)).await;
    assert_eq!(execution.status, ExecutionStatus::Completed);
    assert_eq!(execution.trigger_payload["invoice"]["number"], 1042);
    assert_eq!(
        execution.actions[0].output.as_ref().unwrap()["subject"],
        "Invoice 1042 sent"
    );

    let (_, body) = app.get(&format!("/api/workflows/{id}"), &user).await;
    assert_eq!(body["workflow"]["runCount"], 1);
    assert!(body["workflow"]["lastRun"].is_string());
    assert_eq!(body["workflow"]["executions"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_run_without_body_uses_empty_payload() {
    let app = TestApp::new();
    let user = TestUser::new();
    let id = app
        .create_workflow(&user, WorkflowFixture::default().with_actions(vec![task_action("Review")]).body())
        .await;

    let (status, body) = app
        .request(Method::POST, &format!("/api/workflows/{id}/run"), Some(&user), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["execution"]["triggerPayload"], json!({}));
}

#[tokio::test]
async fn test_run_with_malformed_body_is_rejected() {
    let app = TestApp::new();
    let user = TestUser::new();
    let id = app.create_workflow(&user, WorkflowFixture::default().body()).await;

    let request = Request::builder()
        .method(Method::POST)
        .uri(format!("/api/workflows/{id}/run"))
        .header(AUTHORIZATION, format!("Bearer {}", user.token))
        .header("content-type", "application/json")
        .body(Body::from("{\"payload\": "))
        .unwrap();
    let response = app.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let (_, body) = app.get("/api/workflows/executions", &user).await;
    assert_eq!(body["pagination"]["total"], 0);
}

#[tokio::test]
async fn test_list_includes_recent_executions() {
    let app = TestApp::new();
    let user = TestUser::new();
    let busy = app.create_workflow(&user, WorkflowFixture::default().body()).await;
    let idle = app.create_workflow(&user, WorkflowFixture::default().body()).await;

    for _ in 0..6 {
        let (_, body) = app.post(&format!("/api/workflows/{busy}/run"), &user, json!({})).await;
        wait_for_execution(&app.store, user.organization_id, execution_id(&body)).await;
    }

    let (status, body) = app.get("/api/workflows", &user).await;
    assert_eq!(status, StatusCode::OK);
    let workflows = body["workflows"].as_array().unwrap();
    let find = |id: Uuid| {
        workflows
            .iter()
            .find(|w| w["id"] == id.to_string())
            .unwrap()
            .clone()
    };

    assert_eq!(find(busy)["executions"].as_array().unwrap().len(), 5);
    assert_eq!(find(idle)["executions"], json!([]));
}

#[tokio::test]
async fn test_run_inactive_workflow_is_rejected() {
    let app = TestApp::new();
    let user = TestUser::new();
    let id = app.create_workflow(&user, WorkflowFixture::default().body()).await;
    app.put(&format!("/api/workflows/{id}"), &user, json!({"isActive": false}))
        .await;

    let (status, body) = app.post(&format!("/api/workflows/{id}/run"), &user, json!({})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "Workflow is not active");

    let (_, body) = app.get("/api/workflows/executions", &user).await;
    assert_eq!(body["pagination"]["total"], 0);

    let (_, body) = app.get(&format!("/api/workflows/{id}"), &user).await;
    assert_eq!(body["workflow"]["runCount"], 0);
}

#[tokio::test]
async fn test_failing_webhook_stops_later_actions() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/hooks/erp"))
        .respond_with(ResponseTemplate::new(502))
        .expect(1)
        .mount(&server)
        .await;

    let app = TestApp::new();
    let user = TestUser::new();
    let fixture = WorkflowFixture::default().with_actions(vec![
        task_action("Log invoice"),
        webhook_action(&format!("{}/hooks/erp", server.uri())),
        email_action("ap@acme.test"),
    ]);
    let id = app.create_workflow(&user, fixture.body()).await;

    let (_, body) = app.post(&format!("/api/workflows/{id}/run"), &user, json!({})).await;
    let execution = wait_for_execution(&app.store, user.organization_id, execution_id(&body)).await;

    assert_eq!(execution.status, ExecutionStatus::Failed);
    assert_eq!(
        execution.error.as_deref(),
        Some("Action 2 (webhook_call) failed: webhook responded with status 502")
    );
    let statuses: Vec<ActionStatus> = execution.actions.iter().map(|a| a.status).collect();
    assert_eq!(
        statuses,
        vec![ActionStatus::Completed, ActionStatus::Failed, ActionStatus::Pending]
    );

    let (_, body) = app.get(&format!("/api/workflows/{id}"), &user).await;
    assert_eq!(body["workflow"]["runCount"], 0);
}

#[tokio::test]
async fn test_webhook_receives_trigger_payload() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_json(json!({"payment": {"amount": 250}})))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let app = TestApp::new();
    let user = TestUser::new();
    let id = app
        .create_workflow(
            &user,
            WorkflowFixture::default()
                .with_actions(vec![webhook_action(&server.uri())])
                .body(),
        )
        .await;

    let (_, body) = app
        .post(
            &format!("/api/workflows/{id}/run"),
            &user,
            json!({"payload": {"payment": {"amount": 250}}}),
        )
        .await;
    let execution = wait_for_execution(&app.store, user.organization_id, execution_id(&body)).await;
    assert_eq!(execution.status, ExecutionStatus::Completed);
    assert_eq!(execution.actions[0].output.as_ref().unwrap()["statusCode"], 200);
}

#[tokio::test]
async fn test_delete_removes_executions() {
    let app = TestApp::new();
    let user = TestUser::new();
    let id = app.create_workflow(&user, WorkflowFixture::default().body()).await;

    let (_, body) = app.post(&format!("/api/workflows/{id}/run"), &user, json!({})).await;
    let execution_id = execution_id(&body);
    wait_for_execution(&app.store, user.organization_id, execution_id).await;

    let (status, body) = app.delete(&format!("/api/workflows/{id}"), &user).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Workflow deleted successfully");

    let (status, _) = app.get(&format!("/api/workflows/{id}"), &user).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = app
        .get(&format!("/api/workflows/executions/{execution_id}"), &user)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (_, body) = app.get("/api/workflows/executions", &user).await;
    assert_eq!(body["pagination"]["total"], 0);
}

#[tokio::test]
async fn test_execution_list_filters_and_attaches_workflow() {
    let app = TestApp::new();
    let user = TestUser::new();
    let outsider = TestUser::new();

    let mut fixture = WorkflowFixture::default();
    fixture.name = "Collections".to_string();
    let collections = app.create_workflow(&user, fixture.body()).await;
    let onboarding = app.create_workflow(&user, WorkflowFixture::default().body()).await;
    let foreign = app.create_workflow(&outsider, WorkflowFixture::default().body()).await;

    for (owner, id) in [(&user, collections), (&user, collections), (&user, onboarding), (&outsider, foreign)] {
        let (_, body) = app.post(&format!("/api/workflows/{id}/run"), owner, json!({})).await;
        wait_for_execution(&app.store, owner.organization_id, execution_id(&body)).await;
    }

    let (status, body) = app
        .get(&format!("/api/workflows/executions?workflowId={collections}"), &user)
        .await;
    assert_eq!(status, StatusCode::OK);
    let executions = body["executions"].as_array().unwrap();
    assert_eq!(executions.len(), 2);
    assert_eq!(executions[0]["workflow"]["name"], "Collections");
    assert_eq!(executions[0]["workflow"]["id"], collections.to_string());

    let (_, body) = app.get("/api/workflows/executions?status=completed", &user).await;
    assert_eq!(body["pagination"]["total"], 3);

    let (_, body) = app.get("/api/workflows/executions?status=failed", &user).await;
    assert_eq!(body["pagination"]["total"], 0);
}

#[tokio::test]
async fn test_stats_after_runs() {
    let app = TestApp::new();
    let user = TestUser::new();
    let id = app.create_workflow(&user, WorkflowFixture::default().body()).await;

    for _ in 0..2 {
        let (_, body) = app.post(&format!("/api/workflows/{id}/run"), &user, json!({})).await;
        wait_for_execution(&app.store, user.organization_id, execution_id(&body)).await;
    }

    let (status, body) = app.get(&format!("/api/workflows/{id}/stats"), &user).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["stats"]["totalExecutions"], 2);
    assert_eq!(body["stats"]["completed"], 2);
    assert_eq!(body["stats"]["failed"], 0);
    assert_eq!(body["stats"]["successRate"], 100.0);

    let (status, _) = app
        .get(&format!("/api/workflows/{}/stats", Uuid::new_v4()), &user)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_event_dispatch_starts_matching_workflows() {
    let app = TestApp::new();
    let user = TestUser::new();

    let matching = app
        .create_workflow(
            &user,
            WorkflowFixture::default()
                .with_trigger(TriggerType::PaymentReceived)
                .with_trigger_conditions(json!([
                    {"field": "amount", "operator": "greater_than_or_equal", "value": 1000}
                ]))
                .with_conditions(json!([
                    {"field": "currency", "operator": "equals", "value": "USD", "logic": "AND"}
                ]))
                .with_actions(vec![task_action("Thank customer")])
                .body(),
        )
        .await;
    app.create_workflow(
        &user,
        WorkflowFixture::default()
            .with_trigger(TriggerType::PaymentReceived)
            .with_conditions(json!([
                {"field": "currency", "operator": "equals", "value": "EUR", "logic": "AND"}
            ]))
            .body(),
    )
    .await;
    app.create_workflow(&user, WorkflowFixture::default().with_trigger(TriggerType::InvoiceSent).body())
        .await;

    let (status, body) = app
        .post(
            "/api/workflows/events",
            &user,
            json!({"type": "payment_received", "payload": {"amount": 1500, "currency": "USD"}}),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let executions = body["executions"].as_array().unwrap();
    assert_eq!(executions.len(), 1);
    assert_eq!(executions[0]["workflowId"], matching.to_string());
    assert_eq!(executions[0]["source"], "event");

    let (_, body) = app
        .post(
            "/api/workflows/events",
            &user,
            json!({"type": "payment_received", "payload": {"amount": 10, "currency": "USD"}}),
        )
        .await;
    assert_eq!(body["executions"], json!([]));
}
