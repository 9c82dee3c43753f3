use axum::{
    body::Body,
    http::{header::AUTHORIZATION, Method, Request, StatusCode},
    Router,
};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;
use uuid::Uuid;

use verigrade_shared::WorkflowExecution;

use crate::auth::jwt::create_jwt;
use crate::config::{Config, SmtpConfig, WorkerConfig, MEMORY_DATABASE_URL};
use crate::jobs::JobLog;
use crate::services::{LogMailer, Mailer};
use crate::store::{MemoryWorkflowStore, WorkflowStore};
use crate::workflows::{spawn_dispatcher, ActionExecutor, WorkflowEngine};
use crate::{build_router, AppState};

pub const TEST_JWT_SECRET: &str = "test_secret_key_for_testing_only";

pub fn test_config() -> Config {
    Config {
        database_url: MEMORY_DATABASE_URL.to_string(),
        server_addr: "127.0.0.1:0".to_string(),
        jwt_secret: TEST_JWT_SECRET.to_string(),
        worker: WorkerConfig {
            action_timeout_secs: 5,
            ..WorkerConfig::default()
        },
        smtp: SmtpConfig::default(),
    }
}

pub fn create_test_jwt(user_id: Uuid, organization_id: Uuid) -> String {
    create_jwt(user_id, organization_id, "ops@verigrade.test", TEST_JWT_SECRET)
        .expect("Failed to create test JWT")
}

/// A caller of the API: one user inside one organization.
#[derive(Debug, Clone)]
pub struct TestUser {
    pub user_id: Uuid,
    pub organization_id: Uuid,
    pub token: String,
}

impl TestUser {
    pub fn new() -> Self {
        Self::in_organization(Uuid::new_v4())
    }

    pub fn in_organization(organization_id: Uuid) -> Self {
        let user_id = Uuid::new_v4();
        Self {
            user_id,
            organization_id,
            token: create_test_jwt(user_id, organization_id),
        }
    }
}

/// Full application wired to the in-memory store with a live dispatcher.
pub struct TestApp {
    pub router: Router,
    pub store: Arc<dyn WorkflowStore>,
    pub engine: Arc<WorkflowEngine>,
}

impl TestApp {
    pub fn new() -> Self {
        Self::with_mailer(Arc::new(LogMailer))
    }

    pub fn with_mailer(mailer: Arc<dyn Mailer>) -> Self {
        let config = test_config();
        let store: Arc<dyn WorkflowStore> = Arc::new(MemoryWorkflowStore::new());
        let executor = ActionExecutor::new(mailer, config.worker.action_timeout());
        let (engine, receiver) = WorkflowEngine::new(store.clone(), executor, config.worker.queue_capacity);
        spawn_dispatcher(engine.clone(), receiver, config.worker.concurrency);

        let router = build_router(Arc::new(AppState {
            store: store.clone(),
            engine: engine.clone(),
            job_log: JobLog::new(),
            config,
        }));

        Self { router, store, engine }
    }

    /// Send a request and decode the JSON body (`Value::Null` when empty).
    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        user: Option<&TestUser>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(user) = user {
            builder = builder.header(AUTHORIZATION, format!("Bearer {}", user.token));
        }

        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(serde_json::to_vec(&body).unwrap()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, json)
    }

    pub async fn get(&self, uri: &str, user: &TestUser) -> (StatusCode, Value) {
        self.request(Method::GET, uri, Some(user), None).await
    }

    pub async fn post(&self, uri: &str, user: &TestUser, body: Value) -> (StatusCode, Value) {
        self.request(Method::POST, uri, Some(user), Some(body)).await
    }

    pub async fn put(&self, uri: &str, user: &TestUser, body: Value) -> (StatusCode, Value) {
        self.request(Method::PUT, uri, Some(user), Some(body)).await
    }

    pub async fn delete(&self, uri: &str, user: &TestUser) -> (StatusCode, Value) {
        self.request(Method::DELETE, uri, Some(user), None).await
    }

    /// Create a workflow through the API and return its id.
    pub async fn create_workflow(&self, user: &TestUser, body: Value) -> Uuid {
        let (status, json) = self.post("/api/workflows", user, body).await;
        assert_eq!(status, StatusCode::CREATED, "create failed: {json}");
        json["workflow"]["id"].as_str().unwrap().parse().unwrap()
    }
}

/// Poll the store until the execution leaves `running`.
pub async fn wait_for_execution(
    store: &Arc<dyn WorkflowStore>,
    organization_id: Uuid,
    execution_id: Uuid,
) -> WorkflowExecution {
    for _ in 0..200 {
        if let Some(execution) = store.get_execution(organization_id, execution_id).await.unwrap() {
            if execution.status.is_terminal() {
                return execution;
            }
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("execution {execution_id} did not finish in time");
}
