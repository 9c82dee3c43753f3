// Workflow Executor - runs a single action against the trigger payload

use chrono::{Duration as ChronoDuration, Utc};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};
use uuid::Uuid;

use verigrade_shared::{
    ActionSpec, AssignUserConfig, CreateInvoiceConfig, CreateTaskConfig, HttpMethod, SendEmailConfig,
    SendSmsConfig, UpdateStatusConfig, WebhookCallConfig, WorkflowAction,
};

use super::actions::{render_spec, ActionError};
use crate::services::{Mailer, OutgoingEmail};

pub struct ActionExecutor {
    http: reqwest::Client,
    mailer: Arc<dyn Mailer>,
    action_timeout: Duration,
}

impl ActionExecutor {
    pub fn new(mailer: Arc<dyn Mailer>, action_timeout: Duration) -> Self {
        Self {
            http: reqwest::Client::new(),
            mailer,
            action_timeout,
        }
    }

    /// Render the action config against the payload and run it under the action timeout.
    pub async fn execute(&self, action: &WorkflowAction, payload: &Value) -> Result<Value, ActionError> {
        let start = Instant::now();
        info!(action_id = %action.id, "Executing action: {} ({})", action.name, action.action_type().as_str());

        let spec = render_spec(&action.spec, payload)?;
        let result = tokio::time::timeout(self.action_timeout, self.dispatch(spec, payload))
            .await
            .map_err(|_| ActionError::Timeout(self.action_timeout))?;

        let duration = start.elapsed().as_millis();
        match &result {
            Ok(_) => info!(action_id = %action.id, duration_ms = duration, "Action completed"),
            Err(e) => warn!(action_id = %action.id, duration_ms = duration, "Action failed: {}", e),
        }
        result
    }

    async fn dispatch(&self, spec: ActionSpec, payload: &Value) -> Result<Value, ActionError> {
        match spec {
            ActionSpec::SendEmail(config) => self.send_email(config).await,
            ActionSpec::WebhookCall(config) => self.call_webhook(config, payload).await,
            ActionSpec::CreateTask(config) => Ok(create_task(config)),
            ActionSpec::UpdateStatus(config) => Ok(update_status(config)),
            ActionSpec::SendSms(config) => Ok(send_sms(config)),
            ActionSpec::CreateInvoice(config) => Ok(create_invoice(config)),
            ActionSpec::AssignUser(config) => Ok(assign_user(config)),
        }
    }

    async fn send_email(&self, config: SendEmailConfig) -> Result<Value, ActionError> {
        let output = json!({
            "sentTo": config.to,
            "cc": config.cc,
            "subject": config.subject,
        });

        self.mailer
            .send(OutgoingEmail {
                to: config.to,
                cc: config.cc,
                subject: config.subject,
                body: config.body,
            })
            .await?;

        Ok(output)
    }

    async fn call_webhook(&self, config: WebhookCallConfig, payload: &Value) -> Result<Value, ActionError> {
        let mut request = match config.method {
            HttpMethod::Get => self.http.get(&config.url),
            HttpMethod::Post => self.http.post(&config.url),
            HttpMethod::Put => self.http.put(&config.url),
            HttpMethod::Patch => self.http.patch(&config.url),
            HttpMethod::Delete => self.http.delete(&config.url),
        };

        for (key, value) in &config.headers {
            request = request.header(key, value);
        }

        // Body defaults to the trigger payload
        if !matches!(config.method, HttpMethod::Get) {
            request = request.json(config.payload.as_ref().unwrap_or(payload));
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ActionError::WebhookStatus(status.as_u16()));
        }

        Ok(json!({
            "url": config.url,
            "method": config.method,
            "statusCode": status.as_u16(),
        }))
    }
}

// Internal record keeping is owned by other services; these actions log and
// return the identifiers they would create.

fn create_task(config: CreateTaskConfig) -> Value {
    let task_id = Uuid::new_v4();
    let due_date = config
        .due_in_days
        .map(|days| (Utc::now() + ChronoDuration::days(days)).date_naive());
    info!(%task_id, title = %config.title, "Task created by workflow");

    json!({
        "taskId": task_id,
        "title": config.title,
        "assigneeId": config.assignee_id,
        "priority": config.priority,
        "dueDate": due_date,
    })
}

fn update_status(config: UpdateStatusConfig) -> Value {
    info!(entity_type = %config.entity_type, entity_id = ?config.entity_id, status = %config.status, "Status updated by workflow");

    json!({
        "entityType": config.entity_type,
        "entityId": config.entity_id,
        "status": config.status,
    })
}

fn send_sms(config: SendSmsConfig) -> Value {
    let message_id = Uuid::new_v4();
    info!(%message_id, to = %config.to, "SMS queued by workflow");

    json!({
        "messageId": message_id,
        "to": config.to,
        "length": config.message.chars().count(),
    })
}

fn create_invoice(config: CreateInvoiceConfig) -> Value {
    let invoice_id = Uuid::new_v4();
    let now = Utc::now();
    let invoice_number = format!(
        "INV-{}-{}",
        now.format("%Y%m%d"),
        &invoice_id.simple().to_string()[..6].to_uppercase()
    );
    let due_date = (now + ChronoDuration::days(config.due_in_days.unwrap_or(30))).date_naive();
    info!(%invoice_id, %invoice_number, amount = %config.amount, "Invoice created by workflow");

    json!({
        "invoiceId": invoice_id,
        "invoiceNumber": invoice_number,
        "customerId": config.customer_id,
        "amount": config.amount,
        "currency": config.currency,
        "dueDate": due_date,
    })
}

fn assign_user(config: AssignUserConfig) -> Value {
    info!(user_id = %config.user_id, entity_type = %config.entity_type, "User assigned by workflow");

    json!({
        "userId": config.user_id,
        "entityType": config.entity_type,
        "entityId": config.entity_id,
    })
}
