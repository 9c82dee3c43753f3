use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

// ===== Triggers =====

/// Domain events a workflow can be started by.
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(type_name = "workflow_trigger_type", rename_all = "snake_case"))]
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
    TransactionCreated,
    InvoiceSent,
    PaymentReceived,
    DueDateApproaching,
    UserRegistered,
    Custom,
}

impl TriggerType {
    pub const ALL: [TriggerType; 6] = [
        TriggerType::TransactionCreated,
        TriggerType::InvoiceSent,
        TriggerType::PaymentReceived,
        TriggerType::DueDateApproaching,
        TriggerType::UserRegistered,
        TriggerType::Custom,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerType::TransactionCreated => "transaction_created",
            TriggerType::InvoiceSent => "invoice_sent",
            TriggerType::PaymentReceived => "payment_received",
            TriggerType::DueDateApproaching => "due_date_approaching",
            TriggerType::UserRegistered => "user_registered",
            TriggerType::Custom => "custom",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            TriggerType::TransactionCreated => "Transaction Created",
            TriggerType::InvoiceSent => "Invoice Sent",
            TriggerType::PaymentReceived => "Payment Received",
            TriggerType::DueDateApproaching => "Due Date Approaching",
            TriggerType::UserRegistered => "User Registered",
            TriggerType::Custom => "Custom Trigger",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            TriggerType::TransactionCreated => "Triggered when a new transaction is created",
            TriggerType::InvoiceSent => "Triggered when an invoice is sent to a client",
            TriggerType::PaymentReceived => "Triggered when a payment is received",
            TriggerType::DueDateApproaching => "Triggered when an invoice due date is approaching",
            TriggerType::UserRegistered => "Triggered when a new user registers",
            TriggerType::Custom => "Custom trigger based on specific conditions",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowTrigger {
    pub id: Uuid,
    pub workflow_id: Uuid,
    #[serde(rename = "type")]
    pub trigger_type: TriggerType,
    pub name: String,
    pub description: String,
    pub conditions: Vec<Condition>,
    pub is_active: bool,
}

// ===== Conditions =====

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOperator {
    #[serde(alias = "eq", alias = "==")]
    Equals,
    #[serde(alias = "ne", alias = "!=")]
    NotEquals,
    Contains,
    NotContains,
    StartsWith,
    EndsWith,
    #[serde(alias = "gt", alias = ">")]
    GreaterThan,
    #[serde(alias = "gte", alias = ">=")]
    GreaterThanOrEqual,
    #[serde(alias = "lt", alias = "<")]
    LessThan,
    #[serde(alias = "lte", alias = "<=")]
    LessThanOrEqual,
    In,
    NotIn,
    IsEmpty,
    IsNotEmpty,
    Regex,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum ConditionLogic {
    #[default]
    And,
    Or,
}

/// A single comparison against a field of the event payload.
/// `field` supports dot notation for nested objects.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Condition {
    pub field: String,
    pub operator: ConditionOperator,
    #[serde(default)]
    pub value: serde_json::Value,
}

/// Workflow-level condition; `logic` joins it to the conditions before it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkflowCondition {
    pub field: String,
    pub operator: ConditionOperator,
    #[serde(default)]
    pub value: serde_json::Value,
    #[serde(default)]
    pub logic: ConditionLogic,
}

impl WorkflowCondition {
    pub fn as_condition(&self) -> Condition {
        Condition {
            field: self.field.clone(),
            operator: self.operator,
            value: self.value.clone(),
        }
    }
}

// ===== Actions =====

#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(type_name = "workflow_action_type", rename_all = "snake_case"))]
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    SendEmail,
    CreateTask,
    UpdateStatus,
    WebhookCall,
    SendSms,
    CreateInvoice,
    AssignUser,
}

impl ActionType {
    pub const ALL: [ActionType; 7] = [
        ActionType::SendEmail,
        ActionType::CreateTask,
        ActionType::UpdateStatus,
        ActionType::WebhookCall,
        ActionType::SendSms,
        ActionType::CreateInvoice,
        ActionType::AssignUser,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ActionType::SendEmail => "send_email",
            ActionType::CreateTask => "create_task",
            ActionType::UpdateStatus => "update_status",
            ActionType::WebhookCall => "webhook_call",
            ActionType::SendSms => "send_sms",
            ActionType::CreateInvoice => "create_invoice",
            ActionType::AssignUser => "assign_user",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            ActionType::SendEmail => "Send Email",
            ActionType::CreateTask => "Create Task",
            ActionType::UpdateStatus => "Update Status",
            ActionType::WebhookCall => "Webhook Call",
            ActionType::SendSms => "Send SMS",
            ActionType::CreateInvoice => "Create Invoice",
            ActionType::AssignUser => "Assign User",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            ActionType::SendEmail => "Send an email notification",
            ActionType::CreateTask => "Create a new task",
            ActionType::UpdateStatus => "Update record status",
            ActionType::WebhookCall => "Call external webhook",
            ActionType::SendSms => "Send SMS notification",
            ActionType::CreateInvoice => "Create new invoice",
            ActionType::AssignUser => "Assign to specific user",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    #[default]
    Post,
    Put,
    Patch,
    Delete,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SendEmailConfig {
    pub to: String,
    pub subject: String,
    pub body: String,
    #[serde(default)]
    pub cc: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CreateTaskConfig {
    pub title: String,
    pub description: Option<String>,
    pub assignee_id: Option<Uuid>,
    pub due_in_days: Option<i64>,
    pub priority: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UpdateStatusConfig {
    pub entity_type: String,
    pub entity_id: Option<String>,
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WebhookCallConfig {
    pub url: String,
    #[serde(default)]
    pub method: HttpMethod,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    pub payload: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SendSmsConfig {
    pub to: String,
    pub message: String,
}

fn default_currency() -> String {
    "USD".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CreateInvoiceConfig {
    pub customer_id: Option<String>,
    pub amount: Decimal,
    #[serde(default = "default_currency")]
    pub currency: String,
    pub due_in_days: Option<i64>,
    pub memo: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AssignUserConfig {
    pub user_id: Uuid,
    pub entity_type: String,
    pub entity_id: Option<String>,
}

/// Typed action payload. On the wire: `{"type": "send_email", "config": {...}}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "config", rename_all = "snake_case")]
pub enum ActionSpec {
    SendEmail(SendEmailConfig),
    CreateTask(CreateTaskConfig),
    UpdateStatus(UpdateStatusConfig),
    WebhookCall(WebhookCallConfig),
    SendSms(SendSmsConfig),
    CreateInvoice(CreateInvoiceConfig),
    AssignUser(AssignUserConfig),
}

impl ActionSpec {
    pub fn action_type(&self) -> ActionType {
        match self {
            ActionSpec::SendEmail(_) => ActionType::SendEmail,
            ActionSpec::CreateTask(_) => ActionType::CreateTask,
            ActionSpec::UpdateStatus(_) => ActionType::UpdateStatus,
            ActionSpec::WebhookCall(_) => ActionType::WebhookCall,
            ActionSpec::SendSms(_) => ActionType::SendSms,
            ActionSpec::CreateInvoice(_) => ActionType::CreateInvoice,
            ActionSpec::AssignUser(_) => ActionType::AssignUser,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowAction {
    pub id: Uuid,
    pub workflow_id: Uuid,
    pub position: i32,
    pub name: String,
    pub description: String,
    #[serde(flatten)]
    pub spec: ActionSpec,
    pub is_active: bool,
}

impl WorkflowAction {
    pub fn action_type(&self) -> ActionType {
        self.spec.action_type()
    }
}

// ===== Workflows =====

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Workflow {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub is_active: bool,
    pub conditions: Vec<WorkflowCondition>,
    pub run_count: i64,
    pub last_run: Option<DateTime<Utc>>,
    pub trigger: WorkflowTrigger,
    pub actions: Vec<WorkflowAction>,
    pub created_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ===== Executions =====

#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(type_name = "workflow_execution_status", rename_all = "snake_case"))]
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Running,
    Completed,
    Failed,
}

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ExecutionStatus::Running)
    }
}

#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(type_name = "workflow_execution_source", rename_all = "snake_case"))]
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionSource {
    Manual,
    Event,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

/// Per-action snapshot stored on an execution.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ActionRun {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub action_type: ActionType,
    pub status: ActionStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub output: Option<serde_json::Value>,
    pub error: Option<String>,
}

impl ActionRun {
    pub fn pending(action: &WorkflowAction) -> Self {
        Self {
            id: action.id,
            action_type: action.action_type(),
            status: ActionStatus::Pending,
            started_at: None,
            completed_at: None,
            output: None,
            error: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowExecution {
    pub id: Uuid,
    pub workflow_id: Uuid,
    pub organization_id: Uuid,
    pub status: ExecutionStatus,
    pub source: ExecutionSource,
    pub trigger_payload: serde_json::Value,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub heartbeat_at: DateTime<Utc>,
    /// Set when a worker takes the execution off the queue
    pub picked_up_at: Option<DateTime<Utc>>,
    pub actions: Vec<ActionRun>,
    pub error: Option<String>,
}

impl WorkflowExecution {
    /// New running execution with every active action pending.
    pub fn start(workflow: &Workflow, source: ExecutionSource, trigger_payload: serde_json::Value) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            workflow_id: workflow.id,
            organization_id: workflow.organization_id,
            status: ExecutionStatus::Running,
            source,
            trigger_payload,
            started_at: now,
            completed_at: None,
            heartbeat_at: now,
            picked_up_at: None,
            actions: workflow
                .actions
                .iter()
                .filter(|a| a.is_active)
                .map(ActionRun::pending)
                .collect(),
            error: None,
        }
    }
}

/// Minimal workflow reference attached to execution listings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkflowRef {
    pub id: Uuid,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionWithWorkflow {
    #[serde(flatten)]
    pub execution: WorkflowExecution,
    pub workflow: WorkflowRef,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowStats {
    pub workflow_id: Uuid,
    pub total_executions: i64,
    pub running: i64,
    pub completed: i64,
    pub failed: i64,
    /// Percentage of finished executions that completed.
    pub success_rate: f64,
    pub average_duration_ms: Option<f64>,
}

impl WorkflowStats {
    pub fn from_counts(
        workflow_id: Uuid,
        running: i64,
        completed: i64,
        failed: i64,
        average_duration_ms: Option<f64>,
    ) -> Self {
        let finished = completed + failed;
        let success_rate = if finished > 0 {
            completed as f64 / finished as f64 * 100.0
        } else {
            0.0
        };
        Self {
            workflow_id,
            total_executions: running + completed + failed,
            running,
            completed,
            failed,
            success_rate,
            average_duration_ms,
        }
    }
}
