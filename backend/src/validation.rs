//! Request validation for workflow definitions
//!
//! Field errors are collected with `ValidationBuilder` so a single response lists every problem.

use axum::{
    async_trait,
    body::Bytes,
    extract::{FromRequest, FromRequestParts, Query, Request},
    http::request::Parts,
    Json,
};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use url::Url;

use verigrade_shared::{ActionSpec, Condition, ConditionOperator, WorkflowCondition};

use crate::error::{ApiError, AppError, ValidationBuilder};

/// Maximum workflow name length
pub const MAX_NAME_LENGTH: usize = 255;

/// Upper bound for `dueInDays` on tasks and invoices
pub const MAX_DUE_IN_DAYS: i64 = 3650;

/// JSON body extractor that reports malformed bodies as `VALIDATION_ERROR` (400)
/// instead of axum's plain-text 422.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonBody<T>(pub T);

#[async_trait]
impl<T, S> FromRequest<S> for JsonBody<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(Self(value)),
            Err(rejection) => Err(ApiError::validation_single("body", rejection.body_text())),
        }
    }
}

/// `JsonBody` for endpoints where the body is optional: an empty body is `None`,
/// anything else must parse.
#[derive(Debug, Clone, Default)]
pub struct OptionalJsonBody<T>(pub Option<T>);

#[async_trait]
impl<T, S> FromRequest<S> for OptionalJsonBody<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let bytes = Bytes::from_request(req, state)
            .await
            .map_err(|rejection| ApiError::validation_single("body", rejection.body_text()))?;

        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Self(None));
        }

        serde_json::from_slice(&bytes)
            .map(|value| Self(Some(value)))
            .map_err(|e| ApiError::validation_single("body", format!("Failed to parse the request body as JSON: {}", e)))
    }
}

/// Query string extractor with the same `VALIDATION_ERROR` rejection as `JsonBody`
#[derive(Debug, Clone, Copy, Default)]
pub struct QueryParams<T>(pub T);

#[async_trait]
impl<T, S> FromRequestParts<S> for QueryParams<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        match Query::<T>::from_request_parts(parts, state).await {
            Ok(Query(value)) => Ok(Self(value)),
            Err(rejection) => Err(ApiError::validation_single("query", rejection.body_text())),
        }
    }
}

/// String validation helpers
pub mod string {
    use super::*;

    /// Non-empty after trimming
    pub fn required(v: &mut ValidationBuilder, value: &str, field: &str) {
        if value.trim().is_empty() {
            v.push(field, &format!("{} is required", field));
        }
    }

    pub fn max_length(v: &mut ValidationBuilder, value: &str, field: &str, max: usize) {
        if value.chars().count() > max {
            v.push(field, &format!("{} must be {} characters or less", field, max));
        }
    }
}

pub fn validate_name(v: &mut ValidationBuilder, name: &str) {
    string::required(v, name, "name");
    string::max_length(v, name, "name", MAX_NAME_LENGTH);
}

pub fn validate_actions(v: &mut ValidationBuilder, actions: &[ActionSpec]) {
    if actions.is_empty() {
        v.push("actions", "At least one action is required");
        return;
    }

    for (index, action) in actions.iter().enumerate() {
        let field = |name: &str| format!("actions[{}].config.{}", index, name);

        match action {
            ActionSpec::SendEmail(config) => {
                string::required(v, &config.to, &field("to"));
                string::required(v, &config.subject, &field("subject"));
            }
            ActionSpec::SendSms(config) => {
                string::required(v, &config.to, &field("to"));
                string::required(v, &config.message, &field("message"));
            }
            ActionSpec::WebhookCall(config) => match Url::parse(&config.url) {
                Ok(url) if matches!(url.scheme(), "http" | "https") => {}
                Ok(_) => v.push(&field("url"), "url must use http or https"),
                Err(_) => v.push(&field("url"), "url must be a valid URL"),
            },
            ActionSpec::CreateTask(config) => {
                string::required(v, &config.title, &field("title"));
                due_in_days(v, config.due_in_days, &field("dueInDays"));
            }
            ActionSpec::UpdateStatus(config) => {
                string::required(v, &config.entity_type, &field("entityType"));
                string::required(v, &config.status, &field("status"));
            }
            ActionSpec::CreateInvoice(config) => {
                if config.amount <= Decimal::ZERO {
                    v.push(&field("amount"), "amount must be greater than 0");
                }
                if config.currency.trim().len() != 3 {
                    v.push(&field("currency"), "currency must be a 3-letter code");
                }
                due_in_days(v, config.due_in_days, &field("dueInDays"));
            }
            ActionSpec::AssignUser(config) => {
                string::required(v, &config.entity_type, &field("entityType"));
            }
        }
    }
}

fn due_in_days(v: &mut ValidationBuilder, days: Option<i64>, field: &str) {
    if days.is_some_and(|d| !(0..=MAX_DUE_IN_DAYS).contains(&d)) {
        v.push(field, &format!("{} must be between 0 and {}", field, MAX_DUE_IN_DAYS));
    }
}

fn validate_condition(
    v: &mut ValidationBuilder,
    prefix: &str,
    field: &str,
    operator: ConditionOperator,
    value: &serde_json::Value,
) {
    if field.trim().is_empty() {
        v.push(&format!("{}.field", prefix), "field is required");
    }

    let value_field = format!("{}.value", prefix);
    match operator {
        ConditionOperator::Regex => match value.as_str() {
            Some(pattern) => {
                if let Err(e) = regex::Regex::new(pattern) {
                    v.push(&value_field, &format!("invalid regular expression: {}", e));
                }
            }
            None => v.push(&value_field, "regex value must be a string"),
        },
        ConditionOperator::In | ConditionOperator::NotIn => {
            if !value.is_array() {
                v.push(&value_field, "value must be an array");
            }
        }
        ConditionOperator::GreaterThan
        | ConditionOperator::GreaterThanOrEqual
        | ConditionOperator::LessThan
        | ConditionOperator::LessThanOrEqual => {
            if crate::workflows::conditions::as_number(value).is_none() {
                v.push(&value_field, "value must be numeric");
            }
        }
        _ => {}
    }
}

pub fn validate_trigger_conditions(v: &mut ValidationBuilder, conditions: &[Condition]) {
    for (index, c) in conditions.iter().enumerate() {
        validate_condition(
            v,
            &format!("trigger.conditions[{}]", index),
            &c.field,
            c.operator,
            &c.value,
        );
    }
}

pub fn validate_workflow_conditions(v: &mut ValidationBuilder, conditions: &[WorkflowCondition]) {
    for (index, c) in conditions.iter().enumerate() {
        validate_condition(v, &format!("conditions[{}]", index), &c.field, c.operator, &c.value);
    }
}
