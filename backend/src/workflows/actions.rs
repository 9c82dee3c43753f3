// Workflow Actions - action errors and payload templating

use regex::{Captures, Regex};
use serde_json::Value;
use std::sync::OnceLock;
use std::time::Duration;
use thiserror::Error;

use verigrade_shared::ActionSpec;

use super::conditions::get_nested_value;
use crate::services::EmailError;

#[derive(Error, Debug)]
pub enum ActionError {
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("webhook request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("webhook responded with status {0}")]
    WebhookStatus(u16),
    #[error("{0}")]
    Email(#[from] EmailError),
    #[error("invalid rendered config: {0}")]
    Template(#[from] serde_json::Error),
}

fn template_regex() -> Option<&'static Regex> {
    static TEMPLATE_VAR: OnceLock<Option<Regex>> = OnceLock::new();
    TEMPLATE_VAR
        .get_or_init(|| Regex::new(r"\{\{\s*([^}\s]+)\s*\}\}").ok())
        .as_ref()
}

/// Replace `{{path.to.field}}` with values from the payload. Unknown paths are left untouched.
pub fn replace_template_vars(template: &str, payload: &Value) -> String {
    let Some(re) = template_regex() else {
        return template.to_string();
    };

    re.replace_all(template, |caps: &Captures| match get_nested_value(payload, &caps[1]) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => caps[0].to_string(),
        Some(other) => other.to_string(),
    })
    .into_owned()
}

/// Apply template replacement to every string inside a JSON value
pub fn process_templates(config: &Value, payload: &Value) -> Value {
    match config {
        Value::String(s) => Value::String(replace_template_vars(s, payload)),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), process_templates(v, payload)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(|v| process_templates(v, payload)).collect()),
        _ => config.clone(),
    }
}

/// Render an action's config against the trigger payload
pub fn render_spec(spec: &ActionSpec, payload: &Value) -> Result<ActionSpec, ActionError> {
    let value = serde_json::to_value(spec)?;
    Ok(serde_json::from_value(process_templates(&value, payload))?)
}
