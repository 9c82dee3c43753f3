// Workflow Triggers - domain events and trigger matching

use serde::{Deserialize, Serialize};
use verigrade_shared::{TriggerType, Workflow};

use super::conditions::{all_conditions_hold, workflow_conditions_hold};

/// Payload for trigger events
pub type EventPayload = serde_json::Value;

/// A domain event reported by another service, e.g. `payment_received`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerEvent {
    #[serde(rename = "type")]
    pub trigger_type: TriggerType,
    #[serde(default)]
    pub payload: EventPayload,
}

impl TriggerEvent {
    pub fn new(trigger_type: TriggerType, payload: EventPayload) -> Self {
        Self { trigger_type, payload }
    }
}

/// Whether an event should start this workflow: both the workflow and its trigger are
/// active, the types match, every trigger condition holds and the workflow conditions hold.
pub fn matches(workflow: &Workflow, event: &TriggerEvent) -> bool {
    workflow.is_active
        && workflow.trigger.is_active
        && workflow.trigger.trigger_type == event.trigger_type
        && all_conditions_hold(&workflow.trigger.conditions, &event.payload)
        && workflow_conditions_hold(&workflow.conditions, &event.payload)
}
