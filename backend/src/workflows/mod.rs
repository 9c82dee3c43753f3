// Workflow Automation Engine
//
// Triggers start executions, conditions gate them, and the engine runs each
// execution's actions in order on a bounded worker queue.

pub mod actions;
pub mod conditions;
pub mod engine;
pub mod executor;
pub mod queue;
pub mod triggers;

pub use actions::ActionError;
pub use engine::{EngineError, WorkflowEngine};
pub use executor::ActionExecutor;
pub use queue::{spawn_dispatcher, ExecutionJob, ExecutionQueue, ExecutionReceiver};
pub use triggers::{EventPayload, TriggerEvent};
