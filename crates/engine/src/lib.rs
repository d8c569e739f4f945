//! `engine` crate: domain models, DAG planning, the execution driver, and
//! collection triggers.

pub mod dag;
pub mod error;
pub mod executor;
pub mod models;
pub mod settings;
pub mod store;
pub mod trigger;

pub use dag::{validate_dag, DagPlan};
pub use error::EngineError;
pub use executor::{builtin_registry, ExecutionResult, ExecutorConfig, NodeRegistry, WorkflowExecutor};
pub use models::{Edge, ExecutionStatus, NodeDefinition, Trigger, Workflow};
pub use settings::EngineSettings;
pub use store::{JobRecord, save_workflow};
pub use trigger::{TriggerDispatcher, TriggerOutcome};

#[cfg(test)]
mod executor_tests;
