//! Collection triggers: record writes that start workflows.

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tracing::{error, info, instrument};

use db::repository::records;

use crate::executor::{ExecutionResult, WorkflowExecutor};
use crate::models::trigger_mode;
use crate::store::load_enabled_workflows;
use crate::EngineError;

/// Outcome of a record write: the stored record and the executions it fired.
#[derive(Debug, Clone, Serialize)]
pub struct TriggerOutcome {
    /// The record as workflows saw it, `id` included.
    pub record: Value,
    pub executions: Vec<ExecutionResult>,
}

/// Writes collection records and runs the workflows watching them.
///
/// Executions run inline, one workflow after another, in workflow creation
/// order.
#[derive(Clone)]
pub struct TriggerDispatcher {
    executor: Arc<WorkflowExecutor>,
}

impl TriggerDispatcher {
    pub fn new(executor: Arc<WorkflowExecutor>) -> Self {
        Self { executor }
    }

    /// Insert `data` into `collection` and fire create triggers.
    #[instrument(skip(self, data))]
    pub async fn create_record(&self, collection: &str, data: &Value) -> Result<TriggerOutcome, EngineError> {
        let row = records::insert_record(self.executor.pool(), collection, data).await?;
        self.dispatch(collection, trigger_mode::CREATE, row.to_value()).await
    }

    /// Replace the data of record `id` and fire update triggers.
    #[instrument(skip(self, data))]
    pub async fn update_record(
        &self,
        collection: &str,
        id: i64,
        data: &Value,
    ) -> Result<TriggerOutcome, EngineError> {
        let row = records::update_record(self.executor.pool(), collection, id, data).await?;
        self.dispatch(collection, trigger_mode::UPDATE, row.to_value()).await
    }

    /// Run every enabled workflow whose trigger fires on `event`. A workflow
    /// that fails with an engine error is logged and skipped; its execution
    /// row already carries the error status.
    async fn dispatch(&self, collection: &str, event: u8, record: Value) -> Result<TriggerOutcome, EngineError> {
        let context = serde_json::json!({ "data": record });
        let mut executions = Vec::new();

        for workflow in load_enabled_workflows(self.executor.pool()).await? {
            if !workflow.trigger.fires_on(collection, event) {
                continue;
            }
            info!(workflow = %workflow.id, "collection trigger fired");
            match self.executor.run(&workflow, context.clone()).await {
                Ok(result) => executions.push(result),
                Err(e) => error!(workflow = %workflow.id, "execution failed: {e}"),
            }
        }

        Ok(TriggerOutcome { record, executions })
    }
}
