//! Glue between domain types and the `db` crate.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use db::models::{ExecutionRow, JobRow, WorkflowRow};
use db::repository::{executions, jobs, records, workflows};
use db::DbPool;
use nodes::{JobStatus, NodeError, RecordSource};

use crate::dag::DagPlan;
use crate::models::{ExecutionStatus, Workflow};
use crate::EngineError;

/// Validate and persist a workflow definition.
pub async fn save_workflow(pool: &DbPool, workflow: &Workflow) -> Result<(), EngineError> {
    DagPlan::build(workflow)?;
    let definition = serde_json::to_value(workflow)?;
    workflows::create_workflow(pool, workflow.id, &workflow.title, workflow.enabled, &definition)
        .await?;
    Ok(())
}

/// Rebuild a workflow from its row. Row columns win over the copy inside
/// the stored definition.
pub fn workflow_from_row(row: WorkflowRow) -> Result<Workflow, EngineError> {
    let mut workflow: Workflow = serde_json::from_value(row.definition)?;
    workflow.id = row.id;
    workflow.title = row.title;
    workflow.enabled = row.enabled;
    workflow.created_at = row.created_at;
    Ok(workflow)
}

pub async fn load_workflow(pool: &DbPool, id: Uuid) -> Result<Workflow, EngineError> {
    workflow_from_row(workflows::get_workflow(pool, id).await?)
}

pub async fn load_enabled_workflows(pool: &DbPool) -> Result<Vec<Workflow>, EngineError> {
    workflows::list_enabled_workflows(pool)
        .await?
        .into_iter()
        .map(workflow_from_row)
        .collect()
}

/// A persisted job as the engine reports it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobRecord {
    pub node_id: String,
    pub node_key: String,
    pub status: JobStatus,
    pub result: Value,
}

impl TryFrom<JobRow> for JobRecord {
    type Error = EngineError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        let status = JobStatus::from_code(row.status).ok_or_else(|| {
            EngineError::Database(db::DbError::Decode {
                column: "status",
                reason: format!("unknown job status {}", row.status),
            })
        })?;
        Ok(Self {
            node_id: row.node_id,
            node_key: row.node_key,
            status,
            result: row.result,
        })
    }
}

/// A stored execution with its jobs in visitation order.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionRecord {
    pub id: Uuid,
    pub workflow_id: Uuid,
    pub context: Value,
    pub status: ExecutionStatus,
    pub jobs: Vec<JobRecord>,
}

pub async fn load_execution(pool: &DbPool, id: Uuid) -> Result<ExecutionRecord, EngineError> {
    let ExecutionRow { id, workflow_id, context, status, .. } =
        executions::get_execution(pool, id).await?;
    let status = ExecutionStatus::from_code(status).ok_or_else(|| {
        EngineError::Database(db::DbError::Decode {
            column: "status",
            reason: format!("unknown execution status {status}"),
        })
    })?;
    let jobs = jobs::list_jobs(pool, id)
        .await?
        .into_iter()
        .map(JobRecord::try_from)
        .collect::<Result<Vec<_>, _>>()?;

    Ok(ExecutionRecord { id, workflow_id, context, status, jobs })
}

/// Serves the `query` instruction from the `records` table.
#[derive(Debug, Clone)]
pub struct DbRecordSource {
    pool: DbPool,
}

impl DbRecordSource {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RecordSource for DbRecordSource {
    async fn records(&self, collection: &str) -> Result<Vec<Value>, NodeError> {
        let rows = records::list_records(&self.pool, collection)
            .await
            .map_err(|e| NodeError::Retryable(e.to_string()))?;
        Ok(rows.iter().map(|row| row.to_value()).collect())
    }
}
