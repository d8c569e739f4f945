//! Workflow execution engine.
//!
//! `WorkflowExecutor` is the central orchestrator:
//! 1. Validates the DAG and produces a topological plan.
//! 2. Visits nodes in order, dispatching each via its `Instruction`.
//! 3. Gives every node a namespace holding its ancestors' job results.
//! 4. Persists one job per visited node via the `db` crate.
//! 5. Halts on the first job that does not resolve.
//! 6. Handles `NodeError::Retryable` (up to `max_retries`) and
//!    `NodeError::Fatal` (abort immediately).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use db::repository::{executions, jobs};
use db::DbPool;
use expression::{EngineRegistry, Namespace, SystemVars};
use nodes::{
    CalculationInstruction, EchoInstruction, ExecutionContext, Instruction, JobOutcome, JobStatus,
    NodeError, QueryInstruction,
};

use crate::dag::DagPlan;
use crate::models::{ExecutionStatus, NodeDefinition, Workflow};
use crate::store::{DbRecordSource, JobRecord};
use crate::EngineError;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Tuning knobs for the executor.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Maximum number of times a retryable node failure will be retried.
    pub max_retries: u32,
    /// Base delay for exponential back-off between retries.
    pub retry_base_delay: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_base_delay: Duration::from_millis(100),
        }
    }
}

// ---------------------------------------------------------------------------
// Node registry
// ---------------------------------------------------------------------------

/// Maps node type strings to `Instruction` implementations.
pub type NodeRegistry = HashMap<String, Arc<dyn Instruction>>;

/// The `calculation`, `echo` and `query` instructions, with queries served
/// from `pool`.
pub fn builtin_registry(pool: &DbPool, engines: Arc<EngineRegistry>) -> NodeRegistry {
    let mut registry = NodeRegistry::new();
    registry.insert("calculation".into(), Arc::new(CalculationInstruction::new(engines)));
    registry.insert("echo".into(), Arc::new(EchoInstruction));
    registry.insert(
        "query".into(),
        Arc::new(QueryInstruction::new(Arc::new(DbRecordSource::new(pool.clone())))),
    );
    registry
}

// ---------------------------------------------------------------------------
// Output of a completed execution
// ---------------------------------------------------------------------------

/// The result of running a full workflow.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionResult {
    /// ID of the `executions` row created for this run.
    pub execution_id: Uuid,
    pub status: ExecutionStatus,
    /// Jobs in visitation order.
    pub jobs: Vec<JobRecord>,
}

impl ExecutionResult {
    pub fn job(&self, node_key: &str) -> Option<&JobRecord> {
        self.jobs.iter().find(|job| job.node_key == node_key)
    }
}

// ---------------------------------------------------------------------------
// WorkflowExecutor
// ---------------------------------------------------------------------------

/// Stateless orchestrator that runs workflow executions.
///
/// Construct one executor per process and call [`WorkflowExecutor::run`]
/// with a persisted workflow and the triggering context.
pub struct WorkflowExecutor {
    pool: DbPool,
    registry: NodeRegistry,
    config: ExecutorConfig,
    system: Arc<SystemVars>,
}

impl WorkflowExecutor {
    /// Create a new executor exposing the default `$system` variables.
    pub fn new(pool: DbPool, registry: NodeRegistry, config: ExecutorConfig) -> Self {
        Self {
            pool,
            registry,
            config,
            system: Arc::new(SystemVars::with_defaults()),
        }
    }

    /// Replace the `$system` variables exposed to every node.
    pub fn with_system(mut self, system: SystemVars) -> Self {
        self.system = Arc::new(system);
        self
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    /// Run the workflow against `context` and return every job produced.
    ///
    /// A job that ends in anything but `Resolved` stops the execution; no
    /// later node is visited.
    ///
    /// # Errors
    /// Returns `EngineError` for validation failures, fatal node errors,
    /// retry exhaustion, or database problems.
    #[instrument(skip(self, workflow, context), fields(workflow_id = %workflow.id))]
    pub async fn run(&self, workflow: &Workflow, context: Value) -> Result<ExecutionResult, EngineError> {
        // ------------------------------------------------------------------
        // Validate and plan the DAG.
        // ------------------------------------------------------------------
        let plan = DagPlan::build(workflow)?;
        info!("DAG validated, executing {} nodes", plan.order().len());

        // ------------------------------------------------------------------
        // Create the execution row.
        // ------------------------------------------------------------------
        let exec_row = executions::create_execution(
            &self.pool,
            workflow.id,
            &context,
            ExecutionStatus::Started.code(),
        )
        .await?;
        let execution_id = exec_row.id;

        let context = Arc::new(context);
        let mut results: Vec<Option<Value>> = vec![None; workflow.nodes.len()];
        let mut visited: Vec<JobRecord> = Vec::with_capacity(workflow.nodes.len());
        let mut final_status = ExecutionStatus::Resolved;

        // ------------------------------------------------------------------
        // Visit nodes sequentially.
        // ------------------------------------------------------------------
        for &idx in plan.order() {
            let node = &workflow.nodes[idx];

            let mut namespace = Namespace::new(Arc::clone(&context), Arc::clone(&self.system));
            for ancestor in plan.ancestors(idx) {
                if let Some(result) = &results[ancestor] {
                    namespace.insert_job(workflow.nodes[ancestor].key.as_str(), result.clone());
                }
            }
            let upstream = plan
                .upstream(idx)
                .first()
                .and_then(|&parent| results[parent].clone());

            let ctx = ExecutionContext {
                workflow_id: workflow.id,
                execution_id,
                node_key: node.key.clone(),
                namespace,
                upstream,
            };

            let outcome = match self.registry.get(&node.node_type) {
                Some(instruction) => {
                    match self.execute_with_retry(node, instruction.as_ref(), &ctx).await {
                        Ok(outcome) => outcome,
                        Err(engine_err) => {
                            error!("node '{}' failed: {}", node.id, engine_err);
                            self.abort(execution_id, node, &engine_err).await;
                            return Err(engine_err);
                        }
                    }
                }
                None => JobOutcome::error(format!(
                    "ConfigError: no instruction registered for node type '{}'",
                    node.node_type
                )),
            };

            let job = match self.persist_job(execution_id, node, outcome).await {
                Ok(job) => job,
                Err(engine_err) => {
                    error!("could not record job for '{}': {}", node.id, engine_err);
                    self.abort(execution_id, node, &engine_err).await;
                    return Err(engine_err);
                }
            };
            info!(node = %node.key, status = %job.status, "job recorded");

            let status = job.status;
            results[idx] = Some(job.result.clone());
            visited.push(job);

            if status != JobStatus::Resolved {
                final_status = if status == JobStatus::Error {
                    ExecutionStatus::Error
                } else {
                    ExecutionStatus::Failed
                };
                warn!("node '{}' ended {}, halting execution", node.key, status);
                break;
            }
        }

        // ------------------------------------------------------------------
        // Mark the execution finished.
        // ------------------------------------------------------------------
        if let Err(e) =
            executions::update_execution_status(&self.pool, execution_id, final_status.code(), true)
                .await
        {
            error!("could not mark execution {} {}: {}", execution_id, final_status, e);
            self.mark_errored(execution_id).await;
            return Err(e.into());
        }

        info!("workflow '{}' execution {} ended {}", workflow.id, execution_id, final_status);

        Ok(ExecutionResult {
            execution_id,
            status: final_status,
            jobs: visited,
        })
    }

    async fn persist_job(
        &self,
        execution_id: Uuid,
        node: &NodeDefinition,
        outcome: JobOutcome,
    ) -> Result<JobRecord, EngineError> {
        jobs::insert_job(
            &self.pool,
            execution_id,
            &node.id,
            &node.key,
            outcome.status.code(),
            &outcome.result,
        )
        .await?;

        Ok(JobRecord {
            node_id: node.id.clone(),
            node_key: node.key.clone(),
            status: outcome.status,
            result: outcome.result,
        })
    }

    /// Record an `ERROR` job and execution after an infrastructure failure.
    /// The caller receives `cause`; persistence errors here are only logged.
    async fn abort(&self, execution_id: Uuid, node: &NodeDefinition, cause: &EngineError) {
        if let Err(e) = self
            .persist_job(execution_id, node, JobOutcome::error(cause))
            .await
        {
            warn!("could not record failed job for '{}': {}", node.id, e);
        }
        self.mark_errored(execution_id).await;
    }

    async fn mark_errored(&self, execution_id: Uuid) {
        if let Err(e) = executions::update_execution_status(
            &self.pool,
            execution_id,
            ExecutionStatus::Error.code(),
            true,
        )
        .await
        {
            warn!("could not mark execution {} as errored: {}", execution_id, e);
        }
    }

    // -----------------------------------------------------------------------
    // Internal: execute a single node with retry logic.
    // -----------------------------------------------------------------------

    async fn execute_with_retry(
        &self,
        node: &NodeDefinition,
        instruction: &dyn Instruction,
        ctx: &ExecutionContext,
    ) -> Result<JobOutcome, EngineError> {
        let mut attempts = 0u32;

        loop {
            match instruction.run(&node.config, ctx).await {
                Ok(outcome) => return Ok(outcome),

                Err(NodeError::Fatal(msg)) => {
                    return Err(EngineError::NodeFatal {
                        node_id: node.id.clone(),
                        message: msg,
                    });
                }

                Err(NodeError::Retryable(msg)) => {
                    attempts += 1;
                    if attempts > self.config.max_retries {
                        return Err(EngineError::NodeRetryExhausted {
                            node_id: node.id.clone(),
                            message: msg,
                        });
                    }

                    let delay = backoff(self.config.retry_base_delay, attempts);

                    warn!(
                        "node '{}' retryable error (attempt {}/{}), retrying in {:?}: {}",
                        node.id, attempts, self.config.max_retries, delay, msg
                    );

                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

/// Delay before retry number `attempt` (1-based): `base * 2^(attempt - 1)`,
/// saturating instead of overflowing.
pub(crate) fn backoff(base: Duration, attempt: u32) -> Duration {
    base.saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
}
