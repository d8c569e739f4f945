//! Executor tests against a throwaway SQLite database.
//!
//! Node behaviour comes from `MockInstruction`, so these tests exercise the
//! driver policy only: ordering, namespace visibility, halting, retries and
//! persistence.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tempfile::TempDir;

use db::DbPool;
use nodes::mock::{MockBehaviour, MockInstruction};
use nodes::{ExecutionContext, Instruction, JobOutcome, JobStatus, NodeError};

use crate::executor::{backoff, ExecutorConfig, NodeRegistry, WorkflowExecutor};
use crate::models::{Edge, ExecutionStatus, NodeDefinition, Trigger, Workflow};
use crate::store::{load_execution, save_workflow};
use crate::EngineError;

async fn executor(registry: NodeRegistry) -> (WorkflowExecutor, TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite://{}?mode=rwc", dir.path().join("engine.db").display());
    let pool = db::create_pool(&url, 2).await.unwrap();
    db::run_migrations(&pool).await.unwrap();
    let config = ExecutorConfig {
        max_retries: 2,
        retry_base_delay: Duration::from_millis(1),
    };
    (WorkflowExecutor::new(pool, registry, config), dir)
}

/// Registry mapping each node type to its own mock.
fn registry(mocks: &[(&str, &Arc<MockInstruction>)]) -> NodeRegistry {
    mocks
        .iter()
        .map(|(ty, mock)| (ty.to_string(), Arc::clone(mock) as Arc<dyn Instruction>))
        .collect()
}

/// Node `id` with key `id` whose type is also `id`.
fn node(id: &str) -> NodeDefinition {
    NodeDefinition::new(id, id, id, Value::Null)
}

async fn persisted(exec: &WorkflowExecutor, nodes: Vec<NodeDefinition>, edges: Vec<Edge>) -> Workflow {
    let workflow = Workflow::new("test", Trigger::Manual, nodes, edges);
    save_workflow(exec.pool(), &workflow).await.unwrap();
    workflow
}

#[tokio::test]
async fn linear_pipeline_threads_results_downstream() {
    let a = Arc::new(MockInstruction::returning("a", json!({"step": 1})));
    let b = Arc::new(MockInstruction::returning("b", json!({"step": 2})));
    let c = Arc::new(MockInstruction::returning("c", json!({"step": 3})));
    let (exec, _dir) = executor(registry(&[("a", &a), ("b", &b), ("c", &c)])).await;
    let wf = persisted(
        &exec,
        vec![node("a"), node("b"), node("c")],
        vec![Edge::new("a", "b"), Edge::new("b", "c")],
    )
    .await;

    let result = exec.run(&wf, json!({"data": {"id": 1}})).await.unwrap();

    assert_eq!(result.status, ExecutionStatus::Resolved);
    let keys: Vec<&str> = result.jobs.iter().map(|j| j.node_key.as_str()).collect();
    assert_eq!(keys, ["a", "b", "c"]);
    assert!(result.jobs.iter().all(|j| j.status == JobStatus::Resolved));

    let seen = c.calls.lock().unwrap()[0].clone();
    assert_eq!(seen.upstream, Some(json!({"step": 2})));
    assert_eq!(seen.namespace.job("a"), Some(&json!({"step": 1})));
    assert_eq!(seen.namespace.job("b"), Some(&json!({"step": 2})));
    assert_eq!(seen.namespace.context(), &json!({"data": {"id": 1}}));

    let stored = load_execution(exec.pool(), result.execution_id).await.unwrap();
    assert_eq!(stored.status, ExecutionStatus::Resolved);
    assert_eq!(stored.jobs, result.jobs);
}

#[tokio::test]
async fn siblings_do_not_see_each_other() {
    //   a
    //  / \
    // b   c
    let a = Arc::new(MockInstruction::returning("a", json!(1)));
    let b = Arc::new(MockInstruction::returning("b", json!(2)));
    let c = Arc::new(MockInstruction::returning("c", json!(3)));
    let (exec, _dir) = executor(registry(&[("a", &a), ("b", &b), ("c", &c)])).await;
    let wf = persisted(
        &exec,
        vec![node("a"), node("b"), node("c")],
        vec![Edge::new("a", "b"), Edge::new("a", "c")],
    )
    .await;

    exec.run(&wf, json!({})).await.unwrap();

    let seen = c.calls.lock().unwrap()[0].clone();
    assert_eq!(seen.namespace.job_keys().collect::<Vec<_>>(), ["a"]);
    assert_eq!(seen.namespace.job("b"), None);
    assert_eq!(a.calls.lock().unwrap()[0].upstream, None);
}

#[tokio::test]
async fn error_job_halts_execution() {
    let ok = Arc::new(MockInstruction::returning("ok", json!(true)));
    let bad = Arc::new(MockInstruction::new(
        "bad",
        MockBehaviour::ReturnOutcome(JobOutcome::error("SyntaxError: nope")),
    ));
    let never = Arc::new(MockInstruction::returning("never", json!(null)));
    let (exec, _dir) = executor(registry(&[("ok", &ok), ("bad", &bad), ("never", &never)])).await;
    // `never` is independent of `bad` but declared after it.
    let wf = persisted(
        &exec,
        vec![node("ok"), node("bad"), node("never")],
        vec![Edge::new("ok", "bad")],
    )
    .await;

    let result = exec.run(&wf, json!({})).await.unwrap();

    assert_eq!(result.status, ExecutionStatus::Error);
    assert_eq!(result.jobs.len(), 2);
    assert_eq!(result.jobs[1].result, json!("SyntaxError: nope"));
    assert_eq!(never.call_count(), 0);
}

#[tokio::test]
async fn failed_job_marks_execution_failed() {
    let reject = Arc::new(MockInstruction::new(
        "reject",
        MockBehaviour::ReturnOutcome(JobOutcome { status: JobStatus::Failed, result: json!("no") }),
    ));
    let (exec, _dir) = executor(registry(&[("reject", &reject)])).await;
    let wf = persisted(&exec, vec![node("reject")], vec![]).await;

    let result = exec.run(&wf, json!({})).await.unwrap();
    assert_eq!(result.status, ExecutionStatus::Failed);

    let stored = load_execution(exec.pool(), result.execution_id).await.unwrap();
    assert_eq!(stored.status, ExecutionStatus::Failed);
    assert_eq!(stored.jobs[0].status, JobStatus::Failed);
}

#[tokio::test]
async fn unregistered_node_type_is_a_config_error_job() {
    let (exec, _dir) = executor(NodeRegistry::new()).await;
    let wf = persisted(&exec, vec![node("ghost")], vec![]).await;

    let result = exec.run(&wf, json!({})).await.unwrap();
    assert_eq!(result.status, ExecutionStatus::Error);
    let text = result.jobs[0].result.as_str().unwrap();
    assert!(text.starts_with("ConfigError: "), "{text}");
}

#[tokio::test]
async fn fatal_error_aborts_and_is_recorded() {
    let boom = Arc::new(MockInstruction::failing_fatal("boom", "disk on fire"));
    let after = Arc::new(MockInstruction::returning("after", json!(1)));
    let (exec, _dir) = executor(registry(&[("boom", &boom), ("after", &after)])).await;
    let wf = persisted(&exec, vec![node("boom"), node("after")], vec![Edge::new("boom", "after")]).await;

    let err = exec.run(&wf, json!({})).await.unwrap_err();
    assert!(matches!(&err, EngineError::NodeFatal { node_id, .. } if node_id == "boom"));
    assert_eq!(after.call_count(), 0);

    let executions = db::repository::executions::list_executions(exec.pool(), wf.id)
        .await
        .unwrap();
    let stored = load_execution(exec.pool(), executions[0].id).await.unwrap();
    assert_eq!(stored.status, ExecutionStatus::Error);
    assert_eq!(stored.jobs.len(), 1);
    assert_eq!(stored.jobs[0].status, JobStatus::Error);
}

#[tokio::test]
async fn retryable_errors_are_retried() {
    let flaky = Arc::new(MockInstruction::new("flaky", MockBehaviour::Flaky(2, json!("ok"))));
    let (exec, _dir) = executor(registry(&[("flaky", &flaky)])).await;
    let wf = persisted(&exec, vec![node("flaky")], vec![]).await;

    let result = exec.run(&wf, json!({})).await.unwrap();
    assert_eq!(result.status, ExecutionStatus::Resolved);
    assert_eq!(result.jobs[0].result, json!("ok"));
    assert_eq!(flaky.call_count(), 3);
}

#[tokio::test]
async fn retry_exhaustion_is_an_engine_error() {
    let down = Arc::new(MockInstruction::failing_retryable("down", "storage unavailable"));
    let (exec, _dir) = executor(registry(&[("down", &down)])).await;
    let wf = persisted(&exec, vec![node("down")], vec![]).await;

    let err = exec.run(&wf, json!({})).await.unwrap_err();
    assert!(matches!(err, EngineError::NodeRetryExhausted { .. }));
    // first attempt plus max_retries
    assert_eq!(down.call_count(), 3);
}

#[tokio::test]
async fn invalid_graph_is_rejected_before_any_execution() {
    let a = Arc::new(MockInstruction::returning("a", json!(1)));
    let (exec, _dir) = executor(registry(&[("a", &a)])).await;
    let wf = Workflow::new(
        "cyclic",
        Trigger::Manual,
        vec![node("a"), NodeDefinition::new("b", "b", "a", Value::Null)],
        vec![Edge::new("a", "b"), Edge::new("b", "a")],
    );

    assert!(matches!(save_workflow(exec.pool(), &wf).await, Err(EngineError::CycleDetected)));
    assert!(matches!(exec.run(&wf, json!({})).await, Err(EngineError::CycleDetected)));
    assert_eq!(a.call_count(), 0);
}

/// Resolves, but drops the `jobs` table first so recording its job fails.
struct DropsJobsTable(DbPool);

#[async_trait]
impl Instruction for DropsJobsTable {
    async fn run(&self, _config: &Value, _ctx: &ExecutionContext) -> Result<JobOutcome, NodeError> {
        sqlx::query("DROP TABLE jobs").execute(&self.0).await.unwrap();
        Ok(JobOutcome::resolved(json!(1)))
    }
}

#[tokio::test]
async fn failure_to_record_a_job_marks_execution_errored() {
    let (exec, _dir) = executor(NodeRegistry::new()).await;
    let mut registry = NodeRegistry::new();
    registry.insert("drop".into(), Arc::new(DropsJobsTable(exec.pool().clone())));
    let exec = WorkflowExecutor::new(exec.pool().clone(), registry, ExecutorConfig::default());
    let wf = persisted(&exec, vec![node("drop")], vec![]).await;

    let err = exec.run(&wf, json!({})).await.unwrap_err();
    assert!(matches!(err, EngineError::Database(_)), "{err}");

    let executions = db::repository::executions::list_executions(exec.pool(), wf.id)
        .await
        .unwrap();
    assert_eq!(executions.len(), 1);
    assert_eq!(executions[0].status, ExecutionStatus::Error.code());
}

#[test]
fn backoff_doubles_and_saturates() {
    let base = Duration::from_millis(100);
    assert_eq!(backoff(base, 1), base);
    assert_eq!(backoff(base, 3), Duration::from_millis(400));
    assert_eq!(backoff(base, 40), base * u32::MAX);
    assert_eq!(backoff(base, u32::MAX), base * u32::MAX);
    assert_eq!(backoff(Duration::from_secs(u64::MAX / 2), 3), Duration::MAX);
}
