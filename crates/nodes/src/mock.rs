//! `MockInstruction`, a test double for [`Instruction`].
//!
//! Useful in unit and integration tests where a real instruction is either
//! unavailable or irrelevant.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crate::traits::{ExecutionContext, Instruction};
use crate::{JobOutcome, NodeError};

/// Behaviour injected into `MockInstruction` at construction time.
#[derive(Debug, Clone)]
pub enum MockBehaviour {
    /// Resolve with a specific JSON value.
    ReturnValue(Value),
    /// Hand back an arbitrary outcome, e.g. a `FAILED` job.
    ReturnOutcome(JobOutcome),
    /// Fail with a `Retryable` error.
    FailRetryable(String),
    /// Fail with a `Fatal` error.
    FailFatal(String),
    /// Fail with a `Retryable` error for the first `n` calls, then resolve
    /// with the value.
    Flaky(usize, Value),
}

/// A mock instruction that records every context it receives.
#[derive(Debug)]
pub struct MockInstruction {
    pub name: String,
    pub behaviour: MockBehaviour,
    /// Every context seen by this instruction, in call order.
    pub calls: Arc<Mutex<Vec<ExecutionContext>>>,
    attempts: AtomicUsize,
}

impl MockInstruction {
    pub fn new(name: impl Into<String>, behaviour: MockBehaviour) -> Self {
        Self {
            name: name.into(),
            behaviour,
            calls: Arc::new(Mutex::new(Vec::new())),
            attempts: AtomicUsize::new(0),
        }
    }

    /// A mock that always resolves with `value`.
    pub fn returning(name: impl Into<String>, value: Value) -> Self {
        Self::new(name, MockBehaviour::ReturnValue(value))
    }

    pub fn failing_fatal(name: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::new(name, MockBehaviour::FailFatal(msg.into()))
    }

    pub fn failing_retryable(name: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::new(name, MockBehaviour::FailRetryable(msg.into()))
    }

    /// Number of times this instruction has been run.
    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Node keys of every call, in order.
    pub fn called_keys(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|ctx| ctx.node_key.clone())
            .collect()
    }
}

#[async_trait]
impl Instruction for MockInstruction {
    async fn run(&self, _config: &Value, ctx: &ExecutionContext) -> Result<JobOutcome, NodeError> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(ctx.clone());
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);

        match &self.behaviour {
            MockBehaviour::ReturnValue(v) => Ok(JobOutcome::resolved(v.clone())),
            MockBehaviour::ReturnOutcome(outcome) => Ok(outcome.clone()),
            MockBehaviour::FailRetryable(msg) => Err(NodeError::Retryable(msg.clone())),
            MockBehaviour::FailFatal(msg) => Err(NodeError::Fatal(msg.clone())),
            MockBehaviour::Flaky(failures, _) if attempt < *failures => Err(NodeError::Retryable(
                format!("{} attempt {} failed", self.name, attempt + 1),
            )),
            MockBehaviour::Flaky(_, v) => Ok(JobOutcome::resolved(v.clone())),
        }
    }
}
