//! The `Instruction` trait: the contract every node type must fulfil.

use async_trait::async_trait;
use expression::Namespace;
use serde_json::Value;

use crate::{JobOutcome, NodeError};

/// Per-node context passed to an instruction.
///
/// Defined here (in the nodes crate) so both the engine and individual
/// instructions can import it without a circular dependency. The namespace
/// is a frozen snapshot: it only holds jobs of the node's ancestors.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    /// ID of the parent workflow.
    pub workflow_id: uuid::Uuid,
    /// ID of the current execution.
    pub execution_id: uuid::Uuid,
    /// Key of the node being run.
    pub node_key: String,
    /// Variables visible to this node.
    pub namespace: Namespace,
    /// Job result of the node's first upstream node, if it has one.
    pub upstream: Option<Value>,
}

/// The core instruction trait, one implementation per node type.
#[async_trait]
pub trait Instruction: Send + Sync {
    /// Run the node with its type-specific `config` and produce its job.
    ///
    /// Problems with the node's own configuration or expressions are
    /// reported as an error-status [`JobOutcome`]; `Err` is reserved for
    /// infrastructure failures.
    async fn run(&self, config: &Value, ctx: &ExecutionContext) -> Result<JobOutcome, NodeError>;
}
