//! The `echo` instruction: passes data through unchanged.

use async_trait::async_trait;
use serde_json::Value;

use crate::traits::{ExecutionContext, Instruction};
use crate::{JobOutcome, NodeError};

/// Resolves to the first upstream node's job result, or to the triggering
/// context when the node sits directly under the trigger.
#[derive(Debug, Default, Clone, Copy)]
pub struct EchoInstruction;

#[async_trait]
impl Instruction for EchoInstruction {
    async fn run(&self, _config: &Value, ctx: &ExecutionContext) -> Result<JobOutcome, NodeError> {
        let result = match &ctx.upstream {
            Some(upstream) => upstream.clone(),
            None => ctx.namespace.context().clone(),
        };
        Ok(JobOutcome::resolved(result))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use expression::{Namespace, SystemVars};
    use serde_json::json;
    use std::sync::Arc;

    fn ctx(upstream: Option<Value>) -> ExecutionContext {
        ExecutionContext {
            workflow_id: uuid::Uuid::new_v4(),
            execution_id: uuid::Uuid::new_v4(),
            node_key: "echo".into(),
            namespace: Namespace::new(
                Arc::new(json!({"data": {"read": 1}})),
                Arc::new(SystemVars::empty()),
            ),
            upstream,
        }
    }

    #[tokio::test]
    async fn echoes_context_without_upstream() {
        let out = EchoInstruction.run(&json!({}), &ctx(None)).await.unwrap();
        assert_eq!(out, JobOutcome::resolved(json!({"data": {"read": 1}})));
    }

    #[tokio::test]
    async fn echoes_upstream_result() {
        let out = EchoInstruction
            .run(&json!({}), &ctx(Some(json!(42))))
            .await
            .unwrap();
        assert_eq!(out.result, json!(42));
    }
}
