//! Node-level error type.

use thiserror::Error;

/// Infrastructure failures raised by an instruction's `run` method.
///
/// Expression and configuration problems are *not* `NodeError`s: they
/// become an error-status job. The engine uses the variant to decide
/// retry behaviour:
/// - `Retryable`: the node is re-run with exponential back-off.
/// - `Fatal`: the execution is immediately marked as errored.
#[derive(Debug, Error, Clone)]
pub enum NodeError {
    /// Transient failure (e.g. storage unavailable); the engine should retry.
    #[error("retryable node error: {0}")]
    Retryable(String),

    /// Permanent failure; no retry should be attempted.
    #[error("fatal node error: {0}")]
    Fatal(String),
}
