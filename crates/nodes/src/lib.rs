//! `nodes` crate: the [`Instruction`] trait and the built-in instructions.
//!
//! Every node type is backed by an [`Instruction`]; the engine crate
//! dispatches through this trait object.

pub mod calculation;
pub mod echo;
pub mod error;
pub mod job;
pub mod mock;
pub mod query;
pub mod traits;

pub use calculation::{CalculationError, CalculationInstruction, CalculationMode};
pub use echo::EchoInstruction;
pub use error::NodeError;
pub use job::{JobOutcome, JobStatus};
pub use query::{QueryInstruction, RecordSource};
pub use traits::{ExecutionContext, Instruction};
