//! `expression` crate: placeholder resolution and pluggable expression engines.
//!
//! The pieces, leaves first:
//! - [`namespace`]: the layered, read-only variable surface
//!   (`$context`, `$jobsMapByNodeKey`, `$system`).
//! - [`template`]: `{{ path }}` scanning and substitution in coerce or
//!   preserve mode.
//! - [`engine`]: the [`ExpressionEngine`] trait and the [`EngineRegistry`]
//!   that dispatches by engine identifier.
//! - [`mathjs`] / [`formula`]: the two built-in engines.
//!
//! Nothing in this crate suspends or performs I/O.

pub mod error;
pub mod value;
mod lexer;
pub mod namespace;
pub mod template;
pub mod engine;
pub mod mathjs;
pub mod formula;

pub use error::{EvalError, TemplateError};
pub use namespace::{Namespace, Scope, SystemEntry, SystemVars};
pub use template::{Mode, Placeholder};
pub use engine::{EngineRegistry, ExpressionEngine};
pub use mathjs::MathEngine;
pub use formula::FormulaEngine;
