//! The engine seam: [`ExpressionEngine`] and the identifier-keyed
//! [`EngineRegistry`].

use std::collections::BTreeMap;
use std::fmt;
use std::ops::Range;
use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::debug;

use crate::error::EvalError;
use crate::formula::FormulaEngine;
use crate::mathjs::MathEngine;

/// A pure expression evaluator.
///
/// Implementations must not keep state between calls: the same
/// `(expression, scope)` always gives the same answer.
pub trait ExpressionEngine: Send + Sync {
    /// Evaluate `expression`. Identifiers the engine does not treat as
    /// literals are looked up in `scope`.
    fn evaluate(&self, expression: &str, scope: &Map<String, Value>) -> Result<Value, EvalError>;

    /// Byte ranges of quoted literals according to this engine's tokenizer.
    /// Placeholders inside them are not substituted.
    fn literal_spans(&self, _expression: &str) -> Vec<Range<usize>> {
        Vec::new()
    }
}

/// Engines keyed by identifier (`"math.js"`, `"formula.js"`, ...).
#[derive(Clone, Default)]
pub struct EngineRegistry {
    engines: BTreeMap<String, Arc<dyn ExpressionEngine>>,
}

impl EngineRegistry {
    /// Registry with no engines.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Registry with the built-in engines.
    pub fn with_builtins() -> Self {
        Self::empty()
            .with(MathEngine::ID, MathEngine)
            .with(FormulaEngine::ID, FormulaEngine)
    }

    /// Register (or replace) an engine.
    pub fn with<E>(mut self, id: impl Into<String>, engine: E) -> Self
    where
        E: ExpressionEngine + 'static,
    {
        self.engines.insert(id.into(), Arc::new(engine));
        self
    }

    pub fn get(&self, id: &str) -> Option<&Arc<dyn ExpressionEngine>> {
        self.engines.get(id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.engines.keys().map(String::as_str)
    }

    /// Quoted-literal spans of `expression` as the engine `id` reads them.
    pub fn literal_spans(&self, id: &str, expression: &str) -> Result<Vec<Range<usize>>, EvalError> {
        self.get(id)
            .map(|engine| engine.literal_spans(expression))
            .ok_or_else(|| EvalError::UnknownEngine(id.to_owned()))
    }

    /// Dispatch to the engine registered as `id`.
    pub fn evaluate(
        &self,
        id: &str,
        expression: &str,
        scope: &Map<String, Value>,
    ) -> Result<Value, EvalError> {
        let engine = self
            .get(id)
            .ok_or_else(|| EvalError::UnknownEngine(id.to_owned()))?;
        let result = engine.evaluate(expression, scope);
        debug!(engine = id, expression, ok = result.is_ok(), "evaluated expression");
        result
    }
}

impl fmt::Debug for EngineRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.engines.keys()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Constant(Value);

    impl ExpressionEngine for Constant {
        fn evaluate(&self, _: &str, _: &Map<String, Value>) -> Result<Value, EvalError> {
            Ok(self.0.clone())
        }
    }

    #[test]
    fn builtins_are_registered() {
        let registry = EngineRegistry::with_builtins();
        let ids: Vec<_> = registry.ids().collect();
        assert_eq!(ids, vec!["formula.js", "math.js"]);
    }

    #[test]
    fn dispatches_by_identifier() {
        let registry = EngineRegistry::with_builtins().with("const", Constant(json!("k")));
        let scope = Map::new();
        assert_eq!(registry.evaluate("math.js", "1 + 1", &scope), Ok(json!(2)));
        assert_eq!(registry.evaluate("const", "anything", &scope), Ok(json!("k")));
    }

    #[test]
    fn unknown_engine() {
        let err = EngineRegistry::with_builtins()
            .evaluate("lua", "1", &Map::new())
            .unwrap_err();
        assert_eq!(err, EvalError::UnknownEngine("lua".into()));
        assert!(EngineRegistry::with_builtins().literal_spans("lua", "'x'").is_err());
    }

    #[test]
    fn literal_spans_come_from_the_named_engine() {
        let registry = EngineRegistry::with_builtins().with("const", Constant(json!(0)));
        assert_eq!(registry.literal_spans("math.js", "'ab' + 1").unwrap(), vec![0..4]);
        assert!(registry.literal_spans("const", "'ab'").unwrap().is_empty());
    }
}
