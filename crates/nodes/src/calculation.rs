//! The `calculation` instruction.
//!
//! Two configuration shapes:
//! - static:  `{ "engine": "math.js", "expression": "{{$context.data.read}} + 1" }`
//! - dynamic: `{ "dynamic": "{{$context.data.category}}", "scope": "{{$context.data}}" }`
//!
//! In dynamic mode `dynamic` resolves to an object carrying `engine` and
//! `expression`, and that expression's placeholders are resolved against the
//! object `scope` resolves to (`{{read}}`, not `{{$context.data.read}}`).

use std::sync::Arc;

use async_trait::async_trait;
use expression::template::{self, Mode};
use expression::value::to_text;
use expression::{EngineRegistry, EvalError, MathEngine, Scope, TemplateError};
use serde::Deserialize;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::debug;

use crate::traits::{ExecutionContext, Instruction};
use crate::{JobOutcome, NodeError};

/// Scope key a whole-placeholder expression's native value is bound to.
const VALUE_BINDING: &str = "value";

/// Why a calculation produced an error job. The text form is the job result.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CalculationError {
    #[error(transparent)]
    Eval(#[from] EvalError),

    #[error(transparent)]
    Template(#[from] TemplateError),

    /// `dynamic` or `scope` resolved to something unusable.
    #[error("DynamicSourceError: {0}")]
    DynamicSource(String),

    #[error("ConfigError: {0}")]
    Config(String),
}

/// Calculation node configuration.
#[derive(Debug, Clone, PartialEq)]
pub enum CalculationMode {
    Static { engine: String, expression: String },
    Dynamic { dynamic: Value, scope: Option<Value> },
}

#[derive(Debug, Default, Deserialize)]
struct RawConfig {
    #[serde(default)]
    engine: Option<String>,
    #[serde(default)]
    expression: Option<String>,
    #[serde(default)]
    dynamic: Option<Value>,
    #[serde(default)]
    scope: Option<Value>,
}

impl CalculationMode {
    /// Parse a node config. A non-null `dynamic` selects dynamic mode even
    /// when `expression` is also set.
    pub fn from_config(config: &Value) -> Result<Self, CalculationError> {
        let raw = RawConfig::deserialize(config)
            .map_err(|e| CalculationError::Config(format!("invalid calculation config: {e}")))?;

        match raw {
            RawConfig { dynamic: Some(dynamic), scope, .. } if !dynamic.is_null() => {
                Ok(Self::Dynamic { dynamic, scope })
            }
            RawConfig { expression: Some(expression), engine, .. } => Ok(Self::Static {
                engine: engine.unwrap_or_else(|| MathEngine::ID.to_owned()),
                expression,
            }),
            _ => Err(CalculationError::Config(
                "calculation needs either `expression` or `dynamic`".into(),
            )),
        }
    }
}

/// Evaluates calculation nodes against the engines it was built with.
#[derive(Debug, Clone)]
pub struct CalculationInstruction {
    engines: Arc<EngineRegistry>,
}

impl CalculationInstruction {
    pub fn new(engines: Arc<EngineRegistry>) -> Self {
        Self { engines }
    }

    /// Produce the job value for `mode` under `namespace`.
    pub fn calculate(
        &self,
        mode: &CalculationMode,
        namespace: &dyn Scope,
    ) -> Result<Value, CalculationError> {
        match mode {
            CalculationMode::Static { engine, expression } => {
                self.evaluate(engine, expression, namespace)
            }
            CalculationMode::Dynamic { dynamic, scope } => {
                let source = resolve_config_value(dynamic, namespace)?;
                let (engine, expression) = dynamic_source(&source)?;

                let sub_scope = match scope {
                    None => Value::Object(Map::new()),
                    Some(scope) => match resolve_config_value(scope, namespace)? {
                        Value::Null => Value::Object(Map::new()),
                        object @ Value::Object(_) => object,
                        other => {
                            return Err(CalculationError::DynamicSource(format!(
                                "scope must resolve to an object, got {}",
                                expression::value::type_name(&other)
                            )))
                        }
                    },
                };

                debug!(engine, expression, "evaluating dynamic expression");
                self.evaluate(engine, expression, &sub_scope)
            }
        }
    }

    /// Substitute placeholders in `expression` from `scope`, then hand the
    /// result to `engine_id`.
    fn evaluate(
        &self,
        engine_id: &str,
        expression: &str,
        scope: &dyn Scope,
    ) -> Result<Value, CalculationError> {
        let mut bindings = Map::new();
        let text = if template::single_placeholder(expression).is_some() {
            let value = template::resolve(expression, scope, Mode::Preserve)?;
            bindings.insert(VALUE_BINDING.to_owned(), value);
            VALUE_BINDING.to_owned()
        } else {
            let literals = self.engines.literal_spans(engine_id, expression)?;
            let resolved = template::resolve_outside(expression, scope, Mode::Coerce, &literals)?;
            to_text(&resolved)
        };

        Ok(self.engines.evaluate(engine_id, &text, &bindings)?)
    }
}

/// A config field that is either a placeholder string (resolved keeping
/// its type) or a literal value.
fn resolve_config_value(value: &Value, scope: &dyn Scope) -> Result<Value, CalculationError> {
    match value {
        Value::String(s) => Ok(template::resolve(s, scope, Mode::Preserve)?),
        other => Ok(other.clone()),
    }
}

fn dynamic_source(source: &Value) -> Result<(&str, &str), CalculationError> {
    let Value::Object(map) = source else {
        return Err(CalculationError::DynamicSource(format!(
            "dynamic expression must resolve to an object with `engine` and `expression`, got {}",
            expression::value::type_name(source)
        )));
    };
    let engine = match map.get("engine") {
        None | Some(Value::Null) => MathEngine::ID,
        Some(Value::String(s)) => s.as_str(),
        Some(_) => {
            return Err(CalculationError::DynamicSource(
                "`engine` of dynamic expression must be a string".into(),
            ))
        }
    };
    let Some(Value::String(expression)) = map.get("expression") else {
        return Err(CalculationError::DynamicSource(
            "dynamic expression has no `expression` string".into(),
        ));
    };
    Ok((engine, expression.as_str()))
}

#[async_trait]
impl Instruction for CalculationInstruction {
    async fn run(&self, config: &Value, ctx: &ExecutionContext) -> Result<JobOutcome, NodeError> {
        let result = CalculationMode::from_config(config)
            .and_then(|mode| self.calculate(&mode, &ctx.namespace));

        Ok(match result {
            Ok(value) => JobOutcome::resolved(value),
            Err(err) => {
                debug!(node = %ctx.node_key, error = %err, "calculation failed");
                JobOutcome::error(err)
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::JobStatus;
    use expression::{Namespace, SystemVars};
    use serde_json::json;

    fn instruction() -> CalculationInstruction {
        CalculationInstruction::new(Arc::new(EngineRegistry::with_builtins()))
    }

    fn namespace(context: Value) -> Namespace {
        Namespace::new(
            Arc::new(context),
            Arc::new(SystemVars::with_defaults().constant("no1", json!(1))),
        )
    }

    fn calc(config: Value, ns: &Namespace) -> Result<Value, CalculationError> {
        let mode = CalculationMode::from_config(&config)?;
        instruction().calculate(&mode, ns)
    }

    fn ctx(ns: Namespace) -> ExecutionContext {
        ExecutionContext {
            workflow_id: uuid::Uuid::new_v4(),
            execution_id: uuid::Uuid::new_v4(),
            node_key: "calc".into(),
            namespace: ns,
            upstream: None,
        }
    }

    #[test]
    fn config_shapes() {
        assert_eq!(
            CalculationMode::from_config(&json!({"expression": "1"})).unwrap(),
            CalculationMode::Static { engine: "math.js".into(), expression: "1".into() }
        );
        assert_eq!(
            CalculationMode::from_config(&json!({"dynamic": "{{x}}"})).unwrap(),
            CalculationMode::Dynamic { dynamic: json!("{{x}}"), scope: None }
        );
        assert!(matches!(
            CalculationMode::from_config(&json!({"engine": "math.js"})),
            Err(CalculationError::Config(_))
        ));
    }

    #[test]
    fn constant_expression() {
        let ns = namespace(json!({}));
        let out = calc(json!({"engine": "math.js", "expression": " 1 + 1 "}), &ns);
        assert_eq!(out, Ok(json!(2)));
    }

    #[test]
    fn context_placeholder_inlined() {
        let ns = namespace(json!({"data": {"read": 1}}));
        let out = calc(json!({"engine": "math.js", "expression": "{{$context.data.read}} + 1"}), &ns);
        assert_eq!(out, Ok(json!(2)));
    }

    #[test]
    fn system_constant() {
        let ns = namespace(json!({}));
        let out = calc(json!({"engine": "math.js", "expression": "1 + {{$system.no1}}"}), &ns);
        assert_eq!(out, Ok(json!(2)));
    }

    #[test]
    fn whole_placeholder_keeps_native_value() {
        let ns = namespace(json!({"data": {"read": 5, "tags": ["a", "b"]}}));
        let out = calc(json!({"expression": "{{$context.data.read}}"}), &ns);
        assert_eq!(out, Ok(json!(5)));
        let out = calc(json!({"expression": " {{$context.data.tags}} "}), &ns);
        assert_eq!(out, Ok(json!(["a", "b"])));
        let now = calc(json!({"expression": "{{$system.now}}"}), &ns).unwrap();
        assert!(now.as_str().is_some_and(|s| s.ends_with('Z')), "{now}");
    }

    #[test]
    fn jobs_placeholder() {
        let ns = namespace(json!({})).with_job("n1", json!({"data": {"read": 1}}));
        let out = calc(
            json!({"expression": "{{$jobsMapByNodeKey.n1.data.read}} + 1"}),
            &ns,
        );
        assert_eq!(out, Ok(json!(2)));
    }

    #[test]
    fn formula_text_interpolation() {
        let ns = namespace(json!({"data": {"title": "t1"}}));
        let out = calc(
            json!({"engine": "formula.js", "expression": "CONCATENATE('a', {{$context.data.title}})"}),
            &ns,
        );
        assert_eq!(out, Ok(json!("at1")));
    }

    #[test]
    fn placeholder_inside_quoted_literal_reads_as_its_path() {
        let ns = namespace(json!({"data": {"title": "t1"}}));
        let out = calc(
            json!({"engine": "formula.js", "expression": "CONCATENATE('a', '{{$context.data.title}}')"}),
            &ns,
        );
        assert_eq!(out, Ok(json!("a $context.data.title ")));

        let out = calc(
            json!({"engine": "math.js", "expression": "'{{$context.data.title}}' == ' $context.data.title '"}),
            &ns,
        );
        assert_eq!(out, Ok(json!(true)));
    }

    #[test]
    fn syntax_error_text() {
        let ns = namespace(json!({}));
        let err = calc(json!({"engine": "math.js", "expression": "1 1"}), &ns).unwrap_err();
        assert!(err.to_string().starts_with("SyntaxError: "), "{err}");
    }

    #[test]
    fn unknown_engine() {
        let ns = namespace(json!({}));
        let err = calc(json!({"engine": "nope", "expression": "1"}), &ns).unwrap_err();
        assert_eq!(err, CalculationError::Eval(EvalError::UnknownEngine("nope".into())));
    }

    #[test]
    fn dynamic_expression_uses_its_own_scope() {
        let ns = namespace(json!({"data": {
            "read": 0,
            "category": {"engine": "math.js", "expression": "1 + {{read}}"}
        }}));
        let out = calc(
            json!({"dynamic": "{{$context.data.category}}", "scope": "{{$context.data}}"}),
            &ns,
        );
        assert_eq!(out, Ok(json!(1)));
    }

    #[test]
    fn dynamic_expression_from_upstream_job() {
        let ns = namespace(json!({"data": {"read": 4}}))
            .with_job("q", json!({"id": 1, "engine": "math.js", "expression": "{{read}} * 2"}));
        let out = calc(
            json!({"dynamic": "{{$jobsMapByNodeKey.q}}", "scope": "{{$context.data}}"}),
            &ns,
        );
        assert_eq!(out, Ok(json!(8)));
    }

    #[test]
    fn dynamic_literal_config_and_missing_scope() {
        let ns = namespace(json!({}));
        let out = calc(
            json!({"dynamic": {"engine": "formula.js", "expression": "UPPER('x')"}}),
            &ns,
        );
        assert_eq!(out, Ok(json!("X")));
    }

    #[test]
    fn dynamic_source_errors() {
        let ns = namespace(json!({"data": {"category": null, "n": 3, "bad": {"engine": "math.js"}}}));
        for config in [
            json!({"dynamic": "{{$context.data.category}}", "scope": "{{$context.data}}"}),
            json!({"dynamic": "{{$context.data.missing}}"}),
            json!({"dynamic": "{{$context.data.bad}}"}),
            json!({"dynamic": {"expression": "1"}, "scope": "{{$context.data.n}}"}),
        ] {
            let err = calc(config.clone(), &ns).unwrap_err();
            assert!(err.to_string().starts_with("DynamicSourceError: "), "{config}: {err}");
        }
    }

    #[tokio::test]
    async fn run_turns_failures_into_error_jobs() {
        let ns = namespace(json!({}));
        let ok = instruction()
            .run(&json!({"expression": "1 + 1"}), &ctx(ns.clone()))
            .await
            .unwrap();
        assert_eq!(ok, JobOutcome::resolved(json!(2)));

        let bad = instruction()
            .run(&json!({"expression": "1 1"}), &ctx(ns.clone()))
            .await
            .unwrap();
        assert_eq!(bad.status, JobStatus::Error);
        assert!(bad.result.as_str().unwrap().starts_with("SyntaxError: "));

        let misconfigured = instruction().run(&json!({}), &ctx(ns)).await.unwrap();
        assert_eq!(misconfigured.status, JobStatus::Error);
        assert!(misconfigured.result.as_str().unwrap().starts_with("ConfigError: "));
    }
}
