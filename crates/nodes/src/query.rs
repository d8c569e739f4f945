//! The `query` instruction: looks up records of a collection.
//!
//! ```json
//! { "collection": "categories",
//!   "params": { "filter": { "id": "{{$context.data.categoryId}}" } },
//!   "multiple": false }
//! ```
//!
//! Strings inside `params` are placeholders resolved keeping their type.
//! A filter is an object whose entries must all hold:
//! - `$and: [filter, ..]` / `$or: [filter, ..]`
//! - `field: value` equality
//! - `field: { $eq | $ne | $gt | $gte | $lt | $lte | $in | $notIn: operand }`
//!
//! Field names may be dotted paths into nested objects.

use std::cmp::Ordering;
use std::sync::Arc;

use async_trait::async_trait;
use expression::template::{self, Mode};
use expression::value::{to_number, walk};
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::debug;

use crate::traits::{ExecutionContext, Instruction};
use crate::{JobOutcome, NodeError};

/// Read access to stored collection records.
#[async_trait]
pub trait RecordSource: Send + Sync {
    /// All records of `collection`, oldest first.
    async fn records(&self, collection: &str) -> Result<Vec<Value>, NodeError>;
}

#[derive(Debug, Clone, Deserialize)]
struct QueryConfig {
    collection: String,
    #[serde(default)]
    params: QueryParams,
    #[serde(default)]
    multiple: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct QueryParams {
    #[serde(default)]
    filter: Value,
}

pub struct QueryInstruction {
    source: Arc<dyn RecordSource>,
}

impl QueryInstruction {
    pub fn new(source: Arc<dyn RecordSource>) -> Self {
        Self { source }
    }
}

impl std::fmt::Debug for QueryInstruction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryInstruction").finish_non_exhaustive()
    }
}

#[async_trait]
impl Instruction for QueryInstruction {
    async fn run(&self, config: &Value, ctx: &ExecutionContext) -> Result<JobOutcome, NodeError> {
        let config = match QueryConfig::deserialize(config) {
            Ok(config) => config,
            Err(e) => return Ok(JobOutcome::error(format!("ConfigError: invalid query config: {e}"))),
        };
        let filter = match template::resolve_deep(&config.params.filter, &ctx.namespace, Mode::Preserve) {
            Ok(filter) => filter,
            Err(e) => return Ok(JobOutcome::error(e)),
        };

        let records = self.source.records(&config.collection).await?;
        let mut found = records.into_iter().filter(|record| matches(record, &filter));

        let result = if config.multiple {
            Value::Array(found.collect())
        } else {
            found.next().unwrap_or(Value::Null)
        };
        debug!(node = %ctx.node_key, collection = %config.collection, "query resolved");
        Ok(JobOutcome::resolved(result))
    }
}

/// Whether `record` satisfies `filter`. A null or empty filter matches
/// everything.
pub fn matches(record: &Value, filter: &Value) -> bool {
    match filter {
        Value::Null => true,
        Value::Object(conditions) => conditions.iter().all(|(key, cond)| match key.as_str() {
            "$and" => list(cond).iter().all(|f| matches(record, f)),
            "$or" => list(cond).iter().any(|f| matches(record, f)),
            field => {
                let segments: Vec<&str> = field.split('.').collect();
                let actual = walk(record, &segments).unwrap_or(&Value::Null);
                field_matches(actual, cond)
            }
        }),
        _ => false,
    }
}

fn list(value: &Value) -> &[Value] {
    match value {
        Value::Array(items) => items,
        _ => &[],
    }
}

fn field_matches(actual: &Value, cond: &Value) -> bool {
    match cond {
        Value::Object(ops) if is_operator_map(ops) => ops.iter().all(|(op, operand)| {
            match op.as_str() {
                "$eq" => loose_eq(actual, operand),
                "$ne" => !loose_eq(actual, operand),
                "$gt" => compare(actual, operand) == Some(Ordering::Greater),
                "$gte" => matches!(compare(actual, operand), Some(Ordering::Greater | Ordering::Equal)),
                "$lt" => compare(actual, operand) == Some(Ordering::Less),
                "$lte" => matches!(compare(actual, operand), Some(Ordering::Less | Ordering::Equal)),
                "$in" => list(operand).iter().any(|v| loose_eq(actual, v)),
                "$notIn" => !list(operand).iter().any(|v| loose_eq(actual, v)),
                _ => false,
            }
        }),
        expected => loose_eq(actual, expected),
    }
}

fn is_operator_map(map: &Map<String, Value>) -> bool {
    !map.is_empty() && map.keys().all(|k| k.starts_with('$'))
}

/// Equality where numbers and numeric strings compare by value.
fn loose_eq(a: &Value, b: &Value) -> bool {
    if a == b {
        return true;
    }
    match (a, b) {
        (Value::Number(_), Value::String(_)) | (Value::String(_), Value::Number(_)) => {
            match (to_number(a), to_number(b)) {
                (Some(x), Some(y)) => x == y,
                _ => false,
            }
        }
        (Value::Number(_), Value::Number(_)) => to_number(a) == to_number(b),
        _ => false,
    }
}

fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Null, _) | (_, Value::Null) => None,
        _ => to_number(a)?.partial_cmp(&to_number(b)?),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::JobStatus;
    use expression::{Namespace, SystemVars};
    use serde_json::json;
    use std::collections::HashMap;

    struct InMemory(HashMap<String, Vec<Value>>);

    #[async_trait]
    impl RecordSource for InMemory {
        async fn records(&self, collection: &str) -> Result<Vec<Value>, NodeError> {
            self.0
                .get(collection)
                .cloned()
                .ok_or_else(|| NodeError::Retryable(format!("no collection {collection}")))
        }
    }

    fn instruction() -> QueryInstruction {
        let mut collections = HashMap::new();
        collections.insert(
            "categories".to_owned(),
            vec![
                json!({"id": 1, "title": "c1", "engine": "math.js", "expression": "1 + {{read}}"}),
                json!({"id": 2, "title": "c2", "engine": "formula.js", "expression": "{{read}}"}),
            ],
        );
        QueryInstruction::new(Arc::new(InMemory(collections)))
    }

    fn ctx(context: Value) -> ExecutionContext {
        ExecutionContext {
            workflow_id: uuid::Uuid::new_v4(),
            execution_id: uuid::Uuid::new_v4(),
            node_key: "q".into(),
            namespace: Namespace::new(Arc::new(context), Arc::new(SystemVars::empty())),
            upstream: None,
        }
    }

    #[test]
    fn filter_operators() {
        let record = json!({"id": 3, "title": "t", "meta": {"tags": 2}});
        assert!(matches(&record, &json!(null)));
        assert!(matches(&record, &json!({})));
        assert!(matches(&record, &json!({"id": "3"})));
        assert!(matches(&record, &json!({"id": {"$gt": 2, "$lte": 3}})));
        assert!(matches(&record, &json!({"id": {"$in": [1, 3]}})));
        assert!(matches(&record, &json!({"meta.tags": {"$ne": 5}})));
        assert!(matches(&record, &json!({"$or": [{"id": 9}, {"title": "t"}]})));
        assert!(!matches(&record, &json!({"$and": [{"id": 3}, {"title": "x"}]})));
        assert!(!matches(&record, &json!({"id": {"$notIn": [3]}})));
        assert!(!matches(&record, &json!({"missing": {"$gt": 0}})));
    }

    #[tokio::test]
    async fn finds_first_match_from_placeholder_filter() {
        let out = instruction()
            .run(
                &json!({"collection": "categories", "params": {"filter": {"id": "{{$context.data.categoryId}}"}}}),
                &ctx(json!({"data": {"categoryId": 2}})),
            )
            .await
            .unwrap();
        assert_eq!(out.status, JobStatus::Resolved);
        assert_eq!(out.result["title"], json!("c2"));
    }

    #[tokio::test]
    async fn multiple_and_no_match() {
        let all = instruction()
            .run(&json!({"collection": "categories", "multiple": true}), &ctx(json!({})))
            .await
            .unwrap();
        assert_eq!(all.result.as_array().map(Vec::len), Some(2));

        let none = instruction()
            .run(
                &json!({"collection": "categories", "params": {"filter": {"id": 7}}}),
                &ctx(json!({})),
            )
            .await
            .unwrap();
        assert_eq!(none, JobOutcome::resolved(Value::Null));
    }

    #[tokio::test]
    async fn bad_config_and_storage_failure() {
        let bad = instruction().run(&json!({"params": {}}), &ctx(json!({}))).await.unwrap();
        assert_eq!(bad.status, JobStatus::Error);
        assert!(bad.result.as_str().unwrap().starts_with("ConfigError: "));

        let err = instruction()
            .run(&json!({"collection": "nope"}), &ctx(json!({})))
            .await
            .unwrap_err();
        assert!(matches!(err, NodeError::Retryable(_)));
    }
}
