//! Row structs that map 1-to-1 onto database tables.
//!
//! These are *persistence* models and carry no domain behaviour. Domain
//! types live in the `engine` crate. SQLite has no native UUID, JSON, or
//! timestamp columns, so each row decodes its TEXT columns by hand.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use uuid::Uuid;

use crate::DbError;

// ---------------------------------------------------------------------------
// workflows
// ---------------------------------------------------------------------------

/// A persisted workflow definition row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowRow {
    pub id: Uuid,
    pub title: String,
    pub enabled: bool,
    /// Full JSON workflow definition (nodes, edges, trigger, ...)
    pub definition: Value,
    pub created_at: DateTime<Utc>,
}

impl WorkflowRow {
    pub(crate) fn from_row(row: &SqliteRow) -> Result<Self, DbError> {
        Ok(Self {
            id: parse_uuid("id", row.try_get("id")?)?,
            title: row.try_get("title")?,
            enabled: row.try_get::<i64, _>("enabled")? != 0,
            definition: serde_json::from_str(row.try_get("definition")?)?,
            created_at: parse_datetime("created_at", row.try_get("created_at")?)?,
        })
    }
}

// ---------------------------------------------------------------------------
// executions
// ---------------------------------------------------------------------------

/// A persisted execution row. `status` is the integer execution status code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRow {
    pub id: Uuid,
    pub workflow_id: Uuid,
    /// Snapshot of the data that fired the trigger.
    pub context: Value,
    pub status: i64,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl ExecutionRow {
    pub(crate) fn from_row(row: &SqliteRow) -> Result<Self, DbError> {
        let finished_at: Option<&str> = row.try_get("finished_at")?;
        Ok(Self {
            id: parse_uuid("id", row.try_get("id")?)?,
            workflow_id: parse_uuid("workflow_id", row.try_get("workflow_id")?)?,
            context: serde_json::from_str(row.try_get("context")?)?,
            status: row.try_get("status")?,
            created_at: parse_datetime("created_at", row.try_get("created_at")?)?,
            finished_at: finished_at
                .map(|s| parse_datetime("finished_at", s))
                .transpose()?,
        })
    }
}

// ---------------------------------------------------------------------------
// jobs
// ---------------------------------------------------------------------------

/// A persisted job row. `seq` orders jobs by visitation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRow {
    pub seq: i64,
    pub id: Uuid,
    pub execution_id: Uuid,
    pub node_id: String,
    pub node_key: String,
    pub status: i64,
    pub result: Value,
    pub created_at: DateTime<Utc>,
}

impl JobRow {
    pub(crate) fn from_row(row: &SqliteRow) -> Result<Self, DbError> {
        Ok(Self {
            seq: row.try_get("seq")?,
            id: parse_uuid("id", row.try_get("id")?)?,
            execution_id: parse_uuid("execution_id", row.try_get("execution_id")?)?,
            node_id: row.try_get("node_id")?,
            node_key: row.try_get("node_key")?,
            status: row.try_get("status")?,
            result: serde_json::from_str(row.try_get("result")?)?,
            created_at: parse_datetime("created_at", row.try_get("created_at")?)?,
        })
    }
}

// ---------------------------------------------------------------------------
// records
// ---------------------------------------------------------------------------

/// A row of a user collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordRow {
    pub id: i64,
    pub collection: String,
    pub data: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RecordRow {
    pub(crate) fn from_row(row: &SqliteRow) -> Result<Self, DbError> {
        Ok(Self {
            id: row.try_get("id")?,
            collection: row.try_get("collection")?,
            data: serde_json::from_str(row.try_get("data")?)?,
            created_at: parse_datetime("created_at", row.try_get("created_at")?)?,
            updated_at: parse_datetime("updated_at", row.try_get("updated_at")?)?,
        })
    }

    /// The record as seen by workflows: its data with `id` merged in.
    /// Non-object data is wrapped as `{ "id", "value" }`.
    pub fn to_value(&self) -> Value {
        let mut map = match &self.data {
            Value::Object(map) => map.clone(),
            other => {
                let mut map = Map::new();
                map.insert("value".into(), other.clone());
                map
            }
        };
        map.insert("id".into(), Value::from(self.id));
        Value::Object(map)
    }
}

// ---------------------------------------------------------------------------
// column helpers
// ---------------------------------------------------------------------------

fn parse_uuid(column: &'static str, s: &str) -> Result<Uuid, DbError> {
    s.parse::<Uuid>().map_err(|e| DbError::Decode {
        column,
        reason: e.to_string(),
    })
}

fn parse_datetime(column: &'static str, s: &str) -> Result<DateTime<Utc>, DbError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| DbError::Decode {
            column,
            reason: e.to_string(),
        })
}

pub(crate) fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339()
}
