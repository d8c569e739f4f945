//! Execution repository functions.

use chrono::Utc;
use serde_json::Value;
use uuid::Uuid;

use crate::models::{format_datetime, ExecutionRow};
use crate::{DbError, DbPool};

const COLUMNS: &str = "id, workflow_id, context, status, created_at, finished_at";

/// Create a new execution row with the given initial `status` code.
pub async fn create_execution(
    pool: &DbPool,
    workflow_id: Uuid,
    context: &Value,
    status: i64,
) -> Result<ExecutionRow, DbError> {
    let id = Uuid::new_v4();
    let now = Utc::now();

    sqlx::query(
        "INSERT INTO executions (id, workflow_id, context, status, created_at) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(id.to_string())
    .bind(workflow_id.to_string())
    .bind(serde_json::to_string(context)?)
    .bind(status)
    .bind(format_datetime(&now))
    .execute(pool)
    .await?;

    get_execution(pool, id).await
}

/// Update the `status` (and optionally `finished_at`) of an execution.
pub async fn update_execution_status(
    pool: &DbPool,
    execution_id: Uuid,
    status: i64,
    finished: bool,
) -> Result<(), DbError> {
    let result = if finished {
        sqlx::query("UPDATE executions SET status = ?, finished_at = ? WHERE id = ?")
            .bind(status)
            .bind(format_datetime(&Utc::now()))
            .bind(execution_id.to_string())
            .execute(pool)
            .await?
    } else {
        sqlx::query("UPDATE executions SET status = ? WHERE id = ?")
            .bind(status)
            .bind(execution_id.to_string())
            .execute(pool)
            .await?
    };

    if result.rows_affected() == 0 {
        return Err(DbError::NotFound);
    }
    Ok(())
}

pub async fn get_execution(pool: &DbPool, id: Uuid) -> Result<ExecutionRow, DbError> {
    let row = sqlx::query(&format!("SELECT {COLUMNS} FROM executions WHERE id = ?"))
        .bind(id.to_string())
        .fetch_optional(pool)
        .await?
        .ok_or(DbError::NotFound)?;

    ExecutionRow::from_row(&row)
}

/// Executions of one workflow, oldest first.
pub async fn list_executions(pool: &DbPool, workflow_id: Uuid) -> Result<Vec<ExecutionRow>, DbError> {
    let rows = sqlx::query(&format!(
        "SELECT {COLUMNS} FROM executions WHERE workflow_id = ? ORDER BY created_at ASC, rowid ASC"
    ))
    .bind(workflow_id.to_string())
    .fetch_all(pool)
    .await?;

    rows.iter().map(ExecutionRow::from_row).collect()
}
