//! Workflow CRUD operations.

use chrono::Utc;
use serde_json::Value;
use uuid::Uuid;

use crate::models::{format_datetime, WorkflowRow};
use crate::{DbError, DbPool};

const COLUMNS: &str = "id, title, enabled, definition, created_at";

/// Insert a new workflow.
///
/// `definition` must be a JSON object produced by serialising the domain
/// `Workflow` type from the `engine` crate.
pub async fn create_workflow(
    pool: &DbPool,
    id: Uuid,
    title: &str,
    enabled: bool,
    definition: &Value,
) -> Result<WorkflowRow, DbError> {
    let now = Utc::now();

    sqlx::query(
        "INSERT INTO workflows (id, title, enabled, definition, created_at) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(id.to_string())
    .bind(title)
    .bind(enabled as i64)
    .bind(serde_json::to_string(definition)?)
    .bind(format_datetime(&now))
    .execute(pool)
    .await?;

    get_workflow(pool, id).await
}

/// Fetch a single workflow by its primary key.
pub async fn get_workflow(pool: &DbPool, id: Uuid) -> Result<WorkflowRow, DbError> {
    let row = sqlx::query(&format!("SELECT {COLUMNS} FROM workflows WHERE id = ?"))
        .bind(id.to_string())
        .fetch_optional(pool)
        .await?
        .ok_or(DbError::NotFound)?;

    WorkflowRow::from_row(&row)
}

/// Return all workflows ordered by creation time (newest first).
pub async fn list_workflows(pool: &DbPool) -> Result<Vec<WorkflowRow>, DbError> {
    let rows = sqlx::query(&format!(
        "SELECT {COLUMNS} FROM workflows ORDER BY created_at DESC, rowid DESC"
    ))
    .fetch_all(pool)
    .await?;

    rows.iter().map(WorkflowRow::from_row).collect()
}

/// Enabled workflows in creation order, oldest first.
pub async fn list_enabled_workflows(pool: &DbPool) -> Result<Vec<WorkflowRow>, DbError> {
    let rows = sqlx::query(&format!(
        "SELECT {COLUMNS} FROM workflows WHERE enabled = 1 ORDER BY created_at ASC, rowid ASC"
    ))
    .fetch_all(pool)
    .await?;

    rows.iter().map(WorkflowRow::from_row).collect()
}

pub async fn set_workflow_enabled(pool: &DbPool, id: Uuid, enabled: bool) -> Result<(), DbError> {
    let result = sqlx::query("UPDATE workflows SET enabled = ? WHERE id = ?")
        .bind(enabled as i64)
        .bind(id.to_string())
        .execute(pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(DbError::NotFound);
    }
    Ok(())
}

/// Permanently delete a workflow by its primary key.
///
/// Returns `DbError::NotFound` if no row was deleted.
pub async fn delete_workflow(pool: &DbPool, id: Uuid) -> Result<(), DbError> {
    let result = sqlx::query("DELETE FROM workflows WHERE id = ?")
        .bind(id.to_string())
        .execute(pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(DbError::NotFound);
    }

    Ok(())
}
