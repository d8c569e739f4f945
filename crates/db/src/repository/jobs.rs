//! Job repository functions.
//!
//! Jobs are append-only: once written with a terminal status they are
//! never updated.

use chrono::Utc;
use serde_json::Value;
use uuid::Uuid;

use crate::models::{format_datetime, JobRow};
use crate::{DbError, DbPool};

const COLUMNS: &str = "seq, id, execution_id, node_id, node_key, status, result, created_at";

/// Append a job to an execution.
pub async fn insert_job(
    pool: &DbPool,
    execution_id: Uuid,
    node_id: &str,
    node_key: &str,
    status: i64,
    result: &Value,
) -> Result<JobRow, DbError> {
    let id = Uuid::new_v4();
    let now = Utc::now();

    let row = sqlx::query(&format!(
        "INSERT INTO jobs (id, execution_id, node_id, node_key, status, result, created_at)
         VALUES (?, ?, ?, ?, ?, ?, ?)
         RETURNING {COLUMNS}"
    ))
    .bind(id.to_string())
    .bind(execution_id.to_string())
    .bind(node_id)
    .bind(node_key)
    .bind(status)
    .bind(serde_json::to_string(result)?)
    .bind(format_datetime(&now))
    .fetch_one(pool)
    .await?;

    JobRow::from_row(&row)
}

/// All jobs of an execution in visitation order.
pub async fn list_jobs(pool: &DbPool, execution_id: Uuid) -> Result<Vec<JobRow>, DbError> {
    let rows = sqlx::query(&format!(
        "SELECT {COLUMNS} FROM jobs WHERE execution_id = ? ORDER BY seq ASC"
    ))
    .bind(execution_id.to_string())
    .fetch_all(pool)
    .await?;

    rows.iter().map(JobRow::from_row).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::{executions, test_support, workflows};
    use serde_json::json;

    #[tokio::test]
    async fn jobs_keep_insertion_order() {
        let (pool, _dir) = test_support::pool().await;
        let wf = Uuid::new_v4();
        workflows::create_workflow(&pool, wf, "w", true, &json!({})).await.unwrap();
        let exec = executions::create_execution(&pool, wf, &json!({}), 0).await.unwrap();

        let first = insert_job(&pool, exec.id, "n-2", "b", 1, &json!(2)).await.unwrap();
        let second = insert_job(&pool, exec.id, "n-1", "a", -2, &json!("SyntaxError: x"))
            .await
            .unwrap();
        assert!(first.seq < second.seq);

        let jobs = list_jobs(&pool, exec.id).await.unwrap();
        let keys: Vec<&str> = jobs.iter().map(|j| j.node_key.as_str()).collect();
        assert_eq!(keys, ["b", "a"]);
        assert_eq!(jobs[1].result, json!("SyntaxError: x"));
        assert_eq!(jobs[1].status, -2);
    }
}
