//! Collection record operations.

use chrono::Utc;
use serde_json::Value;

use crate::models::{format_datetime, RecordRow};
use crate::{DbError, DbPool};

const COLUMNS: &str = "id, collection, data, created_at, updated_at";

/// Insert a record into `collection`. Any `id` inside `data` is ignored in
/// favour of the generated one.
pub async fn insert_record(pool: &DbPool, collection: &str, data: &Value) -> Result<RecordRow, DbError> {
    let now = format_datetime(&Utc::now());

    let row = sqlx::query(&format!(
        "INSERT INTO records (collection, data, created_at, updated_at) VALUES (?, ?, ?, ?)
         RETURNING {COLUMNS}"
    ))
    .bind(collection)
    .bind(serde_json::to_string(data)?)
    .bind(&now)
    .bind(&now)
    .fetch_one(pool)
    .await?;

    RecordRow::from_row(&row)
}

/// Replace the data of an existing record.
pub async fn update_record(
    pool: &DbPool,
    collection: &str,
    id: i64,
    data: &Value,
) -> Result<RecordRow, DbError> {
    let row = sqlx::query(&format!(
        "UPDATE records SET data = ?, updated_at = ? WHERE collection = ? AND id = ?
         RETURNING {COLUMNS}"
    ))
    .bind(serde_json::to_string(data)?)
    .bind(format_datetime(&Utc::now()))
    .bind(collection)
    .bind(id)
    .fetch_optional(pool)
    .await?
    .ok_or(DbError::NotFound)?;

    RecordRow::from_row(&row)
}

pub async fn get_record(pool: &DbPool, collection: &str, id: i64) -> Result<RecordRow, DbError> {
    let row = sqlx::query(&format!(
        "SELECT {COLUMNS} FROM records WHERE collection = ? AND id = ?"
    ))
    .bind(collection)
    .bind(id)
    .fetch_optional(pool)
    .await?
    .ok_or(DbError::NotFound)?;

    RecordRow::from_row(&row)
}

/// Every record of `collection` in id order.
pub async fn list_records(pool: &DbPool, collection: &str) -> Result<Vec<RecordRow>, DbError> {
    let rows = sqlx::query(&format!(
        "SELECT {COLUMNS} FROM records WHERE collection = ? ORDER BY id ASC"
    ))
    .bind(collection)
    .fetch_all(pool)
    .await?;

    rows.iter().map(RecordRow::from_row).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::test_support;
    use serde_json::json;

    #[tokio::test]
    async fn insert_update_list() {
        let (pool, _dir) = test_support::pool().await;
        let a = insert_record(&pool, "posts", &json!({"title": "t1"})).await.unwrap();
        let b = insert_record(&pool, "posts", &json!({"title": "t2"})).await.unwrap();
        insert_record(&pool, "categories", &json!({"title": "c"})).await.unwrap();
        assert!(a.id < b.id);
        assert_eq!(a.to_value(), json!({"id": a.id, "title": "t1"}));

        let updated = update_record(&pool, "posts", a.id, &json!({"title": "t1!", "read": 3}))
            .await
            .unwrap();
        assert_eq!(updated.data["read"], json!(3));
        assert_eq!(get_record(&pool, "posts", a.id).await.unwrap().data["title"], json!("t1!"));

        let posts = list_records(&pool, "posts").await.unwrap();
        assert_eq!(posts.iter().map(|r| r.id).collect::<Vec<_>>(), [a.id, b.id]);

        assert!(matches!(
            update_record(&pool, "categories", a.id, &json!({})).await,
            Err(DbError::NotFound)
        ));
    }
}
