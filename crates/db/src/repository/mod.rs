//! Repository functions, one function per database operation.
//!
//! Every function takes a `&DbPool` and returns a `Result<T, DbError>`.
//! No business logic, no domain types, pure SQL.

pub mod executions;
pub mod jobs;
pub mod records;
pub mod workflows;

#[cfg(test)]
pub(crate) mod test_support {
    use crate::{create_pool, run_migrations, DbPool};

    /// A migrated database in a temp dir. Keep the dir alive for the test.
    pub async fn pool() -> (DbPool, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}?mode=rwc", dir.path().join("test.db").display());
        let pool = create_pool(&url, 4).await.unwrap();
        run_migrations(&pool).await.unwrap();
        (pool, dir)
    }
}
