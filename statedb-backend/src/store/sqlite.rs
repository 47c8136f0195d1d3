use super::StateStore;
use crate::catalog::DEFAULT_WORKSPACE;
use crate::db::{create_memory_pool, create_pool, run_migrations};
use crate::error::{StoreError, StoreResult};
use crate::lock::LockInfo;
use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;
use std::path::Path;
use tracing::{debug, warn};

/// SQLite-backed store. Several processes may open the same database file;
/// the `state_locks` primary key provides mutual exclusion between them.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

#[derive(sqlx::FromRow)]
struct LockRow {
    lock_id: String,
    info: String,
}

impl SqliteStore {
    /// Wrap an existing pool. Migrations must already have been run.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open (creating if needed) the database at `db_path` and migrate it.
    pub async fn open(db_path: &Path) -> StoreResult<Self> {
        let pool = create_pool(db_path).await?;
        run_migrations(&pool).await?;
        Ok(Self { pool })
    }

    /// Fresh migrated in-memory database.
    pub async fn in_memory() -> StoreResult<Self> {
        let pool = create_memory_pool().await?;
        run_migrations(&pool).await?;
        Ok(Self { pool })
    }

    /// Get a reference to the database pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn lock_holder(&self, namespace: &str, name: &str) -> StoreResult<Option<LockInfo>> {
        let row = sqlx::query_as::<_, LockRow>(
            "SELECT lock_id, info FROM state_locks WHERE namespace = ? AND name = ?",
        )
        .bind(namespace)
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => {
                let mut info: LockInfo = serde_json::from_str(&row.info)?;
                if info.id != row.lock_id {
                    // Unlock matches on the column, so report that ID.
                    warn!(
                        namespace,
                        name,
                        lock_id = %row.lock_id,
                        info_id = %info.id,
                        "lock row ID disagrees with its stored info"
                    );
                    info.id = row.lock_id;
                }
                Ok(Some(info))
            }
            None => Ok(None),
        }
    }
}

#[async_trait]
impl StateStore for SqliteStore {
    async fn list_names(&self, namespace: &str) -> StoreResult<Vec<String>> {
        let names = sqlx::query_scalar::<_, String>(
            "SELECT name FROM states WHERE namespace = ? AND name != ? ORDER BY name",
        )
        .bind(namespace)
        .bind(DEFAULT_WORKSPACE)
        .fetch_all(&self.pool)
        .await?;

        Ok(names)
    }

    async fn delete(&self, namespace: &str, name: &str) -> StoreResult<()> {
        let result = sqlx::query("DELETE FROM states WHERE namespace = ? AND name = ?")
            .bind(namespace)
            .bind(name)
            .execute(&self.pool)
            .await?;

        debug!(namespace, name, rows = result.rows_affected(), "deleted state rows");
        Ok(())
    }

    async fn get(&self, namespace: &str, name: &str) -> StoreResult<Option<Vec<u8>>> {
        let data = sqlx::query_scalar::<_, Vec<u8>>(
            "SELECT data FROM states WHERE namespace = ? AND name = ?",
        )
        .bind(namespace)
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        Ok(data)
    }

    async fn put(&self, namespace: &str, name: &str, data: &[u8]) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO states (namespace, name, data, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT (namespace, name)
            DO UPDATE SET data = excluded.data, updated_at = excluded.updated_at
            "#,
        )
        .bind(namespace)
        .bind(name)
        .bind(data)
        .bind(Utc::now().timestamp())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn lock(&self, namespace: &str, name: &str, info: &LockInfo) -> StoreResult<String> {
        let encoded = serde_json::to_string(info)?;
        let inserted = sqlx::query(
            "INSERT INTO state_locks (namespace, name, lock_id, info, created_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(namespace)
        .bind(name)
        .bind(&info.id)
        .bind(encoded)
        .bind(info.created.timestamp())
        .execute(&self.pool)
        .await;

        match inserted {
            Ok(_) => Ok(info.id.clone()),
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                match self.lock_holder(namespace, name).await? {
                    Some(holder) => Err(StoreError::Locked {
                        info: Box::new(holder),
                    }),
                    // Holder released between our insert and the lookup.
                    None => Err(StoreError::Database(sqlx::Error::Database(db_err))),
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn unlock(&self, namespace: &str, name: &str, id: &str) -> StoreResult<()> {
        let result = sqlx::query(
            "DELETE FROM state_locks WHERE namespace = ? AND name = ? AND lock_id = ?",
        )
        .bind(namespace)
        .bind(name)
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            let held = self.lock_holder(namespace, name).await?;
            return Err(StoreError::LockMismatch {
                expected: id.to_string(),
                held: held.map(Box::new),
            });
        }

        Ok(())
    }
}
