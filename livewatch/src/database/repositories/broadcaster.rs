//! Broadcaster repository.

use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::Result;
use crate::database::models::RosterEntry;

/// Broadcaster repository trait.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BroadcasterRepository: Send + Sync {
    /// All broadcasters that have a platform id, ordered by internal id.
    async fn list_pollable(&self) -> Result<Vec<RosterEntry>>;
}

/// SQLx implementation of BroadcasterRepository.
pub struct SqlxBroadcasterRepository {
    pool: SqlitePool,
}

impl SqlxBroadcasterRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Register a broadcaster. Used for seeding; the worker itself never writes here.
    pub async fn create_broadcaster(&self, name: &str, external_id: Option<&str>) -> Result<i64> {
        let result = sqlx::query(
            "INSERT INTO broadcasters (name, external_id, created_at) VALUES (?, ?, ?)",
        )
        .bind(name)
        .bind(external_id)
        .bind(crate::database::time::now_ms())
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }
}

#[async_trait]
impl BroadcasterRepository for SqlxBroadcasterRepository {
    async fn list_pollable(&self) -> Result<Vec<RosterEntry>> {
        let roster = sqlx::query_as::<_, RosterEntry>(
            "SELECT id, external_id FROM broadcasters WHERE external_id IS NOT NULL AND external_id != '' ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(roster)
    }
}
