//! Stream session repository.
//!
//! Read-side queries over `stream_sessions`. Writes go through
//! [`SessionTxOps`](super::SessionTxOps) inside a reconciliation transaction.

use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::Result;
use crate::database::models::StreamSessionDbModel;

/// Session repository trait.
#[async_trait]
pub trait SessionRepository: Send + Sync {
    async fn get_open_session(&self, broadcaster_id: i64) -> Result<Option<StreamSessionDbModel>>;
    async fn list_sessions_for_broadcaster(
        &self,
        broadcaster_id: i64,
        limit: i64,
    ) -> Result<Vec<StreamSessionDbModel>>;
    async fn count_open_sessions(&self) -> Result<i64>;
}

/// SQLx implementation of SessionRepository.
pub struct SqlxSessionRepository {
    pool: SqlitePool,
}

impl SqlxSessionRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SessionRepository for SqlxSessionRepository {
    async fn get_open_session(&self, broadcaster_id: i64) -> Result<Option<StreamSessionDbModel>> {
        let session = sqlx::query_as::<_, StreamSessionDbModel>(
            "SELECT * FROM stream_sessions WHERE broadcaster_id = ? AND ended_at IS NULL ORDER BY started_at DESC LIMIT 1",
        )
        .bind(broadcaster_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(session)
    }

    async fn list_sessions_for_broadcaster(
        &self,
        broadcaster_id: i64,
        limit: i64,
    ) -> Result<Vec<StreamSessionDbModel>> {
        let sessions = sqlx::query_as::<_, StreamSessionDbModel>(
            "SELECT * FROM stream_sessions WHERE broadcaster_id = ? ORDER BY started_at DESC, id DESC LIMIT ?",
        )
        .bind(broadcaster_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(sessions)
    }

    async fn count_open_sessions(&self) -> Result<i64> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM stream_sessions WHERE ended_at IS NULL")
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }
}
