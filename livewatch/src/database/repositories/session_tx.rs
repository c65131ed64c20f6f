//! Transactional operations for stream sessions.
//!
//! These methods operate within an existing transaction and do NOT commit.
//! The caller is responsible for committing or rolling back the transaction.

use sqlx::SqliteConnection;

use crate::Result;
use crate::database::models::StreamSessionDbModel;

/// Transactional operations for stream sessions.
pub struct SessionTxOps;

impl SessionTxOps {
    /// Get the open (no `ended_at`) session for a broadcaster.
    pub async fn get_open_session(
        tx: &mut SqliteConnection,
        broadcaster_id: i64,
    ) -> Result<Option<StreamSessionDbModel>> {
        let session = sqlx::query_as::<_, StreamSessionDbModel>(
            "SELECT * FROM stream_sessions WHERE broadcaster_id = ? AND ended_at IS NULL ORDER BY started_at DESC LIMIT 1",
        )
        .bind(broadcaster_id)
        .fetch_optional(tx)
        .await?;

        Ok(session)
    }

    /// Create a new open session and return its id.
    pub async fn create_session(
        tx: &mut SqliteConnection,
        broadcaster_id: i64,
        started_at_ms: i64,
        viewer_count: i64,
    ) -> Result<i64> {
        let result = sqlx::query(
            "INSERT INTO stream_sessions (broadcaster_id, started_at, ended_at, viewer_count) VALUES (?, ?, NULL, ?)",
        )
        .bind(broadcaster_id)
        .bind(started_at_ms)
        .bind(viewer_count)
        .execute(tx)
        .await?;

        Ok(result.last_insert_rowid())
    }

    /// Overwrite the viewer count of a session.
    pub async fn update_viewer_count(
        tx: &mut SqliteConnection,
        session_id: i64,
        viewer_count: i64,
    ) -> Result<u64> {
        let result = sqlx::query("UPDATE stream_sessions SET viewer_count = ? WHERE id = ?")
            .bind(viewer_count)
            .bind(session_id)
            .execute(tx)
            .await?;

        Ok(result.rows_affected())
    }

    /// Close a session. Already-closed sessions are left untouched.
    pub async fn end_session(
        tx: &mut SqliteConnection,
        session_id: i64,
        ended_at_ms: i64,
    ) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE stream_sessions SET ended_at = ? WHERE id = ? AND ended_at IS NULL",
        )
        .bind(ended_at_ms)
        .bind(session_id)
        .execute(tx)
        .await?;

        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::begin_immediate;
    use crate::database::test_support::{insert_broadcaster, setup_test_db};

    #[tokio::test]
    async fn test_create_update_and_end_session() {
        let pool = setup_test_db().await;
        let broadcaster_id = insert_broadcaster(&pool, "alice", Some("1001")).await;

        let mut tx = begin_immediate(&pool).await.unwrap();
        let session_id = SessionTxOps::create_session(&mut tx, broadcaster_id, 1_000, 10)
            .await
            .unwrap();
        tx.commit().await.unwrap();

        let mut tx = begin_immediate(&pool).await.unwrap();
        let open = SessionTxOps::get_open_session(&mut tx, broadcaster_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(open.id, session_id);
        assert_eq!(open.viewer_count, 10);

        assert_eq!(
            SessionTxOps::update_viewer_count(&mut tx, session_id, 25)
                .await
                .unwrap(),
            1
        );
        assert_eq!(
            SessionTxOps::end_session(&mut tx, session_id, 2_000)
                .await
                .unwrap(),
            1
        );
        tx.commit().await.unwrap();

        let session: StreamSessionDbModel =
            sqlx::query_as("SELECT * FROM stream_sessions WHERE id = ?")
                .bind(session_id)
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(session.viewer_count, 25);
        assert_eq!(session.ended_at, Some(2_000));
        assert!(!session.is_open());
    }

    #[tokio::test]
    async fn test_end_session_is_not_repeated() {
        let pool = setup_test_db().await;
        let broadcaster_id = insert_broadcaster(&pool, "alice", Some("1001")).await;

        let mut tx = begin_immediate(&pool).await.unwrap();
        let session_id = SessionTxOps::create_session(&mut tx, broadcaster_id, 1_000, 3)
            .await
            .unwrap();
        SessionTxOps::end_session(&mut tx, session_id, 2_000)
            .await
            .unwrap();
        let affected = SessionTxOps::end_session(&mut tx, session_id, 3_000)
            .await
            .unwrap();
        tx.commit().await.unwrap();

        assert_eq!(affected, 0);
    }
}
