//! Session reconciliation.
//!
//! Maps one observation "broadcaster X has N viewers" onto `stream_sessions`:
//!
//! | open session | viewers > 0        | viewers == 0       |
//! |--------------|--------------------|--------------------|
//! | yes          | update viewer count | close (ended_at)  |
//! | no           | create session     | nothing            |
//!
//! Each call runs in its own `BEGIN IMMEDIATE` transaction, so the lookup and
//! the write see the same state.

use async_trait::async_trait;
use sqlx::SqliteConnection;
use tracing::{debug, info, warn};

use crate::Result;
use crate::database::repositories::SessionTxOps;
use crate::database::retry::retry_on_sqlite_busy;
use crate::database::{DbPool, begin_immediate, time};

/// What a reconciliation did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// A new session was opened.
    Started { session_id: i64 },
    /// The open session's viewer count was overwritten.
    Updated { session_id: i64, previous_viewers: i64 },
    /// The open session was closed.
    Ended { session_id: i64 },
    /// Offline with no open session; nothing was written.
    Unchanged,
}

/// Applies live-status observations to stored sessions.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SessionReconciler: Send + Sync {
    async fn reconcile(&self, broadcaster_id: i64, viewer_count: i64) -> Result<ReconcileOutcome>;
}

/// SQLx implementation of SessionReconciler.
pub struct SqlxSessionReconciler {
    pool: DbPool,
}

impl SqlxSessionReconciler {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Reconcile using `now_ms` as the start or end timestamp.
    pub async fn reconcile_at(
        &self,
        broadcaster_id: i64,
        viewer_count: i64,
        now_ms: i64,
    ) -> Result<ReconcileOutcome> {
        retry_on_sqlite_busy("reconcile_session", || {
            self.reconcile_once(broadcaster_id, viewer_count, now_ms)
        })
        .await
    }

    async fn reconcile_once(
        &self,
        broadcaster_id: i64,
        viewer_count: i64,
        now_ms: i64,
    ) -> Result<ReconcileOutcome> {
        let mut tx = begin_immediate(&self.pool).await?;

        match Self::apply(&mut *tx, broadcaster_id, viewer_count, now_ms).await {
            Ok(outcome) => {
                tx.commit().await?;
                Ok(outcome)
            }
            Err(e) => {
                if let Err(rollback_err) = tx.rollback().await {
                    warn!(
                        broadcaster_id,
                        error = %rollback_err,
                        "Failed to roll back reconciliation"
                    );
                }
                Err(e)
            }
        }
    }

    async fn apply(
        tx: &mut SqliteConnection,
        broadcaster_id: i64,
        viewer_count: i64,
        now_ms: i64,
    ) -> Result<ReconcileOutcome> {
        let open = SessionTxOps::get_open_session(tx, broadcaster_id).await?;
        let is_live = viewer_count > 0;

        let outcome = match (open, is_live) {
            (Some(session), true) => {
                SessionTxOps::update_viewer_count(tx, session.id, viewer_count).await?;
                debug!(
                    session_id = session.id,
                    broadcaster_id,
                    "Viewer count {} -> {}",
                    session.viewer_count,
                    viewer_count
                );
                ReconcileOutcome::Updated {
                    session_id: session.id,
                    previous_viewers: session.viewer_count,
                }
            }
            (None, true) => {
                let session_id =
                    SessionTxOps::create_session(tx, broadcaster_id, now_ms, viewer_count).await?;
                info!(session_id, broadcaster_id, viewer_count, "Stream session started");
                ReconcileOutcome::Started { session_id }
            }
            (Some(session), false) => {
                SessionTxOps::end_session(tx, session.id, now_ms).await?;
                info!(
                    session_id = session.id,
                    broadcaster_id,
                    last_viewer_count = session.viewer_count,
                    "Stream session ended"
                );
                ReconcileOutcome::Ended {
                    session_id: session.id,
                }
            }
            (None, false) => ReconcileOutcome::Unchanged,
        };

        Ok(outcome)
    }
}

#[async_trait]
impl SessionReconciler for SqlxSessionReconciler {
    async fn reconcile(&self, broadcaster_id: i64, viewer_count: i64) -> Result<ReconcileOutcome> {
        self.reconcile_at(broadcaster_id, viewer_count, time::now_ms())
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::models::StreamSessionDbModel;
    use crate::database::repositories::{SessionRepository, SqlxSessionRepository};
    use crate::database::test_support::{insert_broadcaster, setup_test_db};

    async fn all_sessions(pool: &DbPool, broadcaster_id: i64) -> Vec<StreamSessionDbModel> {
        sqlx::query_as("SELECT * FROM stream_sessions WHERE broadcaster_id = ? ORDER BY id")
            .bind(broadcaster_id)
            .fetch_all(pool)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_offline_without_session_writes_nothing() {
        let pool = setup_test_db().await;
        let id = insert_broadcaster(&pool, "alice", Some("1001")).await;
        let reconciler = SqlxSessionReconciler::new(pool.clone());

        let outcome = reconciler.reconcile(id, 0).await.unwrap();

        assert_eq!(outcome, ReconcileOutcome::Unchanged);
        assert!(all_sessions(&pool, id).await.is_empty());
    }

    #[tokio::test]
    async fn test_live_twice_keeps_single_row_with_latest_count() {
        let pool = setup_test_db().await;
        let id = insert_broadcaster(&pool, "alice", Some("1001")).await;
        let reconciler = SqlxSessionReconciler::new(pool.clone());

        let first = reconciler.reconcile_at(id, 10, 1_000).await.unwrap();
        let second = reconciler.reconcile_at(id, 15, 61_000).await.unwrap();

        let ReconcileOutcome::Started { session_id } = first else {
            panic!("expected a new session, got {:?}", first);
        };
        assert_eq!(
            second,
            ReconcileOutcome::Updated {
                session_id,
                previous_viewers: 10
            }
        );

        let sessions = all_sessions(&pool, id).await;
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].viewer_count, 15);
        assert_eq!(sessions[0].started_at, 1_000);
        assert!(sessions[0].is_open());
    }

    #[tokio::test]
    async fn test_close_then_reopen_creates_new_session() {
        let pool = setup_test_db().await;
        let id = insert_broadcaster(&pool, "alice", Some("1001")).await;
        let reconciler = SqlxSessionReconciler::new(pool.clone());

        reconciler.reconcile_at(id, 42, 1_000).await.unwrap();
        let ended = reconciler.reconcile_at(id, 0, 61_000).await.unwrap();
        assert!(matches!(ended, ReconcileOutcome::Ended { .. }));

        let sessions = all_sessions(&pool, id).await;
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].ended_at, Some(61_000));
        assert_eq!(sessions[0].viewer_count, 42);

        // Offline again: still nothing to do.
        let idle = reconciler.reconcile_at(id, 0, 121_000).await.unwrap();
        assert_eq!(idle, ReconcileOutcome::Unchanged);

        let restarted = reconciler.reconcile_at(id, 7, 181_000).await.unwrap();
        assert!(matches!(restarted, ReconcileOutcome::Started { .. }));

        let sessions = all_sessions(&pool, id).await;
        assert_eq!(sessions.len(), 2);
        assert_ne!(sessions[0].id, sessions[1].id);
        assert_eq!(sessions[0].ended_at, Some(61_000));
        assert_eq!(sessions[1].started_at, 181_000);
        assert_eq!(sessions[1].viewer_count, 7);
        assert!(sessions[1].is_open());
    }

    #[tokio::test]
    async fn test_negative_count_is_offline() {
        let pool = setup_test_db().await;
        let id = insert_broadcaster(&pool, "alice", Some("1001")).await;
        let reconciler = SqlxSessionReconciler::new(pool.clone());

        reconciler.reconcile_at(id, 3, 1_000).await.unwrap();
        let outcome = reconciler.reconcile_at(id, -1, 2_000).await.unwrap();

        assert!(matches!(outcome, ReconcileOutcome::Ended { .. }));
    }

    #[tokio::test]
    async fn test_never_more_than_one_open_session() {
        let pool = setup_test_db().await;
        let alice = insert_broadcaster(&pool, "alice", Some("1001")).await;
        let bob = insert_broadcaster(&pool, "bob", Some("1002")).await;
        let reconciler = SqlxSessionReconciler::new(pool.clone());
        let sessions = SqlxSessionRepository::new(pool.clone());

        let observations = [5, 8, 0, 0, 3, 9, 0, 12, 12, 0];
        for (step, viewers) in observations.iter().enumerate() {
            let now = 1_000 + step as i64 * 60_000;
            reconciler.reconcile_at(alice, *viewers, now).await.unwrap();
            reconciler.reconcile_at(bob, 20 - *viewers, now).await.unwrap();

            for id in [alice, bob] {
                let (open,): (i64,) = sqlx::query_as(
                    "SELECT COUNT(*) FROM stream_sessions WHERE broadcaster_id = ? AND ended_at IS NULL",
                )
                .bind(id)
                .fetch_one(&pool)
                .await
                .unwrap();
                assert!(open <= 1, "broadcaster {} has {} open sessions", id, open);
            }
        }

        // alice went live three times, bob stayed live throughout.
        assert_eq!(all_sessions(&pool, alice).await.len(), 3);
        assert_eq!(all_sessions(&pool, bob).await.len(), 1);
        assert!(sessions.get_open_session(alice).await.unwrap().is_none());
        assert_eq!(
            sessions.get_open_session(bob).await.unwrap().unwrap().viewer_count,
            20
        );
        assert_eq!(sessions.count_open_sessions().await.unwrap(), 1);
    }
}
