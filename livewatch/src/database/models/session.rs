//! Stream session database model.

use sqlx::FromRow;

/// Stream session database model.
/// One continuous live period of a broadcaster.
#[derive(Debug, Clone, FromRow)]
pub struct StreamSessionDbModel {
    pub id: i64,
    pub broadcaster_id: i64,
    /// Unix epoch milliseconds (UTC).
    pub started_at: i64,
    /// Unix epoch milliseconds (UTC). `None` while the session is open.
    pub ended_at: Option<i64>,
    /// Last observed viewer count.
    pub viewer_count: i64,
}

impl StreamSessionDbModel {
    pub fn is_open(&self) -> bool {
        self.ended_at.is_none()
    }
}
