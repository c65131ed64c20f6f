//! Broadcaster roster model.

use sqlx::FromRow;

/// A pollable broadcaster: the internal id paired with its platform user id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, FromRow)]
pub struct RosterEntry {
    pub id: i64,
    pub external_id: String,
}

impl RosterEntry {
    pub fn new(id: i64, external_id: impl Into<String>) -> Self {
        Self {
            id,
            external_id: external_id.into(),
        }
    }
}
