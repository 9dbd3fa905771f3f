//! Audit trail of staff and admin mutations

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct AuditEntry {
    pub id: Uuid,
    pub actor_id: Option<Uuid>,
    /// Verb such as `created`, `updated`, `stock.receive`.
    pub action: String,
    pub entity_type: String,
    pub entity_id: Option<Uuid>,
    pub changes: Value,
    pub created_at: DateTime<Utc>,
}

impl AuditEntry {
    pub fn new(
        actor_id: Option<Uuid>,
        action: impl Into<String>,
        entity_type: impl Into<String>,
        entity_id: Option<Uuid>,
        changes: Value,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            actor_id,
            action: action.into(),
            entity_type: entity_type.into(),
            entity_id,
            changes,
            created_at: Utc::now(),
        }
    }
}
