use axum::{
    extract::{Query, State},
    routing::get,
    Router,
};
use serde::Deserialize;
use uuid::Uuid;

use super::{AppState, Json};
use crate::domain::aggregates::AuditEntry;
use crate::error::Result;
use crate::store::{AuditFilter, Page, PageRequest};

pub fn routes() -> Router<AppState> {
    Router::new().route("/audit-logs", get(list_audit))
}

#[derive(Debug, Default, Deserialize)]
pub struct AuditQuery {
    pub entity_type: Option<String>,
    pub entity_id: Option<Uuid>,
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

/// Newest first.
async fn list_audit(State(state): State<AppState>, Query(query): Query<AuditQuery>) -> Result<Json<Page<AuditEntry>>> {
    let filter = AuditFilter {
        entity_type: query.entity_type.filter(|t| !t.is_empty()),
        entity_id: query.entity_id,
    };
    let page = PageRequest::new(query.page, query.per_page);
    Ok(Json(state.store.list_audit(&filter, page).await?))
}
