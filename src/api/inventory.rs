use axum::{
    extract::{Query, State},
    routing::{get, post, put},
    Router,
};
use serde::Deserialize;
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use super::{AppState, Json};
use crate::auth::StaffUser;
use crate::domain::aggregates::{InventoryMovement, InventoryRecord, MovementKind};
use crate::error::Result;
use crate::store::{InventoryFilter, MovementFilter, Page, PageRequest, StockOutcome};
use crate::validation::{InventoryUpdateRequest, ReorderLevelRequest};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/inventory", get(list_inventory))
        .route("/inventory/operations", post(apply_operation))
        .route("/inventory/reorder-level", put(set_reorder_level))
        .route("/inventory/movements", get(list_movements))
}

#[derive(Debug, Default, Deserialize)]
pub struct InventoryQuery {
    pub product_id: Option<Uuid>,
    pub location: Option<String>,
    #[serde(default)]
    pub low_stock: bool,
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
pub struct MovementQuery {
    pub product_id: Option<Uuid>,
    pub location: Option<String>,
    pub kind: Option<MovementKind>,
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

async fn list_inventory(
    State(state): State<AppState>,
    Query(query): Query<InventoryQuery>,
) -> Result<Json<Page<InventoryRecord>>> {
    let filter = InventoryFilter {
        product_id: query.product_id,
        location: query.location,
        low_stock_only: query.low_stock,
    };
    let page = PageRequest::new(query.page, query.per_page);
    Ok(Json(state.store.list_inventory(&filter, page).await?))
}

async fn apply_operation(
    State(state): State<AppState>,
    StaffUser(actor): StaffUser,
    Json(request): Json<InventoryUpdateRequest>,
) -> Result<Json<StockOutcome>> {
    let stock = request.validate(state.store(), Some(actor.id)).await?;
    let key = stock.key.clone();
    let kind = stock.operation.source_change().kind();
    let outcome = state.store.apply_stock(stock).await?;

    info!(product_id = %key.product_id, location = %key.location, %kind, "stock operation applied");
    state
        .audit(
            &actor,
            &format!("stock.{kind}"),
            "inventory",
            Some(key.product_id),
            json!({
                "variant_id": key.variant_id,
                "location": key.location,
                "quantity": request.quantity,
                "to_location": request.to_location,
            }),
        )
        .await?;
    state.publish(outcome.events()).await;
    Ok(Json(outcome))
}

async fn set_reorder_level(
    State(state): State<AppState>,
    StaffUser(actor): StaffUser,
    Json(request): Json<ReorderLevelRequest>,
) -> Result<Json<InventoryRecord>> {
    let (key, level) = request.validate(state.store()).await?;
    let record = state.store.set_reorder_level(&key, level).await?;
    state
        .audit(
            &actor,
            "stock.reorder_level",
            "inventory",
            Some(key.product_id),
            json!({ "variant_id": key.variant_id, "location": key.location, "reorder_level": level }),
        )
        .await?;
    Ok(Json(record))
}

async fn list_movements(
    State(state): State<AppState>,
    Query(query): Query<MovementQuery>,
) -> Result<Json<Page<InventoryMovement>>> {
    let filter = MovementFilter {
        product_id: query.product_id,
        location: query.location,
        kind: query.kind,
    };
    let page = PageRequest::new(query.page, query.per_page);
    Ok(Json(state.store.list_movements(&filter, page).await?))
}
