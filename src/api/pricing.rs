use axum::{extract::State, routing::post, Router};
use serde::Serialize;
use serde_json::json;
use tracing::info;

use super::{AppState, Json};
use crate::auth::AdminUser;
use crate::domain::aggregates::Product;
use crate::domain::events::{DomainEvent, ProductEvent};
use crate::domain::pricing::PriceOperation;
use crate::error::Result;
use crate::validation::PricingBulkUpdateRequest;

pub fn routes() -> Router<AppState> {
    Router::new().route("/pricing/bulk-update", post(bulk_update))
}

#[derive(Debug, Serialize)]
pub struct BulkUpdateResponse {
    pub operation: PriceOperation,
    pub updated: usize,
    pub products: Vec<Product>,
}

/// All-or-nothing: one price falling below 0.01 rejects the whole batch.
async fn bulk_update(
    State(state): State<AppState>,
    AdminUser(actor): AdminUser,
    Json(request): Json<PricingBulkUpdateRequest>,
) -> Result<Json<BulkUpdateResponse>> {
    let change = request.validate(state.store()).await?;
    state.store.update_prices(&change.products).await?;

    let product_ids: Vec<_> = change.products.iter().map(|p| p.id).collect();
    info!(operation = %change.operation, count = product_ids.len(), "bulk price update");
    state
        .audit(
            &actor,
            "prices.bulk_update",
            "product",
            None,
            json!({
                "operation": change.operation,
                "value": request.value,
                "product_ids": product_ids,
            }),
        )
        .await?;
    state
        .publish([DomainEvent::from(ProductEvent::PricesChanged { product_ids })])
        .await;

    Ok(Json(BulkUpdateResponse {
        operation: change.operation,
        updated: change.products.len(),
        products: change.products,
    }))
}
