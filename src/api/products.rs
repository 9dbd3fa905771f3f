use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::get,
    Router,
};
use serde::Serialize;
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use super::catalog::ProductQuery;
use super::{AppState, Json};
use crate::auth::AdminUser;
use crate::domain::aggregates::{InventoryRecord, Product};
use crate::domain::events::{DomainEvent, ProductEvent};
use crate::error::{Error, Result};
use crate::store::{InventoryFilter, Page, PageRequest, MAX_PER_PAGE};
use crate::validation::ProductRequest;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/products", get(list_products).post(create_product))
        .route("/products/:id", get(show_product).put(update_product).delete(delete_product))
}

/// A product with its stock at every location.
#[derive(Debug, Serialize)]
pub struct ProductDetail {
    #[serde(flatten)]
    pub product: Product,
    pub inventory: Vec<InventoryRecord>,
}

async fn list_products(State(state): State<AppState>, Query(query): Query<ProductQuery>) -> Result<Json<Page<Product>>> {
    let categories = state.store.list_categories().await?;
    let filter = query.filter(&categories);
    Ok(Json(state.store.list_products(&filter, query.page()).await?))
}

async fn show_product(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<Json<ProductDetail>> {
    let product = state.store.find_product(id).await?.ok_or_else(|| Error::not_found("Product"))?;
    let filter = InventoryFilter {
        product_id: Some(id),
        ..Default::default()
    };
    let inventory = state.store.list_inventory(&filter, PageRequest::first(MAX_PER_PAGE)).await?.data;
    Ok(Json(ProductDetail { product, inventory }))
}

async fn create_product(
    State(state): State<AppState>,
    AdminUser(actor): AdminUser,
    Json(request): Json<ProductRequest>,
) -> Result<(StatusCode, Json<Product>)> {
    let product = request.validate(state.store(), None).await?.into_product();
    state.store.create_product(&product).await?;

    info!(product_id = %product.id, sku = %product.sku, "product created");
    state
        .audit(
            &actor,
            "created",
            "product",
            Some(product.id),
            json!({ "sku": product.sku, "name": product.name, "price": product.price }),
        )
        .await?;
    state
        .publish([DomainEvent::from(ProductEvent::Created {
            product_id: product.id,
            sku: product.sku.clone(),
        })])
        .await;
    Ok((StatusCode::CREATED, Json(product)))
}

async fn update_product(
    State(state): State<AppState>,
    AdminUser(actor): AdminUser,
    Path(id): Path<Uuid>,
    Json(request): Json<ProductRequest>,
) -> Result<Json<Product>> {
    let mut product = state.store.find_product(id).await?.ok_or_else(|| Error::not_found("Product"))?;
    let before = (product.price, product.status);
    request.validate(state.store(), Some(&product)).await?.apply(&mut product);
    state.store.update_product(&product).await?;

    state
        .audit(
            &actor,
            "updated",
            "product",
            Some(id),
            json!({
                "price": { "from": before.0, "to": product.price },
                "status": { "from": before.1, "to": product.status },
            }),
        )
        .await?;
    state.publish([DomainEvent::from(ProductEvent::Updated { product_id: id })]).await;
    Ok(Json(product))
}

/// Refused with 409 once the product appears on an order.
async fn delete_product(
    State(state): State<AppState>,
    AdminUser(actor): AdminUser,
    Path(id): Path<Uuid>,
) -> Result<StatusCode> {
    if !state.store.delete_product(id).await? {
        return Err(Error::not_found("Product"));
    }
    state.audit(&actor, "deleted", "product", Some(id), json!({})).await?;
    state.publish([DomainEvent::from(ProductEvent::Deleted { product_id: id })]).await;
    Ok(StatusCode::NO_CONTENT)
}
