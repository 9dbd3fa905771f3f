use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post, put},
    Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{AppState, Json};
use crate::auth::CurrentUser;
use crate::domain::aggregates::category::ancestry;
use crate::domain::aggregates::Cart;
use crate::domain::pricing::{quote, LineInput, Quote};
use crate::error::{Error, Result};
use crate::validation::{CartItemRequest, CartQuantityRequest};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/carts", post(create_cart))
        .route("/carts/:id", get(show_cart).delete(delete_cart))
        .route("/carts/:id/items", post(add_item).delete(clear_cart))
        .route("/carts/:id/items/:product_id", put(update_item).delete(remove_item))
}

/// A cart priced at current catalog prices with running promotions.
#[derive(Debug, Serialize)]
pub struct CartView {
    #[serde(flatten)]
    pub cart: Cart,
    pub pricing: Quote,
    /// Lines whose product or variant can no longer be bought.
    pub unavailable: Vec<Uuid>,
}

#[derive(Debug, Default, Deserialize)]
pub struct VariantQuery {
    pub variant_id: Option<Uuid>,
}

fn caller(user: &Option<CurrentUser>) -> Option<Uuid> {
    user.as_ref().map(|CurrentUser(u)| u.id)
}

async fn load(state: &AppState, id: Uuid, user: &Option<CurrentUser>) -> Result<Cart> {
    state
        .store
        .find_cart(id)
        .await?
        .filter(|cart| cart.accessible_by(caller(user)))
        .ok_or_else(|| Error::not_found("Cart"))
}

async fn view(state: &AppState, cart: Cart) -> Result<CartView> {
    let ids: Vec<Uuid> = cart.items.iter().map(|i| i.product_id).collect();
    let products = state.store.find_products(&ids).await?;
    let categories = state.store.list_categories().await?;

    let mut lines = Vec::with_capacity(cart.items.len());
    let mut unavailable = Vec::new();
    for item in &cart.items {
        let line = products
            .iter()
            .find(|p| p.id == item.product_id && p.is_purchasable(&categories))
            .and_then(|product| {
                let path = product.category_id.map(|id| ancestry(&categories, id)).unwrap_or_default();
                LineInput::for_product(product, item.variant_id, item.quantity, path).ok()
            });
        match line {
            Some(line) => lines.push(line),
            None => unavailable.push(item.product_id),
        }
    }

    let promotions = state.store.list_promotions().await?;
    // no coupon is claimed, so pricing cannot be rejected
    let pricing = quote(&lines, &promotions, None, &state.config.pricing, Utc::now())?;
    Ok(CartView {
        cart,
        pricing,
        unavailable,
    })
}

async fn create_cart(State(state): State<AppState>, user: Option<CurrentUser>) -> Result<(StatusCode, Json<CartView>)> {
    let cart = Cart::new(caller(&user));
    state.store.save_cart(&cart).await?;
    Ok((StatusCode::CREATED, Json(view(&state, cart).await?)))
}

async fn show_cart(
    State(state): State<AppState>,
    user: Option<CurrentUser>,
    Path(id): Path<Uuid>,
) -> Result<Json<CartView>> {
    let cart = load(&state, id, &user).await?;
    Ok(Json(view(&state, cart).await?))
}

async fn add_item(
    State(state): State<AppState>,
    user: Option<CurrentUser>,
    Path(id): Path<Uuid>,
    Json(request): Json<CartItemRequest>,
) -> Result<Json<CartView>> {
    let mut cart = load(&state, id, &user).await?;
    let item = request.validate(state.store(), &cart).await?;
    cart.add_item(item);
    state.store.save_cart(&cart).await?;
    Ok(Json(view(&state, cart).await?))
}

async fn update_item(
    State(state): State<AppState>,
    user: Option<CurrentUser>,
    Path((id, product_id)): Path<(Uuid, Uuid)>,
    Json(request): Json<CartQuantityRequest>,
) -> Result<Json<CartView>> {
    let mut cart = load(&state, id, &user).await?;
    let item = request.validate(state.store(), product_id).await?;
    cart.set_quantity(item.product_id, item.variant_id, item.quantity, item.unit_price)?;
    state.store.save_cart(&cart).await?;
    Ok(Json(view(&state, cart).await?))
}

async fn remove_item(
    State(state): State<AppState>,
    user: Option<CurrentUser>,
    Path((id, product_id)): Path<(Uuid, Uuid)>,
    Query(query): Query<VariantQuery>,
) -> Result<Json<CartView>> {
    let mut cart = load(&state, id, &user).await?;
    cart.remove_item(product_id, query.variant_id)?;
    state.store.save_cart(&cart).await?;
    Ok(Json(view(&state, cart).await?))
}

async fn clear_cart(
    State(state): State<AppState>,
    user: Option<CurrentUser>,
    Path(id): Path<Uuid>,
) -> Result<Json<CartView>> {
    let mut cart = load(&state, id, &user).await?;
    cart.clear();
    state.store.save_cart(&cart).await?;
    Ok(Json(view(&state, cart).await?))
}

async fn delete_cart(State(state): State<AppState>, user: Option<CurrentUser>, Path(id): Path<Uuid>) -> Result<StatusCode> {
    load(&state, id, &user).await?;
    state.store.delete_cart(id).await?;
    Ok(StatusCode::NO_CONTENT)
}
