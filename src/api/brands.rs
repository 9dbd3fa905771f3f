use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::get,
    Router,
};
use serde_json::json;
use uuid::Uuid;

use super::{AppState, Json};
use crate::auth::AdminUser;
use crate::domain::aggregates::Brand;
use crate::error::{Error, Result};
use crate::validation::BrandRequest;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/brands", get(list_brands).post(create_brand))
        .route("/brands/:id", get(show_brand).put(update_brand).delete(delete_brand))
}

async fn list_brands(State(state): State<AppState>) -> Result<Json<Vec<Brand>>> {
    Ok(Json(state.store.list_brands(false).await?))
}

async fn show_brand(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<Json<Brand>> {
    let brand = state.store.find_brand(id).await?.ok_or_else(|| Error::not_found("Brand"))?;
    Ok(Json(brand))
}

async fn create_brand(
    State(state): State<AppState>,
    AdminUser(actor): AdminUser,
    Json(request): Json<BrandRequest>,
) -> Result<(StatusCode, Json<Brand>)> {
    let brand = request.validate(state.store(), None).await?.into_brand();
    state.store.create_brand(&brand).await?;
    state
        .audit(&actor, "created", "brand", Some(brand.id), json!({ "name": brand.name, "slug": brand.slug }))
        .await?;
    Ok((StatusCode::CREATED, Json(brand)))
}

async fn update_brand(
    State(state): State<AppState>,
    AdminUser(actor): AdminUser,
    Path(id): Path<Uuid>,
    Json(request): Json<BrandRequest>,
) -> Result<Json<Brand>> {
    let mut brand = state.store.find_brand(id).await?.ok_or_else(|| Error::not_found("Brand"))?;
    request.validate(state.store(), Some(id)).await?.apply(&mut brand);
    state.store.update_brand(&brand).await?;
    state
        .audit(&actor, "updated", "brand", Some(id), json!({ "name": brand.name, "is_active": brand.is_active }))
        .await?;
    Ok(Json(brand))
}

/// Products of the brand are kept with no brand.
async fn delete_brand(
    State(state): State<AppState>,
    AdminUser(actor): AdminUser,
    Path(id): Path<Uuid>,
) -> Result<StatusCode> {
    if !state.store.delete_brand(id).await? {
        return Err(Error::not_found("Brand"));
    }
    state.audit(&actor, "deleted", "brand", Some(id), json!({})).await?;
    Ok(StatusCode::NO_CONTENT)
}
