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
use crate::domain::aggregates::category::build_tree;
use crate::domain::aggregates::{Category, CategoryNode};
use crate::error::{Error, Result};
use crate::validation::CategoryRequest;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/categories", get(list_categories).post(create_category))
        .route("/categories/tree", get(category_tree))
        .route(
            "/categories/:id",
            get(show_category).put(update_category).delete(delete_category),
        )
}

async fn list_categories(State(state): State<AppState>) -> Result<Json<Vec<Category>>> {
    let mut categories = state.store.list_categories().await?;
    categories.sort_by(|a, b| a.sort_order.cmp(&b.sort_order).then_with(|| a.name.cmp(&b.name)));
    Ok(Json(categories))
}

/// Includes inactive categories.
async fn category_tree(State(state): State<AppState>) -> Result<Json<Vec<CategoryNode>>> {
    let categories = state.store.list_categories().await?;
    Ok(Json(build_tree(&categories)))
}

async fn show_category(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<Json<Category>> {
    let category = state
        .store
        .find_category(id)
        .await?
        .ok_or_else(|| Error::not_found("Category"))?;
    Ok(Json(category))
}

async fn create_category(
    State(state): State<AppState>,
    AdminUser(actor): AdminUser,
    Json(request): Json<CategoryRequest>,
) -> Result<(StatusCode, Json<Category>)> {
    let category = request.validate(state.store(), None).await?.into_category();
    state.store.create_category(&category).await?;
    state
        .audit(
            &actor,
            "created",
            "category",
            Some(category.id),
            json!({ "name": category.name, "parent_id": category.parent_id }),
        )
        .await?;
    Ok((StatusCode::CREATED, Json(category)))
}

async fn update_category(
    State(state): State<AppState>,
    AdminUser(actor): AdminUser,
    Path(id): Path<Uuid>,
    Json(request): Json<CategoryRequest>,
) -> Result<Json<Category>> {
    let mut category = state
        .store
        .find_category(id)
        .await?
        .ok_or_else(|| Error::not_found("Category"))?;
    request.validate(state.store(), Some(id)).await?.apply(&mut category);
    state.store.update_category(&category).await?;
    state
        .audit(
            &actor,
            "updated",
            "category",
            Some(id),
            json!({ "name": category.name, "parent_id": category.parent_id, "is_active": category.is_active }),
        )
        .await?;
    Ok(Json(category))
}

/// Child categories move to the top level and products lose the category.
async fn delete_category(
    State(state): State<AppState>,
    AdminUser(actor): AdminUser,
    Path(id): Path<Uuid>,
) -> Result<StatusCode> {
    if !state.store.delete_category(id).await? {
        return Err(Error::not_found("Category"));
    }
    state.audit(&actor, "deleted", "category", Some(id), json!({})).await?;
    Ok(StatusCode::NO_CONTENT)
}
