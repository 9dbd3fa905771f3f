use axum::{
    extract::{Path, Query, State},
    routing::get,
    Router,
};
use serde::Deserialize;
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use super::{AppState, Json};
use crate::auth::AdminUser;
use crate::domain::aggregates::{Role, User};
use crate::error::{Error, Result};
use crate::store::{Page, PageRequest, UserFilter};
use crate::validation::UserUpdateRequest;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/users", get(list_users))
        .route("/users/:id", get(show_user).put(update_user))
}

#[derive(Debug, Default, Deserialize)]
pub struct UserQuery {
    pub role: Option<Role>,
    pub search: Option<String>,
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

async fn list_users(State(state): State<AppState>, Query(query): Query<UserQuery>) -> Result<Json<Page<User>>> {
    let filter = UserFilter {
        role: query.role,
        search: query.search.filter(|s| !s.trim().is_empty()),
    };
    let page = PageRequest::new(query.page, query.per_page);
    Ok(Json(state.store.list_users(&filter, page).await?))
}

async fn show_user(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<Json<User>> {
    let user = state.store.find_user(id).await?.ok_or_else(|| Error::not_found("User"))?;
    Ok(Json(user))
}

/// Role and active flag changes; deactivated users lose access on their next request.
async fn update_user(
    State(state): State<AppState>,
    AdminUser(actor): AdminUser,
    Path(id): Path<Uuid>,
    Json(request): Json<UserUpdateRequest>,
) -> Result<Json<User>> {
    let mut user = state.store.find_user(id).await?.ok_or_else(|| Error::not_found("User"))?;
    let before = (user.role, user.is_active);
    request.validate(&mut user, &actor)?;
    state.store.update_user(&user).await?;

    info!(user_id = %id, role = %user.role, is_active = user.is_active, "user updated");
    state
        .audit(
            &actor,
            "updated",
            "user",
            Some(id),
            json!({
                "role": { "from": before.0, "to": user.role },
                "is_active": { "from": before.1, "to": user.is_active },
            }),
        )
        .await?;
    Ok(Json(user))
}
