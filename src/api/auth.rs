use axum::{extract::State, http::StatusCode, routing::{get, post}, Router};
use serde::Serialize;
use tracing::info;

use super::{AppState, Json};
use crate::auth::{password, token, CurrentUser};
use crate::domain::aggregates::user::normalize_email;
use crate::domain::aggregates::{Role, User};
use crate::error::{Error, Result};
use crate::validation::{LoginRequest, RegisterRequest};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
        .route("/auth/me", get(me))
}

#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub user: User,
    #[serde(flatten)]
    pub token: token::AccessToken,
}

async fn register(
    State(state): State<AppState>,
    Json(request): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<AuthResponse>)> {
    let email = request.validate(state.store()).await?;
    let hash = password::hash_password(&request.password)?;
    let user = User::new(request.name.trim(), &email, hash, Role::Customer);
    state.store.create_user(&user).await?;
    info!(user_id = %user.id, "customer registered");

    let token = token::issue(&user, &state.config)?;
    Ok((StatusCode::CREATED, Json(AuthResponse { user, token })))
}

async fn login(State(state): State<AppState>, Json(request): Json<LoginRequest>) -> Result<Json<AuthResponse>> {
    validator::Validate::validate(&request)?;
    let failed = || Error::validation("email", "These credentials do not match our records.");

    let user = state
        .store
        .find_user_by_email(&normalize_email(&request.email))
        .await?
        .ok_or_else(failed)?;
    if !password::verify_password(&request.password, &user.password_hash)? {
        return Err(failed());
    }
    if !user.is_active {
        return Err(Error::validation("email", "This account has been deactivated."));
    }

    let token = token::issue(&user, &state.config)?;
    Ok(Json(AuthResponse { user, token }))
}

async fn me(CurrentUser(user): CurrentUser) -> Json<User> {
    Json(user)
}
