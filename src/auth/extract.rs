//! Request extractors resolving the caller from a bearer token.
//!
//! `CurrentUser` accepts any active account, `StaffUser` staff or admin, and
//! `AdminUser` admins only. Wrap in `Option` for routes that also serve guests.

use axum::extract::FromRequestParts;
use axum::http::{header, request::Parts};
use tracing::{debug, instrument, trace};

use super::token;
use crate::api::AppState;
use crate::domain::aggregates::{Role, User};
use crate::error::{Error, Result};

#[derive(Debug, Clone)]
pub struct CurrentUser(pub User);

#[derive(Debug, Clone)]
pub struct StaffUser(pub User);

#[derive(Debug, Clone)]
pub struct AdminUser(pub User);

fn bearer_token(parts: &Parts) -> Option<&str> {
    let value = parts.headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    scheme.eq_ignore_ascii_case("bearer").then(|| token.trim())
}

#[axum::async_trait]
impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = Error;

    #[instrument(skip(parts, state))]
    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self> {
        let Some(raw) = bearer_token(parts) else {
            trace!("no bearer token");
            return Err(Error::Unauthenticated);
        };
        let claims = token::verify(raw, &state.config)?;
        match state.store.find_user(claims.sub).await? {
            Some(user) if user.is_active => Ok(CurrentUser(user)),
            Some(user) => {
                debug!(user_id = %user.id, "token for inactive user");
                Err(Error::Unauthenticated)
            }
            None => Err(Error::Unauthenticated),
        }
    }
}

#[axum::async_trait]
impl FromRequestParts<AppState> for StaffUser {
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self> {
        let CurrentUser(user) = CurrentUser::from_request_parts(parts, state).await?;
        if !user.role.is_staff() {
            return Err(Error::Forbidden);
        }
        Ok(StaffUser(user))
    }
}

#[axum::async_trait]
impl FromRequestParts<AppState> for AdminUser {
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self> {
        let CurrentUser(user) = CurrentUser::from_request_parts(parts, state).await?;
        if user.role != Role::Admin {
            return Err(Error::Forbidden);
        }
        Ok(AdminUser(user))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    fn parts(authorization: Option<&str>) -> Parts {
        let mut builder = Request::builder().uri("/");
        if let Some(value) = authorization {
            builder = builder.header(header::AUTHORIZATION, value);
        }
        builder.body(()).unwrap().into_parts().0
    }

    #[test]
    fn reads_bearer_scheme_only() {
        assert_eq!(bearer_token(&parts(Some("Bearer abc.def"))), Some("abc.def"));
        assert_eq!(bearer_token(&parts(Some("bearer  abc"))), Some("abc"));
        assert_eq!(bearer_token(&parts(Some("Basic abc"))), None);
        assert_eq!(bearer_token(&parts(None)), None);
    }
}
