//! HTTP API.
//!
//! Storefront and customer routes live under `/api/v1`, staff routes under
//! `/api/v1/staff` and admin routes under `/api/v1/admin`. The group gates are
//! route layers over the role extractors; handlers that need the acting user
//! take the extractor again.

use std::sync::Arc;

use axum::{
    extract::FromRequest,
    middleware,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use serde::Serialize;
use serde_json::{json, Value};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use uuid::Uuid;

use crate::auth::{AdminUser, StaffUser};
use crate::config::Config;
use crate::domain::aggregates::{AuditEntry, User};
use crate::domain::events::DomainEvent;
use crate::error::{Error, Result};
use crate::publisher::EventPublisher;
use crate::store::Store;

pub mod audit;
pub mod auth;
pub mod brands;
pub mod carts;
pub mod catalog;
pub mod categories;
pub mod dashboard;
pub mod inventory;
pub mod orders;
pub mod pricing;
pub mod products;
pub mod promotions;
pub mod users;

/// JSON body extractor whose rejections render as field errors.
#[derive(Debug, Clone, FromRequest)]
#[from_request(via(axum::Json), rejection(Error))]
pub struct Json<T>(pub T);

impl<T: Serialize> IntoResponse for Json<T> {
    fn into_response(self) -> Response {
        axum::Json(self.0).into_response()
    }
}

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub config: Arc<Config>,
    pub events: EventPublisher,
}

impl AppState {
    pub fn new(store: Arc<dyn Store>, config: Config, events: EventPublisher) -> Self {
        Self {
            store,
            config: Arc::new(config),
            events,
        }
    }

    pub fn store(&self) -> &dyn Store {
        self.store.as_ref()
    }

    /// Writes an audit entry for a staff or admin mutation.
    pub async fn audit(
        &self,
        actor: &User,
        action: &str,
        entity_type: &str,
        entity_id: Option<Uuid>,
        changes: Value,
    ) -> Result<()> {
        let entry = AuditEntry::new(Some(actor.id), action, entity_type, entity_id, changes);
        self.store.record_audit(&entry).await
    }

    pub async fn publish(&self, events: impl IntoIterator<Item = DomainEvent>) {
        self.events.publish_all(events).await;
    }
}

pub fn router(state: AppState) -> Router {
    let staff = Router::new()
        .merge(inventory::routes())
        .merge(orders::staff_routes())
        .merge(dashboard::staff_routes())
        .route_layer(middleware::from_extractor_with_state::<StaffUser, _>(state.clone()));

    let admin = Router::new()
        .merge(brands::routes())
        .merge(categories::routes())
        .merge(products::routes())
        .merge(pricing::routes())
        .merge(promotions::routes())
        .merge(users::routes())
        .merge(audit::routes())
        .merge(dashboard::admin_routes())
        .route_layer(middleware::from_extractor_with_state::<AdminUser, _>(state.clone()));

    let api = Router::new()
        .merge(auth::routes())
        .merge(catalog::routes())
        .merge(carts::routes())
        .merge(orders::routes())
        .nest("/staff", staff)
        .nest("/admin", admin);

    Router::new()
        .route("/health", get(health))
        .nest("/api/v1", api)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health() -> Json<Value> {
    Json(json!({"status": "healthy", "service": "beauty-commerce"}))
}
