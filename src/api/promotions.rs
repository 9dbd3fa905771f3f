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
use crate::domain::aggregates::{Coupon, Promotion};
use crate::error::{Error, Result};
use crate::validation::{CouponRequest, PromotionRequest};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/promotions", get(list_promotions).post(create_promotion))
        .route(
            "/promotions/:id",
            get(show_promotion).put(update_promotion).delete(delete_promotion),
        )
        .route("/coupons", get(list_coupons).post(create_coupon))
        .route("/coupons/:id", get(show_coupon).put(update_coupon).delete(delete_coupon))
}

async fn list_promotions(State(state): State<AppState>) -> Result<Json<Vec<Promotion>>> {
    let mut promotions = state.store.list_promotions().await?;
    promotions.sort_by(|a, b| b.priority.cmp(&a.priority).then_with(|| a.name.cmp(&b.name)));
    Ok(Json(promotions))
}

async fn show_promotion(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<Json<Promotion>> {
    let promotion = state
        .store
        .find_promotion(id)
        .await?
        .ok_or_else(|| Error::not_found("Promotion"))?;
    Ok(Json(promotion))
}

async fn create_promotion(
    State(state): State<AppState>,
    AdminUser(actor): AdminUser,
    Json(request): Json<PromotionRequest>,
) -> Result<(StatusCode, Json<Promotion>)> {
    let promotion = request.validate(state.store()).await?.into_promotion();
    state.store.create_promotion(&promotion).await?;
    state
        .audit(
            &actor,
            "created",
            "promotion",
            Some(promotion.id),
            json!({ "name": promotion.name, "discount": promotion.discount, "scope": promotion.scope }),
        )
        .await?;
    Ok((StatusCode::CREATED, Json(promotion)))
}

async fn update_promotion(
    State(state): State<AppState>,
    AdminUser(actor): AdminUser,
    Path(id): Path<Uuid>,
    Json(request): Json<PromotionRequest>,
) -> Result<Json<Promotion>> {
    let mut promotion = state
        .store
        .find_promotion(id)
        .await?
        .ok_or_else(|| Error::not_found("Promotion"))?;
    request.validate(state.store()).await?.apply(&mut promotion);
    state.store.update_promotion(&promotion).await?;
    state
        .audit(
            &actor,
            "updated",
            "promotion",
            Some(id),
            json!({ "discount": promotion.discount, "is_active": promotion.is_active }),
        )
        .await?;
    Ok(Json(promotion))
}

async fn delete_promotion(
    State(state): State<AppState>,
    AdminUser(actor): AdminUser,
    Path(id): Path<Uuid>,
) -> Result<StatusCode> {
    if !state.store.delete_promotion(id).await? {
        return Err(Error::not_found("Promotion"));
    }
    state.audit(&actor, "deleted", "promotion", Some(id), json!({})).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_coupons(State(state): State<AppState>) -> Result<Json<Vec<Coupon>>> {
    let mut coupons = state.store.list_coupons().await?;
    coupons.sort_by(|a, b| a.code.cmp(&b.code));
    Ok(Json(coupons))
}

async fn show_coupon(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<Json<Coupon>> {
    let coupon = state.store.find_coupon(id).await?.ok_or_else(|| Error::not_found("Coupon"))?;
    Ok(Json(coupon))
}

async fn create_coupon(
    State(state): State<AppState>,
    AdminUser(actor): AdminUser,
    Json(request): Json<CouponRequest>,
) -> Result<(StatusCode, Json<Coupon>)> {
    let coupon = request.validate(state.store(), None).await?.into_coupon();
    state.store.create_coupon(&coupon).await?;
    state
        .audit(
            &actor,
            "created",
            "coupon",
            Some(coupon.id),
            json!({ "code": coupon.code, "discount": coupon.discount, "usage_limit": coupon.usage_limit }),
        )
        .await?;
    Ok((StatusCode::CREATED, Json(coupon)))
}

async fn update_coupon(
    State(state): State<AppState>,
    AdminUser(actor): AdminUser,
    Path(id): Path<Uuid>,
    Json(request): Json<CouponRequest>,
) -> Result<Json<Coupon>> {
    let mut coupon = state.store.find_coupon(id).await?.ok_or_else(|| Error::not_found("Coupon"))?;
    request.validate(state.store(), Some(id)).await?.apply(&mut coupon);
    state.store.update_coupon(&coupon).await?;
    state
        .audit(
            &actor,
            "updated",
            "coupon",
            Some(id),
            json!({ "code": coupon.code, "is_active": coupon.is_active }),
        )
        .await?;
    Ok(Json(coupon))
}

async fn delete_coupon(
    State(state): State<AppState>,
    AdminUser(actor): AdminUser,
    Path(id): Path<Uuid>,
) -> Result<StatusCode> {
    if !state.store.delete_coupon(id).await? {
        return Err(Error::not_found("Coupon"));
    }
    state.audit(&actor, "deleted", "coupon", Some(id), json!({})).await?;
    Ok(StatusCode::NO_CONTENT)
}
