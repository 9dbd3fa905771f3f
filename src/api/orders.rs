use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use super::{AppState, Json};
use crate::auth::{CurrentUser, StaffUser};
use crate::domain::aggregates::{Order, OrderAction, OrderStatus, Payment};
use crate::domain::pricing::{quote, CouponClaim};
use crate::error::{Error, Result};
use crate::store::{CouponRedemption, OrderFilter, OrderPlacement, Page, PageRequest};
use crate::validation::{CheckoutRequest, PaymentRequest};

/// Checkout and the customer's own orders.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/checkout", post(checkout))
        .route("/orders", get(my_orders))
        .route("/orders/:id", get(my_order))
}

/// Order processing for staff.
pub fn staff_routes() -> Router<AppState> {
    Router::new()
        .route("/orders", get(list_orders))
        .route("/orders/:id", get(show_order))
        .route("/orders/:id/transition", post(transition))
        .route("/orders/:id/payments", get(list_payments).post(record_payment))
}

#[derive(Debug, Serialize)]
pub struct OrderDetail {
    #[serde(flatten)]
    pub order: Order,
    pub payments: Vec<Payment>,
}

#[derive(Debug, Default, Deserialize)]
pub struct OrderQuery {
    pub status: Option<OrderStatus>,
    /// Pending, confirmed and processing orders only.
    pub open: Option<bool>,
    pub customer_id: Option<Uuid>,
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

impl OrderQuery {
    fn filter(&self) -> OrderFilter {
        let statuses = match (self.status, self.open) {
            (Some(status), _) => vec![status],
            (None, Some(true)) => OrderStatus::ALL.iter().copied().filter(OrderStatus::is_open).collect(),
            _ => vec![],
        };
        OrderFilter {
            customer_id: self.customer_id,
            statuses,
        }
    }

    fn page(&self) -> PageRequest {
        PageRequest::new(self.page, self.per_page)
    }
}

#[derive(Debug, Deserialize)]
pub struct TransitionRequest {
    pub action: String,
}

async fn checkout(
    State(state): State<AppState>,
    CurrentUser(customer): CurrentUser,
    Json(request): Json<CheckoutRequest>,
) -> Result<(StatusCode, Json<Order>)> {
    let input = request.validate(state.store(), &customer).await?;
    let promotions = state.store.list_promotions().await?;
    let claim = input.coupon.as_ref().map(|coupon| CouponClaim {
        coupon,
        customer_uses: input.coupon_uses,
    });
    let priced = quote(&input.lines, &promotions, claim, &state.config.pricing, Utc::now())?;

    let order = Order::place(
        customer.id,
        customer.email.clone(),
        &priced,
        input.shipping_address,
        input.billing_address,
        input.notes,
    )?;
    let coupon = input.coupon.map(|c| CouponRedemption {
        coupon_id: c.id,
        discount: priced.coupon_discount,
    });
    let mut outcome = state
        .store
        .place_order(OrderPlacement {
            order,
            coupon,
            cart_id: Some(input.cart.id),
        })
        .await?;

    info!(order_id = %outcome.order.id, order_number = %outcome.order.order_number, total = %outcome.order.total, "order placed");
    state.publish(outcome.order.take_events()).await;
    state.publish(outcome.stock.events()).await;
    Ok((StatusCode::CREATED, Json(outcome.order)))
}

async fn my_orders(
    State(state): State<AppState>,
    CurrentUser(customer): CurrentUser,
    Query(query): Query<OrderQuery>,
) -> Result<Json<Page<Order>>> {
    let mut filter = query.filter();
    filter.customer_id = Some(customer.id);
    Ok(Json(state.store.list_orders(&filter, query.page()).await?))
}

async fn detail(state: &AppState, order: Order) -> Result<OrderDetail> {
    let payments = state.store.list_payments(order.id).await?;
    Ok(OrderDetail { order, payments })
}

async fn my_order(
    State(state): State<AppState>,
    CurrentUser(customer): CurrentUser,
    Path(id): Path<Uuid>,
) -> Result<Json<OrderDetail>> {
    let order = state
        .store
        .find_order(id)
        .await?
        .filter(|o| o.customer_id == customer.id || customer.role.is_staff())
        .ok_or_else(|| Error::not_found("Order"))?;
    Ok(Json(detail(&state, order).await?))
}

async fn list_orders(State(state): State<AppState>, Query(query): Query<OrderQuery>) -> Result<Json<Page<Order>>> {
    Ok(Json(state.store.list_orders(&query.filter(), query.page()).await?))
}

async fn show_order(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<Json<OrderDetail>> {
    let order = state.store.find_order(id).await?.ok_or_else(|| Error::not_found("Order"))?;
    Ok(Json(detail(&state, order).await?))
}

async fn transition(
    State(state): State<AppState>,
    StaffUser(actor): StaffUser,
    Path(id): Path<Uuid>,
    Json(request): Json<TransitionRequest>,
) -> Result<Json<Order>> {
    let action: OrderAction = request
        .action
        .trim()
        .parse()
        .map_err(|_| Error::validation("action", "The selected action is invalid."))?;
    let mut outcome = state.store.transition_order(id, action, Some(actor.id)).await?;

    info!(order_id = %id, %action, status = %outcome.order.status, "order transitioned");
    state
        .audit(&actor, &format!("order.{action}"), "order", Some(id), json!({ "status": outcome.order.status }))
        .await?;
    state.publish(outcome.order.take_events()).await;
    state.publish(outcome.stock.events()).await;
    Ok(Json(outcome.order))
}

async fn list_payments(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<Json<Vec<Payment>>> {
    state.store.find_order(id).await?.ok_or_else(|| Error::not_found("Order"))?;
    Ok(Json(state.store.list_payments(id).await?))
}

async fn record_payment(
    State(state): State<AppState>,
    StaffUser(actor): StaffUser,
    Path(id): Path<Uuid>,
    Json(request): Json<PaymentRequest>,
) -> Result<(StatusCode, Json<OrderDetail>)> {
    let payment = request.validate(id)?;
    let mut outcome = state.store.record_payment(payment).await?;

    state
        .audit(
            &actor,
            "payment.recorded",
            "order",
            Some(id),
            json!({ "payment_id": outcome.payment.id, "amount": outcome.payment.amount, "method": outcome.payment.method }),
        )
        .await?;
    state.publish(outcome.order.take_events()).await;
    Ok((StatusCode::CREATED, Json(detail(&state, outcome.order).await?)))
}
