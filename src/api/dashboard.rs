use axum::{extract::State, routing::get, Router};
use chrono::{Duration, Utc};
use serde::Serialize;

use super::{AppState, Json};
use crate::domain::aggregates::{InventoryRecord, Order, OrderStatus, ProductStatus, Role};
use crate::domain::value_objects::Money;
use crate::error::Result;
use crate::store::{InventoryFilter, OrderFilter, Page, PageRequest, StatusCount};

const LOW_STOCK_LIMIT: u32 = 20;
const RECENT_ORDERS: u32 = 5;

pub fn admin_routes() -> Router<AppState> {
    Router::new().route("/dashboard", get(admin_dashboard))
}

pub fn staff_routes() -> Router<AppState> {
    Router::new().route("/dashboard", get(staff_dashboard))
}

#[derive(Debug, Serialize)]
pub struct AdminDashboard {
    pub products_by_status: Vec<StatusCount<ProductStatus>>,
    pub orders_by_status: Vec<StatusCount<OrderStatus>>,
    pub revenue_total: Money,
    pub revenue_last_30_days: Money,
    pub customers: i64,
    pub low_stock: Page<InventoryRecord>,
    pub recent_orders: Vec<Order>,
}

#[derive(Debug, Serialize)]
pub struct StaffDashboard {
    /// Pending, confirmed and processing orders, newest first.
    pub awaiting_action: Page<Order>,
    pub low_stock: Page<InventoryRecord>,
}

async fn low_stock(state: &AppState) -> Result<Page<InventoryRecord>> {
    let filter = InventoryFilter {
        low_stock_only: true,
        ..Default::default()
    };
    state.store.list_inventory(&filter, PageRequest::first(LOW_STOCK_LIMIT)).await
}

async fn admin_dashboard(State(state): State<AppState>) -> Result<Json<AdminDashboard>> {
    let recent_orders = state
        .store
        .list_orders(&OrderFilter::default(), PageRequest::first(RECENT_ORDERS))
        .await?
        .data;
    Ok(Json(AdminDashboard {
        products_by_status: state.store.count_products_by_status().await?,
        orders_by_status: state.store.count_orders_by_status().await?,
        revenue_total: state.store.revenue(None).await?,
        revenue_last_30_days: state.store.revenue(Some(Utc::now() - Duration::days(30))).await?,
        customers: state.store.count_users(Role::Customer).await?,
        low_stock: low_stock(&state).await?,
        recent_orders,
    }))
}

async fn staff_dashboard(State(state): State<AppState>) -> Result<Json<StaffDashboard>> {
    let filter = OrderFilter {
        customer_id: None,
        statuses: OrderStatus::ALL.iter().copied().filter(OrderStatus::is_open).collect(),
    };
    let awaiting_action = state.store.list_orders(&filter, PageRequest::first(50)).await?;
    Ok(Json(StaffDashboard {
        awaiting_action,
        low_stock: low_stock(&state).await?,
    }))
}
