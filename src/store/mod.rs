//! Persistence.
//!
//! [`Store`] is the single data-access seam used by handlers. Operations that
//! touch stock, coupons or payments are atomic units: the Postgres store runs
//! them in one transaction with row locks, the memory store under one write
//! lock. Both enforce the same uniqueness rules.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::domain::aggregates::{
    AuditEntry, Brand, Cart, Category, Coupon, InventoryMovement, InventoryRecord, MovementContext, MovementKind,
    Order, OrderAction, OrderStatus, Payment, Product, ProductStatus, Promotion, Role, StockError, StockKey,
    StockOperation, User,
};
use crate::domain::events::{DomainEvent, InventoryEvent};
use crate::domain::value_objects::Money;
use crate::error::{Error, FieldErrors, Result};

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

pub const DEFAULT_PER_PAGE: u32 = 20;
pub const MAX_PER_PAGE: u32 = 100;

/// One-based page selection, clamped to `1..=MAX_PER_PAGE` rows.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PageRequest {
    pub page: u32,
    pub per_page: u32,
}

impl PageRequest {
    pub fn new(page: Option<u32>, per_page: Option<u32>) -> Self {
        Self {
            page: page.unwrap_or(1).max(1),
            per_page: per_page.unwrap_or(DEFAULT_PER_PAGE).clamp(1, MAX_PER_PAGE),
        }
    }

    pub fn first(per_page: u32) -> Self {
        Self::new(Some(1), Some(per_page))
    }

    pub fn offset(&self) -> i64 {
        i64::from(self.page - 1) * i64::from(self.per_page)
    }

    pub fn limit(&self) -> i64 {
        i64::from(self.per_page)
    }

    /// Applies the page window to an already filtered, ordered list.
    pub fn slice<T>(&self, items: Vec<T>) -> Page<T> {
        let total = items.len() as i64;
        let data = items
            .into_iter()
            .skip(self.offset() as usize)
            .take(self.per_page as usize)
            .collect();
        Page {
            data,
            total,
            page: self.page,
            per_page: self.per_page,
        }
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self::new(None, None)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Page<T> {
    pub data: Vec<T>,
    pub total: i64,
    pub page: u32,
    pub per_page: u32,
}

impl<T> Page<T> {
    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            data: self.data.into_iter().map(f).collect(),
            total: self.total,
            page: self.page,
            per_page: self.per_page,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct UserFilter {
    pub role: Option<Role>,
    pub search: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub struct ProductFilter {
    /// Case-insensitive match on name or SKU.
    pub search: Option<String>,
    /// Any of these categories; callers expand descendants.
    pub category_ids: Option<Vec<Uuid>>,
    pub brand_id: Option<Uuid>,
    pub status: Option<ProductStatus>,
    pub featured: Option<bool>,
    pub min_price: Option<Money>,
    pub max_price: Option<Money>,
    /// Products in these categories are left out.
    pub hidden_category_ids: Vec<Uuid>,
}

#[derive(Clone, Debug, Default)]
pub struct InventoryFilter {
    pub product_id: Option<Uuid>,
    pub location: Option<String>,
    pub low_stock_only: bool,
}

#[derive(Clone, Debug, Default)]
pub struct MovementFilter {
    pub product_id: Option<Uuid>,
    pub location: Option<String>,
    pub kind: Option<MovementKind>,
}

#[derive(Clone, Debug, Default)]
pub struct OrderFilter {
    pub customer_id: Option<Uuid>,
    /// Any of these; empty means all.
    pub statuses: Vec<OrderStatus>,
}

#[derive(Clone, Debug, Default)]
pub struct AuditFilter {
    pub entity_type: Option<String>,
    pub entity_id: Option<Uuid>,
}

/// A stock operation on one record, as submitted.
#[derive(Clone, Debug)]
pub struct StockRequest {
    pub key: StockKey,
    pub operation: StockOperation,
    pub context: MovementContext,
}

/// Ledger rows written and the records they left behind.
#[derive(Clone, Debug, Default, Serialize)]
pub struct StockOutcome {
    pub movements: Vec<InventoryMovement>,
    pub records: Vec<InventoryRecord>,
}

impl StockOutcome {
    pub fn extend(&mut self, other: StockOutcome) {
        self.movements.extend(other.movements);
        self.records.extend(other.records);
    }

    /// Stock-moved events plus a low-stock event for every record at or below its reorder level.
    pub fn events(&self) -> Vec<DomainEvent> {
        self.movements
            .iter()
            .map(|m| InventoryEvent::moved(m).into())
            .chain(
                self.records
                    .iter()
                    .filter_map(InventoryEvent::low_stock)
                    .map(DomainEvent::from),
            )
            .collect()
    }
}

/// Coupon redemption recorded with an order.
#[derive(Clone, Debug)]
pub struct CouponRedemption {
    pub coupon_id: Uuid,
    pub discount: Money,
}

/// Everything checkout commits in one unit.
#[derive(Clone, Debug)]
pub struct OrderPlacement {
    pub order: Order,
    pub coupon: Option<CouponRedemption>,
    /// Emptied once the order is stored.
    pub cart_id: Option<Uuid>,
}

#[derive(Clone, Debug)]
pub struct OrderOutcome {
    /// Carries the domain events raised by the change.
    pub order: Order,
    pub stock: StockOutcome,
}

#[derive(Clone, Debug)]
pub struct PaymentOutcome {
    pub order: Order,
    pub payment: Payment,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct StatusCount<S> {
    pub status: S,
    pub count: i64,
}

/// Stock failure on checkout line `index`, reported against that line's quantity.
pub(crate) fn stock_error_at(index: usize, err: StockError) -> Error {
    let mut errors = FieldErrors::new();
    errors.merge_prefixed(&format!("items.{index}"), FieldErrors::single(err.field(), err.to_string()));
    Error::Validation(errors)
}

#[async_trait]
pub trait Store: Send + Sync {
    // users
    async fn create_user(&self, user: &User) -> Result<()>;
    async fn update_user(&self, user: &User) -> Result<()>;
    async fn find_user(&self, id: Uuid) -> Result<Option<User>>;
    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>>;
    async fn list_users(&self, filter: &UserFilter, page: PageRequest) -> Result<Page<User>>;
    async fn count_users(&self, role: Role) -> Result<i64>;

    // brands
    async fn create_brand(&self, brand: &Brand) -> Result<()>;
    async fn update_brand(&self, brand: &Brand) -> Result<()>;
    async fn find_brand(&self, id: Uuid) -> Result<Option<Brand>>;
    async fn find_brand_by_slug(&self, slug: &str) -> Result<Option<Brand>>;
    async fn find_brand_by_name(&self, name: &str) -> Result<Option<Brand>>;
    async fn list_brands(&self, active_only: bool) -> Result<Vec<Brand>>;
    /// Products keep existing with no brand.
    async fn delete_brand(&self, id: Uuid) -> Result<bool>;

    // categories
    async fn create_category(&self, category: &Category) -> Result<()>;
    async fn update_category(&self, category: &Category) -> Result<()>;
    async fn find_category(&self, id: Uuid) -> Result<Option<Category>>;
    async fn find_category_by_slug(&self, slug: &str) -> Result<Option<Category>>;
    async fn list_categories(&self) -> Result<Vec<Category>>;
    /// Children become roots and products lose the category.
    async fn delete_category(&self, id: Uuid) -> Result<bool>;

    // products
    async fn create_product(&self, product: &Product) -> Result<()>;
    async fn update_product(&self, product: &Product) -> Result<()>;
    async fn find_product(&self, id: Uuid) -> Result<Option<Product>>;
    async fn find_product_by_slug(&self, slug: &str) -> Result<Option<Product>>;
    /// Id of the product owning `sku` either directly or through a variant.
    async fn sku_owner(&self, sku: &str) -> Result<Option<Uuid>>;
    async fn find_products(&self, ids: &[Uuid]) -> Result<Vec<Product>>;
    async fn list_products(&self, filter: &ProductFilter, page: PageRequest) -> Result<Page<Product>>;
    async fn products_in_categories(&self, category_ids: &[Uuid]) -> Result<Vec<Product>>;
    /// Saves price fields of every product, all or none.
    async fn update_prices(&self, products: &[Product]) -> Result<()>;
    /// Refused with a conflict when the product appears on an order.
    async fn delete_product(&self, id: Uuid) -> Result<bool>;
    async fn count_products_by_status(&self) -> Result<Vec<StatusCount<ProductStatus>>>;

    // inventory
    async fn find_inventory(&self, key: &StockKey) -> Result<Option<InventoryRecord>>;
    async fn list_inventory(&self, filter: &InventoryFilter, page: PageRequest) -> Result<Page<InventoryRecord>>;
    /// Applies one operation and appends its movements. Missing records start at zero.
    async fn apply_stock(&self, request: StockRequest) -> Result<StockOutcome>;
    async fn set_reorder_level(&self, key: &StockKey, level: i32) -> Result<InventoryRecord>;
    async fn list_movements(&self, filter: &MovementFilter, page: PageRequest) -> Result<Page<InventoryMovement>>;

    // carts
    async fn save_cart(&self, cart: &Cart) -> Result<()>;
    async fn find_cart(&self, id: Uuid) -> Result<Option<Cart>>;
    async fn delete_cart(&self, id: Uuid) -> Result<bool>;

    // promotions and coupons
    async fn create_promotion(&self, promotion: &Promotion) -> Result<()>;
    async fn update_promotion(&self, promotion: &Promotion) -> Result<()>;
    async fn find_promotion(&self, id: Uuid) -> Result<Option<Promotion>>;
    async fn list_promotions(&self) -> Result<Vec<Promotion>>;
    async fn delete_promotion(&self, id: Uuid) -> Result<bool>;
    async fn create_coupon(&self, coupon: &Coupon) -> Result<()>;
    async fn update_coupon(&self, coupon: &Coupon) -> Result<()>;
    async fn find_coupon(&self, id: Uuid) -> Result<Option<Coupon>>;
    async fn find_coupon_by_code(&self, code: &str) -> Result<Option<Coupon>>;
    async fn list_coupons(&self) -> Result<Vec<Coupon>>;
    async fn delete_coupon(&self, id: Uuid) -> Result<bool>;
    async fn count_coupon_usage(&self, coupon_id: Uuid, user_id: Uuid) -> Result<i64>;

    // orders and payments
    /// Reserves every line, redeems the coupon and stores the order, all or nothing.
    async fn place_order(&self, placement: OrderPlacement) -> Result<OrderOutcome>;
    async fn find_order(&self, id: Uuid) -> Result<Option<Order>>;
    async fn list_orders(&self, filter: &OrderFilter, page: PageRequest) -> Result<Page<Order>>;
    /// Applies the action and its stock effect together.
    async fn transition_order(&self, id: Uuid, action: OrderAction, actor_id: Option<Uuid>) -> Result<OrderOutcome>;
    /// Records a payment and recomputes the order's payment status.
    async fn record_payment(&self, payment: Payment) -> Result<PaymentOutcome>;
    async fn list_payments(&self, order_id: Uuid) -> Result<Vec<Payment>>;
    async fn count_orders_by_status(&self) -> Result<Vec<StatusCount<OrderStatus>>>;
    /// Sum of completed payments, optionally since a point in time.
    async fn revenue(&self, since: Option<DateTime<Utc>>) -> Result<Money>;

    // audit
    async fn record_audit(&self, entry: &AuditEntry) -> Result<()>;
    async fn list_audit(&self, filter: &AuditFilter, page: PageRequest) -> Result<Page<AuditEntry>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_request_clamps() {
        let page = PageRequest::new(Some(0), Some(500));
        assert_eq!(page.page, 1);
        assert_eq!(page.per_page, MAX_PER_PAGE);

        let page = PageRequest::new(Some(3), Some(10));
        assert_eq!(page.offset(), 20);
        let sliced = page.slice((0..25).collect::<Vec<_>>());
        assert_eq!(sliced.data, vec![20, 21, 22, 23, 24]);
        assert_eq!(sliced.total, 25);
    }
}
