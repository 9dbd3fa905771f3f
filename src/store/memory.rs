//! In-memory store.
//!
//! Intended for tests and local runs without Postgres. Every multi-row
//! operation works on copies and commits them only when all steps succeed.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{
    AuditFilter, InventoryFilter, MovementFilter, OrderFilter, OrderOutcome, OrderPlacement, Page, PageRequest,
    PaymentOutcome, ProductFilter, StatusCount, StockOutcome, StockRequest, Store, UserFilter, stock_error_at,
};
use crate::domain::aggregates::inventory::transfer;
use crate::domain::aggregates::payment::paid_total;
use crate::domain::aggregates::{
    AuditEntry, Brand, Cart, Category, Coupon, CouponRejection, CouponUsage, InventoryMovement, InventoryRecord,
    MovementContext, Order, OrderAction, OrderStatus, Payment, PaymentState, PaymentStatus, Product, ProductStatus,
    Promotion, Role, StockChange, StockError, StockKey, StockOperation, User,
};
use crate::domain::value_objects::Money;
use crate::error::{Error, Result};

#[derive(Debug, Default)]
struct State {
    users: HashMap<Uuid, User>,
    brands: HashMap<Uuid, Brand>,
    categories: HashMap<Uuid, Category>,
    products: HashMap<Uuid, Product>,
    inventory: HashMap<StockKey, InventoryRecord>,
    movements: Vec<InventoryMovement>,
    carts: HashMap<Uuid, Cart>,
    promotions: HashMap<Uuid, Promotion>,
    coupons: HashMap<Uuid, Coupon>,
    coupon_usage: Vec<CouponUsage>,
    orders: HashMap<Uuid, Order>,
    payments: Vec<Payment>,
    audit: Vec<AuditEntry>,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Pending inventory changes layered over committed records.
struct StockScratch<'a> {
    committed: &'a HashMap<StockKey, InventoryRecord>,
    touched: HashMap<StockKey, InventoryRecord>,
    outcome: StockOutcome,
}

impl<'a> StockScratch<'a> {
    fn new(committed: &'a HashMap<StockKey, InventoryRecord>) -> Self {
        Self {
            committed,
            touched: HashMap::new(),
            outcome: StockOutcome::default(),
        }
    }

    fn record(&self, key: &StockKey) -> InventoryRecord {
        self.touched
            .get(key)
            .or_else(|| self.committed.get(key))
            .cloned()
            .unwrap_or_else(|| InventoryRecord::new(key))
    }

    fn change(&mut self, key: &StockKey, change: StockChange, ctx: &MovementContext) -> Result<(), StockError> {
        let mut record = self.record(key);
        let movement = record.apply(change, ctx)?;
        self.outcome.movements.push(movement);
        self.touched.insert(key.clone(), record);
        Ok(())
    }

    fn operation(&mut self, request: &StockRequest) -> Result<(), StockError> {
        match &request.operation {
            StockOperation::Transfer { quantity, to_location } => {
                let mut from = self.record(&request.key);
                let mut to = self.record(&request.key.at(to_location.clone()));
                let movements = transfer(&mut from, &mut to, *quantity, &request.context)?;
                self.outcome.movements.extend(movements);
                self.touched.insert(from.key(), from);
                self.touched.insert(to.key(), to);
                Ok(())
            }
            op => self.change(&request.key, op.source_change(), &request.context),
        }
    }

    fn finish(mut self) -> (HashMap<StockKey, InventoryRecord>, StockOutcome) {
        self.outcome.records = self.touched.values().cloned().collect();
        (self.touched, self.outcome)
    }
}

impl State {
    fn commit_stock(&mut self, touched: HashMap<StockKey, InventoryRecord>, outcome: &StockOutcome) {
        self.inventory.extend(touched);
        self.movements.extend(outcome.movements.iter().cloned());
    }

    fn sku_owner(&self, sku: &str) -> Option<Uuid> {
        self.products
            .values()
            .find(|p| p.all_skus().any(|s| s.as_str() == sku))
            .map(|p| p.id)
    }

    fn check_product_unique(&self, product: &Product) -> Result<()> {
        for sku in product.all_skus() {
            if let Some(owner) = self.sku_owner(sku.as_str()) {
                if owner != product.id {
                    return Err(Error::conflict(format!("The SKU {sku} has already been taken.")));
                }
            }
        }
        if self
            .products
            .values()
            .any(|p| p.id != product.id && p.slug == product.slug)
        {
            return Err(Error::conflict("The slug has already been taken."));
        }
        Ok(())
    }

    fn check_brand_unique(&self, brand: &Brand) -> Result<()> {
        for other in self.brands.values().filter(|b| b.id != brand.id) {
            if other.name.eq_ignore_ascii_case(&brand.name) {
                return Err(Error::conflict("The name has already been taken."));
            }
            if other.slug == brand.slug {
                return Err(Error::conflict("The slug has already been taken."));
            }
        }
        Ok(())
    }

    fn check_category_unique(&self, category: &Category) -> Result<()> {
        if self
            .categories
            .values()
            .any(|c| c.id != category.id && c.slug == category.slug)
        {
            return Err(Error::conflict("The slug has already been taken."));
        }
        Ok(())
    }

    fn check_coupon_unique(&self, coupon: &Coupon) -> Result<()> {
        if self
            .coupons
            .values()
            .any(|c| c.id != coupon.id && c.code == coupon.code)
        {
            return Err(Error::conflict("The code has already been taken."));
        }
        Ok(())
    }

    fn save_order(&mut self, order: &Order) {
        let mut stored = order.clone();
        stored.events.clear();
        self.orders.insert(stored.id, stored);
    }
}

fn product_matches(filter: &ProductFilter, product: &Product) -> bool {
    if let Some(search) = &filter.search {
        let needle = search.to_lowercase();
        if !product.name.to_lowercase().contains(&needle) && !product.sku.as_str().to_lowercase().contains(&needle) {
            return false;
        }
    }
    if let Some(ids) = &filter.category_ids {
        if !product.category_id.map_or(false, |c| ids.contains(&c)) {
            return false;
        }
    }
    if product
        .category_id
        .map_or(false, |c| filter.hidden_category_ids.contains(&c))
    {
        return false;
    }
    filter.brand_id.map_or(true, |b| product.brand_id == Some(b))
        && filter.status.map_or(true, |s| product.status == s)
        && filter.featured.map_or(true, |f| product.is_featured == f)
        && filter.min_price.map_or(true, |m| product.price >= m)
        && filter.max_price.map_or(true, |m| product.price <= m)
}

#[async_trait]
impl Store for MemoryStore {
    async fn create_user(&self, user: &User) -> Result<()> {
        let mut state = self.state.write().await;
        if state.users.values().any(|u| u.email == user.email) {
            return Err(Error::conflict("The email has already been taken."));
        }
        state.users.insert(user.id, user.clone());
        Ok(())
    }

    async fn update_user(&self, user: &User) -> Result<()> {
        let mut state = self.state.write().await;
        if state.users.values().any(|u| u.id != user.id && u.email == user.email) {
            return Err(Error::conflict("The email has already been taken."));
        }
        match state.users.get_mut(&user.id) {
            Some(existing) => *existing = user.clone(),
            None => return Err(Error::not_found("User")),
        }
        Ok(())
    }

    async fn find_user(&self, id: Uuid) -> Result<Option<User>> {
        Ok(self.state.read().await.users.get(&id).cloned())
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>> {
        let state = self.state.read().await;
        Ok(state.users.values().find(|u| u.email == email).cloned())
    }

    async fn list_users(&self, filter: &UserFilter, page: PageRequest) -> Result<Page<User>> {
        let state = self.state.read().await;
        let needle = filter.search.as_ref().map(|s| s.to_lowercase());
        let mut users: Vec<User> = state
            .users
            .values()
            .filter(|u| filter.role.map_or(true, |r| u.role == r))
            .filter(|u| {
                needle
                    .as_ref()
                    .map_or(true, |n| u.email.contains(n.as_str()) || u.name.to_lowercase().contains(n.as_str()))
            })
            .cloned()
            .collect();
        users.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(page.slice(users))
    }

    async fn count_users(&self, role: Role) -> Result<i64> {
        let state = self.state.read().await;
        Ok(state.users.values().filter(|u| u.role == role).count() as i64)
    }

    async fn create_brand(&self, brand: &Brand) -> Result<()> {
        let mut state = self.state.write().await;
        state.check_brand_unique(brand)?;
        state.brands.insert(brand.id, brand.clone());
        Ok(())
    }

    async fn update_brand(&self, brand: &Brand) -> Result<()> {
        let mut state = self.state.write().await;
        if !state.brands.contains_key(&brand.id) {
            return Err(Error::not_found("Brand"));
        }
        state.check_brand_unique(brand)?;
        state.brands.insert(brand.id, brand.clone());
        Ok(())
    }

    async fn find_brand(&self, id: Uuid) -> Result<Option<Brand>> {
        Ok(self.state.read().await.brands.get(&id).cloned())
    }

    async fn find_brand_by_slug(&self, slug: &str) -> Result<Option<Brand>> {
        let state = self.state.read().await;
        Ok(state.brands.values().find(|b| b.slug == slug).cloned())
    }

    async fn find_brand_by_name(&self, name: &str) -> Result<Option<Brand>> {
        let state = self.state.read().await;
        Ok(state.brands.values().find(|b| b.name.eq_ignore_ascii_case(name)).cloned())
    }

    async fn list_brands(&self, active_only: bool) -> Result<Vec<Brand>> {
        let state = self.state.read().await;
        let mut brands: Vec<Brand> = state
            .brands
            .values()
            .filter(|b| !active_only || b.is_active)
            .cloned()
            .collect();
        brands.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(brands)
    }

    async fn delete_brand(&self, id: Uuid) -> Result<bool> {
        let mut state = self.state.write().await;
        if state.brands.remove(&id).is_none() {
            return Ok(false);
        }
        for product in state.products.values_mut().filter(|p| p.brand_id == Some(id)) {
            product.brand_id = None;
        }
        Ok(true)
    }

    async fn create_category(&self, category: &Category) -> Result<()> {
        let mut state = self.state.write().await;
        state.check_category_unique(category)?;
        state.categories.insert(category.id, category.clone());
        Ok(())
    }

    async fn update_category(&self, category: &Category) -> Result<()> {
        let mut state = self.state.write().await;
        if !state.categories.contains_key(&category.id) {
            return Err(Error::not_found("Category"));
        }
        state.check_category_unique(category)?;
        state.categories.insert(category.id, category.clone());
        Ok(())
    }

    async fn find_category(&self, id: Uuid) -> Result<Option<Category>> {
        Ok(self.state.read().await.categories.get(&id).cloned())
    }

    async fn find_category_by_slug(&self, slug: &str) -> Result<Option<Category>> {
        let state = self.state.read().await;
        Ok(state.categories.values().find(|c| c.slug == slug).cloned())
    }

    async fn list_categories(&self) -> Result<Vec<Category>> {
        let state = self.state.read().await;
        let mut categories: Vec<Category> = state.categories.values().cloned().collect();
        categories.sort_by(|a, b| a.sort_order.cmp(&b.sort_order).then_with(|| a.name.cmp(&b.name)));
        Ok(categories)
    }

    async fn delete_category(&self, id: Uuid) -> Result<bool> {
        let mut state = self.state.write().await;
        if state.categories.remove(&id).is_none() {
            return Ok(false);
        }
        for child in state.categories.values_mut().filter(|c| c.parent_id == Some(id)) {
            child.parent_id = None;
        }
        for product in state.products.values_mut().filter(|p| p.category_id == Some(id)) {
            product.category_id = None;
        }
        Ok(true)
    }

    async fn create_product(&self, product: &Product) -> Result<()> {
        let mut state = self.state.write().await;
        state.check_product_unique(product)?;
        state.products.insert(product.id, product.clone());
        Ok(())
    }

    async fn update_product(&self, product: &Product) -> Result<()> {
        let mut state = self.state.write().await;
        if !state.products.contains_key(&product.id) {
            return Err(Error::not_found("Product"));
        }
        state.check_product_unique(product)?;
        state.products.insert(product.id, product.clone());
        Ok(())
    }

    async fn find_product(&self, id: Uuid) -> Result<Option<Product>> {
        Ok(self.state.read().await.products.get(&id).cloned())
    }

    async fn find_product_by_slug(&self, slug: &str) -> Result<Option<Product>> {
        let state = self.state.read().await;
        Ok(state.products.values().find(|p| p.slug == slug).cloned())
    }

    async fn sku_owner(&self, sku: &str) -> Result<Option<Uuid>> {
        Ok(self.state.read().await.sku_owner(sku))
    }

    async fn find_products(&self, ids: &[Uuid]) -> Result<Vec<Product>> {
        let state = self.state.read().await;
        Ok(ids.iter().filter_map(|id| state.products.get(id).cloned()).collect())
    }

    async fn list_products(&self, filter: &ProductFilter, page: PageRequest) -> Result<Page<Product>> {
        let state = self.state.read().await;
        let mut products: Vec<Product> = state
            .products
            .values()
            .filter(|p| product_matches(filter, p))
            .cloned()
            .collect();
        products.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(page.slice(products))
    }

    async fn products_in_categories(&self, category_ids: &[Uuid]) -> Result<Vec<Product>> {
        let state = self.state.read().await;
        Ok(state
            .products
            .values()
            .filter(|p| p.category_id.map_or(false, |c| category_ids.contains(&c)))
            .cloned()
            .collect())
    }

    async fn update_prices(&self, products: &[Product]) -> Result<()> {
        let mut state = self.state.write().await;
        if let Some(missing) = products.iter().find(|p| !state.products.contains_key(&p.id)) {
            tracing::debug!(product_id = %missing.id, "price update for unknown product");
            return Err(Error::not_found("Product"));
        }
        for update in products {
            if let Some(product) = state.products.get_mut(&update.id) {
                product.price = update.price;
                product.compare_at_price = update.compare_at_price;
                product.updated_at = update.updated_at;
            }
        }
        Ok(())
    }

    async fn delete_product(&self, id: Uuid) -> Result<bool> {
        let mut state = self.state.write().await;
        if !state.products.contains_key(&id) {
            return Ok(false);
        }
        if state
            .orders
            .values()
            .any(|o| o.items.iter().any(|i| i.product_id == id))
        {
            return Err(Error::conflict("The product appears on orders and cannot be deleted."));
        }
        state.products.remove(&id);
        state.inventory.retain(|key, _| key.product_id != id);
        for cart in state.carts.values_mut() {
            cart.items.retain(|i| i.product_id != id);
        }
        Ok(true)
    }

    async fn count_products_by_status(&self) -> Result<Vec<StatusCount<ProductStatus>>> {
        let state = self.state.read().await;
        Ok(ProductStatus::ALL
            .iter()
            .map(|status| StatusCount {
                status: *status,
                count: state.products.values().filter(|p| p.status == *status).count() as i64,
            })
            .collect())
    }

    async fn find_inventory(&self, key: &StockKey) -> Result<Option<InventoryRecord>> {
        Ok(self.state.read().await.inventory.get(key).cloned())
    }

    async fn list_inventory(&self, filter: &InventoryFilter, page: PageRequest) -> Result<Page<InventoryRecord>> {
        let state = self.state.read().await;
        let mut records: Vec<InventoryRecord> = state
            .inventory
            .values()
            .filter(|r| filter.product_id.map_or(true, |p| r.product_id == p))
            .filter(|r| filter.location.as_ref().map_or(true, |l| &r.location == l))
            .filter(|r| !filter.low_stock_only || r.is_low_stock())
            .cloned()
            .collect();
        records.sort_by(|a, b| {
            a.available()
                .cmp(&b.available())
                .then_with(|| a.location.cmp(&b.location))
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(page.slice(records))
    }

    async fn apply_stock(&self, request: StockRequest) -> Result<StockOutcome> {
        let mut state = self.state.write().await;
        let mut scratch = StockScratch::new(&state.inventory);
        scratch.operation(&request)?;
        let (touched, outcome) = scratch.finish();
        state.commit_stock(touched, &outcome);
        Ok(outcome)
    }

    async fn set_reorder_level(&self, key: &StockKey, level: i32) -> Result<InventoryRecord> {
        let mut state = self.state.write().await;
        let record = state
            .inventory
            .entry(key.clone())
            .or_insert_with(|| InventoryRecord::new(key));
        record.reorder_level = level;
        record.updated_at = Utc::now();
        Ok(record.clone())
    }

    async fn list_movements(&self, filter: &MovementFilter, page: PageRequest) -> Result<Page<InventoryMovement>> {
        let state = self.state.read().await;
        let movements: Vec<InventoryMovement> = state
            .movements
            .iter()
            .rev()
            .filter(|m| filter.product_id.map_or(true, |p| m.product_id == p))
            .filter(|m| filter.location.as_ref().map_or(true, |l| &m.location == l))
            .filter(|m| filter.kind.map_or(true, |k| m.kind == k))
            .cloned()
            .collect();
        Ok(page.slice(movements))
    }

    async fn save_cart(&self, cart: &Cart) -> Result<()> {
        self.state.write().await.carts.insert(cart.id, cart.clone());
        Ok(())
    }

    async fn find_cart(&self, id: Uuid) -> Result<Option<Cart>> {
        Ok(self.state.read().await.carts.get(&id).cloned())
    }

    async fn delete_cart(&self, id: Uuid) -> Result<bool> {
        Ok(self.state.write().await.carts.remove(&id).is_some())
    }

    async fn create_promotion(&self, promotion: &Promotion) -> Result<()> {
        self.state
            .write()
            .await
            .promotions
            .insert(promotion.id, promotion.clone());
        Ok(())
    }

    async fn update_promotion(&self, promotion: &Promotion) -> Result<()> {
        let mut state = self.state.write().await;
        match state.promotions.get_mut(&promotion.id) {
            Some(existing) => *existing = promotion.clone(),
            None => return Err(Error::not_found("Promotion")),
        }
        Ok(())
    }

    async fn find_promotion(&self, id: Uuid) -> Result<Option<Promotion>> {
        Ok(self.state.read().await.promotions.get(&id).cloned())
    }

    async fn list_promotions(&self) -> Result<Vec<Promotion>> {
        let state = self.state.read().await;
        let mut promotions: Vec<Promotion> = state.promotions.values().cloned().collect();
        promotions.sort_by(|a, b| b.priority.cmp(&a.priority).then_with(|| a.name.cmp(&b.name)));
        Ok(promotions)
    }

    async fn delete_promotion(&self, id: Uuid) -> Result<bool> {
        Ok(self.state.write().await.promotions.remove(&id).is_some())
    }

    async fn create_coupon(&self, coupon: &Coupon) -> Result<()> {
        let mut state = self.state.write().await;
        state.check_coupon_unique(coupon)?;
        state.coupons.insert(coupon.id, coupon.clone());
        Ok(())
    }

    async fn update_coupon(&self, coupon: &Coupon) -> Result<()> {
        let mut state = self.state.write().await;
        if !state.coupons.contains_key(&coupon.id) {
            return Err(Error::not_found("Coupon"));
        }
        state.check_coupon_unique(coupon)?;
        state.coupons.insert(coupon.id, coupon.clone());
        Ok(())
    }

    async fn find_coupon(&self, id: Uuid) -> Result<Option<Coupon>> {
        Ok(self.state.read().await.coupons.get(&id).cloned())
    }

    async fn find_coupon_by_code(&self, code: &str) -> Result<Option<Coupon>> {
        let state = self.state.read().await;
        Ok(state.coupons.values().find(|c| c.code == code).cloned())
    }

    async fn list_coupons(&self) -> Result<Vec<Coupon>> {
        let state = self.state.read().await;
        let mut coupons: Vec<Coupon> = state.coupons.values().cloned().collect();
        coupons.sort_by(|a, b| a.code.cmp(&b.code));
        Ok(coupons)
    }

    async fn delete_coupon(&self, id: Uuid) -> Result<bool> {
        let mut state = self.state.write().await;
        let removed = state.coupons.remove(&id).is_some();
        state.coupon_usage.retain(|u| u.coupon_id != id);
        Ok(removed)
    }

    async fn count_coupon_usage(&self, coupon_id: Uuid, user_id: Uuid) -> Result<i64> {
        let state = self.state.read().await;
        Ok(state
            .coupon_usage
            .iter()
            .filter(|u| u.coupon_id == coupon_id && u.user_id == user_id)
            .count() as i64)
    }

    async fn place_order(&self, placement: OrderPlacement) -> Result<OrderOutcome> {
        let mut state = self.state.write().await;
        let order = placement.order;

        let mut scratch = StockScratch::new(&state.inventory);
        let ctx = MovementContext::for_order(&order.order_number, Some(order.customer_id));
        for (index, item) in order.items.iter().enumerate() {
            let key = StockKey::main(item.product_id, item.variant_id);
            scratch
                .change(&key, StockChange::Reserve(item.quantity), &ctx)
                .map_err(|e| stock_error_at(index, e))?;
        }
        let (touched, stock) = scratch.finish();

        let usage = match &placement.coupon {
            Some(redemption) => {
                let coupon = state
                    .coupons
                    .get(&redemption.coupon_id)
                    .ok_or(CouponRejection::Unknown)?;
                let uses = state
                    .coupon_usage
                    .iter()
                    .filter(|u| u.coupon_id == coupon.id && u.user_id == order.customer_id)
                    .count() as i64;
                coupon.check_limits(uses)?;
                Some(CouponUsage {
                    id: Uuid::now_v7(),
                    coupon_id: coupon.id,
                    user_id: order.customer_id,
                    order_id: order.id,
                    discount: redemption.discount,
                    used_at: Utc::now(),
                })
            }
            None => None,
        };

        state.commit_stock(touched, &stock);
        if let Some(usage) = usage {
            if let Some(coupon) = state.coupons.get_mut(&usage.coupon_id) {
                coupon.used_count += 1;
            }
            state.coupon_usage.push(usage);
        }
        if let Some(cart) = placement.cart_id.and_then(|id| state.carts.get_mut(&id)) {
            cart.clear();
        }
        state.save_order(&order);
        Ok(OrderOutcome { order, stock })
    }

    async fn find_order(&self, id: Uuid) -> Result<Option<Order>> {
        Ok(self.state.read().await.orders.get(&id).cloned())
    }

    async fn list_orders(&self, filter: &OrderFilter, page: PageRequest) -> Result<Page<Order>> {
        let state = self.state.read().await;
        let mut orders: Vec<Order> = state
            .orders
            .values()
            .filter(|o| filter.customer_id.map_or(true, |c| o.customer_id == c))
            .filter(|o| filter.statuses.is_empty() || filter.statuses.contains(&o.status))
            .cloned()
            .collect();
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(page.slice(orders))
    }

    async fn transition_order(&self, id: Uuid, action: OrderAction, actor_id: Option<Uuid>) -> Result<OrderOutcome> {
        let mut state = self.state.write().await;
        let mut order = state.orders.get(&id).cloned().ok_or(Error::not_found("Order"))?;
        order.transition(action)?;

        let mut scratch = StockScratch::new(&state.inventory);
        if let Some(effect) = action.stock_effect() {
            let ctx = MovementContext::for_order(&order.order_number, actor_id);
            for (key, change) in order.stock_changes(effect) {
                scratch
                    .change(&key, change, &ctx)
                    .map_err(|e| Error::conflict(format!("Stock for product {}: {e}", key.product_id)))?;
            }
        }
        let (touched, stock) = scratch.finish();

        state.commit_stock(touched, &stock);
        if order.payment_status == PaymentStatus::Refunded {
            for payment in state
                .payments
                .iter_mut()
                .filter(|p| p.order_id == id && p.status == PaymentState::Completed)
            {
                payment.status = PaymentState::Refunded;
            }
        }
        state.save_order(&order);
        Ok(OrderOutcome { order, stock })
    }

    async fn record_payment(&self, payment: Payment) -> Result<PaymentOutcome> {
        let mut state = self.state.write().await;
        let mut order = state
            .orders
            .get(&payment.order_id)
            .cloned()
            .ok_or(Error::not_found("Order"))?;
        if !order.accepts_payment() {
            return Err(Error::conflict("This order no longer accepts payments."));
        }
        let existing: Vec<Payment> = state
            .payments
            .iter()
            .filter(|p| p.order_id == order.id)
            .cloned()
            .collect();
        let paid = paid_total(&existing);
        let balance = order.balance_due(paid);
        if payment.amount > balance {
            return Err(Error::validation(
                "amount",
                format!("The amount may not be greater than the outstanding balance of {balance}."),
            ));
        }
        if payment.status == PaymentState::Completed {
            order.apply_payments(paid + payment.amount);
        }
        state.payments.push(payment.clone());
        state.save_order(&order);
        Ok(PaymentOutcome { order, payment })
    }

    async fn list_payments(&self, order_id: Uuid) -> Result<Vec<Payment>> {
        let state = self.state.read().await;
        Ok(state
            .payments
            .iter()
            .filter(|p| p.order_id == order_id)
            .cloned()
            .collect())
    }

    async fn count_orders_by_status(&self) -> Result<Vec<StatusCount<OrderStatus>>> {
        let state = self.state.read().await;
        Ok(OrderStatus::ALL
            .iter()
            .map(|status| StatusCount {
                status: *status,
                count: state.orders.values().filter(|o| o.status == *status).count() as i64,
            })
            .collect())
    }

    async fn revenue(&self, since: Option<DateTime<Utc>>) -> Result<Money> {
        let state = self.state.read().await;
        Ok(state
            .payments
            .iter()
            .filter(|p| p.status == PaymentState::Completed)
            .filter(|p| since.map_or(true, |s| p.created_at >= s))
            .map(|p| p.amount)
            .sum())
    }

    async fn record_audit(&self, entry: &AuditEntry) -> Result<()> {
        self.state.write().await.audit.push(entry.clone());
        Ok(())
    }

    async fn list_audit(&self, filter: &AuditFilter, page: PageRequest) -> Result<Page<AuditEntry>> {
        let state = self.state.read().await;
        let entries: Vec<AuditEntry> = state
            .audit
            .iter()
            .rev()
            .filter(|e| filter.entity_type.as_ref().map_or(true, |t| &e.entity_type == t))
            .filter(|e| filter.entity_id.map_or(true, |id| e.entity_id == Some(id)))
            .cloned()
            .collect();
        Ok(page.slice(entries))
    }
}
