//! Postgres-backed store.
//!
//! Stock, coupon and payment bookkeeping runs inside one transaction per
//! call. Inventory and coupon rows are read with `SELECT ... FOR UPDATE` so
//! concurrent checkouts serialize on the rows they touch; the `CHECK`
//! constraints in the schema back up the in-process invariants.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::types::Json;
use sqlx::{FromRow, PgConnection, Postgres, QueryBuilder};
use tracing::instrument;
use uuid::Uuid;

use super::{
    AuditFilter, InventoryFilter, MovementFilter, OrderFilter, OrderOutcome, OrderPlacement, Page, PageRequest,
    PaymentOutcome, ProductFilter, StatusCount, StockOutcome, StockRequest, Store, UserFilter, stock_error_at,
};
use crate::domain::aggregates::inventory::transfer;
use crate::domain::aggregates::payment::paid_total;
use crate::domain::aggregates::{
    Address, AuditEntry, Brand, Cart, CartItem, Category, Coupon, CouponRejection, Discount, InventoryMovement,
    InventoryRecord, MovementContext, Order, OrderAction, OrderItem, OrderStatus, Payment, PaymentState,
    PaymentStatus, Product, ProductImage, ProductStatus, ProductVariant, Promotion, PromotionScope, Role,
    Specification, StockChange, StockError, StockKey, StockOperation, User,
};
use crate::domain::value_objects::{Money, Sku};
use crate::error::{Error, Result};

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await?;
        Ok(Self::new(pool))
    }

    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await.map_err(|e| {
            tracing::error!(error = %e, "migration failed");
            Error::internal("run migrations")
        })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn decode<T, E: std::fmt::Display>(what: &'static str, value: std::result::Result<T, E>) -> Result<T> {
    value.map_err(|e| {
        tracing::error!(error = %e, "stored {what} is invalid");
        Error::internal(format!("decode {what}"))
    })
}

/// Maps a unique violation to a conflict with `message`.
fn unique(err: sqlx::Error, message: &str) -> Error {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => Error::conflict(message),
        _ => Error::Database(err),
    }
}

fn money(value: Decimal) -> Money {
    Money::new(value)
}

fn opt_money(value: Option<Decimal>) -> Option<Money> {
    value.map(Money::new)
}

// ---- rows ----

#[derive(FromRow)]
struct UserRow {
    id: Uuid,
    name: String,
    email: String,
    password_hash: String,
    role: String,
    is_active: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<UserRow> for User {
    type Error = Error;

    fn try_from(row: UserRow) -> Result<Self> {
        Ok(User {
            id: row.id,
            name: row.name,
            email: row.email,
            password_hash: row.password_hash,
            role: decode("user role", row.role.parse())?,
            is_active: row.is_active,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(FromRow)]
struct ProductRow {
    id: Uuid,
    sku: String,
    name: String,
    slug: String,
    description: Option<String>,
    short_description: Option<String>,
    category_id: Option<Uuid>,
    brand_id: Option<Uuid>,
    price: Decimal,
    compare_at_price: Option<Decimal>,
    cost_price: Option<Decimal>,
    status: String,
    is_featured: bool,
    weight_grams: Option<i32>,
    tags: Vec<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(FromRow)]
struct ImageRow {
    product_id: Uuid,
    url: String,
    alt_text: Option<String>,
    position: i32,
    is_primary: bool,
}

#[derive(FromRow)]
struct VariantRow {
    id: Uuid,
    product_id: Uuid,
    sku: String,
    name: String,
    options: Json<BTreeMap<String, String>>,
    price: Option<Decimal>,
    is_active: bool,
}

#[derive(FromRow)]
struct SpecificationRow {
    product_id: Uuid,
    name: String,
    value: String,
}

#[derive(FromRow)]
struct InventoryRow {
    id: Uuid,
    product_id: Uuid,
    variant_id: Option<Uuid>,
    location: String,
    on_hand: i32,
    reserved: i32,
    reorder_level: i32,
    updated_at: DateTime<Utc>,
}

impl From<InventoryRow> for InventoryRecord {
    fn from(row: InventoryRow) -> Self {
        InventoryRecord {
            id: row.id,
            product_id: row.product_id,
            variant_id: row.variant_id,
            location: row.location,
            on_hand: row.on_hand,
            reserved: row.reserved,
            reorder_level: row.reorder_level,
            updated_at: row.updated_at,
        }
    }
}

#[derive(FromRow)]
struct MovementRow {
    id: Uuid,
    inventory_id: Uuid,
    product_id: Uuid,
    variant_id: Option<Uuid>,
    location: String,
    kind: String,
    quantity: i32,
    on_hand_before: i32,
    on_hand_after: i32,
    reserved_before: i32,
    reserved_after: i32,
    reference: Option<String>,
    reason: Option<String>,
    actor_id: Option<Uuid>,
    created_at: DateTime<Utc>,
}

impl TryFrom<MovementRow> for InventoryMovement {
    type Error = Error;

    fn try_from(row: MovementRow) -> Result<Self> {
        Ok(InventoryMovement {
            id: row.id,
            inventory_id: row.inventory_id,
            product_id: row.product_id,
            variant_id: row.variant_id,
            location: row.location,
            kind: decode("movement kind", row.kind.parse())?,
            quantity: row.quantity,
            on_hand_before: row.on_hand_before,
            on_hand_after: row.on_hand_after,
            reserved_before: row.reserved_before,
            reserved_after: row.reserved_after,
            reference: row.reference,
            reason: row.reason,
            actor_id: row.actor_id,
            created_at: row.created_at,
        })
    }
}

#[derive(FromRow)]
struct CartRow {
    id: Uuid,
    user_id: Option<Uuid>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(FromRow)]
struct CartItemRow {
    product_id: Uuid,
    variant_id: Option<Uuid>,
    quantity: i32,
    unit_price: Decimal,
}

#[derive(FromRow)]
struct PromotionRow {
    id: Uuid,
    name: String,
    description: Option<String>,
    discount: Json<Discount>,
    scope: Json<PromotionScope>,
    min_order_amount: Option<Decimal>,
    starts_at: Option<DateTime<Utc>>,
    ends_at: Option<DateTime<Utc>>,
    is_active: bool,
    priority: i32,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<PromotionRow> for Promotion {
    fn from(row: PromotionRow) -> Self {
        Promotion {
            id: row.id,
            name: row.name,
            description: row.description,
            discount: row.discount.0,
            scope: row.scope.0,
            min_order_amount: opt_money(row.min_order_amount),
            starts_at: row.starts_at,
            ends_at: row.ends_at,
            is_active: row.is_active,
            priority: row.priority,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(FromRow)]
struct CouponRow {
    id: Uuid,
    code: String,
    description: Option<String>,
    discount: Json<Discount>,
    min_order_amount: Option<Decimal>,
    usage_limit: Option<i32>,
    per_customer_limit: Option<i32>,
    used_count: i32,
    starts_at: Option<DateTime<Utc>>,
    ends_at: Option<DateTime<Utc>>,
    is_active: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<CouponRow> for Coupon {
    fn from(row: CouponRow) -> Self {
        Coupon {
            id: row.id,
            code: row.code,
            description: row.description,
            discount: row.discount.0,
            min_order_amount: opt_money(row.min_order_amount),
            usage_limit: row.usage_limit,
            per_customer_limit: row.per_customer_limit,
            used_count: row.used_count,
            starts_at: row.starts_at,
            ends_at: row.ends_at,
            is_active: row.is_active,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(FromRow)]
struct OrderRow {
    id: Uuid,
    order_number: String,
    customer_id: Uuid,
    email: String,
    status: String,
    payment_status: String,
    subtotal: Decimal,
    discount_total: Decimal,
    shipping_total: Decimal,
    tax_total: Decimal,
    total: Decimal,
    coupon_code: Option<String>,
    shipping_address: Json<Address>,
    billing_address: Option<Json<Address>>,
    notes: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(FromRow)]
struct OrderItemRow {
    id: Uuid,
    order_id: Uuid,
    product_id: Uuid,
    variant_id: Option<Uuid>,
    sku: String,
    name: String,
    quantity: i32,
    unit_price: Decimal,
    discount: Decimal,
    total: Decimal,
}

impl From<OrderItemRow> for OrderItem {
    fn from(row: OrderItemRow) -> Self {
        OrderItem {
            id: row.id,
            product_id: row.product_id,
            variant_id: row.variant_id,
            sku: row.sku,
            name: row.name,
            quantity: row.quantity,
            unit_price: money(row.unit_price),
            discount: money(row.discount),
            total: money(row.total),
        }
    }
}

fn order_from_row(row: OrderRow, items: Vec<OrderItem>) -> Result<Order> {
    Ok(Order {
        id: row.id,
        order_number: row.order_number,
        customer_id: row.customer_id,
        email: row.email,
        status: decode("order status", row.status.parse())?,
        payment_status: decode("payment status", row.payment_status.parse())?,
        items,
        subtotal: money(row.subtotal),
        discount_total: money(row.discount_total),
        shipping_total: money(row.shipping_total),
        tax_total: money(row.tax_total),
        total: money(row.total),
        coupon_code: row.coupon_code,
        shipping_address: row.shipping_address.0,
        billing_address: row.billing_address.map(|a| a.0),
        notes: row.notes,
        created_at: row.created_at,
        updated_at: row.updated_at,
        events: vec![],
    })
}

#[derive(FromRow)]
struct PaymentRow {
    id: Uuid,
    order_id: Uuid,
    amount: Decimal,
    method: String,
    status: String,
    transaction_ref: Option<String>,
    created_at: DateTime<Utc>,
}

impl TryFrom<PaymentRow> for Payment {
    type Error = Error;

    fn try_from(row: PaymentRow) -> Result<Self> {
        Ok(Payment {
            id: row.id,
            order_id: row.order_id,
            amount: money(row.amount),
            method: decode("payment method", row.method.parse())?,
            status: decode("payment state", row.status.parse())?,
            transaction_ref: row.transaction_ref,
            created_at: row.created_at,
        })
    }
}

const PRODUCT_COLUMNS: &str = "id, sku, name, slug, description, short_description, category_id, brand_id, price, \
     compare_at_price, cost_price, status, is_featured, weight_grams, tags, created_at, updated_at";

const INVENTORY_COLUMNS: &str = "id, product_id, variant_id, location, on_hand, reserved, reorder_level, updated_at";

const ORDER_COLUMNS: &str = "id, order_number, customer_id, email, status, payment_status, subtotal, discount_total, \
     shipping_total, tax_total, total, coupon_code, shipping_address, billing_address, notes, created_at, updated_at";

// ---- product helpers ----

/// Loads images, variants and specifications for `rows`, preserving order.
async fn hydrate_products(conn: &mut PgConnection, rows: Vec<ProductRow>) -> Result<Vec<Product>> {
    let ids: Vec<Uuid> = rows.iter().map(|r| r.id).collect();
    let images: Vec<ImageRow> = sqlx::query_as(
        "SELECT product_id, url, alt_text, position, is_primary FROM product_images \
         WHERE product_id = ANY($1) ORDER BY position",
    )
    .bind(&ids)
    .fetch_all(&mut *conn)
    .await?;
    let variants: Vec<VariantRow> = sqlx::query_as(
        "SELECT id, product_id, sku, name, options, price, is_active FROM product_variants \
         WHERE product_id = ANY($1) ORDER BY sku",
    )
    .bind(&ids)
    .fetch_all(&mut *conn)
    .await?;
    let specifications: Vec<SpecificationRow> = sqlx::query_as(
        "SELECT product_id, name, value FROM product_specifications \
         WHERE product_id = ANY($1) ORDER BY position",
    )
    .bind(&ids)
    .fetch_all(&mut *conn)
    .await?;

    let mut image_map: HashMap<Uuid, Vec<ProductImage>> = HashMap::new();
    for row in images {
        image_map.entry(row.product_id).or_default().push(ProductImage {
            url: row.url,
            alt_text: row.alt_text,
            position: row.position,
            is_primary: row.is_primary,
        });
    }
    let mut variant_map: HashMap<Uuid, Vec<ProductVariant>> = HashMap::new();
    for row in variants {
        variant_map.entry(row.product_id).or_default().push(ProductVariant {
            id: row.id,
            sku: decode("variant sku", Sku::new(row.sku))?,
            name: row.name,
            options: row.options.0,
            price: opt_money(row.price),
            is_active: row.is_active,
        });
    }
    let mut spec_map: HashMap<Uuid, Vec<Specification>> = HashMap::new();
    for row in specifications {
        spec_map.entry(row.product_id).or_default().push(Specification {
            name: row.name,
            value: row.value,
        });
    }

    rows.into_iter()
        .map(|row| {
            Ok(Product {
                id: row.id,
                sku: decode("product sku", Sku::new(row.sku))?,
                name: row.name,
                slug: row.slug,
                description: row.description,
                short_description: row.short_description,
                category_id: row.category_id,
                brand_id: row.brand_id,
                price: money(row.price),
                compare_at_price: opt_money(row.compare_at_price),
                cost_price: opt_money(row.cost_price),
                status: decode("product status", row.status.parse())?,
                is_featured: row.is_featured,
                weight_grams: row.weight_grams,
                tags: row.tags,
                images: image_map.remove(&row.id).unwrap_or_default(),
                variants: variant_map.remove(&row.id).unwrap_or_default(),
                specifications: spec_map.remove(&row.id).unwrap_or_default(),
                created_at: row.created_at,
                updated_at: row.updated_at,
            })
        })
        .collect()
}

/// Writes the product row and replaces its children.
async fn write_product(conn: &mut PgConnection, product: &Product) -> Result<()> {
    sqlx::query(
        "INSERT INTO products (id, sku, name, slug, description, short_description, category_id, brand_id, price, \
             compare_at_price, cost_price, status, is_featured, weight_grams, tags, created_at, updated_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17) \
         ON CONFLICT (id) DO UPDATE SET sku = EXCLUDED.sku, name = EXCLUDED.name, slug = EXCLUDED.slug, \
             description = EXCLUDED.description, short_description = EXCLUDED.short_description, \
             category_id = EXCLUDED.category_id, brand_id = EXCLUDED.brand_id, price = EXCLUDED.price, \
             compare_at_price = EXCLUDED.compare_at_price, cost_price = EXCLUDED.cost_price, \
             status = EXCLUDED.status, is_featured = EXCLUDED.is_featured, \
             weight_grams = EXCLUDED.weight_grams, tags = EXCLUDED.tags, updated_at = EXCLUDED.updated_at",
    )
    .bind(product.id)
    .bind(product.sku.as_str())
    .bind(&product.name)
    .bind(&product.slug)
    .bind(&product.description)
    .bind(&product.short_description)
    .bind(product.category_id)
    .bind(product.brand_id)
    .bind(product.price.amount())
    .bind(product.compare_at_price.map(|m| m.amount()))
    .bind(product.cost_price.map(|m| m.amount()))
    .bind(product.status.as_str())
    .bind(product.is_featured)
    .bind(product.weight_grams)
    .bind(&product.tags)
    .bind(product.created_at)
    .bind(product.updated_at)
    .execute(&mut *conn)
    .await
    .map_err(|e| unique(e, "The sku or slug has already been taken."))?;

    sqlx::query("DELETE FROM product_skus WHERE product_id = $1")
        .bind(product.id)
        .execute(&mut *conn)
        .await?;
    for sku in product.all_skus() {
        sqlx::query("INSERT INTO product_skus (sku, product_id) VALUES ($1, $2)")
            .bind(sku.as_str())
            .bind(product.id)
            .execute(&mut *conn)
            .await
            .map_err(|e| unique(e, &format!("The SKU {sku} has already been taken.")))?;
    }

    let variant_ids: Vec<Uuid> = product.variants.iter().map(|v| v.id).collect();
    sqlx::query("DELETE FROM product_variants WHERE product_id = $1 AND NOT (id = ANY($2))")
        .bind(product.id)
        .bind(&variant_ids)
        .execute(&mut *conn)
        .await?;
    for variant in &product.variants {
        sqlx::query(
            "INSERT INTO product_variants (id, product_id, sku, name, options, price, is_active) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) \
             ON CONFLICT (id) DO UPDATE SET sku = EXCLUDED.sku, name = EXCLUDED.name, \
                 options = EXCLUDED.options, price = EXCLUDED.price, is_active = EXCLUDED.is_active",
        )
        .bind(variant.id)
        .bind(product.id)
        .bind(variant.sku.as_str())
        .bind(&variant.name)
        .bind(Json(&variant.options))
        .bind(variant.price.map(|m| m.amount()))
        .bind(variant.is_active)
        .execute(&mut *conn)
        .await
        .map_err(|e| unique(e, &format!("The SKU {} has already been taken.", variant.sku)))?;
    }

    sqlx::query("DELETE FROM product_images WHERE product_id = $1")
        .bind(product.id)
        .execute(&mut *conn)
        .await?;
    for image in &product.images {
        sqlx::query(
            "INSERT INTO product_images (id, product_id, url, alt_text, position, is_primary) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(Uuid::now_v7())
        .bind(product.id)
        .bind(&image.url)
        .bind(&image.alt_text)
        .bind(image.position)
        .bind(image.is_primary)
        .execute(&mut *conn)
        .await?;
    }

    sqlx::query("DELETE FROM product_specifications WHERE product_id = $1")
        .bind(product.id)
        .execute(&mut *conn)
        .await?;
    for (position, spec) in product.specifications.iter().enumerate() {
        sqlx::query(
            "INSERT INTO product_specifications (id, product_id, name, value, position) VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(Uuid::now_v7())
        .bind(product.id)
        .bind(&spec.name)
        .bind(&spec.value)
        .bind(position as i32)
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

fn push_product_filters(qb: &mut QueryBuilder<'_, Postgres>, filter: &ProductFilter) {
    qb.push(" WHERE TRUE");
    if let Some(search) = &filter.search {
        let pattern = format!("%{}%", search.replace('%', "\\%").replace('_', "\\_"));
        qb.push(" AND (name ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR sku ILIKE ")
            .push_bind(pattern)
            .push(")");
    }
    if let Some(ids) = &filter.category_ids {
        qb.push(" AND category_id = ANY(").push_bind(ids.clone()).push(")");
    }
    if !filter.hidden_category_ids.is_empty() {
        qb.push(" AND (category_id IS NULL OR NOT (category_id = ANY(")
            .push_bind(filter.hidden_category_ids.clone())
            .push(")))");
    }
    if let Some(brand_id) = filter.brand_id {
        qb.push(" AND brand_id = ").push_bind(brand_id);
    }
    if let Some(status) = filter.status {
        qb.push(" AND status = ").push_bind(status.as_str());
    }
    if let Some(featured) = filter.featured {
        qb.push(" AND is_featured = ").push_bind(featured);
    }
    if let Some(min) = filter.min_price {
        qb.push(" AND price >= ").push_bind(min.amount());
    }
    if let Some(max) = filter.max_price {
        qb.push(" AND price <= ").push_bind(max.amount());
    }
}

// ---- inventory helpers ----

async fn lock_record(conn: &mut PgConnection, key: &StockKey) -> Result<Option<InventoryRecord>> {
    let row: Option<InventoryRow> = sqlx::query_as(&format!(
        "SELECT {INVENTORY_COLUMNS} FROM inventory \
         WHERE product_id = $1 AND variant_id IS NOT DISTINCT FROM $2 AND location = $3 FOR UPDATE"
    ))
    .bind(key.product_id)
    .bind(key.variant_id)
    .bind(&key.location)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(row.map(InventoryRecord::from))
}

async fn write_record(conn: &mut PgConnection, record: &InventoryRecord) -> Result<()> {
    sqlx::query(
        "INSERT INTO inventory (id, product_id, variant_id, location, on_hand, reserved, reorder_level, updated_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
         ON CONFLICT (id) DO UPDATE SET on_hand = EXCLUDED.on_hand, reserved = EXCLUDED.reserved, \
             reorder_level = EXCLUDED.reorder_level, updated_at = EXCLUDED.updated_at",
    )
    .bind(record.id)
    .bind(record.product_id)
    .bind(record.variant_id)
    .bind(&record.location)
    .bind(record.on_hand)
    .bind(record.reserved)
    .bind(record.reorder_level)
    .bind(record.updated_at)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

async fn write_movement(conn: &mut PgConnection, movement: &InventoryMovement) -> Result<()> {
    sqlx::query(
        "INSERT INTO inventory_movements (id, inventory_id, product_id, variant_id, location, kind, quantity, \
             on_hand_before, on_hand_after, reserved_before, reserved_after, reference, reason, actor_id, created_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)",
    )
    .bind(movement.id)
    .bind(movement.inventory_id)
    .bind(movement.product_id)
    .bind(movement.variant_id)
    .bind(&movement.location)
    .bind(movement.kind.as_str())
    .bind(movement.quantity)
    .bind(movement.on_hand_before)
    .bind(movement.on_hand_after)
    .bind(movement.reserved_before)
    .bind(movement.reserved_after)
    .bind(&movement.reference)
    .bind(&movement.reason)
    .bind(movement.actor_id)
    .bind(movement.created_at)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Locked records changed within one transaction.
#[derive(Default)]
struct StockScratch {
    touched: HashMap<StockKey, InventoryRecord>,
    outcome: StockOutcome,
}

impl StockScratch {
    async fn record(&mut self, conn: &mut PgConnection, key: &StockKey) -> Result<InventoryRecord> {
        if let Some(record) = self.touched.get(key) {
            return Ok(record.clone());
        }
        Ok(lock_record(conn, key)
            .await?
            .unwrap_or_else(|| InventoryRecord::new(key)))
    }

    async fn change(
        &mut self,
        conn: &mut PgConnection,
        key: &StockKey,
        change: StockChange,
        ctx: &MovementContext,
    ) -> Result<std::result::Result<(), StockError>> {
        let mut record = self.record(conn, key).await?;
        match record.apply(change, ctx) {
            Ok(movement) => {
                self.outcome.movements.push(movement);
                self.touched.insert(key.clone(), record);
                Ok(Ok(()))
            }
            Err(e) => Ok(Err(e)),
        }
    }

    async fn finish(mut self, conn: &mut PgConnection) -> Result<StockOutcome> {
        for record in self.touched.values() {
            write_record(conn, record).await?;
        }
        for movement in &self.outcome.movements {
            write_movement(conn, movement).await?;
        }
        self.outcome.records = self.touched.into_values().collect();
        Ok(self.outcome)
    }
}

// ---- order helpers ----

async fn load_orders(conn: &mut PgConnection, rows: Vec<OrderRow>) -> Result<Vec<Order>> {
    let ids: Vec<Uuid> = rows.iter().map(|r| r.id).collect();
    let items: Vec<OrderItemRow> = sqlx::query_as(
        "SELECT id, order_id, product_id, variant_id, sku, name, quantity, unit_price, discount, total \
         FROM order_items WHERE order_id = ANY($1) ORDER BY position",
    )
    .bind(&ids)
    .fetch_all(&mut *conn)
    .await?;
    let mut by_order: HashMap<Uuid, Vec<OrderItem>> = HashMap::new();
    for item in items {
        by_order.entry(item.order_id).or_default().push(item.into());
    }
    rows.into_iter()
        .map(|row| {
            let items = by_order.remove(&row.id).unwrap_or_default();
            order_from_row(row, items)
        })
        .collect()
}

async fn lock_order(conn: &mut PgConnection, id: Uuid) -> Result<Order> {
    let row: OrderRow = sqlx::query_as(&format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1 FOR UPDATE"))
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or(Error::not_found("Order"))?;
    load_orders(conn, vec![row])
        .await?
        .pop()
        .ok_or(Error::not_found("Order"))
}

async fn write_order_status(conn: &mut PgConnection, order: &Order) -> Result<()> {
    sqlx::query("UPDATE orders SET status = $2, payment_status = $3, updated_at = $4 WHERE id = $1")
        .bind(order.id)
        .bind(order.status.as_str())
        .bind(order.payment_status.as_str())
        .bind(order.updated_at)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

async fn order_payments(conn: &mut PgConnection, order_id: Uuid) -> Result<Vec<Payment>> {
    let rows: Vec<PaymentRow> = sqlx::query_as(
        "SELECT id, order_id, amount, method, status, transaction_ref, created_at FROM payments \
         WHERE order_id = $1 ORDER BY created_at",
    )
    .bind(order_id)
    .fetch_all(&mut *conn)
    .await?;
    rows.into_iter().map(Payment::try_from).collect()
}

fn status_counts<S: Copy + std::str::FromStr + PartialEq>(all: &[S], rows: Vec<(String, i64)>) -> Vec<StatusCount<S>> {
    let parsed: Vec<(S, i64)> = rows
        .into_iter()
        .filter_map(|(status, count)| status.parse().ok().map(|s| (s, count)))
        .collect();
    all.iter()
        .map(|status| StatusCount {
            status: *status,
            count: parsed
                .iter()
                .find(|(s, _)| s == status)
                .map_or(0, |(_, c)| *c),
        })
        .collect()
}

#[async_trait]
impl Store for PgStore {
    async fn create_user(&self, user: &User) -> Result<()> {
        sqlx::query(
            "INSERT INTO users (id, name, email, password_hash, role, is_active, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(user.id)
        .bind(&user.name)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(user.role.as_str())
        .bind(user.is_active)
        .bind(user.created_at)
        .bind(user.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| unique(e, "The email has already been taken."))?;
        Ok(())
    }

    async fn update_user(&self, user: &User) -> Result<()> {
        let result = sqlx::query(
            "UPDATE users SET name = $2, email = $3, password_hash = $4, role = $5, is_active = $6, updated_at = $7 \
             WHERE id = $1",
        )
        .bind(user.id)
        .bind(&user.name)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(user.role.as_str())
        .bind(user.is_active)
        .bind(user.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| unique(e, "The email has already been taken."))?;
        if result.rows_affected() == 0 {
            return Err(Error::not_found("User"));
        }
        Ok(())
    }

    async fn find_user(&self, id: Uuid) -> Result<Option<User>> {
        let row: Option<UserRow> = sqlx::query_as("SELECT * FROM users WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(User::try_from).transpose()
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>> {
        let row: Option<UserRow> = sqlx::query_as("SELECT * FROM users WHERE email = $1")
            .bind(email)
            .fetch_optional(&self.pool)
            .await?;
        row.map(User::try_from).transpose()
    }

    async fn list_users(&self, filter: &UserFilter, page: PageRequest) -> Result<Page<User>> {
        let build = |select: &str| {
            let mut qb = QueryBuilder::<Postgres>::new(select);
            qb.push(" WHERE TRUE");
            if let Some(role) = filter.role {
                qb.push(" AND role = ").push_bind(role.as_str());
            }
            if let Some(search) = &filter.search {
                let pattern = format!("%{}%", search.to_lowercase());
                qb.push(" AND (email LIKE ")
                    .push_bind(pattern.clone())
                    .push(" OR LOWER(name) LIKE ")
                    .push_bind(pattern)
                    .push(")");
            }
            qb
        };
        let total: i64 = build("SELECT COUNT(*) FROM users")
            .build_query_scalar()
            .fetch_one(&self.pool)
            .await?;
        let mut qb = build("SELECT * FROM users");
        qb.push(" ORDER BY created_at DESC LIMIT ")
            .push_bind(page.limit())
            .push(" OFFSET ")
            .push_bind(page.offset());
        let rows: Vec<UserRow> = qb.build_query_as().fetch_all(&self.pool).await?;
        let data = rows.into_iter().map(User::try_from).collect::<Result<Vec<_>>>()?;
        Ok(Page {
            data,
            total,
            page: page.page,
            per_page: page.per_page,
        })
    }

    async fn count_users(&self, role: Role) -> Result<i64> {
        Ok(sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE role = $1")
            .bind(role.as_str())
            .fetch_one(&self.pool)
            .await?)
    }

    async fn create_brand(&self, brand: &Brand) -> Result<()> {
        sqlx::query(
            "INSERT INTO brands (id, name, slug, description, logo_url, website, is_active, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(brand.id)
        .bind(&brand.name)
        .bind(&brand.slug)
        .bind(&brand.description)
        .bind(&brand.logo_url)
        .bind(&brand.website)
        .bind(brand.is_active)
        .bind(brand.created_at)
        .bind(brand.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| unique(e, "The brand name or slug has already been taken."))?;
        Ok(())
    }

    async fn update_brand(&self, brand: &Brand) -> Result<()> {
        let result = sqlx::query(
            "UPDATE brands SET name = $2, slug = $3, description = $4, logo_url = $5, website = $6, \
                 is_active = $7, updated_at = $8 WHERE id = $1",
        )
        .bind(brand.id)
        .bind(&brand.name)
        .bind(&brand.slug)
        .bind(&brand.description)
        .bind(&brand.logo_url)
        .bind(&brand.website)
        .bind(brand.is_active)
        .bind(brand.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| unique(e, "The brand name or slug has already been taken."))?;
        if result.rows_affected() == 0 {
            return Err(Error::not_found("Brand"));
        }
        Ok(())
    }

    async fn find_brand(&self, id: Uuid) -> Result<Option<Brand>> {
        Ok(sqlx::query_as("SELECT * FROM brands WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn find_brand_by_slug(&self, slug: &str) -> Result<Option<Brand>> {
        Ok(sqlx::query_as("SELECT * FROM brands WHERE slug = $1")
            .bind(slug)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn find_brand_by_name(&self, name: &str) -> Result<Option<Brand>> {
        Ok(sqlx::query_as("SELECT * FROM brands WHERE LOWER(name) = LOWER($1)")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn list_brands(&self, active_only: bool) -> Result<Vec<Brand>> {
        Ok(
            sqlx::query_as("SELECT * FROM brands WHERE ($1 = FALSE OR is_active) ORDER BY name")
                .bind(active_only)
                .fetch_all(&self.pool)
                .await?,
        )
    }

    async fn delete_brand(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM brands WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn create_category(&self, category: &Category) -> Result<()> {
        sqlx::query(
            "INSERT INTO categories (id, name, slug, description, parent_id, is_active, sort_order, created_at, \
                 updated_at) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(category.id)
        .bind(&category.name)
        .bind(&category.slug)
        .bind(&category.description)
        .bind(category.parent_id)
        .bind(category.is_active)
        .bind(category.sort_order)
        .bind(category.created_at)
        .bind(category.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| unique(e, "The slug has already been taken."))?;
        Ok(())
    }

    async fn update_category(&self, category: &Category) -> Result<()> {
        let result = sqlx::query(
            "UPDATE categories SET name = $2, slug = $3, description = $4, parent_id = $5, is_active = $6, \
                 sort_order = $7, updated_at = $8 WHERE id = $1",
        )
        .bind(category.id)
        .bind(&category.name)
        .bind(&category.slug)
        .bind(&category.description)
        .bind(category.parent_id)
        .bind(category.is_active)
        .bind(category.sort_order)
        .bind(category.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| unique(e, "The slug has already been taken."))?;
        if result.rows_affected() == 0 {
            return Err(Error::not_found("Category"));
        }
        Ok(())
    }

    async fn find_category(&self, id: Uuid) -> Result<Option<Category>> {
        Ok(sqlx::query_as("SELECT * FROM categories WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn find_category_by_slug(&self, slug: &str) -> Result<Option<Category>> {
        Ok(sqlx::query_as("SELECT * FROM categories WHERE slug = $1")
            .bind(slug)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn list_categories(&self) -> Result<Vec<Category>> {
        Ok(sqlx::query_as("SELECT * FROM categories ORDER BY sort_order, name")
            .fetch_all(&self.pool)
            .await?)
    }

    async fn delete_category(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM categories WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn create_product(&self, product: &Product) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        write_product(&mut tx, product).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn update_product(&self, product: &Product) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        let exists: Option<Uuid> = sqlx::query_scalar("SELECT id FROM products WHERE id = $1 FOR UPDATE")
            .bind(product.id)
            .fetch_optional(&mut *tx)
            .await?;
        if exists.is_none() {
            return Err(Error::not_found("Product"));
        }
        write_product(&mut tx, product).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn find_product(&self, id: Uuid) -> Result<Option<Product>> {
        let mut conn = self.pool.acquire().await?;
        let rows: Vec<ProductRow> = sqlx::query_as(&format!("SELECT {PRODUCT_COLUMNS} FROM products WHERE id = $1"))
            .bind(id)
            .fetch_all(&mut *conn)
            .await?;
        Ok(hydrate_products(&mut conn, rows).await?.pop())
    }

    async fn find_product_by_slug(&self, slug: &str) -> Result<Option<Product>> {
        let mut conn = self.pool.acquire().await?;
        let rows: Vec<ProductRow> =
            sqlx::query_as(&format!("SELECT {PRODUCT_COLUMNS} FROM products WHERE slug = $1"))
                .bind(slug)
                .fetch_all(&mut *conn)
                .await?;
        Ok(hydrate_products(&mut conn, rows).await?.pop())
    }

    async fn sku_owner(&self, sku: &str) -> Result<Option<Uuid>> {
        Ok(sqlx::query_scalar("SELECT product_id FROM product_skus WHERE sku = $1")
            .bind(sku)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn find_products(&self, ids: &[Uuid]) -> Result<Vec<Product>> {
        let mut conn = self.pool.acquire().await?;
        let rows: Vec<ProductRow> =
            sqlx::query_as(&format!("SELECT {PRODUCT_COLUMNS} FROM products WHERE id = ANY($1)"))
                .bind(ids)
                .fetch_all(&mut *conn)
                .await?;
        let mut products = hydrate_products(&mut conn, rows).await?;
        products.sort_by_key(|p| ids.iter().position(|id| *id == p.id));
        Ok(products)
    }

    async fn list_products(&self, filter: &ProductFilter, page: PageRequest) -> Result<Page<Product>> {
        let mut conn = self.pool.acquire().await?;
        let mut count = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM products");
        push_product_filters(&mut count, filter);
        let total: i64 = count.build_query_scalar().fetch_one(&mut *conn).await?;

        let mut qb = QueryBuilder::<Postgres>::new(format!("SELECT {PRODUCT_COLUMNS} FROM products"));
        push_product_filters(&mut qb, filter);
        qb.push(" ORDER BY created_at DESC LIMIT ")
            .push_bind(page.limit())
            .push(" OFFSET ")
            .push_bind(page.offset());
        let rows: Vec<ProductRow> = qb.build_query_as().fetch_all(&mut *conn).await?;
        Ok(Page {
            data: hydrate_products(&mut conn, rows).await?,
            total,
            page: page.page,
            per_page: page.per_page,
        })
    }

    async fn products_in_categories(&self, category_ids: &[Uuid]) -> Result<Vec<Product>> {
        let mut conn = self.pool.acquire().await?;
        let rows: Vec<ProductRow> =
            sqlx::query_as(&format!("SELECT {PRODUCT_COLUMNS} FROM products WHERE category_id = ANY($1)"))
                .bind(category_ids)
                .fetch_all(&mut *conn)
                .await?;
        hydrate_products(&mut conn, rows).await
    }

    #[instrument(skip(self, products), fields(count = products.len()))]
    async fn update_prices(&self, products: &[Product]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for product in products {
            let result = sqlx::query(
                "UPDATE products SET price = $2, compare_at_price = $3, updated_at = $4 WHERE id = $1",
            )
            .bind(product.id)
            .bind(product.price.amount())
            .bind(product.compare_at_price.map(|m| m.amount()))
            .bind(product.updated_at)
            .execute(&mut *tx)
            .await?;
            if result.rows_affected() == 0 {
                return Err(Error::not_found("Product"));
            }
        }
        tx.commit().await?;
        Ok(())
    }

    async fn delete_product(&self, id: Uuid) -> Result<bool> {
        let mut tx = self.pool.begin().await?;
        let ordered: bool = sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM order_items WHERE product_id = $1)")
            .bind(id)
            .fetch_one(&mut *tx)
            .await?;
        if ordered {
            return Err(Error::conflict("The product appears on orders and cannot be deleted."));
        }
        let result = sqlx::query("DELETE FROM products WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }

    async fn count_products_by_status(&self) -> Result<Vec<StatusCount<ProductStatus>>> {
        let rows: Vec<(String, i64)> = sqlx::query_as("SELECT status, COUNT(*) FROM products GROUP BY status")
            .fetch_all(&self.pool)
            .await?;
        Ok(status_counts(ProductStatus::ALL, rows))
    }

    async fn find_inventory(&self, key: &StockKey) -> Result<Option<InventoryRecord>> {
        let row: Option<InventoryRow> = sqlx::query_as(&format!(
            "SELECT {INVENTORY_COLUMNS} FROM inventory \
             WHERE product_id = $1 AND variant_id IS NOT DISTINCT FROM $2 AND location = $3"
        ))
        .bind(key.product_id)
        .bind(key.variant_id)
        .bind(&key.location)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(InventoryRecord::from))
    }

    async fn list_inventory(&self, filter: &InventoryFilter, page: PageRequest) -> Result<Page<InventoryRecord>> {
        let build = |select: String| {
            let mut qb = QueryBuilder::<Postgres>::new(select);
            qb.push(" WHERE TRUE");
            if let Some(product_id) = filter.product_id {
                qb.push(" AND product_id = ").push_bind(product_id);
            }
            if let Some(location) = &filter.location {
                qb.push(" AND location = ").push_bind(location.clone());
            }
            if filter.low_stock_only {
                qb.push(" AND on_hand - reserved <= reorder_level");
            }
            qb
        };
        let total: i64 = build("SELECT COUNT(*) FROM inventory".to_string())
            .build_query_scalar()
            .fetch_one(&self.pool)
            .await?;
        let mut qb = build(format!("SELECT {INVENTORY_COLUMNS} FROM inventory"));
        qb.push(" ORDER BY on_hand - reserved, location, id LIMIT ")
            .push_bind(page.limit())
            .push(" OFFSET ")
            .push_bind(page.offset());
        let rows: Vec<InventoryRow> = qb.build_query_as().fetch_all(&self.pool).await?;
        Ok(Page {
            data: rows.into_iter().map(InventoryRecord::from).collect(),
            total,
            page: page.page,
            per_page: page.per_page,
        })
    }

    #[instrument(skip(self, request), fields(product_id = %request.key.product_id, location = %request.key.location))]
    async fn apply_stock(&self, request: StockRequest) -> Result<StockOutcome> {
        let mut tx = self.pool.begin().await?;
        let mut scratch = StockScratch::default();
        match &request.operation {
            StockOperation::Transfer { quantity, to_location } => {
                let to_key = request.key.at(to_location.clone());
                // Lock in a stable order so opposite transfers cannot deadlock.
                let (mut from, mut to) = if request.key.location <= to_key.location {
                    let from = scratch.record(&mut tx, &request.key).await?;
                    let to = scratch.record(&mut tx, &to_key).await?;
                    (from, to)
                } else {
                    let to = scratch.record(&mut tx, &to_key).await?;
                    let from = scratch.record(&mut tx, &request.key).await?;
                    (from, to)
                };
                let movements = transfer(&mut from, &mut to, *quantity, &request.context)?;
                scratch.outcome.movements.extend(movements);
                scratch.touched.insert(request.key.clone(), from);
                scratch.touched.insert(to_key, to);
            }
            op => scratch
                .change(&mut tx, &request.key, op.source_change(), &request.context)
                .await??,
        }
        let outcome = scratch.finish(&mut tx).await?;
        tx.commit().await?;
        Ok(outcome)
    }

    async fn set_reorder_level(&self, key: &StockKey, level: i32) -> Result<InventoryRecord> {
        let mut tx = self.pool.begin().await?;
        let mut record = lock_record(&mut tx, key)
            .await?
            .unwrap_or_else(|| InventoryRecord::new(key));
        record.reorder_level = level;
        record.updated_at = Utc::now();
        write_record(&mut tx, &record).await?;
        tx.commit().await?;
        Ok(record)
    }

    async fn list_movements(&self, filter: &MovementFilter, page: PageRequest) -> Result<Page<InventoryMovement>> {
        let build = |select: &str| {
            let mut qb = QueryBuilder::<Postgres>::new(select);
            qb.push(" WHERE TRUE");
            if let Some(product_id) = filter.product_id {
                qb.push(" AND product_id = ").push_bind(product_id);
            }
            if let Some(location) = &filter.location {
                qb.push(" AND location = ").push_bind(location.clone());
            }
            if let Some(kind) = filter.kind {
                qb.push(" AND kind = ").push_bind(kind.as_str());
            }
            qb
        };
        let total: i64 = build("SELECT COUNT(*) FROM inventory_movements")
            .build_query_scalar()
            .fetch_one(&self.pool)
            .await?;
        let mut qb = build("SELECT * FROM inventory_movements");
        qb.push(" ORDER BY created_at DESC, id DESC LIMIT ")
            .push_bind(page.limit())
            .push(" OFFSET ")
            .push_bind(page.offset());
        let rows: Vec<MovementRow> = qb.build_query_as().fetch_all(&self.pool).await?;
        Ok(Page {
            data: rows
                .into_iter()
                .map(InventoryMovement::try_from)
                .collect::<Result<Vec<_>>>()?,
            total,
            page: page.page,
            per_page: page.per_page,
        })
    }

    async fn save_cart(&self, cart: &Cart) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "INSERT INTO carts (id, user_id, created_at, updated_at) VALUES ($1, $2, $3, $4) \
             ON CONFLICT (id) DO UPDATE SET user_id = EXCLUDED.user_id, updated_at = EXCLUDED.updated_at",
        )
        .bind(cart.id)
        .bind(cart.user_id)
        .bind(cart.created_at)
        .bind(cart.updated_at)
        .execute(&mut *tx)
        .await?;
        sqlx::query("DELETE FROM cart_items WHERE cart_id = $1")
            .bind(cart.id)
            .execute(&mut *tx)
            .await?;
        for (position, item) in cart.items.iter().enumerate() {
            sqlx::query(
                "INSERT INTO cart_items (cart_id, position, product_id, variant_id, quantity, unit_price) \
                 VALUES ($1, $2, $3, $4, $5, $6)",
            )
            .bind(cart.id)
            .bind(position as i32)
            .bind(item.product_id)
            .bind(item.variant_id)
            .bind(item.quantity)
            .bind(item.unit_price.amount())
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn find_cart(&self, id: Uuid) -> Result<Option<Cart>> {
        let Some(row) = sqlx::query_as::<_, CartRow>("SELECT id, user_id, created_at, updated_at FROM carts WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
        else {
            return Ok(None);
        };
        let items: Vec<CartItemRow> = sqlx::query_as(
            "SELECT product_id, variant_id, quantity, unit_price FROM cart_items WHERE cart_id = $1 ORDER BY position",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;
        Ok(Some(Cart {
            id: row.id,
            user_id: row.user_id,
            items: items
                .into_iter()
                .map(|i| CartItem {
                    product_id: i.product_id,
                    variant_id: i.variant_id,
                    quantity: i.quantity,
                    unit_price: money(i.unit_price),
                })
                .collect(),
            created_at: row.created_at,
            updated_at: row.updated_at,
        }))
    }

    async fn delete_cart(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM carts WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn create_promotion(&self, promotion: &Promotion) -> Result<()> {
        sqlx::query(
            "INSERT INTO promotions (id, name, description, discount, scope, min_order_amount, starts_at, ends_at, \
                 is_active, priority, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)",
        )
        .bind(promotion.id)
        .bind(&promotion.name)
        .bind(&promotion.description)
        .bind(Json(&promotion.discount))
        .bind(Json(&promotion.scope))
        .bind(promotion.min_order_amount.map(|m| m.amount()))
        .bind(promotion.starts_at)
        .bind(promotion.ends_at)
        .bind(promotion.is_active)
        .bind(promotion.priority)
        .bind(promotion.created_at)
        .bind(promotion.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_promotion(&self, promotion: &Promotion) -> Result<()> {
        let result = sqlx::query(
            "UPDATE promotions SET name = $2, description = $3, discount = $4, scope = $5, min_order_amount = $6, \
                 starts_at = $7, ends_at = $8, is_active = $9, priority = $10, updated_at = $11 WHERE id = $1",
        )
        .bind(promotion.id)
        .bind(&promotion.name)
        .bind(&promotion.description)
        .bind(Json(&promotion.discount))
        .bind(Json(&promotion.scope))
        .bind(promotion.min_order_amount.map(|m| m.amount()))
        .bind(promotion.starts_at)
        .bind(promotion.ends_at)
        .bind(promotion.is_active)
        .bind(promotion.priority)
        .bind(promotion.updated_at)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(Error::not_found("Promotion"));
        }
        Ok(())
    }

    async fn find_promotion(&self, id: Uuid) -> Result<Option<Promotion>> {
        let row: Option<PromotionRow> = sqlx::query_as("SELECT * FROM promotions WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Promotion::from))
    }

    async fn list_promotions(&self) -> Result<Vec<Promotion>> {
        let rows: Vec<PromotionRow> = sqlx::query_as("SELECT * FROM promotions ORDER BY priority DESC, name")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(Promotion::from).collect())
    }

    async fn delete_promotion(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM promotions WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn create_coupon(&self, coupon: &Coupon) -> Result<()> {
        sqlx::query(
            "INSERT INTO coupons (id, code, description, discount, min_order_amount, usage_limit, \
                 per_customer_limit, used_count, starts_at, ends_at, is_active, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)",
        )
        .bind(coupon.id)
        .bind(&coupon.code)
        .bind(&coupon.description)
        .bind(Json(&coupon.discount))
        .bind(coupon.min_order_amount.map(|m| m.amount()))
        .bind(coupon.usage_limit)
        .bind(coupon.per_customer_limit)
        .bind(coupon.used_count)
        .bind(coupon.starts_at)
        .bind(coupon.ends_at)
        .bind(coupon.is_active)
        .bind(coupon.created_at)
        .bind(coupon.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| unique(e, "The code has already been taken."))?;
        Ok(())
    }

    async fn update_coupon(&self, coupon: &Coupon) -> Result<()> {
        let result = sqlx::query(
            "UPDATE coupons SET code = $2, description = $3, discount = $4, min_order_amount = $5, \
                 usage_limit = $6, per_customer_limit = $7, starts_at = $8, ends_at = $9, is_active = $10, \
                 updated_at = $11 WHERE id = $1",
        )
        .bind(coupon.id)
        .bind(&coupon.code)
        .bind(&coupon.description)
        .bind(Json(&coupon.discount))
        .bind(coupon.min_order_amount.map(|m| m.amount()))
        .bind(coupon.usage_limit)
        .bind(coupon.per_customer_limit)
        .bind(coupon.starts_at)
        .bind(coupon.ends_at)
        .bind(coupon.is_active)
        .bind(coupon.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| unique(e, "The code has already been taken."))?;
        if result.rows_affected() == 0 {
            return Err(Error::not_found("Coupon"));
        }
        Ok(())
    }

    async fn find_coupon(&self, id: Uuid) -> Result<Option<Coupon>> {
        let row: Option<CouponRow> = sqlx::query_as("SELECT * FROM coupons WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Coupon::from))
    }

    async fn find_coupon_by_code(&self, code: &str) -> Result<Option<Coupon>> {
        let row: Option<CouponRow> = sqlx::query_as("SELECT * FROM coupons WHERE code = $1")
            .bind(code)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Coupon::from))
    }

    async fn list_coupons(&self) -> Result<Vec<Coupon>> {
        let rows: Vec<CouponRow> = sqlx::query_as("SELECT * FROM coupons ORDER BY code")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(Coupon::from).collect())
    }

    async fn delete_coupon(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM coupons WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn count_coupon_usage(&self, coupon_id: Uuid, user_id: Uuid) -> Result<i64> {
        Ok(
            sqlx::query_scalar("SELECT COUNT(*) FROM coupon_usage WHERE coupon_id = $1 AND user_id = $2")
                .bind(coupon_id)
                .bind(user_id)
                .fetch_one(&self.pool)
                .await?,
        )
    }

    #[instrument(skip(self, placement), fields(order_number = %placement.order.order_number))]
    async fn place_order(&self, placement: OrderPlacement) -> Result<OrderOutcome> {
        let order = placement.order;
        let mut tx = self.pool.begin().await?;

        let mut scratch = StockScratch::default();
        let ctx = MovementContext::for_order(&order.order_number, Some(order.customer_id));
        // Lock rows in key order so concurrent checkouts cannot deadlock.
        let mut lines: Vec<(usize, StockKey, i32)> = order
            .items
            .iter()
            .enumerate()
            .map(|(i, item)| (i, StockKey::main(item.product_id, item.variant_id), item.quantity))
            .collect();
        lines.sort_by(|a, b| (a.1.product_id, a.1.variant_id).cmp(&(b.1.product_id, b.1.variant_id)));
        for (index, key, quantity) in lines {
            if let Err(e) = scratch
                .change(&mut tx, &key, StockChange::Reserve(quantity), &ctx)
                .await?
            {
                return Err(stock_error_at(index, e));
            }
        }

        if let Some(redemption) = &placement.coupon {
            let row: CouponRow = sqlx::query_as("SELECT * FROM coupons WHERE id = $1 FOR UPDATE")
                .bind(redemption.coupon_id)
                .fetch_optional(&mut *tx)
                .await?
                .ok_or(CouponRejection::Unknown)?;
            let coupon = Coupon::from(row);
            let uses: i64 =
                sqlx::query_scalar("SELECT COUNT(*) FROM coupon_usage WHERE coupon_id = $1 AND user_id = $2")
                    .bind(coupon.id)
                    .bind(order.customer_id)
                    .fetch_one(&mut *tx)
                    .await?;
            coupon.check_limits(uses)?;
            sqlx::query("UPDATE coupons SET used_count = used_count + 1 WHERE id = $1")
                .bind(coupon.id)
                .execute(&mut *tx)
                .await?;
        }

        sqlx::query(
            "INSERT INTO orders (id, order_number, customer_id, email, status, payment_status, subtotal, \
                 discount_total, shipping_total, tax_total, total, coupon_code, shipping_address, billing_address, \
                 notes, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)",
        )
        .bind(order.id)
        .bind(&order.order_number)
        .bind(order.customer_id)
        .bind(&order.email)
        .bind(order.status.as_str())
        .bind(order.payment_status.as_str())
        .bind(order.subtotal.amount())
        .bind(order.discount_total.amount())
        .bind(order.shipping_total.amount())
        .bind(order.tax_total.amount())
        .bind(order.total.amount())
        .bind(&order.coupon_code)
        .bind(Json(&order.shipping_address))
        .bind(order.billing_address.as_ref().map(Json))
        .bind(&order.notes)
        .bind(order.created_at)
        .bind(order.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| unique(e, "Order number collision; please retry."))?;
        for (position, item) in order.items.iter().enumerate() {
            sqlx::query(
                "INSERT INTO order_items (id, order_id, position, product_id, variant_id, sku, name, quantity, \
                     unit_price, discount, total) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
            )
            .bind(item.id)
            .bind(order.id)
            .bind(position as i32)
            .bind(item.product_id)
            .bind(item.variant_id)
            .bind(&item.sku)
            .bind(&item.name)
            .bind(item.quantity)
            .bind(item.unit_price.amount())
            .bind(item.discount.amount())
            .bind(item.total.amount())
            .execute(&mut *tx)
            .await?;
        }

        if let Some(redemption) = &placement.coupon {
            sqlx::query(
                "INSERT INTO coupon_usage (id, coupon_id, user_id, order_id, discount, used_at) \
                 VALUES ($1, $2, $3, $4, $5, $6)",
            )
            .bind(Uuid::now_v7())
            .bind(redemption.coupon_id)
            .bind(order.customer_id)
            .bind(order.id)
            .bind(redemption.discount.amount())
            .bind(Utc::now())
            .execute(&mut *tx)
            .await?;
        }
        if let Some(cart_id) = placement.cart_id {
            sqlx::query("DELETE FROM cart_items WHERE cart_id = $1")
                .bind(cart_id)
                .execute(&mut *tx)
                .await?;
        }

        let stock = scratch.finish(&mut tx).await?;
        tx.commit().await?;
        Ok(OrderOutcome { order, stock })
    }

    async fn find_order(&self, id: Uuid) -> Result<Option<Order>> {
        let mut conn = self.pool.acquire().await?;
        let rows: Vec<OrderRow> = sqlx::query_as(&format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1"))
            .bind(id)
            .fetch_all(&mut *conn)
            .await?;
        Ok(load_orders(&mut conn, rows).await?.pop())
    }

    async fn list_orders(&self, filter: &OrderFilter, page: PageRequest) -> Result<Page<Order>> {
        let mut conn = self.pool.acquire().await?;
        let build = |select: String| {
            let mut qb = QueryBuilder::<Postgres>::new(select);
            qb.push(" WHERE TRUE");
            if let Some(customer_id) = filter.customer_id {
                qb.push(" AND customer_id = ").push_bind(customer_id);
            }
            if !filter.statuses.is_empty() {
                let statuses: Vec<String> = filter.statuses.iter().map(|s| s.as_str().to_string()).collect();
                qb.push(" AND status = ANY(").push_bind(statuses).push(")");
            }
            qb
        };
        let total: i64 = build("SELECT COUNT(*) FROM orders".to_string())
            .build_query_scalar()
            .fetch_one(&mut *conn)
            .await?;
        let mut qb = build(format!("SELECT {ORDER_COLUMNS} FROM orders"));
        qb.push(" ORDER BY created_at DESC LIMIT ")
            .push_bind(page.limit())
            .push(" OFFSET ")
            .push_bind(page.offset());
        let rows: Vec<OrderRow> = qb.build_query_as().fetch_all(&mut *conn).await?;
        Ok(Page {
            data: load_orders(&mut conn, rows).await?,
            total,
            page: page.page,
            per_page: page.per_page,
        })
    }

    #[instrument(skip(self))]
    async fn transition_order(&self, id: Uuid, action: OrderAction, actor_id: Option<Uuid>) -> Result<OrderOutcome> {
        let mut tx = self.pool.begin().await?;
        let mut order = lock_order(&mut tx, id).await?;
        order.transition(action)?;

        let mut scratch = StockScratch::default();
        if let Some(effect) = action.stock_effect() {
            let ctx = MovementContext::for_order(&order.order_number, actor_id);
            let mut changes = order.stock_changes(effect);
            changes.sort_by(|a, b| (a.0.product_id, a.0.variant_id).cmp(&(b.0.product_id, b.0.variant_id)));
            for (key, change) in changes {
                if let Err(e) = scratch.change(&mut tx, &key, change, &ctx).await? {
                    return Err(Error::conflict(format!("Stock for product {}: {e}", key.product_id)));
                }
            }
        }
        let stock = scratch.finish(&mut tx).await?;

        write_order_status(&mut tx, &order).await?;
        if order.payment_status == PaymentStatus::Refunded {
            sqlx::query("UPDATE payments SET status = $2 WHERE order_id = $1 AND status = $3")
                .bind(order.id)
                .bind(PaymentState::Refunded.as_str())
                .bind(PaymentState::Completed.as_str())
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(OrderOutcome { order, stock })
    }

    #[instrument(skip(self, payment), fields(order_id = %payment.order_id, amount = %payment.amount))]
    async fn record_payment(&self, payment: Payment) -> Result<PaymentOutcome> {
        let mut tx = self.pool.begin().await?;
        let mut order = lock_order(&mut tx, payment.order_id).await?;
        if !order.accepts_payment() {
            return Err(Error::conflict("This order no longer accepts payments."));
        }
        let paid = paid_total(&order_payments(&mut tx, order.id).await?);
        let balance = order.balance_due(paid);
        if payment.amount > balance {
            return Err(Error::validation(
                "amount",
                format!("The amount may not be greater than the outstanding balance of {balance}."),
            ));
        }
        sqlx::query(
            "INSERT INTO payments (id, order_id, amount, method, status, transaction_ref, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(payment.id)
        .bind(payment.order_id)
        .bind(payment.amount.amount())
        .bind(payment.method.as_str())
        .bind(payment.status.as_str())
        .bind(&payment.transaction_ref)
        .bind(payment.created_at)
        .execute(&mut *tx)
        .await?;
        if payment.status == PaymentState::Completed {
            order.apply_payments(paid + payment.amount);
            write_order_status(&mut tx, &order).await?;
        }
        tx.commit().await?;
        Ok(PaymentOutcome { order, payment })
    }

    async fn list_payments(&self, order_id: Uuid) -> Result<Vec<Payment>> {
        let mut conn = self.pool.acquire().await?;
        order_payments(&mut conn, order_id).await
    }

    async fn count_orders_by_status(&self) -> Result<Vec<StatusCount<OrderStatus>>> {
        let rows: Vec<(String, i64)> = sqlx::query_as("SELECT status, COUNT(*) FROM orders GROUP BY status")
            .fetch_all(&self.pool)
            .await?;
        Ok(status_counts(OrderStatus::ALL, rows))
    }

    async fn revenue(&self, since: Option<DateTime<Utc>>) -> Result<Money> {
        let sum: Decimal = sqlx::query_scalar(
            "SELECT COALESCE(SUM(amount), 0) FROM payments \
             WHERE status = $1 AND ($2::timestamptz IS NULL OR created_at >= $2)",
        )
        .bind(PaymentState::Completed.as_str())
        .bind(since)
        .fetch_one(&self.pool)
        .await?;
        Ok(money(sum))
    }

    async fn record_audit(&self, entry: &AuditEntry) -> Result<()> {
        sqlx::query(
            "INSERT INTO audit_logs (id, actor_id, action, entity_type, entity_id, changes, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(entry.id)
        .bind(entry.actor_id)
        .bind(&entry.action)
        .bind(&entry.entity_type)
        .bind(entry.entity_id)
        .bind(&entry.changes)
        .bind(entry.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_audit(&self, filter: &AuditFilter, page: PageRequest) -> Result<Page<AuditEntry>> {
        let build = |select: &str| {
            let mut qb = QueryBuilder::<Postgres>::new(select);
            qb.push(" WHERE TRUE");
            if let Some(entity_type) = &filter.entity_type {
                qb.push(" AND entity_type = ").push_bind(entity_type.clone());
            }
            if let Some(entity_id) = filter.entity_id {
                qb.push(" AND entity_id = ").push_bind(entity_id);
            }
            qb
        };
        let total: i64 = build("SELECT COUNT(*) FROM audit_logs")
            .build_query_scalar()
            .fetch_one(&self.pool)
            .await?;
        let mut qb = build("SELECT * FROM audit_logs");
        qb.push(" ORDER BY created_at DESC, id DESC LIMIT ")
            .push_bind(page.limit())
            .push(" OFFSET ")
            .push_bind(page.offset());
        let data: Vec<AuditEntry> = qb.build_query_as().fetch_all(&self.pool).await?;
        Ok(Page {
            data,
            total,
            page: page.page,
            per_page: page.per_page,
        })
    }
}
