//! Domain events
use serde::Serialize;
use uuid::Uuid;

use crate::domain::aggregates::inventory::{InventoryMovement, InventoryRecord, MovementKind};
use crate::domain::aggregates::order::{OrderStatus, PaymentStatus};
use crate::domain::value_objects::{Money, Sku};

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum DomainEvent {
    Product(ProductEvent),
    Inventory(InventoryEvent),
    Order(OrderEvent),
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProductEvent {
    Created { product_id: Uuid, sku: Sku },
    Updated { product_id: Uuid },
    Deleted { product_id: Uuid },
    PricesChanged { product_ids: Vec<Uuid> },
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum InventoryEvent {
    StockMoved {
        product_id: Uuid,
        variant_id: Option<Uuid>,
        location: String,
        kind: MovementKind,
        quantity: i32,
        available: i32,
    },
    LowStock {
        product_id: Uuid,
        variant_id: Option<Uuid>,
        location: String,
        available: i32,
        reorder_level: i32,
    },
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum OrderEvent {
    Placed { order_id: Uuid, order_number: String, total: Money },
    StatusChanged { order_id: Uuid, from: OrderStatus, to: OrderStatus },
    PaymentRecorded { order_id: Uuid, amount: Money, payment_status: PaymentStatus },
}

impl DomainEvent {
    /// Dotted name, used as the publish subject suffix.
    pub fn name(&self) -> &'static str {
        match self {
            DomainEvent::Product(ProductEvent::Created { .. }) => "product.created",
            DomainEvent::Product(ProductEvent::Updated { .. }) => "product.updated",
            DomainEvent::Product(ProductEvent::Deleted { .. }) => "product.deleted",
            DomainEvent::Product(ProductEvent::PricesChanged { .. }) => "product.prices_changed",
            DomainEvent::Inventory(InventoryEvent::StockMoved { .. }) => "inventory.stock_moved",
            DomainEvent::Inventory(InventoryEvent::LowStock { .. }) => "inventory.low_stock",
            DomainEvent::Order(OrderEvent::Placed { .. }) => "order.placed",
            DomainEvent::Order(OrderEvent::StatusChanged { .. }) => "order.status_changed",
            DomainEvent::Order(OrderEvent::PaymentRecorded { .. }) => "order.payment_recorded",
        }
    }
}

impl InventoryEvent {
    pub fn moved(movement: &InventoryMovement) -> Self {
        InventoryEvent::StockMoved {
            product_id: movement.product_id,
            variant_id: movement.variant_id,
            location: movement.location.clone(),
            kind: movement.kind,
            quantity: movement.quantity,
            available: movement.available_after(),
        }
    }

    /// `Some` when the record sits at or below its reorder level.
    pub fn low_stock(record: &InventoryRecord) -> Option<Self> {
        record.is_low_stock().then(|| InventoryEvent::LowStock {
            product_id: record.product_id,
            variant_id: record.variant_id,
            location: record.location.clone(),
            available: record.available(),
            reorder_level: record.reorder_level,
        })
    }
}

impl From<ProductEvent> for DomainEvent {
    fn from(e: ProductEvent) -> Self {
        DomainEvent::Product(e)
    }
}

impl From<InventoryEvent> for DomainEvent {
    fn from(e: InventoryEvent) -> Self {
        DomainEvent::Inventory(e)
    }
}

impl From<OrderEvent> for DomainEvent {
    fn from(e: OrderEvent) -> Self {
        DomainEvent::Order(e)
    }
}
