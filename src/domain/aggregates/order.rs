//! Order Aggregate

use chrono::{DateTime, Utc};
use rand::{distributions::Alphanumeric, Rng};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;
use validator::Validate;

use crate::domain::aggregates::inventory::{StockChange, StockKey};
use crate::domain::events::{DomainEvent, OrderEvent};
use crate::domain::pricing::Quote;
use crate::domain::value_objects::Money;

string_enum! {
    pub enum OrderStatus {
        Pending => "pending",
        Confirmed => "confirmed",
        Processing => "processing",
        Shipped => "shipped",
        Delivered => "delivered",
        Cancelled => "cancelled",
        Refunded => "refunded",
    }
}

string_enum! {
    pub enum PaymentStatus {
        Unpaid => "unpaid",
        PartiallyPaid => "partially_paid",
        Paid => "paid",
        Refunded => "refunded",
    }
}

string_enum! {
    /// Status changes staff can request.
    pub enum OrderAction {
        Confirm => "confirm",
        Process => "process",
        Ship => "ship",
        Deliver => "deliver",
        Cancel => "cancel",
        Refund => "refund",
    }
}

/// What a transition does to the reserved stock of every line.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StockEffect {
    /// Reservation turns into a shipment.
    Fulfill,
    /// Reservation is given back.
    Release,
    /// Shipped units come back on hand.
    Restock,
}

impl OrderStatus {
    /// Still waiting on staff action.
    pub fn is_open(&self) -> bool {
        matches!(self, OrderStatus::Pending | OrderStatus::Confirmed | OrderStatus::Processing)
    }
}

impl OrderAction {
    /// Status reached when the action is allowed from `from`.
    pub fn target(&self, from: OrderStatus) -> Option<OrderStatus> {
        use OrderStatus::*;
        match (self, from) {
            (OrderAction::Confirm, Pending) => Some(Confirmed),
            (OrderAction::Process, Confirmed) => Some(Processing),
            (OrderAction::Ship, Processing) => Some(Shipped),
            (OrderAction::Deliver, Shipped) => Some(Delivered),
            (OrderAction::Cancel, Pending | Confirmed | Processing) => Some(Cancelled),
            (OrderAction::Refund, Shipped | Delivered) => Some(Refunded),
            _ => None,
        }
    }

    pub fn stock_effect(&self) -> Option<StockEffect> {
        match self {
            OrderAction::Ship => Some(StockEffect::Fulfill),
            OrderAction::Cancel => Some(StockEffect::Release),
            OrderAction::Refund => Some(StockEffect::Restock),
            OrderAction::Confirm | OrderAction::Process | OrderAction::Deliver => None,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct Address {
    #[validate(length(min = 1, max = 255))]
    pub name: String,
    #[validate(length(min = 1, max = 255))]
    pub line1: String,
    #[validate(length(max = 255))]
    pub line2: Option<String>,
    #[validate(length(min = 1, max = 100))]
    pub city: String,
    #[validate(length(max = 100))]
    pub state: Option<String>,
    #[validate(length(min = 1, max = 20))]
    pub postal_code: String,
    /// ISO 3166-1 alpha-2
    #[validate(length(equal = 2))]
    pub country: String,
    #[validate(length(max = 30))]
    pub phone: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OrderItem {
    pub id: Uuid,
    pub product_id: Uuid,
    pub variant_id: Option<Uuid>,
    pub sku: String,
    pub name: String,
    pub quantity: i32,
    pub unit_price: Money,
    pub discount: Money,
    pub total: Money,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: Uuid,
    pub order_number: String,
    pub customer_id: Uuid,
    pub email: String,
    pub status: OrderStatus,
    pub payment_status: PaymentStatus,
    pub items: Vec<OrderItem>,
    pub subtotal: Money,
    pub discount_total: Money,
    pub shipping_total: Money,
    pub tax_total: Money,
    pub total: Money,
    pub coupon_code: Option<String>,
    pub shipping_address: Address,
    pub billing_address: Option<Address>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip)]
    pub(crate) events: Vec<DomainEvent>,
}

impl Order {
    /// Builds a pending order from a priced cart.
    pub fn place(
        customer_id: Uuid,
        email: impl Into<String>,
        quote: &Quote,
        shipping_address: Address,
        billing_address: Option<Address>,
        notes: Option<String>,
    ) -> Result<Self, OrderError> {
        if quote.lines.is_empty() {
            return Err(OrderError::NoItems);
        }
        let now = Utc::now();
        let items = quote
            .lines
            .iter()
            .map(|line| OrderItem {
                id: Uuid::now_v7(),
                product_id: line.product_id,
                variant_id: line.variant_id,
                sku: line.sku.clone(),
                name: line.name.clone(),
                quantity: line.quantity,
                unit_price: line.unit_price,
                discount: line.discount(),
                total: line.total(),
            })
            .collect();
        let mut order = Self {
            id: Uuid::now_v7(),
            order_number: generate_order_number(now),
            customer_id,
            email: email.into(),
            status: OrderStatus::Pending,
            payment_status: PaymentStatus::Unpaid,
            items,
            subtotal: quote.subtotal,
            discount_total: quote.discount_total,
            shipping_total: quote.shipping_total,
            tax_total: quote.tax_total,
            total: quote.total,
            coupon_code: quote.coupon_code.clone(),
            shipping_address,
            billing_address,
            notes,
            created_at: now,
            updated_at: now,
            events: vec![],
        };
        order.raise_event(OrderEvent::Placed {
            order_id: order.id,
            order_number: order.order_number.clone(),
            total: order.total,
        });
        Ok(order)
    }

    /// Applies `action`, returning the status it left.
    pub fn transition(&mut self, action: OrderAction) -> Result<OrderStatus, OrderError> {
        let from = self.status;
        let to = action.target(from).ok_or(OrderError::InvalidTransition { from, action })?;
        if action == OrderAction::Refund && !self.has_payments() {
            return Err(OrderError::NotPaid);
        }
        self.status = to;
        if matches!(action, OrderAction::Cancel | OrderAction::Refund) && self.has_payments() {
            self.payment_status = PaymentStatus::Refunded;
        }
        self.touch();
        self.raise_event(OrderEvent::StatusChanged {
            order_id: self.id,
            from,
            to,
        });
        Ok(from)
    }

    /// Stock changes at the fulfilment location for `effect`, one per line.
    pub fn stock_changes(&self, effect: StockEffect) -> Vec<(StockKey, StockChange)> {
        self.items
            .iter()
            .map(|item| {
                let change = match effect {
                    StockEffect::Fulfill => StockChange::Fulfill(item.quantity),
                    StockEffect::Release => StockChange::Release(item.quantity),
                    StockEffect::Restock => StockChange::Return(item.quantity),
                };
                (StockKey::main(item.product_id, item.variant_id), change)
            })
            .collect()
    }

    /// Recomputes payment status from the sum of completed payments.
    /// A fully paid pending order is confirmed.
    pub fn apply_payments(&mut self, paid: Money) {
        let before = self.payment_status;
        self.payment_status = if paid.is_zero() {
            PaymentStatus::Unpaid
        } else if paid >= self.total {
            PaymentStatus::Paid
        } else {
            PaymentStatus::PartiallyPaid
        };
        if self.payment_status != before {
            self.raise_event(OrderEvent::PaymentRecorded {
                order_id: self.id,
                amount: paid,
                payment_status: self.payment_status,
            });
        }
        if self.payment_status == PaymentStatus::Paid && self.status == OrderStatus::Pending {
            self.status = OrderStatus::Confirmed;
            self.raise_event(OrderEvent::StatusChanged {
                order_id: self.id,
                from: OrderStatus::Pending,
                to: OrderStatus::Confirmed,
            });
        }
        self.touch();
    }

    pub fn balance_due(&self, paid: Money) -> Money {
        self.total.saturating_sub(paid)
    }

    /// Whether new payments may be taken.
    pub fn accepts_payment(&self) -> bool {
        !matches!(self.status, OrderStatus::Cancelled | OrderStatus::Refunded)
            && self.payment_status != PaymentStatus::Refunded
    }

    pub fn item_count(&self) -> i32 {
        self.items.iter().map(|i| i.quantity).sum()
    }

    fn has_payments(&self) -> bool {
        matches!(self.payment_status, PaymentStatus::Paid | PaymentStatus::PartiallyPaid)
    }

    pub fn take_events(&mut self) -> Vec<DomainEvent> {
        std::mem::take(&mut self.events)
    }

    fn raise_event(&mut self, e: OrderEvent) {
        self.events.push(e.into());
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// `ORD-YYYYMMDD-XXXXXX` with a random upper-case alphanumeric suffix.
pub fn generate_order_number(now: DateTime<Utc>) -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(6)
        .map(|b| char::from(b).to_ascii_uppercase())
        .collect();
    format!("ORD-{}-{}", now.format("%Y%m%d"), suffix)
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OrderError {
    #[error("An order needs at least one item.")]
    NoItems,
    #[error("Cannot {action} an order that is {from}.")]
    InvalidTransition { from: OrderStatus, action: OrderAction },
    #[error("Only paid orders can be refunded.")]
    NotPaid,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::pricing::PricedLine;

    fn quote() -> Quote {
        let line = PricedLine {
            product_id: Uuid::now_v7(),
            variant_id: None,
            sku: "W001".into(),
            name: "Widget".into(),
            quantity: 2,
            unit_price: Money::from_cents(1000),
            subtotal: Money::from_cents(2000),
            promotion_discount: Money::ZERO,
            promotion_id: None,
            coupon_discount: Money::ZERO,
        };
        Quote {
            lines: vec![line],
            subtotal: Money::from_cents(2000),
            promotion_discount: Money::ZERO,
            coupon_discount: Money::ZERO,
            discount_total: Money::ZERO,
            shipping_total: Money::from_cents(500),
            tax_total: Money::ZERO,
            total: Money::from_cents(2500),
            coupon_code: None,
            free_shipping: false,
        }
    }

    fn order() -> Order {
        Order::place(Uuid::now_v7(), "test@example.com", &quote(), Address::default(), None, None).unwrap()
    }

    #[test]
    fn test_order_workflow() {
        let mut order = order();
        assert!(order.order_number.starts_with("ORD-"));
        assert_eq!(order.order_number.len(), "ORD-20240101-ABCDEF".len());
        assert_eq!(order.take_events().len(), 1);

        order.transition(OrderAction::Confirm).unwrap();
        order.transition(OrderAction::Process).unwrap();
        order.transition(OrderAction::Ship).unwrap();
        assert_eq!(order.status, OrderStatus::Shipped);
        order.transition(OrderAction::Deliver).unwrap();
        assert_eq!(
            order.transition(OrderAction::Cancel),
            Err(OrderError::InvalidTransition {
                from: OrderStatus::Delivered,
                action: OrderAction::Cancel
            })
        );
        assert_eq!(order.take_events().len(), 4);
    }

    #[test]
    fn refund_requires_payment() {
        let mut order = order();
        order.transition(OrderAction::Confirm).unwrap();
        order.transition(OrderAction::Process).unwrap();
        order.transition(OrderAction::Ship).unwrap();
        assert_eq!(order.transition(OrderAction::Refund), Err(OrderError::NotPaid));

        order.apply_payments(Money::from_cents(2500));
        order.transition(OrderAction::Refund).unwrap();
        assert_eq!(order.status, OrderStatus::Refunded);
        assert_eq!(order.payment_status, PaymentStatus::Refunded);
        assert!(!order.accepts_payment());
    }

    #[test]
    fn full_payment_confirms_pending_order() {
        let mut order = order();
        order.apply_payments(Money::from_cents(1000));
        assert_eq!(order.payment_status, PaymentStatus::PartiallyPaid);
        assert_eq!(order.status, OrderStatus::Pending);
        assert_eq!(order.balance_due(Money::from_cents(1000)), Money::from_cents(1500));

        order.apply_payments(Money::from_cents(2500));
        assert_eq!(order.payment_status, PaymentStatus::Paid);
        assert_eq!(order.status, OrderStatus::Confirmed);
    }

    #[test]
    fn transitions_map_to_stock_effects() {
        let order = order();
        let changes = order.stock_changes(StockEffect::Release);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].1, StockChange::Release(2));
        assert_eq!(OrderAction::Ship.stock_effect(), Some(StockEffect::Fulfill));
        assert_eq!(OrderAction::Deliver.stock_effect(), None);
        assert_eq!(OrderAction::Ship.target(OrderStatus::Pending), None);
    }
}
