//! Stock levels and the movement ledger.
//!
//! An [`InventoryRecord`] tracks one product (or variant) at one location.
//! Every change goes through [`InventoryRecord::apply`], which checks the
//! invariants `0 <= reserved <= on_hand` and returns the ledger row
//! describing the change. Stores run `apply` and persist the returned
//! [`InventoryMovement`] in the same atomic unit.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Location used for storefront sales when none is given.
pub const DEFAULT_LOCATION: &str = "main";

string_enum! {
    pub enum MovementKind {
        Receive => "receive",
        Remove => "remove",
        Adjust => "adjust",
        TransferOut => "transfer_out",
        TransferIn => "transfer_in",
        Reserve => "reserve",
        Release => "release",
        Fulfill => "fulfill",
        Return => "return",
    }
}

/// Identifies one stock row.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StockKey {
    pub product_id: Uuid,
    pub variant_id: Option<Uuid>,
    pub location: String,
}

impl StockKey {
    pub fn new(product_id: Uuid, variant_id: Option<Uuid>, location: impl Into<String>) -> Self {
        Self {
            product_id,
            variant_id,
            location: location.into(),
        }
    }

    /// Key at [`DEFAULT_LOCATION`].
    pub fn main(product_id: Uuid, variant_id: Option<Uuid>) -> Self {
        Self::new(product_id, variant_id, DEFAULT_LOCATION)
    }

    pub fn at(&self, location: impl Into<String>) -> Self {
        Self::new(self.product_id, self.variant_id, location)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryRecord {
    pub id: Uuid,
    pub product_id: Uuid,
    pub variant_id: Option<Uuid>,
    pub location: String,
    pub on_hand: i32,
    pub reserved: i32,
    pub reorder_level: i32,
    pub updated_at: DateTime<Utc>,
}

/// A single-record change. Transfers are expressed as a paired out/in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StockChange {
    Receive(i32),
    Remove(i32),
    /// Set on-hand to an absolute count.
    Adjust(i32),
    TransferOut(i32),
    TransferIn(i32),
    Reserve(i32),
    Release(i32),
    Fulfill(i32),
    Return(i32),
}

impl StockChange {
    pub fn kind(&self) -> MovementKind {
        match self {
            StockChange::Receive(_) => MovementKind::Receive,
            StockChange::Remove(_) => MovementKind::Remove,
            StockChange::Adjust(_) => MovementKind::Adjust,
            StockChange::TransferOut(_) => MovementKind::TransferOut,
            StockChange::TransferIn(_) => MovementKind::TransferIn,
            StockChange::Reserve(_) => MovementKind::Reserve,
            StockChange::Release(_) => MovementKind::Release,
            StockChange::Fulfill(_) => MovementKind::Fulfill,
            StockChange::Return(_) => MovementKind::Return,
        }
    }
}

/// An operation as submitted by staff; `Transfer` spans two records.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StockOperation {
    Receive { quantity: i32 },
    Remove { quantity: i32 },
    Adjust { count: i32 },
    Transfer { quantity: i32, to_location: String },
    Reserve { quantity: i32 },
    Release { quantity: i32 },
    Fulfill { quantity: i32 },
    Return { quantity: i32 },
}

impl StockOperation {
    /// The change applied to the source record.
    pub fn source_change(&self) -> StockChange {
        match self {
            StockOperation::Receive { quantity } => StockChange::Receive(*quantity),
            StockOperation::Remove { quantity } => StockChange::Remove(*quantity),
            StockOperation::Adjust { count } => StockChange::Adjust(*count),
            StockOperation::Transfer { quantity, .. } => StockChange::TransferOut(*quantity),
            StockOperation::Reserve { quantity } => StockChange::Reserve(*quantity),
            StockOperation::Release { quantity } => StockChange::Release(*quantity),
            StockOperation::Fulfill { quantity } => StockChange::Fulfill(*quantity),
            StockOperation::Return { quantity } => StockChange::Return(*quantity),
        }
    }
}

/// Who and why, copied onto every movement.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MovementContext {
    pub reference: Option<String>,
    pub reason: Option<String>,
    pub actor_id: Option<Uuid>,
}

impl MovementContext {
    pub fn for_order(order_number: &str, actor_id: Option<Uuid>) -> Self {
        Self {
            reference: Some(order_number.to_string()),
            reason: None,
            actor_id,
        }
    }
}

/// Append-only ledger row.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryMovement {
    pub id: Uuid,
    pub inventory_id: Uuid,
    pub product_id: Uuid,
    pub variant_id: Option<Uuid>,
    pub location: String,
    pub kind: MovementKind,
    pub quantity: i32,
    pub on_hand_before: i32,
    pub on_hand_after: i32,
    pub reserved_before: i32,
    pub reserved_after: i32,
    pub reference: Option<String>,
    pub reason: Option<String>,
    pub actor_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StockError {
    #[error("The quantity must be at least 1.")]
    InvalidQuantity,
    #[error("The count may not be negative.")]
    NegativeCount,
    #[error("Insufficient stock: only {available} available.")]
    Insufficient { available: i32 },
    #[error("Insufficient reserved stock: only {reserved} reserved.")]
    InsufficientReserved { reserved: i32 },
    #[error("The count may not be lower than the {reserved} units currently reserved.")]
    BelowReserved { reserved: i32 },
    #[error("The count is already {on_hand}.")]
    Unchanged { on_hand: i32 },
    #[error("The destination location must differ from the source location.")]
    SameLocation,
}

impl StockError {
    /// Request field the error belongs to.
    pub fn field(&self) -> &'static str {
        match self {
            StockError::SameLocation => "to_location",
            _ => "quantity",
        }
    }
}

impl InventoryRecord {
    pub fn new(key: &StockKey) -> Self {
        Self {
            id: Uuid::now_v7(),
            product_id: key.product_id,
            variant_id: key.variant_id,
            location: key.location.clone(),
            on_hand: 0,
            reserved: 0,
            reorder_level: 0,
            updated_at: Utc::now(),
        }
    }

    pub fn key(&self) -> StockKey {
        StockKey::new(self.product_id, self.variant_id, self.location.clone())
    }

    pub fn available(&self) -> i32 {
        self.on_hand - self.reserved
    }

    pub fn is_low_stock(&self) -> bool {
        self.available() <= self.reorder_level
    }

    /// Checks `change` against current levels without mutating.
    pub fn check(&self, change: StockChange) -> Result<(i32, i32), StockError> {
        let (on_hand, reserved) = (self.on_hand, self.reserved);
        let positive = |q: i32| if q >= 1 { Ok(q) } else { Err(StockError::InvalidQuantity) };
        let next = match change {
            StockChange::Receive(q) | StockChange::TransferIn(q) | StockChange::Return(q) => {
                (on_hand + positive(q)?, reserved)
            }
            StockChange::Remove(q) | StockChange::TransferOut(q) => {
                let q = positive(q)?;
                if q > self.available() {
                    return Err(StockError::Insufficient {
                        available: self.available(),
                    });
                }
                (on_hand - q, reserved)
            }
            StockChange::Adjust(count) => {
                if count < 0 {
                    return Err(StockError::NegativeCount);
                }
                if count < reserved {
                    return Err(StockError::BelowReserved { reserved });
                }
                if count == on_hand {
                    return Err(StockError::Unchanged { on_hand });
                }
                (count, reserved)
            }
            StockChange::Reserve(q) => {
                let q = positive(q)?;
                if q > self.available() {
                    return Err(StockError::Insufficient {
                        available: self.available(),
                    });
                }
                (on_hand, reserved + q)
            }
            StockChange::Release(q) => {
                let q = positive(q)?;
                if q > reserved {
                    return Err(StockError::InsufficientReserved { reserved });
                }
                (on_hand, reserved - q)
            }
            StockChange::Fulfill(q) => {
                let q = positive(q)?;
                if q > reserved {
                    return Err(StockError::InsufficientReserved { reserved });
                }
                (on_hand - q, reserved - q)
            }
        };
        debug_assert!(next.0 >= 0 && next.1 >= 0 && next.1 <= next.0);
        Ok(next)
    }

    /// Applies `change` and returns the ledger row for it.
    pub fn apply(&mut self, change: StockChange, ctx: &MovementContext) -> Result<InventoryMovement, StockError> {
        let (on_hand, reserved) = self.check(change)?;
        let quantity = match change {
            StockChange::Adjust(_) => (on_hand - self.on_hand).abs(),
            StockChange::Receive(q)
            | StockChange::Remove(q)
            | StockChange::TransferOut(q)
            | StockChange::TransferIn(q)
            | StockChange::Reserve(q)
            | StockChange::Release(q)
            | StockChange::Fulfill(q)
            | StockChange::Return(q) => q,
        };
        let now = Utc::now();
        let movement = InventoryMovement {
            id: Uuid::now_v7(),
            inventory_id: self.id,
            product_id: self.product_id,
            variant_id: self.variant_id,
            location: self.location.clone(),
            kind: change.kind(),
            quantity,
            on_hand_before: self.on_hand,
            on_hand_after: on_hand,
            reserved_before: self.reserved,
            reserved_after: reserved,
            reference: ctx.reference.clone(),
            reason: ctx.reason.clone(),
            actor_id: ctx.actor_id,
            created_at: now,
        };
        self.on_hand = on_hand;
        self.reserved = reserved;
        self.updated_at = now;
        Ok(movement)
    }
}

/// Moves available stock between two records of the same product.
pub fn transfer(
    from: &mut InventoryRecord,
    to: &mut InventoryRecord,
    quantity: i32,
    ctx: &MovementContext,
) -> Result<[InventoryMovement; 2], StockError> {
    if from.location == to.location {
        return Err(StockError::SameLocation);
    }
    to.check(StockChange::TransferIn(quantity))?;
    let out = from.apply(StockChange::TransferOut(quantity), ctx)?;
    let inbound = to.apply(StockChange::TransferIn(quantity), ctx)?;
    Ok([out, inbound])
}

impl InventoryMovement {
    /// Available units after the movement.
    pub fn available_after(&self) -> i32 {
        self.on_hand_after - self.reserved_after
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(on_hand: i32, reserved: i32) -> InventoryRecord {
        let mut r = InventoryRecord::new(&StockKey::main(Uuid::now_v7(), None));
        r.on_hand = on_hand;
        r.reserved = reserved;
        r
    }

    fn ctx() -> MovementContext {
        MovementContext::default()
    }

    #[test]
    fn receive_and_remove() {
        let mut r = record(0, 0);
        let m = r.apply(StockChange::Receive(10), &ctx()).unwrap();
        assert_eq!((m.on_hand_before, m.on_hand_after), (0, 10));
        assert_eq!(m.kind, MovementKind::Receive);

        r.apply(StockChange::Reserve(4), &ctx()).unwrap();
        assert_eq!(
            r.apply(StockChange::Remove(7), &ctx()),
            Err(StockError::Insufficient { available: 6 })
        );
        r.apply(StockChange::Remove(6), &ctx()).unwrap();
        assert_eq!((r.on_hand, r.reserved, r.available()), (4, 4, 0));
    }

    #[test]
    fn reserve_release_fulfill() {
        let mut r = record(5, 0);
        r.apply(StockChange::Reserve(3), &ctx()).unwrap();
        assert_eq!(
            r.apply(StockChange::Reserve(3), &ctx()),
            Err(StockError::Insufficient { available: 2 })
        );
        r.apply(StockChange::Release(1), &ctx()).unwrap();
        assert_eq!(
            r.apply(StockChange::Fulfill(3), &ctx()),
            Err(StockError::InsufficientReserved { reserved: 2 })
        );
        let m = r.apply(StockChange::Fulfill(2), &ctx()).unwrap();
        assert_eq!((m.on_hand_after, m.reserved_after), (3, 0));
    }

    #[test]
    fn adjust_respects_reservations() {
        let mut r = record(10, 4);
        assert_eq!(
            r.apply(StockChange::Adjust(3), &ctx()),
            Err(StockError::BelowReserved { reserved: 4 })
        );
        assert_eq!(
            r.apply(StockChange::Adjust(10), &ctx()),
            Err(StockError::Unchanged { on_hand: 10 })
        );
        let m = r.apply(StockChange::Adjust(6), &ctx()).unwrap();
        assert_eq!(m.quantity, 4);
        assert_eq!(r.on_hand, 6);
    }

    #[test]
    fn failed_change_leaves_record_untouched() {
        let mut r = record(2, 1);
        let before = r.clone();
        assert!(r.apply(StockChange::Remove(0), &ctx()).is_err());
        assert!(r.apply(StockChange::Fulfill(2), &ctx()).is_err());
        assert_eq!(r, before);
    }

    #[test]
    fn transfer_moves_available_only() {
        let mut from = record(8, 5);
        let mut to = InventoryRecord::new(&from.key().at("backroom"));
        assert_eq!(
            transfer(&mut from, &mut to, 4, &ctx()),
            Err(StockError::Insufficient { available: 3 })
        );
        let [out, inbound] = transfer(&mut from, &mut to, 3, &ctx()).unwrap();
        assert_eq!(out.kind, MovementKind::TransferOut);
        assert_eq!(inbound.location, "backroom");
        assert_eq!((from.on_hand, to.on_hand), (5, 3));

        let mut same = InventoryRecord::new(&from.key());
        assert_eq!(transfer(&mut from, &mut same, 1, &ctx()), Err(StockError::SameLocation));
    }

    #[test]
    fn low_stock_uses_available() {
        let mut r = record(10, 7);
        r.reorder_level = 3;
        assert!(r.is_low_stock());
        r.reserved = 6;
        assert!(!r.is_low_stock());
    }
}
