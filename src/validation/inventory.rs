use serde::Deserialize;
use uuid::Uuid;
use validator::Validate;

use super::{clean, parse_choice, shape};
use crate::domain::aggregates::{
    InventoryRecord, MovementContext, MovementKind, StockKey, StockOperation, DEFAULT_LOCATION,
};
use crate::error::{Error, FieldErrors, Result};
use crate::store::{StockRequest, Store};

/// Staff stock operation on one product or variant at one location.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct InventoryUpdateRequest {
    pub product_id: Uuid,
    pub variant_id: Option<Uuid>,
    #[validate(length(min = 1, max = 100))]
    pub location: Option<String>,
    /// One of receive, remove, adjust, transfer, reserve, release, fulfill, return.
    #[validate(length(min = 1))]
    pub operation: String,
    /// Units moved, or the new on-hand count for `adjust`.
    #[validate(range(min = 0, max = 1000000))]
    pub quantity: i32,
    #[validate(length(min = 1, max = 100))]
    pub to_location: Option<String>,
    #[validate(length(max = 255))]
    pub reference: Option<String>,
    #[validate(length(max = 1000))]
    pub reason: Option<String>,
}

impl InventoryUpdateRequest {
    /// Checks the operation against current stock; the store re-checks atomically.
    pub async fn validate(&self, store: &dyn Store, actor_id: Option<Uuid>) -> Result<StockRequest> {
        let mut errors = shape(self);
        let location = clean(&self.location).unwrap_or_else(|| DEFAULT_LOCATION.to_string());
        let key = StockKey::new(self.product_id, self.variant_id, location);

        self.check_target(store, &mut errors).await?;
        let operation = self.operation(&mut errors);

        if errors.is_empty() {
            if let Some(operation) = &operation {
                let record = store
                    .find_inventory(&key)
                    .await?
                    .unwrap_or_else(|| InventoryRecord::new(&key));
                if let Err(e) = record.check(operation.source_change()) {
                    errors.add(e.field(), e.to_string());
                }
            }
        }

        match operation {
            Some(operation) if errors.is_empty() => Ok(StockRequest {
                key,
                operation,
                context: MovementContext {
                    reference: clean(&self.reference),
                    reason: clean(&self.reason),
                    actor_id,
                },
            }),
            _ => Err(Error::Validation(errors)),
        }
    }

    async fn check_target(&self, store: &dyn Store, errors: &mut FieldErrors) -> Result<()> {
        match store.find_product(self.product_id).await? {
            None => errors.add("product_id", "The selected product is invalid."),
            Some(product) => {
                if let Some(variant_id) = self.variant_id {
                    if product.variant(variant_id).is_none() {
                        errors.add("variant_id", "The selected variant does not belong to this product.");
                    }
                }
            }
        }
        Ok(())
    }

    fn operation(&self, errors: &mut FieldErrors) -> Option<StockOperation> {
        let kind: MovementKind = match self.operation.trim() {
            // ledger-only kinds
            "transfer_in" | "transfer_out" => {
                errors.add("operation", "The selected operation is invalid.");
                return None;
            }
            "transfer" => MovementKind::TransferOut,
            other => parse_choice(errors, "operation", other)?,
        };
        let quantity = self.quantity;
        if kind != MovementKind::Adjust && quantity < 1 {
            errors.add("quantity", "The quantity must be at least 1.");
        }
        Some(match kind {
            MovementKind::Receive => StockOperation::Receive { quantity },
            MovementKind::Remove => StockOperation::Remove { quantity },
            MovementKind::Adjust => StockOperation::Adjust { count: quantity },
            MovementKind::Reserve => StockOperation::Reserve { quantity },
            MovementKind::Release => StockOperation::Release { quantity },
            MovementKind::Fulfill => StockOperation::Fulfill { quantity },
            MovementKind::Return => StockOperation::Return { quantity },
            MovementKind::TransferOut | MovementKind::TransferIn => {
                let Some(to_location) = clean(&self.to_location) else {
                    errors.add("to_location", "The to location field is required when operation is transfer.");
                    return None;
                };
                let from = clean(&self.location).unwrap_or_else(|| DEFAULT_LOCATION.to_string());
                if to_location == from {
                    errors.add("to_location", "The to location and location must be different.");
                    return None;
                }
                StockOperation::Transfer { quantity, to_location }
            }
        })
    }
}

/// Sets the low-stock threshold of one record.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct ReorderLevelRequest {
    pub product_id: Uuid,
    pub variant_id: Option<Uuid>,
    #[validate(length(min = 1, max = 100))]
    pub location: Option<String>,
    #[validate(range(min = 0, max = 1000000))]
    pub reorder_level: i32,
}

impl ReorderLevelRequest {
    pub async fn validate(&self, store: &dyn Store) -> Result<(StockKey, i32)> {
        let mut errors = shape(self);
        match store.find_product(self.product_id).await? {
            None => errors.add("product_id", "The selected product is invalid."),
            Some(product) => {
                if self.variant_id.is_some_and(|id| product.variant(id).is_none()) {
                    errors.add("variant_id", "The selected variant does not belong to this product.");
                }
            }
        }
        errors.into_result()?;
        let location = clean(&self.location).unwrap_or_else(|| DEFAULT_LOCATION.to_string());
        Ok((StockKey::new(self.product_id, self.variant_id, location), self.reorder_level))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::aggregates::Product;
    use crate::domain::value_objects::{Money, Sku};
    use crate::store::MemoryStore;

    async fn seeded() -> (MemoryStore, Product) {
        let store = MemoryStore::new();
        let product = Product::create(Sku::new("MASK-1").unwrap(), "Clay Mask", "clay-mask", Money::from_cents(1800));
        store.create_product(&product).await.unwrap();
        (store, product)
    }

    fn request(product: &Product, operation: &str, quantity: i32) -> InventoryUpdateRequest {
        InventoryUpdateRequest {
            product_id: product.id,
            operation: operation.into(),
            quantity,
            ..Default::default()
        }
    }

    async fn errors(store: &MemoryStore, request: InventoryUpdateRequest) -> FieldErrors {
        match request.validate(store, None).await {
            Err(Error::Validation(errors)) => errors,
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn remove_more_than_available() {
        let (store, product) = seeded().await;
        let receive = request(&product, "receive", 3).validate(&store, None).await.unwrap();
        store.apply_stock(receive).await.unwrap();

        let errors = errors(&store, request(&product, "remove", 5)).await;
        assert_eq!(errors.get("quantity").unwrap(), ["Insufficient stock: only 3 available."]);
    }

    #[tokio::test]
    async fn transfer_needs_distinct_destination() {
        let (store, product) = seeded().await;
        let errors1 = errors(&store, request(&product, "transfer", 1)).await;
        assert_eq!(
            errors1.get("to_location").unwrap(),
            ["The to location field is required when operation is transfer."]
        );

        let mut same = request(&product, "transfer", 1);
        same.to_location = Some("main".into());
        assert!(errors(&store, same).await.has("to_location"));
    }

    #[tokio::test]
    async fn unknown_product_variant_and_operation() {
        let (store, product) = seeded().await;
        let mut req = request(&product, "teleport", 1);
        req.variant_id = Some(Uuid::now_v7());
        let found = errors(&store, req).await;
        assert!(found.has("variant_id"));
        assert_eq!(found.get("operation").unwrap(), ["The selected operation is invalid."]);

        let mut missing = request(&product, "receive", 1);
        missing.product_id = Uuid::now_v7();
        assert!(errors(&store, missing).await.has("product_id"));
    }

    #[tokio::test]
    async fn zero_quantity_only_for_adjust() {
        let (store, product) = seeded().await;
        assert!(errors(&store, request(&product, "receive", 0)).await.has("quantity"));

        store
            .apply_stock(request(&product, "receive", 2).validate(&store, None).await.unwrap())
            .await
            .unwrap();
        let adjust = request(&product, "adjust", 0).validate(&store, None).await.unwrap();
        assert_eq!(adjust.operation, StockOperation::Adjust { count: 0 });
    }
}
