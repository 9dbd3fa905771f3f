use rust_decimal::Decimal;
use serde::Deserialize;
use uuid::Uuid;
use validator::Validate;

use super::{parse_choice, shape};
use crate::domain::aggregates::category::descendant_ids;
use crate::domain::aggregates::Product;
use crate::domain::pricing::PriceOperation;
use crate::domain::value_objects::Money;
use crate::error::{Error, FieldErrors, Result};
use crate::store::Store;

/// Bulk price edit over explicit products or a whole category subtree.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct PricingBulkUpdateRequest {
    #[serde(default)]
    #[validate(length(max = 500))]
    pub product_ids: Vec<Uuid>,
    pub category_id: Option<Uuid>,
    pub operation: String,
    pub value: Decimal,
}

/// Products carrying their new prices, ready for [`Store::update_prices`].
#[derive(Debug, Clone, PartialEq)]
pub struct BulkPriceChange {
    pub operation: PriceOperation,
    pub products: Vec<Product>,
}

impl PricingBulkUpdateRequest {
    pub async fn validate(&self, store: &dyn Store) -> Result<BulkPriceChange> {
        let mut errors = shape(self);
        let operation: Option<PriceOperation> = parse_choice(&mut errors, "operation", &self.operation);
        if self.value <= Decimal::ZERO {
            errors.add("value", "The value must be greater than 0.");
        } else if self.value > Money::MAX.amount() {
            errors.add("value", format!("The value may not be greater than {}.", Money::MAX));
        }
        let targets = self.targets(store, &mut errors).await?;

        let (Some(operation), Some(mut products)) = (operation, targets) else {
            return Err(Error::Validation(errors));
        };
        if !errors.is_empty() {
            return Err(Error::Validation(errors));
        }

        let minimum = Money::from_cents(1);
        for product in &mut products {
            let price = operation.apply(product.price, self.value);
            if price < minimum {
                errors.add(
                    "value",
                    format!("The new price of {} would fall below {}.", product.sku.as_str(), minimum),
                );
                continue;
            }
            if price > Money::MAX {
                errors.add(
                    "value",
                    format!("The new price of {} would exceed {}.", product.sku.as_str(), Money::MAX),
                );
                continue;
            }
            let compare_at = product.compare_at_price.filter(|c| *c > price);
            product.update_price(price, compare_at);
        }
        errors.into_result()?;
        Ok(BulkPriceChange { operation, products })
    }

    async fn targets(&self, store: &dyn Store, errors: &mut FieldErrors) -> Result<Option<Vec<Product>>> {
        match (self.product_ids.is_empty(), self.category_id) {
            (true, None) => {
                errors.add("product_ids", "The product ids field is required when category id is not present.");
                Ok(None)
            }
            (false, Some(_)) => {
                errors.add("category_id", "Give either product ids or a category id, not both.");
                Ok(None)
            }
            (false, None) => {
                let products = store.find_products(&self.product_ids).await?;
                let mut missing = false;
                for (index, id) in self.product_ids.iter().enumerate() {
                    if !products.iter().any(|p| p.id == *id) {
                        errors.add(format!("product_ids.{index}"), "The selected product is invalid.");
                        missing = true;
                    }
                }
                Ok((!missing).then_some(products))
            }
            (true, Some(category_id)) => {
                if store.find_category(category_id).await?.is_none() {
                    errors.add("category_id", "The selected category is invalid.");
                    return Ok(None);
                }
                let categories = store.list_categories().await?;
                let subtree: Vec<Uuid> = descendant_ids(&categories, category_id).into_iter().collect();
                let products = store.products_in_categories(&subtree).await?;
                if products.is_empty() {
                    errors.add("category_id", "The selected category has no products.");
                    return Ok(None);
                }
                Ok(Some(products))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::aggregates::Category;
    use crate::domain::value_objects::Sku;
    use crate::store::MemoryStore;

    async fn product(store: &MemoryStore, sku: &str, cents: i64, category_id: Option<Uuid>) -> Product {
        let mut product = Product::create(Sku::new(sku).unwrap(), sku, &sku.to_lowercase(), Money::from_cents(cents));
        product.category_id = category_id;
        store.create_product(&product).await.unwrap();
        product
    }

    fn errors_of(result: Result<BulkPriceChange>) -> FieldErrors {
        match result {
            Err(Error::Validation(errors)) => errors,
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn needs_exactly_one_target() {
        let store = MemoryStore::new();
        let none = PricingBulkUpdateRequest {
            operation: "set".into(),
            value: Decimal::ONE,
            ..Default::default()
        };
        assert!(errors_of(none.validate(&store).await).has("product_ids"));

        let both = PricingBulkUpdateRequest {
            product_ids: vec![Uuid::now_v7()],
            category_id: Some(Uuid::now_v7()),
            operation: "set".into(),
            value: Decimal::ONE,
        };
        assert!(errors_of(both.validate(&store).await).has("category_id"));
    }

    #[tokio::test]
    async fn rejects_whole_batch_when_a_price_drops_too_low() {
        let store = MemoryStore::new();
        let cheap = product(&store, "LIP-1", 300, None).await;
        let dear = product(&store, "LIP-2", 3000, None).await;
        let request = PricingBulkUpdateRequest {
            product_ids: vec![cheap.id, dear.id],
            operation: "decrease_amount".into(),
            value: Decimal::from(5),
            ..Default::default()
        };
        let errors = errors_of(request.validate(&store).await);
        assert_eq!(errors.get("value").unwrap(), ["The new price of LIP-1 would fall below 0.01."]);
    }

    #[tokio::test]
    async fn prices_stay_within_column_size() {
        let store = MemoryStore::new();
        let dear = product(&store, "PERFUME-1", 999_999_999_000, None).await;

        let huge = PricingBulkUpdateRequest {
            product_ids: vec![dear.id],
            operation: "set".into(),
            value: Decimal::MAX,
            ..Default::default()
        };
        assert_eq!(
            errors_of(huge.validate(&store).await).get("value").unwrap(),
            ["The value may not be greater than 9999999999.99."]
        );

        let bump = PricingBulkUpdateRequest {
            product_ids: vec![dear.id],
            operation: "increase_amount".into(),
            value: Decimal::from(100),
            ..Default::default()
        };
        assert_eq!(
            errors_of(bump.validate(&store).await).get("value").unwrap(),
            ["The new price of PERFUME-1 would exceed 9999999999.99."]
        );
    }

    #[tokio::test]
    async fn category_target_includes_descendants_and_clears_stale_compare_at() {
        let store = MemoryStore::new();
        let makeup = Category::new("Makeup", "makeup");
        let mut lips = Category::new("Lips", "lips");
        lips.parent_id = Some(makeup.id);
        store.create_category(&makeup).await.unwrap();
        store.create_category(&lips).await.unwrap();

        let mut gloss = product(&store, "GLOSS-1", 1000, Some(lips.id)).await;
        gloss.compare_at_price = Some(Money::from_cents(1100));
        store.update_product(&gloss).await.unwrap();
        product(&store, "OTHER-1", 1000, None).await;

        let request = PricingBulkUpdateRequest {
            category_id: Some(makeup.id),
            operation: "increase_percent".into(),
            value: Decimal::from(20),
            ..Default::default()
        };
        let change = request.validate(&store).await.unwrap();
        assert_eq!(change.products.len(), 1);
        assert_eq!(change.products[0].price, Money::from_cents(1200));
        assert_eq!(change.products[0].compare_at_price, None);
    }

    #[tokio::test]
    async fn unknown_operation_and_non_positive_value() {
        let store = MemoryStore::new();
        let p = product(&store, "EYE-1", 1000, None).await;
        let request = PricingBulkUpdateRequest {
            product_ids: vec![p.id],
            operation: "double".into(),
            value: Decimal::ZERO,
            ..Default::default()
        };
        let errors = errors_of(request.validate(&store).await);
        assert_eq!(errors.get("operation").unwrap(), ["The selected operation is invalid."]);
        assert_eq!(errors.get("value").unwrap(), ["The value must be greater than 0."]);
    }
}
