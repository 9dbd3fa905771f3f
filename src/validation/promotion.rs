use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use uuid::Uuid;
use validator::Validate;

use super::{check_window, clean, positive_money, shape};
use crate::domain::aggregates::promotion::normalize_code;
use crate::domain::aggregates::{Coupon, Discount, Promotion, PromotionScope};
use crate::domain::value_objects::Money;
use crate::error::{Error, FieldErrors, Result};
use crate::store::Store;

/// Discount as submitted: `{"type": "percentage", "value": 15, "max_discount": 20}`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DiscountRequest {
    #[serde(rename = "type")]
    pub kind: String,
    pub value: Option<Decimal>,
    pub max_discount: Option<Decimal>,
}

impl DiscountRequest {
    fn parse(&self, errors: &mut FieldErrors) -> Option<Discount> {
        let value = |errors: &mut FieldErrors| match self.value {
            Some(v) => Some(v),
            None => {
                errors.add("discount.value", "The discount value field is required.");
                None
            }
        };
        match self.kind.trim() {
            "percentage" => {
                let percent = value(errors)?;
                if percent <= Decimal::ZERO || percent > Decimal::ONE_HUNDRED {
                    errors.add("discount.value", "The discount value must be greater than 0 and at most 100.");
                    return None;
                }
                let max_discount = match self.max_discount {
                    Some(cap) => Some(positive_money(errors, "discount.max_discount", cap)?),
                    None => None,
                };
                Some(Discount::Percentage { percent, max_discount })
            }
            "fixed_amount" => {
                let raw = value(errors)?;
                let amount = positive_money(errors, "discount.value", raw)?;
                Some(Discount::FixedAmount { amount })
            }
            "free_shipping" => Some(Discount::FreeShipping),
            _ => {
                errors.add("discount.type", "The selected discount type is invalid.");
                None
            }
        }
    }
}

fn min_order(errors: &mut FieldErrors, value: Option<Decimal>) -> Option<Option<Money>> {
    match value {
        None => Some(None),
        Some(v) => positive_money(errors, "min_order_amount", v).map(Some),
    }
}

#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct PromotionRequest {
    #[validate(length(min = 1, max = 255))]
    pub name: String,
    #[validate(length(max = 1000))]
    pub description: Option<String>,
    pub discount: DiscountRequest,
    /// `all` (default), `categories` or `products`.
    pub scope: Option<String>,
    #[serde(default)]
    pub scope_ids: Vec<Uuid>,
    pub min_order_amount: Option<Decimal>,
    pub starts_at: Option<DateTime<Utc>>,
    pub ends_at: Option<DateTime<Utc>>,
    pub is_active: Option<bool>,
    #[validate(range(min = -1000, max = 1000))]
    pub priority: Option<i32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PromotionInput {
    pub name: String,
    pub description: Option<String>,
    pub discount: Discount,
    pub scope: PromotionScope,
    pub min_order_amount: Option<Money>,
    pub starts_at: Option<DateTime<Utc>>,
    pub ends_at: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub priority: i32,
}

impl PromotionRequest {
    pub async fn validate(&self, store: &dyn Store) -> Result<PromotionInput> {
        let mut errors = shape(self);
        let discount = self.discount.parse(&mut errors);
        let min_order_amount = min_order(&mut errors, self.min_order_amount);
        check_window(&mut errors, self.starts_at, self.ends_at);
        let scope = self.scope(store, &mut errors).await?;

        match (discount, scope, min_order_amount) {
            (Some(discount), Some(scope), Some(min_order_amount)) if errors.is_empty() => Ok(PromotionInput {
                name: self.name.trim().to_string(),
                description: clean(&self.description),
                discount,
                scope,
                min_order_amount,
                starts_at: self.starts_at,
                ends_at: self.ends_at,
                is_active: self.is_active.unwrap_or(true),
                priority: self.priority.unwrap_or(0),
            }),
            _ => Err(Error::Validation(errors)),
        }
    }

    async fn scope(&self, store: &dyn Store, errors: &mut FieldErrors) -> Result<Option<PromotionScope>> {
        let kind = self.scope.as_deref().map(str::trim).unwrap_or("all");
        if kind != "all" && self.scope_ids.is_empty() {
            errors.add("scope_ids", "The scope ids field is required unless scope is all.");
            return Ok(None);
        }
        let scope = match kind {
            "all" => PromotionScope::All,
            "categories" => {
                for (index, id) in self.scope_ids.iter().enumerate() {
                    if store.find_category(*id).await?.is_none() {
                        errors.add(format!("scope_ids.{index}"), "The selected category is invalid.");
                    }
                }
                PromotionScope::Categories(self.scope_ids.clone())
            }
            "products" => {
                let found = store.find_products(&self.scope_ids).await?;
                for (index, id) in self.scope_ids.iter().enumerate() {
                    if !found.iter().any(|p| p.id == *id) {
                        errors.add(format!("scope_ids.{index}"), "The selected product is invalid.");
                    }
                }
                PromotionScope::Products(self.scope_ids.clone())
            }
            _ => {
                errors.add("scope", "The selected scope is invalid.");
                return Ok(None);
            }
        };
        Ok(Some(scope))
    }
}

impl PromotionInput {
    pub fn apply(self, promotion: &mut Promotion) {
        promotion.name = self.name;
        promotion.description = self.description;
        promotion.discount = self.discount;
        promotion.scope = self.scope;
        promotion.min_order_amount = self.min_order_amount;
        promotion.starts_at = self.starts_at;
        promotion.ends_at = self.ends_at;
        promotion.is_active = self.is_active;
        promotion.priority = self.priority;
        promotion.touch();
    }

    pub fn into_promotion(self) -> Promotion {
        let mut promotion = Promotion::new(&self.name, self.discount.clone(), self.scope.clone());
        self.apply(&mut promotion);
        promotion
    }
}

#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct CouponRequest {
    pub code: String,
    #[validate(length(max = 1000))]
    pub description: Option<String>,
    pub discount: DiscountRequest,
    pub min_order_amount: Option<Decimal>,
    #[validate(range(min = 1))]
    pub usage_limit: Option<i32>,
    #[validate(range(min = 1))]
    pub per_customer_limit: Option<i32>,
    pub starts_at: Option<DateTime<Utc>>,
    pub ends_at: Option<DateTime<Utc>>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CouponInput {
    pub code: String,
    pub description: Option<String>,
    pub discount: Discount,
    pub min_order_amount: Option<Money>,
    pub usage_limit: Option<i32>,
    pub per_customer_limit: Option<i32>,
    pub starts_at: Option<DateTime<Utc>>,
    pub ends_at: Option<DateTime<Utc>>,
    pub is_active: bool,
}

/// Upper-case letters, digits, `_` and `-`, 3 to 32 characters.
fn is_valid_code(code: &str) -> bool {
    (3..=32).contains(&code.len())
        && code
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || matches!(c, '_' | '-'))
}

impl CouponRequest {
    /// `ignore` is the coupon being updated.
    pub async fn validate(&self, store: &dyn Store, ignore: Option<Uuid>) -> Result<CouponInput> {
        let mut errors = shape(self);
        let code = normalize_code(&self.code);
        if !is_valid_code(&code) {
            errors.add(
                "code",
                "The code must be 3 to 32 characters of letters, numbers, dashes and underscores.",
            );
        } else if let Some(existing) = store.find_coupon_by_code(&code).await? {
            if Some(existing.id) != ignore {
                errors.add("code", "The code has already been taken.");
            }
        }
        let discount = self.discount.parse(&mut errors);
        let min_order_amount = min_order(&mut errors, self.min_order_amount);
        check_window(&mut errors, self.starts_at, self.ends_at);

        match (discount, min_order_amount) {
            (Some(discount), Some(min_order_amount)) if errors.is_empty() => Ok(CouponInput {
                code,
                description: clean(&self.description),
                discount,
                min_order_amount,
                usage_limit: self.usage_limit,
                per_customer_limit: self.per_customer_limit,
                starts_at: self.starts_at,
                ends_at: self.ends_at,
                is_active: self.is_active.unwrap_or(true),
            }),
            _ => Err(Error::Validation(errors)),
        }
    }
}

impl CouponInput {
    /// Keeps `used_count`.
    pub fn apply(self, coupon: &mut Coupon) {
        coupon.code = self.code;
        coupon.description = self.description;
        coupon.discount = self.discount;
        coupon.min_order_amount = self.min_order_amount;
        coupon.usage_limit = self.usage_limit;
        coupon.per_customer_limit = self.per_customer_limit;
        coupon.starts_at = self.starts_at;
        coupon.ends_at = self.ends_at;
        coupon.is_active = self.is_active;
        coupon.touch();
    }

    pub fn into_coupon(self) -> Coupon {
        let mut coupon = Coupon::new(&self.code, self.discount.clone());
        self.apply(&mut coupon);
        coupon
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use crate::store::MemoryStore;

    fn discount(kind: &str, value: Option<i64>) -> DiscountRequest {
        DiscountRequest {
            kind: kind.into(),
            value: value.map(Decimal::from),
            max_discount: None,
        }
    }

    fn errors_of<T: std::fmt::Debug>(result: Result<T>) -> FieldErrors {
        match result {
            Err(Error::Validation(errors)) => errors,
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn percent_must_be_in_range() {
        let store = MemoryStore::new();
        let mut req = PromotionRequest {
            name: "Summer".into(),
            discount: discount("percentage", Some(150)),
            ..Default::default()
        };
        let errors = errors_of(req.validate(&store).await);
        assert_eq!(
            errors.get("discount.value").unwrap(),
            ["The discount value must be greater than 0 and at most 100."]
        );

        req.discount = discount("percentage", Some(100));
        let input = req.validate(&store).await.unwrap();
        assert_eq!(input.scope, PromotionScope::All);
    }

    #[tokio::test]
    async fn window_and_scope_rules() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let req = PromotionRequest {
            name: "Flash".into(),
            discount: discount("fixed_amount", Some(5)),
            scope: Some("categories".into()),
            scope_ids: vec![Uuid::now_v7()],
            starts_at: Some(now),
            ends_at: Some(now - Duration::hours(1)),
            ..Default::default()
        };
        let errors = errors_of(req.validate(&store).await);
        assert_eq!(errors.get("ends_at").unwrap(), ["The ends at must be a date after starts at."]);
        assert_eq!(errors.get("scope_ids.0").unwrap(), ["The selected category is invalid."]);

        let req = PromotionRequest {
            name: "Flash".into(),
            discount: discount("bogo", None),
            scope: Some("products".into()),
            ..Default::default()
        };
        let errors = errors_of(req.validate(&store).await);
        assert!(errors.has("discount.type"));
        assert!(errors.has("scope_ids"));
    }

    #[tokio::test]
    async fn coupon_code_pattern_and_uniqueness() {
        let store = MemoryStore::new();
        let req = CouponRequest {
            code: "a!".into(),
            discount: discount("free_shipping", None),
            ..Default::default()
        };
        assert!(errors_of(req.validate(&store, None).await).has("code"));

        let req = CouponRequest {
            code: " welcome10 ".into(),
            discount: discount("percentage", Some(10)),
            usage_limit: Some(0),
            ..Default::default()
        };
        assert!(errors_of(req.validate(&store, None).await).has("usage_limit"));

        let req = CouponRequest {
            usage_limit: Some(100),
            ..req
        };
        let coupon = req.validate(&store, None).await.unwrap().into_coupon();
        assert_eq!(coupon.code, "WELCOME10");
        store.create_coupon(&coupon).await.unwrap();

        let errors = errors_of(req.validate(&store, None).await);
        assert_eq!(errors.get("code").unwrap(), ["The code has already been taken."]);
        assert!(req.validate(&store, Some(coupon.id)).await.is_ok());
    }
}
