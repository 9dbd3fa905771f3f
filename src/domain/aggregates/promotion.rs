//! Automatic promotions and code-based coupons

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::domain::value_objects::Money;

/// How much comes off.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Discount {
    Percentage {
        percent: Decimal,
        max_discount: Option<Money>,
    },
    FixedAmount {
        amount: Money,
    },
    FreeShipping,
}

impl Discount {
    /// Amount taken off `base`; never more than `base`.
    pub fn amount_off(&self, base: Money) -> Money {
        let raw = match self {
            Discount::Percentage { percent, max_discount } => {
                let off = base.percent(*percent);
                match max_discount {
                    Some(cap) if off > *cap => *cap,
                    _ => off,
                }
            }
            Discount::FixedAmount { amount } => *amount,
            Discount::FreeShipping => Money::ZERO,
        };
        raw.min(base)
    }

    pub fn is_free_shipping(&self) -> bool {
        matches!(self, Discount::FreeShipping)
    }
}

/// Which cart lines a promotion covers.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "ids", rename_all = "snake_case")]
pub enum PromotionScope {
    All,
    /// Listed categories and everything below them.
    Categories(Vec<Uuid>),
    Products(Vec<Uuid>),
}

impl PromotionScope {
    /// `category_path` is the product's category followed by its ancestors.
    pub fn covers(&self, product_id: Uuid, category_path: &[Uuid]) -> bool {
        match self {
            PromotionScope::All => true,
            PromotionScope::Categories(ids) => category_path.iter().any(|c| ids.contains(c)),
            PromotionScope::Products(ids) => ids.contains(&product_id),
        }
    }
}

fn in_window(now: DateTime<Utc>, starts_at: Option<DateTime<Utc>>, ends_at: Option<DateTime<Utc>>) -> bool {
    starts_at.map_or(true, |s| now >= s) && ends_at.map_or(true, |e| now <= e)
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Promotion {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub discount: Discount,
    pub scope: PromotionScope,
    pub min_order_amount: Option<Money>,
    pub starts_at: Option<DateTime<Utc>>,
    pub ends_at: Option<DateTime<Utc>>,
    pub is_active: bool,
    /// Breaks ties between equally good promotions; higher wins.
    pub priority: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Promotion {
    pub fn new(name: impl Into<String>, discount: Discount, scope: PromotionScope) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(),
            name: name.into(),
            description: None,
            discount,
            scope,
            min_order_amount: None,
            starts_at: None,
            ends_at: None,
            is_active: true,
            priority: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_running(&self, now: DateTime<Utc>) -> bool {
        self.is_active && in_window(now, self.starts_at, self.ends_at)
    }

    /// Running and the order is large enough.
    pub fn qualifies(&self, now: DateTime<Utc>, order_subtotal: Money) -> bool {
        self.is_running(now) && self.min_order_amount.map_or(true, |min| order_subtotal >= min)
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Coupon {
    pub id: Uuid,
    pub code: String,
    pub description: Option<String>,
    pub discount: Discount,
    pub min_order_amount: Option<Money>,
    pub usage_limit: Option<i32>,
    pub per_customer_limit: Option<i32>,
    pub used_count: i32,
    pub starts_at: Option<DateTime<Utc>>,
    pub ends_at: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CouponRejection {
    #[error("The coupon code is invalid.")]
    Unknown,
    #[error("This coupon is no longer active.")]
    Inactive,
    #[error("This coupon is not valid yet.")]
    NotStarted,
    #[error("This coupon has expired.")]
    Expired,
    #[error("This coupon requires an order of at least {minimum}.")]
    BelowMinimum { minimum: Money },
    #[error("This coupon has reached its usage limit.")]
    UsageLimitReached,
    #[error("You have already used this coupon the maximum number of times.")]
    CustomerLimitReached,
}

impl Coupon {
    pub fn new(code: &str, discount: Discount) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(),
            code: normalize_code(code),
            description: None,
            discount,
            min_order_amount: None,
            usage_limit: None,
            per_customer_limit: None,
            used_count: 0,
            starts_at: None,
            ends_at: None,
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }

    /// Usage limits only; callers recheck these atomically when redeeming.
    pub fn check_limits(&self, customer_uses: i64) -> Result<(), CouponRejection> {
        if self.usage_limit.map_or(false, |limit| self.used_count >= limit) {
            return Err(CouponRejection::UsageLimitReached);
        }
        if self
            .per_customer_limit
            .map_or(false, |limit| customer_uses >= i64::from(limit))
        {
            return Err(CouponRejection::CustomerLimitReached);
        }
        Ok(())
    }

    pub fn check_redeemable(
        &self,
        now: DateTime<Utc>,
        order_subtotal: Money,
        customer_uses: i64,
    ) -> Result<(), CouponRejection> {
        if !self.is_active {
            return Err(CouponRejection::Inactive);
        }
        if self.starts_at.map_or(false, |s| now < s) {
            return Err(CouponRejection::NotStarted);
        }
        if self.ends_at.map_or(false, |e| now > e) {
            return Err(CouponRejection::Expired);
        }
        if let Some(minimum) = self.min_order_amount {
            if order_subtotal < minimum {
                return Err(CouponRejection::BelowMinimum { minimum });
            }
        }
        self.check_limits(customer_uses)
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// Coupon codes compare case-insensitively and are stored upper-case.
pub fn normalize_code(code: &str) -> String {
    code.trim().to_uppercase()
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CouponUsage {
    pub id: Uuid,
    pub coupon_id: Uuid,
    pub user_id: Uuid,
    pub order_id: Uuid,
    pub discount: Money,
    pub used_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn percentage_is_capped() {
        let d = Discount::Percentage {
            percent: Decimal::new(20, 0),
            max_discount: Some(Money::from_cents(1500)),
        };
        assert_eq!(d.amount_off(Money::from_cents(5000)), Money::from_cents(1000));
        assert_eq!(d.amount_off(Money::from_cents(10000)), Money::from_cents(1500));
    }

    #[test]
    fn fixed_never_exceeds_base() {
        let d = Discount::FixedAmount {
            amount: Money::from_cents(2000),
        };
        assert_eq!(d.amount_off(Money::from_cents(1200)), Money::from_cents(1200));
        assert_eq!(Discount::FreeShipping.amount_off(Money::from_cents(1200)), Money::ZERO);
    }

    #[test]
    fn scope_covers_category_ancestry() {
        let parent = Uuid::now_v7();
        let child = Uuid::now_v7();
        let product = Uuid::now_v7();
        let scope = PromotionScope::Categories(vec![parent]);
        assert!(scope.covers(product, &[child, parent]));
        assert!(!scope.covers(product, &[child]));
        assert!(PromotionScope::Products(vec![product]).covers(product, &[]));
    }

    #[test]
    fn promotion_window_and_minimum() {
        let now = Utc::now();
        let mut promo = Promotion::new("Spring", Discount::FreeShipping, PromotionScope::All);
        promo.min_order_amount = Some(Money::from_cents(3000));
        assert!(promo.qualifies(now, Money::from_cents(3000)));
        assert!(!promo.qualifies(now, Money::from_cents(2999)));
        promo.ends_at = Some(now - Duration::days(1));
        assert!(!promo.is_running(now));
    }

    #[test]
    fn coupon_rejections() {
        let now = Utc::now();
        let mut coupon = Coupon::new(" welcome10 ", Discount::FreeShipping);
        assert_eq!(coupon.code, "WELCOME10");
        coupon.min_order_amount = Some(Money::from_cents(2000));
        assert_eq!(
            coupon.check_redeemable(now, Money::from_cents(1000), 0),
            Err(CouponRejection::BelowMinimum {
                minimum: Money::from_cents(2000)
            })
        );
        coupon.per_customer_limit = Some(1);
        assert_eq!(
            coupon.check_redeemable(now, Money::from_cents(2000), 1),
            Err(CouponRejection::CustomerLimitReached)
        );
        coupon.usage_limit = Some(5);
        coupon.used_count = 5;
        assert_eq!(coupon.check_limits(0), Err(CouponRejection::UsageLimitReached));
        coupon.starts_at = Some(now + Duration::hours(1));
        assert_eq!(
            coupon.check_redeemable(now, Money::from_cents(5000), 0),
            Err(CouponRejection::NotStarted)
        );
        coupon.is_active = false;
        assert_eq!(
            coupon.check_redeemable(now, Money::from_cents(5000), 0),
            Err(CouponRejection::Inactive)
        );
    }
}
