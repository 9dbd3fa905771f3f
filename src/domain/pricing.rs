//! Cart pricing: promotions, coupons, shipping and tax.
//!
//! Each line gets at most one automatic promotion, the one taking the most
//! off (higher priority on a tie). A coupon then applies to what is left and
//! is spread over the lines in proportion to their net amounts, the last line
//! absorbing rounding. Shipping is a flat fee unless waived; tax is charged on
//! the discounted subtotal.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

use crate::domain::aggregates::product::{Product, ProductError};
use crate::domain::aggregates::promotion::{Coupon, CouponRejection, Promotion};
use crate::domain::value_objects::Money;

/// Store-wide shipping and tax settings.
#[derive(Clone, Debug, PartialEq)]
pub struct PricingPolicy {
    /// Fraction, e.g. `0.08` for 8%.
    pub tax_rate: Decimal,
    pub shipping_flat_fee: Money,
    /// Net subtotal at which shipping becomes free; `None` disables it.
    pub free_shipping_threshold: Option<Money>,
}

impl Default for PricingPolicy {
    fn default() -> Self {
        Self {
            tax_rate: Decimal::ZERO,
            shipping_flat_fee: Money::from_cents(500),
            free_shipping_threshold: Some(Money::from_cents(5000)),
        }
    }
}

/// One cart line ready for pricing.
#[derive(Clone, Debug, PartialEq)]
pub struct LineInput {
    pub product_id: Uuid,
    pub variant_id: Option<Uuid>,
    pub sku: String,
    pub name: String,
    pub quantity: i32,
    pub unit_price: Money,
    /// The product's category followed by its ancestors.
    pub category_path: Vec<Uuid>,
}

impl LineInput {
    pub fn for_product(
        product: &Product,
        variant_id: Option<Uuid>,
        quantity: i32,
        category_path: Vec<Uuid>,
    ) -> Result<Self, ProductError> {
        Ok(Self {
            product_id: product.id,
            variant_id,
            sku: product.line_sku(variant_id),
            name: product.line_name(variant_id),
            quantity,
            unit_price: product.unit_price(variant_id)?,
            category_path,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PricedLine {
    pub product_id: Uuid,
    pub variant_id: Option<Uuid>,
    pub sku: String,
    pub name: String,
    pub quantity: i32,
    pub unit_price: Money,
    pub subtotal: Money,
    pub promotion_discount: Money,
    pub promotion_id: Option<Uuid>,
    pub coupon_discount: Money,
}

impl PricedLine {
    pub fn discount(&self) -> Money {
        self.promotion_discount + self.coupon_discount
    }

    pub fn total(&self) -> Money {
        self.subtotal.saturating_sub(self.discount())
    }

    fn after_promotion(&self) -> Money {
        self.subtotal.saturating_sub(self.promotion_discount)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Quote {
    pub lines: Vec<PricedLine>,
    pub subtotal: Money,
    pub promotion_discount: Money,
    pub coupon_discount: Money,
    pub discount_total: Money,
    pub shipping_total: Money,
    pub tax_total: Money,
    pub total: Money,
    pub coupon_code: Option<String>,
    pub free_shipping: bool,
}

/// A coupon offered at checkout with the customer's prior redemptions of it.
#[derive(Clone, Copy, Debug)]
pub struct CouponClaim<'a> {
    pub coupon: &'a Coupon,
    pub customer_uses: i64,
}

/// Prices `lines`. Fails only when the claimed coupon cannot be redeemed.
pub fn quote(
    lines: &[LineInput],
    promotions: &[Promotion],
    coupon: Option<CouponClaim<'_>>,
    policy: &PricingPolicy,
    now: DateTime<Utc>,
) -> Result<Quote, CouponRejection> {
    let gross: Money = lines.iter().map(|l| l.unit_price.times(l.quantity)).sum();
    let running: Vec<&Promotion> = promotions.iter().filter(|p| p.qualifies(now, gross)).collect();

    let mut free_shipping = false;
    let mut priced: Vec<PricedLine> = Vec::with_capacity(lines.len());
    for line in lines {
        let subtotal = line.unit_price.times(line.quantity);
        let covering = running
            .iter()
            .filter(|p| p.scope.covers(line.product_id, &line.category_path));
        let mut best: Option<(Money, i32, Uuid)> = None;
        for promotion in covering {
            if promotion.discount.is_free_shipping() {
                free_shipping = true;
                continue;
            }
            let amount = promotion.discount.amount_off(subtotal);
            if amount.is_zero() {
                continue;
            }
            let better = match best {
                None => true,
                Some((a, priority, _)) => amount > a || (amount == a && promotion.priority > priority),
            };
            if better {
                best = Some((amount, promotion.priority, promotion.id));
            }
        }
        priced.push(PricedLine {
            product_id: line.product_id,
            variant_id: line.variant_id,
            sku: line.sku.clone(),
            name: line.name.clone(),
            quantity: line.quantity,
            unit_price: line.unit_price,
            subtotal,
            promotion_discount: best.map_or(Money::ZERO, |(a, _, _)| a),
            promotion_id: best.map(|(_, _, id)| id),
            coupon_discount: Money::ZERO,
        });
    }

    let promotion_discount: Money = priced.iter().map(|l| l.promotion_discount).sum();
    let after_promotions = gross.saturating_sub(promotion_discount);

    let mut coupon_discount = Money::ZERO;
    let mut coupon_code = None;
    if let Some(claim) = coupon {
        claim
            .coupon
            .check_redeemable(now, after_promotions, claim.customer_uses)?;
        if claim.coupon.discount.is_free_shipping() {
            free_shipping = true;
        }
        coupon_discount = claim.coupon.discount.amount_off(after_promotions);
        prorate(&mut priced, coupon_discount, after_promotions);
        coupon_code = Some(claim.coupon.code.clone());
    }

    let discount_total = promotion_discount + coupon_discount;
    let net = gross.saturating_sub(discount_total);
    let shipping_total = if priced.is_empty() || free_shipping {
        Money::ZERO
    } else if policy.free_shipping_threshold.map_or(false, |t| net >= t) {
        Money::ZERO
    } else {
        policy.shipping_flat_fee
    };
    let tax_total = Money::new(net.amount() * policy.tax_rate);

    Ok(Quote {
        lines: priced,
        subtotal: gross,
        promotion_discount,
        coupon_discount,
        discount_total,
        shipping_total,
        tax_total,
        total: net + shipping_total + tax_total,
        coupon_code,
        free_shipping,
    })
}

/// Spreads `amount` over lines by their post-promotion totals. Shares always
/// add up to `amount`, which never exceeds `base`.
fn prorate(lines: &mut [PricedLine], amount: Money, base: Money) {
    if amount.is_zero() || base.is_zero() {
        return;
    }
    let last = lines.len().saturating_sub(1);
    let mut assigned = Money::ZERO;
    for (index, line) in lines.iter_mut().enumerate() {
        let remaining = amount.saturating_sub(assigned);
        let share = if index == last {
            remaining
        } else {
            Money::new(amount.amount() * line.after_promotion().amount() / base.amount()).min(remaining)
        };
        line.coupon_discount = share.min(line.after_promotion());
        assigned = assigned + line.coupon_discount;
    }

    // cents left over by rounding or by a capped line go to lines with headroom
    let mut leftover = amount.saturating_sub(assigned);
    for line in lines.iter_mut() {
        if leftover.is_zero() {
            break;
        }
        let extra = leftover.min(line.after_promotion().saturating_sub(line.coupon_discount));
        line.coupon_discount = line.coupon_discount + extra;
        leftover = leftover.saturating_sub(extra);
    }
}

string_enum! {
    /// Bulk price edit applied to each targeted product.
    pub enum PriceOperation {
        Set => "set",
        IncreasePercent => "increase_percent",
        DecreasePercent => "decrease_percent",
        IncreaseAmount => "increase_amount",
        DecreaseAmount => "decrease_amount",
    }
}

impl PriceOperation {
    /// New price for `current`; may be zero or negative, callers reject those.
    pub fn apply(&self, current: Money, value: Decimal) -> Money {
        let current = current.amount();
        Money::new(match self {
            PriceOperation::Set => value,
            PriceOperation::IncreasePercent => current + current * value / Decimal::ONE_HUNDRED,
            PriceOperation::DecreasePercent => current - current * value / Decimal::ONE_HUNDRED,
            PriceOperation::IncreaseAmount => current + value,
            PriceOperation::DecreaseAmount => current - value,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::aggregates::promotion::{Discount, PromotionScope};

    fn line(cents: i64, quantity: i32) -> LineInput {
        LineInput {
            product_id: Uuid::now_v7(),
            variant_id: None,
            sku: "SKU-1".into(),
            name: "Item".into(),
            quantity,
            unit_price: Money::from_cents(cents),
            category_path: vec![],
        }
    }

    fn percent(p: i64) -> Discount {
        Discount::Percentage {
            percent: Decimal::new(p, 0),
            max_discount: None,
        }
    }

    #[test]
    fn no_discounts_charges_flat_shipping() {
        let q = quote(&[line(1000, 2)], &[], None, &PricingPolicy::default(), Utc::now()).unwrap();
        assert_eq!(q.subtotal, Money::from_cents(2000));
        assert_eq!(q.shipping_total, Money::from_cents(500));
        assert_eq!(q.total, Money::from_cents(2500));
    }

    #[test]
    fn coupon_shares_add_up_when_last_line_is_tiny() {
        let coupon = Coupon::new(
            "TWO02",
            Discount::FixedAmount {
                amount: Money::from_cents(202),
            },
        );
        let lines = [line(100, 1), line(100, 1), line(100, 1), line(100, 1), line(1, 1)];
        let claim = CouponClaim {
            coupon: &coupon,
            customer_uses: 0,
        };
        let q = quote(&lines, &[], Some(claim), &PricingPolicy::default(), Utc::now()).unwrap();
        let shares: Vec<Money> = q.lines.iter().map(|l| l.coupon_discount).collect();
        assert_eq!(shares.iter().copied().sum::<Money>(), Money::from_cents(202));
        assert_eq!(shares[4], Money::from_cents(1));
        assert!(q.lines.iter().all(|l| l.coupon_discount <= l.subtotal));
    }

    #[test]
    fn threshold_waives_shipping() {
        let q = quote(&[line(2500, 2)], &[], None, &PricingPolicy::default(), Utc::now()).unwrap();
        assert_eq!(q.shipping_total, Money::ZERO);
        assert_eq!(q.total, Money::from_cents(5000));
    }

    #[test]
    fn best_promotion_wins_without_stacking() {
        let small = Promotion::new("Ten", percent(10), PromotionScope::All);
        let big = Promotion::new(
            "Five off",
            Discount::FixedAmount {
                amount: Money::from_cents(500),
            },
            PromotionScope::All,
        );
        let q = quote(&[line(3000, 1)], &[small, big.clone()], None, &PricingPolicy::default(), Utc::now()).unwrap();
        assert_eq!(q.lines[0].promotion_discount, Money::from_cents(500));
        assert_eq!(q.lines[0].promotion_id, Some(big.id));
        assert_eq!(q.discount_total, Money::from_cents(500));
    }

    #[test]
    fn priority_breaks_ties() {
        let a = Promotion::new("A", percent(10), PromotionScope::All);
        let mut b = Promotion::new("B", percent(10), PromotionScope::All);
        b.priority = 5;
        let q = quote(&[line(1000, 1)], &[a, b.clone()], None, &PricingPolicy::default(), Utc::now()).unwrap();
        assert_eq!(q.lines[0].promotion_id, Some(b.id));
    }

    #[test]
    fn promotion_minimum_uses_gross_subtotal() {
        let mut promo = Promotion::new("Big basket", percent(20), PromotionScope::All);
        promo.min_order_amount = Some(Money::from_cents(4000));
        let q = quote(&[line(1000, 3)], &[promo.clone()], None, &PricingPolicy::default(), Utc::now()).unwrap();
        assert_eq!(q.promotion_discount, Money::ZERO);
        let q = quote(&[line(1000, 4)], &[promo], None, &PricingPolicy::default(), Utc::now()).unwrap();
        assert_eq!(q.promotion_discount, Money::from_cents(800));
    }

    #[test]
    fn coupon_is_prorated_with_remainder_on_last_line() {
        let coupon = Coupon::new(
            "SAVE10",
            Discount::FixedAmount {
                amount: Money::from_cents(1000),
            },
        );
        let lines = [line(1000, 1), line(1000, 1), line(1000, 1)];
        let claim = CouponClaim {
            coupon: &coupon,
            customer_uses: 0,
        };
        let q = quote(&lines, &[], Some(claim), &PricingPolicy::default(), Utc::now()).unwrap();
        let shares: Vec<Money> = q.lines.iter().map(|l| l.coupon_discount).collect();
        assert_eq!(
            shares,
            vec![Money::from_cents(333), Money::from_cents(333), Money::from_cents(334)]
        );
        assert_eq!(q.coupon_discount, Money::from_cents(1000));
        assert_eq!(q.coupon_code.as_deref(), Some("SAVE10"));
        assert_eq!(q.total, Money::from_cents(2500));
    }

    #[test]
    fn rejected_coupon_fails_the_quote() {
        let mut coupon = Coupon::new("ONCE", percent(10));
        coupon.per_customer_limit = Some(1);
        let claim = CouponClaim {
            coupon: &coupon,
            customer_uses: 1,
        };
        let err = quote(&[line(1000, 1)], &[], Some(claim), &PricingPolicy::default(), Utc::now()).unwrap_err();
        assert_eq!(err, CouponRejection::CustomerLimitReached);
    }

    #[test]
    fn free_shipping_promotion_and_tax() {
        let promo = Promotion::new("Ship free", Discount::FreeShipping, PromotionScope::All);
        let policy = PricingPolicy {
            tax_rate: Decimal::new(8, 2),
            ..PricingPolicy::default()
        };
        let q = quote(&[line(1250, 1)], &[promo], None, &policy, Utc::now()).unwrap();
        assert!(q.free_shipping);
        assert_eq!(q.shipping_total, Money::ZERO);
        assert_eq!(q.tax_total, Money::from_cents(100));
        assert_eq!(q.total, Money::from_cents(1350));
    }

    #[test]
    fn category_scoped_promotion_skips_other_lines() {
        let category = Uuid::now_v7();
        let promo = Promotion::new("Skincare", percent(50), PromotionScope::Categories(vec![category]));
        let mut covered = line(1000, 1);
        covered.category_path = vec![Uuid::now_v7(), category];
        let q = quote(&[covered, line(1000, 1)], &[promo], None, &PricingPolicy::default(), Utc::now()).unwrap();
        assert_eq!(q.lines[0].promotion_discount, Money::from_cents(500));
        assert_eq!(q.lines[1].promotion_discount, Money::ZERO);
    }

    #[test]
    fn price_operations() {
        let base = Money::from_cents(2000);
        assert_eq!(PriceOperation::Set.apply(base, Decimal::new(1550, 2)), Money::from_cents(1550));
        assert_eq!(PriceOperation::IncreasePercent.apply(base, Decimal::from(10)), Money::from_cents(2200));
        assert_eq!(PriceOperation::DecreasePercent.apply(base, Decimal::new(125, 1)), Money::from_cents(1750));
        assert_eq!(PriceOperation::IncreaseAmount.apply(base, Decimal::new(99, 2)), Money::from_cents(2099));
        assert!(PriceOperation::DecreaseAmount.apply(base, Decimal::from(25)).is_negative());
        assert_eq!("decrease_amount".parse::<PriceOperation>().unwrap(), PriceOperation::DecreaseAmount);
    }
}
