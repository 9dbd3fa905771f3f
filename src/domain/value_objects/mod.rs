//! Value Objects for the catalog and checkout

use std::fmt;
use std::iter::Sum;
use std::ops::{Add, Sub};

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// SKU (Stock Keeping Unit) value object
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Sku(String);

impl Sku {
    pub const MAX_LEN: usize = 50;

    pub fn new(value: impl Into<String>) -> Result<Self, SkuError> {
        let value = value.into().trim().to_uppercase();
        if value.is_empty() {
            return Err(SkuError::Empty);
        }
        if value.len() > Self::MAX_LEN {
            return Err(SkuError::TooLong);
        }
        if !value.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')) {
            return Err(SkuError::InvalidCharacter);
        }
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Sku {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SkuError {
    #[error("The sku field is required.")]
    Empty,
    #[error("The sku may not be greater than 50 characters.")]
    TooLong,
    #[error("The sku may only contain letters, numbers, dashes, underscores and dots.")]
    InvalidCharacter,
}

/// URL slug: lowercase ASCII letters, digits and single dashes.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Slug(String);

impl Slug {
    pub const MAX_LEN: usize = 255;

    /// Derives a slug from a display name ("Rose & Oud Serum" -> "rose-oud-serum").
    pub fn from_name(name: &str) -> Result<Self, SlugError> {
        let mut slug = String::with_capacity(name.len());
        let mut pending_dash = false;
        for c in name.chars() {
            if c.is_ascii_alphanumeric() {
                if pending_dash && !slug.is_empty() {
                    slug.push('-');
                }
                pending_dash = false;
                slug.push(c.to_ascii_lowercase());
            } else {
                pending_dash = true;
            }
        }
        Self::parse(slug)
    }

    /// Accepts an explicit slug as-is after checking its shape.
    pub fn parse(value: impl Into<String>) -> Result<Self, SlugError> {
        let value = value.into();
        if value.is_empty() {
            return Err(SlugError::Empty);
        }
        if value.len() > Self::MAX_LEN {
            return Err(SlugError::TooLong);
        }
        let shape_ok = value
            .split('-')
            .all(|part| !part.is_empty() && part.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
        if !shape_ok {
            return Err(SlugError::Malformed);
        }
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for Slug {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SlugError {
    #[error("The slug could not be derived; use letters or numbers.")]
    Empty,
    #[error("The slug may not be greater than 255 characters.")]
    TooLong,
    #[error("The slug may only contain lowercase letters, numbers and single dashes.")]
    Malformed,
}

/// Money value object in the store currency, always held at two decimal places.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money(Decimal);

impl Money {
    pub const ZERO: Money = Money(Decimal::ZERO);
    /// Largest amount a price column holds: 9 999 999 999.99.
    pub const MAX: Money = Money(Decimal::from_parts(0xD4A5_0FFF, 0xE8, 0, false, 2));

    pub fn new(amount: Decimal) -> Self {
        Self(round2(amount))
    }

    /// Whole units plus cents, e.g. `Money::from_cents(1999)` is 19.99.
    pub fn from_cents(cents: i64) -> Self {
        Self(Decimal::new(cents, 2))
    }

    pub fn amount(&self) -> Decimal {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    pub fn is_negative(&self) -> bool {
        self.0.is_sign_negative() && !self.0.is_zero()
    }

    pub fn times(&self, quantity: i32) -> Money {
        Money::new(self.0 * Decimal::from(quantity))
    }

    /// `percent` of this amount, rounded half away from zero.
    pub fn percent(&self, percent: Decimal) -> Money {
        Money::new(self.0 * percent / Decimal::ONE_HUNDRED)
    }

    /// Subtraction floored at zero.
    pub fn saturating_sub(&self, other: Money) -> Money {
        if other.0 >= self.0 {
            Money::ZERO
        } else {
            Money(self.0 - other.0)
        }
    }
}

impl Add for Money {
    type Output = Money;

    fn add(self, rhs: Money) -> Money {
        Money(self.0 + rhs.0)
    }
}

impl Sub for Money {
    type Output = Money;

    fn sub(self, rhs: Money) -> Money {
        Money(self.0 - rhs.0)
    }
}

impl Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Money {
        iter.fold(Money::ZERO, Add::add)
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2}", self.0)
    }
}

fn round2(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sku() {
        let sku = Sku::new(" prod-001 ").unwrap();
        assert_eq!(sku.as_str(), "PROD-001");
        assert_eq!(Sku::new("  "), Err(SkuError::Empty));
        assert_eq!(Sku::new("a b"), Err(SkuError::InvalidCharacter));
        assert_eq!(Sku::new("X".repeat(51)), Err(SkuError::TooLong));
    }

    #[test]
    fn slug_from_name() {
        assert_eq!(Slug::from_name("Rose & Oud  Serum!").unwrap().as_str(), "rose-oud-serum");
        assert_eq!(Slug::from_name("  Lip Gloss 2.0 ").unwrap().as_str(), "lip-gloss-2-0");
        assert_eq!(Slug::from_name("***"), Err(SlugError::Empty));
    }

    #[test]
    fn slug_parse_rejects_bad_shapes() {
        assert!(Slug::parse("night-cream").is_ok());
        assert_eq!(Slug::parse("Night-Cream"), Err(SlugError::Malformed));
        assert_eq!(Slug::parse("night--cream"), Err(SlugError::Malformed));
        assert_eq!(Slug::parse("-cream"), Err(SlugError::Malformed));
    }

    #[test]
    fn test_money_math() {
        let a = Money::from_cents(1000);
        let b = Money::from_cents(250);
        assert_eq!(a + b, Money::from_cents(1250));
        assert_eq!(b.saturating_sub(a), Money::ZERO);
        assert_eq!(Money::from_cents(1999).times(3), Money::from_cents(5997));
        assert_eq!(Money::new(Decimal::new(10005, 3)), Money::from_cents(1001));
        assert_eq!(Money::from_cents(3333).percent(Decimal::new(15, 0)), Money::from_cents(500));
        assert_eq!(Money::from_cents(1999).to_string(), "19.99");
    }

    #[test]
    fn money_max_matches_price_columns() {
        assert_eq!(Money::MAX, Money::from_cents(999_999_999_999));
        assert_eq!(Money::MAX.to_string(), "9999999999.99");
        // a capped price times the largest cart quantity stays representable
        assert_eq!(Money::MAX.times(1000).amount(), Decimal::new(999_999_999_999_000, 2));
    }
}
