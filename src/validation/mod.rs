//! Request validation.
//!
//! Every request type derives [`validator::Validate`] for shape rules and
//! adds an async pass against current rows (existence, uniqueness, stock
//! sufficiency). Both passes collect into one [`FieldErrors`] so a client
//! sees every problem at once; the result is a typed input ready for the
//! store.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use validator::Validate;

use crate::domain::value_objects::{Money, Slug};
use crate::error::FieldErrors;

pub mod account;
pub mod brand;
pub mod category;
pub mod checkout;
pub mod inventory;
pub mod pricing;
pub mod product;
pub mod promotion;

pub use account::{LoginRequest, RegisterRequest, UserUpdateRequest};
pub use brand::{BrandInput, BrandRequest};
pub use category::{CategoryInput, CategoryRequest};
pub use checkout::{CartItemRequest, CartQuantityRequest, CheckoutRequest, PaymentRequest};
pub use inventory::{InventoryUpdateRequest, ReorderLevelRequest};
pub use pricing::{BulkPriceChange, PricingBulkUpdateRequest};
pub use product::{ProductInput, ProductRequest};
pub use promotion::{CouponInput, CouponRequest, PromotionInput, PromotionRequest};

/// Shape errors from the derive, empty when the request is well formed.
pub(crate) fn shape<T: Validate>(request: &T) -> FieldErrors {
    match request.validate() {
        Ok(()) => FieldErrors::new(),
        Err(errors) => errors.into(),
    }
}

pub(crate) fn label(field: &str) -> String {
    field.rsplit('.').next().unwrap_or(field).replace('_', " ")
}

/// Parses a choice field, recording "The selected X is invalid." on failure.
pub(crate) fn parse_choice<T: FromStr>(errors: &mut FieldErrors, field: &str, value: &str) -> Option<T> {
    match value.trim().parse() {
        Ok(parsed) => Some(parsed),
        Err(_) => {
            errors.add(field, format!("The selected {} is invalid.", label(field)));
            None
        }
    }
}

/// Explicit slug when given, otherwise one derived from `name`.
pub(crate) fn resolve_slug(errors: &mut FieldErrors, slug: Option<&str>, name: &str) -> Option<String> {
    let result = match slug.map(str::trim).filter(|s| !s.is_empty()) {
        Some(explicit) => Slug::parse(explicit),
        None => Slug::from_name(name),
    };
    match result {
        Ok(slug) => Some(slug.into_string()),
        Err(e) => {
            errors.add("slug", e.to_string());
            None
        }
    }
}

pub(crate) fn positive_money(errors: &mut FieldErrors, field: &str, value: Decimal) -> Option<Money> {
    let money = Money::new(value);
    if money.is_zero() || money.is_negative() {
        errors.add(field, format!("The {} must be greater than 0.", label(field)));
        return None;
    }
    within_max(errors, field, money)
}

pub(crate) fn non_negative_money(errors: &mut FieldErrors, field: &str, value: Decimal) -> Option<Money> {
    let money = Money::new(value);
    if money.is_negative() {
        errors.add(field, format!("The {} must be at least 0.", label(field)));
        return None;
    }
    within_max(errors, field, money)
}

fn within_max(errors: &mut FieldErrors, field: &str, money: Money) -> Option<Money> {
    if money > Money::MAX {
        errors.add(field, format!("The {} may not be greater than {}.", label(field), Money::MAX));
        return None;
    }
    Some(money)
}

/// `ends_at` must fall after `starts_at` when both are set.
pub(crate) fn check_window(errors: &mut FieldErrors, starts_at: Option<DateTime<Utc>>, ends_at: Option<DateTime<Utc>>) {
    if let (Some(start), Some(end)) = (starts_at, ends_at) {
        if end <= start {
            errors.add("ends_at", "The ends at must be a date after starts at.");
        }
    }
}

/// Trims and drops empty optional text.
pub(crate) fn clean(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}
