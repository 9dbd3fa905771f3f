//! Beauty Commerce
//!
//! Self-hosted commerce backend for a beauty retail store.
//!
//! ## Features
//! - Product catalog with brands, category tree, variants, images and specifications
//! - Inventory tracking per product / variant / location with an append-only movement ledger
//! - Carts, checkout with automatic promotions and coupons
//! - Order lifecycle and payments
//! - Role-based admin, staff and customer APIs
//! - Audit log and dashboards

#[macro_use]
mod macros;

pub mod api;
pub mod auth;
pub mod config;
pub mod domain;
pub mod error;
pub mod publisher;
pub mod store;
pub mod telemetry;
pub mod validation;

pub use config::Config;
pub use error::{Error, FieldErrors, Result};
