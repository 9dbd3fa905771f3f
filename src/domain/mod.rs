//! Domain model: value objects, aggregates, events and pricing rules.

pub mod aggregates;
pub mod events;
pub mod pricing;
pub mod value_objects;

use thiserror::Error;

/// A stored or submitted string did not name a known variant.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown {kind} value {value:?}")]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}
