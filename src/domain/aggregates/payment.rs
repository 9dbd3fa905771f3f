//! Payments taken against orders

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::value_objects::Money;

string_enum! {
    pub enum PaymentMethod {
        Card => "card",
        Cash => "cash",
        BankTransfer => "bank_transfer",
        Wallet => "wallet",
    }
}

string_enum! {
    pub enum PaymentState {
        Completed => "completed",
        Failed => "failed",
        Refunded => "refunded",
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    pub id: Uuid,
    pub order_id: Uuid,
    pub amount: Money,
    pub method: PaymentMethod,
    pub status: PaymentState,
    pub transaction_ref: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Payment {
    pub fn new(order_id: Uuid, amount: Money, method: PaymentMethod, status: PaymentState) -> Self {
        Self {
            id: Uuid::now_v7(),
            order_id,
            amount,
            method,
            status,
            transaction_ref: None,
            created_at: Utc::now(),
        }
    }
}

/// Sum of completed payments.
pub fn paid_total(payments: &[Payment]) -> Money {
    payments
        .iter()
        .filter(|p| p.status == PaymentState::Completed)
        .map(|p| p.amount)
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_completed_payments_count() {
        let order = Uuid::now_v7();
        let payments = vec![
            Payment::new(order, Money::from_cents(1000), PaymentMethod::Card, PaymentState::Completed),
            Payment::new(order, Money::from_cents(700), PaymentMethod::Card, PaymentState::Failed),
            Payment::new(order, Money::from_cents(250), PaymentMethod::Cash, PaymentState::Completed),
        ];
        assert_eq!(paid_total(&payments), Money::from_cents(1250));
    }
}
