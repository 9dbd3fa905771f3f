//! Cart Aggregate

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::domain::value_objects::Money;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Cart {
    pub id: Uuid,
    /// Owner, when the cart was created by a signed-in user.
    pub user_id: Option<Uuid>,
    pub items: Vec<CartItem>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartItem {
    pub product_id: Uuid,
    pub variant_id: Option<Uuid>,
    pub quantity: i32,
    /// Price when last added or updated; checkout re-prices.
    pub unit_price: Money,
}

impl CartItem {
    pub fn line_total(&self) -> Money {
        self.unit_price.times(self.quantity)
    }

    fn matches(&self, product_id: Uuid, variant_id: Option<Uuid>) -> bool {
        self.product_id == product_id && self.variant_id == variant_id
    }
}

impl Cart {
    pub fn new(user_id: Option<Uuid>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(),
            user_id,
            items: vec![],
            created_at: now,
            updated_at: now,
        }
    }

    pub fn subtotal(&self) -> Money {
        self.items.iter().map(CartItem::line_total).sum()
    }

    pub fn item_count(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn quantity_of(&self, product_id: Uuid, variant_id: Option<Uuid>) -> i32 {
        self.items
            .iter()
            .find(|i| i.matches(product_id, variant_id))
            .map_or(0, |i| i.quantity)
    }

    /// Whether `user_id` may read or change this cart.
    pub fn accessible_by(&self, user_id: Option<Uuid>) -> bool {
        match self.user_id {
            None => true,
            Some(owner) => user_id == Some(owner),
        }
    }

    /// Adds an item, merging with an existing line for the same product and variant.
    /// Returns the resulting quantity of that line.
    pub fn add_item(&mut self, item: CartItem) -> i32 {
        let quantity = if let Some(existing) = self
            .items
            .iter_mut()
            .find(|i| i.matches(item.product_id, item.variant_id))
        {
            existing.quantity += item.quantity;
            existing.unit_price = item.unit_price;
            existing.quantity
        } else {
            let quantity = item.quantity;
            self.items.push(item);
            quantity
        };
        self.touch();
        quantity
    }

    /// Sets a line's quantity; zero removes the line.
    pub fn set_quantity(
        &mut self,
        product_id: Uuid,
        variant_id: Option<Uuid>,
        quantity: i32,
        unit_price: Money,
    ) -> Result<(), CartError> {
        let item = self
            .items
            .iter_mut()
            .find(|i| i.matches(product_id, variant_id))
            .ok_or(CartError::ItemNotFound)?;
        if quantity <= 0 {
            self.items.retain(|i| !i.matches(product_id, variant_id));
        } else {
            item.quantity = quantity;
            item.unit_price = unit_price;
        }
        self.touch();
        Ok(())
    }

    pub fn remove_item(&mut self, product_id: Uuid, variant_id: Option<Uuid>) -> Result<(), CartError> {
        let before = self.items.len();
        self.items.retain(|i| !i.matches(product_id, variant_id));
        if self.items.len() == before {
            return Err(CartError::ItemNotFound);
        }
        self.touch();
        Ok(())
    }

    pub fn clear(&mut self) {
        self.items.clear();
        self.touch();
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CartError {
    #[error("Item not found in cart")]
    ItemNotFound,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(product_id: Uuid, quantity: i32) -> CartItem {
        CartItem {
            product_id,
            variant_id: None,
            quantity,
            unit_price: Money::from_cents(1000),
        }
    }

    #[test]
    fn test_cart_operations() {
        let mut cart = Cart::new(None);
        let p1 = Uuid::now_v7();
        cart.add_item(item(p1, 2));
        assert_eq!(cart.item_count(), 1);
        assert_eq!(cart.subtotal(), Money::from_cents(2000));
        assert_eq!(cart.add_item(item(p1, 1)), 3); // Merged
        assert_eq!(cart.items[0].quantity, 3);

        let other_variant = CartItem {
            variant_id: Some(Uuid::now_v7()),
            ..item(p1, 1)
        };
        cart.add_item(other_variant);
        assert_eq!(cart.item_count(), 2);
    }

    #[test]
    fn zero_quantity_removes_line() {
        let mut cart = Cart::new(None);
        let p1 = Uuid::now_v7();
        cart.add_item(item(p1, 2));
        cart.set_quantity(p1, None, 0, Money::from_cents(1000)).unwrap();
        assert!(cart.is_empty());
        assert_eq!(cart.remove_item(p1, None), Err(CartError::ItemNotFound));
    }

    #[test]
    fn owned_carts_are_private() {
        let owner = Uuid::now_v7();
        let cart = Cart::new(Some(owner));
        assert!(cart.accessible_by(Some(owner)));
        assert!(!cart.accessible_by(None));
        assert!(Cart::new(None).accessible_by(Some(owner)));
    }
}
