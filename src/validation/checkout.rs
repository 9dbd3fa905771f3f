use rust_decimal::Decimal;
use serde::Deserialize;
use uuid::Uuid;
use validator::Validate;

use super::{clean, parse_choice, positive_money, shape};
use crate::domain::aggregates::category::ancestry;
use crate::domain::aggregates::promotion::normalize_code;
use crate::domain::aggregates::{
    Address, Cart, CartItem, Coupon, Payment, PaymentMethod, PaymentState, StockKey, User,
};
use crate::domain::pricing::LineInput;
use crate::domain::value_objects::Money;
use crate::error::{Error, FieldErrors, Result};
use crate::store::Store;

#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct CartItemRequest {
    pub product_id: Uuid,
    pub variant_id: Option<Uuid>,
    #[validate(range(min = 1, max = 1000))]
    pub quantity: i32,
}

impl CartItemRequest {
    /// Line to merge into `cart`; the merged quantity must be in stock.
    pub async fn validate(&self, store: &dyn Store, cart: &Cart) -> Result<CartItem> {
        let mut errors = shape(self);
        let wanted = cart.quantity_of(self.product_id, self.variant_id) + self.quantity;
        let unit_price = check_line(store, &mut errors, self.product_id, self.variant_id, wanted).await?;
        match unit_price {
            Some(unit_price) if errors.is_empty() => Ok(CartItem {
                product_id: self.product_id,
                variant_id: self.variant_id,
                quantity: self.quantity,
                unit_price,
            }),
            _ => Err(Error::Validation(errors)),
        }
    }
}

/// New quantity for a cart line; zero removes it.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct CartQuantityRequest {
    pub variant_id: Option<Uuid>,
    #[validate(range(min = 0, max = 1000))]
    pub quantity: i32,
}

impl CartQuantityRequest {
    pub async fn validate(&self, store: &dyn Store, product_id: Uuid) -> Result<CartItem> {
        let mut errors = shape(self);
        let unit_price = if self.quantity == 0 {
            Some(Money::ZERO)
        } else {
            check_line(store, &mut errors, product_id, self.variant_id, self.quantity).await?
        };
        match unit_price {
            Some(unit_price) if errors.is_empty() => Ok(CartItem {
                product_id,
                variant_id: self.variant_id,
                quantity: self.quantity,
                unit_price,
            }),
            _ => Err(Error::Validation(errors)),
        }
    }
}

/// Current unit price when the product can be bought in `quantity`.
async fn check_line(
    store: &dyn Store,
    errors: &mut FieldErrors,
    product_id: Uuid,
    variant_id: Option<Uuid>,
    quantity: i32,
) -> Result<Option<Money>> {
    let categories = store.list_categories().await?;
    let product = match store.find_product(product_id).await? {
        Some(product) if product.is_purchasable(&categories) => product,
        Some(_) => {
            errors.add("product_id", "The selected product is not available.");
            return Ok(None);
        }
        None => {
            errors.add("product_id", "The selected product is invalid.");
            return Ok(None);
        }
    };
    let unit_price = match product.unit_price(variant_id) {
        Ok(price) => price,
        Err(e) => {
            errors.add("variant_id", e.to_string());
            return Ok(None);
        }
    };
    let available = available_at_main(store, product_id, variant_id).await?;
    if quantity > available {
        errors.add("quantity", format!("Insufficient stock: only {available} available."));
        return Ok(None);
    }
    Ok(Some(unit_price))
}

async fn available_at_main(store: &dyn Store, product_id: Uuid, variant_id: Option<Uuid>) -> Result<i32> {
    Ok(store
        .find_inventory(&StockKey::main(product_id, variant_id))
        .await?
        .map_or(0, |record| record.available()))
}

#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct CheckoutRequest {
    pub cart_id: Uuid,
    #[validate(length(max = 32))]
    pub coupon_code: Option<String>,
    #[validate]
    pub shipping_address: Address,
    #[validate]
    pub billing_address: Option<Address>,
    #[validate(length(max = 1000))]
    pub notes: Option<String>,
}

/// A cart resolved against the live catalog, ready to price.
#[derive(Debug, Clone)]
pub struct CheckoutInput {
    pub cart: Cart,
    pub lines: Vec<LineInput>,
    pub coupon: Option<Coupon>,
    /// Earlier redemptions of `coupon` by this customer.
    pub coupon_uses: i64,
    pub shipping_address: Address,
    pub billing_address: Option<Address>,
    pub notes: Option<String>,
}

impl CheckoutRequest {
    /// Re-reads every product at its current price and checks stock per line.
    pub async fn validate(&self, store: &dyn Store, customer: &User) -> Result<CheckoutInput> {
        let mut errors = shape(self);

        let cart = store
            .find_cart(self.cart_id)
            .await?
            .filter(|cart| cart.accessible_by(Some(customer.id)))
            .ok_or_else(|| Error::not_found("Cart"))?;
        if cart.is_empty() {
            errors.add("cart_id", "The cart is empty.");
        }

        let lines = resolve_lines(store, &cart, &mut errors).await?;

        let mut coupon = None;
        let mut coupon_uses = 0;
        if let Some(code) = clean(&self.coupon_code) {
            match store.find_coupon_by_code(&normalize_code(&code)).await? {
                Some(found) => {
                    coupon_uses = store.count_coupon_usage(found.id, customer.id).await?;
                    coupon = Some(found);
                }
                None => errors.add("coupon_code", "The coupon code is invalid."),
            }
        }

        errors.into_result()?;
        Ok(CheckoutInput {
            cart,
            lines,
            coupon,
            coupon_uses,
            shipping_address: self.shipping_address.clone(),
            billing_address: self.billing_address.clone(),
            notes: clean(&self.notes),
        })
    }
}

async fn resolve_lines(store: &dyn Store, cart: &Cart, errors: &mut FieldErrors) -> Result<Vec<LineInput>> {
    let ids: Vec<Uuid> = cart.items.iter().map(|i| i.product_id).collect();
    let products = store.find_products(&ids).await?;
    let categories = store.list_categories().await?;

    let mut lines = Vec::with_capacity(cart.items.len());
    for (index, item) in cart.items.iter().enumerate() {
        let prefix = format!("items.{index}");
        let Some(product) = products.iter().find(|p| p.id == item.product_id && p.is_purchasable(&categories)) else {
            errors.merge_prefixed(&prefix, FieldErrors::single("product_id", "The selected product is not available."));
            continue;
        };
        let path = product.category_id.map(|id| ancestry(&categories, id)).unwrap_or_default();
        match LineInput::for_product(product, item.variant_id, item.quantity, path) {
            Ok(line) => {
                let available = available_at_main(store, item.product_id, item.variant_id).await?;
                if item.quantity > available {
                    errors.merge_prefixed(
                        &prefix,
                        FieldErrors::single("quantity", format!("Insufficient stock: only {available} available.")),
                    );
                }
                lines.push(line);
            }
            Err(e) => errors.merge_prefixed(&prefix, FieldErrors::single("variant_id", e.to_string())),
        }
    }
    Ok(lines)
}

/// Staff-recorded payment against an order.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct PaymentRequest {
    pub amount: Decimal,
    pub method: String,
    #[validate(length(max = 255))]
    pub transaction_ref: Option<String>,
}

impl PaymentRequest {
    /// Balance checks happen in the store against the locked order.
    pub fn validate(&self, order_id: Uuid) -> Result<Payment> {
        let mut errors = shape(self);
        let amount = positive_money(&mut errors, "amount", self.amount);
        let method: Option<PaymentMethod> = parse_choice(&mut errors, "method", &self.method);
        match (amount, method) {
            (Some(amount), Some(method)) if errors.is_empty() => {
                let mut payment = Payment::new(order_id, amount, method, PaymentState::Completed);
                payment.transaction_ref = clean(&self.transaction_ref);
                Ok(payment)
            }
            _ => Err(Error::Validation(errors)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::aggregates::{Category, MovementContext, Product, ProductStatus, Role, StockOperation};
    use crate::domain::value_objects::Sku;
    use crate::store::{MemoryStore, StockRequest};

    async fn stocked(store: &MemoryStore, sku: &str, on_hand: i32) -> Product {
        let mut product = Product::create(Sku::new(sku).unwrap(), sku, &sku.to_lowercase(), Money::from_cents(1500));
        product.status = ProductStatus::Active;
        store.create_product(&product).await.unwrap();
        store
            .apply_stock(StockRequest {
                key: StockKey::main(product.id, None),
                operation: StockOperation::Receive { quantity: on_hand },
                context: MovementContext::default(),
            })
            .await
            .unwrap();
        product
    }

    fn address() -> Address {
        Address {
            name: "Ada Lovelace".into(),
            line1: "1 Rose Street".into(),
            city: "London".into(),
            postal_code: "N1 9GU".into(),
            country: "GB".into(),
            ..Default::default()
        }
    }

    fn errors_of<T: std::fmt::Debug>(result: Result<T>) -> FieldErrors {
        match result {
            Err(Error::Validation(errors)) => errors,
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn add_counts_quantity_already_in_cart() {
        let store = MemoryStore::new();
        let product = stocked(&store, "TONER-1", 3).await;
        let mut cart = Cart::new(None);
        let request = CartItemRequest {
            product_id: product.id,
            variant_id: None,
            quantity: 2,
        };
        cart.add_item(request.validate(&store, &cart).await.unwrap());

        let errors = errors_of(request.validate(&store, &cart).await);
        assert_eq!(errors.get("quantity").unwrap(), ["Insufficient stock: only 3 available."]);
    }

    #[tokio::test]
    async fn draft_products_cannot_be_added() {
        let store = MemoryStore::new();
        let mut product = stocked(&store, "BALM-1", 5).await;
        product.status = ProductStatus::Draft;
        store.update_product(&product).await.unwrap();

        let request = CartItemRequest {
            product_id: product.id,
            variant_id: None,
            quantity: 1,
        };
        let errors = errors_of(request.validate(&store, &Cart::new(None)).await);
        assert_eq!(errors.get("product_id").unwrap(), ["The selected product is not available."]);
    }

    #[tokio::test]
    async fn products_in_hidden_categories_cannot_be_bought() {
        let store = MemoryStore::new();
        let mut category = Category::new("Fragrance", "fragrance");
        store.create_category(&category).await.unwrap();
        let mut product = stocked(&store, "EDP-1", 5).await;
        product.category_id = Some(category.id);
        store.update_product(&product).await.unwrap();

        let request = CartItemRequest {
            product_id: product.id,
            variant_id: None,
            quantity: 1,
        };
        let mut cart = Cart::new(None);
        cart.add_item(request.validate(&store, &cart).await.unwrap());

        category.is_active = false;
        store.update_category(&category).await.unwrap();
        let errors = errors_of(request.validate(&store, &Cart::new(None)).await);
        assert_eq!(errors.get("product_id").unwrap(), ["The selected product is not available."]);

        let customer = User::new("Ada", "ada@example.com", String::new(), Role::Customer);
        cart.user_id = Some(customer.id);
        store.save_cart(&cart).await.unwrap();
        let checkout = CheckoutRequest {
            cart_id: cart.id,
            shipping_address: address(),
            ..Default::default()
        };
        let errors = errors_of(checkout.validate(&store, &customer).await);
        assert_eq!(errors.get("items.0.product_id").unwrap(), ["The selected product is not available."]);
    }

    #[tokio::test]
    async fn zero_quantity_skips_stock_check() {
        let store = MemoryStore::new();
        let product = stocked(&store, "OIL-1", 1).await;
        let item = CartQuantityRequest {
            variant_id: None,
            quantity: 0,
        }
        .validate(&store, product.id)
        .await
        .unwrap();
        assert_eq!(item.quantity, 0);
    }

    #[tokio::test]
    async fn checkout_checks_address_coupon_and_stock() {
        let store = MemoryStore::new();
        let product = stocked(&store, "MIST-1", 1).await;
        let customer = User::new("Ada", "ada@example.com", String::new(), Role::Customer);
        let mut cart = Cart::new(Some(customer.id));
        cart.add_item(CartItem {
            product_id: product.id,
            variant_id: None,
            quantity: 2,
            unit_price: product.price,
        });
        store.save_cart(&cart).await.unwrap();

        let mut shipping_address = address();
        shipping_address.country = "GBR".into();
        let request = CheckoutRequest {
            cart_id: cart.id,
            coupon_code: Some("nope".into()),
            shipping_address,
            ..Default::default()
        };
        let errors = errors_of(request.validate(&store, &customer).await);
        assert_eq!(errors.get("shipping_address.country").unwrap(), ["The country must be 2 characters."]);
        assert_eq!(errors.get("coupon_code").unwrap(), ["The coupon code is invalid."]);
        assert_eq!(errors.get("items.0.quantity").unwrap(), ["Insufficient stock: only 1 available."]);
    }

    #[tokio::test]
    async fn other_customers_cart_is_not_found() {
        let store = MemoryStore::new();
        let owner = User::new("Ada", "ada@example.com", String::new(), Role::Customer);
        let other = User::new("Bob", "bob@example.com", String::new(), Role::Customer);
        let cart = Cart::new(Some(owner.id));
        store.save_cart(&cart).await.unwrap();

        let request = CheckoutRequest {
            cart_id: cart.id,
            shipping_address: address(),
            ..Default::default()
        };
        assert!(matches!(
            request.validate(&store, &other).await,
            Err(Error::NotFound { resource: "Cart" })
        ));
    }

    #[test]
    fn payment_amount_and_method() {
        let order_id = Uuid::now_v7();
        let errors = errors_of(
            PaymentRequest {
                amount: Decimal::ZERO,
                method: "cheque".into(),
                transaction_ref: None,
            }
            .validate(order_id),
        );
        assert!(errors.has("amount"));
        assert_eq!(errors.get("method").unwrap(), ["The selected method is invalid."]);

        let payment = PaymentRequest {
            amount: Decimal::new(2500, 2),
            method: "card".into(),
            transaction_ref: Some(" ch_123 ".into()),
        }
        .validate(order_id)
        .unwrap();
        assert_eq!(payment.amount, Money::from_cents(2500));
        assert_eq!(payment.transaction_ref.as_deref(), Some("ch_123"));
    }
}
