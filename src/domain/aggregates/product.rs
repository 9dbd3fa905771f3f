//! Product Aggregate

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use super::category::{is_visible, Category};
use crate::domain::value_objects::{Money, Sku};

string_enum! {
    pub enum ProductStatus {
        Draft => "draft",
        Active => "active",
        Inactive => "inactive",
        Discontinued => "discontinued",
    }
}

impl Default for ProductStatus {
    fn default() -> Self {
        ProductStatus::Draft
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub id: Uuid,
    pub sku: Sku,
    pub name: String,
    pub slug: String,
    pub description: Option<String>,
    pub short_description: Option<String>,
    pub category_id: Option<Uuid>,
    pub brand_id: Option<Uuid>,
    pub price: Money,
    pub compare_at_price: Option<Money>,
    pub cost_price: Option<Money>,
    pub status: ProductStatus,
    pub is_featured: bool,
    pub weight_grams: Option<i32>,
    pub tags: Vec<String>,
    pub images: Vec<ProductImage>,
    pub variants: Vec<ProductVariant>,
    pub specifications: Vec<Specification>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductImage {
    pub url: String,
    pub alt_text: Option<String>,
    pub position: i32,
    pub is_primary: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductVariant {
    pub id: Uuid,
    pub sku: Sku,
    pub name: String,
    pub options: BTreeMap<String, String>,
    /// Overrides the product price when set.
    pub price: Option<Money>,
    pub is_active: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Specification {
    pub name: String,
    pub value: String,
}

impl Product {
    pub fn create(sku: Sku, name: impl Into<String>, slug: impl Into<String>, price: Money) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(),
            sku,
            name: name.into(),
            slug: slug.into(),
            description: None,
            short_description: None,
            category_id: None,
            brand_id: None,
            price,
            compare_at_price: None,
            cost_price: None,
            status: ProductStatus::Draft,
            is_featured: false,
            weight_grams: None,
            tags: vec![],
            images: vec![],
            variants: vec![],
            specifications: vec![],
            created_at: now,
            updated_at: now,
        }
    }

    /// Active, and shown in the storefront: its category chain, if any, is active.
    pub fn is_purchasable(&self, categories: &[Category]) -> bool {
        self.status == ProductStatus::Active && self.category_id.map_or(true, |id| is_visible(categories, id))
    }

    pub fn variant(&self, id: Uuid) -> Option<&ProductVariant> {
        self.variants.iter().find(|v| v.id == id)
    }

    pub fn primary_image(&self) -> Option<&ProductImage> {
        self.images.iter().find(|i| i.is_primary).or_else(|| self.images.first())
    }

    /// Price for a purchase of the product itself or one of its active variants.
    pub fn unit_price(&self, variant_id: Option<Uuid>) -> Result<Money, ProductError> {
        match variant_id {
            None => Ok(self.price),
            Some(id) => {
                let variant = self.variant(id).ok_or(ProductError::UnknownVariant)?;
                if !variant.is_active {
                    return Err(ProductError::VariantInactive);
                }
                Ok(variant.price.unwrap_or(self.price))
            }
        }
    }

    /// SKU shown on order lines: the variant's when one is chosen.
    pub fn line_sku(&self, variant_id: Option<Uuid>) -> String {
        variant_id
            .and_then(|id| self.variant(id))
            .map(|v| v.sku.to_string())
            .unwrap_or_else(|| self.sku.to_string())
    }

    /// Display name for an order line, e.g. "Velvet Lipstick (Ruby)".
    pub fn line_name(&self, variant_id: Option<Uuid>) -> String {
        match variant_id.and_then(|id| self.variant(id)) {
            Some(v) => format!("{} ({})", self.name, v.name),
            None => self.name.clone(),
        }
    }

    pub fn all_skus(&self) -> impl Iterator<Item = &Sku> {
        std::iter::once(&self.sku).chain(self.variants.iter().map(|v| &v.sku))
    }

    /// Orders images by position and guarantees exactly one primary image.
    pub fn normalize_images(&mut self) {
        self.images.sort_by_key(|i| i.position);
        let primary = self.images.iter().position(|i| i.is_primary).unwrap_or(0);
        for (index, image) in self.images.iter_mut().enumerate() {
            image.is_primary = index == primary;
        }
    }

    pub fn update_price(&mut self, price: Money, compare_at_price: Option<Money>) {
        self.price = price;
        self.compare_at_price = compare_at_price;
        self.touch();
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProductError {
    #[error("The selected variant does not belong to this product.")]
    UnknownVariant,
    #[error("The selected variant is not available.")]
    VariantInactive,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn product() -> Product {
        Product::create(Sku::new("SER-001").unwrap(), "Glow Serum", "glow-serum", Money::from_cents(2999))
    }

    #[test]
    fn test_product_create() {
        let p = product();
        assert_eq!(p.name, "Glow Serum");
        assert_eq!(p.status, ProductStatus::Draft);
        assert!(!p.is_purchasable(&[]));
    }

    #[test]
    fn hidden_category_blocks_purchase() {
        let mut category = Category::new("Skincare", "skincare");
        let mut p = product();
        p.status = ProductStatus::Active;
        p.category_id = Some(category.id);
        assert!(p.is_purchasable(&[category.clone()]));
        category.is_active = false;
        assert!(!p.is_purchasable(&[category]));
    }

    #[test]
    fn variant_price_overrides_product_price() {
        let mut p = product();
        let variant = ProductVariant {
            id: Uuid::now_v7(),
            sku: Sku::new("SER-001-50ML").unwrap(),
            name: "50ml".into(),
            options: BTreeMap::from([("size".to_string(), "50ml".to_string())]),
            price: Some(Money::from_cents(4599)),
            is_active: true,
        };
        let id = variant.id;
        p.variants.push(variant);

        assert_eq!(p.unit_price(None).unwrap(), Money::from_cents(2999));
        assert_eq!(p.unit_price(Some(id)).unwrap(), Money::from_cents(4599));
        assert_eq!(p.unit_price(Some(Uuid::now_v7())), Err(ProductError::UnknownVariant));
        assert_eq!(p.line_name(Some(id)), "Glow Serum (50ml)");
        assert_eq!(p.line_sku(Some(id)), "SER-001-50ML");
        assert_eq!(p.all_skus().count(), 2);

        p.variants[0].is_active = false;
        assert_eq!(p.unit_price(Some(id)), Err(ProductError::VariantInactive));
    }

    #[test]
    fn images_get_single_primary() {
        let mut p = product();
        for (position, primary) in [(2, true), (1, false), (3, true)] {
            p.images.push(ProductImage {
                url: format!("https://cdn.test/{position}.jpg"),
                alt_text: None,
                position,
                is_primary: primary,
            });
        }
        p.normalize_images();
        let primaries: Vec<i32> = p.images.iter().filter(|i| i.is_primary).map(|i| i.position).collect();
        assert_eq!(primaries, vec![2]);
        assert_eq!(p.primary_image().unwrap().position, 2);
    }
}
