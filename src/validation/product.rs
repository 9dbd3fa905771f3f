use std::collections::{BTreeMap, HashSet};

use rust_decimal::Decimal;
use serde::Deserialize;
use uuid::Uuid;
use validator::Validate;

use super::{clean, non_negative_money, parse_choice, positive_money, resolve_slug, shape};
use crate::domain::aggregates::{Product, ProductImage, ProductStatus, ProductVariant, Specification};
use crate::domain::value_objects::{Money, Sku};
use crate::error::{Error, FieldErrors, Result};
use crate::store::Store;

#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct ProductRequest {
    #[validate(length(min = 1, max = 50))]
    pub sku: String,
    #[validate(length(min = 1, max = 255))]
    pub name: String,
    #[validate(length(max = 255))]
    pub slug: Option<String>,
    pub description: Option<String>,
    #[validate(length(max = 500))]
    pub short_description: Option<String>,
    pub category_id: Option<Uuid>,
    pub brand_id: Option<Uuid>,
    pub price: Decimal,
    pub compare_at_price: Option<Decimal>,
    pub cost_price: Option<Decimal>,
    pub status: Option<String>,
    pub is_featured: Option<bool>,
    #[validate(range(min = 0))]
    pub weight_grams: Option<i32>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    #[validate]
    pub images: Vec<ImageRequest>,
    #[serde(default)]
    #[validate]
    pub variants: Vec<VariantRequest>,
    #[serde(default)]
    #[validate]
    pub specifications: Vec<SpecificationRequest>,
}

#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct ImageRequest {
    #[validate(url)]
    pub url: String,
    #[validate(length(max = 255))]
    pub alt_text: Option<String>,
    #[validate(range(min = 0))]
    pub position: Option<i32>,
    #[serde(default)]
    pub is_primary: bool,
}

#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct VariantRequest {
    /// Set to keep an existing variant (and its stock) on update.
    pub id: Option<Uuid>,
    #[validate(length(min = 1, max = 50))]
    pub sku: String,
    #[validate(length(min = 1, max = 255))]
    pub name: String,
    #[serde(default)]
    pub options: BTreeMap<String, String>,
    pub price: Option<Decimal>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct SpecificationRequest {
    #[validate(length(min = 1, max = 100))]
    pub name: String,
    #[validate(length(min = 1, max = 500))]
    pub value: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProductInput {
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
}

impl ProductRequest {
    /// `existing` is the product being updated; its own SKUs and slug stay valid.
    pub async fn validate(&self, store: &dyn Store, existing: Option<&Product>) -> Result<ProductInput> {
        let mut errors = shape(self);
        let own_id = existing.map(|p| p.id);
        let name = self.name.trim().to_string();

        let sku = parse_sku(&mut errors, "sku", &self.sku);
        let slug = resolve_slug(&mut errors, self.slug.as_deref(), &name);
        let price = positive_money(&mut errors, "price", self.price);
        let compare_at_price = self
            .compare_at_price
            .and_then(|v| positive_money(&mut errors, "compare_at_price", v));
        if let (Some(price), Some(compare)) = (price, compare_at_price) {
            if compare <= price {
                errors.add("compare_at_price", "The compare at price must be greater than the price.");
            }
        }
        let cost_price = self
            .cost_price
            .and_then(|v| non_negative_money(&mut errors, "cost_price", v));
        let status = match &self.status {
            Some(s) => parse_choice(&mut errors, "status", s),
            None => Some(existing.map_or(ProductStatus::Draft, |p| p.status)),
        };

        if let Some(sku) = &sku {
            if let Some(owner) = store.sku_owner(sku.as_str()).await? {
                if Some(owner) != own_id {
                    errors.add("sku", "The sku has already been taken.");
                }
            }
        }
        if let Some(slug) = &slug {
            if let Some(other) = store.find_product_by_slug(slug).await? {
                if Some(other.id) != own_id {
                    errors.add("slug", "The slug has already been taken.");
                }
            }
        }
        if let Some(category_id) = self.category_id {
            if store.find_category(category_id).await?.is_none() {
                errors.add("category_id", "The selected category is invalid.");
            }
        }
        if let Some(brand_id) = self.brand_id {
            if store.find_brand(brand_id).await?.is_none() {
                errors.add("brand_id", "The selected brand is invalid.");
            }
        }

        if self.images.iter().filter(|i| i.is_primary).count() > 1 {
            errors.add("images", "Only one image may be marked as primary.");
        }

        let variants = self.variants(store, &mut errors, sku.as_ref(), existing).await?;

        if !errors.is_empty() {
            return Err(Error::Validation(errors));
        }
        let (Some(sku), Some(slug), Some(price), Some(status)) = (sku, slug, price, status) else {
            return Err(Error::Validation(errors));
        };

        let mut tags: Vec<String> = Vec::new();
        for tag in self.tags.iter().map(|t| t.trim().to_lowercase()).filter(|t| !t.is_empty()) {
            if !tags.contains(&tag) {
                tags.push(tag);
            }
        }

        Ok(ProductInput {
            sku,
            name,
            slug,
            description: clean(&self.description),
            short_description: clean(&self.short_description),
            category_id: self.category_id,
            brand_id: self.brand_id,
            price,
            compare_at_price,
            cost_price,
            status,
            is_featured: self.is_featured.unwrap_or(false),
            weight_grams: self.weight_grams,
            tags,
            images: self
                .images
                .iter()
                .enumerate()
                .map(|(index, image)| ProductImage {
                    url: image.url.trim().to_string(),
                    alt_text: clean(&image.alt_text),
                    position: image.position.unwrap_or(index as i32),
                    is_primary: image.is_primary,
                })
                .collect(),
            variants,
            specifications: self
                .specifications
                .iter()
                .map(|s| Specification {
                    name: s.name.trim().to_string(),
                    value: s.value.trim().to_string(),
                })
                .collect(),
        })
    }

    async fn variants(
        &self,
        store: &dyn Store,
        errors: &mut FieldErrors,
        product_sku: Option<&Sku>,
        existing: Option<&Product>,
    ) -> Result<Vec<ProductVariant>> {
        let own_id = existing.map(|p| p.id);
        let mut seen: HashSet<Sku> = product_sku.cloned().into_iter().collect();
        let mut variants = Vec::with_capacity(self.variants.len());

        for (index, request) in self.variants.iter().enumerate() {
            let field = |name: &str| format!("variants.{index}.{name}");
            let id = match request.id {
                Some(id) if existing.and_then(|p| p.variant(id)).is_some() => id,
                Some(_) => {
                    errors.add(field("id"), "The selected variant is invalid.");
                    continue;
                }
                None => Uuid::now_v7(),
            };
            let Some(sku) = parse_sku(errors, &field("sku"), &request.sku) else {
                continue;
            };
            if !seen.insert(sku.clone()) {
                errors.add(field("sku"), "The variant SKU must be unique within the product.");
                continue;
            }
            if let Some(owner) = store.sku_owner(sku.as_str()).await? {
                if Some(owner) != own_id {
                    errors.add(field("sku"), "The sku has already been taken.");
                    continue;
                }
            }
            let price = match request.price {
                Some(value) => match positive_money(errors, &field("price"), value) {
                    Some(price) => Some(price),
                    None => continue,
                },
                None => None,
            };
            variants.push(ProductVariant {
                id,
                sku,
                name: request.name.trim().to_string(),
                options: request.options.clone(),
                price,
                is_active: request.is_active.unwrap_or(true),
            });
        }
        Ok(variants)
    }
}

fn parse_sku(errors: &mut FieldErrors, field: &str, value: &str) -> Option<Sku> {
    match Sku::new(value) {
        Ok(sku) => Some(sku),
        Err(e) => {
            if !errors.has(field) {
                errors.add(field, e.to_string());
            }
            None
        }
    }
}

impl ProductInput {
    pub fn apply(self, product: &mut Product) {
        product.sku = self.sku;
        product.name = self.name;
        product.slug = self.slug;
        product.description = self.description;
        product.short_description = self.short_description;
        product.category_id = self.category_id;
        product.brand_id = self.brand_id;
        product.price = self.price;
        product.compare_at_price = self.compare_at_price;
        product.cost_price = self.cost_price;
        product.status = self.status;
        product.is_featured = self.is_featured;
        product.weight_grams = self.weight_grams;
        product.tags = self.tags;
        product.images = self.images;
        product.variants = self.variants;
        product.specifications = self.specifications;
        product.normalize_images();
        product.touch();
    }

    pub fn into_product(self) -> Product {
        let mut product = Product::create(self.sku.clone(), &self.name, &self.slug, self.price);
        self.apply(&mut product);
        product
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn request(sku: &str, name: &str) -> ProductRequest {
        ProductRequest {
            sku: sku.into(),
            name: name.into(),
            price: Decimal::new(2499, 2),
            ..Default::default()
        }
    }

    fn variant(sku: &str) -> VariantRequest {
        VariantRequest {
            sku: sku.into(),
            name: sku.into(),
            ..Default::default()
        }
    }

    async fn errors_for(store: &MemoryStore, request: &ProductRequest, existing: Option<&Product>) -> FieldErrors {
        match request.validate(store, existing).await {
            Err(Error::Validation(errors)) => errors,
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn valid_product_normalizes_input() {
        let store = MemoryStore::new();
        let mut req = request(" ser-001 ", "Vitamin C Serum");
        req.tags = vec!["Glow".into(), "glow".into(), " ".into()];
        req.variants = vec![variant("ser-001-30")];
        let input = req.validate(&store, None).await.unwrap();
        assert_eq!(input.sku.as_str(), "SER-001");
        assert_eq!(input.slug, "vitamin-c-serum");
        assert_eq!(input.tags, vec!["glow"]);
        assert_eq!(input.status, ProductStatus::Draft);
        assert_eq!(input.variants[0].sku.as_str(), "SER-001-30");
    }

    #[tokio::test]
    async fn price_rules() {
        let store = MemoryStore::new();
        let mut req = request("P-1", "Balm");
        req.price = Decimal::ZERO;
        req.cost_price = Some(Decimal::new(-5, 0));
        let errors = errors_for(&store, &req, None).await;
        assert_eq!(errors.get("price").unwrap(), ["The price must be greater than 0."]);
        assert!(errors.has("cost_price"));

        let mut req = request("P-1", "Balm");
        req.compare_at_price = Some(Decimal::new(1999, 2));
        let errors = errors_for(&store, &req, None).await;
        assert_eq!(
            errors.get("compare_at_price").unwrap(),
            ["The compare at price must be greater than the price."]
        );
    }

    #[tokio::test]
    async fn sku_unique_across_products_and_variants() {
        let store = MemoryStore::new();
        let mut first = request("LIP-1", "Lipstick");
        first.variants = vec![variant("LIP-1-RED")];
        let product = first.validate(&store, None).await.unwrap().into_product();
        store.create_product(&product).await.unwrap();

        let errors = errors_for(&store, &request("lip-1-red", "Other"), None).await;
        assert_eq!(errors.get("sku").unwrap(), ["The sku has already been taken."]);

        let mut dup = request("GLOSS-1", "Gloss");
        dup.variants = vec![variant("GLOSS-1"), variant("LIP-1")];
        let errors = errors_for(&store, &dup, None).await;
        assert!(errors.has("variants.0.sku"));
        assert_eq!(errors.get("variants.1.sku").unwrap(), ["The sku has already been taken."]);

        let mut again = request("LIP-1", "Lipstick");
        again.variants = vec![VariantRequest {
            id: Some(product.variants[0].id),
            ..variant("LIP-1-RED")
        }];
        let input = again.validate(&store, Some(&product)).await.unwrap();
        assert_eq!(input.variants[0].id, product.variants[0].id);
    }

    #[tokio::test]
    async fn references_and_images() {
        let store = MemoryStore::new();
        let mut req = request("EYE-1", "Liner");
        req.category_id = Some(Uuid::now_v7());
        req.brand_id = Some(Uuid::now_v7());
        req.status = Some("archived".into());
        req.images = vec![
            ImageRequest {
                url: "https://cdn.test/a.jpg".into(),
                is_primary: true,
                ..Default::default()
            },
            ImageRequest {
                url: "https://cdn.test/b.jpg".into(),
                is_primary: true,
                ..Default::default()
            },
        ];
        let errors = errors_for(&store, &req, None).await;
        assert_eq!(errors.get("category_id").unwrap(), ["The selected category is invalid."]);
        assert_eq!(errors.get("brand_id").unwrap(), ["The selected brand is invalid."]);
        assert_eq!(errors.get("status").unwrap(), ["The selected status is invalid."]);
        assert_eq!(errors.get("images").unwrap(), ["Only one image may be marked as primary."]);
    }
}
