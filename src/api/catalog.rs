//! Public storefront: active products in visible categories, the active
//! category tree and active brands.

use axum::{extract::{Path, Query, State}, routing::get, Router};
use rust_decimal::Decimal;
use serde::Deserialize;
use uuid::Uuid;

use super::{AppState, Json};
use crate::domain::aggregates::category::{build_tree, descendant_ids, is_visible};
use crate::domain::aggregates::{Brand, Category, CategoryNode, Product, ProductStatus};
use crate::domain::value_objects::Money;
use crate::error::{Error, Result};
use crate::store::{Page, PageRequest, ProductFilter};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/products", get(list_products))
        .route("/products/:id", get(get_product))
        .route("/categories", get(category_tree))
        .route("/brands", get(list_brands))
}

/// Product list filters shared by the storefront and the admin catalog.
#[derive(Debug, Default, Deserialize)]
pub struct ProductQuery {
    pub search: Option<String>,
    /// Includes every category below it.
    pub category_id: Option<Uuid>,
    pub brand_id: Option<Uuid>,
    pub status: Option<ProductStatus>,
    pub featured: Option<bool>,
    pub min_price: Option<Decimal>,
    pub max_price: Option<Decimal>,
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

impl ProductQuery {
    pub fn page(&self) -> PageRequest {
        PageRequest::new(self.page, self.per_page)
    }

    pub fn filter(&self, categories: &[Category]) -> ProductFilter {
        ProductFilter {
            search: self.search.as_deref().map(str::trim).filter(|s| !s.is_empty()).map(str::to_string),
            category_ids: self
                .category_id
                .map(|id| descendant_ids(categories, id).into_iter().collect()),
            brand_id: self.brand_id,
            status: self.status,
            featured: self.featured,
            min_price: self.min_price.map(Money::new),
            max_price: self.max_price.map(Money::new),
            hidden_category_ids: vec![],
        }
    }
}

fn hidden_categories(categories: &[Category]) -> Vec<Uuid> {
    categories
        .iter()
        .filter(|c| !is_visible(categories, c.id))
        .map(|c| c.id)
        .collect()
}

async fn list_products(State(state): State<AppState>, Query(query): Query<ProductQuery>) -> Result<Json<Page<Product>>> {
    let categories = state.store.list_categories().await?;
    let mut filter = query.filter(&categories);
    filter.status = Some(ProductStatus::Active);
    filter.hidden_category_ids = hidden_categories(&categories);
    Ok(Json(state.store.list_products(&filter, query.page()).await?))
}

async fn get_product(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<Json<Product>> {
    let categories = state.store.list_categories().await?;
    let product = state
        .store
        .find_product(id)
        .await?
        .filter(|p| p.is_purchasable(&categories))
        .ok_or_else(|| Error::not_found("Product"))?;
    Ok(Json(product))
}

async fn category_tree(State(state): State<AppState>) -> Result<Json<Vec<CategoryNode>>> {
    let categories = state.store.list_categories().await?;
    let visible: Vec<Category> = categories
        .iter()
        .filter(|c| is_visible(&categories, c.id))
        .cloned()
        .collect();
    Ok(Json(build_tree(&visible)))
}

async fn list_brands(State(state): State<AppState>) -> Result<Json<Vec<Brand>>> {
    Ok(Json(state.store.list_brands(true).await?))
}
