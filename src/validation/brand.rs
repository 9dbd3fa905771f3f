use serde::Deserialize;
use uuid::Uuid;
use validator::Validate;

use super::{clean, resolve_slug, shape};
use crate::domain::aggregates::Brand;
use crate::error::{Error, Result};
use crate::store::Store;

#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct BrandRequest {
    #[validate(length(min = 1, max = 255))]
    pub name: String,
    #[validate(length(max = 255))]
    pub slug: Option<String>,
    #[validate(length(max = 5000))]
    pub description: Option<String>,
    #[validate(url)]
    pub logo_url: Option<String>,
    #[validate(url)]
    pub website: Option<String>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BrandInput {
    pub name: String,
    pub slug: String,
    pub description: Option<String>,
    pub logo_url: Option<String>,
    pub website: Option<String>,
    pub is_active: bool,
}

impl BrandRequest {
    /// `ignore` is the brand being updated, which may keep its own name and slug.
    pub async fn validate(&self, store: &dyn Store, ignore: Option<Uuid>) -> Result<BrandInput> {
        let mut errors = shape(self);
        let name = self.name.trim().to_string();
        let slug = resolve_slug(&mut errors, self.slug.as_deref(), &name);

        if !name.is_empty() {
            if let Some(existing) = store.find_brand_by_name(&name).await? {
                if Some(existing.id) != ignore {
                    errors.add("name", "The name has already been taken.");
                }
            }
        }
        if let Some(slug) = &slug {
            if let Some(existing) = store.find_brand_by_slug(slug).await? {
                if Some(existing.id) != ignore {
                    errors.add("slug", "The slug has already been taken.");
                }
            }
        }

        match (errors.is_empty(), slug) {
            (true, Some(slug)) => Ok(BrandInput {
                name,
                slug,
                description: clean(&self.description),
                logo_url: clean(&self.logo_url),
                website: clean(&self.website),
                is_active: self.is_active.unwrap_or(true),
            }),
            _ => Err(Error::Validation(errors)),
        }
    }
}

impl BrandInput {
    pub fn apply(self, brand: &mut Brand) {
        brand.name = self.name;
        brand.slug = self.slug;
        brand.description = self.description;
        brand.logo_url = self.logo_url;
        brand.website = self.website;
        brand.is_active = self.is_active;
        brand.touch();
    }

    pub fn into_brand(self) -> Brand {
        let mut brand = Brand::new(&self.name, &self.slug);
        self.apply(&mut brand);
        brand
    }
}
