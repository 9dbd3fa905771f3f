use serde::Deserialize;
use uuid::Uuid;
use validator::Validate;

use super::{clean, resolve_slug, shape};
use crate::domain::aggregates::category::would_create_cycle;
use crate::domain::aggregates::Category;
use crate::error::{Error, Result};
use crate::store::Store;

#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct CategoryRequest {
    #[validate(length(min = 1, max = 255))]
    pub name: String,
    #[validate(length(max = 255))]
    pub slug: Option<String>,
    #[validate(length(max = 5000))]
    pub description: Option<String>,
    pub parent_id: Option<Uuid>,
    pub is_active: Option<bool>,
    #[validate(range(min = 0, max = 10000))]
    pub sort_order: Option<i32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CategoryInput {
    pub name: String,
    pub slug: String,
    pub description: Option<String>,
    pub parent_id: Option<Uuid>,
    pub is_active: bool,
    pub sort_order: i32,
}

impl CategoryRequest {
    /// `ignore` is the category being updated.
    pub async fn validate(&self, store: &dyn Store, ignore: Option<Uuid>) -> Result<CategoryInput> {
        let mut errors = shape(self);
        let name = self.name.trim().to_string();
        let slug = resolve_slug(&mut errors, self.slug.as_deref(), &name);

        if let Some(slug) = &slug {
            if let Some(existing) = store.find_category_by_slug(slug).await? {
                if Some(existing.id) != ignore {
                    errors.add("slug", "The slug has already been taken.");
                }
            }
        }

        if let Some(parent_id) = self.parent_id {
            if store.find_category(parent_id).await?.is_none() {
                errors.add("parent_id", "The selected parent is invalid.");
            } else if let Some(id) = ignore {
                let categories = store.list_categories().await?;
                if would_create_cycle(&categories, id, parent_id) {
                    errors.add("parent_id", "A category cannot be its own parent or a child of its descendants.");
                }
            }
        }

        match (errors.is_empty(), slug) {
            (true, Some(slug)) => Ok(CategoryInput {
                name,
                slug,
                description: clean(&self.description),
                parent_id: self.parent_id,
                is_active: self.is_active.unwrap_or(true),
                sort_order: self.sort_order.unwrap_or(0),
            }),
            _ => Err(Error::Validation(errors)),
        }
    }
}

impl CategoryInput {
    pub fn apply(self, category: &mut Category) {
        category.name = self.name;
        category.slug = self.slug;
        category.description = self.description;
        category.parent_id = self.parent_id;
        category.is_active = self.is_active;
        category.sort_order = self.sort_order;
        category.touch();
    }

    pub fn into_category(self) -> Category {
        let mut category = Category::new(&self.name, &self.slug);
        self.apply(&mut category);
        category
    }
}
