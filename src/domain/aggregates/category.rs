//! Category tree

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Category {
    pub id: Uuid,
    pub name: String,
    pub slug: String,
    pub description: Option<String>,
    pub parent_id: Option<Uuid>,
    pub is_active: bool,
    pub sort_order: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Category {
    pub fn new(name: impl Into<String>, slug: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(),
            name: name.into(),
            slug: slug.into(),
            description: None,
            parent_id: None,
            is_active: true,
            sort_order: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// A category with its children, for tree views.
#[derive(Clone, Debug, Serialize)]
pub struct CategoryNode {
    #[serde(flatten)]
    pub category: Category,
    pub children: Vec<CategoryNode>,
}

/// Arranges a flat list into a forest ordered by `sort_order`, then name.
///
/// Categories whose parent is missing from the list become roots.
pub fn build_tree(categories: &[Category]) -> Vec<CategoryNode> {
    let known: HashSet<Uuid> = categories.iter().map(|c| c.id).collect();
    let mut children: HashMap<Option<Uuid>, Vec<&Category>> = HashMap::new();
    for category in categories {
        let parent = category.parent_id.filter(|p| known.contains(p) && *p != category.id);
        children.entry(parent).or_default().push(category);
    }
    let mut visited = HashSet::new();
    attach(None, &children, &mut visited)
}

fn attach(
    parent: Option<Uuid>,
    children: &HashMap<Option<Uuid>, Vec<&Category>>,
    visited: &mut HashSet<Uuid>,
) -> Vec<CategoryNode> {
    let mut level: Vec<&Category> = children.get(&parent).cloned().unwrap_or_default();
    level.sort_by(|a, b| a.sort_order.cmp(&b.sort_order).then_with(|| a.name.cmp(&b.name)));
    let mut nodes = Vec::with_capacity(level.len());
    for category in level {
        if !visited.insert(category.id) {
            continue;
        }
        nodes.push(CategoryNode {
            category: category.clone(),
            children: attach(Some(category.id), children, visited),
        });
    }
    nodes
}

/// `root` and every category below it.
pub fn descendant_ids(categories: &[Category], root: Uuid) -> HashSet<Uuid> {
    let mut found = HashSet::from([root]);
    let mut frontier = vec![root];
    while let Some(current) = frontier.pop() {
        for child in categories.iter().filter(|c| c.parent_id == Some(current)) {
            if found.insert(child.id) {
                frontier.push(child.id);
            }
        }
    }
    found
}

/// The category followed by its ancestors, nearest first.
pub fn ancestry(categories: &[Category], id: Uuid) -> Vec<Uuid> {
    let by_id: HashMap<Uuid, &Category> = categories.iter().map(|c| (c.id, c)).collect();
    let mut path = Vec::new();
    let mut cursor = Some(id);
    while let Some(current) = cursor {
        if path.contains(&current) || !by_id.contains_key(&current) {
            break;
        }
        path.push(current);
        cursor = by_id[&current].parent_id;
    }
    path
}

/// Whether re-parenting `id` under `new_parent` would introduce a loop.
pub fn would_create_cycle(categories: &[Category], id: Uuid, new_parent: Uuid) -> bool {
    new_parent == id || descendant_ids(categories, id).contains(&new_parent)
}

/// A category is visible when it and all of its ancestors are active.
pub fn is_visible(categories: &[Category], id: Uuid) -> bool {
    let path = ancestry(categories, id);
    !path.is_empty()
        && path
            .iter()
            .all(|cid| categories.iter().any(|c| c.id == *cid && c.is_active))
}
