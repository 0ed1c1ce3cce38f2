use anyhow::{Result, bail};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A normalized recipe as stored in the recipe collection.
///
/// `internal_id` is a 24-hex document id assigned on first insert; clients
/// that bookmarked recipes before provider ids were exposed still look
/// records up by it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Recipe {
    #[serde(rename = "_id")]
    pub internal_id: String,
    pub provider_id: String,
    pub title: String,
    pub image: String,
    pub instructions: String,
    pub ingredients: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
}

/// A recipe fresh from the normalizer, not yet persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewRecipe {
    pub provider_id: String,
    pub title: String,
    pub image: String,
    pub instructions: String,
    pub ingredients: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
}

impl NewRecipe {
    /// Promote to a full `Recipe` with a freshly minted internal id.
    ///
    /// Used when a write-through failed but the fetched data must still be
    /// returned to the caller.
    #[must_use]
    pub fn into_recipe(self, internal_id: String) -> Recipe {
        Recipe {
            internal_id,
            provider_id: self.provider_id,
            title: self.title,
            image: self.image,
            instructions: self.instructions,
            ingredients: self.ingredients,
            category: self.category,
        }
    }
}

/// Lightweight recipe view for list pages and category snapshots.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecipeSummary {
    pub provider_id: String,
    pub title: String,
    pub image: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecipeListPage {
    pub page: u32,
    pub limit: u32,
    pub total: u64,
    pub total_pages: u64,
    pub recipes: Vec<RecipeSummary>,
}

/// One per-category snapshot of upstream filter results.
#[derive(Debug, Clone)]
pub struct CategoryCacheEntry {
    pub category: String,
    pub data: Vec<RecipeSummary>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Favorite {
    pub id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub recipe_id: String,
    pub recipe_title: String,
    pub recipe_image: String,
    pub created_at: String,
}

/// One entry in a per-user shopping list: a recipe and the ingredients
/// collected for it. Ingredients are an ordered set (no duplicates).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShoppingItem {
    pub recipe_name: String,
    pub ingredients: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    #[serde(rename = "_id")]
    pub internal_id: String,
    pub username: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip)]
    pub password_hash: Option<String>,
    pub is_guest: bool,
    #[serde(skip)]
    pub created_at: String,
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub email: Option<String>,
    pub password_hash: Option<String>,
    pub is_guest: bool,
}

/// Reject ids that are obviously misrouted search requests rather than
/// recipe ids (the literal `search` segment, or anything carrying a query
/// fragment).
pub fn validate_recipe_id(id: &str) -> Result<()> {
    if id == "search" || id.contains('=') {
        bail!("Invalid recipe ID format");
    }
    Ok(())
}

/// True when `id` has the shape of a legacy internal document id
/// (24 hexadecimal characters).
#[must_use]
pub fn is_legacy_id(id: &str) -> bool {
    id.len() == 24 && id.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Mint a new 24-hex internal document id.
#[must_use]
pub fn new_internal_id() -> String {
    let hex = uuid::Uuid::new_v4().simple().to_string();
    hex[..24].to_string()
}

/// Merge `incoming` into `existing` as an ordered set union: existing order
/// is preserved, new ingredients are appended once each.
#[must_use]
pub fn merge_ingredients(existing: &[String], incoming: &[String]) -> Vec<String> {
    let mut merged: Vec<String> = existing.to_vec();
    for ing in incoming {
        if !merged.iter().any(|m| m == ing) {
            merged.push(ing.clone());
        }
    }
    merged
}
