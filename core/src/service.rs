use std::path::Path;

use anyhow::{Result, bail};
use chrono::Utc;
use thiserror::Error;

use crate::cache::{SearchCache, normalize_query};
use crate::db::Database;
use crate::mealdb::{self, MealRecord};
use crate::models::{
    CategoryCacheEntry, Favorite, NewRecipe, NewUser, Recipe, RecipeListPage, RecipeSummary,
    ShoppingItem, User, is_legacy_id, new_internal_id,
};

/// Maximum age of a category snapshot before it is refetched.
pub const CATEGORY_TTL_SECS: i64 = 60 * 60;

/// Failure modes of the upstream recipe provider, kept distinct so the HTTP
/// edge can map them to meaningful statuses.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("upstream responded with status {0}")]
    Status(u16),
    #[error("no response from upstream")]
    NoResponse,
    #[error("upstream request failed: {0}")]
    Request(String),
}

/// Upstream recipe source (TheMealDB-shaped).
///
/// The server implements this with reqwest; tests swap in canned fixtures.
/// Called synchronously from the service layer.
pub trait RecipeProvider: Send + Sync {
    /// `lookup.php?i=` — full records for one provider id.
    fn lookup_by_id(&self, id: &str) -> Result<Vec<MealRecord>, ProviderError>;
    /// `search.php?s=` — full records matching a name query.
    fn search_by_name(&self, query: &str) -> Result<Vec<MealRecord>, ProviderError>;
    /// `filter.php?c=` — partial records (id/title/thumbnail) for a category.
    fn filter_by_category(&self, category: &str) -> Result<Vec<MealRecord>, ProviderError>;
    /// `search.php?f=` — full records whose title starts with a letter.
    fn search_by_prefix(&self, letter: char) -> Result<Vec<MealRecord>, ProviderError>;
}

/// A value plus where it came from, for the `fromCache` response field.
#[derive(Debug, Clone)]
pub struct Fetched<T> {
    pub from_cache: bool,
    pub value: T,
}

/// A category snapshot counts as fresh when it is under the TTL and actually
/// holds data; empty snapshots are always refetched.
#[must_use]
pub fn category_is_fresh(entry: &CategoryCacheEntry) -> bool {
    !entry.data.is_empty()
        && Utc::now() - entry.created_at < chrono::Duration::seconds(CATEGORY_TTL_SECS)
}

pub struct RecipeService {
    db: Database,
    search_cache: SearchCache,
}

impl RecipeService {
    pub fn new(db_path: &Path) -> Result<Self> {
        let db = Database::open(db_path)?;
        Ok(Self {
            db,
            search_cache: SearchCache::default(),
        })
    }

    pub fn new_in_memory() -> Result<Self> {
        let db = Database::open_in_memory()?;
        Ok(Self {
            db,
            search_cache: SearchCache::default(),
        })
    }

    #[cfg(test)]
    fn new_in_memory_with_ttl(ttl: std::time::Duration) -> Result<Self> {
        let db = Database::open_in_memory()?;
        Ok(Self {
            db,
            search_cache: SearchCache::new(ttl),
        })
    }

    // --- Read-through recipe lookups ---

    /// Look a recipe up by id: local store first, upstream on a miss, with
    /// write-through. Returns `None` when neither side knows the id.
    ///
    /// A 24-hex id is looked up as a legacy internal document id and never
    /// forwarded upstream; the provider only knows its own numeric ids. A
    /// failed write-through is logged and the fetched recipe is still
    /// returned.
    pub fn recipe_by_id(
        &self,
        provider: &dyn RecipeProvider,
        id: &str,
    ) -> Result<Option<Fetched<Recipe>>> {
        if is_legacy_id(id) {
            return Ok(self.db.find_recipe_by_internal_id(id)?.map(|recipe| Fetched {
                from_cache: true,
                value: recipe,
            }));
        }

        if let Some(recipe) = self.db.find_recipe_by_provider_id(id)? {
            return Ok(Some(Fetched {
                from_cache: true,
                value: recipe,
            }));
        }

        let meals = provider.lookup_by_id(id)?;
        let Some(new_recipe) = meals.first().and_then(mealdb::normalize) else {
            return Ok(None);
        };

        let recipe = self.persist_fetched(new_recipe);
        Ok(Some(Fetched {
            from_cache: false,
            value: recipe,
        }))
    }

    /// Name search with a process-local TTL cache keyed by the normalized
    /// query. Misses hit the provider, write results through to the store,
    /// and populate the cache.
    pub fn search(
        &self,
        provider: &dyn RecipeProvider,
        query: &str,
    ) -> Result<Fetched<Vec<NewRecipe>>> {
        let Some(key) = normalize_query(query) else {
            bail!("search query is required");
        };

        if let Some(results) = self.search_cache.get(&key) {
            return Ok(Fetched {
                from_cache: true,
                value: results,
            });
        }

        let meals = provider.search_by_name(&key)?;
        let results: Vec<NewRecipe> = meals.iter().filter_map(mealdb::normalize).collect();

        if let Err(e) = self.db.upsert_recipes(&results) {
            tracing::warn!(query = %key, error = %e, "failed to persist search results");
        }
        self.search_cache.set(key, results.clone());

        Ok(Fetched {
            from_cache: false,
            value: results,
        })
    }

    /// Category browse backed by the persistent snapshot cache. A fresh
    /// snapshot is served as-is; otherwise the provider is queried and the
    /// snapshot fully replaced.
    pub fn recipes_by_category(
        &self,
        provider: &dyn RecipeProvider,
        category: &str,
    ) -> Result<Fetched<Vec<RecipeSummary>>> {
        let category = category.trim().to_lowercase();
        if category.is_empty() {
            bail!("category is required");
        }

        if let Some(entry) = self.db.get_category_cache(&category)?
            && category_is_fresh(&entry)
        {
            return Ok(Fetched {
                from_cache: true,
                value: entry.data,
            });
        }

        let meals = provider.filter_by_category(&category)?;
        let summaries: Vec<RecipeSummary> = meals
            .iter()
            .filter_map(|meal| mealdb::summarize(meal, &category))
            .collect();

        if let Err(e) = self.db.put_category_cache(&category, &summaries) {
            tracing::warn!(category = %category, error = %e, "failed to persist category snapshot");
        }

        Ok(Fetched {
            from_cache: false,
            value: summaries,
        })
    }

    /// Normalize and upsert a batch of raw upstream records. Used by the
    /// catalog seeder, which fetches batches without holding the service
    /// lock. Returns how many records were written.
    pub fn ingest_meals(&self, meals: &[MealRecord]) -> Result<usize> {
        let recipes: Vec<NewRecipe> = meals.iter().filter_map(mealdb::normalize).collect();
        self.db.upsert_recipes(&recipes)
    }

    // Write-through for a freshly fetched recipe. The response must not
    // depend on the write succeeding.
    fn persist_fetched(&self, new_recipe: NewRecipe) -> Recipe {
        let provider_id = new_recipe.provider_id.clone();
        if let Err(e) = self.db.upsert_recipes(std::slice::from_ref(&new_recipe)) {
            tracing::warn!(provider_id = %provider_id, error = %e, "failed to persist fetched recipe");
        }
        match self.db.find_recipe_by_provider_id(&provider_id) {
            Ok(Some(recipe)) => recipe,
            Ok(None) | Err(_) => new_recipe.into_recipe(new_internal_id()),
        }
    }

    // --- Local store ---

    pub fn list_recipes(&self, page: u32, limit: u32) -> Result<RecipeListPage> {
        self.db.list_recipes(page, limit)
    }

    pub fn recipe_count(&self) -> Result<u64> {
        self.db.count_recipes()
    }

    pub fn delete_untitled_recipes(&self) -> Result<usize> {
        self.db.delete_untitled_recipes()
    }

    // --- Cache maintenance ---

    pub fn evict_expired_searches(&self) -> usize {
        self.search_cache.evict_expired()
    }

    pub fn flush_search_cache(&self) {
        self.search_cache.flush_all();
    }

    pub fn clear_category_cache(&self) -> Result<usize> {
        self.db.clear_category_cache()
    }

    // --- Favorites ---

    pub fn list_favorites(&self, user_id: Option<&str>) -> Result<Vec<Favorite>> {
        self.db.list_favorites(user_id)
    }

    pub fn add_favorite(
        &self,
        user_id: Option<&str>,
        recipe_id: &str,
        recipe_title: &str,
        recipe_image: &str,
    ) -> Result<Option<Favorite>> {
        self.db
            .add_favorite(user_id, recipe_id, recipe_title, recipe_image)
    }

    pub fn remove_favorite(&self, user_id: Option<&str>, recipe_id: &str) -> Result<bool> {
        self.db.remove_favorite(user_id, recipe_id)
    }

    // --- Shopping lists ---

    pub fn get_shopping_list(&self, user_id: &str) -> Result<Vec<ShoppingItem>> {
        self.db.get_shopping_list(user_id)
    }

    pub fn add_shopping_ingredients(
        &self,
        user_id: &str,
        recipe_name: &str,
        ingredients: &[String],
    ) -> Result<Vec<ShoppingItem>> {
        self.db
            .add_shopping_ingredients(user_id, recipe_name, ingredients)
    }

    pub fn remove_shopping_ingredient(
        &self,
        user_id: &str,
        recipe_name: &str,
        ingredient: &str,
    ) -> Result<Vec<ShoppingItem>> {
        self.db
            .remove_shopping_ingredient(user_id, recipe_name, ingredient)
    }

    pub fn remove_shopping_recipe(
        &self,
        user_id: &str,
        recipe_name: &str,
    ) -> Result<Vec<ShoppingItem>> {
        self.db.remove_shopping_recipe(user_id, recipe_name)
    }

    pub fn clear_shopping_list(&self, user_id: &str) -> Result<()> {
        self.db.clear_shopping_list(user_id)
    }

    // --- Users ---

    pub fn create_user(&self, user: &NewUser) -> Result<User> {
        self.db.create_user(user)
    }

    pub fn find_user_by_email(&self, email: &str) -> Result<Option<User>> {
        self.db.find_user_by_email(email)
    }
}
