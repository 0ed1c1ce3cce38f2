use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, params};

use crate::models::{
    CategoryCacheEntry, Favorite, NewRecipe, NewUser, Recipe, RecipeListPage, RecipeSummary,
    ShoppingItem, User, merge_ingredients, new_internal_id,
};

/// Hard cap on page size for the recipe listing.
pub const MAX_PAGE_LIMIT: u32 = 100;

pub struct Database {
    conn: Connection,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database: {}", path.display()))?;
        let db = Database { conn };
        db.migrate()?;
        Ok(db)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Database { conn };
        db.migrate()?;
        Ok(db)
    }

    fn migrate(&self) -> Result<()> {
        let version: i64 = self
            .conn
            .pragma_query_value(None, "user_version", |row| row.get(0))?;

        if version < 1 {
            self.conn.execute_batch(
                "CREATE TABLE IF NOT EXISTS recipes (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    internal_id TEXT NOT NULL UNIQUE,
                    provider_id TEXT NOT NULL UNIQUE,
                    title TEXT NOT NULL DEFAULT '',
                    image TEXT NOT NULL DEFAULT '',
                    instructions TEXT NOT NULL DEFAULT '',
                    ingredients TEXT NOT NULL DEFAULT '[]',
                    category TEXT,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                );

                CREATE INDEX IF NOT EXISTS idx_recipes_category ON recipes(category);

                CREATE TABLE IF NOT EXISTS category_cache (
                    category TEXT PRIMARY KEY,
                    data TEXT NOT NULL,
                    created_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS favorites (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    user_id TEXT,
                    recipe_id TEXT NOT NULL,
                    recipe_title TEXT NOT NULL DEFAULT '',
                    recipe_image TEXT NOT NULL DEFAULT '',
                    created_at TEXT NOT NULL
                );

                CREATE UNIQUE INDEX IF NOT EXISTS idx_favorites_owner_recipe
                    ON favorites(IFNULL(user_id, ''), recipe_id);

                CREATE TABLE IF NOT EXISTS shopping_items (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    user_id TEXT NOT NULL,
                    recipe_name TEXT NOT NULL,
                    ingredients TEXT NOT NULL DEFAULT '[]',
                    UNIQUE(user_id, recipe_name)
                );

                CREATE INDEX IF NOT EXISTS idx_shopping_items_user ON shopping_items(user_id);

                CREATE TABLE IF NOT EXISTS users (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    internal_id TEXT NOT NULL UNIQUE,
                    username TEXT NOT NULL,
                    email TEXT UNIQUE,
                    password_hash TEXT,
                    is_guest INTEGER NOT NULL DEFAULT 0,
                    created_at TEXT NOT NULL
                );

                PRAGMA user_version = 1;",
            )?;
        }

        Ok(())
    }

    // Expects columns: internal_id, provider_id, title, image, instructions,
    // ingredients (JSON array), category.
    fn recipe_from_row(row: &rusqlite::Row) -> rusqlite::Result<Recipe> {
        let ingredients_json: String = row.get(5)?;
        let ingredients: Vec<String> = serde_json::from_str(&ingredients_json).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(5, rusqlite::types::Type::Text, Box::new(e))
        })?;
        Ok(Recipe {
            internal_id: row.get(0)?,
            provider_id: row.get(1)?,
            title: row.get(2)?,
            image: row.get(3)?,
            instructions: row.get(4)?,
            ingredients,
            category: row.get(6)?,
        })
    }

    fn summary_from_row(row: &rusqlite::Row) -> rusqlite::Result<RecipeSummary> {
        Ok(RecipeSummary {
            provider_id: row.get(0)?,
            title: row.get(1)?,
            image: row.get(2)?,
            category: row.get(3)?,
        })
    }

    fn favorite_from_row(row: &rusqlite::Row) -> rusqlite::Result<Favorite> {
        Ok(Favorite {
            id: row.get(0)?,
            user_id: row.get(1)?,
            recipe_id: row.get(2)?,
            recipe_title: row.get(3)?,
            recipe_image: row.get(4)?,
            created_at: row.get(5)?,
        })
    }

    fn user_from_row(row: &rusqlite::Row) -> rusqlite::Result<User> {
        Ok(User {
            internal_id: row.get(0)?,
            username: row.get(1)?,
            email: row.get(2)?,
            password_hash: row.get(3)?,
            is_guest: row.get::<_, i64>(4)? != 0,
            created_at: row.get(5)?,
        })
    }

    fn shopping_item_from_row(row: &rusqlite::Row) -> rusqlite::Result<ShoppingItem> {
        let ingredients_json: String = row.get(1)?;
        let ingredients: Vec<String> = serde_json::from_str(&ingredients_json).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(1, rusqlite::types::Type::Text, Box::new(e))
        })?;
        Ok(ShoppingItem {
            recipe_name: row.get(0)?,
            ingredients,
        })
    }

    /// Upsert a batch of normalized recipes, keyed by provider id.
    ///
    /// Unordered: a failure on one record is logged and does not abort the
    /// rest of the batch. Existing internal ids survive re-ingestion, so the
    /// operation is idempotent per provider id. Returns how many records
    /// were written.
    pub fn upsert_recipes(&self, recipes: &[NewRecipe]) -> Result<usize> {
        let now = Utc::now().to_rfc3339();
        let mut written = 0;
        for recipe in recipes {
            let ingredients = serde_json::to_string(&recipe.ingredients)?;
            let result = self.conn.execute(
                "INSERT INTO recipes (internal_id, provider_id, title, image, instructions, ingredients, category, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)
                 ON CONFLICT(provider_id) DO UPDATE SET
                    title = excluded.title,
                    image = excluded.image,
                    instructions = excluded.instructions,
                    ingredients = excluded.ingredients,
                    category = excluded.category,
                    updated_at = excluded.updated_at",
                params![
                    new_internal_id(),
                    recipe.provider_id,
                    recipe.title,
                    recipe.image,
                    recipe.instructions,
                    ingredients,
                    recipe.category,
                    now,
                ],
            );
            match result {
                Ok(_) => written += 1,
                Err(e) => {
                    tracing::warn!(provider_id = %recipe.provider_id, error = %e, "skipping recipe upsert");
                }
            }
        }
        Ok(written)
    }

    pub fn find_recipe_by_provider_id(&self, provider_id: &str) -> Result<Option<Recipe>> {
        let mut stmt = self.conn.prepare(
            "SELECT internal_id, provider_id, title, image, instructions, ingredients, category
             FROM recipes WHERE provider_id = ?1",
        )?;
        let mut rows = stmt.query(params![provider_id])?;
        if let Some(row) = rows.next()? {
            Ok(Some(Self::recipe_from_row(row)?))
        } else {
            Ok(None)
        }
    }

    /// Legacy lookup path for 24-hex internal document ids.
    pub fn find_recipe_by_internal_id(&self, internal_id: &str) -> Result<Option<Recipe>> {
        let mut stmt = self.conn.prepare(
            "SELECT internal_id, provider_id, title, image, instructions, ingredients, category
             FROM recipes WHERE internal_id = ?1",
        )?;
        let mut rows = stmt.query(params![internal_id])?;
        if let Some(row) = rows.next()? {
            Ok(Some(Self::recipe_from_row(row)?))
        } else {
            Ok(None)
        }
    }

    /// Paginated lightweight listing of complete records (non-empty
    /// provider id, title, and image). `limit` is capped at 100.
    pub fn list_recipes(&self, page: u32, limit: u32) -> Result<RecipeListPage> {
        let page = page.max(1);
        let limit = limit.clamp(1, MAX_PAGE_LIMIT);
        let offset = u64::from(page - 1) * u64::from(limit);

        let total = self.count_recipes()?;
        let mut stmt = self.conn.prepare(
            "SELECT provider_id, title, image, category FROM recipes
             WHERE provider_id <> '' AND title <> '' AND image <> ''
             ORDER BY id
             LIMIT ?1 OFFSET ?2",
        )?;
        let recipes = stmt
            .query_map(params![limit, offset], Self::summary_from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(RecipeListPage {
            page,
            limit,
            total,
            total_pages: total.div_ceil(u64::from(limit)),
            recipes,
        })
    }

    /// Count of complete records, matching the listing filter.
    pub fn count_recipes(&self) -> Result<u64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM recipes
             WHERE provider_id <> '' AND title <> '' AND image <> ''",
            [],
            |row| row.get(0),
        )?;
        Ok(u64::try_from(count).unwrap_or(0))
    }

    /// Data-quality sweep: drop records that never received a title.
    pub fn delete_untitled_recipes(&self) -> Result<usize> {
        let deleted = self
            .conn
            .execute("DELETE FROM recipes WHERE title = ''", [])?;
        Ok(deleted)
    }

    pub fn get_category_cache(&self, category: &str) -> Result<Option<CategoryCacheEntry>> {
        let mut stmt = self
            .conn
            .prepare("SELECT category, data, created_at FROM category_cache WHERE category = ?1")?;
        let mut rows = stmt.query(params![category])?;
        let Some(row) = rows.next()? else {
            return Ok(None);
        };
        let category: String = row.get(0)?;
        let data_json: String = row.get(1)?;
        let created_at_raw: String = row.get(2)?;
        let data: Vec<RecipeSummary> =
            serde_json::from_str(&data_json).context("corrupt category cache data")?;
        let created_at = DateTime::parse_from_rfc3339(&created_at_raw)
            .context("corrupt category cache timestamp")?
            .with_timezone(&Utc);
        Ok(Some(CategoryCacheEntry {
            category,
            data,
            created_at,
        }))
    }

    /// Full replace of a category snapshot, refreshing its creation time.
    pub fn put_category_cache(&self, category: &str, data: &[RecipeSummary]) -> Result<()> {
        let data_json = serde_json::to_string(data)?;
        self.conn.execute(
            "INSERT INTO category_cache (category, data, created_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(category) DO UPDATE SET data = excluded.data, created_at = excluded.created_at",
            params![category, data_json, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    pub fn clear_category_cache(&self) -> Result<usize> {
        let deleted = self.conn.execute("DELETE FROM category_cache", [])?;
        Ok(deleted)
    }

    pub fn list_favorites(&self, user_id: Option<&str>) -> Result<Vec<Favorite>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, user_id, recipe_id, recipe_title, recipe_image, created_at
             FROM favorites WHERE user_id IS ?1 ORDER BY id",
        )?;
        let favorites = stmt
            .query_map(params![user_id], Self::favorite_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(favorites)
    }

    /// Insert a favorite unless one already exists for (owner, recipe).
    /// Returns `None` on a duplicate.
    pub fn add_favorite(
        &self,
        user_id: Option<&str>,
        recipe_id: &str,
        recipe_title: &str,
        recipe_image: &str,
    ) -> Result<Option<Favorite>> {
        let exists: bool = self.conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM favorites WHERE user_id IS ?1 AND recipe_id = ?2)",
            params![user_id, recipe_id],
            |row| row.get(0),
        )?;
        if exists {
            return Ok(None);
        }

        self.conn.execute(
            "INSERT INTO favorites (user_id, recipe_id, recipe_title, recipe_image, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                user_id,
                recipe_id,
                recipe_title,
                recipe_image,
                Utc::now().to_rfc3339()
            ],
        )?;
        let id = self.conn.last_insert_rowid();
        let favorite = self.conn.query_row(
            "SELECT id, user_id, recipe_id, recipe_title, recipe_image, created_at
             FROM favorites WHERE id = ?1",
            params![id],
            Self::favorite_from_row,
        )?;
        Ok(Some(favorite))
    }

    /// Delete the matching favorite; absence is not an error.
    pub fn remove_favorite(&self, user_id: Option<&str>, recipe_id: &str) -> Result<bool> {
        let deleted = self.conn.execute(
            "DELETE FROM favorites WHERE user_id IS ?1 AND recipe_id = ?2",
            params![user_id, recipe_id],
        )?;
        Ok(deleted > 0)
    }

    /// All items for an owner, in insertion order. An absent list reads as
    /// empty rather than erroring.
    pub fn get_shopping_list(&self, user_id: &str) -> Result<Vec<ShoppingItem>> {
        let mut stmt = self.conn.prepare(
            "SELECT recipe_name, ingredients FROM shopping_items WHERE user_id = ?1 ORDER BY id",
        )?;
        let items = stmt
            .query_map(params![user_id], Self::shopping_item_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(items)
    }

    /// Add ingredients under a recipe name, merging as an ordered set union
    /// when the recipe is already on the list. Returns the updated list.
    pub fn add_shopping_ingredients(
        &self,
        user_id: &str,
        recipe_name: &str,
        ingredients: &[String],
    ) -> Result<Vec<ShoppingItem>> {
        let existing: Option<String> = self
            .conn
            .query_row(
                "SELECT ingredients FROM shopping_items WHERE user_id = ?1 AND recipe_name = ?2",
                params![user_id, recipe_name],
                |row| row.get(0),
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })?;

        match existing {
            Some(json) => {
                let current: Vec<String> =
                    serde_json::from_str(&json).context("corrupt shopping list data")?;
                let merged = merge_ingredients(&current, ingredients);
                self.conn.execute(
                    "UPDATE shopping_items SET ingredients = ?3 WHERE user_id = ?1 AND recipe_name = ?2",
                    params![user_id, recipe_name, serde_json::to_string(&merged)?],
                )?;
            }
            None => {
                let deduped = merge_ingredients(&[], ingredients);
                self.conn.execute(
                    "INSERT INTO shopping_items (user_id, recipe_name, ingredients) VALUES (?1, ?2, ?3)",
                    params![user_id, recipe_name, serde_json::to_string(&deduped)?],
                )?;
            }
        }

        self.get_shopping_list(user_id)
    }

    /// Remove one ingredient from a recipe's item. The item stays on the
    /// list even when its ingredient set becomes empty; a missing list or
    /// item is a no-op.
    pub fn remove_shopping_ingredient(
        &self,
        user_id: &str,
        recipe_name: &str,
        ingredient: &str,
    ) -> Result<Vec<ShoppingItem>> {
        let existing: Option<String> = self
            .conn
            .query_row(
                "SELECT ingredients FROM shopping_items WHERE user_id = ?1 AND recipe_name = ?2",
                params![user_id, recipe_name],
                |row| row.get(0),
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })?;

        if let Some(json) = existing {
            let mut current: Vec<String> =
                serde_json::from_str(&json).context("corrupt shopping list data")?;
            current.retain(|ing| ing != ingredient);
            self.conn.execute(
                "UPDATE shopping_items SET ingredients = ?3 WHERE user_id = ?1 AND recipe_name = ?2",
                params![user_id, recipe_name, serde_json::to_string(&current)?],
            )?;
        }

        self.get_shopping_list(user_id)
    }

    /// Drop a whole recipe from the list; missing list or item is a no-op.
    pub fn remove_shopping_recipe(
        &self,
        user_id: &str,
        recipe_name: &str,
    ) -> Result<Vec<ShoppingItem>> {
        self.conn.execute(
            "DELETE FROM shopping_items WHERE user_id = ?1 AND recipe_name = ?2",
            params![user_id, recipe_name],
        )?;
        self.get_shopping_list(user_id)
    }

    pub fn clear_shopping_list(&self, user_id: &str) -> Result<()> {
        self.conn.execute(
            "DELETE FROM shopping_items WHERE user_id = ?1",
            params![user_id],
        )?;
        Ok(())
    }

    pub fn create_user(&self, user: &NewUser) -> Result<User> {
        let internal_id = new_internal_id();
        self.conn.execute(
            "INSERT INTO users (internal_id, username, email, password_hash, is_guest, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                internal_id,
                user.username,
                user.email,
                user.password_hash,
                i64::from(user.is_guest),
                Utc::now().to_rfc3339(),
            ],
        )?;
        self.find_user_by_internal_id(&internal_id)?
            .context("user vanished after insert")
    }

    pub fn find_user_by_email(&self, email: &str) -> Result<Option<User>> {
        let mut stmt = self.conn.prepare(
            "SELECT internal_id, username, email, password_hash, is_guest, created_at
             FROM users WHERE email = ?1",
        )?;
        let mut rows = stmt.query(params![email])?;
        if let Some(row) = rows.next()? {
            Ok(Some(Self::user_from_row(row)?))
        } else {
            Ok(None)
        }
    }

    pub fn find_user_by_internal_id(&self, internal_id: &str) -> Result<Option<User>> {
        let mut stmt = self.conn.prepare(
            "SELECT internal_id, username, email, password_hash, is_guest, created_at
             FROM users WHERE internal_id = ?1",
        )?;
        let mut rows = stmt.query(params![internal_id])?;
        if let Some(row) = rows.next()? {
            Ok(Some(Self::user_from_row(row)?))
        } else {
            Ok(None)
        }
    }
}
