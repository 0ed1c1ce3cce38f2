use std::collections::HashMap;

use serde::Deserialize;

use crate::models::{NewRecipe, RecipeSummary};

/// Number of parallel ingredient/measure slots in an upstream meal record.
pub const INGREDIENT_SLOTS: usize = 20;

/// Upstream response envelope. TheMealDB returns `{"meals": null}` when a
/// lookup or search matches nothing.
#[derive(Debug, Deserialize)]
pub struct MealsResponse {
    pub meals: Option<Vec<MealRecord>>,
}

impl MealsResponse {
    #[must_use]
    pub fn into_meals(self) -> Vec<MealRecord> {
        self.meals.unwrap_or_default()
    }
}

/// Raw provider meal record.
///
/// The twenty `strIngredientN`/`strMeasureN` pairs are captured through the
/// flattened map rather than forty named fields; every extra provider field
/// is a string or JSON null, so the map also absorbs fields we ignore
/// (`strArea`, `strTags`, ...).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MealRecord {
    #[serde(rename = "idMeal")]
    pub id_meal: Option<String>,
    #[serde(rename = "strMeal")]
    pub str_meal: Option<String>,
    #[serde(rename = "strMealThumb")]
    pub str_meal_thumb: Option<String>,
    #[serde(rename = "strInstructions")]
    pub str_instructions: Option<String>,
    #[serde(rename = "strCategory")]
    pub str_category: Option<String>,
    #[serde(flatten)]
    pub extra: HashMap<String, Option<String>>,
}

impl MealRecord {
    fn slot(&self, prefix: &str, index: usize) -> Option<&str> {
        self.extra
            .get(&format!("{prefix}{index}"))
            .and_then(Option::as_deref)
    }
}

/// A slot value counts as filled when it is present, non-blank, and not the
/// literal string "null" (the provider ships that as real data).
fn filled(value: Option<&str>) -> Option<&str> {
    let trimmed = value?.trim();
    if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("null") {
        None
    } else {
        Some(trimmed)
    }
}

/// Extract the ingredient list from the fixed slot sequence, in slot order.
///
/// Each filled slot yields `"<measure> <ingredient>"`; the measure segment
/// is dropped when its slot is blank or "null".
#[must_use]
pub fn ingredients(meal: &MealRecord) -> Vec<String> {
    let mut out = Vec::new();
    for i in 1..=INGREDIENT_SLOTS {
        let Some(ingredient) = filled(meal.slot("strIngredient", i)) else {
            continue;
        };
        match filled(meal.slot("strMeasure", i)) {
            Some(measure) => out.push(format!("{measure} {ingredient}")),
            None => out.push(ingredient.to_string()),
        }
    }
    out
}

/// Normalize a raw meal record into the canonical recipe shape.
///
/// Returns `None` when the record has no usable provider id. Missing title
/// and image fall back to `"Untitled Recipe"` / `""` so every call site
/// stores the same defaults.
#[must_use]
pub fn normalize(meal: &MealRecord) -> Option<NewRecipe> {
    let provider_id = filled(meal.id_meal.as_deref())?.to_string();
    Some(NewRecipe {
        provider_id,
        title: filled(meal.str_meal.as_deref())
            .unwrap_or("Untitled Recipe")
            .to_string(),
        image: filled(meal.str_meal_thumb.as_deref())
            .unwrap_or_default()
            .to_string(),
        instructions: filled(meal.str_instructions.as_deref())
            .unwrap_or_default()
            .to_string(),
        ingredients: ingredients(meal),
        category: filled(meal.str_category.as_deref()).map(str::to_lowercase),
    })
}

/// Build a lightweight summary from a partial-field category filter record.
///
/// `filter.php` records carry only id/title/thumbnail; the category comes
/// from the query, already lower-cased by the caller.
#[must_use]
pub fn summarize(meal: &MealRecord, category: &str) -> Option<RecipeSummary> {
    let provider_id = filled(meal.id_meal.as_deref())?.to_string();
    Some(RecipeSummary {
        provider_id,
        title: filled(meal.str_meal.as_deref())
            .unwrap_or("Untitled Recipe")
            .to_string(),
        image: filled(meal.str_meal_thumb.as_deref())
            .unwrap_or_default()
            .to_string(),
        category: Some(category.to_string()),
    })
}
