use std::sync::{Arc, Mutex};

use anyhow::anyhow;
use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
};
use serde::Deserialize;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use crate::auth::{self, Claims};
use crate::mealdb::MealDbClient;
use crate::seeder::{MIN_CATALOG_SIZE, Seeder};
use forkful_core::cache::SWEEP_INTERVAL;
use forkful_core::models::{NewUser, validate_recipe_id};
use forkful_core::service::{ProviderError, RecipeProvider, RecipeService};

const BODY_LIMIT: usize = 1024 * 1024; // 1 MB

/// Listing page size when the client sends none.
const DEFAULT_PAGE_LIMIT: u32 = 50;

#[derive(Clone)]
struct AppState {
    service: Arc<Mutex<RecipeService>>,
    provider: Arc<dyn RecipeProvider>,
    seeder: Seeder,
    jwt_secret: Arc<String>,
}

// --- Request types ---

#[derive(Deserialize)]
struct ListQuery {
    page: Option<u32>,
    limit: Option<u32>,
}

#[derive(Deserialize)]
struct SearchParams {
    q: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct FavoriteAddRequest {
    user_id: Option<String>,
    #[serde(default)]
    recipe_id: String,
    #[serde(default)]
    recipe_title: String,
    #[serde(default)]
    recipe_image: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct FavoriteRemoveRequest {
    user_id: Option<String>,
    #[serde(default)]
    recipe_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ShoppingAddRequest {
    #[serde(default)]
    user_id: String,
    #[serde(default)]
    recipe_name: String,
    ingredients: Option<Vec<String>>,
}

#[derive(Deserialize)]
struct RegisterRequest {
    #[serde(default)]
    username: String,
    #[serde(default)]
    email: String,
    #[serde(default)]
    password: String,
}

#[derive(Deserialize)]
struct LoginRequest {
    #[serde(default)]
    email: String,
    #[serde(default)]
    password: String,
}

#[derive(serde::Serialize)]
struct ErrorResponse {
    error: String,
}

// --- Error handling ---

enum ApiError {
    BadRequest(String),
    Unauthorized(String),
    NotFound(String),
    Conflict(String),
    BadGateway(String),
    GatewayTimeout(String),
    Internal(anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            Self::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            Self::Conflict(msg) => (StatusCode::CONFLICT, msg),
            Self::BadGateway(msg) => (StatusCode::BAD_GATEWAY, msg),
            Self::GatewayTimeout(msg) => (StatusCode::GATEWAY_TIMEOUT, msg),
            Self::Internal(err) => {
                tracing::error!(error = %format!("{err:#}"), "internal server error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };
        (status, Json(ErrorResponse { error: message })).into_response()
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        match err.downcast_ref::<ProviderError>() {
            Some(ProviderError::Status(code)) => {
                Self::BadGateway(format!("Recipe provider error (status {code})"))
            }
            Some(ProviderError::NoResponse) => {
                Self::GatewayTimeout("No response from recipe provider".to_string())
            }
            Some(ProviderError::Request(_)) | None => Self::Internal(err),
        }
    }
}

// Run service work that may hit the upstream on the blocking pool; the
// provider's synchronous methods must never run on a runtime worker thread.
async fn with_service<T, F>(state: &AppState, f: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce(&RecipeService, &dyn RecipeProvider) -> anyhow::Result<T> + Send + 'static,
{
    let service = Arc::clone(&state.service);
    let provider = Arc::clone(&state.provider);
    let result = tokio::task::spawn_blocking(move || {
        let service = service
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        f(&service, provider.as_ref())
    })
    .await
    .map_err(|e| ApiError::Internal(anyhow!("blocking task failed: {e}")))?;
    result.map_err(ApiError::from)
}

fn lock_service(state: &AppState) -> std::sync::MutexGuard<'_, RecipeService> {
    state
        .service
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
}

fn require_claims(state: &AppState, headers: &HeaderMap) -> Result<Claims, ApiError> {
    let token = auth::bearer_token(headers)
        .ok_or_else(|| ApiError::Unauthorized("Missing token".to_string()))?;
    auth::verify_token(&state.jwt_secret, token)
        .map_err(|_| ApiError::Unauthorized("Invalid or expired token".to_string()))
}

// --- Recipe handlers ---

async fn list_recipes(
    State(state): State<AppState>,
    Query(params): Query<ListQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let page = params.page.unwrap_or(1);
    let limit = params.limit.unwrap_or(DEFAULT_PAGE_LIMIT);
    let listing = lock_service(&state).list_recipes(page, limit)?;
    Ok(Json(serde_json::to_value(listing).map_err(|e| {
        ApiError::Internal(anyhow!("failed to serialize listing: {e}"))
    })?))
}

async fn search_recipes(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let query = params.q.unwrap_or_default();
    if query.trim().is_empty() {
        return Err(ApiError::BadRequest("Search query is required".to_string()));
    }

    let fetched = with_service(&state, move |svc, provider| svc.search(provider, &query)).await?;
    if fetched.value.is_empty() {
        return Err(ApiError::NotFound("No recipes found".to_string()));
    }

    Ok(Json(serde_json::json!({
        "fromCache": fetched.from_cache,
        "recipes": fetched.value,
    })))
}

async fn recipes_by_category(
    State(state): State<AppState>,
    Path(category): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if category.trim().is_empty() {
        return Err(ApiError::BadRequest("Category is required".to_string()));
    }

    let fetched = with_service(&state, move |svc, provider| {
        svc.recipes_by_category(provider, &category)
    })
    .await?;

    Ok(Json(serde_json::json!({
        "fromCache": fetched.from_cache,
        "recipes": fetched.value,
    })))
}

async fn get_recipe(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    validate_recipe_id(&id).map_err(|e| ApiError::BadRequest(format!("{e}")))?;

    let fetched = with_service(&state, move |svc, provider| svc.recipe_by_id(provider, &id))
        .await?
        .ok_or_else(|| ApiError::NotFound("Recipe not found".to_string()))?;

    Ok(Json(serde_json::json!({
        "fromCache": fetched.from_cache,
        "recipe": fetched.value,
    })))
}

async fn clear_caches(State(state): State<AppState>) -> Result<Json<serde_json::Value>, ApiError> {
    let service = lock_service(&state);
    let categories = service.clear_category_cache()?;
    service.flush_search_cache();
    Ok(Json(serde_json::json!({
        "message": "Cache cleared",
        "clearedCategories": categories,
    })))
}

async fn clear_all_caches(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let service = lock_service(&state);
    let categories = service.clear_category_cache()?;
    service.flush_search_cache();
    let deleted = service.delete_untitled_recipes()?;
    Ok(Json(serde_json::json!({
        "message": "All caches cleared",
        "clearedCategories": categories,
        "deletedRecipes": deleted,
    })))
}

async fn start_seed(State(state): State<AppState>) -> Result<Response, ApiError> {
    if state.seeder.spawn() {
        Ok((
            StatusCode::ACCEPTED,
            Json(serde_json::json!({ "message": "Seeding started" })),
        )
            .into_response())
    } else {
        Err(ApiError::Conflict("Seeding already in progress".to_string()))
    }
}

async fn seed_status(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::to_value(state.seeder.status()).unwrap_or_default())
}

// --- Favorites handlers ---

async fn list_favorites(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let favorites = lock_service(&state).list_favorites(Some(&user_id))?;
    Ok(Json(serde_json::json!({ "favorites": favorites })))
}

async fn add_favorite(
    State(state): State<AppState>,
    Json(req): Json<FavoriteAddRequest>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    if req.recipe_id.trim().is_empty() {
        return Err(ApiError::BadRequest("recipeId is required".to_string()));
    }

    let favorite = lock_service(&state)
        .add_favorite(
            req.user_id.as_deref(),
            &req.recipe_id,
            &req.recipe_title,
            &req.recipe_image,
        )?
        .ok_or_else(|| ApiError::Conflict("Already in favorites".to_string()))?;

    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({
            "message": "Added to favorites",
            "favorite": favorite,
        })),
    ))
}

// Absence is not an error: the removal is acknowledged either way.
async fn remove_favorite(
    State(state): State<AppState>,
    Json(req): Json<FavoriteRemoveRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if req.recipe_id.trim().is_empty() {
        return Err(ApiError::BadRequest("recipeId is required".to_string()));
    }

    let removed = lock_service(&state).remove_favorite(req.user_id.as_deref(), &req.recipe_id)?;
    if !removed {
        tracing::debug!(recipe_id = %req.recipe_id, "favorite to remove was not stored");
    }
    Ok(Json(
        serde_json::json!({ "message": "Removed from favorites" }),
    ))
}

// --- Shopping list handlers ---
//
// Keyed by the userId path segment or body field; the list is client-scoped
// the same way favorites are.

async fn get_shopping_list(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let list = lock_service(&state).get_shopping_list(&user_id)?;
    Ok(Json(serde_json::json!({ "list": list })))
}

async fn add_to_shopping_list(
    State(state): State<AppState>,
    Json(req): Json<ShoppingAddRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let Some(ingredients) = req.ingredients else {
        return Err(ApiError::BadRequest(
            "userId, recipeName and ingredients are required".to_string(),
        ));
    };
    if req.user_id.trim().is_empty() || req.recipe_name.trim().is_empty() {
        return Err(ApiError::BadRequest(
            "userId, recipeName and ingredients are required".to_string(),
        ));
    }

    let list = lock_service(&state).add_shopping_ingredients(
        &req.user_id,
        &req.recipe_name,
        &ingredients,
    )?;
    Ok(Json(serde_json::json!({ "list": list })))
}

async fn remove_shopping_ingredient(
    State(state): State<AppState>,
    Path((user_id, recipe_name, ingredient)): Path<(String, String, String)>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let list =
        lock_service(&state).remove_shopping_ingredient(&user_id, &recipe_name, &ingredient)?;
    Ok(Json(serde_json::json!({ "list": list })))
}

async fn remove_shopping_recipe(
    State(state): State<AppState>,
    Path((user_id, recipe_name)): Path<(String, String)>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let list = lock_service(&state).remove_shopping_recipe(&user_id, &recipe_name)?;
    Ok(Json(serde_json::json!({ "list": list })))
}

async fn clear_shopping_list(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    lock_service(&state).clear_shopping_list(&user_id)?;
    Ok(Json(serde_json::json!({ "list": [] })))
}

// --- User handlers ---

async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    if req.username.trim().is_empty() || req.email.trim().is_empty() || req.password.is_empty() {
        return Err(ApiError::BadRequest("All fields are required".to_string()));
    }

    let email = req.email.trim().to_lowercase();
    {
        let service = lock_service(&state);
        if service.find_user_by_email(&email)?.is_some() {
            return Err(ApiError::BadRequest("User already exists".to_string()));
        }
    }

    let password_hash = auth::hash_password(&req.password)?;
    let user = lock_service(&state).create_user(&NewUser {
        username: req.username.trim().to_string(),
        email: Some(email),
        password_hash: Some(password_hash),
        is_guest: false,
    })?;
    let token = auth::issue_token(&state.jwt_secret, &user)?;

    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({ "token": token, "user": user })),
    ))
}

async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let email = req.email.trim().to_lowercase();
    let user = lock_service(&state)
        .find_user_by_email(&email)?
        .ok_or_else(|| ApiError::BadRequest("Invalid credentials".to_string()))?;

    let valid = user
        .password_hash
        .as_deref()
        .is_some_and(|hash| auth::verify_password(&req.password, hash));
    if !valid {
        return Err(ApiError::BadRequest("Invalid credentials".to_string()));
    }

    let token = auth::issue_token(&state.jwt_secret, &user)?;
    Ok(Json(serde_json::json!({ "token": token, "user": user })))
}

async fn guest_login(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let username = format!("guest_{}", chrono::Utc::now().timestamp_millis());
    let user = lock_service(&state).create_user(&NewUser {
        username,
        email: None,
        password_hash: None,
        is_guest: true,
    })?;
    let token = auth::issue_token(&state.jwt_secret, &user)?;
    Ok(Json(serde_json::json!({ "token": token, "user": user })))
}

async fn protected(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, ApiError> {
    let claims = require_claims(&state, &headers)?;
    Ok(Json(serde_json::json!({
        "message": "Access granted",
        "user": claims,
    })))
}

// --- Router builder ---

fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/recipes", get(list_recipes))
        .route("/api/recipes/search", get(search_recipes))
        .route("/api/recipes/category/{category}", get(recipes_by_category))
        .route("/api/recipes/cache", delete(clear_caches))
        .route("/api/recipes/clear-all-cache", delete(clear_all_caches))
        .route("/api/recipes/admin/seed", post(start_seed))
        .route("/api/recipes/admin/seed/status", get(seed_status))
        .route("/api/recipes/{id}", get(get_recipe))
        .route("/api/favorites/add", post(add_favorite))
        .route("/api/favorites/remove", delete(remove_favorite))
        .route("/api/favorites/{user_id}", get(list_favorites))
        .route("/api/shoppingList", post(add_to_shopping_list))
        .route(
            "/api/shoppingList/{user_id}",
            get(get_shopping_list).delete(clear_shopping_list),
        )
        .route(
            "/api/shoppingList/{user_id}/{recipe_name}",
            delete(remove_shopping_recipe),
        )
        .route(
            "/api/shoppingList/{user_id}/{recipe_name}/ingredient/{ingredient}",
            delete(remove_shopping_ingredient),
        )
        .route("/api/users/register", post(register))
        .route("/api/users/login", post(login))
        .route("/api/users/guest", post(guest_login))
        .route("/api/protected", get(protected))
        .layer(RequestBodyLimitLayer::new(BODY_LIMIT))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// --- Server startup ---

pub async fn start_server(
    service: RecipeService,
    port: u16,
    bind: &str,
    jwt_secret: String,
) -> anyhow::Result<()> {
    let service = Arc::new(Mutex::new(service));
    let provider: Arc<dyn RecipeProvider> = Arc::new(MealDbClient::new());
    let seeder = Seeder::new(Arc::clone(&service), Arc::clone(&provider));

    let state = AppState {
        service: Arc::clone(&service),
        provider,
        seeder: seeder.clone(),
        jwt_secret: Arc::new(jwt_secret),
    };

    // Periodic eviction of expired search cache entries.
    {
        let service = Arc::clone(&service);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(SWEEP_INTERVAL);
            interval.tick().await; // first tick fires immediately
            loop {
                interval.tick().await;
                let evicted = service
                    .lock()
                    .unwrap_or_else(std::sync::PoisonError::into_inner)
                    .evict_expired_searches();
                if evicted > 0 {
                    tracing::debug!(evicted, "evicted expired search cache entries");
                }
            }
        });
    }

    // A thin catalog makes browsing useless; seed it in the background.
    let stored = service
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
        .recipe_count()?;
    if stored < MIN_CATALOG_SIZE {
        tracing::info!(stored, "catalog below threshold, starting seed sweep");
        seeder.spawn();
    }

    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(format!("{bind}:{port}")).await?;
    tracing::info!("listening on http://{bind}:{port}");
    axum::serve(listener, app).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use forkful_core::mealdb::MealRecord;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    struct StubProvider {
        meals: Vec<MealRecord>,
    }

    impl StubProvider {
        fn empty() -> Self {
            Self { meals: Vec::new() }
        }

        fn with_meals(meals: Vec<MealRecord>) -> Self {
            Self { meals }
        }
    }

    impl RecipeProvider for StubProvider {
        fn lookup_by_id(&self, id: &str) -> Result<Vec<MealRecord>, ProviderError> {
            Ok(self
                .meals
                .iter()
                .filter(|m| m.id_meal.as_deref() == Some(id))
                .cloned()
                .collect())
        }

        fn search_by_name(&self, _query: &str) -> Result<Vec<MealRecord>, ProviderError> {
            Ok(self.meals.clone())
        }

        fn filter_by_category(&self, _category: &str) -> Result<Vec<MealRecord>, ProviderError> {
            Ok(self.meals.clone())
        }

        fn search_by_prefix(&self, _letter: char) -> Result<Vec<MealRecord>, ProviderError> {
            Ok(self.meals.clone())
        }
    }

    struct DownProvider;

    impl RecipeProvider for DownProvider {
        fn lookup_by_id(&self, _id: &str) -> Result<Vec<MealRecord>, ProviderError> {
            Err(ProviderError::NoResponse)
        }
        fn search_by_name(&self, _query: &str) -> Result<Vec<MealRecord>, ProviderError> {
            Err(ProviderError::Status(503))
        }
        fn filter_by_category(&self, _category: &str) -> Result<Vec<MealRecord>, ProviderError> {
            Err(ProviderError::Status(503))
        }
        fn search_by_prefix(&self, _letter: char) -> Result<Vec<MealRecord>, ProviderError> {
            Err(ProviderError::NoResponse)
        }
    }

    fn sample_meal(id: &str, title: &str) -> MealRecord {
        let mut extra = std::collections::HashMap::new();
        extra.insert(
            "strIngredient1".to_string(),
            Some("penne rigate".to_string()),
        );
        extra.insert("strMeasure1".to_string(), Some("1 pound".to_string()));
        MealRecord {
            id_meal: Some(id.to_string()),
            str_meal: Some(title.to_string()),
            str_meal_thumb: Some(format!("https://example.test/{id}.jpg")),
            str_instructions: Some("Boil pasta.".to_string()),
            str_category: Some("Vegetarian".to_string()),
            extra,
        }
    }

    fn test_state(provider: Arc<dyn RecipeProvider>) -> AppState {
        let service = Arc::new(Mutex::new(RecipeService::new_in_memory().unwrap()));
        let seeder = Seeder::new(Arc::clone(&service), Arc::clone(&provider));
        AppState {
            service,
            provider,
            seeder,
            jwt_secret: Arc::new("test-secret".to_string()),
        }
    }

    fn test_app(provider: Arc<dyn RecipeProvider>) -> Router {
        build_router(test_state(provider))
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let body = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&body).unwrap()
    }

    async fn get(app: &Router, uri: &str) -> Response {
        app.clone()
            .oneshot(axum::http::Request::get(uri).body(Body::empty()).unwrap())
            .await
            .unwrap()
    }

    async fn get_with_token(app: &Router, uri: &str, token: &str) -> Response {
        app.clone()
            .oneshot(
                axum::http::Request::get(uri)
                    .header("Authorization", format!("Bearer {token}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap()
    }

    async fn send_json(
        app: &Router,
        method: &str,
        uri: &str,
        body: serde_json::Value,
    ) -> Response {
        app.clone()
            .oneshot(
                axum::http::Request::builder()
                    .method(method)
                    .uri(uri)
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap()
    }

    async fn send_empty(app: &Router, method: &str, uri: &str) -> Response {
        app.clone()
            .oneshot(
                axum::http::Request::builder()
                    .method(method)
                    .uri(uri)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap()
    }

    // --- Recipe routes ---

    #[tokio::test(flavor = "multi_thread")]
    async fn empty_listing_returns_page_shape() {
        let app = test_app(Arc::new(StubProvider::empty()));
        let response = get(&app, "/api/recipes").await;
        assert_eq!(response.status(), StatusCode::OK);

        let json = body_json(response).await;
        assert_eq!(json["page"], 1);
        assert_eq!(json["limit"], 50);
        assert_eq!(json["total"], 0);
        assert!(json["recipes"].as_array().unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn recipe_fetch_then_cache_hit() {
        let app = test_app(Arc::new(StubProvider::with_meals(vec![sample_meal(
            "52771", "Penne",
        )])));

        let response = get(&app, "/api/recipes/52771").await;
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["fromCache"], false);
        assert_eq!(json["recipe"]["providerId"], "52771");
        assert_eq!(json["recipe"]["category"], "vegetarian");

        let response = get(&app, "/api/recipes/52771").await;
        let json = body_json(response).await;
        assert_eq!(json["fromCache"], true);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn unknown_recipe_is_404() {
        let app = test_app(Arc::new(StubProvider::empty()));
        let response = get(&app, "/api/recipes/99999").await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let json = body_json(response).await;
        assert_eq!(json["error"], "Recipe not found");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn malformed_recipe_id_is_400() {
        let app = test_app(Arc::new(StubProvider::empty()));
        let response = get(&app, "/api/recipes/query=chicken").await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn search_requires_a_query() {
        let app = test_app(Arc::new(StubProvider::empty()));
        let response = get(&app, "/api/recipes/search").await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json = body_json(response).await;
        assert_eq!(json["error"], "Search query is required");

        let response = get(&app, "/api/recipes/search?q=%20%20").await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn search_reads_the_q_parameter() {
        let app = test_app(Arc::new(StubProvider::with_meals(vec![sample_meal(
            "52771",
            "Spicy Arrabiata Penne",
        )])));

        let response = get(&app, "/api/recipes/search?q=arrabiata").await;
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["fromCache"], false);
        assert_eq!(json["recipes"].as_array().unwrap().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn search_serves_repeat_queries_from_cache() {
        let app = test_app(Arc::new(StubProvider::with_meals(vec![sample_meal(
            "52771", "Penne",
        )])));

        let response = get(&app, "/api/recipes/search?q=Penne").await;
        assert_eq!(response.status(), StatusCode::OK);

        // Same query, different case: served from the search cache.
        let response = get(&app, "/api/recipes/search?q=penne").await;
        let json = body_json(response).await;
        assert_eq!(json["fromCache"], true);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn search_with_no_matches_is_404() {
        let app = test_app(Arc::new(StubProvider::empty()));
        let response = get(&app, "/api/recipes/search?q=zzz").await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn category_snapshot_round_trip() {
        let app = test_app(Arc::new(StubProvider::with_meals(vec![sample_meal(
            "52771", "Penne",
        )])));

        let response = get(&app, "/api/recipes/category/Pasta").await;
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["fromCache"], false);
        assert_eq!(json["recipes"][0]["category"], "pasta");

        let response = get(&app, "/api/recipes/category/pasta").await;
        let json = body_json(response).await;
        assert_eq!(json["fromCache"], true);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn provider_outage_maps_to_gateway_errors() {
        let app = test_app(Arc::new(DownProvider));

        // Status failures surface as 502.
        let response = get(&app, "/api/recipes/search?q=penne").await;
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);

        // No-response failures surface as 504.
        let response = get(&app, "/api/recipes/52771").await;
        assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn clear_cache_forces_category_refetch() {
        let app = test_app(Arc::new(StubProvider::with_meals(vec![sample_meal(
            "52771", "Penne",
        )])));

        get(&app, "/api/recipes/category/pasta").await;
        let response = send_empty(&app, "DELETE", "/api/recipes/cache").await;
        assert_eq!(response.status(), StatusCode::OK);

        let response = get(&app, "/api/recipes/category/pasta").await;
        let json = body_json(response).await;
        assert_eq!(json["fromCache"], false);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn seed_acknowledges_before_completion() {
        let app = test_app(Arc::new(StubProvider::with_meals(vec![sample_meal(
            "52771", "Penne",
        )])));

        let response = send_empty(&app, "POST", "/api/recipes/admin/seed").await;
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        let json = body_json(response).await;
        assert_eq!(json["message"], "Seeding started");

        let response = get(&app, "/api/recipes/admin/seed/status").await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    // --- Favorites ---

    #[tokio::test(flavor = "multi_thread")]
    async fn favorites_round_trip() {
        let app = test_app(Arc::new(StubProvider::empty()));

        let body = serde_json::json!({
            "userId": "alice",
            "recipeId": "52771",
            "recipeTitle": "Penne",
            "recipeImage": "https://example.test/penne.jpg",
        });
        let response = send_json(&app, "POST", "/api/favorites/add", body.clone()).await;
        assert_eq!(response.status(), StatusCode::CREATED);
        let json = body_json(response).await;
        assert_eq!(json["message"], "Added to favorites");
        assert_eq!(json["favorite"]["recipeId"], "52771");

        // Duplicate is a conflict.
        let response = send_json(&app, "POST", "/api/favorites/add", body).await;
        assert_eq!(response.status(), StatusCode::CONFLICT);
        let json = body_json(response).await;
        assert_eq!(json["error"], "Already in favorites");

        let response = get(&app, "/api/favorites/alice").await;
        let json = body_json(response).await;
        assert_eq!(json["favorites"].as_array().unwrap().len(), 1);

        let remove = serde_json::json!({ "userId": "alice", "recipeId": "52771" });
        let response = send_json(&app, "DELETE", "/api/favorites/remove", remove).await;
        assert_eq!(response.status(), StatusCode::OK);

        let response = get(&app, "/api/favorites/alice").await;
        let json = body_json(response).await;
        assert!(json["favorites"].as_array().unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn removing_an_absent_favorite_still_succeeds() {
        let app = test_app(Arc::new(StubProvider::empty()));
        let remove = serde_json::json!({ "userId": "alice", "recipeId": "52771" });
        let response = send_json(&app, "DELETE", "/api/favorites/remove", remove).await;
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["message"], "Removed from favorites");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn favorites_require_a_recipe_id() {
        let app = test_app(Arc::new(StubProvider::empty()));
        let response = send_json(
            &app,
            "POST",
            "/api/favorites/add",
            serde_json::json!({ "recipeTitle": "Penne" }),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = send_json(
            &app,
            "DELETE",
            "/api/favorites/remove",
            serde_json::json!({ "userId": "alice" }),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn anonymous_favorites_deduplicate_without_user_id() {
        let app = test_app(Arc::new(StubProvider::empty()));

        let body = serde_json::json!({ "recipeId": "52771", "recipeTitle": "Penne" });
        let response = send_json(&app, "POST", "/api/favorites/add", body.clone()).await;
        assert_eq!(response.status(), StatusCode::CREATED);

        let response = send_json(&app, "POST", "/api/favorites/add", body).await;
        assert_eq!(response.status(), StatusCode::CONFLICT);

        // The anonymous bucket is invisible to named users.
        let response = get(&app, "/api/favorites/alice").await;
        let json = body_json(response).await;
        assert!(json["favorites"].as_array().unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn favorites_are_scoped_per_user() {
        let app = test_app(Arc::new(StubProvider::empty()));

        let body = serde_json::json!({ "userId": "alice", "recipeId": "52771" });
        send_json(&app, "POST", "/api/favorites/add", body).await;

        let response = get(&app, "/api/favorites/alice").await;
        let json = body_json(response).await;
        assert_eq!(json["favorites"].as_array().unwrap().len(), 1);

        let response = get(&app, "/api/favorites/bob").await;
        let json = body_json(response).await;
        assert!(json["favorites"].as_array().unwrap().is_empty());
    }

    // --- Shopping list ---

    #[tokio::test(flavor = "multi_thread")]
    async fn missing_shopping_list_reads_empty() {
        let app = test_app(Arc::new(StubProvider::empty()));
        let response = get(&app, "/api/shoppingList/nobody").await;
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert!(json["list"].as_array().unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn shopping_list_add_merge_remove() {
        let app = test_app(Arc::new(StubProvider::empty()));

        let response = send_json(
            &app,
            "POST",
            "/api/shoppingList",
            serde_json::json!({
                "userId": "alice",
                "recipeName": "Pancakes",
                "ingredients": ["1 egg", "2 cups flour"],
            }),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);

        // Re-adding merges as a set union.
        let response = send_json(
            &app,
            "POST",
            "/api/shoppingList",
            serde_json::json!({
                "userId": "alice",
                "recipeName": "Pancakes",
                "ingredients": ["1 egg", "1 tsp salt"],
            }),
        )
        .await;
        let json = body_json(response).await;
        let list = json["list"].as_array().unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0]["ingredients"].as_array().unwrap().len(), 3);

        let response = send_empty(
            &app,
            "DELETE",
            "/api/shoppingList/alice/Pancakes/ingredient/1%20egg",
        )
        .await;
        let json = body_json(response).await;
        assert_eq!(json["list"][0]["ingredients"].as_array().unwrap().len(), 2);

        let response = send_empty(&app, "DELETE", "/api/shoppingList/alice/Pancakes").await;
        let json = body_json(response).await;
        assert!(json["list"].as_array().unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn removing_from_an_absent_list_returns_empty() {
        let app = test_app(Arc::new(StubProvider::empty()));
        let response = send_empty(
            &app,
            "DELETE",
            "/api/shoppingList/alice/Tacos/ingredient/Cumin",
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert!(json["list"].as_array().unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn shopping_list_clear_empties_everything() {
        let app = test_app(Arc::new(StubProvider::empty()));

        send_json(
            &app,
            "POST",
            "/api/shoppingList",
            serde_json::json!({
                "userId": "alice",
                "recipeName": "Tacos",
                "ingredients": ["Cumin"],
            }),
        )
        .await;

        let response = send_empty(&app, "DELETE", "/api/shoppingList/alice").await;
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert!(json["list"].as_array().unwrap().is_empty());

        let response = get(&app, "/api/shoppingList/alice").await;
        let json = body_json(response).await;
        assert!(json["list"].as_array().unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn shopping_lists_are_per_user() {
        let app = test_app(Arc::new(StubProvider::empty()));
        send_json(
            &app,
            "POST",
            "/api/shoppingList",
            serde_json::json!({
                "userId": "alice",
                "recipeName": "Tacos",
                "ingredients": ["Cumin"],
            }),
        )
        .await;

        let response = get(&app, "/api/shoppingList/bob").await;
        let json = body_json(response).await;
        assert!(json["list"].as_array().unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn shopping_list_rejects_incomplete_payload() {
        let app = test_app(Arc::new(StubProvider::empty()));

        // Missing userId.
        let response = send_json(
            &app,
            "POST",
            "/api/shoppingList",
            serde_json::json!({ "recipeName": "Tacos", "ingredients": ["Cumin"] }),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        // Missing ingredients field entirely.
        let response = send_json(
            &app,
            "POST",
            "/api/shoppingList",
            serde_json::json!({ "userId": "alice", "recipeName": "Tacos" }),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json = body_json(response).await;
        assert_eq!(json["error"], "userId, recipeName and ingredients are required");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn encoded_recipe_names_are_decoded() {
        let app = test_app(Arc::new(StubProvider::empty()));
        send_json(
            &app,
            "POST",
            "/api/shoppingList",
            serde_json::json!({
                "userId": "alice",
                "recipeName": "Chicken Pie",
                "ingredients": ["2 chicken breasts"],
            }),
        )
        .await;

        let response = send_empty(&app, "DELETE", "/api/shoppingList/alice/Chicken%20Pie").await;
        let json = body_json(response).await;
        assert!(json["list"].as_array().unwrap().is_empty());
    }

    // --- Users ---

    #[tokio::test(flavor = "multi_thread")]
    async fn register_login_and_protected_flow() {
        let app = test_app(Arc::new(StubProvider::empty()));

        let body = serde_json::json!({
            "username": "alice",
            "email": "Alice@Example.test",
            "password": "hunter2",
        });
        let response = send_json(&app, "POST", "/api/users/register", body.clone()).await;
        assert_eq!(response.status(), StatusCode::CREATED);
        let json = body_json(response).await;
        assert!(json["token"].is_string());
        assert_eq!(json["user"]["username"], "alice");
        assert_eq!(json["user"]["isGuest"], false);
        // Password material never leaves the server.
        assert!(json["user"].get("passwordHash").is_none());

        // Same email again (case-insensitive) is rejected.
        let response = send_json(&app, "POST", "/api/users/register", body).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json = body_json(response).await;
        assert_eq!(json["error"], "User already exists");

        let response = send_json(
            &app,
            "POST",
            "/api/users/login",
            serde_json::json!({ "email": "alice@example.test", "password": "hunter2" }),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        let token = json["token"].as_str().unwrap();

        let response = get_with_token(&app, "/api/protected", token).await;
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["user"]["username"], "alice");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn login_rejects_bad_credentials() {
        let app = test_app(Arc::new(StubProvider::empty()));
        send_json(
            &app,
            "POST",
            "/api/users/register",
            serde_json::json!({ "username": "alice", "email": "alice@example.test", "password": "hunter2" }),
        )
        .await;

        let response = send_json(
            &app,
            "POST",
            "/api/users/login",
            serde_json::json!({ "email": "alice@example.test", "password": "wrong" }),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = send_json(
            &app,
            "POST",
            "/api/users/login",
            serde_json::json!({ "email": "nobody@example.test", "password": "hunter2" }),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn register_requires_all_fields() {
        let app = test_app(Arc::new(StubProvider::empty()));
        let response = send_json(
            &app,
            "POST",
            "/api/users/register",
            serde_json::json!({ "username": "alice", "email": "", "password": "x" }),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn guest_sessions_are_marked_and_verified() {
        let app = test_app(Arc::new(StubProvider::empty()));
        let response = send_json(&app, "POST", "/api/users/guest", serde_json::json!({})).await;
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["user"]["isGuest"], true);
        assert!(
            json["user"]["username"]
                .as_str()
                .unwrap()
                .starts_with("guest_")
        );

        let token = json["token"].as_str().unwrap();
        let response = get_with_token(&app, "/api/protected", token).await;
        let json = body_json(response).await;
        assert_eq!(json["user"]["is_guest"], true);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn protected_without_token_is_401() {
        let app = test_app(Arc::new(StubProvider::empty()));
        let response = get(&app, "/api/protected").await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = get_with_token(&app, "/api/protected", "bogus").await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    // --- Layers ---

    #[tokio::test(flavor = "multi_thread")]
    async fn oversized_body_is_rejected() {
        let app = test_app(Arc::new(StubProvider::empty()));
        let big = vec![b'x'; BODY_LIMIT + 1];
        let response = app
            .clone()
            .oneshot(
                axum::http::Request::post("/api/users/register")
                    .header("content-type", "application/json")
                    .body(Body::from(big))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn internal_error_does_not_leak_details() {
        let error = ApiError::Internal(anyhow!("secret path /home/user/.forkful/db"));
        let response = error.into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let json = body_json(response).await;
        assert_eq!(json["error"], "Internal server error");
    }
}
