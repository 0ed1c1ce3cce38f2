use std::time::Duration;

use forkful_core::mealdb::{MealRecord, MealsResponse};
use forkful_core::service::{ProviderError, RecipeProvider};

const BASE_URL: &str = "https://www.themealdb.com/api/json/v1/1";

pub struct MealDbClient {
    client: reqwest::Client,
    base_url: String,
    rt: tokio::runtime::Handle,
}

impl MealDbClient {
    pub fn new() -> Self {
        Self::with_base_url(BASE_URL)
    }

    /// Point the client at a different base URL, for tests against a local
    /// stub server.
    pub fn with_base_url(base_url: &str) -> Self {
        let client = reqwest::Client::builder()
            .user_agent(format!("forkful/{} (recipe server)", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(15))
            .connect_timeout(Duration::from_secs(5))
            .build()
            .expect("Failed to build HTTP client");
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            rt: tokio::runtime::Handle::current(),
        }
    }

    async fn fetch(
        &self,
        path: &str,
        params: &[(&str, &str)],
    ) -> Result<Vec<MealRecord>, ProviderError> {
        let url = format!("{}/{path}", self.base_url);
        let resp = self
            .client
            .get(&url)
            .query(params)
            .send()
            .await
            .map_err(map_reqwest_error)?;

        let status = resp.status();
        if !status.is_success() {
            return Err(ProviderError::Status(status.as_u16()));
        }

        let data: MealsResponse = resp.json().await.map_err(map_reqwest_error)?;
        Ok(data.into_meals())
    }

    pub async fn lookup_by_id_async(&self, id: &str) -> Result<Vec<MealRecord>, ProviderError> {
        self.fetch("lookup.php", &[("i", id)]).await
    }

    pub async fn search_by_name_async(
        &self,
        query: &str,
    ) -> Result<Vec<MealRecord>, ProviderError> {
        self.fetch("search.php", &[("s", query)]).await
    }

    pub async fn filter_by_category_async(
        &self,
        category: &str,
    ) -> Result<Vec<MealRecord>, ProviderError> {
        self.fetch("filter.php", &[("c", category)]).await
    }

    pub async fn search_by_prefix_async(
        &self,
        letter: char,
    ) -> Result<Vec<MealRecord>, ProviderError> {
        let letter = letter.to_string();
        self.fetch("search.php", &[("f", letter.as_str())]).await
    }
}

fn map_reqwest_error(err: reqwest::Error) -> ProviderError {
    if err.is_timeout() || err.is_connect() {
        ProviderError::NoResponse
    } else if let Some(status) = err.status() {
        ProviderError::Status(status.as_u16())
    } else {
        ProviderError::Request(err.to_string())
    }
}

// Blocking seam for the synchronous service layer. Callers must not be on a
// runtime worker thread; the server invokes these from `spawn_blocking`.
impl RecipeProvider for MealDbClient {
    fn lookup_by_id(&self, id: &str) -> Result<Vec<MealRecord>, ProviderError> {
        self.rt.block_on(self.lookup_by_id_async(id))
    }

    fn search_by_name(&self, query: &str) -> Result<Vec<MealRecord>, ProviderError> {
        self.rt.block_on(self.search_by_name_async(query))
    }

    fn filter_by_category(&self, category: &str) -> Result<Vec<MealRecord>, ProviderError> {
        self.rt.block_on(self.filter_by_category_async(category))
    }

    fn search_by_prefix(&self, letter: char) -> Result<Vec<MealRecord>, ProviderError> {
        self.rt.block_on(self.search_by_prefix_async(letter))
    }
}
