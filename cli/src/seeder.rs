use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use serde::Serialize;

use forkful_core::service::{RecipeProvider, RecipeService};

/// Letters fetched concurrently per round. Keeps the upstream polite.
pub const BATCH_SIZE: usize = 4;

/// The catalog is considered thin below this many stored recipes; the server
/// kicks off a background sweep at startup when under it.
pub const MIN_CATALOG_SIZE: u64 = 50;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepOutcome {
    pub fetched: usize,
    pub upserted: usize,
    pub finished_at: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SeederStatus {
    pub running: bool,
    pub last: Option<SweepOutcome>,
}

/// Walks the catalog a–z, fetching each letter's recipes from the provider
/// and ingesting them through the service. Fetches fan out in fixed batches
/// with a join barrier between batches; a failed letter contributes nothing
/// and the sweep continues.
#[derive(Clone)]
pub struct Seeder {
    service: Arc<Mutex<RecipeService>>,
    provider: Arc<dyn RecipeProvider>,
    running: Arc<AtomicBool>,
    last: Arc<Mutex<Option<SweepOutcome>>>,
}

impl Seeder {
    pub fn new(service: Arc<Mutex<RecipeService>>, provider: Arc<dyn RecipeProvider>) -> Self {
        Self {
            service,
            provider,
            running: Arc::new(AtomicBool::new(false)),
            last: Arc::new(Mutex::new(None)),
        }
    }

    #[must_use]
    pub fn status(&self) -> SeederStatus {
        SeederStatus {
            running: self.running.load(Ordering::SeqCst),
            last: self
                .last
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .clone(),
        }
    }

    /// Kick off a background sweep. Returns `false` without spawning when a
    /// sweep is already in flight.
    pub fn spawn(&self) -> bool {
        if self.running.swap(true, Ordering::SeqCst) {
            return false;
        }
        let seeder = self.clone();
        tokio::spawn(async move {
            let outcome = seeder.run_sweep().await;
            tracing::info!(
                fetched = outcome.fetched,
                upserted = outcome.upserted,
                "catalog seed sweep finished"
            );
            seeder.running.store(false, Ordering::SeqCst);
        });
        true
    }

    /// Run one full a–z sweep to completion. Awaitable directly for the CLI
    /// `seed` command and tests; `spawn` uses it in the background.
    pub async fn run_sweep(&self) -> SweepOutcome {
        let letters: Vec<char> = ('a'..='z').collect();
        let mut fetched = 0;
        let mut upserted = 0;

        for batch in letters.chunks(BATCH_SIZE) {
            let mut handles = Vec::with_capacity(batch.len());
            for &letter in batch {
                let provider = Arc::clone(&self.provider);
                handles.push(tokio::task::spawn_blocking(move || {
                    match provider.search_by_prefix(letter) {
                        Ok(meals) => meals,
                        Err(e) => {
                            tracing::warn!(%letter, error = %e, "seed fetch failed");
                            Vec::new()
                        }
                    }
                }));
            }

            // Join barrier: the whole batch lands before the next one starts.
            for handle in handles {
                let meals = match handle.await {
                    Ok(meals) => meals,
                    Err(e) => {
                        tracing::warn!(error = %e, "seed fetch task panicked");
                        Vec::new()
                    }
                };
                if meals.is_empty() {
                    continue;
                }
                fetched += meals.len();
                let service = self
                    .service
                    .lock()
                    .unwrap_or_else(std::sync::PoisonError::into_inner);
                match service.ingest_meals(&meals) {
                    Ok(written) => upserted += written,
                    Err(e) => tracing::warn!(error = %e, "seed ingest failed"),
                }
            }
        }

        let outcome = SweepOutcome {
            fetched,
            upserted,
            finished_at: Utc::now().to_rfc3339(),
        };
        *self
            .last
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = Some(outcome.clone());
        outcome
    }
}
