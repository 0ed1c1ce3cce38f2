mod auth;
mod config;
mod mealdb;
mod seeder;
mod server;

use std::process;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::mealdb::MealDbClient;
use crate::seeder::Seeder;
use forkful_core::service::{RecipeProvider, RecipeService};

#[derive(Parser)]
#[command(
    name = "forkful",
    version,
    about = "Recipe browsing and meal planning server"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the REST API server
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value = "8080")]
        port: u16,
        /// Address to bind to (default: 127.0.0.1, use 0.0.0.0 to expose to network)
        #[arg(short, long, default_value = "127.0.0.1")]
        bind: String,
    },
    /// Seed the local catalog with an a-z sweep of the recipe provider
    Seed,
    /// Clear the category and search caches
    ClearCache {
        /// Also delete stored recipes with no usable title
        #[arg(long)]
        all: bool,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("forkful=info,tower_http=info")),
        )
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = Config::load()?;
    let service = RecipeService::new(&config.db_path)?;

    match cli.command {
        Commands::Serve { port, bind } => {
            let jwt_secret = config.load_or_create_jwt_secret()?;
            server::start_server(service, port, &bind, jwt_secret).await
        }
        Commands::Seed => {
            let service = Arc::new(Mutex::new(service));
            let provider: Arc<dyn RecipeProvider> = Arc::new(MealDbClient::new());
            let seeder = Seeder::new(service, provider);
            let outcome = seeder.run_sweep().await;
            println!(
                "Seed sweep finished: fetched {}, upserted {}",
                outcome.fetched, outcome.upserted
            );
            Ok(())
        }
        Commands::ClearCache { all } => {
            let categories = service.clear_category_cache()?;
            service.flush_search_cache();
            println!("Cleared {categories} category snapshot(s) and the search cache");
            if all {
                let deleted = service.delete_untitled_recipes()?;
                println!("Deleted {deleted} untitled recipe(s)");
            }
            Ok(())
        }
    }
}
