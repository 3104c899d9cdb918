use clap::Parser;
use estate_match::config::{LoggingSettings, Settings};
use estate_match::models::{Listing, Query};
use estate_match::providers::{ListingProvider, MemoryProvider};
use estate_match::services::Recommender;
use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use validator::Validate;

/// Find and rank real-estate listings for a search query
#[derive(Debug, Parser)]
#[command(name = "estate-match", version, about)]
struct Cli {
    /// Config file (defaults to config/default.toml and config/local.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Query JSON file, or `-` for stdin
    #[arg(long, default_value = "-")]
    query: String,

    /// Number of results to return
    #[arg(long)]
    top: Option<usize>,

    /// Extra JSON array of listings searched alongside the configured providers
    #[arg(long)]
    catalog: Option<PathBuf>,
}

fn init_logging(logging: &LoggingSettings) {
    let log_level = std::env::var("LOG_LEVEL").unwrap_or_else(|_| logging.level.clone());
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| logging.format.clone());

    // stdout carries the results
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(log_level))
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_level(true);

    if log_format == "pretty" {
        subscriber.pretty().init();
    } else {
        subscriber.init();
    }
}

fn read_query(source: &str) -> Result<Query, Box<dyn std::error::Error>> {
    let text = if source == "-" {
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf)?;
        buf
    } else {
        std::fs::read_to_string(source)?
    };

    let query: Query = serde_json::from_str(&text)?;
    query.validate()?;
    Ok(query)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load .env file if present
    dotenv::dotenv().ok();

    let cli = Cli::parse();

    let mut settings = match &cli.config {
        Some(path) => Settings::load_from(path),
        None => Settings::load(),
    }?;
    init_logging(&settings.logging);

    if let Some(top) = cli.top {
        settings.recommend.top_n = top;
    }

    let mut extra: Vec<Arc<dyn ListingProvider>> = Vec::new();
    if let Some(path) = &cli.catalog {
        let listings: Vec<Listing> = serde_json::from_str(&std::fs::read_to_string(path)?)?;
        info!("Loaded {} catalog listings from {}", listings.len(), path.display());
        extra.push(Arc::new(MemoryProvider::new("catalog", listings)));
    }

    let recommender = Recommender::from_settings(&settings, extra).await.map_err(|e| {
        error!("Configuration error: {}", e);
        e
    })?;

    let query = read_query(&cli.query).map_err(|e| {
        error!("Invalid query: {}", e);
        e
    })?;

    let results = recommender.recommend(&query).await;
    println!("{}", serde_json::to_string_pretty(&results)?);

    Ok(())
}
