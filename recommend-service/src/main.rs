//! Maintenance entrypoint: load a catalog and interaction log, run a full
//! vectorization pass, warm the index, and print recommendations for a user.
//!
//! Inputs are JSONL files (one record per line) pointed at by `CATALOG_PATH`
//! and `INTERACTIONS_PATH`; `TARGET_USER` selects the user to recommend for
//! (defaults to the first user seen in the interaction log).

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::sync::Arc;
use std::time::Duration;

use trove_recommend::embed::HashingEmbedder;
use trove_recommend::models::{Interaction, ItemRecord};
use trove_recommend::store::memory::{MemoryCatalog, MemoryInteractions};
use trove_recommend::{EngineConfig, JobPriority, RecommendationEngine, RecommendationRequest};

use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    let config = EngineConfig::from_env();

    let catalog_path =
        std::env::var("CATALOG_PATH").unwrap_or_else(|_| "data/catalog.jsonl".to_string());
    let interactions_path =
        std::env::var("INTERACTIONS_PATH").unwrap_or_else(|_| "data/interactions.jsonl".to_string());

    let items: Vec<ItemRecord> = read_jsonl(&catalog_path)?;
    let swipes: Vec<Interaction> = read_jsonl(&interactions_path)?;
    info!(
        items = items.len(),
        interactions = swipes.len(),
        "loaded catalog and interaction log"
    );

    let target_user = match std::env::var("TARGET_USER") {
        Ok(raw) => raw.parse()?,
        Err(_) => match swipes.first() {
            Some(swipe) => swipe.user_id,
            None => anyhow::bail!("no interactions and no TARGET_USER set"),
        },
    };

    let item_ids: Vec<_> = items.iter().map(|item| item.id).collect();
    let catalog = Arc::new(MemoryCatalog::seed(items));
    let interactions = Arc::new(MemoryInteractions::new());
    interactions.record_all(swipes);
    interactions.register_user(target_user);

    let engine = RecommendationEngine::new(
        catalog,
        interactions,
        Arc::new(HashingEmbedder::default()),
        config,
    );

    // Vectorize everything missing vectors, then warm the index from the
    // stored vectors.
    let job_id = engine.enqueue_vectorization(item_ids, JobPriority::High, false);
    match engine.await_job(job_id, Duration::from_secs(600)).await {
        Some(record) => info!(
            succeeded = record.succeeded,
            skipped = record.skipped,
            failed = record.failed,
            "vectorization pass finished"
        ),
        None => warn!("vectorization job vanished before completion"),
    }
    let rows = engine.warm_up().await?;
    info!(rows, "index ready");

    let request = RecommendationRequest::new(target_user, 10);
    let response = engine.get_recommendations(&request).await?;

    info!(
        tier = response.tier.as_str(),
        count = response.recommendations.len(),
        reason = %response.reason,
        "recommendations generated"
    );
    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}

fn read_jsonl<T: serde::de::DeserializeOwned>(path: &str) -> anyhow::Result<Vec<T>> {
    let file = File::open(path)
        .map_err(|e| anyhow::anyhow!("failed to open {path}: {e}"))?;
    let mut records = Vec::new();
    for line in BufReader::new(file).lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        records.push(serde_json::from_str(&line)?);
    }
    Ok(records)
}
