use anyhow::{Context, Result};
use tracing::{error, info};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

mod cards;
mod config;
mod draw;
mod error;
mod lootbox;
mod ratelimit;
mod server;

use cards::{CardStore, InMemoryCardStore};
use lootbox::{InMemoryLootBoxStore, LootBoxService, LootBoxStore};
use ratelimit::RateLimiter;
use server::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("card_platform=info".parse()?)
        )
        .init();

    info!("Starting card platform");

    let config = config::load_config()?;
    info!("Configuration loaded");
    info!("Server: {}", config.server.bind_addr);

    let limiter = Arc::new(
        RateLimiter::new(
            config.limiter.duration(),
            config.limiter.num_events,
            config.limiter.num_limits,
        )
        .context("Failed to build rate limiter")?,
    );

    let cards: Arc<dyn CardStore> = Arc::new(InMemoryCardStore::new());
    let lootboxes: Arc<dyn LootBoxStore> = Arc::new(InMemoryLootBoxStore::new());
    let lootbox_service = Arc::new(
        LootBoxService::new(cards.clone(), lootboxes, &config.lootboxes)
            .context("Failed to build lootbox service")?,
    );

    let shutdown = CancellationToken::new();

    let cleanup = tokio::spawn({
        let limiter = limiter.clone();
        let shutdown = shutdown.clone();
        async move { limiter.run(shutdown).await }
    });

    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for shutdown signal: {}", e);
                return;
            }
            info!("Shutdown signal received");
            shutdown.cancel();
        }
    });

    let state = AppState {
        limiter,
        lootboxes: lootbox_service,
        cards,
    };
    let served = server::run(&config.server.bind_addr, state, shutdown.clone()).await;

    shutdown.cancel();
    if let Err(e) = cleanup.await {
        error!("Rate limiter cleanup task failed: {}", e);
    }

    served
}
