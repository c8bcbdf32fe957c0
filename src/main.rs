//! Engine runner.
//!
//! Loads configuration from the environment, wires the Kraken hedge
//! client into the orchestrator and runs until ctrl-c. An external
//! price source feeds `Orchestrator::price_sender`; alternatively set
//! MM_PRICE_FROM_BOOK=true to quote around the venue's own book.

use std::sync::Arc;

use anyhow::Result;
use dotenv::dotenv;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use truex_mm::config::AppConfig;
use truex_mm::engine::hedge::HedgeVenue;
use truex_mm::engine::orchestrator::{EngineEvent, Orchestrator};
use truex_mm::venue::{KrakenClient, PaperVenue};

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AppConfig::from_env();
    if config.session.api_key.is_empty() || config.session.api_secret.is_empty() {
        warn!("TRUEX_API_KEY / TRUEX_API_SECRET not set, logon will be rejected");
    }
    if !config.price_from_book {
        info!("expecting an external price source on the price channel");
    }

    let venue: Arc<dyn HedgeVenue> = if config.hedge_dry_run {
        warn!("HEDGE_DRY_RUN enabled, hedges go to the paper venue");
        Arc::new(PaperVenue::new())
    } else {
        Arc::new(KrakenClient::new(config.kraken.clone()))
    };
    let (mut orchestrator, mut engine_events) = Orchestrator::new(config, venue);

    // Operator-facing event log; persistence adapters would subscribe
    // the same way.
    tokio::spawn(async move {
        while let Some(event) = engine_events.recv().await {
            match event {
                EngineEvent::Fill(fill) => info!(
                    exec_id = %fill.exec_id,
                    venue = %fill.venue,
                    side = %fill.side,
                    price = fill.price,
                    quantity = fill.quantity,
                    "fill"
                ),
                other => info!(?other, "engine event"),
            }
        }
    });

    orchestrator.start().await?;

    let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("ctrl-c received, shutting down");
            shutdown_tx.send(()).await.ok();
        }
    });

    orchestrator.run(shutdown_rx).await;
    Ok(())
}
