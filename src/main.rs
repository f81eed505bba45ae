use std::{error::Error, sync::Arc};

use clap::Parser;
use homeserve::{
    api::build_router,
    config::{CliArgs, Command, Config},
    marketplace::Marketplace,
    open_storage, telemetry,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let cli = CliArgs::parse();
    let config = Config::load(&cli)?;

    telemetry::init_logging(&config.logging);

    let storage = open_storage(&config.storage)?;
    let market = Arc::new(Marketplace::new(storage, config.policy.clone())?);
    let seeded = market.seed_categories(&config.catalog.seed_categories)?;
    if seeded > 0 {
        tracing::info!(seeded, "Seeded service categories");
    }

    if cli.command == Some(Command::TrialBalance) {
        let trial_balance = market.trial_balance()?;
        println!("{trial_balance}");
        if !trial_balance.is_balanced() {
            return Err("trial balance does not balance".into());
        }
        return Ok(());
    }

    let metrics = match telemetry::install_metrics() {
        Ok(handle) => Some(handle),
        Err(e) => {
            tracing::warn!(error = %e, "Prometheus exporter not installed");
            None
        }
    };

    if config.auth.enabled {
        tracing::info!(keys = config.auth.api_keys.len(), "API key authentication enabled");
    } else {
        tracing::warn!("Authentication disabled; every caller is treated as admin");
    }

    let app = build_router(market, Arc::new(config.auth.clone()), metrics);
    let addr = config.listen_addr()?;
    tracing::info!(%addr, "HomeServe API listening");

    axum::Server::bind(&addr)
        .serve(app.into_make_service())
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for shutdown signal");
            }
        })
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}
