use anyhow::{Context, Result};
use std::sync::Arc;
use skycache_core::Config;
use skycache_server::WeatherServer;
use skycache_weather::{open_store, WeatherProvider, WeatherResolver};

#[tokio::main]
async fn main() -> Result<()> {
    skycache_core::init()?;

    let config = match Config::load_validated() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("{:#}", e);
            std::process::exit(1);
        }
    };

    let store = open_store(&config.cache)
        .await
        .context("Failed to connect to cache store")?;
    store.ping().await.context("Cache store did not answer PING")?;
    tracing::info!("Connected to cache store");

    let provider = WeatherProvider::new(&config.upstream).context("Failed to build HTTP client")?;
    let resolver = WeatherResolver::new(store, Arc::new(provider), config.cache.ttl())
        .with_fail_open(config.cache.fail_open);

    WeatherServer::from_config(resolver, &config.server)
        .run(&config.server.listen_addr(), shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
