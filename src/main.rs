mod agent;
mod bridge;
mod config;
mod discord;
mod entity;
mod lifecycle;
mod markdown;
mod render;
mod state;
mod store;
mod topic;
mod transcribe;
mod voice;

use crate::agent::AgentRegistry;
use crate::lifecycle::Shutdown;
use crate::state::AppState;
use crate::store::Store;
use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    match run().await {
        Ok(Shutdown::Exit) => info!("Shutdown complete"),
        Ok(Shutdown::Restart) => {
            if let Err(e) = lifecycle::reexec() {
                error!("{e:#}");
                std::process::exit(lifecycle::EXIT_NO_RETRY);
            }
        }
        Err(e) => {
            error!("{e:#}");
            std::process::exit(lifecycle::EXIT_NO_RETRY);
        }
    }
}

async fn run() -> Result<Shutdown> {
    let _lock = lifecycle::acquire_single_instance_lock().await?;

    let config = config::Config::load()?;
    let store = Store::open(&config.storage.data_dir).await?;

    let (app_id, token) = match &config.discord.app_id {
        Some(app_id) => {
            let token = store
                .bot_token(app_id)
                .await?
                .with_context(|| format!("No bot token stored for app {app_id}"))?;
            (app_id.clone(), token)
        }
        None => store
            .latest_bot_token()
            .await?
            .context("No bot credentials stored; run the setup wizard first")?,
    };

    let mut provider_keys = Vec::new();
    if let Some((primary, fallback)) = store.api_keys(&app_id).await? {
        provider_keys.push((config.agent.primary_provider.clone(), primary));
        if let Some(fallback) = fallback {
            provider_keys.push((config.agent.fallback_provider.clone(), fallback));
        }
    }

    let agents = AgentRegistry::new(config.agent.bin.clone(), provider_keys);
    let state = Arc::new(AppState::new(config, app_id, store, agents));

    let mut client = discord::build_client(state.clone(), &token).await?;
    let shard_manager = client.shard_manager.clone();

    let mut gateway = tokio::spawn(async move { client.start().await });
    let mut gateway_done = false;

    let disposition = tokio::select! {
        result = &mut gateway => {
            gateway_done = true;
            match result {
                Ok(Ok(())) => {
                    info!("Gateway client ended");
                    Shutdown::Exit
                }
                Ok(Err(e)) => return Err(anyhow::anyhow!("Discord client error: {e}")),
                Err(e) => return Err(anyhow::anyhow!("Gateway task panicked: {e}")),
            }
        }
        signal = lifecycle::wait_for_shutdown() => {
            let disposition = signal?;
            info!("Shutdown signal received ({disposition:?})");
            disposition
        }
    };

    state.begin_shutdown();

    // voice workers in parallel, then agent servers, then the gateway;
    // the store's connection closes when the state is dropped
    state.voice.shutdown_all().await;
    state.agents.shutdown().await;
    shard_manager.shutdown_all().await;
    if !gateway_done {
        let _ = gateway.await;
    }

    Ok(disposition)
}
