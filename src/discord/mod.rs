use crate::state::AppState;
use anyhow::Result;
use serenity::prelude::*;
use songbird::SerenityInit;
use std::sync::Arc;

mod attachments;
mod authorize;
mod commands;
mod handler;
mod util;

/// Build the gateway client. The caller owns startup and shutdown so the
/// process lifecycle can tear the shards down in order.
pub async fn build_client(state: Arc<AppState>, token: &str) -> Result<Client> {
    let intents = GatewayIntents::GUILDS
        | GatewayIntents::GUILD_MESSAGES
        | GatewayIntents::MESSAGE_CONTENT
        | GatewayIntents::GUILD_VOICE_STATES;

    let handler = handler::Handler { state };

    let client = Client::builder(token, intents)
        .event_handler(handler)
        .register_songbird()
        .await?;

    Ok(client)
}
