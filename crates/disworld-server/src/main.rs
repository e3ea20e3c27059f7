mod config;

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{error, info, warn};

use disworld_api::geocode::ArcGisGeocoder;
use disworld_api::handlers;
use disworld_api::state::{AppState, AppStateInner};
use disworld_db::Database;
use disworld_gateway::{DiscordClient, session};
use disworld_render::MapRenderer;
use disworld_types::commands;
use disworld_types::events::{BotEvent, INTENT_GUILD_MESSAGES, INTENT_GUILDS};

use crate::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "disworld_server=debug,disworld_api=debug,disworld_gateway=info,disworld_db=info".into()
            }),
        )
        .init();

    let config = Config::from_env()?;

    let db = Arc::new(Database::open(&config.db_path)?);
    let renderer = match &config.base_map {
        Some(path) => MapRenderer::from_file(path)?,
        None => MapRenderer::generated(config.map_width, config.map_height),
    };
    let discord = Arc::new(DiscordClient::new(
        config.token.clone(),
        config.application_id.clone(),
    ));
    let geocoder = Arc::new(ArcGisGeocoder::new(
        config.geocoder_url.clone(),
        config.geocoder_key.clone(),
    ));
    let state = AppStateInner::new(db, Arc::new(renderer), discord.clone(), geocoder);

    // The registry has to be complete before any event is handled.
    match state.sync.load_all().await {
        Ok(summary) => info!(
            "Registry ready: {} maps, {} locations, {} orphans removed",
            summary.maps, summary.locations, summary.orphans_removed
        ),
        Err(e) => error!("Initial load incomplete, affected maps will act as missing: {}", e),
    }

    let (tx, mut rx) = mpsc::channel::<BotEvent>(256);
    let gateway = tokio::spawn(session::run(
        config.token.clone(),
        INTENT_GUILDS | INTENT_GUILD_MESSAGES,
        tx,
    ));

    let mut registered = false;
    loop {
        tokio::select! {
            event = rx.recv() => {
                let Some(event) = event else { break };
                if let BotEvent::Ready { user_id, username } = &event {
                    info!("Logged in as {} ({})", username, user_id);
                    if !registered {
                        registered = true;
                        on_first_ready(&state, &discord, config.guild_id.as_deref()).await;
                    }
                    continue;
                }
                tokio::spawn(handlers::handle_event(state.clone(), event));
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down");
                gateway.abort();
                return Ok(());
            }
        }
    }

    // The event channel only closes when the gateway task has ended.
    match gateway.await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(e.into()),
        Err(e) => Err(anyhow::anyhow!("gateway task failed: {}", e)),
    }
}

async fn on_first_ready(state: &AppState, discord: &DiscordClient, guild_id: Option<&str>) {
    if let Err(e) = discord
        .register_commands(guild_id, &commands::definitions())
        .await
    {
        error!("Registering commands failed: {}", e);
    }

    let state = state.clone();
    tokio::spawn(async move {
        let removed = state.sync.verify_maps().await;
        if !removed.is_empty() {
            warn!("Removed {} maps whose messages were deleted while offline", removed.len());
        }
    });
}
