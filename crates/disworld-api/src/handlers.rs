use tracing::{debug, error, info, warn};

use disworld_db::models::Upsert;
use disworld_types::commands::{Command, CommandError};
use disworld_types::events::{
    BotEvent, INTERACTION_APPLICATION_COMMAND, Interaction, PERMISSION_MANAGE_CHANNELS,
};
use disworld_types::models::{Coordinate, CountryCode};

use crate::geocode::GeocodeError;
use crate::state::{AppState, AppStateInner};
use crate::sync::SyncError;

/// Route one gateway event. `Ready` is handled by the binary.
pub async fn handle_event(state: AppState, event: BotEvent) {
    match event {
        BotEvent::Ready { .. } => {}
        BotEvent::InteractionCreate(interaction) => handle_interaction(&state, interaction).await,
        BotEvent::MessageDelete {
            channel_id,
            message_id,
        } => {
            if let Err(e) = state.sync.forget_map(&channel_id, Some(message_id.as_str())).await {
                error!("Cleaning up deleted map in channel {} failed: {}", channel_id, e);
            }
        }
        BotEvent::MessageDeleteBulk {
            channel_id,
            message_ids,
        } => {
            for message_id in &message_ids {
                match state.sync.forget_map(&channel_id, Some(message_id.as_str())).await {
                    Ok(true) => break,
                    Ok(false) => {}
                    Err(e) => {
                        error!("Cleaning up purged map in channel {} failed: {}", channel_id, e);
                        break;
                    }
                }
            }
        }
        BotEvent::ChannelDelete { channel_id } => {
            if let Err(e) = state.sync.forget_map(&channel_id, None).await {
                error!("Cleaning up map of deleted channel {} failed: {}", channel_id, e);
            }
        }
    }
}

/// Acknowledge privately, run the command, then fill in the private reply.
pub async fn handle_interaction(state: &AppStateInner, interaction: Interaction) {
    if interaction.kind != INTERACTION_APPLICATION_COMMAND {
        debug!("Ignoring interaction of type {}", interaction.kind);
        return;
    }

    if let Err(e) = state
        .platform
        .defer_reply(&interaction.id, &interaction.token)
        .await
    {
        error!("Could not acknowledge interaction {}: {}", interaction.id, e);
        return;
    }

    let reply = run_command(state, &interaction).await;

    if let Err(e) = state.platform.edit_reply(&interaction.token, &reply).await {
        error!("Could not reply to interaction {}: {}", interaction.id, e);
    }
}

async fn run_command(state: &AppStateInner, interaction: &Interaction) -> String {
    let Some(data) = interaction.data.as_ref() else {
        return "That command isn't supported.".into();
    };
    let (Some(channel_id), Some(_guild_id)) = (
        interaction.channel_id.as_deref(),
        interaction.guild_id.as_deref(),
    ) else {
        return "DisWorld maps only work in server channels.".into();
    };
    let Some(user_id) = interaction.invoker_id() else {
        return "Couldn't tell who ran that command.".into();
    };

    let command = match Command::parse(data) {
        Ok(command) => command,
        Err(e) => {
            warn!("Rejected /{} from {}: {}", data.name, user_id, e);
            return command_error_reply(&e);
        }
    };

    if command.requires_manage_channels()
        && interaction.member_permissions() & PERMISSION_MANAGE_CHANNELS == 0
    {
        return "You need the Manage Channels permission to do that.".into();
    }

    info!("{} ran /{} in channel {}", user_id, data.name, channel_id);

    match command {
        Command::CreateMap => create_map(state, channel_id).await,
        Command::RemoveMap => remove_map(state, channel_id).await,
        Command::SetLocationCoords(coord) => set_location(state, channel_id, user_id, coord).await,
        Command::SetLocationAddress { address, country } => {
            set_location_address(state, channel_id, user_id, &address, country.as_ref()).await
        }
        Command::ClearLocation => clear_location(state, channel_id, user_id).await,
    }
}

fn command_error_reply(err: &CommandError) -> String {
    match err {
        CommandError::Unknown(_) => "That command isn't supported.".into(),
        CommandError::MissingOption(name) => format!("Please provide the `{}` option.", name),
        CommandError::InvalidOption(name) => format!("The `{}` option has the wrong type.", name),
        CommandError::InvalidCoordinate(e) => format!("Invalid coordinates: {}.", e),
        CommandError::InvalidCountry(raw) => {
            format!("`{}` is not a two-letter country code.", raw)
        }
    }
}

const NO_MAP: &str = "There is no DisWorld map in this channel. Ask a moderator to run /create-map.";
const MAP_GONE: &str =
    "The map message in this channel was deleted, so the map was removed. Ask a moderator to run /create-map.";

async fn create_map(state: &AppStateInner, channel_id: &str) -> String {
    match state.sync.create_map(channel_id).await {
        Ok(_) => "Created a DisWorld map in this channel.".into(),
        Err(SyncError::MapExists) => "This channel already has a DisWorld map.".into(),
        Err(_) => "Error creating map.".into(),
    }
}

async fn remove_map(state: &AppStateInner, channel_id: &str) -> String {
    match state.sync.remove_map(channel_id).await {
        Ok(outcome) if outcome.message_deleted => "Removed the DisWorld map from this channel.".into(),
        Ok(_) => "Removed the DisWorld map, but the map message could not be deleted. You may delete it manually.".into(),
        Err(SyncError::NoMap) => NO_MAP.into(),
        Err(_) => "Error removing map.".into(),
    }
}

async fn set_location(
    state: &AppStateInner,
    channel_id: &str,
    user_id: &str,
    coord: Coordinate,
) -> String {
    match state.sync.set_location(channel_id, user_id, coord).await {
        Ok(Upsert::Inserted) => format!("Added your location ({}) to the map.", coord),
        Ok(Upsert::Updated) => format!("Moved your location to {}.", coord),
        Err(SyncError::NoMap) => NO_MAP.into(),
        Err(SyncError::MapGone) => MAP_GONE.into(),
        Err(SyncError::Render(_) | SyncError::Platform(_)) => {
            "Your location was saved, but the map image could not be updated.".into()
        }
        Err(_) => "Error setting location.".into(),
    }
}

async fn set_location_address(
    state: &AppStateInner,
    channel_id: &str,
    user_id: &str,
    address: &str,
    country: Option<&CountryCode>,
) -> String {
    // Skip the geocoding call when it can't lead anywhere.
    if !state.sync.has_map(channel_id).await {
        return NO_MAP.into();
    }

    let coord = match state.geocoder.geocode(address, country).await {
        Ok(coord) => coord,
        Err(GeocodeError::NotFound) => {
            info!("No geocoding match for address from {}", user_id);
            return "Couldn't find that address. Try adding more detail or a country code.".into();
        }
        Err(e) => {
            error!("Geocoding failed: {}", e);
            return "Error looking up that address.".into();
        }
    };

    set_location(state, channel_id, user_id, coord).await
}

async fn clear_location(state: &AppStateInner, channel_id: &str, user_id: &str) -> String {
    match state.sync.clear_location(channel_id, user_id).await {
        Ok(()) => "Removed your location from the map.".into(),
        Err(SyncError::NothingToClear) => "You don't have a location on this map.".into(),
        Err(SyncError::NoMap) => NO_MAP.into(),
        Err(SyncError::MapGone) => MAP_GONE.into(),
        Err(SyncError::Render(_) | SyncError::Platform(_)) => {
            "Your location was removed, but the map image could not be updated.".into()
        }
        Err(_) => "Error clearing location.".into(),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::testing::{FakeGeocoder, FakePlatform};
    use disworld_db::Database;
    use disworld_gateway::ChatPlatform;
    use disworld_render::MapRenderer;

    struct Harness {
        state: AppState,
        db: Arc<Database>,
        platform: Arc<FakePlatform>,
        geocoder: Arc<FakeGeocoder>,
    }

    fn harness() -> Harness {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let platform = Arc::new(FakePlatform::default());
        let geocoder = Arc::new(FakeGeocoder::default());
        let state = AppStateInner::new(
            db.clone(),
            Arc::new(MapRenderer::generated(360, 180)),
            platform.clone(),
            geocoder.clone(),
        );
        Harness {
            state,
            db,
            platform,
            geocoder,
        }
    }

    fn interaction(name: &str, options: serde_json::Value, permissions: &str) -> BotEvent {
        BotEvent::InteractionCreate(
            serde_json::from_value(serde_json::json!({
                "id": "I1",
                "application_id": "A1",
                "type": 2,
                "token": "tok",
                "guild_id": "G1",
                "channel_id": "C1",
                "member": { "user": { "id": "U1", "username": "alice" }, "permissions": permissions },
                "data": { "name": name, "options": options }
            }))
            .unwrap(),
        )
    }

    async fn run(h: &Harness, name: &str, options: serde_json::Value) -> String {
        handle_event(h.state.clone(), interaction(name, options, "16")).await;
        h.platform.last_reply().unwrap()
    }

    #[tokio::test]
    async fn create_set_and_remove_flow() {
        let h = harness();

        let reply = run(&h, "create-map", serde_json::json!([])).await;
        assert_eq!(reply, "Created a DisWorld map in this channel.");
        assert_eq!(h.platform.deferred(), vec!["I1".to_string()]);

        let reply = run(
            &h,
            "set-location-coords",
            serde_json::json!([
                { "name": "latitude", "value": 40.0 },
                { "name": "longitude", "value": -75.0 }
            ]),
        )
        .await;
        assert!(reply.starts_with("Added your location"));
        let row = h.db.get_location("C1", "U1").unwrap().unwrap();
        assert_eq!((row.latitude, row.longitude), (40.0, -75.0));
        assert_eq!(h.platform.edit_count(), 1);

        let reply = run(&h, "remove-map", serde_json::json!([])).await;
        assert_eq!(reply, "Removed the DisWorld map from this channel.");
        assert!(h.db.get_map("C1").unwrap().is_none());
        assert!(h.db.get_locations().unwrap().is_empty());
        assert_eq!(h.platform.deleted(), vec!["M1".to_string()]);
    }

    #[tokio::test]
    async fn map_commands_need_manage_channels() {
        let h = harness();
        handle_event(h.state.clone(), interaction("create-map", serde_json::json!([]), "0")).await;
        assert_eq!(
            h.platform.last_reply().unwrap(),
            "You need the Manage Channels permission to do that."
        );
        assert_eq!(h.platform.posted_count(), 0);
    }

    #[tokio::test]
    async fn precondition_failures_are_distinct() {
        let h = harness();

        let reply = run(&h, "clear-location", serde_json::json!([])).await;
        assert_eq!(reply, NO_MAP);

        run(&h, "create-map", serde_json::json!([])).await;
        let reply = run(&h, "create-map", serde_json::json!([])).await;
        assert_eq!(reply, "This channel already has a DisWorld map.");

        let reply = run(&h, "clear-location", serde_json::json!([])).await;
        assert_eq!(reply, "You don't have a location on this map.");
    }

    #[tokio::test]
    async fn address_miss_mutates_nothing() {
        let h = harness();
        run(&h, "create-map", serde_json::json!([])).await;
        let entry_before = h.state.sync.registry().snapshot("C1").await;

        let reply = run(
            &h,
            "set-location-address",
            serde_json::json!([
                { "name": "address", "value": "221B Baker Street" },
                { "name": "country", "value": "GB" }
            ]),
        )
        .await;

        assert!(reply.starts_with("Couldn't find that address"));
        assert_eq!(
            h.geocoder.calls(),
            vec![("221B Baker Street".to_string(), Some("GB".to_string()))]
        );
        assert!(h.db.get_locations().unwrap().is_empty());
        assert_eq!(h.state.sync.registry().snapshot("C1").await, entry_before);
        assert_eq!(h.platform.edit_count(), 0);
    }

    #[tokio::test]
    async fn address_hit_sets_location() {
        let h = harness();
        h.geocoder
            .insert("10 Downing Street", Coordinate::new(51.5034, -0.1276).unwrap());
        run(&h, "create-map", serde_json::json!([])).await;

        let reply = run(
            &h,
            "set-location-address",
            serde_json::json!([{ "name": "address", "value": "10 Downing Street" }]),
        )
        .await;
        assert!(reply.starts_with("Added your location"));
        let entry = h.state.sync.registry().snapshot("C1").await.unwrap();
        assert_eq!(entry.locations["U1"], Coordinate::new(51.5034, -0.1276).unwrap());
    }

    #[tokio::test]
    async fn address_without_map_skips_geocoding() {
        let h = harness();
        let reply = run(
            &h,
            "set-location-address",
            serde_json::json!([{ "name": "address", "value": "Anywhere" }]),
        )
        .await;
        assert_eq!(reply, NO_MAP);
        assert!(h.geocoder.calls().is_empty());
    }

    #[tokio::test]
    async fn invalid_arguments_are_rejected() {
        let h = harness();
        run(&h, "create-map", serde_json::json!([])).await;

        let reply = run(
            &h,
            "set-location-coords",
            serde_json::json!([
                { "name": "latitude", "value": 91.0 },
                { "name": "longitude", "value": 0.0 }
            ]),
        )
        .await;
        assert!(reply.starts_with("Invalid coordinates"));
        assert!(h.db.get_locations().unwrap().is_empty());
    }

    #[tokio::test]
    async fn deleting_map_message_forgets_map() {
        let h = harness();
        run(&h, "create-map", serde_json::json!([])).await;

        handle_event(
            h.state.clone(),
            BotEvent::MessageDelete {
                channel_id: "C1".into(),
                message_id: "unrelated".into(),
            },
        )
        .await;
        assert!(h.state.sync.has_map("C1").await);

        handle_event(
            h.state.clone(),
            BotEvent::MessageDelete {
                channel_id: "C1".into(),
                message_id: "M1".into(),
            },
        )
        .await;
        assert!(!h.state.sync.has_map("C1").await);
        assert!(h.db.get_map("C1").unwrap().is_none());

        // Channels without a map are ignored.
        handle_event(
            h.state.clone(),
            BotEvent::ChannelDelete {
                channel_id: "C9".into(),
            },
        )
        .await;
    }

    #[tokio::test]
    async fn purging_map_message_forgets_map() {
        let h = harness();
        run(&h, "create-map", serde_json::json!([])).await;

        handle_event(
            h.state.clone(),
            BotEvent::MessageDeleteBulk {
                channel_id: "C1".into(),
                message_ids: vec!["X1".into(), "M1".into(), "X2".into()],
            },
        )
        .await;
        assert!(!h.state.sync.has_map("C1").await);
        assert!(h.db.get_map("C1").unwrap().is_none());
    }

    #[tokio::test]
    async fn setting_location_on_deleted_map_message_reports_it() {
        let h = harness();
        run(&h, "create-map", serde_json::json!([])).await;
        h.platform.delete_message("C1", "M1").await.unwrap();

        let reply = run(
            &h,
            "set-location-coords",
            serde_json::json!([
                { "name": "latitude", "value": 10.0 },
                { "name": "longitude", "value": 10.0 }
            ]),
        )
        .await;
        assert_eq!(reply, MAP_GONE);
        assert!(h.db.get_map("C1").unwrap().is_none());

        let reply = run(&h, "create-map", serde_json::json!([])).await;
        assert_eq!(reply, "Created a DisWorld map in this channel.");
    }
}
