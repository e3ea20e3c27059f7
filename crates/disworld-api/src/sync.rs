use std::collections::HashMap;
use std::sync::Arc;

use anyhow::anyhow;
use tracing::{debug, error, info, warn};

use disworld_db::Database;
use disworld_db::models::{LocationRow, Upsert};
use disworld_gateway::{ChatPlatform, PlatformError};
use disworld_render::{Locations, MapRenderer};
use disworld_types::models::{ChannelId, Coordinate, MessageId};

use crate::registry::{ChannelEntry, ChannelGuard, Registry};

pub const MAP_FILENAME: &str = "disworld-map.png";

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("store error: {0:#}")]
    Store(anyhow::Error),
    #[error("render error: {0:#}")]
    Render(anyhow::Error),
    #[error("platform error: {0}")]
    Platform(#[from] PlatformError),
    #[error("channel already has a map")]
    MapExists,
    #[error("channel has no map")]
    NoMap,
    #[error("user has no location to clear")]
    NothingToClear,
    #[error("map message no longer exists")]
    MapGone,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LoadSummary {
    pub maps: usize,
    pub locations: usize,
    pub orphans_removed: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoveOutcome {
    pub locations_removed: usize,
    /// `false` if the posted map message could not be deleted.
    pub message_deleted: bool,
}

/// Keeps the store, the in-memory registry and the posted map images in step.
///
/// Every mutating operation takes the channel's registry lock first and
/// holds it through store write, registry update, render and platform call,
/// stopping at the first failing step.
pub struct Synchronizer {
    db: Arc<Database>,
    registry: Registry,
    renderer: Arc<MapRenderer>,
    platform: Arc<dyn ChatPlatform>,
}

impl Synchronizer {
    pub fn new(db: Arc<Database>, renderer: Arc<MapRenderer>, platform: Arc<dyn ChatPlatform>) -> Self {
        Self {
            db,
            registry: Registry::new(),
            renderer,
            platform,
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Run a blocking store call off the async runtime.
    async fn store<F, T>(&self, op: &'static str, f: F) -> Result<T, SyncError>
    where
        F: FnOnce(&Database) -> anyhow::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || f(&db))
            .await
            .map_err(|e| {
                error!("spawn_blocking join error: {}", e);
                SyncError::Store(anyhow!("store task failed: {}", e))
            })?
            .map_err(|e| {
                error!("Store {} failed: {:#}", op, e);
                SyncError::Store(e)
            })
    }

    async fn render(&self, locations: Locations) -> Result<Vec<u8>, SyncError> {
        let renderer = self.renderer.clone();
        tokio::task::spawn_blocking(move || renderer.render(&locations))
            .await
            .map_err(|e| {
                error!("spawn_blocking join error: {}", e);
                SyncError::Render(anyhow!("render task failed: {}", e))
            })?
            .map_err(|e| {
                error!("Rendering map failed: {:#}", e);
                SyncError::Render(e)
            })
    }

    /// Rebuild the registry from the store. Must finish before events are handled.
    ///
    /// Locations whose channel has no map are deleted. If the map table cannot
    /// be read nothing is loaded; if the locations table cannot be read the
    /// maps are loaded without locations. Either way the error is returned.
    pub async fn load_all(&self) -> Result<LoadSummary, SyncError> {
        let maps = self.store("load maps", |db| db.get_maps()).await?;

        let mut entries: HashMap<ChannelId, ChannelEntry> = maps
            .into_iter()
            .map(|row| (row.channel_id, ChannelEntry::new(row.message_id)))
            .collect();
        let mut summary = LoadSummary {
            maps: entries.len(),
            ..Default::default()
        };

        match self.store("purge orphans", |db| db.delete_orphan_locations()).await {
            Ok(removed) => {
                if removed > 0 {
                    warn!("Deleted {} locations belonging to channels without a map", removed);
                }
                summary.orphans_removed = removed;
            }
            Err(e) => warn!("Could not purge orphan locations, skipping them: {}", e),
        }

        let locations = match self.store("load locations", |db| db.get_locations()).await {
            Ok(rows) => rows,
            Err(e) => {
                self.registry.seed(entries);
                return Err(e);
            }
        };

        for row in locations {
            match entries.get_mut(&row.channel_id) {
                Some(entry) => {
                    if let Some(coord) = row_coordinate(&row) {
                        entry.locations.insert(row.user_id, coord);
                        summary.locations += 1;
                    }
                }
                None => warn!(
                    "Skipping orphan location for user {} in channel {}",
                    row.user_id, row.channel_id
                ),
            }
        }

        self.registry.seed(entries);
        info!(
            "Loaded {} maps with {} locations",
            summary.maps, summary.locations
        );
        Ok(summary)
    }

    /// Drop maps whose message no longer exists on the platform.
    /// Returns the channels that were cleaned up.
    pub async fn verify_maps(&self) -> Vec<ChannelId> {
        let mut removed = Vec::new();
        for channel_id in self.registry.channels_with_maps().await {
            let Some(mut slot) = self.registry.lock_existing(&channel_id).await else {
                continue;
            };
            let Some(entry) = slot.as_ref() else { continue };

            let exists = self.platform.message_exists(&channel_id, &entry.message_id).await;
            match exists {
                Ok(true) => {}
                Ok(false) => {
                    info!(
                        "Map message {} in channel {} is gone, removing map",
                        entry.message_id, channel_id
                    );
                    let cid = channel_id.clone();
                    if self.store("delete map", move |db| db.delete_map(&cid)).await.is_ok() {
                        *slot = None;
                        self.registry.release(&channel_id, slot);
                        removed.push(channel_id);
                    }
                }
                Err(e) => warn!("Could not check map message in channel {}: {}", channel_id, e),
            }
        }
        removed
    }

    pub async fn has_map(&self, channel_id: &str) -> bool {
        self.registry.lock_existing(channel_id).await.is_some()
    }

    /// Post an empty map in the channel and start tracking it.
    pub async fn create_map(&self, channel_id: &str) -> Result<MessageId, SyncError> {
        let mut slot = self.registry.lock(channel_id).await;
        if slot.is_some() {
            return Err(SyncError::MapExists);
        }

        match self.post_map(channel_id).await {
            Ok(message_id) => {
                *slot = Some(ChannelEntry::new(message_id.clone()));
                info!("Created map {} in channel {}", message_id, channel_id);
                Ok(message_id)
            }
            Err(e) => {
                self.registry.release(channel_id, slot);
                Err(e)
            }
        }
    }

    async fn post_map(&self, channel_id: &str) -> Result<MessageId, SyncError> {
        let png = self.render(Locations::new()).await?;
        let message_id = self
            .platform
            .post_image(channel_id, MAP_FILENAME, png)
            .await
            .map_err(|e| {
                error!("Posting map in channel {} failed: {}", channel_id, e);
                SyncError::from(e)
            })?;

        let (cid, mid) = (channel_id.to_string(), message_id.clone());
        if let Err(e) = self.store("insert map", move |db| db.insert_map(&cid, &mid)).await {
            // Don't leave an untracked map behind.
            if let Err(del) = self.platform.delete_message(channel_id, &message_id).await {
                error!(
                    "Map message {} in channel {} is untracked and could not be deleted: {}",
                    message_id, channel_id, del
                );
            }
            return Err(e);
        }
        Ok(message_id)
    }

    /// Delete the map message (best-effort) and every record for the channel.
    pub async fn remove_map(&self, channel_id: &str) -> Result<RemoveOutcome, SyncError> {
        let Some(mut slot) = self.registry.lock_existing(channel_id).await else {
            return Err(SyncError::NoMap);
        };
        let Some(entry) = slot.as_ref() else {
            return Err(SyncError::NoMap);
        };

        let deleted = self.platform.delete_message(channel_id, &entry.message_id).await;
        let message_deleted = match deleted {
            Ok(()) | Err(PlatformError::NotFound) => true,
            Err(e) => {
                warn!(
                    "Deleting map message {} in channel {} failed: {}",
                    entry.message_id, channel_id, e
                );
                false
            }
        };

        let cid = channel_id.to_string();
        let removed = self.store("delete map", move |db| db.delete_map(&cid)).await?;

        *slot = None;
        self.registry.release(channel_id, slot);
        info!("Removed map in channel {}", channel_id);
        Ok(RemoveOutcome {
            locations_removed: removed.unwrap_or(0),
            message_deleted,
        })
    }

    /// Forget a map whose message or channel disappeared on the platform side.
    /// Channels without a map, or messages other than the map, are ignored.
    pub async fn forget_map(&self, channel_id: &str, message_id: Option<&str>) -> Result<bool, SyncError> {
        let Some(mut slot) = self.registry.lock_existing(channel_id).await else {
            return Ok(false);
        };
        let Some(entry) = slot.as_ref() else {
            return Ok(false);
        };
        if message_id.is_some_and(|m| m != entry.message_id) {
            return Ok(false);
        }

        let cid = channel_id.to_string();
        self.store("delete map", move |db| db.delete_map(&cid)).await?;
        *slot = None;
        self.registry.release(channel_id, slot);
        info!("Map in channel {} was deleted externally, records removed", channel_id);
        Ok(true)
    }

    /// Pin or move a user's marker, then redraw the map.
    pub async fn set_location(
        &self,
        channel_id: &str,
        user_id: &str,
        coord: Coordinate,
    ) -> Result<Upsert, SyncError> {
        let Some(mut slot) = self.registry.lock_existing(channel_id).await else {
            return Err(SyncError::NoMap);
        };
        let Some(entry) = slot.as_mut() else {
            return Err(SyncError::NoMap);
        };

        let (cid, uid) = (channel_id.to_string(), user_id.to_string());
        let outcome = self
            .store("upsert location", move |db| {
                db.upsert_location(&cid, &uid, coord.latitude, coord.longitude)
            })
            .await?;

        let previous = entry.locations.insert(user_id.to_string(), coord);
        if previous.is_some() != (outcome == Upsert::Updated) {
            warn!("Registry for channel {} diverged from store, reloading", channel_id);
            self.reload_locations(channel_id, entry).await?;
        }

        let redrawn = self.redraw(channel_id, entry).await;
        if let Err(SyncError::Platform(PlatformError::NotFound)) = redrawn {
            return Err(self.drop_vanished(channel_id, slot).await);
        }
        redrawn?;
        debug!("Set location for {} in channel {} to {}", user_id, channel_id, coord);
        Ok(outcome)
    }

    /// Remove a user's marker, then redraw the map.
    pub async fn clear_location(&self, channel_id: &str, user_id: &str) -> Result<(), SyncError> {
        let Some(mut slot) = self.registry.lock_existing(channel_id).await else {
            return Err(SyncError::NoMap);
        };
        let Some(entry) = slot.as_mut() else {
            return Err(SyncError::NoMap);
        };

        let (cid, uid) = (channel_id.to_string(), user_id.to_string());
        let deleted = self
            .store("delete location", move |db| db.delete_location(&cid, &uid))
            .await?;
        let cached = entry.locations.remove(user_id).is_some();

        if !deleted && !cached {
            return Err(SyncError::NothingToClear);
        }
        if deleted != cached {
            warn!("Registry for channel {} diverged from store, reloading", channel_id);
            self.reload_locations(channel_id, entry).await?;
        }

        let redrawn = self.redraw(channel_id, entry).await;
        if let Err(SyncError::Platform(PlatformError::NotFound)) = redrawn {
            return Err(self.drop_vanished(channel_id, slot).await);
        }
        redrawn?;
        debug!("Cleared location for {} in channel {}", user_id, channel_id);
        Ok(())
    }

    /// The map message was deleted behind our back: forget the map so the
    /// channel can get a new one.
    async fn drop_vanished(&self, channel_id: &str, mut slot: ChannelGuard) -> SyncError {
        warn!("Map message in channel {} no longer exists, removing map", channel_id);
        let cid = channel_id.to_string();
        if let Err(e) = self.store("delete map", move |db| db.delete_map(&cid)).await {
            return e;
        }
        *slot = None;
        self.registry.release(channel_id, slot);
        SyncError::MapGone
    }

    async fn reload_locations(&self, channel_id: &str, entry: &mut ChannelEntry) -> Result<(), SyncError> {
        let cid = channel_id.to_string();
        let rows = self
            .store("reload channel", move |db| db.get_channel_locations(&cid))
            .await?;
        entry.locations = rows
            .into_iter()
            .filter_map(|row| {
                let coord = row_coordinate(&row)?;
                Some((row.user_id, coord))
            })
            .collect();
        Ok(())
    }

    async fn redraw(&self, channel_id: &str, entry: &ChannelEntry) -> Result<(), SyncError> {
        let png = self.render(entry.locations.clone()).await?;
        self.platform
            .edit_image(channel_id, &entry.message_id, MAP_FILENAME, png)
            .await
            .map_err(|e| {
                error!(
                    "Editing map message {} in channel {} failed: {}",
                    entry.message_id, channel_id, e
                );
                SyncError::from(e)
            })
    }
}

fn row_coordinate(row: &LocationRow) -> Option<Coordinate> {
    Coordinate::new(row.latitude, row.longitude)
        .inspect_err(|e| {
            warn!(
                "Ignoring stored location for {} in channel {}: {}",
                row.user_id, row.channel_id, e
            )
        })
        .ok()
}
