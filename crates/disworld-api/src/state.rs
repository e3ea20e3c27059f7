use std::sync::Arc;

use disworld_db::Database;
use disworld_gateway::ChatPlatform;
use disworld_render::MapRenderer;

use crate::geocode::Geocoder;
use crate::sync::Synchronizer;

pub type AppState = Arc<AppStateInner>;

/// Everything a handler needs, passed explicitly instead of living in globals.
pub struct AppStateInner {
    pub sync: Synchronizer,
    pub platform: Arc<dyn ChatPlatform>,
    pub geocoder: Arc<dyn Geocoder>,
}

impl AppStateInner {
    pub fn new(
        db: Arc<Database>,
        renderer: Arc<MapRenderer>,
        platform: Arc<dyn ChatPlatform>,
        geocoder: Arc<dyn Geocoder>,
    ) -> AppState {
        Arc::new(Self {
            sync: Synchronizer::new(db, renderer, platform.clone()),
            platform,
            geocoder,
        })
    }
}
