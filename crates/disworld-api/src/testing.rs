//! In-memory stand-ins for the chat platform and the geocoder.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;

use disworld_gateway::{ChatPlatform, PlatformError};
use disworld_types::models::{Coordinate, CountryCode, MessageId};

use crate::geocode::{GeocodeError, Geocoder};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Fail {
    Post,
    Edit,
    Delete,
}

#[derive(Default)]
struct State {
    next_id: u32,
    /// message id -> latest attached image
    images: HashMap<MessageId, Vec<u8>>,
    posted: u32,
    edits: u32,
    deleted: Vec<MessageId>,
    vanished: HashSet<MessageId>,
    failing: HashSet<Fail>,
    /// (token, content) of every reply edit
    replies: Vec<(String, String)>,
    deferred: Vec<String>,
}

#[derive(Default)]
pub struct FakePlatform {
    state: Mutex<State>,
}

fn refused() -> PlatformError {
    PlatformError::Status {
        status: 403,
        body: "Missing Permissions".into(),
    }
}

impl FakePlatform {
    pub fn fail(&self, op: Fail) {
        self.state.lock().unwrap().failing.insert(op);
    }

    pub fn vanish(&self, message_id: &str) {
        self.state.lock().unwrap().vanished.insert(message_id.to_string());
    }

    pub fn image(&self, message_id: &str) -> Option<Vec<u8>> {
        self.state.lock().unwrap().images.get(message_id).cloned()
    }

    pub fn posted_count(&self) -> u32 {
        self.state.lock().unwrap().posted
    }

    pub fn edit_count(&self) -> u32 {
        self.state.lock().unwrap().edits
    }

    pub fn deleted(&self) -> Vec<MessageId> {
        self.state.lock().unwrap().deleted.clone()
    }

    pub fn deferred(&self) -> Vec<String> {
        self.state.lock().unwrap().deferred.clone()
    }

    pub fn last_reply(&self) -> Option<String> {
        self.state
            .lock()
            .unwrap()
            .replies
            .last()
            .map(|(_, content)| content.clone())
    }
}

#[async_trait]
impl ChatPlatform for FakePlatform {
    async fn post_image(
        &self,
        _channel_id: &str,
        _filename: &str,
        png: Vec<u8>,
    ) -> Result<MessageId, PlatformError> {
        let mut state = self.state.lock().unwrap();
        if state.failing.contains(&Fail::Post) {
            return Err(refused());
        }
        state.next_id += 1;
        state.posted += 1;
        let id = format!("M{}", state.next_id);
        state.images.insert(id.clone(), png);
        Ok(id)
    }

    async fn edit_image(
        &self,
        _channel_id: &str,
        message_id: &str,
        _filename: &str,
        png: Vec<u8>,
    ) -> Result<(), PlatformError> {
        let mut state = self.state.lock().unwrap();
        if state.failing.contains(&Fail::Edit) {
            return Err(refused());
        }
        if !state.images.contains_key(message_id) {
            return Err(PlatformError::NotFound);
        }
        state.edits += 1;
        state.images.insert(message_id.to_string(), png);
        Ok(())
    }

    async fn delete_message(&self, _channel_id: &str, message_id: &str) -> Result<(), PlatformError> {
        let mut state = self.state.lock().unwrap();
        if state.failing.contains(&Fail::Delete) {
            return Err(refused());
        }
        state.images.remove(message_id);
        state.deleted.push(message_id.to_string());
        Ok(())
    }

    async fn message_exists(&self, _channel_id: &str, message_id: &str) -> Result<bool, PlatformError> {
        let state = self.state.lock().unwrap();
        Ok(state.images.contains_key(message_id) && !state.vanished.contains(message_id))
    }

    async fn defer_reply(&self, interaction_id: &str, _token: &str) -> Result<(), PlatformError> {
        self.state
            .lock()
            .unwrap()
            .deferred
            .push(interaction_id.to_string());
        Ok(())
    }

    async fn edit_reply(&self, token: &str, content: &str) -> Result<(), PlatformError> {
        self.state
            .lock()
            .unwrap()
            .replies
            .push((token.to_string(), content.to_string()));
        Ok(())
    }
}

/// Resolves only the addresses it was given.
#[derive(Default)]
pub struct FakeGeocoder {
    known: Mutex<HashMap<String, Coordinate>>,
    calls: Mutex<Vec<(String, Option<String>)>>,
}

impl FakeGeocoder {
    pub fn insert(&self, address: &str, coord: Coordinate) {
        self.known.lock().unwrap().insert(address.to_string(), coord);
    }

    pub fn calls(&self) -> Vec<(String, Option<String>)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Geocoder for FakeGeocoder {
    async fn geocode(
        &self,
        address: &str,
        country: Option<&CountryCode>,
    ) -> Result<Coordinate, GeocodeError> {
        self.calls
            .lock()
            .unwrap()
            .push((address.to_string(), country.map(|c| c.as_str().to_string())));
        self.known
            .lock()
            .unwrap()
            .get(address)
            .copied()
            .ok_or(GeocodeError::NotFound)
    }
}
