use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::OwnedMutexGuard;

use disworld_render::Locations;
use disworld_types::models::{ChannelId, MessageId};

/// In-memory mirror of one channel's map and pinned locations.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelEntry {
    pub message_id: MessageId,
    pub locations: Locations,
}

impl ChannelEntry {
    pub fn new(message_id: MessageId) -> Self {
        Self {
            message_id,
            locations: Locations::new(),
        }
    }
}

/// `None` means the channel has no map.
pub type ChannelSlot = Option<ChannelEntry>;

/// Exclusive access to one channel's slot, held across a whole operation.
pub type ChannelGuard = OwnedMutexGuard<ChannelSlot>;

/// Channel id -> map state. Each channel has its own async lock so a
/// store write, registry update, render and message edit for one channel
/// complete before the next operation on that channel starts, while other
/// channels proceed independently.
#[derive(Default)]
pub struct Registry {
    slots: Mutex<HashMap<ChannelId, Arc<tokio::sync::Mutex<ChannelSlot>>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, channel_id: &str) -> Arc<tokio::sync::Mutex<ChannelSlot>> {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots
            .entry(channel_id.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(None)))
            .clone()
    }

    /// Wait for exclusive access to a channel, creating its slot if needed.
    /// Only map creation should need this; callers that leave the slot empty
    /// hand the guard back through [`Registry::release`].
    pub async fn lock(&self, channel_id: &str) -> ChannelGuard {
        self.slot(channel_id).lock_owned().await
    }

    /// Exclusive access to a channel that has a map. Never creates a slot,
    /// and drops an empty one it finds.
    pub async fn lock_existing(&self, channel_id: &str) -> Option<ChannelGuard> {
        let slot = {
            let slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
            slots.get(channel_id).cloned()
        }?;

        let guard = slot.lock_owned().await;
        if guard.is_some() {
            return Some(guard);
        }
        drop(guard);
        self.prune(channel_id);
        None
    }

    /// Give up a guard, evicting the slot if it is empty and nobody else
    /// is waiting on it.
    pub fn release(&self, channel_id: &str, guard: ChannelGuard) {
        drop(guard);
        self.prune(channel_id);
    }

    fn prune(&self, channel_id: &str) {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        // The map's own reference is the only one left: no task holds or awaits it.
        let idle = slots.get(channel_id).is_some_and(|slot| {
            Arc::strong_count(slot) == 1 && slot.try_lock().is_ok_and(|s| s.is_none())
        });
        if idle {
            slots.remove(channel_id);
        }
    }

    /// Replace the whole registry. Only used while loading, before events flow.
    pub fn seed(&self, entries: HashMap<ChannelId, ChannelEntry>) {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots.clear();
        for (channel_id, entry) in entries {
            slots.insert(channel_id, Arc::new(tokio::sync::Mutex::new(Some(entry))));
        }
    }

    /// Copy of a channel's entry, waiting for any in-flight operation on it.
    pub async fn snapshot(&self, channel_id: &str) -> Option<ChannelEntry> {
        self.lock_existing(channel_id)
            .await
            .and_then(|guard| (*guard).clone())
    }

    #[cfg(test)]
    pub(crate) fn slot_count(&self) -> usize {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Channels that currently have a map.
    pub async fn channels_with_maps(&self) -> Vec<ChannelId> {
        let slots: Vec<(ChannelId, Arc<tokio::sync::Mutex<ChannelSlot>>)> = {
            let slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
            slots.iter().map(|(id, s)| (id.clone(), s.clone())).collect()
        };

        let mut channels = Vec::new();
        for (channel_id, slot) in slots {
            if slot.lock().await.is_some() {
                channels.push(channel_id);
            }
        }
        channels.sort();
        channels
    }
}
