// ============================
// crates/backend-lib/src/registry.rs
// ============================
//! Room registry and actor coordination.
//!
//! One entry per live room, mapping the room id to the handle of the actor
//! that owns all of that room's state. Closed room ids are tombstoned so an
//! id never hosts a second logical session; a process restart clears the
//! tombstones, which is acceptable because a restart force-closes every
//! room anyway.

use dashmap::{mapref::entry::Entry, DashMap, DashSet};
use metrics::{counter, gauge};
use std::sync::Arc;
use teleconsult_common::RoomId;

use crate::config::RoomConfig;
use crate::error::AppError;
use crate::metrics::{ROOMS_ACTIVE, ROOM_CLOSED, ROOM_CREATED};
use crate::records::RecordStore;
use crate::room_actor::{spawn_room_actor, RoomHandle};

/// Manager for all active rooms
#[derive(Clone)]
pub struct RoomRegistry {
    inner: Arc<RegistryInner>,
}

struct RegistryInner {
    rooms: DashMap<RoomId, RoomHandle>,
    /// Ids of rooms that have completed their lifecycle
    closed: DashSet<RoomId>,
    config: RoomConfig,
    records: Arc<dyn RecordStore>,
}

impl RoomRegistry {
    pub fn new(config: RoomConfig, records: Arc<dyn RecordStore>) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                rooms: DashMap::new(),
                closed: DashSet::new(),
                config,
                records,
            }),
        }
    }

    /// Look up a room, spawning its actor if the id has never been used.
    /// Atomic: under concurrent calls exactly one caller observes
    /// `created = true`. A tombstoned id is refused with `RoomNotFound`.
    pub fn get_or_create(&self, room_id: &str) -> Result<(RoomHandle, bool), AppError> {
        if self.inner.closed.contains(room_id) {
            return Err(AppError::RoomNotFound {
                room_id: room_id.to_string(),
            });
        }

        match self.inner.rooms.entry(room_id.to_string()) {
            Entry::Occupied(entry) => Ok((entry.get().clone(), false)),
            Entry::Vacant(entry) => {
                // Re-check under the entry lock: a concurrent teardown
                // tombstones before it removes, so a vacant slot with a
                // tombstone means the room closed between our two reads.
                if self.inner.closed.contains(room_id) {
                    return Err(AppError::RoomNotFound {
                        room_id: room_id.to_string(),
                    });
                }

                let handle = spawn_room_actor(
                    room_id.to_string(),
                    self.inner.config.clone(),
                    self.inner.records.clone(),
                    self.clone(),
                );
                entry.insert(handle.clone());

                counter!(ROOM_CREATED).increment(1);
                gauge!(ROOMS_ACTIVE).set(self.inner.rooms.len() as f64);

                Ok((handle, true))
            },
        }
    }

    pub fn get(&self, room_id: &str) -> Option<RoomHandle> {
        self.inner.rooms.get(room_id).map(|entry| entry.value().clone())
    }

    /// Whether a room id is live or already retired.
    pub fn is_known(&self, room_id: &str) -> bool {
        self.inner.rooms.contains_key(room_id) || self.inner.closed.contains(room_id)
    }

    /// Retire a room id after its actor finishes teardown. Tombstone first,
    /// then remove only the closing actor's own entry, so a racing
    /// `get_or_create` can never resurrect the id.
    pub(crate) fn finalize_close(&self, room_id: &str, closing: &RoomHandle) {
        self.inner.closed.insert(room_id.to_string());
        self.inner
            .rooms
            .remove_if(room_id, |_, handle| handle.same_actor(closing));

        counter!(ROOM_CLOSED).increment(1);
        gauge!(ROOMS_ACTIVE).set(self.inner.rooms.len() as f64);
    }

    pub fn active_rooms(&self) -> usize {
        self.inner.rooms.len()
    }
}
