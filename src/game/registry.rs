//! Registry of running rooms

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

use super::actor::RoomHandle;
use super::room::{Room, RoomSettings, RoomSummary};
use super::tuning::Tuning;
use crate::util::time::Clock;

/// Default capacity of rooms created from the lobby
pub const DEFAULT_MAX_PLAYERS: usize = 8;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("room '{0}' already exists")]
    AlreadyExists(String),

    #[error("max players must be at least 1")]
    InvalidMaxPlayers,
}

#[derive(Debug, Clone)]
pub struct CreateRoom {
    /// Explicit id; derived from the name when `None`
    pub id: Option<String>,
    pub name: String,
    pub max_players: usize,
    pub persistent: bool,
}

impl Default for CreateRoom {
    fn default() -> Self {
        Self {
            id: None,
            name: String::new(),
            max_players: DEFAULT_MAX_PLAYERS,
            persistent: false,
        }
    }
}

struct RegisteredRoom {
    seq: u64,
    handle: RoomHandle,
}

/// All rooms of this process. Owned by `main` and shared through `AppState`.
pub struct RoomRegistry {
    rooms: DashMap<String, RegisteredRoom>,
    counter: AtomicU64,
    tuning: Arc<Tuning>,
    clock: Arc<dyn Clock>,
}

/// Lowercase slug with runs of anything but `[a-z0-9]` collapsed to `-`
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    for c in name.to_lowercase().chars() {
        if c.is_ascii_lowercase() || c.is_ascii_digit() {
            slug.push(c);
        } else if !slug.ends_with('-') {
            slug.push('-');
        }
    }
    slug.trim_matches('-').to_string()
}

impl RoomRegistry {
    pub fn new(tuning: Arc<Tuning>, clock: Arc<dyn Clock>) -> Self {
        Self {
            rooms: DashMap::new(),
            counter: AtomicU64::new(1),
            tuning,
            clock,
        }
    }

    pub fn tuning(&self) -> &Tuning {
        &self.tuning
    }

    /// Create and start a room. Must be called inside a tokio runtime.
    pub fn create_room(&self, request: CreateRoom) -> Result<RoomHandle, RegistryError> {
        if request.max_players == 0 {
            return Err(RegistryError::InvalidMaxPlayers);
        }
        let seq = self.counter.fetch_add(1, Ordering::Relaxed);
        let trimmed = request.name.trim();
        let name = if trimmed.is_empty() {
            format!("Neon-{seq}")
        } else {
            trimmed.to_string()
        };

        let explicit = request.id.is_some();
        let base = match request.id {
            Some(id) => id,
            None => match slugify(&name) {
                s if s.is_empty() => format!("room-{seq}"),
                s => s,
            },
        };

        let mut suffix = 0u64;
        loop {
            let id = if suffix == 0 {
                base.clone()
            } else {
                format!("{base}-{suffix}")
            };
            suffix += 1;

            let slot = match self.rooms.entry(id.clone()) {
                Entry::Vacant(slot) => slot,
                Entry::Occupied(_) if explicit => return Err(RegistryError::AlreadyExists(id)),
                Entry::Occupied(_) => continue,
            };
            let room = Room::new(
                RoomSettings {
                    id: id.clone(),
                    name: name.clone(),
                    max_players: request.max_players,
                    persistent: request.persistent,
                    seed: None,
                },
                Arc::clone(&self.tuning),
                Arc::clone(&self.clock),
            );
            let handle = RoomHandle::spawn(room, Arc::clone(&self.clock));
            slot.insert(RegisteredRoom {
                seq,
                handle: handle.clone(),
            });
            info!(
                room_id = %id,
                name = %name,
                max_players = request.max_players,
                persistent = request.persistent,
                "room created"
            );
            return Ok(handle);
        }
    }

    pub fn get_room(&self, id: &str) -> Option<RoomHandle> {
        self.rooms.get(id).map(|r| r.handle.clone())
    }

    /// Summaries in creation order
    pub fn list_room_summaries(&self) -> Vec<RoomSummary> {
        let mut rooms: Vec<(u64, RoomSummary)> = self
            .rooms
            .iter()
            .map(|r| (r.seq, r.handle.summary()))
            .collect();
        rooms.sort_by_key(|(seq, _)| *seq);
        rooms.into_iter().map(|(_, s)| s).collect()
    }

    /// Remove and shut down a room
    pub async fn remove_room(&self, id: &str) -> bool {
        match self.rooms.remove(id) {
            Some((_, room)) => {
                room.handle.shutdown().await;
                info!(room_id = %id, "room removed");
                true
            }
            None => false,
        }
    }

    /// Remove non-persistent rooms that are empty and idle for longer than
    /// `max_idle_ms`. Returns how many were removed.
    pub async fn prune_idle_rooms(&self, max_idle_ms: u64) -> usize {
        let now = self.clock.now_ms();
        let stale: Vec<String> = self
            .rooms
            .iter()
            .filter(|r| {
                let summary = r.handle.summary();
                !summary.persistent
                    && summary.players == 0
                    && now.saturating_sub(summary.last_activity_ms) > max_idle_ms
            })
            .map(|r| r.key().clone())
            .collect();

        let mut removed = 0;
        for id in stale {
            if self.remove_room(&id).await {
                removed += 1;
            }
        }
        if removed > 0 {
            debug!(removed, "pruned idle rooms");
        }
        removed
    }

    /// Create the built-in persistent rooms when the registry is empty
    pub fn ensure_default_rooms(&self) -> Result<(), RegistryError> {
        if !self.rooms.is_empty() {
            return Ok(());
        }
        for (id, name, max_players) in [
            ("neon-core", "Neon Core", 8),
            ("pulse-drift", "Pulse Drift", 12),
            ("zenith-line", "Zenith Line", 6),
        ] {
            self.create_room(CreateRoom {
                id: Some(id.to_string()),
                name: name.to_string(),
                max_players,
                persistent: true,
            })?;
        }
        Ok(())
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    pub fn total_players(&self) -> usize {
        self.rooms.iter().map(|r| r.handle.player_count()).sum()
    }

    /// Stop every room (server shutdown)
    pub async fn shutdown_all(&self) {
        let ids: Vec<String> = self.rooms.iter().map(|r| r.key().clone()).collect();
        for id in ids {
            self.remove_room(&id).await;
        }
    }

    /// Periodic idle-room pruning; runs until the task is dropped
    pub async fn run_pruner(self: Arc<Self>, every: Duration, max_idle: Duration) {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick completes immediately
        ticker.tick().await;
        loop {
            ticker.tick().await;
            self.prune_idle_rooms(max_idle.as_millis() as u64).await;
        }
    }
}
