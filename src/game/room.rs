//! The authoritative room simulation
//!
//! [`Room`] is synchronous and owns every piece of mutable room state. It is
//! driven by a single [`RoomTask`](super::actor::RoomTask), which serializes
//! commands, ticks and flushes.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, trace, warn};

use super::arena::SlotArena;
use super::broadcast::{BroadcastScheduler, Priority};
use super::combat::{BulletOutcome, CombatSystem};
use super::entity::{bullet_fields, player_fields, Bullet, Player};
use super::physics::PhysicsSystem;
use super::snapshot::{full_snapshot, DeltaTracker, FlushTotals};
use super::transport::{close_code, Transport, TransportError};
use super::tuning::Tuning;
use crate::util::time::Clock;
use crate::ws::protocol::{decode_command, encode_init, encode_state_update, ClientCommand};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AttachError {
    #[error("room is full")]
    RoomFull,

    #[error("room is closed")]
    RoomClosed,
}

#[derive(Debug, Clone)]
pub struct RoomSettings {
    pub id: String,
    pub name: String,
    pub max_players: usize,
    pub persistent: bool,
    /// Fixed RNG seed; random when `None`
    pub seed: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RoomStatus {
    Live,
    Idle,
}

/// Lobby view of a room
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomSummary {
    pub id: String,
    pub name: String,
    pub players: usize,
    pub max_players: usize,
    pub status: RoomStatus,
    pub persistent: bool,
    pub created_at: DateTime<Utc>,
    #[serde(skip)]
    pub last_activity_ms: u64,
}

pub struct Room {
    settings: RoomSettings,
    tuning: Arc<Tuning>,
    clock: Arc<dyn Clock>,
    players: SlotArena<String, Player>,
    bullets: SlotArena<u32, Bullet>,
    tracker: DeltaTracker,
    scheduler: BroadcastScheduler,
    transports: HashMap<String, Arc<dyn Transport>>,
    rng: ChaCha8Rng,
    next_bullet_id: u32,
    last_activity: u64,
    created_at: DateTime<Utc>,
    destroyed: bool,
    totals: FlushTotals,
}

impl Room {
    pub fn new(settings: RoomSettings, tuning: Arc<Tuning>, clock: Arc<dyn Clock>) -> Self {
        let seed = settings.seed.unwrap_or_else(rand::random);
        let now = clock.now_ms();
        let max_players = settings.max_players;
        Self {
            scheduler: BroadcastScheduler::new(tuning.broadcast_interval_ms),
            settings,
            tuning,
            clock,
            players: SlotArena::with_capacity(max_players),
            bullets: SlotArena::new(),
            tracker: DeltaTracker::new(),
            transports: HashMap::new(),
            rng: ChaCha8Rng::seed_from_u64(seed),
            next_bullet_id: 0,
            last_activity: now,
            created_at: Utc::now(),
            destroyed: false,
            totals: FlushTotals::default(),
        }
    }

    pub fn id(&self) -> &str {
        &self.settings.id
    }

    pub fn settings(&self) -> &RoomSettings {
        &self.settings
    }

    pub fn tuning(&self) -> &Tuning {
        &self.tuning
    }

    pub fn player_count(&self) -> usize {
        self.players.len()
    }

    pub fn is_full(&self) -> bool {
        self.players.len() >= self.settings.max_players
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    pub fn last_activity(&self) -> u64 {
        self.last_activity
    }

    pub fn player(&self, id: &str) -> Option<&Player> {
        self.players.get_by_key(&id.to_string())
    }

    /// Apply an out-of-band edit to a player. The whole record is marked
    /// for a full sync, so clients see the result on the next flush.
    pub fn edit_player(&mut self, id: &str, edit: impl FnOnce(&mut Player)) -> bool {
        let Some(slot) = self.players.slot_of(&id.to_string()) else {
            return false;
        };
        if let Some(player) = self.players.get_mut(slot) {
            edit(player);
        }
        self.mark_player_full(slot);
        true
    }

    pub fn players(&self) -> impl Iterator<Item = &Player> {
        self.players.iter().map(|(_, _, p)| p)
    }

    pub fn bullets(&self) -> impl Iterator<Item = &Bullet> {
        self.bullets.iter().map(|(_, _, b)| b)
    }

    pub fn bullet_count(&self) -> usize {
        self.bullets.len()
    }

    /// Next clock time at which [`Room::flush`] has work to do
    pub fn next_flush_deadline(&self) -> Option<u64> {
        self.scheduler.deadline()
    }

    pub fn summary(&self) -> RoomSummary {
        let players = self.players.len();
        RoomSummary {
            id: self.settings.id.clone(),
            name: self.settings.name.clone(),
            players,
            max_players: self.settings.max_players,
            status: if players > 0 {
                RoomStatus::Live
            } else {
                RoomStatus::Idle
            },
            persistent: self.settings.persistent,
            created_at: self.created_at,
            last_activity_ms: self.last_activity,
        }
    }

    fn generate_player_id(&mut self) -> String {
        loop {
            let bytes: [u8; 4] = self.rng.gen();
            let id = hex::encode(bytes);
            if !self.players.contains_key(&id) {
                return id;
            }
        }
    }

    /// Add a participant. The transport receives INIT followed by a full
    /// snapshot of everything already in the room.
    pub fn attach(
        &mut self,
        transport: Arc<dyn Transport>,
        name: &str,
    ) -> Result<String, AttachError> {
        if self.destroyed {
            return Err(AttachError::RoomClosed);
        }
        if self.is_full() {
            return Err(AttachError::RoomFull);
        }

        let now = self.clock.now_ms();
        let id = self.generate_player_id();
        let (x, y) = PhysicsSystem::random_spawn(&mut self.rng, &self.tuning);
        let Some(slot) = self.players.insert(id.clone()) else {
            return Err(AttachError::RoomClosed);
        };
        if let Some(player) = self.players.get_mut(slot) {
            player.id.push_str(&id);
            if name.is_empty() {
                player.name.push_str("Pilot-");
                player.name.push_str(&id[..4]);
            } else {
                player.name.push_str(name);
            }
            player.angle = 0.0;
            player.score = 0;
            player.slot = slot;
            player.spawn(x, y, &self.tuning);
        }
        self.mark_player_full(slot);
        self.last_activity = now;

        let init = encode_init(&id, self.tuning.width, self.tuning.height);
        let world = encode_state_update(&full_snapshot(&self.players, &self.bullets, &id));
        if let Err(e) = transport
            .send(init, true)
            .and_then(|_| transport.send(world, true))
        {
            debug!(room_id = %self.settings.id, player_id = %id, error = %e, "initial frames not delivered");
        }
        self.transports.insert(id.clone(), transport);

        info!(
            room_id = %self.settings.id,
            player_id = %id,
            players = self.players.len(),
            "player attached"
        );
        Ok(id)
    }

    /// Remove a participant. Returns false when the id was unknown.
    pub fn detach(&mut self, player_id: &str) -> bool {
        self.transports.remove(player_id);
        let key = player_id.to_string();
        if self.players.remove(&key).is_none() {
            return false;
        }
        self.tracker.player_removed(key);
        let now = self.clock.now_ms();
        self.scheduler.request(Priority::High, now);
        self.last_activity = now;
        info!(
            room_id = %self.settings.id,
            player_id = %player_id,
            players = self.players.len(),
            "player detached"
        );
        true
    }

    /// Decode and apply one command frame. Malformed frames are dropped.
    pub fn handle_message(&mut self, player_id: &str, frame: &[u8]) {
        match decode_command(frame) {
            Ok(command) => self.apply_command(player_id, command),
            Err(e) => trace!(room_id = %self.settings.id, player_id = %player_id, error = %e, "dropped command"),
        }
    }

    pub fn apply_command(&mut self, player_id: &str, command: ClientCommand) {
        if self.destroyed {
            return;
        }
        let Some(slot) = self.players.slot_of(&player_id.to_string()) else {
            return;
        };
        let now = self.clock.now_ms();
        match command {
            ClientCommand::Move { x, y, angle } => self.handle_move(slot, x, y, angle, now),
            ClientCommand::Shoot => self.handle_shoot(slot, now),
            ClientCommand::Shield { active } => self.handle_shield(slot, active, now),
            ClientCommand::Dash { dir_x, dir_y } => self.handle_dash(slot, dir_x, dir_y, now),
            ClientCommand::Respawn => self.handle_respawn(slot, now),
        }
    }

    fn handle_move(&mut self, slot: usize, x: f32, y: f32, angle: Option<f32>, now: u64) {
        let tuning = &self.tuning;
        let Some(player) = self.players.get_mut(slot) else {
            return;
        };
        if !player.alive {
            return;
        }
        if let Some(last) = player.last_move_at {
            if now.saturating_sub(last) < tuning.move_throttle_ms {
                return;
            }
        }

        let mut changed = 0;
        let (cx, cy) = PhysicsSystem::clamp_position(x, y, tuning);
        if let Some(dir) = PhysicsSystem::direction((player.x, player.y), (cx, cy)) {
            player.move_dir = dir;
            player.x = cx;
            player.y = cy;
            changed |= player_fields::POSITION;
        }
        if let Some(angle) = angle {
            if angle != player.angle {
                player.angle = angle;
                changed |= player_fields::ANGLE;
            }
        }
        player.last_move_at = Some(now);
        self.last_activity = now;
        self.mark_player(slot, changed);
    }

    fn handle_shoot(&mut self, slot: usize, now: u64) {
        let tuning = &self.tuning;
        let Some(player) = self.players.get_mut(slot) else {
            return;
        };
        if let Err(reason) = CombatSystem::check_fire(player, now, tuning) {
            trace!(player_id = %player.id, ?reason, "shot rejected");
            return;
        }
        CombatSystem::register_shot(player, now, tuning);
        let (x, y, angle) = (player.x, player.y, player.angle);
        let owner = player.id.clone();
        self.spawn_bullet(x, y, angle, &owner);
        self.last_activity = now;
    }

    fn handle_shield(&mut self, slot: usize, active: bool, now: u64) {
        let Some(player) = self.players.get_mut(slot) else {
            return;
        };
        let was_active = player.shield_active;
        player.shield_requested = active && player.alive;
        if !player.shield_requested {
            player.shield_active = false;
        }
        let changed = if was_active != player.shield_active {
            player_fields::SHIELD
        } else {
            0
        };
        self.last_activity = now;
        self.mark_player(slot, changed);
    }

    fn handle_dash(&mut self, slot: usize, dir_x: f32, dir_y: f32, now: u64) {
        let tuning = &self.tuning;
        let Some(player) = self.players.get_mut(slot) else {
            return;
        };
        self.last_activity = now;
        if !player.alive || player.dash_charge < 1.0 {
            return;
        }
        let dir = PhysicsSystem::dash_direction((dir_x, dir_y), player.move_dir, player.angle);
        let (x, y) = PhysicsSystem::dash_target(player.x, player.y, dir, tuning);
        player.x = x;
        player.y = y;
        player.dash_charge = (player.dash_charge - 1.0).max(0.0);
        player.move_dir = dir;
        self.mark_player(slot, player_fields::POSITION | player_fields::DASH);
    }

    fn handle_respawn(&mut self, slot: usize, now: u64) {
        if self.players.get(slot).map_or(true, |p| p.alive) {
            return;
        }
        let (x, y) = PhysicsSystem::random_spawn(&mut self.rng, &self.tuning);
        if let Some(player) = self.players.get_mut(slot) {
            player.spawn(x, y, &self.tuning);
            debug!(room_id = %self.settings.id, player_id = %player.id, "player respawned");
        }
        self.last_activity = now;
        self.mark_player_full(slot);
    }

    fn spawn_bullet(&mut self, x: f32, y: f32, angle: f32, owner: &str) {
        let id = self.next_bullet_id;
        self.next_bullet_id = self.next_bullet_id.wrapping_add(1);
        let Some(slot) = self.bullets.insert(id) else {
            warn!(room_id = %self.settings.id, bullet_id = id, "bullet id still in use");
            return;
        };
        if let Some(bullet) = self.bullets.get_mut(slot) {
            bullet.id = id;
            bullet.x = x;
            bullet.y = y;
            bullet.angle = angle;
            bullet.owner.push_str(owner);
            bullet.slot = slot;
            if bullet.dirty.mark_full(bullet_fields::ALL) {
                self.tracker.queue_bullet(slot);
            }
        }
        self.scheduler.request(Priority::High, self.clock.now_ms());
    }

    fn remove_bullet(&mut self, slot: usize) {
        if let Some(id) = self.bullets.release_slot(slot) {
            self.tracker.bullet_removed(id);
            self.scheduler.request(Priority::High, self.clock.now_ms());
        }
    }

    fn mark_player(&mut self, slot: usize, bits: u16) {
        if bits == 0 {
            return;
        }
        let Some(player) = self.players.get_mut(slot) else {
            return;
        };
        if player.dirty.mark(bits) {
            self.tracker.queue_player(slot);
        }
        let priority = if bits & player_fields::HIGH_PRIORITY != 0 {
            Priority::High
        } else {
            Priority::Low
        };
        self.scheduler.request(priority, self.clock.now_ms());
    }

    fn mark_player_full(&mut self, slot: usize) {
        let Some(player) = self.players.get_mut(slot) else {
            return;
        };
        if player.dirty.mark_full(player_fields::ALL) {
            self.tracker.queue_player(slot);
        }
        self.scheduler.request(Priority::High, self.clock.now_ms());
    }

    fn mark_bullet(&mut self, slot: usize, bits: u16) {
        let Some(bullet) = self.bullets.get_mut(slot) else {
            return;
        };
        if bullet.dirty.mark(bits) {
            self.tracker.queue_bullet(slot);
        }
        let priority = if bits & bullet_fields::HIGH_PRIORITY != 0 {
            Priority::High
        } else {
            Priority::Low
        };
        self.scheduler.request(priority, self.clock.now_ms());
    }

    /// Advance the simulation by one fixed step
    pub fn tick(&mut self) {
        if self.destroyed || self.players.is_empty() {
            return;
        }
        let now = self.clock.now_ms();
        let tuning = Arc::clone(&self.tuning);

        for slot in 0..self.players.capacity() {
            let Some(player) = self.players.get_mut(slot) else {
                continue;
            };
            CombatSystem::cool_weapon(player, now, &tuning);
            let changed = CombatSystem::step_abilities(player, &tuning);
            self.mark_player(slot, changed);
        }

        for slot in 0..self.bullets.capacity() {
            let Some(bullet) = self.bullets.get_mut(slot) else {
                continue;
            };
            let (x, y) = PhysicsSystem::advance_bullet(bullet.x, bullet.y, bullet.angle, &tuning);
            bullet.x = x;
            bullet.y = y;
            if PhysicsSystem::out_of_bounds(x, y, &tuning) {
                self.remove_bullet(slot);
                continue;
            }
            self.mark_bullet(slot, bullet_fields::POSITION);

            let outcome = match self.bullets.get(slot) {
                Some(bullet) => CombatSystem::resolve_bullet(bullet, &self.players, &tuning),
                None => continue,
            };
            match outcome {
                BulletOutcome::Flying => {}
                BulletOutcome::Reflected { target_slot } => {
                    let (Some(bullet), Some(target)) =
                        (self.bullets.get_mut(slot), self.players.get_mut(target_slot))
                    else {
                        continue;
                    };
                    let changed = CombatSystem::reflect(bullet, target, &tuning);
                    trace!(bullet_id = bullet.id, owner = %bullet.owner, "bullet reflected");
                    self.mark_player(target_slot, changed);
                    self.mark_bullet(slot, bullet_fields::ALL);
                }
                BulletOutcome::Hit { target_slot } => {
                    self.resolve_hit(slot, target_slot, now, &tuning);
                    self.remove_bullet(slot);
                }
            }
        }
    }

    fn resolve_hit(&mut self, bullet_slot: usize, target_slot: usize, now: u64, tuning: &Tuning) {
        let Some(shooter) = self.bullets.get(bullet_slot).map(|b| b.owner.clone()) else {
            return;
        };
        let Some(target) = self.players.get_mut(target_slot) else {
            return;
        };
        let (changed, killed) = CombatSystem::apply_hit(target, now, tuning);
        let victim = killed.then(|| target.id.clone());
        self.mark_player(target_slot, changed);

        if let Some(victim) = victim {
            if let Some(shooter_slot) = self.players.slot_of(&shooter) {
                if let Some(p) = self.players.get_mut(shooter_slot) {
                    p.score += 1;
                }
                self.mark_player(shooter_slot, player_fields::SCORE);
            }
            info!(room_id = %self.settings.id, killer = %shooter, victim = %victim, "player eliminated");
        }
    }

    /// Drain pending changes into a STATE_UPDATE and send it to every
    /// transport. Returns the frame, or `None` when there was nothing to send.
    pub fn flush(&mut self) -> Option<Bytes> {
        let now = self.clock.now_ms();
        if self.destroyed || !self.tracker.has_pending() {
            self.scheduler.complete(now, false);
            return None;
        }
        let delta = self.tracker.drain(&mut self.players, &mut self.bullets);
        if delta.is_empty() {
            self.scheduler.complete(now, false);
            return None;
        }
        let frame = encode_state_update(&delta);
        self.totals.add(&delta, frame.len());
        self.broadcast(&frame);
        self.scheduler.complete(now, true);
        Some(frame)
    }

    /// Flush only when the scheduler deadline has passed
    pub fn flush_if_due(&mut self) -> Option<Bytes> {
        if self.scheduler.is_due(self.clock.now_ms()) {
            self.flush()
        } else {
            None
        }
    }

    fn broadcast(&self, frame: &Bytes) {
        for (player_id, transport) in &self.transports {
            match transport.send(frame.clone(), true) {
                Ok(()) => {}
                Err(TransportError::Backpressure) => {
                    warn!(room_id = %self.settings.id, player_id = %player_id, "slow consumer, closing");
                }
                Err(TransportError::Closed) => {
                    trace!(room_id = %self.settings.id, player_id = %player_id, "send on closed transport");
                }
            }
        }
    }

    /// Tear the room down. Safe to call more than once.
    pub fn destroy(&mut self) {
        if self.destroyed {
            return;
        }
        self.destroyed = true;
        self.scheduler.cancel();
        for transport in self.transports.values() {
            transport.close(close_code::GOING_AWAY, "room-closed");
        }
        self.transports.clear();
        self.players.clear();
        self.bullets.clear();
        self.tracker.clear();
        info!(
            room_id = %self.settings.id,
            frames = self.totals.frames,
            records = self.totals.records,
            bytes = self.totals.bytes,
            players_allocated = self.players.pool().created(),
            bullets_allocated = self.bullets.pool().created(),
            "room destroyed"
        );
    }
}
