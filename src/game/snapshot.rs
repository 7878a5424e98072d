//! Dirty tracking and delta building

use super::arena::SlotArena;
use super::entity::{bullet_fields, player_fields, Bullet, Player};

/// Per-entity change bookkeeping
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DirtyState {
    pub mask: u16,
    pub full_sync: bool,
    /// Already sitting in a dirty queue since the last flush
    pub queued: bool,
}

impl DirtyState {
    /// Add `bits` to the mask. Returns true when the entity must be queued.
    pub fn mark(&mut self, bits: u16) -> bool {
        self.mask |= bits;
        if self.queued {
            false
        } else {
            self.queued = true;
            true
        }
    }

    pub fn mark_full(&mut self, all: u16) -> bool {
        self.full_sync = true;
        self.mark(all)
    }

    /// Capture and clear the pending state
    pub fn take(&mut self) -> (u16, bool) {
        let taken = (self.mask, self.full_sync);
        *self = DirtyState::default();
        taken
    }
}

/// Outbound player record; fields are present exactly when their mask bit is set
#[derive(Debug, Clone, PartialEq)]
pub struct PlayerRecord {
    pub id: String,
    pub full_sync: bool,
    pub alive: bool,
    pub shield_active: bool,
    pub mask: u16,
    pub name: Option<String>,
    pub position: Option<(f32, f32)>,
    pub angle: Option<f32>,
    pub health: Option<f32>,
    pub score: Option<f32>,
    pub shield_charge: Option<f32>,
    pub dash_charge: Option<f32>,
}

impl PlayerRecord {
    pub fn capture(player: &Player, mask: u16, full_sync: bool) -> Self {
        use player_fields::*;
        let mask = if full_sync { ALL } else { mask & ALL };
        let has = |bit: u16| mask & bit != 0;
        Self {
            id: player.id.clone(),
            full_sync,
            alive: player.alive,
            shield_active: player.shield_active,
            mask,
            name: has(NAME).then(|| player.name.clone()),
            position: has(POSITION).then_some((player.x, player.y)),
            angle: has(ANGLE).then_some(player.angle),
            health: has(HEALTH).then_some(player.health),
            score: has(SCORE).then_some(player.score as f32),
            shield_charge: has(SHIELD).then_some(player.shield_charge),
            dash_charge: has(DASH).then_some(player.dash_charge),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BulletRecord {
    pub id: u32,
    pub full_sync: bool,
    pub mask: u8,
    pub position: Option<(f32, f32)>,
    pub angle: Option<f32>,
    pub owner: Option<String>,
}

impl BulletRecord {
    pub fn capture(bullet: &Bullet, mask: u16, full_sync: bool) -> Self {
        use bullet_fields::*;
        let mask = if full_sync { ALL } else { mask & ALL };
        let has = |bit: u16| mask & bit != 0;
        Self {
            id: bullet.id,
            full_sync,
            mask: mask as u8,
            position: has(POSITION).then_some((bullet.x, bullet.y)),
            angle: has(ANGLE).then_some(bullet.angle),
            owner: has(OWNER).then(|| bullet.owner.clone()),
        }
    }
}

/// One STATE_UPDATE worth of changes
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StateDelta {
    pub players: Vec<PlayerRecord>,
    pub removed_players: Vec<String>,
    pub bullets: Vec<BulletRecord>,
    pub removed_bullets: Vec<u32>,
}

impl StateDelta {
    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
            && self.removed_players.is_empty()
            && self.bullets.is_empty()
            && self.removed_bullets.is_empty()
    }
}

/// Queues of dirty slots and removed ids awaiting the next flush
#[derive(Debug, Default)]
pub struct DeltaTracker {
    player_queue: Vec<usize>,
    bullet_queue: Vec<usize>,
    removed_players: Vec<String>,
    removed_bullets: Vec<u32>,
}

impl DeltaTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn queue_player(&mut self, slot: usize) {
        self.player_queue.push(slot);
    }

    pub fn queue_bullet(&mut self, slot: usize) {
        self.bullet_queue.push(slot);
    }

    pub fn player_removed(&mut self, id: String) {
        self.removed_players.push(id);
    }

    pub fn bullet_removed(&mut self, id: u32) {
        self.removed_bullets.push(id);
    }

    pub fn has_pending(&self) -> bool {
        !(self.player_queue.is_empty()
            && self.bullet_queue.is_empty()
            && self.removed_players.is_empty()
            && self.removed_bullets.is_empty())
    }

    /// Drain every queue into a delta, clearing entity dirty state.
    ///
    /// Queue entries pointing at freed slots, or at entities that were
    /// already drained through an earlier entry for the same slot, are
    /// skipped.
    pub fn drain(
        &mut self,
        players: &mut SlotArena<String, Player>,
        bullets: &mut SlotArena<u32, Bullet>,
    ) -> StateDelta {
        let mut delta = StateDelta::default();

        for slot in self.player_queue.drain(..) {
            let Some(player) = players.get_mut(slot) else {
                continue;
            };
            if !player.dirty.queued {
                continue;
            }
            let (mask, full_sync) = player.dirty.take();
            if mask == 0 && !full_sync {
                continue;
            }
            delta.players.push(PlayerRecord::capture(player, mask, full_sync));
        }

        for slot in self.bullet_queue.drain(..) {
            let Some(bullet) = bullets.get_mut(slot) else {
                continue;
            };
            if !bullet.dirty.queued {
                continue;
            }
            let (mask, full_sync) = bullet.dirty.take();
            if mask == 0 && !full_sync {
                continue;
            }
            delta.bullets.push(BulletRecord::capture(bullet, mask, full_sync));
        }

        delta.removed_players = std::mem::take(&mut self.removed_players);
        delta.removed_bullets = std::mem::take(&mut self.removed_bullets);
        delta
    }

    pub fn clear(&mut self) {
        self.player_queue.clear();
        self.bullet_queue.clear();
        self.removed_players.clear();
        self.removed_bullets.clear();
    }
}

/// Full-sync view of every active entity except `exclude_player`, without
/// touching dirty state. Sent to a transport that just attached.
pub fn full_snapshot(
    players: &SlotArena<String, Player>,
    bullets: &SlotArena<u32, Bullet>,
    exclude_player: &str,
) -> StateDelta {
    StateDelta {
        players: players
            .iter()
            .filter(|(_, id, _)| id.as_str() != exclude_player)
            .map(|(_, _, p)| PlayerRecord::capture(p, player_fields::ALL, true))
            .collect(),
        bullets: bullets
            .iter()
            .map(|(_, _, b)| BulletRecord::capture(b, bullet_fields::ALL, true))
            .collect(),
        ..StateDelta::default()
    }
}

/// What a room has written over its lifetime, logged on teardown
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FlushTotals {
    pub frames: u64,
    pub records: u64,
    pub bytes: u64,
}

impl FlushTotals {
    pub fn add(&mut self, delta: &StateDelta, bytes: usize) {
        self.frames += 1;
        self.records += (delta.players.len() + delta.bullets.len()) as u64;
        self.bytes += bytes as u64;
    }
}
