//! Player and bullet records stored in the room arenas

use super::arena::Resettable;
use super::snapshot::DirtyState;
use super::tuning::Tuning;

/// Player field bits used in dirty masks and on the wire
pub mod player_fields {
    pub const POSITION: u16 = 1 << 0;
    pub const ANGLE: u16 = 1 << 1;
    pub const HEALTH: u16 = 1 << 2;
    pub const SCORE: u16 = 1 << 3;
    pub const SHIELD: u16 = 1 << 4;
    pub const DASH: u16 = 1 << 5;
    pub const STATUS: u16 = 1 << 6;
    pub const NAME: u16 = 1 << 7;

    pub const ALL: u16 = POSITION | ANGLE | HEALTH | SCORE | SHIELD | DASH | STATUS | NAME;
    /// Changes that flush immediately
    pub const HIGH_PRIORITY: u16 = HEALTH | SCORE | STATUS | NAME;
}

/// Bullet field bits
pub mod bullet_fields {
    pub const POSITION: u16 = 1 << 0;
    pub const ANGLE: u16 = 1 << 1;
    pub const OWNER: u16 = 1 << 2;

    pub const ALL: u16 = POSITION | ANGLE | OWNER;
    pub const HIGH_PRIORITY: u16 = OWNER;
}

#[derive(Debug, Clone, Default)]
pub struct Player {
    pub id: String,
    pub name: String,
    pub x: f32,
    pub y: f32,
    pub angle: f32,
    pub health: f32,
    pub alive: bool,
    pub score: u32,

    pub shield_charge: f32,
    pub shield_requested: bool,
    pub shield_active: bool,
    pub dash_charge: f32,
    /// Unit vector of the last realized movement, used when a dash has no direction
    pub move_dir: (f32, f32),

    pub weapon_heat: f32,
    pub overheated: bool,
    /// Overheat penalty ends at this clock time
    pub recovered_at: u64,
    pub last_shot_at: Option<u64>,
    pub last_move_at: Option<u64>,
    /// Informational: end of the respawn grace window after death
    pub respawn_deadline: Option<u64>,

    pub slot: usize,
    pub dirty: DirtyState,
}

impl Player {
    /// Put the player into the fresh-spawn state at `(x, y)`
    pub fn spawn(&mut self, x: f32, y: f32, tuning: &Tuning) {
        self.x = x;
        self.y = y;
        self.health = tuning.max_health;
        self.alive = true;
        self.respawn_deadline = None;
        self.shield_charge = tuning.shield_max_charge;
        self.shield_active = false;
        self.shield_requested = false;
        self.dash_charge = tuning.dash_max_charges;
        self.move_dir = (1.0, 0.0);
        self.weapon_heat = 0.0;
        self.overheated = false;
        self.recovered_at = 0;
        self.last_shot_at = None;
    }

    /// Shield currently able to reflect
    pub fn is_shielding(&self) -> bool {
        self.alive && self.shield_active && self.shield_charge > 0.0
    }
}

impl Resettable for Player {
    fn reset(&mut self) {
        self.id.clear();
        self.name.clear();
        self.x = 0.0;
        self.y = 0.0;
        self.angle = 0.0;
        self.health = 0.0;
        self.alive = false;
        self.score = 0;
        self.shield_charge = 0.0;
        self.shield_requested = false;
        self.shield_active = false;
        self.dash_charge = 0.0;
        self.move_dir = (1.0, 0.0);
        self.weapon_heat = 0.0;
        self.overheated = false;
        self.recovered_at = 0;
        self.last_shot_at = None;
        self.last_move_at = None;
        self.respawn_deadline = None;
        self.slot = 0;
        self.dirty = DirtyState::default();
    }
}

#[derive(Debug, Clone, Default)]
pub struct Bullet {
    pub id: u32,
    pub x: f32,
    pub y: f32,
    pub angle: f32,
    pub owner: String,
    pub slot: usize,
    pub dirty: DirtyState,
}

impl Resettable for Bullet {
    fn reset(&mut self) {
        self.id = 0;
        self.x = 0.0;
        self.y = 0.0;
        self.angle = 0.0;
        self.owner.clear();
        self.slot = 0;
        self.dirty = DirtyState::default();
    }
}
