//! Combat system - weapon heat, abilities, damage and bullet resolution

use super::arena::SlotArena;
use super::entity::{player_fields, Bullet, Player};
use super::physics::PhysicsSystem;
use super::tuning::Tuning;

/// Why a SHOOT command was ignored
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShotRejected {
    Dead,
    Shielding,
    Overheated,
    TooSoon,
    /// Heat sat at capacity; the weapon is now locked
    HeatMaxed,
}

/// What happened to a bullet against the players this tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BulletOutcome {
    Flying,
    Reflected { target_slot: usize },
    Hit { target_slot: usize },
}

/// Combat rules; all state lives on the entities
pub struct CombatSystem;

impl CombatSystem {
    /// Check whether `player` may fire now. Trying to fire at full heat
    /// trips the overheat lock as a side effect.
    pub fn check_fire(player: &mut Player, now: u64, tuning: &Tuning) -> Result<(), ShotRejected> {
        if !player.alive {
            return Err(ShotRejected::Dead);
        }
        if player.shield_active || player.shield_requested {
            return Err(ShotRejected::Shielding);
        }
        if player.overheated {
            return Err(ShotRejected::Overheated);
        }
        if let Some(last) = player.last_shot_at {
            if now.saturating_sub(last) < tuning.min_shot_interval_ms {
                return Err(ShotRejected::TooSoon);
            }
        }
        if player.weapon_heat >= 1.0 {
            Self::overheat(player, now, tuning);
            return Err(ShotRejected::HeatMaxed);
        }
        Ok(())
    }

    /// Book-keeping after a bullet was spawned
    pub fn register_shot(player: &mut Player, now: u64, tuning: &Tuning) {
        player.last_shot_at = Some(now);
        player.weapon_heat = (player.weapon_heat + tuning.heat_per_shot).min(1.0);
        if player.weapon_heat >= 1.0 {
            Self::overheat(player, now, tuning);
        }
    }

    fn overheat(player: &mut Player, now: u64, tuning: &Tuning) {
        player.overheated = true;
        player.recovered_at = now.saturating_add(tuning.overheat_penalty_ms);
    }

    /// Per-tick heat decay and overheat recovery
    pub fn cool_weapon(player: &mut Player, now: u64, tuning: &Tuning) {
        let decay = tuning.step_ms() * tuning.heat_cooldown_rate;
        player.weapon_heat = (player.weapon_heat - decay).max(0.0);
        if player.overheated
            && player.weapon_heat <= tuning.heat_safe_ratio
            && now >= player.recovered_at
        {
            player.overheated = false;
        }
    }

    /// Per-tick shield and dash regeneration. Returns the changed field bits.
    pub fn step_abilities(player: &mut Player, tuning: &Tuning) -> u16 {
        let step = tuning.step_ms();
        let before = (player.shield_charge, player.shield_active, player.dash_charge);

        if !player.alive {
            player.shield_active = false;
            player.shield_requested = false;
        } else if player.shield_requested && player.shield_charge > 0.0 {
            player.shield_active = true;
            player.shield_charge = (player.shield_charge - step).max(0.0);
            if player.shield_charge <= 0.0 {
                player.shield_active = false;
            }
        } else {
            player.shield_active = false;
            player.shield_charge = (player.shield_charge + step * tuning.shield_recharge_factor)
                .min(tuning.shield_max_charge);
        }
        player.dash_charge =
            (player.dash_charge + step / tuning.dash_recharge_ms).min(tuning.dash_max_charges);

        let mut changed = 0;
        if before.0 != player.shield_charge || before.1 != player.shield_active {
            changed |= player_fields::SHIELD;
        }
        if before.2 != player.dash_charge {
            changed |= player_fields::DASH;
        }
        changed
    }

    /// Apply damage to health, returns (new_health, is_dead)
    pub fn apply_damage(current_health: f32, damage: f32) -> (f32, bool) {
        let new_health = (current_health - damage).max(0.0);
        (new_health, new_health <= 0.0)
    }

    /// Damage `target` with one bullet. Returns the changed field bits and
    /// whether the hit was lethal.
    pub fn apply_hit(target: &mut Player, now: u64, tuning: &Tuning) -> (u16, bool) {
        let (health, killed) = Self::apply_damage(target.health, tuning.damage_per_hit);
        target.health = health;
        if !killed {
            return (player_fields::HEALTH, false);
        }
        target.alive = false;
        target.shield_active = false;
        target.shield_requested = false;
        target.respawn_deadline = Some(now.saturating_add(tuning.respawn_window_ms));
        (player_fields::HEALTH | player_fields::STATUS | player_fields::SHIELD, true)
    }

    /// First player this bullet interacts with, in slot order. Reflection is
    /// checked before a plain hit for each candidate.
    pub fn resolve_bullet(
        bullet: &Bullet,
        players: &SlotArena<String, Player>,
        tuning: &Tuning,
    ) -> BulletOutcome {
        for (slot, id, player) in players.iter() {
            if !player.alive || *id == bullet.owner {
                continue;
            }
            let distance = PhysicsSystem::distance(player.x, player.y, bullet.x, bullet.y);
            if player.is_shielding()
                && distance < tuning.shield_radius
                && PhysicsSystem::within_arc(
                    player.x,
                    player.y,
                    player.angle,
                    bullet.x,
                    bullet.y,
                    tuning.shield_arc,
                )
            {
                return BulletOutcome::Reflected { target_slot: slot };
            }
            if distance < tuning.player_radius + tuning.bullet_radius {
                return BulletOutcome::Hit { target_slot: slot };
            }
        }
        BulletOutcome::Flying
    }

    /// Hand the bullet to the shield owner and send it back along their
    /// facing. Returns the changed player field bits.
    pub fn reflect(bullet: &mut Bullet, target: &mut Player, tuning: &Tuning) -> u16 {
        bullet.owner.clear();
        bullet.owner.push_str(&target.id);
        bullet.angle = target.angle;
        let offset = tuning.shield_radius + 6.0;
        bullet.x = target.x + target.angle.cos() * offset;
        bullet.y = target.y + target.angle.sin() * offset;

        target.shield_charge = (target.shield_charge - tuning.reflection_drain()).max(0.0);
        if target.shield_charge <= 0.0 {
            target.shield_active = false;
            target.shield_requested = false;
        }
        player_fields::SHIELD
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh(id: &str, x: f32, y: f32) -> Player {
        let mut p = Player::default();
        p.id.push_str(id);
        p.spawn(x, y, &Tuning::default());
        p
    }

    #[test]
    fn test_fire_interval() {
        let t = Tuning::default();
        let mut p = fresh("a", 100.0, 100.0);
        assert!(CombatSystem::check_fire(&mut p, 1000, &t).is_ok());
        CombatSystem::register_shot(&mut p, 1000, &t);
        assert_eq!(
            CombatSystem::check_fire(&mut p, 1050, &t),
            Err(ShotRejected::TooSoon)
        );
        assert!(CombatSystem::check_fire(&mut p, 1200, &t).is_ok());
    }

    #[test]
    fn test_shield_blocks_fire() {
        let t = Tuning::default();
        let mut p = fresh("a", 100.0, 100.0);
        p.shield_requested = true;
        assert_eq!(
            CombatSystem::check_fire(&mut p, 0, &t),
            Err(ShotRejected::Shielding)
        );
    }

    #[test]
    fn test_overheat_after_register() {
        let t = Tuning::default();
        let mut p = fresh("a", 100.0, 100.0);
        p.weapon_heat = 0.95;
        CombatSystem::register_shot(&mut p, 500, &t);
        assert_eq!(p.weapon_heat, 1.0);
        assert!(p.overheated);
        assert_eq!(p.recovered_at, 1700);
    }

    #[test]
    fn test_overheat_deadline_saturates() {
        let t = Tuning::default();
        let mut p = fresh("a", 100.0, 100.0);
        p.weapon_heat = 1.0;
        CombatSystem::register_shot(&mut p, u64::MAX - 10, &t);
        assert!(p.overheated);
        assert_eq!(p.recovered_at, u64::MAX);
    }

    #[test]
    fn test_full_heat_attempt_trips_lock() {
        let t = Tuning::default();
        let mut p = fresh("a", 100.0, 100.0);
        p.weapon_heat = 1.0;
        assert_eq!(
            CombatSystem::check_fire(&mut p, 100, &t),
            Err(ShotRejected::HeatMaxed)
        );
        assert!(p.overheated);
    }

    #[test]
    fn test_recovery_needs_both_conditions() {
        let t = Tuning::default();
        let mut p = fresh("a", 100.0, 100.0);
        p.overheated = true;
        p.recovered_at = 2000;
        p.weapon_heat = 0.1;
        CombatSystem::cool_weapon(&mut p, 1999, &t);
        assert!(p.overheated);
        CombatSystem::cool_weapon(&mut p, 2000, &t);
        assert!(!p.overheated);

        p.overheated = true;
        p.weapon_heat = 0.9;
        CombatSystem::cool_weapon(&mut p, 5000, &t);
        assert!(p.overheated);
    }

    #[test]
    fn test_shield_drain_and_recharge() {
        let t = Tuning::default();
        let mut p = fresh("a", 100.0, 100.0);
        p.shield_requested = true;
        let changed = CombatSystem::step_abilities(&mut p, &t);
        assert!(p.shield_active);
        assert!(changed & player_fields::SHIELD != 0);
        assert!((p.shield_charge - (5000.0 - t.step_ms())).abs() < 1e-2);

        p.shield_requested = false;
        let charge = p.shield_charge;
        CombatSystem::step_abilities(&mut p, &t);
        assert!(!p.shield_active);
        assert!(p.shield_charge > charge);
        assert!(p.shield_charge <= t.shield_max_charge);
    }

    #[test]
    fn test_shield_runs_dry() {
        let t = Tuning::default();
        let mut p = fresh("a", 100.0, 100.0);
        p.shield_requested = true;
        p.shield_charge = 10.0;
        CombatSystem::step_abilities(&mut p, &t);
        assert_eq!(p.shield_charge, 0.0);
        assert!(!p.shield_active);
    }

    #[test]
    fn test_dead_player_loses_shield_keeps_dash_regen() {
        let t = Tuning::default();
        let mut p = fresh("a", 100.0, 100.0);
        p.alive = false;
        p.shield_active = true;
        p.shield_requested = true;
        p.dash_charge = 0.0;
        CombatSystem::step_abilities(&mut p, &t);
        assert!(!p.shield_active && !p.shield_requested);
        assert!(p.dash_charge > 0.0);
    }

    #[test]
    fn test_apply_hit() {
        let t = Tuning::default();
        let mut p = fresh("a", 100.0, 100.0);
        p.health = 30.0;
        let (mask, killed) = CombatSystem::apply_hit(&mut p, 0, &t);
        assert!(!killed);
        assert_eq!(mask, player_fields::HEALTH);
        assert_eq!(p.health, 8.0);
        let (mask, killed) = CombatSystem::apply_hit(&mut p, 10, &t);
        assert!(killed);
        assert!(mask & player_fields::STATUS != 0);
        assert_eq!(p.health, 0.0);
        assert!(!p.alive);
        assert_eq!(p.respawn_deadline, Some(60_010));
    }

    #[test]
    fn test_reflect_reassigns_owner() {
        let t = Tuning::default();
        let mut target = fresh("b", 200.0, 200.0);
        target.angle = 1.0;
        target.shield_active = true;
        let mut bullet = Bullet {
            owner: "a".into(),
            angle: 3.0,
            ..Bullet::default()
        };
        CombatSystem::reflect(&mut bullet, &mut target, &t);
        assert_eq!(bullet.owner, "b");
        assert_eq!(bullet.angle, 1.0);
        assert_eq!(target.shield_charge, 4000.0);
        let d = PhysicsSystem::distance(200.0, 200.0, bullet.x, bullet.y);
        assert!((d - 40.0).abs() < 1e-3);
    }

    #[test]
    fn test_reflect_floors_at_zero() {
        let t = Tuning::default();
        let mut target = fresh("b", 200.0, 200.0);
        target.shield_active = true;
        target.shield_requested = true;
        target.shield_charge = 300.0;
        let mut bullet = Bullet::default();
        CombatSystem::reflect(&mut bullet, &mut target, &t);
        assert_eq!(target.shield_charge, 0.0);
        assert!(!target.shield_active && !target.shield_requested);
    }
}
