//! Gameplay constants
//!
//! Every threshold the simulation reads lives here so a deployment can
//! override any of them from a JSON file (see `CROSSLINE_TUNING_FILE`).

use serde::Deserialize;
use std::f32::consts::PI;
use thiserror::Error;

use crate::util::time::step_millis;

/// Upper bound for every millisecond setting (one day)
pub const MAX_DURATION_MS: u64 = 86_400_000;

#[derive(Debug, Error, PartialEq)]
pub enum TuningError {
    #[error("{0} must be positive")]
    NotPositive(&'static str),

    #[error("heat_safe_ratio must be within [0, 1), got {0}")]
    SafeRatioOutOfRange(f32),

    #[error("shield_reflection_drain must be within [0, 1], got {0}")]
    DrainOutOfRange(f32),

    #[error("{name} must be at most 86400000 ms, got {value}")]
    DurationTooLong { name: &'static str, value: u64 },

    #[error("arena {width}x{height} is too small for player radius {radius}")]
    ArenaTooSmall { width: f32, height: f32, radius: f32 },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Tuning {
    pub width: f32,
    pub height: f32,
    pub player_radius: f32,
    pub bullet_radius: f32,
    /// Pixels travelled per tick
    pub bullet_speed: f32,
    pub max_health: f32,
    pub damage_per_hit: f32,
    pub tick_rate: u32,

    pub move_throttle_ms: u64,
    pub min_shot_interval_ms: u64,

    /// Charge is measured in milliseconds of active shielding
    pub shield_max_charge: f32,
    pub shield_recharge_factor: f32,
    /// Full angular width of the reflecting arc (radians)
    pub shield_arc: f32,
    pub shield_radius: f32,
    /// Fraction of max charge removed per reflected bullet
    pub shield_reflection_drain: f32,

    pub dash_max_charges: f32,
    pub dash_recharge_ms: f32,
    pub dash_distance: f32,

    pub heat_per_shot: f32,
    /// Heat removed per millisecond
    pub heat_cooldown_rate: f32,
    pub heat_safe_ratio: f32,
    pub overheat_penalty_ms: u64,

    pub respawn_window_ms: u64,
    pub broadcast_interval_ms: u64,
}

impl Default for Tuning {
    fn default() -> Self {
        Self {
            width: 960.0,
            height: 540.0,
            player_radius: 16.0,
            bullet_radius: 4.0,
            bullet_speed: 9.0,
            max_health: 100.0,
            damage_per_hit: 22.0,
            tick_rate: 30,
            move_throttle_ms: 16,
            min_shot_interval_ms: 200,
            shield_max_charge: 5000.0,
            shield_recharge_factor: 0.5,
            shield_arc: PI * 2.0 / 3.0,
            shield_radius: 34.0,
            shield_reflection_drain: 0.2,
            dash_max_charges: 2.0,
            dash_recharge_ms: 2500.0,
            dash_distance: 160.0,
            heat_per_shot: 0.12,
            heat_cooldown_rate: 0.00035,
            heat_safe_ratio: 0.35,
            overheat_penalty_ms: 1200,
            respawn_window_ms: 60_000,
            broadcast_interval_ms: 50,
        }
    }
}

impl Tuning {
    /// Simulated milliseconds per tick
    pub fn step_ms(&self) -> f32 {
        step_millis(self.tick_rate)
    }

    /// Shield charge removed by one reflection
    pub fn reflection_drain(&self) -> f32 {
        self.shield_max_charge * self.shield_reflection_drain
    }

    pub fn validate(&self) -> Result<(), TuningError> {
        let positive = [
            ("width", self.width),
            ("height", self.height),
            ("player_radius", self.player_radius),
            ("bullet_radius", self.bullet_radius),
            ("bullet_speed", self.bullet_speed),
            ("max_health", self.max_health),
            ("damage_per_hit", self.damage_per_hit),
            ("shield_max_charge", self.shield_max_charge),
            ("shield_arc", self.shield_arc),
            ("shield_radius", self.shield_radius),
            ("dash_max_charges", self.dash_max_charges),
            ("dash_recharge_ms", self.dash_recharge_ms),
            ("shield_recharge_factor", self.shield_recharge_factor),
            ("dash_distance", self.dash_distance),
            ("heat_per_shot", self.heat_per_shot),
            ("heat_cooldown_rate", self.heat_cooldown_rate),
        ];
        for (name, value) in positive {
            if !(value.is_finite() && value > 0.0) {
                return Err(TuningError::NotPositive(name));
            }
        }
        if self.tick_rate == 0 {
            return Err(TuningError::NotPositive("tick_rate"));
        }
        if self.broadcast_interval_ms == 0 {
            return Err(TuningError::NotPositive("broadcast_interval_ms"));
        }
        let durations = [
            ("move_throttle_ms", self.move_throttle_ms),
            ("min_shot_interval_ms", self.min_shot_interval_ms),
            ("overheat_penalty_ms", self.overheat_penalty_ms),
            ("respawn_window_ms", self.respawn_window_ms),
            ("broadcast_interval_ms", self.broadcast_interval_ms),
        ];
        for (name, value) in durations {
            if value > MAX_DURATION_MS {
                return Err(TuningError::DurationTooLong { name, value });
            }
        }
        if !(0.0..=1.0).contains(&self.shield_reflection_drain) {
            return Err(TuningError::DrainOutOfRange(self.shield_reflection_drain));
        }
        if !(0.0..1.0).contains(&self.heat_safe_ratio) {
            return Err(TuningError::SafeRatioOutOfRange(self.heat_safe_ratio));
        }
        if self.width <= self.player_radius * 4.0 || self.height <= self.player_radius * 4.0 {
            return Err(TuningError::ArenaTooSmall {
                width: self.width,
                height: self.height,
                radius: self.player_radius,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let tuning = Tuning::default();
        assert!(tuning.validate().is_ok());
        assert!((tuning.reflection_drain() - 1000.0).abs() < f32::EPSILON);
    }

    #[test]
    fn test_partial_json_override() {
        let tuning: Tuning =
            serde_json::from_str(r#"{ "shield_max_charge": 3334, "dash_distance": 136 }"#).unwrap();
        assert_eq!(tuning.shield_max_charge, 3334.0);
        assert_eq!(tuning.dash_distance, 136.0);
        assert_eq!(tuning.width, 960.0);
    }

    #[test]
    fn test_rejects_bad_values() {
        let tuning = Tuning {
            tick_rate: 0,
            ..Tuning::default()
        };
        assert_eq!(tuning.validate(), Err(TuningError::NotPositive("tick_rate")));

        let tuning = Tuning {
            heat_safe_ratio: 1.0,
            ..Tuning::default()
        };
        assert!(matches!(
            tuning.validate(),
            Err(TuningError::SafeRatioOutOfRange(_))
        ));

        let tuning = Tuning {
            heat_cooldown_rate: -0.01,
            ..Tuning::default()
        };
        assert_eq!(
            tuning.validate(),
            Err(TuningError::NotPositive("heat_cooldown_rate"))
        );

        let tuning = Tuning {
            shield_recharge_factor: -1.0,
            ..Tuning::default()
        };
        assert_eq!(
            tuning.validate(),
            Err(TuningError::NotPositive("shield_recharge_factor"))
        );

        let tuning = Tuning {
            dash_distance: 0.0,
            ..Tuning::default()
        };
        assert_eq!(tuning.validate(), Err(TuningError::NotPositive("dash_distance")));

        for drain in [-0.5, 1.5, f32::NAN] {
            let tuning = Tuning {
                shield_reflection_drain: drain,
                ..Tuning::default()
            };
            assert!(matches!(
                tuning.validate(),
                Err(TuningError::DrainOutOfRange(_))
            ));
        }

        let tuning = Tuning {
            overheat_penalty_ms: u64::MAX,
            ..Tuning::default()
        };
        assert_eq!(
            tuning.validate(),
            Err(TuningError::DurationTooLong {
                name: "overheat_penalty_ms",
                value: u64::MAX,
            })
        );

        let tuning = Tuning {
            width: 40.0,
            ..Tuning::default()
        };
        assert!(matches!(tuning.validate(), Err(TuningError::ArenaTooSmall { .. })));
    }
}
