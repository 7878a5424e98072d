//! Arena geometry: clamping, dashes, bullet travel and shield arcs

use rand::Rng;
use std::f32::consts::{PI, TAU};

use super::tuning::Tuning;

/// Physics helpers shared by command handling and the tick
pub struct PhysicsSystem;

impl PhysicsSystem {
    /// Clamp a player centre to the arena, keeping the whole hull inside
    pub fn clamp_position(x: f32, y: f32, tuning: &Tuning) -> (f32, f32) {
        let r = tuning.player_radius;
        (
            x.clamp(r, tuning.width - r),
            y.clamp(r, tuning.height - r),
        )
    }

    /// Unit vector from `from` to `to`, or `None` when they coincide
    pub fn direction(from: (f32, f32), to: (f32, f32)) -> Option<(f32, f32)> {
        let dx = to.0 - from.0;
        let dy = to.1 - from.1;
        let len = dx.hypot(dy);
        if len > 0.0 && len.is_finite() {
            Some((dx / len, dy / len))
        } else {
            None
        }
    }

    /// Normalized dash direction. A zero request falls back to the last
    /// movement direction, then to the facing angle.
    pub fn dash_direction(requested: (f32, f32), last_move: (f32, f32), angle: f32) -> (f32, f32) {
        let normalize = |(x, y): (f32, f32)| {
            let len = x.hypot(y);
            (len > 0.0 && len.is_finite()).then(|| (x / len, y / len))
        };
        normalize(requested)
            .or_else(|| normalize(last_move))
            .unwrap_or((angle.cos(), angle.sin()))
    }

    /// Dash end point, clamped to the arena
    pub fn dash_target(x: f32, y: f32, dir: (f32, f32), tuning: &Tuning) -> (f32, f32) {
        Self::clamp_position(
            x + dir.0 * tuning.dash_distance,
            y + dir.1 * tuning.dash_distance,
            tuning,
        )
    }

    /// Move a bullet one tick along its angle
    pub fn advance_bullet(x: f32, y: f32, angle: f32, tuning: &Tuning) -> (f32, f32) {
        (
            x + angle.cos() * tuning.bullet_speed,
            y + angle.sin() * tuning.bullet_speed,
        )
    }

    pub fn out_of_bounds(x: f32, y: f32, tuning: &Tuning) -> bool {
        x < 0.0 || x > tuning.width || y < 0.0 || y > tuning.height
    }

    pub fn distance(x1: f32, y1: f32, x2: f32, y2: f32) -> f32 {
        (x2 - x1).hypot(y2 - y1)
    }

    /// Wrap an angle into `[-π, π)`
    pub fn normalize_angle(angle: f32) -> f32 {
        (angle + PI).rem_euclid(TAU) - PI
    }

    /// Whether the point `(px, py)` lies inside the arc centred on `facing`
    /// as seen from `(cx, cy)`
    pub fn within_arc(cx: f32, cy: f32, facing: f32, px: f32, py: f32, arc: f32) -> bool {
        let to_point = (py - cy).atan2(px - cx);
        Self::normalize_angle(facing - to_point).abs() <= arc / 2.0
    }

    /// Uniform spawn point at least two radii from every wall
    pub fn random_spawn<R: Rng + ?Sized>(rng: &mut R, tuning: &Tuning) -> (f32, f32) {
        let margin = tuning.player_radius * 2.0;
        let x = margin + rng.gen::<f32>() * (tuning.width - margin * 2.0);
        let y = margin + rng.gen::<f32>() * (tuning.height - margin * 2.0);
        (x, y)
    }
}
