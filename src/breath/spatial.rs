//! Base positions of the voices and their breath-synced motion.
//! Poses are handed to the downstream mixer; voice identity never changes.

use std::f64::consts::{PI, TAU};

use crate::core::phase::raised_cosine;
use crate::core::vec3::Vec3;
use crate::engine::voice::VoiceKind;

pub const SHELL_RADIUS: f32 = 2.0;
const CORE_SPREAD_X: f32 = 0.35;
const CORE_FORWARD_Z: f32 = -1.0;
const CORE_WOBBLE: f64 = 0.08;
/// Radial swell of a shell voice at the top of the breath, as a fraction of its radius.
const SHELL_SWELL: f64 = 0.12;
const SHELL_ORBIT_RADIUS: f64 = 0.25;
const SHELL_ORBIT_RATE: f64 = 0.05;
const SHELL_ORBIT_RATE_STEP: f64 = 0.013;

/// Golden angle in radians.
pub fn golden_angle() -> f64 {
    PI * (3.0 - 5.0f64.sqrt())
}

/// Point `index` of `count` on a golden-angle (Fibonacci) sphere of radius `radius`.
/// Heights are offset by half a step so no point lands on a pole.
pub fn golden_sphere_point(index: usize, count: usize, radius: f32) -> Vec3 {
    let count = count.max(1);
    let y = 1.0 - 2.0 * (index as f64 + 0.5) / count as f64;
    let r = (1.0 - y * y).max(0.0).sqrt();
    let theta = index as f64 * golden_angle();
    let radius = radius as f64;
    Vec3::new(
        (r * theta.cos() * radius) as f32,
        (y * radius) as f32,
        (r * theta.sin() * radius) as f32,
    )
}

pub fn base_position(kind: VoiceKind) -> Vec3 {
    match kind {
        VoiceKind::LeftCore => Vec3::new(-CORE_SPREAD_X, 0.0, CORE_FORWARD_Z),
        VoiceKind::RightCore => Vec3::new(CORE_SPREAD_X, 0.0, CORE_FORWARD_Z),
        VoiceKind::Shell(i) => golden_sphere_point(i as usize, VoiceKind::SHELL_COUNT, SHELL_RADIUS),
    }
}

/// Ephemeral offset from `base` at the given breath phase and session time.
pub fn offset(kind: VoiceKind, base: Vec3, breath_phase: f64, elapsed_sec: f64) -> Vec3 {
    let breath_phase = if breath_phase.is_finite() { breath_phase } else { 0.0 };
    let elapsed_sec = if elapsed_sec.is_finite() { elapsed_sec } else { 0.0 };
    match kind {
        VoiceKind::LeftCore | VoiceKind::RightCore => {
            let side = if kind == VoiceKind::LeftCore { -1.0 } else { 1.0 };
            let dx = side * CORE_WOBBLE * (TAU * breath_phase).sin();
            Vec3::new(dx as f32, 0.0, 0.0)
        }
        VoiceKind::Shell(i) => {
            let i = i as f64;
            let swell = 1.0 + raised_cosine(breath_phase);
            let theta = (SHELL_ORBIT_RATE + SHELL_ORBIT_RATE_STEP * i) * elapsed_sec + i * golden_angle();
            let orbit = SHELL_ORBIT_RADIUS * swell;
            let radial = base * (SHELL_SWELL * raised_cosine(breath_phase)) as f32;
            radial + Vec3::new((orbit * theta.cos()) as f32, 0.0, (orbit * theta.sin()) as f32)
        }
    }
}

/// Instantaneous pose handed to the mixer.
pub fn pose(kind: VoiceKind, base: Vec3, breath_phase: f64, elapsed_sec: f64) -> Vec3 {
    base + offset(kind, base, breath_phase, elapsed_sec)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cores_sit_left_and_right_in_front() {
        let l = base_position(VoiceKind::LeftCore);
        let r = base_position(VoiceKind::RightCore);
        assert!(l.x < 0.0 && r.x > 0.0);
        assert!(l.z < 0.0 && r.z < 0.0);
        assert!(l.azimuth() < 0.0 && r.azimuth() > 0.0);
    }

    #[test]
    fn shells_cover_sphere_without_poles() {
        let points: Vec<Vec3> = (0..VoiceKind::SHELL_COUNT as u8)
            .map(|i| base_position(VoiceKind::Shell(i)))
            .collect();
        for p in &points {
            assert!((p.length() - SHELL_RADIUS).abs() < 1e-4);
            assert!(p.y.abs() < SHELL_RADIUS * 0.99, "point at pole: {p:?}");
        }
        for (i, a) in points.iter().enumerate() {
            for b in points.iter().skip(i + 1) {
                assert!((*a - *b).length() > 0.5, "shell points too close");
            }
        }
    }

    #[test]
    fn core_wobble_is_mirrored_on_x() {
        let base = base_position(VoiceKind::LeftCore);
        let l = offset(VoiceKind::LeftCore, base, 0.25, 3.0);
        let r = offset(VoiceKind::RightCore, base, 0.25, 3.0);
        assert!((l.x + r.x).abs() < 1e-7);
        assert_eq!(l.y, 0.0);
        assert_eq!(l.z, 0.0);
        assert!(l.x.abs() > 0.0);
    }

    #[test]
    fn shell_offset_is_bounded_and_finite() {
        for i in 0..VoiceKind::SHELL_COUNT as u8 {
            let kind = VoiceKind::Shell(i);
            let base = base_position(kind);
            for step in 0..50 {
                let phase = step as f64 / 50.0;
                let o = offset(kind, base, phase, step as f64 * 0.7);
                assert!(o.is_finite());
                let bound = SHELL_RADIUS * SHELL_SWELL as f32 + 2.0 * SHELL_ORBIT_RADIUS as f32;
                assert!(o.length() <= bound + 1e-4);
            }
        }
    }

    #[test]
    fn pose_is_base_plus_offset() {
        let kind = VoiceKind::Shell(4);
        let base = base_position(kind);
        let p = pose(kind, base, 0.5, 10.0);
        let o = offset(kind, base, 0.5, 10.0);
        assert_eq!(p, base + o);
        assert!(offset(kind, base, f64::NAN, f64::NAN).is_finite());
    }
}
