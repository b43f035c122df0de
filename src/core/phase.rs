use std::f64::consts::TAU;

/// Wrap a cycle phase into [0, 1).
#[inline]
pub fn wrap_unit(x: f64) -> f64 {
    let w = x.rem_euclid(1.0);
    // rem_euclid can round up to exactly 1.0 for tiny negative inputs.
    if w >= 1.0 { 0.0 } else { w }
}

/// Normalize a cycle difference to the range [-0.5, 0.5).
#[inline]
pub fn wrap_half(x: f64) -> f64 {
    wrap_unit(x + 0.5) - 0.5
}

#[inline]
pub fn cycle_diff(a: f64, b: f64) -> f64 {
    wrap_half(a - b)
}

/// Raised cosine over one cycle: 0 at phase 0, 1 at phase 0.5.
#[inline]
pub fn raised_cosine(phase: f64) -> f64 {
    0.5 * (1.0 - (TAU * phase).cos())
}

/// Cubic smoothstep on [0, 1]; inputs outside are clamped.
#[inline]
pub fn smoothstep(x: f64) -> f64 {
    let x = x.clamp(0.0, 1.0);
    x * x * (3.0 - 2.0 * x)
}
