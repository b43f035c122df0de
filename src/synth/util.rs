//! Small DSP helpers (denorm flush for audio-rate values).

const DENORM_THRESH: f32 = 1.0e-20;

/// Flush denormals and non-finite values to zero.
#[inline(always)]
pub fn flush_denorm(x: f32) -> f32 {
    if !x.is_finite() || x.abs() < DENORM_THRESH {
        0.0
    } else {
        x
    }
}

/// One-pole smoothing coefficient for a step of `dt` seconds towards a target
/// with time constant `tau` seconds. Returns 1.0 (jump) when `tau` is not positive.
#[inline]
pub fn one_pole_alpha(dt: f64, tau: f64) -> f64 {
    if !dt.is_finite() || dt <= 0.0 {
        return 0.0;
    }
    if !tau.is_finite() || tau <= 0.0 {
        return 1.0;
    }
    1.0 - (-dt / tau).exp()
}
