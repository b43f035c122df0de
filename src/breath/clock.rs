//! Local breath clock with alignment to, and drift correction towards, an
//! authoritative external breath time.

use std::ops::Range;

use crate::core::phase::{cycle_diff, wrap_unit};

/// Nominal breath period in seconds.
pub const NOMINAL_BREATH_SEC: f64 = 5.236;
/// Default bound on how far the local period may drift from nominal.
pub const DEFAULT_MAX_DRIFT_PPM: f64 = 500.0;
/// Breaths between relocks.
pub const RELOCK_EVERY: u32 = 19;

/// One reading of the external clock, stamped with local session time
/// (midpoint of the request).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExternalSample {
    pub breath_time_sec: f64,
    pub local_time_sec: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ClockCorrection {
    /// Initial alignment: fractional breath phase moved by `shift` cycles.
    Aligned { shift: f64 },
    /// Period glide started towards `target_period` to absorb `error` cycles.
    Relocked { error: f64, target_period: f64 },
    /// Sample was not usable (non-finite).
    Ignored,
}

#[derive(Debug, Clone, Copy)]
struct PeriodGlide {
    from: f64,
    to: f64,
    elapsed: f64,
    duration: f64,
}

#[derive(Debug, Clone)]
pub struct ClockReference {
    nominal: f64,
    period: f64,
    max_ppm: f64,
    relock_breaths: u32,
    breaths: f64,
    local_time: f64,
    anchor_sec: f64,
    last_external: Option<ExternalSample>,
    aligned: bool,
    glide: Option<PeriodGlide>,
}

impl ClockReference {
    pub fn new(nominal_sec: f64, max_ppm: f64, relock_breaths: u32) -> Self {
        let nominal = if nominal_sec.is_finite() && nominal_sec > 0.0 {
            nominal_sec
        } else {
            NOMINAL_BREATH_SEC
        };
        Self {
            nominal,
            period: nominal,
            max_ppm: if max_ppm.is_finite() { max_ppm.max(0.0) } else { DEFAULT_MAX_DRIFT_PPM },
            relock_breaths: relock_breaths.max(1),
            breaths: 0.0,
            local_time: 0.0,
            anchor_sec: 0.0,
            last_external: None,
            aligned: false,
            glide: None,
        }
    }

    pub fn nominal(&self) -> f64 {
        self.nominal
    }

    /// Current local breath period in seconds.
    pub fn period(&self) -> f64 {
        self.period
    }

    /// Breath phase in [0, 1).
    pub fn phase(&self) -> f64 {
        wrap_unit(self.breaths)
    }

    /// Index of the breath in progress (0 during the first breath).
    pub fn breath_index(&self) -> u64 {
        self.breaths.floor().max(0.0) as u64
    }

    /// Session time in seconds as seen by the clock.
    pub fn local_time(&self) -> f64 {
        self.local_time
    }

    /// Session time at which the current breath began.
    pub fn anchor_sec(&self) -> f64 {
        self.anchor_sec
    }

    pub fn last_external(&self) -> Option<ExternalSample> {
        self.last_external
    }

    pub fn is_aligned(&self) -> bool {
        self.aligned
    }

    pub fn is_gliding(&self) -> bool {
        self.glide.is_some()
    }

    /// Allowed period range around nominal.
    pub fn period_bounds(&self) -> (f64, f64) {
        let tol = self.max_ppm * 1e-6;
        (self.nominal * (1.0 - tol), self.nominal * (1.0 + tol))
    }

    /// Advance by `dt` seconds; returns the indices of breath boundaries crossed.
    pub fn advance(&mut self, dt: f64) -> Range<u64> {
        let before = self.breath_index();
        if !dt.is_finite() || dt <= 0.0 {
            return before + 1..before + 1;
        }
        if let Some(glide) = self.glide.as_mut() {
            glide.elapsed += dt;
            let t = (glide.elapsed / glide.duration).clamp(0.0, 1.0);
            self.period = glide.from + (glide.to - glide.from) * t;
            if t >= 1.0 {
                self.period = glide.to;
                self.glide = None;
            }
        }
        self.local_time += dt;
        self.breaths += dt / self.period;
        let after = self.breath_index();
        if after > before {
            self.anchor_sec = self.local_time - self.phase() * self.period;
        }
        before + 1..after + 1
    }

    /// Phase of the external clock, extrapolated from `sample` to the current local time.
    pub fn external_phase(&self, sample: &ExternalSample) -> f64 {
        let elapsed = self.local_time - sample.local_time_sec;
        wrap_unit((sample.breath_time_sec + elapsed) / self.nominal)
    }

    /// Snap the fractional phase to the external clock. Boundaries are not emitted
    /// for the shift, so the breath index is preserved.
    pub fn align(&mut self, sample: ExternalSample) -> ClockCorrection {
        if !sample.breath_time_sec.is_finite() || !sample.local_time_sec.is_finite() {
            return ClockCorrection::Ignored;
        }
        let target = self.external_phase(&sample);
        let shift = target - self.phase();
        self.breaths = self.breaths.floor().max(0.0) + target;
        self.anchor_sec = self.local_time - target * self.period;
        self.last_external = Some(sample);
        self.aligned = true;
        ClockCorrection::Aligned { shift }
    }

    /// Set the period to nominal corrected by a 1/N-breath share of the phase
    /// error, clamped to the ppm band, and glide to it over one breath. The target
    /// is taken from nominal, not from the current period, so a settled clock
    /// returns to nominal.
    pub fn relock(&mut self, sample: ExternalSample) -> ClockCorrection {
        if !sample.breath_time_sec.is_finite() || !sample.local_time_sec.is_finite() {
            return ClockCorrection::Ignored;
        }
        let error = cycle_diff(self.external_phase(&sample), self.phase());
        let (lo, hi) = self.period_bounds();
        let target = (self.nominal * (1.0 - error / self.relock_breaths as f64)).clamp(lo, hi);
        self.glide = Some(PeriodGlide {
            from: self.period,
            to: target,
            elapsed: 0.0,
            duration: self.period,
        });
        self.last_external = Some(sample);
        ClockCorrection::Relocked {
            error,
            target_period: target,
        }
    }
}
