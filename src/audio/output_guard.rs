//! Final safety stage: whatever arrives, nothing above the ceiling leaves.

use std::env;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

/// Default output ceiling (fraction of full scale).
pub const OUTPUT_CEILING: f32 = 0.88;

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum OutputGuardMode {
    None,
    /// tanh saturation scaled to the ceiling.
    SoftClip { ceiling: f32, drive: f32 },
    /// Channel-linked peak limiter with a hard clamp behind it.
    PeakLimiter {
        ceiling: f32,
        attack_ms: f32,
        release_ms: f32,
    },
}

impl Default for OutputGuardMode {
    fn default() -> Self {
        Self::peak_limiter(OUTPUT_CEILING)
    }
}

impl OutputGuardMode {
    pub fn soft_clip(ceiling: f32) -> Self {
        Self::SoftClip {
            ceiling,
            drive: 1.5,
        }
    }

    pub fn peak_limiter(ceiling: f32) -> Self {
        Self::PeakLimiter {
            ceiling,
            attack_ms: 0.5,
            release_ms: 80.0,
        }
    }

    /// `BREATHSCAPE_OUTPUT_GUARD=none|soft|limiter` overrides the configured mode.
    pub fn from_env_or(self) -> Self {
        let Ok(value) = env::var("BREATHSCAPE_OUTPUT_GUARD") else {
            return self;
        };
        let ceiling = self.ceiling();
        match value.trim().to_ascii_lowercase().as_str() {
            "none" | "off" | "0" => Self::None,
            "soft" | "softclip" => Self::soft_clip(ceiling),
            "limiter" | "peak" => Self::peak_limiter(ceiling),
            _ => self,
        }
    }

    pub fn ceiling(&self) -> f32 {
        match *self {
            Self::None => 1.0,
            Self::SoftClip { ceiling, .. } | Self::PeakLimiter { ceiling, .. } => {
                ceiling.abs().clamp(1e-6, 1.0)
            }
        }
    }
}

/// Largest gain reduction seen since the last `take`, readable from any thread.
#[derive(Debug, Default)]
pub struct GuardMeter {
    engaged: AtomicU64,
    max_reduction_db_bits: AtomicU32,
}

impl GuardMeter {
    fn record(&self, reduction_db: f32) {
        if reduction_db <= 0.0 {
            return;
        }
        self.engaged.fetch_add(1, Ordering::Relaxed);
        let _ = self
            .max_reduction_db_bits
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |bits| {
                (reduction_db > f32::from_bits(bits)).then_some(reduction_db.to_bits())
            });
    }

    /// Returns (blocks engaged, max reduction in dB) and resets.
    pub fn take(&self) -> Option<(u64, f32)> {
        let engaged = self.engaged.swap(0, Ordering::Relaxed);
        if engaged == 0 {
            return None;
        }
        let db = f32::from_bits(self.max_reduction_db_bits.swap(0, Ordering::Relaxed));
        Some((engaged, db))
    }
}

#[derive(Debug)]
pub struct OutputGuard {
    mode: OutputGuardMode,
    gain: f32,
    attack_coeff: f32,
    release_coeff: f32,
    meter: Option<std::sync::Arc<GuardMeter>>,
}

impl OutputGuard {
    pub fn new(mode: OutputGuardMode, sample_rate: u32) -> Self {
        let fs = (sample_rate as f32).max(1.0);
        let (attack_coeff, release_coeff) = match mode {
            OutputGuardMode::PeakLimiter {
                attack_ms,
                release_ms,
                ..
            } => (time_to_coeff(attack_ms, fs), time_to_coeff(release_ms, fs)),
            _ => (0.0, 0.0),
        };
        Self {
            mode,
            gain: 1.0,
            attack_coeff,
            release_coeff,
            meter: None,
        }
    }

    pub fn with_meter(mut self, meter: std::sync::Arc<GuardMeter>) -> Self {
        self.meter = Some(meter);
        self
    }

    /// Process interleaved frames in place. Non-finite samples become silence.
    pub fn process_interleaved(&mut self, frames: &mut [f32], channels: usize) {
        if frames.is_empty() || channels == 0 {
            return;
        }
        let ceiling = self.mode.ceiling();
        let mut min_ratio = 1.0f32;
        match self.mode {
            OutputGuardMode::None => {
                for s in frames.iter_mut() {
                    if !s.is_finite() {
                        *s = 0.0;
                    }
                }
            }
            OutputGuardMode::SoftClip { drive, .. } => {
                let drive = drive.max(1e-3);
                let norm = drive.tanh();
                for s in frames.iter_mut() {
                    let x = if s.is_finite() { *s } else { 0.0 };
                    let y = (x / ceiling * drive).tanh() / norm * ceiling;
                    let y = y.clamp(-ceiling, ceiling);
                    if x.abs() > 1e-12 {
                        min_ratio = min_ratio.min((y / x).abs());
                    }
                    *s = y;
                }
            }
            OutputGuardMode::PeakLimiter { .. } => {
                for frame in frames.chunks_mut(channels) {
                    let peak = frame
                        .iter()
                        .map(|x| if x.is_finite() { x.abs() } else { 0.0 })
                        .fold(0.0f32, f32::max);
                    let target = if peak > ceiling { ceiling / peak } else { 1.0 };
                    let coeff = if target < self.gain {
                        self.attack_coeff
                    } else {
                        self.release_coeff
                    };
                    self.gain = coeff * self.gain + (1.0 - coeff) * target;
                    for s in frame.iter_mut() {
                        let x = if s.is_finite() { *s } else { 0.0 };
                        *s = (x * self.gain).clamp(-ceiling, ceiling);
                    }
                    if peak > 1e-12 {
                        let out_peak = (peak * self.gain).min(ceiling);
                        min_ratio = min_ratio.min(out_peak / peak);
                    }
                }
            }
        }
        if let Some(meter) = self.meter.as_ref() {
            if min_ratio < 1.0 && min_ratio > 0.0 {
                meter.record(-20.0 * min_ratio.log10());
            }
        }
    }
}

fn time_to_coeff(time_ms: f32, fs: f32) -> f32 {
    let time_s = time_ms.max(0.0) * 0.001;
    if time_s <= 0.0 {
        0.0
    } else {
        (-1.0 / (time_s * fs)).exp()
    }
}
