//! Fibonacci overtone/undertone banks (Hz, unit gain).
//! overtone = f*n*drift (below Nyquist), undertone = f/n*drift (above 20 Hz)

use rand::Rng;

use crate::synth::SynthError;
use crate::synth::normalize::AMPLITUDE_FLOOR;
use crate::synth::oscillator::Oscillator;

/// Number of Fibonacci terms considered per bank.
pub const FIBONACCI_TERMS: usize = 21;
/// Undertones at or below this frequency are dropped.
pub const MIN_UNDERTONE_HZ: f64 = 20.0;
/// Energy budget of one voice before global normalization.
pub const PER_VOICE_BUDGET: f32 = 0.12;
/// Amplitude factor of shell voices relative to core voices.
pub const SHELL_GAIN: f32 = 0.75;
/// Maximum shell detune (+/- fraction of the base frequency).
pub const SHELL_DETUNE: f64 = 0.005;

const INV_PHI: f64 = 0.618_033_988_749_894_8;
const DRIFT_PPM_MIN: f64 = 1.0;
const DRIFT_PPM_MAX: f64 = 5.0;

/// Where a bank sits in the voice layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BankShape {
    Core,
    Shell { index: usize, count: usize },
}

#[derive(Debug, Clone, Copy)]
pub struct BankParams {
    pub base_hz: f64,
    pub gain_scale: f32,
    /// +1.0 or -1.0; sets which way the per-voice ppm drift leans.
    pub drift_sign: f64,
    pub sample_rate: f32,
    pub shape: BankShape,
}

/// Distinct Fibonacci numbers among the first `k` terms (1, 2, 3, 5, ...).
pub fn fibonacci(k: usize) -> Vec<u64> {
    let mut out: Vec<u64> = Vec::with_capacity(k);
    let (mut a, mut b) = (1u64, 1u64);
    for _ in 0..k {
        if out.last() != Some(&a) {
            out.push(a);
        }
        let next = a.saturating_add(b);
        a = b;
        b = next;
    }
    out
}

/// Detune factor for a shell voice, spread linearly over +/- `SHELL_DETUNE`.
pub fn shell_detune(index: usize, count: usize) -> f64 {
    if count <= 1 {
        return 1.0;
    }
    let spread = 2.0 * index.min(count - 1) as f64 / (count - 1) as f64 - 1.0;
    1.0 + SHELL_DETUNE * spread
}

/// Build one voice's oscillator bank.
///
/// The drift jitter and every oscillator phase are drawn from `rng`, so a seeded
/// generator reproduces the same bank. A non-positive base frequency yields an empty bank.
pub fn build_bank<R: Rng + ?Sized>(
    params: &BankParams,
    rng: &mut R,
) -> Result<Vec<Oscillator>, SynthError> {
    let fs = params.sample_rate;
    if !fs.is_finite() || fs <= 0.0 {
        return Err(SynthError::InvalidSampleRate(fs));
    }
    if !params.base_hz.is_finite() || params.base_hz <= 0.0 {
        return Ok(Vec::new());
    }

    let drift_ppm = rng.random_range(DRIFT_PPM_MIN..DRIFT_PPM_MAX);
    let sign = if params.drift_sign < 0.0 { -1.0 } else { 1.0 };
    let drift = 1.0 + sign * drift_ppm * 1e-6;

    let (detune, shape_gain) = match params.shape {
        BankShape::Core => (1.0, 1.0),
        BankShape::Shell { index, count } => (shell_detune(index, count), SHELL_GAIN),
    };
    let f = params.base_hz * detune;
    let nyquist = fs as f64 * 0.5;

    let mut overtones: Vec<(f64, f64)> = Vec::new();
    let mut undertones: Vec<(f64, f64)> = Vec::new();
    let mut weight = 1.0f64;
    for n in fibonacci(FIBONACCI_TERMS) {
        let n = n as f64;
        let over = f * n * drift;
        if over < nyquist {
            overtones.push((over, weight));
        }
        // n = 1 is the fundamental, already on the overtone side.
        if n > 1.0 {
            let under = f / n * drift;
            if under > MIN_UNDERTONE_HZ {
                undertones.push((under, weight));
            }
        }
        weight *= INV_PHI;
    }

    let side_gain = (PER_VOICE_BUDGET * 0.5 * params.gain_scale.max(0.0) * shape_gain) as f64;
    let mut bank = Vec::with_capacity(overtones.len() + undertones.len());
    for side in [&overtones, &undertones] {
        let total: f64 = side.iter().map(|(_, w)| w).sum();
        if total <= 0.0 {
            continue;
        }
        for &(freq, w) in side.iter() {
            let amp = ((w / total) * side_gain) as f32;
            let phase = rng.random::<f64>();
            bank.push(Oscillator::new(freq, amp.max(AMPLITUDE_FLOOR), phase));
        }
    }
    Ok(bank)
}
