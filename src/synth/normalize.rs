//! Global energy budget across every voice's bank.

use crate::synth::oscillator::Oscillator;

/// Minimum amplitude of any oscillator (keeps gains out of the subnormal range).
pub const AMPLITUDE_FLOOR: f32 = 1.0e-6;
/// Upper bound on the summed amplitude of all oscillators in a session.
pub const MAX_TOTAL_GAIN: f32 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NormalizeReport {
    pub sum_before: f64,
    pub sum_after: f64,
    pub scale: f32,
}

/// Floor every amplitude, then rescale all banks together if their summed
/// amplitude exceeds `max_total`. Runs once per rebuild, never per sample.
pub fn normalize_energy(banks: &mut [&mut [Oscillator]], max_total: f32) -> NormalizeReport {
    let mut sum_before = 0.0f64;
    for bank in banks.iter_mut() {
        for osc in bank.iter_mut() {
            if !osc.amplitude.is_finite() || osc.amplitude < AMPLITUDE_FLOOR {
                osc.amplitude = AMPLITUDE_FLOOR;
            }
            sum_before += osc.amplitude as f64;
        }
    }

    let max_total = max_total.max(AMPLITUDE_FLOOR);
    let scale = if sum_before > max_total as f64 {
        (max_total as f64 / sum_before) as f32
    } else {
        1.0
    };

    let mut sum_after = 0.0f64;
    for bank in banks.iter_mut() {
        for osc in bank.iter_mut() {
            if scale < 1.0 {
                osc.amplitude = (osc.amplitude * scale).max(AMPLITUDE_FLOOR);
            }
            sum_after += osc.amplitude as f64;
        }
    }

    NormalizeReport {
        sum_before,
        sum_after,
        scale,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bank(amps: &[f32]) -> Vec<Oscillator> {
        amps.iter()
            .enumerate()
            .map(|(i, &a)| Oscillator::new(100.0 * (i + 1) as f64, a, 0.0))
            .collect()
    }

    #[test]
    fn under_budget_is_untouched() {
        let mut a = bank(&[0.1, 0.2]);
        let mut b = bank(&[0.3]);
        let report = normalize_energy(&mut [a.as_mut_slice(), b.as_mut_slice()], 1.0);
        assert_eq!(report.scale, 1.0);
        assert!((report.sum_after - 0.6).abs() < 1e-6);
        assert_eq!(a[1].amplitude, 0.2);
    }

    #[test]
    fn over_budget_is_scaled_to_max() {
        let mut a = bank(&[0.8, 0.6]);
        let mut b = bank(&[0.6]);
        let report = normalize_energy(&mut [a.as_mut_slice(), b.as_mut_slice()], 1.0);
        assert!((report.sum_before - 2.0).abs() < 1e-6);
        assert!((report.scale - 0.5).abs() < 1e-6);
        assert!(report.sum_after <= 1.0 + 1e-5);
        assert!((b[0].amplitude - 0.3).abs() < 1e-6);
    }

    #[test]
    fn zero_and_nan_amplitudes_get_the_floor() {
        let mut a = bank(&[0.0, f32::NAN, -0.5]);
        normalize_energy(&mut [a.as_mut_slice()], 1.0);
        for osc in &a {
            assert_eq!(osc.amplitude, AMPLITUDE_FLOOR);
        }
    }

    #[test]
    fn floor_survives_rescale() {
        let mut a = bank(&[5.0, 2.0e-6]);
        normalize_energy(&mut [a.as_mut_slice()], 1.0);
        assert!(a[1].amplitude >= AMPLITUDE_FLOOR);
    }
}
