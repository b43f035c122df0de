use std::f64::consts::TAU;

/// One sine partial. Phase is in cycles, kept in [0, 1).
#[derive(Debug, Clone, PartialEq)]
pub struct Oscillator {
    pub frequency_hz: f64,
    pub amplitude: f32,
    pub phase: f64,
}

impl Oscillator {
    pub fn new(frequency_hz: f64, amplitude: f32, phase: f64) -> Self {
        Self {
            frequency_hz,
            amplitude,
            phase: crate::core::phase::wrap_unit(phase),
        }
    }

    /// Output the current sample and advance the phase by one sample.
    #[inline]
    pub fn tick(&mut self, inv_fs: f64) -> f32 {
        let s = (TAU * self.phase).sin() as f32 * self.amplitude;
        self.phase += self.frequency_hz * inv_fs;
        if self.phase >= 1.0 {
            self.phase -= self.phase.floor();
        }
        s
    }
}

/// Sum of amplitudes, the worst-case peak of the bank.
pub fn bank_energy(bank: &[Oscillator]) -> f64 {
    bank.iter().map(|o| o.amplitude as f64).sum()
}

/// Render one sample of a whole bank.
#[inline]
pub fn tick_bank(bank: &mut [Oscillator], inv_fs: f64) -> f32 {
    let mut acc = 0.0f32;
    for osc in bank.iter_mut() {
        acc += osc.tick(inv_fs);
    }
    acc
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_stays_wrapped() {
        let fs = 48_000.0f64;
        let mut osc = Oscillator::new(19_999.0, 0.5, 0.9);
        for _ in 0..10_000 {
            osc.tick(1.0 / fs);
            assert!((0.0..1.0).contains(&osc.phase), "phase {}", osc.phase);
        }
    }

    #[test]
    fn output_bounded_by_amplitude() {
        let mut osc = Oscillator::new(440.0, 0.25, 0.0);
        for _ in 0..4800 {
            let s = osc.tick(1.0 / 48_000.0);
            assert!(s.abs() <= 0.25 + 1e-6);
        }
    }

    #[test]
    fn bank_energy_sums_amplitudes() {
        let bank = vec![
            Oscillator::new(100.0, 0.1, 0.0),
            Oscillator::new(200.0, 0.2, 0.5),
        ];
        assert!((bank_energy(&bank) - 0.3).abs() < 1e-6);
    }
}
