//! Synthesis primitives without breath semantics (Hz, unit gain, cycle phase).

pub mod bank;
pub mod normalize;
pub mod oscillator;
pub mod util;

pub use bank::{BankParams, BankShape, build_bank};
pub use normalize::{AMPLITUDE_FLOOR, MAX_TOTAL_GAIN, NormalizeReport, normalize_energy};
pub use oscillator::Oscillator;

use std::fmt;

/// Errors returned by synth primitives.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SynthError {
    /// Sample rate is non-finite or not positive.
    InvalidSampleRate(f32),
}

impl fmt::Display for SynthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SynthError::InvalidSampleRate(fs) => write!(f, "invalid sample rate: {fs}"),
        }
    }
}

impl std::error::Error for SynthError {}
