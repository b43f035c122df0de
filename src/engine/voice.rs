//! The fixed 13-voice layout: two binaural cores and eleven shells.

use rand::Rng;

use crate::breath::phrase::Phrase;
use crate::breath::spatial::base_position;
use crate::core::vec3::Vec3;
use crate::synth::bank::{BankParams, BankShape, build_bank};
use crate::synth::normalize::{MAX_TOTAL_GAIN, NormalizeReport, normalize_energy};
use crate::synth::oscillator::{Oscillator, bank_energy};
use crate::synth::SynthError;

pub const VOICE_COUNT: usize = 13;
/// Offset of the right core above the base frequency when binaural is on.
pub const BINAURAL_BEAT_HZ: f64 = 6.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VoiceKind {
    LeftCore,
    RightCore,
    Shell(u8),
}

impl VoiceKind {
    pub const SHELL_COUNT: usize = 11;

    pub fn all() -> [VoiceKind; VOICE_COUNT] {
        let mut out = [VoiceKind::LeftCore; VOICE_COUNT];
        out[1] = VoiceKind::RightCore;
        for (i, slot) in out.iter_mut().skip(2).enumerate() {
            *slot = VoiceKind::Shell(i as u8);
        }
        out
    }

    /// Position in `all()`.
    pub fn index(self) -> usize {
        match self {
            VoiceKind::LeftCore => 0,
            VoiceKind::RightCore => 1,
            VoiceKind::Shell(i) => 2 + i as usize,
        }
    }

    pub fn is_core(self) -> bool {
        matches!(self, VoiceKind::LeftCore | VoiceKind::RightCore)
    }

    /// Cores drift apart; shells alternate.
    pub fn drift_sign(self) -> f64 {
        match self {
            VoiceKind::LeftCore => 1.0,
            VoiceKind::RightCore => -1.0,
            VoiceKind::Shell(i) if i % 2 == 0 => 1.0,
            VoiceKind::Shell(_) => -1.0,
        }
    }

    /// Base frequency this voice is built on.
    pub fn frequency_hz(self, base_hz: f64, binaural: bool) -> f64 {
        match self {
            VoiceKind::RightCore if binaural => base_hz + BINAURAL_BEAT_HZ,
            _ => base_hz,
        }
    }

    fn shape(self) -> BankShape {
        match self {
            VoiceKind::LeftCore | VoiceKind::RightCore => BankShape::Core,
            VoiceKind::Shell(i) => BankShape::Shell {
                index: i as usize,
                count: Self::SHELL_COUNT,
            },
        }
    }
}

#[derive(Debug, Clone)]
pub struct Voice {
    pub kind: VoiceKind,
    pub oscillators: Vec<Oscillator>,
    pub gain_scale: f32,
    pub base_position: Vec3,
}

impl Voice {
    pub fn energy(&self) -> f64 {
        bank_energy(&self.oscillators)
    }
}

/// Build all 13 voices for one (frequency, phrase, binaural) and normalize them
/// together against `MAX_TOTAL_GAIN`.
pub fn build_voices<R: Rng + ?Sized>(
    frequency_hz: f64,
    phrase: &Phrase,
    binaural: bool,
    sample_rate: f32,
    rng: &mut R,
) -> Result<(Vec<Voice>, NormalizeReport), SynthError> {
    let mut voices = Vec::with_capacity(VOICE_COUNT);
    for kind in VoiceKind::all() {
        let params = BankParams {
            base_hz: kind.frequency_hz(frequency_hz, binaural),
            gain_scale: phrase.gain_scale,
            drift_sign: kind.drift_sign(),
            sample_rate,
            shape: kind.shape(),
        };
        voices.push(Voice {
            kind,
            oscillators: build_bank(&params, rng)?,
            gain_scale: phrase.gain_scale,
            base_position: base_position(kind),
        });
    }
    let report = {
        let mut banks: Vec<&mut [Oscillator]> = voices
            .iter_mut()
            .map(|v| v.oscillators.as_mut_slice())
            .collect();
        normalize_energy(&mut banks, MAX_TOTAL_GAIN)
    };
    Ok((voices, report))
}
