//! Reverb/delay policy and the one-pole smoother that glides the send levels.
//!
//! Targets are a pure function of (frequency, phrase, breath phase). The smoother is
//! advanced by the tick context only; everything downstream sees the smoothed values.

use std::f64::consts::TAU;

use crate::breath::phrase::Phrase;
use crate::core::phase::smoothstep;
use crate::synth::util::one_pole_alpha;

/// Safety ceiling on the wet send.
pub const WET_CAP: f32 = 0.28;
pub const DELAY_MIN_SEC: f32 = 0.021;
pub const DELAY_MAX_SEC: f32 = 1.25;
pub const FEEDBACK_CAP: f32 = 0.6;

const FEEDBACK_BASE: f32 = 0.15;
const FEEDBACK_SPAN: f32 = 0.45;
const PRESET_WEIGHT: f64 = 0.5;
const FREQ_WEIGHT: f64 = 0.3;
const BREATH_WEIGHT: f64 = 0.2;
const AUDIBLE_LO_HZ: f64 = 20.0;
const AUDIBLE_HI_HZ: f64 = 20_000.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MixTargets {
    pub wet: f32,
    pub delay_sec: f32,
    pub feedback: f32,
}

#[derive(Debug, Clone, Copy)]
pub struct MixPolicy {
    pub wet_cap: f32,
}

impl Default for MixPolicy {
    fn default() -> Self {
        Self { wet_cap: WET_CAP }
    }
}

impl MixPolicy {
    pub fn new(wet_cap: f32) -> Self {
        let wet_cap = if wet_cap.is_finite() {
            wet_cap.clamp(0.0, 1.0)
        } else {
            WET_CAP
        };
        Self { wet_cap }
    }

    /// Blend of phrase preset, frequency position and breath oscillation, reshaped
    /// through a smoothstep and clamped to the wet cap.
    pub fn auto_wet(&self, frequency_hz: f64, phrase: &Phrase, breath_phase: f64) -> f32 {
        let fnorm = if frequency_hz.is_finite() && frequency_hz > 0.0 {
            ((frequency_hz / AUDIBLE_LO_HZ).ln() / (AUDIBLE_HI_HZ / AUDIBLE_LO_HZ).ln())
                .clamp(0.0, 1.0)
        } else {
            0.5
        };
        let freq_wet = 0.08 + 0.2 * (1.0 - fnorm);
        let breath_phase = if breath_phase.is_finite() { breath_phase } else { 0.0 };
        let breath_wet = 0.15 * (1.0 + (TAU * breath_phase).sin());
        let preset_wet = phrase.wet.clamp(0.0, 1.0) as f64;

        let blend = PRESET_WEIGHT * preset_wet + FREQ_WEIGHT * freq_wet + BREATH_WEIGHT * breath_wet;
        (smoothstep(blend) as f32).clamp(0.0, self.wet_cap)
    }

    /// Delay and feedback follow the wet level: more wet, shorter and denser echoes.
    pub fn targets_for_wet(&self, wet: f32) -> MixTargets {
        let wet = if wet.is_finite() {
            wet.clamp(0.0, self.wet_cap)
        } else {
            0.0
        };
        let intensity = if self.wet_cap > 0.0 {
            wet / self.wet_cap
        } else {
            0.0
        };
        let delay_sec = (DELAY_MAX_SEC - intensity * (DELAY_MAX_SEC - DELAY_MIN_SEC))
            .clamp(DELAY_MIN_SEC, DELAY_MAX_SEC);
        let feedback = (FEEDBACK_BASE + FEEDBACK_SPAN * intensity).min(FEEDBACK_CAP);
        MixTargets {
            wet,
            delay_sec,
            feedback,
        }
    }

    pub fn targets(&self, frequency_hz: f64, phrase: &Phrase, breath_phase: f64) -> MixTargets {
        self.targets_for_wet(self.auto_wet(frequency_hz, phrase, breath_phase))
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SmootherTaus {
    pub wet_sec: f64,
    pub delay_sec: f64,
    pub feedback_sec: f64,
}

impl Default for SmootherTaus {
    fn default() -> Self {
        Self {
            wet_sec: 0.22,
            delay_sec: 0.25,
            feedback_sec: 0.20,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct MixState {
    pub auto_wet_target: f32,
    /// 0.0 means the auto target is used.
    pub user_wet_override: f32,
    /// Wet target after override and silence-dip shaping.
    pub wet_target: f32,
    pub smoothed_wet: f32,
    pub raw_delay_sec: f32,
    pub smoothed_delay_sec: f32,
    pub raw_feedback: f32,
    pub smoothed_feedback: f32,
}

#[derive(Debug, Clone)]
pub struct MixSmoother {
    policy: MixPolicy,
    taus: SmootherTaus,
    state: MixState,
    primed: bool,
}

impl MixSmoother {
    pub fn new(policy: MixPolicy, taus: SmootherTaus) -> Self {
        Self {
            policy,
            taus,
            state: MixState::default(),
            primed: false,
        }
    }

    pub fn policy(&self) -> MixPolicy {
        self.policy
    }

    pub fn state(&self) -> MixState {
        self.state
    }

    /// Set the user wet override; 0 (or anything non-positive) returns to auto.
    /// Non-finite input is ignored.
    pub fn set_user_override(&mut self, wet: f32) {
        if !wet.is_finite() {
            return;
        }
        self.state.user_wet_override = if wet <= 0.0 {
            0.0
        } else {
            wet.min(self.policy.wet_cap)
        };
    }

    /// Recompute raw targets. `dip_gain` scales the wet send only.
    pub fn update_targets(
        &mut self,
        frequency_hz: f64,
        phrase: &Phrase,
        breath_phase: f64,
        dip_gain: f32,
    ) {
        let auto = self.policy.auto_wet(frequency_hz, phrase, breath_phase);
        self.state.auto_wet_target = auto;
        let base = if self.state.user_wet_override > 0.0 {
            self.state.user_wet_override
        } else {
            auto
        };
        let targets = self.policy.targets_for_wet(base);
        let dip_gain = if dip_gain.is_finite() {
            dip_gain.clamp(0.0, 1.0)
        } else {
            1.0
        };
        self.state.wet_target = targets.wet * dip_gain;
        self.state.raw_delay_sec = targets.delay_sec;
        self.state.raw_feedback = targets.feedback;

        if !self.primed {
            self.state.smoothed_wet = self.state.wet_target;
            self.state.smoothed_delay_sec = targets.delay_sec;
            self.state.smoothed_feedback = targets.feedback;
            self.primed = true;
        }
    }

    /// Advance the smoothed values by `dt` seconds.
    pub fn tick(&mut self, dt: f64) {
        let s = &mut self.state;
        s.smoothed_wet = glide(s.smoothed_wet, s.wet_target, one_pole_alpha(dt, self.taus.wet_sec));
        s.smoothed_delay_sec = glide(
            s.smoothed_delay_sec,
            s.raw_delay_sec,
            one_pole_alpha(dt, self.taus.delay_sec),
        );
        s.smoothed_feedback = glide(
            s.smoothed_feedback,
            s.raw_feedback,
            one_pole_alpha(dt, self.taus.feedback_sec),
        );
    }

    /// Send levels as seen by the downstream chain.
    pub fn params(&self) -> MixTargets {
        MixTargets {
            wet: self.state.smoothed_wet.clamp(0.0, self.policy.wet_cap),
            delay_sec: self.state.smoothed_delay_sec.clamp(DELAY_MIN_SEC, DELAY_MAX_SEC),
            feedback: self.state.smoothed_feedback.clamp(0.0, FEEDBACK_CAP),
        }
    }
}

#[inline]
fn glide(current: f32, target: f32, alpha: f64) -> f32 {
    if alpha <= 0.0 {
        return current;
    }
    let next = current as f64 + alpha * (target as f64 - current as f64);
    let past = (target >= current && next > target as f64)
        || (target <= current && next < target as f64);
    let next = next as f32;
    // Snap once the step falls below f32 resolution, or would cross the target.
    if past || next == current { target } else { next }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DT: f64 = 1.0 / 60.0;

    #[test]
    fn auto_wet_is_capped_and_pure() {
        let policy = MixPolicy::default();
        for name in Phrase::names() {
            let phrase = Phrase::lookup(name);
            for i in 0..20 {
                let phase = i as f64 / 20.0;
                let a = policy.auto_wet(144.0, &phrase, phase);
                let b = policy.auto_wet(144.0, &phrase, phase);
                assert_eq!(a, b);
                assert!((0.0..=WET_CAP).contains(&a));
            }
        }
    }

    #[test]
    fn delay_is_inverse_to_wet_and_bounded() {
        let policy = MixPolicy::default();
        let dry = policy.targets_for_wet(0.0);
        let full = policy.targets_for_wet(WET_CAP);
        assert_eq!(dry.delay_sec, DELAY_MAX_SEC);
        assert!((full.delay_sec - DELAY_MIN_SEC).abs() < 1e-6);
        assert!(full.feedback <= FEEDBACK_CAP);
        let nan = policy.targets_for_wet(f32::NAN);
        assert!(nan.delay_sec.is_finite() && nan.feedback.is_finite());
    }

    #[test]
    fn override_is_clamped_to_cap() {
        let mut sm = MixSmoother::new(MixPolicy::default(), SmootherTaus::default());
        sm.set_user_override(0.5);
        assert_eq!(sm.state().user_wet_override, WET_CAP);
        sm.set_user_override(f32::NAN);
        assert_eq!(sm.state().user_wet_override, WET_CAP);
        sm.set_user_override(0.0);
        assert_eq!(sm.state().user_wet_override, 0.0);
    }

    #[test]
    fn smoothing_is_monotonic_without_overshoot() {
        let phrase = Phrase::lookup("Lum Sai");
        let mut sm = MixSmoother::new(MixPolicy::default(), SmootherTaus::default());
        sm.update_targets(880.0, &phrase, 0.75, 1.0);
        sm.set_user_override(0.27);
        sm.update_targets(880.0, &phrase, 0.75, 1.0);
        let target = sm.state().wet_target;
        let mut prev = (target - sm.state().smoothed_wet).abs();
        assert!(prev > 0.0);
        for _ in 0..600 {
            sm.tick(DT);
            let s = sm.state().smoothed_wet;
            assert!(s <= target, "overshoot: {s} > {target}");
            let dist = (target - s).abs();
            assert!(dist < prev || dist == 0.0, "not strictly closer: {dist} vs {prev}");
            prev = dist;
        }
    }

    #[test]
    fn dip_gain_scales_wet_only() {
        let phrase = Phrase::lookup("Shoh Mek");
        let mut a = MixSmoother::new(MixPolicy::default(), SmootherTaus::default());
        let mut b = MixSmoother::new(MixPolicy::default(), SmootherTaus::default());
        a.update_targets(144.0, &phrase, 0.1, 1.0);
        b.update_targets(144.0, &phrase, 0.1, 0.25);
        assert!((b.state().wet_target - 0.25 * a.state().wet_target).abs() < 1e-6);
        assert_eq!(a.state().raw_delay_sec, b.state().raw_delay_sec);
        assert_eq!(a.state().raw_feedback, b.state().raw_feedback);
    }
}
