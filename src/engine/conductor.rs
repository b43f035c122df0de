//! Tick-side session state: the breath clock, the gate machine, the mix smoother and
//! the voice poses. Only the tick thread owns a `Conductor`.

use tracing::{debug, info, warn};

use crate::audio::pipeline::SceneFrame;
use crate::breath::clock::{ClockCorrection, ClockReference};
use crate::breath::gate::{BreathEvent, GateMachine, GatePhase, GateState};
use crate::breath::mix::{MixPolicy, MixSmoother, MixState, SmootherTaus};
use crate::breath::phrase::Phrase;
use crate::breath::source::{FetchKind, FetchReport};
use crate::breath::spatial;
use crate::core::vec3::Vec3;
use crate::engine::renderer::RenderSnapshot;
use crate::engine::voice::{VOICE_COUNT, VoiceKind};

#[derive(Debug, Clone)]
pub struct ConductorParams {
    pub frequency_hz: f64,
    pub phrase: Phrase,
    pub breath_sec: f64,
    pub max_drift_ppm: f64,
    pub relock_every: u32,
    pub wet_cap: f32,
}

/// Everything one tick publishes.
#[derive(Debug, Clone, Copy)]
pub struct TickOutput {
    pub snapshot: RenderSnapshot,
    pub scene: SceneFrame,
    /// A relock fetch should be started.
    pub relock: bool,
}

#[derive(Debug)]
pub struct Conductor {
    frequency_hz: f64,
    phrase: Phrase,
    clock: ClockReference,
    gate: GateMachine,
    mix: MixSmoother,
    bases: [Vec3; VOICE_COUNT],
    events: Vec<BreathEvent>,
}

impl Conductor {
    pub fn new(params: ConductorParams) -> Self {
        let mut bases = [Vec3::ZERO; VOICE_COUNT];
        for kind in VoiceKind::all() {
            bases[kind.index()] = spatial::base_position(kind);
        }
        Self {
            frequency_hz: params.frequency_hz,
            phrase: params.phrase,
            clock: ClockReference::new(params.breath_sec, params.max_drift_ppm, params.relock_every),
            gate: GateMachine::new(params.relock_every),
            mix: MixSmoother::new(MixPolicy::new(params.wet_cap), SmootherTaus::default()),
            bases,
            events: Vec::with_capacity(8),
        }
    }

    /// Start the onramp and produce the first published state.
    pub fn begin(&mut self) -> TickOutput {
        self.events.clear();
        self.gate.begin(self.clock.period(), &mut self.events);
        self.refresh_targets();
        self.output(false)
    }

    /// Advance by `dt` seconds of session time.
    pub fn tick(&mut self, dt: f64) -> TickOutput {
        self.events.clear();
        let period = self.clock.period();
        for index in self.clock.advance(dt) {
            self.gate.on_boundary(index, period, &mut self.events);
        }
        self.gate.tick(dt, &mut self.events);
        self.refresh_targets();
        self.mix.tick(dt);

        let relock = self.events.contains(&BreathEvent::RelockRequested);
        for event in &self.events {
            match event {
                BreathEvent::OnrampComplete => info!("onramp complete"),
                BreathEvent::SilenceDip { count } => debug!("silence dip #{count}"),
                _ => {}
            }
        }
        self.output(relock)
    }

    /// Apply a finished fetch. The first successful sample aligns the phase;
    /// later ones only correct the period.
    pub fn apply_fetch(&mut self, report: FetchReport) -> Option<ClockCorrection> {
        let sample = match report.result {
            Ok(sample) => sample,
            Err(err) => {
                match report.kind {
                    FetchKind::Align => warn!("breath time unavailable, running on nominal period: {err}"),
                    FetchKind::Relock => debug!("relock skipped: {err}"),
                }
                return None;
            }
        };
        let correction = match report.kind {
            FetchKind::Align if !self.clock.is_aligned() => self.clock.align(sample),
            _ => self.clock.relock(sample),
        };
        debug!("breath clock correction: {correction:?}");
        Some(correction)
    }

    pub fn set_user_wet(&mut self, wet: f32) {
        self.mix.set_user_override(wet);
        self.refresh_targets();
    }

    pub fn change_phrase(&mut self, phrase: Phrase) {
        self.phrase = phrase;
        self.refresh_targets();
    }

    pub fn events(&self) -> &[BreathEvent] {
        &self.events
    }

    pub fn gate_state(&self) -> GateState {
        self.gate.state()
    }

    pub fn gate_phase(&self) -> GatePhase {
        self.gate.phase()
    }

    pub fn mix_state(&self) -> MixState {
        self.mix.state()
    }

    pub fn clock(&self) -> &ClockReference {
        &self.clock
    }

    pub fn phrase(&self) -> &Phrase {
        &self.phrase
    }

    fn refresh_targets(&mut self) {
        self.mix.update_targets(
            self.frequency_hz,
            &self.phrase,
            self.clock.phase(),
            self.gate.dip_gain(),
        );
    }

    fn output(&self, relock: bool) -> TickOutput {
        let phase = self.clock.phase();
        let elapsed = self.clock.local_time();
        let mut poses = [Vec3::ZERO; VOICE_COUNT];
        for kind in VoiceKind::all() {
            let i = kind.index();
            poses[i] = spatial::pose(kind, self.bases[i], phase, elapsed);
        }
        TickOutput {
            snapshot: RenderSnapshot {
                gate: self.gate.state().params(),
                breath_phase: phase,
                breath_period_sec: self.clock.period(),
                at_sec: elapsed,
            },
            scene: SceneFrame {
                poses,
                mix: self.mix.params(),
            },
            relock,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::breath::clock::{ExternalSample, NOMINAL_BREATH_SEC, RELOCK_EVERY};
    use crate::breath::mix::WET_CAP;
    use crate::breath::source::ClockError;

    const DT: f64 = 1.0 / 60.0;

    fn conductor() -> Conductor {
        Conductor::new(ConductorParams {
            frequency_hz: 144.0,
            phrase: Phrase::lookup("Shoh Mek"),
            breath_sec: NOMINAL_BREATH_SEC,
            max_drift_ppm: 500.0,
            relock_every: RELOCK_EVERY,
            wet_cap: WET_CAP,
        })
    }

    #[test]
    fn begin_starts_silent_onramp() {
        let mut c = conductor();
        let out = c.begin();
        assert_eq!(c.gate_phase(), GatePhase::Onramp(0));
        assert_eq!(out.snapshot.gate.base, 0.0);
        assert!(!out.relock);
        assert!(out.scene.poses.iter().all(|p| p.is_finite()));
    }

    #[test]
    fn boundaries_are_ordered_and_relock_follows_dip() {
        let mut c = conductor();
        c.begin();
        let mut boundaries = Vec::new();
        let mut relocks = 0;
        let ticks = ((RELOCK_EVERY as f64 + 0.5) * NOMINAL_BREATH_SEC / DT) as usize;
        for _ in 0..ticks {
            let out = c.tick(DT);
            for e in c.events() {
                if let BreathEvent::Boundary { index } = e {
                    boundaries.push(*index);
                }
            }
            if out.relock {
                relocks += 1;
                assert!(c.events().iter().any(|e| matches!(e, BreathEvent::SilenceDip { .. })));
            }
        }
        let expected: Vec<u64> = (1..=RELOCK_EVERY as u64).collect();
        assert_eq!(boundaries, expected);
        assert_eq!(relocks, 1);
        assert_eq!(c.gate_state().silence_counter, 1);
        assert_eq!(c.gate_state().boundary_counter, 0);
    }

    #[test]
    fn failed_fetch_keeps_nominal() {
        let mut c = conductor();
        c.begin();
        let r = c.apply_fetch(FetchReport {
            generation: 1,
            kind: FetchKind::Align,
            result: Err(ClockError::Timeout),
        });
        assert!(r.is_none());
        assert_eq!(c.clock().period(), NOMINAL_BREATH_SEC);
        assert!(!c.clock().is_aligned());
    }

    #[test]
    fn align_then_relock() {
        let mut c = conductor();
        c.begin();
        c.tick(DT);
        let sample = ExternalSample {
            breath_time_sec: 0.5 * NOMINAL_BREATH_SEC,
            local_time_sec: c.clock().local_time(),
        };
        let first = c.apply_fetch(FetchReport {
            generation: 1,
            kind: FetchKind::Align,
            result: Ok(sample),
        });
        assert!(matches!(first, Some(ClockCorrection::Aligned { .. })));
        let second = c.apply_fetch(FetchReport {
            generation: 1,
            kind: FetchKind::Align,
            result: Ok(sample),
        });
        assert!(matches!(second, Some(ClockCorrection::Relocked { .. })));
    }

    #[test]
    fn phrase_change_is_idempotent() {
        let mut c = conductor();
        c.begin();
        for _ in 0..30 {
            c.tick(DT);
        }
        c.change_phrase(Phrase::lookup("Vey Ora"));
        let a = c.mix_state();
        c.change_phrase(Phrase::lookup("Vey Ora"));
        let b = c.mix_state();
        assert_eq!(a.auto_wet_target, b.auto_wet_target);
        assert_eq!(a.wet_target, b.wet_target);
        assert_eq!(a.raw_delay_sec, b.raw_delay_sec);
        assert_eq!(a.raw_feedback, b.raw_feedback);
    }

    #[test]
    fn user_override_glides_to_cap() {
        let mut c = conductor();
        c.begin();
        c.set_user_wet(0.5);
        assert_eq!(c.mix_state().wet_target, WET_CAP);
        for _ in 0..((5.0 * 0.22 / DT) as usize + 1) {
            c.tick(DT);
        }
        let s = c.mix_state().smoothed_wet;
        assert!((s - WET_CAP).abs() <= 0.01 * WET_CAP, "smoothed {s}");
    }
}
