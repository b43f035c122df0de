//! Per-voice block rendering. Runs on the render thread and only reads copied snapshots.

use std::f64::consts::TAU;

use crate::breath::gate::GateParams;
use crate::core::phase::wrap_unit;
use crate::core::timebase::{Tick, Timebase};
use crate::synth::oscillator::{Oscillator, tick_bank};
use crate::synth::util::flush_denorm;

const AM_BREATH_DEPTH: f64 = 0.06;
const AM_COHERENCE_DEPTH: f64 = 0.04;
const AM_COHERENCE_HZ: f64 = 0.1;
pub const AM_MIN: f32 = 0.90;
pub const AM_MAX: f32 = 1.10;

/// What the render thread needs from the tick, copied by value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderSnapshot {
    pub gate: GateParams,
    pub breath_phase: f64,
    pub breath_period_sec: f64,
    /// Session time the snapshot was taken at.
    pub at_sec: f64,
}

impl RenderSnapshot {
    pub fn silent(breath_period_sec: f64) -> Self {
        Self {
            gate: GateParams::SILENT,
            breath_phase: 0.0,
            breath_period_sec,
            at_sec: 0.0,
        }
    }

    /// Breath phase extrapolated to session time `t_sec`.
    pub fn breath_phase_at(&self, t_sec: f64) -> f64 {
        if self.breath_period_sec <= 0.0 || !t_sec.is_finite() {
            return self.breath_phase;
        }
        wrap_unit(self.breath_phase + (t_sec - self.at_sec) / self.breath_period_sec)
    }
}

/// Largest gap between the render sample clock and session time before the
/// render side re-anchors.
pub const REANCHOR_TOLERANCE_SEC: f64 = 0.1;

/// Maps the render sample clock onto session time.
///
/// The sample clock stops while the device is interrupted and runs off-speed when
/// an offline pipeline is pulled faster or slower than real time; session time
/// does neither. Snapshots are translated into sample-clock time before rendering.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SessionAnchor {
    offset_sec: f64,
}

impl SessionAnchor {
    /// Session time minus sample-clock time.
    pub fn offset_sec(&self) -> f64 {
        self.offset_sec
    }

    /// Make `frontier` (the next tick to be rendered) line up with `snap`.
    pub fn reset(&mut self, snap: &RenderSnapshot, frontier: Tick, timebase: &Timebase) {
        if snap.at_sec.is_finite() {
            self.offset_sec = snap.at_sec - timebase.tick_to_sec(frontier);
        }
    }

    /// Re-anchor on a fresh snapshot once the two clocks have drifted apart by
    /// more than `REANCHOR_TOLERANCE_SEC`. Returns true if it did.
    pub fn follow(&mut self, snap: &RenderSnapshot, frontier: Tick, timebase: &Timebase) -> bool {
        let mapped = timebase.tick_to_sec(frontier) + self.offset_sec;
        if (snap.at_sec - mapped).abs() > REANCHOR_TOLERANCE_SEC {
            self.reset(snap, frontier, timebase);
            return true;
        }
        false
    }

    /// `snap` with its timestamp moved onto the sample clock.
    pub fn localize(&self, snap: &RenderSnapshot) -> RenderSnapshot {
        RenderSnapshot {
            at_sec: snap.at_sec - self.offset_sec,
            ..*snap
        }
    }
}

/// Breath-phase sinusoid times the coherence sinusoid, clamped to [0.90, 1.10].
#[inline]
pub fn am_factor(breath_phase: f64, coherence_phase: f64) -> f32 {
    let a = (1.0 + AM_BREATH_DEPTH * (TAU * breath_phase).sin())
        * (1.0 + AM_COHERENCE_DEPTH * (TAU * coherence_phase).sin());
    (a as f32).clamp(AM_MIN, AM_MAX)
}

#[derive(Debug)]
pub struct VoiceRenderer {
    oscillators: Vec<Oscillator>,
    gate_phase: f64,
    timebase: Timebase,
}

impl VoiceRenderer {
    pub fn new(oscillators: Vec<Oscillator>, timebase: Timebase) -> Self {
        Self {
            oscillators,
            gate_phase: 0.0,
            timebase,
        }
    }

    /// Swap in a rebuilt bank; the gate phase carries on.
    pub fn replace_bank(&mut self, oscillators: Vec<Oscillator>) -> Vec<Oscillator> {
        std::mem::replace(&mut self.oscillators, oscillators)
    }

    pub fn oscillators(&self) -> &[Oscillator] {
        &self.oscillators
    }

    pub fn gate_phase(&self) -> f64 {
        self.gate_phase
    }

    /// Fill `out` with the samples starting at `start_tick`.
    pub fn render(&mut self, snap: &RenderSnapshot, start_tick: Tick, out: &mut [f32]) {
        let fs = self.timebase.fs as f64;
        let inv_fs = 1.0 / fs;
        let gate_step = snap.gate.rate_hz.max(0.0) as f64 * inv_fs;
        let t0 = self.timebase.tick_to_sec(start_tick);
        let breath0 = snap.breath_phase_at(t0);
        let breath_step = if snap.breath_period_sec > 0.0 {
            inv_fs / snap.breath_period_sec
        } else {
            0.0
        };
        let coherence0 = wrap_unit(AM_COHERENCE_HZ * t0);

        for (i, slot) in out.iter_mut().enumerate() {
            let gate = snap.gate.multiplier(self.gate_phase);
            self.gate_phase += gate_step;
            if self.gate_phase >= 1.0 {
                self.gate_phase -= self.gate_phase.floor();
            }

            let sum = tick_bank(&mut self.oscillators, inv_fs);

            let n = i as f64;
            let am = am_factor(
                breath0 + n * breath_step,
                coherence0 + n * AM_COHERENCE_HZ * inv_fs,
            );
            *slot = flush_denorm(sum * gate * am);
        }
    }
}
