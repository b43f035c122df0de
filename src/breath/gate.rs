//! Breath gate: onramp staging, steady state and the recurring silence dip.
//!
//! Onramp(0..=2) -> SteadyState -> SilenceDip -> SteadyState -> ...
//! Transitions happen on breath boundaries; slews and fades advance with tick time.

use crate::core::phase::{raised_cosine, smoothstep};

/// Boundaries between two silence dips.
pub const SILENCE_DIP_EVERY: u32 = 19;
/// Slew length of one onramp stage, as a fraction of the breath period.
pub const ONRAMP_SLEW_BREATHS: f64 = 0.5;
pub const DEPTH_FADE_SEC: f64 = 1.0;
pub const DIP_DURATION_SEC: f64 = 2.5;
/// Fraction of the wet send removed at the bottom of a dip.
pub const DIP_DEPTH: f32 = 0.85;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GateParams {
    pub rate_hz: f32,
    pub depth: f32,
    pub base: f32,
}

impl GateParams {
    pub const SILENT: GateParams = GateParams {
        rate_hz: 0.0,
        depth: 0.0,
        base: 0.0,
    };

    /// Gate multiplier at a gating phase (cycles), clamped to [0, 1].
    #[inline]
    pub fn multiplier(&self, phase: f64) -> f32 {
        let g = self.base as f64 + self.depth as f64 * raised_cosine(phase);
        if g.is_finite() { g.clamp(0.0, 1.0) as f32 } else { 0.0 }
    }

    fn lerp(a: GateParams, b: GateParams, t: f32) -> GateParams {
        GateParams {
            rate_hz: a.rate_hz + (b.rate_hz - a.rate_hz) * t,
            depth: a.depth + (b.depth - a.depth) * t,
            base: a.base + (b.base - a.base) * t,
        }
    }
}

/// Targets of the three onramp stages. Each keeps base + depth <= 1.
pub const ONRAMP_STAGES: [GateParams; 3] = [
    GateParams {
        rate_hz: 0.5,
        depth: 0.40,
        base: 0.30,
    },
    GateParams {
        rate_hz: 0.33,
        depth: 0.30,
        base: 0.55,
    },
    GateParams {
        rate_hz: 0.19,
        depth: 0.18,
        base: 0.80,
    },
];

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GateState {
    pub rate_hz: f32,
    pub depth: f32,
    pub base: f32,
    pub onramp_stage: u8,
    pub onramp_active: bool,
    pub boundary_counter: u32,
    pub silence_counter: u32,
}

impl GateState {
    pub fn params(&self) -> GateParams {
        GateParams {
            rate_hz: self.rate_hz,
            depth: self.depth,
            base: self.base,
        }
    }

    fn set_params(&mut self, p: GateParams) {
        self.rate_hz = p.rate_hz;
        self.depth = p.depth;
        self.base = p.base;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatePhase {
    Onramp(u8),
    SteadyState,
    SilenceDip,
}

/// Ordered events produced by the tick context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreathEvent {
    Boundary { index: u64 },
    OnrampStage { stage: u8 },
    OnrampComplete,
    SilenceDip { count: u32 },
    RelockRequested,
}

#[derive(Debug, Clone, Copy)]
struct Slew {
    from: GateParams,
    to: GateParams,
    elapsed: f64,
    duration: f64,
}

impl Slew {
    fn progress(&self) -> f64 {
        if self.duration <= 0.0 {
            1.0
        } else {
            (self.elapsed / self.duration).clamp(0.0, 1.0)
        }
    }

    fn value(&self) -> GateParams {
        GateParams::lerp(self.from, self.to, smoothstep(self.progress()) as f32)
    }
}

#[derive(Debug, Clone, Copy)]
struct Dip {
    elapsed: f64,
}

#[derive(Debug, Clone)]
pub struct GateMachine {
    state: GateState,
    slew: Option<Slew>,
    fading: bool,
    dip: Option<Dip>,
    dip_every: u32,
}

impl GateMachine {
    pub fn new(dip_every: u32) -> Self {
        Self {
            state: GateState {
                rate_hz: 0.0,
                depth: 0.0,
                base: 0.0,
                onramp_stage: 0,
                onramp_active: false,
                boundary_counter: 0,
                silence_counter: 0,
            },
            slew: None,
            fading: false,
            dip: None,
            dip_every: dip_every.max(1),
        }
    }

    pub fn state(&self) -> GateState {
        self.state
    }

    pub fn phase(&self) -> GatePhase {
        if self.state.onramp_active {
            GatePhase::Onramp(self.state.onramp_stage)
        } else if self.dip.is_some() {
            GatePhase::SilenceDip
        } else {
            GatePhase::SteadyState
        }
    }

    /// Start the onramp from silence towards stage 0.
    pub fn begin(&mut self, breath_period_sec: f64, events: &mut Vec<BreathEvent>) {
        self.state.set_params(GateParams::SILENT);
        self.state.onramp_stage = 0;
        self.state.onramp_active = true;
        self.fading = false;
        self.start_slew(ONRAMP_STAGES[0], breath_period_sec * ONRAMP_SLEW_BREATHS);
        events.push(BreathEvent::OnrampStage { stage: 0 });
    }

    pub fn on_boundary(&mut self, index: u64, breath_period_sec: f64, events: &mut Vec<BreathEvent>) {
        events.push(BreathEvent::Boundary { index });

        if self.state.onramp_active && !self.fading {
            let next = self.state.onramp_stage as usize + 1;
            if next < ONRAMP_STAGES.len() {
                self.state.onramp_stage = next as u8;
                self.start_slew(ONRAMP_STAGES[next], breath_period_sec * ONRAMP_SLEW_BREATHS);
                events.push(BreathEvent::OnrampStage { stage: next as u8 });
            } else {
                let mut to = self.current_params();
                to.depth = 0.0;
                self.start_slew(to, DEPTH_FADE_SEC);
                self.fading = true;
            }
        }

        self.state.boundary_counter += 1;
        if self.state.boundary_counter >= self.dip_every {
            self.state.boundary_counter = 0;
            self.state.silence_counter += 1;
            self.dip = Some(Dip { elapsed: 0.0 });
            events.push(BreathEvent::SilenceDip {
                count: self.state.silence_counter,
            });
            events.push(BreathEvent::RelockRequested);
        }
    }

    /// Advance slews, the depth fade and an active dip by `dt` seconds.
    pub fn tick(&mut self, dt: f64, events: &mut Vec<BreathEvent>) {
        if !dt.is_finite() || dt <= 0.0 {
            return;
        }
        if let Some(slew) = self.slew.as_mut() {
            slew.elapsed += dt;
            let done = slew.progress() >= 1.0;
            let value = if done { slew.to } else { slew.value() };
            self.state.set_params(value);
            if done {
                self.slew = None;
                if self.fading {
                    self.fading = false;
                    self.state.onramp_active = false;
                    events.push(BreathEvent::OnrampComplete);
                }
            }
        }
        if let Some(dip) = self.dip.as_mut() {
            dip.elapsed += dt;
            if dip.elapsed >= DIP_DURATION_SEC {
                self.dip = None;
            }
        }
    }

    /// Multiplier for the wet send: 1 outside a dip, a raised-cosine trough inside.
    pub fn dip_gain(&self) -> f32 {
        match self.dip {
            Some(dip) => {
                let p = (dip.elapsed / DIP_DURATION_SEC).clamp(0.0, 1.0);
                1.0 - DIP_DEPTH * raised_cosine(p) as f32
            }
            None => 1.0,
        }
    }

    fn current_params(&self) -> GateParams {
        self.state.params()
    }

    fn start_slew(&mut self, to: GateParams, duration: f64) {
        self.slew = Some(Slew {
            from: self.current_params(),
            to,
            elapsed: 0.0,
            duration: duration.max(0.0),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BREATH: f64 = 5.236;
    const DT: f64 = 1.0 / 60.0;

    fn run_for(gate: &mut GateMachine, secs: f64, events: &mut Vec<BreathEvent>) {
        let n = (secs / DT).ceil() as usize;
        for _ in 0..n {
            gate.tick(DT, events);
        }
    }

    #[test]
    fn stage_targets_keep_multiplier_in_unit_range() {
        for p in ONRAMP_STAGES {
            assert!(p.base + p.depth <= 1.0);
            for i in 0..64 {
                let m = p.multiplier(i as f64 / 64.0);
                assert!((0.0..=1.0).contains(&m));
            }
        }
    }

    #[test]
    fn overshoot_is_clamped() {
        let p = GateParams {
            rate_hz: 1.0,
            depth: 0.8,
            base: 0.7,
        };
        assert_eq!(p.multiplier(0.5), 1.0);
        let neg = GateParams {
            rate_hz: 1.0,
            depth: 0.1,
            base: -0.5,
        };
        assert_eq!(neg.multiplier(0.0), 0.0);
    }

    #[test]
    fn onramp_walks_all_stages_then_fades_depth() {
        let mut gate = GateMachine::new(SILENCE_DIP_EVERY);
        let mut events = Vec::new();
        gate.begin(BREATH, &mut events);
        assert_eq!(gate.phase(), GatePhase::Onramp(0));
        run_for(&mut gate, BREATH, &mut events);
        assert_eq!(gate.state().params(), ONRAMP_STAGES[0]);

        for (i, stage) in ONRAMP_STAGES.iter().enumerate().skip(1) {
            gate.on_boundary(i as u64, BREATH, &mut events);
            assert_eq!(gate.phase(), GatePhase::Onramp(i as u8));
            run_for(&mut gate, BREATH, &mut events);
            assert_eq!(gate.state().params(), *stage);
        }

        gate.on_boundary(3, BREATH, &mut events);
        assert!(gate.state().onramp_active);
        run_for(&mut gate, DEPTH_FADE_SEC + 0.1, &mut events);
        let st = gate.state();
        assert!(!st.onramp_active);
        assert_eq!(st.depth, 0.0);
        assert_eq!(st.base, ONRAMP_STAGES[2].base);
        assert_eq!(gate.phase(), GatePhase::SteadyState);
        assert_eq!(
            events.iter().filter(|e| **e == BreathEvent::OnrampComplete).count(),
            1
        );
    }

    #[test]
    fn slew_never_jumps() {
        let mut gate = GateMachine::new(SILENCE_DIP_EVERY);
        let mut events = Vec::new();
        gate.begin(BREATH, &mut events);
        let mut prev = gate.state().base;
        for _ in 0..((BREATH * ONRAMP_SLEW_BREATHS / DT) as usize + 2) {
            gate.tick(DT, &mut events);
            let b = gate.state().base;
            assert!((b - prev).abs() < 0.02, "base jumped {prev} -> {b}");
            prev = b;
        }
    }

    #[test]
    fn dip_fires_once_after_nineteen_boundaries() {
        let mut gate = GateMachine::new(SILENCE_DIP_EVERY);
        let mut events = Vec::new();
        for i in 1..=18u64 {
            gate.on_boundary(i, BREATH, &mut events);
            assert_eq!(gate.state().boundary_counter, i as u32);
        }
        assert!(!events.iter().any(|e| matches!(e, BreathEvent::SilenceDip { .. })));
        gate.on_boundary(19, BREATH, &mut events);
        let dips = events
            .iter()
            .filter(|e| matches!(e, BreathEvent::SilenceDip { .. }))
            .count();
        assert_eq!(dips, 1);
        assert_eq!(gate.state().boundary_counter, 0);
        assert_eq!(gate.state().silence_counter, 1);
        assert_eq!(events.last(), Some(&BreathEvent::RelockRequested));
    }

    #[test]
    fn dip_shapes_wet_gain_down_and_back() {
        let mut gate = GateMachine::new(1);
        let mut events = Vec::new();
        gate.on_boundary(1, BREATH, &mut events);
        assert_eq!(gate.phase(), GatePhase::SilenceDip);
        assert!((gate.dip_gain() - 1.0).abs() < 1e-6);
        run_for(&mut gate, DIP_DURATION_SEC * 0.5, &mut events);
        assert!(gate.dip_gain() < 0.2);
        run_for(&mut gate, DIP_DURATION_SEC, &mut events);
        assert_eq!(gate.dip_gain(), 1.0);
        assert_eq!(gate.phase(), GatePhase::SteadyState);
    }

    #[test]
    fn dip_leaves_gate_untouched() {
        let mut gate = GateMachine::new(1);
        let mut events = Vec::new();
        let before = gate.state().params();
        gate.on_boundary(1, BREATH, &mut events);
        run_for(&mut gate, DIP_DURATION_SEC * 0.5, &mut events);
        assert_eq!(gate.state().params(), before);
    }
}
