//! Session orchestration: builds the voices, opens the pipeline, and runs the tick and
//! render threads for one session at a time.

pub mod conductor;
pub mod renderer;
pub mod scheduler;
pub mod session;
pub mod telemetry;
pub mod voice;

pub use conductor::{Conductor, ConductorParams, TickOutput};
pub use renderer::{RenderSnapshot, SessionAnchor, VoiceRenderer, am_factor};
pub use scheduler::{BlockJob, BlockScheduler, BUFFERS_PER_VOICE};
pub use telemetry::{SCOPE_LEN, ScopeRing, Telemetry};
pub use voice::{BINAURAL_BEAT_HZ, VOICE_COUNT, Voice, VoiceKind, build_voices};

use std::fmt;
use std::sync::atomic::AtomicUsize;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender, bounded, unbounded};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{debug, info, warn};

use crate::audio::pipeline::{DeviceStatus, OutputError, OutputPipeline, PipelineLink};
use crate::breath::mix::MixPolicy;
use crate::breath::phrase::Phrase;
use crate::breath::source::BreathTimeSource;
use crate::config::AppConfig;
use crate::core::timebase::Timebase;
use crate::synth::SynthError;
use crate::synth::normalize::NormalizeReport;
use session::{RenderCmd, RenderContext, TickCmd, TickContext, render_loop, tick_loop};
use telemetry::ScopeChunk;

const SNAPSHOT_QUEUE: usize = 64;
const SCOPE_QUEUE: usize = 64;

#[derive(Debug)]
pub enum EngineError {
    /// Base frequency is not a positive finite number.
    InvalidFrequency(f64),
    Output(OutputError),
    Synth(SynthError),
    Spawn(String),
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::InvalidFrequency(hz) => write!(f, "invalid base frequency: {hz} Hz"),
            EngineError::Output(e) => write!(f, "output pipeline: {e}"),
            EngineError::Synth(e) => write!(f, "synth: {e}"),
            EngineError::Spawn(e) => write!(f, "failed to spawn session thread: {e}"),
        }
    }
}

impl std::error::Error for EngineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            EngineError::Output(e) => Some(e),
            EngineError::Synth(e) => Some(e),
            _ => None,
        }
    }
}

impl From<OutputError> for EngineError {
    fn from(e: OutputError) -> Self {
        EngineError::Output(e)
    }
}

impl From<SynthError> for EngineError {
    fn from(e: SynthError) -> Self {
        EngineError::Synth(e)
    }
}

struct Session {
    generation: u64,
    frequency_hz: f64,
    binaural: bool,
    sample_rate: u32,
    voices: Vec<Voice>,
    report: NormalizeReport,
    tick_tx: Sender<TickCmd>,
    render_tx: Sender<RenderCmd>,
    scope_rx: Receiver<ScopeChunk>,
    tick: Option<JoinHandle<()>>,
    render: Option<JoinHandle<()>>,
}

impl Session {
    fn shutdown(&mut self) {
        let _ = self.render_tx.send(RenderCmd::Stop);
        let _ = self.tick_tx.send(TickCmd::Stop);
        if let Some(handle) = self.render.take() {
            if handle.join().is_err() {
                warn!("render thread of session {} panicked", self.generation);
            }
        }
        if let Some(handle) = self.tick.take() {
            if handle.join().is_err() {
                warn!("tick thread of session {} panicked", self.generation);
            }
        }
    }
}

/// Owns one session at a time. Control calls come from a single caller thread.
pub struct Engine {
    config: AppConfig,
    pipeline: Box<dyn OutputPipeline>,
    source: Arc<dyn BreathTimeSource>,
    rng: StdRng,
    telemetry: Arc<Telemetry>,
    fetch_calls: Arc<AtomicUsize>,
    scope: Mutex<ScopeRing>,
    generation: u64,
    session: Option<Session>,
}

impl Engine {
    pub fn new(
        config: AppConfig,
        pipeline: Box<dyn OutputPipeline>,
        source: Arc<dyn BreathTimeSource>,
    ) -> Self {
        let seed = config.engine.seed.unwrap_or_else(rand::random);
        debug!("engine seed {seed}");
        Self {
            config,
            pipeline,
            source,
            rng: StdRng::seed_from_u64(seed),
            telemetry: Arc::new(Telemetry::default()),
            fetch_calls: Arc::new(AtomicUsize::new(0)),
            scope: Mutex::new(ScopeRing::default()),
            generation: 0,
            session: None,
        }
    }

    /// Start a session. A running session is stopped first. On failure nothing of the
    /// new session is kept and `is_playing()` stays false.
    pub fn start(&mut self, frequency_hz: f64, phrase: &str, binaural: bool) -> Result<(), EngineError> {
        if !frequency_hz.is_finite() || frequency_hz <= 0.0 {
            return Err(EngineError::InvalidFrequency(frequency_hz));
        }
        self.stop();
        self.generation += 1;
        let generation = self.generation;
        let phrase = Phrase::lookup(phrase);
        let block_len = self.config.audio.block_len.max(1);
        let ec = self.config.engine.clone();

        let (block_tx, block_rx) = bounded(2 * BUFFERS_PER_VOICE * VOICE_COUNT);
        let (return_tx, return_rx) = bounded(2 * BUFFERS_PER_VOICE * VOICE_COUNT);
        let (scene_tx, scene_rx) = bounded(SNAPSHOT_QUEUE);
        let (snap_tx, snap_rx) = bounded(SNAPSHOT_QUEUE);
        let (scope_tx, scope_rx) = bounded(SCOPE_QUEUE);
        let (tick_tx, tick_cmd_rx) = unbounded();
        let (render_tx, render_cmd_rx) = unbounded();
        let status = Arc::new(DeviceStatus::default());

        let sample_rate = self.pipeline.open(PipelineLink {
            voices: VOICE_COUNT,
            block_len,
            blocks: block_rx,
            returns: return_tx,
            scene: scene_rx.clone(),
            status: status.clone(),
        })?;

        let (voices, report) =
            match build_voices(frequency_hz, &phrase, binaural, sample_rate as f32, &mut self.rng) {
                Ok(built) => built,
                Err(e) => {
                    self.pipeline.close();
                    return Err(e.into());
                }
            };
        debug!(
            "built {} voices, energy {:.4} -> {:.4}",
            voices.len(),
            report.sum_before,
            report.sum_after
        );

        let timebase = Timebase {
            fs: sample_rate as f32,
            block_len,
        };
        let mut conductor = Conductor::new(ConductorParams {
            frequency_hz,
            phrase: phrase.clone(),
            breath_sec: ec.breath_sec,
            max_drift_ppm: ec.max_drift_ppm,
            relock_every: ec.relock_every,
            wet_cap: ec.wet_cap,
        });
        let first = conductor.begin();
        let auto_wet = conductor.mix_state().auto_wet_target;
        let _ = scene_tx.try_send(first.scene);

        let render_ctx = RenderContext {
            renderers: voices
                .iter()
                .map(|v| VoiceRenderer::new(v.oscillators.clone(), timebase))
                .collect(),
            scheduler: BlockScheduler::new(VOICE_COUNT, timebase),
            snapshot: first.snapshot,
            anchor: SessionAnchor::default(),
            cmds: render_cmd_rx,
            snapshots: snap_rx.clone(),
            blocks: block_tx,
            returns: return_rx,
            scope: scope_tx,
            status: status.clone(),
            telemetry: self.telemetry.clone(),
        };
        let tick_ctx = TickContext {
            conductor,
            tick_hz: ec.tick_hz,
            generation,
            session_start: Instant::now(),
            cmds: tick_cmd_rx,
            snapshots: (snap_tx, snap_rx),
            scene: (scene_tx, scene_rx),
            fetches: unbounded(),
            source: self.source.clone(),
            fetch_timeout: Duration::from_millis(ec.fetch_timeout_ms),
            fetch_calls: self.fetch_calls.clone(),
            status,
            telemetry: self.telemetry.clone(),
        };

        let mut session = Session {
            generation,
            frequency_hz,
            binaural,
            sample_rate,
            voices,
            report,
            tick_tx,
            render_tx,
            scope_rx,
            tick: None,
            render: None,
        };
        let spawned = thread::Builder::new()
            .name("breathscape-render".into())
            .spawn(move || render_loop(render_ctx, timebase))
            .and_then(|render| {
                session.render = Some(render);
                thread::Builder::new()
                    .name("breathscape-tick".into())
                    .spawn(move || tick_loop(tick_ctx))
            });
        match spawned {
            Ok(tick) => session.tick = Some(tick),
            Err(e) => {
                session.shutdown();
                self.pipeline.close();
                return Err(EngineError::Spawn(e.to_string()));
            }
        }

        self.telemetry.set_sample_rate(sample_rate);
        self.telemetry.set_user_wet(0.0);
        self.telemetry.set_auto_wet(auto_wet);
        if let Ok(mut ring) = self.scope.lock() {
            ring.clear();
        }
        self.telemetry.set_playing(true);
        info!(
            "session {generation} started: {frequency_hz} Hz, phrase '{}', binaural {binaural}, {sample_rate} Hz",
            phrase.name
        );
        self.session = Some(session);
        Ok(())
    }

    /// Stop the session. `is_playing()` turns false before the threads are joined;
    /// a block already being rendered finishes, nothing new is scheduled.
    pub fn stop(&mut self) {
        self.telemetry.set_playing(false);
        let Some(mut session) = self.session.take() else {
            return;
        };
        session.shutdown();
        self.pipeline.close();
        info!("session {} stopped", session.generation);
    }

    /// Tear down a session whose device was lost. Its threads have already exited;
    /// this joins them and closes the pipeline.
    fn reap_lost(&mut self) {
        if self.session.is_some() && !self.telemetry.is_playing() {
            debug!("reaping session after device loss");
            self.stop();
        }
    }

    /// 0 returns to the automatic wet level. No-op without a session.
    pub fn set_user_wet_override(&mut self, wet: f32) {
        self.reap_lost();
        let Some(session) = self.session.as_ref() else {
            return;
        };
        if !wet.is_finite() {
            return;
        }
        let cap = MixPolicy::new(self.config.engine.wet_cap).wet_cap;
        self.telemetry
            .set_user_wet(if wet <= 0.0 { 0.0 } else { wet.min(cap) });
        let _ = session.tick_tx.send(TickCmd::SetUserWet(wet));
    }

    /// Rebuild every bank for the new phrase and hand it to the render thread.
    /// No-op without a session.
    pub fn change_phrase_preset(&mut self, name: &str) -> Result<(), EngineError> {
        self.reap_lost();
        let Some(session) = self.session.as_mut() else {
            return Ok(());
        };
        let phrase = Phrase::lookup(name);
        let (voices, report) = build_voices(
            session.frequency_hz,
            &phrase,
            session.binaural,
            session.sample_rate as f32,
            &mut self.rng,
        )?;
        let banks = voices.iter().map(|v| v.oscillators.clone()).collect();
        let _ = session.render_tx.send(RenderCmd::ReplaceBanks(banks));
        let _ = session.tick_tx.send(TickCmd::ChangePhrase(phrase));
        session.voices = voices;
        session.report = report;
        Ok(())
    }

    pub fn is_playing(&self) -> bool {
        self.telemetry.is_playing()
    }

    /// Sample rate of the open pipeline, 0 before the first session.
    pub fn effective_sample_rate(&self) -> u32 {
        self.telemetry.sample_rate()
    }

    pub fn current_auto_wet(&self) -> f32 {
        self.telemetry.auto_wet()
    }

    pub fn current_user_wet(&self) -> f32 {
        self.telemetry.user_wet()
    }

    /// Rolling, downsampled view of the summed voices; always `SCOPE_LEN` long.
    pub fn waveform_snapshot(&self) -> Vec<f32> {
        let Ok(mut ring) = self.scope.lock() else {
            return vec![0.0; SCOPE_LEN];
        };
        if let Some(session) = self.session.as_ref() {
            for chunk in session.scope_rx.try_iter() {
                ring.push(&chunk);
            }
        }
        ring.snapshot()
    }

    /// Voices of the playing session, as built (before any per-sample advance).
    /// Empty once the session has stopped, including after a device loss.
    pub fn voices(&self) -> &[Voice] {
        match self.live_session() {
            Some(s) => &s.voices,
            None => &[],
        }
    }

    pub fn normalize_report(&self) -> Option<NormalizeReport> {
        self.live_session().map(|s| s.report)
    }

    fn live_session(&self) -> Option<&Session> {
        self.session.as_ref().filter(|_| self.telemetry.is_playing())
    }

    pub fn blocks_rendered(&self) -> u64 {
        self.telemetry.blocks_rendered()
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.stop();
    }
}
