//! The two per-session threads: the fixed-rate tick and the block renderer.

use std::sync::Arc;
use std::sync::atomic::AtomicUsize;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender, TrySendError, select};
use tracing::{debug, info, warn};

use crate::audio::pipeline::{Block, DeviceState, DeviceStatus, SceneFrame};
use crate::breath::phrase::Phrase;
use crate::breath::source::{BreathTimeSource, FetchKind, FetchReport, spawn_fetch};
use crate::core::timebase::Timebase;
use crate::engine::conductor::Conductor;
use crate::engine::renderer::{RenderSnapshot, SessionAnchor, VoiceRenderer};
use crate::engine::scheduler::BlockScheduler;
use crate::engine::telemetry::{ScopeAccumulator, ScopeChunk, Telemetry, downsample};
use crate::synth::oscillator::Oscillator;

const RENDER_POLL: Duration = Duration::from_millis(5);

#[derive(Debug)]
pub enum TickCmd {
    SetUserWet(f32),
    ChangePhrase(Phrase),
    Stop,
}

#[derive(Debug)]
pub enum RenderCmd {
    /// One rebuilt bank per voice, in voice order.
    ReplaceBanks(Vec<Vec<Oscillator>>),
    Stop,
}

/// Send `value`, evicting the oldest queued value when the channel is full.
/// Readers drain to the newest, so only the latest value matters.
pub(crate) fn publish_latest<T>(tx: &Sender<T>, rx: &Receiver<T>, value: T) {
    match tx.try_send(value) {
        Ok(()) | Err(TrySendError::Disconnected(_)) => {}
        Err(TrySendError::Full(value)) => {
            let _ = rx.try_recv();
            let _ = tx.try_send(value);
        }
    }
}

pub struct TickContext {
    pub conductor: Conductor,
    pub tick_hz: f64,
    pub generation: u64,
    pub session_start: Instant,
    pub cmds: Receiver<TickCmd>,
    pub snapshots: (Sender<RenderSnapshot>, Receiver<RenderSnapshot>),
    pub scene: (Sender<SceneFrame>, Receiver<SceneFrame>),
    pub fetches: (Sender<FetchReport>, Receiver<FetchReport>),
    pub source: Arc<dyn BreathTimeSource>,
    pub fetch_timeout: Duration,
    /// Source calls still running, shared across sessions of one engine.
    pub fetch_calls: Arc<AtomicUsize>,
    pub status: Arc<DeviceStatus>,
    pub telemetry: Arc<Telemetry>,
}

impl TickContext {
    fn fetch(&self, kind: FetchKind) {
        spawn_fetch(
            self.source.clone(),
            self.fetch_timeout,
            self.session_start,
            self.generation,
            kind,
            self.fetch_calls.clone(),
            self.fetches.0.clone(),
        );
    }
}

/// Sole writer of gate, mix and pose state. Deadline-paced; an overrun restarts
/// the schedule from now instead of bursting to catch up.
pub fn tick_loop(mut ctx: TickContext) {
    let period = Duration::from_secs_f64(1.0 / ctx.tick_hz.max(1.0));
    ctx.fetch(FetchKind::Align);

    let mut last = Instant::now();
    let mut next_deadline = last + period;
    'run: loop {
        loop {
            let wait = next_deadline.saturating_duration_since(Instant::now());
            select! {
                recv(ctx.cmds) -> cmd => match cmd {
                    Ok(TickCmd::SetUserWet(wet)) => ctx.conductor.set_user_wet(wet),
                    Ok(TickCmd::ChangePhrase(phrase)) => {
                        debug!("phrase -> {}", phrase.name);
                        ctx.conductor.change_phrase(phrase);
                    }
                    Ok(TickCmd::Stop) | Err(_) => break 'run,
                },
                default(wait) => break,
            }
        }

        if ctx.status.get() == DeviceState::Lost {
            break;
        }

        let now = Instant::now();
        let dt = now.duration_since(last).as_secs_f64();
        last = now;

        while let Ok(report) = ctx.fetches.1.try_recv() {
            if report.generation != ctx.generation {
                debug!("dropping breath fetch from session {}", report.generation);
                continue;
            }
            ctx.conductor.apply_fetch(report);
        }

        let out = ctx.conductor.tick(dt);
        if out.relock {
            ctx.fetch(FetchKind::Relock);
        }
        publish_latest(&ctx.snapshots.0, &ctx.snapshots.1, out.snapshot);
        publish_latest(&ctx.scene.0, &ctx.scene.1, out.scene);

        ctx.telemetry.set_auto_wet(ctx.conductor.mix_state().auto_wet_target);

        next_deadline += period;
        let now = Instant::now();
        if now > next_deadline {
            next_deadline = now + period;
        }
    }
    debug!("tick loop for session {} exited", ctx.generation);
}

pub struct RenderContext {
    pub renderers: Vec<VoiceRenderer>,
    pub scheduler: BlockScheduler,
    pub snapshot: RenderSnapshot,
    pub anchor: SessionAnchor,
    pub cmds: Receiver<RenderCmd>,
    pub snapshots: Receiver<RenderSnapshot>,
    pub blocks: Sender<Block>,
    pub returns: Receiver<Block>,
    pub scope: Sender<ScopeChunk>,
    pub status: Arc<DeviceStatus>,
    pub telemetry: Arc<Telemetry>,
}

enum Flow {
    Continue,
    Stop,
}

impl RenderContext {
    fn handle(&mut self, cmd: RenderCmd) -> Flow {
        match cmd {
            RenderCmd::ReplaceBanks(banks) => {
                for (renderer, bank) in self.renderers.iter_mut().zip(banks) {
                    renderer.replace_bank(bank);
                }
                Flow::Continue
            }
            RenderCmd::Stop => Flow::Stop,
        }
    }

    /// Render every job the scheduler will hand out right now.
    fn render_pending(&mut self, scope: &mut ScopeAccumulator) -> Flow {
        let snapshot = self.anchor.localize(&self.snapshot);
        while let Some(mut job) = self.scheduler.next_job() {
            let Some(renderer) = self.renderers.get_mut(job.voice) else {
                self.scheduler.cancel(job);
                continue;
            };
            renderer.render(&snapshot, job.start_tick, &mut job.buffer);
            let points = downsample(&job.buffer);
            let seq = job.seq;
            match self.blocks.try_send(job.into_block()) {
                Ok(()) => {
                    self.telemetry.count_block();
                    if let Some(chunk) = scope.add(seq, &points) {
                        let _ = self.scope.try_send(chunk);
                    }
                }
                Err(TrySendError::Full(block)) => {
                    warn!("block queue full; voice {} seq {}", block.voice, block.seq);
                    self.scheduler.recycle(block);
                    break;
                }
                Err(TrySendError::Disconnected(_)) => return Flow::Stop,
            }
        }
        Flow::Continue
    }
}

/// Keeps every voice two blocks ahead of the pipeline. Never locks; blocks only
/// in `select!` while idle.
pub fn render_loop(mut ctx: RenderContext, timebase: Timebase) {
    let mut scope = ScopeAccumulator::new(ctx.renderers.len());
    let mut paused = false;
    debug!(
        "render loop: {} voices, {} samples per block at {} Hz",
        ctx.renderers.len(),
        timebase.block_len,
        timebase.fs
    );
    loop {
        while let Ok(cmd) = ctx.cmds.try_recv() {
            if let Flow::Stop = ctx.handle(cmd) {
                ctx.scheduler.halt();
                return;
            }
        }
        let mut fresh = false;
        while let Ok(snapshot) = ctx.snapshots.try_recv() {
            ctx.snapshot = snapshot;
            fresh = true;
        }
        if fresh
            && ctx
                .anchor
                .follow(&ctx.snapshot, ctx.scheduler.frontier_tick(), &timebase)
        {
            debug!("render clock re-anchored, offset {:.3} s", ctx.anchor.offset_sec());
        }
        while let Ok(block) = ctx.returns.try_recv() {
            ctx.scheduler.recycle(block);
        }

        match ctx.status.get() {
            DeviceState::Lost => {
                warn!("output device lost; stopping session");
                ctx.scheduler.halt();
                ctx.telemetry.set_playing(false);
                return;
            }
            DeviceState::Interrupted => {
                if !paused {
                    info!("output interrupted; rendering paused");
                    paused = true;
                }
            }
            DeviceState::Running => {
                if paused {
                    info!("output resumed");
                    ctx.anchor
                        .reset(&ctx.snapshot, ctx.scheduler.frontier_tick(), &timebase);
                    paused = false;
                }
                if let Flow::Stop = ctx.render_pending(&mut scope) {
                    ctx.scheduler.halt();
                    return;
                }
            }
        }

        select! {
            recv(ctx.cmds) -> cmd => match cmd {
                Ok(cmd) => {
                    if let Flow::Stop = ctx.handle(cmd) {
                        ctx.scheduler.halt();
                        return;
                    }
                }
                Err(_) => return,
            },
            recv(ctx.returns) -> block => {
                if let Ok(block) = block {
                    ctx.scheduler.recycle(block);
                }
            },
            default(RENDER_POLL) => {},
        }
    }
}
