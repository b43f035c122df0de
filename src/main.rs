// Entry point: plays a breathscape session on the default device, or renders it
// headless, until Ctrl-C or the configured duration.

use std::error::Error;
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use breathscape::Engine;
use breathscape::audio::{CpalPipeline, OutputGuardMode, WavOutput, offline};
use breathscape::breath::{BreathTimeSource, SystemBreathClock};
use breathscape::cli::Args;
use breathscape::config::AppConfig;
use clap::Parser;
use crossbeam_channel::bounded;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

const OFFLINE_CHUNK_FRAMES: usize = 1024;

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let mut cfg = AppConfig::load_or_default(&args.config);
    args.apply(&mut cfg);

    match run(&args, cfg) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args, cfg: AppConfig) -> Result<(), Box<dyn Error>> {
    let stop_flag = Arc::new(AtomicBool::new(false));
    let stop_flag_for_ctrlc = stop_flag.clone();
    ctrlc::set_handler(move || {
        stop_flag_for_ctrlc.store(true, Ordering::SeqCst);
    })?;

    let guard = cfg.audio.guard_mode().from_env_or();
    let source: Arc<dyn BreathTimeSource> = Arc::new(SystemBreathClock);
    if args.nodevice {
        run_offline(args, cfg, guard, source, &stop_flag)
    } else {
        run_device(args, cfg, guard, source, &stop_flag)
    }
}

fn deadline_reached(started: Instant, duration_sec: f64) -> bool {
    duration_sec > 0.0 && started.elapsed().as_secs_f64() >= duration_sec
}

fn run_device(
    args: &Args,
    cfg: AppConfig,
    guard: OutputGuardMode,
    source: Arc<dyn BreathTimeSource>,
    stop_flag: &AtomicBool,
) -> Result<(), Box<dyn Error>> {
    let mut pipeline = CpalPipeline::new(cfg.audio.latency_ms, guard);
    let mut wav_handle = None;
    if let Some(path) = args.wav.clone() {
        let sr = CpalPipeline::probe_sample_rate()?;
        let (tx, rx) = bounded(256);
        wav_handle = Some(WavOutput::run(rx, path, sr, 2)?);
        pipeline = pipeline.with_wav(tx);
    }

    let playback = cfg.playback.clone();
    let mut engine = Engine::new(cfg, Box::new(pipeline), source);
    engine.start(playback.frequency_hz, &playback.phrase, playback.binaural)?;

    let started = Instant::now();
    while engine.is_playing()
        && !stop_flag.load(Ordering::SeqCst)
        && !deadline_reached(started, playback.duration_sec)
    {
        thread::sleep(Duration::from_millis(100));
    }
    if !engine.is_playing() {
        info!("session ended by the output device");
    }
    engine.stop();
    drop(engine);
    if let Some(handle) = wav_handle {
        let _ = handle.join();
    }
    Ok(())
}

fn run_offline(
    args: &Args,
    cfg: AppConfig,
    guard: OutputGuardMode,
    source: Arc<dyn BreathTimeSource>,
    stop_flag: &AtomicBool,
) -> Result<(), Box<dyn Error>> {
    let sample_rate = cfg.audio.sample_rate;
    let (pipeline, mut handle) = offline(sample_rate, guard);
    let mut wav = None;
    if let Some(path) = args.wav.clone() {
        let (tx, rx) = bounded(256);
        wav = Some((tx, WavOutput::run(rx, path, sample_rate, 2)?));
    }

    let playback = cfg.playback.clone();
    let mut engine = Engine::new(cfg, Box::new(pipeline), source);
    engine.start(playback.frequency_hz, &playback.phrase, playback.binaural)?;

    let chunk = Duration::from_secs_f64(OFFLINE_CHUNK_FRAMES as f64 / sample_rate.max(1) as f64);
    let started = Instant::now();
    let mut next_deadline = started;
    let mut last_report = started;
    while engine.is_playing()
        && !stop_flag.load(Ordering::SeqCst)
        && !deadline_reached(started, playback.duration_sec)
    {
        next_deadline += chunk;
        let frames = handle.render(OFFLINE_CHUNK_FRAMES);
        if let Some((tx, _)) = wav.as_ref() {
            let _ = tx.send(Arc::from(frames));
        }
        if last_report.elapsed() >= Duration::from_secs(1) {
            last_report = Instant::now();
            let scope = engine.waveform_snapshot();
            let peak = scope.iter().fold(0.0f32, |m, s| m.max(s.abs()));
            debug!(
                "scope peak {peak:.3}, auto wet {:.3}, blocks {}",
                engine.current_auto_wet(),
                engine.blocks_rendered()
            );
        }
        let now = Instant::now();
        if next_deadline > now {
            thread::sleep(next_deadline - now);
        } else {
            next_deadline = now;
        }
    }
    engine.stop();
    if let Some((tx, join)) = wav {
        drop(tx);
        let _ = join.join();
    }
    Ok(())
}
