use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use breathscape::Engine;
use breathscape::audio::{
    Block, DeviceState, OutputError, OutputGuardMode, OutputPipeline, PipelineLink, offline,
};
use breathscape::breath::NoBreathClock;
use breathscape::config::AppConfig;
use breathscape::engine::{BUFFERS_PER_VOICE, VOICE_COUNT};

const IN_FLIGHT: usize = BUFFERS_PER_VOICE * VOICE_COUNT;

/// Hands the link to the test instead of playing it.
#[derive(Clone, Default)]
struct CapturePipeline {
    link: Arc<Mutex<Option<PipelineLink>>>,
    closes: Arc<AtomicUsize>,
}

impl OutputPipeline for CapturePipeline {
    fn open(&mut self, link: PipelineLink) -> Result<u32, OutputError> {
        *self.link.lock().unwrap() = Some(link);
        Ok(48_000)
    }

    fn close(&mut self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}

fn take_link(capture: &CapturePipeline) -> PipelineLink {
    capture.link.lock().unwrap().take().unwrap()
}

fn collect(link: &PipelineLink, n: usize) -> Vec<Block> {
    (0..n)
        .map(|_| link.blocks.recv_timeout(Duration::from_secs(2)).unwrap())
        .collect()
}

fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    cond()
}

#[test]
fn interrupt_pauses_and_lost_stops() {
    let capture = CapturePipeline::default();
    let mut cfg = AppConfig::default();
    cfg.engine.seed = Some(5);
    let mut engine = Engine::new(cfg, Box::new(capture.clone()), Arc::new(NoBreathClock));
    engine.start(144.0, "Shoh Mek", true).unwrap();
    let link = take_link(&capture);

    let first = collect(&link, IN_FLIGHT);
    assert!(first.iter().all(|b| b.seq < BUFFERS_PER_VOICE as u64));
    // Every buffer is armed: nothing more until one comes back.
    assert!(link.blocks.recv_timeout(Duration::from_millis(100)).is_err());
    assert!(wait_until(|| engine.blocks_rendered() == IN_FLIGHT as u64));

    link.status.set(DeviceState::Interrupted);
    for block in first {
        link.returns.send(block).unwrap();
    }
    thread::sleep(Duration::from_millis(100));
    assert!(link.blocks.try_recv().is_err());
    assert_eq!(engine.blocks_rendered(), IN_FLIGHT as u64);
    assert!(engine.is_playing());

    link.status.mark_running();
    let resumed = collect(&link, IN_FLIGHT);
    assert!(resumed.iter().all(|b| b.seq >= BUFFERS_PER_VOICE as u64));

    link.status.set(DeviceState::Lost);
    assert!(wait_until(|| !engine.is_playing()));
    link.status.set(DeviceState::Running);
    assert_eq!(link.status.get(), DeviceState::Lost);

    // The dead session is no longer reported, and the next control call
    // releases it and closes the pipeline.
    assert!(engine.voices().is_empty());
    assert!(engine.normalize_report().is_none());
    assert_eq!(capture.closes.load(Ordering::SeqCst), 0);
    engine.set_user_wet_override(0.2);
    assert_eq!(engine.current_user_wet(), 0.0);
    assert_eq!(capture.closes.load(Ordering::SeqCst), 1);
    engine.stop();
    assert_eq!(capture.closes.load(Ordering::SeqCst), 1);
}

#[test]
fn phrase_change_after_loss_releases_the_session() {
    let capture = CapturePipeline::default();
    let mut cfg = AppConfig::default();
    cfg.engine.seed = Some(6);
    let mut engine = Engine::new(cfg, Box::new(capture.clone()), Arc::new(NoBreathClock));
    engine.start(144.0, "Shoh Mek", false).unwrap();
    let link = take_link(&capture);

    link.status.set(DeviceState::Lost);
    assert!(wait_until(|| !engine.is_playing()));
    engine.change_phrase_preset("Vey Ora").unwrap();
    assert_eq!(capture.closes.load(Ordering::SeqCst), 1);
    assert!(engine.voices().is_empty());

    // A fresh start works after the loss.
    engine.start(144.0, "Shoh Mek", false).unwrap();
    assert!(engine.is_playing());
    assert_eq!(engine.voices().len(), VOICE_COUNT);
    engine.stop();
}

#[test]
fn offline_handle_is_silent_while_interrupted() {
    let (pipeline, mut handle) = offline(48_000, OutputGuardMode::default());
    let mut cfg = AppConfig::default();
    cfg.engine.seed = Some(9);
    let mut engine = Engine::new(cfg, Box::new(pipeline), Arc::new(NoBreathClock));
    engine.start(144.0, "Shoh Mek", true).unwrap();
    handle.render(1024);

    handle.interrupt();
    let before = handle.blocks_received();
    assert!(handle.render(2048).iter().all(|&s| s == 0.0));
    assert_eq!(handle.blocks_received(), before);

    handle.resume();
    handle.render(2048);
    assert!(handle.blocks_received() > before);

    handle.lose();
    assert!(wait_until(|| !engine.is_playing()));
    engine.stop();
}

#[test]
fn failed_open_can_be_retried() {
    let pipeline = breathscape::audio::OfflinePipeline::failing(OutputError::NoDevice);
    let mut engine = Engine::new(AppConfig::default(), Box::new(pipeline), Arc::new(NoBreathClock));
    assert!(engine.start(144.0, "Shoh Mek", true).is_err());
    assert!(engine.start(144.0, "Shoh Mek", true).is_err());
    assert!(!engine.is_playing());
}
