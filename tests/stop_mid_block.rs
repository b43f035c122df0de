use std::sync::Arc;
use std::thread;
use std::time::Duration;

use breathscape::Engine;
use breathscape::audio::{OutputGuardMode, offline};
use breathscape::breath::NoBreathClock;
use breathscape::config::AppConfig;

#[test]
fn stop_halts_scheduling_and_everything_sent_is_played() {
    let (pipeline, mut handle) = offline(48_000, OutputGuardMode::default());
    let mut cfg = AppConfig::default();
    cfg.engine.seed = Some(3);
    let mut engine = Engine::new(cfg, Box::new(pipeline), Arc::new(NoBreathClock));
    engine.start(144.0, "Shoh Mek", true).unwrap();

    handle.render(2048);
    // Stop with the pipeline part-way into a block.
    handle.render(300);
    engine.stop();
    assert!(!engine.is_playing());

    let rendered = engine.blocks_rendered();
    assert!(rendered > 0);
    thread::sleep(Duration::from_millis(50));
    assert_eq!(engine.blocks_rendered(), rendered);

    for _ in 0..64 {
        if handle.is_finished() {
            break;
        }
        let audio = handle.render(1024);
        assert!(audio.iter().all(|s| s.is_finite()));
    }
    assert!(handle.is_finished());
    assert_eq!(handle.blocks_received(), rendered);
}

#[test]
fn stop_without_session_is_harmless() {
    let (pipeline, _handle) = offline(48_000, OutputGuardMode::default());
    let mut engine = Engine::new(AppConfig::default(), Box::new(pipeline), Arc::new(NoBreathClock));
    engine.stop();
    engine.stop();
    assert!(!engine.is_playing());
}
