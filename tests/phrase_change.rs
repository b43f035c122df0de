use std::sync::Arc;

use breathscape::Engine;
use breathscape::audio::{OutputGuardMode, offline};
use breathscape::breath::NoBreathClock;
use breathscape::config::AppConfig;
use breathscape::engine::VOICE_COUNT;
use breathscape::synth::MAX_TOTAL_GAIN;

fn engine() -> (Engine, breathscape::audio::OfflineHandle) {
    let (pipeline, handle) = offline(48_000, OutputGuardMode::default());
    let mut cfg = AppConfig::default();
    cfg.engine.seed = Some(11);
    (Engine::new(cfg, Box::new(pipeline), Arc::new(NoBreathClock)), handle)
}

fn total_energy(engine: &Engine) -> f64 {
    engine.voices().iter().map(|v| v.energy()).sum()
}

#[test]
fn change_rebuilds_every_voice_within_budget() {
    let (mut engine, mut handle) = engine();
    engine.start(144.0, "Shoh Mek", true).unwrap();
    handle.render(2048);

    engine.change_phrase_preset("Vey Ora").unwrap();
    assert_eq!(engine.voices().len(), VOICE_COUNT);
    assert!(total_energy(&engine) <= MAX_TOTAL_GAIN as f64 + 1e-5);
    let first = engine.voices()[0].oscillators.len();

    engine.change_phrase_preset("Vey Ora").unwrap();
    assert_eq!(engine.voices()[0].oscillators.len(), first);
    assert!(total_energy(&engine) <= MAX_TOTAL_GAIN as f64 + 1e-5);

    let audio = handle.render(4096);
    assert!(audio.iter().all(|s| s.is_finite()));
    assert!(engine.is_playing());
    engine.stop();
}

#[test]
fn unknown_phrase_is_accepted() {
    let (mut engine, mut handle) = engine();
    engine.start(432.0, "Shoh Mek", false).unwrap();
    engine.change_phrase_preset("no such phrase").unwrap();
    assert!(total_energy(&engine) <= MAX_TOTAL_GAIN as f64 + 1e-5);
    handle.render(1024);
    engine.stop();
}

#[test]
fn change_without_session_is_a_no_op() {
    let (mut engine, _handle) = engine();
    engine.change_phrase_preset("Vey Ora").unwrap();
    assert!(engine.voices().is_empty());
    assert!(!engine.is_playing());
}
