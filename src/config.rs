use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::warn;

use crate::audio::output_guard::{OUTPUT_CEILING, OutputGuardMode};
use crate::breath::clock::{DEFAULT_MAX_DRIFT_PPM, NOMINAL_BREATH_SEC, RELOCK_EVERY};
use crate::breath::mix::WET_CAP;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    #[serde(default = "AudioConfig::default_sample_rate")]
    pub sample_rate: u32,
    #[serde(default = "AudioConfig::default_latency_ms")]
    pub latency_ms: f32,
    /// Samples per rendered block.
    #[serde(default = "AudioConfig::default_block_len")]
    pub block_len: usize,
    #[serde(default)]
    pub output_guard: OutputGuardSetting,
    #[serde(default = "AudioConfig::default_ceiling")]
    pub ceiling: f32,
}

impl AudioConfig {
    fn default_sample_rate() -> u32 {
        48_000
    }
    fn default_latency_ms() -> f32 {
        50.0
    }
    fn default_block_len() -> usize {
        1024
    }
    fn default_ceiling() -> f32 {
        OUTPUT_CEILING
    }

    pub fn guard_mode(&self) -> OutputGuardMode {
        let ceiling = if self.ceiling.is_finite() {
            self.ceiling.clamp(0.0, OUTPUT_CEILING)
        } else {
            OUTPUT_CEILING
        };
        match self.output_guard {
            OutputGuardSetting::None => OutputGuardMode::None,
            OutputGuardSetting::SoftClip => OutputGuardMode::soft_clip(ceiling),
            OutputGuardSetting::PeakLimiter => OutputGuardMode::peak_limiter(ceiling),
        }
    }
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: Self::default_sample_rate(),
            latency_ms: Self::default_latency_ms(),
            block_len: Self::default_block_len(),
            output_guard: OutputGuardSetting::default(),
            ceiling: Self::default_ceiling(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum OutputGuardSetting {
    None,
    SoftClip,
    #[default]
    PeakLimiter,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "EngineConfig::default_tick_hz")]
    pub tick_hz: f64,
    #[serde(default = "EngineConfig::default_breath_sec")]
    pub breath_sec: f64,
    /// Breath boundaries between silence dips and relocks.
    #[serde(default = "EngineConfig::default_relock_every")]
    pub relock_every: u32,
    #[serde(default = "EngineConfig::default_fetch_timeout_ms")]
    pub fetch_timeout_ms: u64,
    #[serde(default = "EngineConfig::default_max_drift_ppm")]
    pub max_drift_ppm: f64,
    #[serde(default = "EngineConfig::default_wet_cap")]
    pub wet_cap: f32,
    /// Fixed seed for oscillator phases and drift; random when unset.
    #[serde(default)]
    pub seed: Option<u64>,
}

impl EngineConfig {
    fn default_tick_hz() -> f64 {
        60.0
    }
    fn default_breath_sec() -> f64 {
        NOMINAL_BREATH_SEC
    }
    fn default_relock_every() -> u32 {
        RELOCK_EVERY
    }
    fn default_fetch_timeout_ms() -> u64 {
        1500
    }
    fn default_max_drift_ppm() -> f64 {
        DEFAULT_MAX_DRIFT_PPM
    }
    fn default_wet_cap() -> f32 {
        WET_CAP
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tick_hz: Self::default_tick_hz(),
            breath_sec: Self::default_breath_sec(),
            relock_every: Self::default_relock_every(),
            fetch_timeout_ms: Self::default_fetch_timeout_ms(),
            max_drift_ppm: Self::default_max_drift_ppm(),
            wet_cap: Self::default_wet_cap(),
            seed: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaybackConfig {
    #[serde(default = "PlaybackConfig::default_frequency_hz")]
    pub frequency_hz: f64,
    #[serde(default = "PlaybackConfig::default_phrase")]
    pub phrase: String,
    #[serde(default = "PlaybackConfig::default_binaural")]
    pub binaural: bool,
    /// 0 plays until interrupted.
    #[serde(default)]
    pub duration_sec: f64,
}

impl PlaybackConfig {
    fn default_frequency_hz() -> f64 {
        144.0
    }
    fn default_phrase() -> String {
        "Shoh Mek".to_string()
    }
    fn default_binaural() -> bool {
        true
    }
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            frequency_hz: Self::default_frequency_hz(),
            phrase: Self::default_phrase(),
            binaural: Self::default_binaural(),
            duration_sec: 0.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub audio: AudioConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub playback: PlaybackConfig,
}

impl AppConfig {
    fn format_float_compact(x: f64) -> String {
        let mut s = format!("{:.6}", x);
        while s.contains('.') && s.ends_with('0') {
            s.pop();
        }
        if s.ends_with('.') {
            s.push('0');
        }
        s
    }

    /// Defaults as TOML with every key commented out.
    fn commented_defaults(cfg: &Self) -> Option<String> {
        let text = toml::to_string_pretty(cfg).ok()?;
        let mut commented = String::new();
        for line in text.lines() {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                commented.push('\n');
            } else if trimmed.starts_with('[') && trimmed.ends_with(']') {
                commented.push_str(line);
                commented.push('\n');
            } else {
                let mut out_line = line.to_string();
                if let Some((lhs, rhs)) = line.split_once('=') {
                    let rhs = rhs.trim();
                    if rhs.contains('.') && !rhs.contains('"') {
                        if let Ok(val) = rhs.parse::<f64>() {
                            out_line =
                                format!("{} = {}", lhs.trim(), Self::format_float_compact(val));
                        }
                    }
                }
                commented.push_str("# ");
                commented.push_str(&out_line);
                commented.push('\n');
            }
        }
        Some(commented)
    }

    pub fn load_or_default(path: &str) -> Self {
        let path_obj = Path::new(path);
        if path_obj.exists() {
            match fs::read_to_string(path_obj) {
                Ok(contents) => match toml::from_str(&contents) {
                    Ok(cfg) => return cfg,
                    Err(err) => warn!("Failed to parse config {path}: {err}. Using defaults."),
                },
                Err(err) => warn!("Failed to read config {path}: {err}. Using defaults."),
            }
            return Self::default();
        }

        // File does not exist: write defaults and return them.
        let default_cfg = Self::default();
        match Self::commented_defaults(&default_cfg) {
            Some(text) => {
                if let Err(err) = fs::write(path_obj, text) {
                    warn!("Failed to write default config to {path}: {err}");
                }
            }
            None => warn!("Failed to serialize default config; continuing with defaults"),
        }
        default_cfg
    }
}
