use clap::Parser;

use crate::config::AppConfig;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about)]
pub struct Args {
    /// Path to config TOML
    #[arg(long, default_value = "breathscape.toml")]
    pub config: String,

    /// Base frequency in Hz (overrides config)
    #[arg(long)]
    pub freq: Option<f64>,

    /// Phrase preset name (overrides config)
    #[arg(long)]
    pub phrase: Option<String>,

    /// Offset the right core for a binaural beat (overrides config)
    #[arg(long, num_args = 0..=1, default_missing_value = "true")]
    pub binaural: Option<bool>,

    /// Write audio to wav file
    #[arg(long)]
    pub wav: Option<String>,

    /// Stop after this many seconds; 0 runs until Ctrl-C (overrides config)
    #[arg(long)]
    pub seconds: Option<f64>,

    /// Render without an output device, paced in real time
    #[arg(long, default_value_t = false)]
    pub nodevice: bool,
}

impl Args {
    pub fn apply(&self, cfg: &mut AppConfig) {
        if let Some(freq) = self.freq {
            cfg.playback.frequency_hz = freq;
        }
        if let Some(phrase) = self.phrase.as_ref() {
            cfg.playback.phrase = phrase.clone();
        }
        if let Some(binaural) = self.binaural {
            cfg.playback.binaural = binaural;
        }
        if let Some(seconds) = self.seconds {
            cfg.playback.duration_sec = seconds.max(0.0);
        }
    }
}
