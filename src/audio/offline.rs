//! Pull-driven pipeline: the caller asks for frames instead of a device clock.
//! Used headless and in tests.

use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, unbounded};

use crate::audio::mixer::{CHANNELS, MixerStats, StereoMixer};
use crate::audio::output_guard::OutputGuardMode;
use crate::audio::pipeline::{DeviceState, OutputError, OutputPipeline, PipelineLink};

/// How long a pull waits for the render thread before a voice underruns.
const BLOCK_WAIT: Duration = Duration::from_secs(1);

pub struct OfflinePipeline {
    sample_rate: u32,
    guard: OutputGuardMode,
    sessions: Sender<StereoMixer>,
    fail_with: Option<OutputError>,
}

/// Caller side of an `OfflinePipeline`: pulls mixed audio and plays the device.
pub struct OfflineHandle {
    sessions: Receiver<StereoMixer>,
    current: Option<StereoMixer>,
}

/// A connected pipeline/handle pair.
pub fn offline(sample_rate: u32, guard: OutputGuardMode) -> (OfflinePipeline, OfflineHandle) {
    let (tx, rx) = unbounded();
    (
        OfflinePipeline {
            sample_rate,
            guard,
            sessions: tx,
            fail_with: None,
        },
        OfflineHandle {
            sessions: rx,
            current: None,
        },
    )
}

impl OfflinePipeline {
    /// A pipeline whose `open` always fails with `err`.
    pub fn failing(err: OutputError) -> Self {
        let (tx, _) = unbounded();
        Self {
            sample_rate: 0,
            guard: OutputGuardMode::None,
            sessions: tx,
            fail_with: Some(err),
        }
    }
}

impl OutputPipeline for OfflinePipeline {
    fn open(&mut self, link: PipelineLink) -> Result<u32, OutputError> {
        if let Some(err) = self.fail_with.clone() {
            return Err(err);
        }
        if self.sample_rate == 0 {
            return Err(OutputError::Config("sample rate is zero".into()));
        }
        let mixer = StereoMixer::new(link, self.sample_rate, self.guard);
        self.sessions
            .send(mixer)
            .map_err(|_| OutputError::Build("offline handle dropped".into()))?;
        Ok(self.sample_rate)
    }

    fn close(&mut self) {}
}

impl OfflineHandle {
    fn session(&mut self) -> Option<&mut StereoMixer> {
        while let Ok(mixer) = self.sessions.try_recv() {
            self.current = Some(mixer);
        }
        self.current.as_mut()
    }

    /// Pull `frames` interleaved stereo frames. Silence while the device is
    /// interrupted or lost, or before any session was opened.
    pub fn render(&mut self, frames: usize) -> Vec<f32> {
        let mut out = vec![0.0f32; frames * CHANNELS];
        self.render_into(&mut out);
        out
    }

    pub fn render_into(&mut self, out: &mut [f32]) {
        let Some(mixer) = self.session() else {
            out.fill(0.0);
            return;
        };
        let status = mixer.status();
        if status.get() != DeviceState::Running {
            out.fill(0.0);
            return;
        }
        mixer.fill(out, Some(BLOCK_WAIT));
        status.mark_running();
    }

    pub fn interrupt(&mut self) {
        if let Some(m) = self.session() {
            m.status().set(DeviceState::Interrupted);
        }
    }

    pub fn resume(&mut self) {
        if let Some(m) = self.session() {
            m.status().set(DeviceState::Running);
        }
    }

    pub fn lose(&mut self) {
        if let Some(m) = self.session() {
            m.status().set(DeviceState::Lost);
        }
    }

    pub fn stats(&mut self) -> Option<Arc<MixerStats>> {
        self.session().map(|m| m.stats())
    }

    pub fn blocks_received(&mut self) -> u64 {
        self.stats().map_or(0, |s| s.blocks_received())
    }

    /// True once the current session's engine side has gone and everything was played.
    pub fn is_finished(&mut self) -> bool {
        self.session().is_none_or(|m| m.is_finished())
    }
}
