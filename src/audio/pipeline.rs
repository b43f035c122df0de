//! Boundary between the engine and the downstream audio pipeline.
//!
//! The engine pushes finished mono blocks per voice and a scene (poses + send levels);
//! the pipeline hands each block back once it has been played.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use crossbeam_channel::{Receiver, Sender};

use crate::breath::mix::MixTargets;
use crate::core::timebase::Tick;
use crate::core::vec3::Vec3;
use crate::engine::voice::VOICE_COUNT;

/// One rendered block of a single voice.
#[derive(Debug)]
pub struct Block {
    pub voice: usize,
    pub seq: u64,
    pub start_tick: Tick,
    pub samples: Vec<f32>,
}

/// Per-tick state of the downstream scene.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SceneFrame {
    pub poses: [Vec3; VOICE_COUNT],
    pub mix: MixTargets,
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceState {
    Running = 0,
    /// Temporarily not consuming; rendering pauses in place.
    Interrupted = 1,
    /// Gone for good; the session stops.
    Lost = 2,
}

/// Device state shared between the pipeline and the render context.
#[derive(Debug, Default)]
pub struct DeviceStatus(AtomicU8);

impl DeviceStatus {
    pub fn get(&self) -> DeviceState {
        match self.0.load(Ordering::Acquire) {
            0 => DeviceState::Running,
            1 => DeviceState::Interrupted,
            _ => DeviceState::Lost,
        }
    }

    pub fn set(&self, state: DeviceState) {
        // Lost is terminal.
        let _ = self
            .0
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |cur| {
                if cur == DeviceState::Lost as u8 {
                    None
                } else {
                    Some(state as u8)
                }
            });
    }

    /// Called from the device side whenever it consumes audio again.
    pub fn mark_running(&self) {
        let _ = self.0.compare_exchange(
            DeviceState::Interrupted as u8,
            DeviceState::Running as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }
}

/// Everything a pipeline needs to serve one session.
pub struct PipelineLink {
    pub voices: usize,
    pub block_len: usize,
    pub blocks: Receiver<Block>,
    pub returns: Sender<Block>,
    pub scene: Receiver<SceneFrame>,
    pub status: Arc<DeviceStatus>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum OutputError {
    NoDevice,
    Config(String),
    Build(String),
    Play(String),
}

impl fmt::Display for OutputError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputError::NoDevice => write!(f, "no output device available"),
            OutputError::Config(e) => write!(f, "output device config: {e}"),
            OutputError::Build(e) => write!(f, "failed to build output stream: {e}"),
            OutputError::Play(e) => write!(f, "failed to start output stream: {e}"),
        }
    }
}

impl std::error::Error for OutputError {}

/// Downstream pipeline: spatializes the voices, applies the wet chain and the
/// output guard, and drives the device.
pub trait OutputPipeline {
    /// Open for one session and return the effective sample rate.
    fn open(&mut self, link: PipelineLink) -> Result<u32, OutputError>;
    fn close(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lost_is_terminal() {
        let status = DeviceStatus::default();
        assert_eq!(status.get(), DeviceState::Running);
        status.set(DeviceState::Interrupted);
        assert_eq!(status.get(), DeviceState::Interrupted);
        status.mark_running();
        assert_eq!(status.get(), DeviceState::Running);
        status.set(DeviceState::Lost);
        status.set(DeviceState::Running);
        status.mark_running();
        assert_eq!(status.get(), DeviceState::Lost);
    }
}
