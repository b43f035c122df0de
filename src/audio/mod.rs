pub mod mixer;
pub mod offline;
pub mod output;
pub mod output_guard;
pub mod pipeline;
pub mod writer;

pub use mixer::StereoMixer;
pub use offline::{OfflineHandle, OfflinePipeline, offline};
pub use output::CpalPipeline;
pub use output_guard::{OUTPUT_CEILING, OutputGuard, OutputGuardMode};
pub use pipeline::{Block, DeviceState, DeviceStatus, OutputError, OutputPipeline, PipelineLink, SceneFrame};
pub use writer::WavOutput;
