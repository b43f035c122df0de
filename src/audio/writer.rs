use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::Receiver;
use hound::{SampleFormat, WavSpec, WavWriter};
use tracing::{info, warn};

/// Writes interleaved chunks to a 16-bit WAV file until the sender side is dropped.
pub struct WavOutput;

impl WavOutput {
    pub fn run(
        rx: Receiver<Arc<[f32]>>,
        path: String,
        sample_rate: u32,
        channels: u16,
    ) -> io::Result<JoinHandle<()>> {
        let spec = WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let mut writer = WavWriter::create(&path, spec).map_err(io::Error::other)?;
        thread::Builder::new().name("wav-writer".into()).spawn(move || {
            let mut frames = 0u64;
            'recv: while let Ok(samples) = rx.recv() {
                for &s in samples.iter() {
                    let v = (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
                    if let Err(err) = writer.write_sample(v) {
                        warn!("wav write to {path} failed: {err}");
                        break 'recv;
                    }
                }
                frames += (samples.len() / channels.max(1) as usize) as u64;
            }
            match writer.finalize() {
                Ok(()) => info!("wrote {frames} frames to {path}"),
                Err(err) => warn!("failed to finalize {path}: {err}"),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::unbounded;

    #[test]
    fn writes_stereo_frames() {
        let mut path = std::env::temp_dir();
        path.push(format!(
            "breathscape_wav_test_{}.wav",
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap()
                .as_nanos()
        ));
        let (tx, rx) = unbounded::<Arc<[f32]>>();
        let handle = WavOutput::run(rx, path.to_string_lossy().to_string(), 48_000, 2).unwrap();
        tx.send(Arc::from(vec![0.5f32, -0.5, 0.25, -0.25])).unwrap();
        drop(tx);
        handle.join().unwrap();

        let reader = hound::WavReader::open(&path).unwrap();
        assert_eq!(reader.spec().channels, 2);
        assert_eq!(reader.duration(), 2);
        let _ = std::fs::remove_file(&path);
    }
}
