//! Real-time device output through cpal. A pump thread runs the mixer and keeps a
//! ring buffer topped up; the device callback only pops samples.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use crossbeam_channel::Sender;
use ringbuf::traits::*;
use ringbuf::{HeapCons, HeapProd, HeapRb};
use tracing::{debug, info, warn};

use crate::audio::mixer::{CHANNELS, StereoMixer};
use crate::audio::output_guard::{GuardMeter, OutputGuardMode};
use crate::audio::pipeline::{DeviceState, DeviceStatus, OutputError, OutputPipeline, PipelineLink};

const PUMP_IDLE: Duration = Duration::from_millis(2);
const PUMP_CHUNK_FRAMES: usize = 256;
/// Longest the pump waits for a late voice block before mixing it as silence.
const PUMP_BLOCK_WAIT: Duration = Duration::from_millis(10);

struct Running {
    stream: cpal::Stream,
    pump: Option<JoinHandle<()>>,
    stop: Arc<AtomicBool>,
}

pub struct CpalPipeline {
    latency_ms: f32,
    guard: OutputGuardMode,
    wav: Option<Sender<Arc<[f32]>>>,
    meter: Arc<GuardMeter>,
    running: Option<Running>,
}

impl CpalPipeline {
    pub fn new(latency_ms: f32, guard: OutputGuardMode) -> Self {
        Self {
            latency_ms,
            guard,
            wav: None,
            meter: Arc::new(GuardMeter::default()),
            running: None,
        }
    }

    /// Tee the mixed stereo output to a WAV writer.
    pub fn with_wav(mut self, tx: Sender<Arc<[f32]>>) -> Self {
        self.wav = Some(tx);
        self
    }

    pub fn meter(&self) -> Arc<GuardMeter> {
        self.meter.clone()
    }

    /// Sample rate of the default output device, if there is one.
    pub fn probe_sample_rate() -> Result<u32, OutputError> {
        let device = cpal::default_host()
            .default_output_device()
            .ok_or(OutputError::NoDevice)?;
        let config = device
            .default_output_config()
            .map_err(|e| OutputError::Config(e.to_string()))?;
        Ok(config.sample_rate().0)
    }
}

impl OutputPipeline for CpalPipeline {
    fn open(&mut self, link: PipelineLink) -> Result<u32, OutputError> {
        self.close();
        let host = cpal::default_host();
        let device = host.default_output_device().ok_or(OutputError::NoDevice)?;
        let supported = device
            .default_output_config()
            .map_err(|e| OutputError::Config(e.to_string()))?;
        let sample_rate = supported.sample_rate().0;
        let device_channels = supported.channels() as usize;
        let config = cpal::StreamConfig {
            channels: supported.channels(),
            sample_rate: cpal::SampleRate(sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let latency_frames = ((sample_rate as f32 * self.latency_ms / 1000.0) as usize).max(PUMP_CHUNK_FRAMES);
        let rb = HeapRb::<f32>::new(latency_frames * CHANNELS * 2);
        let (prod, mut cons): (HeapProd<f32>, HeapCons<f32>) = rb.split();

        let status = link.status.clone();
        let cb_status = status.clone();
        let err_status = status.clone();
        let stream = device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    cb_status.mark_running();
                    for frame in data.chunks_mut(device_channels.max(1)) {
                        let l = cons.try_pop().unwrap_or(0.0);
                        let r = cons.try_pop().unwrap_or(0.0);
                        match frame.len() {
                            1 => frame[0] = 0.5 * (l + r),
                            _ => {
                                frame[0] = l;
                                frame[1] = r;
                                for s in frame.iter_mut().skip(2) {
                                    *s = 0.0;
                                }
                            }
                        }
                    }
                },
                move |err| match err {
                    cpal::StreamError::DeviceNotAvailable => {
                        warn!("output device not available");
                        err_status.set(DeviceState::Lost);
                    }
                    other => {
                        warn!("output stream error: {other}");
                        err_status.set(DeviceState::Interrupted);
                    }
                },
                None,
            )
            .map_err(|e| OutputError::Build(e.to_string()))?;
        stream.play().map_err(|e| OutputError::Play(e.to_string()))?;

        let mixer = StereoMixer::new(link, sample_rate, self.guard).with_meter(self.meter.clone());
        let stop = Arc::new(AtomicBool::new(false));
        let pump_stop = stop.clone();
        let wav = self.wav.clone();
        let pump = thread::Builder::new()
            .name("breathscape-pump".into())
            .spawn(move || pump_loop(mixer, prod, status, pump_stop, wav))
            .map_err(|e| OutputError::Build(e.to_string()))?;

        info!("output open: {sample_rate} Hz, {device_channels} ch, {} ms buffer", self.latency_ms);
        self.running = Some(Running {
            stream,
            pump: Some(pump),
            stop,
        });
        Ok(sample_rate)
    }

    fn close(&mut self) {
        let Some(mut running) = self.running.take() else {
            return;
        };
        running.stop.store(true, Ordering::SeqCst);
        if let Some(pump) = running.pump.take() {
            let _ = pump.join();
        }
        if let Err(err) = running.stream.pause() {
            debug!("pause on close failed: {err}");
        }
        drop(running.stream);
        if let Some((n, db)) = self.meter.take() {
            info!("output guard engaged on {n} buffers, max reduction {db:.1} dB");
        }
    }
}

impl Drop for CpalPipeline {
    fn drop(&mut self) {
        self.close();
    }
}

fn pump_loop(
    mut mixer: StereoMixer,
    mut prod: HeapProd<f32>,
    status: Arc<DeviceStatus>,
    stop: Arc<AtomicBool>,
    wav: Option<Sender<Arc<[f32]>>>,
) {
    let mut scratch = vec![0.0f32; PUMP_CHUNK_FRAMES * CHANNELS];
    while !stop.load(Ordering::SeqCst) {
        if status.get() != DeviceState::Running || prod.vacant_len() < scratch.len() {
            thread::sleep(PUMP_IDLE);
            continue;
        }
        mixer.fill(&mut scratch, Some(PUMP_BLOCK_WAIT));
        let written = prod.push_slice(&scratch);
        if written < scratch.len() {
            debug!("ring buffer overflow: dropped {} samples", scratch.len() - written);
        }
        if let Some(tx) = wav.as_ref() {
            let _ = tx.try_send(Arc::from(scratch.as_slice()));
        }
    }
    let underruns = mixer.stats().underruns();
    if underruns > 0 {
        warn!("{underruns} voice blocks missed their slot");
    }
}
