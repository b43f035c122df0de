//! Default downstream mixer: pans each voice from its pose, feeds a damped stereo
//! feedback delay as the wet chain and limits the result.

use std::collections::VecDeque;
use std::f32::consts::FRAC_PI_2;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};

use crate::audio::output_guard::{GuardMeter, OutputGuard, OutputGuardMode};
use crate::audio::pipeline::{Block, DeviceStatus, PipelineLink, SceneFrame};
use crate::breath::mix::{DELAY_MAX_SEC, MixTargets};
use crate::core::vec3::Vec3;
use crate::synth::util::flush_denorm;

pub const CHANNELS: usize = 2;
/// Lowpass coefficient in the feedback path.
const DAMPING: f32 = 0.35;
const DELAY_GLIDE_SEC: f32 = 0.08;

#[derive(Debug, Default)]
pub struct MixerStats {
    blocks_received: AtomicU64,
    blocks_consumed: AtomicU64,
    underruns: AtomicU64,
}

impl MixerStats {
    pub fn blocks_received(&self) -> u64 {
        self.blocks_received.load(Ordering::Relaxed)
    }

    pub fn blocks_consumed(&self) -> u64 {
        self.blocks_consumed.load(Ordering::Relaxed)
    }

    pub fn underruns(&self) -> u64 {
        self.underruns.load(Ordering::Relaxed)
    }
}

/// Constant-power stereo gains for a pose: azimuth folded to the front half,
/// inverse-distance attenuation beyond one metre.
pub fn pan_gains(pose: Vec3) -> [f32; 2] {
    if !pose.is_finite() {
        return [0.0, 0.0];
    }
    let mut az = pose.azimuth();
    if az > FRAC_PI_2 {
        az = std::f32::consts::PI - az;
    } else if az < -FRAC_PI_2 {
        az = -std::f32::consts::PI - az;
    }
    let pan = (az / FRAC_PI_2).clamp(-1.0, 1.0);
    let theta = (pan + 1.0) * std::f32::consts::FRAC_PI_4;
    let atten = 1.0 / pose.length().max(1.0);
    [theta.cos() * atten, theta.sin() * atten]
}

#[derive(Debug)]
struct FeedbackDelay {
    lines: [Vec<f32>; CHANNELS],
    write: usize,
    fs: f32,
    delay_samples: f32,
    glide: f32,
    lowpass: [f32; CHANNELS],
}

impl FeedbackDelay {
    fn new(sample_rate: u32) -> Self {
        let fs = sample_rate.max(1) as f32;
        let len = (DELAY_MAX_SEC * fs).ceil() as usize + 2;
        Self {
            lines: [vec![0.0; len], vec![0.0; len]],
            write: 0,
            fs,
            delay_samples: DELAY_MAX_SEC * fs,
            glide: 1.0 - (-1.0 / (DELAY_GLIDE_SEC * fs)).exp(),
            lowpass: [0.0; CHANNELS],
        }
    }

    #[inline]
    fn process(&mut self, input: [f32; CHANNELS], params: &MixTargets) -> [f32; CHANNELS] {
        let len = self.lines[0].len();
        let max_delay = (len - 2) as f32;
        let target = (params.delay_sec * self.fs).clamp(1.0, max_delay);
        self.delay_samples += self.glide * (target - self.delay_samples);

        let read = self.write as f32 + len as f32 - self.delay_samples;
        let i0 = read.floor() as usize % len;
        let i1 = (i0 + 1) % len;
        let frac = read - read.floor();

        let mut out = [0.0f32; CHANNELS];
        for ch in 0..CHANNELS {
            let line = &mut self.lines[ch];
            let delayed = line[i0] + (line[i1] - line[i0]) * frac;
            self.lowpass[ch] = flush_denorm(self.lowpass[ch] + DAMPING * (delayed - self.lowpass[ch]));
            line[self.write] = flush_denorm(input[ch] + self.lowpass[ch] * params.feedback);
            out[ch] = input[ch] + delayed * params.wet;
        }
        self.write = (self.write + 1) % len;
        out
    }
}

/// Consumes one session's blocks in sequence order and returns each block once it
/// has been mixed.
pub struct StereoMixer {
    lanes: Vec<VecDeque<Block>>,
    block_len: usize,
    seq: u64,
    pos: usize,
    ready: Vec<bool>,
    blocks: Receiver<Block>,
    returns: Sender<Block>,
    scene_rx: Receiver<SceneFrame>,
    scene: Option<SceneFrame>,
    status: Arc<DeviceStatus>,
    gains: Vec<[f32; 2]>,
    delay: FeedbackDelay,
    guard: OutputGuard,
    stats: Arc<MixerStats>,
    disconnected: bool,
}

impl StereoMixer {
    pub fn new(link: PipelineLink, sample_rate: u32, guard: OutputGuardMode) -> Self {
        let voices = link.voices;
        Self {
            lanes: (0..voices).map(|_| VecDeque::with_capacity(4)).collect(),
            block_len: link.block_len.max(1),
            seq: 0,
            pos: 0,
            ready: vec![false; voices],
            blocks: link.blocks,
            returns: link.returns,
            scene_rx: link.scene,
            scene: None,
            status: link.status,
            gains: vec![[0.0, 0.0]; voices],
            delay: FeedbackDelay::new(sample_rate),
            guard: OutputGuard::new(guard, sample_rate),
            stats: Arc::new(MixerStats::default()),
            disconnected: false,
        }
    }

    pub fn with_meter(mut self, meter: Arc<GuardMeter>) -> Self {
        self.guard = self.guard.with_meter(meter);
        self
    }

    pub fn status(&self) -> Arc<DeviceStatus> {
        self.status.clone()
    }

    pub fn stats(&self) -> Arc<MixerStats> {
        self.stats.clone()
    }

    /// True once the engine side has gone and nothing is left to play.
    pub fn is_finished(&self) -> bool {
        self.disconnected && self.lanes.iter().all(VecDeque::is_empty)
    }

    /// Fill interleaved stereo `out`. With `wait`, a missing block is waited for up
    /// to that long before its voice is treated as silent for the block.
    pub fn fill(&mut self, out: &mut [f32], wait: Option<Duration>) {
        out.fill(0.0);
        while let Ok(scene) = self.scene_rx.try_recv() {
            self.scene = Some(scene);
        }
        let frames = out.len() / CHANNELS;
        if frames == 0 {
            return;
        }
        let targets: Vec<[f32; 2]> = match self.scene {
            Some(scene) => scene.poses.iter().take(self.lanes.len()).map(|p| pan_gains(*p)).collect(),
            None => vec![[0.0, 0.0]; self.lanes.len()],
        };
        let mix = self.scene.map(|s| s.mix).unwrap_or(MixTargets {
            wet: 0.0,
            delay_sec: DELAY_MAX_SEC,
            feedback: 0.0,
        });
        let inv_frames = 1.0 / frames as f32;
        let steps: Vec<[f32; 2]> = self
            .gains
            .iter()
            .zip(targets.iter())
            .map(|(g, t)| [(t[0] - g[0]) * inv_frames, (t[1] - g[1]) * inv_frames])
            .collect();

        let mut frame = 0;
        while frame < frames {
            if self.pos == 0 {
                self.prepare_block(wait);
            }
            let n = (frames - frame).min(self.block_len - self.pos);
            for i in 0..n {
                let mut dry = [0.0f32; CHANNELS];
                for (v, lane) in self.lanes.iter().enumerate() {
                    let g = &mut self.gains[v];
                    g[0] += steps[v][0];
                    g[1] += steps[v][1];
                    if !self.ready[v] {
                        continue;
                    }
                    let Some(block) = lane.front() else {
                        continue;
                    };
                    let s = block.samples.get(self.pos + i).copied().unwrap_or(0.0);
                    dry[0] += s * g[0];
                    dry[1] += s * g[1];
                }
                let wet = self.delay.process(dry, &mix);
                let o = (frame + i) * CHANNELS;
                out[o] = wet[0];
                out[o + 1] = wet[1];
            }
            frame += n;
            self.pos += n;
            if self.pos >= self.block_len {
                self.finish_block();
            }
        }
        for (g, t) in self.gains.iter_mut().zip(targets.iter()) {
            *g = *t;
        }
        self.guard.process_interleaved(out, CHANNELS);
    }

    fn route(&mut self, block: Block) {
        self.stats.blocks_received.fetch_add(1, Ordering::Relaxed);
        if block.seq < self.seq || block.voice >= self.lanes.len() {
            let _ = self.returns.try_send(block);
            return;
        }
        self.lanes[block.voice].push_back(block);
    }

    fn pull_available(&mut self) {
        while let Ok(block) = self.blocks.try_recv() {
            self.route(block);
        }
    }

    fn all_ready(&self) -> bool {
        self.lanes
            .iter()
            .all(|l| l.front().is_some_and(|b| b.seq == self.seq))
    }

    fn prepare_block(&mut self, wait: Option<Duration>) {
        // Drop anything left behind by an earlier underrun.
        for lane in self.lanes.iter_mut() {
            while lane.front().is_some_and(|b| b.seq < self.seq) {
                if let Some(stale) = lane.pop_front() {
                    let _ = self.returns.try_send(stale);
                }
            }
        }
        self.pull_available();
        if let Some(wait) = wait {
            let deadline = Instant::now() + wait;
            while !self.disconnected && !self.all_ready() {
                match self.blocks.recv_deadline(deadline) {
                    Ok(block) => self.route(block),
                    Err(RecvTimeoutError::Timeout) => break,
                    Err(RecvTimeoutError::Disconnected) => self.disconnected = true,
                }
            }
        }
        for (v, lane) in self.lanes.iter().enumerate() {
            self.ready[v] = lane.front().is_some_and(|b| b.seq == self.seq);
        }
    }

    fn finish_block(&mut self) {
        for (v, lane) in self.lanes.iter_mut().enumerate() {
            if self.ready[v] {
                if let Some(block) = lane.pop_front() {
                    self.stats.blocks_consumed.fetch_add(1, Ordering::Relaxed);
                    let _ = self.returns.try_send(block);
                }
            } else if !self.disconnected {
                self.stats.underruns.fetch_add(1, Ordering::Relaxed);
            }
            self.ready[v] = false;
        }
        self.seq += 1;
        self.pos = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::output_guard::OUTPUT_CEILING;
    use crate::engine::voice::VOICE_COUNT;
    use crossbeam_channel::bounded;

    struct Rig {
        mixer: StereoMixer,
        blocks: Sender<Block>,
        returns: Receiver<Block>,
        scene: Sender<SceneFrame>,
    }

    fn rig(voices: usize, block_len: usize) -> Rig {
        let (btx, brx) = bounded(64);
        let (rtx, rrx) = bounded(64);
        let (stx, srx) = bounded(8);
        let link = PipelineLink {
            voices,
            block_len,
            blocks: brx,
            returns: rtx,
            scene: srx,
            status: Arc::new(DeviceStatus::default()),
        };
        Rig {
            mixer: StereoMixer::new(link, 48_000, OutputGuardMode::default()),
            blocks: btx,
            returns: rrx,
            scene: stx,
        }
    }

    fn front_scene() -> SceneFrame {
        SceneFrame {
            poses: [Vec3::new(0.0, 0.0, -1.0); VOICE_COUNT],
            mix: MixTargets {
                wet: 0.0,
                delay_sec: 0.5,
                feedback: 0.0,
            },
        }
    }

    fn block(voice: usize, seq: u64, value: f32, len: usize) -> Block {
        Block {
            voice,
            seq,
            start_tick: seq * len as u64,
            samples: vec![value; len],
        }
    }

    #[test]
    fn pan_is_constant_power_and_mirrored() {
        let centre = pan_gains(Vec3::new(0.0, 0.0, -1.0));
        assert!((centre[0] - centre[1]).abs() < 1e-6);
        assert!((centre[0] * centre[0] + centre[1] * centre[1] - 1.0).abs() < 1e-5);
        let left = pan_gains(Vec3::new(-1.0, 0.0, 0.0));
        assert!(left[0] > 0.99 && left[1] < 0.01);
        let rear_right = pan_gains(Vec3::new(0.5, 0.0, 0.5));
        let front_right = pan_gains(Vec3::new(0.5, 0.0, -0.5));
        assert!((rear_right[1] - front_right[1]).abs() < 1e-6);
        let far = pan_gains(Vec3::new(0.0, 0.0, -4.0));
        assert!((far[0] - centre[0] / 4.0).abs() < 1e-6);
    }

    #[test]
    fn blocks_are_mixed_in_order_and_returned() {
        let mut r = rig(2, 32);
        r.scene.send(front_scene()).unwrap();
        for seq in 0..2 {
            for v in 0..2 {
                r.blocks.send(block(v, seq, 0.1, 32)).unwrap();
            }
        }
        let mut out = vec![0.0f32; 64 * CHANNELS];
        r.mixer.fill(&mut out, Some(Duration::from_millis(50)));
        let returned: Vec<(usize, u64)> = r.returns.try_iter().map(|b| (b.voice, b.seq)).collect();
        assert_eq!(returned, vec![(0, 0), (1, 0), (0, 1), (1, 1)]);
        assert_eq!(r.mixer.stats().blocks_consumed(), 4);
        assert_eq!(r.mixer.stats().underruns(), 0);
        // Gains ramp up from silence over the first call.
        assert!(out[out.len() - 1] > out[1]);
    }

    #[test]
    fn missing_voice_is_an_underrun_not_a_stall() {
        let mut r = rig(2, 16);
        r.scene.send(front_scene()).unwrap();
        r.blocks.send(block(0, 0, 0.2, 16)).unwrap();
        let mut out = vec![0.0f32; 16 * CHANNELS];
        r.mixer.fill(&mut out, Some(Duration::from_millis(10)));
        assert_eq!(r.mixer.stats().underruns(), 1);
        // The late block is handed straight back.
        r.blocks.send(block(1, 0, 0.2, 16)).unwrap();
        r.mixer.fill(&mut out, None);
        let late: Vec<u64> = r.returns.try_iter().filter(|b| b.voice == 1).map(|b| b.seq).collect();
        assert_eq!(late, vec![0]);
    }

    #[test]
    fn output_never_exceeds_ceiling() {
        let mut r = rig(2, 64);
        let mut scene = front_scene();
        scene.mix = MixTargets {
            wet: 0.28,
            delay_sec: 0.021,
            feedback: 0.6,
        };
        r.scene.send(scene).unwrap();
        let mut out = vec![0.0f32; 64 * CHANNELS];
        for seq in 0..40 {
            for v in 0..2 {
                r.blocks.send(block(v, seq, 3.0, 64)).unwrap();
            }
            r.mixer.fill(&mut out, Some(Duration::from_millis(10)));
            for &s in &out {
                assert!(s.is_finite());
                assert!(s.abs() <= OUTPUT_CEILING + 1e-6);
            }
            let _: Vec<Block> = r.returns.try_iter().collect();
        }
    }

    #[test]
    fn finished_after_disconnect() {
        let mut r = rig(1, 8);
        drop(r.blocks);
        let mut out = vec![0.0f32; 8 * CHANNELS];
        r.mixer.fill(&mut out, Some(Duration::from_millis(10)));
        assert!(r.mixer.is_finished());
        assert!(out.iter().all(|&s| s == 0.0));
    }
}
