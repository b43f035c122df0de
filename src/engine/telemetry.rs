//! Read-only session telemetry and the downsampled scope feed.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

/// Length of the rolling waveform snapshot.
pub const SCOPE_LEN: usize = 512;
pub const SCOPE_POINTS_PER_BLOCK: usize = 16;
const SCOPE_BUCKETS: usize = 4;

pub type ScopeChunk = [f32; SCOPE_POINTS_PER_BLOCK];

/// Lock-free counters and flags shared between the engine and its threads.
#[derive(Debug, Default)]
pub struct Telemetry {
    playing: AtomicBool,
    sample_rate: AtomicU32,
    auto_wet_bits: AtomicU32,
    user_wet_bits: AtomicU32,
    blocks_rendered: AtomicU64,
}

impl Telemetry {
    pub fn is_playing(&self) -> bool {
        self.playing.load(Ordering::Acquire)
    }

    pub fn set_playing(&self, playing: bool) {
        self.playing.store(playing, Ordering::Release);
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate.load(Ordering::Relaxed)
    }

    pub fn set_sample_rate(&self, sr: u32) {
        self.sample_rate.store(sr, Ordering::Relaxed);
    }

    pub fn auto_wet(&self) -> f32 {
        f32::from_bits(self.auto_wet_bits.load(Ordering::Relaxed))
    }

    pub fn set_auto_wet(&self, wet: f32) {
        self.auto_wet_bits.store(wet.to_bits(), Ordering::Relaxed);
    }

    pub fn user_wet(&self) -> f32 {
        f32::from_bits(self.user_wet_bits.load(Ordering::Relaxed))
    }

    pub fn set_user_wet(&self, wet: f32) {
        self.user_wet_bits.store(wet.to_bits(), Ordering::Relaxed);
    }

    pub fn blocks_rendered(&self) -> u64 {
        self.blocks_rendered.load(Ordering::Relaxed)
    }

    pub fn count_block(&self) {
        self.blocks_rendered.fetch_add(1, Ordering::Relaxed);
    }
}

/// Pick `SCOPE_POINTS_PER_BLOCK` evenly spaced samples from a block.
pub fn downsample(samples: &[f32]) -> ScopeChunk {
    let mut out = [0.0f32; SCOPE_POINTS_PER_BLOCK];
    if samples.is_empty() {
        return out;
    }
    let stride = samples.len() as f64 / SCOPE_POINTS_PER_BLOCK as f64;
    for (i, slot) in out.iter_mut().enumerate() {
        let idx = ((i as f64 * stride) as usize).min(samples.len() - 1);
        *slot = samples[idx];
    }
    out
}

#[derive(Debug, Clone, Copy)]
struct Bucket {
    seq: u64,
    contributed: usize,
    points: ScopeChunk,
}

/// Sums scope points across voices for the same block sequence number.
/// A chunk is complete once every voice has contributed.
#[derive(Debug)]
pub struct ScopeAccumulator {
    voices: usize,
    buckets: [Option<Bucket>; SCOPE_BUCKETS],
}

impl ScopeAccumulator {
    pub fn new(voices: usize) -> Self {
        Self {
            voices: voices.max(1),
            buckets: [None; SCOPE_BUCKETS],
        }
    }

    pub fn add(&mut self, seq: u64, points: &ScopeChunk) -> Option<ScopeChunk> {
        let slot = match self
            .buckets
            .iter()
            .position(|b| b.is_some_and(|b| b.seq == seq))
        {
            Some(i) => i,
            None => {
                let i = self
                    .buckets
                    .iter()
                    .position(Option::is_none)
                    .unwrap_or_else(|| self.oldest());
                self.buckets[i] = Some(Bucket {
                    seq,
                    contributed: 0,
                    points: [0.0; SCOPE_POINTS_PER_BLOCK],
                });
                i
            }
        };
        let bucket = self.buckets[slot].as_mut()?;
        for (acc, p) in bucket.points.iter_mut().zip(points.iter()) {
            *acc += *p;
        }
        bucket.contributed += 1;
        if bucket.contributed >= self.voices {
            let done = bucket.points;
            self.buckets[slot] = None;
            Some(done)
        } else {
            None
        }
    }

    fn oldest(&self) -> usize {
        self.buckets
            .iter()
            .enumerate()
            .min_by_key(|(_, b)| b.map_or(0, |b| b.seq))
            .map_or(0, |(i, _)| i)
    }
}

/// Fixed-length rolling window of scope points, oldest first.
#[derive(Debug, Clone)]
pub struct ScopeRing {
    points: VecDeque<f32>,
}

impl Default for ScopeRing {
    fn default() -> Self {
        Self {
            points: VecDeque::from(vec![0.0; SCOPE_LEN]),
        }
    }
}

impl ScopeRing {
    pub fn push(&mut self, chunk: &ScopeChunk) {
        for &p in chunk {
            if self.points.len() == SCOPE_LEN {
                self.points.pop_front();
            }
            self.points.push_back(if p.is_finite() { p } else { 0.0 });
        }
    }

    pub fn snapshot(&self) -> Vec<f32> {
        self.points.iter().copied().collect()
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}
