//! Double-buffered block scheduling with an explicit armed count per voice.
//!
//! Each voice owns two buffers. A buffer is armed from the moment its job is handed
//! out until the pipeline returns it after playback; a returned buffer re-arms its
//! voice straight away. Jobs are strictly ordered per voice by sequence number.

use crate::audio::pipeline::Block;
use crate::core::timebase::{Tick, Timebase};

pub const BUFFERS_PER_VOICE: usize = 2;

#[derive(Debug)]
pub struct BlockJob {
    pub voice: usize,
    pub seq: u64,
    pub start_tick: Tick,
    pub buffer: Vec<f32>,
}

impl BlockJob {
    pub fn into_block(self) -> Block {
        Block {
            voice: self.voice,
            seq: self.seq,
            start_tick: self.start_tick,
            samples: self.buffer,
        }
    }
}

#[derive(Debug)]
struct Lane {
    spare: Vec<Vec<f32>>,
    armed: usize,
    next_seq: u64,
}

#[derive(Debug)]
pub struct BlockScheduler {
    lanes: Vec<Lane>,
    timebase: Timebase,
    halted: bool,
}

impl BlockScheduler {
    pub fn new(voices: usize, timebase: Timebase) -> Self {
        let lanes = (0..voices)
            .map(|_| Lane {
                spare: (0..BUFFERS_PER_VOICE)
                    .map(|_| vec![0.0; timebase.block_len])
                    .collect(),
                armed: 0,
                next_seq: 0,
            })
            .collect();
        Self {
            lanes,
            timebase,
            halted: false,
        }
    }

    /// Next job to render: the voice furthest behind, lowest index on ties.
    pub fn next_job(&mut self) -> Option<BlockJob> {
        if self.halted {
            return None;
        }
        let (voice, lane) = self
            .lanes
            .iter_mut()
            .enumerate()
            .filter(|(_, l)| l.armed < BUFFERS_PER_VOICE && !l.spare.is_empty())
            .min_by_key(|(i, l)| (l.next_seq, *i))?;
        let buffer = lane.spare.pop()?;
        let seq = lane.next_seq;
        lane.next_seq += 1;
        lane.armed += 1;
        Some(BlockJob {
            voice,
            seq,
            start_tick: self.timebase.block_start_tick(seq),
            buffer,
        })
    }

    /// A played block comes back; its buffer is free for the next job.
    pub fn recycle(&mut self, block: Block) {
        self.give_back(block.voice, block.samples);
    }

    /// Return a job that was never delivered. Its sequence number is reissued.
    pub fn cancel(&mut self, job: BlockJob) {
        if let Some(lane) = self.lanes.get_mut(job.voice) {
            if lane.next_seq == job.seq + 1 {
                lane.next_seq = job.seq;
            }
        }
        self.give_back(job.voice, job.buffer);
    }

    fn give_back(&mut self, voice: usize, mut buffer: Vec<f32>) {
        let block_len = self.timebase.block_len;
        let Some(lane) = self.lanes.get_mut(voice) else {
            return;
        };
        if lane.armed == 0 {
            return;
        }
        lane.armed -= 1;
        buffer.resize(block_len, 0.0);
        lane.spare.push(buffer);
    }

    /// Stop handing out jobs. Buffers still in flight may be returned afterwards.
    pub fn halt(&mut self) {
        self.halted = true;
    }

    pub fn is_halted(&self) -> bool {
        self.halted
    }

    pub fn armed(&self, voice: usize) -> usize {
        self.lanes.get(voice).map_or(0, |l| l.armed)
    }

    pub fn next_seq(&self, voice: usize) -> u64 {
        self.lanes.get(voice).map_or(0, |l| l.next_seq)
    }

    pub fn voices(&self) -> usize {
        self.lanes.len()
    }

    /// Start tick of the earliest block not yet handed out.
    pub fn frontier_tick(&self) -> Tick {
        let seq = self.lanes.iter().map(|l| l.next_seq).min().unwrap_or(0);
        self.timebase.block_start_tick(seq)
    }
}
