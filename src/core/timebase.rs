pub type Tick = u64;

/// Sample clock of one session: sample rate and render block length.
#[derive(Clone, Copy, Debug)]
pub struct Timebase {
    pub fs: f32,
    pub block_len: usize,
}

impl Timebase {
    pub fn tick_to_sec(&self, t: Tick) -> f64 {
        t as f64 / self.fs as f64
    }

    pub fn sec_to_tick(&self, s: f64) -> Tick {
        if s <= 0.0 {
            return 0;
        }
        let tick = (s * self.fs as f64).round();
        tick as Tick
    }

    pub fn block_start_tick(&self, seq: u64) -> Tick {
        seq.saturating_mul(self.block_len as u64)
    }

    pub fn block_end_tick(&self, seq: u64) -> Tick {
        self.block_start_tick(seq)
            .saturating_add(self.block_len as u64)
    }

    pub fn block_duration_sec(&self) -> f64 {
        self.block_len as f64 / self.fs as f64
    }
}
