//! Adaptive I/O granularity for the read/write pipeline.
//!
//! Three quantum sizes are kept, each with its own concurrency. After every
//! cool-down the tuner measures each size in turn for at least the minimum sample
//! time, then settles on the one with the best throughput scaled by its count.
//! A size whose credit consumption would eat into the reserve margin is never
//! used; the tuner stays on the smaller size and reports itself throttled.

use std::time::Duration;

use tokio::time::Instant;

use smb_core::logging::debug;

use crate::client::config::SMBClientConfig;
use crate::client::credit::CREDIT_PAYLOAD_SIZE;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum QuantumBucket {
    Small = 0,
    Medium = 1,
    Large = 2,
}

impl QuantumBucket {
    const ALL: [QuantumBucket; 3] = [QuantumBucket::Small, QuantumBucket::Medium, QuantumBucket::Large];

    fn index(self) -> usize {
        self as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuantumPlan {
    pub bucket: QuantumBucket,
    pub size: u32,
    pub count: u32,
    /// Credits one quantum of this size is charged.
    pub charge: u32,
    pub throttled: bool,
}

impl QuantumPlan {
    /// One single-credit quantum, for a target with no channel state to consult.
    pub fn single(max_transfer: u32) -> Self {
        Self {
            bucket: QuantumBucket::Small,
            size: max_transfer.min(CREDIT_PAYLOAD_SIZE as u32).max(1),
            count: 1,
            charge: 1,
            throttled: true,
        }
    }

    pub fn credit_consumption(&self) -> u32 {
        self.count * self.charge
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Sample {
    bytes: u64,
    elapsed: Duration,
}

impl Sample {
    fn throughput(&self) -> f64 {
        if self.elapsed.is_zero() {
            return 0.0;
        }
        self.bytes as f64 / self.elapsed.as_secs_f64()
    }
}

#[derive(Debug, Clone, Copy)]
enum Phase {
    Measuring { bucket: QuantumBucket },
    Settled { since: Instant },
}

#[derive(Debug)]
pub struct QuantumTuner {
    sizes: [u32; 3],
    counts: [u32; 3],
    cooldown: Duration,
    min_sample: Duration,
    reserve: u32,
    selected: QuantumBucket,
    phase: Phase,
    samples: [Sample; 3],
    throttled: bool,
}

impl QuantumTuner {
    pub fn new(config: &SMBClientConfig) -> Self {
        Self {
            sizes: config.quantum_sizes,
            counts: config.quantum_counts.map(|c| c.max(1)),
            cooldown: config.quantum_cooldown,
            min_sample: config.quantum_min_sample,
            reserve: config.credit_reserve as u32,
            selected: QuantumBucket::Small,
            phase: Phase::Measuring { bucket: QuantumBucket::Small },
            samples: [Sample::default(); 3],
            throttled: false,
        }
    }

    pub fn selected(&self) -> QuantumBucket {
        self.selected
    }

    pub fn is_throttled(&self) -> bool {
        self.throttled
    }

    pub fn is_measuring(&self) -> bool {
        matches!(self.phase, Phase::Measuring { .. })
    }

    /// Size and concurrency for the next multi-quantum transfer.
    ///
    /// `granted` is the connection's current credit window and `max_transfer`
    /// the server's limit for the operation. The count is zero when nothing
    /// fits above the reserve.
    pub fn plan(&mut self, now: Instant, granted: u32, multi_credit: bool, max_transfer: u32) -> QuantumPlan {
        if let Phase::Settled { since } = self.phase {
            if now.saturating_duration_since(since) >= self.cooldown {
                debug!("quantum re-measurement started");
                self.samples = [Sample::default(); 3];
                self.phase = Phase::Measuring { bucket: QuantumBucket::Small };
            }
        }
        let budget = granted.saturating_sub(self.reserve);
        let wanted = match self.phase {
            Phase::Measuring { bucket } => bucket,
            Phase::Settled { .. } => self.selected,
        };

        let mut bucket = wanted;
        while bucket > QuantumBucket::Small && !self.fits(bucket, budget, multi_credit, max_transfer) {
            bucket = QuantumBucket::ALL[bucket.index() - 1];
        }
        if bucket != wanted {
            self.throttled = true;
            if let Phase::Measuring { .. } = self.phase {
                // Larger sizes cannot be measured under this window.
                self.settle(now, bucket.index() + 1);
            }
            self.selected = self.selected.min(bucket);
            debug!(wanted = ?wanted, used = ?bucket, granted, "quantum size throttled by credits");
        } else if self.fits(bucket, budget, multi_credit, max_transfer) {
            self.throttled = false;
        }

        let size = self.sizes[bucket.index()].min(max_transfer).max(1);
        let charge = Self::charge(size, multi_credit);
        let count = self.counts[bucket.index()].min(budget / charge);
        if count == 0 {
            self.throttled = true;
            debug!(granted, reserve = self.reserve, "no credits above the reserve");
        }
        QuantumPlan {
            bucket,
            size,
            count,
            charge,
            throttled: self.throttled,
        }
    }

    /// Accounts one completed quantum.
    pub fn record(&mut self, plan: &QuantumPlan, bytes: u64, elapsed: Duration, now: Instant) {
        let Phase::Measuring { bucket } = self.phase else {
            return;
        };
        if plan.bucket != bucket {
            return;
        }
        let sample = &mut self.samples[bucket.index()];
        sample.bytes += bytes;
        sample.elapsed += elapsed;
        if sample.elapsed < self.min_sample {
            return;
        }
        match bucket {
            QuantumBucket::Large => self.settle(now, 3),
            _ => self.phase = Phase::Measuring { bucket: QuantumBucket::ALL[bucket.index() + 1] },
        }
    }

    fn settle(&mut self, now: Instant, measured: usize) {
        let best = QuantumBucket::ALL[..measured.min(3)]
            .iter()
            .copied()
            .filter(|b| self.samples[b.index()].bytes > 0)
            .max_by(|a, b| self.score(*a).total_cmp(&self.score(*b)))
            .unwrap_or(QuantumBucket::Small);
        debug!(selected = ?best, "quantum size settled");
        self.selected = best;
        self.phase = Phase::Settled { since: now };
    }

    fn score(&self, bucket: QuantumBucket) -> f64 {
        self.samples[bucket.index()].throughput() * self.counts[bucket.index()] as f64
    }

    fn fits(&self, bucket: QuantumBucket, budget: u32, multi_credit: bool, max_transfer: u32) -> bool {
        let size = self.sizes[bucket.index()].min(max_transfer).max(1);
        self.counts[bucket.index()] * Self::charge(size, multi_credit) <= budget
    }

    fn charge(size: u32, multi_credit: bool) -> u32 {
        if multi_credit {
            (size as usize).div_ceil(CREDIT_PAYLOAD_SIZE).max(1) as u32
        } else {
            1
        }
    }
}
