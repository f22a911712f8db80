//! Pipeline counters and rolling transform latency

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crossbeam::utils::CachePadded;
use parking_lot::Mutex;
use ringbuf::traits::{Consumer, Observer, RingBuffer};
use ringbuf::HeapRb;
use serde::Serialize;

/// Shared statistics, written by the producer and the worker
pub struct PipelineStats {
    counters: CachePadded<Counters>,
    /// Recent transform durations in microseconds
    transform_us: Mutex<HeapRb<u32>>,
    process_fps: Mutex<FpsMeter>,
}

#[derive(Default)]
struct Counters {
    submitted: AtomicU64,
    published: AtomicU64,
    superseded: AtomicU64,
    invalid: AtomicU64,
    exhausted: AtomicU64,
    failed: AtomicU64,
    stale: AtomicU64,
}

/// Point-in-time copy of [`PipelineStats`]
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StatsSnapshot {
    pub frames_submitted: u64,
    pub frames_published: u64,
    pub frames_superseded: u64,
    pub dropped_invalid: u64,
    pub dropped_pool_exhausted: u64,
    pub transform_failures: u64,
    pub discarded_stale: u64,
    pub process_fps: f64,
    pub avg_transform_us: f64,
    pub p99_transform_us: f64,
}

/// What a dropped frame is counted as
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    Superseded,
    Invalid,
    PoolExhausted,
    Failed,
    Stale,
}

impl DropReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Superseded => "superseded",
            Self::Invalid => "invalid",
            Self::PoolExhausted => "pool_exhausted",
            Self::Failed => "failed",
            Self::Stale => "stale",
        }
    }
}

impl PipelineStats {
    pub fn new(latency_window: usize) -> Self {
        Self {
            counters: CachePadded::new(Counters::default()),
            transform_us: Mutex::new(HeapRb::new(latency_window.max(1))),
            process_fps: Mutex::new(FpsMeter::default()),
        }
    }

    pub fn record_submitted(&self) {
        self.counters.submitted.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("frames_submitted").increment(1);
    }

    pub fn record_published(&self, transform_time: Duration) {
        self.counters.published.fetch_add(1, Ordering::Relaxed);
        let micros = transform_time.as_micros().min(u32::MAX as u128) as u32;
        self.transform_us.lock().push_overwrite(micros);
        self.process_fps.lock().tick(Instant::now());
        metrics::histogram!("transform_time_us").record(micros as f64);
    }

    pub fn record_dropped(&self, reason: DropReason) {
        let counter = match reason {
            DropReason::Superseded => &self.counters.superseded,
            DropReason::Invalid => &self.counters.invalid,
            DropReason::PoolExhausted => &self.counters.exhausted,
            DropReason::Failed => &self.counters.failed,
            DropReason::Stale => &self.counters.stale,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("frames_dropped", "reason" => reason.as_str()).increment(1);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let c = &self.counters;
        let (avg, p99) = {
            let window = self.transform_us.lock();
            let mut samples: Vec<u32> = window.iter().copied().collect();
            debug_assert_eq!(samples.len(), window.occupied_len());
            percentiles(&mut samples)
        };

        StatsSnapshot {
            frames_submitted: c.submitted.load(Ordering::Relaxed),
            frames_published: c.published.load(Ordering::Relaxed),
            frames_superseded: c.superseded.load(Ordering::Relaxed),
            dropped_invalid: c.invalid.load(Ordering::Relaxed),
            dropped_pool_exhausted: c.exhausted.load(Ordering::Relaxed),
            transform_failures: c.failed.load(Ordering::Relaxed),
            discarded_stale: c.stale.load(Ordering::Relaxed),
            process_fps: self.process_fps.lock().fps(),
            avg_transform_us: avg,
            p99_transform_us: p99,
        }
    }
}

fn percentiles(samples: &mut [u32]) -> (f64, f64) {
    if samples.is_empty() {
        return (0.0, 0.0);
    }
    samples.sort_unstable();
    let sum: u64 = samples.iter().map(|&s| s as u64).sum();
    let avg = sum as f64 / samples.len() as f64;
    let rank = ((samples.len() as f64 * 0.99).ceil() as usize).clamp(1, samples.len());
    (avg, samples[rank - 1] as f64)
}

/// Exponentially smoothed frame rate: `fps = 0.9 * fps + 0.1 / dt`
#[derive(Debug, Default, Clone)]
pub struct FpsMeter {
    last: Option<Instant>,
    fps: f64,
}

impl FpsMeter {
    pub fn tick(&mut self, now: Instant) -> f64 {
        if let Some(last) = self.last {
            let dt = now.saturating_duration_since(last).as_secs_f64();
            if dt > 0.0 {
                let instant = 1.0 / dt;
                // Seed with the first interval instead of ramping up from zero
                self.fps = if self.fps == 0.0 {
                    instant
                } else {
                    0.9 * self.fps + 0.1 * instant
                };
            }
        }
        self.last = Some(now);
        self.fps
    }

    pub fn fps(&self) -> f64 {
        self.fps
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fps_meter_converges_on_steady_rate() {
        let mut meter = FpsMeter::default();
        let start = Instant::now();
        assert_eq!(meter.tick(start), 0.0);
        for i in 1..=50 {
            meter.tick(start + Duration::from_millis(10 * i));
        }
        assert!((meter.fps() - 100.0).abs() < 1.0, "fps {}", meter.fps());
    }

    #[test]
    fn fps_meter_smooths_a_single_hiccup() {
        let mut meter = FpsMeter::default();
        let start = Instant::now();
        meter.tick(start);
        meter.tick(start + Duration::from_millis(10));
        let fps = meter.tick(start + Duration::from_millis(110));
        // 0.9 * 100 + 0.1 * 10
        assert!((fps - 91.0).abs() < 0.01, "fps {fps}");
    }

    #[test]
    fn latency_window_keeps_most_recent_samples() {
        let stats = PipelineStats::new(4);
        for us in [1000u64, 10, 20, 30, 40] {
            stats.record_published(Duration::from_micros(us));
        }
        let snap = stats.snapshot();
        assert_eq!(snap.frames_published, 5);
        assert_eq!(snap.avg_transform_us, 25.0);
        assert_eq!(snap.p99_transform_us, 40.0);
    }

    #[test]
    fn drop_reasons_land_in_their_counters() {
        let stats = PipelineStats::new(8);
        stats.record_submitted();
        stats.record_dropped(DropReason::Superseded);
        stats.record_dropped(DropReason::PoolExhausted);
        stats.record_dropped(DropReason::PoolExhausted);
        stats.record_dropped(DropReason::Stale);

        let snap = stats.snapshot();
        assert_eq!(snap.frames_submitted, 1);
        assert_eq!(snap.frames_superseded, 1);
        assert_eq!(snap.dropped_pool_exhausted, 2);
        assert_eq!(snap.discarded_stale, 1);
        assert_eq!(snap.dropped_invalid, 0);
    }

    #[test]
    fn empty_window_reports_zero() {
        assert_eq!(percentiles(&mut []), (0.0, 0.0));
    }
}
