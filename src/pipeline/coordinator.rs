//! Producer/worker/consumer handoff
//!
//! The capture thread calls [`Pipeline::submit`], a dedicated worker runs the
//! transform, and the display thread polls [`Pipeline::fetch_latest`]. Only
//! one transform runs at a time and at most one unprocessed frame waits
//! behind it; a newer submission replaces it.

use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use arc_swap::ArcSwapOption;
use flume::{Receiver, Sender};
use parking_lot::Mutex;
use tracing::{debug, error, info, instrument, warn};

use crate::capture::Frame;
use crate::error::{PipelineError, Result};
use crate::pipeline::pool::BufferPool;
use crate::pipeline::stats::{DropReason, PipelineStats, StatsSnapshot};
use crate::transform::{EdgeDetector, FrameProcessor};
use crate::{Config, PipelineConfig};

const WORKER_NAME: &str = "edgecam-transform";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    /// Nothing in flight and nothing published yet
    Idle,
    Processing,
    /// A processed frame is published and nothing is in flight
    Ready,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Handed straight to the idle worker
    Dispatched,
    /// Parked behind the in-flight transform
    Queued,
    /// Parked, replacing an older unprocessed frame
    Superseded { dropped: u64 },
}

/// Explicitly owned pipeline instance with `start`/`stop` lifecycle.
pub struct Pipeline<P: FrameProcessor = EdgeDetector> {
    shared: Arc<Shared<P>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    config: PipelineConfig,
}

struct Shared<P> {
    processor: P,
    pool: BufferPool,
    slot: Mutex<Slot>,
    published: ArcSwapOption<Frame>,
    stats: PipelineStats,
}

#[derive(Default)]
struct Slot {
    running: bool,
    stopped: bool,
    in_flight: bool,
    pending: Option<Frame>,
    jobs: Option<Sender<Frame>>,
}

impl<P: FrameProcessor> Pipeline<P> {
    /// Build the pool from `config` and wire it to `processor`. Pool setup
    /// failures surface here, before any frame is accepted.
    #[instrument(skip_all)]
    pub fn new(config: &Config, processor: P) -> Result<Self> {
        config.validate()?;
        let pool = BufferPool::new(&config.pool, config.slot_bytes())?;
        Ok(Self::with_pool(config.pipeline.clone(), processor, pool))
    }

    pub fn with_pool(config: PipelineConfig, processor: P, pool: BufferPool) -> Self {
        Self {
            shared: Arc::new(Shared {
                processor,
                pool,
                slot: Mutex::new(Slot::default()),
                published: ArcSwapOption::empty(),
                stats: PipelineStats::new(config.latency_window),
            }),
            worker: Mutex::new(None),
            config,
        }
    }

    /// Spawn the transform worker. Calling it twice is a no-op; a stopped
    /// pipeline cannot be restarted.
    pub fn start(&self) -> Result<()> {
        let shared = Arc::clone(&self.shared);
        let core = self.config.pin_worker_core;
        self.start_with(move |rx| {
            thread::Builder::new()
                .name(WORKER_NAME.into())
                .spawn(move || {
                    if let Some(id) = core {
                        if !core_affinity::set_for_current(core_affinity::CoreId { id }) {
                            warn!("Failed to pin transform worker to core {}", id);
                        }
                    }
                    shared.run_worker(rx);
                })
        })
    }

    /// Frames are only accepted once `spawn` has produced a worker; a failed
    /// spawn leaves the pipeline closed and startable again.
    fn start_with<F>(&self, spawn: F) -> Result<()>
    where
        F: FnOnce(Receiver<Frame>) -> io::Result<JoinHandle<()>>,
    {
        let mut worker = self.worker.lock();
        if worker.is_some() {
            return Ok(());
        }
        if self.shared.slot.lock().stopped {
            return Err(PipelineError::Stopped);
        }

        let (jobs, rx) = flume::bounded(1);
        let handle =
            spawn(rx).map_err(|e| PipelineError::Setup(format!("failed to spawn worker: {e}")))?;

        {
            let mut slot = self.shared.slot.lock();
            if slot.stopped {
                // Stopped while spawning: the closed channel lets the worker exit
                drop(slot);
                drop(jobs);
                if handle.join().is_err() {
                    error!("Transform worker panicked during shutdown");
                }
                return Err(PipelineError::Stopped);
            }
            slot.jobs = Some(jobs);
            slot.running = true;
        }

        *worker = Some(handle);
        info!("Pipeline started");
        Ok(())
    }

    /// Stop accepting frames, wait for the in-flight transform, then release
    /// the published frame and every pooled buffer. Idempotent.
    pub fn stop(&self) {
        let superseded = {
            let mut slot = self.shared.slot.lock();
            if slot.stopped {
                return;
            }
            slot.stopped = true;
            slot.running = false;
            // Dropping the sender lets the worker exit once it drains
            slot.jobs = None;
            slot.pending.take()
        };
        drop(superseded);

        if let Some(handle) = self.worker.lock().take() {
            if handle.join().is_err() {
                error!("Transform worker panicked during shutdown");
            }
        }

        self.shared.published.store(None);
        self.shared.pool.close();
        info!("Pipeline stopped");
    }

    /// Non-blocking ingest. Never waits on the transform.
    pub fn submit(&self, mut frame: Frame) -> Result<SubmitOutcome> {
        let mut slot = self.shared.slot.lock();
        if !slot.running {
            return Err(PipelineError::Stopped);
        }
        self.shared.stats.record_submitted();

        if !slot.in_flight {
            if let Some(jobs) = slot.jobs.as_ref() {
                match jobs.try_send(frame) {
                    Ok(()) => {
                        slot.in_flight = true;
                        return Ok(SubmitOutcome::Dispatched);
                    }
                    Err(err) => frame = err.into_inner(),
                }
            }
        }

        let previous = slot.pending.replace(frame);
        drop(slot);

        match previous {
            Some(old) => {
                let dropped = old.sequence();
                debug!("Frame {} superseded before processing", dropped);
                self.shared.stats.record_dropped(DropReason::Superseded);
                Ok(SubmitOutcome::Superseded { dropped })
            }
            None => Ok(SubmitOutcome::Queued),
        }
    }

    /// Latest published frame, if any. Repeated calls may return the same one.
    pub fn fetch_latest(&self) -> Option<Frame> {
        self.shared.published.load().as_deref().cloned()
    }

    pub fn state(&self) -> PipelineState {
        if self.shared.slot.lock().in_flight {
            PipelineState::Processing
        } else if self.shared.published.load().is_some() {
            PipelineState::Ready
        } else {
            PipelineState::Idle
        }
    }

    pub fn is_running(&self) -> bool {
        self.shared.slot.lock().running
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.shared.stats.snapshot()
    }

    pub fn pool(&self) -> &BufferPool {
        &self.shared.pool
    }

    pub fn processor(&self) -> &P {
        &self.shared.processor
    }
}

impl<P: FrameProcessor> Drop for Pipeline<P> {
    fn drop(&mut self) {
        self.stop();
    }
}

impl<P: FrameProcessor> Shared<P> {
    fn run_worker(&self, jobs: Receiver<Frame>) {
        info!("Transform worker running");
        while let Ok(frame) = jobs.recv() {
            let mut next = Some(frame);
            while let Some(frame) = next.take() {
                self.process_one(frame);
                next = self.next_pending();
            }
        }
        info!("Transform worker exiting");
    }

    /// Claim the parked frame, or go idle if there is none.
    fn next_pending(&self) -> Option<Frame> {
        let mut slot = self.slot.lock();
        let next = slot.pending.take();
        if next.is_none() {
            slot.in_flight = false;
        }
        next
    }

    fn process_one(&self, input: Frame) {
        let sequence = input.sequence();
        let started = Instant::now();

        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            self.processor.process(&input, &self.pool)
        }))
        .unwrap_or_else(|payload| Err(PipelineError::TransformFailure(panic_message(&*payload))));

        let elapsed = started.elapsed();
        let captured_at = input.timestamp;
        drop(input);

        match result {
            Ok(output) => {
                if self.publish(output) {
                    self.stats.record_published(elapsed);
                    metrics::histogram!("frame_latency_ms")
                        .record(captured_at.elapsed().as_secs_f64() * 1000.0);
                }
            }
            Err(err) => self.record_failure(sequence, err),
        }
    }

    /// Publish unless a newer (or the same) sequence is already out.
    fn publish(&self, output: Frame) -> bool {
        let sequence = output.sequence();
        if let Some(current) = self.published.load().as_deref() {
            if current.sequence() >= sequence {
                debug!(
                    "Discarding stale frame {} (published {})",
                    sequence,
                    current.sequence()
                );
                self.stats.record_dropped(DropReason::Stale);
                return false;
            }
        }
        self.published.store(Some(Arc::new(output)));
        true
    }

    fn record_failure(&self, sequence: u64, err: PipelineError) {
        match err {
            PipelineError::InvalidFrame(_) => {
                warn!("Dropping frame {}: {}", sequence, err);
                self.stats.record_dropped(DropReason::Invalid);
            }
            PipelineError::PoolExhausted { .. } => {
                debug!("Dropping frame {}: {}", sequence, err);
                self.stats.record_dropped(DropReason::PoolExhausted);
            }
            _ => {
                error!("Dropping frame {}: {}", sequence, err);
                self.stats.record_dropped(DropReason::Failed);
            }
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        format!("panic: {msg}")
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        format!("panic: {msg}")
    } else {
        "panic in frame processor".into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{FrameMetadata, PixelFormat};
    use crate::{PoolConfig, TransformConfig};
    use bytes::Bytes;
    use std::time::Duration;

    /// Passes frames through, but only once the test opens the gate
    struct Gated {
        gate: flume::Receiver<()>,
        started: flume::Sender<u64>,
    }

    impl FrameProcessor for Gated {
        fn process(&self, input: &Frame, _pool: &BufferPool) -> Result<Frame> {
            let _ = self.started.send(input.sequence());
            self.gate
                .recv()
                .map_err(|_| PipelineError::TransformFailure("gate closed".into()))?;
            Ok(input.clone())
        }
    }

    /// Panics on the first frame, passes the rest through
    struct PanicsOnFirst;

    impl FrameProcessor for PanicsOnFirst {
        fn process(&self, input: &Frame, _pool: &BufferPool) -> Result<Frame> {
            if input.sequence() == 1 {
                panic!("bad frame");
            }
            Ok(input.clone())
        }
    }

    fn frame(sequence: u64) -> Frame {
        let meta = FrameMetadata {
            sequence,
            width: 4,
            height: 4,
            stride: 4,
            format: PixelFormat::Gray8,
            device_timestamp: None,
        };
        Frame::new(Bytes::from(vec![0u8; 16]), meta, Instant::now())
    }

    fn pool() -> BufferPool {
        let config = PoolConfig {
            max_buffers: 4,
            prealloc_buffers: 0,
            acquire_timeout_ms: 10,
        };
        BufferPool::new(&config, 64).unwrap()
    }

    fn pipeline<P: FrameProcessor>(processor: P) -> Pipeline<P> {
        Pipeline::with_pool(PipelineConfig::default(), processor, pool())
    }

    fn gated() -> (Pipeline<Gated>, flume::Sender<()>, flume::Receiver<u64>) {
        let (open, gate) = flume::unbounded();
        let (started, started_rx) = flume::unbounded();
        (pipeline(Gated { gate, started }), open, started_rx)
    }

    fn eventually(what: &str, mut cond: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !cond() {
            assert!(Instant::now() < deadline, "timed out waiting for {what}");
            thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn lifecycle() {
        let (pipeline, _open, _started) = gated();
        assert!(matches!(pipeline.submit(frame(1)), Err(PipelineError::Stopped)));
        assert_eq!(pipeline.state(), PipelineState::Idle);

        pipeline.start().unwrap();
        pipeline.start().unwrap();
        assert!(pipeline.is_running());

        pipeline.stop();
        pipeline.stop();
        assert!(!pipeline.is_running());
        assert!(matches!(pipeline.start(), Err(PipelineError::Stopped)));
        assert!(matches!(pipeline.submit(frame(2)), Err(PipelineError::Stopped)));
        assert_eq!(pipeline.stats().frames_submitted, 0);
    }

    #[test]
    fn failed_worker_spawn_keeps_pipeline_closed() {
        let (pipeline, _open, _started) = gated();
        let err = pipeline
            .start_with(|_rx| Err(io::Error::other("no threads left")))
            .unwrap_err();
        assert!(matches!(err, PipelineError::Setup(_)), "{err}");
        assert!(!pipeline.is_running());
        assert!(matches!(pipeline.submit(frame(1)), Err(PipelineError::Stopped)));

        pipeline.start().unwrap();
        assert_eq!(pipeline.submit(frame(2)).unwrap(), SubmitOutcome::Dispatched);
    }

    #[test]
    fn newest_pending_frame_replaces_older_one() {
        let (pipeline, open, started) = gated();
        pipeline.start().unwrap();

        assert_eq!(pipeline.submit(frame(1)).unwrap(), SubmitOutcome::Dispatched);
        assert_eq!(started.recv_timeout(Duration::from_secs(5)).unwrap(), 1);
        assert_eq!(pipeline.state(), PipelineState::Processing);

        assert_eq!(pipeline.submit(frame(2)).unwrap(), SubmitOutcome::Queued);
        assert_eq!(
            pipeline.submit(frame(3)).unwrap(),
            SubmitOutcome::Superseded { dropped: 2 }
        );

        open.send(()).unwrap();
        assert_eq!(started.recv_timeout(Duration::from_secs(5)).unwrap(), 3);
        open.send(()).unwrap();

        eventually("pipeline to go idle", || pipeline.state() == PipelineState::Ready);
        assert_eq!(pipeline.fetch_latest().unwrap().sequence(), 3);
        // Frame 2 never reached the processor
        assert!(started.try_recv().is_err());

        let stats = pipeline.stats();
        assert_eq!(stats.frames_submitted, 3);
        assert_eq!(stats.frames_superseded, 1);
        assert_eq!(stats.frames_published, 2);
    }

    #[test]
    fn idle_worker_takes_the_next_frame_directly() {
        let (pipeline, open, started) = gated();
        pipeline.start().unwrap();

        assert_eq!(pipeline.submit(frame(1)).unwrap(), SubmitOutcome::Dispatched);
        started.recv_timeout(Duration::from_secs(5)).unwrap();
        open.send(()).unwrap();
        eventually("frame 1", || pipeline.state() == PipelineState::Ready);

        assert_eq!(pipeline.submit(frame(2)).unwrap(), SubmitOutcome::Dispatched);
        started.recv_timeout(Duration::from_secs(5)).unwrap();
        // Still showing 1 while 2 is being processed
        assert_eq!(pipeline.fetch_latest().unwrap().sequence(), 1);
        open.send(()).unwrap();
        eventually("frame 2", || {
            pipeline.fetch_latest().is_some_and(|f| f.sequence() == 2)
        });
    }

    #[test]
    fn processor_panic_is_contained() {
        let pipeline = pipeline(PanicsOnFirst);
        pipeline.start().unwrap();

        pipeline.submit(frame(1)).unwrap();
        eventually("failure to be counted", || pipeline.stats().transform_failures == 1);
        assert!(pipeline.fetch_latest().is_none());
        assert!(pipeline.is_running());

        pipeline.submit(frame(2)).unwrap();
        eventually("frame 2", || pipeline.fetch_latest().is_some());
        assert_eq!(pipeline.fetch_latest().unwrap().sequence(), 2);
    }

    #[test]
    fn output_pool_exhaustion_drops_frame_and_carries_on() {
        let config = PoolConfig {
            max_buffers: 3,
            prealloc_buffers: 0,
            acquire_timeout_ms: 10,
        };
        let pool = BufferPool::new(&config, 64).unwrap();
        let detector = EdgeDetector::new(TransformConfig::default()).unwrap();
        let pipeline = Pipeline::with_pool(PipelineConfig::default(), detector, pool.clone());
        pipeline.start().unwrap();

        let held: Vec<_> = (0..3).map(|_| pool.acquire(16).unwrap()).collect();
        pipeline.submit(frame(1)).unwrap();
        eventually("exhaustion to be counted", || {
            pipeline.stats().dropped_pool_exhausted == 1
        });
        eventually("worker to go idle", || pipeline.state() == PipelineState::Idle);
        assert!(pipeline.is_running());
        assert!(pipeline.fetch_latest().is_none());
        assert_eq!(pool.allocated(), 3);

        drop(held);
        pipeline.submit(frame(2)).unwrap();
        eventually("frame 2", || pipeline.fetch_latest().is_some());
        assert_eq!(pipeline.fetch_latest().unwrap().sequence(), 2);
        assert_eq!(pipeline.stats().dropped_pool_exhausted, 1);
    }

    #[test]
    fn invalid_frames_are_dropped_and_counted() {
        let detector = EdgeDetector::new(TransformConfig::default()).unwrap();
        let pipeline = pipeline(detector);
        pipeline.start().unwrap();

        let mut bad = frame(1);
        bad.data = Bytes::from_static(&[0; 3]);
        pipeline.submit(bad).unwrap();

        eventually("invalid frame to be dropped", || pipeline.stats().dropped_invalid == 1);
        eventually("worker to go idle", || pipeline.state() == PipelineState::Idle);
        assert!(pipeline.fetch_latest().is_none());
    }

    #[test]
    fn older_results_never_replace_newer_ones() {
        let (pipeline, _open, _started) = gated();
        assert!(pipeline.shared.publish(frame(5)));
        assert!(!pipeline.shared.publish(frame(3)));
        assert!(!pipeline.shared.publish(frame(5)));
        assert_eq!(pipeline.fetch_latest().unwrap().sequence(), 5);
        assert_eq!(pipeline.stats().discarded_stale, 2);
    }

    #[test]
    fn stop_releases_published_frame_and_buffers() {
        let detector = EdgeDetector::new(TransformConfig::default()).unwrap();
        let pipeline = pipeline(detector);
        pipeline.start().unwrap();

        pipeline.submit(frame(1)).unwrap();
        eventually("frame 1", || pipeline.fetch_latest().is_some());
        assert!(pipeline.pool().allocated() > 0);

        pipeline.stop();
        assert!(pipeline.fetch_latest().is_none());
        assert_eq!(pipeline.pool().allocated(), 0);
        assert!(matches!(pipeline.pool().acquire(16), Err(PipelineError::Stopped)));
    }
}
