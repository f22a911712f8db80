//! Fixed-size pool of reusable pixel buffers
//!
//! Buffers are handed out as owned [`PooledBuffer`]s. Once filled they are
//! frozen into a [`Frame`](crate::Frame) through `Bytes::from_owner`, so the
//! reference count lives in `Bytes` and the slot comes back here when the last
//! handle is dropped.

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, info, instrument};

use crate::error::{PipelineError, Result};
use crate::PoolConfig;

/// Shared, cloneable handle to a bounded buffer pool.
#[derive(Clone)]
pub struct BufferPool {
    shared: Arc<PoolShared>,
}

struct PoolShared {
    state: Mutex<PoolState>,
    available: Condvar,
    max_buffers: usize,
    acquire_timeout: Duration,
}

#[derive(Default)]
struct PoolState {
    /// Released slots, contents left as the last holder wrote them
    free: Vec<Vec<u8>>,
    /// Slots alive, free or in use
    allocated: usize,
    closed: bool,
}

impl BufferPool {
    /// Build a pool and eagerly allocate `prealloc_buffers` slots of
    /// `slot_bytes` each. Allocation failure here is fatal.
    #[instrument(skip(config))]
    pub fn new(config: &PoolConfig, slot_bytes: usize) -> Result<Self> {
        if config.max_buffers == 0 {
            return Err(PipelineError::Setup("pool needs at least one buffer".into()));
        }
        if config.prealloc_buffers > config.max_buffers {
            return Err(PipelineError::Setup(format!(
                "cannot preallocate {} buffers in a pool of {}",
                config.prealloc_buffers, config.max_buffers
            )));
        }

        let mut free = Vec::with_capacity(config.max_buffers);
        for _ in 0..config.prealloc_buffers {
            let mut buf = Vec::new();
            buf.try_reserve_exact(slot_bytes).map_err(|e| {
                PipelineError::Setup(format!("failed to allocate {slot_bytes} byte buffer: {e}"))
            })?;
            buf.resize(slot_bytes, 0);
            free.push(buf);
        }

        info!(
            "Buffer pool ready: {} of {} slots preallocated ({} bytes each)",
            free.len(),
            config.max_buffers,
            slot_bytes
        );

        Ok(Self {
            shared: Arc::new(PoolShared {
                state: Mutex::new(PoolState {
                    allocated: free.len(),
                    free,
                    closed: false,
                }),
                available: Condvar::new(),
                max_buffers: config.max_buffers,
                acquire_timeout: Duration::from_millis(config.acquire_timeout_ms),
            }),
        })
    }

    /// Acquire a buffer of exactly `len` bytes, waiting up to the configured
    /// timeout when every slot is in use.
    pub fn acquire(&self, len: usize) -> Result<PooledBuffer> {
        self.acquire_with_timeout(len, self.shared.acquire_timeout)
    }

    /// Contents are NOT zeroed: callers must write every byte they expose.
    pub fn acquire_with_timeout(&self, len: usize, timeout: Duration) -> Result<PooledBuffer> {
        let start = Instant::now();
        let deadline = start + timeout;
        let mut state = self.shared.state.lock();

        loop {
            if state.closed {
                return Err(PipelineError::Stopped);
            }

            // Compatible free slot, no allocation
            if let Some(idx) = state.free.iter().position(|b| b.len() >= len) {
                let buf = state.free.swap_remove(idx);
                return Ok(self.wrap(buf, len));
            }

            if state.allocated < self.shared.max_buffers {
                state.allocated += 1;
                drop(state);
                debug!("Allocating new pool slot of {} bytes", len);
                return Ok(self.wrap(vec![0u8; len], len));
            }

            // Pool is full but a free slot is too small: grow it in place
            if let Some(mut buf) = state.free.pop() {
                drop(state);
                buf.resize(len, 0);
                return Ok(self.wrap(buf, len));
            }

            if Instant::now() >= deadline {
                let waited = start.elapsed();
                debug!("Pool exhausted after {:?}", waited);
                return Err(PipelineError::PoolExhausted { waited });
            }
            self.shared.available.wait_until(&mut state, deadline);
        }
    }

    fn wrap(&self, buf: Vec<u8>, len: usize) -> PooledBuffer {
        PooledBuffer {
            buf,
            len,
            pool: Arc::clone(&self.shared),
        }
    }

    /// Drop every free buffer and refuse further acquisitions. Buffers still
    /// held elsewhere are freed as they come back.
    pub fn close(&self) {
        let mut state = self.shared.state.lock();
        state.closed = true;
        let released = state.free.len();
        state.allocated -= released;
        state.free.clear();
        drop(state);
        self.shared.available.notify_all();
        info!("Buffer pool closed, released {} free buffers", released);
    }

    /// Slots currently alive (free or in use).
    pub fn allocated(&self) -> usize {
        self.shared.state.lock().allocated
    }

    pub fn free(&self) -> usize {
        self.shared.state.lock().free.len()
    }

    pub fn max_buffers(&self) -> usize {
        self.shared.max_buffers
    }

    pub fn acquire_timeout(&self) -> Duration {
        self.shared.acquire_timeout
    }
}

impl PoolShared {
    fn recycle(&self, buf: Vec<u8>) {
        let mut state = self.state.lock();
        if state.closed {
            state.allocated -= 1;
            return;
        }
        state.free.push(buf);
        drop(state);
        self.available.notify_one();
    }
}

/// Exclusively owned pool slot. Mutable until frozen into a `Frame`.
pub struct PooledBuffer {
    buf: Vec<u8>,
    len: usize,
    pool: Arc<PoolShared>,
}

impl Deref for PooledBuffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.buf[..self.len]
    }
}

impl DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.buf[..self.len]
    }
}

impl fmt::Debug for PooledBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledBuffer")
            .field("len", &self.len)
            .field("capacity", &self.buf.len())
            .finish()
    }
}

impl AsRef<[u8]> for PooledBuffer {
    fn as_ref(&self) -> &[u8] {
        self
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        self.pool.recycle(std::mem::take(&mut self.buf));
    }
}
