pub mod coordinator;
pub mod pool;
pub mod stats;

pub use coordinator::{Pipeline, PipelineState, SubmitOutcome};
pub use pool::{BufferPool, PooledBuffer};
pub use stats::{FpsMeter, StatsSnapshot};
