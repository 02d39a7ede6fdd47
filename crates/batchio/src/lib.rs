//! batchio: bounded-concurrency, resilient batch I/O primitives.
//!
//! - [`fanout`]: run a worker per index concurrently under a shared cancellation token
//! - [`limiter`]: queue of work items gated by a fixed number of slots
//! - [`deferred`]: one background result handed to exactly one waiter
//! - [`retry`]: classified retry with exponential backoff
//! - [`batch`]: chunked writes that resubmit what the provider rejected
//! - [`paginate`]: cursor pagination over a retried fetch
//!
//! Cancellation is cooperative everywhere: a token stops new work from
//! starting, it never interrupts work in flight.

pub mod batch;
pub mod config;
pub mod deferred;
pub mod fanout;
pub mod limiter;
pub mod paginate;
pub mod remote;
pub mod retry;
pub mod sync;
pub mod telemetry;

pub use tokio_util::sync::CancellationToken;

pub use batch::{BatchWriteError, BatchWriter, batch_write};
pub use config::{ConfigError, EngineConfig};
pub use deferred::Deferred;
pub use fanout::{FanOutReport, fan_out, fan_out_all};
pub use limiter::{Lease, Limiter};
pub use paginate::{Page, pages, paginate};
pub use retry::{
    AlwaysRetry, BackoffConfig, Classification, Classify, ExponentialBackoff, NeverRetry,
    RetryError, RetryPolicy, retry,
};
pub use sync::{SyncIndexMap, SyncList};
pub use telemetry::init_tracing;
