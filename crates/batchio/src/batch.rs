//! Chunked batch writes with remainder resubmission.
//!
//! Items are split into chunks no larger than the provider accepts and
//! submitted in order. Whatever the provider hands back as unprocessed is
//! collected across the pass and becomes the input of the next pass, until
//! nothing is left. A non-empty remainder is normal; only a hard error from
//! `submit` aborts the write.

use std::future::Future;

use tokio_util::sync::CancellationToken;

use crate::config::EngineConfig;
use crate::retry::{Classify, RetryError, RetryPolicy, retry};

/// Largest batch most key-value stores accept in one write request.
pub const DEFAULT_MAX_BATCH_SIZE: usize = 25;

/// Passes over the remainder before giving up on a provider that keeps rejecting items.
pub const DEFAULT_MAX_PASSES: u32 = 16;

#[derive(Debug, thiserror::Error)]
pub enum BatchWriteError<E> {
    #[error("batch size must be at least 1")]
    InvalidBatchSize,

    #[error("chunk {chunk} of pass {pass} failed: {source}")]
    Submit {
        pass: u32,
        chunk: usize,
        #[source]
        source: E,
    },

    #[error("batch write cancelled")]
    Cancelled,

    #[error("{remaining} items still unprocessed after {passes} passes")]
    Unconverged { passes: u32, remaining: usize },
}

/// Chunking and pass limits for batch writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchWriter {
    max_batch_size: usize,
    max_passes: u32,
}

impl Default for BatchWriter {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_BATCH_SIZE)
    }
}

impl BatchWriter {
    pub fn new(max_batch_size: usize) -> Self {
        Self {
            max_batch_size,
            max_passes: DEFAULT_MAX_PASSES,
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            max_batch_size: config.max_batch_size,
            max_passes: config.max_passes,
        }
    }

    pub fn with_max_passes(mut self, max_passes: u32) -> Self {
        self.max_passes = max_passes;
        self
    }

    pub fn max_batch_size(&self) -> usize {
        self.max_batch_size
    }

    pub fn max_passes(&self) -> u32 {
        self.max_passes
    }

    /// Write `items`, resubmitting rejected ones until none remain.
    ///
    /// `submit` receives one chunk and returns the items it did not accept.
    /// The token is checked before each chunk.
    pub async fn write<T, E, F, Fut>(
        &self,
        token: &CancellationToken,
        items: Vec<T>,
        mut submit: F,
    ) -> Result<(), BatchWriteError<E>>
    where
        F: FnMut(Vec<T>) -> Fut,
        Fut: Future<Output = Result<Vec<T>, E>>,
    {
        if items.is_empty() {
            return Ok(());
        }
        if self.max_batch_size == 0 {
            return Err(BatchWriteError::InvalidBatchSize);
        }

        let mut pending = items;
        let mut pass: u32 = 0;

        while !pending.is_empty() {
            if pass >= self.max_passes {
                tracing::warn!(
                    passes = pass,
                    remaining = pending.len(),
                    "Batch write did not converge"
                );
                return Err(BatchWriteError::Unconverged {
                    passes: pass,
                    remaining: pending.len(),
                });
            }
            pass += 1;

            let submitted = pending.len();
            let mut remainder = Vec::new();
            let mut queue = pending.into_iter();
            let mut chunk_index = 0;

            loop {
                let chunk: Vec<T> = queue.by_ref().take(self.max_batch_size).collect();
                if chunk.is_empty() {
                    break;
                }
                if token.is_cancelled() {
                    tracing::debug!(pass, chunk = chunk_index, "Batch write cancelled");
                    return Err(BatchWriteError::Cancelled);
                }

                match submit(chunk).await {
                    Ok(rejected) => remainder.extend(rejected),
                    Err(source) => {
                        tracing::error!(pass, chunk = chunk_index, "Batch chunk submit failed");
                        return Err(BatchWriteError::Submit {
                            pass,
                            chunk: chunk_index,
                            source,
                        });
                    }
                }
                chunk_index += 1;
            }

            if !remainder.is_empty() {
                tracing::debug!(
                    pass,
                    submitted,
                    unprocessed = remainder.len(),
                    "Resubmitting unprocessed items"
                );
            }
            pending = remainder;
        }

        Ok(())
    }

    /// [`BatchWriter::write`] with every chunk submission run through [`retry`].
    ///
    /// Cancellation during a backoff surfaces as [`BatchWriteError::Cancelled`].
    pub async fn write_with_retry<T, E, C, F, Fut>(
        &self,
        token: &CancellationToken,
        policy: &RetryPolicy<C>,
        items: Vec<T>,
        submit: F,
    ) -> Result<(), BatchWriteError<E>>
    where
        T: Clone,
        C: Classify<E>,
        F: Fn(Vec<T>) -> Fut,
        Fut: Future<Output = Result<Vec<T>, E>>,
    {
        let submit = &submit;
        let result = self
            .write(token, items, move |chunk: Vec<T>| {
                retry(token, policy, move || submit(chunk.clone()))
            })
            .await;

        result.map_err(|e| match e {
            BatchWriteError::Submit {
                source: RetryError::Cancelled,
                ..
            } => BatchWriteError::Cancelled,
            BatchWriteError::Submit {
                pass,
                chunk,
                source: RetryError::Failed(source),
            } => BatchWriteError::Submit {
                pass,
                chunk,
                source,
            },
            BatchWriteError::InvalidBatchSize => BatchWriteError::InvalidBatchSize,
            BatchWriteError::Cancelled => BatchWriteError::Cancelled,
            BatchWriteError::Unconverged { passes, remaining } => {
                BatchWriteError::Unconverged { passes, remaining }
            }
        })
    }
}

/// Write `items` in chunks of at most `max_batch_size` with the default pass cap.
pub async fn batch_write<T, E, F, Fut>(
    token: &CancellationToken,
    max_batch_size: usize,
    items: Vec<T>,
    submit: F,
) -> Result<(), BatchWriteError<E>>
where
    F: FnMut(Vec<T>) -> Fut,
    Fut: Future<Output = Result<Vec<T>, E>>,
{
    BatchWriter::new(max_batch_size)
        .write(token, items, submit)
        .await
}
