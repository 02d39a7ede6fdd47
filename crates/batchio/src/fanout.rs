//! Cancellable fan-out: run one worker per index in `0..n` concurrently.
//!
//! Cancellation is cooperative. The launch loop stops at the first index it
//! finds the token signaled, and each launched worker checks the token once
//! more before running. Work already past that check always runs to
//! completion; dropping the `fan_out` future does not abort spawned workers.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Outcome of a fan-out: how many workers were launched and every error they returned.
#[derive(Debug)]
pub struct FanOutReport<E> {
    /// Number of indices launched (`0..started`).
    pub started: usize,
    /// Errors in arrival order, tagged with the worker index.
    pub errors: Vec<(usize, E)>,
}

impl<E> FanOutReport<E> {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn first_error(&self) -> Option<&E> {
        self.errors.first().map(|(_, e)| e)
    }

    /// Reduce to the first recorded error.
    pub fn into_result(self) -> Result<(), E> {
        match self.errors.into_iter().next() {
            Some((_, e)) => Err(e),
            None => Ok(()),
        }
    }
}

/// Run `worker(i, token)` for every `i` in `0..n` and return the first error.
///
/// The token handed to each worker is a child of `token`: it is signaled when
/// the caller cancels, and calling `cancel()` on it stops the rest of this
/// fan-out without touching the caller's token. With `cancel_on_error`, the
/// first failing worker cancels it automatically.
pub async fn fan_out<F, Fut, E>(
    token: &CancellationToken,
    n: usize,
    cancel_on_error: bool,
    worker: F,
) -> Result<(), E>
where
    F: Fn(usize, CancellationToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), E>> + Send + 'static,
    E: Send + 'static,
{
    fan_out_all(token, n, cancel_on_error, worker)
        .await
        .into_result()
}

/// Like [`fan_out`], but returns every recorded error.
///
/// A worker panic is re-raised on the caller after all launched workers finish.
pub async fn fan_out_all<F, Fut, E>(
    token: &CancellationToken,
    n: usize,
    cancel_on_error: bool,
    worker: F,
) -> FanOutReport<E>
where
    F: Fn(usize, CancellationToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), E>> + Send + 'static,
    E: Send + 'static,
{
    let local = token.child_token();
    let worker = Arc::new(worker);
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut handles = Vec::new();

    for index in 0..n {
        if local.is_cancelled() {
            tracing::debug!(
                started = index,
                total = n,
                "Fan-out cancelled, skipping remaining workers"
            );
            break;
        }

        let worker = Arc::clone(&worker);
        let token = local.clone();
        let tx = tx.clone();

        handles.push(tokio::spawn(async move {
            if token.is_cancelled() {
                return;
            }
            if let Err(e) = worker(index, token.clone()).await {
                // Record before cancelling so errors caused by the cancel arrive later.
                let _ = tx.send((index, e));
                if cancel_on_error {
                    token.cancel();
                }
            }
        }));
    }
    drop(tx);

    let started = handles.len();
    let mut panic = None;
    for handle in handles {
        if let Err(e) = handle.await
            && e.is_panic()
            && panic.is_none()
        {
            panic = Some(e.into_panic());
        }
    }

    let mut errors = Vec::new();
    while let Some(entry) = rx.recv().await {
        errors.push(entry);
    }

    if let Some(payload) = panic {
        std::panic::resume_unwind(payload);
    }

    if !errors.is_empty() {
        tracing::debug!(
            started,
            failed = errors.len(),
            first_index = errors[0].0,
            "Fan-out finished with errors"
        );
    }

    FanOutReport { started, errors }
}
