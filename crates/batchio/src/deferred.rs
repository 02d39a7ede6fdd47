//! Single-result handoff: run one fallible action off the calling path and
//! deliver its outcome to exactly one waiter.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::task::JoinHandle;

enum State<T, E> {
    Ready(Result<T, E>),
    Running(JoinHandle<Result<T, E>>),
    Consumed,
}

/// A result produced once by a background task and consumed once by [`Deferred::wait`].
///
/// Construction starts the action, so a deferred value can never be started twice.
pub struct Deferred<T, E> {
    state: Mutex<State<T, E>>,
    finished: Arc<AtomicBool>,
}

/// Raises the finished flag when the action's task ends, by return or by panic.
struct MarkFinished(Arc<AtomicBool>);

impl Drop for MarkFinished {
    fn drop(&mut self) {
        self.0.store(true, Ordering::Release);
    }
}

impl<T, E> Deferred<T, E>
where
    T: Send + 'static,
    E: Send + 'static,
{
    /// Start `action` on the runtime.
    pub fn spawn<F, Fut>(action: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let finished = Arc::new(AtomicBool::new(false));
        let mark = MarkFinished(Arc::clone(&finished));
        let handle = tokio::spawn(async move {
            let _mark = mark;
            action().await
        });
        Self {
            state: Mutex::new(State::Running(handle)),
            finished,
        }
    }

    /// Start a blocking `action` on the blocking thread pool.
    pub fn spawn_blocking<F>(action: F) -> Self
    where
        F: FnOnce() -> Result<T, E> + Send + 'static,
    {
        let finished = Arc::new(AtomicBool::new(false));
        let mark = MarkFinished(Arc::clone(&finished));
        let handle = tokio::task::spawn_blocking(move || {
            let _mark = mark;
            action()
        });
        Self {
            state: Mutex::new(State::Running(handle)),
            finished,
        }
    }
}

impl<T, E> Deferred<T, E> {
    /// An already-delivered value.
    pub fn ready(result: Result<T, E>) -> Self {
        Self {
            state: Mutex::new(State::Ready(result)),
            finished: Arc::new(AtomicBool::new(true)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State<T, E>> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Wait for the outcome.
    ///
    /// Only the first call waits and gets `Some`. Every later call, including
    /// one racing the first, returns `None` immediately. If the waiting call
    /// is dropped before the action finishes, the outcome stays pending for
    /// the next call. A panic in the action resumes here.
    pub async fn wait(&self) -> Option<Result<T, E>> {
        let state = std::mem::replace(&mut *self.lock(), State::Consumed);

        let handle = match state {
            State::Ready(result) => return Some(result),
            State::Consumed => return None,
            State::Running(handle) => handle,
        };

        let mut pending = PendingJoin {
            owner: self,
            handle: Some(handle),
        };
        let joined = match pending.handle.as_mut() {
            Some(handle) => handle.await,
            None => return None,
        };
        pending.handle = None;

        match joined {
            Ok(result) => Some(result),
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(e) => {
                tracing::warn!(error = %e, "Deferred action did not complete");
                None
            }
        }
    }

    /// Whether the action has finished, by returning or by panicking.
    ///
    /// Says nothing about whether a waiter has collected the outcome yet.
    pub fn received(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }
}

/// Puts a join handle back into its [`Deferred`] if the waiter goes away mid-await.
struct PendingJoin<'a, T, E> {
    owner: &'a Deferred<T, E>,
    handle: Option<JoinHandle<Result<T, E>>>,
}

impl<T, E> Drop for PendingJoin<'_, T, E> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            tracing::trace!("Deferred waiter dropped, outcome left for the next wait");
            *self.owner.lock() = State::Running(handle);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::sync::oneshot;

    #[tokio::test]
    async fn second_wait_returns_immediately() {
        let deferred: Deferred<u32, String> = Deferred::spawn(|| async { Ok(42) });

        assert_eq!(deferred.wait().await, Some(Ok(42)));
        let second = tokio::time::timeout(Duration::from_millis(100), deferred.wait())
            .await
            .expect("second wait must not block");
        assert_eq!(second, None);
    }

    #[tokio::test]
    async fn error_is_delivered() {
        let deferred: Deferred<(), &str> = Deferred::spawn(|| async { Err("nope") });
        assert_eq!(deferred.wait().await, Some(Err("nope")));
    }

    #[tokio::test]
    async fn received_tracks_delivery() {
        let (gate_tx, gate_rx) = oneshot::channel::<()>();
        let deferred: Deferred<&str, ()> = Deferred::spawn(|| async move {
            let _ = gate_rx.await;
            Ok("done")
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!deferred.received());

        gate_tx.send(()).unwrap();
        assert_eq!(deferred.wait().await, Some(Ok("done")));
        assert!(deferred.received());
    }

    #[tokio::test]
    async fn ready_is_delivered_once() {
        let deferred: Deferred<u8, ()> = Deferred::ready(Ok(1));
        assert!(deferred.received());
        assert_eq!(deferred.wait().await, Some(Ok(1)));
        assert_eq!(deferred.wait().await, None);
    }

    #[tokio::test]
    async fn blocking_action_runs_off_runtime() {
        let deferred: Deferred<usize, ()> = Deferred::spawn_blocking(|| {
            std::thread::sleep(Duration::from_millis(10));
            Ok(7)
        });
        assert_eq!(deferred.wait().await, Some(Ok(7)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn racing_waiters_get_one_delivery() {
        let deferred: Arc<Deferred<u32, ()>> = Arc::new(Deferred::spawn(|| async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            Ok(5)
        }));

        let waiters: Vec<_> = (0..8)
            .map(|_| {
                let deferred = Arc::clone(&deferred);
                tokio::spawn(async move { deferred.wait().await })
            })
            .collect();

        let mut delivered = 0;
        for waiter in waiters {
            if let Some(result) = waiter.await.unwrap() {
                assert_eq!(result, Ok(5));
                delivered += 1;
            }
        }
        assert_eq!(delivered, 1);
    }

    #[tokio::test]
    async fn abandoned_wait_leaves_outcome_for_next_wait() {
        let deferred: Deferred<u32, ()> = Deferred::spawn(|| async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok(9)
        });

        let first = tokio::time::timeout(Duration::from_millis(5), deferred.wait()).await;
        assert!(first.is_err(), "first wait should time out");

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(deferred.received());
        assert_eq!(deferred.wait().await, Some(Ok(9)));
        assert_eq!(deferred.wait().await, None);
    }

    #[tokio::test]
    async fn panicking_action_counts_as_finished() {
        let deferred: Deferred<(), ()> = Deferred::spawn(|| async {
            let explode = true;
            if explode {
                panic!("action gave up");
            }
            Ok(())
        });

        let finished = tokio::time::timeout(Duration::from_secs(5), async {
            while !deferred.received() {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await;
        assert!(finished.is_ok(), "received() never turned true after a panic");
    }

    #[tokio::test]
    #[should_panic(expected = "action failed hard")]
    async fn panic_resumes_on_waiter() {
        let deferred: Deferred<(), ()> = Deferred::spawn(|| async {
            let explode = true;
            if explode {
                panic!("action failed hard");
            }
            Ok(())
        });
        let _ = deferred.wait().await;
    }
}
