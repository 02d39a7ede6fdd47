//! Cursor pagination over a retried page fetch.

use std::future::Future;

use futures::Stream;
use tokio_util::sync::CancellationToken;

use crate::retry::{Classify, RetryError, RetryPolicy, retry};

/// One page of results and the cursor to the next, if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page<T, C> {
    pub items: Vec<T>,
    /// `None` marks the final page.
    pub cursor: Option<C>,
}

impl<T, C> Page<T, C> {
    pub fn next(items: Vec<T>, cursor: C) -> Self {
        Self {
            items,
            cursor: Some(cursor),
        }
    }

    pub fn last(items: Vec<T>) -> Self {
        Self {
            items,
            cursor: None,
        }
    }

    pub fn is_last(&self) -> bool {
        self.cursor.is_none()
    }
}

/// Fetch every page, following cursors from `None` until a page has no cursor.
///
/// Each fetch goes through [`retry`] with `policy`. The first error ends the
/// walk and discards the items gathered so far; use [`pages`] to keep them.
pub async fn paginate<T, C, E, P, F, Fut>(
    token: &CancellationToken,
    policy: &RetryPolicy<P>,
    mut fetch_page: F,
) -> Result<Vec<T>, RetryError<E>>
where
    C: Clone,
    P: Classify<E>,
    F: FnMut(Option<C>) -> Fut,
    Fut: Future<Output = Result<Page<T, C>, E>>,
{
    let mut items = Vec::new();
    let mut cursor: Option<C> = None;
    let mut fetched = 0usize;

    loop {
        if token.is_cancelled() {
            return Err(RetryError::Cancelled);
        }

        let page = retry(token, policy, || fetch_page(cursor.clone())).await?;
        fetched += 1;
        items.extend(page.items);

        match page.cursor {
            Some(next) => cursor = Some(next),
            None => {
                tracing::debug!(pages = fetched, items = items.len(), "Pagination complete");
                return Ok(items);
            }
        }
    }
}

struct PageState<F, C> {
    fetch_page: F,
    cursor: Option<C>,
    done: bool,
}

/// Page-by-page form of [`paginate`].
///
/// Yields each page's items as it arrives. An error is yielded once and ends
/// the stream; pages already yielded stay with the caller.
pub fn pages<'a, T, C, E, P, F, Fut>(
    token: &'a CancellationToken,
    policy: &'a RetryPolicy<P>,
    fetch_page: F,
) -> impl Stream<Item = Result<Vec<T>, RetryError<E>>>
where
    C: Clone,
    P: Classify<E>,
    F: FnMut(Option<C>) -> Fut,
    Fut: Future<Output = Result<Page<T, C>, E>>,
{
    let state = PageState {
        fetch_page,
        cursor: None,
        done: false,
    };

    futures::stream::try_unfold(state, move |mut state| async move {
        if state.done {
            return Ok::<_, RetryError<E>>(None);
        }
        if token.is_cancelled() {
            return Err(RetryError::Cancelled);
        }

        let cursor = state.cursor.clone();
        let page = retry(token, policy, || (state.fetch_page)(cursor.clone())).await?;

        state.done = page.cursor.is_none();
        state.cursor = page.cursor;
        Ok(Some((page.items, state)))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use futures::StreamExt;

    use crate::retry::{AlwaysRetry, BackoffConfig, Classification, NeverRetry};

    fn quick() -> BackoffConfig {
        BackoffConfig {
            initial_interval: Duration::from_millis(1),
            max_interval: Duration::from_millis(2),
            max_elapsed: Some(Duration::from_secs(5)),
            randomization_factor: 0.0,
            ..BackoffConfig::default()
        }
    }

    #[tokio::test]
    async fn accumulates_pages_in_order() {
        let policy = RetryPolicy::new(quick(), NeverRetry);
        let mut cursors_seen = Vec::new();

        let items: Result<Vec<&str>, RetryError<()>> =
            paginate(&CancellationToken::new(), &policy, |cursor: Option<&str>| {
                cursors_seen.push(cursor);
                let page = match cursor {
                    None => Page::next(vec!["a", "b"], "x"),
                    Some(_) => Page::last(vec!["c"]),
                };
                async move { Ok(page) }
            })
            .await;

        assert_eq!(items.unwrap(), vec!["a", "b", "c"]);
        assert_eq!(cursors_seen, vec![None, Some("x")]);
    }

    #[tokio::test]
    async fn error_discards_partial_results() {
        let policy = RetryPolicy::new(quick(), NeverRetry);
        let mut calls = 0;

        let result: Result<Vec<u32>, RetryError<&str>> =
            paginate(&CancellationToken::new(), &policy, |cursor: Option<u32>| {
                calls += 1;
                async move {
                    match cursor {
                        None => Ok(Page::next(vec![1, 2], 1)),
                        Some(_) => Err("access denied"),
                    }
                }
            })
            .await;

        assert_eq!(calls, 2);
        assert_eq!(result.unwrap_err().into_inner(), Some("access denied"));
    }

    #[tokio::test]
    async fn retryable_page_is_refetched_with_same_cursor() {
        let policy = RetryPolicy::new(quick(), |e: &String| {
            if e == "throttled" {
                Classification::Retryable(e.clone())
            } else {
                Classification::Permanent
            }
        });
        let mut cursors_seen = Vec::new();

        let items = paginate(&CancellationToken::new(), &policy, |cursor: Option<u8>| {
            cursors_seen.push(cursor);
            let attempt = cursors_seen.len();
            async move {
                match (cursor, attempt) {
                    (None, _) => Ok(Page::next(vec!['a'], 7)),
                    (Some(7), 2) => Err("throttled".to_string()),
                    (Some(7), _) => Ok(Page::last(vec!['b'])),
                    _ => Err("unexpected cursor".to_string()),
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(items, vec!['a', 'b']);
        assert_eq!(cursors_seen, vec![None, Some(7), Some(7)]);
    }

    #[tokio::test]
    async fn cancelled_token_fetches_nothing() {
        let token = CancellationToken::new();
        token.cancel();
        let policy = RetryPolicy::new(quick(), AlwaysRetry);
        let mut calls = 0;

        let result: Result<Vec<u8>, RetryError<String>> = paginate(&token, &policy, |_: Option<u8>| {
            calls += 1;
            async { Ok(Page::last(vec![1])) }
        })
        .await;

        assert_eq!(calls, 0);
        assert!(result.unwrap_err().is_cancelled());
    }

    #[tokio::test]
    async fn stream_keeps_pages_before_error() {
        let policy = RetryPolicy::new(quick(), NeverRetry);
        let token = CancellationToken::new();

        let stream = pages(&token, &policy, |cursor: Option<u32>| async move {
            match cursor {
                None => Ok(Page::next(vec![1, 2], 1)),
                Some(1) => Ok(Page::next(vec![3], 2)),
                Some(_) => Err("connection reset"),
            }
        });
        let results: Vec<Result<Vec<u32>, RetryError<&str>>> = stream.collect().await;

        assert_eq!(results.len(), 3);
        assert_eq!(results[0].as_ref().unwrap(), &vec![1, 2]);
        assert_eq!(results[1].as_ref().unwrap(), &vec![3]);
        assert_eq!(results[2].as_ref().unwrap_err().inner(), Some(&"connection reset"));
    }

    #[tokio::test]
    async fn stream_ends_after_last_page() {
        let policy = RetryPolicy::new(quick(), NeverRetry);
        let token = CancellationToken::new();

        let stream = pages(&token, &policy, |cursor: Option<()>| async move {
            match cursor {
                None => Ok::<_, ()>(Page::next(vec!["only"], ())),
                Some(()) => Ok(Page::last(Vec::new())),
            }
        });
        let results: Vec<_> = stream.collect().await;

        assert_eq!(results.len(), 2);
        assert!(results.iter().all(Result::is_ok));
    }

    #[test]
    fn page_constructors() {
        let page: Page<u8, String> = Page::next(vec![1], "tok".into());
        assert!(!page.is_last());
        let page: Page<u8, String> = Page::last(vec![]);
        assert!(page.is_last());
    }
}
