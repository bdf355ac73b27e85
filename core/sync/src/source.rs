//! Snapshot sources.

use async_trait::async_trait;
use futures::future::BoxFuture;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use rox_common::{Error, Result};

/// Asynchronous producer of full snapshots.
///
/// `fetch` is the only suspension point of a refresh cycle. It must return
/// the complete current record set each time; the differ works out what
/// changed.
#[async_trait]
pub trait SnapshotSource<R: Send>: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str {
        "source"
    }

    /// Fetch the current snapshot.
    ///
    /// # Errors
    /// - `Error::Fetch` when the backend fails; set `retryable` if a retry
    ///   may succeed
    /// - `Error::Timeout` when the backend gives up waiting
    async fn fetch(&self) -> Result<Vec<R>>;
}

/// Source backed by a closure returning a boxed future.
pub struct FnSource<F> {
    name: String,
    fetch: F,
}

#[async_trait]
impl<R, F> SnapshotSource<R> for FnSource<F>
where
    R: Send,
    F: Fn() -> BoxFuture<'static, Result<Vec<R>>> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(&self) -> Result<Vec<R>> {
        (self.fetch)().await
    }
}

/// Wrap a closure as a [`SnapshotSource`].
///
/// ```ignore
/// let source = source_fn("api", || Box::pin(async { client.list().await }));
/// ```
pub fn source_fn<F>(name: impl Into<String>, fetch: F) -> FnSource<F> {
    FnSource {
        name: name.into(),
        fetch,
    }
}

/// In-memory source for tests and demos.
///
/// Returns a clone of its current snapshot on every fetch. Failures can be
/// queued with [`MemorySource::fail_next`]; each queued error is returned by
/// one fetch, in order.
pub struct MemorySource<R> {
    snapshot: Mutex<Vec<R>>,
    failures: Mutex<VecDeque<Error>>,
    delay: Mutex<Option<Duration>>,
    fetches: AtomicUsize,
}

impl<R: Clone> MemorySource<R> {
    pub fn new(snapshot: Vec<R>) -> Self {
        Self {
            snapshot: Mutex::new(snapshot),
            failures: Mutex::new(VecDeque::new()),
            delay: Mutex::new(None),
            fetches: AtomicUsize::new(0),
        }
    }

    /// Replace the snapshot returned by later fetches.
    pub fn set_snapshot(&self, snapshot: Vec<R>) {
        *self.snapshot.lock().unwrap_or_else(PoisonError::into_inner) = snapshot;
    }

    /// Make the next fetch fail with `error`.
    pub fn fail_next(&self, error: Error) {
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(error);
    }

    /// Delay every fetch, to keep a cycle in the `Fetching` state.
    pub fn set_delay(&self, delay: Option<Duration>) {
        *self.delay.lock().unwrap_or_else(PoisonError::into_inner) = delay;
    }

    /// Number of fetches started so far.
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

impl<R: Clone> Default for MemorySource<R> {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

#[async_trait]
impl<R: Clone + Send> SnapshotSource<R> for MemorySource<R> {
    fn name(&self) -> &str {
        "memory"
    }

    async fn fetch(&self) -> Result<Vec<R>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);

        let delay = *self.delay.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let failure = self
            .failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();
        if let Some(err) = failure {
            return Err(err);
        }

        Ok(self
            .snapshot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{people, Person};

    #[tokio::test]
    async fn test_memory_source_returns_current_snapshot() {
        let source = MemorySource::new(people(&[(1, "A")]));
        assert_eq!(source.fetch().await.unwrap(), people(&[(1, "A")]));

        source.set_snapshot(people(&[(2, "B")]));
        assert_eq!(source.fetch().await.unwrap(), people(&[(2, "B")]));
        assert_eq!(source.fetch_count(), 2);
    }

    #[tokio::test]
    async fn test_memory_source_queued_failure_is_used_once() {
        let source: MemorySource<Person> = MemorySource::default();
        source.fail_next(Error::transient("offline"));

        assert!(matches!(
            source.fetch().await,
            Err(Error::Fetch { retryable: true, .. })
        ));
        assert!(source.fetch().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_fn_source() {
        let source = source_fn("fixed", || -> BoxFuture<'static, Result<Vec<Person>>> {
            Box::pin(async { Ok(people(&[(7, "G")])) })
        });
        assert_eq!(SnapshotSource::<Person>::name(&source), "fixed");
        let snapshot = SnapshotSource::<Person>::fetch(&source).await.unwrap();
        assert_eq!(snapshot[0].id, 7);
    }
}
