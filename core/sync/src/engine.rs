//! Synchronization cycle: fetch, diff, reconcile, project.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use rox_common::{Error, Result};

use crate::collection::{LiveCollection, RecordId};
use crate::diff::compare;
use crate::digest::{digest, DigestReport};
use crate::observable::{ChangeCallback, ObservableVec, SubscriptionId};
use crate::query::{project, FilterChain, SortChain};
use crate::reorder::{reorder, reset};
use crate::retry::{RetryConfig, RetryExecutor};
use crate::scheduler::{RefreshMode, RefreshScheduler};
use crate::schema::{DefaultFactory, RecordAccessor, RecordFactory, Schema};
use crate::source::SnapshotSource;
use crate::state::{CycleFlag, CycleGuard, CycleState, RefreshResult, SyncStatus};

/// Configuration for a synced collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// When refresh cycles run when driven by a [`RefreshScheduler`].
    pub refresh_mode: RefreshMode,
    /// Retry policy for the fetch step.
    pub fetch_retry: RetryConfig,
    /// Give up on a single fetch attempt after this long.
    pub fetch_timeout: Option<Duration>,
    /// Replace the view with one `Reset` instead of precise edits.
    pub hard_reset_view: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            refresh_mode: RefreshMode::Manual,
            fetch_retry: RetryConfig::default(),
            fetch_timeout: None,
            hard_reset_view: false,
        }
    }
}

impl SyncConfig {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Read a JSON config file.
    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }
}

/// Builder for [`SyncedCollection`].
pub struct SyncedCollectionBuilder<R: Send + 'static> {
    accessor: Option<Arc<dyn RecordAccessor<R>>>,
    key_fields: Vec<String>,
    factory: Option<Arc<dyn RecordFactory<R>>>,
    source: Option<Arc<dyn SnapshotSource<R>>>,
    config: SyncConfig,
    initial: Vec<R>,
    baseline: Vec<R>,
}

impl<R: Send + 'static> SyncedCollectionBuilder<R> {
    fn new() -> Self {
        Self {
            accessor: None,
            key_fields: Vec::new(),
            factory: None,
            source: None,
            config: SyncConfig::default(),
            initial: Vec::new(),
            baseline: Vec::new(),
        }
    }

    pub fn accessor(mut self, accessor: impl RecordAccessor<R> + 'static) -> Self {
        self.accessor = Some(Arc::new(accessor));
        self
    }

    pub fn key_fields<S: Into<String>>(mut self, fields: impl IntoIterator<Item = S>) -> Self {
        self.key_fields = fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn factory(mut self, factory: impl RecordFactory<R> + 'static) -> Self {
        self.factory = Some(Arc::new(factory));
        self
    }

    pub fn default_factory(self) -> Self
    where
        R: Default,
    {
        self.factory(DefaultFactory)
    }

    pub fn source(self, source: impl SnapshotSource<R> + 'static) -> Self {
        self.shared_source(Arc::new(source))
    }

    pub fn shared_source(mut self, source: Arc<dyn SnapshotSource<R>>) -> Self {
        self.source = Some(source);
        self
    }

    pub fn config(mut self, config: SyncConfig) -> Self {
        self.config = config;
        self
    }

    /// Start from already-known records. They become both the live
    /// collection and the baseline of the first refresh.
    pub fn records(mut self, records: Vec<R>) -> Self
    where
        R: Clone,
    {
        self.baseline = records.clone();
        self.initial = records;
        self
    }

    /// Validate the configuration and build the collection.
    ///
    /// # Errors
    /// - `MissingKeyConfiguration` without an accessor, without key fields,
    ///   or when a key field is unknown to the accessor
    /// - `MissingFactory` without a factory
    /// - `MissingSource` without a snapshot source
    pub fn build(self) -> Result<SyncedCollection<R>> {
        let accessor = self.accessor.ok_or_else(|| {
            Error::MissingKeyConfiguration("no record accessor supplied".to_string())
        })?;
        let schema = Schema::resolve(accessor.as_ref(), self.key_fields.as_slice())?;
        let factory = self.factory.ok_or_else(|| {
            Error::MissingFactory("supply a factory or use default_factory()".to_string())
        })?;
        let source = self.source.ok_or(Error::MissingSource)?;

        let live = LiveCollection::from_records(self.initial);
        let view = ObservableVec::from_vec(live.ids().to_vec());

        debug!(
            keys = ?schema.key_fields(),
            tracked = ?schema.tracked_fields(),
            source = source.name(),
            "Built synced collection"
        );

        Ok(SyncedCollection {
            retry: RetryExecutor::new(self.config.fetch_retry.clone()),
            accessor,
            schema,
            factory,
            source,
            config: self.config,
            live,
            baseline: self.baseline,
            view,
            filters: FilterChain::new(),
            sorts: SortChain::new(),
            flag: CycleFlag::new(),
            status: SyncStatus::default(),
        })
    }
}

/// A live collection kept in sync with a snapshot source, plus a filtered,
/// sorted view over it.
///
/// Each refresh fetches a full snapshot, diffs it against the previous one,
/// digests the changes into the live collection and reorders the view in
/// place. Records that did not change keep their [`RecordId`] and their
/// position in the view, and observers of either sequence receive one
/// notification per structural edit.
///
/// Only one cycle runs at a time. Use [`SyncHandle`] to share a collection
/// between tasks.
pub struct SyncedCollection<R: Send + 'static> {
    accessor: Arc<dyn RecordAccessor<R>>,
    schema: Schema,
    factory: Arc<dyn RecordFactory<R>>,
    source: Arc<dyn SnapshotSource<R>>,
    config: SyncConfig,
    retry: RetryExecutor,
    live: LiveCollection<R>,
    baseline: Vec<R>,
    view: ObservableVec<RecordId>,
    filters: FilterChain<R>,
    sorts: SortChain<R>,
    flag: CycleFlag,
    status: SyncStatus,
}

impl<R: Send + 'static> SyncedCollection<R> {
    pub fn builder() -> SyncedCollectionBuilder<R> {
        SyncedCollectionBuilder::new()
    }

    /// Run one full cycle.
    pub async fn refresh(&mut self) -> Result<RefreshResult> {
        self.refresh_with_cancel(&CancellationToken::new()).await
    }

    /// Run one full cycle; `cancel` aborts the fetch step only.
    ///
    /// # Errors
    /// - `CycleInProgress` if another cycle holds this collection
    /// - `Cancelled`, `Timeout` or `Fetch` from the fetch step; nothing has
    ///   been modified in that case
    pub async fn refresh_with_cancel(
        &mut self,
        cancel: &CancellationToken,
    ) -> Result<RefreshResult> {
        let guard = self.flag.try_begin(CycleState::Fetching)?;
        let started = Instant::now();

        let fetched = fetch_snapshot(
            self.source.clone(),
            &self.retry,
            self.config.fetch_timeout,
            cancel,
        )
        .await;

        match fetched {
            Ok(snapshot) => Ok(self.apply_fetched(snapshot, &guard, started)),
            Err(err) => {
                self.record_failure(&err);
                Err(err)
            }
        }
    }

    /// Run a cycle on a snapshot obtained elsewhere, skipping the fetch.
    pub fn apply_snapshot(&mut self, snapshot: Vec<R>) -> Result<RefreshResult> {
        let guard = self.flag.try_begin(CycleState::Diffing)?;
        Ok(self.apply_fetched(snapshot, &guard, Instant::now()))
    }

    fn apply_fetched(
        &mut self,
        snapshot: Vec<R>,
        guard: &CycleGuard,
        started: Instant,
    ) -> RefreshResult {
        guard.advance(CycleState::Diffing);
        let changes = compare(&self.baseline, &snapshot, &self.schema, self.accessor.as_ref());

        guard.advance(CycleState::Reconciling);
        let report = digest(
            &mut self.live,
            &changes,
            self.factory.as_ref(),
            &self.schema,
            self.accessor.as_ref(),
        );
        self.baseline = snapshot;

        guard.advance(CycleState::Projecting);
        let view_edits = self.project_view();

        self.status.cycles_completed += 1;
        self.status.last_refresh = Some(chrono::Utc::now());
        self.status.last_error = None;

        let result = RefreshResult::new(&report, view_edits, started.elapsed());
        info!(
            added = result.added,
            updated = result.updated,
            deleted = result.deleted,
            diverged = result.diverged_fields,
            view_edits = result.view_edits,
            "Refresh completed in {:?}",
            result.duration
        );
        result
    }

    fn record_failure(&mut self, err: &Error) {
        warn!(source = self.source.name(), "Refresh failed: {}", err);
        self.status.last_error = Some(err.to_string());
    }

    fn project_view(&mut self) -> usize {
        let desired = project(self.live.iter(), &self.filters, &self.sorts);
        if self.config.hard_reset_view {
            if *self.view == *desired {
                return 0;
            }
            reset(&mut self.view, &desired);
            1
        } else {
            reorder(&mut self.view, &desired).edits()
        }
    }

    /// Recompute the view from the current filters and sorts.
    pub fn refresh_view(&mut self) -> Result<usize> {
        let _guard = self.flag.try_begin(CycleState::Projecting)?;
        Ok(self.project_view())
    }

    /// Append a filter joined with AND. Applies from the next projection.
    pub fn add_filter(&mut self, predicate: impl Fn(&R) -> bool + Send + Sync + 'static) {
        self.filters.add(predicate);
    }

    /// Append a filter joined with OR. Applies from the next projection.
    pub fn add_or_filter(&mut self, predicate: impl Fn(&R) -> bool + Send + Sync + 'static) {
        self.filters.add_or(predicate);
    }

    pub fn clear_filters(&mut self) {
        self.filters.clear();
    }

    /// Append an ascending sort key. Applies from the next projection.
    pub fn add_sort<K, F>(&mut self, key: F)
    where
        K: Ord,
        F: Fn(&R) -> K + Send + Sync + 'static,
    {
        self.sorts.add_by_key(key);
    }

    /// Append a descending sort key. Applies from the next projection.
    pub fn add_sort_descending<K, F>(&mut self, key: F)
    where
        K: Ord,
        F: Fn(&R) -> K + Send + Sync + 'static,
    {
        self.sorts.add_by_key_descending(key);
    }

    pub fn clear_sorts(&mut self) {
        self.sorts.clear();
    }

    /// Insert a record created locally.
    ///
    /// The record is appended to the live collection, and to the view if it
    /// passes the filters. Sorting is applied on the next projection.
    pub fn insert_local(&mut self, record: R) -> Result<RecordId> {
        self.ensure_idle()?;
        let visible = self.filters.matches(&record);
        let id = self.live.insert(record);
        if visible {
            self.view.push(id);
        }
        Ok(id)
    }

    /// Remove a record from the view and the live collection.
    pub fn remove_local(&mut self, id: RecordId) -> Result<Option<R>> {
        self.ensure_idle()?;
        if let Some(index) = self.view.position(&id) {
            self.view.remove(index);
        }
        Ok(self.live.remove(id))
    }

    fn ensure_idle(&self) -> Result<()> {
        match self.flag.current() {
            CycleState::Idle => Ok(()),
            state => Err(Error::CycleInProgress(state.to_string())),
        }
    }

    /// Push local state into `base`: diff `base` against the live collection
    /// and digest the result into `base` with the usual divergence rules.
    pub fn write_changes(&self, base: &mut LiveCollection<R>) -> DigestReport {
        let changes = compare(
            base.records(),
            self.live.records(),
            &self.schema,
            self.accessor.as_ref(),
        );
        digest(
            base,
            &changes,
            self.factory.as_ref(),
            &self.schema,
            self.accessor.as_ref(),
        )
    }

    pub fn get(&self, id: RecordId) -> Option<&R> {
        self.live.get(id)
    }

    /// Edit a record in place. The edit survives refreshes until the source
    /// changes the same field.
    pub fn get_mut(&mut self, id: RecordId) -> Option<&mut R> {
        self.live.get_mut(id)
    }

    /// Record ids in view order.
    pub fn view(&self) -> &[RecordId] {
        &self.view
    }

    /// Records in view order.
    pub fn view_records(&self) -> impl Iterator<Item = &R> + '_ {
        self.view.iter().filter_map(move |id| self.live.get(*id))
    }

    pub fn live(&self) -> &LiveCollection<R> {
        &self.live
    }

    /// The snapshot the next refresh is compared against.
    pub fn baseline(&self) -> &[R] {
        &self.baseline
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn status(&self) -> SyncStatus {
        SyncStatus {
            state: self.flag.current(),
            ..self.status.clone()
        }
    }

    pub fn subscribe_view(&mut self, callback: ChangeCallback<RecordId>) -> SubscriptionId {
        self.view.subscribe(callback)
    }

    pub fn unsubscribe_view(&mut self, id: SubscriptionId) -> bool {
        self.view.unsubscribe(id)
    }

    pub fn subscribe_live(&mut self, callback: ChangeCallback<RecordId>) -> SubscriptionId {
        self.live.subscribe(callback)
    }

    pub fn unsubscribe_live(&mut self, id: SubscriptionId) -> bool {
        self.live.unsubscribe(id)
    }

    /// Move the collection behind a shareable handle.
    pub fn into_handle(self) -> SyncHandle<R> {
        SyncHandle::new(self)
    }
}

async fn fetch_snapshot<R: Send + 'static>(
    source: Arc<dyn SnapshotSource<R>>,
    retry: &RetryExecutor,
    timeout: Option<Duration>,
    cancel: &CancellationToken,
) -> Result<Vec<R>> {
    debug!(source = source.name(), "Fetching snapshot");

    let attempt = || {
        let source = source.clone();
        async move {
            match timeout {
                Some(limit) => tokio::time::timeout(limit, source.fetch())
                    .await
                    .unwrap_or_else(|_| Err(Error::Timeout(limit))),
                None => source.fetch().await,
            }
        }
    };

    tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            debug!("Fetch cancelled");
            Err(Error::Cancelled)
        }
        result = retry.execute(attempt) => result,
    }
}

/// Cloneable, task-safe handle to a [`SyncedCollection`].
///
/// Refreshes are single-flight: while a cycle is running, `refresh` fails
/// fast with `CycleInProgress`. The fetch runs without the lock held, so
/// readers are only blocked while the fetched snapshot is applied.
pub struct SyncHandle<R: Send + 'static> {
    inner: Arc<Mutex<SyncedCollection<R>>>,
    flag: CycleFlag,
}

impl<R: Send + 'static> Clone for SyncHandle<R> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            flag: self.flag.clone(),
        }
    }
}

impl<R: Send + 'static> SyncHandle<R> {
    pub fn new(collection: SyncedCollection<R>) -> Self {
        let flag = collection.flag.clone();
        Self {
            inner: Arc::new(Mutex::new(collection)),
            flag,
        }
    }

    pub async fn refresh(&self) -> Result<RefreshResult> {
        self.refresh_with_cancel(&CancellationToken::new()).await
    }

    pub async fn refresh_with_cancel(&self, cancel: &CancellationToken) -> Result<RefreshResult> {
        let guard = self.flag.try_begin(CycleState::Fetching)?;
        let started = Instant::now();

        let (source, retry, timeout) = {
            let inner = self.inner.lock().await;
            (
                inner.source.clone(),
                inner.retry.clone(),
                inner.config.fetch_timeout,
            )
        };
        let fetched = fetch_snapshot(source, &retry, timeout, cancel).await;

        let mut inner = self.inner.lock().await;
        match fetched {
            Ok(snapshot) => Ok(inner.apply_fetched(snapshot, &guard, started)),
            Err(err) => {
                inner.record_failure(&err);
                Err(err)
            }
        }
    }

    /// Current cycle phase, without locking.
    pub fn state(&self) -> CycleState {
        self.flag.current()
    }

    pub async fn status(&self) -> SyncStatus {
        self.inner.lock().await.status()
    }

    pub async fn insert_local(&self, record: R) -> Result<RecordId> {
        self.inner.lock().await.insert_local(record)
    }

    pub async fn remove_local(&self, id: RecordId) -> Result<Option<R>> {
        self.inner.lock().await.remove_local(id)
    }

    pub async fn refresh_view(&self) -> Result<usize> {
        self.inner.lock().await.refresh_view()
    }

    /// Lock the collection for reads, edits or reconfiguration.
    pub async fn lock(&self) -> MutexGuard<'_, SyncedCollection<R>> {
        self.inner.lock().await
    }

    /// Spawn a scheduler that refreshes this collection.
    pub fn spawn_scheduler(&self, mode: RefreshMode) -> RefreshScheduler {
        let (scheduler, runner) = RefreshScheduler::new(mode);
        let handle = self.clone();
        tokio::spawn(runner.run(move || {
            let handle = handle.clone();
            async move { handle.refresh().await }
        }));
        scheduler
    }

    /// Spawn a scheduler in the collection's configured refresh mode.
    pub async fn spawn_configured_scheduler(&self) -> RefreshScheduler {
        let mode = self.inner.lock().await.config().refresh_mode.clone();
        self.spawn_scheduler(mode)
    }
}
