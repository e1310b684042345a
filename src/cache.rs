use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use fieldx::fxstruct;
use moka::ops::compute::CompResult;
use moka::ops::compute::Op;
use moka::policy::EvictionPolicy;
use moka::sync::Cache;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tokio::time::timeout_at;
use tokio::time::Instant;
use tracing::debug;
use tracing::instrument;
use tracing::trace;
use tracing::warn;

use crate::error::AggregatedLoadError;
use crate::error::ConfigError;
use crate::error::LoadError;
use crate::error::RefreshError;
use crate::task::KeyedLoadTask;
use crate::traits::LoadExecutor;
use crate::traits::NoHooks;
use crate::traits::RefreshHooks;
use crate::types::CacheKey;
use crate::types::CacheValue;
use crate::types::CommitOutcome;
use crate::types::LoadResult;
use crate::types::Loaders;
use crate::types::RefreshSummary;

/// Refresh deadlines below this are considered a misconfiguration.
pub const MIN_DEADLINE: Duration = Duration::from_secs(1);

type Reported<K, V> = (K, Result<Option<V>, LoadError>);

/// Last-known values for a dynamic key set.
///
/// Readers call [`get`](Self::get) at any time and never wait. The store is only written by
/// [`refresh`](Self::refresh), and only one refresh runs at a time.
///
/// ```ignore
/// let cache = RefreshCache::<EntryIdentity, Status>::builder()
///     .executor(pool)
///     .hooks(Arc::new(StatusHooks))
///     .name("endpoint status")
///     .build()?;
///
/// cache.refresh(Duration::from_secs(30), supplier.loaders().await?).await?;
/// let status = cache.get(&identity);
/// ```
#[fxstruct(sync, rc, no_new, default(off), builder)]
pub struct RefreshCache<K, V>
where
    K: CacheKey,
    V: CacheValue,
{
    #[fieldx(get(clone), builder(required))]
    executor: Arc<dyn LoadExecutor>,

    #[fieldx(get(clone), default(Arc::new(NoHooks) as Arc<dyn RefreshHooks<K, V>>))]
    hooks: Arc<dyn RefreshHooks<K, V>>,

    /// Cache name. Most useful for debugging and logging.
    #[fieldx(get, builder(into), default(String::from("refresh-cache")))]
    name: String,

    /// Safety valve only: key membership is reconciled on every cycle anyway.
    #[fieldx(get(copy), default(1_000))]
    max_capacity: u64,

    #[fieldx(lazy, private, get(clone), builder(off))]
    store: Arc<Cache<K, V>>,

    // Held for the duration of a cycle; try-locked, never awaited.
    #[fieldx(builder(off), default(tokio::sync::Mutex::new(())))]
    cycle: tokio::sync::Mutex<()>,

    // Mirrors the cycle lock for observers, who must never touch the lock itself.
    #[fieldx(builder(off), default(AtomicBool::new(false)))]
    refreshing: AtomicBool,

    #[fieldx(lock, private, get(copy), set, builder(off), default(None))]
    finished_at: Option<Instant>,
}

impl<K, V> RefreshCache<K, V>
where
    K: CacheKey,
    V: CacheValue,
{
    fn build_store(&self) -> Arc<Cache<K, V>> {
        Arc::new(
            Cache::builder()
                .max_capacity(self.max_capacity())
                .name(self.name())
                .eviction_policy(EvictionPolicy::lru())
                .build(),
        )
    }

    /// The most recently committed value for `key`, if any.
    #[inline]
    pub fn get(&self, key: &K) -> Option<V> {
        self.store().get(key)
    }

    #[inline]
    pub fn contains_key(&self, key: &K) -> bool {
        self.store().contains_key(key)
    }

    pub fn entry_count(&self) -> u64 {
        let store = self.store();
        store.run_pending_tasks();
        store.entry_count()
    }

    pub fn keys(&self) -> Vec<K> {
        self.store().iter().map(|(key, _)| K::clone(&key)).collect()
    }

    /// When the last cycle finished, whatever its outcome. `None` until the first cycle gets past its preconditions.
    #[inline]
    pub fn last_refresh(&self) -> Option<Instant> {
        self.finished_at()
    }

    pub fn is_refreshing(&self) -> bool {
        self.refreshing.load(Ordering::Acquire)
    }

    /// Shuts the load executor down. Subsequent refreshes fail with [`ConfigError::ExecutorShutDown`].
    pub fn shutdown(&self) {
        debug!(cache = %self.name(), "Shutting down");
        self.executor().shutdown();
    }

    /// Runs one refresh cycle.
    ///
    /// Keys missing from `loaders` are evicted first. Then every loader is submitted to the executor and the results
    /// are committed as they arrive. Loads still running when `deadline` has passed since the start of the cycle are
    /// aborted and reported as timed out. Every key that failed is listed in the returned
    /// [`AggregatedLoadError`]; a failure never stops the other keys from being processed.
    ///
    /// Fails immediately with [`RefreshError::Busy`] if another cycle is in progress.
    #[instrument(level = "debug", skip_all, fields(cache = %self.name(), keys = loaders.len()))]
    pub async fn refresh(&self, deadline: Duration, loaders: Loaders<K, V>) -> Result<RefreshSummary, RefreshError<K>> {
        if deadline < MIN_DEADLINE {
            return Err(ConfigError::DeadlineTooShort {
                deadline,
                min: MIN_DEADLINE,
            }
            .into());
        }

        let executor = self.executor();
        executor.ensure_ready()?;

        let Ok(_cycle) = self.cycle.try_lock()
        else {
            debug!("Another refresh cycle is in flight");
            return Err(RefreshError::Busy);
        };
        let _in_flight = InFlight::new(&self.refreshing);

        let expires_at = Instant::now() + deadline;
        let mut summary = RefreshSummary {
            evicted: self.evict_absent(&loaders),
            ..Default::default()
        };
        let mut causes = HashMap::new();
        let mut pending = PendingLoads::new();
        let (tx, mut rx) = mpsc::unbounded_channel::<Reported<K, V>>();

        for (key, loader) in loaders {
            let completion = Completion::new(key.clone(), tx.clone());
            let task = KeyedLoadTask::new(key.clone(), loader);

            match executor.submit(Box::pin(async move {
                let (_, result) = task.run().await;
                completion.report(result);
            })) {
                Ok(handle) => pending.insert(key, handle),
                Err(err) => {
                    warn!(%key, "Load task rejected: {err}");
                    self.on_load_error(key, err.into(), &mut causes, &mut summary);
                }
            }
        }
        // Only the tasks hold senders now.
        drop(tx);

        while !pending.is_empty() {
            let Ok(Some((key, result))) = timeout_at(expires_at, rx.recv()).await
            else {
                break;
            };

            // Anything not pending anymore has already been settled.
            if !pending.complete(&key) {
                continue;
            }

            match result {
                Ok(Some(value)) => summary.record(self.commit(&key, value)),
                Ok(None) => self.on_load_error(key, LoadError::Empty, &mut causes, &mut summary),
                Err(err) => self.on_load_error(key, err, &mut causes, &mut summary),
            }
        }

        for key in pending.expire() {
            self.on_timeout(key, deadline, &mut causes, &mut summary);
        }

        self.set_finished_at(Some(Instant::now()));

        if causes.is_empty() {
            debug!(%summary, "Refresh cycle complete");
            Ok(summary)
        }
        else {
            debug!(%summary, failed = causes.len(), "Refresh cycle complete with failures");
            Err(AggregatedLoadError::new(causes).into())
        }
    }

    fn evict_absent(&self, loaders: &Loaders<K, V>) -> usize {
        let store = self.store();
        let stale = store
            .iter()
            .filter(|(key, _)| !loaders.contains_key(&**key))
            .map(|(key, _)| key)
            .collect::<Vec<_>>();

        for key in &stale {
            debug!(key = %key, "Evicting key no longer known");
            store.invalidate(&**key);
        }

        stale.len()
    }

    fn commit(&self, key: &K, value: V) -> CommitOutcome {
        let result = self.store().entry(key.clone()).and_compute_with(|entry| match entry {
            Some(entry) if *entry.value() == value => Op::Nop,
            _ => Op::Put(value),
        });

        match result {
            CompResult::Inserted(_) => {
                debug!(%key, "New value");
                CommitOutcome::Inserted
            }
            CompResult::ReplacedWith(_) => {
                debug!(%key, "Value changed");
                CommitOutcome::Replaced
            }
            CompResult::Unchanged(_) => {
                trace!(%key, "Value unchanged");
                CommitOutcome::Unchanged
            }
            other => unreachable!("a commit neither removes nor skips a key: {other:?}"),
        }
    }

    fn on_load_error(
        &self,
        key: K,
        error: LoadError,
        causes: &mut HashMap<K, LoadError>,
        summary: &mut RefreshSummary,
    ) {
        debug!(%key, "Load failed: {error}");
        let hook_result = self.hooks().on_load_error(&key, &error);
        self.settle(key, error, "load error", hook_result, causes, summary);
    }

    fn on_timeout(
        &self,
        key: K,
        deadline: Duration,
        causes: &mut HashMap<K, LoadError>,
        summary: &mut RefreshSummary,
    ) {
        debug!(%key, ?deadline, "Load timed out");
        let hook_result = self.hooks().on_timeout(&key);
        self.settle(key, LoadError::Timeout(deadline), "timeout", hook_result, causes, summary);
    }

    // Applies the hook's verdict and records the key as failed.
    fn settle(
        &self,
        key: K,
        error: LoadError,
        hook: &'static str,
        hook_result: anyhow::Result<Option<V>>,
        causes: &mut HashMap<K, LoadError>,
        summary: &mut RefreshSummary,
    ) {
        let error = match hook_result {
            Ok(Some(sentinel)) => {
                self.commit(&key, sentinel);
                summary.sentinels += 1;
                error
            }
            Ok(None) => error,
            Err(cause) => {
                warn!(%key, hook, "Hook failed: {cause:#}");
                LoadError::Hook { hook, cause }
            }
        };
        causes.insert(key, error);
    }
}

impl<K, V> Debug for RefreshCache<K, V>
where
    K: CacheKey,
    V: CacheValue,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefreshCache")
            .field("name", self.name())
            .field("max_capacity", &self.max_capacity())
            .field("entries", &self.store().entry_count())
            .finish_non_exhaustive()
    }
}

// Loads submitted in the current cycle. Whatever is still here when the cycle ends, or when the refresh future is
// dropped, gets aborted.
struct PendingLoads<K: CacheKey> {
    handles: HashMap<K, AbortHandle>,
}

impl<K: CacheKey> PendingLoads<K> {
    fn new() -> Self {
        Self {
            handles: HashMap::new(),
        }
    }

    fn insert(&mut self, key: K, handle: AbortHandle) {
        self.handles.insert(key, handle);
    }

    fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    fn complete(&mut self, key: &K) -> bool {
        self.handles.remove(key).is_some()
    }

    fn expire(&mut self) -> Vec<K> {
        self.handles
            .drain()
            .map(|(key, handle)| {
                handle.abort();
                key
            })
            .collect()
    }
}

impl<K: CacheKey> Drop for PendingLoads<K> {
    fn drop(&mut self) {
        for handle in self.handles.values() {
            handle.abort();
        }
    }
}

// Raises the in-flight flag for as long as the cycle holds the lock, however the cycle ends.
struct InFlight<'a>(&'a AtomicBool);

impl<'a> InFlight<'a> {
    fn new(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::Release);
        Self(flag)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

// Reports a load result back to its cycle exactly once. If the task dies before reporting, be it a panic, an abort or
// an executor dropping it unstarted, the drop reports it as abandoned.
struct Completion<K, V> {
    key: Option<K>,
    tx:  mpsc::UnboundedSender<Reported<K, V>>,
}

impl<K, V> Completion<K, V> {
    fn new(key: K, tx: mpsc::UnboundedSender<Reported<K, V>>) -> Self {
        Self { key: Some(key), tx }
    }

    fn report(mut self, result: LoadResult<V>) {
        if let Some(key) = self.key.take() {
            // The cycle may be over already; late results are dropped.
            let _ = self.tx.send((key, result.map_err(LoadError::Failed)));
        }
    }
}

impl<K, V> Drop for Completion<K, V> {
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            let _ = self.tx.send((key, Err(LoadError::Abandoned)));
        }
    }
}
