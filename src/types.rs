use std::collections::HashMap;
use std::fmt::Debug;
use std::fmt::Display;
use std::future::Future;
use std::hash::Hash;
use std::pin::Pin;

/// Bounds every cache key satisfies. `Display` is used for logging and error messages.
pub trait CacheKey: Debug + Display + Hash + Eq + Clone + Send + Sync + 'static {}

impl<T> CacheKey for T where T: Debug + Display + Hash + Eq + Clone + Send + Sync + 'static {}

/// Bounds every cached value satisfies. `PartialEq` lets a commit tell a changed value from an unchanged one.
pub trait CacheValue: Debug + Clone + PartialEq + Send + Sync + 'static {}

impl<T> CacheValue for T where T: Debug + Clone + PartialEq + Send + Sync + 'static {}

/// What a loader eventually produces. `Ok(None)` means the remote side had nothing to offer and counts as a failure.
pub type LoadResult<V> = anyhow::Result<Option<V>>;

pub type LoadFuture<V> = Pin<Box<dyn Future<Output = LoadResult<V>> + Send + 'static>>;

/// A zero-argument, run-once value producer.
pub type Loader<V> = Box<dyn FnOnce() -> LoadFuture<V> + Send + 'static>;

/// The key set of one cycle together with the way to load each key.
pub type Loaders<K, V> = HashMap<K, Loader<V>>;

/// A unit of work handed over to a [`LoadExecutor`](crate::traits::LoadExecutor).
pub type TaskFuture = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// What committing a value did to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    Inserted,
    Replaced,
    Unchanged,
}

/// Per-cycle counters of a successful refresh.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RefreshSummary {
    pub inserted:  usize,
    pub replaced:  usize,
    pub unchanged: usize,
    pub evicted:   usize,
    /// Values committed by a timeout or load-error hook rather than by a loader.
    pub sentinels: usize,
}

impl RefreshSummary {
    pub(crate) fn record(&mut self, outcome: CommitOutcome) {
        match outcome {
            CommitOutcome::Inserted => self.inserted += 1,
            CommitOutcome::Replaced => self.replaced += 1,
            CommitOutcome::Unchanged => self.unchanged += 1,
        }
    }

    pub fn committed(&self) -> usize {
        self.inserted + self.replaced + self.unchanged
    }
}

impl Display for RefreshSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "inserted={} replaced={} unchanged={} evicted={} sentinels={}",
            self.inserted, self.replaced, self.unchanged, self.evicted, self.sentinels
        )
    }
}
