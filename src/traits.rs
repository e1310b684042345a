use async_trait::async_trait;
use tokio::task::AbortHandle;

use crate::error::ConfigError;
use crate::error::LoadError;
use crate::error::SubmitError;
use crate::types::CacheKey;
use crate::types::CacheValue;
use crate::types::Loaders;
use crate::types::TaskFuture;

/// Per-key failure policy of a [`RefreshCache`](crate::RefreshCache).
///
/// Either hook may return a sentinel value which is then committed exactly like a loaded one, e.g. an explicit
/// "timed out" status. The default implementations leave the cache untouched. An error returned by a hook is reported
/// for the key in place of the original failure.
pub trait RefreshHooks<K, V>: Send + Sync + 'static
where
    K: CacheKey,
    V: CacheValue,
{
    fn on_timeout(&self, _key: &K) -> anyhow::Result<Option<V>> {
        Ok(None)
    }

    fn on_load_error(&self, _key: &K, _error: &LoadError) -> anyhow::Result<Option<V>> {
        Ok(None)
    }
}

/// Hooks that do nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoHooks;

impl<K, V> RefreshHooks<K, V> for NoHooks
where
    K: CacheKey,
    V: CacheValue,
{
}

/// Source of the key set and loaders for every cycle.
#[async_trait]
pub trait LoaderSupplier<K, V>: Send + Sync + 'static
where
    K: CacheKey,
    V: CacheValue,
{
    async fn loaders(&self) -> anyhow::Result<Loaders<K, V>>;
}

#[async_trait]
impl<K, V, F> LoaderSupplier<K, V> for F
where
    K: CacheKey,
    V: CacheValue,
    F: Fn() -> anyhow::Result<Loaders<K, V>> + Send + Sync + 'static,
{
    async fn loaders(&self) -> anyhow::Result<Loaders<K, V>> {
        self()
    }
}

/// The capability to run load tasks in the background.
///
/// Implementations own sizing and lifetime of whatever runs the tasks; the cache only submits work, aborts it when
/// the cycle deadline passes, and asks for an orderly shutdown on teardown.
pub trait LoadExecutor: Send + Sync + 'static {
    fn submit(&self, task: TaskFuture) -> Result<AbortHandle, SubmitError>;

    /// Fails when the executor cannot accept work anymore or has been misconfigured.
    fn ensure_ready(&self) -> Result<(), ConfigError>;

    fn shutdown(&self);
}
