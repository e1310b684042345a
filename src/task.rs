use std::fmt::Debug;
use std::future::Future;

use crate::types::LoadFuture;
use crate::types::LoadResult;
use crate::types::Loader;

/// Wraps an async closure into a [`Loader`].
pub fn loader<V, F, Fut>(f: F) -> Loader<V>
where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = LoadResult<V>> + Send + 'static,
{
    Box::new(move || -> LoadFuture<V> { Box::pin(f()) })
}

/// Wraps a blocking closure into a [`Loader`]. The closure runs on tokio's blocking pool; when its cycle times out it
/// is left to finish on its own and the result is dropped.
pub fn blocking_loader<V, F>(f: F) -> Loader<V>
where
    V: Send + 'static,
    F: FnOnce() -> LoadResult<V> + Send + 'static,
{
    loader(move || async move {
        match tokio::task::spawn_blocking(f).await {
            Ok(result) => result,
            Err(err) => Err(anyhow::Error::new(err).context("blocking loader did not complete")),
        }
    })
}

/// A key paired with the loader producing its next value.
pub struct KeyedLoadTask<K, V> {
    key:    K,
    loader: Loader<V>,
}

impl<K, V> KeyedLoadTask<K, V> {
    pub fn new(key: K, loader: Loader<V>) -> Self {
        Self { key, loader }
    }

    pub fn key(&self) -> &K {
        &self.key
    }

    pub async fn run(self) -> (K, LoadResult<V>) {
        let Self { key, loader } = self;
        let result = loader().await;
        (key, result)
    }
}

impl<K: Debug, V> Debug for KeyedLoadTask<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyedLoadTask").field("key", &self.key).finish_non_exhaustive()
    }
}
