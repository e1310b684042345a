use std::ops::Deref;
use std::sync::Arc;

use crate::cache::RefreshCache;
use crate::error::IdentityError;
use crate::identity::DescribedEntity;
use crate::identity::EntryIdentity;
use crate::scheduler::CycleScheduler;
use crate::types::CacheValue;

/// Scheduler of an [`EntityCache`].
pub type EntityScheduler<V> = CycleScheduler<EntryIdentity, V>;

/// A [`RefreshCache`] keyed by [`EntryIdentity`] which can be queried with the entity itself.
#[derive(Debug)]
pub struct EntityCache<V: CacheValue> {
    cache: Arc<RefreshCache<EntryIdentity, V>>,
}

impl<V: CacheValue> EntityCache<V> {
    pub fn new(cache: Arc<RefreshCache<EntryIdentity, V>>) -> Self {
        Self { cache }
    }

    /// The shared cache, e.g. to hand over to an [`EntityScheduler`].
    pub fn cache(&self) -> Arc<RefreshCache<EntryIdentity, V>> {
        Arc::clone(&self.cache)
    }

    /// Snapshots the entity's identity and looks it up.
    pub fn get_for<E>(&self, entity: &E) -> Result<Option<V>, IdentityError>
    where
        E: DescribedEntity + ?Sized,
    {
        Ok(self.cache.get(&EntryIdentity::from_entity(entity)?))
    }
}

impl<V: CacheValue> Clone for EntityCache<V> {
    fn clone(&self) -> Self {
        Self {
            cache: Arc::clone(&self.cache),
        }
    }
}

impl<V: CacheValue> Deref for EntityCache<V> {
    type Target = RefreshCache<EntryIdentity, V>;

    fn deref(&self) -> &Self::Target {
        &self.cache
    }
}

impl<V: CacheValue> From<Arc<RefreshCache<EntryIdentity, V>>> for EntityCache<V> {
    fn from(cache: Arc<RefreshCache<EntryIdentity, V>>) -> Self {
        Self::new(cache)
    }
}
