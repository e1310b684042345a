//! # refresh-cache
//!
//! Non-blocking cache of last-known values for a dynamic set of keys, refreshed in the background by bounded-time
//! loads.
//!
//! Think of it as a status board for things you can't afford to ask about on every request: remote endpoints,
//! upstream services, external feeds. Readers get whatever was loaded last, instantly. A scheduler refreshes the whole
//! set periodically, and a slow or broken source can never hold up the rest.
//!
//! # The Basics
//!
//! The crate is designed for the following use case:
//!
//! - The set of keys is defined by something external and changes over time.
//! - Loading a value is slow, may hang, and may fail.
//! - Readers prefer a slightly stale value now over a fresh one later.
//!
//! The cache operates on the following principles:
//!
//! - It is key and value agnostic. Keys only need to be hashable and printable, values comparable.
//! - A key present in the cache always has a value. "Unknown" is the absence of the key.
//! - Every refresh cycle reconciles membership: keys that disappeared from the key set are evicted before anything is
//!   loaded.
//! - All loads of a cycle run concurrently and share one deadline. Whatever didn't complete by then is aborted.
//! - At most one cycle is in flight. A cycle requested while another one runs is skipped, not queued.
//! - Failures are collected per key and reported together after the cycle; they never affect other keys.
//! - Implemented on top of the [moka](https://crates.io/crates/moka) cache and the tokio runtime.
//!
//! # Components
//!
//! - [`RefreshCache`] owns the store and runs a single cycle via [`RefreshCache::refresh`].
//! - [`CycleScheduler`] drives a cache at a fixed rate using a [`LoaderSupplier`] for the key set of every cycle.
//! - [`LoadExecutor`] is where loads actually run. [`WorkerPool`] is a bounded implementation over a tokio runtime.
//! - [`RefreshHooks`] decide what to store, if anything, for a key that timed out or failed.
//! - [`EntryIdentity`] and the [`entity`] facades make descriptive records of external entities usable as keys.
//!
//! # Quick Start
//!
//! ```ignore
//! use refresh_cache::prelude::*;
//!
//! let pool = WorkerPool::builder().runtime(Handle::current()).workers(4).build()?;
//! let cache = RefreshCache::<String, Status>::builder()
//!     .executor(pool)
//!     .name("upstreams")
//!     .build()?;
//!
//! let scheduler = CycleScheduler::builder()
//!     .cache(cache.clone())
//!     .supplier(Arc::new(upstream_loaders) as Arc<dyn LoaderSupplier<String, Status>>)
//!     .build()?;
//! scheduler.start(Duration::from_secs(300))?;
//!
//! // Anywhere, any time:
//! let status = cache.get(&"billing".to_string());
//! ```
//!
//! # Features
//!
//! - `config` (default): [`RefreshConfig`](config::RefreshConfig), a `clap` + `garde` configuration which builds the
//!   whole stack.
//! - `telemetry`: [`init_tracing`](telemetry::init_tracing) for binaries that don't set up a `tracing` subscriber of
//!   their own.

pub mod cache;
#[cfg(feature = "config")]
pub mod config;
pub mod entity;
pub mod error;
pub mod identity;
pub mod pool;
pub mod scheduler;
pub mod task;
#[cfg(feature = "telemetry")]
pub mod telemetry;
pub mod traits;
pub mod types;

#[doc(inline)]
pub use cache::RefreshCache;
#[doc(inline)]
pub use error::AggregatedLoadError;
#[doc(inline)]
pub use identity::EntryIdentity;
#[doc(inline)]
pub use pool::WorkerPool;
#[doc(inline)]
pub use scheduler::CycleScheduler;
#[doc(inline)]
pub use task::KeyedLoadTask;
#[doc(inline)]
pub use traits::LoadExecutor;
#[doc(inline)]
pub use traits::LoaderSupplier;
#[doc(inline)]
pub use traits::RefreshHooks;

pub mod prelude {
    pub use crate::cache::RefreshCache;
    #[cfg(feature = "config")]
    pub use crate::config::RefreshConfig;
    pub use crate::entity::EntityCache;
    pub use crate::entity::EntityScheduler;
    pub use crate::error::*;
    pub use crate::identity::DescribedEntity;
    pub use crate::identity::EntryIdentity;
    pub use crate::pool::WorkerPool;
    pub use crate::scheduler::CycleScheduler;
    pub use crate::scheduler::ScheduleState;
    pub use crate::task::blocking_loader;
    pub use crate::task::loader;
    pub use crate::task::KeyedLoadTask;
    pub use crate::traits::*;
    pub use crate::types::*;
}
