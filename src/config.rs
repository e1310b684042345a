use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;

use fieldx::fxstruct;
use garde::Validate;
use tokio::runtime::Handle;

use crate::cache::RefreshCache;
use crate::error::ConfigError;
use crate::pool::WorkerPool;
use crate::scheduler::CycleScheduler;
use crate::traits::LoadExecutor;
use crate::traits::LoaderSupplier;
use crate::types::CacheKey;
use crate::types::CacheValue;

/// Command line and environment settings of a refresh cache.
///
/// Can be used standalone or flattened into an application's own parser with `#[command(flatten)]`. Every option can
/// also be set via its `REFRESH_CACHE_*` environment variable.
#[derive(Debug, Clone, clap::Parser, Validate)]
#[fxstruct(no_new, get(copy))]
#[clap(about, name = "refresh-cache")]
pub struct RefreshConfig {
    /// Seconds between refresh cycles. Also the time limit of a single cycle.
    #[clap(long, env = "REFRESH_CACHE_INTERVAL_SECS", default_value_t = 300)]
    #[garde(range(min = 60))]
    interval_secs: u64,

    /// Upper bound on the number of cached entries.
    #[clap(long, env = "REFRESH_CACHE_MAX_CAPACITY", default_value_t = 1_000)]
    #[garde(range(min = 1))]
    max_capacity: u64,

    /// Number of loads running at the same time.
    #[clap(long, env = "REFRESH_CACHE_WORKERS", default_value_t = 8)]
    #[garde(range(min = 1))]
    workers: usize,

    /// Loads allowed to wait for a free worker before submissions get rejected.
    #[clap(long, env = "REFRESH_CACHE_QUEUE_CAPACITY", default_value_t = 1_000)]
    #[garde(skip)]
    queue_capacity: usize,

    /// Cache name used in logs.
    #[clap(long, env = "REFRESH_CACHE_NAME", default_value = "refresh-cache")]
    #[fieldx(get(copy(off)))]
    #[garde(custom(Self::not_blank))]
    name: String,
}

impl RefreshConfig {
    #[allow(clippy::ptr_arg)]
    fn not_blank(value: &String, _: &()) -> garde::Result {
        if value.trim().is_empty() {
            Err(garde::Error::new("must not be blank"))
        }
        else {
            Ok(())
        }
    }

    fn builder_error<E: Display>(what: &'static str) -> impl FnOnce(E) -> ConfigError {
        move |err| ConfigError::Builder {
            what,
            reason: err.to_string(),
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs())
    }

    /// Passes the configuration through if every option is within its bounds.
    pub fn validated(self) -> Result<Self, ConfigError> {
        self.validate().map_err(|report| ConfigError::Invalid(report.to_string()))?;
        Ok(self)
    }

    pub fn worker_pool(&self, runtime: Handle) -> Result<Arc<WorkerPool>, ConfigError> {
        WorkerPool::builder()
            .runtime(runtime)
            .workers(self.workers())
            .queue_capacity(self.queue_capacity())
            .build()
            .map_err(Self::builder_error("worker pool"))
    }

    pub fn refresh_cache<K, V>(&self, executor: Arc<dyn LoadExecutor>) -> Result<Arc<RefreshCache<K, V>>, ConfigError>
    where
        K: CacheKey,
        V: CacheValue,
    {
        RefreshCache::builder()
            .executor(executor)
            .name(self.name().as_str())
            .max_capacity(self.max_capacity())
            .build()
            .map_err(Self::builder_error("refresh cache"))
    }

    pub fn scheduler<K, V>(
        &self,
        cache: Arc<RefreshCache<K, V>>,
        supplier: Arc<dyn LoaderSupplier<K, V>>,
    ) -> Result<CycleScheduler<K, V>, ConfigError>
    where
        K: CacheKey,
        V: CacheValue,
    {
        CycleScheduler::builder()
            .cache(cache)
            .supplier(supplier)
            .build()
            .map_err(Self::builder_error("scheduler"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Loaders;
    use clap::Parser;

    fn parse(args: &[&str]) -> RefreshConfig {
        RefreshConfig::try_parse_from(std::iter::once("refresh-cache").chain(args.iter().copied()))
            .expect("arguments must parse")
    }

    #[test]
    fn explicit_options() {
        let config = parse(&[
            "--interval-secs",
            "120",
            "--max-capacity",
            "50",
            "--workers",
            "2",
            "--queue-capacity",
            "0",
            "--name",
            "endpoints",
        ])
        .validated()
        .unwrap();

        assert_eq!(config.interval(), Duration::from_secs(120));
        assert_eq!(config.max_capacity(), 50);
        assert_eq!(config.workers(), 2);
        assert_eq!(config.queue_capacity(), 0);
        assert_eq!(config.name(), "endpoints");
    }

    #[test]
    fn short_interval_is_invalid() {
        let err = parse(&["--interval-secs", "30"]).validated().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(ref msg) if msg.contains("interval_secs")), "{err}");
    }

    #[test]
    fn zero_workers_and_blank_name_are_invalid() {
        assert!(parse(&["--interval-secs", "60", "--workers", "0"]).validated().is_err());
        assert!(parse(&["--interval-secs", "60", "--name", " "]).validated().is_err());
    }

    #[tokio::test]
    async fn builds_the_whole_stack() {
        let config = parse(&["--interval-secs", "60", "--workers", "3", "--name", "stack"])
            .validated()
            .unwrap();

        let pool = config.worker_pool(Handle::current()).unwrap();
        assert_eq!(pool.workers(), 3);

        let cache = config.refresh_cache::<String, u32>(pool).unwrap();
        assert_eq!(cache.name(), "stack");

        let supplier: Arc<dyn LoaderSupplier<String, u32>> =
            Arc::new(|| -> anyhow::Result<Loaders<String, u32>> { Ok(Loaders::new()) });
        let scheduler = config.scheduler(cache, supplier).unwrap();
        assert_eq!(scheduler.interval(), None);
    }
}
