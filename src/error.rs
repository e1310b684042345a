use std::collections::HashMap;
use std::error::Error;
use std::fmt;
use std::fmt::Debug;
use std::fmt::Display;
use std::time::Duration;

use thiserror::Error;

/// Violated preconditions. Always reported at the call that violates them; values are never clamped.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("refresh deadline {deadline:?} is below the minimum of {min:?}")]
    DeadlineTooShort { deadline: Duration, min: Duration },

    #[error("refresh interval {interval:?} is below the minimum of {min:?}")]
    IntervalTooShort { interval: Duration, min: Duration },

    #[error("the load executor has been shut down")]
    ExecutorShutDown,

    #[error("the load executor has no workers")]
    NoWorkers,

    #[error("no tokio runtime to schedule refresh cycles on")]
    NoRuntime,

    #[error("cannot build {what}: {reason}")]
    Builder { what: &'static str, reason: String },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Why an executor refused a load task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SubmitError {
    #[error("executor is shut down")]
    ShutDown,

    #[error("executor is saturated ({capacity} tasks pending)")]
    Saturated { capacity: usize },
}

/// The reason a single key failed to refresh within a cycle.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("load did not complete within {0:?}")]
    Timeout(Duration),

    #[error("loader produced no value")]
    Empty,

    #[error("load task was not submitted: {0}")]
    Rejected(#[from] SubmitError),

    #[error("load failed: {0:#}")]
    Failed(anyhow::Error),

    #[error("load task ended without reporting a result")]
    Abandoned,

    #[error("{hook} hook failed: {cause:#}")]
    Hook { hook: &'static str, cause: anyhow::Error },
}

impl LoadError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }
}

/// Returned by a refresh cycle when one or more keys failed. Never empty.
pub struct AggregatedLoadError<K> {
    causes: HashMap<K, LoadError>,
}

impl<K> AggregatedLoadError<K>
where
    K: Display,
{
    /// # Panics
    ///
    /// An empty cause map is a programming error and panics.
    pub fn new(causes: HashMap<K, LoadError>) -> Self {
        assert!(
            !causes.is_empty(),
            "AggregatedLoadError requires at least one failed key"
        );
        Self { causes }
    }

    pub fn causes(&self) -> &HashMap<K, LoadError> {
        &self.causes
    }

    pub fn into_causes(self) -> HashMap<K, LoadError> {
        self.causes
    }

    pub fn len(&self) -> usize {
        self.causes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.causes.is_empty()
    }

    /// Failing keys rendered with `Display`, sorted.
    pub fn failed_keys(&self) -> Vec<String> {
        let mut keys = self.causes.keys().map(|k| k.to_string()).collect::<Vec<_>>();
        keys.sort();
        keys
    }
}

impl<K: Display> Display for AggregatedLoadError<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "failed to refresh: {}", self.failed_keys().join(", "))
    }
}

impl<K: Debug> Debug for AggregatedLoadError<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AggregatedLoadError").field("causes", &self.causes).finish()
    }
}

impl<K: Debug + Display> Error for AggregatedLoadError<K> {}

/// Outcome of a rejected or partially failed [`RefreshCache::refresh`](crate::RefreshCache::refresh).
pub enum RefreshError<K> {
    Config(ConfigError),
    /// Another cycle is in flight; this one was skipped.
    Busy,
    Aggregated(AggregatedLoadError<K>),
}

impl<K> RefreshError<K> {
    pub fn is_busy(&self) -> bool {
        matches!(self, Self::Busy)
    }

    pub fn as_aggregated(&self) -> Option<&AggregatedLoadError<K>> {
        match self {
            Self::Aggregated(err) => Some(err),
            _ => None,
        }
    }
}

impl<K> From<ConfigError> for RefreshError<K> {
    fn from(err: ConfigError) -> Self {
        Self::Config(err)
    }
}

impl<K> From<AggregatedLoadError<K>> for RefreshError<K> {
    fn from(err: AggregatedLoadError<K>) -> Self {
        Self::Aggregated(err)
    }
}

impl<K: Display> Display for RefreshError<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(err) => Display::fmt(err, f),
            Self::Busy => write!(f, "a refresh cycle is already in progress"),
            Self::Aggregated(err) => Display::fmt(err, f),
        }
    }
}

impl<K: Debug> Debug for RefreshError<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(err) => f.debug_tuple("RefreshError::Config").field(err).finish(),
            Self::Busy => f.write_str("RefreshError::Busy"),
            Self::Aggregated(err) => f.debug_tuple("RefreshError::Aggregated").field(err).finish(),
        }
    }
}

impl<K: Debug + Display + 'static> Error for RefreshError<K> {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Config(err) => Some(err),
            Self::Busy => None,
            Self::Aggregated(err) => Some(err),
        }
    }
}

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("scheduler is already running")]
    AlreadyRunning,

    /// A cycle died in a way that must not be papered over; the schedule has been stopped.
    #[error("refresh schedule stopped by a fatal error: {0}")]
    Fatal(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentityError {
    #[error("entity has no identifier")]
    MissingId,
}
