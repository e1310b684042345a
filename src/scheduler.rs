use std::any::Any;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use fieldx::fxstruct;
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::AbortHandle;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::instrument;
use tracing::warn;

use crate::cache::RefreshCache;
use crate::error::ConfigError;
use crate::error::RefreshError;
use crate::error::SchedulerError;
use crate::traits::LoaderSupplier;
use crate::types::CacheKey;
use crate::types::CacheValue;
use crate::types::Loaders;

/// Refresh intervals below this are considered a misconfiguration.
pub const MIN_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScheduleState {
    /// Never started.
    Idle,
    Running,
    Stopped,
    /// A cycle died and took the schedule down with it.
    Failed(String),
}

/// Drives a [`RefreshCache`] at a fixed rate.
///
/// The first cycle fires immediately, the following ones every `interval`. A cycle that runs longer than the interval
/// delays the next one; two cycles never overlap. The interval doubles as the per-cycle load deadline: a load that
/// can't finish within one refresh period is considered hung.
///
/// Failures of individual cycles, including a failing or panicking loader supplier, are logged and the schedule goes
/// on. Only a cycle that panics stops it, in which case [`wait`](Self::wait) reports [`SchedulerError::Fatal`].
#[fxstruct(sync, no_new, default(off), builder)]
pub struct CycleScheduler<K, V>
where
    K: CacheKey,
    V: CacheValue,
{
    #[fieldx(get(clone), builder(required))]
    cache: Arc<RefreshCache<K, V>>,

    #[fieldx(get(clone), builder(required))]
    supplier: Arc<dyn LoaderSupplier<K, V>>,

    #[fieldx(lock, private, get(copy), set, builder(off), default(Duration::ZERO))]
    period: Duration,

    #[fieldx(builder(off), default(Mutex::new(None)))]
    timer: Mutex<Option<JoinHandle<()>>>,

    // Held by whichever cycle is running, so a replacement schedule can't start one before the old cycle is gone.
    #[fieldx(builder(off), default(Arc::new(tokio::sync::Mutex::new(()))))]
    cycle_gate: Arc<tokio::sync::Mutex<()>>,

    #[fieldx(builder(off), default(Arc::new(watch::channel(ScheduleState::Idle).0)))]
    state: Arc<watch::Sender<ScheduleState>>,
}

impl<K, V> CycleScheduler<K, V>
where
    K: CacheKey,
    V: CacheValue,
{
    /// Starts firing cycles. Fails if the interval is below [`MIN_INTERVAL`], the executor is unusable, or the
    /// schedule is already running.
    pub fn start(&self, interval: Duration) -> Result<(), SchedulerError> {
        let runtime = self.preflight(interval)?;

        let mut timer = self.timer.lock();
        if timer.as_ref().is_some_and(|t| !t.is_finished()) {
            return Err(SchedulerError::AlreadyRunning);
        }
        *timer = Some(self.spawn_timer(&runtime, interval));

        info!(cache = %self.cache().name(), ?interval, "Refresh schedule started");
        Ok(())
    }

    /// Replaces the running schedule with one at the new interval. The previous timer is cancelled together with a
    /// cycle it may have in flight, and the new schedule begins with an immediate cycle once that one is torn down.
    pub fn set_interval(&self, interval: Duration) -> Result<(), SchedulerError> {
        let runtime = self.preflight(interval)?;

        let mut timer = self.timer.lock();
        if let Some(previous) = timer.take() {
            previous.abort();
        }
        *timer = Some(self.spawn_timer(&runtime, interval));

        info!(cache = %self.cache().name(), ?interval, "Refresh interval changed");
        Ok(())
    }

    /// Cancels the timer and any cycle in flight, then shuts the cache's executor down. Safe to call more than once.
    pub fn stop(&self) {
        if let Some(timer) = self.timer.lock().take() {
            timer.abort();
            info!(cache = %self.cache().name(), "Refresh schedule stopped");
        }
        if matches!(*self.state.borrow(), ScheduleState::Running) {
            self.state.send_replace(ScheduleState::Stopped);
        }
        self.cache().shutdown();
    }

    /// The interval of the current schedule, if it was ever started.
    pub fn interval(&self) -> Option<Duration> {
        let period = self.period();
        (!period.is_zero()).then_some(period)
    }

    pub fn state(&self) -> ScheduleState {
        self.state.borrow().clone()
    }

    #[inline]
    pub fn is_running(&self) -> bool {
        matches!(self.state(), ScheduleState::Running)
    }

    /// Waits until the schedule is no longer running. Returns immediately if it was never started.
    pub async fn wait(&self) -> Result<(), SchedulerError> {
        let mut state_rx = self.state.subscribe();
        let state = match state_rx.wait_for(|state| !matches!(state, ScheduleState::Running)).await {
            Ok(state) => state.clone(),
            // The sender lives as long as we do.
            Err(_) => ScheduleState::Stopped,
        };

        match state {
            ScheduleState::Failed(reason) => Err(SchedulerError::Fatal(reason)),
            _ => Ok(()),
        }
    }

    fn preflight(&self, interval: Duration) -> Result<Handle, SchedulerError> {
        if interval < MIN_INTERVAL {
            return Err(ConfigError::IntervalTooShort {
                interval,
                min: MIN_INTERVAL,
            }
            .into());
        }
        self.cache().executor().ensure_ready()?;
        Ok(Handle::try_current().map_err(|_| ConfigError::NoRuntime)?)
    }

    fn spawn_timer(&self, runtime: &Handle, interval: Duration) -> JoinHandle<()> {
        self.set_period(interval);
        self.state.send_replace(ScheduleState::Running);
        runtime.spawn(run_schedule(
            self.cache(),
            self.supplier(),
            interval,
            Arc::clone(&self.state),
            Arc::clone(&self.cycle_gate),
        ))
    }
}

impl<K, V> Debug for CycleScheduler<K, V>
where
    K: CacheKey,
    V: CacheValue,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CycleScheduler")
            .field("cache", &self.cache())
            .field("interval", &self.interval())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl<K, V> Drop for CycleScheduler<K, V>
where
    K: CacheKey,
    V: CacheValue,
{
    fn drop(&mut self) {
        if let Some(timer) = self.timer.get_mut().take() {
            timer.abort();
        }
    }
}

async fn run_schedule<K, V>(
    cache: Arc<RefreshCache<K, V>>,
    supplier: Arc<dyn LoaderSupplier<K, V>>,
    interval: Duration,
    state: Arc<watch::Sender<ScheduleState>>,
    cycle_gate: Arc<tokio::sync::Mutex<()>>,
) where
    K: CacheKey,
    V: CacheValue,
{
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        let permit = Arc::clone(&cycle_gate).lock_owned().await;

        // The cycle gets a task of its own so that a panic in it can be told apart from a cancelled timer.
        let cycle = tokio::spawn({
            let cache = Arc::clone(&cache);
            let supplier = Arc::clone(&supplier);
            async move {
                let _permit = permit;
                run_cycle(cache, supplier, interval).await
            }
        });
        let _cycle_guard = AbortOnDrop(cycle.abort_handle());

        match cycle.await {
            Ok(()) => (),
            Err(err) if err.is_panic() => {
                let reason = panic_message(err.into_panic());
                error!(cache = %cache.name(), %reason, "Refresh cycle panicked, stopping the schedule");
                state.send_replace(ScheduleState::Failed(reason));
                return;
            }
            Err(err) => warn!(cache = %cache.name(), "Refresh cycle was cancelled: {err}"),
        }
    }
}

#[instrument(level = "debug", skip_all, fields(cache = %cache.name()))]
async fn run_cycle<K, V>(cache: Arc<RefreshCache<K, V>>, supplier: Arc<dyn LoaderSupplier<K, V>>, interval: Duration)
where
    K: CacheKey,
    V: CacheValue,
{
    let loaders = collect_loaders(supplier).await;

    match cache.refresh(interval, loaders).await {
        Ok(summary) => debug!(%summary, "Refresh cycle succeeded"),
        Err(RefreshError::Aggregated(err)) => {
            for (key, cause) in err.causes() {
                debug!(%key, "Refresh failed: {cause}");
            }
            warn!(failed = err.len(), "{err}");
        }
        Err(err) => warn!("Refresh cycle did not run: {err}"),
    }
}

// A failing supplier makes for an empty cycle, not a broken schedule.
async fn collect_loaders<K, V>(supplier: Arc<dyn LoaderSupplier<K, V>>) -> Loaders<K, V>
where
    K: CacheKey,
    V: CacheValue,
{
    match tokio::spawn(async move { supplier.loaders().await }).await {
        Ok(Ok(loaders)) => loaders,
        Ok(Err(err)) => {
            warn!("Loader supplier failed, no keys this cycle: {err:#}");
            Loaders::new()
        }
        Err(err) if err.is_panic() => {
            warn!(
                "Loader supplier panicked, no keys this cycle: {}",
                panic_message(err.into_panic())
            );
            Loaders::new()
        }
        Err(err) => {
            warn!("Loader supplier was cancelled, no keys this cycle: {err}");
            Loaders::new()
        }
    }
}

// Takes the cycle down with the timer when the timer task is aborted.
struct AbortOnDrop(AbortHandle);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg.to_string()
    }
    else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    }
    else {
        "unknown panic".to_string()
    }
}
