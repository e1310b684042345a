use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use refresh_cache::prelude::*;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio::task::AbortHandle;
use tokio::task::JoinSet;
use tokio::time::Instant;

fn pool() -> Arc<WorkerPool> {
    WorkerPool::builder().runtime(Handle::current()).build().unwrap()
}

fn cache_on(executor: Arc<dyn LoadExecutor>) -> Arc<RefreshCache<String, u32>> {
    RefreshCache::builder()
        .executor(executor)
        .name("test cache")
        .build()
        .unwrap()
}

fn cache() -> Arc<RefreshCache<String, u32>> {
    cache_on(pool())
}

fn key(k: &str) -> String {
    k.to_string()
}

fn value(v: u32) -> Loader<u32> {
    loader(move || async move { Ok(Some(v)) })
}

fn sleepy(v: u32, secs: u64) -> Loader<u32> {
    loader(move || async move {
        tokio::time::sleep(Duration::from_secs(secs)).await;
        Ok(Some(v))
    })
}

const DEADLINE: Duration = Duration::from_secs(5);

#[tokio::test]
async fn unknown_key_is_absent() {
    let cache = cache();
    assert_eq!(cache.get(&key("never")), None);

    cache
        .refresh(DEADLINE, Loaders::from([(key("a"), value(1))]))
        .await
        .unwrap();
    assert_eq!(cache.get(&key("never")), None);
    assert!(!cache.contains_key(&key("never")));
}

#[tokio::test]
async fn keys_missing_from_the_cycle_are_evicted() {
    let cache = cache();

    cache
        .refresh(DEADLINE, Loaders::from([(key("a"), value(1)), (key("b"), value(2))]))
        .await
        .unwrap();
    assert_eq!(cache.get(&key("b")), Some(2));

    let summary = cache
        .refresh(DEADLINE, Loaders::from([(key("a"), value(1))]))
        .await
        .unwrap();
    assert_eq!(summary.evicted, 1);
    assert_eq!(cache.get(&key("a")), Some(1));
    assert_eq!(cache.get(&key("b")), None);
    assert_eq!(cache.entry_count(), 1);
}

#[tokio::test]
async fn empty_cycle_evicts_everything() {
    let cache = cache();

    cache
        .refresh(DEADLINE, Loaders::from([(key("a"), value(1)), (key("b"), value(2))]))
        .await
        .unwrap();
    let summary = cache.refresh(DEADLINE, Loaders::new()).await.unwrap();

    assert_eq!(summary.evicted, 2);
    assert_eq!(summary.committed(), 0);
    assert_eq!(cache.entry_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn only_one_of_concurrent_refreshes_runs() {
    let cache = cache();
    let mut cycles = JoinSet::new();

    for _ in 0..100 {
        let cache = Arc::clone(&cache);
        cycles.spawn(async move {
            let loaders = Loaders::from([(key("a"), loader(|| async {
                tokio::time::sleep(Duration::from_millis(500)).await;
                Ok(Some(1))
            }))]);
            cache.refresh(DEADLINE, loaders).await
        });
    }

    let mut succeeded = 0;
    let mut busy = 0;
    while let Some(outcome) = cycles.join_next().await {
        match outcome.unwrap() {
            Ok(_) => succeeded += 1,
            Err(err) if err.is_busy() => busy += 1,
            Err(err) => panic!("unexpected refresh error: {err}"),
        }
    }

    assert_eq!(succeeded, 1);
    assert_eq!(busy, 99);
    assert!(!cache.is_refreshing());
    assert_eq!(cache.get(&key("a")), Some(1));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn observing_the_cycle_never_makes_it_busy() {
    let cache = cache();
    let done = Arc::new(AtomicBool::new(false));

    let observers = (0..3)
        .map(|_| {
            let cache = Arc::clone(&cache);
            let done = Arc::clone(&done);
            std::thread::spawn(move || {
                while !done.load(Ordering::Acquire) {
                    let _ = cache.is_refreshing();
                }
            })
        })
        .collect::<Vec<_>>();

    let mut busy = 0;
    for _ in 0..500 {
        if let Err(err) = cache.refresh(DEADLINE, Loaders::new()).await {
            assert!(err.is_busy(), "unexpected refresh error: {err}");
            busy += 1;
        }
    }

    done.store(true, Ordering::Release);
    for observer in observers {
        observer.join().unwrap();
    }

    assert_eq!(busy, 0, "sequential refreshes reported busy");
    assert!(!cache.is_refreshing());
}

#[tokio::test(start_paused = true)]
async fn slow_key_does_not_hold_up_the_others() {
    let cache = cache();
    let started = Instant::now();

    let err = cache
        .refresh(
            Duration::from_secs(1),
            Loaders::from([(key("a"), sleepy(1, 10)), (key("b"), value(2))]),
        )
        .await
        .unwrap_err();

    assert!(started.elapsed() < Duration::from_secs(2), "cycle waited for the slow key");

    let aggregated = err.as_aggregated().expect("aggregated error");
    assert_eq!(aggregated.failed_keys(), vec![key("a")]);
    assert!(aggregated.causes()[&key("a")].is_timeout());
    assert_eq!(err.to_string(), "failed to refresh: a");

    assert_eq!(cache.get(&key("a")), None);
    assert_eq!(cache.get(&key("b")), Some(2));
}

#[tokio::test]
async fn empty_value_is_a_failure() {
    let cache = cache();

    cache
        .refresh(DEADLINE, Loaders::from([(key("a"), value(1))]))
        .await
        .unwrap();

    let err = cache
        .refresh(
            DEADLINE,
            Loaders::from([(key("a"), loader(|| async { Ok(None) })), (key("b"), loader(|| async { Ok(None) }))]),
        )
        .await
        .unwrap_err();

    let aggregated = err.as_aggregated().expect("aggregated error");
    assert_eq!(aggregated.failed_keys(), vec![key("a"), key("b")]);
    assert!(matches!(aggregated.causes()[&key("b")], LoadError::Empty));

    // A failed key keeps serving its last good value.
    assert_eq!(cache.get(&key("a")), Some(1));
    assert_eq!(cache.get(&key("b")), None);
}

#[tokio::test]
async fn loader_error_keeps_last_good_value() {
    let cache = cache();

    cache
        .refresh(DEADLINE, Loaders::from([(key("a"), value(1))]))
        .await
        .unwrap();

    let err = cache
        .refresh(
            DEADLINE,
            Loaders::from([(key("a"), loader(|| async { anyhow::bail!("503 Service Unavailable") }))]),
        )
        .await
        .unwrap_err();

    let aggregated = err.as_aggregated().expect("aggregated error");
    assert!(aggregated.causes()[&key("a")].to_string().contains("503"));
    assert_eq!(cache.get(&key("a")), Some(1));
}

#[tokio::test]
async fn sub_second_deadline_is_rejected() {
    let cache = cache();

    let err = cache
        .refresh(Duration::from_millis(999), Loaders::from([(key("a"), value(1))]))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        RefreshError::Config(ConfigError::DeadlineTooShort { .. })
    ));
    assert_eq!(cache.get(&key("a")), None);
    assert_eq!(cache.last_refresh(), None);
}

#[tokio::test]
async fn shut_down_executor_is_rejected() {
    let cache = cache();
    cache.shutdown();

    let err = cache
        .refresh(DEADLINE, Loaders::from([(key("a"), value(1))]))
        .await
        .unwrap_err();

    assert!(matches!(err, RefreshError::Config(ConfigError::ExecutorShutDown)));
}

#[tokio::test]
async fn rejected_submissions_fail_their_keys_only() {
    let pool = WorkerPool::builder()
        .runtime(Handle::current())
        .workers(1)
        .queue_capacity(0)
        .build()
        .unwrap();
    let cache = cache_on(pool);

    let err = cache
        .refresh(
            DEADLINE,
            Loaders::from([(key("a"), value(1)), (key("b"), value(2)), (key("c"), value(3))]),
        )
        .await
        .unwrap_err();

    let aggregated = err.as_aggregated().expect("aggregated error");
    assert_eq!(aggregated.len(), 2);
    for cause in aggregated.causes().values() {
        assert!(matches!(
            cause,
            LoadError::Rejected(SubmitError::Saturated { capacity: 1 })
        ));
    }
    assert_eq!(cache.entry_count(), 1);
}

#[tokio::test]
async fn readers_see_old_value_while_a_cycle_runs() {
    let cache = cache();
    cache
        .refresh(DEADLINE, Loaders::from([(key("a"), value(1))]))
        .await
        .unwrap();

    let (release_tx, release_rx) = oneshot::channel::<()>();
    let cycle = tokio::spawn({
        let cache = Arc::clone(&cache);
        async move {
            let loaders = Loaders::from([(key("a"), loader(|| async move {
                let _ = release_rx.await;
                Ok(Some(2))
            }))]);
            cache.refresh(DEADLINE, loaders).await
        }
    });

    while !cache.is_refreshing() {
        tokio::task::yield_now().await;
    }
    assert_eq!(cache.get(&key("a")), Some(1));

    release_tx.send(()).unwrap();
    cycle.await.unwrap().unwrap();
    assert_eq!(cache.get(&key("a")), Some(2));
}

#[tokio::test(start_paused = true)]
async fn dropping_the_refresh_aborts_its_loads() {
    let cache = cache();
    let finished = Arc::new(AtomicBool::new(false));

    let cycle = tokio::spawn({
        let cache = Arc::clone(&cache);
        let finished = Arc::clone(&finished);
        async move {
            let loaders = Loaders::from([(key("a"), loader(move || async move {
                tokio::time::sleep(Duration::from_secs(10)).await;
                finished.store(true, Ordering::Release);
                Ok(Some(1))
            }))]);
            cache.refresh(Duration::from_secs(30), loaders).await
        }
    });

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(cache.is_refreshing());
    cycle.abort();
    let _ = cycle.await;

    tokio::time::sleep(Duration::from_secs(20)).await;
    assert!(!finished.load(Ordering::Acquire));
    assert!(!cache.is_refreshing());
    assert_eq!(cache.get(&key("a")), None);
}

// Runs every task to completion no matter what: aborting the returned handle has no effect on the load.
struct StubbornExecutor;

impl LoadExecutor for StubbornExecutor {
    fn submit(&self, task: TaskFuture) -> Result<AbortHandle, SubmitError> {
        tokio::spawn(task);
        Ok(tokio::spawn(std::future::pending::<()>()).abort_handle())
    }

    fn ensure_ready(&self) -> Result<(), ConfigError> {
        Ok(())
    }

    fn shutdown(&self) {}
}

#[tokio::test(start_paused = true)]
async fn late_result_is_never_committed() {
    let cache = cache_on(Arc::new(StubbornExecutor));
    let finished = Arc::new(AtomicBool::new(false));

    let loaders = Loaders::from([(key("a"), {
        let finished = Arc::clone(&finished);
        loader(move || async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            finished.store(true, Ordering::Release);
            Ok(Some(1))
        })
    })]);

    let err = cache.refresh(Duration::from_secs(1), loaders).await.unwrap_err();
    assert!(err.as_aggregated().unwrap().causes()[&key("a")].is_timeout());

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert!(finished.load(Ordering::Acquire), "load should have run to completion");
    assert_eq!(cache.get(&key("a")), None);
}
