//! Keeps a status board of remote map service endpoints.
//!
//! The endpoint registry changes between cycles, one endpoint never answers in time and another one answers with an
//! error. Run with `RUST_LOG=refresh_cache=debug` to see every commit and eviction.
//!
//! ```text
//! cargo run --example endpoint_status --features telemetry -- --interval-secs 60 --workers 4
//! ```

use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use refresh_cache::prelude::*;
use refresh_cache::telemetry::init_tracing;
use tokio::runtime::Handle;
use tracing::info;

#[derive(Debug, Clone, PartialEq)]
enum Status {
    Up { layers: u32, latency_ms: u64 },
    Down(String),
    Unresponsive,
}

struct StatusHooks;

impl RefreshHooks<EntryIdentity, Status> for StatusHooks {
    fn on_timeout(&self, _key: &EntryIdentity) -> anyhow::Result<Option<Status>> {
        Ok(Some(Status::Unresponsive))
    }

    fn on_load_error(&self, _key: &EntryIdentity, error: &LoadError) -> anyhow::Result<Option<Status>> {
        Ok(Some(Status::Down(error.to_string())))
    }
}

#[derive(Debug, Clone)]
struct Endpoint {
    id:           String,
    version:      String,
    title:        String,
    organization: String,
    latency:      Duration,
    healthy:      bool,
}

impl DescribedEntity for Endpoint {
    fn id(&self) -> &str {
        &self.id
    }

    fn version(&self) -> Option<&str> {
        Some(&self.version)
    }

    fn title(&self) -> Option<&str> {
        Some(&self.title)
    }

    fn organization(&self) -> Option<&str> {
        Some(&self.organization)
    }
}

impl Endpoint {
    fn new(id: &str, title: &str, latency_ms: u64, healthy: bool) -> Self {
        Self {
            id: id.to_string(),
            version: "1.3.0".to_string(),
            title: title.to_string(),
            organization: "Demo Mapping Agency".to_string(),
            latency: Duration::from_millis(latency_ms),
            healthy,
        }
    }

    // Stands in for a GetCapabilities round trip.
    async fn probe(self) -> anyhow::Result<Option<Status>> {
        tokio::time::sleep(self.latency).await;
        if !self.healthy {
            anyhow::bail!("{} answered with HTTP 503", self.id);
        }
        Ok(Some(Status::Up {
            layers:     self.title.len() as u32,
            latency_ms: self.latency.as_millis() as u64,
        }))
    }
}

// The first snapshot has no hydrography service yet, later ones have lost the road network.
struct Registry {
    snapshots: AtomicUsize,
}

impl Registry {
    fn catalog() -> Vec<Endpoint> {
        vec![
            Endpoint::new("topo", "Topographic", 120, true),
            Endpoint::new("ortho", "Orthophoto", 400, true),
            Endpoint::new("cadastre", "Cadastral parcels", 50, false),
            Endpoint::new("archive", "Historical maps", 3_600_000, true),
            Endpoint::new("roads", "Road network", 80, true),
            Endpoint::new("hydro", "Hydrography", 200, true),
        ]
    }

    fn snapshot_loaders(&self) -> Result<Loaders<EntryIdentity, Status>, IdentityError> {
        let retired = if self.snapshots.fetch_add(1, Ordering::SeqCst) == 0 {
            "hydro"
        }
        else {
            "roads"
        };

        Self::catalog()
            .into_iter()
            .filter(|endpoint| endpoint.id != retired)
            .map(|endpoint| {
                let identity = EntryIdentity::from_entity(&endpoint)?;
                Ok((identity, loader(move || endpoint.probe())))
            })
            .collect()
    }
}

#[async_trait::async_trait]
impl LoaderSupplier<EntryIdentity, Status> for Registry {
    async fn loaders(&self) -> anyhow::Result<Loaders<EntryIdentity, Status>> {
        Ok(self.snapshot_loaders()?)
    }
}

fn print_board(cache: &EntityCache<Status>) {
    for endpoint in Registry::catalog() {
        match cache.get_for(&endpoint) {
            Ok(Some(status)) => println!("  {:<10} {status:?}", endpoint.id),
            Ok(None) => println!("  {:<10} unknown", endpoint.id),
            Err(err) => println!("  {:<10} {err}", endpoint.id),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing("refresh_cache=info", false)?;

    let config = RefreshConfig::parse().validated()?;
    let pool = config.worker_pool(Handle::current())?;
    let cache = EntityCache::new(config.refresh_cache::<EntryIdentity, Status>(pool)?);
    let registry = Arc::new(Registry {
        snapshots: AtomicUsize::new(0),
    });

    // A cycle driven by hand first, with a short deadline so the archive endpoint times out quickly.
    let hooked = RefreshCache::<EntryIdentity, Status>::builder()
        .executor(config.worker_pool(Handle::current())?)
        .hooks(Arc::new(StatusHooks))
        .name("hooked")
        .build()
        .map_err(|err| anyhow::anyhow!("cannot build the hooked cache: {err}"))?;
    match hooked.refresh(Duration::from_secs(2), registry.snapshot_loaders()?).await {
        Ok(summary) => info!(%summary, "Manual cycle succeeded"),
        Err(err) => info!("Manual cycle finished with failures: {err}"),
    }
    println!("After a manual cycle with failure hooks:");
    print_board(&EntityCache::new(hooked.clone()));
    hooked.shutdown();

    let scheduler: EntityScheduler<Status> = config.scheduler(cache.cache(), registry.clone())?;
    scheduler.start(config.interval())?;

    tokio::time::sleep(Duration::from_secs(2)).await;
    println!("After the first scheduled cycle:");
    print_board(&cache);

    scheduler.stop();
    scheduler.wait().await?;

    Ok(())
}
