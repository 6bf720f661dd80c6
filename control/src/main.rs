use anyhow::{Context, Result};
use control::admin::{AdminApi, AdminClient};
use control::apis::apisix::{crd, watcher::watch_resources};
use control::config::{ControllerConfig, SyncConfig};
use control::error::ControllerError;
use control::status_server::StatusServer;
use control::sync::SyncEngine;
use common::{ResourceKind, SchemaVersion};
use std::env;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::oneshot;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

/// Tether - APISIX global rule controller
///
/// `tether-controller crd` prints the CRDs; without arguments the controller
/// runs until Ctrl-C.
#[tokio::main]
async fn main() -> Result<()> {
    // Initialize rustls crypto provider (needed for Kubernetes TLS client)
    rustls::crypto::ring::default_provider()
        .install_default()
        .ok(); // Ignore error if already installed

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    if env::args().nth(1).as_deref() == Some("crd") {
        for definition in crd::crds().map_err(ControllerError::from)? {
            println!("---");
            print!("{}", serde_yaml::to_string(&definition)?);
        }
        return Ok(());
    }

    let config = ControllerConfig::from_env()?;
    let version = SchemaVersion::parse(&config.resource_api_version).ok_or_else(|| {
        ControllerError::Config(format!(
            "unsupported resource api version {:?}",
            config.resource_api_version
        ))
    })?;

    info!("🦀 Tether: APISIX global rule controller");
    info!("   Controller: {}", config.controller_name);
    info!("   Admin API: {}", config.admin.base_url);
    info!("   Resource version: {}", version.api_version());
    if let Some(ns) = &config.watch_namespace {
        info!("   Namespace: {}", ns);
    }

    let admin: Arc<dyn AdminApi> = Arc::new(AdminClient::from_config(&config.admin));
    let engine = SyncEngine::start(admin, &config.sync)
        .await
        .context("initial listing of gateway global rules failed")?;

    let client = kube::Client::try_default()
        .await
        .map_err(ControllerError::from)?;

    let mut handles = vec![];
    let mut synced = vec![];

    for kind in [ResourceKind::GlobalRule, ResourceKind::ClusterConfig] {
        let (tx, rx) = oneshot::channel();
        synced.push(rx);

        let client = client.clone();
        let engine = engine.clone();
        let namespace = config.watch_namespace.clone();
        handles.push(tokio::spawn(async move {
            if let Err(e) =
                watch_resources(client, kind, version, namespace, engine, Some(tx)).await
            {
                error!("{} watcher error: {}", kind, e);
            }
        }));
    }

    handles.push(tokio::spawn(maintenance(
        engine.clone(),
        config.sync.clone(),
        synced,
    )));

    let server = StatusServer::bind(&config.status_bind_addr, engine.clone()).await?;
    let (stop_tx, stop_rx) = oneshot::channel();
    handles.push(tokio::spawn(server.run(stop_rx)));

    info!("✅ Controller started. Press Ctrl-C to exit.");
    signal::ctrl_c().await?;
    info!("Shutdown signal received");

    let _ = stop_tx.send(());
    for handle in handles {
        handle.abort();
    }
    engine.shutdown();

    Ok(())
}

/// Prune orphans once every watcher has listed, then resync periodically
async fn maintenance(engine: SyncEngine, sync: SyncConfig, synced: Vec<oneshot::Receiver<()>>) {
    for rx in synced {
        if rx.await.is_err() {
            warn!("watcher stopped before its initial sync; skipping orphan pruning");
            return;
        }
    }

    if sync.prune_on_startup {
        match engine.prune_unowned().await {
            Ok(0) => info!("no unowned global rules"),
            Ok(count) => info!("🧹 pruning {} unowned global rules", count),
            Err(e) => warn!("orphan pruning failed: {}", e),
        }
    }

    let Some(period) = sync.resync_interval() else {
        return;
    };
    let mut ticker = tokio::time::interval(period);
    ticker.tick().await;

    loop {
        ticker.tick().await;
        match engine.resync().await {
            Ok(0) => {}
            Ok(count) => info!("🔁 resync scheduled {} repairs", count),
            Err(e) => warn!("resync failed: {}", e),
        }
    }
}
