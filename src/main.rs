//! Sluice — distributed rate-limiting decision engine, standalone binary.
//!
//! This binary wires the library's components into a running service:
//! it loads configuration from the environment, builds the resolver,
//! registry, schedule manager and metrics core, starts their background
//! tasks (registry cleanup sweep, schedule evaluation), and serves until
//! interrupted. It carries no HTTP surface of its own — that is an
//! external collaborator's job (spec.md §1) — so this is mainly useful
//! as a smoke-test harness and as the shape an embedding service copies.

use anyhow::Result;
use sluice::backend::{BackendAdapter, LocalBackend, RemoteBackend};
use sluice::config::Config;
use sluice::metrics::MetricsCore;
use sluice::registry::BucketRegistry;
use sluice::resolver::ConfigResolver;
use sluice::schedule::ScheduleManager;
use sluice::RateLimitService;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    init_tracing();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(run())
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .json()
        .init();
}

async fn run() -> Result<()> {
    let cfg = Config::from_env()?;
    tracing::info!("configuration loaded");

    let adapter: Arc<dyn BackendAdapter> = match &cfg.remote_store {
        Some(remote) => {
            match RemoteBackend::connect(&remote.redis_url(), remote.timeout).await {
                Ok(backend) => {
                    tracing::info!(host = %remote.host, port = remote.port, "connected to remote rate-limit store");
                    Arc::new(backend)
                }
                Err(e) => {
                    tracing::error!(error = %e, "failed to connect to remote store, falling back to local backend");
                    Arc::new(LocalBackend::new())
                }
            }
        }
        None => {
            tracing::info!("no remote store configured, using local in-process backend");
            Arc::new(LocalBackend::new())
        }
    };

    let (schedule_manager, active_set) = ScheduleManager::new(cfg.scheduling_evaluation_interval);
    let resolver = Arc::new(ConfigResolver::new(cfg.default_config, active_set));
    let registry = Arc::new(BucketRegistry::new(adapter, cfg.registry_cleanup_interval));
    let metrics = Arc::new(MetricsCore::new(cfg.metrics_slow_threshold_ms));

    let service = RateLimitService::new(resolver, registry, schedule_manager, metrics);
    service.start_background_tasks().await;
    tracing::info!("rate-limit service ready");

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown signal received, stopping background tasks");
    service.stop_background_tasks().await;

    Ok(())
}
