//! Dependency wiring and server startup.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use flotilla_api::{ApiState, router};
use flotilla_config::FlotillaConfig;
use flotilla_core::Instance;
use flotilla_data::Database;
use flotilla_pool::{ClientPool, Crypter, InstanceDirectory};
use flotilla_query::ListingService;
use flotilla_rules::{RuleEngine, RuleEngineConfig};
use flotilla_sync::SyncService;
use tracing::info;

/// Instance directory backed by the SQLite store.
struct StoreDirectory {
    db: Database,
}

#[async_trait]
impl InstanceDirectory for StoreDirectory {
    async fn instance(&self, id: i64) -> Result<Option<Instance>> {
        Ok(self.db.instances().find(id).await?)
    }
}

/// Load config, wire every layer, and serve until interrupted.
pub(crate) async fn run(config_path: &Path) -> Result<()> {
    let config = FlotillaConfig::load(config_path)
        .with_context(|| format!("loading config from {}", config_path.display()))?;
    crate::telemetry::init_logging(&config.log_level, config.log_format)?;

    let db = Database::open(&config.database_path)
        .await
        .with_context(|| format!("opening database {}", config.database_path.display()))?;

    let key = config.decode_session_secret()?;
    let crypter = Crypter::new(&key);
    let pool = Arc::new(ClientPool::new(
        Arc::new(StoreDirectory { db: db.clone() }),
        crypter,
        Duration::from_secs(config.request_timeout_secs),
    ));
    let sync = Arc::new(SyncService::new(
        Arc::clone(&pool),
        Duration::from_millis(config.refresh_ttl_ms),
        Duration::from_millis(config.micro_cache_ttl_ms),
    ));
    let listing = Arc::new(ListingService::new(Arc::clone(&sync)));
    let engine = Arc::new(RuleEngine::new(
        Arc::clone(&sync),
        db.clone(),
        RuleEngineConfig {
            workers: config.rule_workers,
            default_interval_secs: i64::try_from(config.default_rule_interval_secs)
                .unwrap_or(900),
            program_allow_list: config.program_allow_list.clone(),
        },
    ));

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let scheduler = tokio::spawn(Arc::clone(&engine).run(shutdown_rx));

    let state = ApiState::new(db, pool, sync, listing, engine);
    let app = router(state);

    let bind = config.bind_addr()?;
    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .with_context(|| format!("binding {bind}"))?;
    info!(%bind, "flotilla listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
        })
        .await
        .context("http server failed")?;

    let _ = shutdown_tx.send(true);
    let _ = scheduler.await;
    Ok(())
}
