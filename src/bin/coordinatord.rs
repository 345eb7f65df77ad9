//! ligature-coordinatord: standalone tenant coordinator server.
//!
//! Single-process HTTP/WebSocket server fronting one or more tenants, each
//! backed by its own sqlite database and CSV snapshot tree under
//! `storage.data_root`.
//!
//! ## Configuration
//! Set via `config.yaml`, `LIGATURE_CONFIG`, or `LIGATURE_*` environment
//! variables (see [`ligature::config::Config::load`]).
//!
//! ## Usage
//! ```bash
//! ligature-coordinatord
//! LIGATURE_CONFIG=/etc/ligature/config.yaml ligature-coordinatord
//! LIGATURE_SERVER__PORT=9090 ligature-coordinatord
//! ```

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ligature::config::Config;
use ligature::interfaces::{EdgeStore, MutationLog, SnapshotStore};
use ligature::storage::{CsvSnapshotStore, SqliteEdgeStore, SqliteMutationLog};
use ligature::tenant::{TenantRegistry, TenantStorageFactory};

struct SqliteStorageFactory {
    data_root: std::path::PathBuf,
}

#[async_trait]
impl TenantStorageFactory for SqliteStorageFactory {
    async fn build(&self, tenant_id: &str) -> (Arc<dyn EdgeStore>, Arc<dyn MutationLog>, Arc<dyn SnapshotStore>) {
        let tenant_root = self.data_root.join(tenant_id);
        std::fs::create_dir_all(&tenant_root).expect("create tenant data directory");
        let db_path = tenant_root.join("edges.sqlite3");
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .connect(&format!("sqlite://{}?mode=rwc", db_path.display()))
            .await
            .expect("open tenant sqlite database");
        ligature::storage::sqlite::migrate(&pool)
            .await
            .expect("run tenant schema migration");
        (
            Arc::new(SqliteEdgeStore::new(pool.clone())),
            Arc::new(SqliteMutationLog::new(pool)),
            Arc::new(CsvSnapshotStore::new(tenant_root.join("snapshots"))),
        )
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_env("LIGATURE_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::load(None).map_err(|e| {
        error!("failed to load configuration: {e}");
        e
    })?;

    info!(host = %config.server.host, port = config.server.port, "starting ligature-coordinatord");

    let factory = Arc::new(SqliteStorageFactory {
        data_root: config.storage.data_root.clone().into(),
    });
    let registry = Arc::new(TenantRegistry::new(factory, &config));

    registry
        .clone()
        .spawn_reaper(Duration::from_secs(config.tenant.idle_eviction_secs.max(1)));

    let app = ligature::handlers::router(registry);
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(%addr, "listening");
    axum::serve(listener, app).await?;

    Ok(())
}
