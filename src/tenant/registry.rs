//! Multi-tenant registry: looks up or lazily creates a tenant's
//! coordinator, and reaps coordinators idle past their configured bound
//! (spec §4.6 `READY → DRAINING → EVICTED`).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::info;

use crate::config::{Config, StorageConfig, TenantConfig};
use crate::interfaces::{AuditSink, EdgeStore, MutationLog, SnapshotStore, TracingAuditSink};
use crate::storage::{CsvSnapshotStore, MockEdgeStore, MockMutationLog};
use crate::tenant::coordinator::TenantCoordinator;

/// Constructs the storage backends for a newly registered tenant. Swappable
/// so `standalone` deployments wire sqlite while tests wire the in-memory
/// mock backend, without the registry itself knowing which.
#[async_trait]
pub trait TenantStorageFactory: Send + Sync {
    async fn build(&self, tenant_id: &str) -> (Arc<dyn EdgeStore>, Arc<dyn MutationLog>, Arc<dyn SnapshotStore>);
}

/// Factory backing every tenant with in-process, non-durable storage.
/// Used for tests and for the `test-utils` feature.
pub struct InMemoryStorageFactory {
    pub snapshot_root: std::path::PathBuf,
}

#[async_trait]
impl TenantStorageFactory for InMemoryStorageFactory {
    async fn build(&self, tenant_id: &str) -> (Arc<dyn EdgeStore>, Arc<dyn MutationLog>, Arc<dyn SnapshotStore>) {
        let root = self.snapshot_root.join(tenant_id);
        (
            Arc::new(MockEdgeStore::new()),
            Arc::new(MockMutationLog::new()),
            Arc::new(CsvSnapshotStore::new(root)),
        )
    }
}

/// Owns every tenant currently resident in this process.
pub struct TenantRegistry {
    tenants: RwLock<HashMap<String, Arc<TenantCoordinator>>>,
    storage_factory: Arc<dyn TenantStorageFactory>,
    audit: Arc<dyn AuditSink>,
    storage_config: StorageConfig,
    tenant_config: TenantConfig,
}

impl TenantRegistry {
    pub fn new(storage_factory: Arc<dyn TenantStorageFactory>, config: &Config) -> Self {
        Self {
            tenants: RwLock::new(HashMap::new()),
            storage_factory,
            audit: Arc::new(TracingAuditSink),
            storage_config: config.storage.clone(),
            tenant_config: config.tenant.clone(),
        }
    }

    /// The tenant's coordinator, creating it `COLD` on first access. Does
    /// not itself drive `ensure_ready` — callers invoke that, or it happens
    /// implicitly on the first read/mutate call.
    pub async fn get_or_create(&self, tenant_id: &str) -> Arc<TenantCoordinator> {
        if let Some(existing) = self.tenants.read().await.get(tenant_id) {
            return existing.clone();
        }
        let mut tenants = self.tenants.write().await;
        if let Some(existing) = tenants.get(tenant_id) {
            return existing.clone();
        }
        let (edge_store, mutation_log, snapshot_store) = self.storage_factory.build(tenant_id).await;
        let coordinator = Arc::new(TenantCoordinator::new(
            tenant_id,
            edge_store,
            mutation_log,
            snapshot_store,
            self.audit.clone(),
            self.storage_config.clone(),
            self.tenant_config.clone(),
        ));
        tenants.insert(tenant_id.to_string(), coordinator.clone());
        coordinator
    }

    /// One reaper sweep: evict and drop every coordinator idle past its
    /// bound. Durable state is untouched; a later request rebuilds it from
    /// `COLD`.
    pub async fn reap_idle(&self) {
        let mut idle_ids = Vec::new();
        for (id, coordinator) in self.tenants.read().await.iter() {
            if coordinator.is_idle().await {
                idle_ids.push(id.clone());
            }
        }
        if idle_ids.is_empty() {
            return;
        }
        let mut tenants = self.tenants.write().await;
        for id in idle_ids {
            if let Some(coordinator) = tenants.remove(&id) {
                coordinator.evict().await;
                info!(tenant_id = %id, "reaped idle tenant");
            }
        }
    }

    /// Runs [`Self::reap_idle`] on an interval until the returned handle is
    /// dropped or aborted.
    pub fn spawn_reaper(self: Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                self.reap_idle().await;
            }
        })
    }

    pub async fn tenant_count(&self) -> usize {
        self.tenants.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry(dir: &std::path::Path) -> TenantRegistry {
        TenantRegistry::new(
            Arc::new(InMemoryStorageFactory {
                snapshot_root: dir.to_path_buf(),
            }),
            &Config::for_test(),
        )
    }

    #[tokio::test]
    async fn get_or_create_returns_same_instance() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry(dir.path());
        let a = registry.get_or_create("tenant-a").await;
        let b = registry.get_or_create("tenant-a").await;
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.tenant_count().await, 1);
    }

    #[tokio::test]
    async fn distinct_tenants_get_distinct_coordinators() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry(dir.path());
        let a = registry.get_or_create("tenant-a").await;
        let b = registry.get_or_create("tenant-b").await;
        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(registry.tenant_count().await, 2);
    }

    #[tokio::test]
    async fn reap_idle_evicts_and_removes() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::for_test();
        config.tenant.idle_eviction_secs = 0;
        let registry = TenantRegistry::new(
            Arc::new(InMemoryStorageFactory {
                snapshot_root: dir.path().to_path_buf(),
            }),
            &config,
        );
        let coordinator = registry.get_or_create("tenant-a").await;
        coordinator.ensure_ready().await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        registry.reap_idle().await;
        assert_eq!(registry.tenant_count().await, 0);
    }
}
