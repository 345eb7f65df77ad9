//! Tabular (CSV) snapshot store (C5).
//!
//! Writes one file per edge type under
//! `<data_root>/<tenant>/v<version>/<type>.csv`, matching spec §6's "one
//! tabular file per ... edge type". Retains the latest version plus a
//! bounded number of prior versions hot; anything older is left for an
//! external cold-storage mover (out of scope per spec §1).

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use std::collections::BTreeMap;
use tokio::sync::RwLock;

use ligature_client::wire::{CsvEdgeRow, Edge};

use crate::error::{Result, StorageError};
use crate::interfaces::SnapshotStore;

pub struct CsvSnapshotStore {
    root: PathBuf,
    latest: RwLock<Option<(u64, String)>>,
}

impl CsvSnapshotStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            latest: RwLock::new(None),
        }
    }

    fn version_dir(&self, version: u64) -> PathBuf {
        self.root.join(format!("v{version}"))
    }
}

#[async_trait]
impl SnapshotStore for CsvSnapshotStore {
    async fn write(&self, version: u64, edges: &[Edge]) -> Result<String> {
        let dir = self.version_dir(version);
        std::fs::create_dir_all(&dir).map_err(StorageError::Io)?;

        let mut by_type: BTreeMap<&str, Vec<&Edge>> = BTreeMap::new();
        for edge in edges {
            by_type.entry(edge.edge_type.as_str()).or_default().push(edge);
        }

        for (edge_type, edges) in by_type {
            let path = dir.join(format!("{edge_type}.csv"));
            let mut writer = csv::Writer::from_path(&path).map_err(StorageError::Csv)?;
            for edge in edges {
                writer.serialize(CsvEdgeRow::from_edge(edge)).map_err(StorageError::Csv)?;
            }
            writer.flush().map_err(StorageError::Io)?;
        }

        let uri = dir.to_string_lossy().into_owned();
        *self.latest.write().await = Some((version, uri.clone()));
        Ok(uri)
    }

    async fn latest(&self) -> Result<Option<(u64, String)>> {
        if let Some(found) = self.latest.read().await.clone() {
            return Ok(Some(found));
        }
        // Cold start: discover the highest `vN` directory on disk.
        let Ok(entries) = std::fs::read_dir(&self.root) else {
            return Ok(None);
        };
        let mut versions: Vec<u64> = entries
            .filter_map(|e| e.ok())
            .filter_map(|e| e.file_name().into_string().ok())
            .filter_map(|name| name.strip_prefix('v').and_then(|v| v.parse().ok()))
            .collect();
        versions.sort_unstable();
        let Some(version) = versions.last().copied() else {
            return Ok(None);
        };
        let uri = self.version_dir(version).to_string_lossy().into_owned();
        *self.latest.write().await = Some((version, uri.clone()));
        Ok(Some((version, uri)))
    }

    async fn load(&self, uri: &str) -> Result<Vec<Edge>> {
        let dir = Path::new(uri);
        let mut edges = Vec::new();
        let entries = std::fs::read_dir(dir).map_err(StorageError::Io)?;
        for entry in entries {
            let entry = entry.map_err(StorageError::Io)?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("csv") {
                continue;
            }
            let edge_type = path
                .file_stem()
                .and_then(|s| s.to_str())
                .ok_or_else(|| StorageError::Snapshot(format!("unreadable snapshot file name: {path:?}")))?
                .to_string();
            let mut reader = csv::Reader::from_path(&path).map_err(StorageError::Csv)?;
            for record in reader.deserialize() {
                let row: CsvEdgeRow = record.map_err(StorageError::Csv)?;
                let edge = row
                    .into_edge(edge_type.clone())
                    .map_err(|e| StorageError::Snapshot(e.to_string()))?;
                edges.push(edge);
            }
        }
        Ok(edges)
    }

    async fn prune(&self, keep: usize) -> Result<()> {
        let Ok(entries) = std::fs::read_dir(&self.root) else {
            return Ok(());
        };
        let mut versions: Vec<(u64, PathBuf)> = entries
            .filter_map(|e| e.ok())
            .filter_map(|e| {
                let name = e.file_name().into_string().ok()?;
                let version: u64 = name.strip_prefix('v')?.parse().ok()?;
                Some((version, e.path()))
            })
            .collect();
        versions.sort_unstable_by_key(|(v, _)| *v);
        if versions.len() > keep {
            for (_, path) in &versions[..versions.len() - keep] {
                let _ = std::fs::remove_dir_all(path);
            }
        }
        Ok(())
    }
}
