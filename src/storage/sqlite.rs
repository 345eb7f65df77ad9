//! Durable sqlite backend for `EdgeStore` and `MutationLog`, built with
//! the same sea-query-as-query-builder-over-sqlx approach the teacher
//! framework uses for its own sqlite storage.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_query::{Expr, Iden, OnConflict, Order, Query, SqliteQueryBuilder};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use ligature_client::wire::{CsvEdgeRow, Edge, EdgeId, MutationKind, MutationLogEntry};

use crate::error::{CoordinatorError, Result, StorageError};
use crate::interfaces::{EdgeStore, MutationLog};

#[derive(Iden)]
enum Edges {
    Table,
    #[iden = "id"]
    Id,
    #[iden = "edge_type"]
    EdgeType,
    #[iden = "source_id"]
    SourceId,
    #[iden = "target_id"]
    TargetId,
    #[iden = "properties"]
    Properties,
    #[iden = "created_at"]
    CreatedAt,
    #[iden = "revoked_at"]
    RevokedAt,
}

#[derive(Iden)]
enum Mutations {
    Table,
    #[iden = "version"]
    Version,
    #[iden = "kind"]
    Kind,
    #[iden = "edge_id"]
    EdgeId,
    #[iden = "edge_json"]
    EdgeJson,
    #[iden = "at"]
    At,
}

#[derive(Iden)]
enum IdempotencyKeys {
    Table,
    #[iden = "key"]
    Key,
    #[iden = "version"]
    Version,
}

#[derive(Iden)]
enum SchemaVersion {
    Table,
    #[iden = "id"]
    Id,
    #[iden = "version"]
    Version,
}

pub const CREATE_TABLES: &str = r#"
CREATE TABLE IF NOT EXISTS edges (
    id TEXT PRIMARY KEY,
    edge_type TEXT NOT NULL,
    source_id TEXT NOT NULL,
    target_id TEXT NOT NULL,
    properties TEXT NOT NULL,
    created_at TEXT NOT NULL,
    revoked_at TEXT
);
CREATE INDEX IF NOT EXISTS idx_edges_source ON edges(source_id);

CREATE TABLE IF NOT EXISTS mutations (
    version INTEGER PRIMARY KEY,
    kind TEXT NOT NULL,
    edge_id TEXT NOT NULL,
    edge_json TEXT NOT NULL,
    at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS idempotency_keys (
    key TEXT PRIMARY KEY,
    version INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS schema_version (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    version INTEGER NOT NULL
);
"#;

/// Run the schema migration against `pool`. Idempotent (spec §4.6:
/// "Migrations must be idempotent").
pub async fn migrate(pool: &SqlitePool) -> Result<()> {
    sqlx::query(CREATE_TABLES)
        .execute(pool)
        .await
        .map_err(StorageError::Sqlite)?;
    Ok(())
}

fn row_to_edge(row: &sqlx::sqlite::SqliteRow) -> std::result::Result<Edge, StorageError> {
    let id_str: String = row.get("id");
    let properties_json: String = row.get("properties");
    let revoked_at: Option<String> = row.get("revoked_at");
    Ok(Edge {
        id: EdgeId(Uuid::parse_str(&id_str).map_err(|e| StorageError::Snapshot(e.to_string()))?),
        edge_type: row.get("edge_type"),
        source_id: row.get("source_id"),
        target_id: row.get("target_id"),
        properties: serde_json::from_str(&properties_json).unwrap_or_default(),
        created_at: row.get::<String, _>("created_at").parse().unwrap_or_else(|_| Utc::now()),
        revoked_at: revoked_at.and_then(|s| s.parse().ok()),
    })
}

pub struct SqliteEdgeStore {
    pool: SqlitePool,
}

impl SqliteEdgeStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EdgeStore for SqliteEdgeStore {
    /// Upsert on `id`: safe to call again for an edge this store already
    /// has, which the coordinator's snapshot-then-log rebuild on
    /// `COLD → INITIALIZING` relies on (spec §4.6).
    async fn insert(&self, edge: Edge) -> Result<()> {
        let row = CsvEdgeRow::from_edge(&edge);
        let query = Query::insert()
            .into_table(Edges::Table)
            .columns([
                Edges::Id,
                Edges::EdgeType,
                Edges::SourceId,
                Edges::TargetId,
                Edges::Properties,
                Edges::CreatedAt,
                Edges::RevokedAt,
            ])
            .values_panic([
                row.id.to_string().into(),
                edge.edge_type.into(),
                row.source_id.into(),
                row.target_id.into(),
                row.properties.into(),
                row.created_at.to_rfc3339().into(),
                row.revoked_at.map(|d| d.to_rfc3339()).into(),
            ])
            .on_conflict(
                OnConflict::column(Edges::Id)
                    .update_columns([
                        Edges::EdgeType,
                        Edges::SourceId,
                        Edges::TargetId,
                        Edges::Properties,
                        Edges::CreatedAt,
                        Edges::RevokedAt,
                    ])
                    .to_owned(),
            )
            .to_string(SqliteQueryBuilder);
        sqlx::query(&query).execute(&self.pool).await.map_err(StorageError::Sqlite)?;
        Ok(())
    }

    async fn revoke(&self, id: EdgeId, at: DateTime<Utc>) -> Result<()> {
        let query = Query::update()
            .table(Edges::Table)
            .value(Edges::RevokedAt, at.to_rfc3339())
            .and_where(Expr::col(Edges::Id).eq(id.to_string()))
            .and_where(Expr::col(Edges::RevokedAt).is_null())
            .to_string(SqliteQueryBuilder);
        let result = sqlx::query(&query).execute(&self.pool).await.map_err(StorageError::Sqlite)?;
        if result.rows_affected() == 0 && self.get(id).await?.is_none() {
            return Err(CoordinatorError::UnknownEdge(id));
        }
        Ok(())
    }

    async fn get(&self, id: EdgeId) -> Result<Option<Edge>> {
        let query = Query::select()
            .columns([
                Edges::Id,
                Edges::EdgeType,
                Edges::SourceId,
                Edges::TargetId,
                Edges::Properties,
                Edges::CreatedAt,
                Edges::RevokedAt,
            ])
            .from(Edges::Table)
            .and_where(Expr::col(Edges::Id).eq(id.to_string()))
            .to_string(SqliteQueryBuilder);
        let row = sqlx::query(&query).fetch_optional(&self.pool).await.map_err(StorageError::Sqlite)?;
        row.map(|r| row_to_edge(&r)).transpose().map_err(CoordinatorError::from)
    }

    async fn edges_from(&self, source_id: &str, edge_type: Option<&str>) -> Result<Vec<Edge>> {
        let mut select = Query::select();
        select
            .columns([
                Edges::Id,
                Edges::EdgeType,
                Edges::SourceId,
                Edges::TargetId,
                Edges::Properties,
                Edges::CreatedAt,
                Edges::RevokedAt,
            ])
            .from(Edges::Table)
            .and_where(Expr::col(Edges::SourceId).eq(source_id))
            .and_where(Expr::col(Edges::RevokedAt).is_null());
        if let Some(t) = edge_type {
            select.and_where(Expr::col(Edges::EdgeType).eq(t));
        }
        let query = select.to_string(SqliteQueryBuilder);
        let rows = sqlx::query(&query).fetch_all(&self.pool).await.map_err(StorageError::Sqlite)?;
        rows.iter().map(row_to_edge).collect::<std::result::Result<Vec<_>, _>>().map_err(CoordinatorError::from)
    }

    async fn all(&self) -> Result<Vec<Edge>> {
        let query = Query::select()
            .columns([
                Edges::Id,
                Edges::EdgeType,
                Edges::SourceId,
                Edges::TargetId,
                Edges::Properties,
                Edges::CreatedAt,
                Edges::RevokedAt,
            ])
            .from(Edges::Table)
            .to_string(SqliteQueryBuilder);
        let rows = sqlx::query(&query).fetch_all(&self.pool).await.map_err(StorageError::Sqlite)?;
        rows.iter().map(row_to_edge).collect::<std::result::Result<Vec<_>, _>>().map_err(CoordinatorError::from)
    }
}

pub struct SqliteMutationLog {
    pool: SqlitePool,
}

impl SqliteMutationLog {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MutationLog for SqliteMutationLog {
    async fn append(&self, kind: MutationKind, edge: Edge) -> Result<MutationLogEntry> {
        let head = self.head().await?;
        let version = head + 1;
        let kind_str = match kind {
            MutationKind::Create => "CREATE",
            MutationKind::Revoke => "REVOKE",
        };
        let at = Utc::now();
        let edge_json = serde_json::to_string(&edge).map_err(|e| StorageError::Snapshot(e.to_string()))?;
        let query = Query::insert()
            .into_table(Mutations::Table)
            .columns([Mutations::Version, Mutations::Kind, Mutations::EdgeId, Mutations::EdgeJson, Mutations::At])
            .values_panic([
                version.into(),
                kind_str.into(),
                edge.id.to_string().into(),
                edge_json.into(),
                at.to_rfc3339().into(),
            ])
            .to_string(SqliteQueryBuilder);
        sqlx::query(&query).execute(&self.pool).await.map_err(StorageError::Sqlite)?;
        Ok(MutationLogEntry {
            version,
            kind,
            edge_id: edge.id,
            edge,
            at,
        })
    }

    async fn head(&self) -> Result<u64> {
        let query = Query::select()
            .expr(Expr::col(Mutations::Version).max())
            .from(Mutations::Table)
            .to_string(SqliteQueryBuilder);
        let row = sqlx::query(&query).fetch_optional(&self.pool).await.map_err(StorageError::Sqlite)?;
        Ok(row.and_then(|r| r.get::<Option<i64>, _>(0)).unwrap_or(0) as u64)
    }

    async fn entries_since(&self, since: u64) -> Result<Vec<MutationLogEntry>> {
        let query = Query::select()
            .columns([Mutations::Version, Mutations::Kind, Mutations::EdgeJson, Mutations::At])
            .from(Mutations::Table)
            .and_where(Expr::col(Mutations::Version).gt(since as i64))
            .order_by(Mutations::Version, Order::Asc)
            .to_string(SqliteQueryBuilder);
        let rows = sqlx::query(&query).fetch_all(&self.pool).await.map_err(StorageError::Sqlite)?;
        let mut entries = Vec::with_capacity(rows.len());
        for row in rows {
            let version: i64 = row.get("version");
            let kind_str: String = row.get("kind");
            let edge_json: String = row.get("edge_json");
            let at_str: String = row.get("at");
            let edge: Edge = serde_json::from_str(&edge_json).map_err(|e| StorageError::Snapshot(e.to_string()))?;
            entries.push(MutationLogEntry {
                version: version as u64,
                kind: if kind_str == "CREATE" { MutationKind::Create } else { MutationKind::Revoke },
                edge_id: edge.id,
                edge,
                at: at_str.parse().unwrap_or_else(|_| Utc::now()),
            });
        }
        Ok(entries)
    }

    async fn record_idempotency_key(&self, key: Uuid, version: u64) -> Result<()> {
        let query = Query::insert()
            .into_table(IdempotencyKeys::Table)
            .columns([IdempotencyKeys::Key, IdempotencyKeys::Version])
            .values_panic([key.to_string().into(), version.into()])
            .to_string(SqliteQueryBuilder);
        sqlx::query(&query).execute(&self.pool).await.map_err(StorageError::Sqlite)?;
        Ok(())
    }

    async fn idempotency_key_version(&self, key: Uuid) -> Result<Option<u64>> {
        let query = Query::select()
            .column(IdempotencyKeys::Version)
            .from(IdempotencyKeys::Table)
            .and_where(Expr::col(IdempotencyKeys::Key).eq(key.to_string()))
            .to_string(SqliteQueryBuilder);
        let row = sqlx::query(&query).fetch_optional(&self.pool).await.map_err(StorageError::Sqlite)?;
        Ok(row.map(|r| r.get::<i64, _>("version") as u64))
    }

    async fn schema_version(&self) -> Result<Option<u32>> {
        let query = Query::select()
            .column(SchemaVersion::Version)
            .from(SchemaVersion::Table)
            .and_where(Expr::col(SchemaVersion::Id).eq(1))
            .to_string(SqliteQueryBuilder);
        let row = sqlx::query(&query).fetch_optional(&self.pool).await.map_err(StorageError::Sqlite)?;
        Ok(row.map(|r| r.get::<i64, _>("version") as u32))
    }

    async fn set_schema_version(&self, version: u32) -> Result<()> {
        let query = Query::insert()
            .into_table(SchemaVersion::Table)
            .columns([SchemaVersion::Id, SchemaVersion::Version])
            .values_panic([1i32.into(), version.into()])
            .on_conflict(OnConflict::column(SchemaVersion::Id).update_column(SchemaVersion::Version).to_owned())
            .to_string(SqliteQueryBuilder);
        sqlx::query(&query).execute(&self.pool).await.map_err(StorageError::Sqlite)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ligature_client::wire::Properties;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn pool() -> SqlitePool {
        let pool = SqlitePoolOptions::new().connect("sqlite::memory:").await.unwrap();
        migrate(&pool).await.unwrap();
        pool
    }

    fn edge(source: &str, target: &str) -> Edge {
        Edge {
            id: EdgeId::new(),
            edge_type: "MEMBER_OF".into(),
            source_id: source.into(),
            target_id: target.into(),
            properties: Properties::new(),
            created_at: Utc::now(),
            revoked_at: None,
        }
    }

    #[tokio::test]
    async fn insert_then_get_round_trips() {
        let store = SqliteEdgeStore::new(pool().await);
        let e = edge("u:alice", "g:eng");
        let id = e.id;
        store.insert(e).await.unwrap();
        let found = store.get(id).await.unwrap().unwrap();
        assert_eq!(found.source_id, "u:alice");
    }

    #[tokio::test]
    async fn revoke_unknown_edge_errors() {
        let store = SqliteEdgeStore::new(pool().await);
        let err = store.revoke(EdgeId::new(), Utc::now()).await.unwrap_err();
        assert!(matches!(err, CoordinatorError::UnknownEdge(_)));
    }

    #[tokio::test]
    async fn insert_is_an_upsert_not_a_duplicate_key_error() {
        let store = SqliteEdgeStore::new(pool().await);
        let e = edge("u:alice", "g:eng");
        let id = e.id;
        store.insert(e.clone()).await.unwrap();
        // Re-inserting the same edge (as a coordinator rebuild replaying a
        // snapshot or log tail against an already-durable store would)
        // must not hit the `id` primary key.
        store.insert(e).await.unwrap();
        assert!(store.get(id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn schema_version_round_trips() {
        let log = SqliteMutationLog::new(pool().await);
        assert_eq!(log.schema_version().await.unwrap(), None);
        log.set_schema_version(1).await.unwrap();
        assert_eq!(log.schema_version().await.unwrap(), Some(1));
        log.set_schema_version(2).await.unwrap();
        assert_eq!(log.schema_version().await.unwrap(), Some(2));
    }

    #[tokio::test]
    async fn mutation_log_head_and_tail() {
        let log = SqliteMutationLog::new(pool().await);
        log.append(MutationKind::Create, edge("u:a", "g:eng")).await.unwrap();
        log.append(MutationKind::Create, edge("u:b", "g:eng")).await.unwrap();
        assert_eq!(log.head().await.unwrap(), 2);
        assert_eq!(log.entries_since(1).await.unwrap().len(), 1);
    }
}
