//! Wire schema shared by the tenant coordinator and its client replicas.
//!
//! These types are the JSON payloads exchanged over the subscriber
//! transport (`HELLO`/`MUTATE`/`PING` from the client, `SNAPSHOT_REF`/
//! `MUTATION`/`ACK`/`PONG`/`ERROR` from the server) and the bodies of the
//! coordinator's HTTP/RPC surface.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque, server-generated, unforgeable edge identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EdgeId(pub Uuid);

impl EdgeId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EdgeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EdgeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A node identifier. Nodes are not first-class; they exist only as
/// edge endpoints, so this is an opaque string (e.g. `"u:alice"`).
pub type NodeId = String;

/// An edge type. The base set is `MEMBER_OF`, `INHERITS_FROM`,
/// `HAS_PERMISSION`; tenants may register extensions as plain strings.
pub type EdgeType = String;

pub const MEMBER_OF: &str = "MEMBER_OF";
pub const INHERITS_FROM: &str = "INHERITS_FROM";
pub const HAS_PERMISSION: &str = "HAS_PERMISSION";

/// An uninterpreted scalar property value carried on an edge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    Str(String),
    Int(i64),
    Bool(bool),
}

impl PropertyValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            PropertyValue::Str(s) => Some(s),
            _ => None,
        }
    }
}

impl From<&str> for PropertyValue {
    fn from(s: &str) -> Self {
        PropertyValue::Str(s.to_string())
    }
}

/// Unordered mapping of string keys to scalar values, uninterpreted by
/// the path validator except for the `capability` key.
pub type Properties = BTreeMap<String, PropertyValue>;

/// Key under which a capability label is looked up in `Properties`.
pub const CAPABILITY_KEY: &str = "capability";

/// The atomic permission fact. See spec §3.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub id: EdgeId,
    #[serde(rename = "type")]
    pub edge_type: EdgeType,
    pub source_id: NodeId,
    pub target_id: NodeId,
    #[serde(default)]
    pub properties: Properties,
    pub created_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
}

impl Edge {
    pub fn is_live(&self) -> bool {
        self.revoked_at.is_none()
    }

    pub fn capability(&self) -> Option<&str> {
        self.properties.get(CAPABILITY_KEY).and_then(|v| v.as_str())
    }
}

/// Flat, CSV-serializable projection of an [`Edge`], one row per file
/// named after the edge's `type` (spec §6: "one tabular file per ...
/// edge type"). `properties` is carried as a JSON string column since
/// csv has no notion of a nested map.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CsvEdgeRow {
    pub id: EdgeId,
    pub source_id: NodeId,
    pub target_id: NodeId,
    pub created_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
    pub properties: String,
}

impl CsvEdgeRow {
    pub fn from_edge(edge: &Edge) -> Self {
        Self {
            id: edge.id,
            source_id: edge.source_id.clone(),
            target_id: edge.target_id.clone(),
            created_at: edge.created_at,
            revoked_at: edge.revoked_at,
            properties: serde_json::to_string(&edge.properties).unwrap_or_default(),
        }
    }

    pub fn into_edge(self, edge_type: EdgeType) -> serde_json::Result<Edge> {
        let properties: Properties = if self.properties.is_empty() {
            Properties::new()
        } else {
            serde_json::from_str(&self.properties)?
        };
        Ok(Edge {
            id: self.id,
            edge_type,
            source_id: self.source_id,
            target_id: self.target_id,
            properties,
            created_at: self.created_at,
            revoked_at: self.revoked_at,
        })
    }
}

/// Kind of a mutation log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MutationKind {
    Create,
    Revoke,
}

/// An append-only mutation log entry. Versions are dense and strictly
/// increasing starting at 1.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MutationLogEntry {
    pub version: u64,
    pub kind: MutationKind,
    pub edge_id: EdgeId,
    pub edge: Edge,
    pub at: DateTime<Utc>,
}

/// A proof submitted by a client claiming a connected permission path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Proof {
    pub edge_ids: Vec<EdgeId>,
    pub subject_id: NodeId,
    pub object_id: NodeId,
    pub capability: Option<String>,
}

/// Stable wire error codes from spec §6.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    UnknownEdge,
    RevokedEdge,
    ChainNotRooted,
    DisconnectedAt,
    ChainWrongTerminus,
    CapabilityMismatch,
    InvalidProof,
    Lagged,
    Backpressure,
    TenantNotFound,
    SchemaMigrationInProgress,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// An idempotency key supplied by the client for a mutation submission.
/// Retries of the same `(payload, key)` produce exactly one log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdempotencyKey(pub Uuid);

impl IdempotencyKey {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for IdempotencyKey {
    fn default() -> Self {
        Self::new()
    }
}

/// A requested mutation (the body a `grant`/`revoke` submits to the
/// coordinator).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "UPPERCASE")]
pub enum MutationPayload {
    Create {
        edge_type: EdgeType,
        source_id: NodeId,
        target_id: NodeId,
        #[serde(default)]
        properties: Properties,
    },
    Revoke {
        edge_id: EdgeId,
    },
}

/// Client → server messages on the subscriber transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    #[serde(rename = "HELLO")]
    Hello { known_version: u64 },
    #[serde(rename = "MUTATE")]
    Mutate {
        payload: MutationPayload,
        proof: Option<Proof>,
        idempotency_key: IdempotencyKey,
    },
    #[serde(rename = "PING")]
    Ping,
}

/// Server → client messages on the subscriber transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    #[serde(rename = "SNAPSHOT_REF")]
    SnapshotRef { uri: String, version: u64 },
    #[serde(rename = "MUTATION")]
    Mutation {
        version: u64,
        kind: MutationKind,
        edge: Edge,
    },
    #[serde(rename = "ACK")]
    Ack {
        idempotency_key: IdempotencyKey,
        result: MutationAck,
    },
    #[serde(rename = "PONG")]
    Pong,
    #[serde(rename = "ERROR")]
    Error { code: ErrorCode, msg: String },
}

/// Outcome carried by an `ACK` message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "success")]
pub enum MutationAck {
    #[serde(rename = "true")]
    Success { version: u64 },
    #[serde(rename = "false")]
    Failure { code: ErrorCode, msg: String },
}

/// Result of a path validation, mirroring spec §4.2.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "valid")]
pub enum ValidationResult {
    #[serde(rename = "true")]
    Valid,
    #[serde(rename = "false")]
    Invalid {
        code: ErrorCode,
        #[serde(skip_serializing_if = "Option::is_none")]
        edge_id: Option<EdgeId>,
        #[serde(skip_serializing_if = "Option::is_none")]
        index: Option<usize>,
    },
}

impl ValidationResult {
    pub fn is_valid(&self) -> bool {
        matches!(self, ValidationResult::Valid)
    }

    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            ValidationResult::Valid => None,
            ValidationResult::Invalid { code, .. } => Some(*code),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn edge_id_round_trips_through_json() {
        let id = EdgeId::new();
        let json = serde_json::to_string(&id).unwrap();
        let back: EdgeId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, back);
    }

    #[test]
    fn edge_capability_reads_property() {
        let mut props = Properties::new();
        props.insert(CAPABILITY_KEY.to_string(), PropertyValue::from("read"));
        let edge = Edge {
            id: EdgeId::new(),
            edge_type: HAS_PERMISSION.to_string(),
            source_id: "g:eng".into(),
            target_id: "r:doc1".into(),
            properties: props,
            created_at: Utc::now(),
            revoked_at: None,
        };
        assert_eq!(edge.capability(), Some("read"));
        assert!(edge.is_live());
    }

    #[test]
    fn client_message_hello_round_trips() {
        let msg = ClientMessage::Hello { known_version: 5 };
        let json = serde_json::to_string(&msg).unwrap();
        let back: ClientMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(msg, back);
    }
}
