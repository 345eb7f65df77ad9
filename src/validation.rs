//! Path Validator (C2): the sole authority on whether an ordered edge-ID
//! list forms a connected, live chain from subject to object.
//!
//! Validation itself is synchronous (spec §5: "Path validation ... is
//! synchronous and non-suspending") — callers resolve each edge id
//! against the store first (an async operation against whichever backend
//! is configured) and hand the resolved edges to [`validate`].

use ligature_client::wire::{Edge, EdgeId, ErrorCode, ValidationResult};

/// Validate a proof: an ordered sequence of `(edge_id, edge)` pairs where
/// `edge` is `None` if the id was unknown to the store.
///
/// Implements the seven ordered checks of spec §4.2; the first failing
/// check determines the result.
pub fn validate(
    proof_edges: &[(EdgeId, Option<Edge>)],
    subject_id: &str,
    object_id: &str,
    capability: Option<&str>,
) -> ValidationResult {
    // 1. Non-empty.
    if proof_edges.is_empty() {
        return invalid(ErrorCode::InvalidProof, None, None);
    }

    // 2. Existence.
    for (id, edge) in proof_edges {
        if edge.is_none() {
            return invalid(ErrorCode::UnknownEdge, Some(*id), None);
        }
    }
    let edges: Vec<&Edge> = proof_edges.iter().map(|(_, e)| e.as_ref().unwrap()).collect();

    // 3. Liveness.
    for edge in &edges {
        if !edge.is_live() {
            return invalid(ErrorCode::RevokedEdge, Some(edge.id), None);
        }
    }

    // 4. Subject anchor.
    if edges[0].source_id != subject_id {
        return invalid(ErrorCode::ChainNotRooted, None, None);
    }

    // 5. Connectivity.
    for i in 0..edges.len().saturating_sub(1) {
        if edges[i].target_id != edges[i + 1].source_id {
            return invalid(ErrorCode::DisconnectedAt, None, Some(i));
        }
    }

    // 6. Object anchor.
    let last = edges[edges.len() - 1];
    if last.target_id != object_id {
        return invalid(ErrorCode::ChainWrongTerminus, None, None);
    }

    // 7. Capability, if required.
    if let Some(required) = capability {
        if last.capability() != Some(required) {
            return invalid(ErrorCode::CapabilityMismatch, Some(last.id), None);
        }
    }

    ValidationResult::Valid
}

fn invalid(code: ErrorCode, edge_id: Option<EdgeId>, index: Option<usize>) -> ValidationResult {
    ValidationResult::Invalid { code, edge_id, index }
}

/// Whether a denial reason should be flagged `ATTACK` in the audit log
/// (spec §4.3): a client holding a valid snapshot should never be able
/// to construct a chain that is unknown or disconnected, so those
/// specific denials are suspicious rather than merely stale.
pub fn is_attack(code: ErrorCode) -> bool {
    matches!(code, ErrorCode::UnknownEdge | ErrorCode::DisconnectedAt | ErrorCode::ChainWrongTerminus)
}
